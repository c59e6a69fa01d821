//! 硬件页表的 Mock 实现
//!
//! 用 BTreeMap 模拟每进程页表项，包括可写位、访问位和脏位。
//! 测试中调用 trait 的 `set_dirty` 模拟用户态写访问（置脏位和访问位）。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use sync::SpinLock;
use vm::{HwPageTable, Ppn, Vpn};

/// 单个页表项的模拟状态
#[derive(Debug, Clone, Copy)]
struct MockMapping {
    ppn: Ppn,
    writable: bool,
    accessed: bool,
    dirty: bool,
}

/// Mock 的硬件页表
pub struct MockHwPageTable {
    entries: SpinLock<BTreeMap<Vpn, MockMapping>>,
}

impl MockHwPageTable {
    /// 创建空页表
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: SpinLock::new(BTreeMap::new()),
        })
    }

    /// 查询映射的可写位
    pub fn is_writable(&self, vpn: Vpn) -> Option<bool> {
        self.entries.lock().get(&vpn).map(|m| m.writable)
    }

    /// 当前安装的映射数量
    pub fn mapped_count(&self) -> usize {
        self.entries.lock().len()
    }
}

impl HwPageTable for MockHwPageTable {
    fn map(&self, vpn: Vpn, ppn: Ppn, writable: bool) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&vpn) {
            return false;
        }
        entries.insert(
            vpn,
            MockMapping {
                ppn,
                writable,
                accessed: false,
                dirty: false,
            },
        );
        true
    }

    fn clear(&self, vpn: Vpn) {
        self.entries.lock().remove(&vpn);
    }

    fn translate(&self, vpn: Vpn) -> Option<Ppn> {
        self.entries.lock().get(&vpn).map(|m| m.ppn)
    }

    fn is_dirty(&self, vpn: Vpn) -> bool {
        self.entries.lock().get(&vpn).is_some_and(|m| m.dirty)
    }

    fn is_accessed(&self, vpn: Vpn) -> bool {
        self.entries.lock().get(&vpn).is_some_and(|m| m.accessed)
    }

    fn set_accessed(&self, vpn: Vpn, accessed: bool) {
        let mut entries = self.entries.lock();
        if let Some(mapping) = entries.get_mut(&vpn) {
            mapping.accessed = accessed;
        }
    }

    fn set_dirty(&self, vpn: Vpn, dirty: bool) {
        let mut entries = self.entries.lock();
        if let Some(mapping) = entries.get_mut(&vpn) {
            mapping.dirty = dirty;
            // 写访问同时也是一次访问
            if dirty {
                mapping.accessed = true;
            }
        }
    }
}
