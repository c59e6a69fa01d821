//! 补充页描述符
//!
//! 每个用户虚拟页对应一个 [`Page`]，记录其驻留状态和后备来源。
//! 描述符由 [`MemorySpace`](crate::MemorySpace) 和帧表共享，
//! 以 `Arc<SpinLock<Page>>` 的形式传递。

use alloc::sync::Arc;
use core::fmt;
use sync::SpinLock;
use uapi::mm::MapId;

use crate::address::{Ppn, Vpn};
use crate::ops::BackingFile;
use crate::swap::SlotId;

/// 页描述符的共享句柄
pub type PageRef = Arc<SpinLock<Page>>;

/// 页面的后备来源
///
/// 一个页面不可能同时由文件和交换分区后备；
/// 槽位号只存在于 `Swap` 变体中，在被一次性读取消耗后变为 `None`。
pub enum PageBacking {
    /// 文件后备：缺页时从文件读取 `read_len` 字节，余下 `zero_len` 字节清零
    File {
        /// 后备文件
        file: Arc<dyn BackingFile>,
        /// 文件内的读取起始偏移
        offset: usize,
        /// 从文件读取的字节数
        read_len: usize,
        /// 尾部清零的字节数
        zero_len: usize,
        /// 是否为 mmap 页（脏页驱逐时写回文件而不是交换分区）
        mmap: bool,
    },
    /// 交换分区后备
    ///
    /// `Some(slot)` 表示内容在交换分区中等待读取；
    /// `None` 表示槽位已被一次性读取释放，内容只存在于内存中，
    /// 驱逐时必须重新写入新槽位。
    Swap {
        /// 交换槽位号
        slot: Option<SlotId>,
    },
    /// 全零页：缺页时直接提供清零帧
    Zero,
}

impl fmt::Debug for PageBacking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageBacking::File {
                offset,
                read_len,
                zero_len,
                mmap,
                ..
            } => f
                .debug_struct("File")
                .field("offset", offset)
                .field("read_len", read_len)
                .field("zero_len", zero_len)
                .field("mmap", mmap)
                .finish(),
            PageBacking::Swap { slot } => f.debug_struct("Swap").field("slot", slot).finish(),
            PageBacking::Zero => f.write_str("Zero"),
        }
    }
}

/// 补充页描述符
#[derive(Debug)]
pub struct Page {
    /// 虚拟页号（注册表键）
    pub(crate) vpn: Vpn,
    /// 是否可写
    pub(crate) writable: bool,
    /// 是否允许被驱逐
    ///
    /// 仅在帧分配到映射安装完成之间、以及描述符创建到首次调入之间为 false。
    pub(crate) evictable: bool,
    /// 驻留的物理帧；None 表示未驻留
    pub(crate) resident: Option<Ppn>,
    /// 后备来源
    pub(crate) backing: PageBacking,
    /// 所属的文件映射组（仅 mmap 页）
    pub(crate) map_id: Option<MapId>,
}

impl Page {
    /// 创建文件后备页（可执行文件段的惰性加载）
    pub fn new_file(
        vpn: Vpn,
        file: Arc<dyn BackingFile>,
        offset: usize,
        read_len: usize,
        zero_len: usize,
        writable: bool,
    ) -> Self {
        Page {
            vpn,
            writable,
            evictable: false,
            resident: None,
            backing: PageBacking::File {
                file,
                offset,
                read_len,
                zero_len,
                mmap: false,
            },
            map_id: None,
        }
    }

    /// 创建 mmap 页
    ///
    /// mmap 页总是可写，脏页驱逐和解除映射时写回文件。
    pub fn new_mmap(
        vpn: Vpn,
        file: Arc<dyn BackingFile>,
        offset: usize,
        read_len: usize,
        zero_len: usize,
        map_id: MapId,
    ) -> Self {
        Page {
            vpn,
            writable: true,
            evictable: false,
            resident: None,
            backing: PageBacking::File {
                file,
                offset,
                read_len,
                zero_len,
                mmap: true,
            },
            map_id: Some(map_id),
        }
    }

    /// 创建全零页（用户栈）
    pub fn new_zero(vpn: Vpn, writable: bool) -> Self {
        Page {
            vpn,
            writable,
            evictable: false,
            resident: None,
            backing: PageBacking::Zero,
            map_id: None,
        }
    }

    /// 虚拟页号
    pub fn vpn(&self) -> Vpn {
        self.vpn
    }

    /// 是否可写
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// 是否驻留在物理帧中
    pub fn is_resident(&self) -> bool {
        self.resident.is_some()
    }

    /// 驻留的物理帧号
    pub fn frame(&self) -> Option<Ppn> {
        self.resident
    }

    /// 后备来源
    pub fn backing(&self) -> &PageBacking {
        &self.backing
    }

    /// 所属的文件映射组
    pub fn map_id(&self) -> Option<MapId> {
        self.map_id
    }
}
