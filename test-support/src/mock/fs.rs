//! 后备文件的 Mock 实现

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use sync::SpinLock;
use vm::BackingFile;

/// 内存模拟的后备文件
///
/// 大小固定：读写都不会越过文件末尾。
pub struct MockFile {
    /// 文件内容
    data: SpinLock<Vec<u8>>,
    /// deny_write 计数（非零表示拒绝写入）
    deny_count: AtomicUsize,
}

impl MockFile {
    /// 创建指定大小的全零文件
    pub fn new(size: usize) -> Arc<Self> {
        Self::from_bytes(alloc::vec![0u8; size])
    }

    /// 从字节数组创建
    pub fn from_bytes(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: SpinLock::new(data),
            deny_count: AtomicUsize::new(0),
        })
    }

    /// 获取当前文件内容（用于断言写回结果）
    pub fn raw_data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// 当前是否拒绝写入
    pub fn write_denied(&self) -> bool {
        self.deny_count.load(Ordering::Acquire) > 0
    }
}

impl BackingFile for MockFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        let data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
        if self.write_denied() {
            return Err(-13);
        }
        let mut data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    fn length(&self) -> usize {
        self.data.lock().len()
    }

    fn deny_write(&self) {
        self.deny_count.fetch_add(1, Ordering::AcqRel);
    }

    fn allow_write(&self) {
        self.deny_count.fetch_sub(1, Ordering::AcqRel);
    }
}
