//! 内存模拟块设备

use alloc::sync::Arc;
use alloc::vec::Vec;
use sync::SpinLock;
use uapi::mm::SECTOR_SIZE;
use vm::BlockDriver;

/// 内存模拟的块设备
///
/// 用作测试中的交换分区。
pub struct RamDisk {
    /// 存储数据
    data: SpinLock<Vec<u8>>,
}

impl RamDisk {
    /// 创建指定扇区数的内存磁盘
    pub fn new(sectors: usize) -> Arc<Self> {
        Arc::new(Self {
            data: SpinLock::new(alloc::vec![0u8; sectors * SECTOR_SIZE]),
        })
    }

    /// 获取原始数据（用于调试）
    pub fn raw_data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl BlockDriver for RamDisk {
    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> bool {
        if buf.len() != SECTOR_SIZE {
            return false;
        }

        let data = self.data.lock();
        let offset = sector * SECTOR_SIZE;
        if offset + SECTOR_SIZE > data.len() {
            return false;
        }

        buf.copy_from_slice(&data[offset..offset + SECTOR_SIZE]);
        true
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) -> bool {
        if buf.len() != SECTOR_SIZE {
            return false;
        }

        let mut data = self.data.lock();
        let offset = sector * SECTOR_SIZE;
        if offset + SECTOR_SIZE > data.len() {
            return false;
        }

        data[offset..offset + SECTOR_SIZE].copy_from_slice(buf);
        true
    }

    fn size_in_sectors(&self) -> usize {
        self.data.lock().len() / SECTOR_SIZE
    }
}
