//! 交换槽位分配器
//!
//! 以位图跟踪交换分区中每个页面大小的槽位。
//! 槽位遵循一次性读取语义：[`SwapStore::read`] 在读取前即释放槽位，
//! 同一槽位不会被读取两次；被换入的页面再次驱逐时写入新槽位。

use alloc::sync::Arc;
use alloc::vec::Vec;
use sync::SpinLock;
use uapi::mm::{PAGE_SIZE, SECTOR_SIZE, SECTORS_PER_PAGE};

use crate::error::{VmError, VmResult};
use crate::ops::BlockDriver;

/// 交换槽位号
pub type SlotId = usize;

/// 交换槽位分配器
pub struct SwapStore {
    /// 交换分区所在的块设备
    device: Arc<dyn BlockDriver>,
    /// 位图状态，由自旋锁保护
    inner: SpinLock<SwapMap>,
}

/// 槽位位图（每个 bit 表示一个槽位：0=空闲，1=已占用）
struct SwapMap {
    bitmap: Vec<u64>,
    total_slots: usize,
    used_slots: usize,
    /// 上次分配的位置提示（用于加速查找）
    last_alloc_hint: usize,
}

impl SwapMap {
    #[inline]
    fn is_free(&self, slot: usize) -> bool {
        (self.bitmap[slot / 64] & (1u64 << (slot % 64))) == 0
    }

    #[inline]
    fn mark_used(&mut self, slot: usize) {
        self.bitmap[slot / 64] |= 1u64 << (slot % 64);
    }

    #[inline]
    fn mark_free(&mut self, slot: usize) {
        self.bitmap[slot / 64] &= !(1u64 << (slot % 64));
    }

    /// 从 last_alloc_hint 开始循环查找第一个空闲槽位
    fn alloc(&mut self) -> Option<SlotId> {
        let bitmap_len = self.bitmap.len();
        if bitmap_len == 0 {
            return None;
        }

        let start_idx = self.last_alloc_hint;
        for offset in 0..bitmap_len {
            let idx = (start_idx + offset) % bitmap_len;
            let word = self.bitmap[idx];

            // 快速跳过全满的 u64
            if word == u64::MAX {
                continue;
            }

            let bit_pos = (!word).trailing_zeros() as usize;
            let slot = idx * 64 + bit_pos;
            if slot >= self.total_slots {
                continue;
            }

            self.mark_used(slot);
            self.used_slots += 1;
            self.last_alloc_hint = idx;
            return Some(slot);
        }

        None
    }
}

impl SwapStore {
    /// 基于块设备创建交换槽位分配器
    ///
    /// 槽位数由设备容量决定（每个槽位占 [`SECTORS_PER_PAGE`] 个扇区）。
    pub fn new(device: Arc<dyn BlockDriver>) -> Self {
        let total_slots = device.size_in_sectors() / SECTORS_PER_PAGE;
        let bitmap_len = total_slots.div_ceil(64);
        SwapStore {
            device,
            inner: SpinLock::new(SwapMap {
                bitmap: alloc::vec![0u64; bitmap_len],
                total_slots,
                used_slots: 0,
                last_alloc_hint: 0,
            }),
        }
    }

    /// 将一个页面写入空闲槽位
    ///
    /// 成功时返回槽位号；槽位耗尽时返回 [`VmError::SwapExhausted`]，
    /// 调用方（驱逐路径）决定如何处理。
    pub fn write(&self, page: &[u8]) -> VmResult<SlotId> {
        debug_assert_eq!(page.len(), PAGE_SIZE);

        let slot = {
            let mut map = self.inner.lock();
            map.alloc().ok_or(VmError::SwapExhausted)?
        };

        for i in 0..SECTORS_PER_PAGE {
            let buf = &page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
            if !self.device.write_sector(slot * SECTORS_PER_PAGE + i, buf) {
                log::error!("swap: write failure at slot {slot}");
                self.release(slot);
                return Err(VmError::Io);
            }
        }

        Ok(slot)
    }

    /// 一次性读取槽位内容到缓冲区
    ///
    /// 读取前即释放槽位。调用方若需要再次换出，必须重新 [`SwapStore::write`]。
    pub fn read(&self, slot: SlotId, page: &mut [u8]) -> VmResult<()> {
        debug_assert_eq!(page.len(), PAGE_SIZE);

        {
            let mut map = self.inner.lock();
            if slot >= map.total_slots || map.is_free(slot) {
                return Err(VmError::Io);
            }
            map.mark_free(slot);
            map.used_slots -= 1;
        }

        for i in 0..SECTORS_PER_PAGE {
            let buf = &mut page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
            if !self.device.read_sector(slot * SECTORS_PER_PAGE + i, buf) {
                log::error!("swap: read failure at slot {slot}");
                return Err(VmError::Io);
            }
        }

        Ok(())
    }

    /// 释放一个未读取的槽位（进程退出时回收）
    pub fn release(&self, slot: SlotId) {
        let mut map = self.inner.lock();
        debug_assert!(slot < map.total_slots);
        if !map.is_free(slot) {
            map.mark_free(slot);
            map.used_slots -= 1;
        }
    }

    /// 槽位总数
    pub fn total_slots(&self) -> usize {
        self.inner.lock().total_slots
    }

    /// 已占用的槽位数
    pub fn used_slots(&self) -> usize {
        self.inner.lock().used_slots
    }
}
