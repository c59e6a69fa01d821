//! 帧表模块
//!
//! 本模块提供用户帧池的分配、跟踪和时钟算法驱逐。
//!
//! ## 分配策略（位图）
//!
//! [`FramePool`] 使用位图跟踪每个帧的分配状态：
//!
//! - **bitmap**：每个 bit 表示一个帧（0=空闲，1=已分配）
//! - **last_alloc_hint**：上次分配位置提示，利用局部性加速查找
//!
//! 释放时直接清除对应 bit，O(1) 操作。
//!
//! ## 驱逐（时钟算法）
//!
//! [`FrameTable`] 在池耗尽时从保存的时钟指针开始环形扫描：
//! 跳过不可驱逐的帧；访问位为 1 的帧获得第二次机会（清位后前进）；
//! 否则成为受害者，按后备来源写回后回收。
//! 扫描最多两整圈，仍无受害者则返回 [`VmError::OutOfFrames`]。

use alloc::sync::Arc;
use alloc::vec::Vec;
use sync::SpinLock;
use uapi::mm::PAGE_SIZE;

use crate::address::Ppn;
use crate::error::{VmError, VmResult};
use crate::ops::{BackingFile, HwPageTable};
use crate::page::{PageBacking, PageRef};
use crate::swap::{SlotId, SwapStore};

// ============================================================================
// FramePool - 帧池位图分配器
// ============================================================================

/// 用户帧池
///
/// 持有一块连续的帧内存，采用位图策略跟踪每个帧的分配状态。
pub struct FramePool {
    /// 帧内存
    arena: Vec<u8>,
    /// 位图数据（每个 bit 表示一个帧：0=空闲，1=已分配）
    bitmap: Vec<u64>,
    /// 总帧数
    total_frames: usize,
    /// 已分配帧数（用于快速统计）
    allocated_count: usize,
    /// 上次分配的位置提示（用于加速单帧分配）
    last_alloc_hint: usize,
}

impl FramePool {
    /// 创建拥有 `total_frames` 个帧的帧池
    pub fn new(total_frames: usize) -> Self {
        FramePool {
            arena: alloc::vec![0u8; total_frames * PAGE_SIZE],
            bitmap: alloc::vec![0u64; total_frames.div_ceil(64)],
            total_frames,
            allocated_count: 0,
            last_alloc_hint: 0,
        }
    }

    /// 检查帧是否空闲
    #[inline]
    fn is_free(&self, frame_idx: usize) -> bool {
        (self.bitmap[frame_idx / 64] & (1u64 << (frame_idx % 64))) == 0
    }

    /// 标记帧为已分配
    #[inline]
    fn mark_allocated(&mut self, frame_idx: usize) {
        self.bitmap[frame_idx / 64] |= 1u64 << (frame_idx % 64);
    }

    /// 标记帧为空闲
    #[inline]
    fn mark_free(&mut self, frame_idx: usize) {
        self.bitmap[frame_idx / 64] &= !(1u64 << (frame_idx % 64));
    }

    /// 分配一个帧。
    /// 从 last_alloc_hint 开始循环查找第一个空闲位。
    pub fn alloc(&mut self) -> Option<Ppn> {
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

            // 找到第一个空闲位（trailing_zeros 找最低位的 0）
            let frame_idx = idx * 64 + (!word).trailing_zeros() as usize;
            if frame_idx >= self.total_frames {
                continue;
            }

            self.mark_allocated(frame_idx);
            self.allocated_count += 1;
            self.last_alloc_hint = idx;
            return Some(Ppn::from_usize(frame_idx));
        }

        None // 帧池耗尽
    }

    /// 回收一个帧。
    pub fn free(&mut self, ppn: Ppn) {
        let frame_idx = ppn.as_usize();
        debug_assert!(frame_idx < self.total_frames, "free: frame out of range");
        debug_assert!(!self.is_free(frame_idx), "free: double free detected");

        self.mark_free(frame_idx);
        self.allocated_count -= 1;
    }

    /// 将指定帧清零
    pub fn zero(&mut self, ppn: Ppn) {
        self.frame_mut(ppn).fill(0);
    }

    /// 从帧内偏移处读取数据到缓冲区
    pub fn read(&self, ppn: Ppn, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.frame(ppn)[offset..offset + buf.len()]);
    }

    /// 将缓冲区数据写入帧内偏移处
    pub fn write(&mut self, ppn: Ppn, offset: usize, buf: &[u8]) {
        self.frame_mut(ppn)[offset..offset + buf.len()].copy_from_slice(buf);
    }

    fn frame(&self, ppn: Ppn) -> &[u8] {
        &self.arena[ppn.as_usize() * PAGE_SIZE..][..PAGE_SIZE]
    }

    fn frame_mut(&mut self, ppn: Ppn) -> &mut [u8] {
        &mut self.arena[ppn.as_usize() * PAGE_SIZE..][..PAGE_SIZE]
    }

    /// 获取总帧数
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// 获取已分配的帧数
    pub fn allocated_frames(&self) -> usize {
        self.allocated_count
    }

    /// 获取空闲的帧数
    pub fn free_frames(&self) -> usize {
        self.total_frames - self.allocated_count
    }
}

// ============================================================================
// FrameTable - 帧登记与时钟驱逐
// ============================================================================

/// 帧表项：一个已分配帧及其归属
struct FrameEntry {
    ppn: Ppn,
    /// 归属进程的硬件页表
    space: Arc<dyn HwPageTable>,
    /// 占用此帧的页描述符
    page: PageRef,
}

/// 帧表状态（整体由一把自旋锁保护，分配/驱逐/释放串行执行）
struct FrameTableInner {
    pool: FramePool,
    entries: Vec<FrameEntry>,
    /// 时钟指针，跨多次驱逐保持位置
    hand: usize,
}

/// 帧表
///
/// 拥有用户帧池，登记每个已分配帧的归属，并在池耗尽时执行时钟驱逐。
pub struct FrameTable {
    swap: Arc<SwapStore>,
    inner: SpinLock<FrameTableInner>,
}

/// 受害者的处置方式
enum Victim {
    /// mmap 脏页：写回文件
    WriteFile {
        file: Arc<dyn BackingFile>,
        offset: usize,
        read_len: usize,
    },
    /// 写入交换分区（stale 为待释放的陈旧槽位）
    WriteSwap { stale: Option<SlotId> },
    /// 内容可以从后备来源重建，直接丢弃
    Discard,
}

impl FrameTable {
    /// 创建拥有 `total_frames` 个帧的帧表
    ///
    /// 驱逐路径需要向交换分区写入，因此在构造时注入 [`SwapStore`]。
    pub fn new(total_frames: usize, swap: Arc<SwapStore>) -> Self {
        FrameTable {
            swap,
            inner: SpinLock::new(FrameTableInner {
                pool: FramePool::new(total_frames),
                entries: Vec::new(),
                hand: 0,
            }),
        }
    }

    /// 为页描述符分配一个帧
    ///
    /// 池耗尽时先驱逐一个受害者再重试一次。
    /// `zeroed` 为 true 时帧内容清零。
    ///
    /// # 错误
    /// - [`VmError::OutOfFrames`]: 两整圈扫描未找到可驱逐的受害者
    /// - [`VmError::SwapExhausted`]: 受害者换出时交换槽位耗尽
    pub fn allocate(
        &self,
        zeroed: bool,
        space: &Arc<dyn HwPageTable>,
        page: &PageRef,
    ) -> VmResult<Ppn> {
        let mut inner = self.inner.lock();

        let ppn = match inner.pool.alloc() {
            Some(ppn) => ppn,
            None => {
                Self::evict_one(&mut inner, &self.swap)?;
                inner.pool.alloc().ok_or(VmError::OutOfFrames)?
            }
        };

        if zeroed {
            inner.pool.zero(ppn);
        }

        inner.entries.push(FrameEntry {
            ppn,
            space: space.clone(),
            page: page.clone(),
        });

        Ok(ppn)
    }

    /// 释放一个帧并移除其登记项
    pub fn free(&self, ppn: Ppn) {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.entries.iter().position(|e| e.ppn == ppn) {
            inner.entries.remove(idx);
            if idx < inner.hand {
                inner.hand -= 1;
            }
        }
        inner.pool.free(ppn);
    }

    /// 从帧内偏移处读取数据到缓冲区
    pub fn read_frame(&self, ppn: Ppn, offset: usize, buf: &mut [u8]) {
        self.inner.lock().pool.read(ppn, offset, buf);
    }

    /// 将缓冲区数据写入帧内偏移处
    pub fn write_frame(&self, ppn: Ppn, offset: usize, buf: &[u8]) {
        self.inner.lock().pool.write(ppn, offset, buf);
    }

    /// 交换槽位分配器
    pub fn swap_store(&self) -> &Arc<SwapStore> {
        &self.swap
    }

    /// 帧池容量
    pub fn capacity(&self) -> usize {
        self.inner.lock().pool.total_frames()
    }

    /// 已分配的帧数
    pub fn allocated_frames(&self) -> usize {
        self.inner.lock().pool.allocated_frames()
    }

    /// 时钟算法驱逐一个受害者帧
    ///
    /// 从保存的时钟指针开始环形扫描，最多两整圈：
    /// - 页锁被占用或不可驱逐：跳过
    /// - 访问位为 1：清位，第二次机会
    /// - 否则按后备来源写回并回收
    fn evict_one(inner: &mut FrameTableInner, swap: &SwapStore) -> VmResult<()> {
        if inner.entries.is_empty() {
            return Err(VmError::OutOfFrames);
        }

        let limit = inner.entries.len() * 2;
        for _ in 0..limit {
            if inner.hand >= inner.entries.len() {
                inner.hand = 0;
            }
            let idx = inner.hand;
            let (ppn, space, page_ref) = {
                let entry = &inner.entries[idx];
                (entry.ppn, entry.space.clone(), entry.page.clone())
            };

            // 持锁中的页正在被其它路径操作，本圈视为不可驱逐
            let Some(mut page) = page_ref.try_lock() else {
                inner.hand = idx + 1;
                continue;
            };
            if !page.evictable {
                inner.hand = idx + 1;
                continue;
            }

            let vpn = page.vpn;
            if space.is_accessed(vpn) {
                // 第二次机会
                space.set_accessed(vpn, false);
                inner.hand = idx + 1;
                continue;
            }

            let dirty = space.is_dirty(vpn);
            let victim = match &page.backing {
                PageBacking::File {
                    file,
                    offset,
                    read_len,
                    mmap,
                    ..
                } => {
                    if *mmap && dirty {
                        Victim::WriteFile {
                            file: file.clone(),
                            offset: *offset,
                            read_len: *read_len,
                        }
                    } else if !*mmap && dirty {
                        // 私有文件页变脏后改为交换后备
                        Victim::WriteSwap { stale: None }
                    } else {
                        Victim::Discard
                    }
                }
                // 槽位已被一次性读取消耗（None）时必须重写；
                // 带陈旧槽位的脏页重写后释放旧槽位
                PageBacking::Swap { slot } => {
                    if dirty || slot.is_none() {
                        Victim::WriteSwap { stale: *slot }
                    } else {
                        Victim::Discard
                    }
                }
                PageBacking::Zero => {
                    if dirty {
                        Victim::WriteSwap { stale: None }
                    } else {
                        Victim::Discard
                    }
                }
            };

            match victim {
                Victim::WriteFile {
                    file,
                    offset,
                    read_len,
                } => {
                    let mut buf = alloc::vec![0u8; read_len];
                    inner.pool.read(ppn, 0, &mut buf);
                    match file.write_at(offset, &buf) {
                        Ok(n) if n == read_len => {}
                        Ok(n) => {
                            log::warn!("evict: partial write-back at offset {offset}: {n}/{read_len}");
                            return Err(VmError::Io);
                        }
                        Err(err) => {
                            log::error!("evict: write-back failed at offset {offset}: {err}");
                            return Err(VmError::Io);
                        }
                    }
                }
                Victim::WriteSwap { stale } => {
                    let mut buf = alloc::vec![0u8; PAGE_SIZE];
                    inner.pool.read(ppn, 0, &mut buf);
                    let slot = swap.write(&buf)?;
                    if let Some(old) = stale {
                        swap.release(old);
                    }
                    page.backing = PageBacking::Swap { slot: Some(slot) };
                }
                Victim::Discard => {}
            }

            space.clear(vpn);
            page.resident = None;
            drop(page);

            inner.entries.remove(idx);
            inner.pool.free(ppn);
            log::debug!("evict: reclaimed frame {}", ppn.as_usize());
            return Ok(());
        }

        Err(VmError::OutOfFrames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_alloc_free_counts() {
        let mut pool = FramePool::new(4);
        assert_eq!(pool.total_frames(), 4);
        assert_eq!(pool.free_frames(), 4);

        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.allocated_frames(), 2);

        pool.free(a);
        assert_eq!(pool.allocated_frames(), 1);
        assert_eq!(pool.free_frames(), 3);
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut pool = FramePool::new(2);
        assert!(pool.alloc().is_some());
        assert!(pool.alloc().is_some());
        assert!(pool.alloc().is_none());
    }

    #[test]
    fn test_pool_data_roundtrip() {
        let mut pool = FramePool::new(1);
        let ppn = pool.alloc().unwrap();
        pool.write(ppn, 100, &[1, 2, 3]);

        let mut buf = [0u8; 3];
        pool.read(ppn, 100, &mut buf);
        assert_eq!(buf, [1, 2, 3]);

        pool.zero(ppn);
        pool.read(ppn, 100, &mut buf);
        assert_eq!(buf, [0, 0, 0]);
    }

    #[test]
    fn test_pool_empty() {
        let mut pool = FramePool::new(0);
        assert!(pool.alloc().is_none());
    }
}
