//! 每进程内存空间（补充页表）
//!
//! [`MemorySpace`] 以 vpn 为键登记本进程所有虚拟页的描述符，
//! 是缺页处理的事实来源：硬件页表只反映当前驻留的映射，
//! 描述符记录未驻留页面的重建方式。
//!
//! 同时维护文件映射组（mmap）的显式分组，按组解除映射。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use sync::SpinLock;
use uapi::mm::{MAP_ALL, MapId, PAGE_SIZE};

use crate::address::{Ppn, Vaddr, Vpn};
use crate::config::VmConfig;
use crate::error::{VmError, VmResult};
use crate::frame::FrameTable;
use crate::ops::{BackingFile, HwPageTable};
use crate::page::{Page, PageBacking, PageRef};
use crate::swap::{SlotId, SwapStore};

/// 注册表状态（描述符表与映射组，由自旋锁保护）
struct SpaceInner {
    pages: BTreeMap<Vpn, PageRef>,
    /// 文件映射组：组标识 -> 组内页面
    maps: BTreeMap<MapId, Vec<Vpn>>,
    next_map_id: MapId,
}

/// 每进程内存空间
pub struct MemorySpace {
    hw: Arc<dyn HwPageTable>,
    frames: Arc<FrameTable>,
    swap: Arc<SwapStore>,
    config: VmConfig,
    inner: SpinLock<SpaceInner>,
}

/// 调入时的填充来源（在页锁外执行 I/O 用）
enum Fill {
    File {
        file: Arc<dyn BackingFile>,
        offset: usize,
        read_len: usize,
    },
    Swap(SlotId),
    Zero,
}

impl MemorySpace {
    /// 创建进程内存空间
    ///
    /// 所有协作者以显式对象注入：硬件页表、帧表和布局配置。
    pub fn new(hw: Arc<dyn HwPageTable>, frames: Arc<FrameTable>, config: VmConfig) -> Self {
        let swap = frames.swap_store().clone();
        MemorySpace {
            hw,
            frames,
            swap,
            config,
            inner: SpinLock::new(SpaceInner {
                pages: BTreeMap::new(),
                maps: BTreeMap::new(),
                next_map_id: 0,
            }),
        }
    }

    /// 布局配置
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub(crate) fn hw(&self) -> &Arc<dyn HwPageTable> {
        &self.hw
    }

    /// 已注册的页描述符数量
    pub fn registered_pages(&self) -> usize {
        self.inner.lock().pages.len()
    }

    /// 注册一个页描述符
    ///
    /// 若 vpn 已有描述符则不覆盖并返回 false。
    pub fn insert(&self, page: Page) -> bool {
        let mut inner = self.inner.lock();
        let vpn = page.vpn();
        if inner.pages.contains_key(&vpn) {
            return false;
        }
        inner.pages.insert(vpn, Arc::new(SpinLock::new(page)));
        true
    }

    /// 按虚拟地址查找页描述符
    pub fn lookup(&self, addr: Vaddr) -> Option<PageRef> {
        self.lookup_vpn(Vpn::from_addr_floor(addr))
    }

    /// 按虚拟页号查找页描述符
    pub fn lookup_vpn(&self, vpn: Vpn) -> Option<PageRef> {
        self.inner.lock().pages.get(&vpn).cloned()
    }

    fn remove_page(&self, vpn: Vpn) {
        self.inner.lock().pages.remove(&vpn);
    }

    /// 将一个未驻留页调入物理帧
    ///
    /// 分配帧、按后备来源填充、安装硬件映射，三步全部成功后
    /// 页面才标记为驻留并重新变为可驱逐。任一步失败时帧被释放，
    /// 页面保持未驻留。
    ///
    /// # 错误
    /// - [`VmError::AlreadyResident`]: 页面已驻留（伪缺页）
    /// - [`VmError::Io`]: 文件短读或设备故障
    /// - [`VmError::InstallFailure`]: 硬件映射安装失败
    /// - 以及帧分配传播的 [`VmError::OutOfFrames`] / [`VmError::SwapExhausted`]
    pub fn resolve(&self, page: &PageRef) -> VmResult<()> {
        // 取出填充所需信息；I/O 在页锁外执行
        let (vpn, writable, fill) = {
            let mut guard = page.lock();
            if guard.resident.is_some() {
                return Err(VmError::AlreadyResident);
            }
            guard.evictable = false;
            let fill = match &guard.backing {
                PageBacking::File {
                    file,
                    offset,
                    read_len,
                    ..
                } => {
                    if *read_len == 0 {
                        Fill::Zero
                    } else {
                        Fill::File {
                            file: file.clone(),
                            offset: *offset,
                            read_len: *read_len,
                        }
                    }
                }
                PageBacking::Swap { slot: Some(slot) } => Fill::Swap(*slot),
                // 未驻留页的槽位不可能已被消耗
                PageBacking::Swap { slot: None } => {
                    debug_assert!(false, "non-resident page with consumed swap slot");
                    Fill::Zero
                }
                PageBacking::Zero => Fill::Zero,
            };
            (guard.vpn, guard.writable, fill)
        };

        // 不会被完整覆写的帧需要预先清零
        let zeroed = match &fill {
            Fill::Zero => true,
            Fill::File { read_len, .. } => *read_len < PAGE_SIZE,
            Fill::Swap(_) => false,
        };

        let ppn = self.frames.allocate(zeroed, &self.hw, page)?;

        match fill {
            Fill::File {
                file,
                offset,
                read_len,
            } => {
                let mut buf = alloc::vec![0u8; read_len];
                match file.read_at(offset, &mut buf) {
                    Ok(n) if n == read_len => {}
                    Ok(n) => {
                        log::warn!("resolve: partial read at offset {offset}: {n}/{read_len}");
                        self.frames.free(ppn);
                        return Err(VmError::Io);
                    }
                    Err(err) => {
                        log::error!("resolve: read failed at offset {offset}: {err}");
                        self.frames.free(ppn);
                        return Err(VmError::Io);
                    }
                }
                self.frames.write_frame(ppn, 0, &buf);
            }
            Fill::Swap(slot) => {
                let mut buf = alloc::vec![0u8; PAGE_SIZE];
                let result = self.swap.read(slot, &mut buf);
                // 一次性读取：无论成败槽位都已释放
                {
                    let mut guard = page.lock();
                    if let PageBacking::Swap { slot } = &mut guard.backing {
                        *slot = None;
                    }
                }
                if let Err(err) = result {
                    self.frames.free(ppn);
                    return Err(err);
                }
                self.frames.write_frame(ppn, 0, &buf);
            }
            Fill::Zero => {}
        }

        if !self.hw.map(vpn, ppn, writable) {
            self.frames.free(ppn);
            return Err(VmError::InstallFailure);
        }

        let mut guard = page.lock();
        guard.resident = Some(ppn);
        guard.evictable = true;
        Ok(())
    }

    /// 缺页处理入口
    ///
    /// 返回 false 表示该地址无法修复，调用方应终止进程。
    pub fn resolve_fault(&self, addr: Vaddr) -> bool {
        if !self.config.is_user_addr(addr) {
            return false;
        }
        let Some(page) = self.lookup(addr) else {
            return false;
        };
        match self.resolve(&page) {
            Ok(()) => true,
            // 伪缺页：并发路径已完成调入
            Err(VmError::AlreadyResident) => true,
            Err(err) => {
                log::warn!(
                    "fault at {:#x} unresolvable: {:?}",
                    addr.as_usize(),
                    err
                );
                false
            }
        }
    }

    /// 为 `addr` 所在的页扩展用户栈
    ///
    /// 注册一个全零页并立即调入。从栈顶到 `addr` 的跨度超过
    /// 栈上限时返回 [`VmError::StackLimit`]，不分配任何资源。
    pub fn grow_stack(&self, addr: Vaddr) -> VmResult<()> {
        if !self.config.is_user_addr(addr) {
            return Err(VmError::InvalidUserPointer);
        }
        if self.config.user_top.as_usize() - addr.as_usize() > self.config.stack_limit {
            return Err(VmError::StackLimit);
        }

        let vpn = Vpn::from_addr_floor(addr);
        let page = {
            let mut inner = self.inner.lock();
            if inner.pages.contains_key(&vpn) {
                return Err(VmError::AlreadyMapped);
            }
            let page = Arc::new(SpinLock::new(Page::new_zero(vpn, true)));
            inner.pages.insert(vpn, page.clone());
            page
        };
        if let Err(err) = self.resolve(&page) {
            self.remove_page(vpn);
            return Err(err);
        }
        Ok(())
    }

    /// 将文件映射到以 `base` 起始的连续虚拟页
    ///
    /// 每 [`PAGE_SIZE`] 字节注册一个描述符，整组共享一个新的 [`MapId`]。
    /// 与已注册页冲突时整组失败，不留下部分注册。
    pub fn mmap(&self, file: Arc<dyn BackingFile>, base: Vaddr) -> VmResult<MapId> {
        if base.as_usize() == 0 || !base.is_page_aligned() {
            return Err(VmError::InvalidArgument);
        }
        let len = file.length();
        if len == 0 {
            return Err(VmError::InvalidArgument);
        }
        let end = base.as_usize().checked_add(len).ok_or(VmError::InvalidArgument)?;
        if end > self.config.user_top.as_usize() {
            return Err(VmError::InvalidArgument);
        }

        let npages = len.div_ceil(PAGE_SIZE);
        let start_vpn = Vpn::from_addr_floor(base);

        let mut inner = self.inner.lock();

        // 先检查整个区间无冲突再注册，避免部分回滚
        for i in 0..npages {
            if inner.pages.contains_key(&Vpn::from_usize(start_vpn.as_usize() + i)) {
                return Err(VmError::AlreadyMapped);
            }
        }

        let map_id = inner.next_map_id;
        inner.next_map_id += 1;

        let mut vpns = Vec::with_capacity(npages);
        let mut remaining = len;
        let mut offset = 0usize;
        for i in 0..npages {
            let vpn = Vpn::from_usize(start_vpn.as_usize() + i);
            let read_len = remaining.min(PAGE_SIZE);
            let zero_len = PAGE_SIZE - read_len;
            let page = Page::new_mmap(vpn, file.clone(), offset, read_len, zero_len, map_id);
            inner.pages.insert(vpn, Arc::new(SpinLock::new(page)));
            vpns.push(vpn);
            remaining -= read_len;
            offset += read_len;
        }
        inner.maps.insert(map_id, vpns);

        Ok(map_id)
    }

    /// 解除一个文件映射组，或以 [`MAP_ALL`] 解除全部映射组
    ///
    /// 脏的驻留页先写回文件对应偏移，然后清除硬件映射、
    /// 释放帧并移除描述符。
    pub fn munmap(&self, id: MapId) -> VmResult<()> {
        if id == MAP_ALL {
            loop {
                let next = { self.inner.lock().maps.keys().next().copied() };
                match next {
                    Some(id) => self.munmap_group(id)?,
                    None => return Ok(()),
                }
            }
        } else {
            self.munmap_group(id)
        }
    }

    fn munmap_group(&self, id: MapId) -> VmResult<()> {
        let vpns = self
            .inner
            .lock()
            .maps
            .remove(&id)
            .ok_or(VmError::BadMapId)?;

        for vpn in vpns {
            let removed = { self.inner.lock().pages.remove(&vpn) };
            let Some(page_ref) = removed else {
                continue;
            };
            let mut page = page_ref.lock();
            page.evictable = false;
            if let Some(ppn) = page.resident.take() {
                if self.hw.is_dirty(vpn) {
                    if let PageBacking::File {
                        file,
                        offset,
                        read_len,
                        ..
                    } = &page.backing
                    {
                        let mut buf = alloc::vec![0u8; *read_len];
                        self.frames.read_frame(ppn, 0, &mut buf);
                        match file.write_at(*offset, &buf) {
                            Ok(n) if n == *read_len => {}
                            Ok(n) => log::warn!(
                                "munmap: partial write-back at offset {}: {}/{}",
                                offset,
                                n,
                                read_len
                            ),
                            Err(err) => {
                                log::error!("munmap: write-back failed at offset {offset}: {err}")
                            }
                        }
                    }
                }
                self.hw.clear(vpn);
                self.frames.free(ppn);
            }
        }
        Ok(())
    }

    /// 销毁内存空间，回收全部资源
    ///
    /// 清除驻留页的硬件映射并释放帧，回收仍被占用的交换槽位。
    /// mmap 页的写回属于解除映射路径，进程退出应先调用
    /// `munmap(MAP_ALL)` 再调用本方法。
    pub fn destroy(&self) {
        let pages = {
            let mut inner = self.inner.lock();
            inner.maps.clear();
            core::mem::take(&mut inner.pages)
        };

        for (vpn, page_ref) in pages {
            let mut page = page_ref.lock();
            page.evictable = false;
            if let Some(ppn) = page.resident.take() {
                self.hw.clear(vpn);
                self.frames.free(ppn);
            }
            if let PageBacking::Swap { slot: Some(slot) } = page.backing {
                self.swap.release(slot);
            }
        }
    }

    /// 查找 vpn 的描述符，调入（如需要）并钉住其驻留帧
    ///
    /// 返回时页面处于不可驱逐状态，帧号在调用方恢复 evictable
    /// 之前保持有效。驻留状态在钉住和调入之间可能被并发驱逐改变，
    /// 因此循环重查直到在页锁内确认驻留。
    fn pin_resident(&self, vpn: Vpn) -> VmResult<(PageRef, Ppn)> {
        let page = self.lookup_vpn(vpn).ok_or(VmError::InvalidUserPointer)?;
        loop {
            {
                let mut guard = page.lock();
                if let Some(ppn) = guard.resident {
                    guard.evictable = false;
                    return Ok((page.clone(), ppn));
                }
            }
            match self.resolve(&page) {
                // 并发路径已完成调入，重新在页锁内确认
                Ok(()) | Err(VmError::AlreadyResident) => {}
                Err(err) => return Err(err),
            }
        }
    }

    /// 从用户虚拟地址读取数据（跨页自动处理，必要时调入）
    ///
    /// 每个页在帧访问期间被钉住，不会被并发驱逐释放。
    pub fn read_bytes(&self, addr: Vaddr, buf: &mut [u8]) -> VmResult<()> {
        let mut pos = 0;
        let mut cur = addr.as_usize();
        while pos < buf.len() {
            let va = Vaddr::new(cur);
            let (page, ppn) = self.pin_resident(Vpn::from_addr_floor(va))?;
            let off = va.page_offset();
            let n = (PAGE_SIZE - off).min(buf.len() - pos);
            self.frames.read_frame(ppn, off, &mut buf[pos..pos + n]);
            page.lock().evictable = true;
            pos += n;
            cur += n;
        }
        Ok(())
    }

    /// 向用户虚拟地址写入数据（跨页自动处理，必要时调入）
    ///
    /// 内核写入不经过用户映射，硬件不会置脏位，这里显式置位，
    /// 保证写入的内容在驱逐时被写回而不是丢弃。
    pub fn write_bytes(&self, addr: Vaddr, data: &[u8]) -> VmResult<()> {
        let mut pos = 0;
        let mut cur = addr.as_usize();
        while pos < data.len() {
            let va = Vaddr::new(cur);
            let vpn = Vpn::from_addr_floor(va);
            let (page, ppn) = self.pin_resident(vpn)?;
            let off = va.page_offset();
            let n = (PAGE_SIZE - off).min(data.len() - pos);
            self.frames.write_frame(ppn, off, &data[pos..pos + n]);
            self.hw.set_dirty(vpn, true);
            page.lock().evictable = true;
            pos += n;
            cur += n;
        }
        Ok(())
    }
}
