//! 地址与页号抽象
//!
//! 提供虚拟地址、虚拟页号和物理页号的 newtype 封装，
//! 避免裸 usize 在接口间混用。

use uapi::mm::PAGE_SIZE;

/// 虚拟地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Vaddr(usize);

impl Vaddr {
    /// 从 usize 构造虚拟地址
    pub const fn new(addr: usize) -> Self {
        Vaddr(addr)
    }

    /// 转换为 usize
    pub const fn as_usize(&self) -> usize {
        self.0
    }

    /// 页内偏移
    pub const fn page_offset(&self) -> usize {
        self.0 % PAGE_SIZE
    }

    /// 是否页对齐
    pub const fn is_page_aligned(&self) -> bool {
        self.page_offset() == 0
    }
}

/// 虚拟页号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Vpn(usize);

impl Vpn {
    /// 从 usize 构造页号
    pub const fn from_usize(vpn: usize) -> Self {
        Vpn(vpn)
    }

    /// 地址向下取整到页号
    pub const fn from_addr_floor(addr: Vaddr) -> Self {
        Vpn(addr.as_usize() / PAGE_SIZE)
    }

    /// 地址向上取整到页号
    pub const fn from_addr_ceil(addr: Vaddr) -> Self {
        Vpn(addr.as_usize().div_ceil(PAGE_SIZE))
    }

    /// 页号对应的起始虚拟地址
    pub const fn start_addr(&self) -> Vaddr {
        Vaddr(self.0 * PAGE_SIZE)
    }

    /// 转换为 usize
    pub const fn as_usize(&self) -> usize {
        self.0
    }
}

/// 物理页号
///
/// 在本子系统中，Ppn 是用户帧池内的帧下标。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ppn(usize);

impl Ppn {
    /// 从 usize 构造物理页号
    pub const fn from_usize(ppn: usize) -> Self {
        Ppn(ppn)
    }

    /// 转换为 usize
    pub const fn as_usize(&self) -> usize {
        self.0
    }
}

/// 左闭右开的虚拟页号区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VpnRange {
    start: Vpn,
    end: Vpn,
}

impl VpnRange {
    /// 创建区间 [start, end)
    pub const fn new(start: Vpn, end: Vpn) -> Self {
        VpnRange { start, end }
    }

    /// 从起始页号和页数创建区间
    pub const fn from_start_len(start: Vpn, len: usize) -> Self {
        VpnRange {
            start,
            end: Vpn(start.0 + len),
        }
    }

    /// 区间内的页数
    pub const fn len(&self) -> usize {
        self.end.0 - self.start.0
    }

    /// 区间是否为空
    pub const fn is_empty(&self) -> bool {
        self.start.0 >= self.end.0
    }
}

impl Iterator for VpnRange {
    type Item = Vpn;

    fn next(&mut self) -> Option<Vpn> {
        if self.start.0 < self.end.0 {
            let vpn = self.start;
            self.start = Vpn(self.start.0 + 1);
            Some(vpn)
        } else {
            None
        }
    }
}
