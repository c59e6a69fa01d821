//! 用户指针校验
//!
//! 系统调用入口在解引用任何用户提供的指针前逐字节探测：
//! 空指针和内核地址直接判定非法；未映射但可通过缺页修复的
//! 地址（惰性段、交换页）视为合法。校验失败返回
//! [`VmError::InvalidUserPointer`]，由系统调用层以
//! `uapi::process::EXIT_FAILURE` 终止当前进程，内核不会 panic。

use alloc::vec::Vec;

use crate::address::{Vaddr, Vpn, VpnRange};
use crate::error::{VmError, VmResult};
use crate::space::MemorySpace;

/// 校验用户缓冲区 [ptr, ptr + len)
///
/// 逐字节探测：每个地址必须位于用户地址空间内，
/// 且已映射或可以通过缺页路径调入。
pub fn check_user_span(space: &MemorySpace, ptr: usize, len: usize) -> VmResult<()> {
    if ptr == 0 {
        return Err(VmError::InvalidUserPointer);
    }
    let end = ptr.checked_add(len).ok_or(VmError::InvalidUserPointer)?;
    if end > space.config().user_top.as_usize() {
        return Err(VmError::InvalidUserPointer);
    }

    for addr in ptr..end {
        probe_byte(space, Vaddr::new(addr))?;
    }
    Ok(())
}

/// 探测单个用户字节地址
fn probe_byte(space: &MemorySpace, addr: Vaddr) -> VmResult<()> {
    let vpn = Vpn::from_addr_floor(addr);
    if space.hw().translate(vpn).is_some() {
        return Ok(());
    }
    // 未映射：尝试走缺页路径修复
    if space.resolve_fault(addr) {
        Ok(())
    } else {
        Err(VmError::InvalidUserPointer)
    }
}

/// 校验并读取用户空间的 NUL 结尾字符串
///
/// 长度在读取过程中逐字节发现并校验，不预先信任任何长度。
/// 超过 `max_len` 字节仍未见 NUL 时判定非法。
pub fn check_user_cstr(space: &MemorySpace, ptr: usize, max_len: usize) -> VmResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut addr = ptr;
    loop {
        check_user_span(space, addr, 1)?;
        let mut byte = [0u8; 1];
        space.read_bytes(Vaddr::new(addr), &mut byte)?;
        if byte[0] == 0 {
            return Ok(out);
        }
        out.push(byte[0]);
        if out.len() > max_len {
            return Err(VmError::InvalidUserPointer);
        }
        addr = addr.checked_add(1).ok_or(VmError::InvalidUserPointer)?;
    }
}

/// 校验并复制用户缓冲区到内核
pub fn copy_from_user(space: &MemorySpace, ptr: usize, len: usize) -> VmResult<Vec<u8>> {
    check_user_span(space, ptr, len)?;
    let mut buf = alloc::vec![0u8; len];
    space.read_bytes(Vaddr::new(ptr), &mut buf)?;
    Ok(buf)
}

/// 校验并将内核数据复制到用户缓冲区
///
/// 除常规校验外，目标区间内的每个页都必须可写。
pub fn copy_to_user(space: &MemorySpace, ptr: usize, data: &[u8]) -> VmResult<()> {
    check_user_span(space, ptr, data.len())?;
    if data.is_empty() {
        return Ok(());
    }

    let start = Vpn::from_addr_floor(Vaddr::new(ptr));
    let end = Vpn::from_addr_ceil(Vaddr::new(ptr + data.len()));
    for vpn in VpnRange::new(start, end) {
        let page = space.lookup_vpn(vpn).ok_or(VmError::InvalidUserPointer)?;
        if !page.lock().writable() {
            return Err(VmError::InvalidUserPointer);
        }
    }

    space.write_bytes(Vaddr::new(ptr), data)
}
