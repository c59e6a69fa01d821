//! 可执行文件加载器
//!
//! 校验 ELF32 可执行文件的文件头和段描述，按页注册惰性加载的
//! 页描述符（不读取任何段数据），并构造初始用户栈。
//! 所有头部字段在使用前都经过校验，损坏的文件只会导致
//! [`VmError::LoadFailure`]，不会破坏内核状态。

use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use uapi::mm::PAGE_SIZE;

use crate::address::{Vaddr, Vpn};
use crate::error::{VmError, VmResult};
use crate::ops::BackingFile;
use crate::page::Page;
use crate::space::MemorySpace;

/// ELF32 文件头长度
const EHDR_SIZE: usize = 52;
/// ELF32 程序头长度
const PHDR_SIZE: usize = 32;
/// 文件头标识：magic + 32 位 + 小端 + 版本 1
const ELF_IDENT: [u8; 7] = [0x7f, b'E', b'L', b'F', 1, 1, 1];
/// 可执行文件类型
const ET_EXEC: u16 = 2;
/// x86 机器类型
const EM_386: u16 = 3;
/// 当前 ELF 版本
const EV_CURRENT: u32 = 1;
/// 程序头数量上限
const MAX_PHNUM: u16 = 1024;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_INTERP: u32 = 3;
const PT_SHLIB: u32 = 5;

bitflags! {
    /// 段权限标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        /// 可执行
        const X = 1;
        /// 可写
        const W = 2;
        /// 可读
        const R = 4;
    }
}

/// 校验通过的文件头字段
struct ExecHeader {
    entry: u32,
    phoff: u32,
    phnum: u16,
}

/// 程序头字段
struct ProgramHeader {
    p_type: u32,
    offset: u32,
    vaddr: u32,
    filesz: u32,
    memsz: u32,
    flags: SegmentFlags,
}

/// 加载完成的镜像信息
#[derive(Debug, Clone, Copy)]
pub struct LoadedImage {
    /// 程序入口地址
    pub entry: Vaddr,
    /// 初始用户栈指针
    pub initial_sp: Vaddr,
}

#[inline]
fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

#[inline]
fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn parse_ehdr(buf: &[u8; EHDR_SIZE]) -> VmResult<ExecHeader> {
    if buf[..ELF_IDENT.len()] != ELF_IDENT {
        return Err(VmError::LoadFailure);
    }
    if read_u16(buf, 16) != ET_EXEC
        || read_u16(buf, 18) != EM_386
        || read_u32(buf, 20) != EV_CURRENT
        || read_u16(buf, 42) != PHDR_SIZE as u16
        || read_u16(buf, 44) > MAX_PHNUM
    {
        return Err(VmError::LoadFailure);
    }
    Ok(ExecHeader {
        entry: read_u32(buf, 24),
        phoff: read_u32(buf, 28),
        phnum: read_u16(buf, 44),
    })
}

fn parse_phdr(buf: &[u8; PHDR_SIZE]) -> ProgramHeader {
    ProgramHeader {
        p_type: read_u32(buf, 0),
        offset: read_u32(buf, 4),
        vaddr: read_u32(buf, 8),
        filesz: read_u32(buf, 16),
        memsz: read_u32(buf, 20),
        flags: SegmentFlags::from_bits_truncate(read_u32(buf, 24)),
    }
}

/// 加载可执行文件
///
/// 校验头部、注册全部 PT_LOAD 段的惰性页描述符、建立初始用户栈
/// 并按调用约定压入命令行参数。加载期间拒绝对可执行文件的写入；
/// 失败时立即恢复，成功时由调用方在进程退出时恢复。
pub fn load(
    space: &MemorySpace,
    file: Arc<dyn BackingFile>,
    cmdline: &str,
) -> VmResult<LoadedImage> {
    file.deny_write();
    match load_image(space, &file, cmdline) {
        Ok(image) => Ok(image),
        Err(err) => {
            log::warn!("load: rejected executable: {err:?}");
            file.allow_write();
            Err(err)
        }
    }
}

fn load_image(
    space: &MemorySpace,
    file: &Arc<dyn BackingFile>,
    cmdline: &str,
) -> VmResult<LoadedImage> {
    let file_len = file.length();

    let mut ehdr_buf = [0u8; EHDR_SIZE];
    match file.read_at(0, &mut ehdr_buf) {
        Ok(n) if n == EHDR_SIZE => {}
        _ => return Err(VmError::LoadFailure),
    }
    let ehdr = parse_ehdr(&ehdr_buf)?;

    let user_top = space.config().user_top.as_usize();

    for i in 0..ehdr.phnum as usize {
        let off = ehdr.phoff as usize + i * PHDR_SIZE;
        if off
            .checked_add(PHDR_SIZE)
            .is_none_or(|end| end > file_len)
        {
            return Err(VmError::LoadFailure);
        }

        let mut ph_buf = [0u8; PHDR_SIZE];
        match file.read_at(off, &mut ph_buf) {
            Ok(n) if n == PHDR_SIZE => {}
            _ => return Err(VmError::LoadFailure),
        }
        let ph = parse_phdr(&ph_buf);

        match ph.p_type {
            PT_LOAD => register_segment(space, file, &ph, file_len, user_top)?,
            // 动态链接不受支持
            PT_DYNAMIC | PT_INTERP | PT_SHLIB => return Err(VmError::LoadFailure),
            _ => {}
        }
    }

    // 用户栈：栈顶下方一个全零页，立即调入
    space.grow_stack(Vaddr::new(user_top - PAGE_SIZE))?;
    let initial_sp = push_args(space, cmdline)?;

    Ok(LoadedImage {
        entry: Vaddr::new(ehdr.entry as usize),
        initial_sp,
    })
}

/// 校验一个 PT_LOAD 段并按页注册惰性页描述符
fn register_segment(
    space: &MemorySpace,
    file: &Arc<dyn BackingFile>,
    ph: &ProgramHeader,
    file_len: usize,
    user_top: usize,
) -> VmResult<()> {
    let p_offset = ph.offset as usize;
    let vaddr = ph.vaddr as usize;
    let filesz = ph.filesz as usize;
    let memsz = ph.memsz as usize;

    // 文件偏移和虚拟地址必须有相同的页内偏移
    if p_offset % PAGE_SIZE != vaddr % PAGE_SIZE {
        return Err(VmError::LoadFailure);
    }
    if p_offset > file_len {
        return Err(VmError::LoadFailure);
    }
    if memsz == 0 || memsz < filesz {
        return Err(VmError::LoadFailure);
    }
    // 零页保留（空指针陷阱），段须完整落在用户地址空间内且不回绕
    if vaddr < PAGE_SIZE {
        return Err(VmError::LoadFailure);
    }
    let end = vaddr.checked_add(memsz).ok_or(VmError::LoadFailure)?;
    if end > user_top {
        return Err(VmError::LoadFailure);
    }

    let writable = ph.flags.contains(SegmentFlags::W);
    let page_offset = vaddr % PAGE_SIZE;
    let mut read_bytes = if filesz > 0 { page_offset + filesz } else { 0 };
    let total = (page_offset + memsz).div_ceil(PAGE_SIZE) * PAGE_SIZE;
    let mut zero_bytes = total - read_bytes;

    let mut vpn = Vpn::from_addr_floor(Vaddr::new(vaddr));
    let mut file_start = p_offset - page_offset;

    while read_bytes > 0 || zero_bytes > 0 {
        let page_read = read_bytes.min(PAGE_SIZE);
        let page_zero = PAGE_SIZE - page_read;

        let page = Page::new_file(vpn, file.clone(), file_start, page_read, page_zero, writable);
        if !space.insert(page) {
            return Err(VmError::LoadFailure);
        }

        read_bytes -= page_read;
        zero_bytes -= page_zero;
        file_start += page_read;
        vpn = Vpn::from_usize(vpn.as_usize() + 1);
    }

    Ok(())
}

/// 在初始栈页上构造命令行参数
///
/// 布局（地址从高到低）：各参数字符串、字对齐填充、
/// argv[argc] = NULL、argv 指针数组、argv、argc、伪返回地址。
/// 指针以 32 位小端写入。
fn push_args(space: &MemorySpace, cmdline: &str) -> VmResult<Vaddr> {
    let user_top = space.config().user_top.as_usize();
    let tokens: Vec<&str> = cmdline.split_whitespace().collect();

    let mut sp = user_top;
    let mut argv_ptrs = alloc::vec![0u32; tokens.len()];

    // 从最后一个参数开始压入，argv[0] 的字符串最终位于最低地址
    for i in (0..tokens.len()).rev() {
        let bytes = tokens[i].as_bytes();
        sp -= bytes.len() + 1;
        space.write_bytes(Vaddr::new(sp), bytes)?;
        space.write_bytes(Vaddr::new(sp + bytes.len()), &[0])?;
        argv_ptrs[i] = sp as u32;
    }

    // 字对齐
    sp &= !3;

    sp -= 4;
    space.write_bytes(Vaddr::new(sp), &0u32.to_le_bytes())?; // argv[argc] = NULL
    for i in (0..tokens.len()).rev() {
        sp -= 4;
        space.write_bytes(Vaddr::new(sp), &argv_ptrs[i].to_le_bytes())?;
    }

    let argv_base = sp as u32;
    sp -= 4;
    space.write_bytes(Vaddr::new(sp), &argv_base.to_le_bytes())?;
    sp -= 4;
    space.write_bytes(Vaddr::new(sp), &(tokens.len() as u32).to_le_bytes())?;
    sp -= 4;
    space.write_bytes(Vaddr::new(sp), &0u32.to_le_bytes())?; // 伪返回地址

    Ok(Vaddr::new(sp))
}
