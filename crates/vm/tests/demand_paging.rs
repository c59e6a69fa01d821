//! 按需调页的集成测试

mod common;

use common::setup;
use test_support::mock::MockFile;
use vm::{HwPageTable, PAGE_SIZE, Page, Ppn, Vaddr, VmError, Vpn};

#[test]
fn test_file_page_loads_content_and_zero_tail() {
    let env = setup(4, 8);
    let content: Vec<u8> = (0..100u8).collect();
    let file = MockFile::from_bytes(content.clone());

    let addr = 0x0804_8000;
    let vpn = Vpn::from_addr_floor(Vaddr::new(addr));
    assert!(env.space.insert(Page::new_file(
        vpn,
        file,
        0,
        100,
        PAGE_SIZE - 100,
        false
    )));

    let page = env.space.lookup_vpn(vpn).unwrap();
    assert!(!page.lock().is_resident());
    assert_eq!(env.frames.allocated_frames(), 0);

    assert!(env.space.resolve_fault(Vaddr::new(addr + 50)));
    assert!(page.lock().is_resident());

    let mut buf = vec![0u8; PAGE_SIZE];
    env.space.read_bytes(Vaddr::new(addr), &mut buf).unwrap();
    assert_eq!(&buf[..100], &content[..]);
    assert!(buf[100..].iter().all(|&b| b == 0));

    // 只读段以只读映射安装
    assert_eq!(env.hw.is_writable(vpn), Some(false));
}

#[test]
fn test_short_read_fails_without_leak() {
    let env = setup(4, 8);
    // 文件只有 100 字节，描述符却声称要读 200 字节
    let file = MockFile::new(100);
    let vpn = Vpn::from_addr_floor(Vaddr::new(0x0804_8000));
    assert!(env.space.insert(Page::new_file(
        vpn,
        file,
        0,
        200,
        PAGE_SIZE - 200,
        false
    )));

    let page = env.space.lookup_vpn(vpn).unwrap();
    assert_eq!(env.space.resolve(&page), Err(VmError::Io));
    assert!(!page.lock().is_resident());
    assert_eq!(env.frames.allocated_frames(), 0);
    assert!(!env.space.resolve_fault(Vaddr::new(0x0804_8000)));
}

#[test]
fn test_unregistered_fault_fails() {
    let env = setup(4, 8);
    assert!(!env.space.resolve_fault(Vaddr::new(0x2000_0000)));
    assert_eq!(env.frames.allocated_frames(), 0);
}

#[test]
fn test_kernel_fault_rejected() {
    let env = setup(4, 8);
    assert!(!env.space.resolve_fault(Vaddr::new(0xC000_0000)));
    assert!(!env.space.resolve_fault(Vaddr::new(0xFFFF_F000)));
}

#[test]
fn test_install_failure_frees_frame() {
    let env = setup(4, 8);
    let vpn = Vpn::from_addr_floor(Vaddr::new(0x1000_0000));
    // vpn 已被占用，安装映射必然失败
    assert!(env.hw.map(vpn, Ppn::from_usize(0), true));

    assert!(env.space.insert(Page::new_zero(vpn, true)));
    let page = env.space.lookup_vpn(vpn).unwrap();
    assert_eq!(env.space.resolve(&page), Err(VmError::InstallFailure));
    assert!(!page.lock().is_resident());
    assert_eq!(env.frames.allocated_frames(), 0);
}

#[test]
fn test_spurious_fault_is_benign() {
    let env = setup(4, 8);
    assert!(env.space.insert(Page::new_zero(
        Vpn::from_addr_floor(Vaddr::new(0x1000_0000)),
        true
    )));
    let page = env.space.lookup(Vaddr::new(0x1000_0000)).unwrap();

    env.space.resolve(&page).unwrap();
    assert_eq!(env.space.resolve(&page), Err(VmError::AlreadyResident));
    // 缺页入口将伪缺页视为成功
    assert!(env.space.resolve_fault(Vaddr::new(0x1000_0000)));
    assert_eq!(env.frames.allocated_frames(), 1);
}

#[test]
fn test_destroy_reclaims_everything() {
    let env = setup(1, 8);
    let a = Vpn::from_addr_floor(Vaddr::new(0x1000_0000));
    let b = Vpn::from_addr_floor(Vaddr::new(0x1000_1000));
    let c = Vpn::from_addr_floor(Vaddr::new(0x1000_2000));
    for vpn in [a, b, c] {
        assert!(env.space.insert(Page::new_zero(vpn, true)));
    }

    // a 被换出占用一个槽位，b 驻留，c 始终未调入
    env.space.resolve(&env.space.lookup_vpn(a).unwrap()).unwrap();
    env.space
        .write_bytes(Vaddr::new(0x1000_0000), &[1, 2, 3])
        .unwrap();
    env.hw.set_dirty(a, true);
    env.space.resolve(&env.space.lookup_vpn(b).unwrap()).unwrap();
    assert_eq!(env.swap.used_slots(), 1);

    env.space.destroy();
    assert_eq!(env.space.registered_pages(), 0);
    assert_eq!(env.frames.allocated_frames(), 0);
    assert_eq!(env.swap.used_slots(), 0);
    assert_eq!(env.hw.mapped_count(), 0);
}
