//! 用户指针校验的集成测试

mod common;

use common::setup;
use test_support::mock::MockFile;
use vm::user_ptr::{check_user_cstr, check_user_span, copy_from_user, copy_to_user};
use vm::{PAGE_SIZE, Page, Vaddr, VmError, Vpn};

const USER_TOP: usize = 0xC000_0000;
const STACK_PAGE: usize = USER_TOP - PAGE_SIZE;

#[test]
fn test_valid_buffer_passes() {
    let env = setup(4, 8);
    env.space.grow_stack(Vaddr::new(STACK_PAGE)).unwrap();
    check_user_span(&env.space, STACK_PAGE, 256).unwrap();
    check_user_span(&env.space, USER_TOP - 1, 1).unwrap();
}

#[test]
fn test_null_pointer_rejected() {
    let env = setup(4, 8);
    assert_eq!(
        check_user_span(&env.space, 0, 4),
        Err(VmError::InvalidUserPointer)
    );
}

#[test]
fn test_kernel_crossing_rejected() {
    let env = setup(4, 8);
    env.space.grow_stack(Vaddr::new(STACK_PAGE)).unwrap();
    // 区间尾部越过用户地址空间顶端
    assert_eq!(
        check_user_span(&env.space, USER_TOP - 4, 8),
        Err(VmError::InvalidUserPointer)
    );
    assert_eq!(
        check_user_span(&env.space, USER_TOP, 4),
        Err(VmError::InvalidUserPointer)
    );
}

#[test]
fn test_unmapped_address_rejected() {
    let env = setup(4, 8);
    assert_eq!(
        check_user_span(&env.space, 0x5000_0000, 4),
        Err(VmError::InvalidUserPointer)
    );
}

#[test]
fn test_lazy_page_resolved_by_probe() {
    let env = setup(4, 8);
    let vpn = Vpn::from_addr_floor(Vaddr::new(0x1000_0000));
    assert!(env.space.insert(Page::new_zero(vpn, true)));

    let page = env.space.lookup_vpn(vpn).unwrap();
    assert!(!page.lock().is_resident());
    check_user_span(&env.space, 0x1000_0000, 64).unwrap();
    assert!(page.lock().is_resident());
}

#[test]
fn test_cstr_read() {
    let env = setup(4, 8);
    env.space.grow_stack(Vaddr::new(STACK_PAGE)).unwrap();
    env.space
        .write_bytes(Vaddr::new(STACK_PAGE), b"hi\0")
        .unwrap();

    let s = check_user_cstr(&env.space, STACK_PAGE, 64).unwrap();
    assert_eq!(s, b"hi");
}

#[test]
fn test_cstr_over_max_len_rejected() {
    let env = setup(4, 8);
    env.space.grow_stack(Vaddr::new(STACK_PAGE)).unwrap();
    env.space
        .write_bytes(Vaddr::new(STACK_PAGE), &[b'a'; 16])
        .unwrap();

    assert_eq!(
        check_user_cstr(&env.space, STACK_PAGE, 8),
        Err(VmError::InvalidUserPointer)
    );
}

#[test]
fn test_copy_roundtrip() {
    let env = setup(4, 8);
    env.space.grow_stack(Vaddr::new(STACK_PAGE)).unwrap();

    let data = [7u8; 100];
    copy_to_user(&env.space, STACK_PAGE + 8, &data).unwrap();
    let back = copy_from_user(&env.space, STACK_PAGE + 8, 100).unwrap();
    assert_eq!(back, data);
}

#[test]
fn test_copy_to_readonly_page_rejected() {
    let env = setup(4, 8);
    let file = MockFile::from_bytes(vec![9u8; PAGE_SIZE]);
    let vpn = Vpn::from_addr_floor(Vaddr::new(0x0804_8000));
    assert!(env.space.insert(Page::new_file(vpn, file, 0, PAGE_SIZE, 0, false)));

    assert_eq!(
        copy_to_user(&env.space, 0x0804_8000, &[1, 2, 3]),
        Err(VmError::InvalidUserPointer)
    );
    // 只读页仍然可以读出
    let back = copy_from_user(&env.space, 0x0804_8000, 3).unwrap();
    assert_eq!(back, vec![9, 9, 9]);
}
