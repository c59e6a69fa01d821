//! 帧分配与时钟驱逐的集成测试

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use common::{TestEnv, setup};
use test_support::mock::MockHwPageTable;
use vm::{HwPageTable, MemorySpace, PAGE_SIZE, Page, PageRef, Vaddr, VmConfig, VmError, Vpn};

fn zero_page(env: &TestEnv, addr: usize) -> PageRef {
    let vpn = Vpn::from_addr_floor(Vaddr::new(addr));
    assert!(env.space.insert(Page::new_zero(vpn, true)));
    env.space.lookup_vpn(vpn).unwrap()
}

#[test]
fn test_allocation_never_exceeds_capacity() {
    let env = setup(2, 16);
    for i in 0..4 {
        let page = zero_page(&env, 0x1000_0000 + i * PAGE_SIZE);
        env.space.resolve(&page).unwrap();
        assert!(env.frames.allocated_frames() <= 2);
    }
    assert_eq!(env.frames.allocated_frames(), 2);
}

#[test]
fn test_clock_spares_accessed_frame() {
    let env = setup(2, 16);
    let a = zero_page(&env, 0x1000_0000);
    let b = zero_page(&env, 0x1000_1000);
    env.space.resolve(&a).unwrap();
    env.space.resolve(&b).unwrap();

    // a 最近被访问过，时钟扫描应给它第二次机会并驱逐 b
    env.hw
        .set_accessed(Vpn::from_addr_floor(Vaddr::new(0x1000_0000)), true);

    let c = zero_page(&env, 0x1000_2000);
    env.space.resolve(&c).unwrap();

    assert!(a.lock().is_resident());
    assert!(!b.lock().is_resident());
    assert!(c.lock().is_resident());
}

#[test]
fn test_locked_page_skipped_then_out_of_frames() {
    let env = setup(1, 16);
    let a = zero_page(&env, 0x1000_0000);
    env.space.resolve(&a).unwrap();

    // 持有页锁模拟其它路径正在操作该页
    let guard = a.lock();
    let b = zero_page(&env, 0x1000_1000);
    assert_eq!(env.space.resolve(&b), Err(VmError::OutOfFrames));
    drop(guard);

    assert!(env.space.resolve(&b).is_ok());
    assert!(!a.lock().is_resident());
}

#[test]
fn test_swap_exhausted_propagates() {
    let env = setup(1, 0);
    let a = zero_page(&env, 0x1000_0000);
    env.space.resolve(&a).unwrap();
    env.hw
        .set_dirty(Vpn::from_addr_floor(Vaddr::new(0x1000_0000)), true);

    let b = zero_page(&env, 0x1000_1000);
    assert_eq!(env.space.resolve(&b), Err(VmError::SwapExhausted));
    assert!(a.lock().is_resident());
}

#[test]
fn test_dirty_page_swapped_out_and_restored() {
    let env = setup(1, 8);
    let addr = 0x1000_0000;
    let a = zero_page(&env, addr);
    env.space.resolve(&a).unwrap();

    let payload = [0xAB_u8; 64];
    env.space.write_bytes(Vaddr::new(addr + 128), &payload).unwrap();
    env.hw.set_dirty(Vpn::from_addr_floor(Vaddr::new(addr)), true);

    let b = zero_page(&env, 0x1000_1000);
    env.space.resolve(&b).unwrap();

    assert!(!a.lock().is_resident());
    assert_eq!(env.swap.used_slots(), 1);

    // 缺页换回，一次性读取随即释放槽位
    assert!(env.space.resolve_fault(Vaddr::new(addr + 128)));
    assert_eq!(env.swap.used_slots(), 0);

    let mut buf = [0u8; 64];
    env.space.read_bytes(Vaddr::new(addr + 128), &mut buf).unwrap();
    assert_eq!(buf, payload);
}

#[test]
fn test_kernel_write_survives_eviction() {
    let env = setup(1, 8);
    let addr = 0x1000_0000;
    let a = zero_page(&env, addr);
    env.space.resolve(&a).unwrap();
    // 内核写入不经过用户映射，硬件不会自行置脏位
    env.space.write_bytes(Vaddr::new(addr), b"echo\0").unwrap();

    let b = zero_page(&env, 0x1000_1000);
    env.space.resolve(&b).unwrap();
    assert!(!a.lock().is_resident());
    assert_eq!(env.swap.used_slots(), 1);

    let mut buf = [0u8; 5];
    env.space.read_bytes(Vaddr::new(addr), &mut buf).unwrap();
    assert_eq!(&buf, b"echo\0");
}

#[test]
fn test_copy_consistent_under_concurrent_eviction() {
    let env = setup(4, 16);
    let addr = 0x1000_0000;
    let target = zero_page(&env, addr);
    env.space.resolve(&target).unwrap();

    // 第二个进程共享同一帧表，持续调入页面制造驱逐压力
    let hw2: Arc<dyn HwPageTable> = MockHwPageTable::new();
    let space2 = Arc::new(MemorySpace::new(
        hw2,
        env.frames.clone(),
        VmConfig::default(),
    ));
    for i in 0..4 {
        assert!(space2.insert(Page::new_zero(
            Vpn::from_addr_floor(Vaddr::new(0x2000_0000 + i * PAGE_SIZE)),
            true,
        )));
    }

    let stop = Arc::new(AtomicBool::new(false));
    let churn = {
        let space2 = space2.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                for i in 0..4 {
                    let page = space2
                        .lookup(Vaddr::new(0x2000_0000 + i * PAGE_SIZE))
                        .unwrap();
                    let _ = space2.resolve(&page);
                }
            }
        })
    };

    // 被拷贝的页在帧访问期间被钉住，内容不会被并发驱逐破坏
    for round in 0..500u32 {
        let pattern = round.to_le_bytes();
        env.space
            .write_bytes(Vaddr::new(addr + 8), &pattern)
            .unwrap();
        let mut buf = [0u8; 4];
        env.space.read_bytes(Vaddr::new(addr + 8), &mut buf).unwrap();
        assert_eq!(buf, pattern);
    }

    stop.store(true, Ordering::Relaxed);
    churn.join().unwrap();
}

#[test]
fn test_reloaded_page_rewritten_even_when_clean() {
    let env = setup(1, 8);
    let addr = 0x1000_0000;
    let a = zero_page(&env, addr);
    env.space.resolve(&a).unwrap();

    let payload = [0x5C_u8; 32];
    env.space.write_bytes(Vaddr::new(addr), &payload).unwrap();
    env.hw.set_dirty(Vpn::from_addr_floor(Vaddr::new(addr)), true);

    // 第一次驱逐写入槽位，换回后槽位被消耗
    let b = zero_page(&env, 0x1000_1000);
    env.space.resolve(&b).unwrap();
    assert!(env.space.resolve_fault(Vaddr::new(addr)));
    assert_eq!(env.swap.used_slots(), 0);

    // 未再变脏，但槽位已消耗，再次驱逐必须写入新槽位
    let c = zero_page(&env, 0x1000_2000);
    env.space.resolve(&c).unwrap();
    assert!(!a.lock().is_resident());
    assert_eq!(env.swap.used_slots(), 1);

    assert!(env.space.resolve_fault(Vaddr::new(addr)));
    let mut buf = [0u8; 32];
    env.space.read_bytes(Vaddr::new(addr), &mut buf).unwrap();
    assert_eq!(buf, payload);
}
