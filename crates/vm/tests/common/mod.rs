//! 测试环境搭建

#![allow(dead_code)]

use std::sync::Arc;

use test_support::mock::{MockHwPageTable, RamDisk};
use vm::{FrameTable, HwPageTable, MemorySpace, SwapStore, VmConfig};

/// 一套完整的虚拟内存测试环境
pub struct TestEnv {
    pub hw: Arc<MockHwPageTable>,
    pub frames: Arc<FrameTable>,
    pub swap: Arc<SwapStore>,
    pub space: MemorySpace,
}

/// 构建帧池容量为 `num_frames`、交换槽位数为 `swap_slots` 的环境
pub fn setup(num_frames: usize, swap_slots: usize) -> TestEnv {
    let disk = RamDisk::new(swap_slots * 8);
    let swap = Arc::new(SwapStore::new(disk));
    let frames = Arc::new(FrameTable::new(num_frames, swap.clone()));
    let hw = MockHwPageTable::new();
    let hw_dyn: Arc<dyn HwPageTable> = hw.clone();
    let space = MemorySpace::new(hw_dyn, frames.clone(), VmConfig::default());
    TestEnv {
        hw,
        frames,
        swap,
        space,
    }
}
