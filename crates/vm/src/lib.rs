//! 虚拟内存子系统
//!
//! 提供按需调页所需的四个核心组件，以及用户指针校验：
//!
//! - [`FrameTable`]: 用户帧池与时钟算法驱逐器
//! - [`MemorySpace`]: 每进程的补充页表（页描述符注册表）
//! - [`SwapStore`]: 交换槽位分配器（一次性读取语义）
//! - [`loader`]: 可执行文件校验与惰性段注册
//! - [`user_ptr`]: 系统调用入口的用户指针校验
//!
//! # 协作者解耦
//!
//! 通过 trait 抽象与外部组件解耦：
//! - [`HwPageTable`]: 硬件页表（映射安装、脏位/访问位）
//! - [`BackingFile`]: 文件后备存储（按偏移读写）
//! - [`BlockDriver`]: 交换分区所在的块设备
//!
//! 所有状态都以显式对象持有并按引用传递，没有全局单例。

#![no_std]

extern crate alloc;

mod config;
mod error;
mod ops;

pub mod address;
pub mod frame;
pub mod loader;
pub mod page;
pub mod space;
pub mod swap;
pub mod user_ptr;

pub use config::VmConfig;
pub use error::{VmError, VmResult};
pub use ops::{BackingFile, BlockDriver, HwPageTable};

// Re-export 常用类型
pub use address::{Ppn, Vaddr, Vpn, VpnRange};
pub use uapi::mm::{MAP_ALL, MapId, PAGE_SIZE};
pub use frame::{FramePool, FrameTable};
pub use loader::{LoadedImage, load};
pub use page::{Page, PageBacking, PageRef};
pub use space::MemorySpace;
pub use swap::{SlotId, SwapStore};
