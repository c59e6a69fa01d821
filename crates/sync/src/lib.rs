//! 同步原语
//!
//! 提供基于原子操作的自旋锁。锁本身不涉及中断开关，
//! 中断屏蔽由调用方（陷入处理路径）自行负责。

#![no_std]

mod raw_spin_lock;
mod spin_lock;

pub use raw_spin_lock::{RawSpinLock, RawSpinLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
