//! 测试支持 crate
//!
//! 为 vm 的协作者接口提供 Mock 实现。

#![no_std]

extern crate alloc;

pub mod mock;
