//! Mock 实现模块
//!
//! 提供硬件页表、后备文件和块设备的 Mock 实现，用于测试

pub mod block;
pub mod fs;
pub mod hw;

pub use block::RamDisk;
pub use fs::MockFile;
pub use hw::MockHwPageTable;
