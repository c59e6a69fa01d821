//! 内存布局与页面几何常量

/// 页面大小（字节）
pub const PAGE_SIZE: usize = 4096;

/// 块设备扇区大小（字节）
pub const SECTOR_SIZE: usize = 512;

/// 一个页面占用的扇区数
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// 文件映射组标识
///
/// 每次 mmap 成功返回一个新的 MapId，munmap 按组释放。
pub type MapId = usize;

/// munmap 的哨兵值：释放当前进程的全部映射组
pub const MAP_ALL: MapId = MapId::MAX;
