//! 协作者接口 trait 定义
//!
//! 这些 trait 抽象了虚拟内存子系统对外部组件的最小依赖：
//! 硬件页表由架构层实现，文件由 VFS 层实现，块设备由驱动层实现。
//! 测试环境下由 test-support crate 提供 Mock 实现。

use crate::address::{Ppn, Vpn};

/// 硬件页表接口
///
/// 每个进程持有一份实现，提供映射安装/清除和脏位、访问位的读写。
pub trait HwPageTable: Send + Sync {
    /// 建立 vpn -> ppn 的映射
    ///
    /// 若 vpn 已有映射则不修改并返回 false。
    fn map(&self, vpn: Vpn, ppn: Ppn, writable: bool) -> bool;

    /// 清除 vpn 的映射，后续访问将触发缺页
    fn clear(&self, vpn: Vpn);

    /// 查询 vpn 当前映射到的物理页号
    fn translate(&self, vpn: Vpn) -> Option<Ppn>;

    /// 查询脏位
    fn is_dirty(&self, vpn: Vpn) -> bool;

    /// 查询访问位
    fn is_accessed(&self, vpn: Vpn) -> bool;

    /// 设置访问位
    fn set_accessed(&self, vpn: Vpn, accessed: bool);

    /// 设置脏位
    ///
    /// 用户态写访问由硬件置位；内核绕过用户映射直接写入帧内容时
    /// 必须显式置位，否则页面会被当作干净页驱逐丢弃。
    fn set_dirty(&self, vpn: Vpn, dirty: bool);
}

/// 文件后备存储接口
///
/// 此 trait 抽象了按需调页所需的最小文件 I/O。
/// 打开/关闭由 `Arc` 所有权表达：最后一个引用被丢弃即关闭。
pub trait BackingFile: Send + Sync {
    /// 从指定偏移读取数据到缓冲区，返回实际读取的字节数
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize>;

    /// 将缓冲区数据写入指定偏移，返回实际写入的字节数
    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize>;

    /// 文件长度（字节）
    fn length(&self) -> usize;

    /// 拒绝对文件的写入（用于正在执行的可执行文件）
    fn deny_write(&self);

    /// 恢复对文件的写入
    fn allow_write(&self);
}

/// 交换分区所在块设备的接口
pub trait BlockDriver: Send + Sync {
    /// 读取一个扇区
    /// # 参数：
    /// * `sector` - 扇区号
    /// * `buf` - 用于存储读取数据的缓冲区
    /// # 返回值：
    /// 如果读取成功则返回 true，否则返回 false
    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> bool;

    /// 写入一个扇区
    /// # 参数：
    /// * `sector` - 扇区号
    /// * `buf` - 包含要写入数据的缓冲区
    /// # 返回值：
    /// 如果写入成功则返回 true，否则返回 false
    fn write_sector(&self, sector: usize, buf: &[u8]) -> bool;

    /// 设备总扇区数
    fn size_in_sectors(&self) -> usize;
}
