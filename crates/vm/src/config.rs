//! 虚拟内存布局配置

use crate::address::Vaddr;

/// 用户地址空间布局
///
/// 以显式对象传入 [`MemorySpace`](crate::MemorySpace)，不同测试可以使用不同布局。
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    /// 用户地址空间上界（不含），也是用户栈的栈顶
    pub user_top: Vaddr,
    /// 用户栈的最大字节数
    pub stack_limit: usize,
}

impl VmConfig {
    /// 地址是否位于用户地址空间内
    pub fn is_user_addr(&self, addr: Vaddr) -> bool {
        addr.as_usize() < self.user_top.as_usize()
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            user_top: Vaddr::new(0xC000_0000),
            stack_limit: 8 * 1024 * 1024,
        }
    }
}
