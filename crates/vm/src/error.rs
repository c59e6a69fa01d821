//! 虚拟内存错误类型
//!
//! 所有用户可触发的失败都以 [`VmError`] 上报给调用方，
//! 由进程管理路径决定终止进程，内核本身不会 panic。

/// 虚拟内存操作错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// 帧池耗尽且时钟扫描未能找到可驱逐的受害者
    OutOfFrames,
    /// 交换分区槽位耗尽
    SwapExhausted,
    /// 硬件页表映射安装失败（如虚拟页已被占用）
    InstallFailure,
    /// 可执行文件头或段描述校验失败
    LoadFailure,
    /// 文件或块设备 I/O 失败（含短读）
    Io,
    /// 用户指针为空、越界或无法通过缺页修复
    InvalidUserPointer,
    /// 参数非法（如 mmap 基址未对齐、空文件）
    InvalidArgument,
    /// 页面已驻留，无需再次调入
    AlreadyResident,
    /// 虚拟页已有注册的描述符
    AlreadyMapped,
    /// 栈增长超出上限
    StackLimit,
    /// 未知的文件映射组标识
    BadMapId,
}

/// 虚拟内存操作结果
pub type VmResult<T> = Result<T, VmError>;
