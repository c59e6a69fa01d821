//! 进程退出状态约定

/// 内核因错误终止用户进程时上报的退出状态
///
/// 包括非法用户指针、无法修复的缺页等情况。
pub const EXIT_FAILURE: i32 = -1;
