//! 统一错误类型定义.
//!
//! 所有 Sheng crate 共用的错误类型, 支持跨模块传播.

use thiserror::Error;

/// Sheng 统一错误类型
#[derive(Debug, Error)]
pub enum ShengError {
    /// 无效参数 (越界的偏移/长度等)
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 当前状态下不允许的操作
    #[error("无效状态: {0}")]
    InvalidState(String),

    /// 不支持的操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 无效数据 (损坏的头包、码本声明等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 容器格式错误
    #[error("格式错误: {0}")]
    Format(String),

    /// 解码器错误
    #[error("解码器错误: {0}")]
    Codec(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 未找到指定的逻辑流
    #[error("未找到流: 序列号 {0}")]
    StreamNotFound(u32),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

/// Sheng 统一 Result 类型
pub type ShengResult<T> = Result<T, ShengError>;
