//! 单个音频包的可恢复解码问题.

use sheng_core::ShengError;
use thiserror::Error;

/// 音频包被丢弃的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("不是音频包")]
    NotAudio,

    #[error("mode 序号越界: {0}")]
    InvalidMode(usize),

    #[error("包在 mode 字段处被截断")]
    Truncated,
}

/// 解码一个音频包时遇到的问题.
///
/// `SkipPacket` 只影响当前包, 解码器记录后继续处理下一个包;
/// `Fatal` 向调用方传播.
#[derive(Debug, Error)]
pub enum DecodeIssue {
    #[error("丢弃音频包: {0}")]
    SkipPacket(SkipReason),

    #[error(transparent)]
    Fatal(#[from] ShengError),
}

impl From<SkipReason> for DecodeIssue {
    fn from(reason: SkipReason) -> Self {
        Self::SkipPacket(reason)
    }
}
