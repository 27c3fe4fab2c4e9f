//! # sheng-vorbis
//!
//! 纯 Rust 实现的 Vorbis I 音频解码器.
//!
//! 解码器只依赖 [`sheng_core::PacketProvider`] 提供的数据包, 与具体容器无关;
//! Ogg 容器由 `sheng-ogg` 提供.
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use sheng_vorbis::VorbisReader;
//!
//! let container = sheng_ogg::OggContainerReader::open("music.ogg")?;
//! let mut reader = VorbisReader::new(Box::new(container))?;
//! let len = 4096 * reader.channels();
//! let mut pcm = vec![0f32; len];
//! while reader.read_samples(&mut pcm, 0, len)? > 0 {
//!     // 交织的 f32 采样
//! }
//! ```

pub mod codebook;
pub mod floor;
pub mod headers;
mod huffman;
pub mod issue;
pub mod mapping;
pub mod mdct;
pub mod mode;
pub mod reader;
pub mod residue;
pub mod ring_buffer;
pub mod setup;
pub mod stats;
pub mod stream_decoder;
mod util;

#[cfg(test)]
mod test_support;

// 重导出常用类型
pub use headers::{CommentHeader, IdentHeader};
pub use issue::{DecodeIssue, SkipReason};
pub use reader::{ReaderOptions, VorbisReader};
pub use setup::SetupHeader;
pub use stats::StreamStats;
pub use stream_decoder::VorbisStreamDecoder;
