//! # Sheng (声)
//!
//! 纯 Rust 实现的 Ogg Vorbis 音频解码库.
//!
//! - **容器**: Ogg 页面同步、CRC 校验、逻辑流拆分与链式流
//! - **解码**: Vorbis I 全流程 (码本、floor 0/1、residue 0/1/2、MDCT、重叠相加)
//! - **查找**: 按采样或时间精确定位
//!
//! # 快速开始
//!
//! ```rust,no_run
//! let mut reader = sheng::open_file("music.ogg")?;
//! println!("{} Hz, {} 声道", reader.sample_rate(), reader.channels());
//!
//! let mut pcm = Vec::new();
//! reader.read_to_end(&mut pcm)?;
//! # Ok::<(), sheng::core::ShengError>(())
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `sheng-core` | 错误类型、数据包比特读取、容器接口 |
//! | `sheng-ogg` | Ogg 容器读取与写入 |
//! | `sheng-vorbis` | Vorbis 解码器 |

use std::path::Path;

use bytes::Bytes;

/// 核心类型与接口
pub use sheng_core as core;

/// Ogg 容器
pub use sheng_ogg as ogg;

/// Vorbis 解码器
pub use sheng_vorbis as vorbis;

pub mod config;
pub mod logging;

pub use config::ShengConfig;
pub use sheng_vorbis::{ReaderOptions, VorbisReader};

use sheng_core::ShengResult;
use sheng_ogg::OggContainerReader;

/// 获取 Sheng 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 打开 Ogg Vorbis 文件
pub fn open_file(path: impl AsRef<Path>) -> ShengResult<VorbisReader> {
    open_file_with_options(path, ReaderOptions::default())
}

pub fn open_file_with_options(
    path: impl AsRef<Path>,
    options: ReaderOptions,
) -> ShengResult<VorbisReader> {
    let container = OggContainerReader::open(path)?;
    VorbisReader::with_options(Box::new(container), options)
}

/// 从内存中的 Ogg 数据创建读取器
pub fn from_bytes(data: impl Into<Bytes>) -> ShengResult<VorbisReader> {
    VorbisReader::new(Box::new(OggContainerReader::from_bytes(data)))
}
