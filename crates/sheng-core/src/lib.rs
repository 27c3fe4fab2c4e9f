//! # sheng-core
//!
//! Sheng 音频解码核心库, 提供错误类型、数据包比特读取以及容器与解码器之间的接口.

pub mod bitwriter;
pub mod crc;
pub mod error;
pub mod packet;
pub mod provider;

// 重导出常用类型
pub use error::{ShengError, ShengResult};
pub use packet::{DataPacket, PacketFlags, UNKNOWN_GRANULE};
pub use provider::{ContainerReader, PacketLengthFn, PacketProvider};
