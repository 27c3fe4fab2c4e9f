//! # sheng-ogg
//!
//! Ogg 容器 (RFC 3533) 的读取与写入.
//!
//! [`OggContainerReader`] 把物理流拆成逻辑流, 每个逻辑流以
//! [`OggPacketReader`] 的形式提供给解码器; [`PageWriter`] 用于生成测试数据
//! 和重新封装.

mod container;
mod packet_reader;
pub mod page;
pub mod source;
mod state;
pub mod writer;

pub use container::OggContainerReader;
pub use packet_reader::OggPacketReader;
pub use page::{OggPage, PageFlags, read_page};
pub use source::{PageSource, SourceBackend};
pub use writer::PageWriter;
