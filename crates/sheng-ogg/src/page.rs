//! Ogg 页面解析与同步.
//!
//! # Ogg 页面结构
//! ```text
//! Capture pattern: "OggS" (4 bytes)
//! Version:         1 byte (always 0)
//! Header type:     1 byte (flags: continued=0x01, BOS=0x02, EOS=0x04)
//! Granule pos:     8 bytes (little-endian, codec-specific)
//! Serial number:   4 bytes (identifies logical stream)
//! Page seq no:     4 bytes
//! CRC checksum:    4 bytes
//! Num segments:    1 byte
//! Segment table:   N bytes (each 1 byte, packet sizes)
//! Page data:       sum(segment_table) bytes
//! ```
//!
//! 段表中连续的 255 段与其后第一个非 255 段组成一个包;
//! 以 255 段结尾的包延续到下一页.

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use log::{debug, warn};
use sheng_core::ShengResult;
use sheng_core::crc::OggCrc;

use crate::source::PageSource;

/// Ogg 同步字 (capture pattern)
pub const OGG_SYNC: &[u8; 4] = b"OggS";

/// 段表之前的固定头部长度
pub const PAGE_HEADER_LEN: usize = 27;

/// 单次同步最多跳过的字节数
const MAX_SYNC_SCAN: u64 = 64 * 1024;

bitflags! {
    /// 页面头部标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        /// 页首数据是上一页未完成的包
        const CONTINUED = 0x01;
        /// 逻辑流的第一页
        const BOS       = 0x02;
        /// 逻辑流的最后一页
        const EOS       = 0x04;
    }
}

/// 已通过 CRC 校验的页面
#[derive(Debug, Clone)]
pub struct OggPage {
    pub flags: PageFlags,
    pub granule_position: i64,
    pub serial: u32,
    pub sequence: u32,
    pub segments: Vec<u8>,
    pub data: Bytes,
    /// 页面在来源中的起始位置
    pub offset: u64,
}

/// 页内一个包 (或包片段) 的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSpan {
    pub offset: usize,
    pub len: usize,
    /// 包在本页结束
    pub complete: bool,
}

impl OggPage {
    pub fn is_bos(&self) -> bool {
        self.flags.contains(PageFlags::BOS)
    }

    pub fn is_eos(&self) -> bool {
        self.flags.contains(PageFlags::EOS)
    }

    pub fn is_continued(&self) -> bool {
        self.flags.contains(PageFlags::CONTINUED)
    }

    pub fn header_len(&self) -> usize {
        PAGE_HEADER_LEN + self.segments.len()
    }

    /// 页面数据在来源中的起始位置
    pub fn data_offset(&self) -> u64 {
        self.offset + self.header_len() as u64
    }

    /// 从段表中提取包边界
    pub fn packet_spans(&self) -> Vec<PacketSpan> {
        let mut spans = Vec::new();
        let mut offset = 0usize;
        let mut len = 0usize;
        let mut open = false;

        for &segment in &self.segments {
            len += usize::from(segment);
            open = true;
            if segment < 255 {
                spans.push(PacketSpan {
                    offset,
                    len,
                    complete: true,
                });
                offset += len;
                len = 0;
                open = false;
            }
        }
        if open {
            spans.push(PacketSpan {
                offset,
                len,
                complete: false,
            });
        }
        spans
    }
}

/// 一次读页的结果
#[derive(Debug)]
pub struct PageRead {
    pub page: OggPage,
    /// 同步时跳过的字节数
    pub skipped: u64,
}

/// 读取下一个有效页面.
///
/// 同步字不匹配或 CRC 校验失败时从下一个字节继续寻找; 来源结束或连续
/// 64 KB 内找不到有效页面时返回 `None`.
pub fn read_page(source: &mut PageSource) -> ShengResult<Option<PageRead>> {
    let mut skipped = 0u64;
    loop {
        if skipped > MAX_SYNC_SCAN {
            warn!(
                "Ogg 同步失败: 位置 {} 之前 {} 字节内没有有效页面",
                source.position(),
                skipped,
            );
            return Ok(None);
        }

        let start = source.position();
        let header = source.read_available(PAGE_HEADER_LEN)?;
        if header.len() < PAGE_HEADER_LEN {
            return Ok(None);
        }

        if &header[..4] != OGG_SYNC || header[4] != 0 {
            // 在已读字节中找下一个同步字候选, 末尾 3 字节可能是同步字的前缀
            let next = header[1..]
                .windows(OGG_SYNC.len())
                .position(|w| w == OGG_SYNC)
                .map_or(PAGE_HEADER_LEN - 3, |pos| pos + 1);
            source.unread(&header[next..]);
            skipped += next as u64;
            continue;
        }

        let segment_count = usize::from(header[26]);
        let segments = source.read_available(segment_count)?;
        let data_len: usize = segments.iter().map(|&s| usize::from(s)).sum();
        let data = if segments.len() == segment_count {
            source.read_available(data_len)?
        } else {
            Vec::new()
        };

        let stored_crc = LittleEndian::read_u32(&header[22..26]);
        let complete = segments.len() == segment_count && data.len() == data_len;
        let crc_ok = complete && {
            let mut crc = OggCrc::new();
            crc.update(&header[..22]);
            crc.update(&[0u8; 4]);
            crc.update(&header[26..]);
            crc.update(&segments);
            crc.update(&data);
            crc.value() == stored_crc
        };
        if !crc_ok {
            debug!(
                "Ogg 页面校验失败 @{}: complete={}, crc=0x{:08X}",
                start, complete, stored_crc,
            );
            source.unread(&data);
            source.unread(&segments);
            source.unread(&header[1..]);
            skipped += 1;
            continue;
        }

        let page = OggPage {
            flags: PageFlags::from_bits_truncate(header[5]),
            granule_position: LittleEndian::read_i64(&header[6..14]),
            serial: LittleEndian::read_u32(&header[14..18]),
            sequence: LittleEndian::read_u32(&header[18..22]),
            segments,
            data: Bytes::from(data),
            offset: start,
        };
        return Ok(Some(PageRead { page, skipped }));
    }
}
