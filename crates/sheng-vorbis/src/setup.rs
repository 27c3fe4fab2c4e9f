//! Vorbis setup 头包: 码本、floor、residue、mapping 与 mode 配置.

use log::debug;
use sheng_core::{DataPacket, ShengError, ShengResult};

use crate::codebook::Codebook;
use crate::floor::Floor;
use crate::headers::{IdentHeader, SETUP_PACKET_TYPE, read_magic};
use crate::mapping::Mapping;
use crate::mode::Mode;
use crate::residue::Residue;
use crate::stats::BitCounters;
use crate::util::ilog;

/// 解析后的 setup 配置, 解码期间只读
#[derive(Debug, Clone)]
pub struct SetupHeader {
    pub books: Vec<Codebook>,
    pub floors: Vec<Floor>,
    pub residues: Vec<Residue>,
    pub mappings: Vec<Mapping>,
    pub modes: Vec<Mode>,
    /// 音频包中 mode 序号的位宽
    pub mode_field_bits: usize,
}

impl SetupHeader {
    /// 解析 setup 头包, 标识不匹配时返回 `None`.
    ///
    /// 声道数与块长来自同一逻辑流的 identification 头.
    pub(crate) fn read(
        packet: &mut DataPacket,
        ident: &IdentHeader,
        bits: &mut BitCounters,
    ) -> ShengResult<Option<Self>> {
        if !read_magic(packet, SETUP_PACKET_TYPE)? {
            return Ok(None);
        }
        let mut mark = packet.bits_read();
        bits.glue += mark as u64;

        let mut section = |packet: &DataPacket, counter: &mut u64| {
            *counter += (packet.bits_read() - mark) as u64;
            mark = packet.bits_read();
        };

        let book_count = packet.read_bits(8)? as usize + 1;
        let books = (0..book_count)
            .map(|i| Codebook::read(packet, i))
            .collect::<ShengResult<Vec<_>>>()?;
        section(packet, &mut bits.books);

        // time domain 变换只是占位, 值必须为 0
        let time_count = packet.read_bits(6)? as usize + 1;
        for i in 0..time_count {
            let value = packet.read_bits(16)?;
            if value != 0 {
                return Err(ShengError::InvalidData(format!(
                    "Vorbis time {} 取值非零: {}",
                    i, value,
                )));
            }
        }
        section(packet, &mut bits.time_header);

        let floor_count = packet.read_bits(6)? as usize + 1;
        let floors = (0..floor_count)
            .map(|i| Floor::read(packet, &books, ident.block_sizes, i))
            .collect::<ShengResult<Vec<_>>>()?;
        section(packet, &mut bits.floor_header);

        let residue_count = packet.read_bits(6)? as usize + 1;
        let residues = (0..residue_count)
            .map(|i| Residue::read(packet, &books, i))
            .collect::<ShengResult<Vec<_>>>()?;
        section(packet, &mut bits.residue_header);

        let mapping_count = packet.read_bits(6)? as usize + 1;
        let mappings = (0..mapping_count)
            .map(|i| Mapping::read(packet, ident.channels, floor_count, residue_count, i))
            .collect::<ShengResult<Vec<_>>>()?;
        section(packet, &mut bits.mapping_header);

        let mode_count = packet.read_bits(6)? as usize + 1;
        let modes = (0..mode_count)
            .map(|i| Mode::read(packet, ident.block_sizes, mapping_count, i))
            .collect::<ShengResult<Vec<_>>>()?;
        section(packet, &mut bits.mode_header);

        if !packet.read_bit()? || packet.is_short() {
            return Err(ShengError::InvalidData(
                "Vorbis setup 头包 framing_flag 非法".into(),
            ));
        }
        bits.glue += 1;
        bits.waste_header += packet.bits_remaining() as u64;

        debug!(
            "Vorbis setup: books={}, floors={}, residues={}, mappings={}, modes={}",
            book_count, floor_count, residue_count, mapping_count, mode_count,
        );

        Ok(Some(Self {
            books,
            floors,
            residues,
            mappings,
            modes,
            mode_field_bits: ilog(mode_count as u32 - 1) as usize,
        }))
    }
}
