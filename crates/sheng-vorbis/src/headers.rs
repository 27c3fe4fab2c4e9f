//! Vorbis identification 与 comment 头包.

use log::warn;
use sheng_core::{DataPacket, ShengError, ShengResult};

use crate::stats::BitCounters;

/// 头包类型字节后的 "vorbis" 标识
const VORBIS_MAGIC: &[u8; 6] = b"vorbis";

pub(crate) const IDENT_PACKET_TYPE: u8 = 0x01;
pub(crate) const COMMENT_PACKET_TYPE: u8 = 0x03;
pub(crate) const SETUP_PACKET_TYPE: u8 = 0x05;

/// 读取 7 字节头包标识, 不匹配时返回 false.
///
/// 标识不匹配时包的读取位置已前移, 调用方需要 `reset` 后再交给其他解析函数.
pub(crate) fn read_magic(packet: &mut DataPacket, packet_type: u8) -> ShengResult<bool> {
    let mut magic = [0u8; 7];
    if packet.read(&mut magic)? != magic.len() {
        return Ok(false);
    }
    Ok(magic[0] == packet_type && &magic[1..] == VORBIS_MAGIC)
}

/// identification 头包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentHeader {
    pub channels: usize,
    pub sample_rate: u32,
    pub bitrate_upper: i32,
    /// 头包中为 0 且上下限都有效时取二者平均
    pub bitrate_nominal: i32,
    pub bitrate_lower: i32,
    /// 短块与长块的长度
    pub block_sizes: [usize; 2],
}

impl IdentHeader {
    /// 解析 identification 头包, 标识不匹配时返回 `None`
    pub(crate) fn read(packet: &mut DataPacket, bits: &mut BitCounters) -> ShengResult<Option<Self>> {
        if !read_magic(packet, IDENT_PACKET_TYPE)? {
            bits.glue += packet.len() as u64 * 8;
            return Ok(None);
        }
        bits.glue += 56;
        let start = packet.bits_read();

        let version = packet.read_u32()?;
        if version != 0 {
            return Err(ShengError::Unsupported(format!(
                "Vorbis 版本不支持: {}",
                version,
            )));
        }

        let channels = usize::from(packet.read_byte()?);
        if channels == 0 {
            return Err(ShengError::InvalidData("Vorbis 声道数不能为 0".into()));
        }
        let sample_rate = packet.read_u32()?;
        if sample_rate == 0 {
            return Err(ShengError::InvalidData("Vorbis 采样率不能为 0".into()));
        }

        let bitrate_upper = packet.read_i32()?;
        let mut bitrate_nominal = packet.read_i32()?;
        let bitrate_lower = packet.read_i32()?;
        if bitrate_nominal == 0 && bitrate_upper > 0 && bitrate_lower > 0 {
            bitrate_nominal = ((i64::from(bitrate_upper) + i64::from(bitrate_lower)) / 2) as i32;
        }

        let bs0_exp = packet.read_bits(4)? as u32;
        let bs1_exp = packet.read_bits(4)? as u32;
        if !(6..=13).contains(&bs0_exp) || !(6..=13).contains(&bs1_exp) || bs0_exp > bs1_exp {
            return Err(ShengError::InvalidData(format!(
                "Vorbis blocksize 非法: bs0_exp={}, bs1_exp={}",
                bs0_exp, bs1_exp,
            )));
        }

        if !packet.read_bit()? {
            return Err(ShengError::InvalidData(
                "Vorbis identification 头包 framing_flag 非法".into(),
            ));
        }
        if packet.is_short() {
            return Err(ShengError::InvalidData(
                "Vorbis identification 头包长度不足".into(),
            ));
        }

        bits.meta += (packet.bits_read() - start) as u64 + 8;
        bits.waste_header += packet.bits_remaining() as u64;

        Ok(Some(Self {
            channels,
            sample_rate,
            bitrate_upper,
            bitrate_nominal,
            bitrate_lower,
            block_sizes: [1 << bs0_exp, 1 << bs1_exp],
        }))
    }
}

/// comment 头包: 编码器标识与 `TAG=value` 注释
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentHeader {
    pub vendor: String,
    pub comments: Vec<String>,
}

impl CommentHeader {
    pub(crate) fn read(packet: &mut DataPacket, bits: &mut BitCounters) -> ShengResult<Option<Self>> {
        if !read_magic(packet, COMMENT_PACKET_TYPE)? {
            return Ok(None);
        }
        bits.glue += 56;

        let vendor = read_string(packet, "vendor")?;
        let count = packet.read_u32()? as usize;
        // 每条注释至少占 4 字节长度字段
        if count > packet.bits_remaining() / 32 {
            return Err(ShengError::InvalidData(format!(
                "Vorbis comment 数量 {} 超出包长度",
                count,
            )));
        }
        let comments = (0..count)
            .map(|_| read_string(packet, "comment"))
            .collect::<ShengResult<Vec<_>>>()?;

        // framing bit 缺失时按 libvorbis 的做法宽松处理
        if packet.bits_remaining() > 0 && !packet.read_bit()? {
            warn!("Vorbis comment 头包 framing_flag 为 0");
        }

        bits.meta += packet.bits_read().saturating_sub(56) as u64;
        bits.waste_header += packet.bits_remaining() as u64;

        Ok(Some(Self { vendor, comments }))
    }

    /// 按标签名 (不区分大小写) 查找注释值
    pub fn get(&self, tag: &str) -> impl Iterator<Item = &str> {
        self.comments.iter().filter_map(move |comment| {
            let (key, value) = comment.split_once('=')?;
            key.eq_ignore_ascii_case(tag).then_some(value)
        })
    }
}

fn read_string(packet: &mut DataPacket, what: &str) -> ShengResult<String> {
    let len = packet.read_u32()? as usize;
    if len > packet.bits_remaining() / 8 {
        return Err(ShengError::InvalidData(format!(
            "Vorbis {} 长度 {} 超出包长度",
            what, len,
        )));
    }
    let bytes = packet.read_bytes(len)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
