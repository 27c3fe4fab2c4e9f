//! Vorbis 码本解析.
//!
//! 码本由 setup 头包声明: 同步字、维度、条目数、每个条目的码长 (有序/无序/稀疏
//! 三种编码) 以及可选的 VQ 查找表. 码字按 "可用叶子" 算法分配并位反转存放.

use log::trace;
use sheng_core::{DataPacket, ShengError, ShengResult};

use crate::huffman::HuffmanTable;
use crate::util::{bit_reverse, float32_unpack, ilog};

/// 码本同步字 "BCV"
const CODEBOOK_SYNC: u64 = 0x56_4342;

/// 解析后的码本
#[derive(Debug, Clone)]
pub struct Codebook {
    index: usize,
    dimensions: usize,
    entries: usize,
    map_type: u8,
    /// `entries × dimensions` 的 VQ 值表
    lookup: Vec<f32>,
    /// 所有条目都未使用时为 `None`
    huffman: Option<HuffmanTable>,
}

impl Codebook {
    /// 从 setup 头包读取第 `index` 个码本
    pub fn read(packet: &mut DataPacket, index: usize) -> ShengResult<Self> {
        if packet.read_bits(24)? != CODEBOOK_SYNC {
            return Err(ShengError::InvalidData(format!(
                "Vorbis codebook {} 同步字错误",
                index,
            )));
        }

        let dimensions = packet.read_bits(16)? as usize;
        let entries = packet.read_bits(24)? as usize;

        let lengths = read_lengths(packet, entries, index)?;
        let huffman = build_huffman(&lengths, index)?;

        let mut book = Self {
            index,
            dimensions,
            entries,
            map_type: 0,
            lookup: Vec::new(),
            huffman,
        };
        book.read_lookup_table(packet)?;

        trace!(
            "Vorbis codebook {}: dims={}, entries={}, map_type={}",
            index, dimensions, entries, book.map_type,
        );
        Ok(book)
    }

    fn read_lookup_table(&mut self, packet: &mut DataPacket) -> ShengResult<()> {
        self.map_type = packet.read_bits(4)? as u8;
        if self.map_type == 0 {
            return Ok(());
        }
        if self.map_type > 2 {
            return Err(ShengError::InvalidData(format!(
                "Vorbis codebook {} lookup 类型非法: {}",
                self.index, self.map_type,
            )));
        }
        if self.dimensions == 0 {
            return Err(ShengError::InvalidData(format!(
                "Vorbis codebook {} 带 lookup 但维度为 0",
                self.index,
            )));
        }

        let min_value = float32_unpack(packet.read_u32()?);
        let delta_value = float32_unpack(packet.read_u32()?);
        let value_bits = packet.read_bits(4)? as usize + 1;
        let sequence_p = packet.read_bit()?;

        let lookup_values = if self.map_type == 1 {
            lookup1_values(self.entries, self.dimensions)
        } else {
            self.entries * self.dimensions
        };

        let mut multiplicands = Vec::with_capacity(lookup_values);
        for _ in 0..lookup_values {
            multiplicands.push(packet.read_bits(value_bits)? as u32);
        }
        if packet.is_short() {
            return Err(ShengError::InvalidData(format!(
                "Vorbis codebook {} lookup 数据不完整",
                self.index,
            )));
        }
        if lookup_values == 0 {
            return Err(ShengError::InvalidData(format!(
                "Vorbis codebook {} lookup 值数量为 0",
                self.index,
            )));
        }

        let dims = self.dimensions;
        let mut lookup = vec![0f32; self.entries * dims];
        for (entry, row) in lookup.chunks_exact_mut(dims).enumerate() {
            let mut last = 0f32;
            let mut idx_div = 1usize;
            for (i, slot) in row.iter_mut().enumerate() {
                let moff = if self.map_type == 1 {
                    (entry / idx_div) % lookup_values
                } else {
                    entry * dims + i
                };
                let value = multiplicands[moff] as f32 * delta_value + min_value + last;
                *slot = value;
                if sequence_p {
                    last = value;
                }
                idx_div = idx_div.saturating_mul(lookup_values);
            }
        }
        self.lookup = lookup;
        Ok(())
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// VQ 查找表类型, 0 表示只能做标量解码
    pub fn map_type(&self) -> u8 {
        self.map_type
    }

    /// 条目 `entry` 的第 `dim` 维 VQ 值
    pub fn lookup(&self, entry: usize, dim: usize) -> f32 {
        self.lookup[entry * self.dimensions + dim]
    }

    /// 条目 `entry` 的完整向量
    pub fn vector(&self, entry: usize) -> &[f32] {
        let start = entry * self.dimensions;
        &self.lookup[start..start + self.dimensions]
    }

    /// 解码一个条目号, 码流损坏或数据不足时返回 `None`
    pub fn decode_scalar(&self, packet: &mut DataPacket) -> Option<usize> {
        self.huffman
            .as_ref()?
            .decode(packet)
            .map(|value| value as usize)
    }

    /// 解码一个条目并返回它的向量
    pub fn decode_vq(&self, packet: &mut DataPacket) -> Option<&[f32]> {
        let entry = self.decode_scalar(packet)?;
        Some(self.vector(entry))
    }
}

/// 读取每个条目的码长, 0 表示未使用
fn read_lengths(packet: &mut DataPacket, entries: usize, index: usize) -> ShengResult<Vec<u8>> {
    let mut lengths = vec![0u8; entries];

    if packet.read_bit()? {
        // 有序: 码长递增, 每个码长给出连续条目数
        let mut len = packet.read_bits(5)? as usize + 1;
        let mut i = 0usize;
        while i < entries {
            let count = packet.read_bits(ilog((entries - i) as u32) as usize)? as usize;
            if i + count > entries || len > 32 {
                return Err(ShengError::InvalidData(format!(
                    "Vorbis codebook {} 有序码长越界",
                    index,
                )));
            }
            lengths[i..i + count].fill(len as u8);
            i += count;
            len += 1;
            if packet.is_short() {
                break;
            }
        }
    } else {
        let sparse = packet.read_bit()?;
        for slot in lengths.iter_mut() {
            if !sparse || packet.read_bit()? {
                *slot = packet.read_bits(5)? as u8 + 1;
            }
        }
    }

    if packet.is_short() {
        return Err(ShengError::InvalidData(format!(
            "Vorbis codebook {} 码长表不完整",
            index,
        )));
    }
    Ok(lengths)
}

fn build_huffman(lengths: &[u8], index: usize) -> ShengResult<Option<HuffmanTable>> {
    if lengths.iter().all(|&len| len == 0) {
        return Ok(None);
    }
    let codes = compute_codewords(lengths).ok_or_else(|| {
        ShengError::InvalidData(format!("Vorbis codebook {} Huffman 码长表过度指定", index))
    })?;
    let values: Vec<u32> = (0..lengths.len() as u32).collect();
    Ok(Some(HuffmanTable::build(&values, lengths, &codes)))
}

/// 按可用叶子算法分配规范码字 (位反转), 码长过度指定时返回 `None`
fn compute_codewords(lengths: &[u8]) -> Option<Vec<u32>> {
    let mut codes = vec![0u32; lengths.len()];
    let mut available = [0u32; 33];

    let first = lengths.iter().position(|&len| len > 0)?;
    for (i, slot) in available
        .iter_mut()
        .enumerate()
        .take(lengths[first] as usize + 1)
        .skip(1)
    {
        *slot = 1u32 << (32 - i);
    }

    for (i, &len) in lengths.iter().enumerate().skip(first + 1) {
        if len == 0 {
            continue;
        }
        let len = len as usize;
        let mut z = len;
        while z > 0 && available[z] == 0 {
            z -= 1;
        }
        if z == 0 {
            return None;
        }
        let res = available[z];
        available[z] = 0;
        codes[i] = bit_reverse(res, 32);

        for (y, slot) in available.iter_mut().enumerate().take(len + 1).skip(z + 1) {
            *slot = res + (1u32 << (32 - y));
        }
    }

    Some(codes)
}

/// map type 1 的乘数个数: 满足 `r^dims <= entries` 的最大 `r`
fn lookup1_values(entries: usize, dimensions: usize) -> usize {
    let mut r = ((entries as f64).ln() / dimensions as f64).exp().floor() as usize;
    if ((r + 1) as f64).powi(dimensions as i32).floor() <= entries as f64 {
        r += 1;
    }
    r
}
