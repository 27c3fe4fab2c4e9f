//! Vorbis 残差解码.
//!
//! 三种残差类型共用同一套分区/分类/级联配置, 只在向量写回方式上不同:
//! 类型 0 按维度分组, 类型 1 按维度交织, 类型 2 把子映射的所有声道交织成一个
//! 超级声道解码后再拆回各声道.

use log::debug;
use sheng_core::{DataPacket, ShengError, ShengResult};

use crate::codebook::Codebook;
use crate::util::ilog;

/// 残差向量写回方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidueType {
    Zero,
    One,
    Two,
}

#[derive(Debug, Clone)]
pub struct Residue {
    kind: ResidueType,
    begin: usize,
    end: usize,
    partition_size: usize,
    classifications: usize,
    class_book: usize,
    cascade: Vec<u32>,
    /// `[分类][级]` 的码本
    books: Vec<[Option<usize>; 8]>,
    max_stages: usize,
    /// 分类码字 -> 每个分区的分类号
    decode_map: Vec<Vec<usize>>,
}

impl Residue {
    /// 读取残差类型 (16 位) 及其配置
    pub fn read(packet: &mut DataPacket, books: &[Codebook], index: usize) -> ShengResult<Self> {
        let kind = match packet.read_bits(16)? {
            0 => ResidueType::Zero,
            1 => ResidueType::One,
            2 => ResidueType::Two,
            other => {
                return Err(ShengError::InvalidData(format!(
                    "Vorbis residue {} 类型不支持: {}",
                    index, other,
                )));
            }
        };

        let begin = packet.read_bits(24)? as usize;
        let end = packet.read_bits(24)? as usize;
        let partition_size = packet.read_bits(24)? as usize + 1;
        let classifications = packet.read_bits(6)? as usize + 1;
        let class_book = packet.read_bits(8)? as usize;

        let invalid = |msg: String| ShengError::InvalidData(format!("Vorbis residue {} {}", index, msg));

        let class_book_ref = books
            .get(class_book)
            .ok_or_else(|| invalid(format!("分类码本越界: {}", class_book)))?;
        if class_book_ref.dimensions() == 0 {
            return Err(invalid("分类码本维度为 0".into()));
        }

        let mut cascade = Vec::with_capacity(classifications);
        for _ in 0..classifications {
            let low_bits = packet.read_bits(3)? as u32;
            let high_bits = if packet.read_bit()? {
                packet.read_bits(5)? as u32
            } else {
                0
            };
            cascade.push(high_bits << 3 | low_bits);
        }

        let mut stage_books = Vec::with_capacity(classifications);
        let mut max_stages = 0usize;
        for &bits in &cascade {
            let mut slots = [None; 8];
            for (stage, slot) in slots.iter_mut().enumerate() {
                if bits & (1 << stage) == 0 {
                    continue;
                }
                let num = packet.read_bits(8)? as usize;
                let book = books
                    .get(num)
                    .ok_or_else(|| invalid(format!("码本越界: {}", num)))?;
                if book.map_type() == 0 {
                    return Err(invalid(format!("码本 {} 没有 VQ 表", num)));
                }
                *slot = Some(num);
            }
            max_stages = max_stages.max(ilog(bits) as usize);
            stage_books.push(slots);
        }

        let dims = class_book_ref.dimensions();
        let mut part_vals = 1usize;
        for _ in 0..dims {
            part_vals = part_vals.saturating_mul(classifications);
            if part_vals > class_book_ref.entries() {
                return Err(invalid("分类码本条目不足".into()));
            }
        }

        let decode_map = (0..part_vals)
            .map(|word| {
                let mut val = word;
                let mut mult = part_vals / classifications;
                let mut row = Vec::with_capacity(dims);
                for _ in 0..dims {
                    let deco = val / mult;
                    val -= deco * mult;
                    mult = (mult / classifications).max(1);
                    row.push(deco);
                }
                row
            })
            .collect();

        if packet.is_short() {
            return Err(invalid("配置不完整".into()));
        }

        Ok(Self {
            kind,
            begin,
            end,
            partition_size,
            classifications,
            class_book,
            cascade,
            books: stage_books,
            max_stages,
            decode_map,
        })
    }

    pub fn kind(&self) -> ResidueType {
        self.kind
    }

    pub fn classifications(&self) -> usize {
        self.classifications
    }

    /// 解码一个子映射的残差, 累加到 `buffers[ch]` 的前 `block_size / 2` 项.
    ///
    /// `channels` 是属于该子映射的声道号, `do_not_decode` 按声道号索引.
    /// 码流损坏时提前停止, 已写入的值保留.
    pub fn decode(
        &self,
        packet: &mut DataPacket,
        books: &[Codebook],
        block_size: usize,
        channels: &[usize],
        do_not_decode: &[bool],
        buffers: &mut [Vec<f32>],
    ) {
        let half = block_size / 2;
        let active: Vec<usize> = channels
            .iter()
            .copied()
            .filter(|&ch| !do_not_decode[ch])
            .collect();
        if active.is_empty() {
            return;
        }

        let complete = match self.kind {
            ResidueType::Two => {
                // 超级声道: 所有子映射声道交织, 包括无能量的声道
                let mut target = Target::Interleaved { channels, buffers };
                self.decode_partitions(packet, books, half * channels.len(), 1, &mut target)
            }
            _ => {
                let mut target = Target::Split { channels: &active, buffers };
                self.decode_partitions(packet, books, half, active.len(), &mut target)
            }
        };
        if !complete {
            debug!("Vorbis residue 解码提前结束, 保留已解出的数据");
        }
    }

    fn decode_partitions(
        &self,
        packet: &mut DataPacket,
        books: &[Codebook],
        limit: usize,
        vectors: usize,
        target: &mut Target<'_>,
    ) -> bool {
        let end = self.end.min(limit);
        if end <= self.begin {
            return true;
        }
        let part_vals = (end - self.begin) / self.partition_size;
        let class_book = &books[self.class_book];
        let class_dims = class_book.dimensions();

        let mut classes = vec![0usize; vectors * part_vals];
        let mut entries = Vec::with_capacity(self.partition_size);

        for stage in 0..self.max_stages {
            let mut i = 0usize;
            while i < part_vals {
                if stage == 0 {
                    for v in 0..vectors {
                        let Some(row) = class_book
                            .decode_scalar(packet)
                            .and_then(|word| self.decode_map.get(word))
                        else {
                            return false;
                        };
                        for (k, &class) in row.iter().enumerate().take(part_vals - i) {
                            classes[v * part_vals + i + k] = class;
                        }
                    }
                }
                for _ in 0..class_dims {
                    if i >= part_vals {
                        break;
                    }
                    let offset = self.begin + i * self.partition_size;
                    for v in 0..vectors {
                        let class = classes[v * part_vals + i];
                        if self.cascade[class] & (1 << stage) == 0 {
                            continue;
                        }
                        let Some(book) = self.books[class][stage] else {
                            continue;
                        };
                        if !self.write_vectors(&books[book], packet, target, v, offset, &mut entries) {
                            return false;
                        }
                    }
                    i += 1;
                }
            }
        }
        true
    }

    fn write_vectors(
        &self,
        book: &Codebook,
        packet: &mut DataPacket,
        target: &mut Target<'_>,
        vector: usize,
        offset: usize,
        entries: &mut Vec<usize>,
    ) -> bool {
        let dims = book.dimensions();
        let size = self.partition_size;
        match (self.kind, target) {
            (ResidueType::Zero, Target::Split { channels, buffers }) => {
                let step = size / dims;
                entries.clear();
                for _ in 0..step {
                    match book.decode_scalar(packet) {
                        Some(entry) => entries.push(entry),
                        None => return false,
                    }
                }
                let res = &mut buffers[channels[vector]];
                for d in 0..dims {
                    for (j, &entry) in entries.iter().enumerate() {
                        res[offset + d * step + j] += book.lookup(entry, d);
                    }
                }
            }
            (_, Target::Split { channels, buffers }) => {
                let res = &mut buffers[channels[vector]];
                let mut i = 0usize;
                while i < size {
                    let Some(vector) = book.decode_vq(packet) else {
                        return false;
                    };
                    for &value in vector.iter().take(size - i) {
                        res[offset + i] += value;
                        i += 1;
                    }
                }
            }
            (_, Target::Interleaved { channels, buffers }) => {
                let count = channels.len();
                let mut pos = offset / count;
                let mut ch = offset % count;
                let mut c = 0usize;
                while c < size {
                    let Some(vector) = book.decode_vq(packet) else {
                        return false;
                    };
                    for &value in vector.iter().take(size - c) {
                        buffers[channels[ch]][pos] += value;
                        ch += 1;
                        if ch == count {
                            ch = 0;
                            pos += 1;
                        }
                        c += 1;
                    }
                }
            }
        }
        true
    }
}

/// 残差向量写回的目标
enum Target<'a> {
    /// 类型 0/1: 每个解码向量对应一个声道
    Split {
        channels: &'a [usize],
        buffers: &'a mut [Vec<f32>],
    },
    /// 类型 2: 一个向量按声道交织
    Interleaved {
        channels: &'a [usize],
        buffers: &'a mut [Vec<f32>],
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheng_core::bitwriter::BitWriter;

    /// 两条目码本, 码长 1; `map_type` 为 1 时条目 0 -> -1.0, 条目 1 -> 1.0
    fn two_entry_book(dims: u64, map_type: u64) -> Codebook {
        let mut bw = BitWriter::new();
        bw.write_bits(0x56_4342, 24);
        bw.write_bits(dims, 16);
        bw.write_bits(2, 24);
        bw.write_bit(false);
        bw.write_bit(false);
        bw.write_bits(0, 5);
        bw.write_bits(0, 5);
        bw.write_bits(map_type, 4);
        if map_type == 1 {
            bw.write_vorbis_float(-1.0);
            bw.write_vorbis_float(2.0);
            bw.write_bits(0, 4);
            bw.write_bit(false);
            // lookup1_values(2, dims) 个乘数
            let count = if dims == 1 { 2 } else { 1 };
            for m in 0..count {
                bw.write_bits(m as u64 % 2, 1);
            }
        }
        Codebook::read(&mut DataPacket::new(bw.finish()), 0).unwrap()
    }

    /// 书 0: 分类码本 (1 维, 无 VQ), 书 1: 1 维 VQ
    fn books() -> Vec<Codebook> {
        vec![two_entry_book(1, 0), two_entry_book(1, 1)]
    }

    /// 范围 [0, 8), 分区 4, 2 个分类, 分类 1 在第 0 级使用书 1
    fn write_residue(bw: &mut BitWriter, kind: u64) {
        bw.write_bits(kind, 16);
        bw.write_bits(0, 24);
        bw.write_bits(8, 24);
        bw.write_bits(3, 24);
        bw.write_bits(1, 6);
        bw.write_bits(0, 8);
        // 分类 0: 无级联; 分类 1: 第 0 级
        bw.write_bits(0, 3);
        bw.write_bit(false);
        bw.write_bits(1, 3);
        bw.write_bit(false);
        bw.write_bits(1, 8);
    }

    fn read_residue(kind: u64) -> Residue {
        let mut bw = BitWriter::new();
        write_residue(&mut bw, kind);
        Residue::read(&mut DataPacket::new(bw.finish()), &books(), 0).unwrap()
    }

    #[test]
    fn test_residue_配置解析() {
        let residue = read_residue(1);
        assert_eq!(residue.kind(), ResidueType::One);
        assert_eq!(residue.partition_size, 4);
        assert_eq!(residue.classifications(), 2);
        assert_eq!(residue.max_stages, 1);
        assert_eq!(residue.decode_map, vec![vec![0], vec![1]]);
        assert_eq!(residue.books[1][0], Some(1));
        assert_eq!(residue.books[0][0], None);
    }

    #[test]
    fn test_residue_类型1解码() {
        let residue = read_residue(1);
        let books = books();
        // 分区 0 分类 1, 条目 1,0,1,1; 分区 1 分类 0
        let mut bw = BitWriter::new();
        bw.write_bits(1, 1);
        for e in [1u64, 0, 1, 1] {
            bw.write_bits(e, 1);
        }
        bw.write_bits(0, 1);
        let mut buffers = vec![vec![0f32; 16]];
        residue.decode(&mut DataPacket::new(bw.finish()), &books, 16, &[0], &[false], &mut buffers);
        assert_eq!(buffers[0][..8], [1.0, -1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_residue_跳过无能量声道() {
        let residue = read_residue(0);
        let books = books();
        let mut bw = BitWriter::new();
        bw.write_bits(1, 1);
        for e in [0u64, 0, 0, 0] {
            bw.write_bits(e, 1);
        }
        bw.write_bits(0, 1);
        let mut buffers = vec![vec![0f32; 16], vec![5f32; 16]];
        residue.decode(
            &mut DataPacket::new(bw.finish()),
            &books,
            16,
            &[0, 1],
            &[false, true],
            &mut buffers,
        );
        assert_eq!(buffers[0][..4], [-1.0; 4]);
        assert!(buffers[1].iter().all(|&v| v == 5.0), "无能量声道不应被写入");
    }

    #[test]
    fn test_residue_类型2交织() {
        let residue = read_residue(2);
        let books = books();
        // 超级声道长度 16, 范围 [0, 8): 两个分区, 第一个分类 1
        let mut bw = BitWriter::new();
        bw.write_bits(1, 1);
        for e in [1u64, 0, 1, 0] {
            bw.write_bits(e, 1);
        }
        bw.write_bits(0, 1);
        let mut buffers = vec![vec![0f32; 16], vec![0f32; 16]];
        residue.decode(
            &mut DataPacket::new(bw.finish()),
            &books,
            16,
            &[0, 1],
            &[false, true],
            &mut buffers,
        );
        assert_eq!(buffers[0][..2], [1.0, 1.0]);
        assert_eq!(buffers[1][..2], [-1.0, -1.0]);
    }

    #[test]
    fn test_residue_截断保留已解数据() {
        let residue = read_residue(1);
        let books = books();
        // 两个分区都是分类 1, 第二个分区数据缺失
        let mut bw = BitWriter::new();
        bw.write_bits(1, 1);
        for e in [1u64, 1, 1, 1] {
            bw.write_bits(e, 1);
        }
        bw.write_bits(1, 1);
        let mut packet = DataPacket::new(bw.finish());
        let mut buffers = vec![vec![0f32; 16]];
        residue.decode(&mut packet, &books, 16, &[0], &[false], &mut buffers);
        assert_eq!(buffers[0][..4], [1.0; 4]);
    }
}
