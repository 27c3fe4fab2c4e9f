//! floor 0: LSP 滤波器包络.

use std::collections::HashMap;
use std::f64::consts::PI;

use log::debug;
use sheng_core::{DataPacket, ShengError, ShengResult};

use super::FloorData;
use crate::codebook::Codebook;
use crate::util::ilog;

#[derive(Debug, Clone)]
pub struct Floor0 {
    order: usize,
    rate: u32,
    bark_map_size: usize,
    amp_bits: usize,
    amp_offset: u32,
    amp_div: f32,
    books: Vec<usize>,
    book_bits: usize,
    /// 半块长 -> 每个频点所属的 bark 段
    bark_maps: HashMap<usize, Vec<usize>>,
    /// `2cos(πk/bark_map_size)`
    w_map: Vec<f32>,
}

impl Floor0 {
    pub(super) fn read(
        packet: &mut DataPacket,
        books: &[Codebook],
        block_sizes: [usize; 2],
        index: usize,
    ) -> ShengResult<Self> {
        let order = packet.read_bits(8)? as usize;
        let rate = packet.read_bits(16)? as u32;
        let bark_map_size = packet.read_bits(16)? as usize;
        let amp_bits = packet.read_bits(6)? as usize;
        let amp_offset = packet.read_bits(8)? as u32;
        let book_count = packet.read_bits(4)? as usize + 1;

        if order < 1 || rate < 1 || bark_map_size < 1 {
            return Err(ShengError::InvalidData(format!(
                "Vorbis floor0 {} 参数非法: order={}, rate={}, bark_map_size={}",
                index, order, rate, bark_map_size,
            )));
        }

        let mut book_list = Vec::with_capacity(book_count);
        for _ in 0..book_count {
            let num = packet.read_bits(8)? as usize;
            let book = books.get(num).ok_or_else(|| {
                ShengError::InvalidData(format!("Vorbis floor0 {} 码本索引越界: {}", index, num))
            })?;
            if book.map_type() == 0 || book.dimensions() < 1 {
                return Err(ShengError::InvalidData(format!(
                    "Vorbis floor0 {} 码本 {} 不能用于 VQ",
                    index, num,
                )));
            }
            book_list.push(num);
        }

        let mut floor = Self {
            order,
            rate,
            bark_map_size,
            amp_bits,
            amp_offset,
            amp_div: ((1u64 << amp_bits) - 1) as f32,
            books: book_list,
            book_bits: ilog(book_count as u32) as usize,
            bark_maps: HashMap::new(),
            w_map: Vec::new(),
        };
        for block_size in block_sizes {
            let map = floor.synthesize_bark_map(block_size / 2);
            floor.bark_maps.insert(block_size / 2, map);
        }
        let wdel = PI / bark_map_size as f64;
        floor.w_map = (0..bark_map_size)
            .map(|k| (2.0 * (wdel * k as f64).cos()) as f32)
            .collect();
        Ok(floor)
    }

    fn synthesize_bark_map(&self, n: usize) -> Vec<usize> {
        let nyquist = f64::from(self.rate / 2);
        let scale = self.bark_map_size as f64 / to_bark(nyquist);
        (0..n)
            .map(|i| {
                let bark = (to_bark(nyquist / n as f64 * i as f64) * scale).floor();
                (bark.max(0.0) as usize).min(self.bark_map_size - 1)
            })
            .collect()
    }

    pub(super) fn unpack(&self, packet: &mut DataPacket, books: &[Codebook], data: &mut FloorData) {
        let amp = match packet.read_bits(self.amp_bits) {
            Ok(amp) => amp,
            Err(_) => return,
        };
        if amp == 0 {
            return;
        }

        data.coeff.clear();
        data.coeff.resize(self.order, 0.0);

        let book_num = match packet.read_bits(self.book_bits) {
            Ok(num) => num as usize,
            Err(_) => return,
        };
        let Some(book) = self.books.get(book_num).and_then(|&num| books.get(num)) else {
            debug!("Vorbis floor0 码本号越界: {}", book_num);
            return;
        };
        let dims = book.dimensions();

        let mut i = 0usize;
        while i < self.order {
            let Some(vector) = book.decode_vq(packet) else {
                return;
            };
            for &value in vector.iter().take(self.order - i) {
                data.coeff[i] = value;
                i += 1;
            }
        }

        let mut last = 0f32;
        for chunk in data.coeff.chunks_mut(dims) {
            for value in chunk.iter_mut() {
                *value += last;
            }
            last = chunk[chunk.len() - 1];
        }

        data.amp = amp as f32 / self.amp_div * self.amp_offset as f32;
    }

    pub(super) fn apply(&self, data: &mut FloorData, residue: &mut [f32]) {
        let n = data.block_size / 2;
        let n = n.min(residue.len());
        if data.amp <= 0.0 {
            residue[..n].fill(0.0);
            return;
        }
        let Some(bark_map) = self.bark_maps.get(&(data.block_size / 2)) else {
            residue[..n].fill(0.0);
            return;
        };

        for c in data.coeff.iter_mut() {
            *c = 2.0 * c.cos();
        }

        let order = self.order;
        let mut i = 0usize;
        while i < n {
            let k = bark_map[i];
            let w = self.w_map[k];
            let mut p = 0.5f32;
            let mut q = 0.5f32;
            let mut j = 1usize;
            while j < order {
                q *= w - data.coeff[j - 1];
                p *= w - data.coeff[j];
                j += 2;
            }
            if j == order {
                // 奇数阶
                q *= w - data.coeff[j - 1];
                p *= p * (4.0 - w * w);
                q *= q;
            } else {
                p *= p * (2.0 - w);
                q *= q * (2.0 + w);
            }

            let db = data.amp / (p + q).sqrt() - self.amp_offset as f32;
            let multiplier = (db * 0.115_129_25).exp();

            while i < n && bark_map[i] == k {
                residue[i] *= multiplier;
                i += 1;
            }
        }
    }
}

fn to_bark(freq: f64) -> f64 {
    13.1 * (0.00074 * freq).atan() + 2.24 * (0.000_000_018_5 * freq * freq).atan() + 0.0001 * freq
}
