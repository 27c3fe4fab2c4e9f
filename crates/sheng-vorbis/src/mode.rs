//! Vorbis mode: 块长选择与窗函数.

use std::f32::consts::FRAC_PI_2;

use sheng_core::{DataPacket, ShengError, ShengResult};

#[derive(Debug, Clone)]
pub struct Mode {
    block_flag: bool,
    block_size: usize,
    mapping: usize,
    /// 长块: 按 (前块长, 后块长) 索引的 4 个窗; 短块: 1 个窗
    windows: Vec<Vec<f32>>,
}

impl Mode {
    pub fn read(
        packet: &mut DataPacket,
        block_sizes: [usize; 2],
        mapping_count: usize,
        index: usize,
    ) -> ShengResult<Self> {
        let block_flag = packet.read_bit()?;
        let window_type = packet.read_bits(16)?;
        let transform_type = packet.read_bits(16)?;
        let mapping = packet.read_bits(8)? as usize;

        if window_type != 0 || transform_type != 0 || mapping >= mapping_count {
            return Err(ShengError::InvalidData(format!(
                "Vorbis mode {} 非法: window={}, transform={}, mapping={}",
                index, window_type, transform_type, mapping,
            )));
        }

        let block_size = block_sizes[usize::from(block_flag)];
        let windows = if block_flag {
            (0..4)
                .map(|idx| {
                    let left = block_sizes[idx & 1];
                    let right = block_sizes[(idx >> 1) & 1];
                    build_window(block_size, left, right)
                })
                .collect()
        } else {
            vec![build_window(block_size, block_size, block_size)]
        };

        Ok(Self {
            block_flag,
            block_size,
            mapping,
            windows,
        })
    }

    /// 是否为长块
    pub fn block_flag(&self) -> bool {
        self.block_flag
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn mapping(&self) -> usize {
        self.mapping
    }

    /// 按前后块是否为长块选择窗
    pub fn window(&self, prev_long: bool, next_long: bool) -> &[f32] {
        if !self.block_flag {
            return &self.windows[0];
        }
        &self.windows[usize::from(prev_long) | usize::from(next_long) << 1]
    }
}

/// 窗长 `size`, 左右斜坡分别与长度 `left` / `right` 的相邻块重叠
fn build_window(size: usize, left: usize, right: usize) -> Vec<f32> {
    let mut window = vec![0f32; size];
    let left = left / 2;
    let right = right / 2;
    let left_begin = size / 4 - left / 2;
    let right_begin = size - size / 4 - right / 2;

    for i in 0..left {
        window[left_begin + i] = slope(i, left);
    }
    for v in &mut window[left_begin + left..right_begin] {
        *v = 1.0;
    }
    for i in 0..right {
        window[right_begin + i] = slope(right - 1 - i, right);
    }
    window
}

/// `sin(π/2 · sin²((i + 0.5) / n · π/2))`
fn slope(i: usize, n: usize) -> f32 {
    let x = ((i as f64 + 0.5) / n as f64 * std::f64::consts::FRAC_PI_2).sin() as f32;
    (x * x * FRAC_PI_2).sin()
}
