//! Vorbis floor: 每个声道每个块的频谱包络.
//!
//! floor 配置在 setup 头中解析一次; 每个音频包先 `unpack` 到该声道复用的
//! [`FloorData`], 残差解码完成后再 `apply` 到残差频谱上.
//! 码流损坏只会让该声道在本块内静音, 不会中断解码.

mod floor0;
mod floor1;

use sheng_core::{DataPacket, ShengError, ShengResult};

use crate::codebook::Codebook;

pub use floor0::Floor0;
pub use floor1::Floor1;

/// setup 头声明的 floor
#[derive(Debug, Clone)]
pub enum Floor {
    Zero(Floor0),
    One(Floor1),
}

impl Floor {
    /// 读取 floor 类型 (16 位) 及其配置
    pub fn read(
        packet: &mut DataPacket,
        books: &[Codebook],
        block_sizes: [usize; 2],
        index: usize,
    ) -> ShengResult<Self> {
        let floor_type = packet.read_bits(16)?;
        match floor_type {
            0 => Ok(Self::Zero(Floor0::read(packet, books, block_sizes, index)?)),
            1 => Ok(Self::One(Floor1::read(packet, books, index)?)),
            other => Err(ShengError::InvalidData(format!(
                "Vorbis floor {} 类型不支持: {}",
                index, other,
            ))),
        }
    }

    /// 解出一个声道本块的 floor 参数
    pub fn unpack(
        &self,
        packet: &mut DataPacket,
        books: &[Codebook],
        block_size: usize,
        data: &mut FloorData,
    ) {
        data.reset(block_size);
        match self {
            Self::Zero(floor) => floor.unpack(packet, books, data),
            Self::One(floor) => floor.unpack(packet, books, data),
        }
    }

    /// 把包络乘到 `residue` 的前 `block_size / 2` 个系数上
    pub fn apply(&self, data: &mut FloorData, residue: &mut [f32]) {
        match self {
            Self::Zero(floor) => floor.apply(data, residue),
            Self::One(floor) => floor.apply(data, residue),
        }
    }
}

/// 单个声道一个块的 floor 解包结果, 跨包复用
#[derive(Debug, Clone, Default)]
pub struct FloorData {
    block_size: usize,
    force_energy: bool,
    /// floor 0 振幅, 0 表示无能量
    amp: f32,
    /// floor 0 LSP 系数
    coeff: Vec<f32>,
    /// floor 1 折点 Y 值
    posts: Vec<i32>,
    post_count: usize,
}

impl FloorData {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self, block_size: usize) {
        self.block_size = block_size;
        self.force_energy = false;
        self.amp = 0.0;
        self.post_count = 0;
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// 码流中该声道本块是否携带能量
    pub fn has_energy(&self) -> bool {
        self.amp > 0.0 || self.post_count > 0
    }

    /// 耦合的另一声道有能量时强制解码本声道残差
    pub fn set_force_energy(&mut self, value: bool) {
        self.force_energy = value;
    }

    /// 本块是否需要解码残差并合成
    pub fn execute_channel(&self) -> bool {
        self.force_energy || self.has_energy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheng_core::bitwriter::BitWriter;

    #[test]
    fn test_未知floor类型() {
        let mut bw = BitWriter::new();
        bw.write_bits(2, 16);
        bw.write_bits(0, 32);
        let mut packet = DataPacket::new(bw.finish());
        assert!(matches!(
            Floor::read(&mut packet, &[], [256, 2048], 0),
            Err(ShengError::InvalidData(_))
        ));
    }

    #[test]
    fn test_floor_data_能量标志() {
        let mut data = FloorData::new();
        data.reset(256);
        assert!(!data.execute_channel());
        data.set_force_energy(true);
        assert!(data.execute_channel(), "强制能量后应解码");
        data.reset(256);
        data.post_count = 2;
        assert!(data.has_energy());
        assert!(data.execute_channel());
    }
}
