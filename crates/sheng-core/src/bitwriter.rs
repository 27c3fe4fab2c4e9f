//! 比特流写入器.
//!
//! 按小端位序 (LSB first) 写入, 与 [`DataPacket`](crate::DataPacket) 的读取顺序对应.
//! 主要用于构造 Vorbis 头包与测试码流.

/// LSB 比特流写入器
///
/// # 示例
/// ```
/// use sheng_core::bitwriter::BitWriter;
///
/// let mut bw = BitWriter::new();
/// bw.write_bits(0b1, 1);
/// bw.write_bits(0b001, 3);
/// bw.write_bits(0b1011, 4);
/// assert_eq!(bw.finish(), vec![0b1011_0011]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    /// 输出缓冲区
    data: Vec<u8>,
    /// 当前字节中已填充的位数 (0-7)
    bit_count: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取已写入的总位数
    pub fn bits_written(&self) -> usize {
        if self.bit_count == 0 {
            self.data.len() * 8
        } else {
            (self.data.len() - 1) * 8 + self.bit_count as usize
        }
    }

    /// 写入值的低 `n` 位 (最多 64 位), 低位在前
    pub fn write_bits(&mut self, value: u64, n: u32) {
        debug_assert!(n <= 64, "write_bits: n={} 超过 64 位", n);
        for i in 0..n {
            self.write_bit((value >> i) & 1 == 1);
        }
    }

    pub fn write_bit(&mut self, bit: bool) {
        if self.bit_count == 0 {
            self.data.push(0);
        }
        if bit {
            if let Some(last) = self.data.last_mut() {
                *last |= 1 << self.bit_count;
            }
        }
        self.bit_count = (self.bit_count + 1) % 8;
    }

    /// 写入整字节序列
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_bits(u64::from(b), 8);
        }
    }

    /// 写入 Vorbis 32 位浮点 (21 位尾数, 10 位指数, 1 位符号)
    pub fn write_vorbis_float(&mut self, value: f32) {
        self.write_bits(u64::from(encode_vorbis_float32(value)), 32);
    }

    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}

/// 把 `f32` 编码为 Vorbis float32 位模式
pub fn encode_vorbis_float32(value: f32) -> u32 {
    if value == 0.0 {
        return 0;
    }
    let sign = if value < 0.0 { 0x8000_0000u32 } else { 0 };
    let mut mantissa = f64::from(value.abs());
    let mut exponent = 0i32;
    while mantissa >= f64::from(1u32 << 21) {
        mantissa /= 2.0;
        exponent += 1;
    }
    while mantissa < f64::from(1u32 << 20) {
        mantissa *= 2.0;
        exponent -= 1;
    }
    let biased = (exponent + 788) as u32 & 0x3FF;
    sign | (biased << 21) | (mantissa as u32 & 0x1F_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataPacket;

    #[test]
    fn test_写入与读取对应() {
        let mut bw = BitWriter::new();
        bw.write_bits(0x5, 3);
        bw.write_bits(0x1234_5678_9ABC, 48);
        bw.write_bit(true);
        assert_eq!(bw.bits_written(), 52);

        let mut packet = DataPacket::new(bw.finish());
        assert_eq!(packet.read_bits(3).unwrap(), 0x5);
        assert_eq!(packet.read_bits(48).unwrap(), 0x1234_5678_9ABC);
        assert!(packet.read_bit().unwrap());
    }

    #[test]
    fn test_vorbis_float_编码() {
        // 1.0 = 0x100000 * 2^-20
        let bits = encode_vorbis_float32(1.0);
        assert_eq!(bits & 0x1F_FFFF, 0x10_0000);
        assert_eq!((bits >> 21) & 0x3FF, (788 - 20) as u32);
        assert_eq!(encode_vorbis_float32(-1.0) & 0x8000_0000, 0x8000_0000);
    }
}
