//! CRC 校验和计算.
//!
//! Ogg 页面使用的 CRC-32 (多项式 0x04C11DB7, 初始值 0, 不反射, 不取反).

/// CRC-32 查找表 (多项式 0x04C11DB7)
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i << 24;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ 0x04C1_1DB7;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
};

/// 增量式 Ogg CRC-32 计算器
///
/// 页面头中的 CRC 字段需要按 0 参与计算, 调用方可以分段 `update`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OggCrc {
    value: u32,
}

impl OggCrc {
    pub fn new() -> Self {
        Self { value: 0 }
    }

    pub fn reset(&mut self) {
        self.value = 0;
    }

    pub fn update(&mut self, data: &[u8]) {
        let mut crc = self.value;
        for &byte in data {
            crc = (crc << 8) ^ CRC32_TABLE[((crc >> 24) as u8 ^ byte) as usize];
        }
        self.value = crc;
    }

    pub fn value(&self) -> u32 {
        self.value
    }
}

/// 一次性计算 Ogg CRC-32
pub fn ogg_crc32(data: &[u8]) -> u32 {
    let mut crc = OggCrc::new();
    crc.update(data);
    crc.value()
}
