//! 数据包与 LSB 比特读取.
//!
//! `DataPacket` 由容器读取器产生, 由流解码器消费一次. 负载按 Vorbis 约定的
//! 小端位序 (LSB first) 暴露为比特流, 同时携带页面粒度位置、序号等元数据.
//!
//! 读取越过包尾时不会返回错误: 缺失的位按 0 填充, 并把包标记为 "short",
//! 由调用方决定丢弃该包.

use bitflags::bitflags;
use bytes::Bytes;

use crate::{ShengError, ShengResult};

bitflags! {
    /// 数据包状态标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u8 {
        /// 容器检测到数据缺口, 此包之前的数据不连续
        const RESYNC            = 0x01;
        /// 逻辑流的最后一个包
        const END_OF_STREAM     = 0x02;
        /// 读取越过了包尾
        const SHORT             = 0x04;
        /// 已知本包产出的采样数
        const HAS_GRANULE_COUNT = 0x08;
        /// 本包开始了一组新的头包 (链式流或流内参数变化)
        const PARAMETER_CHANGE  = 0x10;
    }
}

/// 粒度位置未知时的取值
pub const UNKNOWN_GRANULE: i64 = -1;

/// 容器产出的一个逻辑数据包
#[derive(Debug, Clone)]
pub struct DataPacket {
    data: Bytes,
    length: usize,
    bit_pos: usize,
    flags: PacketFlags,
    index: usize,
    granule_position: i64,
    page_granule_position: i64,
    page_sequence_number: u32,
    granule_count: u32,
}

impl DataPacket {
    /// 以负载创建数据包, 元数据为默认值
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            length: data.len(),
            data,
            bit_pos: 0,
            flags: PacketFlags::empty(),
            index: 0,
            granule_position: UNKNOWN_GRANULE,
            page_granule_position: UNKNOWN_GRANULE,
            page_sequence_number: 0,
            granule_count: 0,
        }
    }

    /// 负载字节数 (`done` 之后仍保留)
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// 负载数据 (`done` 之后为空)
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// 已消费的位数
    pub fn bits_read(&self) -> usize {
        self.bit_pos
    }

    /// 剩余可读位数
    pub fn bits_remaining(&self) -> usize {
        self.total_bits().saturating_sub(self.bit_pos)
    }

    fn total_bits(&self) -> usize {
        self.data.len() * 8
    }

    /// 预览最多 64 位, 不移动读取位置.
    ///
    /// 返回 `(值, 实际可用位数)`. 可用位数不足时缺失的高位为 0, 并标记 short.
    pub fn try_peek_bits(&mut self, count: usize) -> ShengResult<(u64, usize)> {
        if count > 64 {
            return Err(ShengError::InvalidArgument(format!(
                "一次最多读取 64 位, 请求 {}",
                count,
            )));
        }
        if count == 0 {
            return Ok((0, 0));
        }

        let available = count.min(self.bits_remaining());
        if available < count {
            self.flags.insert(PacketFlags::SHORT);
        }
        Ok((self.gather(available), available))
    }

    fn gather(&self, count: usize) -> u64 {
        if count == 0 {
            return 0;
        }
        let start = self.bit_pos / 8;
        let shift = self.bit_pos % 8;
        let end = (self.bit_pos + count).div_ceil(8);

        let mut acc = 0u128;
        for (i, &byte) in self.data[start..end].iter().enumerate() {
            acc |= u128::from(byte) << (8 * i);
        }
        let value = (acc >> shift) as u64;
        if count >= 64 {
            value
        } else {
            value & ((1u64 << count) - 1)
        }
    }

    /// 跳过 `count` 位, 越过包尾时停在包尾并标记 short
    pub fn skip_bits(&mut self, count: usize) {
        let total = self.total_bits();
        if self.bit_pos + count > total {
            self.bit_pos = total;
            self.flags.insert(PacketFlags::SHORT);
        } else {
            self.bit_pos += count;
        }
    }

    /// 读取最多 64 位 (预览 + 跳过)
    pub fn read_bits(&mut self, count: usize) -> ShengResult<u64> {
        if count == 0 {
            return Ok(0);
        }
        let (value, _) = self.try_peek_bits(count)?;
        self.skip_bits(count);
        Ok(value)
    }

    pub fn read_bit(&mut self) -> ShengResult<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    pub fn peek_byte(&mut self) -> ShengResult<u8> {
        Ok(self.try_peek_bits(8)?.0 as u8)
    }

    pub fn read_byte(&mut self) -> ShengResult<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    /// 读取 `count` 个字节, 越过包尾的部分按 0 填充
    pub fn read_bytes(&mut self, count: usize) -> ShengResult<Vec<u8>> {
        let mut out = Vec::with_capacity(count.min(self.bits_remaining() / 8 + 1));
        for _ in 0..count {
            out.push(self.read_byte()?);
        }
        Ok(out)
    }

    /// 读取到 `buf`, 返回实际读取的字节数 (只计完整字节)
    pub fn read(&mut self, buf: &mut [u8]) -> ShengResult<usize> {
        for (i, slot) in buf.iter_mut().enumerate() {
            if self.bits_remaining() < 8 {
                return Ok(i);
            }
            *slot = self.read_byte()?;
        }
        Ok(buf.len())
    }

    pub fn read_i16(&mut self) -> ShengResult<i16> {
        Ok(self.read_bits(16)? as i16)
    }

    pub fn read_u16(&mut self) -> ShengResult<u16> {
        Ok(self.read_bits(16)? as u16)
    }

    pub fn read_i32(&mut self) -> ShengResult<i32> {
        Ok(self.read_bits(32)? as i32)
    }

    pub fn read_u32(&mut self) -> ShengResult<u32> {
        Ok(self.read_bits(32)? as u32)
    }

    pub fn read_i64(&mut self) -> ShengResult<i64> {
        Ok(self.read_bits(64)? as i64)
    }

    pub fn read_u64(&mut self) -> ShengResult<u64> {
        self.read_bits(64)
    }

    pub fn skip_bytes(&mut self, count: usize) {
        self.skip_bits(count * 8);
    }

    /// 回到包首, 清除 short 标志
    pub fn reset(&mut self) {
        self.bit_pos = 0;
        self.flags.remove(PacketFlags::SHORT);
    }

    /// 解码器用完此包, 释放负载
    pub fn done(&mut self) {
        self.data = Bytes::new();
        self.bit_pos = 0;
    }

    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub fn set_flag(&mut self, flag: PacketFlags, value: bool) {
        self.flags.set(flag, value);
    }

    pub fn is_short(&self) -> bool {
        self.flags.contains(PacketFlags::SHORT)
    }

    pub fn is_resync(&self) -> bool {
        self.flags.contains(PacketFlags::RESYNC)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(PacketFlags::END_OF_STREAM)
    }

    pub fn is_parameter_change(&self) -> bool {
        self.flags.contains(PacketFlags::PARAMETER_CHANGE)
    }

    /// 包在所属逻辑流中的序号
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    /// 本包最后一个采样的粒度位置
    pub fn granule_position(&self) -> i64 {
        self.granule_position
    }

    pub fn set_granule_position(&mut self, granule: i64) {
        self.granule_position = granule;
    }

    /// 所在 (最后一个) 页面的粒度位置
    pub fn page_granule_position(&self) -> i64 {
        self.page_granule_position
    }

    pub fn set_page_granule_position(&mut self, granule: i64) {
        self.page_granule_position = granule;
    }

    pub fn page_sequence_number(&self) -> u32 {
        self.page_sequence_number
    }

    pub fn set_page_sequence_number(&mut self, sequence: u32) {
        self.page_sequence_number = sequence;
    }

    /// 本包产出的采样数, 未知时为 `None`
    pub fn granule_count(&self) -> Option<u32> {
        self.flags
            .contains(PacketFlags::HAS_GRANULE_COUNT)
            .then_some(self.granule_count)
    }

    pub fn set_granule_count(&mut self, count: Option<u32>) {
        match count {
            Some(count) => {
                self.granule_count = count;
                self.flags.insert(PacketFlags::HAS_GRANULE_COUNT);
            }
            None => self.flags.remove(PacketFlags::HAS_GRANULE_COUNT),
        }
    }
}
