//! 单元测试共用的内存包源与包构造.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sheng_core::bitwriter::BitWriter;
use sheng_core::{DataPacket, PacketLengthFn, PacketProvider, ShengError, ShengResult};

use crate::headers::tests::{comment_packet, ident_packet};
use crate::setup::tests::minimal_setup;

/// 按顺序交出预先构造的包; 默认不支持随机访问
pub(crate) struct MemoryProvider {
    packets: Vec<DataPacket>,
    cursor: usize,
    granules: Arc<Mutex<HashMap<usize, i64>>>,
    /// 可查找时的总粒度与 `find_packet` 固定返回的包序号
    seek: Option<(i64, usize)>,
    seeks: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl MemoryProvider {
    pub(crate) fn new(packets: Vec<DataPacket>) -> Self {
        Self {
            packets,
            cursor: 0,
            granules: Arc::default(),
            seek: None,
            seeks: Arc::default(),
        }
    }

    /// 变为可查找: 总长 `total`, 任意查找都定位到包 `target`
    pub(crate) fn seekable(mut self, total: i64, target: usize) -> Self {
        self.seek = Some((total, target));
        self
    }

    /// `seek_to_packet` 收到的 (包序号, 前导包数)
    pub(crate) fn seek_log(&self) -> Arc<Mutex<Vec<(usize, usize)>>> {
        Arc::clone(&self.seeks)
    }

    fn require_seek(&self) -> ShengResult<(i64, usize)> {
        self.seek
            .ok_or_else(|| ShengError::Unsupported("内存包源不支持随机访问".into()))
    }

    /// 解码器回填的粒度位置, 按包序号记录
    pub(crate) fn granule_log(&self) -> Arc<Mutex<HashMap<usize, i64>>> {
        Arc::clone(&self.granules)
    }

    fn packet_at(&self, index: usize) -> Option<DataPacket> {
        self.packets.get(index).map(|packet| {
            let mut packet = packet.clone();
            packet.set_index(index);
            packet
        })
    }
}

impl PacketProvider for MemoryProvider {
    fn stream_serial(&self) -> u32 {
        0x5345
    }

    fn can_seek(&self) -> bool {
        self.seek.is_some()
    }

    fn container_bits(&self) -> u64 {
        0
    }

    fn total_page_count(&mut self) -> ShengResult<usize> {
        Ok(1)
    }

    fn next_packet(&mut self) -> ShengResult<Option<DataPacket>> {
        let packet = self.packet_at(self.cursor);
        if packet.is_some() {
            self.cursor += 1;
        }
        Ok(packet)
    }

    fn peek_next_packet(&mut self) -> ShengResult<Option<DataPacket>> {
        Ok(self.packet_at(self.cursor))
    }

    fn get_packet(&mut self, index: usize) -> ShengResult<DataPacket> {
        self.require_seek()?;
        self.packet_at(index)
            .ok_or_else(|| ShengError::InvalidArgument(format!("包序号 {} 越界", index)))
    }

    fn granule_count(&mut self) -> ShengResult<i64> {
        Ok(self.require_seek()?.0)
    }

    fn find_packet(
        &mut self,
        _granule: i64,
        _packet_length: &mut PacketLengthFn<'_>,
    ) -> ShengResult<Option<DataPacket>> {
        let (_, target) = self.require_seek()?;
        Ok(self.packet_at(target))
    }

    fn seek_to_packet(&mut self, packet: &DataPacket, preroll: usize) -> ShengResult<()> {
        self.require_seek()?;
        if let Ok(mut log) = self.seeks.lock() {
            log.push((packet.index(), preroll));
        }
        self.cursor = packet.index().saturating_sub(preroll);
        Ok(())
    }

    fn packet_done(&mut self, _packet: &DataPacket) -> ShengResult<()> {
        Ok(())
    }

    fn set_granule_position(&mut self, index: usize, granule: i64) -> ShengResult<()> {
        if let Ok(mut log) = self.granules.lock() {
            log.insert(index, granule);
        }
        Ok(())
    }
}

/// 三个头包, 块长 256/2048, 使用最小 setup
pub(crate) fn header_packets(channels: u8, sample_rate: u32) -> Vec<DataPacket> {
    vec![
        DataPacket::new(ident_packet(channels, sample_rate, (8, 11))),
        DataPacket::new(comment_packet("sheng-test", &[])),
        DataPacket::new(minimal_setup()),
    ]
}

/// 最小 setup 下的无能量音频包
pub(crate) fn audio_packet(long: bool, prev_long: bool, next_long: bool) -> DataPacket {
    let mut bw = BitWriter::new();
    bw.write_bit(false);
    bw.write_bit(long);
    if long {
        bw.write_bit(prev_long);
        bw.write_bit(next_long);
    }
    // floor1 nonzero 标志
    bw.write_bit(false);
    DataPacket::new(bw.finish())
}
