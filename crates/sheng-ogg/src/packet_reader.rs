//! 单个逻辑流的数据包来源.

use std::sync::{Arc, Mutex, MutexGuard};

use sheng_core::{DataPacket, PacketLengthFn, PacketProvider, ShengError, ShengResult};

use crate::state::OggState;

/// Ogg 逻辑流的 [`PacketProvider`] 实现
///
/// 多个读取器共享物理流的读取状态, 各自维护包游标.
pub struct OggPacketReader {
    shared: Arc<Mutex<OggState>>,
    serial: u32,
    cursor: usize,
    seekable: bool,
}

impl OggPacketReader {
    pub(crate) fn new(shared: Arc<Mutex<OggState>>, serial: u32, seekable: bool) -> Self {
        Self {
            shared,
            serial,
            cursor: 0,
            seekable,
        }
    }

    fn lock(&self) -> ShengResult<MutexGuard<'_, OggState>> {
        lock_state(&self.shared)
    }

    fn require_seek(&self, operation: &str) -> ShengResult<()> {
        if self.seekable {
            Ok(())
        } else {
            Err(ShengError::Unsupported(format!(
                "顺序来源不支持 {}",
                operation
            )))
        }
    }
}

pub(crate) fn lock_state(shared: &Mutex<OggState>) -> ShengResult<MutexGuard<'_, OggState>> {
    shared
        .lock()
        .map_err(|_| ShengError::Internal("Ogg 读取状态锁已损坏".into()))
}

impl PacketProvider for OggPacketReader {
    fn stream_serial(&self) -> u32 {
        self.serial
    }

    fn can_seek(&self) -> bool {
        self.seekable
    }

    fn container_bits(&self) -> u64 {
        self.lock()
            .ok()
            .and_then(|state| state.stream(self.serial).ok().map(|s| s.container_bits()))
            .unwrap_or(0)
    }

    fn total_page_count(&mut self) -> ShengResult<usize> {
        let mut state = self.lock()?;
        state.read_to_end()?;
        Ok(state.stream(self.serial)?.pages().len())
    }

    fn next_packet(&mut self) -> ShengResult<Option<DataPacket>> {
        let packet = self.lock()?.packet(self.serial, self.cursor)?;
        if packet.is_some() {
            self.cursor += 1;
        }
        Ok(packet)
    }

    fn peek_next_packet(&mut self) -> ShengResult<Option<DataPacket>> {
        self.lock()?.packet(self.serial, self.cursor)
    }

    fn get_packet(&mut self, index: usize) -> ShengResult<DataPacket> {
        self.lock()?
            .packet(self.serial, index)?
            .ok_or_else(|| ShengError::InvalidArgument(format!("包序号 {} 超出流范围", index)))
    }

    fn granule_count(&mut self) -> ShengResult<i64> {
        self.require_seek("读取总长度")?;
        let mut state = self.lock()?;
        state.read_to_end()?;
        Ok(state.stream(self.serial)?.last_granule())
    }

    fn find_packet(
        &mut self,
        granule: i64,
        packet_length: &mut PacketLengthFn<'_>,
    ) -> ShengResult<Option<DataPacket>> {
        self.require_seek("按粒度查找")?;
        self.lock()?.find_packet(self.serial, granule, packet_length)
    }

    fn seek_to_packet(&mut self, packet: &DataPacket, preroll: usize) -> ShengResult<()> {
        self.require_seek("定位")?;
        let count = self.lock()?.stream(self.serial)?.packet_count();
        if packet.index() >= count {
            return Err(ShengError::InvalidArgument(format!(
                "包序号 {} 超出流范围",
                packet.index()
            )));
        }
        self.cursor = packet.index().saturating_sub(preroll);
        Ok(())
    }

    fn packet_done(&mut self, packet: &DataPacket) -> ShengResult<()> {
        self.lock()?.packet_done(self.serial, packet)
    }

    fn set_granule_position(&mut self, index: usize, granule: i64) -> ShengResult<()> {
        self.lock()?.set_granule_position(self.serial, index, granule)
    }
}
