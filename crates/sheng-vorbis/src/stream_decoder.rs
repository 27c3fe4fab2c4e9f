//! Vorbis 逻辑流解码器.
//!
//! 从 [`PacketProvider`] 拉取数据包: 先解析 identification / comment / setup
//! 三个头包, 之后每个音频包依次经过 floor 解包、耦合能量传播、残差解码、
//! 反耦合、floor 合成、逆 MDCT 与加窗重叠相加, 输出交织的 `f32` PCM.
//!
//! 状态转换:
//! - 重同步包: 丢弃重叠状态, 位置在下一个已知粒度的包处回填
//! - 参数变化包: 重新解析出现的头包, identification 头出现时完全重置
//! - 查找: 定位目标包, 前导一个包后解码并丢弃到精确位置

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, trace};
use sheng_core::{DataPacket, PacketProvider, ShengError, ShengResult};

use crate::floor::FloorData;
use crate::headers::{CommentHeader, IdentHeader};
use crate::issue::{DecodeIssue, SkipReason};
use crate::mapping::inverse_coupling;
use crate::mdct::MdctScratch;
use crate::ring_buffer::{OverlapSpan, RingBuffer};
use crate::setup::SetupHeader;
use crate::stats::{BitCounters, BitrateWindow, StreamStats};

/// 查找时每次解码丢弃的最大帧数
const SEEK_CHUNK_FRAMES: usize = 4096;

/// 一个已解包音频包的块信息
#[derive(Debug, Clone, Copy)]
struct BlockInfo {
    mode: usize,
    prev_long: bool,
    next_long: bool,
}

/// 重同步后等待回填粒度位置的包
#[derive(Debug, Clone, Copy)]
struct PendingGranule {
    index: usize,
    samples: usize,
}

/// 按首次出现的顺序记录页面序号
#[derive(Debug, Default)]
struct PageTracker {
    order: HashMap<u32, usize>,
    last: Option<u32>,
}

impl PageTracker {
    fn note(&mut self, sequence: u32) {
        let next = self.order.len();
        self.order.entry(sequence).or_insert(next);
        self.last = Some(sequence);
    }

    fn pages_read(&self) -> usize {
        self.last
            .and_then(|seq| self.order.get(&seq))
            .map_or(0, |&order| order + 1)
    }
}

/// 单个 Vorbis 逻辑流的解码器
pub struct VorbisStreamDecoder {
    provider: Box<dyn PacketProvider>,
    ident: IdentHeader,
    comments: CommentHeader,
    setup: SetupHeader,
    /// 第一个音频包的序号
    first_audio_index: usize,

    floor_data: Vec<FloorData>,
    no_execute: Vec<bool>,
    residue: Vec<Vec<f32>>,
    mdct: MdctScratch,
    output: RingBuffer,
    /// 重置前已解出但尚未读取的样本
    prev_buffer: Option<Vec<f32>>,
    /// 环形缓冲区中可以输出的帧数
    prepared: usize,
    /// 重置后还没有可重叠的前一个块
    primed: bool,

    current_position: i64,
    reported_position: i64,
    resyncing: bool,
    resync_queue: Vec<PendingGranule>,
    eos_found: bool,
    parameter_change: bool,

    bits: BitCounters,
    bitrate_window: BitrateWindow,
    packets_decoded: u64,
    samples_decoded: u64,
    decode_time: Duration,
    pages: PageTracker,
    clipped: bool,
}

impl VorbisStreamDecoder {
    /// 解析三个头包并创建解码器.
    ///
    /// 第一个包不是 Vorbis identification 头时返回 `None` (不是 Vorbis 流);
    /// 后续头包缺失或损坏时返回错误.
    pub fn try_new(mut provider: Box<dyn PacketProvider>) -> ShengResult<Option<Self>> {
        let mut bits = BitCounters::default();
        let mut pages = PageTracker::default();

        let Some(mut packet) = provider.peek_next_packet()? else {
            return Ok(None);
        };
        let Some(ident) = IdentHeader::read(&mut packet, &mut bits)? else {
            return Ok(None);
        };
        let mut packet = next_header_packet(provider.as_mut(), &mut pages, "identification")?;
        finish_packet(provider.as_mut(), &mut packet)?;

        let mut packet = next_header_packet(provider.as_mut(), &mut pages, "comment")?;
        let comments = CommentHeader::read(&mut packet, &mut bits)?
            .ok_or_else(|| ShengError::InvalidData("Vorbis comment 头包不可读".into()))?;
        finish_packet(provider.as_mut(), &mut packet)?;

        let mut packet = next_header_packet(provider.as_mut(), &mut pages, "setup")?;
        let setup = SetupHeader::read(&mut packet, &ident, &mut bits)?
            .ok_or_else(|| ShengError::InvalidData("Vorbis setup 头包不可读".into()))?;
        let first_audio_index = packet.index() + 1;
        finish_packet(provider.as_mut(), &mut packet)?;

        debug!(
            "Vorbis 流 {}: {} 声道, {} Hz, 块长 {:?}, vendor={:?}",
            provider.stream_serial(),
            ident.channels,
            ident.sample_rate,
            ident.block_sizes,
            comments.vendor,
        );

        let channels = ident.channels;
        let long_block = ident.block_sizes[1];
        Ok(Some(Self {
            provider,
            ident,
            comments,
            setup,
            first_audio_index,
            floor_data: vec![FloorData::new(); channels],
            no_execute: vec![false; channels],
            residue: vec![vec![0.0; long_block]; channels],
            mdct: MdctScratch::new(),
            output: RingBuffer::new(channels, long_block * 2 * channels),
            prev_buffer: None,
            prepared: 0,
            primed: false,
            current_position: 0,
            reported_position: 0,
            resyncing: false,
            resync_queue: Vec::new(),
            eos_found: false,
            parameter_change: false,
            bits,
            bitrate_window: BitrateWindow::default(),
            packets_decoded: 0,
            samples_decoded: 0,
            decode_time: Duration::ZERO,
            pages,
            clipped: false,
        }))
    }

    pub fn ident(&self) -> &IdentHeader {
        &self.ident
    }

    pub fn comments(&self) -> &CommentHeader {
        &self.comments
    }

    pub fn channels(&self) -> usize {
        self.ident.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.ident.sample_rate
    }

    pub fn stream_serial(&self) -> u32 {
        self.provider.stream_serial()
    }

    pub fn can_seek(&self) -> bool {
        self.provider.can_seek()
    }

    pub fn container_bits(&self) -> u64 {
        self.provider.container_bits()
    }

    /// 已交给调用方的最后一个采样之后的粒度位置
    pub fn position(&self) -> i64 {
        self.reported_position
    }

    /// 流的总采样数, 只有可随机访问的流才能得到
    pub fn total_samples(&mut self) -> ShengResult<Option<i64>> {
        if !self.provider.can_seek() {
            return Ok(None);
        }
        self.provider.granule_count().map(Some)
    }

    pub fn is_parameter_change(&self) -> bool {
        self.parameter_change
    }

    /// 调用方读取新参数后清除参数变化标志
    pub fn clear_parameter_change(&mut self) {
        self.parameter_change = false;
    }

    /// 是否还有重置前保存的样本未交出
    pub fn has_pending_samples(&self) -> bool {
        self.prev_buffer.is_some()
    }

    pub(crate) fn clipped_flag(&mut self) -> &mut bool {
        &mut self.clipped
    }

    /// 读取交织 PCM 到 `buffer`, 返回写入的样本数.
    ///
    /// 读取长度按声道数向下取整. 返回值小于请求长度表示流结束,
    /// 或者解码器在中途重置 (重同步/参数变化) 并先交出了重置前的样本.
    pub fn read_samples(&mut self, buffer: &mut [f32]) -> ShengResult<usize> {
        let channels = self.ident.channels;
        let mut written = 0;

        if let Some(prev) = self.prev_buffer.take() {
            written = self.drain_prev_buffer(prev, buffer);
        } else if self.parameter_change {
            return Err(ShengError::InvalidState(
                "Vorbis 流参数已变化, 读取新参数并清除标志后才能继续".into(),
            ));
        }

        let wanted = (buffer.len() - written) / channels * channels;
        let long_block = self.ident.block_sizes[1];
        self.output.ensure_size(wanted + long_block * channels);

        while self.prepared * channels < wanted && !self.eos_found && !self.parameter_change {
            self.decode_next_packet()?;

            if let Some(prev) = self.prev_buffer.take() {
                // 解码途中发生重置, 先交出重置前的样本
                let count = self.drain_prev_buffer(prev, &mut buffer[written..written + wanted]);
                self.reported_position = self.current_position - self.prepared as i64;
                return Ok(written + count);
            }
        }

        let count = wanted.min(self.prepared * channels);
        self.output.copy_to(&mut buffer[written..written + count])?;
        self.prepared -= count / channels;
        self.reported_position = self.current_position - self.prepared as i64;
        Ok(written + count)
    }

    fn drain_prev_buffer(&mut self, prev: Vec<f32>, buffer: &mut [f32]) -> usize {
        let count = prev.len().min(buffer.len());
        buffer[..count].copy_from_slice(&prev[..count]);
        if count < prev.len() {
            self.prev_buffer = Some(prev[count..].to_vec());
        }
        count
    }

    /// 定位到粒度位置 `granule`, 下一次读取从该采样开始
    pub fn seek_to(&mut self, granule: i64) -> ShengResult<()> {
        if !self.provider.can_seek() {
            return Err(ShengError::Unsupported("Vorbis 流不支持随机访问".into()));
        }
        if granule < 0 {
            return Err(ShengError::InvalidArgument(format!(
                "查找位置不能为负: {}",
                granule,
            )));
        }

        let total = self.provider.granule_count()?;
        if granule >= total {
            // 流末尾及之后: 不再输出样本
            trace!("Vorbis 查找 {}: 超出流末尾 {}", granule, total);
            self.set_position(total)?;
            self.eos_found = true;
            return Ok(());
        }

        let start = if granule > 0 {
            let setup = &self.setup;
            let mut length =
                |current: &mut DataPacket, previous: &mut DataPacket| packet_length(setup, current, previous);
            let target = self.provider.find_packet(granule, &mut length)?.ok_or_else(|| {
                ShengError::InvalidArgument(format!("粒度位置 {} 超出流范围", granule))
            })?;
            if target.index() > self.first_audio_index {
                // 前导一个包, 目标包才能与它重叠出完整的样本
                self.provider.seek_to_packet(&target, 1)?;
                let preroll = self.provider.peek_next_packet()?.ok_or_else(|| {
                    ShengError::Internal("查找后没有前导包".into())
                })?;
                if preroll.granule_position() >= 0 {
                    preroll.granule_position()
                } else {
                    target.granule_position() - i64::from(target.granule_count().unwrap_or(0))
                }
            } else {
                // 第一个音频包之前只有头包, 不能作为前导
                self.provider.seek_to_packet(&target, 0)?;
                0
            }
        } else {
            let first = self.provider.get_packet(self.first_audio_index)?;
            self.provider.seek_to_packet(&first, 0)?;
            0
        };

        trace!("Vorbis 查找 {}: 从粒度 {} 开始丢弃", granule, start);
        self.set_position(start)?;

        let channels = self.ident.channels;
        let mut remaining = (granule - start).max(0) as usize * channels;
        let mut scratch = vec![0f32; remaining.min(SEEK_CHUNK_FRAMES * channels)];
        while remaining > 0 {
            let chunk = remaining.min(scratch.len());
            let read = self.read_samples(&mut scratch[..chunk])?;
            if read == 0 {
                break;
            }
            remaining -= read;
        }
        Ok(())
    }

    fn set_position(&mut self, position: i64) -> ShengResult<()> {
        self.current_position = position;
        self.reported_position = position;
        self.prepared = 0;
        self.eos_found = false;
        self.resyncing = false;
        self.resync_queue.clear();
        self.reset_decoder(false)?;
        self.prev_buffer = None;
        Ok(())
    }

    /// 当前统计快照; 可随机访问的流会读完整个流以得到总页数
    pub fn stats(&mut self) -> ShengResult<StreamStats> {
        let total_pages = if self.provider.can_seek() {
            Some(self.provider.total_page_count()?)
        } else {
            None
        };
        let container_bits = self.provider.container_bits();
        let audio_bits = self.bits.audio_bits();

        let decoded = self.current_position - self.prepared as i64;
        let effective_bitrate = if self.samples_decoded == 0 || decoded <= 0 {
            0
        } else {
            let seconds = decoded as f64 / f64::from(self.ident.sample_rate);
            (audio_bits as f64 / seconds) as u64
        };

        Ok(StreamStats {
            effective_bitrate,
            instant_bitrate: self.bitrate_window.bitrate(self.ident.sample_rate),
            container_bits,
            overhead_bits: self.bits.overhead_bits() + container_bits,
            audio_bits,
            pages_read: self.pages.pages_read(),
            total_pages,
            packets_decoded: self.packets_decoded,
            samples_decoded: self.samples_decoded,
            clipped: self.clipped,
            decode_time: self.decode_time,
        })
    }

    /// 清零音频相关统计, 头包与容器计数保留
    pub fn reset_stats(&mut self) {
        self.clipped = false;
        self.packets_decoded = 0;
        self.samples_decoded = 0;
        self.decode_time = Duration::ZERO;
        self.bits.reset_audio();
        self.bitrate_window.clear();
    }

    fn decode_next_packet(&mut self) -> ShengResult<()> {
        let started = Instant::now();
        let result = self.decode_next_packet_inner();
        self.decode_time += started.elapsed();
        result
    }

    fn decode_next_packet_inner(&mut self) -> ShengResult<()> {
        let Some(mut packet) = self.provider.next_packet()? else {
            self.eos_found = true;
            return Ok(());
        };
        self.pages.note(packet.page_sequence_number());

        if packet.is_resync() {
            self.reset_decoder(false)?;
        }

        if packet.is_parameter_change() {
            self.parameter_change = true;
            return self.process_parameter_change(packet);
        }

        let block = match self.unpack_packet(&mut packet) {
            Ok(block) => block,
            Err(DecodeIssue::SkipPacket(reason)) => {
                debug!(
                    "Vorbis 流 {} 丢弃包 {}: {}",
                    self.provider.stream_serial(),
                    packet.index(),
                    reason,
                );
                self.bits.waste += packet.len() as u64 * 8;
                packet.done();
                return self.provider.packet_done(&packet);
            }
            Err(DecodeIssue::Fatal(err)) => return Err(err),
        };
        let packet_bits = packet.bits_read();
        packet.done();

        self.decode_packet(block);
        let was_primed = self.primed;
        let samples = self.overlap_samples(block);
        // 重置后的第一个块没有重叠输出, 不代表包的真实长度
        if was_primed && packet.granule_count().is_none() {
            packet.set_granule_count(Some(samples as u32));
        }

        self.update_position(samples, &mut packet)?;
        self.packets_decoded += 1;
        self.bitrate_window
            .push(packet_bits, samples, self.ident.sample_rate);
        self.provider.packet_done(&packet)
    }

    /// 读取 mode、floor 与残差; 只有这一步会消费包的比特
    fn unpack_packet(&mut self, packet: &mut DataPacket) -> Result<BlockInfo, DecodeIssue> {
        if packet.read_bit()? {
            return Err(SkipReason::NotAudio.into());
        }

        let setup = &self.setup;
        let mut mode_bits = setup.mode_field_bits as u64;
        let mode_index = packet.read_bits(setup.mode_field_bits)? as usize;
        let mode = setup
            .modes
            .get(mode_index)
            .ok_or(SkipReason::InvalidMode(mode_index))?;
        let (prev_long, next_long) = if mode.block_flag() {
            mode_bits += 2;
            (packet.read_bit()?, packet.read_bit()?)
        } else {
            (false, false)
        };
        if packet.is_short() {
            return Err(SkipReason::Truncated.into());
        }

        let block_size = mode.block_size();
        let half = block_size / 2;
        let mapping = &setup.mappings[mode.mapping()];

        let start = packet.bits_read();
        for ch in 0..self.ident.channels {
            let floor = &setup.floors[mapping.channel_submap(ch).floor];
            floor.unpack(packet, &setup.books, block_size, &mut self.floor_data[ch]);
            self.residue[ch][..half].fill(0.0);
        }

        // 耦合对中任一声道有能量, 两个声道都要解码残差
        for step in mapping.coupling() {
            if self.floor_data[step.angle].execute_channel()
                || self.floor_data[step.magnitude].execute_channel()
            {
                self.floor_data[step.angle].set_force_energy(true);
                self.floor_data[step.magnitude].set_force_energy(true);
            }
        }
        for (flag, data) in self.no_execute.iter_mut().zip(&self.floor_data) {
            *flag = !data.execute_channel();
        }
        let floor_bits = packet.bits_read() - start;

        let start = packet.bits_read();
        for (index, submap) in mapping.submaps().iter().enumerate() {
            setup.residues[submap.residue].decode(
                packet,
                &setup.books,
                block_size,
                mapping.submap_channels(index),
                &self.no_execute,
                &mut self.residue,
            );
        }

        self.bits.glue += 1;
        self.bits.mode += mode_bits;
        self.bits.floor += floor_bits as u64;
        self.bits.residue += (packet.bits_read() - start) as u64;
        self.bits.waste += packet.bits_remaining() as u64;

        Ok(BlockInfo {
            mode: mode_index,
            prev_long,
            next_long,
        })
    }

    /// 反耦合、floor 合成与逆 MDCT
    fn decode_packet(&mut self, block: BlockInfo) {
        let mode = &self.setup.modes[block.mode];
        let mapping = &self.setup.mappings[mode.mapping()];
        let block_size = mode.block_size();
        let half = block_size / 2;

        for step in mapping.coupling().iter().rev() {
            if self.floor_data[step.angle].execute_channel()
                || self.floor_data[step.magnitude].execute_channel()
            {
                let (magnitude, angle) = pair_mut(&mut self.residue, step.magnitude, step.angle);
                inverse_coupling(magnitude, angle, half);
            }
        }

        for (ch, residue) in self.residue.iter_mut().enumerate() {
            let data = &mut self.floor_data[ch];
            if data.execute_channel() {
                let floor = &self.setup.floors[mapping.channel_submap(ch).floor];
                floor.apply(data, residue);
                self.mdct.reverse(&mut residue[..block_size], block_size);
            } else {
                // 未做 MDCT 时后半块仍是上一个包的数据
                residue[half..block_size].fill(0.0);
            }
        }
    }

    /// 加窗写入环形缓冲区, 返回新增的可输出帧数
    fn overlap_samples(&mut self, block: BlockInfo) -> usize {
        let mode = &self.setup.modes[block.mode];
        let window = mode.window(block.prev_long, block.next_long);
        let [short_block, long_block] = self.ident.block_sizes;
        let n = mode.block_size();

        let mut span = OverlapSpan {
            left: 0,
            center: n / 2,
            right: n,
        };
        let mut begin = -((n / 2) as isize);
        let mut end = n / 2;
        if mode.block_flag() {
            if !block.prev_long {
                span.left = long_block / 4 - short_block / 4;
                span.center = span.left + short_block / 2;
                begin = -((short_block / 2) as isize) - span.left as isize;
            }
            if !block.next_long {
                span.right -= n / 4 - short_block / 4;
                end = n / 4 + short_block / 4;
            }
        }

        let frame = self.output.frames() as isize + begin;
        for (ch, pcm) in self.residue.iter().enumerate() {
            self.output.write(ch, frame, span, pcm, window);
        }
        self.primed = true;

        let prepared = self.output.frames().saturating_sub(end);
        let decoded = prepared.saturating_sub(self.prepared);
        self.prepared = prepared;
        decoded
    }

    fn update_position(&mut self, samples: usize, packet: &mut DataPacket) -> ShengResult<()> {
        self.samples_decoded += samples as u64;
        self.current_position += samples as i64;

        if packet.is_resync() {
            self.resyncing = true;
            self.resync_queue.clear();
        }
        if self.resyncing {
            // 位置未知, 等到页面上最后一个包 (粒度已知) 再统一回填
            self.resync_queue.push(PendingGranule {
                index: packet.index(),
                samples,
            });
            let anchor = packet.granule_position();
            if anchor >= 0 {
                self.finish_resync(anchor)?;
            }
            return Ok(());
        }

        packet.set_granule_position(self.current_position);
        let page_granule = packet.page_granule_position();
        if packet.is_end_of_stream() && page_granule >= 0 && self.current_position > page_granule {
            // 最后一页的粒度位置截断末尾多余的采样
            let excess = (self.current_position - page_granule) as usize;
            self.prepared = self.prepared.saturating_sub(excess);
            self.current_position = page_granule;
            packet.set_granule_position(page_granule);
        }
        Ok(())
    }

    fn finish_resync(&mut self, anchor: i64) -> ShengResult<()> {
        let mut end = anchor;
        while let Some(pending) = self.resync_queue.pop() {
            self.provider.set_granule_position(pending.index, end)?;
            end -= pending.samples as i64;
        }
        debug!(
            "Vorbis 流 {} 重同步完成, 位置 {} -> {}",
            self.provider.stream_serial(),
            self.current_position,
            anchor,
        );
        self.current_position = anchor;
        self.resyncing = false;
        Ok(())
    }

    /// 流内出现新的头包: 重新解析, identification 头出现时完全重置
    fn process_parameter_change(&mut self, packet: DataPacket) -> ShengResult<()> {
        // 旧参数下已解出的样本按旧声道数保存
        if self.prepared > 0 {
            self.save_buffer()?;
        }

        let mut candidate = packet;
        let mut consumed = true;

        candidate.reset();
        let ident = IdentHeader::read(&mut candidate, &mut self.bits)?;
        if ident.is_some() {
            candidate = self.next_header_candidate(candidate, consumed)?;
            consumed = false;
        }

        candidate.reset();
        if let Some(comments) = CommentHeader::read(&mut candidate, &mut self.bits)? {
            self.comments = comments;
            candidate = self.next_header_candidate(candidate, consumed)?;
            consumed = false;
        }

        candidate.reset();
        let ident_ref = ident.as_ref().unwrap_or(&self.ident);
        match SetupHeader::read(&mut candidate, ident_ref, &mut self.bits)? {
            Some(setup) => {
                self.setup = setup;
                self.finish_header(candidate, consumed)?;
            }
            None if ident.is_some() => {
                return Err(ShengError::InvalidData(
                    "Vorbis 参数变化缺少 setup 头包".into(),
                ));
            }
            None if consumed => {
                self.bits.waste += candidate.len() as u64 * 8;
                candidate.done();
                self.provider.packet_done(&candidate)?;
            }
            None => {}
        }

        let full_reset = match ident {
            Some(ident) => {
                debug!(
                    "Vorbis 流 {} 参数变化: {} 声道 {} Hz -> {} 声道 {} Hz",
                    self.provider.stream_serial(),
                    self.ident.channels,
                    self.ident.sample_rate,
                    ident.channels,
                    ident.sample_rate,
                );
                self.ident = ident;
                true
            }
            None => false,
        };
        self.reset_decoder(full_reset)
    }

    fn next_header_candidate(&mut self, packet: DataPacket, consumed: bool) -> ShengResult<DataPacket> {
        self.finish_header(packet, consumed)?;
        self.provider
            .peek_next_packet()?
            .ok_or_else(|| ShengError::InvalidData("Vorbis 参数变化后头包不完整".into()))
    }

    fn finish_header(&mut self, mut packet: DataPacket, consumed: bool) -> ShengResult<()> {
        if !consumed {
            if let Some(next) = self.provider.next_packet()? {
                packet = next;
            }
        }
        self.pages.note(packet.page_sequence_number());
        finish_packet(self.provider.as_mut(), &mut packet)
    }

    fn reset_decoder(&mut self, full: bool) -> ShengResult<()> {
        if self.prepared > 0 {
            self.save_buffer()?;
        }
        if full {
            let channels = self.ident.channels;
            let long_block = self.ident.block_sizes[1];
            self.floor_data = vec![FloorData::new(); channels];
            self.no_execute = vec![false; channels];
            self.residue = vec![vec![0.0; long_block]; channels];
            self.output = RingBuffer::new(channels, long_block * 2 * channels);
            self.current_position = 0;
            self.reported_position = 0;
        } else {
            self.output.clear();
        }
        self.prepared = 0;
        self.primed = false;
        Ok(())
    }

    /// 把可输出的样本移到 `prev_buffer`, 之后环形缓冲区可以清空
    fn save_buffer(&mut self) -> ShengResult<()> {
        let mut saved = vec![0f32; self.prepared * self.ident.channels];
        self.output.copy_to(&mut saved)?;
        self.prepared = 0;
        match &mut self.prev_buffer {
            Some(prev) => prev.extend_from_slice(&saved),
            None => self.prev_buffer = Some(saved),
        }
        Ok(())
    }
}

fn next_header_packet(
    provider: &mut dyn PacketProvider,
    pages: &mut PageTracker,
    what: &str,
) -> ShengResult<DataPacket> {
    let packet = provider
        .next_packet()?
        .ok_or_else(|| ShengError::InvalidData(format!("Vorbis 缺少 {} 头包", what)))?;
    pages.note(packet.page_sequence_number());
    Ok(packet)
}

fn finish_packet(provider: &mut dyn PacketProvider, packet: &mut DataPacket) -> ShengResult<()> {
    packet.done();
    provider.packet_done(packet)
}

/// 两个相邻音频包之间产出的采样数, 查找时由容器回调
fn packet_length(setup: &SetupHeader, current: &mut DataPacket, previous: &mut DataPacket) -> i64 {
    if current.is_resync() {
        return 0;
    }
    let block_size = |packet: &mut DataPacket| -> Option<usize> {
        packet.reset();
        if packet.read_bit().ok()? {
            return None;
        }
        let mode = packet.read_bits(setup.mode_field_bits).ok()? as usize;
        setup.modes.get(mode).map(|mode| mode.block_size())
    };
    match (block_size(current), block_size(previous)) {
        (Some(cur), Some(prev)) => (cur / 4 + prev / 4) as i64,
        _ => 0,
    }
}

fn pair_mut(buffers: &mut [Vec<f32>], a: usize, b: usize) -> (&mut [f32], &mut [f32]) {
    if a < b {
        let (head, tail) = buffers.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    } else {
        let (head, tail) = buffers.split_at_mut(a);
        (&mut tail[0], &mut head[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryProvider, audio_packet, header_packets};
    use sheng_core::PacketFlags;
    use std::sync::{Arc, Mutex};

    fn decoder(packets: Vec<DataPacket>) -> VorbisStreamDecoder {
        decoder_from(MemoryProvider::new(packets))
    }

    fn read_all(decoder: &mut VorbisStreamDecoder) -> Vec<f32> {
        let mut out = Vec::new();
        let mut buf = vec![0f32; 1000];
        loop {
            let n = decoder.read_samples(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    #[test]
    fn test_非vorbis流返回none() {
        let provider = MemoryProvider::new(vec![DataPacket::new(b"OpusHead\x01\x02".to_vec())]);
        assert!(VorbisStreamDecoder::try_new(Box::new(provider)).unwrap().is_none());
    }

    #[test]
    fn test_缺少setup头报错() {
        let mut packets = header_packets(1, 8000);
        packets.pop();
        assert!(VorbisStreamDecoder::try_new(Box::new(MemoryProvider::new(packets))).is_err());
    }

    #[test]
    fn test_头包信息() {
        let dec = decoder(header_packets(2, 22050));
        assert_eq!(dec.channels(), 2);
        assert_eq!(dec.sample_rate(), 22050);
        assert_eq!(dec.comments().vendor, "sheng-test");
        assert_eq!(dec.ident().block_sizes, [256, 2048]);
    }

    #[test]
    fn test_短块采样数() {
        let mut packets = header_packets(1, 8000);
        for _ in 0..5 {
            packets.push(audio_packet(false, false, false));
        }
        let mut dec = decoder(packets);
        let pcm = read_all(&mut dec);
        // 第一个块没有输出, 之后每个短块输出 256/4 + 256/4
        assert_eq!(pcm.len(), 4 * 128);
        assert!(pcm.iter().all(|&s| s == 0.0), "无能量的块应输出静音");
        assert_eq!(dec.position(), 512);
    }

    #[test]
    fn test_长短块切换采样数() {
        let mut packets = header_packets(1, 8000);
        packets.push(audio_packet(false, false, false));
        packets.push(audio_packet(true, false, false));
        packets.push(audio_packet(false, false, false));
        let mut dec = decoder(packets);
        let pcm = read_all(&mut dec);
        assert_eq!(pcm.len(), 2 * (64 + 512));
    }

    #[test]
    fn test_流末尾按页粒度截断() {
        let mut packets = header_packets(1, 8000);
        for _ in 0..5 {
            packets.push(audio_packet(false, false, false));
        }
        let last = packets.last_mut().unwrap();
        last.set_flag(PacketFlags::END_OF_STREAM, true);
        last.set_page_granule_position(500);
        let mut dec = decoder(packets);
        assert_eq!(read_all(&mut dec).len(), 500);
        assert_eq!(dec.position(), 500);
    }

    #[test]
    fn test_跳过非音频包() {
        let mut packets = header_packets(1, 8000);
        packets.push(audio_packet(false, false, false));
        packets.push(DataPacket::new(vec![0x01, 0xFF]));
        packets.push(audio_packet(false, false, false));
        packets.push(audio_packet(false, false, false));
        let mut dec = decoder(packets);
        assert_eq!(read_all(&mut dec).len(), 2 * 128);
        let stats = dec.stats().unwrap();
        assert_eq!(stats.packets_decoded, 3);
        assert!(stats.overhead_bits >= 16, "丢弃的包应计入开销");
    }

    #[test]
    fn test_截断包被丢弃() {
        let mut packets = header_packets(1, 8000);
        packets.push(audio_packet(false, false, false));
        // 空包在 mode 字段处截断
        packets.push(DataPacket::new(Vec::<u8>::new()));
        packets.push(audio_packet(false, false, false));
        let mut dec = decoder(packets);
        assert_eq!(read_all(&mut dec).len(), 128);
    }

    #[test]
    fn test_参数变化() {
        let mut packets = header_packets(1, 8000);
        for _ in 0..3 {
            packets.push(audio_packet(false, false, false));
        }
        let mut second = header_packets(2, 16000);
        second[0].set_flag(PacketFlags::PARAMETER_CHANGE, true);
        packets.extend(second);
        for _ in 0..3 {
            packets.push(audio_packet(false, false, false));
        }
        let mut dec = decoder(packets);

        let mut buf = vec![0f32; 4096];
        // 参数变化前的样本先交出
        assert_eq!(dec.read_samples(&mut buf).unwrap(), 256);
        assert!(dec.is_parameter_change());
        assert!(dec.read_samples(&mut buf).is_err(), "未清除参数变化时读取应报错");

        dec.clear_parameter_change();
        assert_eq!(dec.channels(), 2);
        assert_eq!(dec.sample_rate(), 16000);
        assert_eq!(dec.read_samples(&mut buf).unwrap(), 2 * 256);
    }

    #[test]
    fn test_重同步回填粒度() {
        let mut packets = header_packets(1, 8000);
        for _ in 0..3 {
            packets.push(audio_packet(false, false, false));
        }
        // 缺口之后的三个包, 第三个是页面上最后一个包
        let mut after = vec![
            audio_packet(false, false, false),
            audio_packet(false, false, false),
            audio_packet(false, false, false),
        ];
        after[0].set_flag(PacketFlags::RESYNC, true);
        after[2].set_granule_position(5000);
        packets.extend(after);

        let provider = MemoryProvider::new(packets);
        let granules = provider.granule_log();
        let mut dec = VorbisStreamDecoder::try_new(Box::new(provider)).unwrap().unwrap();
        read_all(&mut dec);

        let log = granules.lock().unwrap();
        // 从锚点往前逐包减去各自的采样数, 重同步包本身没有输出
        assert_eq!(log.get(&8), Some(&5000));
        assert_eq!(log.get(&7), Some(&4872));
        assert_eq!(log.get(&6), Some(&4744));
        assert_eq!(dec.position(), 5000);
    }

    #[test]
    fn test_不可查找的流() {
        let mut dec = decoder(header_packets(1, 8000));
        assert!(dec.seek_to(100).is_err());
        assert_eq!(dec.total_samples().unwrap(), None);
    }

    fn seekable_decoder(audio_packets: usize) -> (VorbisStreamDecoder, Arc<Mutex<Vec<(usize, usize)>>>) {
        let mut packets = header_packets(1, 8000);
        for _ in 0..audio_packets {
            packets.push(audio_packet(false, false, false));
        }
        let total = (audio_packets as i64 - 1) * 128;
        let provider = MemoryProvider::new(packets).seekable(total, 3);
        let seeks = provider.seek_log();
        (decoder_from(provider), seeks)
    }

    fn decoder_from(provider: MemoryProvider) -> VorbisStreamDecoder {
        VorbisStreamDecoder::try_new(Box::new(provider))
            .unwrap()
            .expect("应识别为 Vorbis 流")
    }

    #[test]
    fn test_第一个音频包不带前导() {
        let (mut dec, seeks) = seekable_decoder(6);
        dec.seek_to(1).unwrap();
        assert_eq!(seeks.lock().unwrap().as_slice(), &[(3, 0)], "头包不能作为前导包");
        assert_eq!(dec.position(), 1);
        assert_eq!(read_all(&mut dec).len(), 639);
        assert_eq!(dec.position(), 640);
    }

    #[test]
    fn test_查找到流末尾之后() {
        let (mut dec, _) = seekable_decoder(6);
        for target in [640, 10_000] {
            dec.seek_to(target).unwrap();
            assert_eq!(dec.position(), 640);
            let mut buf = vec![0f32; 256];
            assert_eq!(dec.read_samples(&mut buf).unwrap(), 0, "末尾之后不再有样本");
        }
        assert!(dec.seek_to(-1).is_err());

        dec.seek_to(0).unwrap();
        assert_eq!(read_all(&mut dec).len(), 640);
    }
}
