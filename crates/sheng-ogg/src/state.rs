//! 物理流读取状态.
//!
//! 页面按序列号拆分到各逻辑流的包索引中. 每个包记录它在来源中的片段位置,
//! 负载先缓存, 解码器用完后释放; 可随机访问的来源在需要时按位置重新读取.
//! 所有 [`OggPacketReader`](crate::OggPacketReader) 通过 `Arc<Mutex<_>>` 共享同一个状态.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use bytes::{Bytes, BytesMut};
use log::debug;
use sheng_core::{
    DataPacket, PacketFlags, PacketLengthFn, ShengError, ShengResult, UNKNOWN_GRANULE,
};

use crate::page::{OggPage, PageFlags, read_page};
use crate::source::PageSource;

/// 包在来源中的一个片段
#[derive(Debug, Clone, Copy)]
struct PacketPart {
    offset: u64,
    len: usize,
}

#[derive(Debug)]
struct PacketEntry {
    parts: Vec<PacketPart>,
    len: usize,
    cache: Option<Bytes>,
    /// 包结束所在页面在逻辑流页面列表中的序号
    page_index: usize,
    granule_position: i64,
    granule_count: Option<u32>,
    flags: PacketFlags,
}

/// 逻辑流中的一页
#[derive(Debug, Clone, Copy)]
pub(crate) struct PageInfo {
    pub granule: i64,
    pub sequence: u32,
    /// 在本页结束的包: `first_packet..end_packet`
    pub first_packet: usize,
    pub end_packet: usize,
}

/// 跨页未完成的包
#[derive(Debug, Default)]
struct Partial {
    parts: Vec<PacketPart>,
    chunks: Vec<Bytes>,
}

impl Partial {
    fn len(&self) -> usize {
        self.parts.iter().map(|p| p.len).sum()
    }
}

/// 一个逻辑流的包索引
#[derive(Debug)]
pub(crate) struct LogicalStream {
    serial: u32,
    packets: Vec<PacketEntry>,
    pages: Vec<PageInfo>,
    partial: Option<Partial>,
    ended: bool,
    /// EOS 之后是否已读过一页检查同序列号的链式续流
    eos_probed: bool,
    last_sequence: Option<u32>,
    container_bits: u64,
    /// 加到下一个完成的包上的标志
    pending: PacketFlags,
}

impl LogicalStream {
    fn new(serial: u32) -> Self {
        Self {
            serial,
            packets: Vec::new(),
            pages: Vec::new(),
            partial: None,
            ended: false,
            eos_probed: false,
            last_sequence: None,
            container_bits: 0,
            pending: PacketFlags::empty(),
        }
    }

    pub fn pages(&self) -> &[PageInfo] {
        &self.pages
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    pub fn container_bits(&self) -> u64 {
        self.container_bits
    }

    /// 最后一个已知的页面粒度位置
    pub fn last_granule(&self) -> i64 {
        self.pages
            .iter()
            .rev()
            .map(|p| p.granule)
            .find(|&g| g >= 0)
            .unwrap_or(0)
    }

    fn drop_partial(&mut self) -> u64 {
        self.partial.take().map_or(0, |p| p.len() as u64 * 8)
    }

    /// 加入一页, 返回丢弃的位数
    fn add_page(&mut self, page: &OggPage) -> u64 {
        let mut wasted = 0u64;
        let page_index = self.pages.len();
        self.container_bits += page.header_len() as u64 * 8;

        if page.is_bos() && !self.packets.is_empty() {
            // 同一序列号重新开始: 链式流复用序列号
            debug!("逻辑流 {:08x} 出现新的 BOS 页, 参数变化", self.serial);
            wasted += self.drop_partial();
            self.pending |= PacketFlags::PARAMETER_CHANGE;
            self.ended = false;
            self.eos_probed = false;
        } else if let Some(last) = self.last_sequence {
            if page.sequence != last.wrapping_add(1) {
                debug!(
                    "逻辑流 {:08x} 页序号不连续: {} -> {}",
                    self.serial, last, page.sequence,
                );
                wasted += self.drop_partial();
                self.pending |= PacketFlags::RESYNC;
            }
        }
        self.last_sequence = Some(page.sequence);

        let first_packet = self.packets.len();
        let data_offset = page.data_offset();
        for (i, span) in page.packet_spans().into_iter().enumerate() {
            let part = PacketPart {
                offset: data_offset + span.offset as u64,
                len: span.len,
            };
            let chunk = page.data.slice(span.offset..span.offset + span.len);

            let mut partial = if i == 0 && page.is_continued() {
                match self.partial.take() {
                    Some(partial) => partial,
                    None => {
                        // 缺少起始片段
                        wasted += span.len as u64 * 8;
                        self.pending |= PacketFlags::RESYNC;
                        continue;
                    }
                }
            } else {
                if self.partial.is_some() {
                    wasted += self.drop_partial();
                    self.pending |= PacketFlags::RESYNC;
                }
                Partial::default()
            };

            partial.parts.push(part);
            partial.chunks.push(chunk);
            if span.complete {
                self.finish_packet(partial, page_index);
            } else {
                self.partial = Some(partial);
            }
        }

        let end_packet = self.packets.len();
        if end_packet > first_packet && page.granule_position >= 0 {
            self.packets[end_packet - 1].granule_position = page.granule_position;
        }
        if page.is_eos() {
            if let Some(last) = self.packets.last_mut() {
                last.flags |= PacketFlags::END_OF_STREAM;
            }
            // 流末尾未完成的包丢弃
            wasted += self.drop_partial();
            self.ended = true;
            self.eos_probed = false;
        }

        self.pages.push(PageInfo {
            granule: page.granule_position,
            sequence: page.sequence,
            first_packet,
            end_packet,
        });
        wasted
    }

    fn finish_packet(&mut self, partial: Partial, page_index: usize) {
        let Partial { parts, mut chunks } = partial;
        let data = if chunks.len() == 1 {
            chunks.pop().unwrap_or_default()
        } else {
            let mut joined = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
            for chunk in &chunks {
                joined.extend_from_slice(chunk);
            }
            joined.freeze()
        };
        let flags = std::mem::replace(&mut self.pending, PacketFlags::empty());
        self.packets.push(PacketEntry {
            parts,
            len: data.len(),
            cache: Some(data),
            page_index,
            granule_position: UNKNOWN_GRANULE,
            granule_count: None,
            flags,
        });
    }

    fn make_packet(&self, index: usize, data: Bytes) -> DataPacket {
        let entry = &self.packets[index];
        let page = &self.pages[entry.page_index];
        let mut packet = DataPacket::new(data);
        packet.set_index(index);
        packet.set_granule_position(entry.granule_position);
        packet.set_page_granule_position(page.granule);
        packet.set_page_sequence_number(page.sequence);
        packet.set_granule_count(entry.granule_count);
        packet.set_flag(entry.flags, true);
        packet
    }
}

/// 读出一页的概要
#[derive(Debug, Clone, Copy)]
pub(crate) struct PageSummary {
    pub serial: u32,
    pub flags: PageFlags,
}

/// 物理流的共享读取状态
pub(crate) struct OggState {
    source: PageSource,
    streams: HashMap<u32, LogicalStream>,
    ignored: HashSet<u32>,
    new_streams: Vec<u32>,
    next_page_offset: u64,
    end_of_source: bool,
    pages_read: usize,
    wasted_bits: u64,
}

impl OggState {
    pub fn new(source: PageSource) -> Self {
        let next_page_offset = source.position();
        Self {
            source,
            streams: HashMap::new(),
            ignored: HashSet::new(),
            new_streams: Vec::new(),
            next_page_offset,
            end_of_source: false,
            pages_read: 0,
            wasted_bits: 0,
        }
    }

    pub fn is_seekable(&self) -> bool {
        self.source.is_seekable()
    }

    pub fn pages_read(&self) -> usize {
        self.pages_read
    }

    pub fn wasted_bits(&self) -> u64 {
        self.wasted_bits
    }

    pub fn has_new_streams(&self) -> bool {
        !self.new_streams.is_empty()
    }

    pub fn take_new_streams(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.new_streams)
    }

    pub fn ignore_stream(&mut self, serial: u32) {
        self.ignored.insert(serial);
        self.streams.remove(&serial);
        self.new_streams.retain(|&s| s != serial);
    }

    pub fn stream_serials(&self) -> Vec<u32> {
        let mut serials: Vec<u32> = self.streams.keys().copied().collect();
        serials.sort_unstable();
        serials
    }

    pub fn stream(&self, serial: u32) -> ShengResult<&LogicalStream> {
        self.streams
            .get(&serial)
            .ok_or(ShengError::StreamNotFound(serial))
    }

    fn stream_mut(&mut self, serial: u32) -> ShengResult<&mut LogicalStream> {
        self.streams
            .get_mut(&serial)
            .ok_or(ShengError::StreamNotFound(serial))
    }

    /// 读取下一页并分派到逻辑流, 来源结束时返回 `None`
    pub fn read_next_page(&mut self) -> ShengResult<Option<PageSummary>> {
        if self.end_of_source {
            return Ok(None);
        }
        self.source.seek(self.next_page_offset)?;
        let Some(read) = read_page(&mut self.source)? else {
            self.end_of_source = true;
            return Ok(None);
        };
        self.next_page_offset = self.source.position();
        self.pages_read += 1;
        self.wasted_bits += read.skipped * 8;

        let page = read.page;
        let summary = PageSummary {
            serial: page.serial,
            flags: page.flags,
        };
        if self.ignored.contains(&page.serial) {
            return Ok(Some(summary));
        }
        let stream = match self.streams.entry(page.serial) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                if !page.is_bos() {
                    debug!("逻辑流 {:08x} 缺少 BOS 页", page.serial);
                }
                self.new_streams.push(page.serial);
                entry.insert(LogicalStream::new(page.serial))
            }
        };
        self.wasted_bits += stream.add_page(&page);
        Ok(Some(summary))
    }

    /// 读完整个来源
    pub fn read_to_end(&mut self) -> ShengResult<()> {
        while self.read_next_page()?.is_some() {}
        Ok(())
    }

    /// 为 `serial` 流读入更多页面, 流已结束或来源结束时返回 false
    fn read_more(&mut self, serial: u32) -> ShengResult<bool> {
        let stream = self.stream_mut(serial)?;
        if stream.ended {
            if stream.eos_probed {
                return Ok(false);
            }
            // EOS 之后只看一页, 同序列号的 BOS 页会重新打开流
            stream.eos_probed = true;
        }
        Ok(self.read_next_page()?.is_some())
    }

    /// `serial` 流的第 `index` 个包, 超出流范围时为 `None`
    pub fn packet(&mut self, serial: u32, index: usize) -> ShengResult<Option<DataPacket>> {
        while index >= self.stream(serial)?.packets.len() {
            if !self.read_more(serial)? {
                return Ok(None);
            }
        }
        let data = self.packet_data(serial, index)?;
        Ok(Some(self.stream(serial)?.make_packet(index, data)))
    }

    fn packet_data(&mut self, serial: u32, index: usize) -> ShengResult<Bytes> {
        let (parts, len) = {
            let entry = &self.stream(serial)?.packets[index];
            if let Some(data) = &entry.cache {
                return Ok(data.clone());
            }
            (entry.parts.clone(), entry.len)
        };
        if !self.source.is_seekable() {
            return Err(ShengError::InvalidState(format!(
                "逻辑流 {:08x} 的包 {} 已释放, 顺序来源无法重新读取",
                serial, index,
            )));
        }
        let mut data = Vec::with_capacity(len);
        for part in parts {
            self.source.seek(part.offset)?;
            data.extend_from_slice(&self.source.read_bytes(part.len)?);
        }
        Ok(Bytes::from(data))
    }

    /// 解码器用完一个包: 记下粒度信息, 释放负载
    pub fn packet_done(&mut self, serial: u32, packet: &DataPacket) -> ShengResult<()> {
        let stream = self.stream_mut(serial)?;
        let Some(entry) = stream.packets.get_mut(packet.index()) else {
            return Ok(());
        };
        if entry.granule_position < 0 && packet.granule_position() >= 0 {
            entry.granule_position = packet.granule_position();
        }
        if entry.granule_count.is_none() {
            entry.granule_count = packet.granule_count();
        }
        entry.cache = None;
        Ok(())
    }

    pub fn set_granule_position(&mut self, serial: u32, index: usize, granule: i64) -> ShengResult<()> {
        let stream = self.stream_mut(serial)?;
        let entry = stream.packets.get_mut(index).ok_or_else(|| {
            ShengError::InvalidArgument(format!("包序号 {} 超出流范围", index))
        })?;
        entry.granule_position = granule;
        Ok(())
    }

    /// 查找包含采样 `granule` 的包.
    ///
    /// 先找到第一个页面粒度大于目标的页, 再从前一页的粒度出发逐包累加
    /// 采样数; 前一页粒度未知时从本页粒度倒推. 途中算出的粒度位置写回索引.
    pub fn find_packet(
        &mut self,
        serial: u32,
        granule: i64,
        packet_length: &mut PacketLengthFn<'_>,
    ) -> ShengResult<Option<DataPacket>> {
        let mut searched = 0;
        let page_index = loop {
            let pages = &self.stream(serial)?.pages;
            let found = pages[searched..]
                .iter()
                .position(|p| p.granule > granule && p.end_packet > p.first_packet);
            if let Some(offset) = found {
                break searched + offset;
            }
            searched = pages.len();
            if !self.read_more(serial)? {
                return Ok(None);
            }
        };

        let (page, previous_granule) = {
            let pages = &self.stream(serial)?.pages;
            let page = pages[page_index];
            let previous = pages[..page_index]
                .iter()
                .rev()
                .find(|p| p.end_packet > p.first_packet)
                .map(|p| p.granule)
                .filter(|&g| g >= 0);
            (page, previous)
        };

        let mut counts = Vec::with_capacity(page.end_packet - page.first_packet);
        for index in page.first_packet..page.end_packet {
            counts.push(self.packet_granule_count(serial, index, packet_length)?);
        }
        let mut start = previous_granule.unwrap_or_else(|| page.granule - counts.iter().sum::<i64>());

        for (index, count) in (page.first_packet..page.end_packet).zip(counts) {
            let end = start + count;
            {
                let stream = self.stream_mut(serial)?;
                let entry = &mut stream.packets[index];
                entry.granule_position = end;
                if count > 0 && entry.granule_count.is_none() {
                    entry.granule_count = Some(count as u32);
                }
            }
            if start <= granule && granule < end {
                // 前一个包的结束位置就是目标包的起点
                if index > 0 {
                    self.set_granule_position(serial, index - 1, start)?;
                }
                return self.packet(serial, index);
            }
            start = end;
        }
        Ok(None)
    }

    fn packet_granule_count(
        &mut self,
        serial: u32,
        index: usize,
        packet_length: &mut PacketLengthFn<'_>,
    ) -> ShengResult<i64> {
        if let Some(count) = self.stream(serial)?.packets[index].granule_count {
            return Ok(i64::from(count));
        }
        if index == 0 {
            return Ok(0);
        }
        let (Some(mut current), Some(mut previous)) =
            (self.packet(serial, index)?, self.packet(serial, index - 1)?)
        else {
            return Ok(0);
        };
        Ok(packet_length(&mut current, &mut previous).max(0))
    }
}
