//! 流解码统计: 码率、开销位数与解码耗时.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

/// 各部分占用的位数
#[derive(Debug, Clone, Default)]
pub(crate) struct BitCounters {
    /// 头包标识与包类型位
    pub glue: u64,
    /// identification / comment 内容
    pub meta: u64,
    pub books: u64,
    pub time_header: u64,
    pub floor_header: u64,
    pub residue_header: u64,
    pub mapping_header: u64,
    pub mode_header: u64,
    pub waste_header: u64,
    pub mode: u64,
    pub floor: u64,
    pub residue: u64,
    pub waste: u64,
}

impl BitCounters {
    /// 只清零音频包相关的计数, 头包计数保留
    pub fn reset_audio(&mut self) {
        self.glue = 0;
        self.mode = 0;
        self.floor = 0;
        self.residue = 0;
        self.waste = 0;
    }

    pub fn audio_bits(&self) -> u64 {
        self.books
            + self.floor_header
            + self.residue_header
            + self.mapping_header
            + self.mode_header
            + self.mode
            + self.floor
            + self.residue
    }

    /// 不含容器开销
    pub fn overhead_bits(&self) -> u64 {
        self.glue + self.meta + self.time_header + self.waste_header + self.waste
    }
}

/// 最近一秒内每个包的位数与采样数, 用于瞬时码率
#[derive(Debug, Clone, Default)]
pub(crate) struct BitrateWindow {
    packets: VecDeque<(usize, usize)>,
    samples: usize,
}

impl BitrateWindow {
    pub fn push(&mut self, bits: usize, samples: usize, sample_rate: u32) {
        self.packets.push_back((bits, samples));
        self.samples += samples;
        while self.samples > sample_rate as usize {
            match self.packets.pop_front() {
                Some((_, s)) => self.samples -= s,
                None => break,
            }
        }
    }

    pub fn clear(&mut self) {
        self.packets.clear();
        self.samples = 0;
    }

    /// 没有采样时为 `None`
    pub fn bitrate(&self, sample_rate: u32) -> Option<u64> {
        if self.samples == 0 {
            return None;
        }
        let bits: usize = self.packets.iter().map(|&(b, _)| b).sum();
        Some(bits as u64 * u64::from(sample_rate) / self.samples as u64)
    }
}

/// 单个逻辑流的解码统计快照
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamStats {
    /// 按已解码时长计算的平均码率 (bit/s)
    pub effective_bitrate: u64,
    /// 最近一秒的码率, 尚无数据时为 `None`
    pub instant_bitrate: Option<u64>,
    /// 容器结构 (页头) 占用的位数
    pub container_bits: u64,
    /// 头包标识、元数据与丢弃数据占用的位数, 含容器开销
    pub overhead_bits: u64,
    /// 码本、配置与音频数据占用的位数
    pub audio_bits: u64,
    pub pages_read: usize,
    /// 仅可随机访问的流可知
    pub total_pages: Option<usize>,
    pub packets_decoded: u64,
    pub samples_decoded: u64,
    /// 输出采样是否发生过截断
    pub clipped: bool,
    pub decode_time: Duration,
}

impl StreamStats {
    /// 平均每包解码耗时
    pub fn packet_latency(&self) -> Option<Duration> {
        (self.packets_decoded > 0)
            .then(|| self.decode_time / u32::try_from(self.packets_decoded).unwrap_or(u32::MAX))
    }

    /// 平均每页解码耗时
    pub fn page_latency(&self) -> Option<Duration> {
        (self.pages_read > 0)
            .then(|| self.decode_time / u32::try_from(self.pages_read).unwrap_or(u32::MAX))
    }
}
