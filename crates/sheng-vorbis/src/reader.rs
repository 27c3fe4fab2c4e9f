//! Vorbis 读取器: 面向调用方的解码入口.
//!
//! 一个 [`VorbisReader`] 持有容器中所有 Vorbis 逻辑流的解码器, 同一时刻只从
//! 其中一个 (当前流) 读取. 读取与查找都通过 `&mut self` 串行化.

use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sheng_core::{ContainerReader, PacketProvider, ShengError, ShengResult};

use crate::stats::StreamStats;
use crate::stream_decoder::VorbisStreamDecoder;
use crate::util::clip_sample;

/// 读取器选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// 输出截断到 ±0.99999994
    pub clip_samples: bool,
    /// 非 Vorbis 或头包损坏的逻辑流直接跳过, 否则报错
    pub ignore_unknown_streams: bool,
    /// `read_to_end` 每次读取的帧数
    pub read_chunk_samples: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            clip_samples: true,
            ignore_unknown_streams: true,
            read_chunk_samples: 4096,
        }
    }
}

/// Vorbis 解码读取器
pub struct VorbisReader {
    container: Option<Box<dyn ContainerReader>>,
    decoders: Vec<VorbisStreamDecoder>,
    current: usize,
    options: ReaderOptions,
}

impl VorbisReader {
    /// 从容器创建, 使用默认选项
    pub fn new(container: Box<dyn ContainerReader>) -> ShengResult<Self> {
        Self::with_options(container, ReaderOptions::default())
    }

    pub fn with_options(
        mut container: Box<dyn ContainerReader>,
        options: ReaderOptions,
    ) -> ShengResult<Self> {
        if !container.init()? {
            return Err(ShengError::Format("无法识别的容器格式".into()));
        }
        let mut reader = Self {
            container: Some(container),
            decoders: Vec::new(),
            current: 0,
            options,
        };
        reader.collect_new_streams()?;
        if reader.decoders.is_empty() {
            return Err(ShengError::Format("容器中没有 Vorbis 逻辑流".into()));
        }
        Ok(reader)
    }

    /// 直接从单个逻辑流的包源创建, 不支持多流
    pub fn from_provider(provider: Box<dyn PacketProvider>) -> ShengResult<Self> {
        Self::from_provider_with_options(provider, ReaderOptions::default())
    }

    pub fn from_provider_with_options(
        provider: Box<dyn PacketProvider>,
        options: ReaderOptions,
    ) -> ShengResult<Self> {
        let serial = provider.stream_serial();
        let decoder = VorbisStreamDecoder::try_new(provider)?.ok_or_else(|| {
            ShengError::Format(format!("逻辑流 {:08x} 不是 Vorbis 流", serial))
        })?;
        Ok(Self {
            container: None,
            decoders: vec![decoder],
            current: 0,
            options,
        })
    }

    /// 为容器新发现的逻辑流创建解码器, 返回新增数量
    fn collect_new_streams(&mut self) -> ShengResult<usize> {
        let Some(container) = self.container.as_mut() else {
            return Ok(0);
        };
        let mut added = 0;
        for provider in container.take_new_streams() {
            let serial = provider.stream_serial();
            let err = match VorbisStreamDecoder::try_new(provider) {
                Ok(Some(decoder)) => {
                    debug!("发现 Vorbis 逻辑流 {:08x}", serial);
                    self.decoders.push(decoder);
                    added += 1;
                    continue;
                }
                Ok(None) => ShengError::Unsupported(format!("逻辑流 {:08x} 不是 Vorbis 流", serial)),
                Err(err) => err,
            };
            if !self.options.ignore_unknown_streams {
                return Err(err);
            }
            warn!("忽略逻辑流 {:08x}: {}", serial, err);
            container.ignore_stream(serial);
        }
        Ok(added)
    }

    fn decoder(&self) -> &VorbisStreamDecoder {
        &self.decoders[self.current]
    }

    fn decoder_mut(&mut self) -> &mut VorbisStreamDecoder {
        &mut self.decoders[self.current]
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    pub fn set_clip_samples(&mut self, clip: bool) {
        self.options.clip_samples = clip;
    }

    // ========================================================================
    // 多流
    // ========================================================================

    pub fn stream_count(&self) -> usize {
        self.decoders.len()
    }

    pub fn current_stream(&self) -> usize {
        self.current
    }

    /// 继续扫描容器寻找新的 Vorbis 逻辑流, 返回是否找到
    pub fn find_next_stream(&mut self) -> ShengResult<bool> {
        let found = match self.container.as_mut() {
            Some(container) => container.find_next_stream()?,
            None => return Ok(false),
        };
        if !found {
            return Ok(false);
        }
        Ok(self.collect_new_streams()? > 0)
    }

    /// 切换当前流; 声道数或采样率与之前不同时返回 true
    pub fn switch_streams(&mut self, index: usize) -> ShengResult<bool> {
        if index >= self.decoders.len() {
            return Err(ShengError::InvalidArgument(format!(
                "流序号 {} 越界, 共 {} 个流",
                index,
                self.decoders.len(),
            )));
        }
        let (channels, sample_rate) = (self.channels(), self.sample_rate());
        self.current = index;
        Ok(channels != self.channels() || sample_rate != self.sample_rate())
    }

    pub fn stream_stats(&mut self, index: usize) -> ShengResult<StreamStats> {
        let count = self.decoders.len();
        self.decoders
            .get_mut(index)
            .ok_or_else(|| {
                ShengError::InvalidArgument(format!("流序号 {} 越界, 共 {} 个流", index, count))
            })?
            .stats()
    }

    // ========================================================================
    // 元数据
    // ========================================================================

    pub fn channels(&self) -> usize {
        self.decoder().channels()
    }

    pub fn sample_rate(&self) -> u32 {
        self.decoder().sample_rate()
    }

    pub fn upper_bitrate(&self) -> i32 {
        self.decoder().ident().bitrate_upper
    }

    pub fn nominal_bitrate(&self) -> i32 {
        self.decoder().ident().bitrate_nominal
    }

    pub fn lower_bitrate(&self) -> i32 {
        self.decoder().ident().bitrate_lower
    }

    pub fn vendor(&self) -> &str {
        &self.decoder().comments().vendor
    }

    pub fn comments(&self) -> &[String] {
        &self.decoder().comments().comments
    }

    /// 按标签名 (不区分大小写) 取注释值
    pub fn tag(&self, name: &str) -> impl Iterator<Item = &str> {
        self.decoder().comments().get(name)
    }

    pub fn stream_serial(&self) -> u32 {
        self.decoder().stream_serial()
    }

    pub fn can_seek(&self) -> bool {
        self.decoder().can_seek()
    }

    /// 当前流的总采样数 (每声道), 不可随机访问时为 `None`
    pub fn total_samples(&mut self) -> ShengResult<Option<i64>> {
        self.decoder_mut().total_samples()
    }

    pub fn total_time(&mut self) -> ShengResult<Option<Duration>> {
        let rate = self.sample_rate();
        Ok(self
            .total_samples()?
            .map(|samples| samples_to_duration(samples, rate)))
    }

    /// 下一次读取的第一个采样的位置
    pub fn sample_position(&self) -> i64 {
        self.decoder().position()
    }

    pub fn time_position(&self) -> Duration {
        samples_to_duration(self.sample_position(), self.sample_rate())
    }

    pub fn seek_to_sample(&mut self, sample: i64) -> ShengResult<()> {
        self.decoder_mut().seek_to(sample)
    }

    pub fn seek_to_time(&mut self, time: Duration) -> ShengResult<()> {
        let sample = (time.as_secs_f64() * f64::from(self.sample_rate())) as i64;
        self.seek_to_sample(sample)
    }

    pub fn is_parameter_change(&self) -> bool {
        self.decoder().is_parameter_change()
    }

    pub fn clear_parameter_change(&mut self) {
        self.decoder_mut().clear_parameter_change();
    }

    /// 当前流是否有采样被截断过
    pub fn clipped(&mut self) -> bool {
        *self.decoder_mut().clipped_flag()
    }

    pub fn stats(&mut self) -> ShengResult<StreamStats> {
        self.decoder_mut().stats()
    }

    pub fn reset_stats(&mut self) {
        self.decoder_mut().reset_stats();
    }

    // ========================================================================
    // 读取
    // ========================================================================

    /// 读取交织采样到 `buffer[offset..offset + count]`, 返回实际读取数.
    ///
    /// `count` 必须是声道数的整数倍. 返回 0 表示流结束.
    pub fn read_samples(&mut self, buffer: &mut [f32], offset: usize, count: usize) -> ShengResult<usize> {
        let end = offset
            .checked_add(count)
            .filter(|&end| end <= buffer.len())
            .ok_or_else(|| {
                ShengError::InvalidArgument(format!(
                    "读取范围 {}+{} 超出缓冲区长度 {}",
                    offset,
                    count,
                    buffer.len(),
                ))
            })?;
        let channels = self.channels();
        if count % channels != 0 {
            return Err(ShengError::InvalidArgument(format!(
                "读取数量 {} 不是声道数 {} 的整数倍",
                count, channels,
            )));
        }

        let clip = self.options.clip_samples;
        let decoder = self.decoder_mut();
        let read = decoder.read_samples(&mut buffer[offset..end])?;
        if clip {
            let clipped = decoder.clipped_flag();
            for sample in &mut buffer[offset..offset + read] {
                *sample = clip_sample(*sample, clipped);
            }
        }
        Ok(read)
    }

    /// 读到流结束或参数变化, 采样追加到 `out`, 返回读取数
    pub fn read_to_end(&mut self, out: &mut Vec<f32>) -> ShengResult<usize> {
        let chunk = self.options.read_chunk_samples.max(1) * self.channels();
        let mut buffer = vec![0f32; chunk];
        let mut total = 0;
        while !self.is_parameter_change() || self.decoder().has_pending_samples() {
            let read = self.read_samples(&mut buffer, 0, chunk)?;
            if read == 0 {
                break;
            }
            out.extend_from_slice(&buffer[..read]);
            total += read;
        }
        Ok(total)
    }
}

fn samples_to_duration(samples: i64, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(samples.max(0) as f64 / f64::from(sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryProvider, audio_packet, header_packets};

    fn reader(channels: u8, audio: usize) -> VorbisReader {
        let mut packets = header_packets(channels, 8000);
        packets.extend((0..audio).map(|_| audio_packet(false, false, false)));
        VorbisReader::from_provider(Box::new(MemoryProvider::new(packets))).unwrap()
    }

    #[test]
    fn test_读取器元数据() {
        let mut r = reader(2, 0);
        assert_eq!(r.channels(), 2);
        assert_eq!(r.sample_rate(), 8000);
        assert_eq!(r.upper_bitrate(), 160_000);
        assert_eq!(r.nominal_bitrate(), 112_000);
        assert_eq!(r.vendor(), "sheng-test");
        assert_eq!(r.stream_count(), 1);
        assert!(!r.can_seek());
        assert_eq!(r.total_time().unwrap(), None);
        assert!(r.seek_to_time(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_读取范围检查() {
        let mut r = reader(2, 4);
        let mut buf = vec![0f32; 64];
        assert!(r.read_samples(&mut buf, 60, 8).is_err(), "越界应报错");
        assert!(r.read_samples(&mut buf, 0, 7).is_err(), "非声道整数倍应报错");
        assert!(r.read_samples(&mut buf, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_偏移读取与位置() {
        let mut r = reader(1, 5);
        let mut buf = vec![1f32; 300];
        let n = r.read_samples(&mut buf, 100, 200).unwrap();
        assert_eq!(n, 200);
        assert!(buf[..100].iter().all(|&s| s == 1.0), "偏移之前的数据不应被改写");
        assert!(buf[100..].iter().all(|&s| s == 0.0));
        assert_eq!(r.sample_position(), 200);
        assert!((r.time_position().as_secs_f64() - 0.025).abs() < 1e-9);
    }

    #[test]
    fn test_读到结束() {
        let mut r = reader(2, 5);
        let mut out = Vec::new();
        assert_eq!(r.read_to_end(&mut out).unwrap(), 2 * 512);
        assert_eq!(out.len(), 2 * 512);
        assert!(!r.clipped());
        let stats = r.stats().unwrap();
        assert_eq!(stats.samples_decoded, 512);
        r.reset_stats();
        assert_eq!(r.stats().unwrap().samples_decoded, 0);
    }

    #[test]
    fn test_切换流越界() {
        let mut r = reader(1, 0);
        assert!(!r.switch_streams(0).unwrap());
        assert!(r.switch_streams(1).is_err());
        assert!(r.stream_stats(3).is_err());
        assert!(!r.find_next_stream().unwrap());
    }

    #[test]
    fn test_非vorbis包源() {
        let provider = MemoryProvider::new(vec![sheng_core::DataPacket::new(vec![0u8; 30])]);
        assert!(VorbisReader::from_provider(Box::new(provider)).is_err());
    }

    #[test]
    fn test_选项默认值与反序列化() {
        let options: ReaderOptions = serde_json::from_str(r#"{"clip_samples": false}"#).unwrap();
        assert!(!options.clip_samples);
        assert!(options.ignore_unknown_streams);
        assert_eq!(options.read_chunk_samples, 4096);
    }
}
