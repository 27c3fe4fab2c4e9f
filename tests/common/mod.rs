//! 集成测试共用: 合成 Vorbis 码流并封装为 Ogg.
//!
//! setup 只含两个码本、一个 floor1 (两个端点) 和一个 type 1 残差,
//! 每个音频包写入真实的 floor 端点与 ±1 残差向量, 解码后有非零能量.
//! 立体声流使用一对耦合声道.

#![allow(dead_code)]

use sheng::core::bitwriter::BitWriter;
use sheng::ogg::PageWriter;

/// 残差分区大小
const PARTITION_SIZE: usize = 32;

/// 一个合成的逻辑流
#[derive(Debug, Clone)]
pub struct SyntheticStream {
    pub serial: u32,
    pub channels: u8,
    pub sample_rate: u32,
    /// 每个音频包是否为长块
    pub blocks: Vec<bool>,
    pub packets_per_page: usize,
    /// 最后一页的粒度位置比完整长度少的采样数
    pub trim: i64,
    pub comments: Vec<String>,
}

impl SyntheticStream {
    /// 单声道、全短块 (256) 的流
    pub fn new(serial: u32, packets: usize) -> Self {
        Self {
            serial,
            channels: 1,
            sample_rate: 8000,
            blocks: vec![false; packets],
            packets_per_page: 4,
            trim: 0,
            comments: vec!["TITLE=合成测试".to_string(), "ARTIST=sheng".to_string()],
        }
    }

    pub fn stereo(mut self, sample_rate: u32) -> Self {
        self.channels = 2;
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_blocks(mut self, blocks: Vec<bool>) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn with_trim(mut self, trim: i64) -> Self {
        self.trim = trim;
        self
    }

    pub fn with_packets_per_page(mut self, count: usize) -> Self {
        self.packets_per_page = count.max(1);
        self
    }

    fn block_size(long: bool) -> i64 {
        if long { 2048 } else { 256 }
    }

    /// 每个音频包结束时的粒度位置 (未截断)
    pub fn granules(&self) -> Vec<i64> {
        let mut granules = Vec::with_capacity(self.blocks.len());
        let mut position = 0i64;
        for (i, &long) in self.blocks.iter().enumerate() {
            if i > 0 {
                position += Self::block_size(self.blocks[i - 1]) / 4 + Self::block_size(long) / 4;
            }
            granules.push(position);
        }
        granules
    }

    /// 解码应得到的每声道采样数
    pub fn expected_samples(&self) -> i64 {
        self.granules().last().copied().unwrap_or(0) - self.trim
    }

    pub fn header_packets(&self) -> [Vec<u8>; 3] {
        [ident_packet(self.channels, self.sample_rate), self.comment_packet(), setup_packet(self.channels)]
    }

    fn comment_packet(&self) -> Vec<u8> {
        let vendor = "sheng synthetic encoder";
        let mut v = vec![3u8];
        v.extend_from_slice(b"vorbis");
        v.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        v.extend_from_slice(vendor.as_bytes());
        v.extend_from_slice(&(self.comments.len() as u32).to_le_bytes());
        for comment in &self.comments {
            v.extend_from_slice(&(comment.len() as u32).to_le_bytes());
            v.extend_from_slice(comment.as_bytes());
        }
        v.push(1);
        v
    }

    /// 音频包及其粒度位置
    pub fn audio_packets(&self) -> Vec<(Vec<u8>, i64)> {
        let granules = self.granules();
        let mut rng = Lcg(u64::from(self.serial).wrapping_mul(0x9E37_79B9) | 1);
        (0..self.blocks.len())
            .map(|i| {
                let long = self.blocks[i];
                let prev = i.checked_sub(1).map_or(long, |p| self.blocks[p]);
                let next = self.blocks.get(i + 1).copied().unwrap_or(long);
                let packet = audio_packet(self.channels, long, prev, next, &mut rng);
                (packet, granules[i])
            })
            .collect()
    }

    /// 头包页面: identification 单独一页, comment 与 setup 一页
    pub fn write_headers(&self, writer: &mut PageWriter, out: &mut Vec<u8>) {
        let [ident, comment, setup] = self.header_packets();
        writer.write_packet(out, &ident, 0).unwrap();
        writer.flush_page(out).unwrap();
        writer.write_packet(out, &comment, 0).unwrap();
        writer.write_packet(out, &setup, 0).unwrap();
        writer.flush_page(out).unwrap();
    }

    /// 音频页面按 `packets_per_page` 分页, 最后一页带 EOS 和截断后的粒度
    pub fn write_audio(&self, writer: &mut PageWriter, out: &mut Vec<u8>) {
        self.write_audio_with(writer, out, |_, _| {});
    }

    /// 同 `write_audio`, 写出前由 `edit` 修改第 i 个音频包的内容
    pub fn write_audio_with(
        &self,
        writer: &mut PageWriter,
        out: &mut Vec<u8>,
        mut edit: impl FnMut(usize, &mut Vec<u8>),
    ) {
        let packets = self.audio_packets();
        let last = packets.len().saturating_sub(1);
        for (i, (mut packet, granule)) in packets.into_iter().enumerate() {
            edit(i, &mut packet);
            let granule = if i == last { granule - self.trim } else { granule };
            writer.write_packet(out, &packet, granule).unwrap();
            if i == last {
                writer.finish(out).unwrap();
            } else if (i + 1) % self.packets_per_page == 0 {
                writer.flush_page(out).unwrap();
            }
        }
    }

    pub fn to_ogg(&self) -> Vec<u8> {
        self.to_ogg_with(|_, _| {})
    }

    /// 页面校验正确但音频包内容被 `edit` 改过的码流
    pub fn to_ogg_with(&self, edit: impl FnMut(usize, &mut Vec<u8>)) -> Vec<u8> {
        let mut out = Vec::new();
        let mut writer = PageWriter::new(self.serial);
        self.write_headers(&mut writer, &mut out);
        self.write_audio_with(&mut writer, &mut out, edit);
        out
    }
}

/// 多个流首尾相接 (链式 Ogg)
pub fn chain(streams: &[SyntheticStream]) -> Vec<u8> {
    streams.iter().flat_map(SyntheticStream::to_ogg).collect()
}

/// 两个流交错复用: 先写两个流的头包页, 再交替写音频页
pub fn multiplex(a: &SyntheticStream, b: &SyntheticStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut wa = PageWriter::new(a.serial);
    let mut wb = PageWriter::new(b.serial);
    let [a_ident, a_comment, a_setup] = a.header_packets();
    let [b_ident, b_comment, b_setup] = b.header_packets();

    wa.write_packet(&mut out, &a_ident, 0).unwrap();
    wa.flush_page(&mut out).unwrap();
    wb.write_packet(&mut out, &b_ident, 0).unwrap();
    wb.flush_page(&mut out).unwrap();
    for (writer, comment, setup) in [(&mut wa, &a_comment, &a_setup), (&mut wb, &b_comment, &b_setup)] {
        writer.write_packet(&mut out, comment, 0).unwrap();
        writer.write_packet(&mut out, setup, 0).unwrap();
        writer.flush_page(&mut out).unwrap();
    }

    let pa = a.audio_packets();
    let pb = b.audio_packets();
    for i in 0..pa.len().max(pb.len()) {
        for (writer, packets) in [(&mut wa, &pa), (&mut wb, &pb)] {
            let Some((packet, granule)) = packets.get(i) else {
                continue;
            };
            writer.write_packet(&mut out, packet, *granule).unwrap();
            if i + 1 == packets.len() {
                writer.finish(&mut out).unwrap();
            } else {
                writer.flush_page(&mut out).unwrap();
            }
        }
    }
    out
}

/// 数据中各页面的起始位置
pub fn page_offsets(data: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut pos = 0;
    while pos + 27 <= data.len() && &data[pos..pos + 4] == b"OggS" {
        offsets.push(pos);
        let segments = data[pos + 26] as usize;
        let body: usize = data[pos + 27..pos + 27 + segments].iter().map(|&s| s as usize).sum();
        pos += 27 + segments + body;
    }
    offsets
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ident_packet(channels: u8, sample_rate: u32) -> Vec<u8> {
    let mut v = vec![1u8];
    v.extend_from_slice(b"vorbis");
    v.extend_from_slice(&0u32.to_le_bytes());
    v.push(channels);
    v.extend_from_slice(&sample_rate.to_le_bytes());
    v.extend_from_slice(&0i32.to_le_bytes());
    v.extend_from_slice(&(u32::from(channels) * 48_000).to_le_bytes());
    v.extend_from_slice(&0i32.to_le_bytes());
    // 块长 2^8 / 2^11
    v.push((11 << 4) | 8);
    v.push(1);
    v
}

/// 两条目、码长 1 的码本; `vq` 时条目 0 -> -1.0, 条目 1 -> 1.0
fn write_book(bw: &mut BitWriter, vq: bool) {
    bw.write_bits(0x56_4342, 24);
    bw.write_bits(1, 16);
    bw.write_bits(2, 24);
    bw.write_bit(false);
    bw.write_bit(false);
    bw.write_bits(0, 5);
    bw.write_bits(0, 5);
    if vq {
        bw.write_bits(1, 4);
        bw.write_vorbis_float(-1.0);
        bw.write_vorbis_float(2.0);
        bw.write_bits(0, 4);
        bw.write_bit(false);
        bw.write_bits(0, 1);
        bw.write_bits(1, 1);
    } else {
        bw.write_bits(0, 4);
    }
}

fn setup_packet(channels: u8) -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bytes(&[5]);
    bw.write_bytes(b"vorbis");

    // 码本 0: 残差分类; 码本 1: 残差向量
    bw.write_bits(1, 8);
    write_book(&mut bw, false);
    write_book(&mut bw, true);

    // time
    bw.write_bits(0, 6);
    bw.write_bits(0, 16);

    // floor1: 无分区, multiplier 2 (Y 7 位), 端点 X = 1024
    bw.write_bits(0, 6);
    bw.write_bits(1, 16);
    bw.write_bits(0, 5);
    bw.write_bits(1, 2);
    bw.write_bits(10, 4);

    // residue type 1: [0, 1024), 分区 32, 分类 1 在第 0 级使用码本 1
    bw.write_bits(0, 6);
    bw.write_bits(1, 16);
    bw.write_bits(0, 24);
    bw.write_bits(1024, 24);
    bw.write_bits(PARTITION_SIZE as u64 - 1, 24);
    bw.write_bits(1, 6);
    bw.write_bits(0, 8);
    bw.write_bits(0, 3);
    bw.write_bit(false);
    bw.write_bits(1, 3);
    bw.write_bit(false);
    bw.write_bits(1, 8);

    // mapping: 单子映射, 立体声时 0/1 耦合
    bw.write_bits(0, 6);
    bw.write_bits(0, 16);
    bw.write_bit(false);
    if channels == 2 {
        bw.write_bit(true);
        bw.write_bits(0, 8);
        bw.write_bits(0, 1);
        bw.write_bits(1, 1);
    } else {
        bw.write_bit(false);
    }
    bw.write_bits(0, 2);
    bw.write_bits(0, 8);
    bw.write_bits(0, 8);
    bw.write_bits(0, 8);

    // mode 0 短块, mode 1 长块
    bw.write_bits(1, 6);
    for long in [false, true] {
        bw.write_bit(long);
        bw.write_bits(0, 16);
        bw.write_bits(0, 16);
        bw.write_bits(0, 8);
    }
    bw.write_bit(true);
    bw.finish()
}

fn audio_packet(channels: u8, long: bool, prev: bool, next: bool, rng: &mut Lcg) -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bit(false);
    bw.write_bit(long);
    if long {
        bw.write_bit(prev);
        bw.write_bit(next);
    }

    for _ in 0..channels {
        bw.write_bit(true);
        bw.write_bits(100 + rng.next() % 16, 7);
        bw.write_bits(80 + rng.next() % 16, 7);
    }

    // 每个分区: 各声道的分类, 然后分类为 1 的声道写 32 个 ±1
    let half = if long { 1024 } else { 128 };
    for _ in 0..half / PARTITION_SIZE {
        let classes: Vec<u64> = (0..channels).map(|_| u64::from(rng.next() % 4 != 0)).collect();
        for &class in &classes {
            bw.write_bits(class, 1);
        }
        for &class in &classes {
            if class == 1 {
                for _ in 0..PARTITION_SIZE {
                    bw.write_bits(rng.next() & 1, 1);
                }
            }
        }
    }
    bw.finish()
}

/// 确定性的伪随机数
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }
}
