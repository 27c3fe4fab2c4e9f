//! Ogg 页面写入.
//!
//! 把一个逻辑流的数据包打包成页面: 段表每段最多 255 字节, 包可以跨页,
//! 页面粒度位置取页内最后一个完整包的粒度. 输出目标在每次调用时传入,
//! 多个逻辑流可以交错写入同一个输出.

use std::io::Write;

use byteorder::{ByteOrder, LittleEndian};
use sheng_core::ShengResult;
use sheng_core::crc::OggCrc;

use crate::page::{OGG_SYNC, PAGE_HEADER_LEN, PageFlags};

/// 单页最多的段数
const MAX_SEGMENTS: usize = 255;

/// 单个逻辑流的页面写入器
#[derive(Debug)]
pub struct PageWriter {
    serial: u32,
    sequence: u32,
    segments: Vec<u8>,
    data: Vec<u8>,
    /// 本页最后一个完整包的粒度位置, 没有完整包时为 -1
    granule: i64,
    /// 本页以上一页未完成的包开始
    continued: bool,
    bos: bool,
}

impl PageWriter {
    pub fn new(serial: u32) -> Self {
        Self {
            serial,
            sequence: 0,
            segments: Vec::new(),
            data: Vec::new(),
            granule: -1,
            continued: false,
            bos: true,
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// 已写出的页数
    pub fn pages_written(&self) -> u32 {
        self.sequence
    }

    /// 追加一个完整的包, 当前页放不下时自动换页
    pub fn write_packet<W: Write + ?Sized>(
        &mut self,
        out: &mut W,
        packet: &[u8],
        granule_position: i64,
    ) -> ShengResult<()> {
        let mut rest = packet;
        loop {
            let room = MAX_SEGMENTS - self.segments.len();
            let needed = rest.len() / 255 + 1;
            if needed <= room {
                self.segments
                    .extend(std::iter::repeat_n(255u8, rest.len() / 255));
                self.segments.push((rest.len() % 255) as u8);
                self.data.extend_from_slice(rest);
                self.granule = granule_position;
                return Ok(());
            }

            // 用 255 字节的段填满本页, 剩余部分延续到下一页
            let take = room * 255;
            self.segments.extend(std::iter::repeat_n(255u8, room));
            self.data.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            self.write_page(out, PageFlags::empty())?;
            self.continued = true;
        }
    }

    /// 结束当前页, 没有待写数据时什么也不做
    pub fn flush_page<W: Write + ?Sized>(&mut self, out: &mut W) -> ShengResult<()> {
        if self.segments.is_empty() {
            return Ok(());
        }
        self.write_page(out, PageFlags::empty())
    }

    /// 写出剩余数据, 最后一页带 EOS 标志
    pub fn finish<W: Write + ?Sized>(&mut self, out: &mut W) -> ShengResult<()> {
        self.write_page(out, PageFlags::EOS)?;
        out.flush()?;
        Ok(())
    }

    fn write_page<W: Write + ?Sized>(&mut self, out: &mut W, extra: PageFlags) -> ShengResult<()> {
        let mut flags = extra;
        flags.set(PageFlags::CONTINUED, self.continued);
        flags.set(PageFlags::BOS, self.bos);

        let mut header = Vec::with_capacity(PAGE_HEADER_LEN + self.segments.len());
        header.extend_from_slice(OGG_SYNC);
        header.push(0);
        header.push(flags.bits());
        header.extend_from_slice(&[0u8; 20]);
        LittleEndian::write_i64(&mut header[6..14], self.granule);
        LittleEndian::write_u32(&mut header[14..18], self.serial);
        LittleEndian::write_u32(&mut header[18..22], self.sequence);
        header.push(self.segments.len() as u8);
        header.extend_from_slice(&self.segments);

        let mut crc = OggCrc::new();
        crc.update(&header);
        crc.update(&self.data);
        LittleEndian::write_u32(&mut header[22..26], crc.value());

        out.write_all(&header)?;
        out.write_all(&self.data)?;

        self.sequence += 1;
        self.segments.clear();
        self.data.clear();
        self.granule = -1;
        self.continued = false;
        self.bos = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_单包单页() {
        let mut out = Vec::new();
        let mut writer = PageWriter::new(7);
        writer.write_packet(&mut out, &[1, 2, 3], 0).unwrap();
        writer.finish(&mut out).unwrap();
        assert_eq!(&out[..4], b"OggS");
        assert_eq!(out[5], (PageFlags::BOS | PageFlags::EOS).bits());
        assert_eq!(LittleEndian::read_u32(&out[14..18]), 7);
        assert_eq!(out[26], 1, "段数");
        assert_eq!(out[27], 3);
        assert_eq!(out.len(), 28 + 3);
        assert_eq!(writer.pages_written(), 1);
    }

    #[test]
    fn test_长包跨页() {
        let mut out = Vec::new();
        let mut writer = PageWriter::new(1);
        let packet = vec![0xAB; 255 * 300];
        writer.write_packet(&mut out, &packet, 1000).unwrap();
        writer.finish(&mut out).unwrap();
        assert_eq!(writer.pages_written(), 2);

        let first_len = PAGE_HEADER_LEN + 255 + 255 * 255;
        // 第一页没有完整包, 粒度为 -1
        assert_eq!(LittleEndian::read_i64(&out[6..14]), -1);
        let second = &out[first_len..];
        assert_eq!(second[5], (PageFlags::CONTINUED | PageFlags::EOS).bits());
        assert_eq!(LittleEndian::read_i64(&second[6..14]), 1000);
        // 剩余 45 个满段加一个长度为 0 的结束段
        assert_eq!(second[26], 46);
    }

    #[test]
    fn test_空的当前页不写出() {
        let mut out = Vec::new();
        let mut writer = PageWriter::new(1);
        writer.flush_page(&mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(writer.pages_written(), 0);
    }
}
