//! Ogg 物理流读取器.

use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use log::{debug, info};
use sheng_core::{ContainerReader, PacketProvider, ShengResult};

use crate::packet_reader::{OggPacketReader, lock_state};
use crate::page::PageFlags;
use crate::source::PageSource;
use crate::state::OggState;

/// Ogg 容器读取器, 为每个逻辑流产出一个 [`OggPacketReader`]
pub struct OggContainerReader {
    shared: Arc<Mutex<OggState>>,
    seekable: bool,
}

impl OggContainerReader {
    pub fn new(source: PageSource) -> Self {
        let seekable = source.is_seekable();
        Self {
            shared: Arc::new(Mutex::new(OggState::new(source))),
            seekable,
        }
    }

    pub fn open(path: impl AsRef<Path>) -> ShengResult<Self> {
        let path = path.as_ref();
        debug!("打开 Ogg 文件: {}", path.display());
        Ok(Self::new(PageSource::open(path)?))
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::new(PageSource::from_bytes(data))
    }

    /// 从顺序来源读取, 不支持查找
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self::new(PageSource::from_reader(reader))
    }
}

impl ContainerReader for OggContainerReader {
    /// 读完开头的 BOS 页, 这些页声明了物理流中同时开始的全部逻辑流
    fn init(&mut self) -> ShengResult<bool> {
        let mut state = lock_state(&self.shared)?;
        let mut found = false;
        while let Some(page) = state.read_next_page()? {
            found = true;
            if !page.flags.contains(PageFlags::BOS) {
                break;
            }
        }
        if found {
            info!("Ogg 物理流: {} 个逻辑流", state.stream_serials().len());
        }
        Ok(found)
    }

    fn find_next_stream(&mut self) -> ShengResult<bool> {
        let mut state = lock_state(&self.shared)?;
        while !state.has_new_streams() {
            if state.read_next_page()?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn take_new_streams(&mut self) -> Vec<Box<dyn PacketProvider>> {
        let serials = match lock_state(&self.shared) {
            Ok(mut state) => state.take_new_streams(),
            Err(_) => return Vec::new(),
        };
        serials
            .into_iter()
            .map(|serial| {
                Box::new(OggPacketReader::new(
                    Arc::clone(&self.shared),
                    serial,
                    self.seekable,
                )) as Box<dyn PacketProvider>
            })
            .collect()
    }

    fn ignore_stream(&mut self, serial: u32) {
        if let Ok(mut state) = lock_state(&self.shared) {
            debug!("忽略逻辑流 {:08x}", serial);
            state.ignore_stream(serial);
        }
    }

    fn stream_serials(&self) -> Vec<u32> {
        lock_state(&self.shared)
            .map(|state| state.stream_serials())
            .unwrap_or_default()
    }

    fn can_seek(&self) -> bool {
        self.seekable
    }

    fn wasted_bits(&self) -> u64 {
        lock_state(&self.shared).map_or(0, |state| state.wasted_bits())
    }

    fn pages_read(&self) -> usize {
        lock_state(&self.shared).map_or(0, |state| state.pages_read())
    }

    fn total_page_count(&mut self) -> ShengResult<usize> {
        let mut state = lock_state(&self.shared)?;
        state.read_to_end()?;
        Ok(state.pages_read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::PageWriter;

    /// 两个交错的逻辑流, 之后再链接一个新流
    fn multiplexed() -> Vec<u8> {
        let mut out = Vec::new();
        let mut a = PageWriter::new(0xA);
        let mut b = PageWriter::new(0xB);
        a.write_packet(&mut out, b"a-head", 0).unwrap();
        a.flush_page(&mut out).unwrap();
        b.write_packet(&mut out, b"b-head", 0).unwrap();
        b.flush_page(&mut out).unwrap();
        a.write_packet(&mut out, b"a-1", 10).unwrap();
        a.finish(&mut out).unwrap();
        b.write_packet(&mut out, b"b-1", 20).unwrap();
        b.finish(&mut out).unwrap();

        let mut c = PageWriter::new(0xC);
        c.write_packet(&mut out, b"c-head", 0).unwrap();
        c.finish(&mut out).unwrap();
        out
    }

    #[test]
    fn test_初始化发现并行的流() {
        let mut reader = OggContainerReader::from_bytes(multiplexed());
        assert!(reader.init().unwrap());
        assert_eq!(reader.stream_serials(), vec![0xA, 0xB]);
        let streams = reader.take_new_streams();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[0].stream_serial(), 0xA);
        assert!(reader.take_new_streams().is_empty());
    }

    #[test]
    fn test_查找链接的下一个流() {
        let mut reader = OggContainerReader::from_bytes(multiplexed());
        reader.init().unwrap();
        let mut streams = reader.take_new_streams();
        let a = &mut streams[0];
        assert_eq!(&a.next_packet().unwrap().unwrap().data()[..], b"a-head");
        assert_eq!(&a.next_packet().unwrap().unwrap().data()[..], b"a-1");
        assert!(a.next_packet().unwrap().is_none());

        assert!(reader.find_next_stream().unwrap());
        let next = reader.take_new_streams();
        assert_eq!(next[0].stream_serial(), 0xC);
        assert!(!reader.find_next_stream().unwrap());
        assert_eq!(reader.total_page_count().unwrap(), 5);
    }

    #[test]
    fn test_忽略流() {
        let mut reader = OggContainerReader::from_bytes(multiplexed());
        reader.init().unwrap();
        reader.ignore_stream(0xB);
        assert_eq!(reader.stream_serials(), vec![0xA]);
        let streams = reader.take_new_streams();
        assert_eq!(streams.len(), 1);
    }

    #[test]
    fn test_非ogg数据() {
        let mut reader = OggContainerReader::from_bytes(vec![0u8; 100]);
        assert!(!reader.init().unwrap());
        assert_eq!(reader.pages_read(), 0);
    }

    #[test]
    fn test_顺序来源() {
        let data = multiplexed();
        let mut reader = OggContainerReader::from_reader(std::io::Cursor::new(data));
        assert!(reader.init().unwrap());
        assert!(!reader.can_seek());
        let mut streams = reader.take_new_streams();
        assert!(!streams[1].can_seek());
        assert_eq!(&streams[1].next_packet().unwrap().unwrap().data()[..], b"b-head");
    }
}
