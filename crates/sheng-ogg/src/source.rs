//! 页面读取的字节来源.
//!
//! [`PageSource`] 在后端之上提供读缓冲、位置跟踪和回退 (unread),
//! 页面同步失败时把已读出的字节退回, 不可随机访问的来源也能继续扫描.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use sheng_core::{ShengError, ShengResult};

/// 默认缓冲区大小 (32 KB)
const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// 字节来源后端
pub trait SourceBackend: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// 定位到绝对位置; 不可随机访问的后端返回错误
    fn seek(&mut self, pos: u64) -> io::Result<u64>;

    /// 总大小 (如果可知)
    fn size(&self) -> Option<u64>;

    fn is_seekable(&self) -> bool;
}

/// 带缓冲的页面字节来源
pub struct PageSource {
    inner: Box<dyn SourceBackend>,
    buffer: Vec<u8>,
    buf_len: usize,
    buf_pos: usize,
    /// 退回的字节, 末尾先读
    pushback: Vec<u8>,
    /// 下一个待读字节的绝对位置
    position: u64,
}

impl PageSource {
    pub fn new(backend: Box<dyn SourceBackend>) -> Self {
        Self {
            inner: backend,
            buffer: vec![0u8; DEFAULT_BUFFER_SIZE],
            buf_len: 0,
            buf_pos: 0,
            pushback: Vec::new(),
            position: 0,
        }
    }

    pub fn open(path: impl AsRef<Path>) -> ShengResult<Self> {
        let file = File::open(path)?;
        Ok(Self::new(Box::new(FileBackend::new(file))))
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::new(Box::new(MemoryBackend::new(data.into())))
    }

    /// 从只能顺序读取的来源创建, 不支持随机访问
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self::new(Box::new(StreamBackend { reader }))
    }

    /// 读取指定字节数, 数据不足时返回 `Eof`
    pub fn read_exact(&mut self, buf: &mut [u8]) -> ShengResult<()> {
        let mut total = 0;
        while total < buf.len() {
            if let Some(byte) = self.pushback.pop() {
                buf[total] = byte;
                total += 1;
                self.position += 1;
                continue;
            }
            let buffered = self.buf_len - self.buf_pos;
            if buffered > 0 {
                let count = buffered.min(buf.len() - total);
                buf[total..total + count]
                    .copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + count]);
                self.buf_pos += count;
                self.position += count as u64;
                total += count;
            } else {
                self.buf_pos = 0;
                self.buf_len = self.inner.read(&mut self.buffer)?;
                if self.buf_len == 0 {
                    return Err(ShengError::Eof);
                }
            }
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> ShengResult<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_bytes(&mut self, count: usize) -> ShengResult<Vec<u8>> {
        let mut buf = vec![0u8; count];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// 读取最多 `count` 个字节, 来源结束时返回已读到的部分
    pub fn read_available(&mut self, count: usize) -> ShengResult<Vec<u8>> {
        let mut out = Vec::with_capacity(count.min(DEFAULT_BUFFER_SIZE));
        let mut byte = [0u8; 1];
        while out.len() < count {
            if self.pushback.is_empty() && self.buf_pos < self.buf_len {
                let take = (self.buf_len - self.buf_pos).min(count - out.len());
                out.extend_from_slice(&self.buffer[self.buf_pos..self.buf_pos + take]);
                self.buf_pos += take;
                self.position += take as u64;
                continue;
            }
            match self.read_exact(&mut byte) {
                Ok(()) => out.push(byte[0]),
                Err(ShengError::Eof) => break,
                Err(err) => return Err(err),
            }
        }
        Ok(out)
    }

    /// 退回已读出的字节, 下一次读取先得到 `data[0]`
    pub fn unread(&mut self, data: &[u8]) {
        self.pushback.extend(data.iter().rev());
        self.position -= data.len() as u64;
    }

    /// 定位到绝对位置, 清空读缓冲区与回退字节
    pub fn seek(&mut self, pos: u64) -> ShengResult<()> {
        if pos == self.position {
            return Ok(());
        }
        if !self.inner.is_seekable() {
            return Err(ShengError::Unsupported("数据来源不支持随机访问".into()));
        }
        self.buf_pos = 0;
        self.buf_len = 0;
        self.pushback.clear();
        self.position = self.inner.seek(pos)?;
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    pub fn size(&self) -> Option<u64> {
        self.inner.size()
    }
}

/// 文件后端
struct FileBackend {
    file: File,
    size: Option<u64>,
}

impl FileBackend {
    fn new(file: File) -> Self {
        let size = file.metadata().ok().map(|m| m.len());
        Self { file, size }
    }
}

impl SourceBackend for FileBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn seek(&mut self, pos: u64) -> io::Result<u64> {
        self.file.seek(SeekFrom::Start(pos))
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// 内存后端, 用于测试和已整体载入的数据
struct MemoryBackend {
    data: Bytes,
    pos: usize,
}

impl MemoryBackend {
    fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }
}

impl SourceBackend for MemoryBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.data.len().saturating_sub(self.pos);
        let count = buf.len().min(available);
        buf[..count].copy_from_slice(&self.data[self.pos..self.pos + count]);
        self.pos += count;
        Ok(count)
    }

    fn seek(&mut self, pos: u64) -> io::Result<u64> {
        self.pos = usize::try_from(pos)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "定位位置超出地址范围"))?;
        Ok(pos)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// 顺序读取后端 (管道、网络流)
struct StreamBackend<R> {
    reader: R,
}

impl<R: Read + Send> SourceBackend for StreamBackend<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }

    fn seek(&mut self, _pos: u64) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "顺序来源不支持定位"))
    }

    fn size(&self) -> Option<u64> {
        None
    }

    fn is_seekable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_读取与位置() {
        let mut src = PageSource::from_bytes(vec![1u8, 2, 3, 4, 5]);
        assert_eq!(src.read_bytes(2).unwrap(), vec![1, 2]);
        assert_eq!(src.position(), 2);
        assert!(src.is_seekable());
        assert_eq!(src.size(), Some(5));
        assert!(matches!(src.read_bytes(4), Err(ShengError::Eof)));
    }

    #[test]
    fn test_退回字节() {
        let mut src = PageSource::from_reader(io::Cursor::new(vec![1u8, 2, 3, 4]));
        let head = src.read_bytes(3).unwrap();
        src.unread(&head[1..]);
        assert_eq!(src.position(), 1);
        assert_eq!(src.read_bytes(3).unwrap(), vec![2, 3, 4]);
        assert_eq!(src.position(), 4);
    }

    #[test]
    fn test_读取可用部分() {
        let mut src = PageSource::from_bytes(vec![1u8, 2, 3]);
        src.read_u8().unwrap();
        src.unread(&[1]);
        assert_eq!(src.read_available(10).unwrap(), vec![1, 2, 3]);
        assert_eq!(src.position(), 3);
        assert!(src.read_available(4).unwrap().is_empty());
    }

    #[test]
    fn test_顺序来源不能定位() {
        let mut src = PageSource::from_reader(io::Cursor::new(vec![0u8; 8]));
        assert!(!src.is_seekable());
        src.read_u8().unwrap();
        assert!(src.seek(0).is_err());
        // 定位到当前位置不需要后端支持
        assert!(src.seek(1).is_ok());
    }

    #[test]
    fn test_定位清空回退() {
        let mut src = PageSource::from_bytes(vec![9u8, 8, 7, 6]);
        let head = src.read_bytes(2).unwrap();
        src.unread(&head);
        src.seek(3).unwrap();
        assert_eq!(src.read_u8().unwrap(), 6);
    }
}
