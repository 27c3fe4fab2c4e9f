//! 交织 PCM 的环形重叠相加缓冲区.
//!
//! 每个解码块按窗加权后写入: `[left, center)` 与已有数据相加 (重叠区),
//! `[center, right)` 直接覆盖. 读取端从逻辑起点按 FIFO 取走样本.

use sheng_core::{ShengError, ShengResult};

/// 一个块在缓冲区中的写入范围 (块内样本下标)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlapSpan {
    pub left: usize,
    /// 重叠区结束, 之后覆盖写入
    pub center: usize,
    pub right: usize,
}

#[derive(Debug, Clone)]
pub struct RingBuffer {
    buffer: Vec<f32>,
    channels: usize,
    start: usize,
    /// 有效样本数 (所有声道合计)
    len: usize,
}

impl RingBuffer {
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(channels)],
            channels: channels.max(1),
            start: 0,
            len: 0,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// 有效样本数 (所有声道合计)
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 有效帧数
    pub fn frames(&self) -> usize {
        self.len / self.channels
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// 保证容量至少为 `size` 个样本, 扩容时保持逻辑顺序
    pub fn ensure_size(&mut self, size: usize) {
        if size <= self.buffer.len() {
            return;
        }
        let mut grown = Vec::with_capacity(size);
        let (head, tail) = self.as_slices();
        grown.extend_from_slice(head);
        grown.extend_from_slice(tail);
        grown.resize(size, 0.0);
        self.buffer = grown;
        self.start = 0;
    }

    /// 逻辑上的有效数据, 回绕时分成两段
    pub fn as_slices(&self) -> (&[f32], &[f32]) {
        let cap = self.buffer.len();
        let first = self.len.min(cap - self.start);
        (
            &self.buffer[self.start..self.start + first],
            &self.buffer[..self.len - first],
        )
    }

    fn physical(&self, pos: usize) -> usize {
        let idx = self.start + pos;
        if idx >= self.buffer.len() {
            idx - self.buffer.len()
        } else {
            idx
        }
    }

    /// 把一个声道的块写到以帧 `frame` 为块起点的位置.
    ///
    /// 块起点在缓冲区之前 (流的第一个块) 时, 从帧 0 开始写, 丢弃块的前半部分.
    /// 写入后有效长度截止到该块的 `right`.
    pub fn write(
        &mut self,
        channel: usize,
        frame: isize,
        span: OverlapSpan,
        pcm: &[f32],
        window: &[f32],
    ) {
        let mut start = span.left;
        let mut frame_pos = frame + span.left as isize;
        if frame_pos < 0 {
            start = (span.left as isize - frame) as usize;
            frame_pos = 0;
        }
        let mut pos = frame_pos as usize * self.channels + channel;
        let last_frame = frame_pos as usize + span.right.saturating_sub(start);
        let new_len = last_frame * self.channels;
        self.ensure_size(new_len);

        // 新增区域先清零, 各声道的重叠相加都基于 0
        for p in self.len..new_len {
            let idx = self.physical(p);
            self.buffer[idx] = 0.0;
        }
        self.len = new_len;

        for s in start..span.right {
            let idx = self.physical(pos);
            let value = pcm[s] * window[s];
            if s < span.center {
                self.buffer[idx] += value;
            } else {
                self.buffer[idx] = value;
            }
            pos += self.channels;
        }
    }

    /// 从头部移除 `count` 个样本
    pub fn remove_items(&mut self, count: usize) -> ShengResult<()> {
        if count > self.len {
            return Err(ShengError::InvalidArgument(format!(
                "环形缓冲区只有 {} 个样本, 无法移除 {}",
                self.len, count,
            )));
        }
        self.start = self.physical(count);
        self.len -= count;
        if self.len == 0 {
            self.start = 0;
        }
        Ok(())
    }

    /// 取走头部 `dest.len()` 个样本
    pub fn copy_to(&mut self, dest: &mut [f32]) -> ShengResult<()> {
        let count = dest.len();
        if count > self.len {
            return Err(ShengError::InvalidArgument(format!(
                "环形缓冲区只有 {} 个样本, 请求 {}",
                self.len, count,
            )));
        }
        let (head, tail) = self.as_slices();
        let first = count.min(head.len());
        dest[..first].copy_from_slice(&head[..first]);
        dest[first..].copy_from_slice(&tail[..count - first]);
        self.remove_items(count)
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.len = 0;
    }
}
