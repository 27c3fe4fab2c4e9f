//! 容器与解码器之间的接口.
//!
//! 容器读取器为每个逻辑流提供一个 [`PacketProvider`], 流解码器只通过这个
//! trait 拉取数据包、查找粒度位置和回写包的采样信息.

use crate::ShengResult;
use crate::packet::DataPacket;

/// 计算 `(当前包, 前一个包)` 之间产出采样数的回调, 用于查找时回填粒度
pub type PacketLengthFn<'a> = dyn FnMut(&mut DataPacket, &mut DataPacket) -> i64 + 'a;

/// 单个逻辑流的数据包来源
pub trait PacketProvider: Send {
    /// 逻辑流序列号
    fn stream_serial(&self) -> u32;

    /// 是否支持随机访问 (`get_packet` / `find_packet` / `seek_to_packet`)
    fn can_seek(&self) -> bool;

    /// 容器结构 (页头等) 占用的位数
    fn container_bits(&self) -> u64;

    /// 逻辑流的总页数, 需要读完整个流
    fn total_page_count(&mut self) -> ShengResult<usize>;

    /// 取下一个包并前移游标, 流结束时返回 `None`
    fn next_packet(&mut self) -> ShengResult<Option<DataPacket>>;

    /// 预览下一个包, 不移动游标
    fn peek_next_packet(&mut self) -> ShengResult<Option<DataPacket>>;

    /// 按序号随机取包
    fn get_packet(&mut self, index: usize) -> ShengResult<DataPacket>;

    /// 流的总粒度数 (最后一页的粒度位置)
    fn granule_count(&mut self) -> ShengResult<i64>;

    /// 查找包含 `granule` 的包
    fn find_packet(
        &mut self,
        granule: i64,
        packet_length: &mut PacketLengthFn<'_>,
    ) -> ShengResult<Option<DataPacket>>;

    /// 把游标移到 `packet` 之前 `preroll` 个包, 下一次 `next_packet` 从那里开始
    fn seek_to_packet(&mut self, packet: &DataPacket, preroll: usize) -> ShengResult<()>;

    /// 解码器用完一个包: 回写其粒度位置与采样数, 容器可以释放负载
    fn packet_done(&mut self, packet: &DataPacket) -> ShengResult<()>;

    /// 回填已处理包的粒度位置 (重同步之后)
    fn set_granule_position(&mut self, index: usize, granule: i64) -> ShengResult<()>;
}

/// 物理流 (多个逻辑流复用) 的读取器
pub trait ContainerReader: Send {
    /// 读取第一页, 返回是否识别为本容器格式
    fn init(&mut self) -> ShengResult<bool>;

    /// 继续读页直到发现新的逻辑流, 返回是否找到
    fn find_next_stream(&mut self) -> ShengResult<bool>;

    /// 取走自上次调用以来新发现的逻辑流
    fn take_new_streams(&mut self) -> Vec<Box<dyn PacketProvider>>;

    /// 忽略某个逻辑流的后续页面 (例如非 Vorbis 流)
    fn ignore_stream(&mut self, serial: u32);

    fn stream_serials(&self) -> Vec<u32>;

    fn can_seek(&self) -> bool;

    /// 重同步时丢弃的位数
    fn wasted_bits(&self) -> u64;

    fn pages_read(&self) -> usize;

    /// 读完整个物理流后的总页数
    fn total_page_count(&mut self) -> ShengResult<usize>;
}
