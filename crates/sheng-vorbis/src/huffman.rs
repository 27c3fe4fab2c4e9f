//! 规范 Huffman 码字的前缀查表解码.
//!
//! 码长不超过 `table_bits` 的码字在查找表中按所有位扩展复制一份, 更长的码字
//! 按 (码长, 码字) 排序后组成溢出链, 查表未命中时线性匹配.

use sheng_core::DataPacket;

/// 查找表最多使用的位数
const MAX_TABLE_BITS: usize = 10;

#[derive(Debug, Clone, Copy)]
struct HuffmanNode {
    value: u32,
    length: usize,
    /// 已按读取顺序 (位反转) 存放的码字
    bits: u64,
    mask: u64,
}

/// 前缀查找表
#[derive(Debug, Clone)]
pub(crate) struct HuffmanTable {
    table_bits: usize,
    max_bits: usize,
    prefix: Vec<Option<u32>>,
    nodes: Vec<HuffmanNode>,
    /// `nodes[overflow_start..]` 为溢出链
    overflow_start: usize,
}

impl HuffmanTable {
    /// 由 (值, 码长, 码字) 三元组构建, 码长为 0 的条目不参与
    pub(crate) fn build(values: &[u32], lengths: &[u8], codes: &[u32]) -> Self {
        let mut nodes: Vec<HuffmanNode> = values
            .iter()
            .zip(lengths)
            .zip(codes)
            .filter(|&((_, &len), _)| len > 0)
            .map(|((&value, &len), &code)| HuffmanNode {
                value,
                length: len as usize,
                bits: u64::from(code),
                mask: (1u64 << len) - 1,
            })
            .collect();
        nodes.sort_by(|a, b| a.length.cmp(&b.length).then(a.bits.cmp(&b.bits)));

        let max_bits = nodes.last().map_or(0, |n| n.length);
        let table_bits = max_bits.min(MAX_TABLE_BITS);

        let mut prefix = vec![None; 1 << table_bits];
        let mut overflow_start = nodes.len();
        for (i, node) in nodes.iter().enumerate() {
            if node.length > table_bits {
                overflow_start = i;
                break;
            }
            for j in 0..1usize << (table_bits - node.length) {
                let idx = (j << node.length) | node.bits as usize;
                prefix[idx] = Some(i as u32);
            }
        }

        Self {
            table_bits,
            max_bits,
            prefix,
            nodes,
            overflow_start,
        }
    }

    /// 码字最长位数
    pub(crate) fn max_bits(&self) -> usize {
        self.max_bits
    }

    /// 解码一个符号, 无匹配或没有剩余位时返回 `None`
    pub(crate) fn decode(&self, packet: &mut DataPacket) -> Option<u32> {
        let (bits, available) = packet.try_peek_bits(self.table_bits).ok()?;
        if available == 0 {
            return None;
        }

        if let Some(idx) = self.prefix.get(bits as usize).copied().flatten() {
            let node = &self.nodes[idx as usize];
            packet.skip_bits(node.length);
            return Some(node.value);
        }

        let (bits, _) = packet.try_peek_bits(self.max_bits).ok()?;
        let node = self.nodes[self.overflow_start..]
            .iter()
            .find(|node| bits & node.mask == node.bits)?;
        packet.skip_bits(node.length);
        Some(node.value)
    }
}
