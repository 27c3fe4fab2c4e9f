//! floor 1: 分段折线包络.
//!
//! X 坐标表与每个点的低/高邻点、排序顺序在 setup 时预先算好;
//! 解包只读取各点的 Y 增量, 合成时按预测值还原 Y 并用 Bresenham 画线.

use log::debug;
use sheng_core::{DataPacket, ShengError, ShengResult};

use super::FloorData;
use crate::codebook::Codebook;

const RANGE_LOOKUP: [i32; 4] = [256, 128, 86, 64];
const Y_BITS_LOOKUP: [usize; 4] = [8, 7, 7, 6];

/// X 坐标数量上限
const MAX_POSTS: usize = 65;

#[derive(Debug, Clone)]
struct FloorClass {
    dimensions: usize,
    subclasses: usize,
    master_book: Option<usize>,
    /// 长度 `1 << subclasses`, `None` 表示该子类的点不编码
    subclass_books: Vec<Option<usize>>,
}

#[derive(Debug, Clone)]
pub struct Floor1 {
    partition_classes: Vec<usize>,
    classes: Vec<FloorClass>,
    multiplier: i32,
    range: i32,
    y_bits: usize,
    x_list: Vec<i32>,
    low_neighbor: Vec<usize>,
    high_neighbor: Vec<usize>,
    /// 按 X 升序排列的点序号
    sort_order: Vec<usize>,
}

impl Floor1 {
    pub(super) fn read(packet: &mut DataPacket, books: &[Codebook], index: usize) -> ShengResult<Self> {
        let book_ref = |num: usize| -> ShengResult<usize> {
            if num < books.len() {
                Ok(num)
            } else {
                Err(ShengError::InvalidData(format!(
                    "Vorbis floor1 {} 码本索引越界: {}",
                    index, num,
                )))
            }
        };

        let partitions = packet.read_bits(5)? as usize;
        let mut partition_classes = Vec::with_capacity(partitions);
        for _ in 0..partitions {
            partition_classes.push(packet.read_bits(4)? as usize);
        }

        let class_count = partition_classes.iter().max().map_or(0, |&max| max + 1);
        let mut classes = Vec::with_capacity(class_count);
        for _ in 0..class_count {
            let dimensions = packet.read_bits(3)? as usize + 1;
            let subclasses = packet.read_bits(2)? as usize;
            let master_book = if subclasses > 0 {
                Some(book_ref(packet.read_bits(8)? as usize)?)
            } else {
                None
            };
            let mut subclass_books = Vec::with_capacity(1 << subclasses);
            for _ in 0..(1usize << subclasses) {
                let num = packet.read_bits(8)? as usize;
                subclass_books.push(match num {
                    0 => None,
                    n => Some(book_ref(n - 1)?),
                });
            }
            classes.push(FloorClass {
                dimensions,
                subclasses,
                master_book,
                subclass_books,
            });
        }

        let multiplier_code = packet.read_bits(2)? as usize;
        let range_bits = packet.read_bits(4)? as usize;

        let mut x_list = vec![0i32, 1 << range_bits];
        for &class in &partition_classes {
            for _ in 0..classes[class].dimensions {
                x_list.push(packet.read_bits(range_bits)? as i32);
            }
        }
        if x_list.len() > MAX_POSTS {
            return Err(ShengError::InvalidData(format!(
                "Vorbis floor1 {} 点数过多: {}",
                index,
                x_list.len(),
            )));
        }

        let (low_neighbor, high_neighbor) = compute_neighbors(&x_list);
        let mut sort_order: Vec<usize> = (0..x_list.len()).collect();
        sort_order.sort_by_key(|&i| x_list[i]);
        if sort_order.windows(2).any(|w| x_list[w[0]] == x_list[w[1]]) {
            return Err(ShengError::InvalidData(format!(
                "Vorbis floor1 {} X 坐标重复",
                index,
            )));
        }

        Ok(Self {
            partition_classes,
            classes,
            multiplier: multiplier_code as i32 + 1,
            range: RANGE_LOOKUP[multiplier_code],
            y_bits: Y_BITS_LOOKUP[multiplier_code],
            x_list,
            low_neighbor,
            high_neighbor,
            sort_order,
        })
    }

    pub(super) fn unpack(&self, packet: &mut DataPacket, books: &[Codebook], data: &mut FloorData) {
        data.posts.clear();
        data.posts.resize(self.x_list.len(), 0);

        if !matches!(packet.read_bit(), Ok(true)) {
            return;
        }
        let (Ok(y0), Ok(y1)) = (packet.read_bits(self.y_bits), packet.read_bits(self.y_bits)) else {
            return;
        };
        data.posts[0] = y0 as i32;
        data.posts[1] = y1 as i32;

        let mut post = 2usize;
        for &class_num in &self.partition_classes {
            let class = &self.classes[class_num];
            let csub = (1usize << class.subclasses) - 1;
            let mut cval = 0usize;
            if let Some(master) = class.master_book {
                match books[master].decode_scalar(packet) {
                    Some(value) => cval = value,
                    None => {
                        debug!("Vorbis floor1 主码本解码失败");
                        return;
                    }
                }
            }
            for _ in 0..class.dimensions {
                let book = class.subclass_books[cval & csub];
                cval >>= class.subclasses;
                if let Some(book) = book {
                    match books[book].decode_scalar(packet) {
                        Some(value) => data.posts[post] = value as i32,
                        None => return,
                    }
                }
                post += 1;
            }
        }

        if packet.is_short() {
            return;
        }
        data.post_count = post;
    }

    pub(super) fn apply(&self, data: &mut FloorData, residue: &mut [f32]) {
        let n = (data.block_size / 2).min(residue.len());
        if data.post_count == 0 {
            residue[..n].fill(0.0);
            return;
        }

        let step_flags = self.unwrap_posts(data);
        let posts = &data.posts;

        let n = n as i32;
        let mut lx = 0i32;
        let mut ly = posts[0] * self.multiplier;
        for &idx in self.sort_order.iter().take(data.post_count).skip(1) {
            if step_flags[idx] {
                let hx = self.x_list[idx];
                let hy = posts[idx] * self.multiplier;
                if lx < n {
                    render_line(lx, ly, hx.min(n), hy, residue);
                }
                lx = hx;
                ly = hy;
            }
            if lx >= n {
                break;
            }
        }
        if lx < n {
            render_line(lx, ly, n, ly, residue);
        }
    }

    /// 由预测值和增量还原各点的绝对 Y, 返回哪些点参与画线
    fn unwrap_posts(&self, data: &mut FloorData) -> [bool; MAX_POSTS] {
        let mut step_flags = [false; MAX_POSTS];
        step_flags[0] = true;
        step_flags[1] = true;

        let mut final_y = [0i32; MAX_POSTS];
        final_y[0] = data.posts[0];
        final_y[1] = data.posts[1];

        for i in 2..data.post_count {
            let low = self.low_neighbor[i];
            let high = self.high_neighbor[i];
            let predicted = render_point(
                self.x_list[low],
                final_y[low],
                self.x_list[high],
                final_y[high],
                self.x_list[i],
            );

            let val = data.posts[i];
            let high_room = self.range - predicted;
            let low_room = predicted;
            let room = 2 * high_room.min(low_room);

            if val != 0 {
                step_flags[low] = true;
                step_flags[high] = true;
                step_flags[i] = true;
                final_y[i] = if val >= room {
                    if high_room > low_room {
                        val - low_room + predicted
                    } else {
                        predicted - val + high_room - 1
                    }
                } else if val % 2 == 1 {
                    predicted - (val + 1) / 2
                } else {
                    predicted + val / 2
                };
            } else {
                final_y[i] = predicted;
            }
        }

        for (post, &y) in data.posts.iter_mut().zip(final_y.iter()).take(data.post_count) {
            *post = y.clamp(0, self.range - 1);
        }
        step_flags
    }
}

/// 每个点 (从第 3 个起) 在它之前的点里 X 最接近的低/高邻点
fn compute_neighbors(x_list: &[i32]) -> (Vec<usize>, Vec<usize>) {
    let mut low = vec![0usize; x_list.len()];
    let mut high = vec![1usize; x_list.len()];
    for i in 2..x_list.len() {
        let x = x_list[i];
        for j in 2..i {
            let candidate = x_list[j];
            if candidate < x {
                if candidate > x_list[low[i]] {
                    low[i] = j;
                }
            } else if candidate < x_list[high[i]] {
                high[i] = j;
            }
        }
    }
    (low, high)
}

fn render_point(x0: i32, y0: i32, x1: i32, y1: i32, x: i32) -> i32 {
    let dy = y1 - y0;
    let adx = x1 - x0;
    if adx == 0 {
        return y0;
    }
    let off = dy.abs() * (x - x0) / adx;
    if dy < 0 { y0 - off } else { y0 + off }
}

/// 在 `[x0, x1)` 上按折线乘以 dB 反变换值
fn render_line(x0: i32, y0: i32, x1: i32, y1: i32, v: &mut [f32]) {
    if x1 <= x0 {
        return;
    }
    let dy = y1 - y0;
    let adx = x1 - x0;
    let base = dy / adx;
    let sy = if dy < 0 { -1 } else { 1 };
    let ady = dy.abs() - base.abs() * adx;

    let mut y = y0;
    let mut err = -adx;
    v[x0 as usize] *= inverse_db(y);
    for x in (x0 + 1)..x1 {
        y += base;
        err += ady;
        if err >= 0 {
            err -= adx;
            y += sy;
        }
        v[x as usize] *= inverse_db(y);
    }
}

fn inverse_db(y: i32) -> f32 {
    INVERSE_DB_TABLE[y.clamp(0, 255) as usize]
}

#[allow(clippy::excessive_precision)]
static INVERSE_DB_TABLE: [f32; 256] = [
    1.0649863e-07, 1.1341951e-07, 1.2079015e-07, 1.2863978e-07, 1.3699951e-07, 1.4590251e-07,
    1.5538408e-07, 1.6548181e-07, 1.7623575e-07, 1.8768855e-07, 1.9988561e-07, 2.1287530e-07,
    2.2670913e-07, 2.4144197e-07, 2.5713223e-07, 2.7384213e-07, 2.9163793e-07, 3.1059021e-07,
    3.3077411e-07, 3.5226968e-07, 3.7516214e-07, 3.9954229e-07, 4.2550680e-07, 4.5315863e-07,
    4.8260743e-07, 5.1396998e-07, 5.4737065e-07, 5.8294187e-07, 6.2082472e-07, 6.6116941e-07,
    7.0413592e-07, 7.4989464e-07, 7.9862701e-07, 8.5052630e-07, 9.0579828e-07, 9.6466216e-07,
    1.0273513e-06, 1.0941144e-06, 1.1652161e-06, 1.2409384e-06, 1.3215816e-06, 1.4074654e-06,
    1.4989305e-06, 1.5963394e-06, 1.7000785e-06, 1.8105592e-06, 1.9282195e-06, 2.0535261e-06,
    2.1869758e-06, 2.3290978e-06, 2.4804557e-06, 2.6416497e-06, 2.8133190e-06, 2.9961443e-06,
    3.1908506e-06, 3.3982101e-06, 3.6190449e-06, 3.8542308e-06, 4.1047004e-06, 4.3714470e-06,
    4.6555282e-06, 4.9580707e-06, 5.2802740e-06, 5.6234160e-06, 5.9888572e-06, 6.3780469e-06,
    6.7925283e-06, 7.2339451e-06, 7.7040476e-06, 8.2047000e-06, 8.7378876e-06, 9.3057248e-06,
    9.9104632e-06, 1.0554501e-05, 1.1240392e-05, 1.1970856e-05, 1.2748789e-05, 1.3577278e-05,
    1.4459606e-05, 1.5399272e-05, 1.6400004e-05, 1.7465768e-05, 1.8600792e-05, 1.9809576e-05,
    2.1096914e-05, 2.2467911e-05, 2.3928002e-05, 2.5482978e-05, 2.7139006e-05, 2.8902651e-05,
    3.0780908e-05, 3.2781225e-05, 3.4911534e-05, 3.7180282e-05, 3.9596466e-05, 4.2169667e-05,
    4.4910090e-05, 4.7828601e-05, 5.0936773e-05, 5.4246931e-05, 5.7772202e-05, 6.1526565e-05,
    6.5524908e-05, 6.9783085e-05, 7.4317983e-05, 7.9147585e-05, 8.4291040e-05, 8.9768747e-05,
    9.5602426e-05, 1.0181521e-04, 1.0843174e-04, 1.1547824e-04, 1.2298267e-04, 1.3097477e-04,
    1.3948625e-04, 1.4855085e-04, 1.5820453e-04, 1.6848555e-04, 1.7943469e-04, 1.9109536e-04,
    2.0351382e-04, 2.1673929e-04, 2.3082423e-04, 2.4582449e-04, 2.6179955e-04, 2.7881275e-04,
    2.9693158e-04, 3.1622787e-04, 3.3677814e-04, 3.5866388e-04, 3.8197188e-04, 4.0679456e-04,
    4.3323036e-04, 4.6138411e-04, 4.9136745e-04, 5.2329927e-04, 5.5730621e-04, 5.9352311e-04,
    6.3209358e-04, 6.7317058e-04, 7.1691700e-04, 7.6350630e-04, 8.1312324e-04, 8.6596457e-04,
    9.2223983e-04, 9.8217216e-04, 1.0459992e-03, 1.1139742e-03, 1.1863665e-03, 1.2634633e-03,
    1.3455702e-03, 1.4330129e-03, 1.5261382e-03, 1.6253153e-03, 1.7309374e-03, 1.8434235e-03,
    1.9632195e-03, 2.0908006e-03, 2.2266726e-03, 2.3713743e-03, 2.5254795e-03, 2.6895994e-03,
    2.8643847e-03, 3.0505286e-03, 3.2487691e-03, 3.4598925e-03, 3.6847358e-03, 3.9241906e-03,
    4.1792066e-03, 4.4507950e-03, 4.7400328e-03, 5.0480668e-03, 5.3761186e-03, 5.7254891e-03,
    6.0975636e-03, 6.4938176e-03, 6.9158225e-03, 7.3652516e-03, 7.8438871e-03, 8.3536271e-03,
    8.8964928e-03, 9.4746370e-03, 1.0090352e-02, 1.0746080e-02, 1.1444421e-02, 1.2188144e-02,
    1.2980198e-02, 1.3823725e-02, 1.4722068e-02, 1.5678791e-02, 1.6697687e-02, 1.7782797e-02,
    1.8938423e-02, 2.0169149e-02, 2.1479854e-02, 2.2875735e-02, 2.4362330e-02, 2.5945531e-02,
    2.7631618e-02, 2.9427276e-02, 3.1339626e-02, 3.3376252e-02, 3.5545228e-02, 3.7855157e-02,
    4.0315199e-02, 4.2935108e-02, 4.5725273e-02, 4.8696758e-02, 5.1861348e-02, 5.5231591e-02,
    5.8820850e-02, 6.2643361e-02, 6.6714279e-02, 7.1049749e-02, 7.5666962e-02, 8.0584227e-02,
    8.5821044e-02, 9.1398179e-02, 9.7337747e-02, 1.0366330e-01, 1.1039993e-01, 1.1757434e-01,
    1.2521498e-01, 1.3335215e-01, 1.4201813e-01, 1.5124727e-01, 1.6107617e-01, 1.7154380e-01,
    1.8269168e-01, 1.9456402e-01, 2.0720788e-01, 2.2067342e-01, 2.3501402e-01, 2.5028656e-01,
    2.6655159e-01, 2.8387361e-01, 3.0232132e-01, 3.2196786e-01, 3.4289114e-01, 3.6517414e-01,
    3.8890521e-01, 4.1417847e-01, 4.4109412e-01, 4.6975890e-01, 5.0028648e-01, 5.3279791e-01,
    5.6742212e-01, 6.0429640e-01, 6.4356699e-01, 6.8538959e-01, 7.2993007e-01, 7.7736504e-01,
    8.2788260e-01, 8.8168307e-01, 9.3897980e-01, 1.0,
];

#[cfg(test)]
mod tests {
    use super::*;
    use sheng_core::bitwriter::BitWriter;

    /// 一个分区、类 0 三个无码本的点, X = [0, 128, 64, 32, 96]
    fn simple_floor(multiplier_code: u64) -> Floor1 {
        let mut bw = BitWriter::new();
        bw.write_bits(1, 5);
        bw.write_bits(0, 4);
        bw.write_bits(2, 3);
        bw.write_bits(0, 2);
        bw.write_bits(0, 8);
        bw.write_bits(multiplier_code, 2);
        bw.write_bits(7, 4);
        for x in [64u64, 32, 96] {
            bw.write_bits(x, 7);
        }
        Floor1::read(&mut DataPacket::new(bw.finish()), &[], 0).unwrap()
    }

    fn unpack_posts(floor: &Floor1, y0: u64, y1: u64) -> FloorData {
        let mut bw = BitWriter::new();
        bw.write_bit(true);
        bw.write_bits(y0, floor.y_bits as u32);
        bw.write_bits(y1, floor.y_bits as u32);
        let mut data = FloorData::new();
        data.reset(256);
        floor.unpack(&mut DataPacket::new(bw.finish()), &[], &mut data);
        data
    }

    #[test]
    fn test_floor1_邻点与排序() {
        let floor = simple_floor(0);
        assert_eq!(floor.x_list, vec![0, 128, 64, 32, 96]);
        assert_eq!(floor.low_neighbor[2..], [0, 0, 2]);
        assert_eq!(floor.high_neighbor[2..], [1, 2, 1]);
        assert_eq!(floor.sort_order, vec![0, 3, 2, 4, 1]);
    }

    #[test]
    fn test_floor1_x坐标重复报错() {
        let mut bw = BitWriter::new();
        bw.write_bits(1, 5);
        bw.write_bits(0, 4);
        bw.write_bits(1, 3);
        bw.write_bits(0, 2);
        bw.write_bits(0, 8);
        bw.write_bits(0, 2);
        bw.write_bits(7, 4);
        bw.write_bits(40, 7);
        bw.write_bits(40, 7);
        assert!(matches!(
            Floor1::read(&mut DataPacket::new(bw.finish()), &[], 0),
            Err(ShengError::InvalidData(_))
        ));
    }

    #[test]
    fn test_floor1_无能量清空残差() {
        let floor = simple_floor(0);
        let mut data = FloorData::new();
        data.reset(256);
        floor.unpack(&mut DataPacket::new(vec![0u8]), &[], &mut data);
        assert!(!data.has_energy());
        let mut residue = vec![1.0f32; 128];
        floor.apply(&mut data, &mut residue);
        assert!(residue.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_floor1_水平线() {
        let floor = simple_floor(0);
        let mut data = unpack_posts(&floor, 200, 200);
        assert_eq!(data.post_count, 5);
        let mut residue = vec![1.0f32; 128];
        floor.apply(&mut data, &mut residue);
        for v in residue {
            assert_eq!(v, INVERSE_DB_TABLE[200], "水平折线应是常数包络");
        }
    }

    #[test]
    fn test_floor1_斜线单调() {
        // multiplier 2: Y 范围 128, 乘 2 后索引 0..254
        let floor = simple_floor(1);
        let mut data = unpack_posts(&floor, 10, 120);
        let mut residue = vec![1.0f32; 128];
        floor.apply(&mut data, &mut residue);
        assert_eq!(residue[0], INVERSE_DB_TABLE[20]);
        assert!(residue.windows(2).all(|w| w[0] <= w[1]), "上升折线应单调");
    }

    #[test]
    fn test_floor1_预测与还原() {
        let floor = simple_floor(0);
        let mut data = FloorData::new();
        data.reset(256);
        data.posts = vec![0, 100, 7, 0, 0];
        data.post_count = 5;
        let flags = floor.unwrap_posts(&mut data);
        // 点 2 预测 50, 奇数增量 7 -> 50 - 4
        assert_eq!(data.posts[2], 46);
        assert!(flags[2] && flags[0] && flags[1]);
        // 点 3 (x=32) 在 0..46 之间插值, 增量为 0 不参与画线
        assert_eq!(data.posts[3], 23);
        assert!(!flags[3]);
        assert_eq!(data.posts[4], 73);
    }

    #[test]
    fn test_render_point() {
        assert_eq!(render_point(0, 0, 128, 100, 64), 50);
        assert_eq!(render_point(0, 100, 128, 0, 32), 75);
        assert_eq!(render_point(10, 5, 10, 9, 10), 5);
    }
}
