//! 逆 MDCT.
//!
//! 分裂基蝶形算法: 预旋转 (A 表), 第 3 步多级蝶形, 位反转重排, 后旋转 (C 表)
//! 与最终的 B 表加窗输出. 每种块长的系数表只构建一次, 在进程内共享;
//! 工作缓冲区由每个解码器自己持有.
//!
//! 输出满足 `y[i] = Σ X[k]·cos(2π/n·(i + 1/2 + n/4)·(k + 1/2))`.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, OnceLock, RwLock};

use crate::util::{bit_reverse, ilog};

/// 蝶形算法适用的最小块长, 更小的块直接按定义计算
const FAST_MIN_SIZE: usize = 256;

static TABLE_CACHE: OnceLock<RwLock<HashMap<usize, Arc<MdctTables>>>> = OnceLock::new();

/// 取块长 `n` 的共享系数表
pub fn shared_tables(n: usize) -> Arc<MdctTables> {
    let cache = TABLE_CACHE.get_or_init(|| RwLock::new(HashMap::new()));
    {
        let read = cache.read().unwrap_or_else(|e| e.into_inner());
        if let Some(tables) = read.get(&n) {
            return Arc::clone(tables);
        }
    }
    let mut write = cache.write().unwrap_or_else(|e| e.into_inner());
    Arc::clone(
        write
            .entry(n)
            .or_insert_with(|| Arc::new(MdctTables::new(n))),
    )
}

/// 某一块长的不可变系数表
#[derive(Debug)]
pub struct MdctTables {
    n: usize,
    ld: usize,
    a: Vec<f32>,
    b: Vec<f32>,
    c: Vec<f32>,
    bitrev: Vec<u16>,
}

impl MdctTables {
    fn new(n: usize) -> Self {
        let n2 = n >> 1;
        let n4 = n2 >> 1;
        let n8 = n4 >> 1;
        let ld = ilog(n as u32) as usize - 1;
        let nf = n as f64;

        let mut a = vec![0f32; n2];
        let mut b = vec![0f32; n2];
        let mut c = vec![0f32; n4];
        for k in 0..n4 {
            let k2 = k * 2;
            let angle = 4.0 * k as f64 * PI / nf;
            a[k2] = angle.cos() as f32;
            a[k2 + 1] = -angle.sin() as f32;
            let angle = (k2 + 1) as f64 * PI / nf / 2.0;
            b[k2] = (angle.cos() * 0.5) as f32;
            b[k2 + 1] = (angle.sin() * 0.5) as f32;
        }
        for k in 0..n8 {
            let k2 = k * 2;
            let angle = 2.0 * (k2 + 1) as f64 * PI / nf;
            c[k2] = angle.cos() as f32;
            c[k2 + 1] = -angle.sin() as f32;
        }

        let bitrev = if ld >= 3 {
            (0..n8)
                .map(|i| (bit_reverse(i as u32, (ld - 3) as u32) << 2) as u16)
                .collect()
        } else {
            Vec::new()
        };

        Self {
            n,
            ld,
            a,
            b,
            c,
            bitrev,
        }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    /// 原地逆变换: `buffer[..n/2]` 为频域系数, 结果写满 `buffer[..n]`
    fn reverse(&self, buffer: &mut [f32], scratch: &mut Vec<f32>) {
        let n = self.n;
        if n < FAST_MIN_SIZE {
            direct_reverse(&mut buffer[..n], scratch);
            return;
        }
        let n2 = n >> 1;
        let n4 = n2 >> 1;
        let n8 = n4 >> 1;
        let a = &self.a;

        scratch.clear();
        scratch.resize(n2, 0.0);
        let v = scratch.as_mut_slice();

        // 第 0 步: 复制并反射频谱
        for i in 0..n2 / 4 {
            let (e, d, aa) = (4 * i, n2 - 2 - 2 * i, 2 * i);
            v[d + 1] = buffer[e] * a[aa] - buffer[e + 2] * a[aa + 1];
            v[d] = buffer[e] * a[aa + 1] + buffer[e + 2] * a[aa];
        }
        for i in 0..n2 / 4 {
            let (e, d, aa) = (n2 - 3 - 4 * i, n2 / 2 - 2 - 2 * i, n2 / 2 + 2 * i);
            v[d + 1] = -buffer[e + 2] * a[aa] + buffer[e] * a[aa + 1];
            v[d] = -buffer[e + 2] * a[aa + 1] - buffer[e] * a[aa];
        }

        let u = &mut buffer[..n];

        // 第 2 步
        for i in 0..n2 / 8 {
            let aa = n2 - 8 - 8 * i;
            let (e0, e1) = (n4 + 4 * i, 4 * i);
            for (o, (x, y)) in [(0usize, (aa + 4, aa + 5)), (2, (aa, aa + 1))] {
                let v41_21 = v[e0 + o + 1] - v[e1 + o + 1];
                let v40_20 = v[e0 + o] - v[e1 + o];
                u[e0 + o + 1] = v[e0 + o + 1] + v[e1 + o + 1];
                u[e0 + o] = v[e0 + o] + v[e1 + o];
                u[e1 + o + 1] = v41_21 * a[x] - v40_20 * a[y];
                u[e1 + o] = v40_20 * a[x] + v41_21 * a[y];
            }
        }

        // 第 3 步
        self.step3_iter0_loop(n >> 4, u, n2 - 1, n8);
        self.step3_iter0_loop(n >> 4, u, n2 - 1 - n4, n8);

        for j in 0..4 {
            self.step3_inner_r_loop(n >> 5, u, n2 - 1 - n8 * j, n >> 4, 16);
        }

        let ld = self.ld;
        let mut l = 2usize;
        while l < (ld - 3) >> 1 {
            let k0 = n >> (l + 2);
            for i in 0..(1usize << (l + 1)) {
                self.step3_inner_r_loop(n >> (l + 4), u, n2 - 1 - k0 * i, k0 >> 1, 1 << (l + 3));
            }
            l += 1;
        }
        while l + 6 < ld {
            let k0 = n >> (l + 2);
            let k1 = 1usize << (l + 3);
            let lim = 1usize << (l + 1);
            for r in 0..(n >> (l + 6)) {
                self.step3_inner_s_loop(lim, u, n2 - 1 - 8 * r, k0 >> 1, k1 * 4 * r, k1, k0);
            }
            l += 1;
        }

        self.step3_inner_s_loop_ld654(n >> 5, u, n2 - 1);

        // 第 4, 5, 6 步: 位反转
        for i in 0..n4 / 4 {
            let (d0, d1, bit) = (n4 - 4 - 4 * i, n2 - 4 - 4 * i, 2 * i);
            let k4 = self.bitrev[bit] as usize;
            v[d1 + 3] = u[k4];
            v[d1 + 2] = u[k4 + 1];
            v[d0 + 3] = u[k4 + 2];
            v[d0 + 2] = u[k4 + 3];
            let k4 = self.bitrev[bit + 1] as usize;
            v[d1 + 1] = u[k4];
            v[d1] = u[k4 + 1];
            v[d0 + 1] = u[k4 + 2];
            v[d0] = u[k4 + 3];
        }

        // 第 7 步
        let c = &self.c;
        let (mut ci, mut d, mut e) = (0usize, 0usize, n2 - 4);
        while d < e {
            for (dd, ee, cc) in [(d, e + 2, ci), (d + 2, e, ci + 2)] {
                let a02 = v[dd] - v[ee];
                let a11 = v[dd + 1] + v[ee + 1];
                let b0 = c[cc + 1] * a02 + c[cc] * a11;
                let b1 = c[cc + 1] * a11 - c[cc] * a02;
                let b2 = v[dd] + v[ee];
                let b3 = v[dd + 1] - v[ee + 1];
                v[dd] = b2 + b0;
                v[dd + 1] = b3 + b1;
                v[ee] = b2 - b0;
                v[ee + 1] = b1 - b3;
            }
            ci += 4;
            d += 4;
            e -= 4;
        }

        // 第 8 步: 后旋转并展开到整块
        let bt = &self.b;
        for i in 0..n2 / 8 {
            let b = n2 - 8 - 8 * i;
            let (d0, d1, d2, d3) = (4 * i, n2 - 4 - 4 * i, n2 + 4 * i, n - 4 - 4 * i);
            for j in 0..4 {
                let s = 6 - 2 * j;
                let p3 = v[b + s] * bt[b + s + 1] - v[b + s + 1] * bt[b + s];
                let p2 = -v[b + s] * bt[b + s] - v[b + s + 1] * bt[b + s + 1];
                u[d0 + j] = p3;
                u[d1 + 3 - j] = -p3;
                u[d2 + j] = p2;
                u[d3 + 3 - j] = p2;
            }
        }
    }

    fn step3_iter0_loop(&self, n: usize, e: &mut [f32], i_off: usize, k_off: usize) {
        let a = &self.a;
        let mut ai = 0usize;
        for i in 0..(n >> 2) {
            let ee0 = i_off - 8 * i;
            let ee2 = ee0 - k_off;
            for o in [0usize, 2, 4, 6] {
                butterfly(e, ee0 - o, ee2 - o, a[ai], a[ai + 1]);
                ai += 8;
            }
        }
    }

    fn step3_inner_r_loop(&self, lim: usize, e: &mut [f32], d0: usize, k_off: usize, k1: usize) {
        let a = &self.a;
        let mut ai = 0usize;
        for i in 0..(lim >> 2) {
            let e0 = d0 - 8 * i;
            let e2 = e0 - k_off;
            for o in [0usize, 2, 4, 6] {
                butterfly(e, e0 - o, e2 - o, a[ai], a[ai + 1]);
                ai += k1;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn step3_inner_s_loop(
        &self,
        n: usize,
        e: &mut [f32],
        i_off: usize,
        k_off: usize,
        ai: usize,
        a_off: usize,
        k0: usize,
    ) {
        let a = &self.a;
        let twiddles: [(f32, f32); 4] =
            std::array::from_fn(|j| (a[ai + a_off * j], a[ai + a_off * j + 1]));
        for i in 0..n {
            let ee0 = i_off - k0 * i;
            let ee2 = ee0 - k_off;
            for (j, &(t0, t1)) in twiddles.iter().enumerate() {
                butterfly(e, ee0 - 2 * j, ee2 - 2 * j, t0, t1);
            }
        }
    }

    /// 合并最后三级蝶形
    fn step3_inner_s_loop_ld654(&self, n: usize, e: &mut [f32], i_off: usize) {
        let a2 = self.a[self.n >> 3];
        for i in 0..n {
            let z = i_off - 16 * i;

            let k00 = e[z] - e[z - 8];
            let k11 = e[z - 1] - e[z - 9];
            e[z] += e[z - 8];
            e[z - 1] += e[z - 9];
            e[z - 8] = k00;
            e[z - 9] = k11;

            let k00 = e[z - 2] - e[z - 10];
            let k11 = e[z - 3] - e[z - 11];
            e[z - 2] += e[z - 10];
            e[z - 3] += e[z - 11];
            e[z - 10] = (k00 + k11) * a2;
            e[z - 11] = (k11 - k00) * a2;

            let k00 = e[z - 12] - e[z - 4];
            let k11 = e[z - 5] - e[z - 13];
            e[z - 4] += e[z - 12];
            e[z - 5] += e[z - 13];
            e[z - 12] = k11;
            e[z - 13] = k00;

            let k00 = e[z - 14] - e[z - 6];
            let k11 = e[z - 7] - e[z - 15];
            e[z - 6] += e[z - 14];
            e[z - 7] += e[z - 15];
            e[z - 14] = (k00 + k11) * a2;
            e[z - 15] = (k00 - k11) * a2;

            iter_54(e, z);
            iter_54(e, z - 8);
        }
    }
}

/// `e[p] += e[q]`, `e[q]` 取差值并旋转
#[inline(always)]
fn butterfly(e: &mut [f32], p: usize, q: usize, a0: f32, a1: f32) {
    let k00 = e[p] - e[q];
    let k01 = e[p - 1] - e[q - 1];
    e[p] += e[q];
    e[p - 1] += e[q - 1];
    e[q] = k00 * a0 - k01 * a1;
    e[q - 1] = k01 * a0 + k00 * a1;
}

fn iter_54(e: &mut [f32], z: usize) {
    let k00 = e[z] - e[z - 4];
    let y0 = e[z] + e[z - 4];
    let y2 = e[z - 2] + e[z - 6];
    let k22 = e[z - 2] - e[z - 6];

    e[z] = y0 + y2;
    e[z - 2] = y0 - y2;

    let k33 = e[z - 3] - e[z - 7];

    e[z - 4] = k00 + k33;
    e[z - 6] = k00 - k33;

    let k11 = e[z - 1] - e[z - 5];
    let y1 = e[z - 1] + e[z - 5];
    let y3 = e[z - 3] + e[z - 7];

    e[z - 1] = y1 + y3;
    e[z - 3] = y1 - y3;
    e[z - 5] = k11 - k22;
    e[z - 7] = k11 + k22;
}

/// 按定义直接计算, 用于短块
fn direct_reverse(buffer: &mut [f32], scratch: &mut Vec<f32>) {
    let n = buffer.len();
    let n2 = n / 2;
    scratch.clear();
    scratch.extend_from_slice(&buffer[..n2]);
    let step = 2.0 * PI / n as f64;
    for (i, out) in buffer.iter_mut().enumerate() {
        let phase = i as f64 + 0.5 + n as f64 / 4.0;
        let mut acc = 0f64;
        for (k, &x) in scratch.iter().enumerate() {
            acc += f64::from(x) * (step * phase * (k as f64 + 0.5)).cos();
        }
        *out = acc as f32;
    }
}

/// 解码器私有的逆 MDCT 工作区, 缓存已用过的块长的系数表
#[derive(Debug, Default)]
pub struct MdctScratch {
    buffer: Vec<f32>,
    tables: Vec<Arc<MdctTables>>,
}

impl MdctScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// 原地逆变换 `samples[..n/2]` -> `samples[..n]`, `n` 为 2 的幂且不小于 64
    pub fn reverse(&mut self, samples: &mut [f32], n: usize) {
        let tables = match self.tables.iter().find(|t| t.size() == n) {
            Some(tables) => Arc::clone(tables),
            None => {
                let tables = shared_tables(n);
                self.tables.push(Arc::clone(&tables));
                tables
            }
        };
        tables.reverse(samples, &mut self.buffer);
    }
}
