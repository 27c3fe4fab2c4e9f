//! Vorbis mapping: 声道到子映射 (floor + residue) 的绑定与立体声耦合.

use sheng_core::{DataPacket, ShengError, ShengResult};

use crate::util::ilog;

/// 一个子映射使用的 floor 与 residue 序号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submap {
    pub floor: usize,
    pub residue: usize,
}

/// 平方极坐标耦合的一步
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CouplingStep {
    pub magnitude: usize,
    pub angle: usize,
}

/// mapping 类型 0 (唯一定义的类型)
#[derive(Debug, Clone)]
pub struct Mapping {
    submaps: Vec<Submap>,
    /// 每个声道所属的子映射
    channel_submap: Vec<usize>,
    /// 每个子映射包含的声道, 按声道号升序
    submap_channels: Vec<Vec<usize>>,
    coupling: Vec<CouplingStep>,
}

impl Mapping {
    pub fn read(
        packet: &mut DataPacket,
        channels: usize,
        floor_count: usize,
        residue_count: usize,
        index: usize,
    ) -> ShengResult<Self> {
        let invalid = |msg: String| ShengError::InvalidData(format!("Vorbis mapping {} {}", index, msg));

        let mapping_type = packet.read_bits(16)?;
        if mapping_type != 0 {
            return Err(invalid(format!("类型不支持: {}", mapping_type)));
        }

        let submap_count = if packet.read_bit()? {
            packet.read_bits(4)? as usize + 1
        } else {
            1
        };

        let mut coupling = Vec::new();
        if packet.read_bit()? {
            let steps = packet.read_bits(8)? as usize + 1;
            let bits = ilog(channels.saturating_sub(1) as u32) as usize;
            for _ in 0..steps {
                let magnitude = packet.read_bits(bits)? as usize;
                let angle = packet.read_bits(bits)? as usize;
                if magnitude == angle || magnitude >= channels || angle >= channels {
                    return Err(invalid(format!(
                        "耦合声道非法: magnitude={}, angle={}",
                        magnitude, angle,
                    )));
                }
                coupling.push(CouplingStep { magnitude, angle });
            }
        }

        if packet.read_bits(2)? != 0 {
            return Err(invalid("保留位非零".into()));
        }

        let mut channel_submap = vec![0usize; channels];
        if submap_count > 1 {
            for slot in channel_submap.iter_mut() {
                let mux = packet.read_bits(4)? as usize;
                if mux >= submap_count {
                    return Err(invalid(format!("声道子映射越界: {}", mux)));
                }
                *slot = mux;
            }
        }

        let mut submaps = Vec::with_capacity(submap_count);
        for _ in 0..submap_count {
            // time 配置, 未使用
            packet.read_bits(8)?;
            let floor = packet.read_bits(8)? as usize;
            if floor >= floor_count {
                return Err(invalid(format!("floor 越界: {}", floor)));
            }
            let residue = packet.read_bits(8)? as usize;
            if residue >= residue_count {
                return Err(invalid(format!("residue 越界: {}", residue)));
            }
            submaps.push(Submap { floor, residue });
        }

        let mut submap_channels = vec![Vec::new(); submap_count];
        for (ch, &submap) in channel_submap.iter().enumerate() {
            submap_channels[submap].push(ch);
        }

        Ok(Self {
            submaps,
            channel_submap,
            submap_channels,
            coupling,
        })
    }

    pub fn submaps(&self) -> &[Submap] {
        &self.submaps
    }

    /// 声道 `channel` 使用的子映射
    pub fn channel_submap(&self, channel: usize) -> &Submap {
        &self.submaps[self.channel_submap[channel]]
    }

    pub fn submap_channels(&self, submap: usize) -> &[usize] {
        &self.submap_channels[submap]
    }

    pub fn coupling(&self) -> &[CouplingStep] {
        &self.coupling
    }
}

/// 平方极坐标反耦合, 只处理前 `n` 个系数
pub(crate) fn inverse_coupling(magnitude: &mut [f32], angle: &mut [f32], n: usize) {
    for (m, a) in magnitude.iter_mut().zip(angle.iter_mut()).take(n) {
        let (new_m, new_a) = if *m > 0.0 {
            if *a > 0.0 {
                (*m, *m - *a)
            } else {
                (*m + *a, *m)
            }
        } else if *a > 0.0 {
            (*m, *m + *a)
        } else {
            (*m - *a, *m)
        };
        *m = new_m;
        *a = new_a;
    }
}
