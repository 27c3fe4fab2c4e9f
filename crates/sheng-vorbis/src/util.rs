//! 位运算与数值工具.

/// 表示 `x` 所需的位数, `x == 0` 时为 0
pub(crate) fn ilog(x: u32) -> u32 {
    32 - x.leading_zeros()
}

/// 反转 `n` 的低 `bits` 位
pub(crate) fn bit_reverse(n: u32, bits: u32) -> u32 {
    if bits == 0 {
        return 0;
    }
    n.reverse_bits() >> (32 - bits)
}

/// 解析 Vorbis float32 (21 位尾数, 10 位偏置指数, 1 位符号)
pub(crate) fn float32_unpack(bits: u32) -> f32 {
    let mantissa = (bits & 0x1F_FFFF) as f32;
    let exponent = ((bits & 0x7FE0_0000) >> 21) as i32 - 788;
    let value = mantissa * 2f64.powi(exponent) as f32;
    if bits & 0x8000_0000 != 0 { -value } else { value }
}

/// 满量程 (0.99999994) 对应的位模式
const FULL_SCALE_BITS: u32 = 0x3F7F_FFFF;

/// 把采样限制在满量程内, 发生截断时置位 `clipped`
pub(crate) fn clip_sample(value: f32, clipped: &mut bool) -> f32 {
    let bits = value.to_bits();
    if bits & 0x7FFF_FFFF > FULL_SCALE_BITS {
        *clipped = true;
        f32::from_bits(FULL_SCALE_BITS | (bits & 0x8000_0000))
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ilog() {
        assert_eq!(ilog(0), 0);
        assert_eq!(ilog(1), 1);
        assert_eq!(ilog(2), 2);
        assert_eq!(ilog(3), 2);
        assert_eq!(ilog(4), 3);
        assert_eq!(ilog(7), 3);
        assert_eq!(ilog(u32::MAX), 32);
    }

    #[test]
    fn test_bit_reverse() {
        assert_eq!(bit_reverse(0b001, 3), 0b100);
        assert_eq!(bit_reverse(0b110, 3), 0b011);
        assert_eq!(bit_reverse(1, 32), 0x8000_0000);
        assert_eq!(bit_reverse(5, 0), 0);
    }

    #[test]
    fn test_float32_unpack() {
        // 尾数 1, 指数 788 => 1.0
        assert_eq!(float32_unpack((788 << 21) | 1), 1.0);
        assert_eq!(float32_unpack(0x8000_0000 | (788 << 21) | 3), -3.0);
        assert_eq!(float32_unpack((787 << 21) | 1), 0.5);
        assert_eq!(float32_unpack(0), 0.0);
    }

    #[test]
    fn test_clip_sample() {
        let mut clipped = false;
        assert_eq!(clip_sample(0.5, &mut clipped), 0.5);
        assert!(!clipped);
        assert_eq!(clip_sample(1.5, &mut clipped), 0.999_999_94);
        assert!(clipped);
        let mut clipped = false;
        assert_eq!(clip_sample(-2.0, &mut clipped), -0.999_999_94);
        assert!(clipped);
    }
}
