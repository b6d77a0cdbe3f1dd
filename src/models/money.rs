use bigdecimal::{BigDecimal, Zero};
use std::cmp::Ordering;

fn pow10(scale: u32) -> BigDecimal {
    (0..scale).fold(BigDecimal::from(1), |acc, _| acc * BigDecimal::from(10))
}

/// 按银行家舍入 (ROUND_HALF_EVEN) 保留 `scale` 位小数
pub fn round_half_even(value: &BigDecimal, scale: u32) -> BigDecimal {
    let factor = pow10(scale);
    let scaled = value * &factor;
    let truncated = scaled.with_scale(0);
    let fraction = (&scaled - &truncated).abs();
    let twice = &fraction * BigDecimal::from(2);

    let step = if *value < BigDecimal::zero() {
        BigDecimal::from(-1)
    } else {
        BigDecimal::from(1)
    };

    let rounded = match twice.cmp(&BigDecimal::from(1)) {
        Ordering::Less => truncated,
        Ordering::Greater => truncated + step,
        Ordering::Equal => {
            if (truncated.clone() % BigDecimal::from(2)).is_zero() {
                truncated
            } else {
                truncated + step
            }
        }
    };

    (rounded / factor).with_scale(i64::from(scale))
}
