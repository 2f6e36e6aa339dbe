use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// 有理数（分子/分母），用于帧率和时间基
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub numerator: i32,
    pub denominator: i32,
}

impl Rational {
    pub const fn new(numerator: i32, denominator: i32) -> Self {
        Self { numerator, denominator }
    }

    /// 分母为 0 或分子为 0 时视为无效
    pub fn is_valid(&self) -> bool {
        self.numerator != 0 && self.denominator != 0
    }

    pub fn as_f64(&self) -> f64 {
        if self.denominator == 0 {
            0.0
        } else {
            self.numerator as f64 / self.denominator as f64
        }
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

/// 媒体时间：value / timescale 秒
///
/// 所有 pts/dts/时长都用这个类型表达，比较时按交叉相乘进行，
/// 不同 timescale 之间的比较不会损失精度。
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: i32,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime { value: 0, timescale: 1 };

    pub const fn new(value: i64, timescale: i32) -> Self {
        Self { value, timescale }
    }

    /// 从秒构造（按首选 timescale 四舍五入）
    pub fn from_seconds(seconds: f64, preferred_timescale: i32) -> Self {
        let timescale = if preferred_timescale > 0 { preferred_timescale } else { 1_000_000 };
        Self {
            value: (seconds * timescale as f64).round() as i64,
            timescale,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.timescale > 0
    }

    pub fn seconds(&self) -> f64 {
        if self.timescale <= 0 {
            0.0
        } else {
            self.value as f64 / self.timescale as f64
        }
    }

    pub fn abs(&self) -> Self {
        Self::new(self.value.abs(), self.timescale)
    }

    pub fn sub(&self, other: MediaTime) -> MediaTime {
        if self.timescale == other.timescale {
            return Self::new(self.value - other.value, self.timescale);
        }
        // 统一到较大的 timescale 上计算
        let timescale = self.timescale.max(other.timescale).max(1);
        let lhs = self.rescale(timescale);
        let rhs = other.rescale(timescale);
        Self::new(lhs.value - rhs.value, timescale)
    }

    pub fn add(&self, other: MediaTime) -> MediaTime {
        if self.timescale == other.timescale {
            return Self::new(self.value + other.value, self.timescale);
        }
        let timescale = self.timescale.max(other.timescale).max(1);
        let lhs = self.rescale(timescale);
        let rhs = other.rescale(timescale);
        Self::new(lhs.value + rhs.value, timescale)
    }

    /// 换算到指定 timescale（四舍五入）
    pub fn rescale(&self, timescale: i32) -> MediaTime {
        if self.timescale == timescale || self.timescale <= 0 || timescale <= 0 {
            return Self::new(self.value, timescale.max(1));
        }
        let scaled = (self.value as i128 * timescale as i128 * 2 + self.timescale as i128)
            / (self.timescale as i128 * 2);
        Self::new(scaled as i64, timescale)
    }

    fn cross(&self, other: &MediaTime) -> (i128, i128) {
        (
            self.value as i128 * other.timescale.max(1) as i128,
            other.value as i128 * self.timescale.max(1) as i128,
        )
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        let (lhs, rhs) = self.cross(other);
        lhs == rhs
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let (lhs, rhs) = self.cross(other);
        lhs.cmp(&rhs)
    }
}

impl fmt::Debug for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({:.3}s)", self.value, self.timescale, self.seconds())
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_across_timescales() {
        let a = MediaTime::new(1, 10);
        let b = MediaTime::new(9000, 90000);
        assert_eq!(a, b);
        assert!(MediaTime::new(1, 1) > MediaTime::new(44099, 44100));
    }

    #[test]
    fn sub_and_abs() {
        let target = MediaTime::new(5, 1);
        let position = MediaTime::new(540_000, 90_000);
        let diff = target.sub(position).abs();
        assert!(diff <= MediaTime::new(1, 1));
        assert!((diff.seconds() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn from_seconds_rounds_to_timescale() {
        let t = MediaTime::from_seconds(1.25, 1000);
        assert_eq!(t.value, 1250);
        assert_eq!(t.timescale, 1000);
        assert_eq!(t.rescale(4).value, 5);
    }
}
