use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A time base or frame rate, `numerator / denominator`.
///
/// Mirrors the shape of `ffmpeg_next::Rational` so the two convert freely at
/// the backend boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational(pub i32, pub i32);

impl Rational {
    pub fn numerator(&self) -> i32 {
        self.0
    }

    pub fn denominator(&self) -> i32 {
        self.1
    }

    pub fn invert(&self) -> Self {
        Self(self.1, self.0)
    }

    /// Both terms non-zero.
    pub fn is_valid(&self) -> bool {
        self.0 != 0 && self.1 != 0
    }

    pub fn to_f64(&self) -> f64 {
        if self.1 == 0 {
            return 0.0;
        }
        self.0 as f64 / self.1 as f64
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self(0, 1)
    }
}

impl From<(i32, i32)> for Rational {
    fn from((num, den): (i32, i32)) -> Self {
        Self(num, den)
    }
}

impl From<Rational> for f64 {
    fn from(value: Rational) -> Self {
        value.to_f64()
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0, self.1)
    }
}

impl FromStr for Rational {
    type Err = String;

    /// Accepts `"30000/1001"` or a bare integer such as `"25"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse = |v: &str| {
            v.trim()
                .parse::<i32>()
                .map_err(|e| format!("invalid rational {:?}: {}", s, e))
        };
        let rational = match s.split_once('/') {
            Some((num, den)) => Self(parse(num)?, parse(den)?),
            None => Self(parse(s)?, 1),
        };
        if rational.1 == 0 {
            return Err(format!("invalid rational {:?}: zero denominator", s));
        }
        Ok(rational)
    }
}

impl Serialize for Rational {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rational {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// `a * b / c` rounded to nearest, halves away from zero.
pub fn rescale_rnd(a: i64, b: i64, c: i64) -> i64 {
    if c == 0 {
        return 0;
    }
    let mut n = a as i128 * b as i128;
    let mut c = c as i128;
    if c < 0 {
        n = -n;
        c = -c;
    }
    let r = if n >= 0 {
        (n + c / 2) / c
    } else {
        -((-n + c / 2) / c)
    };
    r.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Converts `ts` expressed in `from` units into `to` units.
pub fn rescale_q(ts: i64, from: Rational, to: Rational) -> i64 {
    let b = from.0 as i64 * to.1 as i64;
    let c = to.0 as i64 * from.1 as i64;
    rescale_rnd(ts, b, c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_rounds_to_nearest() {
        assert_eq!(rescale_rnd(5, 1, 2), 3);
        assert_eq!(rescale_rnd(-5, 1, 2), -3);
        assert_eq!(rescale_rnd(1, 1, 3), 0);
        assert_eq!(rescale_rnd(2, 1, 3), 1);
        assert_eq!(rescale_rnd(7, 3, -2), -11);
    }

    #[test]
    fn test_rescale_q() {
        let ms = Rational(1, 1000);
        let us = Rational(1, 1_000_000);
        assert_eq!(rescale_q(1500, ms, us), 1_500_000);
        assert_eq!(rescale_q(1_500_499, us, ms), 1500);
        assert_eq!(rescale_q(1_500_500, us, ms), 1501);
        // 90kHz tick to 1/25
        assert_eq!(rescale_q(3600, Rational(1, 90000), Rational(1, 25)), 1);
    }

    #[test]
    fn test_round_trip_is_exact_for_divisors_of_the_global_base() {
        let global = Rational(1, 1_000_000);
        for tb in [Rational(1, 25), Rational(1, 1000), Rational(1, 8000), Rational(1, 1_000_000)] {
            for ts in [0i64, 1, 7, 1234, 98765, -3, -4242] {
                assert_eq!(rescale_q(rescale_q(ts, tb, global), global, tb), ts, "{} in {}", ts, tb);
            }
        }
    }

    #[test]
    fn test_round_trip_stays_within_one_unit() {
        let global = Rational(1, 1_000_000);
        for tb in [Rational(1001, 30000), Rational(1, 44100), Rational(1, 90000)] {
            for ts in [0i64, 1, 7, 1234, 98765, -3, -4242] {
                let back = rescale_q(rescale_q(ts, tb, global), global, tb);
                assert!((back - ts).abs() <= 1, "{} in {} came back as {}", ts, tb, back);
            }
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!("30000/1001".parse::<Rational>().unwrap(), Rational(30000, 1001));
        assert_eq!("25".parse::<Rational>().unwrap(), Rational(25, 1));
        assert!("1/0".parse::<Rational>().is_err());
        assert!("abc".parse::<Rational>().is_err());
    }

    #[test]
    fn test_serde() {
        let r: Rational = serde_json::from_str("\"1/90000\"").unwrap();
        assert_eq!(r, Rational(1, 90000));
        assert_eq!(serde_json::to_string(&r).unwrap(), "\"1/90000\"");
    }
}
