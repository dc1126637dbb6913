// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use core::cmp::Ordering;
use core::fmt;

// Indexed by the exponent byte: 0..=127 are 1e0..=1e127, 128..=255 wrap to
// 1e-128..=1e-1.
const POWERS_OF_TEN: [f64; 256] = [
    1.0, 1e1, 1e2, 1e3, 1e4, 1e5,
    1e6, 1e7, 1e8, 1e9, 1e10, 1e11,
    1e12, 1e13, 1e14, 1e15, 1e16, 1e17,
    1e18, 1e19, 1e20, 1e21, 1e22, 1e23,
    1e24, 1e25, 1e26, 1e27, 1e28, 1e29,
    1e30, 1e31, 1e32, 1e33, 1e34, 1e35,
    1e36, 1e37, 1e38, 1e39, 1e40, 1e41,
    1e42, 1e43, 1e44, 1e45, 1e46, 1e47,
    1e48, 1e49, 1e50, 1e51, 1e52, 1e53,
    1e54, 1e55, 1e56, 1e57, 1e58, 1e59,
    1e60, 1e61, 1e62, 1e63, 1e64, 1e65,
    1e66, 1e67, 1e68, 1e69, 1e70, 1e71,
    1e72, 1e73, 1e74, 1e75, 1e76, 1e77,
    1e78, 1e79, 1e80, 1e81, 1e82, 1e83,
    1e84, 1e85, 1e86, 1e87, 1e88, 1e89,
    1e90, 1e91, 1e92, 1e93, 1e94, 1e95,
    1e96, 1e97, 1e98, 1e99, 1e100, 1e101,
    1e102, 1e103, 1e104, 1e105, 1e106, 1e107,
    1e108, 1e109, 1e110, 1e111, 1e112, 1e113,
    1e114, 1e115, 1e116, 1e117, 1e118, 1e119,
    1e120, 1e121, 1e122, 1e123, 1e124, 1e125,
    1e126, 1e127, 1e-128, 1e-127, 1e-126, 1e-125,
    1e-124, 1e-123, 1e-122, 1e-121, 1e-120, 1e-119,
    1e-118, 1e-117, 1e-116, 1e-115, 1e-114, 1e-113,
    1e-112, 1e-111, 1e-110, 1e-109, 1e-108, 1e-107,
    1e-106, 1e-105, 1e-104, 1e-103, 1e-102, 1e-101,
    1e-100, 1e-99, 1e-98, 1e-97, 1e-96, 1e-95,
    1e-94, 1e-93, 1e-92, 1e-91, 1e-90, 1e-89,
    1e-88, 1e-87, 1e-86, 1e-85, 1e-84, 1e-83,
    1e-82, 1e-81, 1e-80, 1e-79, 1e-78, 1e-77,
    1e-76, 1e-75, 1e-74, 1e-73, 1e-72, 1e-71,
    1e-70, 1e-69, 1e-68, 1e-67, 1e-66, 1e-65,
    1e-64, 1e-63, 1e-62, 1e-61, 1e-60, 1e-59,
    1e-58, 1e-57, 1e-56, 1e-55, 1e-54, 1e-53,
    1e-52, 1e-51, 1e-50, 1e-49, 1e-48, 1e-47,
    1e-46, 1e-45, 1e-44, 1e-43, 1e-42, 1e-41,
    1e-40, 1e-39, 1e-38, 1e-37, 1e-36, 1e-35,
    1e-34, 1e-33, 1e-32, 1e-31, 1e-30, 1e-29,
    1e-28, 1e-27, 1e-26, 1e-25, 1e-24, 1e-23,
    1e-22, 1e-21, 1e-20, 1e-19, 1e-18, 1e-17,
    1e-16, 1e-15, 1e-14, 1e-13, 1e-12, 1e-11,
    1e-10, 1e-9, 1e-8, 1e-7, 1e-6, 1e-5,
    1e-4, 1e-3, 1e-2, 1e-1,
];

fn power_of_ten(exp: i8) -> f64 {
    POWERS_OF_TEN[exp as u8 as usize]
}

/// A `Bucket` identifies one slice of the real line in a decimal log-linear
/// layout: within each decade `[10^e, 10^(e+1))` there are ninety uniformly
/// sized buckets, and across decades the bucket width grows by a factor of
/// ten.
///
/// A finite bucket with `val > 0` covers
/// `[(val/10)·10^exp, ((val+1)/10)·10^exp)` and one with `val < 0` covers
/// `(((val-1)/10)·10^exp, (val/10)·10^exp]`, with `|val|` always in `10..=99`.
/// Values smaller in magnitude than `1e-128` land in `Zero`; NaN, infinities,
/// and magnitudes of `1e128` and above land in `Invalid`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Carrier for samples with no representable magnitude.
    Invalid,
    /// The open interval around zero: (-1e-127, +1e-127).
    Zero,
    /// A finite bucket. `val` holds the sign and the two leading decimal
    /// digits, `exp` the decimal exponent.
    Finite { val: i8, exp: i8 },
}

impl Bucket {
    /// Returns the bucket containing `value`.
    ///
    /// Converting an IEEE double goes through `log10` and can suffer floating
    /// point skew near bucket boundaries; `from_int_scale` is exact (and
    /// faster) if the measurement is already an integer.
    pub fn from_f64(value: f64) -> Self {
        if value.is_nan() || value.is_infinite() {
            return Bucket::Invalid;
        }
        if value == 0.0 {
            return Bucket::Zero;
        }
        let sign: i8 = if value < 0.0 { -1 } else { 1 };
        let magnitude = value.abs();
        let big_exp = magnitude.log10().floor() as i32;
        if big_exp < -128 {
            // the whole value is inside the zero bucket
            return Bucket::Zero;
        }
        if big_exp > 127 {
            return Bucket::Invalid;
        }
        let mut exp = big_exp as i8;
        let scaled = magnitude / power_of_ten(exp) * 10.0;
        // The epsilon absorbs rounding in the transformations above, which
        // would otherwise drop boundary values like 0.11 into the lower
        // bucket.
        let mut v = (scaled + 1e-13).floor() as i32;
        if v == 100 {
            if exp < 127 {
                v = 10;
                exp += 1;
            } else {
                return Bucket::Invalid;
            }
        }
        if v == 0 {
            return Bucket::Zero;
        }
        if !(10..=99).contains(&v) {
            return Bucket::Invalid;
        }
        Bucket::Finite {
            val: sign * v as i8,
            exp,
        }
    }

    /// Returns the bucket containing `value * 10^scale`. Exact for integer
    /// mantissas.
    pub fn from_int_scale(value: i64, scale: i32) -> Self {
        if value == 0 {
            return Bucket::Zero;
        }
        let sign: i8 = if value < 0 { -1 } else { 1 };
        let mut scale = scale + 1;
        let mut value = value.unsigned_abs();
        if value < 10 {
            value *= 10;
            scale -= 1;
        }
        while value >= 100 {
            value /= 10;
            scale += 1;
        }
        if scale < -128 {
            return Bucket::Zero;
        }
        if scale > 127 {
            return Bucket::Invalid;
        }
        Bucket::Finite {
            val: sign * value as i8,
            exp: scale as i8,
        }
    }

    /// Returns the edge of the bucket closest to zero, `0.0` for the zero
    /// bucket, and NaN for an invalid bucket.
    pub fn to_f64(self) -> f64 {
        match self {
            Bucket::Invalid => f64::NAN,
            Bucket::Zero => 0.0,
            Bucket::Finite { val, exp } => (val as f64 / 10.0) * power_of_ten(exp),
        }
    }

    /// Returns the width of the bucket. The width is unsigned; callers
    /// dealing with negative buckets negate it as needed.
    pub fn width(self) -> f64 {
        match self {
            Bucket::Invalid => f64::NAN,
            Bucket::Zero => 0.0,
            Bucket::Finite { exp, .. } => power_of_ten(exp) / 10.0,
        }
    }

    /// Returns the midpoint of the bucket.
    pub fn midpoint(self) -> f64 {
        match self {
            Bucket::Invalid => f64::NAN,
            Bucket::Zero => 0.0,
            Bucket::Finite { val, .. } => {
                let edge = self.to_f64();
                let interval = if val < 0 { -self.width() } else { self.width() };
                edge + interval / 2.0
            }
        }
    }

    /// Returns the edge of the bucket closest to negative infinity.
    pub fn left(self) -> f64 {
        match self {
            Bucket::Invalid => f64::NAN,
            Bucket::Zero => 0.0,
            Bucket::Finite { val, .. } => {
                if val > 0 {
                    self.to_f64()
                } else {
                    self.to_f64() - self.width()
                }
            }
        }
    }

    /// Packs the bucket into its two-byte wire form: the `val` byte followed
    /// by the `exp` byte.
    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            Bucket::Invalid => [0xff, 0],
            Bucket::Zero => [0, 0],
            Bucket::Finite { val, exp } => [val as u8, exp as u8],
        }
    }

    /// Unpacks a bucket from its two-byte wire form. Byte patterns that name
    /// no representable bucket decode as `Invalid`.
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        let val = bytes[0] as i8;
        if val == 0 {
            Bucket::Zero
        } else if (10..=99).contains(&val) || (-99..=-10).contains(&val) {
            Bucket::Finite {
                val,
                exp: bytes[1] as i8,
            }
        } else {
            Bucket::Invalid
        }
    }
}

impl Ord for Bucket {
    // Position on the real line, with invalid buckets sorting before
    // everything else.
    fn cmp(&self, other: &Self) -> Ordering {
        use Bucket::*;
        match (*self, *other) {
            (Invalid, Invalid) => Ordering::Equal,
            (Invalid, _) => Ordering::Less,
            (_, Invalid) => Ordering::Greater,
            (Zero, Zero) => Ordering::Equal,
            (Zero, Finite { val, .. }) => {
                if val > 0 {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (Finite { val, .. }, Zero) => {
                if val > 0 {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (Finite { val: v1, exp: e1 }, Finite { val: v2, exp: e2 }) => {
                if v1 < 0 && v2 > 0 {
                    Ordering::Less
                } else if v1 > 0 && v2 < 0 {
                    Ordering::Greater
                } else if e1 == e2 {
                    v1.cmp(&v2)
                } else if v1 > 0 {
                    e1.cmp(&e2)
                } else {
                    e2.cmp(&e1)
                }
            }
        }
    }
}

impl PartialOrd for Bucket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Bucket {
    /// Formats the bucket in the standardized form `sxxetyyy`: the global
    /// sign, the two digits of `val`, the literal `e`, then the sign and
    /// three zero padded digits of the exponent that scales `val` as a whole
    /// integer. The zero bucket prints as `0` and invalid buckets print as
    /// `NaN`.
    ///
    /// ```
    /// use loghist::Bucket;
    ///
    /// assert_eq!(Bucket::from_f64(1.0).to_string(), "+10e-001");
    /// assert_eq!(Bucket::from_f64(-0.23).to_string(), "-23e-002");
    /// assert_eq!(Bucket::from_f64(23000.0).to_string(), "+23e+003");
    /// ```
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Bucket::Invalid => write!(f, "NaN"),
            Bucket::Zero => write!(f, "0"),
            Bucket::Finite { val, exp } => {
                let vsign = if val < 0 { '-' } else { '+' };
                let shown = exp as i32 - 1;
                let esign = if shown < 0 { '-' } else { '+' };
                write!(
                    f,
                    "{}{:02}e{}{:03}",
                    vsign,
                    val.unsigned_abs(),
                    esign,
                    shown.unsigned_abs()
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finite(val: i8, exp: i8) -> Bucket {
        Bucket::Finite { val, exp }
    }

    #[test]
    fn int_scale_matches_double() {
        let cases: &[(i64, i32, f64)] = &[
            (2, 0, 2.0),
            (1, -9, 1e-9),
            (1_300_000_000, -9, 1.3),
            (-2700, -9, -2.7e-6),
            (7, -9, 7e-9),
        ];
        for &(value, scale, d) in cases {
            assert_eq!(
                Bucket::from_int_scale(value, scale),
                Bucket::from_f64(d),
                "{value}e{scale} vs {d}"
            );
        }
        assert_eq!(Bucket::from_int_scale(0, 0), Bucket::Zero);
        assert_eq!(Bucket::from_int_scale(100, 0), finite(10, 2));
        assert_eq!(Bucket::from_int_scale(i64::MIN, 0), finite(-92, 18));
    }

    #[test]
    fn string_form() {
        let cases: &[(f64, &str)] = &[
            (0.0, "0"),
            (2.0, "+20e-001"),
            (1e-9, "+10e-010"),
            (1.3, "+13e-001"),
            (-2.7e-6, "-27e-007"),
            (7e-9, "+70e-010"),
            (1e-128, "+10e-129"),
            (1e127, "+10e+126"),
            (9.999e127, "+99e+126"),
            (1e128, "NaN"),
            (-1e-128, "-10e-129"),
            (-9.999e127, "-99e+126"),
            (-1e128, "NaN"),
        ];
        for &(d, expected) in cases {
            assert_eq!(Bucket::from_f64(d).to_string(), expected, "{d}");
        }
    }

    #[test]
    fn magnitude_limits() {
        assert_eq!(Bucket::from_f64(9.9999e-129), Bucket::Zero);
        assert_eq!(Bucket::from_f64(-9.9999e-129), Bucket::Zero);
        assert_eq!(Bucket::from_f64(1e-128), finite(10, -128));
        assert_eq!(Bucket::from_f64(-1e-128), finite(-10, -128));
        assert_eq!(Bucket::from_f64(1e128), Bucket::Invalid);
        assert_eq!(Bucket::from_f64(-1e128), Bucket::Invalid);
        assert_eq!(Bucket::from_f64(f64::NAN), Bucket::Invalid);
        assert_eq!(Bucket::from_f64(f64::INFINITY), Bucket::Invalid);
        assert_eq!(Bucket::from_f64(f64::NEG_INFINITY), Bucket::Invalid);
    }

    #[test]
    fn boundary_rounding() {
        // 0.11 must not round down into the 10 bucket
        assert_eq!(Bucket::from_f64(0.11), finite(11, -1));
        assert_eq!(Bucket::from_f64(0.12), finite(12, -1));
        assert_eq!(Bucket::from_f64(0.99), finite(99, -1));
        assert_eq!(Bucket::from_f64(1.0), finite(10, 0));
        assert_eq!(Bucket::from_f64(1.00001e-128), finite(10, -128));
        assert_eq!(Bucket::from_f64(1.09999e-128), finite(10, -128));
        assert_eq!(Bucket::from_f64(1.1e-128), finite(11, -128));
        assert_eq!(Bucket::from_f64(-1.1e-128), finite(-11, -128));
    }

    #[test]
    fn edges_and_widths() {
        fn check(value: f64, edge: f64, signed_width: f64) {
            let b = Bucket::from_f64(value);
            let mut w = b.width();
            if b.to_f64() < 0.0 {
                w = -w;
            }
            assert!(
                (b.to_f64() - edge).abs() <= edge.abs() * 1e-4,
                "{value}: edge {} != {edge}",
                b.to_f64()
            );
            assert!(
                (w - signed_width).abs() <= signed_width.abs() * 1e-4,
                "{value}: width {w} != {signed_width}"
            );
        }
        check(43.3, 43.0, 1.0);
        check(99.9, 99.0, 1.0);
        check(10.0, 10.0, 1.0);
        check(1.0, 1.0, 0.1);
        check(0.0002, 0.0002, 0.00001);
        check(0.003, 0.003, 0.0001);
        check(0.3201, 0.32, 0.01);
        check(0.0035, 0.0035, 0.0001);
        check(-1.0, -1.0, -0.1);
        check(-0.00123, -0.0012, -0.0001);
        check(-987324.0, -980000.0, -10000.0);
    }

    #[test]
    fn ordering() {
        // ascending on the real line, invalid first
        let ordered = [
            Bucket::Invalid,
            finite(-99, 3),
            finite(-10, 3),
            finite(-99, 2),
            finite(-10, -128),
            Bucket::Zero,
            finite(10, -128),
            finite(99, -128),
            finite(10, 0),
            finite(11, 0),
            finite(99, 0),
            finite(10, 1),
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{} < {}", pair[0], pair[1]);
        }
        assert_eq!(finite(17, 5).cmp(&finite(17, 5)), Ordering::Equal);
    }

    #[test]
    fn byte_round_trip() {
        let buckets = [
            Bucket::Invalid,
            Bucket::Zero,
            finite(10, -128),
            finite(-99, 127),
            finite(42, 0),
        ];
        for b in buckets {
            assert_eq!(Bucket::from_bytes(b.to_bytes()), b);
        }
        // junk val bytes decode as invalid
        assert_eq!(Bucket::from_bytes([5, 0]), Bucket::Invalid);
        assert_eq!(Bucket::from_bytes([120, 3]), Bucket::Invalid);
    }

    #[test]
    fn midpoints() {
        assert_eq!(finite(10, 0).midpoint(), 1.05);
        assert_eq!(finite(-10, 0).midpoint(), -1.05);
        assert_eq!(Bucket::Zero.midpoint(), 0.0);
        assert!(Bucket::Invalid.midpoint().is_nan());
    }

    #[test]
    fn left_edges() {
        assert_eq!(finite(10, 0).left(), 1.0);
        assert_eq!(finite(-10, 0).left(), -1.1);
        assert_eq!(Bucket::Zero.left(), 0.0);
    }
}
