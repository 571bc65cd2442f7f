//! Exact decimal arithmetic on plain number text.
//!
//! Profile stages are stored as depths above the bed. Recovering the water
//! surface as `bel + depth` in f64 rounds twice, once when the depth is
//! parsed and once in the sum, and that can miss the original elevation by
//! an ulp. Adding the exact expansion of `bel` to the depth text and
//! rounding once does not.

use std::cmp::Ordering;
use std::fmt;

// exponents beyond this are left to plain f64 parsing
const MAX_EXPONENT: i64 = 400;

/// `digits * 10^-scale`, most significant digit first.
#[derive(Debug, Clone, PartialEq)]
struct Decimal {
    negative: bool,
    digits: Vec<u8>,
    scale: usize,
}

impl Decimal {
    fn parse(text: &str) -> Option<Self> {
        let (negative, body) = match text.as_bytes().first()? {
            b'-' => (true, &text[1..]),
            b'+' => (false, &text[1..]),
            _ => (false, text),
        };
        let (mantissa, exponent) = match body.find(['e', 'E']) {
            Some(pos) => (&body[..pos], body[pos + 1..].parse::<i64>().ok()?),
            None => (body, 0),
        };
        if exponent.abs() > MAX_EXPONENT {
            return None;
        }
        let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        if int.is_empty() && frac.is_empty() {
            return None;
        }

        let mut digits = Vec::with_capacity(int.len() + frac.len());
        for b in int.bytes().chain(frac.bytes()) {
            if !b.is_ascii_digit() {
                return None;
            }
            digits.push(b - b'0');
        }
        let mut scale = frac.len() as i64 - exponent;
        if scale < 0 {
            digits.resize(digits.len() + (-scale) as usize, 0);
            scale = 0;
        }
        Some(Decimal {
            negative,
            digits,
            scale: scale as usize,
        })
    }

    // digits at a larger scale, left-padded to `len`
    fn aligned(&self, scale: usize, len: usize) -> Vec<u8> {
        let mut out = self.digits.clone();
        out.resize(out.len() + (scale - self.scale), 0);
        if out.len() < len {
            let mut padded = vec![0; len - out.len()];
            padded.extend(out);
            out = padded;
        }
        out
    }

    fn add(&self, other: &Decimal) -> Decimal {
        let scale = self.scale.max(other.scale);
        let len = (self.digits.len() + scale - self.scale)
            .max(other.digits.len() + scale - other.scale);
        let a = self.aligned(scale, len);
        let b = other.aligned(scale, len);

        let (negative, digits) = if self.negative == other.negative {
            (self.negative, add_magnitudes(&a, &b))
        } else {
            match a.cmp(&b) {
                Ordering::Less => (other.negative, sub_magnitudes(&b, &a)),
                _ => (self.negative, sub_magnitudes(&a, &b)),
            }
        };
        Decimal {
            negative,
            digits,
            scale,
        }
    }

    fn negate(mut self) -> Decimal {
        self.negative = !self.negative;
        self
    }
}

fn add_magnitudes(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = vec![0; a.len() + 1];
    let mut carry = 0;
    for i in (0..a.len()).rev() {
        let sum = a[i] + b[i] + carry;
        out[i + 1] = sum % 10;
        carry = sum / 10;
    }
    out[0] = carry;
    out
}

// `a - b` for `a >= b`
fn sub_magnitudes(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = vec![0; a.len()];
    let mut borrow = 0;
    for i in (0..a.len()).rev() {
        let mut diff = a[i] as i16 - b[i] as i16 - borrow;
        borrow = 0;
        if diff < 0 {
            diff += 10;
            borrow = 1;
        }
        out[i] = diff as u8;
    }
    out
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut digits = self.digits.clone();
        if digits.len() <= self.scale {
            let mut padded = vec![0; self.scale + 1 - digits.len()];
            padded.extend(digits);
            digits = padded;
        }
        let (int, frac) = digits.split_at(digits.len() - self.scale);
        let start = int.iter().position(|&d| d != 0).unwrap_or(int.len() - 1);
        let end = frac.iter().rposition(|&d| d != 0).map_or(0, |p| p + 1);
        let zero = int.iter().all(|&d| d == 0) && end == 0;

        if self.negative && !zero {
            f.write_str("-")?;
        }
        for &d in &int[start..] {
            write!(f, "{}", d)?;
        }
        if end > 0 {
            f.write_str(".")?;
            for &d in &frac[..end] {
                write!(f, "{}", d)?;
            }
        }
        Ok(())
    }
}

/// Every digit of a finite `x`, with no rounding.
pub(crate) fn exact(x: f64) -> String {
    let bits = x.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i64;
    let fraction = bits & ((1 << 52) - 1);
    let (mantissa, mut exponent) = if biased == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1 << 52), biased - 1075)
    };
    if mantissa == 0 {
        return "0".into();
    }
    exponent += mantissa.trailing_zeros() as i64;
    // 2^-k has exactly k decimal places
    let places = (-exponent).max(0) as usize;
    format!("{:.*}", places, x)
}

/// `a + b` evaluated exactly, rounded once to the nearest f64.
pub(crate) fn sum(a: &str, b: &str) -> Option<f64> {
    let total = Decimal::parse(a)?.add(&Decimal::parse(b)?);
    total.to_string().parse().ok()
}

/// `a - b` evaluated exactly.
pub(crate) fn difference(a: &str, b: &str) -> Option<String> {
    let total = Decimal::parse(a)?.add(&Decimal::parse(b)?.negate());
    Some(total.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_expansions() {
        assert_eq!(exact(100.0), "100");
        assert_eq!(exact(-0.0), "0");
        assert_eq!(exact(0.5), "0.5");
        assert_eq!(
            exact(0.1),
            "0.1000000000000000055511151231257827021181583404541015625"
        );
        assert_eq!(
            exact(-1.3),
            "-1.3000000000000000444089209850062616169452667236328125"
        );
    }

    #[test]
    fn sums_round_once() {
        // 0.1 + 0.2 in f64 rounds twice and lands above 0.3
        assert_eq!(sum("0.1", "0.2"), Some(0.3));
        assert_eq!(sum("-1.5", "2"), Some(0.5));
        assert_eq!(sum("2.5e2", "-0.5"), Some(249.5));
        assert_eq!(sum("1", "x"), None);
        assert_eq!(sum("", "1"), None);
    }

    #[test]
    fn differences_are_exact() {
        assert_eq!(difference("1.25", "3").as_deref(), Some("-1.75"));
        assert_eq!(difference("3", "3.000").as_deref(), Some("0"));
        assert_eq!(difference("-0.5", "-0.25").as_deref(), Some("-0.25"));
        assert_eq!(difference("99.99", "-0.01").as_deref(), Some("100"));
    }

    #[test]
    fn elevation_survives_depth_below_datum() {
        let bel: f64 = -1.3;
        let y: f64 = 0.21091117648056346;
        let depth = difference(&exact(y), &exact(bel)).unwrap();
        assert_eq!(sum(&exact(bel), &depth), Some(y));
    }
}
