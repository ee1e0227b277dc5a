/// Arbitrary-precision rational and complex numbers.
///
/// `Number` is always canonical: numerator and denominator share no common
/// factor, the denominator is at least one, and the sign lives on the
/// numerator. Every constructor and arithmetic routine re-establishes this
/// before returning, so the rest of the interpreter can rely on it.
///
/// The integer kernels (add, mul, div, gcd, modpow, isqrt) come from
/// num-bigint / num-integer; this module only layers rational bookkeeping
/// on top.

use crate::errors::ExecError;
use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{One, Signed, ToPrimitive, Zero};
use std::cmp::Ordering;
use std::fmt;

/// How a number renders: exact fractions or rounded decimal expansions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutMode {
    Real,
    Frac,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Number {
    num: BigInt,
    den: BigUint,
}

impl Number {
    /// Build a canonical rational from a signed numerator and denominator.
    /// Fails with a domain error when the denominator is zero.
    pub fn new(num: BigInt, den: BigInt) -> Result<Self, ExecError> {
        if den.is_zero() {
            return Err(ExecError::domain("division by zero"));
        }
        let (num, den) = if den.is_negative() {
            (-num, (-den).to_biguint().unwrap())
        } else {
            (num, den.to_biguint().unwrap())
        };
        Ok(Self::reduce(num, den))
    }

    fn reduce(num: BigInt, den: BigUint) -> Self {
        if num.is_zero() {
            return Number {
                num: BigInt::zero(),
                den: BigUint::one(),
            };
        }
        if den.is_one() {
            return Number { num, den };
        }
        let g = num.magnitude().gcd(&den);
        if g.is_one() {
            Number { num, den }
        } else {
            Number {
                num: num / BigInt::from(g.clone()),
                den: den / g,
            }
        }
    }

    pub fn from_int(n: BigInt) -> Self {
        Number {
            num: n,
            den: BigUint::one(),
        }
    }

    pub fn from_i64(n: i64) -> Self {
        Self::from_int(BigInt::from(n))
    }

    pub fn zero() -> Self {
        Self::from_i64(0)
    }

    pub fn one() -> Self {
        Self::from_i64(1)
    }

    pub fn numerator(&self) -> &BigInt {
        &self.num
    }

    pub fn denominator(&self) -> &BigUint {
        &self.den
    }

    pub fn is_zero(&self) -> bool {
        self.num.is_zero()
    }

    pub fn is_one(&self) -> bool {
        self.den.is_one() && self.num.is_one()
    }

    pub fn is_negative(&self) -> bool {
        self.num.is_negative()
    }

    pub fn is_integer(&self) -> bool {
        self.den.is_one()
    }

    /// Odd/even are only meaningful for integers; fractions are neither.
    pub fn is_odd(&self) -> bool {
        self.is_integer() && self.num.is_odd()
    }

    pub fn is_even(&self) -> bool {
        self.is_integer() && self.num.is_even()
    }

    pub fn to_i64(&self) -> Option<i64> {
        if self.is_integer() {
            self.num.to_i64()
        } else {
            None
        }
    }

    pub fn to_usize(&self) -> Option<usize> {
        if self.is_integer() {
            self.num.to_usize()
        } else {
            None
        }
    }

    pub fn add(&self, other: &Self) -> Self {
        let den_b = BigInt::from(other.den.clone());
        let den_a = BigInt::from(self.den.clone());
        Self::reduce(
            &self.num * &den_b + &other.num * &den_a,
            &self.den * &other.den,
        )
    }

    pub fn sub(&self, other: &Self) -> Self {
        self.add(&other.neg())
    }

    pub fn mul(&self, other: &Self) -> Self {
        Self::reduce(&self.num * &other.num, &self.den * &other.den)
    }

    pub fn div(&self, other: &Self) -> Result<Self, ExecError> {
        if other.is_zero() {
            return Err(ExecError::domain("division by zero"));
        }
        let (snum, sden) = match other.num.sign() {
            Sign::Minus => (-&self.num, other.num.magnitude().clone()),
            _ => (self.num.clone(), other.num.magnitude().clone()),
        };
        Ok(Self::reduce(
            snum * BigInt::from(other.den.clone()),
            &self.den * sden,
        ))
    }

    pub fn neg(&self) -> Self {
        Number {
            num: -&self.num,
            den: self.den.clone(),
        }
    }

    pub fn abs(&self) -> Self {
        Number {
            num: self.num.abs(),
            den: self.den.clone(),
        }
    }

    pub fn inv(&self) -> Result<Self, ExecError> {
        if self.is_zero() {
            return Err(ExecError::domain("inverse of zero"));
        }
        Ok(Self::one().div(self).unwrap())
    }

    pub fn sgn(&self) -> i64 {
        match self.num.sign() {
            Sign::Minus => -1,
            Sign::NoSign => 0,
            Sign::Plus => 1,
        }
    }

    pub fn cmp(&self, other: &Self) -> Ordering {
        let lhs = &self.num * BigInt::from(other.den.clone());
        let rhs = &other.num * BigInt::from(self.den.clone());
        lhs.cmp(&rhs)
    }

    /// Integer part, truncated toward zero.
    pub fn int_part(&self) -> Self {
        Self::from_int(&self.num / BigInt::from(self.den.clone()))
    }

    /// Fractional part: `self - int(self)`. Carries the sign of `self`.
    pub fn frac_part(&self) -> Self {
        self.sub(&self.int_part())
    }

    /// Largest integer not greater than `self`.
    pub fn floor(&self) -> Self {
        let den = BigInt::from(self.den.clone());
        Self::from_int(self.num.div_floor(&den))
    }

    /// Integer quotient of `self / other`, rounded toward zero.
    pub fn quo(&self, other: &Self) -> Result<Self, ExecError> {
        Ok(self.div(other)?.int_part())
    }

    /// `self mod other`: the result takes the sign of `other`
    /// (floored division). Zero divisor is a domain error.
    pub fn modulo(&self, other: &Self) -> Result<Self, ExecError> {
        if other.is_zero() {
            return Err(ExecError::domain("modulus by zero"));
        }
        let q = self.div(other)?.floor();
        Ok(self.sub(&other.mul(&q)))
    }

    /// Raise to an integer power. Fractional exponents are a domain error
    /// at this level (the operator requires integral exponents); negative
    /// exponents invert. Exponents that do not fit 32 bits are rejected.
    pub fn powi(&self, exp: &Self) -> Result<Self, ExecError> {
        if !exp.is_integer() {
            return Err(ExecError::domain("non-integral exponent"));
        }
        let mag = exp.num.magnitude();
        let e = mag
            .to_u32()
            .ok_or_else(|| ExecError::domain("exponent too large"))?;
        let base = Number {
            num: num_traits::Pow::pow(&self.num, e),
            den: num_traits::Pow::pow(&self.den, e),
        };
        if exp.is_negative() {
            base.inv()
        } else {
            Ok(base)
        }
    }

    pub fn square(&self) -> Self {
        self.mul(self)
    }

    /// Scale by a power of two: `self * 2^n`.
    pub fn scale(&self, n: i64) -> Self {
        if n >= 0 {
            let f = Self::from_int(BigInt::one() << (n as usize));
            self.mul(&f)
        } else {
            let f = Self::reduce(BigInt::one(), BigUint::one() << ((-n) as usize));
            self.mul(&f)
        }
    }

    /// Shift an integer left (positive count) or right (negative count).
    pub fn shift(&self, count: i64) -> Result<Self, ExecError> {
        if !self.is_integer() {
            return Err(ExecError::typ("shift of non-integer"));
        }
        if count.unsigned_abs() > 1_000_000 {
            return Err(ExecError::domain("shift count too large"));
        }
        if count >= 0 {
            Ok(Self::from_int(&self.num << (count as usize)))
        } else {
            Ok(Self::from_int(&self.num >> ((-count) as usize)))
        }
    }

    /// Bitwise AND of two integers.
    pub fn bit_and(&self, other: &Self) -> Result<Self, ExecError> {
        let (a, b) = Self::int_pair(self, other)?;
        Ok(Self::from_int(a & b))
    }

    pub fn bit_or(&self, other: &Self) -> Result<Self, ExecError> {
        let (a, b) = Self::int_pair(self, other)?;
        Ok(Self::from_int(a | b))
    }

    pub fn bit_xor(&self, other: &Self) -> Result<Self, ExecError> {
        let (a, b) = Self::int_pair(self, other)?;
        Ok(Self::from_int(a ^ b))
    }

    /// Set difference on bits: `a & ~b`.
    pub fn bit_setminus(&self, other: &Self) -> Result<Self, ExecError> {
        let (a, b) = Self::int_pair(self, other)?;
        Ok(Self::from_int(&a & &(!b)))
    }

    fn int_pair(a: &Self, b: &Self) -> Result<(BigInt, BigInt), ExecError> {
        if !a.is_integer() || !b.is_integer() {
            return Err(ExecError::typ("bitwise operation on non-integer"));
        }
        Ok((a.num.clone(), b.num.clone()))
    }

    /// Index of the highest set bit of an integer, or -1 for zero.
    pub fn highbit(&self) -> Result<i64, ExecError> {
        if !self.is_integer() {
            return Err(ExecError::typ("highbit of non-integer"));
        }
        if self.num.is_zero() {
            return Ok(-1);
        }
        Ok(self.num.magnitude().bits() as i64 - 1)
    }

    /// Index of the lowest set bit of an integer, or -1 for zero.
    pub fn lowbit(&self) -> Result<i64, ExecError> {
        if !self.is_integer() {
            return Err(ExecError::typ("lowbit of non-integer"));
        }
        if self.num.is_zero() {
            return Ok(-1);
        }
        Ok(self.num.magnitude().trailing_zeros().unwrap_or(0) as i64)
    }

    /// Whether bit `n` of an integer is set.
    pub fn bit(&self, n: i64) -> Result<bool, ExecError> {
        if !self.is_integer() {
            return Err(ExecError::typ("bit test of non-integer"));
        }
        if n < 0 {
            return Ok(false);
        }
        Ok(self.num.magnitude().bit(n as u64))
    }

    /// One-bit population of numerator plus denominator.
    pub fn content(&self) -> u64 {
        let ones = |b: &BigUint| b.to_radix_le(2).iter().filter(|&&d| d == 1).count() as u64;
        ones(self.num.magnitude()) + ones(&self.den)
    }

    /// Parse a numeric literal: decimal with optional fraction digits and
    /// exponent, or a radix-prefixed integer (0x / 0b / leading-0 octal).
    /// Returns None when the text is not a well-formed number.
    pub fn parse(text: &str) -> Option<Self> {
        if text.is_empty() {
            return None;
        }
        let bytes = text.as_bytes();
        if bytes[0] == b'0' && bytes.len() > 1 {
            match bytes[1] {
                b'x' | b'X' => {
                    return BigInt::parse_bytes(&bytes[2..], 16).map(Self::from_int);
                }
                b'b' | b'B' => {
                    return BigInt::parse_bytes(&bytes[2..], 2).map(Self::from_int);
                }
                b'0'..=b'7' => {
                    return BigInt::parse_bytes(&bytes[1..], 8).map(Self::from_int);
                }
                _ => {}
            }
        }
        // decimal: [digits][.digits][e[+-]digits]
        let (mantissa, exp) = match text.find(['e', 'E']) {
            Some(i) => {
                let e: i64 = text[i + 1..].parse().ok()?;
                (&text[..i], e)
            }
            None => (text, 0),
        };
        let (int_digits, frac_digits) = match mantissa.find('.') {
            Some(i) => (&mantissa[..i], &mantissa[i + 1..]),
            None => (mantissa, ""),
        };
        if int_digits.is_empty() && frac_digits.is_empty() {
            return None;
        }
        if !int_digits.bytes().all(|b| b.is_ascii_digit())
            || !frac_digits.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
        let mut digits = String::with_capacity(int_digits.len() + frac_digits.len());
        digits.push_str(int_digits);
        digits.push_str(frac_digits);
        let num = if digits.is_empty() {
            BigInt::zero()
        } else {
            BigInt::parse_bytes(digits.as_bytes(), 10)?
        };
        let scale = exp - frac_digits.len() as i64;
        let ten = BigUint::from(10u32);
        Some(if scale >= 0 {
            Self::from_int(num * BigInt::from(num_traits::Pow::pow(&ten, scale as usize)))
        } else {
            Self::reduce(num, num_traits::Pow::pow(&ten, (-scale) as usize))
        })
    }

    /// Render with the given output mode; `digits` bounds the decimal
    /// expansion in real mode. Inexact expansions carry a `~` prefix.
    pub fn format(&self, mode: OutMode, digits: u32) -> String {
        if self.is_integer() {
            return self.num.to_string();
        }
        match mode {
            OutMode::Frac => format!("{}/{}", self.num, self.den),
            OutMode::Real => {
                let neg = self.is_negative();
                let mag = self.abs();
                let int = mag.int_part();
                let ten_k = num_traits::Pow::pow(&BigUint::from(10u32), digits as usize);
                let frac = mag.frac_part();
                let scaled = frac.num.magnitude() * &ten_k;
                let (q, r) = scaled.div_rem(&frac.den);
                let exact = r.is_zero();
                let mut frac_str = q.to_string();
                while frac_str.len() < digits as usize {
                    frac_str.insert(0, '0');
                }
                // trim trailing zeros but keep at least one digit
                while frac_str.len() > 1 && frac_str.ends_with('0') {
                    frac_str.pop();
                }
                format!(
                    "{}{}{}.{}",
                    if exact { "" } else { "~" },
                    if neg { "-" } else { "" },
                    int.num.magnitude(),
                    frac_str
                )
            }
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(OutMode::Frac, 20))
    }
}

// ---------------------------------------------------------------------------
// Complex numbers — pairs of rationals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Complex {
    pub re: Number,
    pub im: Number,
}

impl Complex {
    pub fn new(re: Number, im: Number) -> Self {
        Complex { re, im }
    }

    pub fn from_imaginary(im: Number) -> Self {
        Complex {
            re: Number::zero(),
            im,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.re.is_zero() && self.im.is_zero()
    }

    pub fn is_real(&self) -> bool {
        self.im.is_zero()
    }

    pub fn add(&self, other: &Self) -> Self {
        Complex {
            re: self.re.add(&other.re),
            im: self.im.add(&other.im),
        }
    }

    pub fn sub(&self, other: &Self) -> Self {
        Complex {
            re: self.re.sub(&other.re),
            im: self.im.sub(&other.im),
        }
    }

    pub fn mul(&self, other: &Self) -> Self {
        Complex {
            re: self.re.mul(&other.re).sub(&self.im.mul(&other.im)),
            im: self.re.mul(&other.im).add(&self.im.mul(&other.re)),
        }
    }

    pub fn div(&self, other: &Self) -> Result<Self, ExecError> {
        if other.is_zero() {
            return Err(ExecError::domain("division by zero"));
        }
        let n = other.norm();
        Ok(Complex {
            re: self.re.mul(&other.re).add(&self.im.mul(&other.im)).div(&n)?,
            im: self.im.mul(&other.re).sub(&self.re.mul(&other.im)).div(&n)?,
        })
    }

    pub fn neg(&self) -> Self {
        Complex {
            re: self.re.neg(),
            im: self.im.neg(),
        }
    }

    pub fn conj(&self) -> Self {
        Complex {
            re: self.re.clone(),
            im: self.im.neg(),
        }
    }

    /// Square of the absolute value.
    pub fn norm(&self) -> Number {
        self.re.square().add(&self.im.square())
    }

    pub fn inv(&self) -> Result<Self, ExecError> {
        Complex {
            re: Number::one(),
            im: Number::zero(),
        }
        .div(self)
    }

    pub fn square(&self) -> Self {
        self.mul(self)
    }

    /// Integer power by square-and-multiply.
    pub fn powi(&self, exp: &Number) -> Result<Self, ExecError> {
        if !exp.is_integer() {
            return Err(ExecError::domain("non-integral exponent"));
        }
        let mut e = exp
            .numerator()
            .magnitude()
            .to_u64()
            .ok_or_else(|| ExecError::domain("exponent too large"))?;
        let mut base = self.clone();
        let mut acc = Complex {
            re: Number::one(),
            im: Number::zero(),
        };
        while e > 0 {
            if e & 1 == 1 {
                acc = acc.mul(&base);
            }
            base = base.square();
            e >>= 1;
        }
        if exp.is_negative() {
            acc.inv()
        } else {
            Ok(acc)
        }
    }

    pub fn format(&self, mode: OutMode, digits: u32) -> String {
        if self.im.is_zero() {
            return self.re.format(mode, digits);
        }
        let im_part = self.im.abs().format(mode, digits);
        if self.re.is_zero() {
            format!(
                "{}{}i",
                if self.im.is_negative() { "-" } else { "" },
                im_part
            )
        } else {
            format!(
                "{}{}{}i",
                self.re.format(mode, digits),
                if self.im.is_negative() { "-" } else { "+" },
                im_part
            )
        }
    }
}

impl fmt::Display for Complex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(OutMode::Frac, 20))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(s: &str) -> Number {
        Number::parse(s).expect("parse")
    }

    #[test]
    fn rationals_reduce_to_lowest_terms() {
        let half = Number::new(BigInt::from(3), BigInt::from(6)).unwrap();
        assert_eq!(half.numerator(), &BigInt::from(1));
        assert_eq!(half.denominator(), &BigUint::from(2u32));
        let one = half.add(&Number::new(BigInt::from(1), BigInt::from(2)).unwrap());
        assert!(one.is_one());
    }

    #[test]
    fn sign_lives_on_the_numerator() {
        let v = Number::new(BigInt::from(2), BigInt::from(-4)).unwrap();
        assert!(v.is_negative());
        assert_eq!(v.denominator(), &BigUint::from(2u32));
    }

    #[test]
    fn power_of_two_to_100() {
        let v = Number::from_i64(2).powi(&Number::from_i64(100)).unwrap();
        assert_eq!(v.to_string(), "1267650600228229401496703205376");
    }

    #[test]
    fn quo_truncates_toward_zero() {
        assert_eq!(n("7").quo(&n("2")).unwrap(), n("3"));
        assert_eq!(
            Number::from_i64(-7).quo(&n("2")).unwrap(),
            Number::from_i64(-3)
        );
    }

    #[test]
    fn modulus_takes_sign_of_divisor() {
        assert_eq!(n("7").modulo(&n("3")).unwrap(), n("1"));
        assert_eq!(
            Number::from_i64(-7).modulo(&n("3")).unwrap(),
            Number::from_i64(2)
        );
        assert_eq!(
            n("7").modulo(&Number::from_i64(-3)).unwrap(),
            Number::from_i64(-2)
        );
        assert!(n("7").modulo(&Number::zero()).is_err());
    }

    #[test]
    fn division_by_zero_fails() {
        assert!(n("1").div(&Number::zero()).is_err());
    }

    #[test]
    fn literal_forms() {
        assert_eq!(n("0x10"), Number::from_i64(16));
        assert_eq!(n("0b101"), Number::from_i64(5));
        assert_eq!(n("017"), Number::from_i64(15));
        assert_eq!(n("2.5"), Number::new(BigInt::from(5), BigInt::from(2)).unwrap());
        assert_eq!(n("1e3"), Number::from_i64(1000));
        assert_eq!(n(".5"), Number::new(BigInt::from(1), BigInt::from(2)).unwrap());
    }

    #[test]
    fn real_mode_display() {
        let third = Number::new(BigInt::from(1), BigInt::from(3)).unwrap();
        assert_eq!(third.format(OutMode::Real, 5), "~0.33333");
        let q = Number::new(BigInt::from(1), BigInt::from(4)).unwrap();
        assert_eq!(q.format(OutMode::Real, 5), "0.25");
    }

    #[test]
    fn complex_division() {
        let a = Complex::new(n("1"), n("1"));
        let b = Complex::new(n("0"), n("1"));
        let q = a.div(&b).unwrap();
        assert_eq!(q.re, n("1"));
        assert_eq!(q.im, Number::from_i64(-1));
    }
}
