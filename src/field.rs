//! Finite field arithmetic for the share and correlation layers.
//!
//! The modulus is a compile-time parameter of [`Fp`], so protocol code
//! monomorphizes over [`Field`] instead of dispatching at runtime. Equality
//! is constant-time; the remaining operations reduce by a public modulus and
//! are not constant-time in the operand values.

use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign},
};

use rand::Rng;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use subtle::{Choice, ConstantTimeEq};

/// A prime field chosen at compile time.
///
/// Everything the engine shares, authenticates, or opens is an element of a
/// type implementing this trait.
pub trait Field:
    'static
    + fmt::Debug
    + Default
    + Copy
    + Eq
    + Send
    + Sync
    + Add<Output = Self>
    + AddAssign
    + Sub<Output = Self>
    + SubAssign
    + Neg<Output = Self>
    + Mul<Output = Self>
    + MulAssign
    + Sum
    + ConstantTimeEq
    + Serialize
    + DeserializeOwned
{
    /// The neutral element of addition.
    const ZERO: Self;
    /// The neutral element of multiplication.
    const ONE: Self;
    /// Bits needed to represent any element; also the number of rows in the
    /// gadget decomposition used by the correlation generators.
    const BITS: usize;

    /// A uniformly random element.
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self;

    /// Map 16 uniformly random bytes to a (statistically close to uniform)
    /// element.
    fn from_uniform_bytes(bytes: [u8; 16]) -> Self;

    /// The gadget weight 2^k.
    fn two_pow(k: usize) -> Self;

    /// Little-endian bits of the canonical representative, [`Field::BITS`]
    /// entries.
    fn bit_decompose(&self) -> Vec<bool>;

    /// Σ bits\[k\]·2^k for up to 128 bits.
    fn from_bits(bits: &[bool]) -> Self;

    /// Σ a\[i\]·b\[i\]. Assumes both slices have equal length.
    fn inner_product(a: &[Self], b: &[Self]) -> Self {
        a.iter().zip(b).map(|(a, b)| *a * *b).sum()
    }
}

/// The prime field of integers modulo `P`.
///
/// `P` must be an odd prime below 2^63. Elements are stored as canonical
/// representatives in `0..P`; deserialization reduces, so no out-of-range
/// value can enter through the wire.
#[derive(Clone, Copy, Default, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub struct Fp<const P: u64>(u64);

/// 61-bit Mersenne prime field, the production default.
pub type F61 = Fp<2305843009213693951>;

/// The field of integers mod 97, big enough only for tests.
pub type F97 = Fp<97>;

impl<const P: u64> Fp<P> {
    #[inline]
    const fn reduce(v: u128) -> Self {
        Self((v % P as u128) as u64)
    }

    /// The canonical representative in `0..P`.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

const fn bits_of(p: u64) -> usize {
    (64 - (p - 1).leading_zeros()) as usize
}

impl<const P: u64> Field for Fp<P> {
    const ZERO: Self = Self(0);
    const ONE: Self = Self(1 % P);
    const BITS: usize = bits_of(P);

    #[inline]
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::reduce(rng.random::<u128>())
    }

    #[inline]
    fn from_uniform_bytes(bytes: [u8; 16]) -> Self {
        Self::reduce(u128::from_le_bytes(bytes))
    }

    #[inline]
    fn two_pow(k: usize) -> Self {
        debug_assert!(k < 128);
        Self::reduce(1_u128 << k)
    }

    fn bit_decompose(&self) -> Vec<bool> {
        (0..Self::BITS).map(|k| self.0 >> k & 1 == 1).collect()
    }

    fn from_bits(bits: &[bool]) -> Self {
        debug_assert!(bits.len() <= 128);
        let mut acc = 0_u128;
        for (k, bit) in bits.iter().enumerate() {
            acc |= (*bit as u128) << k;
        }
        Self::reduce(acc)
    }
}

impl<const P: u64> Add for Fp<P> {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::reduce(self.0 as u128 + rhs.0 as u128)
    }
}

impl<const P: u64> AddAssign for Fp<P> {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<const P: u64> Sub for Fp<P> {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::reduce(P as u128 + self.0 as u128 - rhs.0 as u128)
    }
}

impl<const P: u64> SubAssign for Fp<P> {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl<const P: u64> Neg for Fp<P> {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self::ZERO - self
    }
}

impl<const P: u64> Mul for Fp<P> {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self::reduce(self.0 as u128 * rhs.0 as u128)
    }
}

impl<const P: u64> MulAssign for Fp<P> {
    #[inline]
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl<const P: u64> Sum for Fp<P> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<const P: u64> ConstantTimeEq for Fp<P> {
    #[inline]
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0.ct_eq(&other.0)
    }
}

impl<const P: u64> PartialEq for Fp<P> {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl<const P: u64> Eq for Fp<P> {}

impl<const P: u64> From<u64> for Fp<P> {
    #[inline]
    fn from(v: u64) -> Self {
        Self::reduce(v as u128)
    }
}

impl<const P: u64> From<Fp<P>> for u64 {
    #[inline]
    fn from(v: Fp<P>) -> u64 {
        v.0
    }
}

impl<const P: u64> fmt::Debug for Fp<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<const P: u64> fmt::Display for Fp<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
