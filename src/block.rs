//! A 128-bit [`Block`] used for PRG seeds and consistency-check accumulators.
use std::{
    fmt,
    ops::{BitAnd, BitAndAssign, BitXor, BitXorAssign},
};

use aes::cipher::{self, array::sizes};
use bytemuck::{Pod, Zeroable};
use rand::{Rng, distr::StandardUniform, prelude::Distribution};
use serde::{Deserialize, Serialize};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};
use wide::u8x16;

/// A 128-bit block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, Pod, Zeroable)]
#[repr(transparent)]
pub struct Block(u8x16);

impl Block {
    /// All bits set to 0.
    pub const ZERO: Self = Self(u8x16::ZERO);
    /// Lsb set to 1, all others zero.
    pub const ONE: Self = Self::new(1_u128.to_ne_bytes());

    /// 16 bytes in a Block.
    pub const BYTES: usize = 16;
    /// 128 bits in a Block.
    pub const BITS: usize = 128;

    /// Create a new block from bytes.
    #[inline]
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(u8x16::new(bytes))
    }

    /// Bytes of the block.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_array_ref()
    }

    /// Mutable bytes of the block.
    #[inline]
    pub fn as_mut_bytes(&mut self) -> &mut [u8; 16] {
        self.0.as_array_mut()
    }

    /// Computes self * b, where b is `bool` in constant time.
    #[inline]
    pub fn const_mul(&self, b: bool) -> Block {
        Block::conditional_select(&Block::ZERO, self, Choice::from(u8::from(b)))
    }

    /// Carryless multiplication of two Blocks as polynomials over GF(2).
    ///
    /// Returns (low, high) bits. The product is left unreduced; the
    /// consistency checks only ever compare accumulated (low, high) pairs.
    #[inline]
    pub fn clmul(&self, rhs: &Self) -> (Self, Self) {
        let (low, high) = clmul128(u128::from(self), u128::from(rhs));
        (low.into(), high.into())
    }
}

impl BitAnd for Block {
    type Output = Self;

    #[inline]
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for Block {
    #[inline]
    fn bitand_assign(&mut self, rhs: Self) {
        *self = *self & rhs;
    }
}

impl BitXor for Block {
    type Output = Self;

    #[inline]
    fn bitxor(self, rhs: Self) -> Self {
        Self(self.0 ^ rhs.0)
    }
}

impl BitXorAssign for Block {
    #[inline]
    fn bitxor_assign(&mut self, rhs: Self) {
        *self = *self ^ rhs;
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        let a: u128 = (*self).into();
        let b: u128 = (*other).into();
        a.ct_eq(&b).into()
    }
}

impl Eq for Block {}

impl Distribution<Block> for StandardUniform {
    #[inline]
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Block {
        let mut bytes = [0; 16];
        rng.fill_bytes(&mut bytes);
        Block::new(bytes)
    }
}

impl AsRef<[u8]> for Block {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsMut<[u8]> for Block {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_bytes()
    }
}

impl From<Block> for cipher::Array<u8, sizes::U16> {
    #[inline]
    fn from(value: Block) -> Self {
        Self(*value.as_bytes())
    }
}

impl From<cipher::Array<u8, sizes::U16>> for Block {
    #[inline]
    fn from(value: cipher::Array<u8, sizes::U16>) -> Self {
        Self::new(value.0)
    }
}

impl From<[u8; 16]> for Block {
    #[inline]
    fn from(value: [u8; 16]) -> Self {
        Self::new(value)
    }
}

impl From<Block> for [u8; 16] {
    fn from(value: Block) -> Self {
        *value.as_bytes()
    }
}

impl From<Block> for u128 {
    #[inline]
    fn from(value: Block) -> Self {
        u128::from_ne_bytes(*value.as_bytes())
    }
}

impl From<&Block> for u128 {
    #[inline]
    fn from(value: &Block) -> Self {
        u128::from_ne_bytes(*value.as_bytes())
    }
}

impl From<usize> for Block {
    fn from(value: usize) -> Self {
        (value as u128).into()
    }
}

impl From<u128> for Block {
    #[inline]
    fn from(value: u128) -> Self {
        Self::new(value.to_ne_bytes())
    }
}

impl ConditionallySelectable for Block {
    #[inline]
    fn conditional_select(a: &Self, b: &Self, choice: Choice) -> Self {
        // choice = 0 => mask = 0000...0000, choice = 1 => mask = 1111...1111
        let mask = Block::new((-(choice.unwrap_u8() as i128)).to_le_bytes());
        *a ^ (mask & (*a ^ *b))
    }
}

impl fmt::Binary for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Binary::fmt(&u128::from(*self), f)
    }
}

/// Carry-less multiply of two 128-bit numbers.
///
/// Karatsuba over three 64-bit carry-less multiplies. Returns (low, high).
#[inline]
fn clmul128(a: u128, b: u128) -> (u128, u128) {
    let (a_low, a_high) = (a as u64, (a >> 64) as u64);
    let (b_low, b_high) = (b as u64, (b >> 64) as u64);

    let ab_low = clmul64(a_low, b_low);
    let ab_high = clmul64(a_high, b_high);
    let ab_mid = clmul64(a_low ^ a_high, b_low ^ b_high) ^ ab_low ^ ab_high;
    let low = ab_low ^ (ab_mid << 64);
    let high = ab_high ^ (ab_mid >> 64);
    (low, high)
}

/// Full 64×64 carry-less multiply.
///
/// [`bmul64`] yields the low half directly; the high half comes from
/// [`bmul64`] on bit-reversed operands, since reversing both operands
/// reverses the 127-bit product.
#[inline]
fn clmul64(x: u64, y: u64) -> u128 {
    let low = bmul64(x, y);
    let high = bmul64(x.reverse_bits(), y.reverse_bits()).reverse_bits() >> 1;
    (high as u128) << 64 | low as u128
}

/// Multiply in GF(2)[X], truncated to the low 64 bits of the product, via
/// integer multiplies on four interleaved nibble lanes
/// (<https://www.bearssl.org/constanttime.html#ghash-for-gcm>). Constant
/// time.
///
/// Integer carries sink into the zero holes between lane digits and get
/// masked away. The one column sum the holes cannot absorb, a fully
/// populated lane column of 16 addends, carries into bit 64 or above and
/// falls outside the truncated result.
#[inline]
fn bmul64(x: u64, y: u64) -> u64 {
    const LANES: [u64; 4] = [
        0x1111_1111_1111_1111,
        0x2222_2222_2222_2222,
        0x4444_4444_4444_4444,
        0x8888_8888_8888_8888,
    ];
    let xs = LANES.map(|m| x & m);
    let ys = LANES.map(|m| y & m);

    let mut z = [0_u64; 4];
    for i in 0..4 {
        for j in 0..4 {
            z[(i + j) % 4] ^= xs[i].wrapping_mul(ys[j]);
        }
    }

    let mut out = 0;
    for (zi, m) in z.into_iter().zip(LANES) {
        out |= zi & m;
    }
    out
}

#[cfg(test)]
mod tests {
    use rand::{Rng, rng};
    use subtle::{Choice, ConditionallySelectable};

    use super::{Block, clmul128};

    /// Bit-at-a-time carry-less multiply used as a reference.
    fn clmul128_naive(a: u128, b: u128) -> (u128, u128) {
        let (mut low, mut high) = (0_u128, 0_u128);
        for i in 0..128 {
            if b >> i & 1 == 1 {
                low ^= a << i;
                if i > 0 {
                    high ^= a >> (128 - i);
                }
            }
        }
        (low, high)
    }

    #[test]
    fn test_block_cond_select() {
        let b = Block::from(0xabcd_u128);
        assert_eq!(
            Block::ZERO,
            Block::conditional_select(&Block::ZERO, &b, Choice::from(0))
        );
        assert_eq!(
            b,
            Block::conditional_select(&Block::ZERO, &b, Choice::from(1))
        );
        assert_eq!(Block::ZERO, b.const_mul(false));
        assert_eq!(b, b.const_mul(true));
    }

    #[test]
    fn test_clmul_one() {
        let a = Block::from(0x1983_1239_1239_1624_8127_0312_7301_2381_u128);
        assert_eq!((a, Block::ZERO), a.clmul(&Block::ONE));
        assert_eq!((Block::ZERO, Block::ZERO), a.clmul(&Block::ZERO));
    }

    #[test]
    fn test_clmul_shift() {
        // multiplying by x shifts the polynomial up by one bit
        let a = 0x1983_1239_1239_1624_8127_0312_7301_2381_u128;
        let (low, high) = clmul128(a, 2);
        assert_eq!(a << 1, low);
        assert_eq!(a >> 127, high);
    }

    #[test]
    fn test_clmul_matches_naive() {
        for _ in 0..100 {
            let (a, b) = rng().random::<(u128, u128)>();
            assert_eq!(clmul128_naive(a, b), clmul128(a, b));
        }
    }

    #[test]
    fn test_clmul_dense_operands() {
        // operands that fully populate the column sums of the sliced
        // integer multiplies, where a stray carry would reach a kept digit
        let dense = [
            0x1111_1111_1111_1111_u128,
            0x8888_8888_8888_8888_u128,
            u64::MAX as u128,
            (u64::MAX as u128) << 64,
            u128::MAX,
        ];
        for a in dense {
            for b in dense {
                assert_eq!(clmul128_naive(a, b), clmul128(a, b), "{a:#x} * {b:#x}");
            }
        }
    }
}
