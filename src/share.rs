//! Authenticated secret shares and the correlated randomness built from
//! them.
//!
//! A secret x is held as additive fragments x_i with Σ x_i = x, together
//! with MAC fragments m_i with Σ m_i = x·α for the additively shared global
//! key α = Σ α_i. Linear operations are local. Multiplications consume a
//! [`Triple`], random bits a [`RandomBit`]; both are deliberately
//! non-cloneable so a piece of correlated randomness can never enter two
//! computations.

use std::{
    iter::Sum,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
};

use crate::field::Field;

/// One party's fragment of an authenticated secret-shared value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Share<F> {
    /// The additive fragment of the value.
    pub val: F,
    /// The additive fragment of the MAC on the value.
    pub mac: F,
}

impl<F: Field> Share<F> {
    /// The all-zero share, a valid sharing of 0 under any key.
    pub fn zero() -> Self {
        Share {
            val: F::ZERO,
            mac: F::ZERO,
        }
    }

    /// Shares of the public constant `c`.
    ///
    /// Exactly one party (the `adjuster`, by convention party 0) absorbs `c`
    /// into its value fragment; every party adds `c·α_i` to its MAC
    /// fragment, which keeps Σ mac = c·α without any interaction.
    pub fn from_public(c: F, adjuster: bool, alpha: F) -> Self {
        Share {
            val: if adjuster { c } else { F::ZERO },
            mac: c * alpha,
        }
    }

    /// Adds the public constant `c` to this share.
    pub fn add_public(&self, c: F, adjuster: bool, alpha: F) -> Self {
        *self + Share::from_public(c, adjuster, alpha)
    }
}

impl<F: Field> Add for Share<F> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Share {
            val: self.val + rhs.val,
            mac: self.mac + rhs.mac,
        }
    }
}

impl<F: Field> AddAssign for Share<F> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<F: Field> Sub for Share<F> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Share {
            val: self.val - rhs.val,
            mac: self.mac - rhs.mac,
        }
    }
}

impl<F: Field> SubAssign for Share<F> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl<F: Field> Neg for Share<F> {
    type Output = Self;

    fn neg(self) -> Self {
        Share {
            val: -self.val,
            mac: -self.mac,
        }
    }
}

/// Multiplication by a public scalar.
impl<F: Field> Mul<F> for Share<F> {
    type Output = Self;

    fn mul(self, rhs: F) -> Self {
        Share {
            val: self.val * rhs,
            mac: self.mac * rhs,
        }
    }
}

impl<F: Field> Sum for Share<F> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Share::zero(), Add::add)
    }
}

/// One party's share of a multiplication triple (a, b, c) with c = a·b.
///
/// Not `Clone`: a consumed triple is gone. Reusing one across two
/// multiplications would leak the difference of the masked secrets through
/// the openings.
///
/// ```compile_fail
/// use polysum::{field::F61, share::Triple};
///
/// fn duplicate(triple: &Triple<F61>) -> Triple<F61> {
///     triple.clone()
/// }
/// ```
#[derive(Debug)]
pub struct Triple<F> {
    /// Share of the random factor a.
    pub a: Share<F>,
    /// Share of the random factor b.
    pub b: Share<F>,
    /// Share of the product c = a·b.
    pub c: Share<F>,
}

/// One party's share of a uniformly random bit, encoded as 0 or 1 in the
/// field.
///
/// Not `Clone` for the same reason as [`Triple`].
#[derive(Debug)]
pub struct RandomBit<F>(pub Share<F>);

impl<F> RandomBit<F> {
    /// Consumes the bit, yielding its share for further arithmetic.
    pub fn into_share(self) -> Share<F> {
        self.0
    }
}

/// One party's share of an input mask, a random value that exactly one
/// party (the input owner) also holds in the clear.
///
/// Not `Clone` for the same reason as [`Triple`]: a mask reused for two
/// inputs would reveal the difference of the inputs.
#[derive(Debug)]
pub struct InputMask<F> {
    /// Share of the random mask.
    pub share: Share<F>,
    /// The mask itself, `Some` only for the owner.
    pub clear: Option<F>,
}

#[cfg(test)]
pub(crate) mod tests {
    use rand::Rng;

    use super::*;
    use crate::field::{F97, Field};

    /// Sample an authenticated n-party sharing of x under fresh key shares.
    pub(crate) fn share_under_key<F: Field>(
        rng: &mut impl Rng,
        x: F,
        alphas: &[F],
    ) -> Vec<Share<F>> {
        let n = alphas.len();
        let alpha: F = alphas.iter().copied().sum();
        let mac = x * alpha;
        let mut shares = Vec::with_capacity(n);
        let (mut val_sum, mut mac_sum) = (F::ZERO, F::ZERO);
        for _ in 0..n - 1 {
            let share = Share {
                val: F::random(rng),
                mac: F::random(rng),
            };
            val_sum += share.val;
            mac_sum += share.mac;
            shares.push(share);
        }
        shares.push(Share {
            val: x - val_sum,
            mac: mac - mac_sum,
        });
        shares
    }

    fn reconstruct<F: Field>(shares: &[Share<F>]) -> (F, F) {
        (
            shares.iter().map(|s| s.val).sum(),
            shares.iter().map(|s| s.mac).sum(),
        )
    }

    #[test]
    fn test_linear_ops_preserve_macs() {
        let mut rng = rand::rng();
        let alphas = [F97::from(11), F97::from(31), F97::from(5)];
        let alpha: F97 = alphas.iter().copied().sum();
        let (x, y) = (F97::from(42), F97::from(77));
        let xs = share_under_key(&mut rng, x, &alphas);
        let ys = share_under_key(&mut rng, y, &alphas);

        let sums: Vec<_> = xs.iter().zip(&ys).map(|(x, y)| *x + *y).collect();
        assert_eq!((x + y, (x + y) * alpha), reconstruct(&sums));

        let diffs: Vec<_> = xs.iter().zip(&ys).map(|(x, y)| *x - *y).collect();
        assert_eq!((x - y, (x - y) * alpha), reconstruct(&diffs));

        let c = F97::from(13);
        let scaled: Vec<_> = xs.iter().map(|x| *x * c).collect();
        assert_eq!((x * c, x * c * alpha), reconstruct(&scaled));
    }

    #[test]
    fn test_public_constant_injection() {
        let mut rng = rand::rng();
        let alphas = [F97::from(8), F97::from(19)];
        let alpha: F97 = alphas.iter().copied().sum();
        let x = F97::from(30);
        let c = F97::from(60);
        let xs = share_under_key(&mut rng, x, &alphas);

        let adjusted: Vec<_> = xs
            .iter()
            .enumerate()
            .map(|(i, share)| share.add_public(c, i == 0, alphas[i]))
            .collect();
        assert_eq!((x + c, (x + c) * alpha), reconstruct(&adjusted));
    }
}
