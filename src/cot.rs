//! Oblivious product shares from correlated OT extension.
//!
//! A directed session connects a pad sender holding left factors and a
//! choice holder holding right factors. Per batch, the two sides obtain
//! additive shares of the element-wise products `lhs[t]·rhs[t]`: the right
//! factors enter bit by bit, one oblivious transfer per gadget row, and one
//! masked correction per transfer moves the left factor into the share of
//! the selecting side (cf. <https://eprint.iacr.org/2016/505>, the product
//! sharing goes back to Gilboa's oblivious polynomial evaluation).
//!
//! The transfers come from an OT extension seeded with the base OT bundles
//! dealt at setup. Each batch extends all transfers at once and ends with
//! the Keller-Orsini-Scholl consistency check
//! (cf. <https://eprint.iacr.org/2015/546>): both sides draw one random
//! 128-bit coefficient per column from a jointly tossed seed, accumulate
//! carryless products of their columns, and the choice holder opens its
//! accumulator together with the combined choice bits. A choice holder that
//! used inconsistent choices across rows slips through with probability at
//! most 2^-SSP, paid for by SSP extra masking columns per batch.

use rand::{Rng, RngCore, SeedableRng};
use tracing::{Level, debug, instrument};

use crate::{
    aes_rng::AesRng,
    baseot::{ChosenSeeds, EXT_SEEDS, SeedPairs},
    block::Block,
    channel::{Channel, recv_vec_from, send_to},
    cointoss::shared_rng_with,
    error::Error,
    field::Field,
    transpose::transpose_bitmatrix,
};

/// Statistical security parameter of the consistency check, in bits. The
/// check opens this many extra masking columns per batch.
const SSP: usize = 40;

/// Hashes one column block into a field element, the pad of one transfer.
fn pad<F: Field>(index: usize, block: Block) -> F {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(index as u64).to_le_bytes());
    hasher.update(block.as_bytes());
    let mut buf = [0_u8; 16];
    hasher.finalize_xof().fill(&mut buf);
    F::from_uniform_bytes(buf)
}

/// Packs bits into bytes, least significant bit first, zero-padding the
/// last byte.
fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0_u8; bits.len().div_ceil(8)];
    for (j, bit) in bits.iter().enumerate() {
        bytes[j / 8] |= (*bit as u8) << (j % 8);
    }
    bytes
}

/// The pad-sending side of a directed product session. It knows both pads
/// of every transfer, but not which one the peer selected.
pub(crate) struct CotSender {
    party: usize,
    peer: usize,
    bits: Vec<bool>,
    s: Block,
    rngs: Vec<AesRng>,
    transfers: usize,
}

impl CotSender {
    /// Creates the session from the secret extension choice bits and the
    /// base OT seeds they selected.
    pub(crate) fn new(party: usize, peer: usize, seeds: &ChosenSeeds) -> Self {
        debug_assert_eq!(EXT_SEEDS, seeds.bits.len());
        let mut packed = 0_u128;
        for (r, bit) in seeds.bits.iter().enumerate() {
            packed |= (*bit as u128) << r;
        }
        CotSender {
            party,
            peer,
            bits: seeds.bits.clone(),
            s: Block::from(packed),
            rngs: seeds.seeds.iter().map(|s| AesRng::from_seed(*s)).collect(),
            transfers: 0,
        }
    }

    /// Extends `count` transfers, returning the column block q_j per
    /// transfer. The peer's column is t_j = q_j ⊕ r_j·s for its choice
    /// bit r_j.
    async fn extend(&mut self, channel: &impl Channel, count: usize) -> Result<Vec<Block>, Error> {
        let cols = count.next_multiple_of(8) + Block::BITS + SSP;
        let width = cols / 8;
        let rows: Vec<u8> = recv_vec_from(channel, self.peer, "cot ext", EXT_SEEDS * width).await?;
        let mut q = vec![0_u8; EXT_SEEDS * width];
        for (r, (bit, rng)) in self.bits.iter().zip(self.rngs.iter_mut()).enumerate() {
            let row = &mut q[r * width..(r + 1) * width];
            rng.fill_bytes(row);
            if *bit {
                for (q, u) in row.iter_mut().zip(&rows[r * width..(r + 1) * width]) {
                    *q ^= u;
                }
            }
        }
        let mut transposed = vec![0_u8; q.len()];
        transpose_bitmatrix(&q, &mut transposed, EXT_SEEDS);
        let mut qs: Vec<Block> = transposed
            .chunks_exact(Block::BYTES)
            .map(|c| Block::new(c.try_into().expect("chunks are 16 bytes")))
            .collect();

        // check all columns, the masking tail included
        let mut shared = shared_rng_with(channel, self.party, self.peer).await?;
        let mut q0 = Block::ZERO;
        let mut q1 = Block::ZERO;
        for q in &qs {
            let chi: Block = shared.random();
            let (lo, hi) = q.clmul(&chi);
            q0 ^= lo;
            q1 ^= hi;
        }
        let proof: Vec<Block> = recv_vec_from(channel, self.peer, "cot check", 3).await?;
        // honest transcripts satisfy (t0, t1) = (q0, q1) ⊕ x⊗s
        let (lo, hi) = proof[0].clmul(&self.s);
        if proof[1] != q0 ^ lo || proof[2] != q1 ^ hi {
            return Err(Error::CotCheck);
        }
        qs.truncate(count);
        Ok(qs)
    }

    /// Runs one batch over the left factors, returning this side's share
    /// of each product. The shares of the peer's matching call satisfy
    /// `own[t] + their[t] = lhs[t]·rhs[t]`.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub(crate) async fn products<F: Field>(
        &mut self,
        channel: &impl Channel,
        lhs: &[F],
    ) -> Result<Vec<F>, Error> {
        if lhs.is_empty() {
            return Ok(Vec::new());
        }
        debug!(peer = self.peer, count = lhs.len(), "sharing products as pad sender");
        let count = lhs.len() * F::BITS;
        let qs = self.extend(channel, count).await?;
        let base = self.transfers;
        self.transfers += count;

        let mut corrections = Vec::with_capacity(count);
        let mut shares = Vec::with_capacity(lhs.len());
        for (t, a) in lhs.iter().enumerate() {
            let mut share = F::ZERO;
            for k in 0..F::BITS {
                let j = t * F::BITS + k;
                let w0: F = pad(base + j, qs[j]);
                let w1: F = pad(base + j, qs[j] ^ self.s);
                corrections.push(w0 - w1 + *a);
                share += F::two_pow(k) * w0;
            }
            shares.push(-share);
        }
        send_to(channel, self.peer, "cot pads", &corrections).await?;
        Ok(shares)
    }
}

/// The choice-holding side of a directed product session.
pub(crate) struct CotReceiver {
    party: usize,
    peer: usize,
    rngs: Vec<(AesRng, AesRng)>,
    transfers: usize,
}

impl CotReceiver {
    /// Creates the session from both base OT seeds per extension row.
    pub(crate) fn new(party: usize, peer: usize, pairs: &SeedPairs) -> Self {
        debug_assert_eq!(EXT_SEEDS, pairs.pairs.len());
        CotReceiver {
            party,
            peer,
            rngs: pairs
                .pairs
                .iter()
                .map(|(s0, s1)| (AesRng::from_seed(*s0), AesRng::from_seed(*s1)))
                .collect(),
            transfers: 0,
        }
    }

    /// Extends one transfer per choice bit, returning the column block
    /// t_j = q_j ⊕ r_j·s per transfer.
    async fn extend(
        &mut self,
        channel: &impl Channel,
        choices: &[bool],
    ) -> Result<Vec<Block>, Error> {
        let cols = choices.len().next_multiple_of(8) + Block::BITS + SSP;
        let width = cols / 8;
        // fresh random choices for the masking tail, opened by the check
        let mut r = choices.to_vec();
        let mut local_rng = AesRng::new();
        r.extend((choices.len()..cols).map(|_| local_rng.random::<bool>()));
        let packed = pack_bits(&r);

        let mut t = vec![0_u8; EXT_SEEDS * width];
        let mut rows = vec![0_u8; EXT_SEEDS * width];
        for (idx, (rng0, rng1)) in self.rngs.iter_mut().enumerate() {
            let row0 = &mut t[idx * width..(idx + 1) * width];
            rng0.fill_bytes(row0);
            let row1 = &mut rows[idx * width..(idx + 1) * width];
            rng1.fill_bytes(row1);
            for ((u, t), r) in row1.iter_mut().zip(row0).zip(&packed) {
                *u ^= *t ^ *r;
            }
        }
        send_to(channel, self.peer, "cot ext", &rows).await?;
        let mut transposed = vec![0_u8; t.len()];
        transpose_bitmatrix(&t, &mut transposed, EXT_SEEDS);
        let mut ts: Vec<Block> = transposed
            .chunks_exact(Block::BYTES)
            .map(|c| Block::new(c.try_into().expect("chunks are 16 bytes")))
            .collect();

        let mut shared = shared_rng_with(channel, self.party, self.peer).await?;
        let mut x = Block::ZERO;
        let mut t0 = Block::ZERO;
        let mut t1 = Block::ZERO;
        for (j, t) in ts.iter().enumerate() {
            let chi: Block = shared.random();
            x ^= chi.const_mul(r[j]);
            let (lo, hi) = t.clmul(&chi);
            t0 ^= lo;
            t1 ^= hi;
        }
        send_to(channel, self.peer, "cot check", &[x, t0, t1]).await?;
        ts.truncate(choices.len());
        Ok(ts)
    }

    /// Runs one batch over the right factors, returning this side's share
    /// of each product.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub(crate) async fn products<F: Field>(
        &mut self,
        channel: &impl Channel,
        rhs: &[F],
    ) -> Result<Vec<F>, Error> {
        if rhs.is_empty() {
            return Ok(Vec::new());
        }
        debug!(peer = self.peer, count = rhs.len(), "sharing products as choice holder");
        let mut choices = Vec::with_capacity(rhs.len() * F::BITS);
        for b in rhs {
            choices.extend(b.bit_decompose());
        }
        let ts = self.extend(channel, &choices).await?;
        let base = self.transfers;
        self.transfers += choices.len();

        let corrections: Vec<F> =
            recv_vec_from(channel, self.peer, "cot pads", choices.len()).await?;
        let mut shares = Vec::with_capacity(rhs.len());
        for t in 0..rhs.len() {
            let mut share = F::ZERO;
            for k in 0..F::BITS {
                let j = t * F::BITS + k;
                // y_j = w0_j + r_j·a_t once the correction is applied
                let mut y: F = pad(base + j, ts[j]);
                if choices[j] {
                    y += corrections[j];
                }
                share += F::two_pow(k) * y;
            }
            shares.push(share);
        }
        Ok(shares)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rand::rng;

    use super::*;
    use crate::{
        baseot::deal_all,
        channel::SimpleChannel,
        field::{F61, Field},
    };

    #[test]
    fn test_pack_bits_lsb_first() {
        let bits = [true, false, false, false, false, false, false, false, true];
        assert_eq!(vec![0b0000_0001, 0b0000_0001], pack_bits(&bits));
    }

    fn dealt_sessions() -> (CotSender, CotReceiver) {
        let setups = deal_all(&mut rng(), 2, F61::BITS);
        let sender = CotSender::new(0, 1, setups[0].ext_send_seeds[1].as_ref().unwrap());
        let receiver = CotReceiver::new(1, 0, setups[1].ext_recv_seeds[0].as_ref().unwrap());
        (sender, receiver)
    }

    #[tokio::test]
    async fn test_shares_sum_to_products() -> Result<(), Error> {
        let (mut sender, mut receiver) = dealt_sessions();
        let mut channels = SimpleChannel::channels(2);
        let ch_r = channels.pop().unwrap();
        let ch_s = channels.pop().unwrap();
        let lhs: Vec<F61> = (0..40).map(|_| F61::random(&mut rng())).collect();
        let rhs: Vec<F61> = (0..40).map(|_| F61::random(&mut rng())).collect();
        let (lhs_input, rhs_input) = (lhs.clone(), rhs.clone());
        let send = tokio::spawn(async move {
            let mut shares = sender.products::<F61>(&ch_s, &lhs_input).await?;
            shares.extend(sender.products::<F61>(&ch_s, &lhs_input).await?);
            Ok::<_, Error>(shares)
        });
        let recv = tokio::spawn(async move {
            let mut shares = receiver.products::<F61>(&ch_r, &rhs_input).await?;
            shares.extend(receiver.products::<F61>(&ch_r, &rhs_input).await?);
            Ok::<_, Error>(shares)
        });
        let left = send.await.unwrap()?;
        let right = recv.await.unwrap()?;
        assert_eq!(80, left.len());
        for (t, (l, r)) in left.iter().zip(&right).enumerate() {
            assert_eq!(lhs[t % 40] * rhs[t % 40], *l + *r);
        }
        Ok(())
    }

    /// Channel wrapper flipping a bit in every payload byte of the first
    /// message it sends.
    struct Corrupting<C> {
        inner: C,
        sends: AtomicUsize,
    }

    impl<C: Channel + Sync> Channel for Corrupting<C> {
        type SendError = C::SendError;
        type RecvError = C::RecvError;

        async fn send_bytes_to(&self, party: usize, mut msg: Vec<u8>) -> Result<(), C::SendError> {
            if self.sends.fetch_add(1, Ordering::SeqCst) == 0 {
                for byte in msg.iter_mut().skip(8) {
                    *byte ^= 1;
                }
            }
            self.inner.send_bytes_to(party, msg).await
        }

        async fn recv_bytes_from(&self, party: usize) -> Result<Vec<u8>, C::RecvError> {
            self.inner.recv_bytes_from(party).await
        }
    }

    #[tokio::test]
    async fn test_tampered_extension_abort() {
        let (mut sender, mut receiver) = dealt_sessions();
        let mut channels = SimpleChannel::channels(2);
        let ch_r = Corrupting {
            inner: channels.pop().unwrap(),
            sends: AtomicUsize::new(0),
        };
        let ch_s = channels.pop().unwrap();
        let send = tokio::spawn(async move {
            let lhs: Vec<F61> = (0..10).map(|_| F61::random(&mut rng())).collect();
            sender.products::<F61>(&ch_s, &lhs).await
        });
        let recv = tokio::spawn(async move {
            let rhs: Vec<F61> = (0..10).map(|_| F61::random(&mut rng())).collect();
            receiver.products::<F61>(&ch_r, &rhs).await
        });
        let err = send.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::CotCheck), "got {err:?}");
        let _ = recv.await.unwrap();
    }
}
