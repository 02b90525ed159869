//! Vector oblivious linear evaluation (VOLE) with a fixed key, built on
//! base OT seeds.
//!
//! A directed session connects a value-holding receiver and a key-holding
//! sender. Per batch, the receiver inputs x_1..x_B and obtains t_1..t_B,
//! the sender obtains u_1..u_B, with t_j = u_j + Δ·x_j for the sender's
//! long-lived key Δ. The engine runs one such session per ordered pair of
//! parties and uses it to authenticate share fragments: Δ is the gadget
//! recomposition of the sender's base OT choice bits, which also form its
//! global MAC key share.
//!
//! The construction expands one PRG row per bit of the field from the base
//! seeds and sends one correction element per row and input. In active
//! mode every batch is followed by a consistency check: a fresh jointly
//! tossed seed yields random linear combinations over the batch, and the
//! receiver reveals the combination of its inputs once per challenge,
//! together with one digest per combined PRG row. The sender recombines
//! its own rows, subtracts its key bit's share of the revealed input
//! combination, and compares digests. The revealed combination is a single
//! value per challenge, so corrections that encode different inputs in
//! different rows force the receiver to guess the key bit of every
//! deviating row, and it survives all challenges with probability at most
//! 2^-challenges. Each challenge consumes one extra masking input and one
//! extra PRG element per row, so everything revealed is uniform and leaks
//! nothing about the retained outputs.

use rand::SeedableRng;
use tracing::{Level, debug, instrument};

use crate::{
    aes_rng::AesRng,
    baseot::SeedPairs,
    block::Block,
    channel::{Channel, recv_vec_from, send_to},
    cointoss::shared_rng_with,
    error::Error,
    field::Field,
};

/// Domain-separated 128-bit digest of one combined row.
fn digest<F: Field>(challenge: usize, row: usize, value: F) -> Result<u128, Error> {
    let bytes = bincode::serialize(&value)
        .map_err(|_| Error::Programming("field element serialization failed".into()))?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(challenge as u32).to_le_bytes());
    hasher.update(&(row as u32).to_le_bytes());
    hasher.update(&bytes);
    let mut buf = [0_u8; 16];
    hasher.finalize_xof().fill(&mut buf);
    Ok(u128::from_le_bytes(buf))
}

fn expand<F: Field>(rng: &mut AesRng, count: usize) -> Vec<F> {
    (0..count).map(|_| F::random(rng)).collect()
}

/// The key-holding side of a directed VOLE session.
pub(crate) struct VoleSender {
    party: usize,
    peer: usize,
    challenges: usize,
    bits: Vec<bool>,
    rngs: Vec<AesRng>,
}

impl VoleSender {
    /// Creates the session from the key bits and the base OT seeds they
    /// selected, one per gadget row.
    pub(crate) fn new(
        party: usize,
        peer: usize,
        challenges: usize,
        bits: &[bool],
        seeds: &[Block],
    ) -> Self {
        debug_assert_eq!(bits.len(), seeds.len());
        VoleSender {
            party,
            peer,
            challenges,
            bits: bits.to_vec(),
            rngs: seeds.iter().map(|s| AesRng::from_seed(*s)).collect(),
        }
    }

    /// The fixed key Δ, the gadget recomposition of the choice bits.
    pub(crate) fn delta<F: Field>(&self) -> F {
        F::from_bits(&self.bits)
    }

    /// Runs one batch, returning u_1..u_count.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub(crate) async fn extend<F: Field>(
        &mut self,
        channel: &impl Channel,
        count: usize,
    ) -> Result<Vec<F>, Error> {
        let rows = self.rngs.len();
        debug_assert_eq!(F::BITS, rows);
        let total = count + self.challenges;
        debug!(peer = self.peer, count, "extending VOLE as key holder");

        let corrections: Vec<F> =
            recv_vec_from(channel, self.peer, "vole ext", rows * total).await?;
        // q_rj = w_rj + δ_r·d_rj = t0_rj + δ_r·x_j for honest corrections
        let mut q = Vec::with_capacity(rows);
        for (r, rng) in self.rngs.iter_mut().enumerate() {
            let w = expand::<F>(rng, total);
            let d = &corrections[r * total..(r + 1) * total];
            let row: Vec<F> = if self.bits[r] {
                w.iter().zip(d).map(|(w, d)| *w + *d).collect()
            } else {
                w
            };
            q.push(row);
        }

        if self.challenges > 0 {
            let mut shared = shared_rng_with(channel, self.party, self.peer).await?;
            let claims: Vec<F> =
                recv_vec_from(channel, self.peer, "vole check", self.challenges).await?;
            let digests: Vec<u128> =
                recv_vec_from(channel, self.peer, "vole digests", self.challenges * rows).await?;
            for (c, claim) in claims.iter().enumerate() {
                let chi: Vec<F> = (0..count).map(|_| F::random(&mut shared)).collect();
                for (r, row) in q.iter().enumerate() {
                    // Q = A + δ_r·X, so subtracting the key bit's share of
                    // the claimed input combination must land on A
                    let mut combined = F::inner_product(&chi, &row[..count]) + row[count + c];
                    if self.bits[r] {
                        combined -= *claim;
                    }
                    if digest(c, r, combined)? != digests[c * rows + r] {
                        return Err(Error::VoleCheck);
                    }
                }
            }
        }

        Ok((0..count)
            .map(|j| -(0..rows).map(|r| F::two_pow(r) * q[r][j]).sum::<F>())
            .collect())
    }
}

/// The value-holding side of a directed VOLE session.
pub(crate) struct VoleReceiver {
    party: usize,
    peer: usize,
    challenges: usize,
    rngs: Vec<(AesRng, AesRng)>,
}

impl VoleReceiver {
    /// Creates the session from both base OT seeds per gadget row.
    pub(crate) fn new(party: usize, peer: usize, challenges: usize, pairs: &SeedPairs) -> Self {
        VoleReceiver {
            party,
            peer,
            challenges,
            rngs: pairs
                .pairs
                .iter()
                .map(|(s0, s1)| (AesRng::from_seed(*s0), AesRng::from_seed(*s1)))
                .collect(),
        }
    }

    /// Runs one batch over the given inputs, returning t_1..t_B with
    /// t_j = u_j + Δ·x_j.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub(crate) async fn extend<F: Field>(
        &mut self,
        channel: &impl Channel,
        inputs: &[F],
    ) -> Result<Vec<F>, Error> {
        let rows = self.rngs.len();
        debug_assert_eq!(F::BITS, rows);
        let count = inputs.len();
        let total = count + self.challenges;
        debug!(peer = self.peer, count, "extending VOLE as value holder");

        // one fresh masking input per challenge
        let mut xs = inputs.to_vec();
        let mut local_rng = AesRng::new();
        xs.extend((0..self.challenges).map(|_| F::random(&mut local_rng)));

        let mut t0 = Vec::with_capacity(rows);
        let mut corrections = Vec::with_capacity(rows * total);
        for (rng0, rng1) in self.rngs.iter_mut() {
            let row0 = expand::<F>(rng0, total);
            let row1 = expand::<F>(rng1, total);
            for j in 0..total {
                corrections.push(xs[j] + row0[j] - row1[j]);
            }
            t0.push(row0);
        }
        send_to(channel, self.peer, "vole ext", &corrections).await?;

        if self.challenges > 0 {
            let mut shared = shared_rng_with(channel, self.party, self.peer).await?;
            let mut claims = Vec::with_capacity(self.challenges);
            let mut digests = Vec::with_capacity(self.challenges * rows);
            for c in 0..self.challenges {
                let chi: Vec<F> = (0..count).map(|_| F::random(&mut shared)).collect();
                claims.push(F::inner_product(&chi, &xs[..count]) + xs[count + c]);
                for (r, row0) in t0.iter().enumerate() {
                    let a = F::inner_product(&chi, &row0[..count]) + row0[count + c];
                    digests.push(digest(c, r, a)?);
                }
            }
            send_to(channel, self.peer, "vole check", &claims).await?;
            send_to(channel, self.peer, "vole digests", &digests).await?;
        }

        Ok((0..count)
            .map(|j| -(0..rows).map(|r| F::two_pow(r) * t0[r][j]).sum::<F>())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rand::{Rng, rng};

    use super::*;
    use crate::{channel::SimpleChannel, field::F61};

    fn dealt_sessions(challenges: usize) -> (VoleSender, VoleReceiver) {
        let mut rng = rng();
        let bits: Vec<bool> = (0..F61::BITS).map(|_| rng.random()).collect();
        let pairs: Vec<(Block, Block)> = (0..F61::BITS)
            .map(|_| (rng.random(), rng.random()))
            .collect();
        let chosen: Vec<Block> = pairs
            .iter()
            .zip(&bits)
            .map(|((s0, s1), bit)| if *bit { *s1 } else { *s0 })
            .collect();
        let sender = VoleSender::new(0, 1, challenges, &bits, &chosen);
        let receiver = VoleReceiver::new(1, 0, challenges, &SeedPairs { pairs });
        (sender, receiver)
    }

    #[tokio::test]
    async fn test_extend_correlation() -> Result<(), Error> {
        let (mut sender, mut receiver) = dealt_sessions(8);
        let mut channels = SimpleChannel::channels(2);
        let ch_r = channels.pop().unwrap();
        let ch_s = channels.pop().unwrap();
        let xs: Vec<F61> = (0..50).map(|_| F61::random(&mut rng())).collect();
        let xs_input = xs.clone();
        let send = tokio::spawn(async move {
            let mut us = sender.extend::<F61>(&ch_s, 50).await?;
            us.extend(sender.extend::<F61>(&ch_s, 20).await?);
            Ok::<_, Error>((us, sender.delta::<F61>()))
        });
        let recv = tokio::spawn(async move {
            let mut ts = receiver.extend::<F61>(&ch_r, &xs_input).await?;
            let more: Vec<F61> = (0..20).map(|_| F61::random(&mut rng())).collect();
            ts.extend(receiver.extend::<F61>(&ch_r, &more).await?);
            Ok::<_, Error>((ts, [xs_input, more].concat()))
        });
        let (us, delta) = send.await.unwrap()?;
        let (ts, xs) = recv.await.unwrap()?;
        assert_eq!(70, ts.len());
        for ((t, u), x) in ts.iter().zip(&us).zip(&xs) {
            assert_eq!(*t, *u + delta * *x);
        }
        Ok(())
    }

    /// Channel wrapper corrupting every correction element of the first
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
                // skip the length prefix, deviate in every element
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
    async fn test_tampered_corrections_abort() {
        let (mut sender, mut receiver) = dealt_sessions(40);
        let mut channels = SimpleChannel::channels(2);
        let ch_r = Corrupting {
            inner: channels.pop().unwrap(),
            sends: AtomicUsize::new(0),
        };
        let ch_s = channels.pop().unwrap();
        let send = tokio::spawn(async move { sender.extend::<F61>(&ch_s, 10).await });
        let recv = tokio::spawn(async move {
            let xs: Vec<F61> = (0..10).map(|_| F61::random(&mut rng())).collect();
            receiver.extend::<F61>(&ch_r, &xs).await
        });
        let err = send.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::VoleCheck), "got {err:?}");
        // the receiver either finishes or fails on the dropped channel
        let _ = recv.await.unwrap();
    }
}
