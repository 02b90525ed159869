//! Preprocessing: manufactures and buffers the correlated randomness the
//! processor consumes.
//!
//! Triples follow the oblivious-transfer approach of MASCOT
//! (cf. <https://eprint.iacr.org/2016/505>): every party contributes random
//! local fragments, every ordered pair of parties shares the cross products
//! through a correlated OT session, the fragments are authenticated through
//! the long-lived pairwise VOLE sessions, and in active mode each released
//! triple destroys a second one in a sacrifice check with a jointly tossed
//! challenge. Random bits XOR-fold one locally drawn bit per party, so the
//! result is uniform as long as a single party is honest. Input masks are
//! random values authenticated across all parties and known in the clear to
//! exactly one owner.
//!
//! The buffer itself is a set of FIFO queues with lazy, batch-amortized
//! refill. Nothing is ever handed out twice. All parties must issue the
//! same sequence of buffer operations, otherwise their protocol phases
//! desynchronize and the session dies with a transport error or worse.

use std::collections::VecDeque;

use futures::future::try_join_all;
use rand::Rng;
use tracing::{Level, debug, instrument};

use crate::{
    aes_rng::AesRng,
    baseot::PartySetup,
    channel::Channel,
    cointoss::shared_rng,
    cot::{CotReceiver, CotSender},
    error::Error,
    field::Field,
    maccheck::MacCheck,
    session::{Config, Security},
    share::{InputMask, RandomBit, Share, Triple},
    vole::{VoleReceiver, VoleSender},
};

/// One party's preprocessing state: the pairwise correlation sessions and
/// the FIFO buffers of unconsumed material.
pub struct Prep<F> {
    party: usize,
    parties: usize,
    active: bool,
    alpha: F,
    batch_size: usize,
    budget: Option<usize>,
    vole_send: Vec<Option<VoleSender>>,
    vole_recv: Vec<Option<VoleReceiver>>,
    cot_send: Vec<Option<CotSender>>,
    cot_recv: Vec<Option<CotReceiver>>,
    triples: VecDeque<Triple<F>>,
    bits: VecDeque<RandomBit<F>>,
    masks: Vec<VecDeque<InputMask<F>>>,
}

impl<F: Field> Prep<F> {
    /// Builds the session state from a dealt base OT bundle.
    pub(crate) fn new(setup: &PartySetup, config: &Config) -> Self {
        let (party, parties) = (setup.party, setup.parties);
        let (active, challenges) = match config.security {
            Security::Active => (true, config.challenges),
            Security::Passive => (false, 0),
        };
        let mut vole_send = Vec::with_capacity(parties);
        let mut vole_recv = Vec::with_capacity(parties);
        let mut cot_send = Vec::with_capacity(parties);
        let mut cot_recv = Vec::with_capacity(parties);
        for k in 0..parties {
            vole_send.push(
                setup.key_seeds[k]
                    .as_ref()
                    .map(|seeds| VoleSender::new(party, k, challenges, &setup.key_bits, seeds)),
            );
            vole_recv.push(
                setup.value_seeds[k]
                    .as_ref()
                    .map(|pairs| VoleReceiver::new(party, k, challenges, pairs)),
            );
            cot_send.push(
                setup.ext_send_seeds[k]
                    .as_ref()
                    .map(|seeds| CotSender::new(party, k, seeds)),
            );
            cot_recv.push(
                setup.ext_recv_seeds[k]
                    .as_ref()
                    .map(|pairs| CotReceiver::new(party, k, pairs)),
            );
        }
        Prep {
            party,
            parties,
            active,
            // passive shares carry zero tags, so the key must be zero too
            alpha: if active {
                F::from_bits(&setup.key_bits)
            } else {
                F::ZERO
            },
            batch_size: config.batch_size,
            budget: config.triple_budget,
            vole_send,
            vole_recv,
            cot_send,
            cot_recv,
            triples: VecDeque::new(),
            bits: VecDeque::new(),
            masks: (0..parties).map(|_| VecDeque::new()).collect(),
        }
    }

    /// The own additive share of the global MAC key.
    pub(crate) fn alpha(&self) -> F {
        self.alpha
    }

    /// Number of triples currently buffered.
    pub fn buffered_triples(&self) -> usize {
        self.triples.len()
    }

    /// Number of random bits currently buffered.
    pub fn buffered_bits(&self) -> usize {
        self.bits.len()
    }

    /// Number of triples the session may still manufacture, `None` if
    /// unbounded.
    pub fn remaining_budget(&self) -> Option<usize> {
        self.budget
    }

    /// Pops the next multiplication triple, refilling the buffer with a
    /// fresh batch first if it is empty.
    pub async fn get_triple(
        &mut self,
        channel: &impl Channel,
        mac: &mut MacCheck<F>,
    ) -> Result<Triple<F>, Error> {
        if let Some(triple) = self.triples.pop_front() {
            return Ok(triple);
        }
        let batch = self.batch_size.min(self.budget.unwrap_or(usize::MAX));
        if batch == 0 {
            return Err(Error::PreprocessingExhausted);
        }
        let fresh = self.make_triples(channel, mac, batch).await?;
        self.triples.extend(fresh);
        self.triples
            .pop_front()
            .ok_or(Error::PreprocessingExhausted)
    }

    /// Pops the next random bit, refilling the buffer first if it is empty.
    pub async fn get_bit(
        &mut self,
        channel: &impl Channel,
        mac: &mut MacCheck<F>,
    ) -> Result<RandomBit<F>, Error> {
        if let Some(bit) = self.bits.pop_front() {
            return Ok(bit);
        }
        // each bit burns one triple per XOR fold
        let per_bit = self.parties - 1;
        let affordable = match (self.budget, per_bit) {
            (None, _) | (_, 0) => usize::MAX,
            (Some(budget), _) => budget / per_bit,
        };
        let batch = self.batch_size.min(affordable);
        if batch == 0 {
            return Err(Error::PreprocessingExhausted);
        }
        let fresh = self.make_bits(channel, mac, batch).await?;
        self.bits.extend(fresh);
        self.bits.pop_front().ok_or(Error::PreprocessingExhausted)
    }

    /// Pops the next input mask for the given owner, refilling that owner's
    /// buffer first if it is empty.
    pub async fn get_mask(
        &mut self,
        channel: &impl Channel,
        owner: usize,
    ) -> Result<InputMask<F>, Error> {
        if owner >= self.parties {
            return Err(Error::Programming(format!(
                "input owner {owner} out of range for {} parties",
                self.parties
            )));
        }
        if self.masks[owner].is_empty() {
            let fresh = self.make_masks(channel, owner, self.batch_size).await?;
            self.masks[owner].extend(fresh);
        }
        self.masks[owner]
            .pop_front()
            .ok_or(Error::PreprocessingExhausted)
    }

    fn take_budget(&mut self, count: usize) -> Result<(), Error> {
        if let Some(budget) = self.budget {
            if budget < count {
                return Err(Error::PreprocessingExhausted);
            }
            self.budget = Some(budget - count);
        }
        Ok(())
    }

    /// Shares the cross products of every ordered pair: the returned
    /// element j is this party's share of Σ over peers of both directions'
    /// `lhs[j]·rhs[j]` contributions.
    async fn cross_products(
        &mut self,
        channel: &impl Channel,
        lhs: &[F],
        rhs: &[F],
    ) -> Result<Vec<F>, Error> {
        let party = self.party;
        let sessions = try_join_all(
            self.cot_send
                .iter_mut()
                .zip(self.cot_recv.iter_mut())
                .enumerate()
                .filter_map(|(peer, pair)| match pair {
                    (Some(sender), Some(receiver)) => Some(async move {
                        // the lower id drives its pad session first, so both
                        // ends of an edge process its sessions in the same
                        // order
                        if party < peer {
                            let sent = sender.products::<F>(channel, lhs).await?;
                            let received = receiver.products::<F>(channel, rhs).await?;
                            Ok::<_, Error>((sent, received))
                        } else {
                            let received = receiver.products::<F>(channel, rhs).await?;
                            let sent = sender.products::<F>(channel, lhs).await?;
                            Ok::<_, Error>((sent, received))
                        }
                    }),
                    _ => None,
                }),
        )
        .await?;
        let mut sums = vec![F::ZERO; lhs.len()];
        for (sent, received) in sessions {
            for (sum, (s, r)) in sums.iter_mut().zip(sent.iter().zip(&received)) {
                *sum += *s + *r;
            }
        }
        Ok(sums)
    }

    /// Authenticates values to which every party contributes an additive
    /// fragment, returning one share per value.
    ///
    /// Each directed pair runs one VOLE batch: the value holder inputs its
    /// fragments, the key holder contributes matching key-side outputs. In
    /// passive mode the tags are zero and nothing is exchanged.
    async fn authenticate(
        &mut self,
        channel: &impl Channel,
        values: &[F],
    ) -> Result<Vec<Share<F>>, Error> {
        if !self.active {
            return Ok(values
                .iter()
                .map(|v| Share {
                    val: *v,
                    mac: F::ZERO,
                })
                .collect());
        }
        let party = self.party;
        let count = values.len();
        let sessions = try_join_all(
            self.vole_send
                .iter_mut()
                .zip(self.vole_recv.iter_mut())
                .enumerate()
                .filter_map(|(peer, pair)| match pair {
                    (Some(sender), Some(receiver)) => Some(async move {
                        if party < peer {
                            let us = sender.extend::<F>(channel, count).await?;
                            let ts = receiver.extend::<F>(channel, values).await?;
                            Ok::<_, Error>((ts, us))
                        } else {
                            let ts = receiver.extend::<F>(channel, values).await?;
                            let us = sender.extend::<F>(channel, count).await?;
                            Ok::<_, Error>((ts, us))
                        }
                    }),
                    _ => None,
                }),
        )
        .await?;
        let mut shares = Vec::with_capacity(count);
        for (j, value) in values.iter().enumerate() {
            let mut mac = self.alpha * *value;
            for (ts, us) in &sessions {
                mac += ts[j] - us[j];
            }
            shares.push(Share { val: *value, mac });
        }
        Ok(shares)
    }

    /// Authenticates values this party holds in the clear. The own fragment
    /// is the full value, every other party's fragment is zero.
    async fn authenticate_own(
        &mut self,
        channel: &impl Channel,
        values: &[F],
    ) -> Result<Vec<Share<F>>, Error> {
        if !self.active {
            return Ok(values
                .iter()
                .map(|v| Share {
                    val: *v,
                    mac: F::ZERO,
                })
                .collect());
        }
        let sessions = try_join_all(
            self.vole_recv
                .iter_mut()
                .filter_map(|r| r.as_mut().map(|r| r.extend::<F>(channel, values))),
        )
        .await?;
        let mut shares = Vec::with_capacity(values.len());
        for (j, value) in values.iter().enumerate() {
            let mut mac = self.alpha * *value;
            for ts in &sessions {
                mac += ts[j];
            }
            shares.push(Share { val: *value, mac });
        }
        Ok(shares)
    }

    /// Key-holder counterpart of [`Prep::authenticate_own`] for values a
    /// peer holds in the clear.
    async fn authenticate_theirs(
        &mut self,
        channel: &impl Channel,
        owner: usize,
        count: usize,
    ) -> Result<Vec<Share<F>>, Error> {
        if !self.active {
            return Ok((0..count).map(|_| Share::zero()).collect());
        }
        let sender = self.vole_send[owner]
            .as_mut()
            .ok_or_else(|| Error::Programming(format!("no VOLE session with party {owner}")))?;
        let us = sender.extend::<F>(channel, count).await?;
        Ok(us
            .into_iter()
            .map(|u| Share {
                val: F::ZERO,
                mac: -u,
            })
            .collect())
    }

    /// Manufactures `count` triples, in active mode sacrificing a second
    /// batch to verify them.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    async fn make_triples(
        &mut self,
        channel: &impl Channel,
        mac: &mut MacCheck<F>,
        count: usize,
    ) -> Result<Vec<Triple<F>>, Error> {
        self.take_budget(count)?;
        debug!(count, active = self.active, "manufacturing triples");
        // lives across awaits, where the !Send thread rng must not
        let mut rng = AesRng::new();
        let a: Vec<F> = (0..count).map(|_| F::random(&mut rng)).collect();
        let b: Vec<F> = (0..count).map(|_| F::random(&mut rng)).collect();

        if !self.active {
            let cross = self.cross_products(channel, &a, &b).await?;
            let c: Vec<F> = (0..count).map(|t| a[t] * b[t] + cross[t]).collect();
            let mut shares = self.authenticate(channel, &[a, b, c].concat()).await?;
            let a_sh: Vec<Share<F>> = shares.drain(..count).collect();
            let b_sh: Vec<Share<F>> = shares.drain(..count).collect();
            return Ok(a_sh
                .into_iter()
                .zip(b_sh)
                .zip(shares)
                .map(|((a, b), c)| Triple { a, b, c })
                .collect());
        }

        // the sacrificed batch shares its b with the released one
        let a_hat: Vec<F> = (0..count).map(|_| F::random(&mut rng)).collect();
        let lhs: Vec<F> = a.iter().chain(&a_hat).copied().collect();
        let rhs: Vec<F> = b.iter().chain(&b).copied().collect();
        let cross = self.cross_products(channel, &lhs, &rhs).await?;
        let c: Vec<F> = (0..count).map(|t| a[t] * b[t] + cross[t]).collect();
        let c_hat: Vec<F> = (0..count)
            .map(|t| a_hat[t] * b[t] + cross[count + t])
            .collect();

        let values = [a, a_hat, b, c, c_hat].concat();
        let mut shares = self.authenticate(channel, &values).await?;
        let a_sh: Vec<Share<F>> = shares.drain(..count).collect();
        let ah_sh: Vec<Share<F>> = shares.drain(..count).collect();
        let b_sh: Vec<Share<F>> = shares.drain(..count).collect();
        let c_sh: Vec<Share<F>> = shares.drain(..count).collect();
        let ch_sh = shares;

        // sacrifice: open ρ = s·a − â, then τ = s·c − ĉ − ρ·b, which is
        // zero whenever both triples are well-formed
        let mut shared = shared_rng(channel, self.party, self.parties).await?;
        let s = F::random(&mut shared);
        let rho_sh: Vec<Share<F>> = (0..count).map(|t| a_sh[t] * s - ah_sh[t]).collect();
        let rho = mac.open_batch(channel, &rho_sh).await?;
        let tau_sh: Vec<Share<F>> = (0..count)
            .map(|t| c_sh[t] * s - ch_sh[t] - b_sh[t] * rho[t])
            .collect();
        let tau = mac.open_batch(channel, &tau_sh).await?;
        mac.flush(channel).await?;
        if tau.iter().any(|t| *t != F::ZERO) {
            return Err(Error::Sacrifice);
        }

        Ok(a_sh
            .into_iter()
            .zip(b_sh)
            .zip(c_sh)
            .map(|((a, b), c)| Triple { a, b, c })
            .collect())
    }

    /// One Beaver step per element: z = x + y − 2·x·y, the arithmetic
    /// encoding of XOR for 0/1 values.
    async fn xor(
        &self,
        channel: &impl Channel,
        mac: &mut MacCheck<F>,
        xs: Vec<Share<F>>,
        ys: Vec<Share<F>>,
        triples: Vec<Triple<F>>,
    ) -> Result<Vec<Share<F>>, Error> {
        let count = xs.len();
        let mut masked = Vec::with_capacity(2 * count);
        for (x, triple) in xs.iter().zip(&triples) {
            masked.push(*x - triple.a);
        }
        for (y, triple) in ys.iter().zip(&triples) {
            masked.push(*y - triple.b);
        }
        let opened = mac.open_batch(channel, &masked).await?;
        let (eps, del) = opened.split_at(count);

        let adjuster = self.party == 0;
        let two = F::two_pow(1);
        let mut out = Vec::with_capacity(count);
        for (t, triple) in triples.into_iter().enumerate() {
            let xy = triple.c
                + triple.b * eps[t]
                + triple.a * del[t]
                + Share::from_public(eps[t] * del[t], adjuster, self.alpha);
            out.push(xs[t] + ys[t] - xy * two);
        }
        Ok(out)
    }

    /// Manufactures `count` random bits by XOR-folding one locally drawn
    /// bit per party.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    async fn make_bits(
        &mut self,
        channel: &impl Channel,
        mac: &mut MacCheck<F>,
        count: usize,
    ) -> Result<Vec<RandomBit<F>>, Error> {
        debug!(count, "manufacturing random bits");
        let mut triples = self
            .make_triples(channel, mac, (self.parties - 1) * count)
            .await?;

        // local contributions, one PRG word per 64 bits
        let mut prg = AesRng::new();
        let mut local = Vec::with_capacity(count);
        while local.len() < count {
            let word: u64 = prg.random();
            for k in 0..64 {
                if local.len() == count {
                    break;
                }
                local.push(if word >> k & 1 == 1 { F::ONE } else { F::ZERO });
            }
        }

        let mut acc: Option<Vec<Share<F>>> = None;
        for owner in 0..self.parties {
            let contributed = if owner == self.party {
                self.authenticate_own(channel, &local).await?
            } else {
                self.authenticate_theirs(channel, owner, count).await?
            };
            acc = Some(match acc {
                None => contributed,
                Some(folded) => {
                    let chunk: Vec<Triple<F>> = triples.drain(..count).collect();
                    self.xor(channel, mac, folded, contributed, chunk).await?
                }
            });
        }
        let folded = acc.ok_or_else(|| Error::Programming("no parties".into()))?;
        Ok(folded.into_iter().map(RandomBit).collect())
    }

    /// Manufactures `count` input masks for the given owner.
    ///
    /// The owner samples the masks itself and authenticates them as values
    /// it holds in the clear; no reveal step exists that a malicious party
    /// could tamper with. An owner that authenticates inconsistently only
    /// invalidates the MACs on its own masks.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    async fn make_masks(
        &mut self,
        channel: &impl Channel,
        owner: usize,
        count: usize,
    ) -> Result<Vec<InputMask<F>>, Error> {
        debug!(count, owner, "manufacturing input masks");
        if self.party == owner {
            let mut rng = AesRng::new();
            let rs: Vec<F> = (0..count).map(|_| F::random(&mut rng)).collect();
            let shares = self.authenticate_own(channel, &rs).await?;
            Ok(shares
                .into_iter()
                .zip(rs)
                .map(|(share, r)| InputMask {
                    share,
                    clear: Some(r),
                })
                .collect())
        } else {
            let shares = self.authenticate_theirs(channel, owner, count).await?;
            Ok(shares
                .into_iter()
                .map(|share| InputMask { share, clear: None })
                .collect())
        }
    }
}
