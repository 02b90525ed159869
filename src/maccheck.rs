//! Batched opening of authenticated shares with deferred MAC verification.
//!
//! Opening a batch exchanges only the value fragments; the MAC fragments
//! stay private and every opening is appended to an explicit pending queue.
//! A flush settles the whole queue at once (cf.
//! <https://eprint.iacr.org/2012/642>, Figure 10): the parties toss a joint
//! seed, draw one random coefficient per queued opening and combine their
//! MAC fragments into a single field element σ_i with Σ σ_i = 0 for an
//! honest transcript. The σ fragments are committed before any of them is
//! revealed, so the last party to speak cannot pick a fragment that cancels
//! an earlier forgery. Commitments are salted because σ fragments do not
//! have enough entropy to hide behind a plain hash in a small field.
//!
//! Any opened value must be treated as tentative until the next flush; the
//! processor flushes on its own once the queue exceeds the configured
//! threshold, and callers flush explicitly before acting on an output.

use tracing::{Level, debug, instrument};

use crate::{
    channel::{Channel, broadcast, unverified_broadcast},
    cointoss::{commit, open_commitment, shared_rng},
    error::Error,
    field::Field,
    share::Share,
};

/// Serializes a σ fragment with its salt and the committing party's id.
fn tagged_sigma<F: Field>(sigma: &F, salt: &[u8; 32], party: usize) -> Result<Vec<u8>, Error> {
    let mut bytes = bincode::serialize(sigma)
        .map_err(|_| Error::Programming("field element serialization failed".into()))?;
    bytes.extend_from_slice(salt);
    bytes.extend((party as u16).to_be_bytes());
    Ok(bytes)
}

/// The opening layer of one party: opens value fragments immediately and
/// queues the MAC fragments for a later batched check.
pub struct MacCheck<F> {
    party: usize,
    parties: usize,
    alpha: F,
    threshold: usize,
    pending: Vec<(F, F)>,
}

impl<F: Field> MacCheck<F> {
    pub(crate) fn new(party: usize, parties: usize, alpha: F, threshold: usize) -> Self {
        MacCheck {
            party,
            parties,
            alpha,
            threshold,
            pending: Vec::new(),
        }
    }

    /// The number of openings whose MACs have not been verified yet.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Opens the given shares to all parties, returning the reconstructed
    /// values.
    ///
    /// The MACs of the openings are queued, not verified; the batch is
    /// settled by the next [`MacCheck::flush`], which runs automatically
    /// once the queue reaches the configured threshold. All parties must
    /// call this with the same number of shares.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub async fn open_batch(
        &mut self,
        channel: &impl Channel,
        shares: &[Share<F>],
    ) -> Result<Vec<F>, Error> {
        if shares.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = shares.len(), "opening share batch");
        let fragments: Vec<F> = shares.iter().map(|share| share.val).collect();
        let received =
            unverified_broadcast(channel, self.party, self.parties, "open", &fragments).await?;
        let mut opened = vec![F::ZERO; shares.len()];
        for fragments in &received {
            for (sum, fragment) in opened.iter_mut().zip(fragments) {
                *sum += *fragment;
            }
        }
        for (value, share) in opened.iter().zip(shares) {
            self.pending.push((*value, share.mac));
        }
        if self.pending.len() >= self.threshold {
            self.flush(channel).await?;
        }
        Ok(opened)
    }

    /// Verifies the MACs of all pending openings, draining the queue.
    ///
    /// Fails with [`Error::MacCheck`] if any opened value was inconsistent
    /// with its MAC, in which case the session must be abandoned. A flush
    /// with an empty queue is a no-op without communication.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub async fn flush(&mut self, channel: &impl Channel) -> Result<(), Error> {
        if self.pending.is_empty() {
            return Ok(());
        }
        debug!(pending = self.pending.len(), "checking MACs of openings");
        let mut shared = shared_rng(channel, self.party, self.parties).await?;
        let mut sigma = F::ZERO;
        for (value, mac) in self.pending.drain(..) {
            let chi = F::random(&mut shared);
            sigma += chi * (mac - self.alpha * value);
        }

        let salt = rand::random::<[u8; 32]>();
        let commitment = commit(&tagged_sigma(&sigma, &salt, self.party)?);
        let commitments =
            broadcast(channel, self.party, self.parties, "sigma comm", &[commitment]).await?;
        let revealed = unverified_broadcast(
            channel,
            self.party,
            self.parties,
            "sigma open",
            &[(sigma, salt)],
        )
        .await?;

        let mut total = F::ZERO;
        for k in 0..self.parties {
            let (sigma_k, salt_k) = revealed[k][0];
            if k != self.party
                && !open_commitment(&commitments[k][0], &tagged_sigma(&sigma_k, &salt_k, k)?)
            {
                return Err(Error::Commitment);
            }
            total += sigma_k;
        }
        if !bool::from(total.ct_eq(&F::ZERO)) {
            return Err(Error::MacCheck);
        }
        Ok(())
    }
}
