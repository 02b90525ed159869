//! The per-party executor: register banks and batched instructions.
//!
//! All secret arithmetic happens against indexed register banks, mirroring
//! a bytecode-driven virtual machine sitting on top. Each batched
//! instruction runs the same four steps: validate registers and pull
//! correlated randomness (INIT), mask the operands locally (PREPARE), one
//! single batched opening (EXCHANGE), recombine locally (FINALIZE). The
//! exchange step is the only communication, so a batch costs one round no
//! matter how large it is, and dot products cost one round no matter how
//! many terms they sum.
//!
//! Opened values are only optimistically correct. Nothing that leaves the
//! engine may be relied upon before a MAC flush has passed.

use futures::future::try_join_all;
use tracing::{Level, instrument};

use crate::{
    channel::{Channel, broadcast_verification, recv_vec_from, send_to},
    error::Error,
    field::Field,
    session::Session,
    share::Share,
};

/// Indexed secret and clear register banks of one executor.
#[derive(Debug)]
pub struct Registers<F> {
    secrets: Vec<Share<F>>,
    clears: Vec<F>,
}

impl<F: Field> Registers<F> {
    /// Banks of the given sizes, all registers zero.
    pub fn new(secrets: usize, clears: usize) -> Self {
        Registers {
            secrets: vec![Share::zero(); secrets],
            clears: vec![F::ZERO; clears],
        }
    }

    /// Grows the banks so that at least the given numbers of registers
    /// exist. Never shrinks.
    pub fn resize(&mut self, secrets: usize, clears: usize) {
        if secrets > self.secrets.len() {
            self.secrets.resize(secrets, Share::zero());
        }
        if clears > self.clears.len() {
            self.clears.resize(clears, F::ZERO);
        }
    }

    /// Zeroes every register, keeping the bank sizes.
    pub fn reset(&mut self) {
        self.secrets.fill(Share::zero());
        self.clears.fill(F::ZERO);
    }

    /// Reads a secret register.
    pub fn secret(&self, reg: usize) -> Result<Share<F>, Error> {
        self.secrets
            .get(reg)
            .copied()
            .ok_or_else(|| out_of_range("secret", reg, self.secrets.len()))
    }

    /// Writes a secret register.
    pub fn set_secret(&mut self, reg: usize, share: Share<F>) -> Result<(), Error> {
        let len = self.secrets.len();
        match self.secrets.get_mut(reg) {
            Some(slot) => {
                *slot = share;
                Ok(())
            }
            None => Err(out_of_range("secret", reg, len)),
        }
    }

    /// Reads a clear register.
    pub fn clear(&self, reg: usize) -> Result<F, Error> {
        self.clears
            .get(reg)
            .copied()
            .ok_or_else(|| out_of_range("clear", reg, self.clears.len()))
    }

    /// Writes a clear register.
    pub fn set_clear(&mut self, reg: usize, value: F) -> Result<(), Error> {
        let len = self.clears.len();
        match self.clears.get_mut(reg) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(out_of_range("clear", reg, len)),
        }
    }
}

fn out_of_range(bank: &str, reg: usize, len: usize) -> Error {
    Error::Programming(format!(
        "{bank} register {reg} out of range, the bank has {len}"
    ))
}

/// Communication accounting of one executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Field elements this party transmitted at exchange boundaries.
    pub elements_sent: usize,
    /// Exchange rounds driven by this executor.
    pub rounds: usize,
}

/// One party's executor: protocol state, register banks, and counters.
pub struct SubProcessor<F> {
    /// The wired-up preprocessing and MAC-check state.
    pub session: Session<F>,
    /// The register banks the instructions operate on.
    pub registers: Registers<F>,
    counters: Counters,
}

impl<F: Field> SubProcessor<F> {
    /// An executor over the given session with banks of the given sizes.
    pub fn new(session: Session<F>, secrets: usize, clears: usize) -> Self {
        SubProcessor {
            session,
            registers: Registers::new(secrets, clears),
            counters: Counters::default(),
        }
    }

    /// The communication counters accumulated so far.
    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// One batched opening, the only communication the instructions do.
    async fn open(&mut self, channel: &impl Channel, shares: &[Share<F>]) -> Result<Vec<F>, Error> {
        let opened = self.session.check.open_batch(channel, shares).await?;
        self.counters.elements_sent += shares.len() * (self.session.parties - 1);
        self.counters.rounds += 1;
        Ok(opened)
    }

    /// `dst = lhs·rhs` over secret registers for every `(dst, lhs, rhs)`
    /// entry, consuming one triple per product and one exchange round for
    /// the whole batch.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub async fn multiply_batch(
        &mut self,
        channel: &impl Channel,
        products: &[(usize, usize, usize)],
    ) -> Result<(), Error> {
        if products.is_empty() {
            return Ok(());
        }
        let count = products.len();
        let mut xs = Vec::with_capacity(count);
        let mut ys = Vec::with_capacity(count);
        for &(dst, lhs, rhs) in products {
            // all registers are validated before any communication
            self.registers.secret(dst)?;
            xs.push(self.registers.secret(lhs)?);
            ys.push(self.registers.secret(rhs)?);
        }
        let mut triples = Vec::with_capacity(count);
        {
            let Session { prep, check, .. } = &mut self.session;
            for _ in 0..count {
                triples.push(prep.get_triple(channel, check).await?);
            }
        }
        let mut masked = Vec::with_capacity(2 * count);
        for (x, triple) in xs.iter().zip(&triples) {
            masked.push(*x - triple.a);
        }
        for (y, triple) in ys.iter().zip(&triples) {
            masked.push(*y - triple.b);
        }
        let opened = self.open(channel, &masked).await?;
        let (eps, del) = opened.split_at(count);

        let adjuster = self.session.party == 0;
        let alpha = self.session.prep.alpha();
        for (j, (&(dst, _, _), triple)) in products.iter().zip(triples).enumerate() {
            let z = triple.c
                + triple.b * eps[j]
                + triple.a * del[j]
                + Share::from_public(eps[j] * del[j], adjuster, alpha);
            self.registers.set_secret(dst, z)?;
        }
        Ok(())
    }

    /// `dst = Σ lhs_k·rhs_k` over secret registers for every
    /// `(dst, terms)` entry.
    ///
    /// Consumes one triple per term, but the whole batch still costs a
    /// single exchange round: all masked terms are opened together and only
    /// the recombination is per-output.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub async fn dot_product_batch(
        &mut self,
        channel: &impl Channel,
        dot_products: &[(usize, Vec<(usize, usize)>)],
    ) -> Result<(), Error> {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for (dst, terms) in dot_products {
            self.registers.secret(*dst)?;
            for &(lhs, rhs) in terms {
                xs.push(self.registers.secret(lhs)?);
                ys.push(self.registers.secret(rhs)?);
            }
        }
        let count = xs.len();
        if count == 0 {
            for (dst, _) in dot_products {
                self.registers.set_secret(*dst, Share::zero())?;
            }
            return Ok(());
        }
        let mut triples = Vec::with_capacity(count);
        {
            let Session { prep, check, .. } = &mut self.session;
            for _ in 0..count {
                triples.push(prep.get_triple(channel, check).await?);
            }
        }
        let mut masked = Vec::with_capacity(2 * count);
        for (x, triple) in xs.iter().zip(&triples) {
            masked.push(*x - triple.a);
        }
        for (y, triple) in ys.iter().zip(&triples) {
            masked.push(*y - triple.b);
        }
        let opened = self.open(channel, &masked).await?;
        let (eps, del) = opened.split_at(count);

        let adjuster = self.session.party == 0;
        let alpha = self.session.prep.alpha();
        let mut triples = triples.into_iter();
        let mut k = 0;
        for (dst, terms) in dot_products {
            let mut acc = Share::zero();
            for _ in terms {
                let triple = triples.next().expect("one triple was pulled per term");
                acc += triple.c
                    + triple.b * eps[k]
                    + triple.a * del[k]
                    + Share::from_public(eps[k] * del[k], adjuster, alpha);
                k += 1;
            }
            self.registers.set_secret(*dst, acc)?;
        }
        Ok(())
    }

    /// Opens secret registers into clear registers, `(dst, src)` pairs.
    ///
    /// The written values are only optimistically correct until the next
    /// MAC flush passes.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub async fn public_open_batch(
        &mut self,
        channel: &impl Channel,
        opens: &[(usize, usize)],
    ) -> Result<(), Error> {
        if opens.is_empty() {
            return Ok(());
        }
        let mut shares = Vec::with_capacity(opens.len());
        for &(dst, src) in opens {
            self.registers.clear(dst)?;
            shares.push(self.registers.secret(src)?);
        }
        let opened = self.open(channel, &shares).await?;
        for (&(dst, _), value) in opens.iter().zip(opened) {
            self.registers.set_clear(dst, value)?;
        }
        Ok(())
    }

    /// Injects the owner's private inputs into the given secret registers.
    ///
    /// Consumes one buffered input mask per value. The owner broadcasts the
    /// differences value − mask, which reveal nothing, and every party
    /// adjusts its mask share by the public difference. Non-owners pass
    /// `None`; with three or more parties the broadcast is cross-checked by
    /// hash echoes so an equivocating owner aborts the session.
    #[instrument(level = Level::DEBUG, skip_all, err)]
    pub async fn input_batch(
        &mut self,
        channel: &impl Channel,
        owner: usize,
        regs: &[usize],
        values: Option<&[F]>,
    ) -> Result<(), Error> {
        let (party, parties) = (self.session.party, self.session.parties);
        if owner >= parties {
            return Err(Error::Programming(format!(
                "input owner {owner} out of range for {parties} parties"
            )));
        }
        match (party == owner, values) {
            (true, Some(values)) if values.len() != regs.len() => {
                return Err(Error::Programming(format!(
                    "{} input values for {} registers",
                    values.len(),
                    regs.len()
                )));
            }
            (true, None) => {
                return Err(Error::Programming(
                    "the input owner must supply the values".into(),
                ));
            }
            (false, Some(_)) => {
                return Err(Error::Programming(
                    "only the input owner supplies values".into(),
                ));
            }
            _ => {}
        }
        for &reg in regs {
            self.registers.secret(reg)?;
        }
        if regs.is_empty() {
            return Ok(());
        }

        let mut masks = Vec::with_capacity(regs.len());
        for _ in regs {
            masks.push(self.session.prep.get_mask(channel, owner).await?);
        }

        const PHASE: &str = "input";
        let deltas: Vec<F> = if party == owner {
            let values = values.ok_or_else(|| {
                Error::Programming("the input owner must supply the values".into())
            })?;
            let mut deltas = Vec::with_capacity(regs.len());
            for (value, mask) in values.iter().zip(&masks) {
                let r = mask.clear.ok_or_else(|| {
                    Error::Programming("input mask without cleartext at its owner".into())
                })?;
                deltas.push(*value - r);
            }
            try_join_all(
                (0..parties)
                    .filter(|k| *k != party)
                    .map(|k| send_to(channel, k, PHASE, &deltas)),
            )
            .await?;
            self.counters.elements_sent += deltas.len() * (parties - 1);
            deltas
        } else {
            recv_vec_from(channel, owner, PHASE, regs.len()).await?
        };
        self.counters.rounds += 1;

        // receivers cross-check what the owner sent them
        let mut vecs: Vec<Vec<F>> = vec![Vec::new(); parties];
        vecs[owner] = deltas.clone();
        broadcast_verification(channel, party, parties, "broadcast input", &vecs).await?;

        let adjuster = party == 0;
        let alpha = self.session.prep.alpha();
        for ((&reg, mask), delta) in regs.iter().zip(masks).zip(deltas) {
            self.registers
                .set_secret(reg, mask.share.add_public(delta, adjuster, alpha))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::rng;

    use super::*;
    use crate::{
        baseot::deal_all,
        channel::SimpleChannel,
        field::F61,
        session::Config,
    };

    fn processor() -> SubProcessor<F61> {
        let setups = deal_all(&mut rng(), 2, F61::BITS);
        let session = Session::setup(&setups[0], &Config::default()).unwrap();
        SubProcessor::new(session, 4, 4)
    }

    #[test]
    fn test_registers_reject_out_of_range() {
        let mut regs = Registers::<F61>::new(2, 1);
        assert!(regs.secret(1).is_ok());
        assert!(matches!(regs.secret(2), Err(Error::Programming(_))));
        assert!(matches!(
            regs.set_secret(7, Share::zero()),
            Err(Error::Programming(_))
        ));
        assert!(matches!(regs.clear(1), Err(Error::Programming(_))));
        assert!(matches!(
            regs.set_clear(1, F61::ZERO),
            Err(Error::Programming(_))
        ));
    }

    #[test]
    fn test_registers_resize_and_reset() {
        let mut regs = Registers::<F61>::new(1, 1);
        regs.resize(3, 2);
        regs.set_secret(2, Share { val: F61::ONE, mac: F61::ONE }).unwrap();
        regs.set_clear(1, F61::from(7)).unwrap();
        regs.resize(1, 1);
        assert_eq!(F61::from(7), regs.clear(1).unwrap());
        regs.reset();
        assert_eq!(Share::zero(), regs.secret(2).unwrap());
        assert_eq!(F61::ZERO, regs.clear(1).unwrap());
    }

    #[tokio::test]
    async fn test_multiply_rejects_bad_register_before_communication() {
        let mut proc = processor();
        let channels = SimpleChannel::channels(2);
        let err = proc
            .multiply_batch(&channels[0], &[(9, 0, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Programming(_)), "got {err:?}");
        assert_eq!(Counters::default(), proc.counters());
    }

    #[tokio::test]
    async fn test_input_rejects_values_from_non_owner() {
        let mut proc = processor();
        let channels = SimpleChannel::channels(2);
        let err = proc
            .input_batch(&channels[0], 1, &[0], Some(&[F61::ONE]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Programming(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_input_owner_must_supply_values() {
        let mut proc = processor();
        let channels = SimpleChannel::channels(2);
        let err = proc.input_batch(&channels[0], 0, &[0], None).await.unwrap_err();
        assert!(matches!(err, Error::Programming(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_empty_batches_are_free() {
        let mut proc = processor();
        let channels = SimpleChannel::channels(2);
        proc.multiply_batch(&channels[0], &[]).await.unwrap();
        proc.public_open_batch(&channels[0], &[]).await.unwrap();
        proc.dot_product_batch(&channels[0], &[(0, Vec::new())])
            .await
            .unwrap();
        assert_eq!(Counters::default(), proc.counters());
    }
}
