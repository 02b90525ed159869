//! Per-party configuration and wiring.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::task;

use crate::{
    baseot::{PartySetup, deal_all},
    channel::SimpleChannel,
    error::Error,
    field::Field,
    maccheck::MacCheck,
    prep::Prep,
};

/// Which adversary the session defends against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Security {
    /// Honest-but-curious peers: no tags, no consistency checks.
    Passive,
    /// Malicious peers: authenticated shares, checked correlations,
    /// sacrificed triples.
    Active,
}

/// Tuning knobs of a session. The same values must be used by every party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// How many triples (and bits, and masks) a single refill manufactures.
    pub batch_size: usize,
    /// Statistical security of the VOLE consistency check, in bits.
    pub challenges: usize,
    /// Adversary model.
    pub security: Security,
    /// Pending-opening count at which the MAC check triggers on its own.
    pub check_threshold: usize,
    /// Total number of triples the session may manufacture, `None` for
    /// unbounded. Exceeding it surfaces as
    /// [`Error::PreprocessingExhausted`] before any communication.
    pub triple_budget: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            batch_size: 1024,
            challenges: 40,
            security: Security::Active,
            check_threshold: 100_000,
            triple_budget: None,
        }
    }
}

/// One party's wired-up protocol state: the preprocessing sessions and the
/// MAC checker, sharing a single global key.
pub struct Session<F> {
    /// The own party index.
    pub party: usize,
    /// Total number of parties.
    pub parties: usize,
    /// The preprocessing buffer.
    pub prep: Prep<F>,
    /// The deferred MAC checker.
    pub check: MacCheck<F>,
}

impl<F: Field> Session<F> {
    /// Wires up a party from its dealt base OT bundle.
    ///
    /// The bundle must carry exactly one key bit per field bit; a mismatch
    /// means the bundle was dealt for a different field.
    pub fn setup(setup: &PartySetup, config: &Config) -> Result<Self, Error> {
        if setup.parties < 2 {
            return Err(Error::Programming(format!(
                "need at least 2 parties, got {}",
                setup.parties
            )));
        }
        if setup.party >= setup.parties {
            return Err(Error::Programming(format!(
                "party {} out of range for {} parties",
                setup.party, setup.parties
            )));
        }
        if setup.key_bits.len() != F::BITS {
            return Err(Error::Programming(format!(
                "setup carries {} key bits but the field needs {}",
                setup.key_bits.len(),
                F::BITS
            )));
        }
        let prep = Prep::new(setup, config);
        let check = MacCheck::new(
            setup.party,
            setup.parties,
            prep.alpha(),
            config.check_threshold,
        );
        Ok(Session {
            party: setup.party,
            parties: setup.parties,
            prep,
            check,
        })
    }
}

/// Simulates a multi-party execution over in-memory channels.
///
/// Deals a fresh base OT bundle per party, spawns one task per party running
/// `run` with its [`Session`] and [`SimpleChannel`], and collects every
/// party's result in party order. A panic inside a party task is resumed on
/// the caller, so assertion failures surface directly in tests.
pub async fn simulate<F, T, Fut>(
    parties: usize,
    config: &Config,
    run: impl Fn(Session<F>, SimpleChannel) -> Fut,
) -> Vec<Result<T, Error>>
where
    F: Field,
    T: Send + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
    let setups = deal_all(&mut rand::rng(), parties, F::BITS);
    let channels = SimpleChannel::channels(parties);
    let mut tasks = Vec::with_capacity(parties);
    for (setup, channel) in setups.iter().zip(channels) {
        let session = Session::setup(setup, config).expect("valid dealt setup");
        tasks.push(task::spawn(run(session, channel)));
    }
    let mut results = Vec::with_capacity(parties);
    for task in tasks {
        let result = task
            .await
            .unwrap_or_else(|e| std::panic::resume_unwind(e.into_panic()));
        results.push(result);
    }
    results
}
