//! Error taxonomy of the engine.
//!
//! Failed cryptographic verification is always surfaced as one of the abort
//! variants and never as a transport problem, so callers can reliably tell
//! "someone cheated" apart from "the network broke". Aborts are fatal for
//! the whole session; nothing in this crate retries them.

use thiserror::Error as ThisError;

use crate::channel;

/// Errors arising while running the engine's protocols.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The consistency check of a VOLE correlation batch failed.
    #[error("VOLE consistency check failed")]
    VoleCheck,
    /// The consistency check of an OT extension batch failed.
    #[error("correlated OT consistency check failed")]
    CotCheck,
    /// The deferred MAC check over opened values failed.
    #[error("MAC check failed")]
    MacCheck,
    /// A sacrificed triple did not verify, some triple share is malformed.
    #[error("triple sacrifice check failed")]
    Sacrifice,
    /// A commitment could not be opened.
    #[error("commitment could not be opened")]
    Commitment,
    /// Parties received different values during a verified broadcast.
    #[error("inconsistent broadcast in phase '{0}'")]
    Broadcast(String),
    /// The preprocessing buffer cannot replenish its correlated randomness.
    #[error("preprocessing material exhausted")]
    PreprocessingExhausted,
    /// A message could not be sent or received.
    #[error("transport error: {0}")]
    Transport(#[source] channel::Error),
    /// The caller misused the API, e.g. with an out-of-range register.
    #[error("programming error: {0}")]
    Programming(String),
}

impl From<channel::Error> for Error {
    fn from(e: channel::Error) -> Self {
        // an equivocating broadcaster is a protocol abort, not a transport
        // failure
        match e.reason {
            channel::ErrorKind::InconsistentBroadcast => Error::Broadcast(e.phase),
            _ => Error::Transport(e),
        }
    }
}

impl Error {
    /// True for protocol aborts caused by failed cryptographic verification.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            Error::VoleCheck
                | Error::CotCheck
                | Error::MacCheck
                | Error::Sacrifice
                | Error::Commitment
                | Error::Broadcast(_)
        )
    }
}
