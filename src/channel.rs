//! A communication channel used to send/receive messages to/from other
//! parties.
//!
//! The [`Channel`] trait only moves raw bytes between pairs of parties and
//! guarantees FIFO order per direction. Everything else (serialization,
//! phase tags, length checks, broadcasts) lives in the free helper functions
//! of this module. Messages are tagged with a protocol phase string so that
//! transport failures can report where a protocol run died.

use std::{fmt, future::Future, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error as ThisError;
use tokio::{
    sync::{
        Mutex,
        mpsc::{Receiver, Sender, channel},
    },
    time::timeout,
};

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug, ThisError)]
#[error("{reason:?} in phase '{phase}'")]
pub struct Error {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    SendError(String),
    /// The message could not be (de-)serialized.
    SerdeError(String),
    /// The message is a Vec, but not of the expected length.
    InvalidLength,
    /// A verified broadcast ended with parties holding different values.
    InconsistentBroadcast,
}

impl Error {
    fn new(phase: &str, reason: ErrorKind) -> Self {
        Self {
            phase: phase.to_string(),
            reason,
        }
    }
}

/// A communication channel used to send/receive messages to/from other
/// parties.
///
/// Implementations take `&self` so that exchanges with several parties can
/// run concurrently. Messages between the same pair of parties must arrive
/// in the order they were sent.
pub trait Channel {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Sends a message to the party with the given index.
    fn send_bytes_to(
        &self,
        party: usize,
        msg: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::SendError>> + Send;

    /// Awaits a message from the party with the given index.
    fn recv_bytes_from(
        &self,
        party: usize,
    ) -> impl Future<Output = Result<Vec<u8>, Self::RecvError>> + Send;
}

/// Serializes and sends a slice of messages to the given party.
pub(crate) async fn send_to<T: Serialize + Sync>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
    msg: &[T],
) -> Result<(), Error> {
    let bytes = bincode::serialize(&msg)
        .map_err(|e| Error::new(phase, ErrorKind::SerdeError(format!("{e:?}"))))?;
    channel
        .send_bytes_to(party, bytes)
        .await
        .map_err(|e| Error::new(phase, ErrorKind::SendError(format!("{e:?}"))))
}

/// Receives and deserializes a Vec of messages from the given party.
pub(crate) async fn recv_from<T: DeserializeOwned>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
) -> Result<Vec<T>, Error> {
    let bytes = channel
        .recv_bytes_from(party)
        .await
        .map_err(|e| Error::new(phase, ErrorKind::RecvError(format!("{e:?}"))))?;
    bincode::deserialize(&bytes)
        .map_err(|e| Error::new(phase, ErrorKind::SerdeError(format!("{e:?}"))))
}

/// Receives a Vec of messages and checks that it has the expected length.
pub(crate) async fn recv_vec_from<T: DeserializeOwned>(
    channel: &impl Channel,
    party: usize,
    phase: &str,
    len: usize,
) -> Result<Vec<T>, Error> {
    let v: Vec<T> = recv_from(channel, party, phase).await?;
    if v.len() == len {
        Ok(v)
    } else {
        Err(Error::new(phase, ErrorKind::InvalidLength))
    }
}

/// Sends `vecs[k]` to party `k` while receiving a vector from every other
/// party.
///
/// The returned vector is indexed by sender; the entry for the own party
/// index is left empty.
pub(crate) async fn scatter<T: Serialize + DeserializeOwned + Send + Sync>(
    channel: &impl Channel,
    i: usize,
    phase: &str,
    vecs: &[Vec<T>],
) -> Result<Vec<Vec<T>>, Error> {
    let n = vecs.len();
    let send = futures::future::try_join_all(
        (0..n)
            .filter(|k| *k != i)
            .map(|k| send_to(channel, k, phase, &vecs[k])),
    );
    let recv = futures::future::try_join_all(
        (0..n)
            .filter(|k| *k != i)
            .map(|k| recv_from::<T>(channel, k, phase)),
    );
    let (_, mut received) = futures::try_join!(send, recv)?;
    received.insert(i, Vec::new());
    Ok(received)
}

/// Sends the same vector to all parties and receives one of equal length
/// from each, without any consistency verification across receivers.
///
/// The returned vector is indexed by sender; the entry for the own party
/// index contains the own broadcast vector.
pub(crate) async fn unverified_broadcast<T: Clone + Serialize + DeserializeOwned + Send + Sync>(
    channel: &impl Channel,
    i: usize,
    n: usize,
    phase: &str,
    vec: &[T],
) -> Result<Vec<Vec<T>>, Error> {
    let send = futures::future::try_join_all(
        (0..n)
            .filter(|k| *k != i)
            .map(|k| send_to(channel, k, phase, vec)),
    );
    let recv = futures::future::try_join_all(
        (0..n)
            .filter(|k| *k != i)
            .map(|k| recv_vec_from::<T>(channel, k, phase, vec.len())),
    );
    let (_, mut received) = futures::try_join!(send, recv)?;
    received.insert(i, vec.to_vec());
    Ok(received)
}

/// Hashes a slice with blake3, truncated to 128 bits.
///
/// The truncation reduces the guarantees to 64-bit collision and 128-bit
/// preimage resistance, enough for equality echoes of high-entropy protocol
/// transcripts.
fn hash_slice<T: Serialize>(phase: &str, data: &[T]) -> Result<u128, Error> {
    let serialized = bincode::serialize(&data)
        .map_err(|e| Error::new(phase, ErrorKind::SerdeError(format!("{e:?}"))))?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(&serialized);
    let mut buf = [0_u8; 16];
    hasher.finalize_xof().fill(&mut buf);
    Ok(u128::from_le_bytes(buf))
}

/// Verification step of broadcast with abort, based on the echo protocol by
/// Goldwasser and Lindell.
///
/// `vecs` holds the vectors received in a preceding exchange, indexed by the
/// original sender. Each party echoes a hash of what it received from every
/// sender to everyone else; any mismatch means some sender equivocated.
/// With only two parties there is nothing to cross-check.
pub(crate) async fn broadcast_verification<T: Serialize>(
    channel: &impl Channel,
    i: usize,
    n: usize,
    phase: &str,
    vecs: &[Vec<T>],
) -> Result<(), Error> {
    if n == 2 {
        return Ok(());
    }
    let mut hashes = vec![0_u128; n];
    for k in (0..n).filter(|k| *k != i) {
        hashes[k] = hash_slice(phase, &vecs[k])?;
    }
    // echo to party k the hashes of what every sender other than k sent us
    let mut echoes = vec![vec![None; n]; n];
    for k in (0..n).filter(|k| *k != i) {
        for j in (0..n).filter(|j| *j != i && *j != k) {
            echoes[k][j] = Some(hashes[j]);
        }
    }
    let received = scatter(channel, i, phase, &echoes).await?;
    for k in (0..n).filter(|k| *k != i) {
        for j in (0..n).filter(|j| *j != i && *j != k) {
            if received[k][j] != Some(hashes[j]) {
                return Err(Error::new(phase, ErrorKind::InconsistentBroadcast));
            }
        }
    }
    Ok(())
}

/// Broadcast with abort: every party sends its vector to all others and the
/// exchanged values are cross-checked with hash echoes.
pub(crate) async fn broadcast<T: Clone + Serialize + DeserializeOwned + Send + Sync>(
    channel: &impl Channel,
    i: usize,
    n: usize,
    phase: &str,
    vec: &[T],
) -> Result<Vec<Vec<T>>, Error> {
    let received = unverified_broadcast(channel, i, n, phase, vec).await?;
    let verification_phase = format!("broadcast {phase}");
    broadcast_verification(channel, i, n, &verification_phase, &received).await?;
    Ok(received)
}

/// An in-memory channel over tokio mpsc queues, one per directed pair.
#[derive(Debug)]
pub struct SimpleChannel {
    s: Vec<Option<Sender<Vec<u8>>>>,
    r: Vec<Option<Mutex<Receiver<Vec<u8>>>>>,
}

impl SimpleChannel {
    /// Creates channels for N parties to communicate with each other.
    pub fn channels(parties: usize) -> Vec<Self> {
        let buffer_capacity = 1024;
        let mut channels: Vec<_> = (0..parties)
            .map(|_| SimpleChannel {
                s: (0..parties).map(|_| None).collect(),
                r: (0..parties).map(|_| None).collect(),
            })
            .collect();
        for a in 0..parties {
            for b in 0..parties {
                if a == b {
                    continue;
                }
                let (send_a_to_b, recv_a_to_b) = channel(buffer_capacity);
                channels[a].s[b] = Some(send_a_to_b);
                channels[b].r[a] = Some(Mutex::new(recv_a_to_b));
            }
        }
        channels
    }
}

/// The error raised by `recv` calls of a [`SimpleChannel`].
#[derive(Debug)]
pub enum AsyncRecvError {
    /// The channel has been closed.
    Closed,
    /// No message was received before the timeout.
    TimeoutElapsed,
}

impl Channel for SimpleChannel {
    type SendError = tokio::sync::mpsc::error::SendError<Vec<u8>>;
    type RecvError = AsyncRecvError;

    async fn send_bytes_to(
        &self,
        p: usize,
        msg: Vec<u8>,
    ) -> Result<(), tokio::sync::mpsc::error::SendError<Vec<u8>>> {
        tracing::trace!(to = p, bytes = msg.len(), "sending message");
        self.s[p]
            .as_ref()
            .unwrap_or_else(|| panic!("no sender for party {p}"))
            .send(msg)
            .await
    }

    async fn recv_bytes_from(&self, p: usize) -> Result<Vec<u8>, AsyncRecvError> {
        let mut receiver = self.r[p]
            .as_ref()
            .unwrap_or_else(|| panic!("no receiver for party {p}"))
            .lock()
            .await;
        match timeout(Duration::from_secs(10 * 60), receiver.recv()).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(AsyncRecvError::Closed),
            Err(_) => Err(AsyncRecvError::TimeoutElapsed),
        }
    }
}
