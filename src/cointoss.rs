//! Commit-reveal coin tossing.
//!
//! Every "jointly unpredictable" value in the engine (linear-combination
//! coefficients for the MAC and correlation checks, sacrifice challenges)
//! comes from a [`ChaCha20Rng`] seeded here. Seeds are XORs of per-party
//! contributions that are committed before any of them is revealed, so no
//! party can steer the outcome. Commitments bind the contributor's party id
//! to rule out replaying another party's contribution.

use rand::{SeedableRng, random};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::{
    channel::{Channel, broadcast, recv_vec_from, send_to, unverified_broadcast},
    error::Error,
};

/// A cryptographic commitment, a BLAKE3 hash of the committed value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub(crate) struct Commitment(pub(crate) [u8; 32]);

/// Commits to a value using the BLAKE3 cryptographic hash function.
///
/// This is not a general-purpose commitment scheme, the input value is
/// assumed to have high entropy.
pub(crate) fn commit(value: &[u8]) -> Commitment {
    Commitment(blake3::hash(value).into())
}

/// Verifies if a given value matches a previously generated commitment.
pub(crate) fn open_commitment(commitment: &Commitment, value: &[u8]) -> bool {
    blake3::hash(value).as_bytes() == &commitment.0
}

/// A 32-byte seed contribution tagged with the contributing party's id.
fn tagged(seed: &[u8; 32], party: usize) -> [u8; 34] {
    let mut buf = [0_u8; 34];
    buf[..32].copy_from_slice(seed);
    buf[32..].copy_from_slice(&(party as u16).to_be_bytes());
    buf
}

/// Multi-party coin tossing, yielding the same [`ChaCha20Rng`] at all `n`
/// parties.
///
/// All commitments are exchanged with verified broadcast before any seed
/// contribution is revealed.
pub(crate) async fn shared_rng(
    channel: &impl Channel,
    i: usize,
    n: usize,
) -> Result<ChaCha20Rng, Error> {
    let own_seed = random::<[u8; 32]>();
    let commitment = commit(&tagged(&own_seed, i));
    let commitments = broadcast(channel, i, n, "seed comm", &[commitment]).await?;

    let revealed = unverified_broadcast(channel, i, n, "seed open", &own_seed).await?;
    let mut seed = own_seed;
    for k in (0..n).filter(|k| *k != i) {
        let contribution: [u8; 32] = revealed[k]
            .as_slice()
            .try_into()
            .expect("length checked by unverified_broadcast");
        if !open_commitment(&commitments[k][0], &tagged(&contribution, k)) {
            return Err(Error::Commitment);
        }
        for (seed_byte, contributed) in seed.iter_mut().zip(contribution) {
            *seed_byte ^= contributed;
        }
    }
    Ok(ChaCha20Rng::from_seed(seed))
}

/// Two-party coin tossing with party `j`, yielding the same [`ChaCha20Rng`]
/// on both sides.
///
/// The own contribution is only revealed once the peer's commitment has
/// arrived.
pub(crate) async fn shared_rng_with(
    channel: &impl Channel,
    i: usize,
    j: usize,
) -> Result<ChaCha20Rng, Error> {
    let own_seed = random::<[u8; 32]>();
    let commitment = [commit(&tagged(&own_seed, i))];

    let send_comm = send_to(channel, j, "seed comm", &commitment);
    let recv_comm = recv_vec_from::<Commitment>(channel, j, "seed comm", 1);
    let (_, their_commitment) = futures::try_join!(send_comm, recv_comm)?;

    let send_open = send_to(channel, j, "seed open", &own_seed);
    let recv_open = recv_vec_from::<u8>(channel, j, "seed open", 32);
    let (_, their_seed) = futures::try_join!(send_open, recv_open)?;
    let their_seed: [u8; 32] = their_seed
        .as_slice()
        .try_into()
        .expect("length checked by recv_vec_from");

    if !open_commitment(&their_commitment[0], &tagged(&their_seed, j)) {
        return Err(Error::Commitment);
    }
    let seed = std::array::from_fn(|k| own_seed[k] ^ their_seed[k]);
    Ok(ChaCha20Rng::from_seed(seed))
}

#[cfg(test)]
mod tests {
    use rand::RngCore;

    use super::*;
    use crate::channel::SimpleChannel;

    #[tokio::test]
    async fn test_commitment_roundtrip() {
        let value = random::<[u8; 32]>();
        let c = commit(&value);
        assert!(open_commitment(&c, &value));
        let mut tampered = value;
        tampered[7] ^= 1;
        assert!(!open_commitment(&c, &tampered));
    }

    #[tokio::test]
    async fn test_shared_rng_agreement() -> Result<(), Error> {
        let n = 3;
        let channels = SimpleChannel::channels(n);
        let handles: Vec<_> = channels
            .into_iter()
            .enumerate()
            .map(|(i, ch)| {
                tokio::spawn(async move {
                    let mut rng = shared_rng(&ch, i, n).await?;
                    Ok::<_, Error>(rng.next_u64())
                })
            })
            .collect();
        let mut draws = vec![];
        for handle in handles {
            draws.push(handle.await.unwrap()?);
        }
        assert_eq!(draws[0], draws[1]);
        assert_eq!(draws[0], draws[2]);
        Ok(())
    }

    #[tokio::test]
    async fn test_pairwise_shared_rng_agreement() -> Result<(), Error> {
        let mut channels = SimpleChannel::channels(2);
        let b = channels.pop().unwrap();
        let a = channels.pop().unwrap();
        let left = tokio::spawn(async move {
            let mut rng = shared_rng_with(&a, 0, 1).await?;
            Ok::<_, Error>(rng.next_u64())
        });
        let right = tokio::spawn(async move {
            let mut rng = shared_rng_with(&b, 1, 0).await?;
            Ok::<_, Error>(rng.next_u64())
        });
        assert_eq!(left.await.unwrap()?, right.await.unwrap()?);
        Ok(())
    }
}
