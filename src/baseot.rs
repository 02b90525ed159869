//! Base OT seed material consumed by the correlation generators.
//!
//! The engine does not run a base OT protocol itself. It consumes the seed
//! material such a protocol would produce: per directed pair of parties, a
//! batch of seed pairs on one side and the seeds selected by secret choice
//! bits on the other. [`deal_all`] produces consistent bundles locally,
//! which is what the tests and any trusted-setup deployment use; a real
//! base OT protocol can produce [`PartySetup`] values instead.
//!
//! The choice bits of the long-lived key sessions double as the party's
//! global MAC key share: α_i is the gadget recomposition of `key_bits`, and
//! the same bits select the seeds towards every peer.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block::Block;

/// Width of the bit-choice OT extension, one base OT per matrix row.
pub(crate) const EXT_SEEDS: usize = Block::BITS;

/// Seed material for the side of a base OT batch that holds both candidate
/// seeds per position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedPairs {
    /// Both candidate seeds, per OT position.
    pub pairs: Vec<(Block, Block)>,
}

/// Seed material for the side that chose: one secret bit and the matching
/// seed per position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChosenSeeds {
    /// The secret choice bits.
    pub bits: Vec<bool>,
    /// The seeds selected by `bits`.
    pub seeds: Vec<Block>,
}

/// All base correlation material one party needs for its sessions with all
/// peers.
///
/// Indexing is by peer; the entries for the own party index are `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartySetup {
    /// The own party index.
    pub party: usize,
    /// Total number of parties.
    pub parties: usize,
    /// Choice bits of the long-lived key sessions, identical towards every
    /// peer; their gadget recomposition is the global MAC key share α_i.
    pub key_bits: Vec<bool>,
    /// Seeds selected by `key_bits`, for the session where this party holds
    /// the MAC key against the peer's values.
    pub key_seeds: Vec<Option<Vec<Block>>>,
    /// Both candidate seeds for the session where the peer holds the key
    /// against this party's values.
    pub value_seeds: Vec<Option<SeedPairs>>,
    /// Chosen seeds for the extension session where this party transfers
    /// correlations to the peer.
    pub ext_send_seeds: Vec<Option<ChosenSeeds>>,
    /// Seed pairs for the extension session where this party receives
    /// correlations from the peer.
    pub ext_recv_seeds: Vec<Option<SeedPairs>>,
}

fn seed_pairs(rng: &mut impl Rng, count: usize) -> SeedPairs {
    SeedPairs {
        pairs: (0..count)
            .map(|_| (rng.random::<Block>(), rng.random::<Block>()))
            .collect(),
    }
}

fn choose(pairs: &SeedPairs, bits: &[bool]) -> Vec<Block> {
    pairs
        .pairs
        .iter()
        .zip(bits)
        .map(|((s0, s1), bit)| if *bit { *s1 } else { *s0 })
        .collect()
}

/// Deals consistent base OT bundles for all `parties`, with `rows` key
/// sessions per directed pair (one per bit of the field in use).
///
/// This takes the place of running a base OT protocol between every pair
/// and must only be used where the dealing party is trusted, e.g. in tests.
pub fn deal_all(rng: &mut impl Rng, parties: usize, rows: usize) -> Vec<PartySetup> {
    debug!(parties, rows, "dealing base OT seed material");
    let mut setups: Vec<PartySetup> = (0..parties)
        .map(|party| PartySetup {
            party,
            parties,
            key_bits: (0..rows).map(|_| rng.random()).collect(),
            key_seeds: vec![None; parties],
            value_seeds: vec![None; parties],
            ext_send_seeds: vec![None; parties],
            ext_recv_seeds: vec![None; parties],
        })
        .collect();
    for k in 0..parties {
        for v in 0..parties {
            if k == v {
                continue;
            }
            // key session: k selects with its (fixed) key bits, v keeps both
            let pairs = seed_pairs(rng, rows);
            setups[k].key_seeds[v] = Some(choose(&pairs, &setups[k].key_bits));
            setups[v].value_seeds[k] = Some(pairs);

            // extension session k -> v: k selects with fresh secret bits
            let pairs = seed_pairs(rng, EXT_SEEDS);
            let bits: Vec<bool> = (0..EXT_SEEDS).map(|_| rng.random()).collect();
            setups[k].ext_send_seeds[v] = Some(ChosenSeeds {
                seeds: choose(&pairs, &bits),
                bits,
            });
            setups[v].ext_recv_seeds[k] = Some(pairs);
        }
    }
    setups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dealt_seeds_are_consistent() {
        let mut rng = rand::rng();
        let setups = deal_all(&mut rng, 3, 61);
        for k in 0..3 {
            for v in 0..3 {
                if k == v {
                    assert!(setups[k].key_seeds[v].is_none());
                    continue;
                }
                let chosen = setups[k].key_seeds[v].as_ref().unwrap();
                let pairs = &setups[v].value_seeds[k].as_ref().unwrap().pairs;
                for ((s0, s1), (bit, sel)) in pairs.iter().zip(setups[k].key_bits.iter().zip(chosen))
                {
                    assert_eq!(if *bit { s1 } else { s0 }, sel);
                }
                let ext = setups[k].ext_send_seeds[v].as_ref().unwrap();
                let ext_pairs = &setups[v].ext_recv_seeds[k].as_ref().unwrap().pairs;
                for ((s0, s1), (bit, sel)) in ext_pairs.iter().zip(ext.bits.iter().zip(&ext.seeds))
                {
                    assert_eq!(if *bit { s1 } else { s0 }, sel);
                }
            }
        }
    }

    #[test]
    fn test_key_bits_fixed_across_peers() {
        let mut rng = rand::rng();
        let setups = deal_all(&mut rng, 3, 16);
        // the same key bits select the seeds towards every peer, so the
        // recomposed key share is one value per party
        assert_eq!(16, setups[0].key_bits.len());
        for v in 1..3 {
            assert_eq!(16, setups[0].key_seeds[v].as_ref().unwrap().len());
        }
    }
}
