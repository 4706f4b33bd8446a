//! Seeds, seed derivation, and pseudo-random zero sharing.

use crate::error::{Error, Result};
use crate::ring::RingTensor;
use aes_prng::AesRng;
use byteorder::{ByteOrder, LittleEndian};
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

pub const SEED_SIZE: usize = 16;

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
pub struct RawSeed(pub [u8; SEED_SIZE]);

impl RawSeed {
    pub fn random() -> RawSeed {
        let mut seed = [0u8; SEED_SIZE];
        AesRng::from_random_seed().fill_bytes(&mut seed);
        RawSeed(seed)
    }

    pub fn rng(&self) -> AesRng {
        AesRng::from_seed(self.0)
    }

    /// Two ring words, so that seeds can travel over a communicator.
    pub fn to_ring(&self) -> RingTensor {
        let words = vec![
            LittleEndian::read_u64(&self.0[..8]),
            LittleEndian::read_u64(&self.0[8..]),
        ];
        RingTensor::from(ndarray::Array::from(words).into_dyn())
    }

    pub fn from_ring(x: &RingTensor) -> Result<RawSeed> {
        let words: Vec<u64> = x.0.iter().map(|w| w.0).collect();
        if words.len() != 2 {
            tracing::error!("seed payload of {} words", words.len());
            return Err(Error::Communication(format!(
                "expected a 2 word seed, got {} words",
                words.len()
            )));
        }
        let mut seed = [0u8; SEED_SIZE];
        LittleEndian::write_u64(&mut seed[..8], words[0]);
        LittleEndian::write_u64(&mut seed[8..], words[1]);
        Ok(RawSeed(seed))
    }
}

/// Derive a fresh seed as `H(key, nonce)`.
pub fn derive_seed(key: &RawSeed, nonce: &[u8]) -> RawSeed {
    // init H(k, *)
    let derived_key = blake3::derive_key("Derive Seed", &key.0);
    let mut keyed_hash = blake3::Hasher::new_keyed(&derived_key);
    keyed_hash.update(nonce);

    let mut digest = keyed_hash.finalize_xof();
    let mut raw_seed = [0u8; SEED_SIZE];
    digest.fill(&mut raw_seed);
    RawSeed(raw_seed)
}

/// Pseudo-random zero sharing.
///
/// Party `i` holds generators for its own seed `s_i` and for the seed
/// `s_{i-1}` of its predecessor on the ring of parties; its share of zero is
/// `G(s_i) - G(s_{i-1})`, which telescopes to zero across all parties.
pub struct ZeroSharing {
    own: AesRng,
    prev: AesRng,
}

impl ZeroSharing {
    pub fn new(own: &RawSeed, prev: &RawSeed) -> ZeroSharing {
        ZeroSharing {
            own: own.rng(),
            prev: prev.rng(),
        }
    }

    pub fn arithmetic(&mut self, shape: &[usize]) -> Result<RingTensor> {
        let own = RingTensor::sample_uniform(shape, &mut self.own);
        let prev = RingTensor::sample_uniform(shape, &mut self.prev);
        own.sub(&prev)
    }

    pub fn binary(&mut self, shape: &[usize]) -> Result<RingTensor> {
        let own = RingTensor::sample_uniform(shape, &mut self.own);
        let prev = RingTensor::sample_uniform(shape, &mut self.prev);
        own.xor(&prev)
    }
}
