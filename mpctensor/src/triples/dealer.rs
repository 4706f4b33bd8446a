//! Trusted dealer deriving all correlated randomness from a common seed.
//!
//! For the n-th request every party `j > 0` expands `H(seed, n || j)` into
//! its shares. Party 0 additionally expands the dealer stream `H(seed, n ||
//! DEALER)` into the secret values and keeps the correction, i.e. the
//! secrets minus the other parties' shares. Party 0 therefore plays the
//! trusted first party and no messages are needed.

use super::*;
use crate::config::Config;
use crate::error::Error;
use crate::prng::{derive_seed, RawSeed};
use crate::ring::{matmul_shape, RingTensor, RING_WIDTH};
use aes_prng::AesRng;
use byteorder::{ByteOrder, LittleEndian};

const DEALER: u64 = u64::MAX;

#[derive(Clone, Copy)]
enum Sharing {
    Additive,
    Xor,
}

#[derive(Clone, Debug)]
pub struct TrustedDealer {
    seed: RawSeed,
    world_size: usize,
    capacity: Option<u64>,
}

impl TrustedDealer {
    pub fn new(seed: RawSeed, world_size: usize) -> TrustedDealer {
        TrustedDealer {
            seed,
            world_size,
            capacity: None,
        }
    }

    /// Limit the number of items handed to each party.
    pub fn with_capacity(self, capacity: u64) -> TrustedDealer {
        TrustedDealer {
            capacity: Some(capacity),
            ..self
        }
    }

    pub fn from_config(config: &Config, world_size: usize) -> Result<TrustedDealer> {
        let seed = match config.dealer_seed()? {
            Some(seed) => RawSeed(seed),
            None => RawSeed::random(),
        };
        let dealer = TrustedDealer::new(seed, world_size);
        Ok(match config.dealer.capacity {
            Some(capacity) => dealer.with_capacity(capacity),
            None => dealer,
        })
    }

    pub fn provider(&self, rank: usize) -> DealerProvider {
        DealerProvider {
            seed: self.seed,
            rank,
            world_size: self.world_size,
            capacity: self.capacity,
            issued: 0,
        }
    }
}

/// One party's view of a [`TrustedDealer`].
pub struct DealerProvider {
    seed: RawSeed,
    rank: usize,
    world_size: usize,
    capacity: Option<u64>,
    issued: u64,
}

impl DealerProvider {
    fn next_request(&mut self, what: &str) -> Result<u64> {
        if let Some(capacity) = self.capacity {
            if self.issued >= capacity {
                tracing::error!("dealer exhausted after {} items", self.issued);
                return Err(Error::TripleExhaustion(format!(
                    "{} requested after all {} items were used",
                    what, capacity
                )));
            }
        }
        let request = self.issued;
        self.issued += 1;
        tracing::trace!("rank {} takes {} #{}", self.rank, what, request);
        Ok(request)
    }

    fn stream(&self, request: u64, party: u64) -> AesRng {
        let mut nonce = [0u8; 16];
        LittleEndian::write_u64(&mut nonce[..8], request);
        LittleEndian::write_u64(&mut nonce[8..], party);
        derive_seed(&self.seed, &nonce).rng()
    }

    /// This party's shares of the values produced by `secrets`, whose
    /// shapes must be `shapes`.
    fn deal<F>(
        &self,
        request: u64,
        sharing: Sharing,
        shapes: &[Vec<usize>],
        secrets: F,
    ) -> Result<Vec<RingTensor>>
    where
        F: FnOnce(&mut AesRng) -> Result<Vec<RingTensor>>,
    {
        let sample = |party: u64| {
            let mut rng = self.stream(request, party);
            shapes
                .iter()
                .map(|shape| RingTensor::sample_uniform(shape, &mut rng))
                .collect::<Vec<_>>()
        };
        if self.rank != 0 {
            return Ok(sample(self.rank as u64));
        }
        let mut own = secrets(&mut self.stream(request, DEALER))?;
        for party in 1..self.world_size {
            for (share, mask) in own.iter_mut().zip(sample(party as u64)) {
                *share = match sharing {
                    Sharing::Additive => share.sub(&mask)?,
                    Sharing::Xor => share.xor(&mask)?,
                };
            }
        }
        Ok(own)
    }
}

impl TripleProvider for DealerProvider {
    fn arithmetic_triple(&mut self, kind: &TripleKind) -> Result<ArithmeticTriple> {
        let request = self.next_request("arithmetic triple")?;
        let id = TripleId(request);
        match kind {
            TripleKind::Mul(shape) => {
                let shapes = [shape.clone(), shape.clone(), shape.clone()];
                let mut shares = self.deal(request, Sharing::Additive, &shapes, |rng| {
                    let a = RingTensor::sample_uniform(shape, rng);
                    let b = RingTensor::sample_uniform(shape, rng);
                    let c = a.mul(&b)?;
                    Ok(vec![a, b, c])
                })?;
                let (c, b, a) = (pop(&mut shares)?, pop(&mut shares)?, pop(&mut shares)?);
                Ok(ArithmeticTriple { id, a, b, c })
            }
            TripleKind::Square(shape) => {
                let shapes = [shape.clone(), shape.clone()];
                let mut shares = self.deal(request, Sharing::Additive, &shapes, |rng| {
                    let a = RingTensor::sample_uniform(shape, rng);
                    let c = a.mul(&a)?;
                    Ok(vec![a, c])
                })?;
                let (c, a) = (pop(&mut shares)?, pop(&mut shares)?);
                Ok(ArithmeticTriple {
                    id,
                    b: a.clone(),
                    a,
                    c,
                })
            }
            TripleKind::Matmul { lhs, rhs } => {
                let shapes = [lhs.clone(), rhs.clone(), matmul_shape(lhs, rhs)?];
                let mut shares = self.deal(request, Sharing::Additive, &shapes, |rng| {
                    let a = RingTensor::sample_uniform(lhs, rng);
                    let b = RingTensor::sample_uniform(rhs, rng);
                    let c = a.matmul(&b)?;
                    Ok(vec![a, b, c])
                })?;
                let (c, b, a) = (pop(&mut shares)?, pop(&mut shares)?, pop(&mut shares)?);
                Ok(ArithmeticTriple { id, a, b, c })
            }
        }
    }

    fn binary_triple(&mut self, shape: &[usize]) -> Result<BinaryTriple> {
        let request = self.next_request("binary triple")?;
        let shapes = [shape.to_vec(), shape.to_vec(), shape.to_vec()];
        let mut shares = self.deal(request, Sharing::Xor, &shapes, |rng| {
            let a = RingTensor::sample_uniform(shape, rng);
            let b = RingTensor::sample_uniform(shape, rng);
            let c = a.and(&b)?;
            Ok(vec![a, b, c])
        })?;
        let (c, b, a) = (pop(&mut shares)?, pop(&mut shares)?, pop(&mut shares)?);
        Ok(BinaryTriple {
            id: TripleId(request),
            a,
            b,
            c,
        })
    }

    fn truncation_mask(&mut self, shape: &[usize], amount: usize) -> Result<TruncationMask> {
        if amount >= RING_WIDTH - 2 {
            return Err(Error::InvalidArgument(format!(
                "cannot truncate by {} bits",
                amount
            )));
        }
        let request = self.next_request("truncation mask")?;
        let shapes = [shape.to_vec(), shape.to_vec(), shape.to_vec()];
        let mut shares = self.deal(request, Sharing::Additive, &shapes, |rng| {
            let r = RingTensor::sample_uniform(shape, rng);
            let r_top = r.shl(1).shr(amount + 1);
            let r_msb = r.shr(RING_WIDTH - 1);
            Ok(vec![r, r_top, r_msb])
        })?;
        let (r_msb, r_top, r) = (pop(&mut shares)?, pop(&mut shares)?, pop(&mut shares)?);
        Ok(TruncationMask {
            id: TripleId(request),
            r,
            r_top,
            r_msb,
        })
    }
}

fn pop(shares: &mut Vec<RingTensor>) -> Result<RingTensor> {
    shares
        .pop()
        .ok_or_else(|| Error::Unexpected(Some("dealer produced too few shares".into())))
}
