//! Per-party protocol state.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fixedpoint::FixedPointEncoding;
use crate::networking::{Communicator, ReduceOp};
use crate::prng::{RawSeed, ZeroSharing};
use crate::ring::RingTensor;
use crate::triples::{
    ArithmeticTriple, BinaryTriple, TripleId, TripleKind, TripleProvider, TruncationMask,
};
use aes_prng::AesRng;
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Everything one party needs to take part in a computation.
///
/// All parties must drive their sessions through the same sequence of
/// operations; each collective consumes one round number and each
/// interactive operation consumes correlated randomness in a fixed order.
pub struct Session {
    comm: Box<dyn Communicator>,
    provider: Mutex<Box<dyn TripleProvider>>,
    config: Config,
    zero_sharing: Mutex<ZeroSharing>,
    rng: Mutex<AesRng>,
    round: AtomicU64,
    consumed: Mutex<HashSet<TripleId>>,
}

impl Session {
    /// Set up a session, exchanging zero-sharing seeds with the neighbouring
    /// ranks.
    pub fn new(
        comm: Box<dyn Communicator>,
        provider: Box<dyn TripleProvider>,
        config: Config,
    ) -> Result<Session> {
        config.validate()?;
        let (rank, world_size) = (comm.rank(), comm.world_size());
        if rank >= world_size {
            return Err(Error::Configuration(format!(
                "rank {} outside world of size {}",
                rank, world_size
            )));
        }

        let own_seed = RawSeed::random();
        comm.send((rank + 1) % world_size, &own_seed.to_ring())?;
        let prev_seed = RawSeed::from_ring(&comm.recv((rank + world_size - 1) % world_size)?)?;
        tracing::debug!("rank {} of {} joined session", rank, world_size);

        Ok(Session {
            comm,
            provider: Mutex::new(provider),
            config,
            zero_sharing: Mutex::new(ZeroSharing::new(&own_seed, &prev_seed)),
            rng: Mutex::new(AesRng::from_random_seed()),
            round: AtomicU64::new(0),
            consumed: Mutex::new(HashSet::new()),
        })
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn world_size(&self) -> usize {
        self.comm.world_size()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Encoding used for values entering the computation.
    pub fn encoding(&self) -> FixedPointEncoding {
        self.config.encoding()
    }

    /// Number of collective rounds performed so far.
    pub fn rounds(&self) -> u64 {
        self.round.load(Ordering::SeqCst)
    }

    fn next_round(&self, label: &str, len: usize) -> Result<u64> {
        let round = self.round.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            "rank {} round {} ({}): {} elements",
            self.rank(),
            round,
            label,
            len
        );
        if self.config.session.round_tagging {
            self.check_tag(label, round)?;
        }
        Ok(round)
    }

    fn check_tag(&self, label: &str, round: u64) -> Result<()> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(label.as_bytes());
        hasher.update(&round.to_le_bytes());
        let tag = LittleEndian::read_u64(&hasher.finalize().as_bytes()[..8]);
        let tag = RingTensor::from_vec(&[1], vec![tag])?;

        let rank = self.rank();
        for peer in (0..self.world_size()).filter(|&peer| peer != rank) {
            self.comm.send(peer, &tag)?;
        }
        let mut in_sync = true;
        for peer in (0..self.world_size()).filter(|&peer| peer != rank) {
            // keep receiving so that every peer's tag is drained
            in_sync &= self.comm.recv(peer)? == tag;
        }
        if !in_sync {
            tracing::error!("rank {} out of sync in round {} ({})", rank, round, label);
            return Err(Error::ProtocolDesync {
                round,
                label: label.to_string(),
            });
        }
        Ok(())
    }

    /// Reconstruct an additively shared value at every party.
    pub fn sum_reveal(&self, label: &str, share: &RingTensor) -> Result<RingTensor> {
        self.next_round(label, share.len())?;
        self.comm.all_reduce(ReduceOp::Sum, share)
    }

    /// Reconstruct an XOR shared value at every party.
    pub fn xor_reveal(&self, label: &str, share: &RingTensor) -> Result<RingTensor> {
        self.next_round(label, share.len())?;
        self.comm.all_reduce(ReduceOp::Xor, share)
    }

    /// Reconstruct a shared value at `dst` only.
    pub fn reveal_to(
        &self,
        label: &str,
        dst: usize,
        op: ReduceOp,
        share: &RingTensor,
    ) -> Result<Option<RingTensor>> {
        if dst >= self.world_size() {
            return Err(Error::InvalidArgument(format!(
                "cannot reveal to rank {} in world of size {}",
                dst,
                self.world_size()
            )));
        }
        self.next_round(label, share.len())?;
        let parts = match self.comm.gather(dst, share)? {
            Some(parts) => parts,
            None => return Ok(None),
        };
        let mut acc = share.clone();
        for (src, part) in parts.iter().enumerate().filter(|(src, _)| *src != dst) {
            if part.shape() != share.shape() {
                tracing::error!("rank {} sent a share of the wrong shape", src);
                return Err(Error::shape_mismatch(part.shape(), share.shape()));
            }
            acc = match op {
                ReduceOp::Sum => acc.add(part)?,
                ReduceOp::Xor => acc.xor(part)?,
            };
        }
        Ok(Some(acc))
    }

    /// Distribute `value`, known only at `root`, to every party.
    pub fn broadcast(
        &self,
        label: &str,
        root: usize,
        value: Option<&RingTensor>,
    ) -> Result<RingTensor> {
        self.next_round(label, value.map(|v| v.len()).unwrap_or(0))?;
        self.comm.broadcast(root, value)
    }

    /// Fresh additive sharing of zero.
    pub fn zero_share(&self, shape: &[usize]) -> Result<RingTensor> {
        self.zero_sharing.lock().arithmetic(shape)
    }

    /// Fresh XOR sharing of zero.
    pub fn zero_share_xor(&self, shape: &[usize]) -> Result<RingTensor> {
        self.zero_sharing.lock().binary(shape)
    }

    /// Uniformly random ring words known only to this party.
    pub fn random_words(&self, shape: &[usize]) -> RingTensor {
        RingTensor::sample_uniform(shape, &mut *self.rng.lock())
    }

    fn consume(&self, id: TripleId) -> Result<()> {
        if !self.consumed.lock().insert(id) {
            tracing::error!("rank {} was handed triple {} twice", self.rank(), id);
            return Err(Error::TripleReuse(id.0));
        }
        Ok(())
    }

    pub fn arithmetic_triple(&self, kind: &TripleKind) -> Result<ArithmeticTriple> {
        let triple = self.provider.lock().arithmetic_triple(kind)?;
        self.consume(triple.id)?;
        Ok(triple)
    }

    pub fn binary_triple(&self, shape: &[usize]) -> Result<BinaryTriple> {
        let triple = self.provider.lock().binary_triple(shape)?;
        self.consume(triple.id)?;
        Ok(triple)
    }

    pub fn truncation_mask(&self, shape: &[usize], amount: usize) -> Result<TruncationMask> {
        let mask = self.provider.lock().truncation_mask(shape, amount)?;
        self.consume(mask.id)?;
        Ok(mask)
    }
}
