//! Point-to-point and collective communication between parties.

use crate::error::{Error, Result};
use crate::ring::RingTensor;

pub mod local;

pub use local::{LocalCommunicator, LocalNetwork};

/// How contributions are combined in [`Communicator::all_reduce`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Xor,
}

impl ReduceOp {
    fn combine(&self, lhs: &RingTensor, rhs: &RingTensor) -> Result<RingTensor> {
        match self {
            ReduceOp::Sum => lhs.add(rhs),
            ReduceOp::Xor => lhs.xor(rhs),
        }
    }
}

/// Reliable, ordered and blocking transport between a fixed set of ranks.
///
/// Only `send` and `recv` need implementing; the collectives are built from
/// them and assume every rank calls them in the same order.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    fn send(&self, dst: usize, value: &RingTensor) -> Result<()>;

    fn recv(&self, src: usize) -> Result<RingTensor>;

    fn broadcast(&self, root: usize, value: Option<&RingTensor>) -> Result<RingTensor> {
        if self.rank() != root {
            return self.recv(root);
        }
        let value = value.ok_or_else(|| {
            Error::InvalidArgument(format!("rank {} must supply the broadcast value", root))
        })?;
        for dst in (0..self.world_size()).filter(|&dst| dst != root) {
            self.send(dst, value)?;
        }
        Ok(value.clone())
    }

    fn all_reduce(&self, op: ReduceOp, value: &RingTensor) -> Result<RingTensor> {
        let rank = self.rank();
        for dst in (0..self.world_size()).filter(|&dst| dst != rank) {
            self.send(dst, value)?;
        }
        let mut acc: Option<RingTensor> = None;
        for src in 0..self.world_size() {
            let contribution = if src == rank {
                value.clone()
            } else {
                self.recv(src)?
            };
            if contribution.shape() != value.shape() {
                return Err(Error::shape_mismatch(contribution.shape(), value.shape()));
            }
            acc = Some(match acc {
                None => contribution,
                Some(acc) => op.combine(&acc, &contribution)?,
            });
        }
        acc.ok_or(Error::Unexpected(Some("all_reduce over an empty world".into())))
    }

    /// Collect every rank's value at `dst`, ordered by rank.
    fn gather(&self, dst: usize, value: &RingTensor) -> Result<Option<Vec<RingTensor>>> {
        if self.rank() != dst {
            self.send(dst, value)?;
            return Ok(None);
        }
        (0..self.world_size())
            .map(|src| {
                if src == dst {
                    Ok(value.clone())
                } else {
                    self.recv(src)
                }
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}
