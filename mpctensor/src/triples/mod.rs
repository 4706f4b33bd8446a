//! Correlated randomness consumed by the interactive protocols.

use crate::error::Result;
use crate::ring::RingTensor;
use serde::{Deserialize, Serialize};
use std::fmt;

mod dealer;

pub use dealer::{DealerProvider, TrustedDealer};

/// Identifies one item of correlated randomness across all parties.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TripleId(pub u64);

impl fmt::Display for TripleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The product relation an arithmetic triple satisfies.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum TripleKind {
    /// `c = a * b` elementwise; operands are already broadcast to `shape`.
    Mul(Vec<usize>),
    /// `c = a * a`; `b` is a copy of `a`.
    Square(Vec<usize>),
    /// `c = a @ b` for batched matrix operands.
    Matmul { lhs: Vec<usize>, rhs: Vec<usize> },
}

/// One party's shares of `(a, b, c)`.
#[derive(Clone, Debug)]
pub struct ArithmeticTriple {
    pub id: TripleId,
    pub a: RingTensor,
    pub b: RingTensor,
    pub c: RingTensor,
}

/// One party's XOR shares of `(a, b, a & b)`.
#[derive(Clone, Debug)]
pub struct BinaryTriple {
    pub id: TripleId,
    pub a: RingTensor,
    pub b: RingTensor,
    pub c: RingTensor,
}

/// One party's additive shares of a random `r` together with its bits
/// `m..63` (`r_top`) and its most significant bit (`r_msb`).
#[derive(Clone, Debug)]
pub struct TruncationMask {
    pub id: TripleId,
    pub r: RingTensor,
    pub r_top: RingTensor,
    pub r_msb: RingTensor,
}

/// Source of correlated randomness for one party.
///
/// Every party must issue the same sequence of requests; the n-th item
/// handed to each party belongs to the same sharing.
pub trait TripleProvider: Send {
    fn arithmetic_triple(&mut self, kind: &TripleKind) -> Result<ArithmeticTriple>;

    fn binary_triple(&mut self, shape: &[usize]) -> Result<BinaryTriple>;

    fn truncation_mask(&mut self, shape: &[usize], amount: usize) -> Result<TruncationMask>;
}
