//! Secret-shared tensors for secure multi-party computation.
//!
//! Values live in the ring of integers modulo 2^64, encoded as fixed-point
//! numbers and split between the parties either additively or with XOR. A
//! [`session::Session`] carries one party's state; every party drives the
//! same sequence of operations on its own session.
//!
//! ```ignore
//! use mpctensor::prelude::*;
//!
//! let x = MpcTensor::from_plain(&sess, Some(&input), 0)?;
//! let y = x.softmax(&sess, 0)?.reveal(&sess)?;
//! ```

pub mod approx;
pub mod arithmetic;
pub mod binary;
pub mod comparison;
pub mod config;
pub mod convert;
pub mod error;
pub mod fixedpoint;
pub mod networking;
pub mod prelude;
pub mod prng;
pub mod ring;
pub mod session;
pub mod tensor;
pub mod triples;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{Error, Result};
