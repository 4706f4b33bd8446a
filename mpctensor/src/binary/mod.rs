//! XOR secret sharing of 64 bit words.
//!
//! XOR, NOT, shifts and reshaping are local; AND consumes one binary triple
//! and one round; addition is a Kogge-Stone circuit of ANDs.

use crate::arithmetic::{pop_single, share_shape};
use crate::error::{Error, Result};
use crate::networking::ReduceOp;
use crate::ring::{broadcast_shapes, IndexElem, RingTensor};
use crate::session::Session;
use ndarray::prelude::*;

mod adder;

pub(crate) use adder::add_many;

/// One party's XOR share of a tensor of ring words.
#[derive(Clone, Debug)]
pub struct BinarySharedTensor {
    pub share: RingTensor,
}

impl BinarySharedTensor {
    pub fn new(share: RingTensor) -> BinarySharedTensor {
        BinarySharedTensor { share }
    }

    /// Secret share integers supplied by `owner` only.
    pub fn from_plain(
        sess: &Session,
        value: Option<&ArrayD<i64>>,
        owner: usize,
    ) -> Result<BinarySharedTensor> {
        let raw = value.map(|x| RingTensor::from(x.clone()));
        BinarySharedTensor::from_raw(sess, raw.as_ref(), owner)
    }

    pub fn from_raw(
        sess: &Session,
        value: Option<&RingTensor>,
        owner: usize,
    ) -> Result<BinarySharedTensor> {
        let shape = share_shape(sess, value, owner)?;
        let mut share = sess.zero_share_xor(&shape)?;
        if sess.rank() == owner {
            if let Some(value) = value {
                share = share.xor(value)?;
            }
        }
        Ok(BinarySharedTensor::new(share))
    }

    /// Trivial sharing of a public value held by party 0.
    pub fn from_public(sess: &Session, x: &RingTensor) -> BinarySharedTensor {
        if sess.rank() == 0 {
            BinarySharedTensor::new(x.clone())
        } else {
            BinarySharedTensor::new(RingTensor::zeros(x.shape()))
        }
    }

    pub fn reveal_raw(&self, sess: &Session) -> Result<RingTensor> {
        sess.xor_reveal("reveal", &self.share)
    }

    pub fn reveal(&self, sess: &Session) -> Result<ArrayD<i64>> {
        Ok(self.reveal_raw(sess)?.as_signed())
    }

    pub fn reveal_to(&self, sess: &Session, dst: usize) -> Result<Option<ArrayD<i64>>> {
        let raw = sess.reveal_to("reveal_to", dst, ReduceOp::Xor, &self.share)?;
        Ok(raw.map(|raw| raw.as_signed()))
    }

    pub fn shape(&self) -> &[usize] {
        self.share.shape()
    }

    pub fn ndim(&self) -> usize {
        self.share.ndim()
    }

    pub fn xor(&self, other: &BinarySharedTensor) -> Result<BinarySharedTensor> {
        Ok(BinarySharedTensor::new(self.share.xor(&other.share)?))
    }

    pub fn xor_public(&self, sess: &Session, x: &RingTensor) -> Result<BinarySharedTensor> {
        let share = if sess.rank() == 0 {
            self.share.xor(x)?
        } else {
            self.share
                .broadcast_to(&broadcast_shapes(self.shape(), x.shape())?)?
        };
        Ok(BinarySharedTensor::new(share))
    }

    pub fn not(&self, sess: &Session) -> BinarySharedTensor {
        if sess.rank() == 0 {
            BinarySharedTensor::new(self.share.not())
        } else {
            self.clone()
        }
    }

    pub fn and(&self, sess: &Session, other: &BinarySharedTensor) -> Result<BinarySharedTensor> {
        let shape = broadcast_shapes(self.shape(), other.shape())?;
        let x = self.share.broadcast_to(&shape)?;
        let y = other.share.broadcast_to(&shape)?;
        let mut out = and_many(sess, &[(&x, &y)])?;
        pop_single(&mut out).map(BinarySharedTensor::new)
    }

    pub fn and_public(&self, x: &RingTensor) -> Result<BinarySharedTensor> {
        Ok(BinarySharedTensor::new(self.share.and(x)?))
    }

    /// `x | y = x ^ y ^ (x & y)`
    pub fn or(&self, sess: &Session, other: &BinarySharedTensor) -> Result<BinarySharedTensor> {
        self.and(sess, other)?.xor(self)?.xor(other)
    }

    pub fn or_public(&self, sess: &Session, x: &RingTensor) -> Result<BinarySharedTensor> {
        self.and_public(x)?.xor(self)?.xor_public(sess, x)
    }

    pub fn shl(&self, amount: usize) -> BinarySharedTensor {
        BinarySharedTensor::new(self.share.shl(amount))
    }

    /// Logical right shift.
    pub fn shr(&self, amount: usize) -> BinarySharedTensor {
        BinarySharedTensor::new(self.share.shr(amount))
    }

    /// Integer addition modulo 2^64.
    pub fn add(&self, sess: &Session, other: &BinarySharedTensor) -> Result<BinarySharedTensor> {
        let shape = broadcast_shapes(self.shape(), other.shape())?;
        let x = self.share.broadcast_to(&shape)?;
        let y = other.share.broadcast_to(&shape)?;
        let mut out = add_many(sess, &[(&x, &y)])?;
        pop_single(&mut out).map(BinarySharedTensor::new)
    }

    /// Integer sum along `axis`, as a tree of additions.
    pub fn sum(&self, sess: &Session, axis: usize) -> Result<BinarySharedTensor> {
        if axis >= self.ndim() {
            return Err(Error::InvalidArgument(format!(
                "axis {} out of range for tensor of rank {}",
                axis,
                self.ndim()
            )));
        }
        let terms: Vec<RingTensor> = (0..self.shape()[axis])
            .map(|i| self.share.index_select(axis, &[i])?.squeeze(axis))
            .collect::<Result<_>>()?;
        if terms.is_empty() {
            let mut shape = self.shape().to_vec();
            shape.remove(axis);
            return Ok(BinarySharedTensor::new(RingTensor::zeros(&shape)));
        }
        Ok(BinarySharedTensor::new(add_tree(sess, terms)?))
    }

    pub fn slice(&self, index: &[IndexElem]) -> Result<BinarySharedTensor> {
        Ok(BinarySharedTensor::new(self.share.slice(index)?))
    }

    pub fn assign_slice(&mut self, index: &[IndexElem], value: &BinarySharedTensor) -> Result<()> {
        self.share.assign_slice(index, &value.share)
    }

    pub fn transpose(&self, a: usize, b: usize) -> Result<BinarySharedTensor> {
        Ok(BinarySharedTensor::new(self.share.transpose(a, b)?))
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<BinarySharedTensor> {
        Ok(BinarySharedTensor::new(self.share.reshape(shape)?))
    }

    pub fn permute(&self, axes: &[usize]) -> Result<BinarySharedTensor> {
        Ok(BinarySharedTensor::new(self.share.permute(axes)?))
    }
}

/// XOR shares of `x & y` for every pair, all opened in one round.
pub(crate) fn and_many(
    sess: &Session,
    pairs: &[(&RingTensor, &RingTensor)],
) -> Result<Vec<RingTensor>> {
    if pairs.is_empty() {
        return Ok(Vec::new());
    }
    let mut triples = Vec::with_capacity(pairs.len());
    let mut blinded = Vec::with_capacity(2 * pairs.len());
    let mut shapes = Vec::with_capacity(2 * pairs.len());
    for (x, y) in pairs {
        if x.shape() != y.shape() {
            return Err(Error::shape_mismatch(x.shape(), y.shape()));
        }
        let triple = sess.binary_triple(x.shape())?;
        blinded.push(x.xor(&triple.a)?);
        blinded.push(y.xor(&triple.b)?);
        shapes.push(x.shape().to_vec());
        shapes.push(y.shape().to_vec());
        triples.push(triple);
    }

    let refs: Vec<&RingTensor> = blinded.iter().collect();
    let opened = sess
        .xor_reveal("and", &RingTensor::pack(&refs))?
        .unpack(&shapes)?;

    let is_first = sess.rank() == 0;
    triples
        .into_iter()
        .zip(opened.chunks(2))
        .map(|(triple, de)| {
            let (d, e) = (&de[0], &de[1]);
            // z = c ^ (d & b) ^ (e & a) (^ d & e)
            let z = triple.c.xor(&d.and(&triple.b)?)?.xor(&e.and(&triple.a)?)?;
            if is_first {
                z.xor(&d.and(e)?)
            } else {
                Ok(z)
            }
        })
        .collect()
}

/// Sum equally shaped terms with a balanced tree of batched additions.
pub(crate) fn add_tree(sess: &Session, mut terms: Vec<RingTensor>) -> Result<RingTensor> {
    while terms.len() > 1 {
        let leftover = if terms.len() % 2 == 1 {
            terms.pop()
        } else {
            None
        };
        let pairs: Vec<(&RingTensor, &RingTensor)> =
            terms.chunks(2).map(|c| (&c[0], &c[1])).collect();
        let mut next = add_many(sess, &pairs)?;
        next.extend(leftover);
        terms = next;
    }
    terms
        .pop()
        .ok_or_else(|| Error::InvalidArgument("nothing to sum".into()))
}
