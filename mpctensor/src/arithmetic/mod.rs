//! Additive secret sharing of fixed-point tensors.
//!
//! Each party holds a [`RingTensor`] and the shared value is the sum of all
//! of them modulo 2^64. Linear operations are local; products use Beaver
//! triples and are rescaled with probabilistic truncation.

use crate::error::{Error, Result};
use crate::fixedpoint::{is_integral, FixedPointEncoding};
use crate::networking::ReduceOp;
use crate::ring::{broadcast_shapes, IndexElem, RingTensor};
use crate::session::Session;
use ndarray::prelude::*;
use std::num::Wrapping;

mod mul;
mod trunc;

pub(crate) use mul::{beaver_many, Product};
pub(crate) use trunc::{trunc_pr, trunc_pr_many};

/// A plaintext operand known to all parties.
#[derive(Clone, Debug, PartialEq)]
pub struct PublicTensor {
    pub value: RingTensor,
    pub precision: u32,
}

impl PublicTensor {
    /// Encode with the session precision; integral values are kept unscaled
    /// so that multiplying by them needs no truncation.
    pub fn encode(sess: &Session, x: &ArrayD<f64>) -> PublicTensor {
        let enc = if is_integral(x) {
            FixedPointEncoding::integer()
        } else {
            sess.encoding()
        };
        PublicTensor {
            value: enc.encode(x),
            precision: enc.precision_bits,
        }
    }

    pub fn scalar(sess: &Session, x: f64) -> PublicTensor {
        PublicTensor::encode(sess, &arr0(x).into_dyn())
    }

    pub fn integer(x: i64) -> PublicTensor {
        PublicTensor {
            value: RingTensor::fill(&[], Wrapping(x as u64)),
            precision: 0,
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }

    fn aligned(&self, precision: u32) -> RingTensor {
        self.value.shl((precision - self.precision) as usize)
    }
}

/// Constant used to fill padded positions.
#[derive(Clone, Debug)]
pub enum PadValue<'a> {
    Public(f64),
    /// A shared 0-d tensor.
    Private(&'a ArithmeticSharedTensor),
}

/// One party's additive share of a fixed-point tensor.
#[derive(Clone, Debug)]
pub struct ArithmeticSharedTensor {
    pub share: RingTensor,
    /// Number of fractional bits of the shared value.
    pub precision: u32,
}

impl ArithmeticSharedTensor {
    pub fn new(share: RingTensor, precision: u32) -> ArithmeticSharedTensor {
        ArithmeticSharedTensor { share, precision }
    }

    pub fn zeros(shape: &[usize], precision: u32) -> ArithmeticSharedTensor {
        ArithmeticSharedTensor::new(RingTensor::zeros(shape), precision)
    }

    /// Secret share a plaintext supplied by `owner` only; the other parties
    /// pass `None` and learn nothing but the shape.
    pub fn from_plain(
        sess: &Session,
        value: Option<&ArrayD<f64>>,
        owner: usize,
    ) -> Result<ArithmeticSharedTensor> {
        let enc = sess.encoding();
        let raw = value.map(|x| enc.encode(x));
        ArithmeticSharedTensor::from_raw(sess, raw.as_ref(), owner, enc.precision_bits)
    }

    /// Secret share already encoded ring values supplied by `owner`.
    pub fn from_raw(
        sess: &Session,
        value: Option<&RingTensor>,
        owner: usize,
        precision: u32,
    ) -> Result<ArithmeticSharedTensor> {
        let shape = share_shape(sess, value, owner)?;
        let mut share = sess.zero_share(&shape)?;
        if sess.rank() == owner {
            if let Some(value) = value {
                share = share.add(value)?;
            }
        }
        Ok(ArithmeticSharedTensor::new(share, precision))
    }

    /// Trivial sharing of a public value; no communication.
    pub fn from_public(sess: &Session, x: &PublicTensor) -> ArithmeticSharedTensor {
        let share = if sess.rank() == 0 {
            x.value.clone()
        } else {
            RingTensor::zeros(x.shape())
        };
        ArithmeticSharedTensor::new(share, x.precision)
    }

    pub fn reveal_raw(&self, sess: &Session) -> Result<RingTensor> {
        sess.sum_reveal("reveal", &self.share)
    }

    pub fn reveal(&self, sess: &Session) -> Result<ArrayD<f64>> {
        let raw = self.reveal_raw(sess)?;
        Ok(FixedPointEncoding::new(self.precision).decode(&raw))
    }

    /// Reveal to `dst` only; every other party gets `None`.
    pub fn reveal_to(&self, sess: &Session, dst: usize) -> Result<Option<ArrayD<f64>>> {
        let raw = sess.reveal_to("reveal_to", dst, ReduceOp::Sum, &self.share)?;
        let enc = FixedPointEncoding::new(self.precision);
        Ok(raw.map(|raw| enc.decode(&raw)))
    }

    pub fn shape(&self) -> &[usize] {
        self.share.shape()
    }

    pub fn ndim(&self) -> usize {
        self.share.ndim()
    }

    pub fn len(&self) -> usize {
        self.share.len()
    }

    pub fn is_empty(&self) -> bool {
        self.share.is_empty()
    }

    fn with_share(&self, share: RingTensor) -> ArithmeticSharedTensor {
        ArithmeticSharedTensor::new(share, self.precision)
    }

    fn aligned(&self, precision: u32) -> RingTensor {
        self.share.shl((precision - self.precision) as usize)
    }

    /// Change the number of fractional bits; lowering it truncates.
    pub fn rescale(&self, sess: &Session, precision: u32) -> Result<ArithmeticSharedTensor> {
        if precision >= self.precision {
            return Ok(ArithmeticSharedTensor::new(self.aligned(precision), precision));
        }
        let share = trunc_pr(sess, &self.share, (self.precision - precision) as usize)?;
        Ok(ArithmeticSharedTensor::new(share, precision))
    }

    /// Divide by `2^amount` keeping the precision.
    pub fn trunc(&self, sess: &Session, amount: usize) -> Result<ArithmeticSharedTensor> {
        Ok(self.with_share(trunc_pr(sess, &self.share, amount)?))
    }

    pub fn add(&self, other: &ArithmeticSharedTensor) -> Result<ArithmeticSharedTensor> {
        let precision = self.precision.max(other.precision);
        let share = self.aligned(precision).add(&other.aligned(precision))?;
        Ok(ArithmeticSharedTensor::new(share, precision))
    }

    pub fn sub(&self, other: &ArithmeticSharedTensor) -> Result<ArithmeticSharedTensor> {
        self.add(&other.neg())
    }

    pub fn neg(&self) -> ArithmeticSharedTensor {
        self.with_share(self.share.neg())
    }

    pub fn add_public(&self, sess: &Session, x: &PublicTensor) -> Result<ArithmeticSharedTensor> {
        let precision = self.precision.max(x.precision);
        let own = self.aligned(precision);
        let share = if sess.rank() == 0 {
            own.add(&x.aligned(precision))?
        } else {
            own.broadcast_to(&broadcast_shapes(self.shape(), x.shape())?)?
        };
        Ok(ArithmeticSharedTensor::new(share, precision))
    }

    pub fn sub_public(&self, sess: &Session, x: &PublicTensor) -> Result<ArithmeticSharedTensor> {
        let negated = PublicTensor {
            value: x.value.neg(),
            precision: x.precision,
        };
        self.add_public(sess, &negated)
    }

    /// `x - self`
    pub fn rsub_public(&self, sess: &Session, x: &PublicTensor) -> Result<ArithmeticSharedTensor> {
        self.neg().add_public(sess, x)
    }

    pub fn add_scalar(&self, sess: &Session, x: f64) -> Result<ArithmeticSharedTensor> {
        self.add_public(sess, &PublicTensor::scalar(sess, x))
    }

    pub fn mul_public(&self, sess: &Session, x: &PublicTensor) -> Result<ArithmeticSharedTensor> {
        let raw = self.share.mul(&x.value)?;
        rescale_product(sess, raw, self.precision, x.precision)
    }

    pub fn mul_scalar(&self, sess: &Session, x: f64) -> Result<ArithmeticSharedTensor> {
        self.mul_public(sess, &PublicTensor::scalar(sess, x))
    }

    /// Multiply by an integer; local and exact modulo wraparound.
    pub fn mul_integer(&self, x: i64) -> ArithmeticSharedTensor {
        self.with_share(self.share.mul_scalar(Wrapping(x as u64)))
    }

    pub fn mul(
        &self,
        sess: &Session,
        other: &ArithmeticSharedTensor,
    ) -> Result<ArithmeticSharedTensor> {
        let mut out = ArithmeticSharedTensor::mul_many(sess, &[(self, other)])?;
        pop_single(&mut out)
    }

    /// Several elementwise products sharing one Beaver round and one
    /// truncation round.
    pub fn mul_many(
        sess: &Session,
        pairs: &[(&ArithmeticSharedTensor, &ArithmeticSharedTensor)],
    ) -> Result<Vec<ArithmeticSharedTensor>> {
        let mut operands = Vec::with_capacity(pairs.len());
        for (x, y) in pairs {
            let shape = broadcast_shapes(x.shape(), y.shape())?;
            operands.push((x.share.broadcast_to(&shape)?, y.share.broadcast_to(&shape)?));
        }
        let requests: Vec<_> = operands
            .iter()
            .map(|(x, y)| (Product::Mul, x, y))
            .collect();
        let raws = beaver_many(sess, &requests)?;
        let precisions: Vec<_> = pairs.iter().map(|(x, y)| (x.precision, y.precision)).collect();
        rescale_products(sess, raws, &precisions)
    }

    pub fn square(&self, sess: &Session) -> Result<ArithmeticSharedTensor> {
        let mut raw = beaver_many(sess, &[(Product::Square, &self.share, &self.share)])?;
        rescale_product(sess, pop_single(&mut raw)?, self.precision, self.precision)
    }

    pub fn matmul(
        &self,
        sess: &Session,
        other: &ArithmeticSharedTensor,
    ) -> Result<ArithmeticSharedTensor> {
        let mut raw = beaver_many(sess, &[(Product::Matmul, &self.share, &other.share)])?;
        rescale_product(sess, pop_single(&mut raw)?, self.precision, other.precision)
    }

    pub fn matmul_public(
        &self,
        sess: &Session,
        x: &PublicTensor,
    ) -> Result<ArithmeticSharedTensor> {
        let raw = self.share.matmul(&x.value)?;
        rescale_product(sess, raw, self.precision, x.precision)
    }

    /// `x @ self` for a public left operand.
    pub fn rmatmul_public(
        &self,
        sess: &Session,
        x: &PublicTensor,
    ) -> Result<ArithmeticSharedTensor> {
        let raw = x.value.matmul(&self.share)?;
        rescale_product(sess, raw, x.precision, self.precision)
    }

    pub fn sum(&self, axis: Option<usize>, keepdim: bool) -> Result<ArithmeticSharedTensor> {
        Ok(self.with_share(self.share.sum(axis, keepdim)?))
    }

    pub fn mean(
        &self,
        sess: &Session,
        axis: Option<usize>,
        keepdim: bool,
    ) -> Result<ArithmeticSharedTensor> {
        let count = match axis {
            Some(axis) => self.shape().get(axis).copied().unwrap_or(1),
            None => self.len(),
        };
        if count == 0 {
            return Err(Error::InvalidArgument("mean of an empty tensor".into()));
        }
        self.sum(axis, keepdim)?
            .mul_scalar(sess, 1.0 / count as f64)
    }

    pub fn cumsum(&self, axis: usize) -> Result<ArithmeticSharedTensor> {
        Ok(self.with_share(self.share.cumsum(axis)?))
    }

    pub fn trace(&self) -> Result<ArithmeticSharedTensor> {
        Ok(self.with_share(self.share.trace()?))
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<ArithmeticSharedTensor> {
        Ok(self.with_share(self.share.reshape(shape)?))
    }

    pub fn permute(&self, axes: &[usize]) -> Result<ArithmeticSharedTensor> {
        Ok(self.with_share(self.share.permute(axes)?))
    }

    pub fn transpose(&self, a: usize, b: usize) -> Result<ArithmeticSharedTensor> {
        Ok(self.with_share(self.share.transpose(a, b)?))
    }

    pub fn expand_dims(&self, axis: usize) -> Result<ArithmeticSharedTensor> {
        Ok(self.with_share(self.share.expand_dims(axis)?))
    }

    pub fn squeeze(&self, axis: usize) -> Result<ArithmeticSharedTensor> {
        Ok(self.with_share(self.share.squeeze(axis)?))
    }

    pub fn broadcast_to(&self, shape: &[usize]) -> Result<ArithmeticSharedTensor> {
        Ok(self.with_share(self.share.broadcast_to(shape)?))
    }

    pub fn slice(&self, index: &[IndexElem]) -> Result<ArithmeticSharedTensor> {
        Ok(self.with_share(self.share.slice(index)?))
    }

    /// Overwrite the indexed region; `value` must already carry this
    /// tensor's precision.
    pub fn assign_slice(
        &mut self,
        index: &[IndexElem],
        value: &ArithmeticSharedTensor,
    ) -> Result<()> {
        if value.precision != self.precision {
            return Err(Error::InvalidArgument(format!(
                "cannot assign values of precision {} into precision {}",
                value.precision, self.precision
            )));
        }
        self.share.assign_slice(index, &value.share)
    }

    pub fn index_select(&self, axis: usize, indices: &[usize]) -> Result<ArithmeticSharedTensor> {
        Ok(self.with_share(self.share.index_select(axis, indices)?))
    }

    pub fn concatenate(
        axis: usize,
        parts: &[&ArithmeticSharedTensor],
    ) -> Result<ArithmeticSharedTensor> {
        let (precision, shares) = aligned_shares(parts)?;
        let refs: Vec<&RingTensor> = shares.iter().collect();
        Ok(ArithmeticSharedTensor::new(
            RingTensor::concatenate(axis, &refs)?,
            precision,
        ))
    }

    pub fn stack(axis: usize, parts: &[&ArithmeticSharedTensor]) -> Result<ArithmeticSharedTensor> {
        let (precision, shares) = aligned_shares(parts)?;
        let refs: Vec<&RingTensor> = shares.iter().collect();
        Ok(ArithmeticSharedTensor::new(
            RingTensor::stack(axis, &refs)?,
            precision,
        ))
    }

    pub fn flip(&self, axes: &[usize]) -> Result<ArithmeticSharedTensor> {
        Ok(self.with_share(self.share.flip(axes)?))
    }

    pub fn roll(&self, shift: isize, axis: usize) -> Result<ArithmeticSharedTensor> {
        Ok(self.with_share(self.share.roll(shift, axis)?))
    }

    pub fn repeat(&self, reps: &[usize]) -> Result<ArithmeticSharedTensor> {
        Ok(self.with_share(self.share.repeat(reps)?))
    }

    pub fn pad(
        &self,
        sess: &Session,
        widths: &[(usize, usize)],
        value: PadValue,
    ) -> Result<ArithmeticSharedTensor> {
        match value {
            PadValue::Public(value) => {
                let enc = FixedPointEncoding::new(self.precision);
                let fill = if sess.rank() == 0 {
                    enc.encode_scalar(value)
                } else {
                    Wrapping(0)
                };
                Ok(self.with_share(self.share.pad(widths, fill)?))
            }
            PadValue::Private(value) => {
                if !value.shape().is_empty() {
                    return Err(Error::InvalidArgument(format!(
                        "pad value must be a scalar, got shape {:?}",
                        value.shape()
                    )));
                }
                // padding each share with a share of the constant pads the secret
                let value = value.rescale(sess, self.precision)?;
                let fill = value.share.0.iter().next().copied().unwrap_or(Wrapping(0));
                Ok(self.with_share(self.share.pad(widths, fill)?))
            }
        }
    }

    /// 2-d convolution of an `[N, C, H, W]` input with an `[O, C, KH, KW]`
    /// shared kernel.
    pub fn conv2d(
        &self,
        sess: &Session,
        kernel: &ArithmeticSharedTensor,
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Result<ArithmeticSharedTensor> {
        let (columns, weights, out_shape) = conv2d_operands(self, &kernel.share, stride, padding)?;
        let mut raw = beaver_many(sess, &[(Product::Matmul, &columns, &weights)])?;
        let raw = conv2d_output(pop_single(&mut raw)?, &out_shape)?;
        rescale_product(sess, raw, self.precision, kernel.precision)
    }

    pub fn conv2d_public(
        &self,
        sess: &Session,
        kernel: &PublicTensor,
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Result<ArithmeticSharedTensor> {
        let (columns, weights, out_shape) = conv2d_operands(self, &kernel.value, stride, padding)?;
        let raw = conv2d_output(columns.matmul(&weights)?, &out_shape)?;
        rescale_product(sess, raw, self.precision, kernel.precision)
    }

    pub fn sum_pool2d(
        &self,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Result<ArithmeticSharedTensor> {
        let (windows, (oh, ow)) = self.share.unfold2d(kernel, stride, padding, Wrapping(0))?;
        let (n, c) = (windows.shape()[0], windows.shape()[1]);
        let summed = windows.sum(Some(3), false)?.reshape(&[n, c, oh, ow])?;
        Ok(self.with_share(summed))
    }

    /// Average pooling; padded positions count towards the divisor.
    pub fn avg_pool2d(
        &self,
        sess: &Session,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Result<ArithmeticSharedTensor> {
        let window = (kernel.0 * kernel.1) as f64;
        self.sum_pool2d(kernel, stride, padding)?
            .mul_scalar(sess, 1.0 / window)
    }
}

/// Validate the owner and let it announce the shape of its plaintext.
pub(crate) fn share_shape(
    sess: &Session,
    value: Option<&RingTensor>,
    owner: usize,
) -> Result<Vec<usize>> {
    if owner >= sess.world_size() {
        return Err(Error::InvalidArgument(format!(
            "owner {} outside world of size {}",
            owner,
            sess.world_size()
        )));
    }
    let announced = if sess.rank() == owner {
        let value = value.ok_or_else(|| {
            Error::InvalidArgument(format!("owner {} must supply the plaintext", owner))
        })?;
        let dims: Vec<u64> = value.shape().iter().map(|d| *d as u64).collect();
        Some(RingTensor::from_vec(&[dims.len()], dims)?)
    } else {
        None
    };
    let dims = sess.broadcast("shape", owner, announced.as_ref())?;
    Ok(dims.0.iter().map(|d| d.0 as usize).collect())
}

pub(crate) fn pop_single<T>(out: &mut Vec<T>) -> Result<T> {
    out.pop()
        .ok_or_else(|| Error::Unexpected(Some("protocol produced no output".into())))
}

/// Bring a raw product of precisions `p` and `q` back to `max(p, q)`.
fn rescale_product(
    sess: &Session,
    raw: RingTensor,
    p: u32,
    q: u32,
) -> Result<ArithmeticSharedTensor> {
    let mut out = rescale_products(sess, vec![raw], &[(p, q)])?;
    pop_single(&mut out)
}

fn rescale_products(
    sess: &Session,
    raws: Vec<RingTensor>,
    precisions: &[(u32, u32)],
) -> Result<Vec<ArithmeticSharedTensor>> {
    let pending: Vec<(&RingTensor, usize)> = raws
        .iter()
        .zip(precisions)
        .filter(|(_, (p, q))| p.min(q) > &0)
        .map(|(raw, (p, q))| (raw, *p.min(q) as usize))
        .collect();
    let mut truncated = trunc_pr_many(sess, &pending)?.into_iter();
    raws.iter()
        .zip(precisions)
        .map(|(raw, (p, q))| {
            let share = if p.min(q) > &0 {
                truncated.next().ok_or_else(|| {
                    Error::Unexpected(Some("missing truncated product".into()))
                })?
            } else {
                raw.clone()
            };
            Ok(ArithmeticSharedTensor::new(share, *p.max(q)))
        })
        .collect()
}

fn aligned_shares(parts: &[&ArithmeticSharedTensor]) -> Result<(u32, Vec<RingTensor>)> {
    let precision = parts
        .iter()
        .map(|p| p.precision)
        .max()
        .ok_or_else(|| Error::InvalidArgument("nothing to join".into()))?;
    Ok((precision, parts.iter().map(|p| p.aligned(precision)).collect()))
}

/// Unfolded input `[N, L, C * KH * KW]`, reshaped kernel `[C * KH * KW, O]`
/// and the output shape `[N, O, OH, OW]`.
fn conv2d_operands(
    x: &ArithmeticSharedTensor,
    kernel: &RingTensor,
    stride: (usize, usize),
    padding: (usize, usize),
) -> Result<(RingTensor, RingTensor, Vec<usize>)> {
    if x.ndim() != 4 || kernel.ndim() != 4 || x.shape()[1] != kernel.shape()[1] {
        return Err(Error::shape_mismatch(x.shape(), kernel.shape()));
    }
    let (o, c, kh, kw) = {
        let s = kernel.shape();
        (s[0], s[1], s[2], s[3])
    };
    let (windows, (oh, ow)) = x.share.unfold2d((kh, kw), stride, padding, Wrapping(0))?;
    let n = windows.shape()[0];
    let columns = windows
        .permute(&[0, 2, 1, 3])?
        .reshape(&[n, oh * ow, c * kh * kw])?;
    let weights = kernel.reshape(&[o, c * kh * kw])?.transpose(0, 1)?;
    Ok((columns, weights, vec![n, o, oh, ow]))
}

fn conv2d_output(product: RingTensor, out_shape: &[usize]) -> Result<RingTensor> {
    product.permute(&[0, 2, 1])?.reshape(out_shape)
}
