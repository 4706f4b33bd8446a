//! The user facing secret-shared tensor.
//!
//! An [`MpcTensor`] is either additively or XOR shared. Arithmetic,
//! comparisons and approximations need the additive form, bitwise operations
//! the XOR form; switching between the two is explicit through
//! [`MpcTensor::to_binary`] and [`MpcTensor::to_arithmetic`].
//!
//! Every party must call the same operations in the same order.

use crate::approx;
use crate::arithmetic::{ArithmeticSharedTensor, PadValue, PublicTensor};
use crate::binary::BinarySharedTensor;
use crate::comparison::{self, Comparand};
use crate::convert::{a2b, b2a};
use crate::error::{Error, Result};
use crate::fixedpoint::FixedPointEncoding;
use crate::ring::{IndexElem, RingTensor, RING_WIDTH};
use crate::session::Session;
use ndarray::prelude::*;
use std::num::Wrapping;

type Shared = ArithmeticSharedTensor;

#[derive(Clone, Debug)]
pub enum Backing {
    Arithmetic(ArithmeticSharedTensor),
    /// XOR shares of the ring words of a value with `precision` fractional bits.
    Binary {
        tensor: BinarySharedTensor,
        precision: u32,
    },
}

/// Second operand of a binary operation.
#[derive(Clone, Copy, Debug)]
pub enum Operand<'a> {
    Private(&'a MpcTensor),
    Public(&'a ArrayD<f64>),
    Scalar(f64),
}

impl<'a> From<&'a MpcTensor> for Operand<'a> {
    fn from(x: &'a MpcTensor) -> Operand<'a> {
        Operand::Private(x)
    }
}

impl<'a> From<&'a ArrayD<f64>> for Operand<'a> {
    fn from(x: &'a ArrayD<f64>) -> Operand<'a> {
        Operand::Public(x)
    }
}

impl<'a> From<f64> for Operand<'a> {
    fn from(x: f64) -> Operand<'a> {
        Operand::Scalar(x)
    }
}

#[derive(Clone, Debug)]
pub struct MpcTensor {
    backing: Backing,
}

impl From<ArithmeticSharedTensor> for MpcTensor {
    fn from(x: ArithmeticSharedTensor) -> MpcTensor {
        MpcTensor {
            backing: Backing::Arithmetic(x),
        }
    }
}

impl MpcTensor {
    fn binary(tensor: BinarySharedTensor, precision: u32) -> MpcTensor {
        MpcTensor {
            backing: Backing::Binary { tensor, precision },
        }
    }

    /// Additively share a real tensor held by `owner`; the other parties
    /// pass `None`.
    pub fn from_plain(
        sess: &Session,
        value: Option<&ArrayD<f64>>,
        owner: usize,
    ) -> Result<MpcTensor> {
        Ok(Shared::from_plain(sess, value, owner)?.into())
    }

    /// XOR share an integer tensor held by `owner`.
    pub fn from_plain_binary(
        sess: &Session,
        value: Option<&ArrayD<i64>>,
        owner: usize,
    ) -> Result<MpcTensor> {
        Ok(MpcTensor::binary(
            BinarySharedTensor::from_plain(sess, value, owner)?,
            0,
        ))
    }

    /// Uniform samples from `[0, 1)`.
    pub fn rand(sess: &Session, shape: &[usize]) -> Result<MpcTensor> {
        Ok(approx::rand(sess, shape)?.into())
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    pub fn into_backing(self) -> Backing {
        self.backing
    }

    pub fn is_binary(&self) -> bool {
        matches!(self.backing, Backing::Binary { .. })
    }

    /// This party's share.
    pub fn share(&self) -> &RingTensor {
        match &self.backing {
            Backing::Arithmetic(x) => &x.share,
            Backing::Binary { tensor, .. } => &tensor.share,
        }
    }

    /// Address of this party's share storage.
    pub fn storage_ptr(&self) -> *const Wrapping<u64> {
        self.share().as_ptr()
    }

    pub fn precision(&self) -> u32 {
        match &self.backing {
            Backing::Arithmetic(x) => x.precision,
            Backing::Binary { precision, .. } => *precision,
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.share().shape()
    }

    pub fn ndim(&self) -> usize {
        self.share().ndim()
    }

    pub fn len(&self) -> usize {
        self.share().len()
    }

    pub fn is_empty(&self) -> bool {
        self.share().is_empty()
    }

    pub fn reveal(&self, sess: &Session) -> Result<ArrayD<f64>> {
        match &self.backing {
            Backing::Arithmetic(x) => x.reveal(sess),
            Backing::Binary { tensor, precision } => {
                let raw = tensor.reveal_raw(sess)?;
                Ok(FixedPointEncoding::new(*precision).decode(&raw))
            }
        }
    }

    /// Reveal to `dst` only; the other parties get `None`.
    pub fn reveal_to(&self, sess: &Session, dst: usize) -> Result<Option<ArrayD<f64>>> {
        match &self.backing {
            Backing::Arithmetic(x) => x.reveal_to(sess, dst),
            Backing::Binary { tensor, precision } => {
                let enc = FixedPointEncoding::new(*precision);
                Ok(tensor
                    .reveal_to(sess, dst)?
                    .map(|words| enc.decode(&RingTensor::from(words))))
            }
        }
    }

    pub fn to_binary(&self, sess: &Session) -> Result<MpcTensor> {
        match &self.backing {
            Backing::Arithmetic(x) => Ok(MpcTensor::binary(a2b(sess, x)?, x.precision)),
            Backing::Binary { .. } => Ok(self.clone()),
        }
    }

    pub fn to_arithmetic(&self, sess: &Session) -> Result<MpcTensor> {
        match &self.backing {
            Backing::Arithmetic(_) => Ok(self.clone()),
            Backing::Binary { tensor, precision } => {
                Ok(b2a(sess, tensor, RING_WIDTH, *precision)?.into())
            }
        }
    }

    fn arithmetic(&self) -> Result<&Shared> {
        match &self.backing {
            Backing::Arithmetic(x) => Ok(x),
            Backing::Binary { .. } => Err(Error::InvalidArgument(
                "operation needs an arithmetic sharing; convert with to_arithmetic".into(),
            )),
        }
    }

    fn bits(&self) -> Result<(&BinarySharedTensor, u32)> {
        match &self.backing {
            Backing::Binary { tensor, precision } => Ok((tensor, *precision)),
            Backing::Arithmetic(_) => Err(Error::InvalidArgument(
                "operation needs a binary sharing; convert with to_binary".into(),
            )),
        }
    }

    /// Apply a local kernel to the share, whatever the backing.
    fn map_local<F>(&self, f: F) -> Result<MpcTensor>
    where
        F: FnOnce(&RingTensor) -> Result<RingTensor>,
    {
        let backing = match &self.backing {
            Backing::Arithmetic(x) => Backing::Arithmetic(Shared::new(f(&x.share)?, x.precision)),
            Backing::Binary { tensor, precision } => Backing::Binary {
                tensor: BinarySharedTensor::new(f(&tensor.share)?),
                precision: *precision,
            },
        };
        Ok(MpcTensor { backing })
    }

    fn map_arithmetic<F>(&self, f: F) -> Result<MpcTensor>
    where
        F: FnOnce(&Shared) -> Result<Shared>,
    {
        Ok(f(self.arithmetic()?)?.into())
    }

    /// Overwrite this tensor's storage with `result`, keeping its address.
    fn assign_result(&mut self, result: MpcTensor) -> Result<()> {
        if result.shape() != self.shape() {
            return Err(Error::shape_mismatch(self.shape(), result.shape()));
        }
        match (&mut self.backing, result.backing) {
            (Backing::Arithmetic(x), Backing::Arithmetic(y)) => {
                x.share.assign(&y.share)?;
                x.precision = y.precision;
            }
            (
                Backing::Binary { tensor, precision },
                Backing::Binary {
                    tensor: y,
                    precision: p,
                },
            ) => {
                tensor.share.assign(&y.share)?;
                *precision = p;
            }
            _ => {
                return Err(Error::Unexpected(Some(
                    "in-place update changed the sharing".into(),
                )))
            }
        }
        Ok(())
    }

    /// Integer words of a public operand, encoded at `precision`.
    fn public_words(x: Operand, precision: u32) -> Result<RingTensor> {
        let enc = FixedPointEncoding::new(precision);
        match x {
            Operand::Public(x) => Ok(enc.encode(x)),
            Operand::Scalar(x) => Ok(RingTensor::fill(&[], enc.encode_scalar(x))),
            Operand::Private(_) => Err(Error::Unexpected(Some(
                "private operand where a public one was expected".into(),
            ))),
        }
    }

    pub fn add<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        let other = other.into();
        if let Ok((x, precision)) = self.bits() {
            let y = match other {
                Operand::Private(y) => {
                    let (y, p) = y.bits()?;
                    if p != precision {
                        return Err(Error::InvalidArgument(format!(
                            "cannot add binary tensors of precision {} and {}",
                            precision, p
                        )));
                    }
                    y.clone()
                }
                public => BinarySharedTensor::from_public(
                    sess,
                    &MpcTensor::public_words(public, precision)?,
                ),
            };
            return Ok(MpcTensor::binary(x.add(sess, &y)?, precision));
        }
        self.map_arithmetic(|x| match other {
            Operand::Private(y) => x.add(y.arithmetic()?),
            Operand::Public(y) => x.add_public(sess, &PublicTensor::encode(sess, y)),
            Operand::Scalar(y) => x.add_scalar(sess, y),
        })
    }

    pub fn sub<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        self.map_arithmetic(|x| match other.into() {
            Operand::Private(y) => x.sub(y.arithmetic()?),
            Operand::Public(y) => x.sub_public(sess, &PublicTensor::encode(sess, y)),
            Operand::Scalar(y) => x.add_scalar(sess, -y),
        })
    }

    /// `other - self`
    pub fn rsub<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        self.map_arithmetic(|x| match other.into() {
            Operand::Private(y) => y.arithmetic()?.sub(x),
            Operand::Public(y) => x.rsub_public(sess, &PublicTensor::encode(sess, y)),
            Operand::Scalar(y) => x.rsub_public(sess, &PublicTensor::scalar(sess, y)),
        })
    }

    pub fn mul<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        self.map_arithmetic(|x| match other.into() {
            Operand::Private(y) => x.mul(sess, y.arithmetic()?),
            Operand::Public(y) => x.mul_public(sess, &PublicTensor::encode(sess, y)),
            Operand::Scalar(y) => x.mul_scalar(sess, y),
        })
    }

    pub fn div<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        self.map_arithmetic(|x| match other.into() {
            Operand::Private(y) => approx::div(sess, x, y.arithmetic()?),
            Operand::Public(y) => {
                x.mul_public(sess, &PublicTensor::encode(sess, &y.mapv(f64::recip)))
            }
            Operand::Scalar(y) => x.mul_scalar(sess, 1.0 / y),
        })
    }

    pub fn add_<'a>(&mut self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<()> {
        let result = self.add(sess, other)?;
        self.assign_result(result)
    }

    pub fn sub_<'a>(&mut self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<()> {
        let result = self.sub(sess, other)?;
        self.assign_result(result)
    }

    pub fn mul_<'a>(&mut self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<()> {
        let result = self.mul(sess, other)?;
        self.assign_result(result)
    }

    pub fn div_<'a>(&mut self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<()> {
        let result = self.div(sess, other)?;
        self.assign_result(result)
    }

    pub fn neg(&self) -> Result<MpcTensor> {
        self.map_arithmetic(|x| Ok(x.neg()))
    }

    pub fn square(&self, sess: &Session) -> Result<MpcTensor> {
        self.map_arithmetic(|x| x.square(sess))
    }

    /// Batched matrix product with a private or public right operand.
    pub fn matmul<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        self.map_arithmetic(|x| match other.into() {
            Operand::Private(y) => x.matmul(sess, y.arithmetic()?),
            Operand::Public(y) => x.matmul_public(sess, &PublicTensor::encode(sess, y)),
            Operand::Scalar(_) => Err(Error::InvalidArgument(
                "matmul needs a tensor operand".into(),
            )),
        })
    }

    /// Inner product of two vectors.
    pub fn dot<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        let other = other.into();
        let other_shape = match other {
            Operand::Private(y) => y.shape().to_vec(),
            Operand::Public(y) => y.shape().to_vec(),
            Operand::Scalar(_) => vec![],
        };
        if self.ndim() != 1 || other_shape != self.shape() {
            return Err(Error::shape_mismatch(self.shape(), &other_shape));
        }
        self.mul(sess, other)?.sum(sess, None, false)
    }

    /// Outer product of two vectors.
    pub fn ger(&self, sess: &Session, other: &MpcTensor) -> Result<MpcTensor> {
        if self.ndim() != 1 || other.ndim() != 1 {
            return Err(Error::shape_mismatch(self.shape(), other.shape()));
        }
        let column = self.unsqueeze(1)?;
        let row = other.unsqueeze(0)?;
        column.mul(sess, &row)
    }

    /// Sum over `dim`, or over everything when `dim` is `None`. Binary
    /// tensors are summed as integers modulo 2^64.
    pub fn sum(&self, sess: &Session, dim: Option<usize>, keepdim: bool) -> Result<MpcTensor> {
        if let Ok((x, precision)) = self.bits() {
            let (x, axis) = match dim {
                Some(dim) => (x.clone(), dim),
                None => (x.reshape(&[self.len()])?, 0),
            };
            let summed = x.sum(sess, axis)?;
            let summed = match (dim, keepdim) {
                (Some(dim), true) => BinarySharedTensor::new(summed.share.expand_dims(dim)?),
                (None, true) => summed.reshape(&vec![1; self.ndim()])?,
                _ => summed,
            };
            return Ok(MpcTensor::binary(summed, precision));
        }
        self.map_arithmetic(|x| x.sum(dim, keepdim))
    }

    pub fn mean(&self, sess: &Session, dim: Option<usize>, keepdim: bool) -> Result<MpcTensor> {
        self.map_arithmetic(|x| x.mean(sess, dim, keepdim))
    }

    pub fn cumsum(&self, dim: usize) -> Result<MpcTensor> {
        self.map_arithmetic(|x| x.cumsum(dim))
    }

    pub fn trace(&self) -> Result<MpcTensor> {
        self.map_arithmetic(|x| x.trace())
    }

    pub fn get(&self, index: &[IndexElem]) -> Result<MpcTensor> {
        self.map_local(|x| x.slice(index))
    }

    /// Overwrite the indexed region with a private or public value.
    pub fn set<'a>(
        &mut self,
        sess: &Session,
        index: &[IndexElem],
        value: impl Into<Operand<'a>>,
    ) -> Result<()> {
        let precision = self.precision();
        let is_first = sess.rank() == 0;
        let update = match (&self.backing, value.into()) {
            (Backing::Arithmetic(_), Operand::Private(v)) => {
                v.arithmetic()?.rescale(sess, precision)?.share
            }
            (Backing::Binary { .. }, Operand::Private(v)) => {
                let (v, p) = v.bits()?;
                if p != precision {
                    return Err(Error::InvalidArgument(format!(
                        "cannot store precision {} values into precision {}",
                        p, precision
                    )));
                }
                v.share.clone()
            }
            (_, public) => {
                let words = MpcTensor::public_words(public, precision)?;
                if is_first {
                    words
                } else {
                    RingTensor::zeros(words.shape())
                }
            }
        };
        match &mut self.backing {
            Backing::Arithmetic(x) => x.share.assign_slice(index, &update),
            Backing::Binary { tensor, .. } => tensor.share.assign_slice(index, &update),
        }
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<MpcTensor> {
        self.map_local(|x| x.reshape(shape))
    }

    pub fn view(&self, shape: &[usize]) -> Result<MpcTensor> {
        self.reshape(shape)
    }

    pub fn flatten(&self) -> Result<MpcTensor> {
        self.reshape(&[self.len()])
    }

    pub fn squeeze(&self, dim: usize) -> Result<MpcTensor> {
        self.map_local(|x| x.squeeze(dim))
    }

    pub fn unsqueeze(&self, dim: usize) -> Result<MpcTensor> {
        self.map_local(|x| x.expand_dims(dim))
    }

    pub fn transpose(&self, dim0: usize, dim1: usize) -> Result<MpcTensor> {
        self.map_local(|x| x.transpose(dim0, dim1))
    }

    /// Transpose of a tensor of rank at most 2.
    pub fn t(&self) -> Result<MpcTensor> {
        match self.ndim() {
            0 | 1 => Ok(self.clone()),
            2 => self.transpose(0, 1),
            n => Err(Error::InvalidArgument(format!(
                "t() expects at most 2 dimensions, got {}",
                n
            ))),
        }
    }

    pub fn permute(&self, dims: &[usize]) -> Result<MpcTensor> {
        self.map_local(|x| x.permute(dims))
    }

    pub fn expand(&self, shape: &[usize]) -> Result<MpcTensor> {
        self.map_local(|x| x.broadcast_to(shape))
    }

    pub fn repeat(&self, reps: &[usize]) -> Result<MpcTensor> {
        self.map_local(|x| x.repeat(reps))
    }

    pub fn index_select(&self, dim: usize, indices: &[usize]) -> Result<MpcTensor> {
        self.map_local(|x| x.index_select(dim, indices))
    }

    /// Entries at the given positions of the flattened tensor.
    pub fn take(&self, indices: &[usize]) -> Result<MpcTensor> {
        self.map_local(|x| x.reshape(&[x.len()])?.index_select(0, indices))
    }

    pub fn flip(&self, dims: &[usize]) -> Result<MpcTensor> {
        self.map_local(|x| x.flip(dims))
    }

    pub fn roll(&self, shift: isize, dim: usize) -> Result<MpcTensor> {
        self.map_local(|x| x.roll(shift, dim))
    }

    /// Constant padding; `value` is a scalar, public or private.
    pub fn pad<'a>(
        &self,
        sess: &Session,
        widths: &[(usize, usize)],
        value: impl Into<Operand<'a>>,
    ) -> Result<MpcTensor> {
        let value = value.into();
        self.map_arithmetic(|x| match value {
            Operand::Scalar(v) => x.pad(sess, widths, PadValue::Public(v)),
            Operand::Public(v) if v.ndim() == 0 => {
                let v = v.iter().next().copied().unwrap_or_default();
                x.pad(sess, widths, PadValue::Public(v))
            }
            Operand::Public(v) => Err(Error::InvalidArgument(format!(
                "pad value must be a scalar, got shape {:?}",
                v.shape()
            ))),
            Operand::Private(v) => x.pad(sess, widths, PadValue::Private(v.arithmetic()?)),
        })
    }

    /// 2-d convolution of `[N, C, H, W]` with an `[O, C, KH, KW]` kernel.
    pub fn conv2d<'a>(
        &self,
        sess: &Session,
        kernel: impl Into<Operand<'a>>,
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Result<MpcTensor> {
        self.map_arithmetic(|x| match kernel.into() {
            Operand::Private(k) => x.conv2d(sess, k.arithmetic()?, stride, padding),
            Operand::Public(k) => {
                x.conv2d_public(sess, &PublicTensor::encode(sess, k), stride, padding)
            }
            Operand::Scalar(_) => Err(Error::InvalidArgument(
                "conv2d needs a kernel tensor".into(),
            )),
        })
    }

    pub fn sum_pool2d(
        &self,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Result<MpcTensor> {
        self.map_arithmetic(|x| x.sum_pool2d(kernel, stride, padding))
    }

    pub fn avg_pool2d(
        &self,
        sess: &Session,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Result<MpcTensor> {
        self.map_arithmetic(|x| x.avg_pool2d(sess, kernel, stride, padding))
    }

    pub fn max_pool2d(
        &self,
        sess: &Session,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
    ) -> Result<MpcTensor> {
        self.map_arithmetic(|x| comparison::max_pool2d(sess, x, kernel, stride, padding))
    }

    fn compare<'a, F>(&self, sess: &Session, other: Operand<'a>, f: F) -> Result<MpcTensor>
    where
        F: FnOnce(&Session, &Shared, Comparand) -> Result<Shared>,
    {
        let x = self.arithmetic()?;
        let result = match other {
            Operand::Private(y) => f(sess, x, Comparand::Private(y.arithmetic()?)),
            Operand::Public(y) => f(sess, x, Comparand::Public(&PublicTensor::encode(sess, y))),
            Operand::Scalar(y) => f(sess, x, Comparand::Public(&PublicTensor::scalar(sess, y))),
        }?;
        Ok(result.into())
    }

    pub fn lt<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        self.compare(sess, other.into(), |s, x, y| comparison::lt(s, x, y))
    }

    pub fn le<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        self.compare(sess, other.into(), |s, x, y| comparison::le(s, x, y))
    }

    pub fn gt<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        self.compare(sess, other.into(), |s, x, y| comparison::gt(s, x, y))
    }

    pub fn ge<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        self.compare(sess, other.into(), |s, x, y| comparison::ge(s, x, y))
    }

    pub fn eq<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        self.compare(sess, other.into(), |s, x, y| comparison::eq(s, x, y))
    }

    pub fn ne<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        self.compare(sess, other.into(), |s, x, y| comparison::ne(s, x, y))
    }

    pub fn sign(&self, sess: &Session) -> Result<MpcTensor> {
        self.map_arithmetic(|x| comparison::sign(sess, x))
    }

    pub fn abs(&self, sess: &Session) -> Result<MpcTensor> {
        self.map_arithmetic(|x| comparison::abs(sess, x))
    }

    pub fn relu(&self, sess: &Session) -> Result<MpcTensor> {
        self.map_arithmetic(|x| comparison::relu(sess, x))
    }

    pub fn max(&self, sess: &Session, dim: Option<usize>, keepdim: bool) -> Result<MpcTensor> {
        self.map_arithmetic(|x| comparison::max(sess, x, dim, keepdim))
    }

    pub fn min(&self, sess: &Session, dim: Option<usize>, keepdim: bool) -> Result<MpcTensor> {
        self.map_arithmetic(|x| comparison::min(sess, x, dim, keepdim))
    }

    /// One-hot position of the first maximum.
    pub fn argmax(&self, sess: &Session, dim: Option<usize>) -> Result<MpcTensor> {
        self.map_arithmetic(|x| comparison::argmax(sess, x, dim))
    }

    pub fn argmin(&self, sess: &Session, dim: Option<usize>) -> Result<MpcTensor> {
        self.map_arithmetic(|x| comparison::argmin(sess, x, dim))
    }

    pub fn exp(&self, sess: &Session) -> Result<MpcTensor> {
        self.map_arithmetic(|x| approx::exp(sess, x))
    }

    pub fn log(&self, sess: &Session) -> Result<MpcTensor> {
        self.map_arithmetic(|x| approx::log(sess, x))
    }

    pub fn sqrt(&self, sess: &Session) -> Result<MpcTensor> {
        self.map_arithmetic(|x| approx::sqrt(sess, x))
    }

    pub fn inv_sqrt(&self, sess: &Session) -> Result<MpcTensor> {
        self.map_arithmetic(|x| approx::inv_sqrt(sess, x))
    }

    pub fn reciprocal(&self, sess: &Session) -> Result<MpcTensor> {
        self.map_arithmetic(|x| approx::reciprocal(sess, x))
    }

    pub fn pow(&self, sess: &Session, p: f64) -> Result<MpcTensor> {
        self.map_arithmetic(|x| approx::pow(sess, x, p))
    }

    pub fn norm(&self, sess: &Session, dim: Option<usize>, keepdim: bool) -> Result<MpcTensor> {
        self.map_arithmetic(|x| approx::norm(sess, x, dim, keepdim))
    }

    pub fn sigmoid(&self, sess: &Session) -> Result<MpcTensor> {
        self.map_arithmetic(|x| approx::sigmoid(sess, x))
    }

    pub fn tanh(&self, sess: &Session) -> Result<MpcTensor> {
        self.map_arithmetic(|x| approx::tanh(sess, x))
    }

    pub fn softmax(&self, sess: &Session, dim: usize) -> Result<MpcTensor> {
        self.map_arithmetic(|x| approx::softmax(sess, x, dim))
    }

    pub fn log_softmax(&self, sess: &Session, dim: usize) -> Result<MpcTensor> {
        self.map_arithmetic(|x| approx::log_softmax(sess, x, dim))
    }

    pub fn cos(&self, sess: &Session) -> Result<MpcTensor> {
        self.map_arithmetic(|x| approx::cos(sess, x))
    }

    pub fn sin(&self, sess: &Session) -> Result<MpcTensor> {
        self.map_arithmetic(|x| approx::sin(sess, x))
    }

    /// 0/1 samples, this tensor holding the probabilities.
    pub fn bernoulli(&self, sess: &Session) -> Result<MpcTensor> {
        self.map_arithmetic(|x| approx::bernoulli(sess, x))
    }

    fn bitwise<F, G>(&self, other: Operand, private: F, public: G) -> Result<MpcTensor>
    where
        F: FnOnce(&BinarySharedTensor, &BinarySharedTensor) -> Result<BinarySharedTensor>,
        G: FnOnce(&BinarySharedTensor, &RingTensor) -> Result<BinarySharedTensor>,
    {
        let (x, precision) = self.bits()?;
        let result = match other {
            Operand::Private(y) => private(x, y.bits()?.0)?,
            public_operand => public(x, &MpcTensor::public_words(public_operand, precision)?)?,
        };
        Ok(MpcTensor::binary(result, precision))
    }

    pub fn xor<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        self.bitwise(other.into(), |x, y| x.xor(y), |x, y| x.xor_public(sess, y))
    }

    pub fn and<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        self.bitwise(other.into(), |x, y| x.and(sess, y), |x, y| x.and_public(y))
    }

    pub fn or<'a>(&self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<MpcTensor> {
        self.bitwise(other.into(), |x, y| x.or(sess, y), |x, y| x.or_public(sess, y))
    }

    pub fn not(&self, sess: &Session) -> Result<MpcTensor> {
        let (x, precision) = self.bits()?;
        Ok(MpcTensor::binary(x.not(sess), precision))
    }

    pub fn xor_<'a>(&mut self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<()> {
        let result = self.xor(sess, other)?;
        self.assign_result(result)
    }

    pub fn and_<'a>(&mut self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<()> {
        let result = self.and(sess, other)?;
        self.assign_result(result)
    }

    pub fn or_<'a>(&mut self, sess: &Session, other: impl Into<Operand<'a>>) -> Result<()> {
        let result = self.or(sess, other)?;
        self.assign_result(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_close, run_parties, run_parties_with, uniform, TestSetup};
    use rstest::rstest;

    fn encrypt(sess: &Session, x: &ArrayD<f64>) -> Result<MpcTensor> {
        let value = if sess.rank() == 0 { Some(x) } else { None };
        MpcTensor::from_plain(sess, value, 0)
    }

    fn encrypt_binary(sess: &Session, x: &ArrayD<i64>) -> Result<MpcTensor> {
        let value = if sess.rank() == 0 { Some(x) } else { None };
        MpcTensor::from_plain_binary(sess, value, 0)
    }

    #[rstest]
    #[case(vec![], vec![2, 2])]
    #[case(vec![2, 3], vec![3])]
    #[case(vec![2, 1], vec![1, 3])]
    #[case(vec![4], vec![4])]
    #[case(vec![2, 1, 3], vec![4, 1])]
    fn test_broadcasting_parity(#[case] lhs: Vec<usize>, #[case] rhs: Vec<usize>) {
        let x = uniform(&lhs, -5.0, 5.0, 51);
        let y = uniform(&rhs, 1.0, 5.0, 52);
        let outputs = run_parties(2, |sess| {
            let a = encrypt(sess, &x)?;
            let b = encrypt(sess, &y)?;
            let mut results = Vec::new();
            for operand in [Operand::Private(&b), Operand::Public(&y)] {
                results.push(a.add(sess, operand)?.reveal(sess)?);
                results.push(a.sub(sess, operand)?.reveal(sess)?);
                results.push(a.mul(sess, operand)?.reveal(sess)?);
                results.push(a.div(sess, operand)?.reveal(sess)?);
            }
            Ok(results)
        });
        let expected = [&x + &y, &x - &y, &x * &y, &x / &y];
        for results in outputs {
            for (got, want) in results.iter().zip(expected.iter().cycle()) {
                assert_close(got, want);
            }
        }
    }

    #[test]
    fn test_scalar_operands() {
        let x = uniform(&[2, 3], -5.0, 5.0, 53);
        let outputs = run_parties(2, |sess| {
            let a = encrypt(sess, &x)?;
            Ok(vec![
                a.add(sess, 2.5)?.reveal(sess)?,
                a.sub(sess, 3.0)?.reveal(sess)?,
                a.rsub(sess, 1.0)?.reveal(sess)?,
                a.mul(sess, -2.0)?.reveal(sess)?,
                a.mul(sess, 0.25)?.reveal(sess)?,
                a.div(sess, 4.0)?.reveal(sess)?,
                a.square(sess)?.reveal(sess)?,
                a.neg()?.reveal(sess)?,
            ])
        });
        let expected = vec![
            x.mapv(|v| v + 2.5),
            x.mapv(|v| v - 3.0),
            x.mapv(|v| 1.0 - v),
            x.mapv(|v| v * -2.0),
            x.mapv(|v| v * 0.25),
            x.mapv(|v| v / 4.0),
            x.mapv(|v| v * v),
            x.mapv(|v| -v),
        ];
        for results in outputs {
            for (got, want) in results.iter().zip(expected.iter()) {
                assert_close(got, want);
            }
        }
    }

    #[test]
    fn test_in_place_keeps_storage() {
        let x = uniform(&[2, 3], -5.0, 5.0, 54);
        let y = uniform(&[3], 1.0, 3.0, 55);
        let outputs = run_parties(2, |sess| {
            let mut a = encrypt(sess, &x)?;
            let b = encrypt(sess, &y)?;
            let before = a.storage_ptr();
            let operand_before = b.storage_ptr();
            let fresh = a.add(sess, &b)?;
            let untouched = before == a.storage_ptr()
                && operand_before == b.storage_ptr()
                && fresh.storage_ptr() != before;
            a.add_(sess, &b)?;
            a.mul_(sess, 2.0)?;
            a.sub_(sess, &y)?;
            a.div_(sess, &b)?;
            let same_storage = before == a.storage_ptr();
            // writes to a copy leave the source alone
            let mut copy = a.clone();
            copy.add_(sess, 100.0)?;
            Ok((untouched && same_storage, a.reveal(sess)?, copy.reveal(sess)?))
        });
        let expected = ((&x + &y) * 2.0 - &y) / &y;
        for (same_storage, updated, copy) in outputs {
            assert!(same_storage);
            assert_close(&updated, &expected);
            assert_close(&copy, &expected.mapv(|v| v + 100.0));
        }
    }

    #[test]
    fn test_in_place_rejects_growing_shape() {
        let outputs = run_parties_with(2, TestSetup::with_config(Default::default(), 2), |sess| {
            let mut a = encrypt(sess, &uniform(&[3], -1.0, 1.0, 56))?;
            let b = encrypt(sess, &uniform(&[2, 3], -1.0, 1.0, 57))?;
            a.add_(sess, &b)
        });
        assert!(outputs
            .iter()
            .all(|res| matches!(res, Err(Error::ShapeMismatch { .. }))));
    }

    #[test]
    fn test_get_set() {
        let x = uniform(&[3, 4], -5.0, 5.0, 58);
        let outputs = run_parties(3, |sess| {
            let mut a = encrypt(sess, &x)?;
            let row = a.get(&[IndexElem::Index(1)])?;
            let block = a.get(&[IndexElem::range(0, Some(2)), IndexElem::range(1, None)])?;
            let replacement = encrypt(sess, &array![9.0, 8.0, 7.0, 6.0].into_dyn())?;
            a.set(sess, &[IndexElem::Index(0)], &replacement)?;
            a.set(sess, &[IndexElem::full(), IndexElem::Index(3)], 0.5)?;
            Ok((row.reveal(sess)?, block.reveal(sess)?, a.reveal(sess)?))
        });
        let mut expected = x.clone();
        expected
            .index_axis_mut(Axis(0), 0)
            .assign(&array![9.0, 8.0, 7.0, 6.0]);
        expected.index_axis_mut(Axis(1), 3).fill(0.5);
        for (row, block, updated) in outputs {
            assert_close(&row, &x.index_axis(Axis(0), 1).to_owned());
            assert_close(&block, &x.slice(s![0..2, 1..]).to_owned().into_dyn());
            assert_close(&updated, &expected);
        }
    }

    #[test]
    fn test_shape_ops() {
        let x = uniform(&[2, 3], -5.0, 5.0, 59);
        let outputs = run_parties(2, |sess| {
            let a = encrypt(sess, &x)?;
            Ok(vec![
                a.t()?.reveal(sess)?,
                a.flatten()?.reveal(sess)?,
                a.unsqueeze(0)?.squeeze(0)?.reveal(sess)?,
                a.view(&[3, 2])?.reveal(sess)?,
                a.take(&[5, 0])?.reveal(sess)?,
                a.flip(&[1])?.reveal(sess)?,
                a.roll(1, 1)?.reveal(sess)?,
                a.index_select(1, &[2, 0])?.reveal(sess)?,
                a.expand(&[2, 2, 3])?.reveal(sess)?,
                a.repeat(&[1, 2])?.reveal(sess)?,
                a.cumsum(1)?.reveal(sess)?,
                a.get(&[IndexElem::full(), IndexElem::range(0, Some(2))])?.trace()?.reveal(sess)?,
            ])
        });
        let flat: Vec<f64> = x.iter().copied().collect();
        let expected = vec![
            x.t().to_owned(),
            ArrayD::from_shape_vec(IxDyn(&[6]), flat.clone()).unwrap(),
            x.clone(),
            ArrayD::from_shape_vec(IxDyn(&[3, 2]), flat.clone()).unwrap(),
            array![flat[5], flat[0]].into_dyn(),
            x.slice(s![.., ..;-1]).to_owned().into_dyn(),
            ndarray::concatenate![Axis(1), x.slice(s![.., 2..]), x.slice(s![.., ..2])].into_dyn(),
            x.select(Axis(1), &[2, 0]),
            x.broadcast(IxDyn(&[2, 2, 3])).unwrap().to_owned(),
            ndarray::concatenate![Axis(1), x.view(), x.view()].into_dyn(),
            {
                let mut c = x.clone();
                c.accumulate_axis_inplace(Axis(1), |prev, cur| *cur += *prev);
                c
            },
            arr0(x[[0, 0]] + x[[1, 1]]).into_dyn(),
        ];
        for results in outputs {
            for (got, want) in results.iter().zip(expected.iter()) {
                assert_close(got, want);
            }
        }
    }

    #[test]
    fn test_reductions_and_products() {
        let x = uniform(&[2, 3], -2.0, 2.0, 60);
        let w = uniform(&[3, 2], -2.0, 2.0, 61);
        let u = uniform(&[3], -2.0, 2.0, 62);
        let v = uniform(&[3], -2.0, 2.0, 63);
        let outputs = run_parties(2, |sess| {
            let a = encrypt(sess, &x)?;
            let b = encrypt(sess, &w)?;
            let p = encrypt(sess, &u)?;
            let q = encrypt(sess, &v)?;
            Ok(vec![
                a.sum(sess, Some(1), false)?.reveal(sess)?,
                a.mean(sess, Some(0), true)?.reveal(sess)?,
                a.sum(sess, None, false)?.reveal(sess)?,
                a.matmul(sess, &b)?.reveal(sess)?,
                a.matmul(sess, &w)?.reveal(sess)?,
                p.dot(sess, &q)?.reveal(sess)?,
                p.dot(sess, &v)?.reveal(sess)?,
                p.ger(sess, &q)?.reveal(sess)?,
            ])
        });
        let u2 = u.clone().into_dimensionality::<Ix1>().unwrap();
        let v2 = v.clone().into_dimensionality::<Ix1>().unwrap();
        let x2 = x.clone().into_dimensionality::<Ix2>().unwrap();
        let w2 = w.clone().into_dimensionality::<Ix2>().unwrap();
        let outer = u2
            .clone()
            .insert_axis(Axis(1))
            .dot(&v2.clone().insert_axis(Axis(0)));
        let expected = vec![
            x.sum_axis(Axis(1)),
            x.mean_axis(Axis(0)).unwrap().insert_axis(Axis(0)),
            arr0(x.sum()).into_dyn(),
            x2.dot(&w2).into_dyn(),
            x2.dot(&w2).into_dyn(),
            arr0(u2.dot(&v2)).into_dyn(),
            arr0(u2.dot(&v2)).into_dyn(),
            outer.into_dyn(),
        ];
        for results in outputs {
            for (got, want) in results.iter().zip(expected.iter()) {
                assert_close(got, want);
            }
        }
    }

    #[test]
    fn test_pad_conv_and_pooling() {
        let x = uniform(&[1, 1, 4, 4], -2.0, 2.0, 64);
        let k = uniform(&[2, 1, 3, 3], -1.0, 1.0, 65);
        let outputs = run_parties(2, |sess| {
            let a = encrypt(sess, &x)?;
            let kernel = encrypt(sess, &k)?;
            let fill = encrypt(sess, &arr0(-7.5).into_dyn())?;
            Ok((
                a.conv2d(sess, &kernel, (1, 1), (1, 1))?.reveal(sess)?,
                a.conv2d(sess, &k, (1, 1), (1, 1))?.reveal(sess)?,
                a.max_pool2d(sess, (2, 2), (2, 2), (0, 0))?.reveal(sess)?,
                a.avg_pool2d(sess, (2, 2), (2, 2), (0, 0))?.reveal(sess)?,
                a.pad(sess, &[(0, 0), (0, 0), (1, 0), (0, 1)], 3.0)?.reveal(sess)?,
                a.pad(sess, &[(0, 0), (0, 0), (0, 1), (0, 0)], &fill)?.reveal(sess)?,
            ))
        });
        let x4 = x.clone().into_dimensionality::<Ix4>().unwrap();
        let k4 = k.clone().into_dimensionality::<Ix4>().unwrap();
        let mut conv = Array4::<f64>::zeros((1, 2, 4, 4));
        for o in 0..2 {
            for i in 0..4 {
                for j in 0..4 {
                    let mut acc = 0.0;
                    for di in 0..3 {
                        for dj in 0..3 {
                            let h = i as isize + di as isize - 1;
                            let w = j as isize + dj as isize - 1;
                            if (0..4).contains(&h) && (0..4).contains(&w) {
                                acc += x4[[0, 0, h as usize, w as usize]] * k4[[o, 0, di, dj]];
                            }
                        }
                    }
                    conv[[0, o, i, j]] = acc;
                }
            }
        }
        let mut max_pool = Array4::<f64>::zeros((1, 1, 2, 2));
        let mut avg_pool = Array4::<f64>::zeros((1, 1, 2, 2));
        for i in 0..2 {
            for j in 0..2 {
                let window = x4.slice(s![0, 0, 2 * i..2 * i + 2, 2 * j..2 * j + 2]);
                max_pool[[0, 0, i, j]] = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                avg_pool[[0, 0, i, j]] = window.sum() / 4.0;
            }
        }
        let mut padded = Array4::<f64>::from_elem((1, 1, 5, 5), 3.0);
        padded.slice_mut(s![.., .., 1.., ..4]).assign(&x4);
        let mut padded_private = Array4::<f64>::from_elem((1, 1, 5, 4), -7.5);
        padded_private.slice_mut(s![.., .., ..4, ..]).assign(&x4);
        for (conv_private, conv_public, max, avg, pad, pad_private) in outputs {
            assert_close(&conv_private, &conv.clone().into_dyn());
            assert_close(&conv_public, &conv.clone().into_dyn());
            assert_close(&max, &max_pool.clone().into_dyn());
            assert_close(&avg, &avg_pool.clone().into_dyn());
            assert_close(&pad, &padded.clone().into_dyn());
            assert_close(&pad_private, &padded_private.clone().into_dyn());
        }
    }

    #[test]
    fn test_comparisons_and_reductions() {
        let x = array![[1.0, 1.0, 2.0, 1.0], [4.0, 1.0, 3.0, 4.0]].into_dyn();
        let outputs = run_parties(2, |sess| {
            let a = encrypt(sess, &x)?;
            Ok(vec![
                a.lt(sess, 2.0)?.reveal(sess)?,
                a.ge(sess, &x.mapv(|v| v - 1.0))?.reveal(sess)?,
                a.eq(sess, &a)?.reveal(sess)?,
                a.argmax(sess, Some(1))?.reveal(sess)?,
                a.argmin(sess, None)?.reveal(sess)?,
                a.max(sess, Some(1), true)?.reveal(sess)?,
                a.min(sess, Some(0), false)?.reveal(sess)?,
                a.sub(sess, 2.0)?.relu(sess)?.reveal(sess)?,
                a.sub(sess, 2.0)?.sign(sess)?.reveal(sess)?,
                a.sub(sess, 2.0)?.abs(sess)?.reveal(sess)?,
            ])
        });
        let expected = vec![
            array![[1.0, 1.0, 0.0, 1.0], [0.0, 1.0, 0.0, 0.0]].into_dyn(),
            ArrayD::ones(IxDyn(&[2, 4])),
            ArrayD::ones(IxDyn(&[2, 4])),
            array![[0.0, 0.0, 1.0, 0.0], [1.0, 0.0, 0.0, 0.0]].into_dyn(),
            array![[1.0, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]].into_dyn(),
            array![[2.0], [4.0]].into_dyn(),
            array![1.0, 1.0, 2.0, 1.0].into_dyn(),
            x.mapv(|v| (v - 2.0).max(0.0)),
            x.mapv(|v| if v < 2.0 { -1.0 } else { 1.0 }),
            x.mapv(|v| (v - 2.0).abs()),
        ];
        for results in outputs {
            for (got, want) in results.iter().zip(expected.iter()) {
                assert_eq!(got, want);
            }
        }
    }

    #[test]
    fn test_approximations_dispatch() {
        let x = uniform(&[2, 3], 0.5, 3.0, 66);
        let outputs = run_parties(2, |sess| {
            let a = encrypt(sess, &x)?;
            Ok(vec![
                a.exp(sess)?.reveal(sess)?,
                a.log(sess)?.reveal(sess)?,
                a.sqrt(sess)?.reveal(sess)?,
                a.reciprocal(sess)?.reveal(sess)?,
                a.pow(sess, 2.0)?.reveal(sess)?,
                a.sigmoid(sess)?.reveal(sess)?,
                a.tanh(sess)?.reveal(sess)?,
                a.cos(sess)?.reveal(sess)?,
                a.sin(sess)?.reveal(sess)?,
                a.softmax(sess, 1)?.reveal(sess)?,
            ])
        });
        let mut softmax = x.mapv(f64::exp);
        for mut row in softmax.rows_mut() {
            let total = row.sum();
            row.mapv_inplace(|v| v / total);
        }
        let expected = vec![
            x.mapv(f64::exp),
            x.mapv(f64::ln),
            x.mapv(f64::sqrt),
            x.mapv(f64::recip),
            x.mapv(|v| v * v),
            x.mapv(|v| 1.0 / (1.0 + (-v).exp())),
            x.mapv(f64::tanh),
            x.mapv(f64::cos),
            x.mapv(f64::sin),
            softmax,
        ];
        for results in outputs {
            for (got, want) in results.iter().zip(expected.iter()) {
                assert_close(got, want);
            }
        }
    }

    #[test]
    fn test_binary_facade() {
        let x = array![[5i64, -3], [12, 7]].into_dyn();
        let y = array![[9i64, 4], [-1, 0]].into_dyn();
        let outputs = run_parties(3, |sess| {
            let a = encrypt_binary(sess, &x)?;
            let b = encrypt_binary(sess, &y)?;
            let mask = array![6.0, 3.0].into_dyn();
            let mut c = encrypt_binary(sess, &x)?;
            let before = c.storage_ptr();
            c.xor_(sess, &b)?;
            c.and_(sess, &a)?;
            c.or_(sess, &mask)?;
            let mut d = a.transpose(0, 1)?;
            d.set(sess, &[IndexElem::Index(0), IndexElem::Index(0)], 100.0)?;
            Ok((
                vec![
                    a.xor(sess, &b)?.reveal(sess)?,
                    a.and(sess, &b)?.reveal(sess)?,
                    a.or(sess, &b)?.reveal(sess)?,
                    a.not(sess)?.reveal(sess)?,
                    a.add(sess, &b)?.reveal(sess)?,
                    a.add(sess, 1.0)?.reveal(sess)?,
                    a.sum(sess, Some(0), false)?.reveal(sess)?,
                    a.sum(sess, None, true)?.reveal(sess)?,
                    a.get(&[IndexElem::Index(1)])?.reveal(sess)?,
                    c.reveal(sess)?,
                    d.reveal(sess)?,
                ],
                before == c.storage_ptr(),
            ))
        });
        let f = |a: &ArrayD<i64>| a.mapv(|v| v as f64);
        let expected = vec![
            f(&(&x ^ &y)),
            f(&(&x & &y)),
            f(&(&x | &y)),
            f(&x.mapv(|v| !v)),
            f(&(&x + &y)),
            f(&x.mapv(|v| v + 1)),
            f(&x.sum_axis(Axis(0))),
            array![[21.0]].into_dyn(),
            array![12.0, 7.0].into_dyn(),
            f(&(&(&(&x ^ &y) & &x) | &array![6i64, 3].into_dyn())),
            array![[100.0, 12.0], [-3.0, 7.0]].into_dyn(),
        ];
        for (results, same_storage) in outputs {
            assert!(same_storage);
            for (got, want) in results.iter().zip(expected.iter()) {
                assert_eq!(got, want);
            }
        }
    }

    #[test]
    fn test_conversions() {
        let x = uniform(&[5], -50.0, 50.0, 67);
        let outputs = run_parties(2, |sess| {
            let a = encrypt(sess, &x)?;
            let b = a.to_binary(sess)?;
            Ok((
                b.is_binary(),
                b.reveal(sess)?,
                b.to_arithmetic(sess)?.add(sess, 1.0)?.reveal(sess)?,
            ))
        });
        for (is_binary, through_binary, back) in outputs {
            assert!(is_binary);
            assert_close(&through_binary, &x);
            assert_close(&back, &x.mapv(|v| v + 1.0));
        }
    }

    #[test]
    fn test_backing_mismatch_is_an_error() {
        let outputs = run_parties_with(2, TestSetup::with_config(Default::default(), 2), |sess| {
            let bits = encrypt_binary(sess, &array![1i64, 2].into_dyn())?;
            let real = encrypt(sess, &array![1.0, 2.0].into_dyn())?;
            Ok((
                bits.mul(sess, 2.0).is_err(),
                real.xor(sess, &bits).is_err(),
                real.matmul(sess, 2.0).is_err(),
            ))
        });
        for res in outputs {
            assert!(matches!(res, Ok((true, true, true))));
        }
    }

    #[test]
    fn test_reveal_to_and_random() {
        let x = uniform(&[3], -1.0, 1.0, 68);
        let outputs = run_parties(3, |sess| {
            let a = encrypt(sess, &x)?;
            let revealed = a.reveal_to(sess, 2)?;
            let probs = MpcTensor::rand(sess, &[1000])?;
            let coins = probs.bernoulli(sess)?.reveal(sess)?;
            Ok((sess.rank(), revealed, coins))
        });
        for (rank, revealed, coins) in outputs {
            match revealed {
                Some(y) => {
                    assert_eq!(rank, 2);
                    assert_close(&y, &x);
                }
                None => assert_ne!(rank, 2),
            }
            assert!(coins.iter().all(|c| *c == 0.0 || *c == 1.0));
        }
    }
}
