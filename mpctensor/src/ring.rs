//! Plaintext tensors over the ring Z_{2^64}.
//!
//! Every kernel in here is local: a party applies it to its own fragment and
//! nothing crosses the network. Protocols in the other modules are built by
//! interleaving these kernels with collective exchanges.

use crate::error::{Error, Result};
use itertools::iproduct;
use ndarray::prelude::*;
use ndarray::{IxDyn, Slice, Zip};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::num::Wrapping;

/// Bit width of the ring all shares live in.
pub const RING_WIDTH: usize = 64;

/// Broadcast two shapes following the NumPy rules.
pub fn broadcast_shapes(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    let ndim = lhs.len().max(rhs.len());
    let lhs_offset = ndim - lhs.len();
    let rhs_offset = ndim - rhs.len();
    (0..ndim)
        .map(|i| {
            let l = if i < lhs_offset { 1 } else { lhs[i - lhs_offset] };
            let r = if i < rhs_offset { 1 } else { rhs[i - rhs_offset] };
            match (l, r) {
                (l, r) if l == r => Ok(l),
                (1, r) => Ok(r),
                (l, 1) => Ok(l),
                _ => Err(Error::shape_mismatch(lhs, rhs)),
            }
        })
        .collect()
}

/// Result shape of a batched matrix product of `lhs` and `rhs`.
pub fn matmul_shape(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>> {
    if lhs.len() < 2 || rhs.len() < 2 || lhs[lhs.len() - 1] != rhs[rhs.len() - 2] {
        return Err(Error::shape_mismatch(lhs, rhs));
    }
    let mut shape = broadcast_shapes(&lhs[..lhs.len() - 2], &rhs[..rhs.len() - 2])?;
    shape.push(lhs[lhs.len() - 2]);
    shape.push(rhs[rhs.len() - 1]);
    Ok(shape)
}

/// A range along one axis.
///
/// Bounds outside the axis are clamped to it, so `range(0, Some(10))` on an
/// axis of length 3 selects all three entries and an empty range is not an
/// error. Steps must be positive; reversing goes through `flip`.
#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
pub struct SliceElem {
    /// Start index; negative are counted from the back of the axis.
    pub start: isize,
    /// End index; negative are counted from the back of the axis; when not present
    /// the default is the full length of the axis.
    pub end: Option<isize>,
    /// Step size in elements; the default is 1, for every element.
    pub step: Option<isize>,
}

/// One entry of an index expression; missing trailing entries select the
/// full axis.
#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
pub enum IndexElem {
    /// Select a single position and drop the axis.
    Index(isize),
    /// Keep the axis, restricted to a range.
    Slice(SliceElem),
}

impl IndexElem {
    pub fn full() -> IndexElem {
        IndexElem::Slice(SliceElem {
            start: 0,
            end: None,
            step: None,
        })
    }

    pub fn range(start: isize, end: Option<isize>) -> IndexElem {
        IndexElem::Slice(SliceElem {
            start,
            end,
            step: None,
        })
    }
}

fn resolve_bound(index: isize, len: usize) -> Result<usize> {
    let resolved = if index < 0 {
        index + len as isize
    } else {
        index
    };
    if resolved < 0 || resolved as usize > len {
        return Err(Error::InvalidArgument(format!(
            "index {} out of bounds for axis of length {}",
            index, len
        )));
    }
    Ok(resolved as usize)
}

/// Slice bound clamped into `0..=len`.
fn clamp_bound(index: isize, len: usize) -> usize {
    let len = len as isize;
    let resolved = if index < 0 { index + len } else { index };
    resolved.clamp(0, len) as usize
}

type DynSliceInfo = ndarray::SliceInfo<Vec<ndarray::SliceInfoElem>, IxDyn, IxDyn>;

fn slice_info(shape: &[usize], index: &[IndexElem]) -> Result<DynSliceInfo> {
    if index.len() > shape.len() {
        return Err(Error::InvalidArgument(format!(
            "{} indices given for a tensor of rank {}",
            index.len(),
            shape.len()
        )));
    }
    let mut elems = Vec::with_capacity(shape.len());
    for (axis, &len) in shape.iter().enumerate() {
        let elem = match index.get(axis) {
            None => ndarray::SliceInfoElem::from(Slice::from(..)),
            Some(IndexElem::Index(i)) => {
                let i = resolve_bound(*i, len)?;
                if i == len {
                    return Err(Error::InvalidArgument(format!(
                        "index {} out of bounds for axis {} of length {}",
                        i, axis, len
                    )));
                }
                ndarray::SliceInfoElem::Index(i as isize)
            }
            Some(IndexElem::Slice(s)) => {
                let step = s.step.unwrap_or(1);
                if step <= 0 {
                    return Err(Error::InvalidArgument(format!(
                        "slice step must be positive, got {}",
                        step
                    )));
                }
                let start = clamp_bound(s.start, len);
                let end = s.end.map_or(len, |end| clamp_bound(end, len));
                ndarray::SliceInfoElem::Slice {
                    start: start as isize,
                    end: Some(end.max(start) as isize),
                    step,
                }
            }
        };
        elems.push(elem);
    }
    DynSliceInfo::try_from(elems).map_err(|e| Error::InvalidArgument(e.to_string()))
}

fn check_axis(axis: usize, ndim: usize) -> Result<()> {
    if axis >= ndim {
        return Err(Error::InvalidArgument(format!(
            "axis {} out of range for tensor of rank {}",
            axis, ndim
        )));
    }
    Ok(())
}

/// Tensor of ring elements; the backing storage is reference counted and
/// copied on write.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RingTensor(pub ArcArray<Wrapping<u64>, IxDyn>);

impl From<ArrayD<u64>> for RingTensor {
    fn from(x: ArrayD<u64>) -> RingTensor {
        RingTensor(x.mapv(Wrapping).into_shared())
    }
}

impl From<ArrayD<i64>> for RingTensor {
    fn from(x: ArrayD<i64>) -> RingTensor {
        RingTensor(x.mapv(|el| Wrapping(el as u64)).into_shared())
    }
}

impl RingTensor {
    pub fn zeros(shape: &[usize]) -> RingTensor {
        RingTensor::fill(shape, Wrapping(0))
    }

    pub fn fill(shape: &[usize], value: Wrapping<u64>) -> RingTensor {
        RingTensor(ArcArray::from_elem(IxDyn(shape), value))
    }

    pub fn from_vec(shape: &[usize], values: Vec<u64>) -> Result<RingTensor> {
        let arr = Array::from_shape_vec(IxDyn(shape), values.into_iter().map(Wrapping).collect())
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        Ok(RingTensor(arr.into_shared()))
    }

    pub fn sample_uniform<R: RngCore>(shape: &[usize], rng: &mut R) -> RingTensor {
        RingTensor(
            ArrayD::from_shape_simple_fn(IxDyn(shape), || Wrapping(rng.next_u64())).into_shared(),
        )
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn ndim(&self) -> usize {
        self.0.ndim()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Address of the backing storage; used to observe in-place updates.
    pub fn as_ptr(&self) -> *const Wrapping<u64> {
        self.0.as_ptr()
    }

    pub fn as_signed(&self) -> ArrayD<i64> {
        self.0.mapv(|el| el.0 as i64)
    }

    fn zip_with<F>(&self, other: &RingTensor, f: F) -> Result<RingTensor>
    where
        F: Fn(Wrapping<u64>, Wrapping<u64>) -> Wrapping<u64>,
    {
        let shape = broadcast_shapes(self.shape(), other.shape())?;
        let dim = IxDyn(&shape);
        let lhs = self
            .0
            .broadcast(dim.clone())
            .ok_or_else(|| Error::shape_mismatch(self.shape(), &shape))?;
        let rhs = other
            .0
            .broadcast(dim)
            .ok_or_else(|| Error::shape_mismatch(other.shape(), &shape))?;
        let res = Zip::from(&lhs).and(&rhs).map_collect(|x, y| f(*x, *y));
        Ok(RingTensor(res.into_shared()))
    }

    pub fn add(&self, other: &RingTensor) -> Result<RingTensor> {
        self.zip_with(other, |x, y| x + y)
    }

    pub fn sub(&self, other: &RingTensor) -> Result<RingTensor> {
        self.zip_with(other, |x, y| x - y)
    }

    pub fn mul(&self, other: &RingTensor) -> Result<RingTensor> {
        self.zip_with(other, |x, y| x * y)
    }

    pub fn xor(&self, other: &RingTensor) -> Result<RingTensor> {
        self.zip_with(other, |x, y| x ^ y)
    }

    pub fn and(&self, other: &RingTensor) -> Result<RingTensor> {
        self.zip_with(other, |x, y| x & y)
    }

    pub fn neg(&self) -> RingTensor {
        RingTensor(self.0.mapv(|x| -x).into_shared())
    }

    pub fn not(&self) -> RingTensor {
        RingTensor(self.0.mapv(|x| !x).into_shared())
    }

    pub fn shl(&self, amount: usize) -> RingTensor {
        RingTensor(self.0.mapv(|x| x << amount).into_shared())
    }

    /// Logical right shift.
    pub fn shr(&self, amount: usize) -> RingTensor {
        RingTensor(self.0.mapv(|x| x >> amount).into_shared())
    }

    pub fn add_scalar(&self, value: Wrapping<u64>) -> RingTensor {
        RingTensor(self.0.mapv(|x| x + value).into_shared())
    }

    pub fn mul_scalar(&self, value: Wrapping<u64>) -> RingTensor {
        RingTensor(self.0.mapv(|x| x * value).into_shared())
    }

    pub fn and_scalar(&self, value: Wrapping<u64>) -> RingTensor {
        RingTensor(self.0.mapv(|x| x & value).into_shared())
    }

    pub fn xor_scalar(&self, value: Wrapping<u64>) -> RingTensor {
        RingTensor(self.0.mapv(|x| x ^ value).into_shared())
    }

    pub fn sum(&self, axis: Option<usize>, keepdim: bool) -> Result<RingTensor> {
        match axis {
            Some(axis) => {
                check_axis(axis, self.ndim())?;
                let summed = self.0.sum_axis(Axis(axis));
                let summed = if keepdim {
                    summed.insert_axis(Axis(axis))
                } else {
                    summed
                };
                Ok(RingTensor(summed.into_shared()))
            }
            None => {
                let shape = if keepdim {
                    vec![1; self.ndim()]
                } else {
                    vec![]
                };
                Ok(RingTensor::fill(&shape, self.0.sum()))
            }
        }
    }

    /// Batched matrix product over the last two axes; leading axes broadcast.
    pub fn matmul(&self, other: &RingTensor) -> Result<RingTensor> {
        let (ls, rs) = (self.shape(), other.shape());
        let out_shape = matmul_shape(ls, rs)?;
        let batch = &out_shape[..out_shape.len() - 2];
        let (n, k) = (ls[ls.len() - 2], ls[ls.len() - 1]);
        let m = rs[rs.len() - 1];
        let batch_size: usize = batch.iter().product();

        let lhs = self
            .broadcast_to(&[batch, &[n, k]].concat())?
            .reshape(&[batch_size, n, k])?;
        let rhs = other
            .broadcast_to(&[batch, &[k, m]].concat())?
            .reshape(&[batch_size, k, m])?;
        let lhs = lhs
            .0
            .view()
            .into_dimensionality::<Ix3>()
            .map_err(|e| Error::Unexpected(Some(e.to_string())))?;
        let rhs = rhs
            .0
            .view()
            .into_dimensionality::<Ix3>()
            .map_err(|e| Error::Unexpected(Some(e.to_string())))?;

        let mut out = Array3::<Wrapping<u64>>::from_elem((batch_size, n, m), Wrapping(0));
        for b in 0..batch_size {
            let prod = lhs.index_axis(Axis(0), b).dot(&rhs.index_axis(Axis(0), b));
            out.index_axis_mut(Axis(0), b).assign(&prod);
        }
        RingTensor(out.into_dyn().into_shared()).reshape(&out_shape)
    }

    pub fn broadcast_to(&self, shape: &[usize]) -> Result<RingTensor> {
        if self.shape() == shape {
            return Ok(self.clone());
        }
        let view = self
            .0
            .broadcast(IxDyn(shape))
            .ok_or_else(|| Error::shape_mismatch(self.shape(), shape))?;
        Ok(RingTensor(view.to_owned().into_shared()))
    }

    /// Row-major reshape; the element count must be preserved.
    pub fn reshape(&self, shape: &[usize]) -> Result<RingTensor> {
        if shape.iter().product::<usize>() != self.len() {
            return Err(Error::shape_mismatch(self.shape(), shape));
        }
        let values: Vec<_> = self.0.iter().copied().collect();
        let arr = Array::from_shape_vec(IxDyn(shape), values)
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        Ok(RingTensor(arr.into_shared()))
    }

    pub fn permute(&self, axes: &[usize]) -> Result<RingTensor> {
        let mut seen = vec![false; self.ndim()];
        if axes.len() != self.ndim() {
            return Err(Error::InvalidArgument(format!(
                "permutation {:?} does not match rank {}",
                axes,
                self.ndim()
            )));
        }
        for &a in axes {
            check_axis(a, self.ndim())?;
            if seen[a] {
                return Err(Error::InvalidArgument(format!(
                    "axis {} repeated in permutation",
                    a
                )));
            }
            seen[a] = true;
        }
        Ok(RingTensor(self.0.clone().permuted_axes(IxDyn(axes))))
    }

    pub fn transpose(&self, a: usize, b: usize) -> Result<RingTensor> {
        check_axis(a, self.ndim())?;
        check_axis(b, self.ndim())?;
        let mut x = self.0.clone();
        x.swap_axes(a, b);
        Ok(RingTensor(x))
    }

    pub fn move_axis(&self, src: usize, dst: usize) -> Result<RingTensor> {
        check_axis(src, self.ndim())?;
        check_axis(dst, self.ndim())?;
        let mut axes: Vec<usize> = (0..self.ndim()).filter(|&a| a != src).collect();
        axes.insert(dst, src);
        self.permute(&axes)
    }

    pub fn expand_dims(&self, axis: usize) -> Result<RingTensor> {
        check_axis(axis, self.ndim() + 1)?;
        Ok(RingTensor(self.0.clone().insert_axis(Axis(axis))))
    }

    pub fn squeeze(&self, axis: usize) -> Result<RingTensor> {
        check_axis(axis, self.ndim())?;
        if self.shape()[axis] != 1 {
            return Err(Error::InvalidArgument(format!(
                "cannot squeeze axis {} of length {}",
                axis,
                self.shape()[axis]
            )));
        }
        Ok(RingTensor(self.0.clone().index_axis_move(Axis(axis), 0)))
    }

    pub fn slice(&self, index: &[IndexElem]) -> Result<RingTensor> {
        let info = slice_info(self.shape(), index)?;
        Ok(RingTensor(self.0.slice(&info).to_owned().into_shared()))
    }

    /// Overwrite the selected region, broadcasting `value` into it.
    pub fn assign_slice(&mut self, index: &[IndexElem], value: &RingTensor) -> Result<()> {
        let info = slice_info(self.shape(), index)?;
        let mut view = self.0.slice_mut(&info);
        if value.0.broadcast(view.raw_dim()).is_none() {
            return Err(Error::shape_mismatch(value.shape(), view.shape()));
        }
        view.assign(&value.0);
        Ok(())
    }

    /// Overwrite all elements in place, keeping the storage when it is not shared.
    pub fn assign(&mut self, value: &RingTensor) -> Result<()> {
        if value.0.broadcast(self.0.raw_dim()).is_none() {
            return Err(Error::shape_mismatch(value.shape(), self.shape()));
        }
        self.0.assign(&value.0);
        Ok(())
    }

    pub fn index_select(&self, axis: usize, indices: &[usize]) -> Result<RingTensor> {
        check_axis(axis, self.ndim())?;
        let len = self.shape()[axis];
        if let Some(bad) = indices.iter().find(|&&i| i >= len) {
            return Err(Error::InvalidArgument(format!(
                "index {} out of bounds for axis of length {}",
                bad, len
            )));
        }
        Ok(RingTensor(self.0.select(Axis(axis), indices).into_shared()))
    }

    pub fn concatenate(axis: usize, parts: &[&RingTensor]) -> Result<RingTensor> {
        let views: Vec<_> = parts.iter().map(|p| p.0.view()).collect();
        let res = ndarray::concatenate(Axis(axis), &views)
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        Ok(RingTensor(res.into_shared()))
    }

    pub fn stack(axis: usize, parts: &[&RingTensor]) -> Result<RingTensor> {
        let views: Vec<_> = parts.iter().map(|p| p.0.view()).collect();
        let res =
            ndarray::stack(Axis(axis), &views).map_err(|e| Error::InvalidArgument(e.to_string()))?;
        Ok(RingTensor(res.into_shared()))
    }

    /// Constant padding; `widths[i]` is the (before, after) amount for axis `i`.
    pub fn pad(&self, widths: &[(usize, usize)], value: Wrapping<u64>) -> Result<RingTensor> {
        if widths.len() != self.ndim() {
            return Err(Error::InvalidArgument(format!(
                "{} pad widths given for a tensor of rank {}",
                widths.len(),
                self.ndim()
            )));
        }
        let padded_shape: Vec<usize> = self
            .shape()
            .iter()
            .zip(widths)
            .map(|(len, (before, after))| len + before + after)
            .collect();
        let interior: Vec<_> = self
            .shape()
            .iter()
            .zip(widths)
            .map(|(len, (before, _))| {
                IndexElem::range(*before as isize, Some((before + len) as isize))
            })
            .collect();
        let mut out = RingTensor::fill(&padded_shape, value);
        out.assign_slice(&interior, self)?;
        Ok(out)
    }

    pub fn flip(&self, axes: &[usize]) -> Result<RingTensor> {
        let mut x = self.0.clone();
        for &axis in axes {
            check_axis(axis, self.ndim())?;
            x.invert_axis(Axis(axis));
        }
        Ok(RingTensor(x))
    }

    pub fn roll(&self, shift: isize, axis: usize) -> Result<RingTensor> {
        check_axis(axis, self.ndim())?;
        let len = self.shape()[axis];
        if len == 0 {
            return Ok(self.clone());
        }
        let split = len - shift.rem_euclid(len as isize) as usize;
        if split == len {
            return Ok(self.clone());
        }
        let tail = self.0.slice_axis(Axis(axis), Slice::from(split..));
        let head = self.0.slice_axis(Axis(axis), Slice::from(..split));
        let res = ndarray::concatenate(Axis(axis), &[tail, head])
            .map_err(|e| Error::Unexpected(Some(e.to_string())))?;
        Ok(RingTensor(res.into_shared()))
    }

    pub fn cumsum(&self, axis: usize) -> Result<RingTensor> {
        check_axis(axis, self.ndim())?;
        let mut x = self.0.to_owned();
        x.accumulate_axis_inplace(Axis(axis), |&prev, curr| *curr += prev);
        Ok(RingTensor(x.into_shared()))
    }

    pub fn trace(&self) -> Result<RingTensor> {
        if self.ndim() != 2 {
            return Err(Error::InvalidArgument(format!(
                "trace expects a matrix, got rank {}",
                self.ndim()
            )));
        }
        Ok(RingTensor::fill(&[], self.0.diag().sum()))
    }

    /// Tile along every axis; `reps` may have more entries than the rank.
    pub fn repeat(&self, reps: &[usize]) -> Result<RingTensor> {
        if reps.len() < self.ndim() {
            return Err(Error::InvalidArgument(format!(
                "{} repetitions given for a tensor of rank {}",
                reps.len(),
                self.ndim()
            )));
        }
        let mut shape = vec![1; reps.len() - self.ndim()];
        shape.extend_from_slice(self.shape());
        let mut x = self.reshape(&shape)?;
        for (axis, &r) in reps.iter().enumerate() {
            let copies: Vec<&RingTensor> = std::iter::repeat(&x).take(r).collect();
            x = if copies.is_empty() {
                let mut empty = x.shape().to_vec();
                empty[axis] = 0;
                RingTensor::zeros(&empty)
            } else {
                RingTensor::concatenate(axis, &copies)?
            };
        }
        Ok(x)
    }

    /// Sliding windows over the last two axes of an `[N, C, H, W]` tensor.
    ///
    /// Returns `[N, C, OH * OW, KH * KW]` and the output spatial size.
    pub fn unfold2d(
        &self,
        kernel: (usize, usize),
        stride: (usize, usize),
        padding: (usize, usize),
        pad_value: Wrapping<u64>,
    ) -> Result<(RingTensor, (usize, usize))> {
        if self.ndim() != 4 {
            return Err(Error::InvalidArgument(format!(
                "expected a [N, C, H, W] tensor, got shape {:?}",
                self.shape()
            )));
        }
        let (kh, kw) = kernel;
        let (sh, sw) = stride;
        let (ph, pw) = padding;
        if kh == 0 || kw == 0 || sh == 0 || sw == 0 {
            return Err(Error::InvalidArgument(
                "kernel and stride must be positive".into(),
            ));
        }
        let padded = self.pad(&[(0, 0), (0, 0), (ph, ph), (pw, pw)], pad_value)?;
        let (n, c, h, w) = {
            let s = padded.shape();
            (s[0], s[1], s[2], s[3])
        };
        if kh > h || kw > w {
            return Err(Error::InvalidArgument(format!(
                "kernel {:?} larger than padded input {:?}",
                kernel,
                (h, w)
            )));
        }
        let (oh, ow) = ((h - kh) / sh + 1, (w - kw) / sw + 1);
        let x = padded
            .0
            .view()
            .into_dimensionality::<Ix4>()
            .map_err(|e| Error::Unexpected(Some(e.to_string())))?;
        let mut out = Array4::from_elem((n, c, oh * ow, kh * kw), Wrapping(0));
        for (b, ch, i, j) in iproduct!(0..n, 0..c, 0..oh, 0..ow) {
            for (di, dj) in iproduct!(0..kh, 0..kw) {
                out[[b, ch, i * ow + j, di * kw + dj]] = x[[b, ch, i * sh + di, j * sw + dj]];
            }
        }
        Ok((RingTensor(out.into_dyn().into_shared()), (oh, ow)))
    }

    /// Split the lowest `bits` bits into planes stacked along a new leading axis.
    pub fn bit_planes(&self, bits: usize) -> Result<RingTensor> {
        let planes: Vec<RingTensor> = (0..bits)
            .map(|j| RingTensor(self.0.mapv(|x| (x >> j) & Wrapping(1)).into_shared()))
            .collect();
        let refs: Vec<&RingTensor> = planes.iter().collect();
        RingTensor::stack(0, &refs)
    }

    /// Flatten several tensors into one payload so they share a round.
    pub fn pack(parts: &[&RingTensor]) -> RingTensor {
        let values: Vec<_> = parts.iter().flat_map(|p| p.0.iter().copied()).collect();
        RingTensor(Array::from(values).into_dyn().into_shared())
    }

    pub fn unpack(&self, shapes: &[Vec<usize>]) -> Result<Vec<RingTensor>> {
        let total: usize = shapes.iter().map(|s| s.iter().product::<usize>()).sum();
        if total != self.len() {
            return Err(Error::Communication(format!(
                "packed payload holds {} elements, expected {}",
                self.len(),
                total
            )));
        }
        let mut values = self.0.iter().copied();
        shapes
            .iter()
            .map(|shape| {
                let size = shape.iter().product();
                let chunk: Vec<_> = values.by_ref().take(size).collect();
                Array::from_shape_vec(IxDyn(shape), chunk)
                    .map(|arr| RingTensor(arr.into_shared()))
                    .map_err(|e| Error::Unexpected(Some(e.to_string())))
            })
            .collect()
    }
}
