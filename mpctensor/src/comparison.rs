//! Comparisons and the reductions built on them.
//!
//! Everything here reduces to [`ltz`], the sign bit of an additively shared
//! value extracted through a binary sharing. Results are 0/1 tensors of
//! precision 0, so multiplying by them never truncates.

use crate::arithmetic::{ArithmeticSharedTensor, PublicTensor};
use crate::convert::{a2b, b2a};
use crate::error::{Error, Result};
use crate::ring::{IndexElem, RingTensor, SliceElem, RING_WIDTH};
use crate::session::Session;
use ndarray::prelude::*;
use std::num::Wrapping;

type Shared = ArithmeticSharedTensor;

/// Raw value used for padded positions of a max pooling window.
const POOL_PAD: i64 = -(1 << 50);

/// Right hand side of a comparison.
#[derive(Clone, Copy, Debug)]
pub enum Comparand<'a> {
    Private(&'a ArithmeticSharedTensor),
    Public(&'a PublicTensor),
}

impl<'a> From<&'a ArithmeticSharedTensor> for Comparand<'a> {
    fn from(x: &'a ArithmeticSharedTensor) -> Comparand<'a> {
        Comparand::Private(x)
    }
}

impl<'a> From<&'a PublicTensor> for Comparand<'a> {
    fn from(x: &'a PublicTensor) -> Comparand<'a> {
        Comparand::Public(x)
    }
}

/// `x - y`
fn diff(sess: &Session, x: &Shared, y: Comparand) -> Result<Shared> {
    match y {
        Comparand::Private(y) => x.sub(y),
        Comparand::Public(y) => x.sub_public(sess, y),
    }
}

/// `1 - x`
fn complement(sess: &Session, x: &Shared) -> Result<Shared> {
    x.rsub_public(sess, &PublicTensor::integer(1))
}

/// Shares of 1 where `x < 0` and 0 elsewhere.
pub fn ltz(sess: &Session, x: &Shared) -> Result<Shared> {
    let msb = a2b(sess, x)?.shr(RING_WIDTH - 1);
    b2a(sess, &msb, 1, 0)
}

pub fn lt<'a>(sess: &Session, x: &Shared, y: impl Into<Comparand<'a>>) -> Result<Shared> {
    ltz(sess, &diff(sess, x, y.into())?)
}

pub fn gt<'a>(sess: &Session, x: &Shared, y: impl Into<Comparand<'a>>) -> Result<Shared> {
    ltz(sess, &diff(sess, x, y.into())?.neg())
}

pub fn le<'a>(sess: &Session, x: &Shared, y: impl Into<Comparand<'a>>) -> Result<Shared> {
    complement(sess, &gt(sess, x, y)?)
}

pub fn ge<'a>(sess: &Session, x: &Shared, y: impl Into<Comparand<'a>>) -> Result<Shared> {
    complement(sess, &lt(sess, x, y)?)
}

/// `x != y`, as `(x < y) + (y < x)` with both signs extracted together.
pub fn ne<'a>(sess: &Session, x: &Shared, y: impl Into<Comparand<'a>>) -> Result<Shared> {
    let d = diff(sess, x, y.into())?;
    let both = Shared::stack(0, &[&d, &d.neg()])?;
    ltz(sess, &both)?.sum(Some(0), false)
}

pub fn eq<'a>(sess: &Session, x: &Shared, y: impl Into<Comparand<'a>>) -> Result<Shared> {
    complement(sess, &ne(sess, x, y)?)
}

/// -1 for negative entries and 1 otherwise, zero included.
pub fn sign(sess: &Session, x: &Shared) -> Result<Shared> {
    ltz(sess, x)?
        .mul_integer(-2)
        .add_public(sess, &PublicTensor::integer(1))
}

pub fn abs(sess: &Session, x: &Shared) -> Result<Shared> {
    x.mul(sess, &sign(sess, x)?)
}

pub fn relu(sess: &Session, x: &Shared) -> Result<Shared> {
    x.mul(sess, &complement(sess, &ltz(sess, x)?)?)
}

/// Maximum over `dim`, or over all entries when `dim` is `None`.
pub fn max(sess: &Session, x: &Shared, dim: Option<usize>, keepdim: bool) -> Result<Shared> {
    let (values, _) = tournament(sess, x, dim, false)?;
    reduced(x, values, dim, keepdim)
}

pub fn min(sess: &Session, x: &Shared, dim: Option<usize>, keepdim: bool) -> Result<Shared> {
    Ok(max(sess, &x.neg(), dim, keepdim)?.neg())
}

/// One-hot position of the maximum, of the same shape as `x`.
///
/// Exactly one entry per reduced slice is 1; on ties the first occurrence
/// wins.
pub fn argmax(sess: &Session, x: &Shared, dim: Option<usize>) -> Result<Shared> {
    let (_, one_hot) = tournament(sess, x, dim, true)?;
    one_hot
        .ok_or_else(|| Error::Unexpected(Some("tournament dropped the indices".into())))?
        .reshape(x.shape())
}

pub fn argmin(sess: &Session, x: &Shared, dim: Option<usize>) -> Result<Shared> {
    argmax(sess, &x.neg(), dim)
}

/// Max pooling of an `[N, C, H, W]` tensor.
pub fn max_pool2d(
    sess: &Session,
    x: &Shared,
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
) -> Result<Shared> {
    // party 0 alone fills the padding so that the shared pad value is very negative
    let fill = if sess.rank() == 0 {
        Wrapping(POOL_PAD as u64)
    } else {
        Wrapping(0)
    };
    let (windows, (oh, ow)) = x.share.unfold2d(kernel, stride, padding, fill)?;
    let (n, c) = (windows.shape()[0], windows.shape()[1]);
    let windows = Shared::new(windows, x.precision);
    max(sess, &windows, Some(3), false)?.reshape(&[n, c, oh, ow])
}

/// Reshape tournament winners to the layout `max` promises.
fn reduced(x: &Shared, values: Shared, dim: Option<usize>, keepdim: bool) -> Result<Shared> {
    match (dim, keepdim) {
        (Some(dim), true) => values.expand_dims(dim),
        (Some(_), false) => Ok(values),
        (None, true) => values.reshape(&vec![1; x.ndim()]),
        (None, false) => values.reshape(&[]),
    }
}

/// Axes order moving `dim` to the front.
fn to_front(ndim: usize, dim: usize) -> Vec<usize> {
    std::iter::once(dim)
        .chain((0..ndim).filter(|&a| a != dim))
        .collect()
}

/// Inverse of [`to_front`].
fn from_front(ndim: usize, dim: usize) -> Vec<usize> {
    (0..ndim)
        .map(|a| match a {
            a if a < dim => a + 1,
            a if a == dim => 0,
            a => a,
        })
        .collect()
}

fn strided(start: isize, end: usize) -> IndexElem {
    IndexElem::Slice(SliceElem {
        start,
        end: Some(end as isize),
        step: Some(2),
    })
}

/// Pairwise knockout along `dim`.
///
/// Candidates are compared two by two; the right one replaces the left only
/// if strictly larger, which keeps the first occurrence on ties. Each level
/// costs one comparison and one multiplication round for the whole tensor.
/// Returns the maxima with `dim` removed and, when asked, the one-hot
/// position of the winners in the layout of `x`.
///
/// Winners carry their shared position along `dim` rather than a one-hot
/// vector, so the cost stays linear in the size of `x`; the one-hot form is
/// rebuilt with a single equality test against the public positions.
fn tournament(
    sess: &Session,
    x: &Shared,
    dim: Option<usize>,
    with_index: bool,
) -> Result<(Shared, Option<Shared>)> {
    let (x, dim) = match dim {
        Some(dim) => (x.clone(), dim),
        None => (x.reshape(&[x.len()])?, 0),
    };
    if dim >= x.ndim() {
        return Err(Error::InvalidArgument(format!(
            "dim {} out of range for tensor of rank {}",
            dim,
            x.ndim()
        )));
    }
    let n = x.shape()[dim];
    if n == 0 {
        return Err(Error::InvalidArgument(
            "cannot reduce over an empty dimension".into(),
        ));
    }

    let front = x.permute(&to_front(x.ndim(), dim))?;
    let positions = positions(n, front.ndim() - 1)?;

    // candidate values and their positions, both [m, rest..]
    let mut index = if with_index {
        Some(Shared::from_public(sess, &positions).broadcast_to(front.shape())?)
    } else {
        None
    };
    let mut values = front;

    while values.shape()[0] > 1 {
        let m = values.shape()[0];
        let paired = m - m % 2;
        let left = values.slice(&[strided(0, paired)])?;
        let right = values.slice(&[strided(1, paired)])?;

        let take_right = lt(sess, &left, &right)?;
        let value_step = right.sub(&left)?;
        let mut requests = vec![(&take_right, &value_step)];

        let index_parts = match &index {
            Some(index) => {
                let left = index.slice(&[strided(0, paired)])?;
                let right = index.slice(&[strided(1, paired)])?;
                let step = right.sub(&left)?;
                Some((left, step))
            }
            None => None,
        };
        if let Some((_, step)) = &index_parts {
            requests.push((&take_right, step));
        }
        let mut products = Shared::mul_many(sess, &requests)?.into_iter();
        let mut next = || {
            products
                .next()
                .ok_or_else(|| Error::Unexpected(Some("missing selection product".into())))
        };

        values = with_leftover(left.add(&next()?)?, &values, paired)?;
        index = match (index, index_parts) {
            (Some(old), Some((left, _))) => {
                let updated = left.add(&next()?)?;
                Some(with_leftover(updated, &old, paired)?)
            }
            _ => None,
        };
    }

    let values = values.squeeze(0)?;
    let one_hot = match index {
        // [1, rest..] against [n, 1, ..] broadcasts to [n, rest..]
        Some(winner) => Some(eq(sess, &winner, &positions)?.permute(&from_front(x.ndim(), dim))?),
        None => None,
    };
    Ok((values, one_hot))
}

/// Public `0..n` laid out along the first of `1 + rest` axes.
fn positions(n: usize, rest: usize) -> Result<PublicTensor> {
    let mut shape = vec![n];
    shape.extend(std::iter::repeat(1).take(rest));
    let arange = Array::from_shape_vec(IxDyn(&shape), (0..n as i64).collect())
        .map_err(|e| Error::Unexpected(Some(e.to_string())))?;
    Ok(PublicTensor {
        value: RingTensor::from(arange),
        precision: 0,
    })
}

/// Append the unpaired last candidate, if any, to the round's winners.
fn with_leftover(winners: Shared, previous: &Shared, paired: usize) -> Result<Shared> {
    if paired == previous.shape()[0] {
        return Ok(winners);
    }
    let last = previous.index_select(0, &[paired])?;
    Shared::concatenate(0, &[&winners, &last])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_close, run_parties, uniform};
    use rstest::rstest;

    fn share(sess: &Session, x: &ArrayD<f64>) -> Result<Shared> {
        let value = if sess.rank() == 0 { Some(x) } else { None };
        Shared::from_plain(sess, value, 0)
    }

    fn indicator(x: &ArrayD<f64>, y: &ArrayD<f64>, f: fn(f64, f64) -> bool) -> ArrayD<f64> {
        ndarray::Zip::from(x)
            .and(y)
            .map_collect(|a, b| if f(*a, *b) { 1.0 } else { 0.0 })
    }

    #[rstest]
    #[case(2)]
    #[case(3)]
    fn test_comparators_are_exact(#[case] world_size: usize) {
        let mut x = uniform(&[12], -10.0, 10.0, 31);
        let y = uniform(&[12], -10.0, 10.0, 32);
        // force a few ties
        x[0] = y[0];
        x[5] = y[5];
        let outputs = run_parties(world_size, |sess| {
            let a = share(sess, &x)?;
            let b = share(sess, &y)?;
            Ok(vec![
                lt(sess, &a, &b)?.reveal(sess)?,
                le(sess, &a, &b)?.reveal(sess)?,
                gt(sess, &a, &b)?.reveal(sess)?,
                ge(sess, &a, &b)?.reveal(sess)?,
                eq(sess, &a, &b)?.reveal(sess)?,
                ne(sess, &a, &b)?.reveal(sess)?,
            ])
        });
        let expected = vec![
            indicator(&x, &y, |a, b| a < b),
            indicator(&x, &y, |a, b| a <= b),
            indicator(&x, &y, |a, b| a > b),
            indicator(&x, &y, |a, b| a >= b),
            indicator(&x, &y, |a, b| a == b),
            indicator(&x, &y, |a, b| a != b),
        ];
        for results in outputs {
            for (result, expected) in results.iter().zip(expected.iter()) {
                assert_eq!(result, expected);
            }
        }
    }

    #[test]
    fn test_public_comparand() {
        let x = array![-1.5, 0.0, 2.0, 2.5].into_dyn();
        let outputs = run_parties(2, |sess| {
            let a = share(sess, &x)?;
            let threshold = PublicTensor::scalar(sess, 2.0);
            Ok((
                lt(sess, &a, &threshold)?.reveal(sess)?,
                eq(sess, &a, &threshold)?.reveal(sess)?,
                ge(sess, &a, &threshold)?.reveal(sess)?,
            ))
        });
        for (lt, eq, ge) in outputs {
            assert_eq!(lt, array![1.0, 1.0, 0.0, 0.0].into_dyn());
            assert_eq!(eq, array![0.0, 0.0, 1.0, 0.0].into_dyn());
            assert_eq!(ge, array![0.0, 0.0, 1.0, 1.0].into_dyn());
        }
    }

    #[test]
    fn test_sign_abs_relu() {
        let x = array![[-3.25, 0.0], [0.5, -0.001]].into_dyn();
        let outputs = run_parties(3, |sess| {
            let a = share(sess, &x)?;
            Ok((
                sign(sess, &a)?.reveal(sess)?,
                abs(sess, &a)?.reveal(sess)?,
                relu(sess, &a)?.reveal(sess)?,
            ))
        });
        for (sign, abs, relu) in outputs {
            assert_eq!(sign, array![[-1.0, 1.0], [1.0, -1.0]].into_dyn());
            assert_close(&abs, &x.mapv(f64::abs));
            assert_close(&relu, &x.mapv(|v| v.max(0.0)));
        }
    }

    #[rstest]
    #[case(2)]
    #[case(3)]
    fn test_argmax_ties_pick_first(#[case] world_size: usize) {
        let x = array![1.0, 1.0, 2.0, 1.0, 4.0, 1.0, 3.0, 4.0].into_dyn();
        let outputs = run_parties(world_size, |sess| {
            let a = share(sess, &x)?;
            Ok((
                argmax(sess, &a, None)?.reveal(sess)?,
                argmin(sess, &a, Some(0))?.reveal(sess)?,
                max(sess, &a, None, false)?.reveal(sess)?,
                min(sess, &a, Some(0), true)?.reveal(sess)?,
            ))
        });
        for (argmax, argmin, max, min) in outputs {
            assert_eq!(argmax, array![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0].into_dyn());
            assert_eq!(argmin, array![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0].into_dyn());
            assert_eq!(max, arr0(4.0).into_dyn());
            assert_eq!(min, array![1.0].into_dyn());
        }
    }

    #[test]
    fn test_argmax_large_input() {
        let mut x = uniform(&[100, 100], -20.0, 20.0, 37);
        x[[37, 58]] = 25.0;
        x[[90, 1]] = 25.0;
        let outputs = run_parties(2, |sess| {
            let a = share(sess, &x)?;
            Ok((
                argmax(sess, &a, None)?.reveal(sess)?,
                argmin(sess, &a, Some(1))?.reveal(sess)?,
            ))
        });
        let mut expected = ArrayD::<f64>::zeros(IxDyn(&[100, 100]));
        expected[[37, 58]] = 1.0;
        for (one_hot, row_min) in outputs {
            assert_eq!(one_hot, expected);
            for (lane, hot) in x.rows().into_iter().zip(row_min.rows()) {
                assert_eq!(hot.sum(), 1.0);
                let picked: f64 = lane.iter().zip(hot.iter()).map(|(v, h)| v * h).sum();
                let best = lane.iter().cloned().fold(f64::INFINITY, f64::min);
                assert!((picked - best).abs() < 1e-3);
            }
        }
    }

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    #[case(2, false)]
    fn test_max_over_dim(#[case] dim: usize, #[case] keepdim: bool) {
        let x = uniform(&[3, 5, 2], -20.0, 20.0, 33);
        let outputs = run_parties(2, |sess| {
            let a = share(sess, &x)?;
            Ok((
                max(sess, &a, Some(dim), keepdim)?.reveal(sess)?,
                argmax(sess, &a, Some(dim))?.reveal(sess)?,
            ))
        });
        let mut expected = x.map_axis(Axis(dim), |lane| {
            lane.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
        });
        if keepdim {
            expected = expected.insert_axis(Axis(dim));
        }
        for (values, one_hot) in outputs {
            assert_close(&values, &expected);
            assert_eq!(one_hot.shape(), x.shape());
            // one position per lane, holding the maximum
            for (lane, hot) in x.lanes(Axis(dim)).into_iter().zip(one_hot.lanes(Axis(dim))) {
                assert_eq!(hot.sum(), 1.0);
                let picked: f64 = lane.iter().zip(hot.iter()).map(|(v, h)| v * h).sum();
                let best = lane.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                assert!((picked - best).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_max_single_entry() {
        let x = array![[7.0], [-2.0]].into_dyn();
        let outputs = run_parties(2, |sess| {
            let a = share(sess, &x)?;
            Ok((
                max(sess, &a, Some(1), false)?.reveal(sess)?,
                argmax(sess, &a, Some(1))?.reveal(sess)?,
            ))
        });
        for (values, one_hot) in outputs {
            assert_eq!(values, array![7.0, -2.0].into_dyn());
            assert_eq!(one_hot, array![[1.0], [1.0]].into_dyn());
        }
    }

    #[test]
    fn test_max_pool2d() {
        let x = uniform(&[1, 2, 4, 4], -5.0, 5.0, 34);
        let outputs = run_parties(2, |sess| {
            max_pool2d(sess, &share(sess, &x)?, (2, 2), (2, 2), (1, 1))?.reveal(sess)
        });
        // padded to 6x6, windows at offsets 0, 2, 4
        let mut expected = ArrayD::<f64>::zeros(IxDyn(&[1, 2, 3, 3]));
        for c in 0..2 {
            for i in 0..3 {
                for j in 0..3 {
                    let mut best = f64::NEG_INFINITY;
                    for di in 0..2 {
                        for dj in 0..2 {
                            let (h, w) = ((2 * i + di) as isize - 1, (2 * j + dj) as isize - 1);
                            if (0..4).contains(&h) && (0..4).contains(&w) {
                                best = best.max(x[[0, c, h as usize, w as usize]]);
                            }
                        }
                    }
                    expected[[0, c, i, j]] = best;
                }
            }
        }
        for y in outputs {
            assert_close(&y, &expected);
        }
    }

    #[test]
    fn test_dim_out_of_range() {
        let outputs = crate::test_utils::run_parties_with(
            2,
            crate::test_utils::TestSetup::with_config(Default::default(), 2),
            |sess| max(sess, &Shared::zeros(&[3], 16), Some(1), false),
        );
        assert!(outputs
            .iter()
            .all(|res| matches!(res, Err(Error::InvalidArgument(_)))));
    }
}
