//! Iterative approximations of non-linear functions.
//!
//! Every routine runs a fixed number of iterations taken from
//! [`ApproximationConfig`](crate::config::ApproximationConfig), whatever the
//! data. Inputs are first brought to the session precision.

use crate::arithmetic::{trunc_pr, ArithmeticSharedTensor, PublicTensor};
use crate::binary::BinarySharedTensor;
use crate::comparison::{lt, ltz, max, sign};
use crate::convert::b2a;
use crate::error::{Error, Result};
use crate::ring::RingTensor;
use crate::session::Session;
use ndarray::prelude::*;
use std::num::Wrapping;

type Shared = ArithmeticSharedTensor;

fn prepared(sess: &Session, x: &Shared) -> Result<Shared> {
    x.rescale(sess, sess.encoding().precision_bits)
}

/// `constant + Σ coeff · term` with a single truncation.
fn affine(sess: &Session, terms: &[(&Shared, f64)], constant: f64) -> Result<Shared> {
    let enc = sess.encoding();
    let precision = enc.precision_bits;
    let mut raw: Option<RingTensor> = None;
    for (term, coeff) in terms {
        let term = term.rescale(sess, precision)?;
        let scaled = term.share.mul_scalar(enc.encode_scalar(*coeff));
        raw = Some(match raw {
            Some(acc) => acc.add(&scaled)?,
            None => scaled,
        });
    }
    let raw = raw.ok_or_else(|| Error::InvalidArgument("empty linear combination".into()))?;
    let combined = Shared::new(trunc_pr(sess, &raw, precision as usize)?, precision);
    combined.add_scalar(sess, constant)
}

/// Evaluate `coeffs[0] + coeffs[1] x + ...`; the powers of `x` are computed
/// in logarithmic depth.
fn polynomial(sess: &Session, x: &Shared, coeffs: &[f64]) -> Result<Shared> {
    let degree = coeffs.len().saturating_sub(1);
    if degree == 0 {
        return Err(Error::InvalidArgument(
            "polynomial needs a non-constant term".into(),
        ));
    }
    // powers[i] = x^(i + 1)
    let mut powers = vec![x.clone()];
    while powers.len() < degree {
        let k = powers.len();
        let top = powers[k - 1].clone();
        let wanted = (degree - k).min(k);
        let pairs: Vec<(&Shared, &Shared)> =
            powers[..wanted].iter().map(|p| (p, &top)).collect();
        let next = Shared::mul_many(sess, &pairs)?;
        powers.extend(next);
    }
    let terms: Vec<(&Shared, f64)> = powers
        .iter()
        .zip(&coeffs[1..])
        .map(|(p, c)| (p, *c))
        .collect();
    affine(sess, &terms, coeffs[0])
}

/// `(1 + t + t^2 / 2)^(2^n)` with `t = x / 2^n`; inputs must stay above
/// `-2^(n + 1)`.
fn exp_with(sess: &Session, x: &Shared, iterations: u32) -> Result<Shared> {
    let t = prepared(sess, x)?.trunc(sess, iterations as usize)?;
    let mut y = polynomial(sess, &t, &[1.0, 1.0, 0.5])?;
    for _ in 0..iterations {
        y = y.square(sess)?;
    }
    Ok(y)
}

pub fn exp(sess: &Session, x: &Shared) -> Result<Shared> {
    exp_with(sess, x, sess.config().approximation.exp_iterations)
}

/// Newton-Raphson reciprocal of strictly positive inputs.
fn reciprocal_positive(sess: &Session, x: &Shared) -> Result<Shared> {
    let x = prepared(sess, x)?;
    let mut y = exp(sess, &x.rsub_public(sess, &PublicTensor::scalar(sess, 0.5))?)?
        .mul_integer(3)
        .add_scalar(sess, 0.003)?;
    for _ in 0..sess.config().approximation.reciprocal_iterations {
        let xy = x.mul(sess, &y)?;
        y = y.mul(sess, &xy.rsub_public(sess, &PublicTensor::integer(2))?)?;
    }
    Ok(y)
}

/// `1 / x` for non-zero inputs of magnitude up to a few hundred.
pub fn reciprocal(sess: &Session, x: &Shared) -> Result<Shared> {
    let x = prepared(sess, x)?;
    let s = sign(sess, &x)?;
    let r = reciprocal_positive(sess, &x.mul(sess, &s)?)?;
    r.mul(sess, &s)
}

pub fn div(sess: &Session, x: &Shared, y: &Shared) -> Result<Shared> {
    x.mul(sess, &reciprocal(sess, y)?)
}

pub fn inv_sqrt(sess: &Session, x: &Shared) -> Result<Shared> {
    let x = prepared(sess, x)?;
    let t = x.trunc(sess, 1)?.add_scalar(sess, 0.2)?;
    let mut y = exp(sess, &t.neg())?
        .mul_scalar(sess, 2.2)?
        .add_scalar(sess, 0.2)?
        .sub(&x.trunc(sess, 10)?)?;
    for _ in 0..sess.config().approximation.sqrt_iterations {
        let xy2 = x.mul(sess, &y.square(sess)?)?;
        y = y
            .mul(sess, &xy2.rsub_public(sess, &PublicTensor::integer(3))?)?
            .trunc(sess, 1)?;
    }
    Ok(y)
}

pub fn sqrt(sess: &Session, x: &Shared) -> Result<Shared> {
    let x = prepared(sess, x)?;
    x.mul(sess, &inv_sqrt(sess, &x)?)
}

/// Natural logarithm of positive inputs.
///
/// Householder iterations on `h = 1 - x exp(-y)`, using
/// `log x = y + log(1 - h) = y - Σ h^i / i`.
pub fn log(sess: &Session, x: &Shared) -> Result<Shared> {
    let cfg = &sess.config().approximation;
    let x = prepared(sess, x)?;
    let damping = exp_with(
        sess,
        &x.mul_integer(2).add_scalar(sess, 1.0)?.neg(),
        cfg.log_exp_iterations,
    )?;
    let mut y = affine(sess, &[(&x, 1.0 / 120.0), (&damping, -20.0)], 3.0)?;

    let mut series = vec![0.0];
    series.extend((1..=cfg.log_order).map(|i| -1.0 / i as f64));
    for _ in 0..cfg.log_iterations {
        let h = x
            .mul(sess, &exp_with(sess, &y.neg(), cfg.log_exp_iterations)?)?
            .rsub_public(sess, &PublicTensor::integer(1))?;
        y = y.add(&polynomial(sess, &h, &series)?)?;
    }
    Ok(y)
}

/// `x^p`; integers use repeated squaring, `±0.5` the square root routines,
/// anything else `exp(p log x)` on positive inputs.
pub fn pow(sess: &Session, x: &Shared, p: f64) -> Result<Shared> {
    if !p.is_finite() {
        return Err(Error::InvalidArgument(format!("cannot raise to {}", p)));
    }
    if p.fract() == 0.0 {
        let k = p as i64;
        return match k {
            0 => Ok(Shared::from_public(
                sess,
                &PublicTensor::encode(sess, &ArrayD::ones(IxDyn(x.shape()))),
            )),
            k if k > 0 => integer_power(sess, &prepared(sess, x)?, k as u64),
            k => integer_power(sess, &reciprocal(sess, x)?, k.unsigned_abs()),
        };
    }
    if p == 0.5 {
        sqrt(sess, x)
    } else if p == -0.5 {
        inv_sqrt(sess, x)
    } else {
        exp(sess, &log(sess, x)?.mul_scalar(sess, p)?)
    }
}

fn integer_power(sess: &Session, x: &Shared, mut k: u64) -> Result<Shared> {
    let mut result: Option<Shared> = None;
    let mut base = x.clone();
    loop {
        if k & 1 == 1 {
            result = Some(match result {
                Some(acc) => acc.mul(sess, &base)?,
                None => base.clone(),
            });
        }
        k >>= 1;
        if k == 0 {
            break;
        }
        base = base.square(sess)?;
    }
    result.ok_or_else(|| Error::InvalidArgument("exponent must be positive".into()))
}

/// Euclidean norm over `dim`, or over all entries when `dim` is `None`.
pub fn norm(sess: &Session, x: &Shared, dim: Option<usize>, keepdim: bool) -> Result<Shared> {
    let squares = prepared(sess, x)?.square(sess)?;
    sqrt(sess, &squares.sum(dim, keepdim)?)
}

/// `σ(|x|)` mirrored for negative inputs, so the reciprocal only ever sees
/// values in `[1, 2]`.
pub fn sigmoid(sess: &Session, x: &Shared) -> Result<Shared> {
    let x = prepared(sess, x)?;
    let negative = ltz(sess, &x)?;
    let s = negative
        .mul_integer(-2)
        .add_public(sess, &PublicTensor::integer(1))?;
    let magnitude = x.mul(sess, &s)?;
    let denominator = exp(sess, &magnitude.neg())?.add_public(sess, &PublicTensor::integer(1))?;
    let r = reciprocal_positive(sess, &denominator)?;
    // r + negative * (1 - 2r)
    let flipped = r
        .mul_integer(-2)
        .add_public(sess, &PublicTensor::integer(1))?;
    r.add(&negative.mul(sess, &flipped)?)
}

pub fn tanh(sess: &Session, x: &Shared) -> Result<Shared> {
    let x = prepared(sess, x)?;
    sigmoid(sess, &x.mul_integer(2))?
        .mul_integer(2)
        .add_public(sess, &PublicTensor::integer(-1))
}

/// Max-shifted softmax along `dim`.
pub fn softmax(sess: &Session, x: &Shared, dim: usize) -> Result<Shared> {
    let (_, e, total) = shifted_exp(sess, x, dim)?;
    e.mul(sess, &reciprocal_positive(sess, &total)?)
}

pub fn log_softmax(sess: &Session, x: &Shared, dim: usize) -> Result<Shared> {
    let (shifted, _, total) = shifted_exp(sess, x, dim)?;
    shifted.sub(&log(sess, &total)?)
}

/// `x - max x`, its exponential and the sum of that along `dim`, kept for
/// broadcasting.
fn shifted_exp(sess: &Session, x: &Shared, dim: usize) -> Result<(Shared, Shared, Shared)> {
    let x = prepared(sess, x)?;
    let shifted = x.sub(&max(sess, &x, Some(dim), true)?)?;
    let e = exp(sess, &shifted)?;
    let total = e.sum(Some(dim), true)?;
    Ok((shifted, e, total))
}

/// Cosine and sine together: Taylor expansions around `x / 2^n` followed by
/// `n` angle doublings.
pub fn cos_sin(sess: &Session, x: &Shared) -> Result<(Shared, Shared)> {
    let iterations = sess.config().approximation.trig_iterations;
    let t = prepared(sess, x)?.trunc(sess, iterations as usize)?;
    let t2 = t.square(sess)?;
    let mut powers = Shared::mul_many(sess, &[(&t2, &t), (&t2, &t2)])?.into_iter();
    let (t3, t4) = match (powers.next(), powers.next()) {
        (Some(t3), Some(t4)) => (t3, t4),
        _ => return Err(Error::Unexpected(Some("missing powers".into()))),
    };
    let mut c = affine(sess, &[(&t2, -0.5), (&t4, 1.0 / 24.0)], 1.0)?;
    let mut s = affine(sess, &[(&t, 1.0), (&t3, -1.0 / 6.0)], 0.0)?;
    for _ in 0..iterations {
        let doubled = Shared::mul_many(sess, &[(&c, &c), (&s, &s), (&c, &s)])?;
        c = doubled[0].sub(&doubled[1])?;
        s = doubled[2].mul_integer(2);
    }
    Ok((c, s))
}

pub fn cos(sess: &Session, x: &Shared) -> Result<Shared> {
    Ok(cos_sin(sess, x)?.0)
}

pub fn sin(sess: &Session, x: &Shared) -> Result<Shared> {
    Ok(cos_sin(sess, x)?.1)
}

/// Uniform samples from `[0, 1)` at the session precision.
///
/// Every party contributes random low bits; their XOR is uniform as long as
/// one party is honest.
pub fn rand(sess: &Session, shape: &[usize]) -> Result<Shared> {
    let bits = sess.encoding().precision_bits;
    let words = sess
        .random_words(shape)
        .and_scalar(Wrapping((1u64 << bits) - 1));
    b2a(sess, &BinarySharedTensor::new(words), bits as usize, bits)
}

/// 0/1 samples with the given shared probabilities.
pub fn bernoulli(sess: &Session, probs: &Shared) -> Result<Shared> {
    lt(sess, &rand(sess, probs.shape())?, probs)
}
