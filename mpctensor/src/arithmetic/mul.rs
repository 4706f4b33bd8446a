//! Beaver multiplication of additively shared ring tensors.

use crate::error::{Error, Result};
use crate::ring::RingTensor;
use crate::session::Session;
use crate::triples::TripleKind;
use std::num::Wrapping;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Product {
    /// Elementwise product of equally shaped operands.
    Mul,
    /// Elementwise square; the right operand is ignored.
    Square,
    /// Batched matrix product.
    Matmul,
}

impl Product {
    fn apply(&self, x: &RingTensor, y: &RingTensor) -> Result<RingTensor> {
        match self {
            Product::Mul | Product::Square => x.mul(y),
            Product::Matmul => x.matmul(y),
        }
    }
}

/// Raw products of shared ring tensors, all opened in one round.
///
/// No truncation is applied; the precision of each output is the sum of
/// its operands' precisions.
pub(crate) fn beaver_many(
    sess: &Session,
    requests: &[(Product, &RingTensor, &RingTensor)],
) -> Result<Vec<RingTensor>> {
    if requests.is_empty() {
        return Ok(Vec::new());
    }

    let mut triples = Vec::with_capacity(requests.len());
    let mut blinded = Vec::new();
    let mut shapes = Vec::new();
    for (product, x, y) in requests {
        let kind = match product {
            Product::Mul => {
                if x.shape() != y.shape() {
                    return Err(Error::shape_mismatch(x.shape(), y.shape()));
                }
                TripleKind::Mul(x.shape().to_vec())
            }
            Product::Square => TripleKind::Square(x.shape().to_vec()),
            Product::Matmul => TripleKind::Matmul {
                lhs: x.shape().to_vec(),
                rhs: y.shape().to_vec(),
            },
        };
        let triple = sess.arithmetic_triple(&kind)?;
        blinded.push(x.sub(&triple.a)?);
        shapes.push(x.shape().to_vec());
        if *product != Product::Square {
            blinded.push(y.sub(&triple.b)?);
            shapes.push(y.shape().to_vec());
        }
        triples.push(triple);
    }

    let refs: Vec<&RingTensor> = blinded.iter().collect();
    let mut opened = sess
        .sum_reveal("beaver", &RingTensor::pack(&refs))?
        .unpack(&shapes)?
        .into_iter();
    let mut next = || {
        opened
            .next()
            .ok_or_else(|| Error::Unexpected(Some("missing opened value".into())))
    };

    let is_first = sess.rank() == 0;
    let mut out = Vec::with_capacity(requests.len());
    for ((product, _, _), triple) in requests.iter().zip(triples) {
        let d = next()?;
        let z = match product {
            Product::Square => {
                // z = c + 2 d a (+ d^2)
                let z = triple.c.add(&d.mul(&triple.a)?.mul_scalar(Wrapping(2)))?;
                if is_first {
                    z.add(&d.mul(&d)?)?
                } else {
                    z
                }
            }
            _ => {
                let e = next()?;
                // z = c + d b + a e (+ d e)
                let z = triple
                    .c
                    .add(&product.apply(&d, &triple.b)?)?
                    .add(&product.apply(&triple.a, &e)?)?;
                if is_first {
                    z.add(&product.apply(&d, &e)?)?
                } else {
                    z
                }
            }
        };
        out.push(z);
    }
    Ok(out)
}
