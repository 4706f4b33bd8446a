//! Conversions between additive and XOR sharings.

use crate::arithmetic::{beaver_many, pop_single, ArithmeticSharedTensor, Product};
use crate::binary::{add_tree, BinarySharedTensor};
use crate::error::{Error, Result};
use crate::ring::{RingTensor, RING_WIDTH};
use crate::session::Session;
use std::num::Wrapping;

/// Arithmetic to binary.
///
/// Every party XOR shares its own additive fragment and the fragments are
/// summed with the binary adder, so the cost is one adder per level of a
/// tree over the parties.
pub fn a2b(sess: &Session, x: &ArithmeticSharedTensor) -> Result<BinarySharedTensor> {
    let shape = x.shape().to_vec();
    let fragments: Vec<RingTensor> = (0..sess.world_size())
        .map(|owner| {
            let mask = sess.zero_share_xor(&shape)?;
            if sess.rank() == owner {
                mask.xor(&x.share)
            } else {
                Ok(mask)
            }
        })
        .collect::<Result<_>>()?;
    let share = add_tree(sess, fragments)?;
    tracing::trace!(rank = sess.rank(), shape = ?shape, "converted to binary sharing");
    Ok(BinarySharedTensor::new(share))
}

/// Binary to arithmetic.
///
/// Only the lowest `bits` bits of the shared words are converted; the result
/// is interpreted with `precision` fractional bits. Each bit plane is the XOR
/// of one local plane per party, which is folded into an additive sharing
/// with `a ^ b = a + b - 2ab`, one Beaver round per extra party.
pub fn b2a(
    sess: &Session,
    x: &BinarySharedTensor,
    bits: usize,
    precision: u32,
) -> Result<ArithmeticSharedTensor> {
    if bits == 0 || bits > RING_WIDTH {
        return Err(Error::InvalidArgument(format!("cannot convert {} bits", bits)));
    }
    let planes = x.share.bit_planes(bits)?;
    let held_by = |owner: usize| {
        if sess.rank() == owner {
            planes.clone()
        } else {
            RingTensor::zeros(planes.shape())
        }
    };

    let mut acc = held_by(0);
    for owner in 1..sess.world_size() {
        let other = held_by(owner);
        let mut product = beaver_many(sess, &[(Product::Mul, &acc, &other)])?;
        let product = pop_single(&mut product)?;
        acc = acc
            .add(&other)?
            .sub(&product.mul_scalar(Wrapping(2)))?;
    }

    let weights: Vec<u64> = (0..bits).map(|j| 1u64 << j).collect();
    let mut weight_shape = vec![1; planes.ndim()];
    weight_shape[0] = bits;
    let weights = RingTensor::from_vec(&weight_shape, weights)?;
    let share = acc
        .mul(&weights)?
        .sum(Some(0), false)?
        .add(&sess.zero_share(x.shape())?)?;
    Ok(ArithmeticSharedTensor::new(share, precision))
}
