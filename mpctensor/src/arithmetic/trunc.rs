//! Probabilistic truncation of additively shared ring values.

use crate::error::{Error, Result};
use crate::ring::{RingTensor, RING_WIDTH};
use crate::session::Session;
use std::num::Wrapping;

/// Shift every shared value right by its amount, all in a single round.
///
/// Inputs are treated as signed and must satisfy `-2^62 <= x < 2^62`; the
/// result may be off by one in the last place.
pub(crate) fn trunc_pr_many(
    sess: &Session,
    items: &[(&RingTensor, usize)],
) -> Result<Vec<RingTensor>> {
    #![allow(clippy::many_single_char_names)]

    if items.is_empty() {
        return Ok(Vec::new());
    }
    let is_first = sess.rank() == 0;
    // k = 63 so that the msb stays free for the positive shift
    let k = RING_WIDTH - 1;
    let upshifter = Wrapping(1u64 << (k - 1));

    let mut masks = Vec::with_capacity(items.len());
    let mut masked = Vec::with_capacity(items.len());
    for (x, amount) in items {
        if *amount > k - 2 {
            return Err(Error::InvalidArgument(format!(
                "cannot truncate by {} bits",
                amount
            )));
        }
        let mask = sess.truncation_mask(x.shape(), *amount)?;
        // NOTE we consider input is always signed, and the following positive
        // conversion maps -2^{k-1} <= x < 2^{k-1} to 0 <= x_positive < 2^k
        let x_positive = if is_first {
            x.add_scalar(upshifter)
        } else {
            (*x).clone()
        };
        masked.push(x_positive.add(&mask.r)?);
        masks.push(mask);
    }

    let shapes: Vec<Vec<usize>> = items.iter().map(|(x, _)| x.shape().to_vec()).collect();
    let refs: Vec<&RingTensor> = masked.iter().collect();
    let revealed = sess
        .sum_reveal("trunc_pr", &RingTensor::pack(&refs))?
        .unpack(&shapes)?;

    items
        .iter()
        .zip(masks)
        .zip(revealed)
        .map(|(((_, amount), mask), c)| {
            let amount = *amount;
            let c_top = c.shl(1).shr(amount + 1);
            let c_msb = c.shr(RING_WIDTH - 1);

            // overflow = r_msb xor c_msb = r_msb + c_msb - 2 r_msb c_msb
            let flip = c_msb.mul_scalar(Wrapping(2)).neg().add_scalar(Wrapping(1));
            let mut overflow = mask.r_msb.mul(&flip)?;
            if is_first {
                overflow = overflow.add(&c_msb)?;
            }
            let shifted_overflow = overflow.shl(k - amount);

            // y = c_top - r_top + (overflow << (k - m)) - 2^{k - m - 1}
            let mut y = shifted_overflow.sub(&mask.r_top)?;
            if is_first {
                let downshifter = Wrapping(1u64 << (k - amount - 1));
                y = y.add(&c_top)?.add_scalar(-downshifter);
            }
            Ok(y)
        })
        .collect()
}

pub(crate) fn trunc_pr(sess: &Session, x: &RingTensor, amount: usize) -> Result<RingTensor> {
    let mut out = trunc_pr_many(sess, &[(x, amount)])?;
    out.pop()
        .ok_or_else(|| Error::Unexpected(Some("truncation produced no output".into())))
}
