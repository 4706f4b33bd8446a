//! Kogge-Stone adder over XOR shared 64 bit words.

use super::and_many;
use crate::error::Result;
use crate::ring::{RingTensor, RING_WIDTH};
use crate::session::Session;

/// XOR shares of `x + y mod 2^64` for every pair, evaluated together so the
/// whole batch takes one round per level of the prefix tree plus one.
pub(crate) fn add_many(
    sess: &Session,
    pairs: &[(&RingTensor, &RingTensor)],
) -> Result<Vec<RingTensor>> {
    #![allow(clippy::many_single_char_names)]

    if pairs.is_empty() {
        return Ok(Vec::new());
    }

    // g is the generator set, p the propagator set; see
    // https://www.chessprogramming.org/Kogge-Stone_Algorithm
    let mut g = and_many(sess, pairs)?;
    let p_store: Vec<RingTensor> = pairs
        .iter()
        .map(|(x, y)| x.xor(y))
        .collect::<Result<_>>()?;
    let mut p = p_store.clone();

    let levels = RING_WIDTH.trailing_zeros() as usize;
    for i in 0..levels {
        let amount = 1 << i;
        // the propagators of the last level are never read
        let last = i + 1 == levels;

        let g1: Vec<RingTensor> = g.iter().map(|g| g.shl(amount)).collect();
        let p1: Vec<RingTensor> = p.iter().map(|p| p.shl(amount)).collect();
        let mut requests: Vec<(&RingTensor, &RingTensor)> = p.iter().zip(g1.iter()).collect();
        if !last {
            requests.extend(p.iter().zip(p1.iter()));
        }
        let mut products = and_many(sess, &requests)?;
        let p_and_p1 = products.split_off(g.len());

        // g = g ^ (p & (g << amount))
        g = g
            .iter()
            .zip(products.iter())
            .map(|(g, p_and_g)| g.xor(p_and_g))
            .collect::<Result<_>>()?;
        if !last {
            p = p_and_p1;
        }
    }

    // the carry into bit i is the group generator of bits below i
    g.iter()
        .zip(p_store.iter())
        .map(|(g, p)| g.shl(1).xor(p))
        .collect()
}
