//! Fixed-point encoding of reals into the ring.

use crate::ring::RingTensor;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use std::num::Wrapping;

const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

/// Encoding with `precision_bits` fractional bits in a 64 bit ring.
///
/// Values outside `[-2^(63 - precision_bits), 2^(63 - precision_bits))`
/// wrap around modulo 2^64 instead of saturating.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedPointEncoding {
    pub precision_bits: u32,
}

impl FixedPointEncoding {
    pub fn new(precision_bits: u32) -> FixedPointEncoding {
        FixedPointEncoding { precision_bits }
    }

    /// Encoding of plain integers.
    pub fn integer() -> FixedPointEncoding {
        FixedPointEncoding { precision_bits: 0 }
    }

    pub fn scaling_factor(&self) -> f64 {
        (1u64 << self.precision_bits) as f64
    }

    pub fn encode_scalar(&self, x: f64) -> Wrapping<u64> {
        let upshifted = (x * self.scaling_factor()).round();
        if upshifted.abs() < 9.0e18 {
            Wrapping(upshifted as i64 as u64)
        } else {
            Wrapping(upshifted.rem_euclid(TWO_POW_64) as u64)
        }
    }

    pub fn encode(&self, x: &ArrayD<f64>) -> RingTensor {
        RingTensor(x.mapv(|el| self.encode_scalar(el)).into_shared())
    }

    pub fn decode_scalar(&self, x: Wrapping<u64>) -> f64 {
        (x.0 as i64) as f64 / self.scaling_factor()
    }

    pub fn decode(&self, x: &RingTensor) -> ArrayD<f64> {
        x.0.mapv(|el| self.decode_scalar(el))
    }
}

/// Whether every entry is an integer small enough to be used without encoding.
pub(crate) fn is_integral(x: &ArrayD<f64>) -> bool {
    x.iter()
        .all(|el| el.fract() == 0.0 && el.abs() < (1u64 << 40) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, 0)]
    #[case(1.0, 65536)]
    #[case(-1.0, -65536)]
    #[case(0.5, 32768)]
    #[case(1.0 / 131072.0, 1)]
    fn test_encode_scalar(#[case] x: f64, #[case] raw: i64) {
        let enc = FixedPointEncoding::new(16);
        assert_eq!(enc.encode_scalar(x), Wrapping(raw as u64));
    }

    #[test]
    fn test_encode_decode_tensor() {
        let enc = FixedPointEncoding::new(16);
        let x = array![[1.5, -2.25], [0.0, 1024.125]].into_dyn();
        assert_eq!(enc.decode(&enc.encode(&x)), x);
    }

    #[test]
    fn test_overflow_wraps() {
        let enc = FixedPointEncoding::new(16);
        let max = (1u64 << 47) as f64;
        // 2^47 * 2^16 = 2^63 wraps to the most negative value
        assert_eq!(enc.decode_scalar(enc.encode_scalar(max)), -max);
    }

    #[test]
    fn test_is_integral() {
        assert!(is_integral(&array![1.0, -3.0, 0.0].into_dyn()));
        assert!(!is_integral(&array![1.0, 0.5].into_dyn()));
    }

    proptest! {
        #[test]
        fn test_roundtrip_within_half_ulp(x in -1.0e6f64..1.0e6) {
            let enc = FixedPointEncoding::new(16);
            let y = enc.decode_scalar(enc.encode_scalar(x));
            prop_assert!((x - y).abs() <= 0.5 / enc.scaling_factor());
        }
    }
}
