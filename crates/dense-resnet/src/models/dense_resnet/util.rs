//! # Dense `ResNet` Utilities
use burn::nn::{Initializer, PaddingConfig2d};
use std::f64::consts::SQRT_2;

/// Initializer for convolutions which feed a `ReLU`.
///
/// ``weight ~ Normal(0, sqrt(2 / n))``, where ``n = kernel_height * kernel_width * out_channels``.
pub static CONV_INTO_RELU_INITIALIZER: Initializer = Initializer::KaimingNormal {
    gain: SQRT_2,
    fan_out_only: true,
};

/// Expand a scalar to a square array.
#[inline(always)]
pub fn scalar_to_array<const D: usize>(x: usize) -> [usize; D] {
    [x; D]
}

/// Symmetric explicit padding.
#[inline(always)]
pub fn square_padding(padding: usize) -> PaddingConfig2d {
    PaddingConfig2d::Explicit(padding, padding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_to_array() {
        assert_eq!(scalar_to_array::<2>(3), [3, 3]);
    }

    #[test]
    fn test_initializer_is_fan_out_kaiming() {
        match &CONV_INTO_RELU_INITIALIZER {
            Initializer::KaimingNormal { gain, fan_out_only } => {
                assert_eq!(*gain, SQRT_2);
                assert!(*fan_out_only);
            }
            other => panic!("unexpected initializer: {other:?}"),
        }
    }
}
