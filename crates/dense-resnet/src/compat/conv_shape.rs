//! # Convolution Shape Utilities
//!
//! Predict the spatial output resolution of 2d convolutions,
//! so that model configs can size their dense heads before any
//! weights are allocated.

use burn::nn::PaddingConfig2d;
use burn::nn::conv::Conv2dConfig;

/// Predict the output size of a 1D convolution operation.
///
/// ```text
/// out_size = floor( ((in_size + 2*padding - dilation*(kernel_size-1) - 1) / stride) + 1 )
/// ```
///
/// # Reference
///
/// - [conv_arithmetic diagram](https://github.com/vdumoulin/conv_arithmetic/blob/master/README.md)
///
/// # Arguments
///
/// - `input_size`: The input dimension size, must be > 0.
/// - `kernel_size`: The kernel size, must be > 0.
/// - `stride`: The stride of the convolution, must be > 0.
/// - `padding`: The padding of the convolution, added evenly to both sides of the input.
/// - `dilation`: The dilation of the convolution, must be > 0.
///
/// # Returns
///
/// An `Option<usize>` representing the output size; or `None` for <= 0.
pub fn maybe_conv1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<usize> {
    assert!(input_size > 0);
    assert!(kernel_size > 0);
    assert!(stride > 0);
    assert!(dilation > 0);

    let effective_size = input_size + 2 * padding;
    let pos = effective_size + stride;
    let kernel_width = 1 + dilation * (kernel_size - 1);

    if pos < kernel_width {
        return None;
    }
    let x = (pos - kernel_width) / stride;
    if x < 1 { None } else { Some(x) }
}

/// Resolve a [`PaddingConfig2d`] to explicit ``[pad_height, pad_width]``.
///
/// `Same` padding is resolved against the kernel, and is only exact
/// for odd kernels with stride 1.
pub fn explicit_padding_2d(
    padding: &PaddingConfig2d,
    kernel_size: [usize; 2],
) -> [usize; 2] {
    match padding {
        PaddingConfig2d::Valid => [0, 0],
        PaddingConfig2d::Same => [kernel_size[0] / 2, kernel_size[1] / 2],
        PaddingConfig2d::Explicit(h, w) => [*h, *w],
    }
}

/// Predict the output resolution of a [`Conv2dConfig`].
///
/// # Arguments
///
/// - `input_resolution`: ``[in_height, in_width]``.
/// - `conv`: the convolution config.
///
/// # Returns
///
/// ``Some([out_height, out_width])``; or `None` if either dim would be <= 0.
pub fn maybe_conv2d_output_resolution(
    input_resolution: [usize; 2],
    conv: &Conv2dConfig,
) -> Option<[usize; 2]> {
    let padding = explicit_padding_2d(&conv.padding, conv.kernel_size);
    let mut output = input_resolution;
    for i in 0..2 {
        output[i] = maybe_conv1d_output_size(
            input_resolution[i],
            conv.kernel_size[i],
            conv.stride[i],
            padding[i],
            conv.dilation[i],
        )?;
    }
    Some(output)
}

/// Predict the output resolution of a [`Conv2dConfig`].
///
/// This is the ``panic``-ing variant of [`maybe_conv2d_output_resolution`].
///
/// # Panics
///
/// If either output dim would be <= 0.
pub fn expect_conv2d_output_resolution(
    input_resolution: [usize; 2],
    conv: &Conv2dConfig,
) -> [usize; 2] {
    match maybe_conv2d_output_resolution(input_resolution, conv) {
        Some(resolution) => resolution,
        None => panic!(
            "No legal output resolution for conv2d with:\n input_resolution:{input_resolution:?}\n kernel_size:{:?}\n stride:{:?}\n padding:{:?}\n dilation:{:?}",
            conv.kernel_size, conv.stride, conv.padding, conv.dilation,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv1d_output_size() {
        fn reference(
            input_size: usize,
            kernel_size: usize,
            stride: usize,
            padding: usize,
        ) -> Option<usize> {
            let effective = (input_size + 2 * padding) as f64;
            let x = (((effective - kernel_size as f64) / stride as f64) + 1.0).floor();
            if x < 1.0 { None } else { Some(x as usize) }
        }

        for input_size in 1..12 {
            for stride in 1..3 {
                for kernel_size in 1..5 {
                    for padding in 0..4 {
                        assert_eq!(
                            maybe_conv1d_output_size(input_size, kernel_size, stride, padding, 1),
                            reference(input_size, kernel_size, stride, padding),
                            "input:{input_size} kernel:{kernel_size} stride:{stride} padding:{padding}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_conv2d_output_resolution() {
        // The padded stem for 28x28 inputs.
        let conv = Conv2dConfig::new([1, 16], [3, 3]).with_padding(PaddingConfig2d::Explicit(3, 3));
        assert_eq!(expect_conv2d_output_resolution([28, 28], &conv), [32, 32]);

        let conv = Conv2dConfig::new([16, 32], [4, 4])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1));
        assert_eq!(expect_conv2d_output_resolution([32, 32], &conv), [16, 16]);
        assert_eq!(expect_conv2d_output_resolution([7, 9], &conv), [3, 4]);

        let conv = Conv2dConfig::new([16, 32], [4, 4]).with_padding(PaddingConfig2d::Valid);
        assert_eq!(maybe_conv2d_output_resolution([3, 3], &conv), None);
    }

    #[test]
    #[should_panic(expected = "No legal output resolution for conv2d")]
    fn test_expect_conv2d_output_resolution_panic() {
        let conv = Conv2dConfig::new([1, 1], [5, 5]);
        expect_conv2d_output_resolution([2, 2], &conv);
    }
}
