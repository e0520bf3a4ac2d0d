//! # Dense Residual Block
//!
//! [`DenseBlock`] is the residual unit of [`super::DenseResNet`].
//! It is assembled from two [`Dense2d`] layers over a block-local
//! activation history:
//!
//! ```text
//! history = [x]
//! history.push(entry(history))         # conv_a(x)
//! history.push(act1(history[-1]))      # relu(conv_a(x))
//! y = act2(merge(history))             # relu(skip(x) + conv_b(relu(conv_a(x))))
//! ```
//!
//! | `downsample` | `conv_a` kernel | stride | `skip` kernel |
//! |--------------|-----------------|--------|---------------|
//! | `false`      | 3               | 1      | 1             |
//! | `true`       | 4               | 2      | 2             |
//!
//! `conv_a` is padded by 1, `skip` is unpadded, and `conv_b` is a
//! stride-1 "same" convolution; so both branches of `merge` agree on
//! resolution for every input size.
//!
//! [`DenseBlockMeta`] defines a common meta API for [`DenseBlock`]
//! and [`DenseBlockConfig`].

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::conv_shape::maybe_conv1d_output_size;
use crate::layers::dense::dense_conv::{Dense2d, Dense2dConfig, Dense2dMeta};
use crate::models::dense_resnet::util::{
    CONV_INTO_RELU_INITIALIZER, scalar_to_array, square_padding,
};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::Initializer;
use burn::nn::conv::Conv2dConfig;
use burn::prelude::{Backend, Config, Module, Tensor};

/// Kernel/stride layout of a [`DenseBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenseBlockGeometry {
    /// Kernel size of the entry conv.
    pub entry_kernel: usize,

    /// Padding of the entry conv.
    pub entry_padding: usize,

    /// Stride of the entry and skip convs.
    pub stride: usize,

    /// Kernel size of the skip conv.
    pub skip_kernel: usize,
}

impl DenseBlockGeometry {
    /// The geometry for a (non-)downsampling block.
    pub fn new(downsample: bool) -> Self {
        if downsample {
            Self {
                entry_kernel: 4,
                entry_padding: 1,
                stride: 2,
                skip_kernel: 2,
            }
        } else {
            Self {
                entry_kernel: 3,
                entry_padding: 1,
                stride: 1,
                skip_kernel: 1,
            }
        }
    }

    /// Predict the output resolution.
    ///
    /// # Returns
    ///
    /// ``Some([out_height, out_width])``; or `None` if the input is too small.
    pub fn maybe_output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]> {
        let mut output = input_resolution;
        for i in 0..2 {
            let entry = maybe_conv1d_output_size(
                input_resolution[i],
                self.entry_kernel,
                self.stride,
                self.entry_padding,
                1,
            )?;
            let skip =
                maybe_conv1d_output_size(input_resolution[i], self.skip_kernel, self.stride, 0, 1)?;
            if entry != skip {
                return None;
            }
            output[i] = entry;
        }
        Some(output)
    }
}

/// [`DenseBlock`] Meta trait.
pub trait DenseBlockMeta {
    /// The size of the in channels dimension.
    fn in_planes(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_planes(&self) -> usize;

    /// Does the block halve the resolution?
    fn downsample(&self) -> bool;

    /// The kernel/stride layout.
    fn geometry(&self) -> DenseBlockGeometry {
        DenseBlockGeometry::new(self.downsample())
    }

    /// The stride of the block.
    fn stride(&self) -> usize {
        self.geometry().stride
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[out_height, out_width]``
    ///
    /// # Panics
    ///
    /// If the input resolution is too small for the entry convolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        match self.geometry().maybe_output_resolution(input_resolution) {
            Some(resolution) => resolution,
            None => panic!(
                "No legal output resolution for DenseBlock(downsample={}) with input_resolution:{:?}",
                self.downsample(),
                input_resolution
            ),
        }
    }
}

/// [`DenseBlock`] Config.
///
/// Implements [`DenseBlockMeta`].
#[derive(Config, Debug)]
pub struct DenseBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// The size of the out channels dimension.
    pub out_planes: usize,

    /// Kernel size of the second conv on the residual path; must be odd.
    #[config(default = 3)]
    pub kernel_size: usize,

    /// Halve the resolution.
    #[config(default = "false")]
    pub downsample: bool,

    /// The [`Activation`] config.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,

    /// The [`Conv2d`](burn::nn::conv::Conv2d) initializer.
    #[config(default = "CONV_INTO_RELU_INITIALIZER.clone()")]
    pub initializer: Initializer,
}

impl DenseBlockMeta for DenseBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn out_planes(&self) -> usize {
        self.out_planes
    }

    fn downsample(&self) -> bool {
        self.downsample
    }
}

impl DenseBlockConfig {
    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.in_planes == 0 || self.out_planes == 0 {
            return Err(format!("planes must be > 0:\n{:#?}", self));
        }
        if self.kernel_size % 2 == 0 {
            return Err(format!(
                "kernel_size({}) must be odd:\n{:#?}",
                self.kernel_size, self
            ));
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        match self.try_validate() {
            Ok(_) => (),
            Err(err) => panic!("{}", err),
        }
    }

    /// The entry layer: ``Dense(conv_a)``.
    pub fn entry_config(&self) -> Dense2dConfig {
        let geometry = self.geometry();
        Conv2dConfig::new(
            [self.in_planes, self.out_planes],
            scalar_to_array(geometry.entry_kernel),
        )
        .with_stride(scalar_to_array(geometry.stride))
        .with_padding(square_padding(geometry.entry_padding))
        .with_initializer(self.initializer.clone())
        .into()
    }

    /// The merge layer: ``Dense(skip, None, conv_b)``.
    pub fn merge_config(&self) -> Dense2dConfig {
        let geometry = self.geometry();
        let skip = Conv2dConfig::new(
            [self.in_planes, self.out_planes],
            scalar_to_array(geometry.skip_kernel),
        )
        .with_stride(scalar_to_array(geometry.stride))
        .with_padding(square_padding(0))
        .with_initializer(self.initializer.clone());

        let conv_b = Conv2dConfig::new(
            [self.out_planes, self.out_planes],
            scalar_to_array(self.kernel_size),
        )
        .with_padding(square_padding(self.kernel_size / 2))
        .with_initializer(self.initializer.clone());

        vec![Some(skip), None, Some(conv_b)].into()
    }

    /// Initialize a [`DenseBlock`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> DenseBlock<B> {
        self.expect_valid();

        DenseBlock {
            entry: self.entry_config().init(device),
            act1: self.activation.init(device),
            merge: self.merge_config().init(device),
            act2: self.activation.init(device),
        }
    }
}

/// Dense Residual Block.
///
/// Implements [`DenseBlockMeta`].
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    /// ``Dense(conv_a)``
    pub entry: Dense2d<B>,

    /// Activation after the entry layer.
    pub act1: Activation<B>,

    /// ``Dense(skip, None, conv_b)``
    pub merge: Dense2d<B>,

    /// Activation after the merge layer.
    pub act2: Activation<B>,
}

impl<B: Backend> DenseBlockMeta for DenseBlock<B> {
    fn in_planes(&self) -> usize {
        self.entry.in_channels()[0].unwrap_or(0)
    }

    fn out_planes(&self) -> usize {
        self.merge.out_channels()
    }

    fn downsample(&self) -> bool {
        match &self.entry.branches[0] {
            Some(conv) => conv.stride[0] != 1,
            None => false,
        }
    }
}

impl<B: Backend> DenseBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_planes, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_planes", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_planes", self.in_planes())]
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let mut history = vec![input];

        let x = self.entry.forward(&history);
        history.push(x.clone());
        history.push(self.act1.forward(x));

        let x = self.merge.forward(&history);
        let x = self.act2.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }
}
