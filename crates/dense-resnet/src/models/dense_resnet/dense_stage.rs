//! # Dense `ResNet` Stage
//!
//! A [`DenseStage`] is a sequence of [`DenseBlock`]s;
//! only the first block of a stage changes planes or resolution.

use crate::compat::activation_wrapper::ActivationConfig;
use crate::models::dense_resnet::dense_block::{DenseBlock, DenseBlockConfig, DenseBlockMeta};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::prelude::{Backend, Module, Tensor};

/// [`DenseStage`] Meta API.
pub trait DenseStageMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the stage is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Returns
    ///
    /// ``Some([out_height, out_width])``; or `None` if any block would shrink it to nothing.
    fn maybe_output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]>;
}

/// [`DenseStage`] Configuration.
#[derive(Config, Debug)]
pub struct DenseStageConfig {
    /// The component blocks.
    pub blocks: Vec<DenseBlockConfig>,
}

impl From<Vec<DenseBlockConfig>> for DenseStageConfig {
    fn from(blocks: Vec<DenseBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl DenseStageMeta for DenseStageConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn maybe_output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]> {
        self.blocks.iter().try_fold(input_resolution, |res, block| {
            block.geometry().maybe_output_resolution(res)
        })
    }
}

impl DenseStageConfig {
    /// Build a stage config.
    ///
    /// The first block maps ``in_planes -> out_planes`` and optionally downsamples;
    /// the remaining ``num_blocks - 1`` blocks map ``out_planes -> out_planes``.
    pub fn build(
        num_blocks: usize,
        in_planes: usize,
        out_planes: usize,
        downsample: bool,
    ) -> Self {
        let blocks = (0..num_blocks)
            .map(|b| {
                if b == 0 {
                    DenseBlockConfig::new(in_planes, out_planes).with_downsample(downsample)
                } else {
                    DenseBlockConfig::new(out_planes, out_planes)
                }
            })
            .collect();

        Self { blocks }
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("blocks is empty".to_string());
        }

        for (idx, block) in self.blocks.iter().enumerate() {
            block
                .try_validate()
                .map_err(|err| format!("block[{}]: {}", idx, err))?;
        }

        for idx in 1..self.blocks.len() {
            let prev = &self.blocks[idx - 1];
            let curr = &self.blocks[idx];
            if prev.out_planes() != curr.in_planes() {
                return Err(format!(
                    "block[{}].out_planes({}) != block[{}].in_planes({})\n{:#?}",
                    idx - 1,
                    prev.out_planes(),
                    idx,
                    curr.in_planes(),
                    self,
                ));
            }
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

    /// Apply a mapping over the blocks.
    pub fn map_blocks<F>(
        self,
        f: &mut F,
    ) -> Self
    where
        F: FnMut(usize, DenseBlockConfig) -> DenseBlockConfig,
    {
        Self {
            blocks: self
                .blocks
                .into_iter()
                .enumerate()
                .map(|(idx, block)| f(idx, block))
                .collect(),
        }
    }

    /// Update the activation of every block.
    pub fn with_activation(
        self,
        activation: ActivationConfig,
    ) -> Self {
        self.map_blocks(&mut |_, block| block.with_activation(activation.clone()))
    }

    /// Initialize a new [`DenseStage`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> DenseStage<B> {
        self.expect_valid();

        DenseStage {
            blocks: self
                .blocks
                .into_iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }
}

/// Dense `ResNet` stage.
#[derive(Module, Debug)]
pub struct DenseStage<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<DenseBlock<B>>,
}

impl<B: Backend> DenseStageMeta for DenseStage<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn maybe_output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> Option<[usize; 2]> {
        self.blocks.iter().try_fold(input_resolution, |res, block| {
            block.geometry().maybe_output_resolution(res)
        })
    }
}

impl<B: Backend> DenseStage<B> {
    /// Apply the stage.
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

        let x = self
            .blocks
            .iter()
            .fold(input, |x, block| block.forward(x));

        if let Some([out_height, out_width]) = self.maybe_output_resolution([in_height, in_width]) {
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
        }

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use burn::nn::LeakyReluConfig;

    #[test]
    fn test_build() {
        let config = DenseStageConfig::build(3, 16, 32, true);
        assert_eq!(config.len(), 3);
        assert_eq!(config.in_planes(), 16);
        assert_eq!(config.out_planes(), 32);
        assert!(config.blocks[0].downsample);
        assert!(!config.blocks[1].downsample);
        assert!(!config.blocks[2].downsample);
        assert_eq!(config.blocks[1].in_planes, 32);
        assert_eq!(config.maybe_output_resolution([32, 32]), Some([16, 16]));
        config.expect_valid();
    }

    #[test]
    fn test_validation() {
        let err = DenseStageConfig::new(vec![]).try_validate().unwrap_err();
        assert_eq!(err, "blocks is empty");

        let config: DenseStageConfig = vec![
            DenseBlockConfig::new(16, 32),
            DenseBlockConfig::new(16, 32),
        ]
        .into();
        let err = config.try_validate().unwrap_err();
        assert!(err.contains("block[0].out_planes(32) != block[1].in_planes(16)"), "{err}");

        let config: DenseStageConfig = vec![DenseBlockConfig::new(16, 32).with_kernel_size(2)].into();
        let err = config.try_validate().unwrap_err();
        assert!(err.starts_with("block[0]: kernel_size(2) must be odd"), "{err}");
    }

    #[test]
    fn test_with_activation() {
        let config = DenseStageConfig::build(2, 4, 4, false)
            .with_activation(LeakyReluConfig::new().into());
        for block in &config.blocks {
            assert!(matches!(block.activation, ActivationConfig::LeakyRelu(_)));
        }
    }

    #[test]
    fn test_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let stage: DenseStage<B> = DenseStageConfig::build(2, 2, 4, true).init(&device);
        assert_eq!(stage.len(), 2);
        assert_eq!(stage.in_planes(), 2);
        assert_eq!(stage.out_planes(), 4);

        let input = Tensor::ones([2, 2, 8, 8], &device);
        let output = stage.forward(input);

        assert_shape_contract!(
            ["batch", "out_planes", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_planes", 4),
                ("out_height", 4),
                ("out_width", 4)
            ]
        );
    }
}
