//! # `DenseResNet` Core Model
//!
//! [`DenseResNet`] is a small classification `ResNet` built from
//! [`DenseBlock`](super::dense_block::DenseBlock)s:
//!
//! ```text
//! stem:   conv3x3(in_channels -> 16), act
//! stage1: (1 + depth) blocks,     16 -> 16 * width
//! stage2: max(depth, 1) blocks,   16 * width -> 32 * width, /2
//! stage3: max(depth, 1) blocks,   32 * width -> 64 * width, /2
//! head:   flatten, linear(-> hidden_features), act, linear(-> num_classes)
//! ```
//!
//! [`DenseResNetContractConfig`] implements [`Config`], and provides
//! a high-level configuration interface.
//! It provides [`DenseResNetContractConfig::to_structure`] to convert
//! to a [`DenseResNetConfig`].
//!
//! [`DenseResNetConfig`] implements [`Config`], and provides
//! [`DenseResNetConfig::init`] to initialize a [`DenseResNet`].
//!
//! [`DenseResNet`] implements [`Module`], and provides
//! [`DenseResNet::forward`].

use crate::compat::activation_wrapper::{Activation, ActivationConfig};
use crate::compat::conv_shape::maybe_conv2d_output_resolution;
use crate::layers::dense::dense_conv::zero_conv_bias;
use crate::models::dense_resnet::dense_stage::{DenseStage, DenseStageConfig, DenseStageMeta};
use crate::models::dense_resnet::util::{
    CONV_INTO_RELU_INITIALIZER, scalar_to_array, square_padding,
};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Linear, LinearConfig};
use burn::prelude::{Backend, Config, Tensor};

/// Channels produced by the stem.
pub const STEM_PLANES: usize = 16;

/// Per-stage base planes; scaled by `width`.
pub const STAGE_BASE_PLANES: [usize; 3] = [16, 32, 64];

/// High-level `DenseResNet` model configuration.
#[derive(Config, Debug)]
pub struct DenseResNetContractConfig {
    /// Number of input image channels.
    pub in_channels: usize,

    /// Input image height and width.
    ///
    /// 28 selects the padded stem (28 -> 32).
    pub input_resolution: usize,

    /// Channel width multiplier.
    #[config(default = 1)]
    pub width: usize,

    /// Extra blocks per stage.
    #[config(default = 1)]
    pub depth: usize,

    /// Number of classification classes.
    #[config(default = 10)]
    pub num_classes: usize,

    /// Hidden features of the classifier head.
    #[config(default = 1000)]
    pub hidden_features: usize,

    /// The [`Activation`] config.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,
}

impl From<DenseResNetContractConfig> for DenseResNetConfig {
    fn from(config: DenseResNetContractConfig) -> Self {
        config.to_structure()
    }
}

impl DenseResNetContractConfig {
    /// The stem padding for this input resolution.
    pub fn stem_padding(&self) -> usize {
        if self.input_resolution == 28 { 3 } else { 1 }
    }

    /// Convert to a [`DenseResNetConfig`].
    pub fn to_structure(&self) -> DenseResNetConfig {
        let planes = STAGE_BASE_PLANES.map(|p| p * self.width);
        let tail = self.depth.saturating_sub(1);

        let stem = Conv2dConfig::new([self.in_channels, STEM_PLANES], scalar_to_array(3))
            .with_padding(square_padding(self.stem_padding()))
            .with_initializer(CONV_INTO_RELU_INITIALIZER.clone());

        let stages = vec![
            DenseStageConfig::build(1 + self.depth, STEM_PLANES, planes[0], false),
            DenseStageConfig::build(1 + tail, planes[0], planes[1], true),
            DenseStageConfig::build(1 + tail, planes[1], planes[2], true),
        ]
        .into_iter()
        .map(|stage| stage.with_activation(self.activation.clone()))
        .collect();

        let config = DenseResNetConfig::new(
            scalar_to_array(self.input_resolution),
            stem,
            stages,
            self.hidden_features,
            self.num_classes,
        )
        .with_activation(self.activation.clone());

        tracing::debug!(
            width = self.width,
            depth = self.depth,
            head_features = ?config.maybe_head_features(),
            "lowered DenseResNet contract config"
        );

        config
    }
}

/// [`DenseResNet`] Meta trait.
pub trait DenseResNetMeta {
    /// Number of input image channels.
    fn in_channels(&self) -> usize;

    /// Planes of the final feature map.
    fn feature_planes(&self) -> usize;

    /// Number of classification classes.
    fn num_classes(&self) -> usize;
}

/// [`DenseResNet`] Structure Config.
///
/// This config defines the explicit layer structure; see
/// [`DenseResNetConfig::try_validate`] for the checks run before init.
#[derive(Config, Debug)]
pub struct DenseResNetConfig {
    /// Input ``[height, width]``.
    pub input_resolution: [usize; 2],

    /// The stem convolution.
    pub stem: Conv2dConfig,

    /// The stages.
    pub stages: Vec<DenseStageConfig>,

    /// Hidden features of the classifier head.
    pub hidden_features: usize,

    /// Number of classification classes.
    pub num_classes: usize,

    /// Activation used by the stem and the head.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,
}

impl DenseResNetMeta for DenseResNetConfig {
    fn in_channels(&self) -> usize {
        self.stem.channels[0]
    }

    fn feature_planes(&self) -> usize {
        match self.stages.last() {
            Some(stage) if !stage.is_empty() => stage.out_planes(),
            _ => self.stem.channels[1],
        }
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl DenseResNetConfig {
    /// Predict the ``[height, width]`` of the final feature map.
    pub fn maybe_feature_resolution(&self) -> Option<[usize; 2]> {
        let res = maybe_conv2d_output_resolution(self.input_resolution, &self.stem)?;
        self.stages
            .iter()
            .try_fold(res, |res, stage| stage.maybe_output_resolution(res))
    }

    /// Predict the number of flattened features entering the head.
    ///
    /// ``feature_planes * feature_height * feature_width``
    pub fn maybe_head_features(&self) -> Option<usize> {
        let [h, w] = self.maybe_feature_resolution()?;
        Some(self.feature_planes() * h * w)
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.stages.is_empty() {
            return Err("stages is empty".to_string());
        }

        if self.stem.channels.contains(&0) {
            return Err(format!(
                "stem channels must be > 0: {:?}",
                self.stem.channels
            ));
        }

        let mut planes = self.stem.channels[1];
        for (idx, stage) in self.stages.iter().enumerate() {
            stage
                .try_validate()
                .map_err(|err| format!("stage[{}]: {}", idx, err))?;
            if stage.in_planes() != planes {
                return Err(format!(
                    "stage[{}].in_planes({}) != previous out_planes({})",
                    idx,
                    stage.in_planes(),
                    planes,
                ));
            }
            planes = stage.out_planes();
        }

        if self.maybe_feature_resolution().is_none() {
            return Err(format!(
                "input_resolution {:?} is too small for the stem and stages",
                self.input_resolution
            ));
        }
        if self.hidden_features == 0 || self.num_classes == 0 {
            return Err(format!(
                "hidden_features({}) and num_classes({}) must be > 0",
                self.hidden_features, self.num_classes
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

    /// Initialize a [`DenseResNet`] model.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> DenseResNet<B> {
        self.expect_valid();

        let head_features = self.maybe_head_features().unwrap_or_default();
        tracing::debug!(head_features, "initializing DenseResNet");

        DenseResNet {
            stem: zero_conv_bias(self.stem.init(device)),
            stem_act: self.activation.init(device),
            stages: self
                .stages
                .into_iter()
                .map(|stage| stage.init(device))
                .collect(),
            fc1: LinearConfig::new(head_features, self.hidden_features).init(device),
            fc_act: self.activation.init(device),
            fc2: LinearConfig::new(self.hidden_features, self.num_classes).init(device),
        }
    }
}

/// Dense-block `ResNet` classifier.
///
/// Implements [`DenseResNetMeta`].
#[derive(Module, Debug)]
pub struct DenseResNet<B: Backend> {
    /// The stem convolution.
    pub stem: Conv2d<B>,

    /// The stem activation.
    pub stem_act: Activation<B>,

    /// The stages.
    pub stages: Vec<DenseStage<B>>,

    /// First head layer.
    pub fc1: Linear<B>,

    /// Head activation.
    pub fc_act: Activation<B>,

    /// Classifier layer.
    pub fc2: Linear<B>,
}

impl<B: Backend> DenseResNetMeta for DenseResNet<B> {
    fn in_channels(&self) -> usize {
        self.stem.weight.shape().dims[1] * self.stem.groups
    }

    fn feature_planes(&self) -> usize {
        match self.stages.last() {
            Some(stage) => stage.out_planes(),
            None => self.stem.weight.shape().dims[0],
        }
    }

    fn num_classes(&self) -> usize {
        self.fc2.weight.shape().dims[1]
    }
}

impl<B: Backend> DenseResNet<B> {
    /// Flattened features expected by the head.
    pub fn head_features(&self) -> usize {
        self.fc1.weight.shape().dims[0]
    }

    /// Feature extraction; the stem and stages.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, feature_planes, feature_height, feature_width]``
    pub fn forward_features(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch] = unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch"],
            &[("in_channels", self.in_channels())]
        );

        let x = self.stem.forward(input);
        let x = self.stem_act.forward(x);

        let x = self
            .stages
            .iter()
            .fold(x, |x, stage| stage.forward(x));

        assert_shape_contract_periodically!(
            ["batch", "feature_planes", "feature_height", "feature_width"],
            &x,
            &[("batch", batch), ("feature_planes", self.feature_planes())]
        );

        x
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, num_classes]`` logits.
    #[tracing::instrument(skip_all)]
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        let x = self.forward_features(input);

        let x: Tensor<B, 2> = x.flatten(1, 3);
        let [batch] = unpack_shape_contract!(
            ["batch", "features"],
            &x,
            &["batch"],
            &[("features", self.head_features())]
        );

        let x = self.fc1.forward(x);
        let x = self.fc_act.forward(x);
        let x = self.fc2.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "num_classes"],
            &x,
            &[("batch", batch), ("num_classes", self.num_classes())]
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dense_resnet::dense_block::DenseBlockMeta;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::{Distribution, ElementConversion};
    use hamcrest::prelude::*;

    #[test]
    fn test_contract_config_defaults() {
        let config = DenseResNetContractConfig::new(1, 28);
        assert_eq!(config.width, 1);
        assert_eq!(config.depth, 1);
        assert_eq!(config.num_classes, 10);
        assert_eq!(config.hidden_features, 1000);
        assert_eq!(config.stem_padding(), 3);
        assert_eq!(DenseResNetContractConfig::new(3, 32).stem_padding(), 1);
    }

    #[test]
    fn test_to_structure() {
        let config = DenseResNetContractConfig::new(1, 28)
            .with_width(2)
            .with_depth(2)
            .to_structure();

        assert_eq!(config.in_channels(), 1);
        assert_eq!(config.stem.channels, [1, 16]);
        assert_eq!(config.stages.len(), 3);

        let lens: Vec<usize> = config.stages.iter().map(|s| s.len()).collect();
        assert_eq!(lens, vec![3, 2, 2]);

        let planes: Vec<(usize, usize)> = config
            .stages
            .iter()
            .map(|s| (s.in_planes(), s.out_planes()))
            .collect();
        assert_eq!(planes, vec![(16, 32), (32, 64), (64, 128)]);

        assert!(!config.stages[0].blocks[0].downsample());
        assert!(config.stages[1].blocks[0].downsample());
        assert!(config.stages[2].blocks[0].downsample());

        assert_eq!(config.maybe_feature_resolution(), Some([8, 8]));
        assert_eq!(config.maybe_head_features(), Some(128 * 8 * 8));
        config.expect_valid();
    }

    #[test]
    fn test_head_features_match_fixed_layout() {
        // 28x28 is padded to 32x32 by the stem; both end at 8x8.
        for (in_channels, input_resolution) in [(1, 28), (3, 32)] {
            for width in [1, 4] {
                let config = DenseResNetContractConfig::new(in_channels, input_resolution)
                    .with_width(width)
                    .to_structure();
                assert_eq!(config.maybe_head_features(), Some(64 * width * 8 * 8));
            }
        }
    }

    #[test]
    fn test_zero_depth() {
        let config = DenseResNetContractConfig::new(3, 32)
            .with_depth(0)
            .to_structure();
        let lens: Vec<usize> = config.stages.iter().map(|s| s.len()).collect();
        assert_eq!(lens, vec![1, 1, 1]);
    }

    #[test]
    fn test_validation() {
        let config = DenseResNetContractConfig::new(3, 32).to_structure();

        let mut tiny = config.clone();
        tiny.input_resolution = [1, 1];
        let err = tiny.try_validate().unwrap_err();
        assert!(err.contains("is too small"), "{err}");

        let mut empty = config.clone();
        empty.stages.clear();
        let err = empty.try_validate().unwrap_err();
        assert_eq!(err, "stages is empty");

        let mut swapped = config;
        swapped.stages.swap(1, 2);
        let err = swapped.try_validate().unwrap_err();
        assert!(err.contains("stage[1].in_planes(32) != previous out_planes(16)"), "{err}");
    }

    #[test]
    fn test_zero_sizes_are_invalid() {
        let err = DenseResNetContractConfig::new(1, 28)
            .with_width(0)
            .to_structure()
            .try_validate()
            .unwrap_err();
        assert!(err.starts_with("stage[0]: "), "{err}");
        assert!(err.contains("planes must be > 0"), "{err}");

        let err = DenseResNetContractConfig::new(0, 28)
            .to_structure()
            .try_validate()
            .unwrap_err();
        assert_eq!(err, "stem channels must be > 0: [0, 16]");
    }

    #[test]
    fn test_config_save_load() {
        let config = DenseResNetContractConfig::new(3, 32)
            .with_width(2)
            .with_num_classes(100);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dense_resnet.json");
        config.save(&path).unwrap();

        let loaded = DenseResNetContractConfig::load(&path).unwrap();
        assert_eq!(loaded.in_channels, 3);
        assert_eq!(loaded.input_resolution, 32);
        assert_eq!(loaded.width, 2);
        assert_eq!(loaded.num_classes, 100);
        assert_eq!(loaded.to_string(), config.to_string());
    }

    #[test]
    fn test_forward_mnist_shape() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: DenseResNet<B> = DenseResNetContractConfig::new(1, 28)
            .to_structure()
            .init(&device);

        assert_eq!(model.in_channels(), 1);
        assert_eq!(model.feature_planes(), 64);
        assert_eq!(model.num_classes(), 10);
        assert_eq!(model.head_features(), 64 * 8 * 8);

        let input = Tensor::random([8, 1, 28, 28], Distribution::Normal(0.0, 1.0), &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [8, 10]);
    }

    #[test]
    fn test_forward_features() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: DenseResNet<B> = DenseResNetContractConfig::new(3, 16)
            .with_depth(0)
            .with_hidden_features(8)
            .to_structure()
            .init(&device);

        let input = Tensor::random([2, 3, 16, 16], Distribution::Default, &device);
        let features = model.forward_features(input);
        assert_shape_contract!(
            ["batch", "planes", "height", "width"],
            &features,
            &[
                ("batch", 2),
                ("planes", 64),
                ("height", 4),
                ("width", 4)
            ]
        );
    }

    #[test]
    fn test_stem_init() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: DenseResNet<B> = DenseResNetContractConfig::new(3, 32)
            .with_hidden_features(4)
            .to_structure()
            .init(&device);

        let bias = model.stem.bias.as_ref().unwrap().val();
        let total: f64 = bias.abs().sum().into_scalar().elem();
        assert_eq!(total, 0.0);

        let weight = model.stem.weight.val();
        let rms: f64 = weight
            .powf_scalar(2.0)
            .mean()
            .into_scalar()
            .elem::<f64>()
            .sqrt();
        let expected = (2.0 / (3.0 * 3.0 * 16.0_f64)).sqrt();
        // Only 432 samples; a loose relative bound.
        assert_that!(rms, close_to(expected, 0.25));
    }

    #[test]
    fn test_backward_reaches_stem() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let model: DenseResNet<B> = DenseResNetContractConfig::new(1, 8)
            .with_depth(0)
            .with_hidden_features(16)
            .to_structure()
            .init(&device);
        assert_eq!(model.head_features(), 64 * 2 * 2);

        let input = Tensor::random([2, 1, 8, 8], Distribution::Default, &device);
        let output = model.forward(input);
        assert_eq!(output.dims(), [2, 10]);

        let grads = output.sum().backward();
        assert!(model.stem.weight.grad(&grads).is_some());
        assert!(model.fc2.weight.grad(&grads).is_some());
    }
}
