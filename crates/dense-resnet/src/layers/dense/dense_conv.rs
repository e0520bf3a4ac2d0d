//! # `Dense2d` - summed multi-input convolution.
//!
//! A [`Dense2d`] layer holds an ordered list of optional [`Conv2d`] branches.
//! It is applied to the trailing entries of a history of prior activations
//! (oldest first); each present branch convolves its matching entry,
//! and the branch outputs are summed.
//!
//! ```text
//! history: [.., x_{n-k}, .., x_{n-1}]
//! branches:    [W_0,   .., W_{k-1}]
//! output = sum(W_i(x_{n-k+i}) for present W_i)
//! ```
//!
//! An absent branch skips its history entry; so ``[Some(skip), None, Some(conv)]``
//! applied to ``[x, a, r]`` is ``skip(x) + conv(r)``.
//!
//! [`Dense2dConfig`] implements [`Config`], and provides
//! [`Dense2dConfig::init`] to initialize a [`Dense2d`].

use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::Initializer;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::prelude::{Backend, Tensor};

/// [`Dense2d`] Meta.
pub trait Dense2dMeta {
    /// The number of history entries consumed.
    fn arity(&self) -> usize;

    /// Per-branch input channels; `None` for absent branches.
    fn in_channels(&self) -> Vec<Option<usize>>;

    /// Number of output channels.
    ///
    /// Taken from the first present branch.
    fn out_channels(&self) -> usize;
}

/// [`Dense2d`] Config.
///
/// Implements [`Dense2dMeta`].
#[derive(Config, Debug)]
pub struct Dense2dConfig {
    /// The branch convolutions; `None` skips the matching history entry.
    pub branches: Vec<Option<Conv2dConfig>>,

    /// Zero the conv biases after initialization.
    #[config(default = "true")]
    pub zero_bias: bool,
}

impl From<Vec<Option<Conv2dConfig>>> for Dense2dConfig {
    fn from(branches: Vec<Option<Conv2dConfig>>) -> Self {
        Self::new(branches)
    }
}

impl From<Conv2dConfig> for Dense2dConfig {
    fn from(conv: Conv2dConfig) -> Self {
        Self::new(vec![Some(conv)])
    }
}

impl Dense2dMeta for Dense2dConfig {
    fn arity(&self) -> usize {
        self.branches.len()
    }

    fn in_channels(&self) -> Vec<Option<usize>> {
        self.branches
            .iter()
            .map(|b| b.as_ref().map(|conv| conv.channels[0]))
            .collect()
    }

    fn out_channels(&self) -> usize {
        self.present()
            .next()
            .map(|conv| conv.channels[1])
            .unwrap_or(0)
    }
}

impl Dense2dConfig {
    fn present(&self) -> impl Iterator<Item = &Conv2dConfig> {
        self.branches.iter().flatten()
    }

    /// Check if the config is valid.
    ///
    /// # Returns
    ///
    /// A `Result<(), String>`
    pub fn try_validate(&self) -> Result<(), String> {
        if self.present().next().is_none() {
            return Err(format!("Dense2d has no present branches:\n{:#?}", self));
        }

        let out_channels = self.out_channels();
        for (idx, conv) in self.branches.iter().enumerate() {
            if let Some(conv) = conv {
                if conv.channels[1] != out_channels {
                    return Err(format!(
                        "branch[{}].out_channels({}) != out_channels({})\n{:#?}",
                        idx, conv.channels[1], out_channels, self,
                    ));
                }
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

    /// Replace the initializer on every present branch.
    pub fn with_initializer(
        self,
        initializer: Initializer,
    ) -> Self {
        Self {
            branches: self
                .branches
                .into_iter()
                .map(|b| b.map(|conv| conv.with_initializer(initializer.clone())))
                .collect(),
            ..self
        }
    }

    /// Initialize a [`Dense2d`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> Dense2d<B> {
        self.expect_valid();

        let zero_bias = self.zero_bias;
        Dense2d {
            branches: self
                .branches
                .into_iter()
                .map(|b| {
                    b.map(|conv| {
                        let conv = conv.init(device);
                        if zero_bias {
                            zero_conv_bias(conv)
                        } else {
                            conv
                        }
                    })
                })
                .collect(),
        }
    }
}

/// Zero the bias of a [`Conv2d`], if it has one.
pub fn zero_conv_bias<B: Backend>(mut conv: Conv2d<B>) -> Conv2d<B> {
    conv.bias = conv
        .bias
        .take()
        .map(|bias| bias.map(|tensor| tensor.zeros_like()));
    conv
}

fn conv_in_channels<B: Backend>(conv: &Conv2d<B>) -> usize {
    conv.weight.shape().dims[1] * conv.groups
}

fn conv_out_channels<B: Backend>(conv: &Conv2d<B>) -> usize {
    conv.weight.shape().dims[0]
}

/// Summed multi-input convolution.
///
/// Implements [`Dense2dMeta`].
#[derive(Module, Debug)]
pub struct Dense2d<B: Backend> {
    /// The branch convolutions.
    pub branches: Vec<Option<Conv2d<B>>>,
}

impl<B: Backend> Dense2dMeta for Dense2d<B> {
    fn arity(&self) -> usize {
        self.branches.len()
    }

    fn in_channels(&self) -> Vec<Option<usize>> {
        self.branches
            .iter()
            .map(|b| b.as_ref().map(conv_in_channels))
            .collect()
    }

    fn out_channels(&self) -> usize {
        self.branches
            .iter()
            .flatten()
            .next()
            .map(conv_out_channels)
            .unwrap_or(0)
    }
}

impl<B: Backend> Dense2d<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `history`: prior activations, oldest first;
    ///   the trailing ``arity()`` entries are consumed.
    ///   Each consumed entry is ``[batch, in_channels[i], in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    ///
    /// # Panics
    ///
    /// If the history is shorter than ``arity()``,
    /// or the branch shapes disagree.
    pub fn forward(
        &self,
        history: &[Tensor<B, 4>],
    ) -> Tensor<B, 4> {
        let arity = self.arity();
        assert!(
            history.len() >= arity,
            "Dense2d of arity {} applied to a history of length {}",
            arity,
            history.len()
        );
        let inputs = &history[history.len() - arity..];

        let mut acc: Option<(Tensor<B, 4>, [usize; 3])> = None;
        for (conv, input) in self.branches.iter().zip(inputs) {
            let Some(conv) = conv else { continue };

            let [batch] = unpack_shape_contract!(
                ["batch", "in_channels", "in_height", "in_width"],
                input,
                &["batch"],
                &[("in_channels", conv_in_channels(conv))]
            );

            let y = conv.forward(input.clone());

            acc = Some(match acc {
                None => {
                    let [out_height, out_width] = unpack_shape_contract!(
                        ["batch", "out_channels", "out_height", "out_width"],
                        &y,
                        &["out_height", "out_width"],
                        &[("batch", batch), ("out_channels", self.out_channels())]
                    );
                    (y, [batch, out_height, out_width])
                }
                Some((sum, shape)) => {
                    let [batch, out_height, out_width] = shape;
                    assert_shape_contract_periodically!(
                        ["batch", "out_channels", "out_height", "out_width"],
                        &y,
                        &[
                            ("batch", batch),
                            ("out_channels", self.out_channels()),
                            ("out_height", out_height),
                            ("out_width", out_width)
                        ]
                    );
                    (sum + y, shape)
                }
            });
        }

        match acc {
            Some((sum, _)) => sum,
            None => panic!("Dense2d has no present branches"),
        }
    }
}
