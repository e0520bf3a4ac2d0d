//! # `DenseResNet`
//!
//! A `ResNet` variant whose residual blocks sum parallel convolution
//! branches over a short history of activations,
//! sized for 28x28 and 32x32 classification inputs.
//!
//! * [`dense_resnet_model`] - the model, and its contract/structure configs.
//! * [`dense_stage`] - a run of blocks at one width.
//! * [`dense_block`] - the residual unit.
//! * [`prefabs`] - named well-known configs.

pub mod dense_block;
pub mod dense_resnet_model;
pub mod dense_stage;
pub mod prefabs;
pub mod util;

pub use dense_resnet_model::*;
pub use prefabs::PREFAB_DENSE_RESNET_MAP;
