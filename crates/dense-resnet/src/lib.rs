#![warn(missing_docs)]
//!# dense-resnet - Dense skip-connection `ResNet` models for burn
//!
//! ## Notable Components
//!
//! * [`compat`] - compat code, for things ``burn`` does not provide.
//!   * [`compat::activation_wrapper::Activation`] - activation layer abstraction wrapper.
//!   * [`compat::conv_shape`] - conv output resolution arithmetic.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::dense::dense_conv`] - summed multi-input convolution.
//! * [`models`] - complete model families.
//!   * [`models::dense_resnet`] - `DenseResNet`
//! * [`prefabs`] - well-known config tables.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod compat;
pub mod layers;
pub mod models;
pub mod prefabs;
