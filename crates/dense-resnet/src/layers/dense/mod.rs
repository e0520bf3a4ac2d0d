//! # Dense Connections
//!
//! Layers which consume a history of prior activations,
//! rather than only the most recent one.
pub mod dense_conv;
