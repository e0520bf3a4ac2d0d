//! # Compat
//!
//! Wrappers and arithmetic that ``burn`` does not (yet) provide.
pub mod activation_wrapper;
pub mod conv_shape;
