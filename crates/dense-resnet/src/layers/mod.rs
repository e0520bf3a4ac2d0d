//! Reusable neural network modules.
pub mod dense;
