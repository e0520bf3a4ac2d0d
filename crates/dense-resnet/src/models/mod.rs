//! Complete model families.
pub mod dense_resnet;
