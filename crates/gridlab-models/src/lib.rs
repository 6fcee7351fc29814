//! Model backend implementations for GridLab.
//!
//! This crate provides concrete implementations of the `ModelBackend` trait.
//!
//! # Supported Backends
//!
//! - **Boosted tree**: second-order gradient boosting with early stopping
//! - **Random forest**: bagged CART trees (gini / variance)
//! - **Linear**: least squares regression, logistic / softmax classification
//!
//! Every backend persists itself as a self-describing JSON blob, so
//! [`ModelFactory::load`] can restore a model without being told its kind.

pub mod blob;
pub mod boosted;
pub mod factory;
pub mod forest;
pub mod labels;
pub mod linear;
mod tree;

pub use blob::{BlobHeader, read_header, BLOB_FORMAT, BLOB_VERSION};
pub use boosted::BoostedTreeModel;
pub use factory::ModelFactory;
pub use forest::RandomForestModel;
pub use labels::{inject_class_count, resolve_class_count};
pub use linear::LinearModel;
