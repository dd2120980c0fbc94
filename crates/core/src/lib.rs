//! Core library: content fingerprints, the dataset reconciler, the category
//! tree and the prediction flow.

pub mod app;
pub mod classifier;
pub mod config;
pub mod error;
pub mod export;
pub mod fingerprint;
pub mod hierarchy;
pub mod locks;
pub mod models;
pub mod reconciler;
pub mod remote;
pub mod scanner;
pub mod staging;
pub mod tree;

pub use error::{CuratorError, Result};
pub use fingerprint::Fingerprint;
pub use hierarchy::Hierarchy;
pub use models::{DatasetRecord, PredictionRecord};
pub use reconciler::{DuplicatePolicy, RecordKey, Reconciler};
