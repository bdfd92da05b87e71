//! Image similarity evaluation library
//!
//! Provides retrieval metrics, probe/reference matching strategies and a PCA
//! projector for evaluating learned image features.

pub mod benchmark;
pub mod config;
pub mod error;
pub mod features;
pub mod io;
pub mod matching;
pub mod pca;
pub mod pipeline;
pub mod report;

pub use error::EvalError;
