//! Teachable image classifier: capture labeled feature vectors, recognize live frames with
//! k-nearest neighbors, and persist the trained model as one JSON record.

pub mod capture;
pub mod classifier;
pub mod config;
pub mod detector;
pub mod embedding;
pub mod error;
pub mod feed;
pub mod persistence;
pub mod recognition;
pub mod session;
pub mod storage;
pub mod store;
pub mod vector_ops;

#[cfg(test)]
mod testing;

pub use error::{GlanceError, Result, Severity};
