//! leakbench-core: dataset model, variant generation, grading, and gap analysis.
//!
//! This crate holds everything needed to measure whether a model's benchmark
//! score survives surface-level rewording of the questions: deterministic
//! isomorphic variants, per-task parsing and scoring of free-text answers,
//! per-model aggregation, and the original-versus-isomorphic gap.

pub mod dataset;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod gap;
pub mod model;
pub mod prediction;
pub mod report;
pub mod scoring;
pub mod statistics;
pub mod traits;
pub mod variant;

pub use error::{DatasetError, ProviderError, ScoreError};
