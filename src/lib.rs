//! Heart-attack risk scoring: CSV patient records in, 0/1 risk out.
//!
//! Records are canonicalized ([`loader`]), imputed, scaled and one-hot
//! encoded ([`preprocess`]), then scored by a random forest ([`model`]).
//! [`pipeline::ScoringPipeline`] bundles the fitted pieces and
//! [`server`] exposes them over HTTP.

pub mod config;
pub mod error;
pub mod loader;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod records;
pub mod server;

pub use error::{Result, RiskError};
