//! Reupload detection over pre-extracted audio and visual features.
//!
//! Videos are compared pairwise per modality, the matrices are merged with
//! content-type rules, and connected components above the threshold become
//! clusters whose earliest upload is the original.

pub mod config;
pub mod core;
pub mod services;

pub use crate::config::{ConfigError, DetectionConfig};
pub use crate::core::{DetectionError, DetectionOrchestrator, DetectionReport, GroupedReport};
