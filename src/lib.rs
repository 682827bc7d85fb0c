//! Launchwatch
//!
//! Token launch monitoring and qualification pipeline: detect new listings,
//! monitor each for a fixed window with periodic re-scoring, finalize an
//! accept/reject decision at expiry, then track prediction accuracy against
//! realized outcomes.

pub mod accuracy;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod market_data;
pub mod monitor;
pub mod scoring;
pub mod service;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
