//! Analyst Configuration Module
//!
//! Generator ratings, thresholds, scheduling and storage settings loaded
//! from TOML.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` on the command line
//! 2. `ANALYST_CONFIG` environment variable (path to TOML file)
//! 3. `analyst_config.toml` in the current working directory
//! 4. Built-in defaults from [`defaults`]
//!
//! The loaded config is passed explicitly to the components that need it;
//! there is no global.

mod analyst_config;
pub mod defaults;
pub mod validation;

pub use analyst_config::*;
