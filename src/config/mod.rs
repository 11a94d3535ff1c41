//! Configuration module for Spine Tracker
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use spine_tracker::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("tracker.toml")).unwrap();
//! println!("Request spacing: {}ms", config.fetcher.request_spacing_ms);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, FetcherConfig, ScheduleConfig, ServerConfig, SourceConfig, StorageConfig,
    UserAgentConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
