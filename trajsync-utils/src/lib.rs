//! trajsync-utils: Common utilities shared across trajsync crates
//!
//! This crate provides:
//! - Unified error types ([`TrajsyncError`], [`Result`])
//! - Logging setup ([`init_logging`], [`LogConfig`])
//! - XDG-compliant path utilities ([`paths`] module)

pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Result, TrajsyncError};
pub use logging::{init_logging, log_file_path, LogConfig, LogOutput};
pub use paths::{config_dir, config_file, log_dir, state_dir};
