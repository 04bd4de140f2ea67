//! Validation of configuration values and manifest paths
//!
//! - Configuration: timeouts, manifest name, source location
//! - Paths: manifest entry paths, containment in the live tree

use std::error::Error;
use std::fmt;

use crate::error::SyncError;

pub mod config;
pub mod path;

pub use config::*;
pub use path::*;

/// Generic validation error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
	/// Invalid configuration
	ConfigError(String),
	/// Invalid path
	PathError(String),
}

impl fmt::Display for ValidationError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ValidationError::ConfigError(msg) => write!(f, "Config validation error: {}", msg),
			ValidationError::PathError(msg) => write!(f, "Path validation error: {}", msg),
		}
	}
}

impl Error for ValidationError {}

/// Settings that fail validation make the whole configuration unusable
impl From<ValidationError> for SyncError {
	fn from(e: ValidationError) -> Self {
		SyncError::InvalidConfig { message: e.to_string() }
	}
}


// vim: ts=4
