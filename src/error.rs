//! Error types for content sync operations

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::manifest::ManifestError;
use crate::staging::CommitError;

/// Main error type for sync operations
///
/// Every variant is terminal for the current attempt. The controller reports
/// exactly one of these to the notifier per failed attempt.
#[derive(Debug)]
pub enum SyncError {
	/// Version probe or manifest fetch failed
	Network(TransportError),

	/// Manifest body is malformed or missing
	ManifestParse { message: String },

	/// A specific file failed to transfer
	Download { path: String, source: TransportError },

	/// Promoting staged files or applying deletions failed
	Commit { path: PathBuf, source: io::Error },

	/// Another attempt is running on this controller
	AlreadyInProgress,

	/// Attempt was cancelled by the caller or timed out
	Cancelled,

	/// Invalid configuration
	InvalidConfig { message: String },

	/// Version store error (nested)
	State(StateError),

	/// I/O error
	Io(io::Error),
}

impl SyncError {
	/// Stable numeric code for the error kind, suitable for listeners that
	/// only want to switch on a number.
	pub fn code(&self) -> u32 {
		match self {
			SyncError::InvalidConfig { .. } => 1,
			SyncError::Network(_) => 2,
			SyncError::Download { .. } => 4,
			SyncError::ManifestParse { .. } => 5,
			SyncError::Commit { .. } => 6,
			SyncError::AlreadyInProgress => 7,
			SyncError::Cancelled => 8,
			SyncError::State(_) => 9,
			SyncError::Io(_) => 10,
		}
	}

	/// Whether the staging marker is expected to survive this error
	pub fn leaves_marker(&self) -> bool {
		matches!(self, SyncError::Download { .. } | SyncError::Commit { .. } | SyncError::Cancelled)
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Network(e) => write!(f, "Network error: {}", e),
			SyncError::ManifestParse { message } => {
				write!(f, "Manifest unavailable: {}", message)
			}
			SyncError::Download { path, source } => {
				write!(f, "Failed to download {}: {}", path, source)
			}
			SyncError::Commit { path, source } => {
				write!(f, "Commit failed at {}: {}", path.display(), source)
			}
			SyncError::AlreadyInProgress => write!(f, "Sync already in progress"),
			SyncError::Cancelled => write!(f, "Sync cancelled"),
			SyncError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
			SyncError::State(e) => write!(f, "State error: {}", e),
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for SyncError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			SyncError::Network(e) => Some(e),
			SyncError::Download { source, .. } => Some(source),
			SyncError::Commit { source, .. } => Some(source),
			SyncError::State(e) => Some(e),
			SyncError::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<StateError> for SyncError {
	fn from(e: StateError) -> Self {
		SyncError::State(e)
	}
}

impl From<ManifestError> for SyncError {
	fn from(e: ManifestError) -> Self {
		SyncError::ManifestParse { message: e.to_string() }
	}
}

impl From<CommitError> for SyncError {
	fn from(e: CommitError) -> Self {
		SyncError::Commit { path: e.path, source: e.source }
	}
}

/// Transport-specific errors
#[derive(Debug)]
pub enum TransportError {
	/// Remote resource does not exist
	NotFound { url: String },

	/// Remote answered with a non-success status
	Status { url: String, status: u16 },

	/// Request could not be sent or the body could not be read
	Request { url: String, source: Box<dyn Error + Send + Sync> },

	/// Source URL or path cannot be used
	InvalidUrl { url: String, message: String },

	/// Local I/O while writing the destination
	Io(io::Error),
}

impl fmt::Display for TransportError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransportError::NotFound { url } => write!(f, "Not found: {}", url),
			TransportError::Status { url, status } => {
				write!(f, "HTTP status {} from {}", status, url)
			}
			TransportError::Request { url, source } => {
				write!(f, "Request to {} failed: {}", url, source)
			}
			TransportError::InvalidUrl { url, message } => {
				write!(f, "Invalid source {}: {}", url, message)
			}
			TransportError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for TransportError {}

impl From<io::Error> for TransportError {
	fn from(e: io::Error) -> Self {
		TransportError::Io(e)
	}
}

/// Version store errors
#[derive(Debug)]
pub enum StateError {
	/// Failed to load state
	LoadFailed { source: Box<dyn Error + Send + Sync> },

	/// Failed to save state
	SaveFailed { source: Box<dyn Error + Send + Sync> },

	/// State file is corrupted
	Corrupted { message: String },
}

impl fmt::Display for StateError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StateError::LoadFailed { source } => write!(f, "Failed to load state: {}", source),
			StateError::SaveFailed { source } => write!(f, "Failed to save state: {}", source),
			StateError::Corrupted { message } => write!(f, "State corrupted: {}", message),
		}
	}
}

impl Error for StateError {}


// vim: ts=4
