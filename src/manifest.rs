//! Manifest model: the authoritative remote file list
//!
//! A manifest is parsed once from the remote document and never mutated
//! afterwards. The document format is a JSON object:
//!
//! ```json
//! {
//!   "files": [ { "path": "img/logo.png", "etag": "\"9b2c\"", "size": 1024 } ],
//!   "lastUpdatedDate": 1421884800000
//! }
//! ```
//!
//! `etag` is an opaque version tag, compared by equality only.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::path::Path;

use crate::validation::validate_entry_path;

/// A single remote file: identity is `path`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileEntry {
	path: String,
	#[serde(rename = "etag")]
	version_tag: String,
	size: u64,
}

impl FileEntry {
	pub fn new(path: impl Into<String>, version_tag: impl Into<String>, size: u64) -> Self {
		FileEntry { path: path.into(), version_tag: version_tag.into(), size }
	}

	/// Relative path, `/`-separated
	pub fn path(&self) -> &str {
		&self.path
	}

	pub fn version_tag(&self) -> &str {
		&self.version_tag
	}

	pub fn size(&self) -> u64 {
		self.size
	}

	/// Location of this entry below `root`
	pub fn local_path(&self, root: &Path) -> std::path::PathBuf {
		self.path
			.split('/')
			.filter(|part| !part.is_empty())
			.fold(root.to_path_buf(), |acc, part| acc.join(part))
	}
}

/// Ordered list of remote files plus the time the list was produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
	#[serde(rename = "files")]
	entries: Vec<FileEntry>,

	/// Milliseconds since the Unix epoch
	#[serde(rename = "lastUpdatedDate", default)]
	last_updated: u64,
}

impl Manifest {
	pub fn new(entries: Vec<FileEntry>, last_updated: u64) -> Self {
		Manifest { entries, last_updated }
	}

	/// Parse and validate a manifest document
	pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
		let manifest: Manifest = serde_json::from_slice(bytes).map_err(ManifestError::Malformed)?;

		let mut seen = HashSet::with_capacity(manifest.entries.len());
		for entry in &manifest.entries {
			validate_entry_path(&entry.path).map_err(|e| ManifestError::InvalidPath {
				path: entry.path.clone(),
				reason: e.to_string(),
			})?;
			if !seen.insert(entry.path.as_str()) {
				return Err(ManifestError::DuplicatePath { path: entry.path.clone() });
			}
		}

		Ok(manifest)
	}

	/// Serialize back into the document format
	pub fn to_json(&self) -> Result<Vec<u8>, ManifestError> {
		serde_json::to_vec_pretty(self).map_err(ManifestError::Malformed)
	}

	pub fn entries(&self) -> &[FileEntry] {
		&self.entries
	}

	pub fn last_updated(&self) -> u64 {
		self.last_updated
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Look up an entry by path
	pub fn get(&self, path: &str) -> Option<&FileEntry> {
		self.entries.iter().find(|e| e.path == path)
	}

	/// Sum of all entry sizes
	pub fn total_size(&self) -> u64 {
		self.entries.iter().fold(0u64, |acc, e| acc.saturating_add(e.size))
	}
}

/// Manifest parsing errors
#[derive(Debug)]
pub enum ManifestError {
	/// Document is not valid JSON or lacks required fields
	Malformed(serde_json::Error),

	/// An entry path would escape the content directory or is reserved
	InvalidPath { path: String, reason: String },

	/// Two entries share the same path
	DuplicatePath { path: String },
}

impl fmt::Display for ManifestError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ManifestError::Malformed(e) => write!(f, "Malformed manifest: {}", e),
			ManifestError::InvalidPath { path, reason } => {
				write!(f, "Invalid entry path {:?}: {}", path, reason)
			}
			ManifestError::DuplicatePath { path } => {
				write!(f, "Duplicate entry path {:?}", path)
			}
		}
	}
}

impl Error for ManifestError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			ManifestError::Malformed(e) => Some(e),
			_ => None,
		}
	}
}


// vim: ts=4
