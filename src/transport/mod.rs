//! Transport abstraction for fetching the manifest and content files
//!
//! The sync engine depends only on the [`Transport`] trait. Two
//! implementations ship with the crate: [`HttpTransport`] for a remote
//! path-addressable file tree served over HTTP, and [`DirTransport`] for a
//! mirror on the local filesystem.

mod dir;
mod http;

pub use dir::{content_tag, DirTransport};
pub use http::HttpTransport;

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::TransportError;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Suffix of in-flight download files
///
/// A file only appears under its real name once fully written, so the
/// existence of a staged file means the download completed.
pub const PART_SUFFIX: &str = ".contentsync-part";

/// Fetches documents and files from a remote content tree
#[async_trait]
pub trait Transport: Send + Sync {
	/// Probe the version tag of a document without fetching its body
	///
	/// Returns `Ok(None)` when the remote does not report a tag.
	async fn head_version_tag(&self, name: &str) -> TransportResult<Option<String>>;

	/// Fetch a whole document into memory
	async fn fetch(&self, name: &str) -> TransportResult<Vec<u8>>;

	/// Download the file at relative `path` into `dest`
	///
	/// Any existing file at `dest` is replaced. On failure `dest` is left
	/// untouched.
	async fn download(&self, path: &str, dest: &Path) -> TransportResult<()>;
}

/// Scratch file used while downloading into `dest`
pub fn part_path(dest: &Path) -> PathBuf {
	let mut name: OsString = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
	name.push(PART_SUFFIX);
	dest.with_file_name(name)
}

/// Move a finished scratch file into place
pub(crate) async fn finish_part(part: &Path, dest: &Path) -> TransportResult<()> {
	tokio::fs::rename(part, dest).await?;
	Ok(())
}

/// Make sure the directory that will hold `dest` exists
pub(crate) async fn prepare_parent(dest: &Path) -> TransportResult<()> {
	if let Some(parent) = dest.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}
	Ok(())
}

/// Pick a transport for a source location
///
/// `http://` and `https://` sources use HTTP; anything else is treated as a
/// local mirror directory.
pub fn for_source(
	source: &str,
	request_timeout: Duration,
	user_agent: &str,
) -> TransportResult<Box<dyn Transport>> {
	if source.starts_with("http://") || source.starts_with("https://") {
		Ok(Box::new(HttpTransport::new(source, request_timeout, user_agent)?))
	} else {
		Ok(Box::new(DirTransport::new(source)))
	}
}


// vim: ts=4
