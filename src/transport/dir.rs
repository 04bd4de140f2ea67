//! Transport reading from a local mirror directory

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{finish_part, part_path, prepare_parent, Transport, TransportResult};
use crate::error::TransportError;

/// Serves a content tree laid out on the local filesystem
///
/// Version tags are derived from the document bytes (BLAKE3), so the tag
/// changes exactly when the manifest content changes.
pub struct DirTransport {
	root: PathBuf,
}

impl DirTransport {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		DirTransport { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn resolve(&self, path: &str) -> PathBuf {
		path.split('/').filter(|p| !p.is_empty()).fold(self.root.clone(), |acc, p| acc.join(p))
	}

	fn map_err(&self, path: &Path, e: io::Error) -> TransportError {
		if e.kind() == io::ErrorKind::NotFound {
			TransportError::NotFound { url: path.display().to_string() }
		} else {
			TransportError::Io(e)
		}
	}
}

/// Version tag for a document body
pub fn content_tag(bytes: &[u8]) -> String {
	let hash = blake3::hash(bytes);
	format!("\"{}\"", hex::encode(&hash.as_bytes()[..16]))
}

#[async_trait]
impl Transport for DirTransport {
	async fn head_version_tag(&self, name: &str) -> TransportResult<Option<String>> {
		let path = self.resolve(name);
		let bytes = tokio::fs::read(&path).await.map_err(|e| self.map_err(&path, e))?;
		Ok(Some(content_tag(&bytes)))
	}

	async fn fetch(&self, name: &str) -> TransportResult<Vec<u8>> {
		let path = self.resolve(name);
		tokio::fs::read(&path).await.map_err(|e| self.map_err(&path, e))
	}

	async fn download(&self, path: &str, dest: &Path) -> TransportResult<()> {
		let src = self.resolve(path);
		debug!("copy {} -> {}", src.display(), dest.display());

		prepare_parent(dest).await?;
		let part = part_path(dest);
		if let Err(e) = tokio::fs::copy(&src, &part).await {
			let _ = tokio::fs::remove_file(&part).await;
			return Err(self.map_err(&src, e));
		}
		finish_part(&part, dest).await
	}
}


// vim: ts=4
