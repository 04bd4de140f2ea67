//! Filesystem helpers

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

fn tmp_path(path: &Path) -> PathBuf {
	let mut name: OsString = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
	name.push(".tmp");
	path.with_file_name(name)
}

/// Write `bytes` to `path` so that readers see either the old or the new
/// content, never a torn write.
///
/// The data goes to a sibling temporary file which is flushed to disk and
/// then renamed over `path`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			tokio::fs::create_dir_all(parent).await?;
		}
	}

	let tmp = tmp_path(path);
	let mut file = tokio::fs::File::create(&tmp).await?;
	file.write_all(bytes).await?;
	file.sync_all().await?;
	drop(file);

	if let Err(e) = tokio::fs::rename(&tmp, path).await {
		let _ = tokio::fs::remove_file(&tmp).await;
		return Err(e);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_write_atomic_replaces_and_cleans_up() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("nested/state.json");

		write_atomic(&path, b"first").await.unwrap();
		write_atomic(&path, b"second").await.unwrap();

		assert_eq!(std::fs::read(&path).unwrap(), b"second");
		assert!(!tmp_path(&path).exists());
	}
}

// vim: ts=4
