//! Staging area, interruption marker and commit into the live tree
//!
//! Downloads land in a staging directory next to the live content
//! directory. A durable marker file records that an attempt is in flight:
//! it is written before the first file is staged and removed only as the
//! very last step of a successful commit. While it exists, the staging
//! directory may hold a partially downloaded queue that the next attempt
//! must resume or discard.
//!
//! The manifest document is staged along with the files but promoted only
//! after every other file is merged and every deletion applied. A live
//! manifest therefore never describes files that are still waiting in
//! staging.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StateError;
use crate::manifest::FileEntry;
use crate::utils::write_atomic;
use crate::validation::{is_scratch_file, validate_path_within_root};

/// Contents of the interruption marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMarker {
	/// Attempt that created the staging area
	pub attempt_id: Uuid,

	/// Version tag of the manifest the staged files belong to
	pub version_tag: Option<String>,

	/// Seconds since the Unix epoch
	pub started_at: u64,
}

impl SyncMarker {
	pub fn new(attempt_id: Uuid, version_tag: Option<String>) -> Self {
		let started_at = std::time::SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.map(|d| d.as_secs())
			.unwrap_or(0);
		SyncMarker { attempt_id, version_tag, started_at }
	}
}

/// Failure while promoting staged files or applying deletions
#[derive(Debug)]
pub struct CommitError {
	pub path: PathBuf,
	pub source: io::Error,
}

impl CommitError {
	fn at(path: &Path, source: io::Error) -> Self {
		CommitError { path: path.to_path_buf(), source }
	}
}

impl fmt::Display for CommitError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Commit failed at {}: {}", self.path.display(), self.source)
	}
}

impl Error for CommitError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		Some(&self.source)
	}
}

/// Staging directory plus its interruption marker
#[derive(Debug, Clone)]
pub struct StagingArea {
	dir: PathBuf,
	marker_path: PathBuf,
	document: Option<String>,
}

impl StagingArea {
	pub fn new(dir: impl Into<PathBuf>, marker_path: impl Into<PathBuf>) -> Self {
		StagingArea { dir: dir.into(), marker_path: marker_path.into(), document: None }
	}

	/// Name of the document in the staging root that is promoted last
	pub fn with_document(mut self, name: impl Into<String>) -> Self {
		self.document = Some(name.into());
		self
	}

	pub fn document(&self) -> Option<&str> {
		self.document.as_deref()
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	pub fn marker_path(&self) -> &Path {
		&self.marker_path
	}

	/// Where `entry` is written while staged
	pub fn staged_path(&self, entry: &FileEntry) -> PathBuf {
		entry.local_path(&self.dir)
	}

	/// Whether `entry` has been fully downloaded into the staging area
	pub fn is_staged(&self, entry: &FileEntry) -> bool {
		self.staged_path(entry).is_file()
	}

	/// A previous attempt was interrupted before its commit finished
	pub fn is_interrupted(&self) -> bool {
		self.marker_path.exists()
	}

	/// Read the marker, if any
	pub async fn read_marker(&self) -> Result<Option<SyncMarker>, StateError> {
		let contents = match tokio::fs::read(&self.marker_path).await {
			Ok(contents) => contents,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(StateError::LoadFailed { source: Box::new(e) }),
		};

		serde_json::from_slice(&contents).map(Some).map_err(|e| StateError::Corrupted {
			message: format!("Failed to parse marker {}: {}", self.marker_path.display(), e),
		})
	}

	/// Create the staging directory and durably record the attempt
	pub async fn begin(&self, marker: &SyncMarker) -> io::Result<()> {
		tokio::fs::create_dir_all(&self.dir).await?;
		let json = serde_json::to_vec(marker).map_err(io::Error::other)?;
		write_atomic(&self.marker_path, &json).await?;
		debug!("Marker written for attempt {}", marker.attempt_id);
		Ok(())
	}

	/// Write the document into the staging root
	pub async fn stage_document(&self, bytes: &[u8]) -> io::Result<()> {
		let name = self.document.as_deref().ok_or_else(|| {
			io::Error::new(io::ErrorKind::InvalidInput, "staging area has no document name")
		})?;
		write_atomic(&self.dir.join(name), bytes).await
	}

	/// Throw away staged files and the marker
	pub async fn discard(&self) -> io::Result<()> {
		match tokio::fs::remove_dir_all(&self.dir).await {
			Ok(()) => info!("Discarded staging directory {}", self.dir.display()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => return Err(e),
		}
		self.clear_marker().await
	}

	/// Remove the marker file
	pub async fn clear_marker(&self) -> io::Result<()> {
		match tokio::fs::remove_file(&self.marker_path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e),
		}
	}

	/// Promote staged files into `live_dir`, apply deletions, then clear the
	/// marker
	///
	/// On failure the marker stays, so the next attempt sees the interrupted
	/// state.
	pub async fn commit(
		&self,
		live_dir: &Path,
		to_delete: &BTreeSet<FileEntry>,
	) -> Result<(), CommitError> {
		let staging = self.dir.clone();
		let live = live_dir.to_path_buf();
		let to_delete = to_delete.clone();
		let document = self.document.clone();

		tokio::task::spawn_blocking(move || {
			promote(&staging, &live, &to_delete, document.as_deref())
		})
			.await
			.map_err(|e| CommitError::at(live_dir, io::Error::other(e)))??;

		self.clear_marker().await.map_err(|e| CommitError::at(&self.marker_path, e))
	}
}

/// Promote `staging_dir` into `live_dir` and remove `to_delete` from it
///
/// Moves are not all-or-nothing: files already moved stay moved when a
/// later step fails. Running it again on an already promoted tree is a
/// no-op apart from deletions that were not applied yet.
pub fn commit(
	staging_dir: &Path,
	live_dir: &Path,
	to_delete: &BTreeSet<FileEntry>,
) -> Result<(), CommitError> {
	promote(staging_dir, live_dir, to_delete, None)
}

/// `commit`, holding back the top-level `document` until the rest of the
/// tree is in place
fn promote(
	staging_dir: &Path,
	live_dir: &Path,
	to_delete: &BTreeSet<FileEntry>,
	document: Option<&str>,
) -> Result<(), CommitError> {
	if staging_dir.is_dir() {
		purge_scratch(staging_dir)?;

		if live_dir.exists() {
			debug!("Merging {} into {}", staging_dir.display(), live_dir.display());
			merge_dir(staging_dir, live_dir, document.map(OsStr::new))?;
		} else {
			debug!("Promoting {} to {}", staging_dir.display(), live_dir.display());
			if let Some(parent) = live_dir.parent() {
				fs::create_dir_all(parent).map_err(|e| CommitError::at(parent, e))?;
			}
			fs::rename(staging_dir, live_dir).map_err(|e| CommitError::at(live_dir, e))?;
		}
	}

	for entry in to_delete {
		remove_entry(live_dir, entry)?;
	}

	if let Some(name) = document {
		let staged = staging_dir.join(name);
		if staged.is_file() {
			move_file(&staged, &live_dir.join(name))?;
			debug!("Promoted {}", name);
		}
	}

	if staging_dir.exists() {
		fs::remove_dir_all(staging_dir).map_err(|e| CommitError::at(staging_dir, e))?;
	}
	Ok(())
}

/// Remove leftover in-flight download files below `dir`
fn purge_scratch(dir: &Path) -> Result<(), CommitError> {
	for entry in fs::read_dir(dir).map_err(|e| CommitError::at(dir, e))? {
		let entry = entry.map_err(|e| CommitError::at(dir, e))?;
		let path = entry.path();
		let file_type = entry.file_type().map_err(|e| CommitError::at(&path, e))?;
		if file_type.is_dir() {
			purge_scratch(&path)?;
		} else if is_scratch_file(&path) {
			warn!("Removing unfinished download {}", path.display());
			fs::remove_file(&path).map_err(|e| CommitError::at(&path, e))?;
		}
	}
	Ok(())
}

fn merge_dir(src: &Path, dst: &Path, skip: Option<&OsStr>) -> Result<(), CommitError> {
	for entry in fs::read_dir(src).map_err(|e| CommitError::at(src, e))? {
		let entry = entry.map_err(|e| CommitError::at(src, e))?;
		if skip == Some(entry.file_name().as_os_str()) {
			continue;
		}
		let path = entry.path();
		let target = dst.join(entry.file_name());
		let file_type = entry.file_type().map_err(|e| CommitError::at(&path, e))?;

		if file_type.is_dir() {
			if target.exists() && !target.is_dir() {
				fs::remove_file(&target).map_err(|e| CommitError::at(&target, e))?;
			}
			fs::create_dir_all(&target).map_err(|e| CommitError::at(&target, e))?;
			merge_dir(&path, &target, None)?;
		} else {
			if target.is_dir() {
				fs::remove_dir_all(&target).map_err(|e| CommitError::at(&target, e))?;
			}
			move_file(&path, &target)?;
		}
	}
	Ok(())
}

fn move_file(src: &Path, dst: &Path) -> Result<(), CommitError> {
	if fs::rename(src, dst).is_ok() {
		return Ok(());
	}
	// Different filesystem
	fs::copy(src, dst).map_err(|e| CommitError::at(dst, e))?;
	fs::remove_file(src).map_err(|e| CommitError::at(src, e))
}

/// Delete one entry from the live tree and prune directories it leaves
/// empty, never touching `live_dir` itself
fn remove_entry(live_dir: &Path, entry: &FileEntry) -> Result<(), CommitError> {
	let path = entry.local_path(live_dir);
	validate_path_within_root(&path, live_dir)
		.map_err(|e| CommitError::at(&path, io::Error::new(io::ErrorKind::InvalidInput, e)))?;

	if is_superseded(live_dir, &path) {
		debug!("{} was replaced by new content, nothing to delete", path.display());
		return Ok(());
	}

	match fs::remove_file(&path) {
		Ok(()) => debug!("Deleted {}", path.display()),
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
		Err(e) => return Err(CommitError::at(&path, e)),
	}

	let mut dir = path.parent();
	while let Some(current) = dir {
		if current == live_dir || !current.starts_with(live_dir) {
			break;
		}
		let is_empty = match fs::read_dir(current) {
			Ok(mut entries) => entries.next().is_none(),
			Err(_) => false,
		};
		if !is_empty {
			break;
		}
		fs::remove_dir(current).map_err(|e| CommitError::at(current, e))?;
		debug!("Removed empty directory {}", current.display());
		dir = current.parent();
	}

	Ok(())
}

/// The merge turned `path` into a directory, or one of its ancestors into
/// a file
fn is_superseded(live_dir: &Path, path: &Path) -> bool {
	if fs::symlink_metadata(path).map(|m| m.is_dir()).unwrap_or(false) {
		return true;
	}
	let mut dir = path.parent();
	while let Some(current) = dir {
		if current == live_dir || !current.starts_with(live_dir) {
			break;
		}
		if let Ok(meta) = fs::symlink_metadata(current) {
			if !meta.is_dir() {
				return true;
			}
		}
		dir = current.parent();
	}
	false
}


// vim: ts=4
