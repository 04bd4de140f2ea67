//! Persistence of the last-known manifest version tag

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::StateError;
use crate::utils::write_atomic;

/// Stores the version tag of the last fully synced manifest
///
/// Written only after a fully successful sync, never partially.
#[async_trait]
pub trait VersionStore: Send + Sync {
	/// Tag of the last successfully synced manifest
	async fn get(&self) -> Result<Option<String>, StateError>;

	/// Record a successful sync of the manifest with `tag`
	async fn set(&self, tag: &str) -> Result<(), StateError>;

	/// Forget the stored tag
	async fn clear(&self) -> Result<(), StateError>;
}

/// On-disk record kept by [`FileVersionStore`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
	pub version_tag: Option<String>,

	/// Seconds since the Unix epoch
	pub last_sync: Option<u64>,
}

/// Version store persisted as a small JSON file
pub struct FileVersionStore {
	path: PathBuf,
}

impl FileVersionStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		FileVersionStore { path: path.into() }
	}

	/// Store for `profile` inside `state_dir`
	pub fn for_profile(state_dir: &Path, profile: &str) -> Self {
		Self::new(state_dir.join(format!("{}.json", profile)))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Load the full record; a missing file is an empty record
	pub async fn load(&self) -> Result<SyncRecord, StateError> {
		let contents = match tokio::fs::read_to_string(&self.path).await {
			Ok(contents) => contents,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SyncRecord::default()),
			Err(e) => return Err(StateError::LoadFailed { source: Box::new(e) }),
		};

		serde_json::from_str(&contents).map_err(|e| StateError::Corrupted {
			message: format!("Failed to parse state JSON: {}", e),
		})
	}

	async fn save(&self, record: &SyncRecord) -> Result<(), StateError> {
		let json = serde_json::to_vec_pretty(record)
			.map_err(|e| StateError::SaveFailed { source: Box::new(e) })?;
		write_atomic(&self.path, &json)
			.await
			.map_err(|e| StateError::SaveFailed { source: Box::new(e) })
	}

	/// Time of the last successful sync recorded in the file
	pub async fn last_sync(&self) -> Result<Option<SystemTime>, StateError> {
		Ok(self.load().await?.last_sync.map(|secs| UNIX_EPOCH + Duration::from_secs(secs)))
	}
}

#[async_trait]
impl VersionStore for FileVersionStore {
	async fn get(&self) -> Result<Option<String>, StateError> {
		Ok(self.load().await?.version_tag)
	}

	async fn set(&self, tag: &str) -> Result<(), StateError> {
		let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
		self.save(&SyncRecord { version_tag: Some(tag.to_string()), last_sync: Some(now) }).await
	}

	async fn clear(&self) -> Result<(), StateError> {
		match tokio::fs::remove_file(&self.path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StateError::SaveFailed { source: Box::new(e) }),
		}
	}
}

/// Volatile version store, mostly useful for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
	tag: Mutex<Option<String>>,
}

impl MemoryVersionStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_tag(tag: &str) -> Self {
		MemoryVersionStore { tag: Mutex::new(Some(tag.to_string())) }
	}
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
	async fn get(&self) -> Result<Option<String>, StateError> {
		Ok(self.tag.lock().unwrap_or_else(|e| e.into_inner()).clone())
	}

	async fn set(&self, tag: &str) -> Result<(), StateError> {
		*self.tag.lock().unwrap_or_else(|e| e.into_inner()) = Some(tag.to_string());
		Ok(())
	}

	async fn clear(&self) -> Result<(), StateError> {
		*self.tag.lock().unwrap_or_else(|e| e.into_inner()) = None;
		Ok(())
	}
}


// vim: ts=4
