//! Manifest diffing: which files to fetch and which to remove
//!
//! A single code path covers both the first-ever sync (`old == None`, every
//! entry is downloaded) and delta syncs against the last-known manifest.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::manifest::{FileEntry, Manifest};

/// Result of comparing two manifests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
	/// Entries to fetch, in new-manifest order
	pub download: Vec<FileEntry>,

	/// Entries of the old manifest that no longer exist remotely
	pub delete: BTreeSet<FileEntry>,
}

impl SyncPlan {
	/// Nothing to download and nothing to delete
	pub fn is_empty(&self) -> bool {
		self.download.is_empty() && self.delete.is_empty()
	}

	/// Bytes to transfer; unchanged files do not count
	pub fn total_bytes(&self) -> u64 {
		self.download.iter().fold(0u64, |acc, e| acc.saturating_add(e.size()))
	}
}

/// Compute the download and delete sets between two manifests
pub fn diff(old: Option<&Manifest>, new: &Manifest) -> SyncPlan {
	let old = match old {
		Some(old) => old,
		None => {
			return SyncPlan { download: new.entries().to_vec(), delete: BTreeSet::new() };
		}
	};

	let old_tags: HashMap<&str, &str> =
		old.entries().iter().map(|e| (e.path(), e.version_tag())).collect();

	let download = new
		.entries()
		.iter()
		.filter(|entry| match old_tags.get(entry.path()) {
			Some(tag) => *tag != entry.version_tag(),
			None => true,
		})
		.cloned()
		.collect();

	let new_paths: HashSet<&str> = new.entries().iter().map(|e| e.path()).collect();
	let delete =
		old.entries().iter().filter(|entry| !new_paths.contains(entry.path())).cloned().collect();

	SyncPlan { download, delete }
}


// vim: ts=4
