//! Shared value types

use std::fmt;

/// Where a sync attempt currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
	NotStarted,
	CheckingVersion,
	FetchingManifest,
	Diffing,
	Recovering,
	Downloading,
	Committing,
	Done,
	Failed,
}

impl SyncPhase {
	/// Whether an attempt in this phase has finished
	pub fn is_terminal(self) -> bool {
		matches!(self, SyncPhase::Done | SyncPhase::Failed)
	}

	/// Whether an attempt is under way: started and not yet finished
	pub fn is_active(self) -> bool {
		self != SyncPhase::NotStarted && !self.is_terminal()
	}
}

impl fmt::Display for SyncPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SyncPhase::NotStarted => "not started",
			SyncPhase::CheckingVersion => "checking version",
			SyncPhase::FetchingManifest => "fetching manifest",
			SyncPhase::Diffing => "diffing",
			SyncPhase::Recovering => "recovering",
			SyncPhase::Downloading => "downloading",
			SyncPhase::Committing => "committing",
			SyncPhase::Done => "done",
			SyncPhase::Failed => "failed",
		};
		f.write_str(name)
	}
}

/// Successful result of one sync attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
	/// Local content already matched the remote; no file was transferred
	Unchanged,

	/// Manifest changed; local content now matches it
	Updated {
		/// Version tag now stored, if the remote reported one
		version_tag: Option<String>,
		/// Files fetched during this attempt
		downloaded: usize,
		/// Files already staged by an interrupted attempt and reused
		resumed: usize,
		/// Files removed from the live tree
		deleted: usize,
		/// Bytes of all files in the download set
		bytes: u64,
	},
}

impl fmt::Display for SyncOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncOutcome::Unchanged => write!(f, "unchanged"),
			SyncOutcome::Updated { version_tag, downloaded, resumed, deleted, bytes } => {
				write!(
					f,
					"{} downloaded, {} resumed, {} deleted, {} bytes",
					downloaded, resumed, deleted, bytes
				)?;
				if let Some(tag) = version_tag {
					write!(f, " (version {})", tag)?;
				}
				Ok(())
			}
		}
	}
}


// vim: ts=4
