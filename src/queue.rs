//! Sequential download queue
//!
//! The queue drives one file download at a time into the staging area:
//!
//! ```text
//! Idle -> Recovering -> Downloading(i) -> ... -> AllDownloaded -> Committing -> Done
//!                             |                                      |
//!                             +------------------> Failed <----------+
//! ```
//!
//! On failure nothing is rolled back: staged files and the marker stay, so
//! the next attempt can skip what is already staged.

use std::collections::BTreeSet;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callbacks::SyncNotifier;
use crate::diff::SyncPlan;
use crate::error::SyncError;
use crate::manifest::FileEntry;
use crate::staging::StagingArea;
use crate::transport::Transport;
use crate::types::SyncPhase;

/// Queue state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
	Idle,
	Recovering,
	Downloading(usize),
	AllDownloaded,
	Committing,
	Done,
	Failed,
}

/// Totals of a drained queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueReport {
	pub downloaded: usize,
	pub resumed: usize,
	pub deleted: usize,
	pub bytes: u64,
}

/// Download set and deletions of one sync attempt
#[derive(Debug)]
pub struct DownloadQueue {
	pending: Vec<FileEntry>,
	to_delete: BTreeSet<FileEntry>,
	cursor: usize,
	bytes_done: u64,
	total_bytes: u64,
	state: QueueState,
	resumed: usize,
	downloaded: usize,
	last_progress: Option<u8>,
}

impl DownloadQueue {
	pub fn new(plan: SyncPlan) -> Self {
		let total_bytes = plan.total_bytes();
		DownloadQueue {
			pending: plan.download,
			to_delete: plan.delete,
			cursor: 0,
			bytes_done: 0,
			total_bytes,
			state: QueueState::Idle,
			resumed: 0,
			downloaded: 0,
			last_progress: None,
		}
	}

	pub fn pending(&self) -> &[FileEntry] {
		&self.pending
	}

	pub fn to_delete(&self) -> &BTreeSet<FileEntry> {
		&self.to_delete
	}

	pub fn cursor(&self) -> usize {
		self.cursor
	}

	pub fn bytes_done(&self) -> u64 {
		self.bytes_done
	}

	pub fn total_bytes(&self) -> u64 {
		self.total_bytes
	}

	pub fn state(&self) -> QueueState {
		self.state
	}

	/// Completion in percent, by bytes
	pub fn progress(&self) -> u8 {
		if self.total_bytes == 0 {
			return 100;
		}
		((100 * self.bytes_done as u128) / self.total_bytes as u128).min(100) as u8
	}

	fn transition(&mut self, next: QueueState) {
		debug!("queue: {:?} -> {:?}", self.state, next);
		self.state = next;
	}

	fn emit_progress(&mut self, notifier: &dyn SyncNotifier) {
		let percent = self.progress();
		if self.last_progress.map_or(true, |last| percent > last) {
			self.last_progress = Some(percent);
			notifier.on_progress(percent);
		}
	}

	/// Resume from a staging area left by an interrupted attempt
	///
	/// The cursor moves to the first pending entry whose staged file does
	/// not exist yet; everything before it counts as done. Returns the
	/// number of entries skipped.
	pub fn recover(&mut self, staging: &StagingArea) -> usize {
		self.transition(QueueState::Recovering);

		let cursor =
			self.pending.iter().position(|e| !staging.is_staged(e)).unwrap_or(self.pending.len());
		self.cursor = cursor;
		self.bytes_done =
			self.pending[..cursor].iter().fold(0u64, |acc, e| acc.saturating_add(e.size()));
		self.resumed = cursor;

		if cursor > 0 {
			info!(
				"Resuming at {}/{}: {} bytes already staged",
				cursor,
				self.pending.len(),
				self.bytes_done
			);
		}
		cursor
	}

	/// Download everything from the cursor on, then commit
	pub async fn run(
		&mut self,
		transport: &dyn Transport,
		staging: &StagingArea,
		live_dir: &Path,
		notifier: &dyn SyncNotifier,
		cancel: &CancellationToken,
	) -> Result<QueueReport, SyncError> {
		if !self.pending.is_empty() {
			notifier.on_phase(SyncPhase::Downloading);
		}
		if self.cursor > 0 {
			self.emit_progress(notifier);
		}

		while self.cursor < self.pending.len() {
			let index = self.cursor;
			self.transition(QueueState::Downloading(index));
			let entry = self.pending[index].clone();
			let dest = staging.staged_path(&entry);

			let result = tokio::select! {
				biased;
				_ = cancel.cancelled() => {
					warn!("Cancelled while downloading {}", entry.path());
					self.transition(QueueState::Failed);
					return Err(SyncError::Cancelled);
				}
				result = transport.download(entry.path(), &dest) => result,
			};

			if let Err(source) = result {
				warn!("Download of {} failed: {}", entry.path(), source);
				self.transition(QueueState::Failed);
				return Err(SyncError::Download { path: entry.path().to_string(), source });
			}

			self.bytes_done = self.bytes_done.saturating_add(entry.size());
			self.cursor += 1;
			self.downloaded += 1;
			notifier.on_file_downloaded(&entry);
			self.emit_progress(notifier);
		}
		self.transition(QueueState::AllDownloaded);

		if cancel.is_cancelled() {
			self.transition(QueueState::Failed);
			return Err(SyncError::Cancelled);
		}

		self.transition(QueueState::Committing);
		notifier.on_phase(SyncPhase::Committing);
		if let Err(e) = staging.commit(live_dir, &self.to_delete).await {
			warn!("{}", e);
			self.transition(QueueState::Failed);
			return Err(e.into());
		}

		self.emit_progress(notifier);
		self.transition(QueueState::Done);

		Ok(QueueReport {
			downloaded: self.downloaded,
			resumed: self.resumed,
			deleted: self.to_delete.len(),
			bytes: self.total_bytes,
		})
	}
}


// vim: ts=4
