//! Callback traits for sync lifecycle and progress notification

use crate::error::SyncError;
use crate::manifest::FileEntry;
use crate::types::SyncPhase;

// Type aliases to reduce complexity
type PreSyncFn = dyn Fn() + Send + Sync;
type ProgressFn = dyn Fn(u8) + Send + Sync;
type PostSyncFn = dyn Fn(bool, Option<&SyncError>) + Send + Sync;
type PhaseFn = dyn Fn(SyncPhase) + Send + Sync;
type FileFn = dyn Fn(&FileEntry) + Send + Sync;

/// Receives lifecycle callbacks for each sync attempt
///
/// Per attempt, `on_pre_sync` is called once first and `on_post_sync` once
/// last. Progress values in between never decrease; a successful attempt
/// always ends with 100.
pub trait SyncNotifier: Send + Sync {
	/// Called before anything is contacted
	fn on_pre_sync(&self) {}

	/// Called with overall progress, 0 to 100
	fn on_progress(&self, _percent: u8) {}

	/// Called once the attempt reached `Done` or `Failed`
	fn on_post_sync(&self, _success: bool, _error: Option<&SyncError>) {}

	/// Called when the attempt enters a new phase
	fn on_phase(&self, _phase: SyncPhase) {}

	/// Called after a file has been fetched into the staging area
	fn on_file_downloaded(&self, _entry: &FileEntry) {}
}

/// Default notifier that does nothing
pub struct NoCallbacks;

impl SyncNotifier for NoCallbacks {}

/// Builder for a notifier made of closures
pub struct CallbackBuilder {
	pre_sync: Option<Box<PreSyncFn>>,
	progress: Option<Box<ProgressFn>>,
	post_sync: Option<Box<PostSyncFn>>,
	phase: Option<Box<PhaseFn>>,
	file_downloaded: Option<Box<FileFn>>,
}

impl CallbackBuilder {
	/// Create a new callback builder
	pub fn new() -> Self {
		CallbackBuilder {
			pre_sync: None,
			progress: None,
			post_sync: None,
			phase: None,
			file_downloaded: None,
		}
	}

	/// Set pre-sync callback
	pub fn on_pre_sync<F>(mut self, callback: F) -> Self
	where
		F: Fn() + Send + Sync + 'static,
	{
		self.pre_sync = Some(Box::new(callback));
		self
	}

	/// Set progress callback
	pub fn on_progress<F>(mut self, callback: F) -> Self
	where
		F: Fn(u8) + Send + Sync + 'static,
	{
		self.progress = Some(Box::new(callback));
		self
	}

	/// Set post-sync callback
	pub fn on_post_sync<F>(mut self, callback: F) -> Self
	where
		F: Fn(bool, Option<&SyncError>) + Send + Sync + 'static,
	{
		self.post_sync = Some(Box::new(callback));
		self
	}

	/// Set phase change callback
	pub fn on_phase<F>(mut self, callback: F) -> Self
	where
		F: Fn(SyncPhase) + Send + Sync + 'static,
	{
		self.phase = Some(Box::new(callback));
		self
	}

	/// Set per-file download callback
	pub fn on_file_downloaded<F>(mut self, callback: F) -> Self
	where
		F: Fn(&FileEntry) + Send + Sync + 'static,
	{
		self.file_downloaded = Some(Box::new(callback));
		self
	}

	/// Build the notifier
	pub fn build(self) -> Box<dyn SyncNotifier> {
		Box::new(CompositeCallbacks {
			pre_sync: self.pre_sync,
			progress: self.progress,
			post_sync: self.post_sync,
			phase: self.phase,
			file_downloaded: self.file_downloaded,
		})
	}
}

impl Default for CallbackBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Internal composite callbacks implementation
struct CompositeCallbacks {
	pre_sync: Option<Box<PreSyncFn>>,
	progress: Option<Box<ProgressFn>>,
	post_sync: Option<Box<PostSyncFn>>,
	phase: Option<Box<PhaseFn>>,
	file_downloaded: Option<Box<FileFn>>,
}

impl SyncNotifier for CompositeCallbacks {
	fn on_pre_sync(&self) {
		if let Some(ref callback) = self.pre_sync {
			callback();
		}
	}

	fn on_progress(&self, percent: u8) {
		if let Some(ref callback) = self.progress {
			callback(percent);
		}
	}

	fn on_post_sync(&self, success: bool, error: Option<&SyncError>) {
		if let Some(ref callback) = self.post_sync {
			callback(success, error);
		}
	}

	fn on_phase(&self, phase: SyncPhase) {
		if let Some(ref callback) = self.phase {
			callback(phase);
		}
	}

	fn on_file_downloaded(&self, entry: &FileEntry) {
		if let Some(ref callback) = self.file_downloaded {
			callback(entry);
		}
	}
}


// vim: ts=4
