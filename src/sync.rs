//! Sync controller: version probe, manifest fetch, diff, queue and commit
//!
//! One [`SyncController`] owns one sync target (a content directory fed from
//! one source). Each call to [`SyncController::sync`] is an attempt:
//!
//! ```text
//! NotStarted -> CheckingVersion -> Done (unchanged)
//!                       |
//!                       +-> FetchingManifest -> Diffing -> [Recovering] -> Downloading -> Committing -> Done
//!                                                                                          any step -> Failed
//! ```
//!
//! Only one attempt may run at a time per controller; a second call while
//! one is running fails fast with [`SyncError::AlreadyInProgress`].

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::callbacks::{NoCallbacks, SyncNotifier};
use crate::config::{default_staging_dir, Config, DEFAULT_MANIFEST_NAME, DEFAULT_USER_AGENT};
use crate::diff::diff;
use crate::error::{StateError, SyncError, TransportError};
use crate::logging::*;
use crate::manifest::{FileEntry, Manifest};
use crate::queue::DownloadQueue;
use crate::staging::{StagingArea, SyncMarker};
use crate::state::{FileVersionStore, VersionStore};
use crate::transport::{self, Transport};
use crate::types::{SyncOutcome, SyncPhase};
use crate::validation::validate_manifest_name;

/// Sync engine for one content directory
pub struct SyncController {
	transport: Box<dyn Transport>,
	store: Box<dyn VersionStore>,
	notifier: Box<dyn SyncNotifier>,
	staging: StagingArea,
	content_dir: PathBuf,
	manifest_name: String,
	timeout: Option<Duration>,
	shutdown: CancellationToken,
	running: AtomicBool,
	progress: AtomicU8,
	phase: Mutex<SyncPhase>,
	current_attempt: Mutex<Option<CancellationToken>>,
	last_sync: Mutex<Option<SystemTime>>,
}

/// Releases the single-attempt flag when the attempt ends, however it ends
struct RunGuard<'a> {
	flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
	fn acquire(flag: &'a AtomicBool) -> Option<Self> {
		flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.ok()
			.map(|_| RunGuard { flag })
	}
}

impl Drop for RunGuard<'_> {
	fn drop(&mut self) {
		self.flag.store(false, Ordering::Release);
	}
}

/// Forwards queue events to the caller's notifier and mirrors them into the
/// controller's observable state
struct AttemptObserver<'a> {
	controller: &'a SyncController,
}

impl SyncNotifier for AttemptObserver<'_> {
	fn on_progress(&self, percent: u8) {
		self.controller.progress.store(percent, Ordering::Release);
		self.controller.notifier.on_progress(percent);
	}

	fn on_phase(&self, phase: SyncPhase) {
		self.controller.set_phase(phase);
		self.controller.notifier.on_phase(phase);
	}

	fn on_file_downloaded(&self, entry: &FileEntry) {
		self.controller.notifier.on_file_downloaded(entry);
	}
}

/// Race `fut` against cancellation of `token`
async fn until_cancelled<F: Future>(
	token: &CancellationToken,
	fut: F,
) -> Result<F::Output, SyncError> {
	tokio::select! {
		biased;
		_ = token.cancelled() => Err(SyncError::Cancelled),
		out = fut => Ok(out),
	}
}

impl SyncController {
	/// Live content directory
	pub fn content_dir(&self) -> &Path {
		&self.content_dir
	}

	pub fn staging(&self) -> &StagingArea {
		&self.staging
	}

	pub fn manifest_name(&self) -> &str {
		&self.manifest_name
	}

	/// Progress of the running attempt, `None` when idle
	pub fn progress(&self) -> Option<u8> {
		if self.is_running() {
			Some(self.progress.load(Ordering::Acquire))
		} else {
			None
		}
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::Acquire)
	}

	/// Phase of the running attempt, or how the last one ended
	pub fn phase(&self) -> SyncPhase {
		*self.phase.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Time of the last successful attempt of this controller
	pub fn last_sync(&self) -> Option<SystemTime> {
		*self.last_sync.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Token that cancels the running attempt and every later one
	pub fn shutdown_token(&self) -> CancellationToken {
		self.shutdown.clone()
	}

	/// Cancel the running attempt, if any
	pub fn cancel(&self) {
		let current = self.current_attempt.lock().unwrap_or_else(|e| e.into_inner());
		if let Some(token) = current.as_ref() {
			info!("Cancelling running sync");
			token.cancel();
		}
	}

	fn set_phase(&self, phase: SyncPhase) {
		debug!("phase: {}", phase);
		*self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
	}

	/// Run one sync attempt
	///
	/// Calls the notifier's `on_pre_sync` first and `on_post_sync` last, once
	/// each, unless the attempt is rejected with `AlreadyInProgress`.
	pub async fn sync(&self) -> Result<SyncOutcome, SyncError> {
		let _guard = match RunGuard::acquire(&self.running) {
			Some(guard) => guard,
			None => {
				warn!("Sync requested while another attempt is running");
				return Err(SyncError::AlreadyInProgress);
			}
		};

		let attempt_id = Uuid::new_v4();
		let span = tracing::info_span!("sync", attempt = %attempt_id);
		self.run_attempt(attempt_id).instrument(span).await
	}

	async fn run_attempt(&self, attempt_id: Uuid) -> Result<SyncOutcome, SyncError> {
		self.progress.store(0, Ordering::Release);
		self.set_phase(SyncPhase::NotStarted);
		self.notifier.on_pre_sync();

		let token = self.shutdown.child_token();
		*self.current_attempt.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
		let timer = self.timeout.map(|timeout| {
			let token = token.clone();
			tokio::spawn(async move {
				tokio::time::sleep(timeout).await;
				warn!("Sync timed out after {:?}", timeout);
				token.cancel();
			})
		});

		let observer = AttemptObserver { controller: self };
		let result = self.attempt(attempt_id, &token, &observer).await;

		if let Some(timer) = timer {
			timer.abort();
		}
		*self.current_attempt.lock().unwrap_or_else(|e| e.into_inner()) = None;

		match &result {
			Ok(outcome) => {
				info!("Sync finished: {}", outcome);
				*self.last_sync.lock().unwrap_or_else(|e| e.into_inner()) = Some(SystemTime::now());
				observer.on_phase(SyncPhase::Done);
				self.notifier.on_post_sync(true, None);
			}
			Err(e) => {
				error!("Sync failed (code {}): {}", e.code(), e);
				observer.on_phase(SyncPhase::Failed);
				self.notifier.on_post_sync(false, Some(e));
			}
		}
		result
	}

	async fn attempt(
		&self,
		attempt_id: Uuid,
		token: &CancellationToken,
		observer: &AttemptObserver<'_>,
	) -> Result<SyncOutcome, SyncError> {
		observer.on_phase(SyncPhase::CheckingVersion);
		let stored_tag = self.store.get().await?;
		let remote_tag = until_cancelled(token, self.transport.head_version_tag(&self.manifest_name))
			.await?
			.map_err(SyncError::Network)?;

		match (&remote_tag, &stored_tag) {
			(Some(remote), Some(stored)) if remote == stored => {
				info!("Content is up to date ({})", remote);
				observer.on_progress(100);
				return Ok(SyncOutcome::Unchanged);
			}
			(None, _) => info!("Source reports no version tag, fetching manifest"),
			(Some(remote), _) => info!("Remote version {} (stored {:?})", remote, stored_tag),
		}

		observer.on_phase(SyncPhase::FetchingManifest);
		let body = until_cancelled(token, self.transport.fetch(&self.manifest_name))
			.await?
			.map_err(|e| match e {
				TransportError::NotFound { url } => {
					SyncError::ManifestParse { message: format!("manifest not found at {}", url) }
				}
				other => SyncError::Network(other),
			})?;
		let manifest = Manifest::parse(&body)?;
		if manifest.get(&self.manifest_name).is_some() {
			return Err(SyncError::ManifestParse {
				message: format!("manifest lists its own name {:?} as a file", self.manifest_name),
			});
		}

		observer.on_phase(SyncPhase::Diffing);
		let previous = self.load_live_manifest().await?;
		let plan = diff(previous.as_ref(), &manifest);
		info!(
			"{} file(s) to download ({} bytes), {} to delete",
			plan.download.len(),
			plan.total_bytes(),
			plan.delete.len()
		);

		let marker = match self.staging.read_marker().await {
			Ok(marker) => marker,
			Err(StateError::Corrupted { message }) => {
				warn!("Ignoring unreadable marker: {}", message);
				self.staging.discard().await?;
				None
			}
			Err(e) => return Err(e.into()),
		};

		// Staged files of this very version, possibly cut off mid-commit
		let resumable = remote_tag.is_some()
			&& marker.as_ref().map_or(false, |m| m.version_tag == remote_tag);

		if plan.is_empty() && resumable && self.staging.dir().exists() {
			info!("Finishing the commit of an interrupted attempt");
		} else if plan.is_empty() {
			if marker.is_some() || self.staging.dir().exists() {
				warn!("Nothing to sync, discarding stale staging area");
				self.staging.discard().await?;
			}
			if let Some(tag) = &remote_tag {
				self.store.set(tag).await?;
			}
			observer.on_progress(100);
			return Ok(SyncOutcome::Unchanged);
		}

		let mut queue = DownloadQueue::new(plan);
		match marker {
			Some(_) if resumable => {
				observer.on_phase(SyncPhase::Recovering);
				queue.recover(&self.staging);
			}
			Some(marker) => {
				warn!(
					"Staged files of attempt {} belong to version {:?}, starting over",
					marker.attempt_id, marker.version_tag
				);
				self.staging.discard().await?;
			}
			None if self.staging.dir().exists() => {
				warn!("Removing staging directory left without a marker");
				self.staging.discard().await?;
			}
			None => {}
		}

		self.staging.begin(&SyncMarker::new(attempt_id, remote_tag.clone())).await?;
		self.staging.stage_document(&body).await?;

		let report = queue
			.run(self.transport.as_ref(), &self.staging, &self.content_dir, observer, token)
			.await?;

		if let Some(tag) = &remote_tag {
			self.store.set(tag).await?;
		}

		Ok(SyncOutcome::Updated {
			version_tag: remote_tag,
			downloaded: report.downloaded,
			resumed: report.resumed,
			deleted: report.deleted,
			bytes: report.bytes,
		})
	}

	/// Manifest of the content currently live, if any
	///
	/// A damaged local copy is treated like a missing one, which makes the
	/// next diff a full download.
	async fn load_live_manifest(&self) -> Result<Option<Manifest>, SyncError> {
		let path = self.content_dir.join(&self.manifest_name);
		let bytes = match tokio::fs::read(&path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == io::ErrorKind::NotFound => {
				debug!("No live manifest at {}", path.display());
				return Ok(None);
			}
			Err(e) => return Err(e.into()),
		};
		match Manifest::parse(&bytes) {
			Ok(manifest) => Ok(Some(manifest)),
			Err(e) => {
				warn!("Live manifest {} is unreadable ({}), doing a full sync", path.display(), e);
				Ok(None)
			}
		}
	}

	/// Forget the stored version tag and throw away any staged files
	///
	/// The live content directory is left alone.
	pub async fn reset(&self) -> Result<(), SyncError> {
		let _guard = RunGuard::acquire(&self.running).ok_or(SyncError::AlreadyInProgress)?;
		self.store.clear().await?;
		self.staging.discard().await?;
		self.set_phase(SyncPhase::NotStarted);
		info!("Sync state reset");
		Ok(())
	}
}

/// Builder for [`SyncController`]
pub struct SyncBuilder {
	source: Option<String>,
	content_dir: Option<PathBuf>,
	staging_dir: Option<PathBuf>,
	state_dir: Option<PathBuf>,
	profile: String,
	manifest_name: String,
	request_timeout: Duration,
	sync_timeout: Option<Duration>,
	user_agent: String,
	transport: Option<Box<dyn Transport>>,
	version_store: Option<Box<dyn VersionStore>>,
	notifier: Option<Box<dyn SyncNotifier>>,
	shutdown: Option<CancellationToken>,
}

impl SyncBuilder {
	/// Create a new sync builder
	pub fn new() -> Self {
		let defaults = Config::default();
		SyncBuilder {
			source: None,
			content_dir: None,
			staging_dir: None,
			state_dir: None,
			profile: defaults.profile,
			manifest_name: DEFAULT_MANIFEST_NAME.to_string(),
			request_timeout: Duration::from_secs(defaults.request_timeout_secs),
			sync_timeout: None,
			user_agent: DEFAULT_USER_AGENT.to_string(),
			transport: None,
			version_store: None,
			notifier: None,
			shutdown: None,
		}
	}

	/// Builder preloaded from a resolved configuration
	pub fn from_config(config: &Config) -> Self {
		let mut builder = SyncBuilder::new()
			.state_dir(&config.state_dir)
			.profile(&config.profile)
			.manifest_name(&config.manifest_name)
			.request_timeout(Duration::from_secs(config.request_timeout_secs))
			.user_agent(&config.user_agent);
		builder.source = config.source.clone();
		builder.content_dir = config.content_dir.clone();
		builder.staging_dir = config.staging_dir.clone();
		builder.sync_timeout = config.sync_timeout_secs.map(Duration::from_secs);
		builder
	}

	/// HTTP base URL or local mirror directory
	pub fn source(mut self, source: impl Into<String>) -> Self {
		self.source = Some(source.into());
		self
	}

	pub fn content_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.content_dir = Some(dir.into());
		self
	}

	pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.staging_dir = Some(dir.into());
		self
	}

	/// Directory holding the version record and the marker
	pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.state_dir = Some(dir.into());
		self
	}

	pub fn profile(mut self, profile: impl Into<String>) -> Self {
		self.profile = profile.into();
		self
	}

	pub fn manifest_name(mut self, name: impl Into<String>) -> Self {
		self.manifest_name = name.into();
		self
	}

	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;
		self
	}

	/// Cancel attempts that take longer than `timeout`
	pub fn sync_timeout(mut self, timeout: Duration) -> Self {
		self.sync_timeout = Some(timeout);
		self
	}

	pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
		self.user_agent = agent.into();
		self
	}

	/// Use this transport instead of one derived from the source
	pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
		self.transport = Some(Box::new(transport));
		self
	}

	/// Use this store instead of the per-profile state file
	pub fn version_store(mut self, store: impl VersionStore + 'static) -> Self {
		self.version_store = Some(Box::new(store));
		self
	}

	pub fn notifier(mut self, notifier: Box<dyn SyncNotifier>) -> Self {
		self.notifier = Some(notifier);
		self
	}

	/// Parent token, typically cancelled by a signal handler
	pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
		self.shutdown = Some(token);
		self
	}

	pub fn get_source(&self) -> Option<&str> {
		self.source.as_deref()
	}

	pub fn get_content_dir(&self) -> Option<&Path> {
		self.content_dir.as_deref()
	}

	pub fn get_profile(&self) -> &str {
		&self.profile
	}

	pub fn get_sync_timeout(&self) -> Option<Duration> {
		self.sync_timeout
	}

	/// Build the controller
	pub fn build(self) -> Result<SyncController, SyncError> {
		let content_dir = self
			.content_dir
			.ok_or_else(|| SyncError::InvalidConfig { message: "content directory not set".into() })?;
		validate_manifest_name(&self.manifest_name)?;

		let state_dir = self.state_dir.unwrap_or_else(|| Config::default().state_dir);

		let transport = match self.transport {
			Some(transport) => transport,
			None => {
				let source = self.source.ok_or_else(|| SyncError::InvalidConfig {
					message: "source not set".into(),
				})?;
				transport::for_source(&source, self.request_timeout, &self.user_agent)
					.map_err(|e| SyncError::InvalidConfig { message: e.to_string() })?
			}
		};

		let store = match self.version_store {
			Some(store) => store,
			None => Box::new(FileVersionStore::for_profile(&state_dir, &self.profile)),
		};

		let staging_dir = match self.staging_dir {
			Some(dir) => dir,
			None => default_staging_dir(&content_dir),
		};
		if staging_dir == content_dir {
			return Err(SyncError::InvalidConfig {
				message: "staging directory must differ from the content directory".into(),
			});
		}
		let marker_path = state_dir.join(format!("{}.syncing", self.profile));

		let staging = StagingArea::new(staging_dir, marker_path).with_document(&self.manifest_name);

		Ok(SyncController {
			transport,
			store,
			notifier: self.notifier.unwrap_or_else(|| Box::new(NoCallbacks)),
			staging,
			content_dir,
			manifest_name: self.manifest_name,
			timeout: self.sync_timeout,
			shutdown: self.shutdown.unwrap_or_else(CancellationToken::new),
			running: AtomicBool::new(false),
			progress: AtomicU8::new(0),
			phase: Mutex::new(SyncPhase::NotStarted),
			current_attempt: Mutex::new(None),
			last_sync: Mutex::new(None),
		})
	}
}

impl Default for SyncBuilder {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::state::MemoryVersionStore;
	use crate::transport::DirTransport;
	use tempfile::TempDir;

	#[test]
	fn test_build_requires_content_dir() {
		let result = SyncBuilder::new().source("/srv/mirror").build();
		assert!(matches!(result, Err(SyncError::InvalidConfig { .. })));
	}

	#[test]
	fn test_build_requires_source_or_transport() {
		let tmp = TempDir::new().unwrap();
		let result = SyncBuilder::new().content_dir(tmp.path().join("live")).build();
		assert!(matches!(result, Err(SyncError::InvalidConfig { .. })));
	}

	#[test]
	fn test_default_paths() {
		let tmp = TempDir::new().unwrap();
		let controller = SyncBuilder::new()
			.content_dir(tmp.path().join("live"))
			.state_dir(tmp.path().join("state"))
			.profile("site")
			.transport(DirTransport::new(tmp.path().join("remote")))
			.version_store(MemoryVersionStore::new())
			.build()
			.unwrap();

		assert_eq!(controller.content_dir(), tmp.path().join("live"));
		assert_eq!(controller.staging().dir(), tmp.path().join("live.staging"));
		assert_eq!(controller.staging().marker_path(), tmp.path().join("state/site.syncing"));
		assert_eq!(controller.manifest_name(), "content.json");
		assert_eq!(controller.phase(), SyncPhase::NotStarted);
		assert_eq!(controller.progress(), None);
		assert_eq!(controller.last_sync(), None);
	}

	#[test]
	fn test_staging_same_as_live_is_rejected() {
		let tmp = TempDir::new().unwrap();
		let result = SyncBuilder::new()
			.content_dir(tmp.path())
			.staging_dir(tmp.path())
			.transport(DirTransport::new(tmp.path()))
			.build();
		assert!(matches!(result, Err(SyncError::InvalidConfig { .. })));
	}

	#[test]
	fn test_run_guard_is_exclusive() {
		let flag = AtomicBool::new(false);
		let guard = RunGuard::acquire(&flag);
		assert!(guard.is_some());
		assert!(RunGuard::acquire(&flag).is_none());
		drop(guard);
		assert!(RunGuard::acquire(&flag).is_some());
	}

	#[tokio::test]
	async fn test_until_cancelled() {
		let token = CancellationToken::new();
		assert_eq!(until_cancelled(&token, async { 5 }).await.unwrap(), 5);
		token.cancel();
		let never = std::future::pending::<()>();
		assert!(matches!(until_cancelled(&token, never).await, Err(SyncError::Cancelled)));
	}
}

// vim: ts=4
