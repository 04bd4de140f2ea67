//! End-to-end sync scenarios driven through SyncBuilder
//!
//! A local mirror directory plays the remote. The scripted transport wraps
//! DirTransport to count calls, inject download failures and hold a
//! download open so that cancellation can be exercised.

use async_trait::async_trait;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use uuid::Uuid;

use contentsync::callbacks::CallbackBuilder;
use contentsync::error::{SyncError, TransportError};
use contentsync::staging::SyncMarker;
use contentsync::state::{FileVersionStore, VersionStore};
use contentsync::sync::{SyncBuilder, SyncController};
use contentsync::transport::{content_tag, DirTransport, Transport};
use contentsync::types::{SyncOutcome, SyncPhase};

// ============================================================================
// Fixtures
// ============================================================================

#[derive(Default)]
struct CallLog {
	heads: AtomicUsize,
	fetches: AtomicUsize,
	downloads: Mutex<Vec<String>>,
	fail_on: Mutex<Option<String>>,
	hold_on: Mutex<Option<String>>,
	held: Notify,
}

impl CallLog {
	fn downloads(&self) -> Vec<String> {
		self.downloads.lock().unwrap().clone()
	}

	fn take_downloads(&self) -> Vec<String> {
		std::mem::take(&mut *self.downloads.lock().unwrap())
	}

	fn fail_on(&self, path: Option<&str>) {
		*self.fail_on.lock().unwrap() = path.map(str::to_string);
	}

	/// Keep the download of `path` open until the attempt is cancelled
	fn hold_on(&self, path: Option<&str>) {
		*self.hold_on.lock().unwrap() = path.map(str::to_string);
	}
}

struct ScriptedTransport {
	inner: DirTransport,
	log: Arc<CallLog>,
}

#[async_trait]
impl Transport for ScriptedTransport {
	async fn head_version_tag(&self, name: &str) -> Result<Option<String>, TransportError> {
		self.log.heads.fetch_add(1, Ordering::SeqCst);
		self.inner.head_version_tag(name).await
	}

	async fn fetch(&self, name: &str) -> Result<Vec<u8>, TransportError> {
		self.log.fetches.fetch_add(1, Ordering::SeqCst);
		self.inner.fetch(name).await
	}

	async fn download(&self, path: &str, dest: &Path) -> Result<(), TransportError> {
		self.log.downloads.lock().unwrap().push(path.to_string());
		if self.log.fail_on.lock().unwrap().as_deref() == Some(path) {
			return Err(TransportError::Status { url: path.to_string(), status: 503 });
		}
		let hold = self.log.hold_on.lock().unwrap().as_deref() == Some(path);
		if hold {
			self.log.held.notify_one();
			std::future::pending::<()>().await;
		}
		self.inner.download(path, dest).await
	}
}

struct Fixture {
	tmp: TempDir,
	log: Arc<CallLog>,
	progress: Arc<Mutex<Vec<u8>>>,
	events: Arc<Mutex<Vec<String>>>,
}

impl Fixture {
	fn new() -> Self {
		let tmp = TempDir::new().unwrap();
		fs::create_dir_all(tmp.path().join("remote")).unwrap();
		Fixture {
			tmp,
			log: Arc::new(CallLog::default()),
			progress: Arc::new(Mutex::new(Vec::new())),
			events: Arc::new(Mutex::new(Vec::new())),
		}
	}

	fn remote(&self) -> PathBuf {
		self.tmp.path().join("remote")
	}

	fn live(&self) -> PathBuf {
		self.tmp.path().join("live")
	}

	fn state_dir(&self) -> PathBuf {
		self.tmp.path().join("state")
	}

	fn marker(&self) -> PathBuf {
		self.state_dir().join("default.syncing")
	}

	fn staging(&self) -> PathBuf {
		self.tmp.path().join("live.staging")
	}

	/// Write files into the mirror and publish a manifest listing them
	///
	/// Returns the version tag the mirror will report.
	fn publish(&self, files: &[(&str, &str, &str)]) -> String {
		let mut entries = Vec::new();
		for (path, tag, content) in files {
			let full = self.remote().join(path);
			fs::create_dir_all(full.parent().unwrap()).unwrap();
			fs::write(&full, content).unwrap();
			entries.push(json!({ "path": path, "etag": tag, "size": content.len() }));
		}
		let manifest = json!({ "files": entries, "lastUpdatedDate": 1_700_000_000_000u64 });
		let bytes = serde_json::to_vec_pretty(&manifest).unwrap();
		fs::write(self.remote().join("content.json"), &bytes).unwrap();
		content_tag(&bytes)
	}

	fn builder(&self) -> SyncBuilder {
		let progress = self.progress.clone();
		let (e1, e2, e3) = (self.events.clone(), self.events.clone(), self.events.clone());
		let notifier = CallbackBuilder::new()
			.on_pre_sync(move || e1.lock().unwrap().push("pre".to_string()))
			.on_progress(move |p| progress.lock().unwrap().push(p))
			.on_phase(move |phase| e2.lock().unwrap().push(format!("phase:{}", phase)))
			.on_post_sync(move |ok, err| {
				e3.lock().unwrap().push(format!("post:{}:{}", ok, err.map_or(0, |e| e.code())))
			})
			.build();

		SyncBuilder::new()
			.content_dir(self.live())
			.state_dir(self.state_dir())
			.transport(ScriptedTransport {
				inner: DirTransport::new(self.remote()),
				log: self.log.clone(),
			})
			.notifier(notifier)
	}

	fn controller(&self) -> SyncController {
		self.builder().build().unwrap()
	}

	async fn stored_tag(&self) -> Option<String> {
		FileVersionStore::for_profile(&self.state_dir(), "default").get().await.unwrap()
	}

	fn take_progress(&self) -> Vec<u8> {
		std::mem::take(&mut *self.progress.lock().unwrap())
	}

	fn take_events(&self) -> Vec<String> {
		std::mem::take(&mut *self.events.lock().unwrap())
	}

	fn live_file(&self, path: &str) -> Option<String> {
		fs::read_to_string(self.live().join(path)).ok()
	}
}

fn assert_monotonic_to_100(progress: &[u8]) {
	assert!(!progress.is_empty(), "no progress reported");
	assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", progress);
	assert_eq!(progress.last(), Some(&100));
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_first_sync_promotes_staging_to_live() {
	let fx = Fixture::new();
	let tag = fx.publish(&[("index.html", "1", "<html>"), ("img/logo.png", "1", "PNG")]);
	let controller = fx.controller();

	let outcome = controller.sync().await.unwrap();

	match outcome {
		SyncOutcome::Updated { version_tag, downloaded, resumed, deleted, bytes } => {
			assert_eq!(version_tag.as_deref(), Some(tag.as_str()));
			assert_eq!((downloaded, resumed, deleted, bytes), (2, 0, 0, 9));
		}
		other => panic!("unexpected outcome {:?}", other),
	}
	assert_eq!(fx.live_file("index.html").as_deref(), Some("<html>"));
	assert_eq!(fx.live_file("img/logo.png").as_deref(), Some("PNG"));
	assert!(fx.live().join("content.json").is_file());
	assert!(!fx.staging().exists());
	assert!(!fx.marker().exists());
	assert_eq!(fx.stored_tag().await, Some(tag));
	assert_eq!(fx.log.downloads(), vec!["index.html", "img/logo.png"]);
	assert_monotonic_to_100(&fx.take_progress());
	assert_eq!(controller.phase(), SyncPhase::Done);
	assert!(controller.last_sync().is_some());
	assert_eq!(controller.progress(), None);
}

#[tokio::test]
async fn test_delta_sync_downloads_changed_and_deletes_removed() {
	let fx = Fixture::new();
	let a1 = "a".repeat(100);
	let b1 = "b".repeat(50);
	fx.publish(&[("a", "1", a1.as_str()), ("b", "1", b1.as_str())]);
	let controller = fx.controller();
	controller.sync().await.unwrap();
	fx.log.take_downloads();
	fx.take_progress();

	let a2 = "A".repeat(100);
	let c1 = "c".repeat(30);
	fs::remove_file(fx.remote().join("b")).unwrap();
	let tag2 = fx.publish(&[("a", "2", a2.as_str()), ("c", "1", c1.as_str())]);

	let outcome = controller.sync().await.unwrap();

	assert_eq!(fx.log.downloads(), vec!["a", "c"]);
	assert!(matches!(outcome, SyncOutcome::Updated { downloaded: 2, deleted: 1, bytes: 130, .. }));
	assert_eq!(fx.live_file("a"), Some(a2));
	assert_eq!(fx.live_file("c"), Some(c1));
	assert!(!fx.live().join("b").exists());
	assert_eq!(fx.stored_tag().await, Some(tag2));
	assert_eq!(fx.take_progress(), vec![76, 100]);
}

#[tokio::test]
async fn test_unchanged_tag_skips_manifest_and_queue() {
	let fx = Fixture::new();
	fx.publish(&[("a", "1", "A")]);
	let controller = fx.controller();
	controller.sync().await.unwrap();
	fx.take_progress();
	fx.take_events();

	let outcome = controller.sync().await.unwrap();

	assert_eq!(outcome, SyncOutcome::Unchanged);
	assert_eq!(fx.log.heads.load(Ordering::SeqCst), 2);
	assert_eq!(fx.log.fetches.load(Ordering::SeqCst), 1);
	assert_eq!(fx.log.downloads().len(), 1);
	assert_eq!(fx.take_progress(), vec![100]);

	let events = fx.take_events();
	assert_eq!(events.first().map(String::as_str), Some("pre"));
	assert_eq!(events.last().map(String::as_str), Some("post:true:0"));
	assert!(!events.iter().any(|e| e == "phase:fetching manifest"));
}

#[tokio::test]
async fn test_crash_mid_download_resumes_without_refetching() {
	let fx = Fixture::new();
	let tag = fx.publish(&[
		("x", "1", "xxxxxxxxxx"),
		("y", "1", "yyyyyyyyyy"),
		("z", "1", "zzzzzzzzzz"),
	]);
	let controller = fx.controller();

	fx.log.fail_on(Some("y"));
	let err = controller.sync().await.unwrap_err();
	match &err {
		SyncError::Download { path, .. } => assert_eq!(path, "y"),
		other => panic!("unexpected error {:?}", other),
	}
	assert_eq!(err.code(), 4);
	assert!(fx.marker().exists());
	assert!(fx.staging().join("x").is_file());
	assert!(!fx.live().exists());
	assert_eq!(fx.stored_tag().await, None);
	assert_eq!(fx.take_progress(), vec![33]);
	assert_eq!(fx.take_events().last().map(String::as_str), Some("post:false:4"));
	assert_eq!(controller.phase(), SyncPhase::Failed);

	fx.log.fail_on(None);
	fx.log.take_downloads();
	let outcome = controller.sync().await.unwrap();

	assert_eq!(fx.log.downloads(), vec!["y", "z"]);
	assert!(matches!(outcome, SyncOutcome::Updated { downloaded: 2, resumed: 1, .. }));
	assert_eq!(fx.live_file("x").as_deref(), Some("xxxxxxxxxx"));
	assert_eq!(fx.live_file("z").as_deref(), Some("zzzzzzzzzz"));
	assert!(!fx.marker().exists());
	assert_eq!(fx.stored_tag().await, Some(tag));
	assert_monotonic_to_100(&fx.take_progress());
}

#[tokio::test]
async fn test_resume_with_new_controller_instance() {
	let fx = Fixture::new();
	fx.publish(&[("x", "1", "1"), ("y", "1", "2")]);

	fx.log.fail_on(Some("y"));
	assert!(fx.controller().sync().await.is_err());

	// A fresh controller, as after a process restart
	fx.log.fail_on(None);
	fx.log.take_downloads();
	fx.controller().sync().await.unwrap();
	assert_eq!(fx.log.downloads(), vec!["y"]);
}

#[tokio::test]
async fn test_staged_files_of_other_version_are_discarded() {
	let fx = Fixture::new();
	fx.publish(&[("x", "1", "old"), ("y", "1", "y")]);
	let controller = fx.controller();
	fx.log.fail_on(Some("y"));
	assert!(controller.sync().await.is_err());

	fx.log.fail_on(None);
	fx.log.take_downloads();
	fx.publish(&[("x", "2", "new"), ("y", "1", "y")]);
	controller.sync().await.unwrap();

	assert_eq!(fx.log.downloads(), vec!["x", "y"]);
	assert_eq!(fx.live_file("x").as_deref(), Some("new"));
}

#[tokio::test]
async fn test_malformed_manifest_is_reported_without_state_change() {
	let fx = Fixture::new();
	fs::write(fx.remote().join("content.json"), b"{ this is not json").unwrap();
	let controller = fx.controller();

	let err = controller.sync().await.unwrap_err();

	assert!(matches!(err, SyncError::ManifestParse { .. }));
	assert_eq!(err.code(), 5);
	assert!(!fx.marker().exists());
	assert!(!fx.staging().exists());
	assert_eq!(fx.stored_tag().await, None);
	assert!(fx.log.downloads().is_empty());
}

#[tokio::test]
async fn test_unsafe_manifest_path_is_rejected() {
	let fx = Fixture::new();
	fx.publish(&[("../escape", "1", "x")]);
	let err = fx.controller().sync().await.unwrap_err();
	assert!(matches!(err, SyncError::ManifestParse { .. }));
	assert!(fx.log.downloads().is_empty());
}

#[tokio::test]
async fn test_missing_manifest_is_network_error() {
	let fx = Fixture::new();
	let err = fx.controller().sync().await.unwrap_err();
	assert!(matches!(err, SyncError::Network(TransportError::NotFound { .. })));
	assert_eq!(err.code(), 2);
	assert_eq!(
		fx.take_events(),
		vec!["pre", "phase:checking version", "phase:failed", "post:false:2"]
	);
}

#[tokio::test]
async fn test_second_sync_while_running_is_rejected() {
	let fx = Fixture::new();
	fx.publish(&[("a", "1", "A"), ("b", "1", "B")]);
	let controller = fx.controller();

	let (first, second) = tokio::join!(controller.sync(), controller.sync());

	assert!(first.is_ok());
	assert!(matches!(second, Err(SyncError::AlreadyInProgress)));
	let events = fx.take_events();
	assert_eq!(events.iter().filter(|e| *e == "pre").count(), 1);
	assert_eq!(events.iter().filter(|e| e.starts_with("post")).count(), 1);
}

#[tokio::test]
async fn test_cancel_keeps_marker_and_resumes() {
	let fx = Fixture::new();
	let tag = fx.publish(&[("a", "1", "A"), ("b", "1", "B"), ("c", "1", "C")]);
	let controller = fx.controller();

	// Hold the second download open, then cancel
	fx.log.hold_on(Some("b"));
	let log = fx.log.clone();
	let controller_ref = &controller;
	let (result, _) = tokio::join!(controller_ref.sync(), async move {
		log.held.notified().await;
		controller_ref.cancel();
	});

	assert!(matches!(result, Err(SyncError::Cancelled)));
	assert!(fx.marker().exists());
	assert_eq!(fx.stored_tag().await, None);

	fx.log.hold_on(None);
	fx.log.take_downloads();
	controller.sync().await.unwrap();

	assert_eq!(fx.log.downloads(), vec!["b", "c"]);
	assert_eq!(fx.live_file("c").as_deref(), Some("C"));
	assert_eq!(fx.stored_tag().await, Some(tag));
}

#[tokio::test]
async fn test_timeout_cancels_attempt() {
	let fx = Fixture::new();
	fx.publish(&[("a", "1", "A")]);
	fx.log.hold_on(Some("a"));
	let controller = fx.builder().sync_timeout(Duration::from_millis(50)).build().unwrap();

	let err = controller.sync().await.unwrap_err();

	assert!(matches!(err, SyncError::Cancelled));
	assert_eq!(err.code(), 8);
	assert!(fx.marker().exists());
	assert!(!controller.is_running());
}

#[tokio::test]
async fn test_deleting_last_file_prunes_empty_directories() {
	let fx = Fixture::new();
	fx.publish(&[("keep.txt", "1", "k"), ("docs/old/page.html", "1", "p")]);
	let controller = fx.controller();
	controller.sync().await.unwrap();
	assert!(fx.live().join("docs/old").is_dir());

	fx.publish(&[("keep.txt", "1", "k")]);
	let outcome = controller.sync().await.unwrap();

	assert!(matches!(outcome, SyncOutcome::Updated { downloaded: 0, deleted: 1, .. }));
	assert!(!fx.live().join("docs").exists());
	assert_eq!(fx.live_file("keep.txt").as_deref(), Some("k"));
}

#[tokio::test]
async fn test_file_becomes_directory() {
	let fx = Fixture::new();
	fx.publish(&[("a", "1", "A")]);
	let controller = fx.controller();
	controller.sync().await.unwrap();

	fs::remove_file(fx.remote().join("a")).unwrap();
	fx.publish(&[("a/b", "1", "B")]);
	let outcome = controller.sync().await.unwrap();

	assert!(matches!(outcome, SyncOutcome::Updated { downloaded: 1, deleted: 1, .. }));
	assert_eq!(fx.live_file("a/b").as_deref(), Some("B"));
	assert!(!fx.marker().exists());
}

#[tokio::test]
async fn test_directory_becomes_file() {
	let fx = Fixture::new();
	fx.publish(&[("a/b", "1", "B"), ("a/c", "1", "C")]);
	let controller = fx.controller();
	controller.sync().await.unwrap();

	fs::remove_dir_all(fx.remote().join("a")).unwrap();
	fx.publish(&[("a", "1", "A")]);
	let outcome = controller.sync().await.unwrap();

	assert!(matches!(outcome, SyncOutcome::Updated { downloaded: 1, deleted: 2, .. }));
	assert!(fx.live().join("a").is_file());
	assert_eq!(fx.live_file("a").as_deref(), Some("A"));
}

#[tokio::test]
async fn test_commit_cut_off_after_manifest_promotion_is_finished() {
	let fx = Fixture::new();
	let tag1 = fx.publish(&[("a", "1", "A")]);
	let controller = fx.controller();
	controller.sync().await.unwrap();

	// Version 2 is half promoted: its manifest is live, b.txt is still staged
	let tag2 = fx.publish(&[("a", "1", "A"), ("b.txt", "1", "B")]);
	fs::copy(fx.remote().join("content.json"), fx.live().join("content.json")).unwrap();
	fs::create_dir_all(fx.staging()).unwrap();
	fs::write(fx.staging().join("b.txt"), "B").unwrap();
	let marker = SyncMarker::new(Uuid::new_v4(), Some(tag2.clone()));
	fs::write(fx.marker(), serde_json::to_vec(&marker).unwrap()).unwrap();
	assert_eq!(fx.stored_tag().await, Some(tag1));
	fx.log.take_downloads();
	fx.take_progress();

	let outcome = controller.sync().await.unwrap();

	assert!(matches!(outcome, SyncOutcome::Updated { downloaded: 0, deleted: 0, .. }));
	assert_eq!(fx.live_file("b.txt").as_deref(), Some("B"));
	assert!(fx.log.downloads().is_empty());
	assert!(!fx.staging().exists());
	assert!(!fx.marker().exists());
	assert_eq!(fx.stored_tag().await, Some(tag2));
	assert_eq!(fx.take_progress(), vec![100]);
}

#[tokio::test]
async fn test_commit_cut_off_before_manifest_promotion_is_finished() {
	let fx = Fixture::new();
	fx.publish(&[("a", "1", "A1"), ("old", "1", "O")]);
	let controller = fx.controller();
	controller.sync().await.unwrap();

	// Version 2 was merged up to a; b and the manifest are still staged
	fs::remove_file(fx.remote().join("old")).unwrap();
	let tag2 = fx.publish(&[("a", "2", "A2"), ("b", "1", "B")]);
	fs::write(fx.live().join("a"), "A2").unwrap();
	fs::create_dir_all(fx.staging()).unwrap();
	fs::write(fx.staging().join("b"), "B").unwrap();
	fs::copy(fx.remote().join("content.json"), fx.staging().join("content.json")).unwrap();
	let marker = SyncMarker::new(Uuid::new_v4(), Some(tag2.clone()));
	fs::write(fx.marker(), serde_json::to_vec(&marker).unwrap()).unwrap();

	controller.sync().await.unwrap();

	assert_eq!(fx.live_file("a").as_deref(), Some("A2"));
	assert_eq!(fx.live_file("b").as_deref(), Some("B"));
	assert!(!fx.live().join("old").exists());
	assert_eq!(
		fs::read(fx.live().join("content.json")).unwrap(),
		fs::read(fx.remote().join("content.json")).unwrap()
	);
	assert!(!fx.marker().exists());
	assert_eq!(fx.stored_tag().await, Some(tag2));
}

#[tokio::test]
async fn test_reset_rediffs_against_live_manifest() {
	let fx = Fixture::new();
	let tag = fx.publish(&[("a", "1", "A")]);
	let controller = fx.controller();
	controller.sync().await.unwrap();

	controller.reset().await.unwrap();
	assert_eq!(fx.stored_tag().await, None);

	fx.log.take_downloads();
	let outcome = controller.sync().await.unwrap();

	// Live manifest still matches, so nothing is transferred
	assert_eq!(outcome, SyncOutcome::Unchanged);
	assert!(fx.log.downloads().is_empty());
	assert_eq!(fx.log.fetches.load(Ordering::SeqCst), 2);
	assert_eq!(fx.stored_tag().await, Some(tag));
}

#[tokio::test]
async fn test_phases_in_order() {
	let fx = Fixture::new();
	fx.publish(&[("a", "1", "A")]);
	fx.controller().sync().await.unwrap();

	let phases: Vec<String> =
		fx.take_events().into_iter().filter(|e| e.starts_with("phase:")).collect();
	assert_eq!(
		phases,
		vec![
			"phase:checking version",
			"phase:fetching manifest",
			"phase:diffing",
			"phase:downloading",
			"phase:committing",
			"phase:done",
		]
	);
}

// vim: ts=4
