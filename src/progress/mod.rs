//! Progress display callback for CLI sync

pub mod constants;

use std::io::Write;
use std::sync::Mutex;
use std::time::Instant;
use tracing::info;

use crate::callbacks::SyncNotifier;
use crate::error::SyncError;
use crate::manifest::FileEntry;
use crate::types::SyncPhase;

/// Progress display constants
pub use constants::*;

/// Shared state for progress tracking
#[derive(Debug)]
pub struct ProgressState {
	pub current_phase: Mutex<Option<SyncPhase>>,
	pub last_update: Mutex<Option<Instant>>,
	pub files_done: Mutex<usize>,
	pub bytes_done: Mutex<u64>,
}

impl ProgressState {
	/// Create a new progress state
	pub fn new() -> Self {
		Self {
			current_phase: Mutex::new(None),
			last_update: Mutex::new(None),
			files_done: Mutex::new(0),
			bytes_done: Mutex::new(0),
		}
	}
}

impl Default for ProgressState {
	fn default() -> Self {
		Self::new()
	}
}

/// Render a bar like `[=====     ]  50%`
pub fn render_bar(percent: u8) -> String {
	let ratio = (percent.min(100) as f64) / 100.0;
	let filled = (ratio * PROGRESS_BAR_WIDTH as f64) as usize;
	format!(
		"[{}{}] {:>3}%",
		"=".repeat(filled),
		" ".repeat(PROGRESS_BAR_WIDTH - filled),
		percent.min(100)
	)
}

/// CLI progress callback - draws a single updating line on stderr
pub struct CliProgress {
	state: ProgressState,
}

impl CliProgress {
	/// Create a new progress callback
	pub fn new() -> Self {
		Self { state: ProgressState::new() }
	}

	pub fn state(&self) -> &ProgressState {
		&self.state
	}

	/// Whether enough time passed since the last redraw; 100% always draws
	fn should_draw(&self, percent: u8) -> bool {
		let mut last = self.state.last_update.lock().unwrap_or_else(|e| e.into_inner());
		if percent < 100 {
			if let Some(at) = *last {
				if at.elapsed().as_millis() < UPDATE_THROTTLE_MS {
					return false;
				}
			}
		}
		*last = Some(Instant::now());
		true
	}
}

impl Default for CliProgress {
	fn default() -> Self {
		Self::new()
	}
}

impl SyncNotifier for CliProgress {
	fn on_pre_sync(&self) {
		*self.state.files_done.lock().unwrap_or_else(|e| e.into_inner()) = 0;
		*self.state.bytes_done.lock().unwrap_or_else(|e| e.into_inner()) = 0;
		*self.state.last_update.lock().unwrap_or_else(|e| e.into_inner()) = None;
	}

	fn on_phase(&self, phase: SyncPhase) {
		*self.state.current_phase.lock().unwrap_or_else(|e| e.into_inner()) = Some(phase);
		if phase.is_active() {
			info!("→ {}...", phase);
		}
	}

	fn on_file_downloaded(&self, entry: &FileEntry) {
		*self.state.files_done.lock().unwrap_or_else(|e| e.into_inner()) += 1;
		let mut bytes_done = self.state.bytes_done.lock().unwrap_or_else(|e| e.into_inner());
		*bytes_done = bytes_done.saturating_add(entry.size());
	}

	fn on_progress(&self, percent: u8) {
		if !self.should_draw(percent) {
			return;
		}
		let files = *self.state.files_done.lock().unwrap_or_else(|e| e.into_inner());
		let bytes = *self.state.bytes_done.lock().unwrap_or_else(|e| e.into_inner());
		let _ = write!(
			std::io::stderr(),
			"\r  Syncing: {} {} file(s), {:.1} MB",
			render_bar(percent),
			files,
			bytes as f64 / BYTES_PER_MB
		);
		let _ = std::io::stderr().flush();
	}

	fn on_post_sync(&self, success: bool, error: Option<&SyncError>) {
		let drew = self.state.last_update.lock().unwrap_or_else(|e| e.into_inner()).is_some();
		if drew {
			let _ = writeln!(std::io::stderr());
		}
		if let (false, Some(e)) = (success, error) {
			let _ = writeln!(std::io::stderr(), "  Sync failed: {}", e);
		}
	}
}


// vim: ts=4
