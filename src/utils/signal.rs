//! Signal handlers for graceful termination
//!
//! The first SIGINT/SIGTERM cancels the running sync attempt, which keeps
//! its staging marker so the next run resumes. A second signal exits.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` on the first termination signal
pub fn setup_signal_handlers(token: CancellationToken) {
	let count = Arc::new(AtomicU32::new(0));

	tokio::spawn(async move {
		use tokio::signal;

		let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGTERM handler: {}. Process will not handle SIGTERM gracefully.", e);
				return;
			}
		};

		let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
			Ok(stream) => stream,
			Err(e) => {
				warn!("Failed to setup SIGINT handler: {}. Process will not handle SIGINT gracefully.", e);
				return;
			}
		};

		loop {
			let code = tokio::select! {
				_ = sigterm.recv() => 143, // 128 + SIGTERM(15)
				_ = sigint.recv() => 130,  // 128 + SIGINT(2)
			};

			if count.fetch_add(1, Ordering::SeqCst) == 0 {
				info!("Received termination signal, cancelling sync (staged files are kept)");
				token.cancel();
			} else {
				warn!("Second signal received, exiting");
				std::process::exit(code);
			}
		}
	});
}


// vim: ts=4
