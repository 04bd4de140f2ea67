//! # contentsync - Crash-safe content directory synchronizer
//!
//! contentsync keeps a local directory in step with a remote file tree
//! described by a manifest (`content.json`). It probes the manifest's
//! version tag, diffs the new manifest against the one that is live,
//! downloads changed files one at a time into a staging directory and
//! promotes them into the live directory. An interrupted attempt leaves a
//! marker behind, and the next attempt resumes where it stopped.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use contentsync::sync::SyncBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = SyncBuilder::new()
//!         .source("https://cdn.example.com/site/")
//!         .content_dir("/srv/site")
//!         .build()?;
//!     let outcome = controller.sync().await?;
//!     println!("{}", outcome);
//!     Ok(())
//! }
//! ```
//!
//! ## Observing progress
//!
//! ```rust,ignore
//! use contentsync::callbacks::CallbackBuilder;
//!
//! let notifier = CallbackBuilder::new()
//!     .on_progress(|percent| eprintln!("{}%", percent))
//!     .on_post_sync(|ok, err| eprintln!("done: {} {:?}", ok, err.map(|e| e.code())))
//!     .build();
//! let controller = SyncBuilder::new().notifier(notifier) /* ... */;
//! ```

pub mod callbacks;
pub mod config;
pub mod diff;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod progress;
pub mod queue;
pub mod staging;
pub mod state;
pub mod sync;
pub mod transport;
pub mod types;
pub mod utils;
pub mod validation;

// Re-export commonly used types and functions
pub use config::Config;
pub use error::{StateError, SyncError, TransportError};
pub use manifest::{FileEntry, Manifest};
pub use sync::{SyncBuilder, SyncController};
pub use types::{SyncOutcome, SyncPhase};

// vim: ts=4
