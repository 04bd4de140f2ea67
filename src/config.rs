//! Unified configuration for contentsync
//!
//! The configuration follows a priority chain:
//! 1. Built-in defaults (Config::default())
//! 2. Config file (`<stateDir>/config.toml`, `config.json5` or an explicit `-c FILE`)
//! 3. Environment variables (CONTENTSYNC_* prefix)
//! 4. CLI flags (highest priority)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::staging::StagingArea;
use crate::validation::{validate_manifest_name, validate_source, validate_timeout_secs};

/// Manifest document name used when none is configured
pub const DEFAULT_MANIFEST_NAME: &str = "content.json";

/// User agent sent by the HTTP transport
pub const DEFAULT_USER_AGENT: &str = concat!("contentsync/", env!("CARGO_PKG_VERSION"));

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "CONTENTSYNC_";

// ============================================================================
// MAIN CONFIGURATION STRUCT
// ============================================================================

/// Configuration of one sync target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	// ========================================================================
	// RUNTIME & STATE MANAGEMENT
	// ========================================================================
	/// Home directory for state files (~/.contentsync)
	pub state_dir: PathBuf,

	/// Profile name; isolates the version record and marker of each target
	pub profile: String,

	// ========================================================================
	// CONTENT LOCATIONS
	// ========================================================================
	/// HTTP(S) base URL or local mirror directory
	pub source: Option<String>,

	/// Live content directory
	pub content_dir: Option<PathBuf>,

	/// Staging directory (defaults to `<contentDir>.staging`)
	pub staging_dir: Option<PathBuf>,

	/// Name of the manifest document, relative to the source root
	pub manifest_name: String,

	// ========================================================================
	// NETWORK
	// ========================================================================
	/// Per-request timeout in seconds
	pub request_timeout_secs: u64,

	/// Whole-attempt timeout in seconds; an expired attempt is cancelled
	pub sync_timeout_secs: Option<u64>,

	/// HTTP User-Agent header
	pub user_agent: String,

	// ========================================================================
	// OUTPUT & LOGGING
	// ========================================================================
	/// Show a progress bar during sync
	pub show_progress: bool,

	/// Log level (trace, debug, info, warn, error)
	pub log_level: String,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			// Runtime
			state_dir: std::env::var("HOME")
				.ok()
				.map(|h| PathBuf::from(h).join(".contentsync"))
				.unwrap_or_else(|| PathBuf::from(".contentsync")),
			profile: "default".to_string(),

			// Locations
			source: None,
			content_dir: None,
			staging_dir: None,
			manifest_name: DEFAULT_MANIFEST_NAME.to_string(),

			// Network
			request_timeout_secs: 30,
			sync_timeout_secs: None,
			user_agent: DEFAULT_USER_AGENT.to_string(),

			// Output
			show_progress: true,
			log_level: "info".to_string(),
		}
	}
}

// ============================================================================
// LOADING
// ============================================================================

impl Config {
	/// Parse a config document; `.toml` files use TOML, everything else JSON5
	pub fn parse(path: &Path, contents: &str) -> Result<Config, SyncError> {
		let is_toml = path.extension().map_or(false, |ext| ext == "toml");
		let parsed = if is_toml {
			toml::from_str(contents).map_err(|e| e.to_string())
		} else {
			json5::from_str(contents).map_err(|e| e.to_string())
		};
		parsed.map_err(|message| SyncError::InvalidConfig {
			message: format!("{}: {}", path.display(), message),
		})
	}

	/// Load a config file on top of the built-in defaults
	pub fn load(path: &Path) -> Result<Config, SyncError> {
		let contents = std::fs::read_to_string(path).map_err(|e| SyncError::InvalidConfig {
			message: format!("cannot read {}: {}", path.display(), e),
		})?;
		Self::parse(path, &contents)
	}

	/// First existing default config file in `state_dir`
	pub fn find_default_file(state_dir: &Path) -> Option<PathBuf> {
		["config.toml", "config.json5", "config.json"]
			.iter()
			.map(|name| state_dir.join(name))
			.find(|path| path.is_file())
	}

	/// Apply CONTENTSYNC_* variables from the process environment
	pub fn apply_env(&mut self) -> Result<(), SyncError> {
		self.apply_env_from(|name| std::env::var(name).ok())
	}

	/// Apply CONTENTSYNC_* variables obtained through `lookup`
	pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), SyncError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let var = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key));

		if let Some(v) = var("STATE_DIR") {
			self.state_dir = PathBuf::from(v);
		}
		if let Some(v) = var("PROFILE") {
			self.profile = v;
		}
		if let Some(v) = var("SOURCE") {
			self.source = Some(v);
		}
		if let Some(v) = var("CONTENT_DIR") {
			self.content_dir = Some(PathBuf::from(v));
		}
		if let Some(v) = var("STAGING_DIR") {
			self.staging_dir = Some(PathBuf::from(v));
		}
		if let Some(v) = var("MANIFEST_NAME") {
			self.manifest_name = v;
		}
		if let Some(v) = var("REQUEST_TIMEOUT") {
			self.request_timeout_secs = parse_env("REQUEST_TIMEOUT", &v)?;
		}
		if let Some(v) = var("SYNC_TIMEOUT") {
			self.sync_timeout_secs = Some(parse_env("SYNC_TIMEOUT", &v)?);
		}
		if let Some(v) = var("USER_AGENT") {
			self.user_agent = v;
		}
		if let Some(v) = var("SHOW_PROGRESS") {
			self.show_progress = parse_bool("SHOW_PROGRESS", &v)?;
		}
		if let Some(v) = var("LOG_LEVEL") {
			self.log_level = v;
		}
		Ok(())
	}

	/// Check the values a sync needs
	pub fn validate(&self) -> Result<(), SyncError> {
		if self.profile.is_empty() || self.profile.contains(['/', '\\']) {
			return Err(SyncError::InvalidConfig {
				message: format!("Invalid profile name {:?}", self.profile),
			});
		}
		validate_manifest_name(&self.manifest_name)?;
		validate_timeout_secs(self.request_timeout_secs)?;
		if let Some(secs) = self.sync_timeout_secs {
			validate_timeout_secs(secs)?;
		}
		match &self.source {
			Some(source) => validate_source(source)?,
			None => return Err(SyncError::InvalidConfig { message: "source not set".into() }),
		}
		if self.content_dir.is_none() {
			return Err(SyncError::InvalidConfig { message: "content directory not set".into() });
		}
		Ok(())
	}

	// ========================================================================
	// DERIVED PATHS
	// ========================================================================

	/// Version record of this profile
	pub fn state_file(&self) -> PathBuf {
		self.state_dir.join(format!("{}.json", self.profile))
	}

	/// Interruption marker of this profile
	pub fn marker_file(&self) -> PathBuf {
		self.state_dir.join(format!("{}.syncing", self.profile))
	}

	/// Configured staging directory, or the default next to the content dir
	pub fn effective_staging_dir(&self) -> Option<PathBuf> {
		self.staging_dir.clone().or_else(|| self.content_dir.as_deref().map(default_staging_dir))
	}

	/// Staging area a sync of this profile uses
	///
	/// `None` when neither a staging dir nor a content dir is configured.
	pub fn staging_area(&self) -> Option<StagingArea> {
		let dir = self.effective_staging_dir()?;
		Some(StagingArea::new(dir, self.marker_file()).with_document(&self.manifest_name))
	}
}

/// Sibling `<name>.staging` of the content directory
pub fn default_staging_dir(content_dir: &Path) -> PathBuf {
	let mut name =
		content_dir.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "content".into());
	name.push(".staging");
	content_dir.with_file_name(name)
}

fn parse_env(key: &str, value: &str) -> Result<u64, SyncError> {
	value.trim().parse().map_err(|_| SyncError::InvalidConfig {
		message: format!("{}{} must be a number of seconds, got {:?}", ENV_PREFIX, key, value),
	})
}

fn parse_bool(key: &str, value: &str) -> Result<bool, SyncError> {
	match value.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		_ => Err(SyncError::InvalidConfig {
			message: format!("{}{} must be a boolean, got {:?}", ENV_PREFIX, key, value),
		}),
	}
}


// vim: ts=4
