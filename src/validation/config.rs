//! Configuration validation functions

use super::ValidationError;

/// Validate timeout in seconds
pub fn validate_timeout_secs(timeout_secs: u64) -> Result<(), ValidationError> {
	if timeout_secs == 0 {
		return Err(ValidationError::ConfigError("Timeout must be greater than 0".to_string()));
	}
	if timeout_secs > 86_400 {
		return Err(ValidationError::ConfigError(format!(
			"Timeout too large: {} seconds (max 86400)",
			timeout_secs
		)));
	}
	Ok(())
}

/// Validate the manifest document name
///
/// The manifest is stored at the top of the content directory, so its name
/// must be a single plain file name.
pub fn validate_manifest_name(name: &str) -> Result<(), ValidationError> {
	if name.is_empty() || name == "." || name == ".." {
		return Err(ValidationError::ConfigError(format!("Invalid manifest name {:?}", name)));
	}
	if name.contains('/') || name.contains('\\') {
		return Err(ValidationError::ConfigError(format!(
			"Manifest name must not contain path separators: {:?}",
			name
		)));
	}
	Ok(())
}

/// Validate the source location (HTTP base URL or local directory)
pub fn validate_source(source: &str) -> Result<(), ValidationError> {
	if source.trim().is_empty() {
		return Err(ValidationError::ConfigError("Source must not be empty".to_string()));
	}
	if source.contains("://") && !(source.starts_with("http://") || source.starts_with("https://")) {
		return Err(ValidationError::ConfigError(format!("Unsupported source scheme: {}", source)));
	}
	Ok(())
}


// vim: ts=4
