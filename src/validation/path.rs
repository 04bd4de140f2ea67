//! Path validation functions

use std::path::{Component, Path};

use super::ValidationError;
use crate::transport::PART_SUFFIX;

/// Check if a path is safe (no parent directory references)
pub fn is_path_safe(path: &Path) -> bool {
	!path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Check if path is within a root directory
pub fn is_path_within_root(path: &Path, root: &Path) -> bool {
	path.starts_with(root)
}

/// Validate that path is within root directory
pub fn validate_path_within_root(path: &Path, root: &Path) -> Result<(), ValidationError> {
	if !is_path_within_root(path, root) {
		return Err(ValidationError::PathError(format!(
			"Path {:?} is outside root directory {:?}",
			path, root
		)));
	}
	Ok(())
}

/// Whether a file name belongs to an unfinished transport download
pub fn is_scratch_file(path: &Path) -> bool {
	path.file_name().and_then(|n| n.to_str()).map_or(false, |n| n.ends_with(PART_SUFFIX))
}

/// Validate a manifest entry path
///
/// Entry paths are `/`-separated, relative, and made only of normal
/// segments, so that the path string alone identifies a file below the
/// content directory.
pub fn validate_entry_path(path: &str) -> Result<(), ValidationError> {
	if path.is_empty() {
		return Err(ValidationError::PathError("Path is empty".to_string()));
	}
	if path.contains('\\') || path.contains('\0') {
		return Err(ValidationError::PathError(format!("Path {:?} contains invalid characters", path)));
	}

	let p = Path::new(path);
	if p.is_absolute() || path.starts_with('/') {
		return Err(ValidationError::PathError(format!(
			"Path must be relative, got absolute path: {:?}",
			path
		)));
	}
	if !is_path_safe(p) {
		return Err(ValidationError::PathError(
			"Path contains parent directory reference (..)".to_string(),
		));
	}
	if path.split('/').any(|seg| seg.is_empty() || seg == ".") {
		return Err(ValidationError::PathError(format!("Path {:?} is not normalized", path)));
	}
	if is_scratch_file(p) {
		return Err(ValidationError::PathError(format!(
			"Path {:?} uses the reserved suffix {}",
			path, PART_SUFFIX
		)));
	}
	Ok(())
}


// vim: ts=4
