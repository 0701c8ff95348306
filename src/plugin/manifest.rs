use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Contents of a `plugin.toml` or single-file unit manifest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnitManifest {
	/// Name of the mount entry point.
	#[serde(default)]
	pub setup: Option<String>,
	/// Shared library exporting the entry point, relative to the manifest.
	#[serde(default)]
	pub library: Option<PathBuf>,
	/// Unit configuration handed to the entry point while it mounts.
	#[serde(default)]
	pub config: serde_json::Value,
}

impl UnitManifest {
	pub fn read(path: &Path) -> Result<Self, ConfigError> {
		Config::builder()
			.add_source(File::from(path).format(FileFormat::Toml))
			.build()?
			.try_deserialize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;

	#[test]
	fn reads_all_fields() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("plugin.toml");
		fs::write(
			&path,
			"setup = \"acme\"\nlibrary = \"libacme.so\"\n\n[config]\ngreeting = \"hi\"\nretries = 3\n",
		)
		.unwrap();

		let manifest = UnitManifest::read(&path).unwrap();
		assert_eq!(manifest.setup.as_deref(), Some("acme"));
		assert_eq!(manifest.library, Some(PathBuf::from("libacme.so")));
		assert_eq!(
			manifest.config,
			serde_json::json!({ "greeting": "hi", "retries": 3 })
		);
	}

	#[test]
	fn empty_manifest_has_no_entry_point() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("plugin.toml");
		fs::write(&path, "").unwrap();

		let manifest = UnitManifest::read(&path).unwrap();
		assert!(manifest.setup.is_none());
		assert!(manifest.config.is_null());
	}
}
