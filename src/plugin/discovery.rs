use super::catalog::Catalog;
use super::manifest::UnitManifest;
use crate::server::{MountEntryPoint, Origin};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Manifest file name of a directory-package unit.
pub const PACKAGE_MANIFEST: &str = "plugin.toml";
/// File in the plugin root that is never treated as a unit.
pub const RESERVED_INITIALIZER: &str = "mod.toml";

const MANIFEST_EXTENSION: &str = "toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
	/// A directory holding a `plugin.toml`
	Package,
	/// A single manifest file in the plugin root
	File,
}

impl fmt::Display for UnitKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Package => f.write_str("package"),
			Self::File => f.write_str("file"),
		}
	}
}

/// A unit candidate found below the plugin root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredUnit {
	pub name: String,
	pub kind: UnitKind,
	/// The directory of a package, or the manifest file of a single-file unit
	pub path: PathBuf,
}

impl DiscoveredUnit {
	pub fn manifest_path(&self) -> PathBuf {
		match self.kind {
			UnitKind::Package => self.path.join(PACKAGE_MANIFEST),
			UnitKind::File => self.path.clone(),
		}
	}

	/// Directory that relative paths in the manifest are resolved against.
	#[cfg_attr(not(feature = "plugins"), allow(dead_code))]
	pub fn base_dir(&self) -> &Path {
		match self.kind {
			UnitKind::Package => &self.path,
			UnitKind::File => self.path.parent().unwrap_or_else(|| Path::new(".")),
		}
	}
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("Failed to read plugin root {}: {source}", .path.display())]
	ReadRoot {
		path: PathBuf,
		source: std::io::Error,
	},
	#[error("Plugin package {} has no plugin.toml", .path.display())]
	MissingManifest { path: PathBuf },
	#[error("Invalid plugin manifest {}: {source}", .path.display())]
	InvalidManifest {
		path: PathBuf,
		source: config::ConfigError,
	},
	#[error("Plugin manifest {} does not name a setup entry point", .path.display())]
	MissingEntryPoint { path: PathBuf },
	#[error("Plugin manifest {} names unknown entry point {name}", .path.display())]
	UnknownEntryPoint { path: PathBuf, name: String },
	#[cfg(not(feature = "plugins"))]
	#[error("Plugin manifest {} loads a library, but the host was built without the plugins feature", .path.display())]
	LibrariesDisabled { path: PathBuf },
	#[cfg(feature = "plugins")]
	#[error("Failed to load plugin library {}: {message}", .path.display())]
	Library { path: PathBuf, message: String },
	#[cfg(feature = "plugins")]
	#[error("Plugin library {} exports {actual}, but its manifest expects {expected}", .path.display())]
	LibraryMismatch {
		path: PathBuf,
		expected: String,
		actual: String,
	},
}

/// Lists the unit candidates below `root`: packages first, then single files, each sorted
/// by name. A missing root yields no candidates.
pub fn scan(root: &Path) -> Result<Vec<DiscoveredUnit>, DiscoveryError> {
	if !root.exists() {
		info!(root = %root.display(), "Plugin root does not exist, no plugins to discover");
		return Ok(Vec::new());
	}

	let read_error = |source| DiscoveryError::ReadRoot {
		path: root.to_path_buf(),
		source,
	};

	let mut packages = Vec::new();
	let mut files = Vec::new();
	for entry in fs::read_dir(root).map_err(read_error)? {
		let path = entry.map_err(read_error)?.path();
		let Some(file_name) = path.file_name().map(|name| name.to_string_lossy().into_owned())
		else {
			continue;
		};

		if file_name.starts_with('.') {
			debug!(path = %path.display(), "Skipping hidden entry");
			continue;
		}

		if path.is_dir() {
			packages.push(DiscoveredUnit {
				name: file_name,
				kind: UnitKind::Package,
				path,
			});
		} else if path.is_file() {
			let is_manifest = path
				.extension()
				.is_some_and(|extension| extension == MANIFEST_EXTENSION);
			if file_name == RESERVED_INITIALIZER || !is_manifest {
				debug!(path = %path.display(), "Skipping non-unit file");
				continue;
			}
			let name = path
				.file_stem()
				.map_or_else(String::new, |stem| stem.to_string_lossy().into_owned());
			files.push(DiscoveredUnit {
				name,
				kind: UnitKind::File,
				path,
			});
		}
	}

	// read_dir order is platform dependent
	packages.sort_by(|a, b| a.name.cmp(&b.name));
	files.sort_by(|a, b| a.name.cmp(&b.name));
	packages.extend(files);
	Ok(packages)
}

/// Resolves the mount entry point of every unit below `root`, in mount order.
///
/// The first unit that cannot be resolved fails the whole pass. Nothing is mounted here.
pub fn discover(root: &Path, catalog: &Catalog) -> Result<Vec<MountEntryPoint>, DiscoveryError> {
	let units = scan(root)?;
	let entry_points = units
		.iter()
		.map(|unit| resolve(unit, catalog))
		.collect::<Result<Vec<_>, _>>()?;

	for entry_point in &entry_points {
		debug!(unit = entry_point.name(), origin = %entry_point.origin(), "Queued for mounting");
	}
	info!(
		root = %root.display(),
		units = entry_points.len(),
		"Discovered plugin units"
	);
	Ok(entry_points)
}

fn resolve(unit: &DiscoveredUnit, catalog: &Catalog) -> Result<MountEntryPoint, DiscoveryError> {
	let manifest_path = unit.manifest_path();
	if !manifest_path.is_file() {
		return Err(DiscoveryError::MissingManifest {
			path: unit.path.clone(),
		});
	}

	let manifest =
		UnitManifest::read(&manifest_path).map_err(|source| DiscoveryError::InvalidManifest {
			path: manifest_path.clone(),
			source,
		})?;
	let setup = manifest
		.setup
		.clone()
		.ok_or_else(|| DiscoveryError::MissingEntryPoint {
			path: manifest_path.clone(),
		})?;
	let origin = Origin::Unit {
		path: unit.path.clone(),
		kind: unit.kind,
	};

	if let Some(library) = &manifest.library {
		return resolve_library(unit, &manifest_path, library, &setup, origin, manifest.config);
	}

	let setup_fn = catalog
		.get(&setup)
		.ok_or_else(|| DiscoveryError::UnknownEntryPoint {
			path: manifest_path,
			name: setup.clone(),
		})?;
	debug!(unit = %unit.name, entry_point = %setup, "Resolved compiled-in entry point");

	Ok(MountEntryPoint::unit(
		&unit.name,
		origin,
		manifest.config,
		setup_fn,
	))
}

#[cfg(feature = "plugins")]
fn resolve_library(
	unit: &DiscoveredUnit,
	_manifest_path: &Path,
	library: &Path,
	setup: &str,
	origin: Origin,
	config: serde_json::Value,
) -> Result<MountEntryPoint, DiscoveryError> {
	let library_path = unit.base_dir().join(library);
	let loaded = super::library::open(&library_path, setup)?;
	Ok(loaded.into_entry_point(&unit.name, origin, config))
}

#[cfg(not(feature = "plugins"))]
fn resolve_library(
	_unit: &DiscoveredUnit,
	manifest_path: &Path,
	_library: &Path,
	_setup: &str,
	_origin: Origin,
	_config: serde_json::Value,
) -> Result<MountEntryPoint, DiscoveryError> {
	Err(DiscoveryError::LibrariesDisabled {
		path: manifest_path.to_path_buf(),
	})
}
