//! The mount target handed to plugin entry points, and the coordinator that applies them.

use crate::api;
use crate::config::PluginsConfig;
use crate::plugin::{self, Catalog, DiscoveryError, UnitKind};
use crate::AppState;
use axum::routing::MethodRouter;
use axum::Router;
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

/// Signature of a compiled-in mount entry point.
pub type SetupFn = fn(&mut Server) -> anyhow::Result<()>;

type BoxedSetup = Box<dyn FnOnce(&mut Server) -> anyhow::Result<()>>;

#[derive(Debug, Error)]
pub enum MountError {
	#[error("Route {path} is already registered")]
	DuplicateRoute { path: String },
	#[error("Route path {path} is invalid: {reason}")]
	InvalidPath { path: String, reason: &'static str },
	#[error("Route {path} captures differently than the registered route {existing}")]
	ConflictingRoute { path: String, existing: String },
	#[error("Failed to mount {name}: {source:#}")]
	EntryPoint {
		name: String,
		#[source]
		source: anyhow::Error,
	},
}

#[derive(Debug, Error)]
pub enum StartupError {
	#[error(transparent)]
	Discovery(#[from] DiscoveryError),
	#[error(transparent)]
	Mount(#[from] MountError),
}

/// Where a mount entry point comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
	Builtin,
	Unit { path: PathBuf, kind: UnitKind },
}

impl fmt::Display for Origin {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Builtin => f.write_str("builtin"),
			Self::Unit { path, kind } => write!(f, "{kind} {}", path.display()),
		}
	}
}

/// A function that registers capabilities on the server. Invoked exactly once.
pub struct MountEntryPoint {
	name: String,
	origin: Origin,
	config: serde_json::Value,
	setup: BoxedSetup,
}

impl MountEntryPoint {
	pub fn builtin(name: impl Into<String>, setup: SetupFn) -> Self {
		Self {
			name: name.into(),
			origin: Origin::Builtin,
			config: serde_json::Value::Null,
			setup: Box::new(setup),
		}
	}

	pub fn unit(
		name: impl Into<String>,
		origin: Origin,
		config: serde_json::Value,
		setup: impl FnOnce(&mut Server) -> anyhow::Result<()> + 'static,
	) -> Self {
		Self {
			name: name.into(),
			origin,
			config,
			setup: Box::new(setup),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub const fn origin(&self) -> &Origin {
		&self.origin
	}
}

impl fmt::Debug for MountEntryPoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MountEntryPoint")
			.field("name", &self.name)
			.field("origin", &self.origin)
			.finish_non_exhaustive()
	}
}

/// The server instance entry points register their routes on.
pub struct Server {
	router: Router<AppState>,
	paths: BTreeSet<String>,
	/// Registered paths with capture names erased; two paths with the same shape collide.
	shapes: BTreeSet<String>,
	/// Every capture seen so far, keyed by the shape of the path leading up to it.
	captures: HashMap<String, Capture>,
	unit_config: serde_json::Value,
	mounted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Capture {
	name: String,
	catch_all: bool,
	route: String,
}

impl Server {
	pub fn new() -> Self {
		Self {
			router: Router::new(),
			paths: BTreeSet::new(),
			shapes: BTreeSet::new(),
			captures: HashMap::new(),
			unit_config: serde_json::Value::Null,
			mounted: Vec::new(),
		}
	}

	/// Registers a route. Every path may be registered once; combine methods in one
	/// [`MethodRouter`].
	///
	/// Paths that differ only in capture names collide, and a capture position must keep
	/// the same name and kind across all routes sharing the prefix before it.
	pub fn route(
		&mut self,
		path: &str,
		method_router: MethodRouter<AppState>,
	) -> Result<&mut Self, MountError> {
		let segments = parse_path(path)?;
		let shape = shape_of(&segments);
		if self.shapes.contains(&shape) || self.paths.contains(path) {
			return Err(MountError::DuplicateRoute {
				path: path.to_owned(),
			});
		}

		let mut new_captures = Vec::new();
		let mut prefix = String::new();
		for segment in &segments {
			if let Segment::Capture { name, catch_all } = *segment {
				match self.captures.get(&prefix) {
					Some(existing) if existing.name != name || existing.catch_all != catch_all => {
						return Err(MountError::ConflictingRoute {
							path: path.to_owned(),
							existing: existing.route.clone(),
						});
					}
					Some(_) => {}
					None => new_captures.push((
						prefix.clone(),
						Capture {
							name: name.to_owned(),
							catch_all,
							route: path.to_owned(),
						},
					)),
				}
			}
			prefix.push('/');
			prefix.push_str(segment.shape());
		}

		self.captures.extend(new_captures);
		self.shapes.insert(shape);
		self.paths.insert(path.to_owned());
		self.router = std::mem::take(&mut self.router).route(path, method_router);
		Ok(self)
	}

	/// The `[config]` table of the unit currently being mounted, `Null` when it has none.
	pub const fn unit_config(&self) -> &serde_json::Value {
		&self.unit_config
	}

	/// Deserializes [`Self::unit_config`], falling back to `T::default()` when absent.
	pub fn unit_config_as<T: DeserializeOwned + Default>(&self) -> anyhow::Result<T> {
		if self.unit_config.is_null() {
			return Ok(T::default());
		}
		Ok(serde_json::from_value(self.unit_config.clone())?)
	}

	pub fn paths(&self) -> impl Iterator<Item = &str> {
		self.paths.iter().map(String::as_str)
	}

	/// Names of the entry points applied so far, in mount order.
	pub fn mounted(&self) -> &[String] {
		&self.mounted
	}

	pub fn into_router(self) -> Router<AppState> {
		self.router
	}
}

impl Default for Server {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Debug, Clone, Copy)]
enum Segment<'a> {
	Static(&'a str),
	Capture { name: &'a str, catch_all: bool },
}

impl Segment<'_> {
	const fn shape(&self) -> &str {
		match self {
			Self::Static(literal) => literal,
			Self::Capture {
				catch_all: false, ..
			} => "{}",
			Self::Capture { catch_all: true, .. } => "{*}",
		}
	}
}

fn shape_of(segments: &[Segment<'_>]) -> String {
	segments.iter().fold(String::new(), |mut shape, segment| {
		shape.push('/');
		shape.push_str(segment.shape());
		shape
	})
}

// axum panics on all of these, so they are rejected before reaching the router
fn parse_path(path: &str) -> Result<Vec<Segment<'_>>, MountError> {
	let invalid = |reason| MountError::InvalidPath {
		path: path.to_owned(),
		reason,
	};

	let Some(rest) = path.strip_prefix('/') else {
		return Err(invalid("must start with '/'"));
	};

	let raw: Vec<&str> = rest.split('/').collect();
	let last = raw.len() - 1;
	let mut segments = Vec::with_capacity(raw.len());
	for (index, segment) in raw.into_iter().enumerate() {
		if segment.starts_with(':') || segment.starts_with('*') {
			return Err(invalid("captures use the {name} syntax"));
		}
		if !segment.contains(['{', '}']) {
			segments.push(Segment::Static(segment));
			continue;
		}

		let Some(inner) = segment
			.strip_prefix('{')
			.and_then(|segment| segment.strip_suffix('}'))
		else {
			return Err(invalid("braces must enclose a whole segment"));
		};
		if inner.contains(['{', '}']) {
			return Err(invalid("unbalanced braces"));
		}

		let (name, catch_all) = match inner.strip_prefix('*') {
			Some(name) => (name, true),
			None => (inner, false),
		};
		if name.is_empty() {
			return Err(invalid("captures need a name"));
		}
		if catch_all && index != last {
			return Err(invalid("a catch-all capture must be the last segment"));
		}
		segments.push(Segment::Capture { name, catch_all });
	}
	Ok(segments)
}

/// Applies every entry point once, in order. The first failure aborts the whole mount.
pub fn mount(server: &mut Server, entry_points: Vec<MountEntryPoint>) -> Result<(), MountError> {
	for entry_point in entry_points {
		let MountEntryPoint {
			name,
			origin,
			config,
			setup,
		} = entry_point;

		server.unit_config = config;
		let result = setup(server);
		server.unit_config = serde_json::Value::Null;

		result.map_err(|source| MountError::EntryPoint {
			name: name.clone(),
			source,
		})?;
		info!(entry_point = %name, origin = %origin, "Mounted");
		server.mounted.push(name);
	}
	Ok(())
}

/// Builds the server: built-in entry points, then the plugin units below `plugins.root`.
///
/// Discovery completes before the first entry point runs, so a broken unit leaves the
/// server without any mounts.
pub fn assemble(plugins: &PluginsConfig, catalog: &Catalog) -> Result<Server, StartupError> {
	let mut entry_points = api::entry_points();
	if plugins.enabled {
		debug!(
			entry_points = ?catalog.names().collect::<Vec<_>>(),
			"Compiled-in entry points"
		);
		entry_points.extend(plugin::discover(&plugins.root, catalog)?);
	} else {
		info!("Plugin discovery is disabled");
	}

	let mut server = Server::new();
	mount(&mut server, entry_points)?;
	info!(routes = server.paths().count(), "Mounted all entry points");
	Ok(server)
}
