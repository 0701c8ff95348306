//! Shared-library plugin units built against `inference-host-plugin-api`.

use super::discovery::DiscoveryError;
use crate::server::{MountEntryPoint, Origin, Server};
use abi_stable::library::{lib_header_from_path, RootModule};
use abi_stable::std_types::RVec;
use anyhow::anyhow;
use axum::body::Bytes;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{on, MethodFilter, MethodRouter};
use axum::Json;
use inference_host_plugin_api::{
	FfiError, FfiMethod, FfiRequest, FfiResponse, FfiRoute, PluginConfig, PluginModuleRef,
	RouteHandler, RouteHandlerBox,
};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// A plugin library whose root module has been loaded but not yet set up.
pub struct LoadedLibrary {
	id: String,
	version: String,
	module: PluginModuleRef,
}

/// Loads the library at `path` and checks that it exports the plugin `expected_id`.
pub fn open(path: &Path, expected_id: &str) -> Result<LoadedLibrary, DiscoveryError> {
	let library_error = |message: String| DiscoveryError::Library {
		path: path.to_path_buf(),
		message,
	};

	let header = lib_header_from_path(path).map_err(|e| library_error(e.to_string()))?;
	let module = header
		.init_root_module::<PluginModuleRef>()
		.map_err(|e| library_error(e.to_string()))?;

	let id = (module.plugin_id())().to_string();
	let version = (module.plugin_version())().to_string();
	if id != expected_id {
		return Err(DiscoveryError::LibraryMismatch {
			path: path.to_path_buf(),
			expected: expected_id.to_owned(),
			actual: id,
		});
	}

	info!(
		plugin.id = %id,
		plugin.version = %version,
		plugin.module = PluginModuleRef::NAME,
		"Loaded plugin library"
	);
	Ok(LoadedLibrary {
		id,
		version,
		module,
	})
}

impl LoadedLibrary {
	/// The entry point initializes the plugin with the unit's `[config]` table, then
	/// registers every route its `setup` function returns.
	pub fn into_entry_point(
		self,
		name: &str,
		origin: Origin,
		config: serde_json::Value,
	) -> MountEntryPoint {
		let Self {
			id,
			version,
			module,
		} = self;

		MountEntryPoint::unit(name, origin, config, move |server: &mut Server| {
			let config = PluginConfig {
				config_json: server.unit_config().to_string().into(),
			};
			(module.initialize())(config)
				.into_result()
				.map_err(|e| anyhow!("Plugin {id} {version} failed to initialize: {e}"))?;

			let routes = (module.setup())()
				.into_result()
				.map_err(|e| anyhow!("Plugin {id} {version} failed to set up: {e}"))?;
			mount_routes(server, routes)
		})
	}
}

fn method_filter(method: FfiMethod) -> MethodFilter {
	match method {
		FfiMethod::Get => MethodFilter::GET,
		FfiMethod::Post => MethodFilter::POST,
		FfiMethod::Put => MethodFilter::PUT,
		FfiMethod::Delete => MethodFilter::DELETE,
	}
}

/// Registers plugin routes on the server, one [`MethodRouter`] per path.
pub(crate) fn mount_routes(server: &mut Server, routes: RVec<FfiRoute>) -> anyhow::Result<()> {
	let mut seen = HashSet::new();
	let mut by_path: BTreeMap<String, Vec<(FfiMethod, Arc<RouteHandlerBox>)>> = BTreeMap::new();

	for route in routes {
		let path = route.path.to_string();
		if !seen.insert((path.clone(), route.method)) {
			anyhow::bail!("Plugin registered {:?} {path} twice", route.method);
		}
		by_path
			.entry(path)
			.or_default()
			.push((route.method, Arc::new(route.handler)));
	}

	for (path, handlers) in by_path {
		let mut method_router: Option<MethodRouter<crate::AppState>> = None;
		for (method, handler) in handlers {
			let filter = method_filter(method);
			let handle = move |body: Bytes| dispatch(Arc::clone(&handler), body);
			method_router = Some(match method_router {
				None => on(filter, handle),
				Some(router) => router.on(filter, handle),
			});
		}

		if let Some(method_router) = method_router {
			server.route(&path, method_router)?;
		}
	}
	Ok(())
}

async fn dispatch(handler: Arc<RouteHandlerBox>, body: Bytes) -> Response {
	let request = FfiRequest {
		body: RVec::from(body.to_vec()),
	};

	match handler.handle(request).await.into_result() {
		Ok(response) => into_response(response),
		Err(FfiError { code, message }) => {
			let status =
				StatusCode::from_u16(code.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
			if status.is_server_error() {
				error!(?code, "Plugin route failed: {message}");
			}
			(
				status,
				Json(serde_json::json!({ "detail": message.as_str() })),
			)
				.into_response()
		}
	}
}

fn into_response(response: FfiResponse) -> Response {
	let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
	let content_type = match response.content_type.as_str() {
		"" => mime::APPLICATION_OCTET_STREAM.to_string(),
		content_type => content_type.to_owned(),
	};
	(
		status,
		[(header::CONTENT_TYPE, content_type)],
		response.body.into_vec(),
	)
		.into_response()
}
