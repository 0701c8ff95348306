//! Example plugin demonstrating how to implement a shared-library plugin for inference-host.
//!
//! Build it with `cargo build --release` and point a unit manifest at the library:
//!
//! ```toml
//! # custom_modules/external_example.toml
//! setup = "external-example"
//! library = "../example-plugin/target/release/libinference_host_example_plugin.so"
//!
//! [config]
//! greeting = "Hello from a shared library!"
//! ```
//!
//! The host must be built with the `plugins` feature to load it.

use abi_stable::std_types::{RResult, RVec};
use async_ffi::FfiFuture;
use inference_host_plugin_api::{
	declare_plugin, FfiError, FfiResponse, FfiResult, FfiRequest, FfiRoute, PluginConfig,
	RouteHandler,
};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Plugin configuration taken from the `[config]` table of the unit manifest.
#[derive(Debug, Default, Deserialize)]
struct ExamplePluginConfig {
	/// Message returned by the hello route.
	#[serde(default)]
	greeting: Option<String>,
}

static CONFIG: OnceLock<ExamplePluginConfig> = OnceLock::new();

fn greeting() -> String {
	CONFIG
		.get()
		.and_then(|config| config.greeting.clone())
		.unwrap_or_else(|| String::from("Hello there!"))
}

#[derive(Serialize)]
struct Message {
	message: String,
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Answers with the configured greeting.
struct Hello;

impl RouteHandler for Hello {
	fn handle(&self, _request: FfiRequest) -> FfiFuture<FfiResult<FfiResponse>> {
		FfiFuture::new(async {
			let message = Message {
				message: greeting(),
			};
			FfiResponse::json(200, &message).into()
		})
	}
}

#[derive(Deserialize)]
struct EchoRequest {
	text: String,
}

/// Echoes the `text` field of a JSON body back, upper-cased.
struct Shout;

impl RouteHandler for Shout {
	fn handle(&self, request: FfiRequest) -> FfiFuture<FfiResult<FfiResponse>> {
		FfiFuture::new(async move {
			let echo = match request.json::<EchoRequest>() {
				Ok(echo) => echo,
				Err(e) => return RResult::RErr(e),
			};
			let message = Message {
				message: echo.text.to_uppercase(),
			};
			FfiResponse::json(200, &message).into()
		})
	}
}

// ============================================================================
// Plugin Module Declaration
// ============================================================================

fn do_initialize(config: PluginConfig) -> FfiResult<()> {
	let parsed: ExamplePluginConfig = match config.parse() {
		Ok(parsed) => parsed,
		Err(e) => return RResult::RErr(e),
	};

	// Configuration is fixed after the first initialization, a second one is refused
	if CONFIG.set(parsed).is_err() {
		return RResult::RErr(FfiError::internal("Plugin was initialized twice"));
	}

	RResult::ROk(())
}

fn do_setup() -> FfiResult<RVec<FfiRoute>> {
	RResult::ROk(RVec::from(vec![
		FfiRoute::get("/external-example/hello", Hello),
		FfiRoute::post("/external-example/shout", Shout),
	]))
}

// Use the declare_plugin! macro to export the plugin module
declare_plugin! {
	plugin_id: "external-example",
	version: env!("CARGO_PKG_VERSION"),
	initialize: do_initialize,
	setup: do_setup,
}
