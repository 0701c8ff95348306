//! inference-host Plugin API
//!
//! This crate defines the FFI-safe plugin interface for shared-library plugin units of
//! inference-host. Plugin authors build a `cdylib` depending on this crate, implement
//! [`RouteHandler`] for their endpoints and export a root module with [`declare_plugin!`].
//!
//! The host finds the library through a unit manifest in its plugin root:
//!
//! ```toml
//! setup = "my-plugin"         # must equal the exported plugin id
//! library = "libmy_plugin.so" # relative to the manifest
//!
//! [config]
//! greeting = "hello"
//! ```
//!
//! # Example
//!
//! ```ignore
//! use inference_host_plugin_api::prelude::*;
//!
//! struct Hello;
//!
//! impl RouteHandler for Hello {
//!     fn handle(&self, _request: FfiRequest) -> FfiFuture<FfiResult<FfiResponse>> {
//!         FfiFuture::new(async { RResult::ROk(FfiResponse::empty(200)) })
//!     }
//! }
//!
//! declare_plugin! {
//!     plugin_id: "my-plugin",
//!     version: env!("CARGO_PKG_VERSION"),
//!     initialize: |_config| RResult::ROk(()),
//!     setup: || RResult::ROk(RVec::from(vec![FfiRoute::get("/my-plugin/hello", Hello)])),
//! }
//! ```

#![allow(clippy::module_name_repetitions)]

use abi_stable::{
	library::RootModule,
	package_version_strings,
	sabi_types::VersionStrings,
	std_types::{RString, RVec},
	StableAbi,
};

pub mod route;
pub mod types;

pub use route::{FfiRoute, RouteHandler, RouteHandlerBox, RouteHandler_TO};
pub use types::*;

/// Prelude module for convenient imports.
pub mod prelude {
	pub use crate::route::{FfiRoute, RouteHandler, RouteHandlerBox};
	pub use crate::types::*;
	pub use crate::{declare_plugin, PluginModule, PluginModuleRef};

	pub use abi_stable::std_types::{RBox, ROption, RResult, RString, RVec};
	pub use async_ffi::FfiFuture;
}

/// Root module that plugins must export.
///
/// This struct defines the entry points that the host application uses
/// to interact with the plugin.
#[repr(C)]
#[derive(StableAbi)]
#[sabi(kind(Prefix(prefix_ref = PluginModuleRef)))]
#[sabi(missing_field(panic))]
pub struct PluginModule {
	/// Returns the plugin identifier. Unit manifests name it in their `setup` key.
	pub plugin_id: extern "C" fn() -> RString,

	/// Returns the plugin version.
	pub plugin_version: extern "C" fn() -> RString,

	/// Initialize the plugin with the unit configuration.
	///
	/// Called once, right before `setup`, while the host mounts the unit.
	pub initialize: extern "C" fn(config: PluginConfig) -> FfiResult<()>,

	/// The mount entry point: returns the routes the host registers for this plugin.
	#[sabi(last_prefix_field)]
	pub setup: extern "C" fn() -> FfiResult<RVec<FfiRoute>>,
}

impl RootModule for PluginModuleRef {
	abi_stable::declare_root_module_statics! {PluginModuleRef}

	const BASE_NAME: &'static str = "inference_host_plugin";
	const NAME: &'static str = "inference_host_plugin";
	const VERSION_STRINGS: VersionStrings = package_version_strings!();
}

/// Helper macro for declaring a plugin.
///
/// This macro generates the required `get_root_module` function that
/// the host application uses to load the plugin.
///
/// # Example
///
/// ```ignore
/// declare_plugin! {
///     plugin_id: "my-plugin",
///     version: "0.1.0",
///     initialize: |config| {
///         // Parse config.config_json and initialize
///         RResult::ROk(())
///     },
///     setup: || RResult::ROk(RVec::new()),
/// }
/// ```
#[macro_export]
macro_rules! declare_plugin {
	(
        plugin_id: $id:expr,
        version: $version:expr,
        initialize: $init:expr,
        setup: $setup:expr $(,)?
    ) => {
		/// Plugin entry point.
		///
		/// This function is called by the host application to get the plugin module.
		#[::abi_stable::export_root_module]
		pub fn get_root_module() -> $crate::PluginModuleRef {
			use ::abi_stable::prefix_type::PrefixTypeTrait;

			extern "C" fn plugin_id() -> ::abi_stable::std_types::RString {
				::abi_stable::std_types::RString::from($id)
			}

			extern "C" fn plugin_version() -> ::abi_stable::std_types::RString {
				::abi_stable::std_types::RString::from($version)
			}

			extern "C" fn initialize(config: $crate::PluginConfig) -> $crate::FfiResult<()> {
				let init_fn: fn($crate::PluginConfig) -> $crate::FfiResult<()> = $init;
				init_fn(config)
			}

			extern "C" fn setup(
			) -> $crate::FfiResult<::abi_stable::std_types::RVec<$crate::FfiRoute>> {
				let setup_fn: fn() -> $crate::FfiResult<
					::abi_stable::std_types::RVec<$crate::FfiRoute>,
				> = $setup;
				setup_fn()
			}

			$crate::PluginModule {
				plugin_id,
				plugin_version,
				initialize,
				setup,
			}
			.leak_into_prefix()
		}
	};
}
