//! Route handler trait definition.
//!
//! A plugin contributes capabilities to the host as a list of routes. Each route pairs an
//! HTTP method and a path with a handler object that lives inside the plugin library.

use abi_stable::{sabi_trait, sabi_trait::TD_Opaque, std_types::RBox, std_types::RString, StableAbi};
use async_ffi::FfiFuture;

use crate::types::{FfiMethod, FfiRequest, FfiResponse, FfiResult};

/// FFI-safe route handler trait.
///
/// The host awaits the returned future on its own runtime, so implementations must not
/// depend on a runtime of their own.
#[sabi_trait]
pub trait RouteHandler: Send + Sync {
	/// Handle one request.
	///
	/// # Returns
	/// The response to send, or an error whose code selects the HTTP status.
	#[sabi(last_prefix_field)]
	fn handle(&self, request: FfiRequest) -> FfiFuture<FfiResult<FfiResponse>>;
}

/// Boxed route handler as it crosses the FFI boundary.
pub type RouteHandlerBox = RouteHandler_TO<'static, RBox<()>>;

/// A single route registered by a plugin's `setup` function.
#[repr(C)]
#[derive(StableAbi)]
pub struct FfiRoute {
	pub method: FfiMethod,
	/// Path in axum syntax, e.g. `/acme/items/{id}`
	pub path: RString,
	pub handler: RouteHandlerBox,
}

impl FfiRoute {
	pub fn new<H>(method: FfiMethod, path: impl Into<String>, handler: H) -> Self
	where
		H: RouteHandler + 'static,
	{
		Self {
			method,
			path: RString::from(path.into()),
			handler: RouteHandler_TO::from_value(handler, TD_Opaque),
		}
	}

	pub fn get<H: RouteHandler + 'static>(path: impl Into<String>, handler: H) -> Self {
		Self::new(FfiMethod::Get, path, handler)
	}

	pub fn post<H: RouteHandler + 'static>(path: impl Into<String>, handler: H) -> Self {
		Self::new(FfiMethod::Post, path, handler)
	}
}
