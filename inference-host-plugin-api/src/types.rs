//! FFI-safe type definitions for the plugin API.
//!
//! All types crossing the FFI boundary must be `#[repr(C)]` and derive `StableAbi`.

use abi_stable::{
	std_types::{RResult, RString, RVec},
	StableAbi,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

// ============================================================================
// Common Types
// ============================================================================

/// FFI-safe error type for plugin operations.
#[repr(C)]
#[derive(StableAbi, Clone, Debug)]
pub struct FfiError {
	pub code: FfiErrorCode,
	pub message: RString,
}

impl FfiError {
	pub fn new(code: FfiErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: RString::from(message.into()),
		}
	}

	pub fn invalid_request(message: impl Into<String>) -> Self {
		Self::new(FfiErrorCode::InvalidRequest, message)
	}

	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(FfiErrorCode::Internal, message)
	}
}

impl std::fmt::Display for FfiError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:?}: {}", self.code, self.message)
	}
}

impl std::error::Error for FfiError {}

/// Error codes for plugin operations.
#[repr(C)]
#[derive(StableAbi, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FfiErrorCode {
	/// Invalid request body or parameters
	InvalidRequest,
	/// A resource required by the route is not available
	Unavailable,
	/// Internal plugin error
	Internal,
}

impl FfiErrorCode {
	/// The HTTP status the host answers with when a handler fails with this code.
	pub const fn status(self) -> u16 {
		match self {
			Self::InvalidRequest => 400,
			Self::Unavailable => 503,
			Self::Internal => 500,
		}
	}
}

/// FFI-safe result type.
pub type FfiResult<T> = RResult<T, FfiError>;

// ============================================================================
// Route Types
// ============================================================================

/// HTTP method a plugin route answers to.
#[repr(C)]
#[derive(StableAbi, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FfiMethod {
	Get,
	Post,
	Put,
	Delete,
}

/// Request handed to a plugin route handler.
#[repr(C)]
#[derive(StableAbi, Clone, Debug)]
pub struct FfiRequest {
	/// Raw request body
	pub body: RVec<u8>,
}

impl FfiRequest {
	/// Deserialize the request body as JSON.
	pub fn json<T: DeserializeOwned>(&self) -> Result<T, FfiError> {
		serde_json::from_slice(&self.body)
			.map_err(|e| FfiError::invalid_request(format!("Invalid JSON body: {e}")))
	}
}

/// Response produced by a plugin route handler.
#[repr(C)]
#[derive(StableAbi, Clone, Debug)]
pub struct FfiResponse {
	pub status: u16,
	pub content_type: RString,
	pub body: RVec<u8>,
}

impl FfiResponse {
	pub fn new(status: u16, content_type: impl Into<String>, body: Vec<u8>) -> Self {
		Self {
			status,
			content_type: RString::from(content_type.into()),
			body: RVec::from(body),
		}
	}

	/// A JSON response from any serializable value.
	pub fn json<T: Serialize>(status: u16, value: &T) -> Result<Self, FfiError> {
		let body = serde_json::to_vec(value)
			.map_err(|e| FfiError::internal(format!("Failed to serialize response: {e}")))?;
		Ok(Self::new(status, "application/json", body))
	}

	/// An empty response carrying only a status code.
	pub fn empty(status: u16) -> Self {
		Self::new(status, "text/plain", Vec::new())
	}
}

// ============================================================================
// Plugin Configuration
// ============================================================================

/// Plugin configuration passed during initialization.
#[repr(C)]
#[derive(StableAbi, Clone, Debug)]
pub struct PluginConfig {
	/// The `[config]` table of the unit manifest as JSON string
	pub config_json: RString,
}

impl PluginConfig {
	/// Parse the configuration, treating an empty or `null` document as `T::default()`.
	pub fn parse<T: DeserializeOwned + Default>(&self) -> Result<T, FfiError> {
		match self.config_json.trim() {
			"" | "null" | "{}" => Ok(T::default()),
			json => serde_json::from_str(json)
				.map_err(|e| FfiError::invalid_request(format!("Failed to parse config: {e}"))),
		}
	}
}
