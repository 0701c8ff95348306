use crate::registry::RegistryError;
use crate::server::MountEntryPoint;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::error;

mod health;
pub mod inference;
mod resources;

pub use inference::InferenceModule;

/// Entry points mounted before any plugin unit.
pub fn entry_points() -> Vec<MountEntryPoint> {
	vec![
		MountEntryPoint::builtin("health", health::setup),
		MountEntryPoint::builtin("resources", resources::setup),
	]
}

#[derive(Debug, Error)]
pub enum ApiError {
	#[error(transparent)]
	Registry(#[from] RegistryError),
	#[error("Inference failed: {0:#}")]
	Inference(anyhow::Error),
	#[error("Inference task did not complete: {0}")]
	Task(#[from] JoinError),
}

impl ApiError {
	const fn status(&self) -> StatusCode {
		match self {
			Self::Registry(RegistryError::NotLoaded { .. }) => StatusCode::BAD_REQUEST,
			Self::Registry(_) | Self::Inference(_) | Self::Task(_) => {
				StatusCode::INTERNAL_SERVER_ERROR
			}
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();
		if status.is_server_error() {
			error!("{self}");
		}
		(status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn not_loaded_is_a_client_error() {
		let error = ApiError::from(RegistryError::NotLoaded {
			key: String::from("florence2"),
		});
		assert_eq!(error.status(), StatusCode::BAD_REQUEST);
	}

	#[test]
	fn construction_failure_is_a_server_error() {
		let error = ApiError::from(RegistryError::ConstructionFailed {
			key: String::from("florence2"),
			source: anyhow::anyhow!("out of memory"),
		});
		assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
		assert_eq!(
			ApiError::Inference(anyhow::anyhow!("bad input")).status(),
			StatusCode::INTERNAL_SERVER_ERROR
		);
	}
}
