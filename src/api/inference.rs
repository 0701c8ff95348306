//! The conventional `load`/`unload`/`action` endpoints of an inference module.

use super::ApiError;
use crate::registry::{LoadOutcome, Resource};
use crate::server::{MountError, Server};
use crate::AppState;
use axum::extract::State;
use axum::routing::post;
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// A heavyweight resource that answers inference requests.
///
/// [`mount`] exposes it under `/{NAME}/load`, `/{NAME}/unload` and `/{NAME}/action`, keyed
/// by `NAME` in the registry.
pub trait InferenceModule: Resource + Sized {
	const NAME: &'static str;

	/// Options accepted by `/{NAME}/load`, next to `force_reload`
	type Options: DeserializeOwned + Send + 'static;
	type Input: DeserializeOwned + Send + 'static;
	type Output: Serialize + Send + 'static;

	/// Constructs the resource. Runs on a blocking thread.
	fn load(options: Self::Options) -> anyhow::Result<Self>;

	/// Runs one inference. Runs on a blocking thread.
	fn infer(&self, input: Self::Input) -> anyhow::Result<Self::Output>;
}

/// Registers the endpoints of `M`.
pub fn mount<M: InferenceModule>(server: &mut Server) -> Result<(), MountError> {
	let name = M::NAME;
	server
		.route(&format!("/{name}/load"), post(load::<M>))?
		.route(&format!("/{name}/unload"), post(unload::<M>))?
		.route(&format!("/{name}/action"), post(action::<M>))?;
	Ok(())
}

const fn force_reload_default() -> bool {
	true
}

#[derive(Debug, Deserialize)]
struct LoadRequest<O> {
	#[serde(default = "force_reload_default")]
	force_reload: bool,
	#[serde(flatten)]
	options: O,
}

#[derive(Debug, Serialize)]
struct LoadResponse {
	outcome: LoadOutcome,
}

#[derive(Debug, Serialize)]
struct UnloadResponse {
	unloaded: bool,
}

#[instrument(skip_all, fields(module = M::NAME))]
async fn load<M: InferenceModule>(
	State(state): State<AppState>,
	Json(request): Json<LoadRequest<M::Options>>,
) -> Result<Json<LoadResponse>, ApiError> {
	let LoadRequest {
		force_reload,
		options,
	} = request;
	let outcome = state
		.registry
		.load(M::NAME, move || M::load(options), force_reload)
		.await?;
	Ok(Json(LoadResponse { outcome }))
}

#[instrument(skip_all, fields(module = M::NAME))]
async fn unload<M: InferenceModule>(State(state): State<AppState>) -> Json<UnloadResponse> {
	let unloaded = state.registry.unload(M::NAME).await;
	Json(UnloadResponse { unloaded })
}

#[instrument(skip_all, fields(module = M::NAME))]
async fn action<M: InferenceModule>(
	State(state): State<AppState>,
	Json(input): Json<M::Input>,
) -> Result<Json<M::Output>, ApiError> {
	let module = state.registry.get::<M>(M::NAME).await?;
	let output = tokio::task::spawn_blocking(move || module.infer(input))
		.await?
		.map_err(ApiError::Inference)?;
	Ok(Json(output))
}
