use crate::registry::ResourceStatus;
use crate::server::Server;
use crate::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::Json;

pub fn setup(server: &mut Server) -> anyhow::Result<()> {
	server.route("/resources", get(list))?;
	Ok(())
}

/// Lists the keys currently held by the registry.
async fn list(State(state): State<AppState>) -> Json<Vec<ResourceStatus>> {
	Json(state.registry.loaded())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::Resource;
	use axum::body::Body;
	use axum::http::{Request, StatusCode};
	use tower::ServiceExt;

	struct Weights;

	impl Resource for Weights {
		fn release(&self) {}
	}

	async fn list_resources(app: &axum::Router) -> serde_json::Value {
		let request = Request::builder()
			.uri("/resources")
			.body(Body::empty())
			.unwrap();
		let response = app.clone().oneshot(request).await.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		let body = axum::body::to_bytes(response.into_body(), usize::MAX)
			.await
			.unwrap();
		serde_json::from_slice(&body).unwrap()
	}

	#[tokio::test]
	async fn lists_loaded_keys() {
		let state = AppState::for_tests();
		let mut server = Server::new();
		setup(&mut server).unwrap();
		let app = server.into_router().with_state(state.clone());

		assert_eq!(list_resources(&app).await, serde_json::json!([]));

		state
			.registry
			.load("weights", || Ok(Weights), true)
			.await
			.unwrap();
		let body = list_resources(&app).await;
		assert_eq!(body[0]["key"], "weights");
		assert_eq!(body[0]["state"], "ready");
		assert_eq!(body[0]["loaded_secs"], 0);
		assert!(body[0]["type_name"].as_str().unwrap().ends_with("Weights"));

		state.registry.unload("weights").await;
		assert_eq!(list_resources(&app).await, serde_json::json!([]));
	}
}
