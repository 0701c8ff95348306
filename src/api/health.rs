use crate::server::Server;
use axum::response::IntoResponse;
use axum::routing::get;

pub fn setup(server: &mut Server) -> anyhow::Result<()> {
	server
		.route("/", get(index))?
		.route("/ping", get(ping).post(ping))?;
	Ok(())
}

async fn index() -> impl IntoResponse {
	format!(
		"This server is running inference-host (v{})",
		env!("CARGO_PKG_VERSION")
	)
}

/// Health check for load balancers. Answers before any module is loaded.
async fn ping() {}
