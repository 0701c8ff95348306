use crate::plugin::register_plugin;
use crate::server::Server;
use axum::routing::post;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ExampleConfig {
	greeting: String,
}

impl Default for ExampleConfig {
	fn default() -> Self {
		Self {
			greeting: String::from("Hello there!"),
		}
	}
}

#[derive(Debug, Serialize)]
struct Hello {
	message: String,
}

fn setup(server: &mut Server) -> anyhow::Result<()> {
	let ExampleConfig { greeting } = server.unit_config_as()?;
	server.route(
		"/example/hello",
		post(move || {
			let message = greeting.clone();
			async move { Json(Hello { message }) }
		}),
	)?;
	Ok(())
}

register_plugin!("example", setup);
