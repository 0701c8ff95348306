pub(crate) mod api;
pub(crate) mod config;
pub(crate) mod custom;
pub(crate) mod plugin;
pub(crate) mod registry;
pub(crate) mod server;

use crate::config::{AppConfig, HttpServerConfig};
use crate::plugin::Catalog;
use crate::registry::ResourceRegistry;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace;
use tracing::{error, info, level_filters::LevelFilter, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_logger(level: LevelFilter) {
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::fmt::layer()
				.compact()
				.with_ansi(true)
				.with_file(false)
				.with_line_number(false)
				.with_target(false),
		)
		.with(
			EnvFilter::builder()
				.with_default_directive(level.into())
				.from_env_lossy(),
		)
		.with(sentry::integrations::tracing::layer())
		.init();
}

#[derive(Clone)]
pub struct AppState {
	pub registry: ResourceRegistry,
}

#[cfg(test)]
impl AppState {
	pub(crate) fn for_tests() -> Self {
		Self {
			registry: ResourceRegistry::new(),
		}
	}
}

fn init_sentry(config: &AppConfig) -> sentry::ClientInitGuard {
	let guard = sentry::init((
		// An empty string will disable Sentry
		config.telemetry.sentry.as_deref().unwrap_or_default(),
		sentry::ClientOptions {
			release: sentry::release_name!(),
			traces_sample_rate: 1.0,
			..Default::default()
		},
	));

	if let Some(dsn) = &config.telemetry.sentry {
		info!(dsn, "Enabled Sentry for tracing and error tracking");
	};

	guard
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
	let config = AppConfig::new()?;
	let level = config.telemetry.level.parse::<LevelFilter>()?;
	init_logger(level);

	// The Sentry client has to exist before the Tokio runtime, so #[tokio::main] is not an option.
	// See https://docs.sentry.io/platforms/rust/#async-main-function
	let _sentry = init_sentry(&config);

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()?;
	// A refused start must reach the supervisor as a failing exit status
	if let Err(error) = runtime.block_on(run(config)) {
		error!("Failed to start application due to error: {error:#}");
		return Err(error.into());
	}
	Ok(())
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
	// Every unit is mounted before the listener is bound
	let server = server::assemble(&config.plugins, &Catalog::collect())?;

	let app_state = AppState {
		registry: ResourceRegistry::new(),
	};
	let app = app(server.into_router(), app_state.clone(), &config.server.http);

	let HttpServerConfig {
		interface: host,
		port,
		..
	} = config.server.http;
	let addr = SocketAddr::from((host, port));
	let listener = TcpListener::bind(addr).await?;

	info!("Started inference host on http://{addr}");
	if config.server.http.graceful_shutdown {
		axum::serve(listener, app)
			.with_graceful_shutdown(shutdown_signal())
			.await?;
	} else {
		axum::serve(listener, app).await?;
	}

	let released = app_state.registry.unload_all().await;
	info!(released, "Released all inference modules");
	Ok(())
}

fn app(router: Router<AppState>, state: AppState, http: &HttpServerConfig) -> Router {
	let mut router = router
		.layer(CorsLayer::permissive())
		.layer(axum::middleware::from_fn(add_common_headers))
		.layer(
			tower_http::trace::TraceLayer::new_for_http()
				.make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
				.on_request(trace::DefaultOnRequest::new().level(Level::INFO))
				.on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
		)
		.layer(DefaultBodyLimit::max(http.max_upload_size));
	if let Some(timeout) = http.request_timeout {
		router = router.layer(TimeoutLayer::with_status_code(
			StatusCode::REQUEST_TIMEOUT,
			Duration::from_secs(timeout),
		));
	}
	router.with_state(state)
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(error) = signal::ctrl_c().await {
			warn!("Failed to listen for Ctrl+C: {error}");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut terminate) => {
				terminate.recv().await;
			}
			Err(error) => {
				warn!("Failed to listen for SIGTERM: {error}");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {},
		() = terminate => {},
	}
	info!("Shutting down");
}

async fn add_common_headers(req: Request, next: axum::middleware::Next) -> Response {
	let mut response = next.run(req).await;
	let server_name = concat!("inference-host/", env!("CARGO_PKG_VERSION"));
	let headers = response.headers_mut();
	headers.insert("Server", axum::http::HeaderValue::from_static(server_name));
	response
}
