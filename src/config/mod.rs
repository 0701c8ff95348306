use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
	pub telemetry: TelemetryConfig,
	pub server: ServerConfig,
	pub plugins: PluginsConfig,
}

impl AppConfig {
	/// Loads the configuration from the embedded defaults, an optional `config.toml` in the
	/// working directory and `INFERENCE_HOST_*` environment variables, in that order.
	pub fn new() -> Result<Self, ConfigError> {
		Self::defaults()
			.add_source(File::with_name("config.toml").required(false))
			.add_source(
				Environment::with_prefix("INFERENCE_HOST")
					.prefix_separator("_")
					.separator("__"),
			)
			.build()?
			.try_deserialize()
	}

	/// The embedded defaults with a TOML document layered on top.
	#[cfg(test)]
	pub(crate) fn with_overrides(toml: &str) -> Result<Self, ConfigError> {
		Self::defaults()
			.add_source(File::from_str(toml, FileFormat::Toml))
			.build()?
			.try_deserialize()
	}

	fn defaults() -> ConfigBuilder<config::builder::DefaultState> {
		Config::builder().add_source(File::from_str(
			include_str!("defaults.toml"),
			FileFormat::Toml,
		))
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
	// Configurable logging level. Also configurable via env vars RUST_LOG and INFERENCE_HOST_TELEMETRY__LEVEL
	pub level: String,
	/// Sentry DSN. Tracing and error reporting to Sentry stay disabled when unset.
	#[serde(default)]
	pub sentry: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
	pub http: HttpServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
	// The interface the server will be listening on
	pub interface: IpAddr,
	// The port for the server
	pub port: u16,
	pub graceful_shutdown: bool,
	/// Maximum request body size in bytes.
	pub max_upload_size: usize,
	/// Request timeout in seconds. Model loads can take minutes, so there is none by default.
	#[serde(default)]
	pub request_timeout: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginsConfig {
	/// Whether plugin units under `root` are discovered at startup.
	pub enabled: bool,
	/// Directory scanned for plugin units.
	pub root: PathBuf,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_deserialize() {
		let config: AppConfig = AppConfig::defaults()
			.build()
			.and_then(Config::try_deserialize)
			.unwrap();

		assert_eq!(config.telemetry.level, "info");
		assert!(config.telemetry.sentry.is_none());
		assert_eq!(config.server.http.port, 12619);
		assert_eq!(config.server.http.interface, IpAddr::from([127, 0, 0, 1]));
		assert!(config.server.http.request_timeout.is_none());
		assert!(config.plugins.enabled);
		assert_eq!(config.plugins.root, PathBuf::from("custom_modules"));
	}

	#[test]
	fn overrides_apply_on_top_of_defaults() {
		let config: AppConfig = AppConfig::defaults()
			.add_source(File::from_str(
				"[server.http]\nport = 8080\nrequest_timeout = 30\n[plugins]\nenabled = false",
				FileFormat::Toml,
			))
			.build()
			.and_then(Config::try_deserialize)
			.unwrap();

		assert_eq!(config.server.http.port, 8080);
		assert_eq!(config.server.http.request_timeout, Some(30));
		assert!(!config.plugins.enabled);
		assert_eq!(config.plugins.root, PathBuf::from("custom_modules"));
	}
}
