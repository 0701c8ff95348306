//! Plugin unit discovery.
//!
//! A plugin unit is either a directory below the plugin root holding a `plugin.toml`
//! manifest, or a single `*.toml` manifest file in the root itself. The manifest names the
//! mount entry point in its `setup` key. Compiled-in entry points register themselves in the
//! [`Catalog`]; with the `plugins` feature a manifest can also point at a shared library.

mod catalog;
mod discovery;
#[cfg(feature = "plugins")]
mod library;
mod manifest;

pub use catalog::{Catalog, PluginEntry};
pub use discovery::{discover, DiscoveryError, UnitKind};

pub(crate) use catalog::register_plugin;
