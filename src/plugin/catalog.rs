use crate::server::SetupFn;
use std::collections::BTreeMap;
use tracing::warn;

/// A compiled-in mount entry point, registered with [`register_plugin!`].
pub struct PluginEntry {
	/// The name unit manifests refer to in their `setup` key
	pub name: &'static str,
	pub setup: SetupFn,
}

impl PluginEntry {
	pub const fn new(name: &'static str, setup: SetupFn) -> Self {
		Self { name, setup }
	}
}

inventory::collect!(PluginEntry);

/// Registers a compiled-in mount entry point under a name.
///
/// ```ignore
/// fn setup(server: &mut Server) -> anyhow::Result<()> { ... }
///
/// register_plugin!("example", setup);
/// ```
macro_rules! register_plugin {
	($name:expr, $setup:path) => {
		#[allow(unsafe_code)]
		const _: () = {
			::inventory::submit! {
				$crate::plugin::PluginEntry::new($name, $setup)
			}
		};
	};
}

pub(crate) use register_plugin;

/// Entry points that unit manifests can name.
#[derive(Default)]
pub struct Catalog {
	entries: BTreeMap<&'static str, SetupFn>,
}

impl Catalog {
	/// Collects every entry point registered in this binary.
	pub fn collect() -> Self {
		let mut catalog = Self::default();
		for entry in inventory::iter::<PluginEntry> {
			if catalog.entries.contains_key(entry.name) {
				warn!(
					entry_point = entry.name,
					"Entry point registered twice, keeping the first"
				);
				continue;
			}
			catalog.insert(entry.name, entry.setup);
		}
		catalog
	}

	pub fn insert(&mut self, name: &'static str, setup: SetupFn) -> &mut Self {
		self.entries.insert(name, setup);
		self
	}

	pub fn get(&self, name: &str) -> Option<SetupFn> {
		self.entries.get(name).copied()
	}

	pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
		self.entries.keys().copied()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn collects_compiled_in_entry_points() {
		let catalog = Catalog::collect();
		assert!(catalog.get("example").is_some());
		assert!(catalog.names().any(|name| name == "example"));
		assert!(catalog.get("missing").is_none());
	}
}
