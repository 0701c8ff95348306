use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
	/// `get` was called for a key without a live handle. Callers should `load` first.
	#[error("Inference module {key} is not loaded")]
	NotLoaded { key: String },

	/// The constructor passed to `load` failed. The key holds no entry afterwards.
	#[error("Failed to load inference module {key}: {source:#}")]
	ConstructionFailed {
		key: String,
		#[source]
		source: anyhow::Error,
	},

	#[error("Inference module {key} holds a {actual}, not a {expected}")]
	TypeMismatch {
		key: String,
		expected: &'static str,
		actual: &'static str,
	},
}

impl RegistryError {
	pub(crate) fn not_loaded(key: &str) -> Self {
		Self::NotLoaded {
			key: key.to_owned(),
		}
	}
}
