//! A minimal inference module: hashes base64-encoded payloads.

use crate::api::{inference, InferenceModule};
use crate::plugin::register_plugin;
use crate::registry::Resource;
use crate::server::Server;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

const DEFAULT_MAX_BYTES: usize = 64 * 1024 * 1024;

struct Checksum {
	max_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct ChecksumOptions {
	#[serde(default = "default_max_bytes")]
	max_bytes: usize,
}

const fn default_max_bytes() -> usize {
	DEFAULT_MAX_BYTES
}

#[derive(Debug, Deserialize)]
struct ChecksumInput {
	/// Base64-encoded payload
	#[serde(deserialize_with = "decode_base64")]
	data: Vec<u8>,
}

#[derive(Debug, Serialize)]
struct ChecksumOutput {
	bytes: usize,
	sha256: String,
}

fn decode_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
	let encoded = String::deserialize(deserializer)?;
	STANDARD
		.decode(encoded.as_bytes())
		.map_err(serde::de::Error::custom)
}

impl Resource for Checksum {
	fn release(&self) {
		debug!(max_bytes = self.max_bytes, "Released checksum module");
	}
}

impl InferenceModule for Checksum {
	const NAME: &'static str = "checksum";
	type Options = ChecksumOptions;
	type Input = ChecksumInput;
	type Output = ChecksumOutput;

	fn load(options: Self::Options) -> anyhow::Result<Self> {
		if options.max_bytes == 0 {
			anyhow::bail!("max_bytes must be positive");
		}
		Ok(Self {
			max_bytes: options.max_bytes,
		})
	}

	fn infer(&self, input: Self::Input) -> anyhow::Result<Self::Output> {
		let bytes = input.data.len();
		if bytes > self.max_bytes {
			anyhow::bail!("Payload of {bytes} bytes exceeds the limit of {}", self.max_bytes);
		}
		Ok(ChecksumOutput {
			bytes,
			sha256: hex::encode(Sha256::digest(&input.data)),
		})
	}
}

fn setup(server: &mut Server) -> anyhow::Result<()> {
	inference::mount::<Checksum>(server)?;
	Ok(())
}

register_plugin!("checksum", setup);
