use thiserror::Error;

/// Best-effort memory reclamation that runs after a resource has been released.
///
/// Implementations return [`ReclamationUnavailable`] when the mechanism cannot run, for
/// example because no accelerator is present. The registry never propagates that error.
pub trait Reclaim: Send + Sync + 'static {
	fn reclaim(&self) -> Result<(), ReclamationUnavailable>;
}

impl<F> Reclaim for F
where
	F: Fn() -> Result<(), ReclamationUnavailable> + Send + Sync + 'static,
{
	fn reclaim(&self) -> Result<(), ReclamationUnavailable> {
		self()
	}
}

#[derive(Debug, Error)]
#[error("Memory reclamation is unavailable: {reason}")]
pub struct ReclamationUnavailable {
	reason: String,
}

impl ReclamationUnavailable {
	pub fn new(reason: impl Into<String>) -> Self {
		Self {
			reason: reason.into(),
		}
	}
}

/// The reclaimer used when none has been installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReclaim;

impl Reclaim for NoReclaim {
	fn reclaim(&self) -> Result<(), ReclamationUnavailable> {
		Err(ReclamationUnavailable::new("no accelerator runtime attached"))
	}
}
