//! Lifecycle registry for heavyweight, singleton-per-key resources.
//!
//! Every key owns its own async read/write lock. `load` and `unload` hold the key's write
//! lock for their whole duration, `get` takes the read lock. Construction and release run on
//! the blocking thread pool together with the owned write guard, which means an abandoned
//! request cannot interrupt them halfway: the table ends up either holding a fully constructed
//! handle or nothing.
//!
//! Constructors and release hooks must not call back into the registry for their own key.

mod error;
mod reclaim;

pub use error::RegistryError;
pub use reclaim::{NoReclaim, Reclaim};

use parking_lot::Mutex;
use serde::Serialize;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, error, info, warn};

/// A heavyweight resource managed by the [`ResourceRegistry`].
pub trait Resource: Any + Send + Sync {
	/// Frees whatever the resource holds (model weights, device buffers, worker threads).
	///
	/// The registry calls this exactly once per constructed instance, after the instance has
	/// left the table and before anything replaces it. It must be safe to call on an instance
	/// that only partially initialized. Requests that obtained the resource earlier may still
	/// hold an `Arc` to it afterwards.
	fn release(&self);
}

/// What a call to [`ResourceRegistry::load`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOutcome {
	/// No instance existed; a new one was constructed.
	Loaded,
	/// An existing instance was released and replaced.
	Reloaded,
	/// An instance existed and was kept; the constructor did not run.
	Retained,
}

/// Snapshot of one key for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
	pub key: String,
	#[serde(flatten)]
	pub state: ResourceState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResourceState {
	Ready {
		type_name: &'static str,
		#[serde(rename = "loaded_secs")]
		loaded_for: u64,
	},
	/// A load or unload currently holds the key.
	Busy,
}

struct ResourceHandle {
	resource: Arc<dyn Resource>,
	any: Arc<dyn Any + Send + Sync>,
	type_name: &'static str,
	loaded_at: Instant,
}

impl ResourceHandle {
	fn new<T: Resource>(resource: T) -> Self {
		let resource = Arc::new(resource);
		Self {
			resource: Arc::clone(&resource) as Arc<dyn Resource>,
			any: resource,
			type_name: type_name::<T>(),
			loaded_at: Instant::now(),
		}
	}

	fn age(&self) -> Duration {
		self.loaded_at.elapsed()
	}
}

type Slot = Arc<RwLock<Option<ResourceHandle>>>;

struct Inner {
	slots: Mutex<HashMap<String, Slot>>,
	reclaimer: Box<dyn Reclaim>,
}

impl Inner {
	/// Releases a handle that has already been taken out of the table, then reclaims.
	fn release(&self, key: &str, handle: ResourceHandle) {
		let started = Instant::now();
		handle.resource.release();
		drop(handle);
		info!(
			key,
			elapsed = ?started.elapsed(),
			"Released inference module"
		);

		if let Err(err) = self.reclaimer.reclaim() {
			debug!(key, "Skipped memory reclamation: {err}");
		}
	}
}

/// Process-wide keyed store of heavyweight resources.
///
/// Cloning is cheap; all clones share the same table.
#[derive(Clone)]
pub struct ResourceRegistry {
	inner: Arc<Inner>,
}

impl ResourceRegistry {
	pub fn new() -> Self {
		Self::with_reclaimer(NoReclaim)
	}

	pub fn with_reclaimer(reclaimer: impl Reclaim) -> Self {
		Self {
			inner: Arc::new(Inner {
				slots: Mutex::new(HashMap::new()),
				reclaimer: Box::new(reclaimer),
			}),
		}
	}

	/// Slots are created on demand and pruned once they are empty and nobody else holds
	/// them, so the table tracks the live and in-flight keys only.
	fn slot(&self, key: &str) -> Slot {
		let mut slots = self.inner.slots.lock();
		Arc::clone(slots.entry(key.to_owned()).or_default())
	}

	fn existing_slot(&self, key: &str) -> Option<Slot> {
		self.inner.slots.lock().get(key).cloned()
	}

	/// Ensures an instance is loaded under `key`.
	///
	/// With `force_reload`, an existing instance is released completely before `construct`
	/// runs. Without it, an existing instance is kept and `construct` is never called.
	pub async fn load<T, F>(
		&self,
		key: &str,
		construct: F,
		force_reload: bool,
	) -> Result<LoadOutcome, RegistryError>
	where
		T: Resource,
		F: FnOnce() -> anyhow::Result<T> + Send + 'static,
	{
		let mut entry = self.slot(key).write_owned().await;
		if entry.is_some() && !force_reload {
			debug!(key, "Inference module already loaded, keeping it");
			return Ok(LoadOutcome::Retained);
		}

		let inner = Arc::clone(&self.inner);
		let task_key = key.to_owned();
		let result = tokio::task::spawn_blocking(move || {
			let key = task_key;
			let outcome = match entry.take() {
				Some(previous) => {
					info!(key = %key, "Releasing loaded inference module before reload");
					inner.release(&key, previous);
					LoadOutcome::Reloaded
				}
				None => LoadOutcome::Loaded,
			};

			let started = Instant::now();
			match construct() {
				Ok(resource) => {
					*entry = Some(ResourceHandle::new(resource));
					info!(
						key = %key,
						resource = type_name::<T>(),
						elapsed = ?started.elapsed(),
						"Loaded inference module"
					);
					Ok(outcome)
				}
				Err(source) => {
					warn!(key = %key, "Failed to construct inference module: {source:#}");
					Err(RegistryError::ConstructionFailed { key, source })
				}
			}
		})
		.await;

		let result = result.unwrap_or_else(|join_error| {
			error!(key, "Inference module constructor panicked: {join_error}");
			Err(RegistryError::ConstructionFailed {
				key: key.to_owned(),
				source: anyhow::anyhow!("constructor panicked: {join_error}"),
			})
		});
		if result.is_err() {
			self.prune(key);
		}
		result
	}

	/// Returns the instance loaded under `key`. Never constructs one.
	pub async fn get<T: Resource>(&self, key: &str) -> Result<Arc<T>, RegistryError> {
		let slot = self
			.existing_slot(key)
			.ok_or_else(|| RegistryError::not_loaded(key))?;
		let entry = slot.read().await;
		let handle = entry
			.as_ref()
			.ok_or_else(|| RegistryError::not_loaded(key))?;

		Arc::clone(&handle.any)
			.downcast::<T>()
			.map_err(|_| RegistryError::TypeMismatch {
				key: key.to_owned(),
				expected: type_name::<T>(),
				actual: handle.type_name,
			})
	}

	/// Removes and releases the instance under `key`, if any.
	///
	/// Returns whether an instance was unloaded. Reclamation failures are logged, never
	/// returned.
	pub async fn unload(&self, key: &str) -> bool {
		let Some(slot) = self.existing_slot(key) else {
			return false;
		};
		let mut entry = slot.write_owned().await;
		let unloaded = match entry.take() {
			Some(handle) => {
				self.release_detached(key, handle, entry).await;
				true
			}
			None => {
				drop(entry);
				false
			}
		};

		self.prune(key);
		unloaded
	}

	// New clones of a slot are only handed out under the table lock, so a count of one
	// means no load, get or unload can still be waiting on it.
	fn prune(&self, key: &str) {
		let mut slots = self.inner.slots.lock();
		let idle = slots.get(key).is_some_and(|slot| {
			Arc::strong_count(slot) == 1 && slot.try_read().is_ok_and(|entry| entry.is_none())
		});
		if idle {
			slots.remove(key);
		}
	}

	async fn release_detached(
		&self,
		key: &str,
		handle: ResourceHandle,
		entry: OwnedRwLockWriteGuard<Option<ResourceHandle>>,
	) {
		let inner = Arc::clone(&self.inner);
		let task_key = key.to_owned();
		let released = tokio::task::spawn_blocking(move || {
			inner.release(&task_key, handle);
			// the key stays locked until release has finished
			drop(entry);
		})
		.await;

		if let Err(err) = released {
			error!(key, "Release hook of inference module panicked: {err}");
		}
	}

	/// Unloads every key. Used when the host shuts down.
	pub async fn unload_all(&self) -> usize {
		let keys: Vec<String> = self.inner.slots.lock().keys().cloned().collect();

		let mut unloaded = 0;
		for key in keys {
			if self.unload(&key).await {
				unloaded += 1;
			}
		}
		unloaded
	}

	/// Reports every key that currently holds an instance or is being worked on.
	pub fn loaded(&self) -> Vec<ResourceStatus> {
		let slots: Vec<(String, Slot)> = self
			.inner
			.slots
			.lock()
			.iter()
			.map(|(key, slot)| (key.clone(), Arc::clone(slot)))
			.collect();

		let mut statuses: Vec<ResourceStatus> = slots
			.into_iter()
			.filter_map(|(key, slot)| {
				let state = match slot.try_read() {
					Ok(entry) => {
						let handle = entry.as_ref()?;
						ResourceState::Ready {
							type_name: handle.type_name,
							loaded_for: handle.age().as_secs(),
						}
					}
					Err(_) => ResourceState::Busy,
				};
				Some(ResourceStatus { key, state })
			})
			.collect();
		statuses.sort_by(|a, b| a.key.cmp(&b.key));
		statuses
	}
}

impl Default for ResourceRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for ResourceRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ResourceRegistry")
			.field("keys", &self.inner.slots.lock().len())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	/// Records construction and release events in a shared log.
	struct Weights {
		marker: &'static str,
		log: Arc<Mutex<Vec<String>>>,
		releases: Arc<AtomicUsize>,
	}

	impl Resource for Weights {
		fn release(&self) {
			self.releases.fetch_add(1, Ordering::SeqCst);
			self.log.lock().push(format!("release {}", self.marker));
		}
	}

	struct Other;

	impl Resource for Other {
		fn release(&self) {}
	}

	#[derive(Default, Clone)]
	struct Harness {
		log: Arc<Mutex<Vec<String>>>,
		releases: Arc<AtomicUsize>,
		constructed: Arc<AtomicUsize>,
	}

	impl Harness {
		fn construct(
			&self,
			marker: &'static str,
		) -> impl FnOnce() -> anyhow::Result<Weights> + Send + 'static {
			let log = Arc::clone(&self.log);
			let releases = Arc::clone(&self.releases);
			let constructed = Arc::clone(&self.constructed);
			move || {
				constructed.fetch_add(1, Ordering::SeqCst);
				log.lock().push(format!("construct {marker}"));
				Ok(Weights {
					marker,
					log,
					releases,
				})
			}
		}

		fn log(&self) -> Vec<String> {
			self.log.lock().clone()
		}

		fn releases(&self) -> usize {
			self.releases.load(Ordering::SeqCst)
		}
	}

	#[tokio::test]
	async fn get_without_load_fails() {
		let registry = ResourceRegistry::new();
		let result = registry.get::<Weights>("never-loaded").await;
		assert!(matches!(result, Err(RegistryError::NotLoaded { key }) if key == "never-loaded"));
	}

	#[tokio::test]
	async fn load_then_get_returns_constructed_handle() {
		let registry = ResourceRegistry::new();
		let harness = Harness::default();

		let outcome = registry
			.load("model", harness.construct("first"), true)
			.await
			.unwrap();
		assert_eq!(outcome, LoadOutcome::Loaded);

		let weights = registry.get::<Weights>("model").await.unwrap();
		assert_eq!(weights.marker, "first");
		assert_eq!(registry.loaded().len(), 1);
	}

	#[tokio::test]
	async fn load_without_force_keeps_existing_instance() {
		let registry = ResourceRegistry::new();
		let harness = Harness::default();

		registry
			.load("model", harness.construct("first"), true)
			.await
			.unwrap();
		let outcome = registry
			.load("model", harness.construct("second"), false)
			.await
			.unwrap();

		assert_eq!(outcome, LoadOutcome::Retained);
		assert_eq!(harness.constructed.load(Ordering::SeqCst), 1);
		assert_eq!(harness.releases(), 0);
		assert_eq!(registry.get::<Weights>("model").await.unwrap().marker, "first");
	}

	#[tokio::test]
	async fn forced_reload_releases_before_constructing() {
		let registry = ResourceRegistry::new();
		let harness = Harness::default();

		registry
			.load("model", harness.construct("first"), true)
			.await
			.unwrap();
		let outcome = registry
			.load("model", harness.construct("second"), true)
			.await
			.unwrap();

		assert_eq!(outcome, LoadOutcome::Reloaded);
		assert_eq!(
			harness.log(),
			["construct first", "release first", "construct second"]
		);
		assert_eq!(harness.releases(), 1);
		assert_eq!(registry.get::<Weights>("model").await.unwrap().marker, "second");
	}

	#[tokio::test]
	async fn failed_construction_leaves_no_entry() {
		let registry = ResourceRegistry::new();
		let harness = Harness::default();
		registry
			.load("model", harness.construct("first"), true)
			.await
			.unwrap();

		let result = registry
			.load::<Weights, _>("model", || anyhow::bail!("out of memory"), true)
			.await;

		assert!(matches!(result, Err(RegistryError::ConstructionFailed { ref key, .. }) if key == "model"));
		assert_eq!(harness.releases(), 1);
		assert!(matches!(
			registry.get::<Weights>("model").await,
			Err(RegistryError::NotLoaded { .. })
		));
	}

	#[tokio::test]
	async fn panicking_constructor_is_reported_as_construction_failure() {
		let registry = ResourceRegistry::new();

		let result = registry
			.load::<Weights, _>("model", || panic!("weights corrupted"), true)
			.await;

		assert!(matches!(result, Err(RegistryError::ConstructionFailed { .. })));
		assert!(registry.loaded().is_empty());
	}

	#[tokio::test]
	async fn unload_of_missing_key_is_noop() {
		let registry = ResourceRegistry::new();
		assert!(!registry.unload("missing").await);
		assert!(!registry.unload("missing").await);
	}

	#[tokio::test]
	async fn unload_releases_exactly_once() {
		let registry = ResourceRegistry::new();
		let harness = Harness::default();
		registry
			.load("model", harness.construct("first"), true)
			.await
			.unwrap();

		assert!(registry.unload("model").await);
		assert!(!registry.unload("model").await);

		assert_eq!(harness.releases(), 1);
		assert!(matches!(
			registry.get::<Weights>("model").await,
			Err(RegistryError::NotLoaded { .. })
		));
	}

	#[tokio::test]
	async fn get_with_wrong_type_is_a_mismatch() {
		let registry = ResourceRegistry::new();
		registry.load("model", || Ok(Other), true).await.unwrap();

		let result = registry.get::<Weights>("model").await;
		assert!(matches!(result, Err(RegistryError::TypeMismatch { .. })));
	}

	#[tokio::test]
	async fn reclamation_failure_does_not_fail_unload() {
		let attempts = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&attempts);
		let registry = ResourceRegistry::with_reclaimer(move || {
			counter.fetch_add(1, Ordering::SeqCst);
			Err(reclaim::ReclamationUnavailable::new("no accelerator"))
		});
		let harness = Harness::default();
		registry
			.load("model", harness.construct("first"), true)
			.await
			.unwrap();

		assert!(registry.unload("model").await);
		assert_eq!(attempts.load(Ordering::SeqCst), 1);
		assert_eq!(harness.releases(), 1);
	}

	#[tokio::test]
	async fn keys_are_independent() {
		let registry = ResourceRegistry::new();
		let harness = Harness::default();
		registry
			.load("whisper", harness.construct("whisper"), true)
			.await
			.unwrap();
		registry
			.load("florence", harness.construct("florence"), true)
			.await
			.unwrap();

		registry.unload("whisper").await;

		assert_eq!(
			registry.get::<Weights>("florence").await.unwrap().marker,
			"florence"
		);
		let keys: Vec<String> = registry.loaded().into_iter().map(|s| s.key).collect();
		assert_eq!(keys, ["florence"]);
	}

	#[tokio::test]
	async fn unload_all_releases_everything() {
		let registry = ResourceRegistry::new();
		let harness = Harness::default();
		for key in ["a", "b", "c"] {
			registry
				.load(key, harness.construct("item"), true)
				.await
				.unwrap();
		}

		assert_eq!(registry.unload_all().await, 3);
		assert_eq!(harness.releases(), 3);
		assert!(registry.loaded().is_empty());
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_lifecycle_never_leaks_or_double_releases() {
		let registry = ResourceRegistry::new();
		let harness = Harness::default();

		let tasks: Vec<_> = (0..64)
			.map(|i| {
				let registry = registry.clone();
				let harness = harness.clone();
				tokio::spawn(async move {
					match i % 4 {
						0 | 1 => {
							registry
								.load("shared", harness.construct("worker"), i % 3 == 0)
								.await
								.unwrap();
						}
						2 => {
							registry.unload("shared").await;
						}
						_ => {
							let _ = registry.get::<Weights>("shared").await;
						}
					}
				})
			})
			.collect();
		for task in tasks {
			task.await.unwrap();
		}
		registry.unload_all().await;

		assert_eq!(
			harness.constructed.load(Ordering::SeqCst),
			harness.releases()
		);
	}

	#[tokio::test]
	async fn abandoned_load_still_completes() {
		let registry = ResourceRegistry::new();
		let harness = Harness::default();
		let construct = harness.construct("slow");

		let load = registry.load(
			"model",
			move || {
				std::thread::sleep(Duration::from_millis(50));
				construct()
			},
			true,
		);
		// Give the load time to hand construction to the blocking pool, then drop it
		let _ = tokio::time::timeout(Duration::from_millis(10), load).await;

		// The next writer waits for the abandoned construction to finish
		registry.unload("model").await;
		assert_eq!(harness.constructed.load(Ordering::SeqCst), 1);
		assert_eq!(harness.releases(), 1);
	}

	/// Release hook that reports when it starts and then waits to be let through.
	struct Gated {
		entered: Mutex<Option<std::sync::mpsc::Sender<()>>>,
		proceed: Mutex<std::sync::mpsc::Receiver<()>>,
	}

	impl Resource for Gated {
		fn release(&self) {
			if let Some(entered) = self.entered.lock().take() {
				let _ = entered.send(());
			}
			let _ = self.proceed.lock().recv();
		}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn get_during_unload_waits_and_never_sees_a_released_handle() {
		let registry = ResourceRegistry::new();
		let (entered_tx, entered_rx) = std::sync::mpsc::channel();
		let (proceed_tx, proceed_rx) = std::sync::mpsc::channel();
		registry
			.load(
				"gated",
				move || {
					Ok(Gated {
						entered: Mutex::new(Some(entered_tx)),
						proceed: Mutex::new(proceed_rx),
					})
				},
				true,
			)
			.await
			.unwrap();

		let unloading = tokio::spawn({
			let registry = registry.clone();
			async move { registry.unload("gated").await }
		});
		tokio::task::spawn_blocking(move || entered_rx.recv())
			.await
			.unwrap()
			.unwrap();

		// release is running and holds the key
		let statuses = registry.loaded();
		assert_eq!(statuses.len(), 1);
		assert!(matches!(statuses[0].state, ResourceState::Busy));

		let getting = tokio::spawn({
			let registry = registry.clone();
			async move { registry.get::<Gated>("gated").await.map(|_| ()) }
		});
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert!(!getting.is_finished());

		proceed_tx.send(()).unwrap();
		assert!(unloading.await.unwrap());
		assert!(matches!(
			getting.await.unwrap(),
			Err(RegistryError::NotLoaded { .. })
		));
		assert!(registry.loaded().is_empty());
	}

	#[tokio::test]
	async fn loaded_reports_ready_instances() {
		let registry = ResourceRegistry::new();
		let harness = Harness::default();
		registry
			.load("model", harness.construct("first"), true)
			.await
			.unwrap();

		let statuses = registry.loaded();
		assert_eq!(statuses.len(), 1);
		assert_eq!(statuses[0].key, "model");
		assert!(matches!(
			statuses[0].state,
			ResourceState::Ready { type_name, loaded_for: 0 } if type_name.ends_with("Weights")
		));
	}

	#[tokio::test]
	async fn unloaded_and_failed_keys_leave_the_table() {
		let registry = ResourceRegistry::new();
		let harness = Harness::default();
		registry
			.load("model", harness.construct("first"), true)
			.await
			.unwrap();
		let _ = registry
			.load::<Weights, _>("broken", || anyhow::bail!("missing weights"), true)
			.await;
		assert_eq!(registry.inner.slots.lock().len(), 1);

		assert!(!registry.unload("broken").await);
		assert!(registry.unload("model").await);
		assert!(registry.inner.slots.lock().is_empty());

		registry
			.load("model", harness.construct("second"), true)
			.await
			.unwrap();
		assert_eq!(registry.get::<Weights>("model").await.unwrap().marker, "second");
	}
}
