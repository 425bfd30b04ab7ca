//! Keyed, single-flight cache of [`TagIndex`] values.
//!
//! # Mental model
//!
//! Every key is in at most one of three places in the table:
//!
//! * `building`: one in-flight build plus the number of callers attached to it.
//! * `ready`: a finished index, held in an LRU bounded by the cache capacity.
//! * `failed`: the last build error, kept for diagnostics only.
//!
//! A request for a ready key resolves at once. A request for a building key
//! attaches to the running build. Anything else starts a new build, which
//! replaces a recorded failure.
//!
//! # Invariants
//!
//! * At most one build slot per key. Builds for one key never overlap: a
//!   per-key async mutex guard is moved into the blocking build closure, so a
//!   build abandoned mid-parse still excludes its successor until it returns.
//! * The table is updated before waiters are woken. A waiter that sees an
//!   outcome can observe the matching `ready`/`failed` state.
//! * A build is cancelled only when its last waiter leaves. Its slot is
//!   removed in the same critical section, so later callers never join a
//!   dying build.
//! * A per-key build lock lives in the table only while some build for the
//!   key holds or awaits it; the last user removes it.
//! * No table lock is held across an `.await`.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{BuildError, CacheError};
use crate::index::TagIndex;
use crate::key::TagFileKey;
use crate::worker::{Stage, TaskRunner};

/// Builds a [`TagIndex`] for one tags file.
///
/// Called on a blocking worker thread. Implementations should poll `cancel`
/// and return [`BuildError::Cancelled`] once it fires.
pub trait IndexBuilder: Send + Sync + 'static {
	fn build(&self, key: &TagFileKey, cancel: &CancellationToken) -> Result<TagIndex, BuildError>;
}

/// Default builder: reads the tags file from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct TagFileLoader;

impl IndexBuilder for TagFileLoader {
	fn build(&self, key: &TagFileKey, cancel: &CancellationToken) -> Result<TagIndex, BuildError> {
		TagIndex::load(key.clone(), cancel)
	}
}

/// Observable state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
	Building,
	Ready,
	Failed,
}

type BuildOutcome = Result<Arc<TagIndex>, CacheError>;

struct BuildSlot {
	id: u64,
	cancel: CancellationToken,
	waiters: usize,
	outcome: watch::Receiver<Option<BuildOutcome>>,
}

struct CacheTable {
	ready: LruCache<TagFileKey, Arc<TagIndex>>,
	building: HashMap<TagFileKey, BuildSlot>,
	failed: HashMap<TagFileKey, BuildError>,
	/// Per-key build exclusion, held by the blocking build closure. Pruned by
	/// [`release_lock`] once no build references it.
	locks: HashMap<TagFileKey, Arc<tokio::sync::Mutex<()>>>,
	next_build_id: u64,
	shut_down: bool,
}

struct CacheShared {
	table: Mutex<CacheTable>,
	builder: Arc<dyn IndexBuilder>,
	shutdown: CancellationToken,
	builds_started: AtomicU64,
}

/// Asynchronous, deduplicated, cancellable store of parsed tag indexes.
///
/// Cheap to clone; clones share one table.
#[derive(Clone)]
pub struct IndexCache {
	shared: Arc<CacheShared>,
	runner: TaskRunner,
}

impl std::fmt::Debug for IndexCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let table = self.shared.table.lock();
		f.debug_struct("IndexCache")
			.field("ready", &table.ready.len())
			.field("building", &table.building.len())
			.field("failed", &table.failed.len())
			.field("pinned_runtime", &self.runner.is_pinned())
			.field("shut_down", &table.shut_down)
			.finish()
	}
}

impl IndexCache {
	/// Creates a cache that loads tags files from disk, holding at most
	/// `capacity` ready indexes.
	pub fn new(capacity: usize) -> Self {
		Self::with_builder(capacity, Arc::new(TagFileLoader))
	}

	pub fn with_builder(capacity: usize, builder: Arc<dyn IndexBuilder>) -> Self {
		let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
		Self {
			shared: Arc::new(CacheShared {
				table: Mutex::new(CacheTable {
					ready: LruCache::new(capacity),
					building: HashMap::new(),
					failed: HashMap::new(),
					locks: HashMap::new(),
					next_build_id: 0,
					shut_down: false,
				}),
				builder,
				shutdown: CancellationToken::new(),
				builds_started: AtomicU64::new(0),
			}),
			runner: TaskRunner::default(),
		}
	}

	/// Runs builds, and the miners and services driving this cache, on
	/// `handle` instead of the caller's runtime.
	pub fn on_runtime(mut self, handle: tokio::runtime::Handle) -> Self {
		self.runner = TaskRunner::pinned(handle);
		self
	}

	pub(crate) fn runner(&self) -> &TaskRunner {
		&self.runner
	}

	/// Returns the index for `key`, building it if needed.
	///
	/// Concurrent requests for one key share a single build. When `cancel`
	/// fires this request resolves with [`CacheError::Cancelled`]; the build
	/// itself keeps running while other requests are still attached to it.
	pub async fn get_or_build(&self, key: &TagFileKey, cancel: &CancellationToken) -> Result<Arc<TagIndex>, CacheError> {
		if cancel.is_cancelled() {
			return Err(CacheError::Cancelled);
		}

		let (id, mut outcome) = {
			let mut table = self.shared.table.lock();
			if table.shut_down {
				return Err(CacheError::Cancelled);
			}
			if let Some(index) = table.ready.get(key) {
				tracing::trace!(key = %key, "ctags.cache.hit");
				return Ok(index.clone());
			}
			match table.building.get_mut(key) {
				Some(slot) => {
					slot.waiters += 1;
					tracing::trace!(key = %key, build_id = slot.id, waiters = slot.waiters, "ctags.cache.attach");
					(slot.id, slot.outcome.clone())
				}
				None => {
					table.failed.remove(key);
					self.start_build(&mut table, key)
				}
			}
		};

		let _waiter = WaiterGuard {
			shared: &self.shared,
			key,
			id,
		};

		tokio::select! {
			biased;
			_ = cancel.cancelled() => Err(CacheError::Cancelled),
			published = outcome.wait_for(Option::is_some) => match published {
				Ok(value) => (*value).clone().unwrap_or(Err(CacheError::Cancelled)),
				Err(_) => Err(CacheError::Cancelled),
			},
		}
	}

	fn start_build(&self, table: &mut CacheTable, key: &TagFileKey) -> (u64, watch::Receiver<Option<BuildOutcome>>) {
		let id = table.next_build_id;
		table.next_build_id += 1;

		let cancel = self.shared.shutdown.child_token();
		let (tx, rx) = watch::channel(None);
		table.building.insert(
			key.clone(),
			BuildSlot {
				id,
				cancel: cancel.clone(),
				waiters: 1,
				outcome: rx.clone(),
			},
		);
		let lock = table.locks.entry(key.clone()).or_default().clone();

		self.shared.builds_started.fetch_add(1, Ordering::Relaxed);
		tracing::debug!(key = %key, build_id = id, "ctags.cache.build.start");

		let driver = run_build(self.shared.clone(), self.runner.clone(), key.clone(), id, cancel, lock, tx);
		self.runner.spawn(Stage::BuildDriver, Some(key), driver);
		(id, rx)
	}

	/// Drops a ready or failed entry. In-flight builds are left alone.
	///
	/// Returns true when an entry was removed.
	pub fn invalidate(&self, key: &TagFileKey) -> bool {
		let mut table = self.shared.table.lock();
		let was_ready = table.ready.pop(key).is_some();
		let was_failed = table.failed.remove(key).is_some();
		let removed = was_ready || was_failed;
		if removed {
			tracing::debug!(key = %key, "ctags.cache.invalidate");
		}
		removed
	}

	/// Drops ready entries whose tags file changed on disk since it was loaded.
	///
	/// Returns the number of entries removed.
	pub fn invalidate_stale(&self) -> usize {
		let snapshot: Vec<(TagFileKey, Arc<TagIndex>)> = {
			let table = self.shared.table.lock();
			table.ready.iter().map(|(key, index)| (key.clone(), index.clone())).collect()
		};
		let stale: Vec<_> = snapshot.into_iter().filter(|(_, index)| index.is_stale()).collect();
		if stale.is_empty() {
			return 0;
		}

		let mut table = self.shared.table.lock();
		let mut removed = 0;
		for (key, index) in stale {
			if table.ready.peek(&key).is_some_and(|current| Arc::ptr_eq(current, &index)) {
				table.ready.pop(&key);
				tracing::debug!(key = %key, "ctags.cache.invalidate_stale");
				removed += 1;
			}
		}
		removed
	}

	/// Cancels every in-flight build and drops all entries.
	///
	/// Attached waiters resolve with [`CacheError::Cancelled`], and so does
	/// every later request. Idempotent.
	pub fn shutdown(&self) {
		let in_flight = {
			let mut table = self.shared.table.lock();
			if table.shut_down {
				return;
			}
			table.shut_down = true;
			table.ready.clear();
			table.failed.clear();
			let in_flight = table.building.len();
			table.building.clear();
			table.locks.clear();
			in_flight
		};
		self.shared.shutdown.cancel();
		tracing::info!(in_flight, "ctags.cache.shutdown");
	}

	pub fn state(&self, key: &TagFileKey) -> Option<EntryState> {
		let table = self.shared.table.lock();
		if table.building.contains_key(key) {
			Some(EntryState::Building)
		} else if table.ready.contains(key) {
			Some(EntryState::Ready)
		} else if table.failed.contains_key(key) {
			Some(EntryState::Failed)
		} else {
			None
		}
	}

	/// Returns the error of the last failed build for `key`, if it is still recorded.
	pub fn failure(&self, key: &TagFileKey) -> Option<BuildError> {
		self.shared.table.lock().failed.get(key).cloned()
	}

	/// Number of ready indexes.
	pub fn len(&self) -> usize {
		self.shared.table.lock().ready.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Total number of builds started since creation.
	pub fn builds_started(&self) -> u64 {
		self.shared.builds_started.load(Ordering::Relaxed)
	}

	pub fn is_shut_down(&self) -> bool {
		self.shared.table.lock().shut_down
	}
}

/// Detaches one waiter from a build slot when its request resolves or is dropped.
struct WaiterGuard<'a> {
	shared: &'a CacheShared,
	key: &'a TagFileKey,
	id: u64,
}

impl Drop for WaiterGuard<'_> {
	fn drop(&mut self) {
		let mut table = self.shared.table.lock();
		let Some(slot) = table.building.get_mut(self.key) else {
			return;
		};
		if slot.id != self.id {
			return;
		}
		slot.waiters = slot.waiters.saturating_sub(1);
		if slot.waiters > 0 {
			return;
		}
		if let Some(slot) = table.building.remove(self.key) {
			slot.cancel.cancel();
			tracing::debug!(key = %self.key, build_id = slot.id, "ctags.cache.build.abandoned");
		}
	}
}

async fn run_build(
	shared: Arc<CacheShared>,
	runner: TaskRunner,
	key: TagFileKey,
	id: u64,
	cancel: CancellationToken,
	lock: Arc<tokio::sync::Mutex<()>>,
	tx: watch::Sender<Option<BuildOutcome>>,
) {
	let result = build_exclusive(&shared, &runner, &key, &cancel, lock).await;
	let mut outcome: BuildOutcome = result.map(Arc::new).map_err(CacheError::from);

	{
		let mut table = shared.table.lock();
		if table.shut_down {
			outcome = Err(CacheError::Cancelled);
		} else if table.building.get(&key).is_some_and(|slot| slot.id == id) {
			table.building.remove(&key);
			match &outcome {
				Ok(index) => {
					if let Some((evicted, _)) = table.ready.push(key.clone(), index.clone())
						&& evicted != key
					{
						tracing::debug!(key = %evicted, "ctags.cache.evict");
					}
				}
				Err(CacheError::Build(err)) => {
					table.failed.insert(key.clone(), err.clone());
				}
				Err(CacheError::Cancelled) => {}
			}
		}
		release_lock(&mut table, &key);
	}

	match &outcome {
		Ok(index) => tracing::debug!(key = %key, build_id = id, records = index.len(), "ctags.cache.build.done"),
		Err(CacheError::Build(err)) => tracing::warn!(key = %key, build_id = id, error = %err, "ctags.cache.build.failed"),
		Err(CacheError::Cancelled) => tracing::debug!(key = %key, build_id = id, "ctags.cache.build.cancelled"),
	}
	tx.send_replace(Some(outcome));
}

async fn build_exclusive(
	shared: &Arc<CacheShared>,
	runner: &TaskRunner,
	key: &TagFileKey,
	cancel: &CancellationToken,
	lock: Arc<tokio::sync::Mutex<()>>,
) -> Result<TagIndex, BuildError> {
	let exclusive = tokio::select! {
		biased;
		_ = cancel.cancelled() => return Err(BuildError::Cancelled),
		guard = lock.lock_owned() => guard,
	};

	let job_shared = shared.clone();
	let job_key = key.clone();
	let job_cancel = cancel.clone();
	let job = runner.spawn_blocking(Stage::IndexBuild, Some(key), move || {
		let built = job_shared.builder.build(&job_key, &job_cancel);
		drop(exclusive);
		// An abandoned build outlives its driver; prune here as well.
		release_lock(&mut job_shared.table.lock(), &job_key);
		built
	});

	tokio::select! {
		biased;
		_ = cancel.cancelled() => Err(BuildError::Cancelled),
		joined = job => joined.unwrap_or_else(|err| Err(BuildError::Aborted(err.to_string().into()))),
	}
}

/// Drops the build lock for `key` when nothing but the table references it.
///
/// Every other reference is cloned from the table under its lock, so a
/// strong count of one seen under that lock cannot race a new build.
fn release_lock(table: &mut CacheTable, key: &TagFileKey) {
	if table.building.contains_key(key) {
		return;
	}
	if table.locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
		table.locks.remove(key);
	}
}

#[cfg(test)]
mod tests;
