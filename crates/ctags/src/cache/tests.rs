use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::time::{Duration, SystemTime};

use parking_lot::Condvar;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};

use super::*;

/// Builder that blocks until its gate opens, counting builds and cancellations.
struct GateBuilder {
	builds: AtomicUsize,
	cancelled: AtomicUsize,
	fail: AtomicBool,
	started: Notify,
	open: parking_lot::Mutex<bool>,
	opened: Condvar,
}

impl GateBuilder {
	fn new(open: bool) -> Arc<Self> {
		Arc::new(Self {
			builds: AtomicUsize::new(0),
			cancelled: AtomicUsize::new(0),
			fail: AtomicBool::new(false),
			started: Notify::new(),
			open: parking_lot::Mutex::new(open),
			opened: Condvar::new(),
		})
	}

	fn set_open(&self, open: bool) {
		*self.open.lock() = open;
		self.opened.notify_all();
	}

	fn builds(&self) -> usize {
		self.builds.load(Ordering::SeqCst)
	}

	async fn wait_started(&self) {
		timeout(Duration::from_secs(5), self.started.notified())
			.await
			.expect("build never started");
	}
}

impl IndexBuilder for GateBuilder {
	fn build(&self, key: &TagFileKey, cancel: &CancellationToken) -> Result<TagIndex, BuildError> {
		self.builds.fetch_add(1, Ordering::SeqCst);
		self.started.notify_one();

		let mut open = self.open.lock();
		while !*open {
			if cancel.is_cancelled() {
				self.cancelled.fetch_add(1, Ordering::SeqCst);
				return Err(BuildError::Cancelled);
			}
			self.opened.wait_for(&mut open, Duration::from_millis(5));
		}
		drop(open);

		if self.fail.load(Ordering::SeqCst) {
			return Err(BuildError::NotAFile(key.path().to_path_buf()));
		}
		TagIndex::build(key.clone(), b"sym\tsym.c\t1;\"\tf\n", cancel)
	}
}

fn key(name: &str) -> TagFileKey {
	TagFileKey::new(format!("/cache-test/{name}/tags"))
}

async fn wait_until<F>(name: &str, mut condition: F)
where
	F: FnMut() -> bool,
{
	timeout(Duration::from_secs(5), async move {
		loop {
			if condition() {
				return;
			}
			sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.unwrap_or_else(|_| panic!("timed out waiting for {name}"));
}

#[tokio::test]
async fn concurrent_requests_share_one_build() {
	let builder = GateBuilder::new(false);
	let cache = IndexCache::with_builder(8, builder.clone());
	let key = key("shared");

	let first = tokio::spawn({
		let cache = cache.clone();
		let key = key.clone();
		async move { cache.get_or_build(&key, &CancellationToken::new()).await }
	});
	builder.wait_started().await;
	assert_eq!(cache.state(&key), Some(EntryState::Building));

	let second = tokio::spawn({
		let cache = cache.clone();
		let key = key.clone();
		async move { cache.get_or_build(&key, &CancellationToken::new()).await }
	});
	sleep(Duration::from_millis(20)).await;
	builder.set_open(true);

	let a = first.await.expect("join").expect("first index");
	let b = second.await.expect("join").expect("second index");
	assert!(Arc::ptr_eq(&a, &b));
	assert_eq!(builder.builds(), 1);
	assert_eq!(cache.builds_started(), 1);
	assert_eq!(cache.state(&key), Some(EntryState::Ready));
}

#[tokio::test]
async fn ready_entry_resolves_without_rebuilding() {
	let builder = GateBuilder::new(true);
	let cache = IndexCache::with_builder(8, builder.clone());
	let key = key("ready");
	let cancel = CancellationToken::new();

	let first = cache.get_or_build(&key, &cancel).await.expect("index");
	let again = cache.get_or_build(&key, &cancel).await.expect("index");
	assert!(Arc::ptr_eq(&first, &again));
	assert_eq!(first.lookup_exact("sym").len(), 1);
	assert_eq!(builder.builds(), 1);
	assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn failure_is_reported_then_retried() {
	let builder = GateBuilder::new(true);
	builder.fail.store(true, Ordering::SeqCst);
	let cache = IndexCache::with_builder(8, builder.clone());
	let key = key("flaky");
	let cancel = CancellationToken::new();

	let err = cache.get_or_build(&key, &cancel).await.expect_err("build fails");
	assert!(matches!(err, CacheError::Build(BuildError::NotAFile(_))));
	assert!(!err.is_cancelled());
	assert_eq!(cache.state(&key), Some(EntryState::Failed));
	assert!(cache.failure(&key).is_some());

	builder.fail.store(false, Ordering::SeqCst);
	cache.get_or_build(&key, &cancel).await.expect("retry succeeds");
	assert_eq!(builder.builds(), 2);
	assert_eq!(cache.state(&key), Some(EntryState::Ready));
	assert!(cache.failure(&key).is_none());
}

#[tokio::test]
async fn independent_waiter_survives_sibling_cancellation() {
	let builder = GateBuilder::new(false);
	let cache = IndexCache::with_builder(8, builder.clone());
	let key = key("shared-session");
	let session = CancellationToken::new();
	let independent = CancellationToken::new();

	let session_req = cache.get_or_build(&key, &session);
	tokio::pin!(session_req);
	assert!(timeout(Duration::from_millis(20), &mut session_req).await.is_err());
	builder.wait_started().await;

	let independent_req = cache.get_or_build(&key, &independent);
	tokio::pin!(independent_req);
	assert!(timeout(Duration::from_millis(20), &mut independent_req).await.is_err());

	session.cancel();
	assert!(matches!(session_req.await, Err(CacheError::Cancelled)));
	assert_eq!(cache.state(&key), Some(EntryState::Building));

	builder.set_open(true);
	let index = independent_req.await.expect("independent request completes");
	assert_eq!(index.len(), 1);
	assert_eq!(builder.builds(), 1);
	assert_eq!(builder.cancelled.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn last_waiter_leaving_cancels_the_build() {
	let builder = GateBuilder::new(false);
	let cache = IndexCache::with_builder(8, builder.clone());
	let key = key("abandoned");
	let cancel = CancellationToken::new();

	let request = cache.get_or_build(&key, &cancel);
	tokio::pin!(request);
	assert!(timeout(Duration::from_millis(20), &mut request).await.is_err());
	builder.wait_started().await;

	cancel.cancel();
	assert!(matches!(request.await, Err(CacheError::Cancelled)));
	assert_eq!(cache.state(&key), None);
	wait_until("builder to observe cancellation", || builder.cancelled.load(Ordering::SeqCst) == 1).await;

	builder.set_open(true);
	cache
		.get_or_build(&key, &CancellationToken::new())
		.await
		.expect("fresh build after abandonment");
	assert_eq!(builder.builds(), 2);
}

#[tokio::test]
async fn dropping_the_request_future_detaches_the_waiter() {
	let builder = GateBuilder::new(false);
	let cache = IndexCache::with_builder(8, builder.clone());
	let key = key("dropped");
	let cancel = CancellationToken::new();

	{
		let request = cache.get_or_build(&key, &cancel);
		tokio::pin!(request);
		assert!(timeout(Duration::from_millis(20), &mut request).await.is_err());
		builder.wait_started().await;
	}

	assert_eq!(cache.state(&key), None);
	wait_until("builder to observe cancellation", || builder.cancelled.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn cancelled_token_never_starts_a_build() {
	let builder = GateBuilder::new(true);
	let cache = IndexCache::with_builder(8, builder.clone());
	let cancel = CancellationToken::new();
	cancel.cancel();

	let result = cache.get_or_build(&key("never"), &cancel).await;
	assert!(matches!(result, Err(CacheError::Cancelled)));
	assert_eq!(cache.builds_started(), 0);
}

#[tokio::test]
async fn shutdown_cancels_waiters_and_rejects_new_requests() {
	let builder = GateBuilder::new(true);
	let cache = IndexCache::with_builder(8, builder.clone());
	let cancel = CancellationToken::new();

	let ready = key("before-shutdown");
	cache.get_or_build(&ready, &cancel).await.expect("index");

	builder.set_open(false);
	let pending = key("pending");
	let request = cache.get_or_build(&pending, &cancel);
	tokio::pin!(request);
	assert!(timeout(Duration::from_millis(20), &mut request).await.is_err());
	builder.wait_started().await;

	cache.shutdown();
	assert!(matches!(request.await, Err(CacheError::Cancelled)));
	assert!(cache.is_empty());
	assert!(cache.is_shut_down());

	builder.set_open(true);
	let started = cache.builds_started();
	assert!(matches!(cache.get_or_build(&ready, &cancel).await, Err(CacheError::Cancelled)));
	assert_eq!(cache.builds_started(), started);
}

#[tokio::test]
async fn lru_evicts_least_recently_used_index() {
	let builder = GateBuilder::new(true);
	let cache = IndexCache::with_builder(2, builder.clone());
	let cancel = CancellationToken::new();
	let (a, b, c) = (key("a"), key("b"), key("c"));

	cache.get_or_build(&a, &cancel).await.expect("a");
	cache.get_or_build(&b, &cancel).await.expect("b");
	cache.get_or_build(&a, &cancel).await.expect("a again");
	cache.get_or_build(&c, &cancel).await.expect("c");

	assert_eq!(cache.len(), 2);
	assert_eq!(cache.state(&a), Some(EntryState::Ready));
	assert_eq!(cache.state(&b), None);
	assert_eq!(cache.state(&c), Some(EntryState::Ready));
	assert_eq!(builder.builds(), 3);
}

#[tokio::test]
async fn invalidate_leaves_building_entries_alone() {
	let builder = GateBuilder::new(false);
	let cache = IndexCache::with_builder(8, builder.clone());
	let key = key("in-flight");
	let cancel = CancellationToken::new();

	let request = cache.get_or_build(&key, &cancel);
	tokio::pin!(request);
	assert!(timeout(Duration::from_millis(20), &mut request).await.is_err());

	assert!(!cache.invalidate(&key));
	assert_eq!(cache.state(&key), Some(EntryState::Building));

	builder.set_open(true);
	request.await.expect("build completes");
	assert!(cache.invalidate(&key));
	assert_eq!(cache.state(&key), None);
}

#[tokio::test]
async fn invalidate_stale_drops_changed_tag_files() {
	let dir = tempfile::tempdir().expect("tempdir");
	let path = dir.path().join("tags");
	fs::write(&path, "main\tmain.c\t1;\"\tf\n").expect("write tags");

	let cache = IndexCache::new(4);
	let key = TagFileKey::new(&path);
	let cancel = CancellationToken::new();
	cache.get_or_build(&key, &cancel).await.expect("index");
	assert_eq!(cache.invalidate_stale(), 0);

	let file = fs::File::options().write(true).open(&path).expect("open");
	file.set_modified(SystemTime::now() + Duration::from_secs(60)).expect("set mtime");
	drop(file);

	assert_eq!(cache.invalidate_stale(), 1);
	assert!(cache.is_empty());
}

#[tokio::test]
async fn missing_tag_file_fails_with_io_error() {
	let dir = tempfile::tempdir().expect("tempdir");
	let cache = IndexCache::new(4);
	let key = TagFileKey::new(dir.path().join("tags"));

	let err = cache.get_or_build(&key, &CancellationToken::new()).await.expect_err("missing file");
	assert!(matches!(err, CacheError::Build(BuildError::Io { .. })));
}

fn lock_count(cache: &IndexCache) -> usize {
	cache.shared.table.lock().locks.len()
}

#[tokio::test]
async fn build_locks_do_not_outlive_their_builds() {
	let builder = GateBuilder::new(true);
	let cache = IndexCache::with_builder(1, builder.clone());
	let cancel = CancellationToken::new();

	for n in 0..200 {
		let key = key(&format!("churn-{n}"));
		cache.get_or_build(&key, &cancel).await.expect("index");
		cache.invalidate(&key);
	}
	assert!(cache.is_empty());
	wait_until("build locks to be released", || lock_count(&cache) == 0).await;

	builder.fail.store(true, Ordering::SeqCst);
	let failing = key("churn-failing");
	cache.get_or_build(&failing, &cancel).await.expect_err("build fails");
	wait_until("failed build lock to be released", || lock_count(&cache) == 0).await;
}

#[tokio::test]
async fn abandoned_build_releases_its_lock_when_it_returns() {
	let builder = GateBuilder::new(false);
	let cache = IndexCache::with_builder(8, builder.clone());
	let key = key("abandoned-lock");
	let cancel = CancellationToken::new();

	let request = cache.get_or_build(&key, &cancel);
	tokio::pin!(request);
	assert!(timeout(Duration::from_millis(20), &mut request).await.is_err());
	builder.wait_started().await;
	assert_eq!(lock_count(&cache), 1);

	cancel.cancel();
	assert!(matches!(request.await, Err(CacheError::Cancelled)));
	wait_until("abandoned build to return", || builder.cancelled.load(Ordering::SeqCst) == 1).await;
	wait_until("abandoned build lock to be released", || lock_count(&cache) == 0).await;
}

#[tokio::test]
async fn shutdown_drops_build_locks() {
	let builder = GateBuilder::new(false);
	let cache = IndexCache::with_builder(8, builder.clone());
	let request_key = key("shutdown-lock");
	let request_cancel = CancellationToken::new();
	let request = cache.get_or_build(&request_key, &request_cancel);
	tokio::pin!(request);
	assert!(timeout(Duration::from_millis(20), &mut request).await.is_err());

	cache.shutdown();
	assert_eq!(lock_count(&cache), 0);
	assert!(matches!(request.await, Err(CacheError::Cancelled)));
}

#[test]
fn pinned_runtime_runs_builds() {
	struct ThreadName;

	impl IndexBuilder for ThreadName {
		fn build(&self, key: &TagFileKey, cancel: &CancellationToken) -> Result<TagIndex, BuildError> {
			let name = std::thread::current().name().unwrap_or("unnamed").to_owned();
			TagIndex::build(key.clone(), format!("{name}\tthread.c\t1\n").as_bytes(), cancel)
		}
	}

	let pinned = tokio::runtime::Builder::new_multi_thread()
		.worker_threads(1)
		.thread_name("ctags-cache-pinned")
		.build()
		.expect("pinned runtime");
	let caller = tokio::runtime::Builder::new_current_thread().build().expect("caller runtime");
	let cache = IndexCache::with_builder(4, Arc::new(ThreadName)).on_runtime(pinned.handle().clone());

	let index = caller
		.block_on(cache.get_or_build(&key("pinned"), &CancellationToken::new()))
		.expect("index");
	assert_eq!(index.lookup_exact("ctags-cache-pinned").len(), 1);
}
