//! Ctags symbol service.
//!
//! # Purpose
//!
//! Owns the [`IndexCache`], the [`TagLookup`] facade and at most one mining
//! session. Consumers ask for the facade through [`CtagsService::provider`];
//! the first request starts mining the configured roots, and every index the
//! session loads is registered with the facade as soon as it resolves.
//!
//! # Mental model
//!
//! ```text
//! Idle --provider()--> Mining --stop()--> Stopped
//!   \------------------stop()------------/
//! ```
//!
//! `Stopped` is terminal: the mining session is cancelled, the cache is shut
//! down and later `provider()` calls return the (now empty) facade without
//! mining again.
//!
//! # Invariants
//!
//! * Mining starts at most once per service.
//! * The facade only holds weak references; the cache keeps indexes alive.
//! * `wait_idle()` resolves once the current session has delivered every
//!   event, or immediately when no session is running.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::cache::IndexCache;
use crate::config::CtagsConfig;
use crate::lookup::{SymbolLookup, TagLookup};
use crate::miner::{MineEvent, MineSession, TagMiner};
use crate::worker::Stage;

/// Supplies the project working directory mined by the service.
pub trait ProjectRootProvider: Send + Sync {
	fn working_directory(&self) -> PathBuf;
}

/// Fixed project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticProjectRoot(pub PathBuf);

impl ProjectRootProvider for StaticProjectRoot {
	fn working_directory(&self) -> PathBuf {
		self.0.clone()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
	Idle,
	Mining,
	Stopped,
}

struct ServiceInner {
	state: ServiceState,
	session: Option<CancellationToken>,
}

pub struct CtagsService {
	config: CtagsConfig,
	project: Arc<dyn ProjectRootProvider>,
	home: Option<PathBuf>,
	cache: IndexCache,
	lookup: Arc<TagLookup>,
	inner: Mutex<ServiceInner>,
	idle: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for CtagsService {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CtagsService")
			.field("state", &self.state())
			.field("cache", &self.cache)
			.field("lookup", &self.lookup)
			.finish_non_exhaustive()
	}
}

impl CtagsService {
	pub fn new(config: CtagsConfig, project: Arc<dyn ProjectRootProvider>) -> Self {
		let cache = IndexCache::new(config.cache_capacity);
		let lookup = Arc::new(TagLookup::new(config.max_results));
		let (idle, _) = watch::channel(true);
		Self {
			config,
			project,
			home: dirs::home_dir(),
			cache,
			lookup,
			inner: Mutex::new(ServiceInner {
				state: ServiceState::Idle,
				session: None,
			}),
			idle: Arc::new(idle),
		}
	}

	/// Overrides the home directory probed for a `tags` file.
	pub fn with_home_dir(mut self, home: Option<PathBuf>) -> Self {
		self.home = home;
		self
	}

	/// Returns the symbol lookup facade, starting mining on the first call.
	pub fn provider(&self) -> Arc<dyn SymbolLookup> {
		let mut inner = self.inner.lock();
		if inner.state == ServiceState::Idle {
			let session = self.start_mining();
			inner.session = Some(session);
			inner.state = ServiceState::Mining;
		}
		self.lookup.clone()
	}

	fn start_mining(&self) -> CancellationToken {
		let project = self.project.working_directory();
		let roots = self.config.roots(Some(&project), self.home.as_deref());
		tracing::info!(project = %project.display(), roots = roots.len(), "ctags.service.start");

		let cancel = CancellationToken::new();
		let session = TagMiner::new(self.cache.clone())
			.follow_symlinks(self.config.follow_symlinks)
			.mine(roots, &cancel);

		self.idle.send_replace(false);
		let driver = drive_session(session, self.lookup.clone(), self.idle.clone());
		self.cache.runner().spawn(Stage::Session, None, driver);
		cancel
	}

	/// Cancels mining and shuts the cache down. Terminal and idempotent.
	pub fn stop(&self) {
		{
			let mut inner = self.inner.lock();
			if inner.state == ServiceState::Stopped {
				return;
			}
			if let Some(session) = inner.session.take() {
				session.cancel();
			}
			inner.state = ServiceState::Stopped;
		}
		self.cache.shutdown();
		tracing::info!("ctags.service.stop");
	}

	/// Resolves once the current mining session has delivered all its events.
	pub async fn wait_idle(&self) {
		let mut idle = self.idle.subscribe();
		let _ = idle.wait_for(|idle| *idle).await;
	}

	pub fn state(&self) -> ServiceState {
		self.inner.lock().state
	}

	pub fn cache(&self) -> &IndexCache {
		&self.cache
	}

	pub fn lookup(&self) -> &Arc<TagLookup> {
		&self.lookup
	}

	pub fn config(&self) -> &CtagsConfig {
		&self.config
	}
}

impl Drop for CtagsService {
	fn drop(&mut self) {
		if let Some(session) = self.inner.get_mut().session.take() {
			session.cancel();
		}
	}
}

/// Registers every index the session loads until its event stream closes.
async fn drive_session(mut session: MineSession, lookup: Arc<TagLookup>, idle: Arc<watch::Sender<bool>>) {
	let mut loaded = 0usize;
	let mut failed = 0usize;
	while let Some(event) = session.next().await {
		match event {
			MineEvent::Loaded { index, .. } => {
				lookup.register_index(&index);
				loaded += 1;
			}
			MineEvent::Failed { key, error } => {
				tracing::warn!(key = %key, error = %error, "ctags.service.index_failed");
				failed += 1;
			}
			MineEvent::Cancelled { key } => {
				tracing::trace!(key = %key, "ctags.service.index_cancelled");
			}
			MineEvent::Finished(report) => {
				tracing::debug!(
					visited_dirs = report.visited_dirs,
					discovered = report.discovered,
					cancelled = report.cancelled,
					"ctags.service.traversal_done"
				);
			}
		}
	}
	tracing::info!(loaded, failed, "ctags.service.idle");
	idle.send_replace(true);
}
