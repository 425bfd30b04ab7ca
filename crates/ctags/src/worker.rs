//! Task placement for the indexing pipeline.
//!
//! Every task runs inside a `ctags.task` span naming its pipeline [`Stage`]
//! and, when it works on one tags file, that file's key. Tasks land on the
//! runtime pinned through [`IndexCache::on_runtime`](crate::IndexCache::on_runtime),
//! else on the caller's ambient runtime, else on a small runtime owned by
//! this crate.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};

use crate::key::TagFileKey;

/// Pipeline stage a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Stage {
	/// Drives one cache build and publishes its outcome.
	BuildDriver,
	/// Reads and indexes one tags file.
	IndexBuild,
	/// Walks the mining roots.
	Traversal,
	/// Requests the index for one discovered tags file.
	Submit,
	/// Registers a mining session's indexes with the lookup facade.
	Session,
}

impl Stage {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::BuildDriver => "build_driver",
			Self::IndexBuild => "index_build",
			Self::Traversal => "traversal",
			Self::Submit => "submit",
			Self::Session => "session",
		}
	}

	const fn is_blocking(self) -> bool {
		matches!(self, Self::IndexBuild | Self::Traversal)
	}

	fn span(self, key: Option<&TagFileKey>) -> Span {
		let span = tracing::debug_span!("ctags.task", stage = self.as_str(), key = tracing::field::Empty);
		if let Some(key) = key {
			span.record("key", tracing::field::display(key));
		}
		span
	}
}

/// Runtime handle shared by a cache and everything that drives it.
#[derive(Debug, Clone, Default)]
pub(crate) struct TaskRunner {
	pinned: Option<Handle>,
}

impl TaskRunner {
	pub(crate) fn pinned(handle: Handle) -> Self {
		Self { pinned: Some(handle) }
	}

	pub(crate) fn is_pinned(&self) -> bool {
		self.pinned.is_some()
	}

	fn handle(&self) -> Handle {
		if let Some(handle) = &self.pinned {
			return handle.clone();
		}
		Handle::try_current().unwrap_or_else(|_| fallback().handle().clone())
	}

	pub(crate) fn spawn<F>(&self, stage: Stage, key: Option<&TagFileKey>, fut: F) -> JoinHandle<F::Output>
	where
		F: Future + Send + 'static,
		F::Output: Send + 'static,
	{
		debug_assert!(!stage.is_blocking(), "{} runs on the blocking pool", stage.as_str());
		self.handle().spawn(fut.instrument(stage.span(key)))
	}

	pub(crate) fn spawn_blocking<F, R>(&self, stage: Stage, key: Option<&TagFileKey>, f: F) -> JoinHandle<R>
	where
		F: FnOnce() -> R + Send + 'static,
		R: Send + 'static,
	{
		debug_assert!(stage.is_blocking(), "{} runs on the async pool", stage.as_str());
		let span = stage.span(key);
		self.handle().spawn_blocking(move || span.in_scope(f))
	}
}

fn fallback() -> &'static Runtime {
	static FALLBACK: OnceLock<Runtime> = OnceLock::new();
	FALLBACK.get_or_init(|| {
		Builder::new_multi_thread()
			.worker_threads(2)
			.thread_name("xeno-ctags")
			.enable_all()
			.build()
			.expect("xeno-ctags fallback runtime")
	})
}
