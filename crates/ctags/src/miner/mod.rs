//! Background discovery of `tags` files.
//!
//! A mining session walks every configured root on a blocking worker and
//! submits each `tags` file it finds to the [`IndexCache`]. The walk does not
//! wait for builds: each submission resolves on its own task and reports back
//! through the session's event stream.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::IndexCache;
use crate::error::{BuildError, CacheError};
use crate::index::TagIndex;
use crate::key::TagFileKey;
use crate::worker::Stage;

/// File name the miner looks for in every visited directory.
pub const TAGS_FILE_NAME: &str = "tags";

/// A directory to mine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MineRoot {
	pub path: PathBuf,
	/// Descend into subdirectories. When false only `<path>/tags` is checked.
	#[serde(default = "default_recurse")]
	pub recurse: bool,
}

fn default_recurse() -> bool {
	true
}

impl MineRoot {
	pub fn recursive(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			recurse: true,
		}
	}

	pub fn shallow(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			recurse: false,
		}
	}
}

/// Summary of one traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MineReport {
	pub visited_dirs: usize,
	pub discovered: usize,
	/// Entries the walker could not read (permissions, symlink loops, ...).
	pub skipped: usize,
	/// The traversal stopped early because the session was cancelled.
	pub cancelled: bool,
}

/// Progress reported by a [`MineSession`].
#[derive(Debug, Clone)]
pub enum MineEvent {
	/// A discovered tags file was indexed.
	Loaded { key: TagFileKey, index: Arc<TagIndex> },
	/// A discovered tags file could not be indexed.
	Failed { key: TagFileKey, error: BuildError },
	/// The build for a discovered tags file was cancelled.
	Cancelled { key: TagFileKey },
	/// The traversal ended. Builds may still be resolving.
	Finished(MineReport),
}

/// Handle to a running mining session.
///
/// The event stream ends once the traversal and every build it started have
/// resolved. Dropping the session cancels it.
#[derive(Debug)]
pub struct MineSession {
	events: mpsc::UnboundedReceiver<MineEvent>,
	cancel: CancellationToken,
}

impl MineSession {
	/// Returns the next event, or `None` once the session is complete.
	pub async fn next(&mut self) -> Option<MineEvent> {
		self.events.recv().await
	}

	/// Stops the traversal before its next directory and cancels this
	/// session's pending builds.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Collects every remaining event.
	pub async fn drain(mut self) -> Vec<MineEvent> {
		let mut events = Vec::new();
		while let Some(event) = self.events.recv().await {
			events.push(event);
		}
		events
	}
}

impl Drop for MineSession {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

/// Discovers `tags` files under a set of roots and feeds them to an [`IndexCache`].
#[derive(Debug, Clone)]
pub struct TagMiner {
	cache: IndexCache,
	follow_symlinks: bool,
}

impl TagMiner {
	pub fn new(cache: IndexCache) -> Self {
		Self {
			cache,
			follow_symlinks: false,
		}
	}

	/// Follow symlinked directories. Symlink loops are detected and skipped.
	pub fn follow_symlinks(mut self, follow: bool) -> Self {
		self.follow_symlinks = follow;
		self
	}

	/// Starts mining `roots` and returns immediately.
	///
	/// The session is cancelled when `cancel` fires or through
	/// [`MineSession::cancel`].
	pub fn mine(&self, roots: Vec<MineRoot>, cancel: &CancellationToken) -> MineSession {
		let token = cancel.child_token();
		let (tx, events) = mpsc::unbounded_channel();

		let cache = self.cache.clone();
		let walk = Traversal::new(self.follow_symlinks, token.clone());
		self.cache.runner().spawn_blocking(Stage::Traversal, None, move || {
			let report = walk.run(&roots, |key, cancel| submit(&cache, key, cancel, &tx));
			let _ = tx.send(MineEvent::Finished(report));
		});

		MineSession { events, cancel: token }
	}
}

/// Walk state for one session: cancellation, dedup of discovered files, counters.
struct Traversal {
	follow_symlinks: bool,
	cancel: CancellationToken,
	seen: HashSet<TagFileKey>,
	report: MineReport,
}

impl Traversal {
	fn new(follow_symlinks: bool, cancel: CancellationToken) -> Self {
		Self {
			follow_symlinks,
			cancel,
			seen: HashSet::new(),
			report: MineReport::default(),
		}
	}

	fn run(mut self, roots: &[MineRoot], mut submit: impl FnMut(TagFileKey, &CancellationToken)) -> MineReport {
		tracing::info!(roots = roots.len(), follow_symlinks = self.follow_symlinks, "ctags.miner.start");
		for root in roots {
			if !self.walk_root(root, &mut submit) {
				break;
			}
		}
		tracing::info!(
			visited_dirs = self.report.visited_dirs,
			discovered = self.report.discovered,
			skipped = self.report.skipped,
			cancelled = self.report.cancelled,
			"ctags.miner.finish"
		);
		self.report
	}

	/// Walks one root. Returns false once the session is cancelled.
	fn walk_root(&mut self, root: &MineRoot, submit: &mut impl FnMut(TagFileKey, &CancellationToken)) -> bool {
		let walker = WalkBuilder::new(&root.path)
			.standard_filters(false)
			.follow_links(self.follow_symlinks)
			.max_depth(if root.recurse { None } else { Some(0) })
			.build();

		for entry in walker {
			let entry = match entry {
				Ok(entry) => entry,
				Err(err) => {
					tracing::debug!(root = %root.path.display(), error = %err, "ctags.miner.skip");
					self.report.skipped += 1;
					continue;
				}
			};

			let is_dir = match entry.file_type() {
				Some(file_type) if file_type.is_dir() => true,
				// The root itself may be a symlink to a directory.
				_ => entry.depth() == 0 && entry.path().is_dir(),
			};
			if !is_dir {
				continue;
			}

			if self.cancel.is_cancelled() {
				self.report.cancelled = true;
				return false;
			}
			self.visit(entry.path(), &mut *submit);
		}
		true
	}

	fn visit(&mut self, dir: &Path, submit: &mut impl FnMut(TagFileKey, &CancellationToken)) {
		self.report.visited_dirs += 1;
		tracing::trace!(dir = %dir.display(), "ctags.miner.visit");

		let candidate = dir.join(TAGS_FILE_NAME);
		match fs::metadata(&candidate) {
			Ok(meta) if meta.is_file() => {}
			_ => return,
		}

		let key = TagFileKey::new(&candidate);
		if !self.seen.insert(key.clone()) {
			return;
		}
		self.report.discovered += 1;
		tracing::debug!(key = %key, "ctags.miner.discover");
		submit(key, &self.cancel);
	}
}

/// Requests a build for `key` on its own task and reports the outcome.
fn submit(cache: &IndexCache, key: TagFileKey, cancel: &CancellationToken, tx: &mpsc::UnboundedSender<MineEvent>) {
	let cache = cache.clone();
	let cancel = cancel.clone();
	let tx = tx.clone();
	let runner = cache.runner().clone();
	let task_key = key.clone();
	runner.spawn(Stage::Submit, Some(&task_key), async move {
		let event = match cache.get_or_build(&key, &cancel).await {
			Ok(index) => MineEvent::Loaded { key, index },
			Err(CacheError::Cancelled) => MineEvent::Cancelled { key },
			Err(CacheError::Build(error)) => MineEvent::Failed { key, error },
		};
		let _ = tx.send(event);
	});
}
