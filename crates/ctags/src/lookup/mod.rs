//! Symbol completion across every registered tag index.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;

use crate::index::TagIndex;
use crate::key::TagFileKey;
use crate::record::{TagAddress, TagKind, TagRecord};

/// Default cap on the number of candidates returned by one query.
pub const DEFAULT_MAX_RESULTS: usize = 200;

/// One completion result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolCandidate {
	pub record: TagRecord,
	/// Source file of the symbol, resolved against the tags file directory.
	pub path: PathBuf,
	/// Tags file the record came from.
	pub source: TagFileKey,
}

/// Prefix-based symbol lookup consumed by completion and navigation.
pub trait SymbolLookup: Send + Sync {
	/// Makes `index` visible to later queries. Replaces any index previously
	/// registered for the same tags file.
	fn register_index(&self, index: &Arc<TagIndex>);

	/// Returns candidates whose name starts with `prefix`.
	fn query(&self, prefix: &str) -> Vec<SymbolCandidate>;
}

#[derive(Clone)]
struct RegisteredIndex {
	key: TagFileKey,
	index: Weak<TagIndex>,
}

/// [`SymbolLookup`] over weakly held tag indexes.
///
/// Registration never extends an index's lifetime: once the cache evicts an
/// index and no query holds it, it silently stops contributing.
pub struct TagLookup {
	indexes: ArcSwap<Vec<RegisteredIndex>>,
	max_results: usize,
}

impl std::fmt::Debug for TagLookup {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TagLookup")
			.field("registered", &self.indexes.load().len())
			.field("max_results", &self.max_results)
			.finish()
	}
}

impl Default for TagLookup {
	fn default() -> Self {
		Self::new(DEFAULT_MAX_RESULTS)
	}
}

impl TagLookup {
	pub fn new(max_results: usize) -> Self {
		Self {
			indexes: ArcSwap::from_pointee(Vec::new()),
			max_results,
		}
	}

	pub fn max_results(&self) -> usize {
		self.max_results
	}

	/// Number of registered indexes that are still alive.
	pub fn live_indexes(&self) -> usize {
		self.indexes.load().iter().filter(|entry| entry.index.strong_count() > 0).count()
	}

	/// Drops the registration for `key`. Returns true when one existed.
	pub fn unregister(&self, key: &TagFileKey) -> bool {
		let previous = self.indexes.rcu(|current| {
			current.iter().filter(|entry| &entry.key != key).cloned().collect::<Vec<_>>()
		});
		previous.iter().any(|entry| &entry.key == key)
	}
}

impl SymbolLookup for TagLookup {
	fn register_index(&self, index: &Arc<TagIndex>) {
		let key = index.path().clone();
		let weak = Arc::downgrade(index);
		self.indexes.rcu(|current| {
			let mut next: Vec<RegisteredIndex> = current
				.iter()
				.filter(|entry| entry.key != key && entry.index.strong_count() > 0)
				.cloned()
				.collect();
			next.push(RegisteredIndex {
				key: key.clone(),
				index: weak.clone(),
			});
			next
		});
		tracing::debug!(key = %key, records = index.len(), "ctags.lookup.register");
	}

	fn query(&self, prefix: &str) -> Vec<SymbolCandidate> {
		if prefix.is_empty() || self.max_results == 0 {
			return Vec::new();
		}

		let snapshot = self.indexes.load();
		let live: Vec<Arc<TagIndex>> = snapshot.iter().filter_map(|entry| entry.index.upgrade()).collect();

		let mut seen: HashSet<(&str, &TagKind, &str, &TagAddress)> = HashSet::new();
		let mut hits: Vec<(usize, &Arc<TagIndex>, &TagRecord)> = Vec::new();
		for (order, index) in live.iter().enumerate() {
			// Records are name-sorted, so an index's first `max_results` new
			// tuples are the only ones that can survive the final cut.
			let mut taken = 0;
			for record in index.lookup_prefix(prefix) {
				if taken == self.max_results {
					break;
				}
				if seen.insert((record.name(), record.kind(), record.file(), record.address())) {
					hits.push((order, index, record));
					taken += 1;
				}
			}
		}

		hits.sort_by(|(a_order, _, a), (b_order, _, b)| {
			(a.name() != prefix)
				.cmp(&(b.name() != prefix))
				.then_with(|| a.name().cmp(b.name()))
				.then_with(|| a_order.cmp(b_order))
		});
		hits.truncate(self.max_results);

		tracing::trace!(prefix, indexes = live.len(), results = hits.len(), "ctags.lookup.query");
		hits.into_iter()
			.map(|(_, index, record)| SymbolCandidate {
				record: record.clone(),
				path: index.resolve_path(record),
				source: index.path().clone(),
			})
			.collect()
	}
}
