//! Immutable, queryable index over one tags file.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::error::BuildError;
use crate::key::TagFileKey;
use crate::parser::{TagEntry, parse_tags};
use crate::record::TagRecord;

/// Lines parsed between two cancellation checks.
const CANCEL_CHECK_INTERVAL: usize = 4_096;

/// Sort order declared by the `!_TAG_FILE_SORTED` pseudo-tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
	Unsorted,
	Sorted,
	/// Sorted with case folded.
	Folded,
	/// The header is absent or carries an unrecognized value.
	Unknown,
}

/// Pseudo-tag header of a tags file (`!_TAG_FILE_FORMAT`, `!_TAG_PROGRAM_NAME`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFileHeader {
	entries: IndexMap<String, String>,
}

impl TagFileHeader {
	/// Returns a pseudo-tag value by name, without the `!_` prefix.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.entries.get(name).map(String::as_str)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn sort_order(&self) -> SortOrder {
		match self.get("TAG_FILE_SORTED") {
			Some("0") => SortOrder::Unsorted,
			Some("1") => SortOrder::Sorted,
			Some("2") => SortOrder::Folded,
			_ => SortOrder::Unknown,
		}
	}

	pub fn program_name(&self) -> Option<&str> {
		self.get("TAG_PROGRAM_NAME")
	}
}

/// Symbol index built from a single tags file.
///
/// Records are kept sorted by name (byte order, case-sensitive) with ties in
/// file order, so every prefix query is a contiguous slice. The index never
/// changes after construction and is shared as `Arc<TagIndex>`.
#[derive(Debug)]
pub struct TagIndex {
	path: TagFileKey,
	header: TagFileHeader,
	records: Vec<TagRecord>,
	skipped_lines: usize,
	modified: Option<SystemTime>,
}

impl TagIndex {
	/// Builds an index from the contents of the tags file at `path`.
	///
	/// Malformed lines are skipped. Fails only with [`BuildError::Cancelled`].
	pub fn build(path: TagFileKey, bytes: &[u8], cancel: &CancellationToken) -> Result<Self, BuildError> {
		let mut header = TagFileHeader::default();
		let mut records = Vec::new();
		let mut skipped_lines = 0usize;

		for (n, entry) in parse_tags(bytes).enumerate() {
			if n % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
				return Err(BuildError::Cancelled);
			}
			match entry {
				Ok(TagEntry::Record(record)) => records.push(record),
				Ok(TagEntry::Pseudo { name, value }) => {
					header.entries.insert(name, value);
				}
				Err(err) => {
					tracing::trace!(path = %path, error = %err, "ctags.index.skip_line");
					skipped_lines += 1;
				}
			}
		}

		records.sort_by(|a, b| a.name().cmp(b.name()));

		tracing::debug!(path = %path, records = records.len(), skipped_lines, "ctags.index.built");
		Ok(Self {
			path,
			header,
			records,
			skipped_lines,
			modified: None,
		})
	}

	/// Reads and indexes the tags file at `path`.
	pub fn load(path: TagFileKey, cancel: &CancellationToken) -> Result<Self, BuildError> {
		if cancel.is_cancelled() {
			return Err(BuildError::Cancelled);
		}
		let metadata = std::fs::metadata(path.path()).map_err(|err| BuildError::io(path.path(), err))?;
		if !metadata.is_file() {
			return Err(BuildError::NotAFile(path.path().to_path_buf()));
		}
		let bytes = std::fs::read(path.path()).map_err(|err| BuildError::io(path.path(), err))?;

		let mut index = Self::build(path, &bytes, cancel)?;
		index.modified = metadata.modified().ok();
		Ok(index)
	}

	/// Returns all records whose name starts with `prefix`.
	///
	/// Exact matches come first, then names in lexical order, ties in file
	/// order. An empty prefix matches nothing.
	pub fn lookup_prefix(&self, prefix: &str) -> &[TagRecord] {
		if prefix.is_empty() {
			return &[];
		}
		let start = self.records.partition_point(|record| record.name() < prefix);
		let tail = &self.records[start..];
		let len = tail.partition_point(|record| record.name().starts_with(prefix));
		&tail[..len]
	}

	/// Returns all records named exactly `name`, in file order.
	pub fn lookup_exact(&self, name: &str) -> &[TagRecord] {
		let start = self.records.partition_point(|record| record.name() < name);
		let tail = &self.records[start..];
		let len = tail.partition_point(|record| record.name() == name);
		&tail[..len]
	}

	/// Finds the definition of `name` declared in the source file `path`.
	pub fn find_with_path(&self, name: &str, path: &Path) -> Option<&TagRecord> {
		self.lookup_exact(name).iter().find(|record| self.resolve_path(record) == path)
	}

	/// Resolves a record's source file against the tags file directory.
	pub fn resolve_path(&self, record: &TagRecord) -> PathBuf {
		let file = Path::new(record.file());
		if file.is_absolute() {
			file.to_path_buf()
		} else {
			self.path.directory().join(file)
		}
	}

	/// Returns true when the tags file changed on disk since it was loaded.
	///
	/// Indexes built from in-memory bytes are never stale.
	pub fn is_stale(&self) -> bool {
		let Some(modified) = self.modified else {
			return false;
		};
		match std::fs::metadata(self.path.path()).and_then(|meta| meta.modified()) {
			Ok(current) => current != modified,
			Err(_) => true,
		}
	}

	pub fn path(&self) -> &TagFileKey {
		&self.path
	}

	pub fn base_dir(&self) -> &Path {
		self.path.directory()
	}

	pub fn header(&self) -> &TagFileHeader {
		&self.header
	}

	pub fn records(&self) -> &[TagRecord] {
		&self.records
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	/// Number of malformed lines dropped during the build.
	pub fn skipped_lines(&self) -> usize {
		self.skipped_lines
	}
}

#[cfg(test)]
mod tests;
