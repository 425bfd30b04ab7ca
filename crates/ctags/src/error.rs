//! Error taxonomy for tag parsing, index builds, cache requests, and configuration.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// A single tag-file line that could not be parsed.
///
/// Parse errors are always recovered locally: the offending line is skipped
/// and parsing continues with the next one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {kind}")]
pub struct ParseError {
	/// 1-based line number within the tags file.
	pub line: usize,
	/// What was wrong with the line.
	pub kind: ParseErrorKind,
}

/// Reason a tag-file line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseErrorKind {
	/// A mandatory tab-separated column is absent or empty.
	#[error("missing {0} column")]
	MissingColumn(&'static str),
	/// The symbol name column is empty.
	#[error("empty symbol name")]
	EmptyName,
	/// The address is neither a 1-based line number nor a delimited pattern.
	#[error("invalid address `{0}`")]
	InvalidAddress(String),
	/// A `/pattern/` or `?pattern?` address has no closing delimiter.
	#[error("unterminated search pattern")]
	UnterminatedPattern,
	/// The line is not valid UTF-8 from this byte offset on.
	#[error("invalid UTF-8 at byte {0}")]
	InvalidUtf8(usize),
}

/// Failure to build a [`crate::TagIndex`] from a tags file.
///
/// Cloneable so one failure can be delivered to every caller attached to the
/// same cache entry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BuildError {
	/// The tags file could not be read.
	#[error("failed to read {}: {source}", path.display())]
	Io {
		/// Path of the tags file.
		path: PathBuf,
		/// Underlying I/O failure.
		#[source]
		source: Arc<io::Error>,
	},
	/// The path exists but is not a regular file.
	#[error("{} is not a regular file", .0.display())]
	NotAFile(PathBuf),
	/// The build task ended without producing a result.
	#[error("index build aborted: {0}")]
	Aborted(Arc<str>),
	/// The build observed cancellation before completing.
	#[error("index build cancelled")]
	Cancelled,
}

impl BuildError {
	pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
		Self::Io {
			path: path.into(),
			source: Arc::new(source),
		}
	}
}

/// Error resolved by [`crate::IndexCache::get_or_build`].
///
/// Cancellation is kept separate from build failures so callers can tell
/// "stopped on purpose" from "genuinely failed".
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
	/// The build for this entry failed.
	#[error(transparent)]
	Build(BuildError),
	/// The caller's token fired, the build was cancelled, or the cache shut down.
	#[error("index request cancelled")]
	Cancelled,
}

impl CacheError {
	/// Returns true when the request was cancelled rather than failed.
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}

impl From<BuildError> for CacheError {
	fn from(err: BuildError) -> Self {
		match err {
			BuildError::Cancelled => Self::Cancelled,
			other => Self::Build(other),
		}
	}
}

/// Failure to load a [`crate::CtagsConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// The configuration file could not be read.
	#[error("failed to read {}: {source}", path.display())]
	Read {
		/// Path of the configuration file.
		path: PathBuf,
		/// Underlying I/O failure.
		#[source]
		source: io::Error,
	},
	/// The configuration file is not valid TOML for [`crate::CtagsConfig`].
	#[error("failed to parse ctags config: {0}")]
	Parse(#[from] toml::de::Error),
}
