use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Cache key identifying one tags file by its canonical location.
///
/// Two keys are equal when they name the same file, regardless of how the
/// path was spelled by the caller. Paths that do not exist yet (a tags file
/// still being generated) fall back to a lexically absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagFileKey(Arc<Path>);

impl TagFileKey {
	pub fn new(path: impl AsRef<Path>) -> Self {
		let path = path.as_ref();
		let resolved = path
			.canonicalize()
			.or_else(|_| std::path::absolute(path))
			.unwrap_or_else(|_| path.to_path_buf());
		Self(resolved.into())
	}

	pub fn path(&self) -> &Path {
		&self.0
	}

	/// Directory that relative source paths in the tags file are resolved against.
	pub fn directory(&self) -> &Path {
		self.0.parent().unwrap_or(&self.0)
	}
}

impl fmt::Display for TagFileKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.display().fmt(f)
	}
}

impl From<PathBuf> for TagFileKey {
	fn from(path: PathBuf) -> Self {
		Self::new(path)
	}
}

impl AsRef<Path> for TagFileKey {
	fn as_ref(&self) -> &Path {
		self.path()
	}
}
