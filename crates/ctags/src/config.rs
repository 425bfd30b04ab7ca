//! Mining and lookup configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::lookup::DEFAULT_MAX_RESULTS;
use crate::miner::MineRoot;

/// Settings for a [`crate::CtagsService`].
///
/// Every key is optional. Loaded from TOML with kebab-case keys:
///
/// ```toml
/// mine-home = false
/// system-roots = ["/usr/include", "/usr/local/include"]
/// max-results = 100
///
/// [[extra-roots]]
/// path = "/opt/sdk"
/// recurse = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct CtagsConfig {
	/// Mine the project working tree recursively.
	pub mine_project: bool,
	/// Check `$HOME/tags` without descending.
	pub mine_home: bool,
	/// Additional recursive roots, typically system header directories.
	pub system_roots: Vec<PathBuf>,
	pub extra_roots: Vec<MineRoot>,
	/// Cap on candidates returned by one query.
	pub max_results: usize,
	/// Number of ready indexes kept by the cache.
	pub cache_capacity: usize,
	pub follow_symlinks: bool,
}

impl Default for CtagsConfig {
	fn default() -> Self {
		Self {
			mine_project: true,
			mine_home: true,
			system_roots: vec![PathBuf::from("/usr/include")],
			extra_roots: Vec::new(),
			max_results: DEFAULT_MAX_RESULTS,
			cache_capacity: 64,
			follow_symlinks: false,
		}
	}
}

impl CtagsConfig {
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(input)?)
	}

	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml_str(&input)
	}

	/// Resolves the roots to mine, in order: project, home, system, extra.
	///
	/// Disabled or unknown locations are omitted.
	pub fn roots(&self, project: Option<&Path>, home: Option<&Path>) -> Vec<MineRoot> {
		let mut roots = Vec::new();
		if self.mine_project
			&& let Some(project) = project
		{
			roots.push(MineRoot::recursive(project));
		}
		if self.mine_home
			&& let Some(home) = home
		{
			roots.push(MineRoot::shallow(home));
		}
		roots.extend(self.system_roots.iter().map(MineRoot::recursive));
		roots.extend(self.extra_roots.iter().cloned());
		roots
	}
}
