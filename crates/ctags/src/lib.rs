//! Ctags symbol indexing for completion and navigation.
//!
//! The crate turns ctags-generated `tags` files into queryable symbol indexes
//! and keeps them in a shared, deduplicated cache:
//!
//! - [`parse_tags`]: lazy parser over tags-file bytes.
//! - [`TagIndex`]: immutable, name-sorted index over one tags file.
//! - [`IndexCache`]: single-flight, cancellable cache of indexes keyed by [`TagFileKey`].
//! - [`TagMiner`]: background discovery of `tags` files under configured roots.
//! - [`TagLookup`]: [`SymbolLookup`] facade merging prefix queries across indexes.
//! - [`CtagsService`]: ties the pieces together behind an idle/mining/stopped lifecycle.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use xeno_ctags::{CtagsConfig, CtagsService, StaticProjectRoot};
//!
//! # async fn run() {
//! let service = CtagsService::new(CtagsConfig::default(), Arc::new(StaticProjectRoot("/work/project".into())));
//! let lookup = service.provider();
//! service.wait_idle().await;
//! for candidate in lookup.query("pars") {
//! 	println!("{} {}", candidate.record.name(), candidate.path.display());
//! }
//! # }
//! ```
//!
//! The library never installs a tracing subscriber. Events are emitted under
//! `ctags.*` names, inside a `ctags.task` span per background task.

mod cache;
mod config;
mod error;
mod index;
mod key;
mod lookup;
mod miner;
mod parser;
mod record;
mod service;
mod worker;

pub use cache::{EntryState, IndexBuilder, IndexCache, TagFileLoader};
pub use config::CtagsConfig;
pub use error::{BuildError, CacheError, ConfigError, ParseError, ParseErrorKind};
pub use index::{SortOrder, TagFileHeader, TagIndex};
pub use key::TagFileKey;
pub use lookup::{DEFAULT_MAX_RESULTS, SymbolCandidate, SymbolLookup, TagLookup};
pub use miner::{MineEvent, MineReport, MineRoot, MineSession, TAGS_FILE_NAME, TagMiner};
pub use parser::{TagEntries, TagEntry, parse_tags};
pub use record::{TagAddress, TagKind, TagRecord};
pub use service::{CtagsService, ProjectRootProvider, ServiceState, StaticProjectRoot};
