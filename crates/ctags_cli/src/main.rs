//! Xeno ctags lookup binary.
//!
//! Mines `tags` files under the given roots (or the configured defaults) and
//! prints every symbol matching each prefix, one per line:
//!
//! ```text
//! name<TAB>kind<TAB>path<TAB>address
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use xeno_ctags::{CtagsConfig, IndexCache, MineEvent, MineRoot, SymbolLookup, TagIndex, TagLookup, TagMiner};

/// Ctags lookup command line arguments.
#[derive(Parser, Debug)]
#[command(name = "xeno-ctags")]
#[command(about = "Look up symbols in ctags files")]
struct Args {
	/// Configuration file (TOML)
	#[arg(short, long, value_name = "FILE")]
	config: Option<PathBuf>,

	/// Directory to mine; repeatable. Replaces the configured roots.
	#[arg(short, long = "root", value_name = "DIR")]
	roots: Vec<PathBuf>,

	/// Only check each root's own `tags` file, including the configured roots
	#[arg(long)]
	no_recurse: bool,

	/// Follow symlinked directories while mining
	#[arg(long)]
	follow_symlinks: bool,

	/// Maximum candidates per prefix
	#[arg(short, long, value_name = "N")]
	limit: Option<usize>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,

	/// Symbol prefixes to look up
	#[arg(required = true, value_name = "PREFIX")]
	prefixes: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	let mut config = match &args.config {
		Some(path) => CtagsConfig::load(path)?,
		None => CtagsConfig::default(),
	};
	config.follow_symlinks |= args.follow_symlinks;
	if let Some(limit) = args.limit {
		config.max_results = limit;
	}

	let project = std::env::current_dir()?;
	let roots = mine_roots(&args, &config, &project, dirs::home_dir().as_deref());

	let cancel = CancellationToken::new();
	let interrupt = cancel.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!("interrupted, cancelling mining");
			interrupt.cancel();
		}
	});

	let cache = IndexCache::new(config.cache_capacity);
	let lookup = TagLookup::new(config.max_results);
	let mut session = TagMiner::new(cache)
		.follow_symlinks(config.follow_symlinks)
		.mine(roots, &cancel);

	// The cache may evict under pressure; the lookup only holds weak references.
	let mut loaded: Vec<Arc<TagIndex>> = Vec::new();
	while let Some(event) = session.next().await {
		match event {
			MineEvent::Loaded { index, .. } => {
				lookup.register_index(&index);
				loaded.push(index);
			}
			MineEvent::Failed { key, error } => warn!(key = %key, error = %error, "failed to index tags file"),
			MineEvent::Cancelled { .. } => {}
			MineEvent::Finished(report) => info!(
				visited_dirs = report.visited_dirs,
				discovered = report.discovered,
				cancelled = report.cancelled,
				"traversal finished"
			),
		}
	}
	info!(indexes = loaded.len(), "mining complete");

	let stdout = std::io::stdout();
	let mut out = stdout.lock();
	for prefix in &args.prefixes {
		for candidate in lookup.query(prefix) {
			writeln!(
				out,
				"{}\t{}\t{}\t{}",
				candidate.record.name(),
				candidate.record.kind(),
				candidate.path.display(),
				candidate.record.address()
			)?;
		}
	}
	out.flush()?;

	Ok(())
}

/// Roots to mine: `--root` values when given, else the configured defaults.
fn mine_roots(args: &Args, config: &CtagsConfig, project: &Path, home: Option<&Path>) -> Vec<MineRoot> {
	let mut roots = if args.roots.is_empty() {
		config.roots(Some(project), home)
	} else {
		args.roots.iter().map(MineRoot::recursive).collect()
	};
	if args.no_recurse {
		for root in &mut roots {
			root.recurse = false;
		}
	}
	roots
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("xeno_ctags=debug,xeno_ctags_cli=debug,info")
		} else {
			EnvFilter::new("xeno_ctags=info,xeno_ctags_cli=info,warn")
		}
	});

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
