use std::fs;
use std::time::{Duration, SystemTime};

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;
use crate::record::{TagAddress, TagKind};

fn index(input: &str) -> TagIndex {
	TagIndex::build(TagFileKey::new("/proj/tags"), input.as_bytes(), &CancellationToken::new()).expect("build")
}

fn names(records: &[TagRecord]) -> Vec<&str> {
	records.iter().map(TagRecord::name).collect()
}

#[test]
fn prefix_lookup_puts_exact_match_first_then_lexical() {
	let index = index(
		"foobar\ta.c\t1;\"\tf\n\
		 fo\tb.c\t2;\"\tv\n\
		 food\tc.c\t3;\"\tf\n\
		 fob\td.c\t4;\"\tf\n\
		 bar\te.c\t5;\"\tf\n",
	);
	assert_eq!(names(index.lookup_prefix("fo")), vec!["fo", "fob", "foobar", "food"]);
	assert_eq!(names(index.lookup_prefix("foo")), vec!["foobar", "food"]);
	assert!(index.lookup_prefix("baz").is_empty());
}

#[test]
fn duplicate_names_keep_file_order() {
	let index = index("dup\tz.c\t1;\"\tf\ndup\ta.c\t2;\"\tp\nother\to.c\t3\n");
	let files: Vec<&str> = index.lookup_exact("dup").iter().map(TagRecord::file).collect();
	assert_eq!(files, vec!["z.c", "a.c"]);
}

#[test]
fn lookup_is_case_sensitive() {
	let index = index("Foo\ta.c\t1;\"\ts\nfoo\tb.c\t2;\"\tf\n");
	assert_eq!(names(index.lookup_prefix("f")), vec!["foo"]);
	assert_eq!(names(index.lookup_prefix("F")), vec!["Foo"]);
}

#[test]
fn empty_prefix_matches_nothing() {
	let index = index("a\ta.c\t1\nb\tb.c\t2\n");
	assert!(index.lookup_prefix("").is_empty());
	assert_eq!(index.len(), 2);
}

#[test]
fn counts_skipped_lines_and_reads_header() {
	let index = index(
		"!_TAG_FILE_SORTED\t1\t/0=unsorted, 1=sorted, 2=foldcase/\n\
		 !_TAG_PROGRAM_NAME\tUniversal Ctags\t//\n\
		 ok\tok.c\t1;\"\tf\n\
		 broken\n\
		 bad\tbad.c\t0\n",
	);
	assert_eq!(index.len(), 1);
	assert_eq!(index.skipped_lines(), 2);
	assert_eq!(index.header().sort_order(), SortOrder::Sorted);
	assert_eq!(index.header().program_name(), Some("Universal Ctags"));
}

#[test]
fn non_utf8_lines_count_as_skipped() {
	let bytes = b"ok\tok.c\t1\n\xc0ld\told.h\t/^int \xc0ld;$/\n";
	let index = TagIndex::build(TagFileKey::new("/latin1/tags"), bytes, &CancellationToken::new()).expect("build");
	assert_eq!(index.len(), 1);
	assert_eq!(index.skipped_lines(), 1);
}

#[test]
fn header_without_sort_flag_is_unknown() {
	assert_eq!(index("a\ta.c\t1\n").header().sort_order(), SortOrder::Unknown);
}

#[test]
fn resolves_paths_against_tags_directory() {
	let index = index("rel\tsrc/rel.c\t1;\"\tf\nabs\t/usr/include/abs.h\t2;\"\tp\n");
	let rel = &index.lookup_exact("rel")[0];
	let abs = &index.lookup_exact("abs")[0];
	assert_eq!(index.resolve_path(rel), Path::new("/proj/src/rel.c"));
	assert_eq!(index.resolve_path(abs), Path::new("/usr/include/abs.h"));
	assert_eq!(index.base_dir(), Path::new("/proj"));
}

#[test]
fn find_with_path_picks_matching_file() {
	let index = index("init\ta.c\t1;\"\tf\ninit\tb.c\t9;\"\tf\n");
	let found = index.find_with_path("init", Path::new("/proj/b.c")).expect("record in b.c");
	assert_eq!(found.address(), &TagAddress::Line(9));
	assert!(index.find_with_path("init", Path::new("/proj/c.c")).is_none());
}

#[test]
fn build_observes_cancellation() {
	let cancel = CancellationToken::new();
	cancel.cancel();
	let result = TagIndex::build(TagFileKey::new("/proj/tags"), b"a\ta.c\t1\n", &cancel);
	assert!(matches!(result, Err(BuildError::Cancelled)));
}

#[test]
fn load_reports_missing_file_and_directories() {
	let dir = tempfile::tempdir().expect("tempdir");
	let cancel = CancellationToken::new();

	let missing = TagIndex::load(TagFileKey::new(dir.path().join("tags")), &cancel);
	assert!(matches!(missing, Err(BuildError::Io { .. })));

	fs::create_dir(dir.path().join("tags")).expect("mkdir");
	let not_file = TagIndex::load(TagFileKey::new(dir.path().join("tags")), &cancel);
	assert!(matches!(not_file, Err(BuildError::NotAFile(_))));
}

#[test]
fn loaded_index_turns_stale_when_file_changes() {
	let dir = tempfile::tempdir().expect("tempdir");
	let path = dir.path().join("tags");
	fs::write(&path, "main\tmain.c\t1;\"\tf\n").expect("write tags");

	let index = TagIndex::load(TagFileKey::new(&path), &CancellationToken::new()).expect("load");
	assert_eq!(index.lookup_exact("main")[0].kind(), &TagKind::Function);
	assert!(!index.is_stale());

	let file = fs::File::options().write(true).open(&path).expect("open");
	file.set_modified(SystemTime::now() + Duration::from_secs(60)).expect("set mtime");
	drop(file);
	assert!(index.is_stale());

	fs::remove_file(&path).expect("remove");
	assert!(index.is_stale());
}

#[test]
fn in_memory_index_is_never_stale() {
	assert!(!index("a\ta.c\t1\n").is_stale());
}

proptest! {
	#[test]
	fn rendered_records_are_found_by_exact_lookup(
		name in "[A-Za-z_][A-Za-z0-9_]{0,12}",
		file in "[a-z]{1,8}\\.c",
		line in 1u32..100_000,
	) {
		let record = TagRecord::new(name.clone(), TagKind::Function, file, TagAddress::Line(line));
		let input = format!("zzz\tz.c\t1\n{}\naaa\ta.c\t2\n", record.to_line());
		let index = index(&input);
		let found = index.lookup_exact(&name);
		prop_assert!(found.contains(&record));
		prop_assert!(index.lookup_prefix(&name).iter().any(|r| r == &record));
	}
}
