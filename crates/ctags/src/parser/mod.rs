//! Lazy parser for ctags-format tag files.
//!
//! Recognized line shape:
//!
//! ```text
//! <name>\t<file>\t<address>;"\t<field>\t<field>...
//! ```
//!
//! `<address>` is a 1-based line number or a `/pattern/` (`?pattern?` for
//! backward searches). Fields are `key:value` pairs; a field without a colon
//! is the kind letter. Lines starting with `!_` are pseudo-tags describing the
//! file itself.
//!
//! Malformed lines surface as [`ParseError`] items and never end iteration.
//! Lines that are not valid UTF-8 are rejected rather than decoded lossily:
//! a replaced byte would leave a search pattern that no longer matches the
//! source line.

use indexmap::IndexMap;

use crate::error::{ParseError, ParseErrorKind};
use crate::record::{TagAddress, TagKind, TagRecord};

/// One successfully parsed line of a tags file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEntry {
	/// A `!_NAME\tVALUE` header line, stored without the `!_` prefix.
	Pseudo { name: String, value: String },
	/// A symbol entry.
	Record(TagRecord),
}

/// Starts parsing `bytes` as a tags file.
///
/// The returned iterator is lazy and cheap to clone; cloning it restarts from
/// the clone point.
pub fn parse_tags(bytes: &[u8]) -> TagEntries<'_> {
	TagEntries { rest: bytes, line: 0 }
}

/// Iterator over the entries of a tags file. See [`parse_tags`].
#[derive(Debug, Clone)]
pub struct TagEntries<'a> {
	rest: &'a [u8],
	line: usize,
}

impl TagEntries<'_> {
	/// Number of lines consumed so far.
	pub fn lines_read(&self) -> usize {
		self.line
	}
}

impl Iterator for TagEntries<'_> {
	type Item = Result<TagEntry, ParseError>;

	fn next(&mut self) -> Option<Self::Item> {
		while !self.rest.is_empty() {
			let (raw, rest) = match self.rest.iter().position(|&b| b == b'\n') {
				Some(end) => (&self.rest[..end], &self.rest[end + 1..]),
				None => (self.rest, &[][..]),
			};
			self.rest = rest;
			self.line += 1;

			let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
			if raw.is_empty() {
				continue;
			}

			let parsed = std::str::from_utf8(raw)
				.map_err(|err| ParseErrorKind::InvalidUtf8(err.valid_up_to()))
				.and_then(parse_line);
			return Some(parsed.map_err(|kind| ParseError { line: self.line, kind }));
		}
		None
	}
}

fn parse_line(line: &str) -> Result<TagEntry, ParseErrorKind> {
	if let Some(pseudo) = line.strip_prefix("!_") {
		let mut parts = pseudo.splitn(3, '\t');
		let name = parts.next().unwrap_or_default();
		let value = parts.next().unwrap_or_default();
		return Ok(TagEntry::Pseudo {
			name: name.to_string(),
			value: value.to_string(),
		});
	}

	let mut columns = line.splitn(3, '\t');
	let name = columns.next().unwrap_or_default();
	if name.is_empty() {
		return Err(ParseErrorKind::EmptyName);
	}
	let file = columns.next().filter(|file| !file.is_empty()).ok_or(ParseErrorKind::MissingColumn("file"))?;
	let rest = columns.next().filter(|rest| !rest.is_empty()).ok_or(ParseErrorKind::MissingColumn("address"))?;

	let (address, tail) = parse_address(rest)?;
	let (kind, fields) = parse_fields(tail)?;

	let mut record = TagRecord::new(name, kind, file, address);
	for (key, value) in fields {
		record = record.with_field(key, value);
	}
	Ok(TagEntry::Record(record))
}

/// Splits the address off the third column, returning the unparsed tail.
fn parse_address(rest: &str) -> Result<(TagAddress, &str), ParseErrorKind> {
	match rest.chars().next() {
		Some(delim @ ('/' | '?')) => {
			let mut body = String::new();
			let mut chars = rest[1..].char_indices();
			while let Some((offset, ch)) = chars.next() {
				if ch == delim {
					return Ok((TagAddress::Pattern(body), &rest[offset + 2..]));
				}
				if ch == '\\' {
					match chars.next() {
						Some((_, next)) if next == delim => body.push(next),
						Some((_, next)) => {
							body.push('\\');
							body.push(next);
						}
						None => break,
					}
				} else {
					body.push(ch);
				}
			}
			Err(ParseErrorKind::UnterminatedPattern)
		}
		_ => {
			let end = rest.find([';', '\t']).unwrap_or(rest.len());
			let token = &rest[..end];
			match token.parse::<u32>() {
				Ok(line) if line > 0 => Ok((TagAddress::Line(line), &rest[end..])),
				_ => Err(ParseErrorKind::InvalidAddress(token.to_string())),
			}
		}
	}
}

fn parse_fields(tail: &str) -> Result<(TagKind, IndexMap<String, String>), ParseErrorKind> {
	let mut kind = TagKind::Unknown;
	let mut fields = IndexMap::new();

	let (extension, separators): (&str, &[char]) = match tail.strip_prefix(";\"") {
		Some(extension) if extension.starts_with('\t') || extension.is_empty() => (extension, &['\t'][..]),
		// Some generators write the field list inline and quoted: `;"kind:f;line:3"`.
		Some(inline) => (inline.strip_suffix('"').unwrap_or(inline), &['\t', ';'][..]),
		None if tail.is_empty() || tail.starts_with('\t') => (tail, &['\t'][..]),
		None => return Err(ParseErrorKind::InvalidAddress(tail.to_string())),
	};

	for field in extension.split(separators).filter(|field| !field.is_empty()) {
		match field.split_once(':') {
			Some(("kind", value)) => kind = TagKind::from_ctags(value),
			Some((key, value)) => {
				fields.insert(key.to_string(), value.to_string());
			}
			None => kind = TagKind::from_ctags(field),
		}
	}

	Ok((kind, fields))
}
