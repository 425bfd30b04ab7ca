//! Parsed representation of a single tag-file entry.

use std::fmt;

use indexmap::IndexMap;

/// Symbol kind declared by a tag entry.
///
/// Parsed from either the single-letter ctags spelling (`f`) or the long
/// spelling (`function`). Kinds without a dedicated variant are kept verbatim
/// in [`TagKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagKind {
	Function,
	Prototype,
	Struct,
	Union,
	Class,
	Enum,
	Enumerator,
	Typedef,
	Variable,
	ExternVariable,
	Member,
	Method,
	Macro,
	Namespace,
	Import,
	Local,
	File,
	/// The entry declares no kind.
	Unknown,
	/// A kind this crate does not interpret.
	Other(Box<str>),
}

impl TagKind {
	/// Parses a kind from its letter or long spelling.
	pub fn from_ctags(kind: &str) -> Self {
		match kind {
			"" => Self::Unknown,
			"f" | "function" => Self::Function,
			"p" | "prototype" => Self::Prototype,
			"s" | "struct" => Self::Struct,
			"u" | "union" => Self::Union,
			"c" | "class" => Self::Class,
			"g" | "enum" => Self::Enum,
			"e" | "enumerator" => Self::Enumerator,
			"t" | "typedef" => Self::Typedef,
			"v" | "variable" => Self::Variable,
			"x" | "externvar" => Self::ExternVariable,
			"m" | "member" => Self::Member,
			"method" => Self::Method,
			"d" | "macro" | "define" => Self::Macro,
			"n" | "namespace" => Self::Namespace,
			"i" | "import" | "include" => Self::Import,
			"l" | "local" => Self::Local,
			"F" | "file" => Self::File,
			other => Self::Other(other.into()),
		}
	}

	/// Returns the long ctags spelling of this kind.
	pub fn as_str(&self) -> &str {
		match self {
			Self::Function => "function",
			Self::Prototype => "prototype",
			Self::Struct => "struct",
			Self::Union => "union",
			Self::Class => "class",
			Self::Enum => "enum",
			Self::Enumerator => "enumerator",
			Self::Typedef => "typedef",
			Self::Variable => "variable",
			Self::ExternVariable => "externvar",
			Self::Member => "member",
			Self::Method => "method",
			Self::Macro => "macro",
			Self::Namespace => "namespace",
			Self::Import => "import",
			Self::Local => "local",
			Self::File => "file",
			Self::Unknown => "",
			Self::Other(kind) => kind,
		}
	}
}

impl fmt::Display for TagKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Location of a symbol inside its source file.
///
/// Exactly one addressing form is carried, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagAddress {
	/// 1-based line number.
	Line(u32),
	/// Search pattern body, without delimiters and with escaped delimiters
	/// unescaped (for example `^int main(void)$`).
	Pattern(String),
}

impl fmt::Display for TagAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Line(line) => write!(f, "{line}"),
			Self::Pattern(pattern) => {
				f.write_str("/")?;
				let mut chars = pattern.chars().peekable();
				while let Some(ch) = chars.next() {
					match ch {
						'\\' => {
							f.write_str("\\")?;
							if let Some(next) = chars.next() {
								if next == '/' {
									f.write_str("\\")?;
								}
								write!(f, "{next}")?;
							}
						}
						'/' => f.write_str("\\/")?,
						other => write!(f, "{other}")?,
					}
				}
				f.write_str("/")
			}
		}
	}
}

/// One symbol entry of a tags file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
	name: String,
	kind: TagKind,
	file: String,
	address: TagAddress,
	fields: IndexMap<String, String>,
}

impl TagRecord {
	/// Creates a record without extension fields.
	pub fn new(name: impl Into<String>, kind: TagKind, file: impl Into<String>, address: TagAddress) -> Self {
		Self {
			name: name.into(),
			kind,
			file: file.into(),
			address,
			fields: IndexMap::new(),
		}
	}

	/// Adds an extension field, replacing any previous value for `key`.
	pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.fields.insert(key.into(), value.into());
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn kind(&self) -> &TagKind {
		&self.kind
	}

	/// Source file as written in the tags file, usually relative to it.
	pub fn file(&self) -> &str {
		&self.file
	}

	pub fn address(&self) -> &TagAddress {
		&self.address
	}

	/// Extension fields other than the kind, in file order.
	pub fn fields(&self) -> &IndexMap<String, String> {
		&self.fields
	}

	/// Returns one extension field by key.
	pub fn field(&self, key: &str) -> Option<&str> {
		self.fields.get(key).map(String::as_str)
	}

	/// Renders the record back into tags-file syntax.
	pub fn to_line(&self) -> String {
		let mut line = format!("{}\t{}\t{};\"", self.name, self.file, self.address);
		if self.kind != TagKind::Unknown {
			line.push_str("\tkind:");
			line.push_str(self.kind.as_str());
		}
		for (key, value) in &self.fields {
			line.push('\t');
			line.push_str(key);
			line.push(':');
			line.push_str(value);
		}
		line
	}
}
