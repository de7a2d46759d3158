//! Local file discovery: ignore rules, path keys and directory scanning.

pub mod discovery;
pub mod ignore;
pub mod path;

pub use discovery::{ContentCache, DirectoryScanner, ScannedFile, ensure_within_size};
pub use ignore::{IgnoreMatcher, IgnoreRules, PatternCache, Scope};
pub use path::{canonical_root, normalize_relative, path_key};
