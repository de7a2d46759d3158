//! Root-relative path keys.
//!
//! Every path the pipeline stores or matches against is a `/`-separated key
//! relative to the scan root, so manifests stay valid when a checkout moves.

use std::path::{Component, Path, PathBuf};

/// Canonicalizes `root`, falling back to the given path when it cannot be
/// resolved (the scanner reports the missing root itself).
pub fn canonical_root(root: &Path) -> PathBuf {
   root.canonicalize().unwrap_or_else(|_| root.to_path_buf())
}

/// Returns the key of `path` relative to `root`, or `None` for paths outside
/// the root, the root itself, and non-UTF-8 names.
pub fn path_key(root: &Path, path: &Path) -> Option<String> {
   let relative = path.strip_prefix(root).ok()?;
   normalize_relative(relative)
}

pub fn normalize_relative(path: &Path) -> Option<String> {
   let mut parts = Vec::new();
   for component in path.components() {
      match component {
         Component::Normal(name) => parts.push(name.to_str()?),
         Component::CurDir => {},
         Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
      }
   }
   if parts.is_empty() {
      return None;
   }
   Some(parts.join("/"))
}
