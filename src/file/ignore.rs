//! Scoped regex ignore rules read from `.insightignore`.
//!
//! The file is line oriented. `## _directory_` and `## _file_` switch which
//! scope later lines belong to; before either marker a line applies to both.
//! Blank lines and lines starting with `#` are skipped, and `\#` escapes a
//! pattern that really starts with `#`.

use std::{
   collections::BTreeSet,
   fs, io,
   path::Path,
   sync::{Arc, OnceLock},
};

use moka::sync::Cache;
use regex::{Regex, RegexSet};

use crate::{
   Result,
   config::{IGNORE_FILE, METADATA_DIR, REPO_CONFIG_FILE},
   error::IgnoreError,
};

const DIRECTORY_MARKER: &str = "## _directory_";
const FILE_MARKER: &str = "## _file_";
const PATTERN_CACHE_CAPACITY: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
   Directory,
   File,
}

impl Scope {
   const fn index(self) -> usize {
      match self {
         Self::Directory => 0,
         Self::File => 1,
      }
   }
}

/// Uncompiled pattern sets, one per scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoreRules {
   directory: BTreeSet<String>,
   file:      BTreeSet<String>,
}

impl Default for IgnoreRules {
   fn default() -> Self {
      Self::builtin()
   }
}

impl IgnoreRules {
   /// Rules that are always present: the metadata directory, the ignore file
   /// and the repository config override, each anchored to whole path
   /// components.
   pub fn builtin() -> Self {
      let mut directory = BTreeSet::new();
      let mut file = BTreeSet::new();
      directory.insert(format!("(^|/){}(/|$)", regex::escape(METADATA_DIR)));
      for name in [IGNORE_FILE, REPO_CONFIG_FILE] {
         file.insert(format!("(^|/){}$", regex::escape(name)));
      }
      Self { directory, file }
   }

   pub fn parse(text: &str) -> Self {
      let mut rules = Self::builtin();
      let mut active: &[Scope] = &[Scope::Directory, Scope::File];

      for line in text.lines() {
         let line = line.trim();
         if line.is_empty() {
            continue;
         }
         if line == DIRECTORY_MARKER {
            active = &[Scope::Directory];
            continue;
         }
         if line == FILE_MARKER {
            active = &[Scope::File];
            continue;
         }
         if line.starts_with('#') {
            continue;
         }
         let pattern = line.strip_prefix('\\').filter(|rest| rest.starts_with('#')).unwrap_or(line);
         for scope in active {
            rules.scope_mut(*scope).insert(pattern.to_string());
         }
      }

      rules
   }

   /// Reads `<root>/.insightignore`; a missing file yields only the built-ins.
   pub fn load(root: &Path) -> Result<Self> {
      match fs::read_to_string(root.join(IGNORE_FILE)) {
         Ok(text) => Ok(Self::parse(&text)),
         Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::builtin()),
         Err(e) => Err(e.into()),
      }
   }

   pub fn patterns(&self, scope: Scope) -> impl Iterator<Item = &str> {
      match scope {
         Scope::Directory => self.directory.iter(),
         Scope::File => self.file.iter(),
      }
      .map(String::as_str)
   }

   fn scope_mut(&mut self, scope: Scope) -> &mut BTreeSet<String> {
      match scope {
         Scope::Directory => &mut self.directory,
         Scope::File => &mut self.file,
      }
   }
}

type Compiled = std::result::Result<Arc<RegexSet>, IgnoreError>;

/// Compiled pattern sets keyed by the exact, sorted list of patterns.
///
/// Rejections are cached too, so a bad pattern set is reported again without
/// being recompiled. Clones share the same storage.
#[derive(Clone)]
pub struct PatternCache {
   inner: Cache<Vec<String>, Compiled>,
}

impl Default for PatternCache {
   fn default() -> Self {
      Self::new()
   }
}

impl PatternCache {
   pub fn new() -> Self {
      Self { inner: Cache::new(PATTERN_CACHE_CAPACITY) }
   }

   pub fn compile(&self, patterns: Vec<String>) -> Compiled {
      self.inner.get_with_by_ref(&patterns, || compile_set(&patterns))
   }

   pub fn entry_count(&self) -> u64 {
      self.inner.run_pending_tasks();
      self.inner.entry_count()
   }
}

fn compile_set(patterns: &[String]) -> Compiled {
   for pattern in patterns {
      if let Err(e) = Regex::new(pattern) {
         return Err(IgnoreError::InvalidPattern { pattern: pattern.clone(), reason: e.to_string() });
      }
   }
   RegexSet::new(patterns).map(Arc::new).map_err(|e| IgnoreError::InvalidPattern {
      pattern: patterns.join(" | "),
      reason:  e.to_string(),
   })
}

/// Decides whether a root-relative path key is excluded in a given scope.
///
/// Each scope is compiled on its first query, so an invalid pattern in one
/// scope does not block matching in the other.
pub struct IgnoreMatcher {
   rules:    IgnoreRules,
   cache:    PatternCache,
   compiled: [OnceLock<Compiled>; 2],
}

impl IgnoreMatcher {
   pub fn new(rules: IgnoreRules) -> Self {
      Self::with_cache(rules, PatternCache::new())
   }

   pub fn with_cache(rules: IgnoreRules, cache: PatternCache) -> Self {
      Self { rules, cache, compiled: [OnceLock::new(), OnceLock::new()] }
   }

   pub fn load(root: &Path, cache: PatternCache) -> Result<Self> {
      Ok(Self::with_cache(IgnoreRules::load(root)?, cache))
   }

   pub fn should_ignore(&self, key: &str, scope: Scope) -> std::result::Result<bool, IgnoreError> {
      let set = self.compiled[scope.index()]
         .get_or_init(|| {
            let patterns = self.rules.patterns(scope).map(str::to_string).collect();
            self.cache.compile(patterns)
         })
         .as_ref()
         .map_err(Clone::clone)?;
      Ok(set.is_match(key))
   }
}
