//! Directory walking with scoped ignore pruning.

use std::{
   cell::RefCell,
   collections::HashMap,
   fs, io,
   path::{Path, PathBuf},
   sync::Arc,
};

use bytes::Bytes;
use parking_lot::Mutex;
use walkdir::WalkDir;

use crate::{
   error::{Error, IgnoreError, Result},
   file::{IgnoreMatcher, Scope, canonical_root, path_key},
   util::modified_secs,
};

/// A file found by one scan. Content is only read on request.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedFile {
   pub path:          PathBuf,
   pub key:           String,
   pub modified_time: f64,
   pub size:          u64,
}

impl ScannedFile {
   /// Returns the file bytes, reading them at most once per cache.
   pub fn read(&self, cache: &ContentCache) -> io::Result<Bytes> {
      if let Some(bytes) = cache.get(&self.key) {
         return Ok(bytes);
      }
      let bytes = Bytes::from(fs::read(&self.path)?);
      cache.insert(self.key.clone(), bytes.clone());
      Ok(bytes)
   }
}

/// Per-run map from path key to file bytes. Clones share storage; drop it
/// when the run ends.
#[derive(Debug, Clone, Default)]
pub struct ContentCache {
   inner: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl ContentCache {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn get(&self, key: &str) -> Option<Bytes> {
      self.inner.lock().get(key).cloned()
   }

   pub fn insert(&self, key: String, bytes: Bytes) {
      self.inner.lock().insert(key, bytes);
   }

   pub fn len(&self) -> usize {
      self.inner.lock().len()
   }

   pub fn is_empty(&self) -> bool {
      self.inner.lock().is_empty()
   }
}

#[derive(Debug, Clone, Default)]
pub struct DirectoryScanner {
   allowed_extensions: Vec<String>,
}

impl DirectoryScanner {
   /// An empty extension list means every extension is eligible. Entries
   /// may be written with or without the leading dot.
   pub fn new(allowed_extensions: &[String]) -> Self {
      let allowed_extensions = allowed_extensions
         .iter()
         .map(|e| e.trim().trim_start_matches('.').to_string())
         .filter(|e| !e.is_empty())
         .collect();
      Self { allowed_extensions }
   }

   fn extension_allowed(&self, path: &Path) -> bool {
      if self.allowed_extensions.is_empty() {
         return true;
      }
      let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
         return false;
      };
      self.allowed_extensions.iter().any(|e| ext.eq_ignore_ascii_case(e))
   }

   /// Walks `root` and returns every eligible regular file, sorted by key.
   ///
   /// Ignored directories are pruned before they are entered. Entries that
   /// vanish mid-walk are logged and skipped.
   pub fn scan(&self, root: &Path, matcher: &IgnoreMatcher) -> Result<Vec<ScannedFile>> {
      if !root.is_dir() {
         return Err(Error::RootNotFound(root.to_path_buf()));
      }
      let root = canonical_root(root);

      let dir_error: RefCell<Option<IgnoreError>> = RefCell::new(None);
      let walker = WalkDir::new(&root)
         .follow_links(false)
         .into_iter()
         .filter_entry(|entry| {
            if !entry.file_type().is_dir() {
               return true;
            }
            let Some(key) = path_key(&root, entry.path()) else {
               return true;
            };
            match matcher.should_ignore(&key, Scope::Directory) {
               Ok(ignored) => {
                  if ignored {
                     tracing::debug!("pruning ignored directory {key}");
                  }
                  !ignored
               },
               Err(e) => {
                  dir_error.borrow_mut().get_or_insert(e);
                  false
               },
            }
         });

      let mut files = Vec::new();
      for entry in walker {
         if dir_error.borrow().is_some() {
            break;
         }
         let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
               tracing::warn!("skipping unreadable entry: {e}");
               continue;
            },
         };
         if !entry.file_type().is_file() {
            continue;
         }
         let Some(key) = path_key(&root, entry.path()) else {
            tracing::warn!("skipping non-utf8 path: {}", entry.path().display());
            continue;
         };
         if matcher.should_ignore(&key, Scope::File)? || !self.extension_allowed(entry.path()) {
            continue;
         }

         let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
               tracing::warn!("skipping {key}: {e}");
               continue;
            },
         };
         let modified_time = match modified_secs(&metadata) {
            Ok(t) => t,
            Err(e) => {
               tracing::warn!("skipping {key}: no modified time: {e}");
               continue;
            },
         };
         files.push(ScannedFile {
            path: entry.into_path(),
            key,
            modified_time,
            size: metadata.len(),
         });
      }

      if let Some(e) = dir_error.into_inner() {
         return Err(e.into());
      }

      files.sort_by(|a, b| a.key.cmp(&b.key));
      tracing::debug!("scanned {} eligible files under {}", files.len(), root.display());
      Ok(files)
   }
}

/// Fails with [`Error::FileTooLarge`] for the first file above `max_bytes`.
pub fn ensure_within_size(files: &[ScannedFile], max_bytes: u64) -> Result<()> {
   match files.iter().find(|f| f.size > max_bytes) {
      Some(f) => Err(Error::FileTooLarge { path: f.key.clone(), size: f.size, max: max_bytes }),
      None => Ok(()),
   }
}
