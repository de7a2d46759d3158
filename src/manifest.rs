//! Persisted record of what the remote index already holds.
//!
//! Lives in `<root>/.insight/`: `manifest.json` maps path keys to modified
//! times, `sync.json` holds the remote sync id. The manifest is written whole
//! through [`write_atomic`] and only after a change set has been checked
//! against the current entries.

use std::{
   collections::{BTreeMap, HashSet},
   fs, io,
   path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
   Result,
   config::METADATA_DIR,
   error::{Error, ManifestError},
   util::write_atomic,
};

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "manifest.json";
pub const SYNC_FILE: &str = "sync.json";

pub fn metadata_dir(root: &Path) -> PathBuf {
   root.join(METADATA_DIR)
}

#[derive(Serialize, Deserialize)]
struct ManifestFile {
   schema_version: u32,
   #[serde(default)]
   files:          BTreeMap<String, f64>,
   #[serde(default)]
   last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
struct SyncRecord {
   sync_id:    String,
   #[serde(default)]
   created_at: Option<DateTime<Utc>>,
}

/// Entries to add, update and delete in one commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestChanges {
   pub added:   Vec<(String, f64)>,
   pub updated: Vec<(String, f64)>,
   pub deleted: Vec<String>,
}

impl ManifestChanges {
   pub fn is_empty(&self) -> bool {
      self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
   }

   pub fn len(&self) -> usize {
      self.added.len() + self.updated.len() + self.deleted.len()
   }

   fn check_disjoint(&self) -> Result<(), ManifestError> {
      let mut seen = HashSet::with_capacity(self.len());
      let keys = self
         .added
         .iter()
         .map(|(k, _)| k)
         .chain(self.updated.iter().map(|(k, _)| k))
         .chain(&self.deleted);
      for key in keys {
         if !seen.insert(key.as_str()) {
            return Err(ManifestError::DuplicatePath(key.clone()));
         }
      }
      Ok(())
   }
}

/// Entries after a validated change set, waiting to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedManifest {
   files:  BTreeMap<String, f64>,
   counts: (usize, usize, usize),
}

impl StagedManifest {
   pub fn entries(&self) -> &BTreeMap<String, f64> {
      &self.files
   }
}

#[derive(Debug, Clone)]
pub struct Manifest {
   dir:            PathBuf,
   sync_id:        String,
   files:          BTreeMap<String, f64>,
   last_synced_at: Option<DateTime<Utc>>,
   migrated:       bool,
}

impl Manifest {
   /// Whether `dir` holds a manifest.
   pub fn exists(dir: &Path) -> bool {
      dir.join(MANIFEST_FILE).is_file()
   }

   /// Loads the manifest from a metadata directory.
   ///
   /// A bare `{path: timestamp}` object is read as schema version 0 and is
   /// rewritten in the current schema by the next save.
   pub fn load(dir: &Path) -> Result<Self> {
      let manifest_path = dir.join(MANIFEST_FILE);
      let content = match fs::read_to_string(&manifest_path) {
         Ok(c) => c,
         Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotInitialized(dir.parent().unwrap_or(dir).to_path_buf()));
         },
         Err(e) => return Err(e.into()),
      };
      let (files, last_synced_at, migrated) = parse_manifest(&manifest_path, &content)?;

      let sync_path = dir.join(SYNC_FILE);
      let sync_content = fs::read_to_string(&sync_path).map_err(|e| ManifestError::Corrupt {
         path:   sync_path.clone(),
         reason: e.to_string(),
      })?;
      let record: SyncRecord = serde_json::from_str(&sync_content)
         .map_err(|e| ManifestError::Corrupt { path: sync_path, reason: e.to_string() })?;

      if migrated {
         tracing::info!("migrating legacy manifest with {} entries", files.len());
      }

      Ok(Self { dir: dir.to_path_buf(), sync_id: record.sync_id, files, last_synced_at, migrated })
   }

   /// Creates and persists a manifest for a freshly initialized index.
   ///
   /// The sync id is written first so that a present manifest always has
   /// one next to it.
   pub fn create(
      dir: &Path,
      sync_id: String,
      entries: impl IntoIterator<Item = (String, f64)>,
   ) -> Result<Self> {
      let mut files = BTreeMap::new();
      for (key, modified) in entries {
         if files.insert(key.clone(), modified).is_some() {
            return Err(ManifestError::DuplicatePath(key).into());
         }
      }

      fs::create_dir_all(dir)?;
      let record = SyncRecord { sync_id: sync_id.clone(), created_at: Some(Utc::now()) };
      write_atomic(&dir.join(SYNC_FILE), &serde_json::to_vec_pretty(&record)?)?;

      let mut manifest = Self {
         dir: dir.to_path_buf(),
         sync_id,
         files,
         last_synced_at: Some(Utc::now()),
         migrated: false,
      };
      manifest.save()?;
      tracing::info!("created manifest with {} entries", manifest.len());
      Ok(manifest)
   }

   /// Applies a change set and persists it.
   ///
   /// All checks run against a copy first; on error neither memory nor disk
   /// is touched.
   pub fn apply_changes(&mut self, changes: &ManifestChanges) -> Result<()> {
      let staged = self.stage(changes)?;
      self.commit(staged)
   }

   /// Validates a change set against the tracked entries and returns the
   /// resulting entries without writing anything.
   pub fn stage(&self, changes: &ManifestChanges) -> Result<StagedManifest> {
      changes.check_disjoint()?;

      let mut next = self.files.clone();
      for (key, modified) in &changes.added {
         if next.insert(key.clone(), *modified).is_some() {
            return Err(ManifestError::AlreadyTracked(key.clone()).into());
         }
      }
      for (key, modified) in &changes.updated {
         match next.get_mut(key) {
            Some(slot) => *slot = *modified,
            None => return Err(ManifestError::UpdateUntracked(key.clone()).into()),
         }
      }
      for key in &changes.deleted {
         if next.remove(key).is_none() {
            return Err(ManifestError::DeleteUntracked(key.clone()).into());
         }
      }
      let counts = (changes.added.len(), changes.updated.len(), changes.deleted.len());
      Ok(StagedManifest { files: next, counts })
   }

   /// Persists entries produced by [`Manifest::stage`].
   pub fn commit(&mut self, staged: StagedManifest) -> Result<()> {
      let StagedManifest { files, counts: (added, updated, deleted) } = staged;
      let synced_at = Utc::now();
      write_atomic(&self.dir.join(MANIFEST_FILE), &encode(&files, Some(synced_at))?)?;
      self.files = files;
      self.last_synced_at = Some(synced_at);
      self.migrated = false;
      tracing::info!("manifest updated: {added} added, {updated} updated, {deleted} deleted");
      Ok(())
   }

   pub fn save(&mut self) -> Result<()> {
      write_atomic(&self.dir.join(MANIFEST_FILE), &encode(&self.files, self.last_synced_at)?)?;
      self.migrated = false;
      Ok(())
   }

   /// Deletes the whole metadata directory.
   pub fn remove(dir: &Path) -> Result<()> {
      match fs::remove_dir_all(dir) {
         Ok(()) => Ok(()),
         Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
         Err(e) => Err(e.into()),
      }
   }

   pub fn entries(&self) -> &BTreeMap<String, f64> {
      &self.files
   }

   pub fn sync_id(&self) -> &str {
      &self.sync_id
   }

   pub fn dir(&self) -> &Path {
      &self.dir
   }

   pub const fn last_synced_at(&self) -> Option<DateTime<Utc>> {
      self.last_synced_at
   }

   /// True when the file on disk still uses the legacy schema.
   pub const fn needs_migration(&self) -> bool {
      self.migrated
   }

   pub fn len(&self) -> usize {
      self.files.len()
   }

   pub fn is_empty(&self) -> bool {
      self.files.is_empty()
   }
}

fn encode(files: &BTreeMap<String, f64>, last_synced_at: Option<DateTime<Utc>>) -> Result<Vec<u8>> {
   #[derive(Serialize)]
   struct Borrowed<'a> {
      schema_version: u32,
      files:          &'a BTreeMap<String, f64>,
      last_synced_at: Option<DateTime<Utc>>,
   }
   Ok(serde_json::to_vec_pretty(&Borrowed {
      schema_version: MANIFEST_SCHEMA_VERSION,
      files,
      last_synced_at,
   })?)
}

type Parsed = (BTreeMap<String, f64>, Option<DateTime<Utc>>, bool);

fn parse_manifest(path: &Path, content: &str) -> Result<Parsed> {
   let corrupt = |reason: String| ManifestError::Corrupt { path: path.to_path_buf(), reason };

   let value: serde_json::Value = serde_json::from_str(content).map_err(|e| corrupt(e.to_string()))?;
   let Some(object) = value.as_object() else {
      return Err(corrupt("expected a json object".into()).into());
   };

   if object.contains_key("schema_version") {
      let file: ManifestFile = serde_json::from_value(value).map_err(|e| corrupt(e.to_string()))?;
      if file.schema_version > MANIFEST_SCHEMA_VERSION {
         return Err(
            ManifestError::UnsupportedSchema {
               found:     file.schema_version,
               supported: MANIFEST_SCHEMA_VERSION,
            }
            .into(),
         );
      }
      return Ok((file.files, file.last_synced_at, false));
   }

   let mut files = BTreeMap::new();
   for (key, value) in object {
      let Some(modified) = value.as_f64() else {
         return Err(corrupt(format!("timestamp for {key} is not a number")).into());
      };
      files.insert(key.clone(), modified);
   }
   Ok((files, None, true))
}
