//! Diffing a live scan against the manifest.

use std::collections::{BTreeMap, HashSet};

use bytes::Bytes;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};

use crate::{
   Result,
   error::Error,
   file::{ContentCache, ScannedFile},
   manifest::ManifestChanges,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
   Add,
   Update,
   Delete,
}

/// One classified path. Deletes carry neither content nor a modified time.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
   pub key:           String,
   pub kind:          ChangeKind,
   pub content:       Option<Bytes>,
   pub modified_time: Option<f64>,
}

impl ChangeRecord {
   pub fn delete(key: String) -> Self {
      Self { key, kind: ChangeKind::Delete, content: None, modified_time: None }
   }

   pub fn content_len(&self) -> usize {
      self.content.as_ref().map_or(0, Bytes::len)
   }
}

/// Paths only, before any content is read.
#[derive(Debug, Clone, Default)]
pub struct ChangePlan {
   pub added:   Vec<ScannedFile>,
   pub updated: Vec<ScannedFile>,
   pub deleted: Vec<String>,
}

impl ChangePlan {
   pub fn no_changes_exist(&self) -> bool {
      self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
   }
}

/// The diff with content materialized for adds and updates.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
   pub added:   Vec<ChangeRecord>,
   pub updated: Vec<ChangeRecord>,
   pub deleted: Vec<ChangeRecord>,
   /// Keys dropped from this run because their content could not be read.
   pub skipped: Vec<String>,
}

impl ChangeSet {
   pub fn no_changes_exist(&self) -> bool {
      self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
   }

   pub fn len(&self) -> usize {
      self.added.len() + self.updated.len() + self.deleted.len()
   }

   pub fn is_empty(&self) -> bool {
      self.no_changes_exist()
   }

   /// All records, adds first, then updates, then deletes.
   pub fn records(&self) -> impl Iterator<Item = &ChangeRecord> {
      self.added.iter().chain(&self.updated).chain(&self.deleted)
   }

   pub fn content_bytes(&self) -> u64 {
      self.records().map(|r| r.content_len() as u64).sum()
   }

   /// Manifest edits to commit once every batch for this set is applied.
   pub fn manifest_changes(&self) -> ManifestChanges {
      let timed = |records: &[ChangeRecord]| -> Vec<(String, f64)> {
         records
            .iter()
            .filter_map(|r| r.modified_time.map(|t| (r.key.clone(), t)))
            .collect()
      };
      ManifestChanges {
         added:   timed(&self.added),
         updated: timed(&self.updated),
         deleted: self.deleted.iter().map(|r| r.key.clone()).collect(),
      }
   }
}

pub struct ChangeDetector {
   read_concurrency: usize,
}

impl ChangeDetector {
   pub fn new(read_concurrency: usize) -> Self {
      Self { read_concurrency: read_concurrency.max(1) }
   }

   /// Classifies every path without touching file content.
   ///
   /// Modified times are compared exactly; there is no tolerance window.
   pub fn plan(manifest: &BTreeMap<String, f64>, scan: &[ScannedFile]) -> ChangePlan {
      let mut plan = ChangePlan::default();
      let mut seen = HashSet::with_capacity(scan.len());

      for file in scan {
         seen.insert(file.key.as_str());
         match manifest.get(&file.key) {
            None => plan.added.push(file.clone()),
            Some(&previous) if previous != file.modified_time => plan.updated.push(file.clone()),
            Some(_) => {},
         }
      }
      plan.deleted = manifest
         .keys()
         .filter(|k| !seen.contains(k.as_str()))
         .cloned()
         .collect();

      plan.added.sort_by(|a, b| a.key.cmp(&b.key));
      plan.updated.sort_by(|a, b| a.key.cmp(&b.key));
      plan
   }

   /// Diffs and reads content for adds and updates concurrently.
   ///
   /// A file that cannot be read is left out of this run and listed in
   /// [`ChangeSet::skipped`]; it is picked up again by the next diff.
   pub async fn detect(
      &self,
      manifest: &BTreeMap<String, f64>,
      scan: &[ScannedFile],
      cache: &ContentCache,
   ) -> Result<ChangeSet> {
      let plan = Self::plan(manifest, scan);
      self.materialize(plan, cache).await
   }

   pub async fn materialize(&self, plan: ChangePlan, cache: &ContentCache) -> Result<ChangeSet> {
      let ChangePlan { added, updated, deleted } = plan;
      let mut set = ChangeSet {
         deleted: deleted.into_iter().map(ChangeRecord::delete).collect(),
         ..Default::default()
      };

      let pending = added
         .into_iter()
         .map(|f| (ChangeKind::Add, f))
         .chain(updated.into_iter().map(|f| (ChangeKind::Update, f)));

      let mut reads = stream::iter(pending)
         .map(|(kind, file)| {
            let cache = cache.clone();
            async move {
               let read = tokio::task::spawn_blocking({
                  let file = file.clone();
                  move || file.read(&cache)
               })
               .await;
               (kind, file, read)
            }
         })
         .buffer_unordered(self.read_concurrency);

      while let Some((kind, file, read)) = reads.next().await {
         let content = match read {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
               tracing::warn!("skipping {}: {e}", file.key);
               set.skipped.push(file.key);
               continue;
            },
            Err(e) => return Err(Error::Task(e.to_string())),
         };
         let record = ChangeRecord {
            key: file.key,
            kind,
            content: Some(content),
            modified_time: Some(file.modified_time),
         };
         match kind {
            ChangeKind::Add => set.added.push(record),
            _ => set.updated.push(record),
         }
      }

      set.added.sort_by(|a, b| a.key.cmp(&b.key));
      set.updated.sort_by(|a, b| a.key.cmp(&b.key));
      set.skipped.sort();
      tracing::info!(
         "detected {} added, {} updated, {} deleted, {} skipped",
         set.added.len(),
         set.updated.len(),
         set.deleted.len(),
         set.skipped.len()
      );
      Ok(set)
   }
}
