//! Repository lifecycle: initialize, incremental sync, query and teardown.
//!
//! A run scans the tree, diffs it against the manifest, packs the changes
//! into batches and uploads them. The manifest is read once at the start and
//! written once at the end, and only when every batch was confirmed.

use std::{
   path::{Path, PathBuf},
   sync::Arc,
};

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;

use crate::{
   Result,
   api::{QueryMatch, RemoteIndex, UploadMode},
   batch::BatchBuilder,
   changes::{ChangeDetector, ChangeSet},
   config::Config,
   error::Error,
   file::{
      ContentCache, DirectoryScanner, IgnoreMatcher, PatternCache, ScannedFile, canonical_root,
      ensure_within_size,
   },
   lock::RunLock,
   manifest::{Manifest, metadata_dir},
   upload::UploadCoordinator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
   Scanning,
   Reading,
   Uploading,
   Committing,
}

impl SyncStage {
   pub const fn label(self) -> &'static str {
      match self {
         Self::Scanning => "scanning",
         Self::Reading => "reading changes",
         Self::Uploading => "uploading",
         Self::Committing => "saving manifest",
      }
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
   pub stage:     SyncStage,
   pub processed: usize,
   pub total:     usize,
}

/// Trait for receiving sync progress updates
pub trait SyncProgressCallback: Send {
   fn progress(&mut self, progress: SyncProgress);
}

impl<F: FnMut(SyncProgress) + Send> SyncProgressCallback for F {
   fn progress(&mut self, progress: SyncProgress) {
      self(progress);
   }
}

impl SyncProgressCallback for () {
   fn progress(&mut self, _progress: SyncProgress) {}
}

impl SyncProgressCallback for ProgressBar {
   fn progress(&mut self, progress: SyncProgress) {
      self.set_length(progress.total as u64);
      self.set_position(progress.processed as u64);
      self.set_message(progress.stage.label());
   }
}

/// Tunables for one engine, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
   pub max_batch_bytes:      u64,
   pub max_file_size_bytes:  u64,
   pub read_concurrency:     usize,
   pub upload_concurrency:   usize,
   pub allowed_extensions:   Vec<String>,
   pub validate_before_sync: bool,
}

impl Default for SyncOptions {
   fn default() -> Self {
      Self::from_config(&Config::default())
   }
}

impl SyncOptions {
   pub fn from_config(cfg: &Config) -> Self {
      Self {
         max_batch_bytes:      cfg.effective_max_batch_bytes(),
         max_file_size_bytes:  cfg.effective_max_file_size_bytes(),
         read_concurrency:     cfg.effective_read_concurrency(),
         upload_concurrency:   cfg.effective_upload_concurrency(),
         allowed_extensions:   cfg.allowed_extensions.clone(),
         validate_before_sync: cfg.validate_before_sync,
      }
   }
}

/// Result summary from a sync operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
   pub added:      usize,
   pub updated:    usize,
   pub deleted:    usize,
   /// Keys left out of this run because they could not be read.
   pub skipped:    Vec<String>,
   pub batches:    usize,
   pub bytes:      u64,
   pub up_to_date: bool,
}

impl SyncResult {
   fn from_changes(changes: &ChangeSet, batches: usize) -> Self {
      Self {
         added: changes.added.len(),
         updated: changes.updated.len(),
         deleted: changes.deleted.len(),
         skipped: changes.skipped.clone(),
         batches,
         bytes: changes.content_bytes(),
         up_to_date: changes.no_changes_exist(),
      }
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PendingChanges {
   pub added:   usize,
   pub updated: usize,
   pub deleted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryStatus {
   pub root:           PathBuf,
   pub initialized:    bool,
   pub sync_id:        Option<String>,
   pub tracked_files:  usize,
   pub last_synced_at: Option<DateTime<Utc>>,
   pub pending:        Option<PendingChanges>,
   pub remote_valid:   Option<bool>,
}

/// Engine for keeping one directory in step with its remote index
pub struct SyncEngine<R: RemoteIndex> {
   root:     PathBuf,
   remote:   Arc<R>,
   options:  SyncOptions,
   patterns: PatternCache,
}

impl<R: RemoteIndex> SyncEngine<R> {
   pub fn new(root: &Path, remote: Arc<R>, options: SyncOptions) -> Self {
      Self { root: canonical_root(root), remote, options, patterns: PatternCache::new() }
   }

   pub fn root(&self) -> &Path {
      &self.root
   }

   pub fn remote(&self) -> &Arc<R> {
      &self.remote
   }

   fn metadata_dir(&self) -> PathBuf {
      metadata_dir(&self.root)
   }

   pub fn is_initialized(&self) -> bool {
      Manifest::exists(&self.metadata_dir())
   }

   fn require_initialized(&self) -> Result<Manifest> {
      if !self.is_initialized() {
         return Err(Error::NotInitialized(self.root.clone()));
      }
      Manifest::load(&self.metadata_dir())
   }

   async fn scan(&self, callback: &mut dyn SyncProgressCallback) -> Result<Vec<ScannedFile>> {
      if !self.root.is_dir() {
         return Err(Error::RootNotFound(self.root.clone()));
      }
      let root = self.root.clone();
      let scanner = DirectoryScanner::new(&self.options.allowed_extensions);
      let matcher = IgnoreMatcher::load(&root, self.patterns.clone())?;
      let files = tokio::task::spawn_blocking(move || scanner.scan(&root, &matcher))
         .await
         .map_err(|e| Error::Task(e.to_string()))??;
      ensure_within_size(&files, self.options.max_file_size_bytes)?;
      callback.progress(SyncProgress {
         stage:     SyncStage::Scanning,
         processed: files.len(),
         total:     files.len(),
      });
      Ok(files)
   }

   async fn detect(
      &self,
      manifest: &Manifest,
      callback: &mut dyn SyncProgressCallback,
   ) -> Result<ChangeSet> {
      let scan = self.scan(callback).await?;
      let cache = ContentCache::new();
      let changes = ChangeDetector::new(self.options.read_concurrency)
         .detect(manifest.entries(), &scan, &cache)
         .await?;
      callback.progress(SyncProgress {
         stage:     SyncStage::Reading,
         processed: changes.len(),
         total:     changes.len() + changes.skipped.len(),
      });
      Ok(changes)
   }

   /// Creates the remote index and uploads every eligible file.
   ///
   /// When the upload does not fully succeed the new remote index is
   /// deleted again and no manifest is written.
   pub async fn initialize(&self, callback: &mut dyn SyncProgressCallback) -> Result<SyncResult> {
      let _lock = RunLock::acquire(&self.root)?;
      if self.is_initialized() {
         return Err(Error::AlreadyInitialized(self.root.clone()));
      }

      let builder = BatchBuilder::new(self.options.max_batch_bytes)?;
      let scan = self.scan(callback).await?;
      let changes = ChangeDetector::new(self.options.read_concurrency)
         .detect(&Default::default(), &scan, &ContentCache::new())
         .await?;

      let sync_id = self.remote.create().await?;
      tracing::info!("created remote index {sync_id}");

      let batches = builder.build_initial(&sync_id, &changes);
      let report = UploadCoordinator::new(self.options.upload_concurrency)
         .upload(self.remote.as_ref(), &batches, UploadMode::Initialize, callback)
         .await;
      if let Err(e) = report.into_result() {
         if let Err(cleanup) = self.remote.delete(&sync_id).await {
            tracing::warn!("failed to delete orphaned remote index {sync_id}: {cleanup}");
         }
         return Err(e);
      }

      callback.progress(SyncProgress { stage: SyncStage::Committing, processed: 0, total: 1 });
      let entries = changes.manifest_changes().added;
      Manifest::create(&self.metadata_dir(), sync_id, entries)?;
      callback.progress(SyncProgress { stage: SyncStage::Committing, processed: 1, total: 1 });

      Ok(SyncResult::from_changes(&changes, batches.len()))
   }

   /// Uploads what changed since the last successful run.
   pub async fn sync(&self, callback: &mut dyn SyncProgressCallback) -> Result<SyncResult> {
      let _lock = RunLock::acquire(&self.root)?;
      let mut manifest = self.require_initialized()?;

      if self.options.validate_before_sync && !self.remote.validate(manifest.sync_id()).await? {
         return Err(Error::RemoteIndexInvalid { sync_id: manifest.sync_id().to_string() });
      }

      let changes = self.detect(&manifest, callback).await?;
      if changes.no_changes_exist() {
         if manifest.needs_migration() {
            manifest.save()?;
         }
         tracing::info!("{} is up to date", self.root.display());
         return Ok(SyncResult::from_changes(&changes, 0));
      }

      let staged = manifest.stage(&changes.manifest_changes())?;
      let batches = BatchBuilder::new(self.options.max_batch_bytes)?.build(manifest.sync_id(), &changes);
      UploadCoordinator::new(self.options.upload_concurrency)
         .upload(self.remote.as_ref(), &batches, UploadMode::Reinitialize, callback)
         .await
         .into_result()?;

      callback.progress(SyncProgress { stage: SyncStage::Committing, processed: 0, total: 1 });
      manifest.commit(staged)?;
      callback.progress(SyncProgress { stage: SyncStage::Committing, processed: 1, total: 1 });

      Ok(SyncResult::from_changes(&changes, batches.len()))
   }

   /// Deletes the remote index, then the local metadata directory.
   pub async fn uninitialize(&self) -> Result<()> {
      let lock = RunLock::acquire(&self.root)?;
      let manifest = self.require_initialized()?;
      self.remote.delete(manifest.sync_id()).await?;
      drop(lock);
      Manifest::remove(&self.metadata_dir())?;
      tracing::info!("uninitialized {}", self.root.display());
      Ok(())
   }

   /// Brings the index up to date, then queries it.
   pub async fn query(
      &self,
      query: &str,
      limit: usize,
      callback: &mut dyn SyncProgressCallback,
   ) -> Result<Vec<QueryMatch>> {
      self.sync(callback).await?;
      let manifest = self.require_initialized()?;
      self.remote.query(manifest.sync_id(), query, limit).await
   }

   /// Reports local state without uploading anything. Pending changes are
   /// computed from modified times only; no file content is read.
   pub async fn status(&self, check_remote: bool) -> Result<RepositoryStatus> {
      let mut status = RepositoryStatus {
         root:           self.root.clone(),
         initialized:    false,
         sync_id:        None,
         tracked_files:  0,
         last_synced_at: None,
         pending:        None,
         remote_valid:   None,
      };
      if !self.is_initialized() {
         return Ok(status);
      }

      let manifest = Manifest::load(&self.metadata_dir())?;
      let scan = self.scan(&mut ()).await?;
      let plan = ChangeDetector::plan(manifest.entries(), &scan);

      status.initialized = true;
      status.sync_id = Some(manifest.sync_id().to_string());
      status.tracked_files = manifest.len();
      status.last_synced_at = manifest.last_synced_at();
      status.pending = Some(PendingChanges {
         added:   plan.added.len(),
         updated: plan.updated.len(),
         deleted: plan.deleted.len(),
      });
      if check_remote {
         status.remote_valid = Some(self.remote.validate(manifest.sync_id()).await?);
      }
      Ok(status)
   }
}
