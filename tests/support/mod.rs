#![allow(dead_code)]

use std::{
   collections::{BTreeMap, HashSet},
   fs,
   path::{Path, PathBuf},
   sync::Arc,
   time::{Duration, SystemTime, UNIX_EPOCH},
};

use insight_sync::{
   Error, Result,
   api::{QueryMatch, RemoteIndex, UploadMode},
   batch::Batch,
   changes::ChangeKind,
   error::HttpError,
   sync::{SyncEngine, SyncOptions},
};
use parking_lot::Mutex;

#[derive(Default)]
struct MockState {
   next_id:       usize,
   created:       Vec<String>,
   deleted:       Vec<String>,
   uploads:       Vec<(Batch, UploadMode)>,
   fail_batches:  HashSet<usize>,
   fail_all:      bool,
   invalid:       HashSet<String>,
   queries:       Vec<(String, String, usize)>,
   query_results: Vec<QueryMatch>,
}

/// In-memory remote that records every call and fails on request.
#[derive(Default)]
pub struct MockRemote {
   state: Mutex<MockState>,
}

impl MockRemote {
   pub fn new() -> Arc<Self> {
      Arc::new(Self::default())
   }

   pub fn fail_batches(&self, indices: impl IntoIterator<Item = usize>) {
      self.state.lock().fail_batches = indices.into_iter().collect();
   }

   pub fn fail_all(&self, fail: bool) {
      self.state.lock().fail_all = fail;
   }

   pub fn heal(&self) {
      let mut state = self.state.lock();
      state.fail_all = false;
      state.fail_batches.clear();
   }

   pub fn invalidate(&self, sync_id: &str) {
      self.state.lock().invalid.insert(sync_id.to_string());
   }

   pub fn set_query_results(&self, results: Vec<QueryMatch>) {
      self.state.lock().query_results = results;
   }

   pub fn created(&self) -> Vec<String> {
      self.state.lock().created.clone()
   }

   pub fn deleted(&self) -> Vec<String> {
      self.state.lock().deleted.clone()
   }

   pub fn uploads(&self) -> Vec<(Batch, UploadMode)> {
      self.state.lock().uploads.clone()
   }

   pub fn upload_count(&self) -> usize {
      self.state.lock().uploads.len()
   }

   pub fn queries(&self) -> Vec<(String, String, usize)> {
      self.state.lock().queries.clone()
   }

   pub fn clear_uploads(&self) {
      self.state.lock().uploads.clear();
   }

   /// Change kinds seen across all recorded uploads.
   pub fn changes(&self) -> BTreeMap<String, ChangeKind> {
      let state = self.state.lock();
      state
         .uploads
         .iter()
         .flat_map(|(b, _)| b.changes.iter().map(|(k, v)| (k.clone(), *v)))
         .collect()
   }

   /// Reassembles uploaded file content from chunks across batches.
   pub fn reassembled(&self) -> BTreeMap<String, Vec<u8>> {
      let state = self.state.lock();
      let mut pieces: BTreeMap<String, BTreeMap<usize, Vec<u8>>> = BTreeMap::new();
      for (batch, _) in &state.uploads {
         for (key, chunk) in &batch.files {
            pieces
               .entry(key.clone())
               .or_default()
               .insert(chunk.chunk_index, chunk.content.to_vec());
         }
      }
      pieces
         .into_iter()
         .map(|(key, parts)| (key, parts.into_values().flatten().collect()))
         .collect()
   }
}

#[async_trait::async_trait]
impl RemoteIndex for MockRemote {
   async fn create(&self) -> Result<String> {
      let mut state = self.state.lock();
      state.next_id += 1;
      let id = format!("repo-{}", state.next_id);
      state.created.push(id.clone());
      Ok(id)
   }

   async fn upload(&self, batch: &Batch, mode: UploadMode) -> Result<()> {
      let mut state = self.state.lock();
      if state.fail_all || state.fail_batches.contains(&batch.batch_index) {
         return Err(Error::Http(HttpError::StatusCode { op: "upload", status: 503 }));
      }
      state.uploads.push((batch.clone(), mode));
      Ok(())
   }

   async fn validate(&self, sync_id: &str) -> Result<bool> {
      let state = self.state.lock();
      Ok(state.created.iter().any(|id| id == sync_id) && !state.invalid.contains(sync_id))
   }

   async fn query(&self, sync_id: &str, query: &str, limit: usize) -> Result<Vec<QueryMatch>> {
      let mut state = self.state.lock();
      state.queries.push((sync_id.to_string(), query.to_string(), limit));
      Ok(state.query_results.iter().take(limit).cloned().collect())
   }

   async fn delete(&self, sync_id: &str) -> Result<()> {
      self.state.lock().deleted.push(sync_id.to_string());
      Ok(())
   }
}

pub fn engine(root: &Path, remote: &Arc<MockRemote>) -> SyncEngine<MockRemote> {
   engine_with(root, remote, SyncOptions::default())
}

pub fn engine_with(
   root: &Path,
   remote: &Arc<MockRemote>,
   options: SyncOptions,
) -> SyncEngine<MockRemote> {
   SyncEngine::new(root, Arc::clone(remote), options)
}

pub fn small_batches(max_batch_bytes: u64) -> SyncOptions {
   SyncOptions { max_batch_bytes, upload_concurrency: 4, read_concurrency: 4, ..SyncOptions::default() }
}

/// Writes `content` at `root/rel` and pins its modified time to `secs`.
pub fn write_at(root: &Path, rel: &str, content: impl AsRef<[u8]>, secs: u64) -> PathBuf {
   let path = root.join(rel);
   if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
   }
   fs::write(&path, content).unwrap();
   set_mtime(&path, secs);
   path
}

pub fn set_mtime(path: &Path, secs: u64) {
   let file = fs::File::options().write(true).open(path).unwrap();
   file.set_modified(UNIX_EPOCH + Duration::from_secs(secs)).unwrap();
}

pub fn now_secs() -> u64 {
   SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}
