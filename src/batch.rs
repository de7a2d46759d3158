//! Greedy packing of a change set into size-bounded upload batches.
//!
//! Files larger than the room left in the current batch are split into
//! chunks. The first chunk fills the remaining room, later chunks are at most
//! `max_batch_bytes`, and every chunk records its index and the file's chunk
//! count so the receiver can reassemble it.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Serialize, Serializer, ser::SerializeStruct};
use uuid::Uuid;

use crate::{
   Result,
   changes::{ChangeKind, ChangeRecord, ChangeSet},
   error::ConfigError,
};

/// One contiguous slice of a file. Small files travel as a single chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
   pub chunk_index:  usize,
   pub total_chunks: usize,
   pub content:      Bytes,
}

impl FileChunk {
   pub fn size_bytes(&self) -> usize {
      self.content.len()
   }
}

impl Serialize for FileChunk {
   fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
      let mut state = serializer.serialize_struct("FileChunk", 5)?;
      state.serialize_field("content", &STANDARD.encode(&self.content))?;
      state.serialize_field("type", "base64")?;
      state.serialize_field("size_bytes", &self.content.len())?;
      state.serialize_field("chunk_index", &self.chunk_index)?;
      state.serialize_field("num_total_chunks", &self.total_chunks)?;
      state.end()
   }
}

/// A self-describing unit of upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Batch {
   #[serde(rename = "repository_id")]
   pub sync_id:       String,
   pub session_id:    String,
   pub files:         BTreeMap<String, FileChunk>,
   pub changes:       BTreeMap<String, ChangeKind>,
   pub batch_index:   usize,
   #[serde(rename = "num_total_batches")]
   pub total_batches: usize,
}

impl Batch {
   /// Sum of the content bytes carried by this batch.
   pub fn content_bytes(&self) -> usize {
      self.files.values().map(FileChunk::size_bytes).sum()
   }
}

/// Splits `content` so the first piece is at most `first_chunk_size` bytes
/// and the rest at most `chunk_size`. A `first_chunk_size` of zero means
/// `chunk_size`. Empty content yields a single empty chunk.
pub fn chunk_content(content: &Bytes, chunk_size: usize, first_chunk_size: usize) -> Vec<Bytes> {
   if content.is_empty() {
      return vec![Bytes::new()];
   }
   let chunk_size = chunk_size.max(1);
   let first = if first_chunk_size == 0 { chunk_size } else { first_chunk_size.min(chunk_size) };

   let mut chunks = Vec::with_capacity(1 + content.len().saturating_sub(first).div_ceil(chunk_size));
   let mut left = 0;
   let mut right = first;
   while left < content.len() {
      right = right.min(content.len());
      chunks.push(content.slice(left..right));
      left = right;
      right += chunk_size;
   }
   chunks
}

#[derive(Default)]
struct OpenBatch {
   files:      BTreeMap<String, FileChunk>,
   changes:    BTreeMap<String, ChangeKind>,
   size_bytes: usize,
}

impl OpenBatch {
   fn is_empty(&self) -> bool {
      self.files.is_empty() && self.changes.is_empty()
   }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchBuilder {
   max_batch_bytes: usize,
}

impl BatchBuilder {
   pub fn new(max_batch_bytes: u64) -> Result<Self> {
      if max_batch_bytes == 0 {
         return Err(ConfigError::invalid("max_batch_bytes", "must be greater than zero").into());
      }
      let max_batch_bytes = usize::try_from(max_batch_bytes).unwrap_or(usize::MAX);
      Ok(Self { max_batch_bytes })
   }

   pub const fn max_batch_bytes(&self) -> usize {
      self.max_batch_bytes
   }

   /// Packs a change set under a fresh session id shared by all its batches.
   pub fn build(&self, sync_id: &str, changes: &ChangeSet) -> Vec<Batch> {
      let session_id = Uuid::new_v4().simple().to_string();
      self.pack(sync_id, &session_id, changes.records())
   }

   /// Like [`BatchBuilder::build`], but an empty change set still yields one
   /// empty batch so a fresh remote index always receives its initialize
   /// call.
   pub fn build_initial(&self, sync_id: &str, changes: &ChangeSet) -> Vec<Batch> {
      let batches = self.build(sync_id, changes);
      if !batches.is_empty() {
         return batches;
      }
      vec![Batch {
         sync_id:       sync_id.to_string(),
         session_id:    Uuid::new_v4().simple().to_string(),
         files:         BTreeMap::new(),
         changes:       BTreeMap::new(),
         batch_index:   0,
         total_batches: 1,
      }]
   }

   /// Single sequential pass; boundaries depend on the running total so this
   /// must not be parallelized.
   pub fn pack<'a>(
      &self,
      sync_id: &str,
      session_id: &str,
      records: impl IntoIterator<Item = &'a ChangeRecord>,
   ) -> Vec<Batch> {
      let max = self.max_batch_bytes;
      let mut closed: Vec<OpenBatch> = Vec::new();
      let mut current = OpenBatch::default();

      for record in records {
         if record.kind == ChangeKind::Delete {
            current.changes.insert(record.key.clone(), ChangeKind::Delete);
            continue;
         }
         let content = record.content.clone().unwrap_or_default();

         let room = max - current.size_bytes;
         let pieces = chunk_content(&content, max, room);
         let total_chunks = pieces.len();

         for (chunk_index, piece) in pieces.into_iter().enumerate() {
            if current.size_bytes + piece.len() > max {
               closed.push(std::mem::take(&mut current));
            }
            current.size_bytes += piece.len();
            current.changes.insert(record.key.clone(), record.kind);
            current
               .files
               .insert(record.key.clone(), FileChunk { chunk_index, total_chunks, content: piece });
         }
      }
      if !current.is_empty() {
         closed.push(current);
      }

      let total_batches = closed.len();
      let batches: Vec<Batch> = closed
         .into_iter()
         .enumerate()
         .map(|(batch_index, open)| Batch {
            sync_id: sync_id.to_string(),
            session_id: session_id.to_string(),
            files: open.files,
            changes: open.changes,
            batch_index,
            total_batches,
         })
         .collect();
      tracing::debug!("packed {total_batches} batches (max {max} bytes each)");
      batches
   }
}
