//! Concurrent batch dispatch with per-batch outcomes.

use futures::{StreamExt, stream};

use crate::{
   Result,
   api::{RemoteIndex, UploadMode},
   batch::Batch,
   error::Error,
   sync::{SyncProgress, SyncProgressCallback, SyncStage},
};

#[derive(Debug)]
pub struct BatchOutcome {
   pub batch_index: usize,
   pub files:       usize,
   pub bytes:       usize,
   pub error:       Option<Error>,
}

impl BatchOutcome {
   pub const fn is_ok(&self) -> bool {
      self.error.is_none()
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
   /// Every batch was confirmed.
   Complete,
   /// No batch was confirmed.
   NothingApplied,
   /// Some batches were confirmed and some were not.
   Partial,
}

/// Outcomes of one run, ordered by batch index.
#[derive(Debug, Default)]
pub struct UploadReport {
   pub outcomes: Vec<BatchOutcome>,
}

impl UploadReport {
   pub fn total(&self) -> usize {
      self.outcomes.len()
   }

   pub fn succeeded(&self) -> usize {
      self.outcomes.iter().filter(|o| o.is_ok()).count()
   }

   pub fn failed(&self) -> usize {
      self.total() - self.succeeded()
   }

   pub fn status(&self) -> UploadStatus {
      match (self.succeeded(), self.failed()) {
         (_, 0) => UploadStatus::Complete,
         (0, _) => UploadStatus::NothingApplied,
         _ => UploadStatus::Partial,
      }
   }

   pub fn errors(&self) -> impl Iterator<Item = (usize, &Error)> {
      self
         .outcomes
         .iter()
         .filter_map(|o| o.error.as_ref().map(|e| (o.batch_index, e)))
   }

   /// Turns any failure into [`Error::UploadFailed`] when nothing was
   /// applied, or [`Error::PartialUpload`] when some batches were.
   pub fn into_result(self) -> Result<Self> {
      let (succeeded, failed, total) = (self.succeeded(), self.failed(), self.total());
      match self.status() {
         UploadStatus::Complete => Ok(self),
         UploadStatus::NothingApplied => Err(Error::UploadFailed { failed, total }),
         UploadStatus::Partial => Err(Error::PartialUpload { succeeded, failed, total }),
      }
   }
}

/// Sends batches with at most `concurrency` requests in flight. Failed
/// batches are reported, never retried.
pub struct UploadCoordinator {
   concurrency: usize,
}

impl UploadCoordinator {
   pub fn new(concurrency: usize) -> Self {
      Self { concurrency: concurrency.max(1) }
   }

   pub async fn upload<R: RemoteIndex + ?Sized>(
      &self,
      remote: &R,
      batches: &[Batch],
      mode: UploadMode,
      callback: &mut dyn SyncProgressCallback,
   ) -> UploadReport {
      let total = batches.len();
      let mut outcomes = Vec::with_capacity(total);

      let mut pending = stream::iter(batches)
         .map(|batch| async move {
            let result = remote.upload(batch, mode).await;
            BatchOutcome {
               batch_index: batch.batch_index,
               files:       batch.files.len(),
               bytes:       batch.content_bytes(),
               error:       result.err(),
            }
         })
         .buffer_unordered(self.concurrency);

      while let Some(outcome) = pending.next().await {
         match &outcome.error {
            None => tracing::debug!(
               "batch {}/{} applied ({} files, {} bytes)",
               outcome.batch_index + 1,
               total,
               outcome.files,
               outcome.bytes
            ),
            Some(e) => tracing::warn!("batch {}/{} failed: {e}", outcome.batch_index + 1, total),
         }
         outcomes.push(outcome);
         callback.progress(SyncProgress {
            stage:     SyncStage::Uploading,
            processed: outcomes.len(),
            total,
         });
      }

      outcomes.sort_by_key(|o| o.batch_index);
      UploadReport { outcomes }
   }
}
