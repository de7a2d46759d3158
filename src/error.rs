use std::{io, path::PathBuf};

use thiserror::Error;

use crate::util::format_size;

/// Main error type for the insight sync agent.
///
/// Variants follow the failure classes of a sync run: configuration problems
/// (bad patterns, unreadable roots, oversized files) abort before anything is
/// sent, transport problems are reported per batch and rolled up into
/// [`Error::UploadFailed`] or [`Error::PartialUpload`], and state-consistency
/// problems surface as [`ManifestError`].
#[derive(Debug, Error)]
pub enum Error {
   /// I/O error occurred during file or network operations.
   #[error("io error: {0}")]
   Io(#[from] io::Error),

   /// JSON serialization or deserialization error occurred.
   #[error("json error: {0}")]
   Json(#[from] serde_json::Error),

   /// Configuration-related error occurred.
   #[error("config error: {0}")]
   Config(#[from] ConfigError),

   /// An ignore pattern could not be compiled.
   #[error("ignore error: {0}")]
   Ignore(#[from] IgnoreError),

   /// The manifest disagrees with the change set it was asked to apply.
   #[error("manifest error: {0}")]
   Manifest(#[from] ManifestError),

   /// HTTP request or response error occurred.
   #[error("http error: {0}")]
   Http(#[from] HttpError),

   /// The directory to scan does not exist or is not a directory.
   #[error("root path not found: {path}", path = _0.display())]
   RootNotFound(PathBuf),

   /// An eligible file exceeds the configured per-file limit.
   #[error(
      "{path} has a size of {} which exceeds the max allowed file size of {}",
      format_size(*size),
      format_size(*max)
   )]
   FileTooLarge { path: String, size: u64, max: u64 },

   /// The directory has no manifest yet.
   #[error("{path} is not an insight repository", path = _0.display())]
   NotInitialized(PathBuf),

   /// The directory already carries a manifest.
   #[error("{path} is already an insight repository", path = _0.display())]
   AlreadyInitialized(PathBuf),

   /// The remote side no longer recognises the stored sync id.
   #[error("remote index {sync_id} is no longer valid; uninitialize and initialize again")]
   RemoteIndexInvalid { sync_id: String },

   /// Every batch of the run failed; nothing was applied remotely.
   #[error("upload failed: {failed} of {total} batches failed and nothing was applied remotely")]
   UploadFailed { failed: usize, total: usize },

   /// Some batches were applied and some were not.
   #[error(
      "partial upload: {succeeded} of {total} batches applied, {failed} failed; the remote index \
       may hold a subset of this change"
   )]
   PartialUpload { succeeded: usize, failed: usize, total: usize },

   /// Another run holds the repository lock.
   #[error("another sync is running for {path}", path = _0.display())]
   Locked(PathBuf),

   /// A background task panicked or was cancelled.
   #[error("task failed: {0}")]
   Task(String),
}

impl Error {
   pub fn exit_code(&self) -> i32 {
      match self {
         Self::Config(_) | Self::Ignore(_) | Self::RootNotFound(_) | Self::FileTooLarge { .. } => 2,
         Self::NotInitialized(_) | Self::AlreadyInitialized(_) => 3,
         Self::Manifest(_) => 4,
         Self::Http(_) | Self::UploadFailed { .. } | Self::RemoteIndexInvalid { .. } => 5,
         Self::PartialUpload { .. } => 6,
         Self::Locked(_) => 10,
         _ => 1,
      }
   }

   /// Whether rerunning the same operation later is expected to be safe.
   pub const fn is_retryable(&self) -> bool {
      matches!(self, Self::Http(_) | Self::UploadFailed { .. } | Self::Locked(_))
   }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
   /// A field is out of range or exceeds its hard cap.
   #[error("invalid config value for {field}: {reason}")]
   InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
   pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
      Self::InvalidValue { field, reason: reason.into() }
   }
}

/// Errors raised by ignore-pattern compilation.
///
/// Cloneable so that a rejected pattern set can be cached and reported again
/// without recompiling.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IgnoreError {
   #[error("{pattern} is an invalid regex pattern: {reason}")]
   InvalidPattern { pattern: String, reason: String },
}

/// State-consistency errors between the manifest and a change set.
#[derive(Debug, Error)]
pub enum ManifestError {
   #[error("cannot add path that is already tracked: {0}")]
   AlreadyTracked(String),

   #[error("cannot update path that is not tracked: {0}")]
   UpdateUntracked(String),

   #[error("cannot delete path that is not tracked: {0}")]
   DeleteUntracked(String),

   #[error("path listed more than once in one change: {0}")]
   DuplicatePath(String),

   #[error("unsupported manifest schema version {found} (expected at most {supported})")]
   UnsupportedSchema { found: u32, supported: u32 },

   #[error("corrupt manifest at {path}: {reason}", path = path.display())]
   Corrupt { path: PathBuf, reason: String },
}

/// Errors that can occur during HTTP operations.
#[derive(Debug, Error)]
pub enum HttpError {
   /// HTTP request failed (network error, timeout, etc.).
   #[error("request failed: {0}")]
   Request(#[from] reqwest::Error),

   /// Received a non-success HTTP status code.
   #[error("{op} returned status {status}")]
   StatusCode { op: &'static str, status: u16 },

   /// The response body did not have the expected shape.
   #[error("unexpected response from {op}: {reason}")]
   UnexpectedResponse { op: &'static str, reason: String },
}

/// Standard result type using [`enum@Error`] as the default error type
pub type Result<T, E = Error> = std::result::Result<T, E>;
