//! Incremental sync of a local directory tree to a remote code index.
//!
//! The pipeline is scan ([`file`]) → diff against the [`manifest`]
//! ([`changes`]) → pack into bounded batches ([`batch`]) → concurrent upload
//! ([`upload`]) → manifest commit. [`sync::SyncEngine`] ties the stages
//! together behind the repository lifecycle operations.

pub mod api;
pub mod batch;
pub mod changes;
pub mod cmd;
pub mod config;
pub mod error;
pub mod file;
pub mod lock;
pub mod manifest;
pub mod sync;
pub mod upload;
pub mod util;

pub use error::{Error, Result};
