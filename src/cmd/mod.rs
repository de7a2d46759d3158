//! CLI command implementations for insight.
//!
//! Each module corresponds to one subcommand. They share engine setup and
//! progress bar styling from here.

use std::{
   path::{Path, PathBuf},
   sync::Arc,
};

use indicatif::{ProgressBar, ProgressStyle};

use crate::{
   Result,
   api::HttpRemote,
   config,
   sync::{SyncEngine, SyncOptions},
};

pub mod init;
pub mod query;
pub mod status;
pub mod sync;
pub mod uninit;

/// Resolves the target directory, defaulting to the current one.
pub fn resolve_root(path: Option<PathBuf>) -> Result<PathBuf> {
   match path {
      Some(p) => Ok(p),
      None => Ok(std::env::current_dir()?),
   }
}

/// Loads configuration for `root` and builds an engine over the HTTP remote.
pub fn engine(root: &Path) -> Result<SyncEngine<HttpRemote>> {
   let cfg = config::init_for_root(root);
   config::validate_config(cfg)?;
   let remote = HttpRemote::from_config(cfg)?;
   Ok(SyncEngine::new(root, Arc::new(remote), SyncOptions::from_config(cfg)))
}

pub(crate) fn progress_bar(hidden: bool) -> ProgressBar {
   if hidden {
      return ProgressBar::hidden();
   }
   let pb = ProgressBar::new(0);
   if let Ok(style) = ProgressStyle::default_bar()
      .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}")
   {
      pb.set_style(style.progress_chars("█▓░"));
   }
   pb
}
