//! Utility functions for filesystem operations

use std::{
   fs::{self, Metadata},
   io::{self, Write},
   path::{Path, PathBuf},
   time::UNIX_EPOCH,
};

use crate::Result;

/// Returns the modification time of `metadata` as fractional Unix seconds.
///
/// Times before the epoch are reported as negative values so that they still
/// compare exactly against what was recorded earlier.
pub fn modified_secs(metadata: &Metadata) -> io::Result<f64> {
   let modified = metadata.modified()?;
   Ok(match modified.duration_since(UNIX_EPOCH) {
      Ok(d) => d.as_secs_f64(),
      Err(e) => -e.duration().as_secs_f64(),
   })
}

/// Writes `data` to `path` through a sibling temp file and a rename, so a
/// reader sees either the old content or the new one.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
   if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
   }
   let tmp_path = temp_path(path);
   {
      let mut file = fs::File::create(&tmp_path)?;
      file.write_all(data)?;
      file.sync_all()?;
   }
   if let Err(e) = fs::rename(&tmp_path, path) {
      let _ = fs::remove_file(&tmp_path);
      return Err(e.into());
   }
   if let Some(parent) = path.parent() {
      fsync_dir(parent)?;
   }
   Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
   let name = path
      .file_name()
      .map_or_else(|| "state".into(), |n| n.to_string_lossy().into_owned());
   path.with_file_name(format!("{name}.tmp-{}", std::process::id()))
}

/// Flushes directory metadata so a completed rename survives a crash.
#[cfg(unix)]
pub fn fsync_dir(dir: &Path) -> Result<()> {
   fs::File::open(dir)?.sync_all()?;
   Ok(())
}

#[cfg(not(unix))]
pub fn fsync_dir(_dir: &Path) -> Result<()> {
   Ok(())
}

/// Formats a byte count as a human-readable size string
pub fn format_size(bytes: u64) -> String {
   const KB: u64 = 1024;
   const MB: u64 = KB * 1024;
   const GB: u64 = MB * 1024;

   if bytes < KB {
      format!("{bytes} B")
   } else if bytes < MB {
      format!("{:.1} KB", bytes as f64 / KB as f64)
   } else if bytes < GB {
      format!("{:.1} MB", bytes as f64 / MB as f64)
   } else {
      format!("{:.1} GB", bytes as f64 / GB as f64)
   }
}
