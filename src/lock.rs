use std::{
   fs::{self, File, OpenOptions},
   io,
   path::{Path, PathBuf},
};

use fs4::FileExt;

use crate::{Result, error::Error, manifest::metadata_dir};

pub const RUN_LOCK_FILE: &str = "run.lock";

/// Exclusive advisory lock held for the duration of one run against a root.
pub struct RunLock {
   file: File,
   path: PathBuf,
}

impl RunLock {
   pub fn lock_path(root: &Path) -> PathBuf {
      metadata_dir(root).join(RUN_LOCK_FILE)
   }

   /// Takes the lock without waiting; a held lock yields [`Error::Locked`].
   pub fn acquire(root: &Path) -> Result<Self> {
      if !root.is_dir() {
         return Err(Error::RootNotFound(root.to_path_buf()));
      }
      let path = Self::lock_path(root);
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }
      let file = OpenOptions::new()
         .create(true)
         .truncate(false)
         .read(true)
         .write(true)
         .open(&path)?;
      if let Err(e) = FileExt::try_lock_exclusive(&file) {
         if is_contended(&e) {
            return Err(Error::Locked(root.to_path_buf()));
         }
         return Err(e.into());
      }
      tracing::debug!("acquired run lock {}", path.display());
      Ok(Self { file, path })
   }

   pub fn path(&self) -> &Path {
      &self.path
   }
}

fn is_contended(err: &io::Error) -> bool {
   err.kind() == io::ErrorKind::WouldBlock
      || err.raw_os_error() == fs4::lock_contended_error().raw_os_error()
}

impl Drop for RunLock {
   fn drop(&mut self) {
      let _ = FileExt::unlock(&self.file);
   }
}
