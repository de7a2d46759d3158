//! Repository status command.
//!
//! Shows whether the directory is initialized, how many files the manifest
//! tracks and what a sync would currently send.

use std::path::PathBuf;

use console::style;

use crate::{Result, cmd};

pub async fn execute(path: Option<PathBuf>, remote: bool, json: bool) -> Result<()> {
   let root = cmd::resolve_root(path)?;
   let engine = cmd::engine(&root)?;
   let status = engine.status(remote).await?;

   if json {
      println!("{}", serde_json::to_string_pretty(&status)?);
      return Ok(());
   }

   if !status.initialized {
      println!("{} {}", style("●").dim(), style(format!("{} is not initialized", status.root.display())).dim());
      return Ok(());
   }

   println!("{} {}", style("●").green(), status.root.display());
   if let Some(sync_id) = &status.sync_id {
      println!("  sync id:  {sync_id}");
   }
   println!("  tracked:  {} files", status.tracked_files);
   if let Some(at) = status.last_synced_at {
      println!("  synced:   {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
   }
   if let Some(p) = status.pending {
      if p.added + p.updated + p.deleted == 0 {
         println!("  pending:  {}", style("none").dim());
      } else {
         println!(
            "  pending:  {} added, {} updated, {} deleted",
            style(p.added).green(),
            style(p.updated).yellow(),
            style(p.deleted).red()
         );
      }
   }
   match status.remote_valid {
      Some(true) => println!("  remote:   {}", style("valid").green()),
      Some(false) => println!("  remote:   {}", style("invalid (run uninit, then init)").red()),
      None => {},
   }
   Ok(())
}
