//! Incremental sync command.

use std::path::PathBuf;

use console::style;

use crate::{Result, cmd, util::format_size};

pub async fn execute(path: Option<PathBuf>, json: bool) -> Result<()> {
   let root = cmd::resolve_root(path)?;
   let engine = cmd::engine(&root)?;

   let mut pb = cmd::progress_bar(json);
   let result = engine.sync(&mut pb).await;
   pb.finish_and_clear();
   let result = result?;

   if json {
      println!("{}", serde_json::to_string_pretty(&result)?);
      return Ok(());
   }

   if result.up_to_date {
      println!("{}", style("Already up to date").dim());
   } else {
      println!(
         "{} synced: {} added, {} updated, {} deleted ({} in {} batches)",
         style("✓").green(),
         result.added,
         result.updated,
         result.deleted,
         format_size(result.bytes),
         result.batches
      );
   }
   for key in &result.skipped {
      println!("  {} {} {}", style("!").yellow(), key, style("(unreadable, will retry)").dim());
   }
   Ok(())
}
