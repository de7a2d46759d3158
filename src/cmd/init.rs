//! Repository initialization command.

use std::path::PathBuf;

use console::style;

use crate::{Result, cmd, util::format_size};

pub async fn execute(path: Option<PathBuf>, quiet: bool) -> Result<()> {
   let root = cmd::resolve_root(path)?;
   let engine = cmd::engine(&root)?;

   let mut pb = cmd::progress_bar(quiet);
   let result = engine.initialize(&mut pb).await;
   pb.finish_and_clear();
   let result = result?;

   println!(
      "{} initialized {} ({} files, {}, {} batches)",
      style("✓").green(),
      engine.root().display(),
      result.added,
      format_size(result.bytes),
      result.batches
   );
   for key in &result.skipped {
      println!("  {} {} {}", style("!").yellow(), key, style("(unreadable, will retry)").dim());
   }
   Ok(())
}
