//! Repository teardown command.

use std::path::PathBuf;

use console::style;

use crate::{Result, cmd};

pub async fn execute(path: Option<PathBuf>) -> Result<()> {
   let root = cmd::resolve_root(path)?;
   let engine = cmd::engine(&root)?;
   engine.uninitialize().await?;
   println!("{} uninitialized {}", style("✓").green(), engine.root().display());
   Ok(())
}
