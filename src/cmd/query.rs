//! Query command: sync, then print the best matching snippets.

use std::path::PathBuf;

use console::style;
use serde::Serialize;

use crate::{Result, api::QueryMatch, cmd};

#[derive(Serialize)]
struct JsonOutput<'a> {
   results: &'a [QueryMatch],
}

pub async fn execute(query: String, limit: usize, path: Option<PathBuf>, json: bool) -> Result<()> {
   let root = cmd::resolve_root(path)?;
   let engine = cmd::engine(&root)?;

   let mut pb = cmd::progress_bar(json);
   let matches = engine.query(&query, limit, &mut pb).await;
   pb.finish_and_clear();
   let matches = matches?;

   if json {
      println!("{}", serde_json::to_string(&JsonOutput { results: &matches })?);
      return Ok(());
   }

   if matches.is_empty() {
      println!("No results found for '{query}'");
      return Ok(());
   }

   for (i, m) in matches.iter().enumerate() {
      if i > 0 {
         println!();
      }
      println!("{}", style(&m.path).bold());
      if m.start_line == m.end_line {
         println!("{}", style(format!("Line {}:", m.start_line)).dim());
      } else {
         println!("{}", style(format!("Line {} - {}:", m.start_line, m.end_line)).dim());
      }
      println!("{}", style(&m.content).green());
   }
   Ok(())
}
