mod support;

use std::fs;

use insight_sync::{
   Error,
   api::{QueryMatch, UploadMode},
   changes::ChangeKind,
   manifest::{Manifest, metadata_dir},
   sync::{SyncOptions, SyncProgress, SyncStage},
};
use support::{MockRemote, engine, engine_with, set_mtime, small_batches, write_at};
use tempfile::TempDir;

const T1: u64 = 1_700_000_000;
const T2: u64 = 1_700_000_100;

fn tracked(root: &std::path::Path) -> Vec<String> {
   Manifest::load(&metadata_dir(root)).unwrap().entries().keys().cloned().collect()
}

#[tokio::test]
async fn initialize_uploads_everything_and_writes_manifest() {
   let dir = TempDir::new().unwrap();
   write_at(dir.path(), "a.py", "print('a')", T1);
   write_at(dir.path(), "pkg/b.py", "print('b')", T1);

   let remote = MockRemote::new();
   let engine = engine(dir.path(), &remote);
   let result = engine.initialize(&mut ()).await.unwrap();

   assert_eq!(result.added, 2);
   assert_eq!(result.batches, 1);
   assert!(engine.is_initialized());
   assert_eq!(tracked(dir.path()), vec!["a.py", "pkg/b.py"]);

   let uploads = remote.uploads();
   assert_eq!(uploads.len(), 1);
   assert_eq!(uploads[0].1, UploadMode::Initialize);
   assert_eq!(uploads[0].0.sync_id, "repo-1");
   assert_eq!(remote.reassembled()["pkg/b.py"], b"print('b')");

   let manifest = Manifest::load(&metadata_dir(dir.path())).unwrap();
   assert_eq!(manifest.sync_id(), "repo-1");
   assert_eq!(manifest.entries()["a.py"], T1 as f64);
}

#[tokio::test]
async fn sync_adds_and_deletes() {
   let dir = TempDir::new().unwrap();
   write_at(dir.path(), "a.py", "a", T1);
   write_at(dir.path(), "b.py", "b", T1);

   let remote = MockRemote::new();
   let engine = engine(dir.path(), &remote);
   engine.initialize(&mut ()).await.unwrap();
   remote.clear_uploads();

   fs::remove_file(dir.path().join("b.py")).unwrap();
   write_at(dir.path(), "c.py", "c", T2);
   let result = engine.sync(&mut ()).await.unwrap();

   assert_eq!((result.added, result.updated, result.deleted), (1, 0, 1));
   let changes = remote.changes();
   assert_eq!(changes.get("c.py"), Some(&ChangeKind::Add));
   assert_eq!(changes.get("b.py"), Some(&ChangeKind::Delete));
   assert!(!changes.contains_key("a.py"));
   assert!(remote.uploads().iter().all(|(_, mode)| *mode == UploadMode::Reinitialize));

   let manifest = Manifest::load(&metadata_dir(dir.path())).unwrap();
   assert_eq!(manifest.entries().len(), 2);
   assert_eq!(manifest.entries()["a.py"], T1 as f64);
   assert_eq!(manifest.entries()["c.py"], T2 as f64);
}

#[tokio::test]
async fn sync_detects_updates_by_modified_time() {
   let dir = TempDir::new().unwrap();
   let path = write_at(dir.path(), "a.py", "v1", T1);

   let remote = MockRemote::new();
   let engine = engine(dir.path(), &remote);
   engine.initialize(&mut ()).await.unwrap();
   remote.clear_uploads();

   fs::write(&path, "v2").unwrap();
   set_mtime(&path, T2);
   let result = engine.sync(&mut ()).await.unwrap();

   assert_eq!((result.added, result.updated, result.deleted), (0, 1, 0));
   assert_eq!(remote.changes().get("a.py"), Some(&ChangeKind::Update));
   assert_eq!(remote.reassembled()["a.py"], b"v2");
   let manifest = Manifest::load(&metadata_dir(dir.path())).unwrap();
   assert_eq!(manifest.entries()["a.py"], T2 as f64);
}

#[tokio::test]
async fn repeated_sync_is_a_no_op() {
   let dir = TempDir::new().unwrap();
   write_at(dir.path(), "a.py", "a", T1);

   let remote = MockRemote::new();
   let engine = engine(dir.path(), &remote);
   engine.initialize(&mut ()).await.unwrap();
   remote.clear_uploads();

   let before = fs::read(metadata_dir(dir.path()).join("manifest.json")).unwrap();
   for _ in 0..2 {
      let result = engine.sync(&mut ()).await.unwrap();
      assert!(result.up_to_date);
      assert_eq!(result.batches, 0);
   }
   let after = fs::read(metadata_dir(dir.path()).join("manifest.json")).unwrap();

   assert_eq!(remote.upload_count(), 0);
   assert_eq!(before, after);
}

#[tokio::test]
async fn large_file_is_chunked_across_batches() {
   let dir = TempDir::new().unwrap();
   let content: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
   write_at(dir.path(), "big.bin", &content, T1);

   let remote = MockRemote::new();
   let engine = engine_with(dir.path(), &remote, small_batches(1000));
   let result = engine.initialize(&mut ()).await.unwrap();

   assert_eq!(result.batches, 3);
   let uploads = remote.uploads();
   let mut sizes: Vec<_> = uploads
      .iter()
      .map(|(b, _)| {
         let chunk = &b.files["big.bin"];
         assert_eq!(chunk.total_chunks, 3);
         assert_eq!(b.total_batches, 3);
         (chunk.chunk_index, chunk.content.len())
      })
      .collect();
   sizes.sort_unstable();
   assert_eq!(sizes, vec![(0, 1000), (1, 1000), (2, 500)]);
   assert_eq!(remote.reassembled()["big.bin"], content);

   let sessions: std::collections::HashSet<_> =
      uploads.iter().map(|(b, _)| b.session_id.clone()).collect();
   assert_eq!(sessions.len(), 1);
}

#[tokio::test]
async fn oversized_file_aborts_before_any_remote_call() {
   let dir = TempDir::new().unwrap();
   write_at(dir.path(), "small.txt", "ok", T1);
   write_at(dir.path(), "huge.txt", vec![b'x'; 64], T1);

   let remote = MockRemote::new();
   let options = SyncOptions { max_file_size_bytes: 32, ..SyncOptions::default() };
   let err = engine_with(dir.path(), &remote, options).initialize(&mut ()).await.unwrap_err();

   match err {
      Error::FileTooLarge { path, size, max } => {
         assert_eq!(path, "huge.txt");
         assert_eq!(size, 64);
         assert_eq!(max, 32);
      },
      other => panic!("unexpected error: {other}"),
   }
   assert!(remote.created().is_empty());
   assert!(!Manifest::exists(&metadata_dir(dir.path())));
}

#[tokio::test]
async fn extension_filter_limits_eligible_files() {
   let dir = TempDir::new().unwrap();
   write_at(dir.path(), "a.py", "", T1);
   write_at(dir.path(), "b.rs", "", T1);
   write_at(dir.path(), "c.PY", "", T1);
   write_at(dir.path(), "README", "", T1);

   let remote = MockRemote::new();
   let options = SyncOptions { allowed_extensions: vec![".py".into()], ..SyncOptions::default() };
   engine_with(dir.path(), &remote, options).initialize(&mut ()).await.unwrap();

   assert_eq!(tracked(dir.path()), vec!["a.py", "c.PY"]);
}

#[tokio::test]
async fn initialize_twice_is_rejected() {
   let dir = TempDir::new().unwrap();
   write_at(dir.path(), "a.py", "", T1);

   let remote = MockRemote::new();
   let engine = engine(dir.path(), &remote);
   engine.initialize(&mut ()).await.unwrap();
   let err = engine.initialize(&mut ()).await.unwrap_err();

   assert!(matches!(err, Error::AlreadyInitialized(_)));
   assert_eq!(remote.created().len(), 1);
}

#[tokio::test]
async fn sync_requires_initialization() {
   let dir = TempDir::new().unwrap();
   write_at(dir.path(), "a.py", "", T1);

   let remote = MockRemote::new();
   let err = engine(dir.path(), &remote).sync(&mut ()).await.unwrap_err();

   assert!(matches!(err, Error::NotInitialized(_)));
   assert_eq!(remote.upload_count(), 0);
}

#[tokio::test]
async fn missing_root_is_reported() {
   let dir = TempDir::new().unwrap();
   let missing = dir.path().join("nope");

   let remote = MockRemote::new();
   let err = engine(&missing, &remote).initialize(&mut ()).await.unwrap_err();

   assert!(matches!(err, Error::RootNotFound(_)));
   assert!(!missing.exists());
}

#[tokio::test]
async fn empty_directory_still_sends_initialize_batch() {
   let dir = TempDir::new().unwrap();
   write_at(dir.path(), "build/out.log", "", T1);
   fs::write(dir.path().join(".insightignore"), "## _directory_\nbuild\n").unwrap();

   let remote = MockRemote::new();
   let engine = engine(dir.path(), &remote);
   let result = engine.initialize(&mut ()).await.unwrap();

   assert_eq!(result.batches, 1);
   assert!(result.up_to_date);
   assert_eq!(remote.created().len(), 1);
   let uploads = remote.uploads();
   assert_eq!(uploads.len(), 1);
   assert_eq!(uploads[0].1, UploadMode::Initialize);
   assert_eq!(uploads[0].0.total_batches, 1);
   assert!(uploads[0].0.files.is_empty());
   assert!(engine.is_initialized());
   assert!(tracked(dir.path()).is_empty());

   remote.clear_uploads();
   write_at(dir.path(), "a.py", "a", T2);
   engine.sync(&mut ()).await.unwrap();
   assert!(remote.uploads().iter().all(|(_, mode)| *mode == UploadMode::Reinitialize));
}

#[tokio::test]
async fn query_syncs_first_then_searches() {
   let dir = TempDir::new().unwrap();
   write_at(dir.path(), "a.py", "a", T1);

   let remote = MockRemote::new();
   let engine = engine(dir.path(), &remote);
   engine.initialize(&mut ()).await.unwrap();
   remote.clear_uploads();

   write_at(dir.path(), "b.py", "def b(): pass", T2);
   remote.set_query_results(vec![
      QueryMatch { path: "b.py".into(), start_line: 1, end_line: 1, content: "def b(): pass".into() },
      QueryMatch { path: "a.py".into(), start_line: 1, end_line: 1, content: "a".into() },
   ]);
   let matches = engine.query("where is b", 1, &mut ()).await.unwrap();

   assert_eq!(matches.len(), 1);
   assert_eq!(matches[0].path, "b.py");
   assert_eq!(remote.changes().get("b.py"), Some(&ChangeKind::Add));
   assert_eq!(remote.queries(), vec![("repo-1".to_string(), "where is b".to_string(), 1)]);
   assert!(tracked(dir.path()).contains(&"b.py".to_string()));
}

#[tokio::test]
async fn status_reports_pending_without_uploading() {
   let dir = TempDir::new().unwrap();
   write_at(dir.path(), "a.py", "a", T1);
   write_at(dir.path(), "b.py", "b", T1);

   let remote = MockRemote::new();
   let engine = engine(dir.path(), &remote);
   let status = engine.status(false).await.unwrap();
   assert!(!status.initialized);
   assert!(status.pending.is_none());

   engine.initialize(&mut ()).await.unwrap();
   remote.clear_uploads();
   fs::remove_file(dir.path().join("b.py")).unwrap();
   set_mtime(&dir.path().join("a.py"), T2);
   write_at(dir.path(), "c.py", "c", T2);

   let status = engine.status(true).await.unwrap();
   assert!(status.initialized);
   assert_eq!(status.sync_id.as_deref(), Some("repo-1"));
   assert_eq!(status.tracked_files, 2);
   assert!(status.last_synced_at.is_some());
   let pending = status.pending.unwrap();
   assert_eq!((pending.added, pending.updated, pending.deleted), (1, 1, 1));
   assert_eq!(status.remote_valid, Some(true));
   assert_eq!(remote.upload_count(), 0);
}

#[tokio::test]
async fn uninitialize_deletes_remote_then_metadata() {
   let dir = TempDir::new().unwrap();
   write_at(dir.path(), "a.py", "a", T1);

   let remote = MockRemote::new();
   let engine = engine(dir.path(), &remote);
   engine.initialize(&mut ()).await.unwrap();
   engine.uninitialize().await.unwrap();

   assert_eq!(remote.deleted(), vec!["repo-1"]);
   assert!(!metadata_dir(dir.path()).exists());
   assert!(!engine.is_initialized());
   assert!(dir.path().join("a.py").exists());

   let err = engine.uninitialize().await.unwrap_err();
   assert!(matches!(err, Error::NotInitialized(_)));

   engine.initialize(&mut ()).await.unwrap();
   assert_eq!(Manifest::load(&metadata_dir(dir.path())).unwrap().sync_id(), "repo-2");
}

#[tokio::test]
async fn progress_reports_every_stage() {
   let dir = TempDir::new().unwrap();
   write_at(dir.path(), "a.py", "a", T1);

   let remote = MockRemote::new();
   let engine = engine(dir.path(), &remote);
   engine.initialize(&mut ()).await.unwrap();
   write_at(dir.path(), "b.py", "b", T2);

   let mut seen: Vec<SyncProgress> = Vec::new();
   let mut record = |p: SyncProgress| seen.push(p);
   engine.sync(&mut record).await.unwrap();

   for stage in [SyncStage::Scanning, SyncStage::Reading, SyncStage::Uploading, SyncStage::Committing] {
      assert!(seen.iter().any(|p| p.stage == stage), "missing {stage:?}");
   }
   let last = seen.last().unwrap();
   assert_eq!(last.stage, SyncStage::Committing);
   assert_eq!(last.processed, last.total);
}
