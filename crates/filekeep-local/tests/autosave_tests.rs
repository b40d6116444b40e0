use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use filekeep_core::{BackupOptions, CancelToken, JsonCodec, NullSink};
use filekeep_local::{
    AutoSaveScheduler, BackupManager, FileManager, FileRegistry, FileStore, TickOutcome,
};
use serde_json::{json, Value};
use tempfile::TempDir;

fn manager(path: PathBuf) -> Arc<FileManager<Value>> {
    let store = FileStore::new();
    Arc::new(FileManager::new(
        path,
        Arc::new(JsonCodec::<Value>::new()),
        store.clone(),
        BackupManager::new(BackupOptions::default(), store),
        Arc::new(NullSink),
    ))
}

#[tokio::test]
async fn test_tick_with_no_pending_changes_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.json");
    std::fs::write(&path, r#"{"a":1}"#).unwrap();

    let file = manager(path.clone());
    file.load(&CancelToken::none()).await.unwrap();
    let before = std::fs::metadata(&path).unwrap().modified().unwrap();

    let registry = Arc::new(FileRegistry::new());
    registry.register(file);
    let scheduler = AutoSaveScheduler::new(registry, Arc::new(NullSink));

    assert_eq!(scheduler.execute_now().await, TickOutcome::Idle);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"a":1}"#);
    assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), before);
}

#[tokio::test]
async fn test_tick_saves_dirty_files_and_reports_failures() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("blocker"), "").unwrap();

    let good = manager(dir.path().join("good.json"));
    good.set_data(json!({"saved": true})).unwrap();
    let bad = manager(dir.path().join("blocker").join("bad.json"));
    bad.set_data(json!({"saved": false})).unwrap();

    let registry = Arc::new(FileRegistry::new());
    registry.register(good.clone());
    registry.register(bad.clone());
    let scheduler = AutoSaveScheduler::new(registry, Arc::new(NullSink));

    let TickOutcome::Completed(summary) = scheduler.execute_now().await else {
        panic!("expected a completed tick");
    };
    assert_eq!(summary.saved, vec![dir.path().join("good.json")]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, dir.path().join("blocker").join("bad.json"));

    assert!(!good.has_pending_auto_save());
    assert!(bad.has_pending_auto_save());
    let on_disk: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("good.json")).unwrap())
            .unwrap();
    assert_eq!(on_disk, json!({"saved": true}));

    // The failed file is retried on the next tick.
    let TickOutcome::Completed(summary) = scheduler.execute_now().await else {
        panic!("expected a retry");
    };
    assert!(summary.saved.is_empty());
    assert_eq!(summary.failed.len(), 1);
}

#[tokio::test]
async fn test_disabled_auto_save_is_left_alone() {
    let dir = TempDir::new().unwrap();
    let file = manager(dir.path().join("manual.json"));
    file.set_data(json!({"x": 1})).unwrap();
    file.set_auto_save_enabled(false);

    let registry = Arc::new(FileRegistry::new());
    registry.register(file.clone());
    let scheduler = AutoSaveScheduler::new(registry, Arc::new(NullSink));

    assert_eq!(scheduler.execute_now().await, TickOutcome::Idle);
    assert!(file.has_pending_auto_save());
    assert!(!dir.path().join("manual.json").exists());
}

#[tokio::test]
async fn test_running_scheduler_flushes_edits() {
    let dir = TempDir::new().unwrap();
    let file = manager(dir.path().join("live.json"));
    file.set_data(json!({"n": 0})).unwrap();

    let registry = Arc::new(FileRegistry::new());
    registry.register(file.clone());
    let scheduler = AutoSaveScheduler::new(registry, Arc::new(NullSink));
    assert!(scheduler.start(Duration::from_millis(20)));

    for _ in 0..100 {
        if !file.has_pending_auto_save() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(scheduler.stop());
    assert!(!file.has_pending_auto_save());
    assert!(dir.path().join("live.json").exists());
}
