use std::sync::Arc;

use chrono::{Local, TimeZone};
use filekeep_core::{
    BackupOptions, CancelToken, ChannelSink, FileEvent, JsonCodec, ManualClock, NullSink,
};
use filekeep_local::{BackupManager, CrashRecovery, FileManager, FileRegistry, FileStore};
use serde_json::{json, Value};
use tempfile::TempDir;

fn manager_at(dir: &TempDir, name: &str) -> FileManager<Value> {
    let store = FileStore::new();
    let clock = Arc::new(ManualClock::new(
        Local.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
    ));
    let backups = BackupManager::new(BackupOptions::default(), store.clone()).with_clock(clock);
    FileManager::new(
        dir.path().join(name),
        Arc::new(JsonCodec::<Value>::new()),
        store,
        backups,
        Arc::new(NullSink),
    )
}

#[tokio::test]
async fn test_crash_restores_latest_backup_and_keeps_corrupted_copy() {
    let dir = TempDir::new().unwrap();
    let app_dir = dir.path().join("app");
    let cancel = CancelToken::none();

    // First run: edit, back up, then die without shutdown.
    {
        let manager = manager_at(&dir, "settings.json");
        manager.load_or_init(json!({"volume": 3}), &cancel).await.unwrap();
        manager.backup_now(&cancel).await.unwrap().unwrap();

        let registry = FileRegistry::new();
        registry.register(Arc::new(manager));
        let recovery = CrashRecovery::new(&app_dir);
        let report = recovery.start(&registry, &cancel).await.unwrap();
        assert!(!report.crash_detected);
    }

    let working = dir.path().join("settings.json");
    std::fs::write(&working, "{\"volume\": 3, trunc").unwrap();

    // Second run.
    let manager = Arc::new(manager_at(&dir, "settings.json"));
    let registry = FileRegistry::new();
    registry.register(manager.clone());

    let (sink, mut rx) = ChannelSink::new();
    let recovery = CrashRecovery::new(&app_dir).with_sink(Arc::new(sink));
    let report = recovery.start(&registry, &cancel).await.unwrap();

    assert!(report.crash_detected);
    assert_eq!(report.restored.len(), 1);
    assert!(report.failed.is_empty());

    let restored = &report.restored[0];
    assert_eq!(restored.path, working);
    let preserved = restored.preserved.clone().expect("corrupted copy kept");
    assert!(preserved
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("settings.json.corrupted_"));
    assert_eq!(
        std::fs::read_to_string(&preserved).unwrap(),
        "{\"volume\": 3, trunc"
    );

    assert_eq!(manager.data(), Some(json!({"volume": 3})));
    assert!(matches!(rx.recv().await, Some(FileEvent::Recovered { .. })));
    assert!(recovery.flag_path().exists());

    recovery.shutdown().await.unwrap();
    assert!(!recovery.crash_detected().await);
}

#[tokio::test]
async fn test_crash_without_backup_is_skipped() {
    let dir = TempDir::new().unwrap();
    let app_dir = dir.path().join("app");
    std::fs::create_dir_all(&app_dir).unwrap();
    std::fs::write(app_dir.join("filekeep.running"), "pid=1\n").unwrap();
    std::fs::write(dir.path().join("notes.json"), "{}").unwrap();

    let registry = FileRegistry::new();
    registry.register(Arc::new(manager_at(&dir, "notes.json")));
    registry.register(Arc::new(manager_at(&dir, "locked.json").without_recovery()));

    let recovery = CrashRecovery::new(&app_dir);
    let report = recovery.start(&registry, &CancelToken::none()).await.unwrap();

    assert!(report.crash_detected);
    assert!(report.restored.is_empty());
    assert_eq!(report.skipped, vec![dir.path().join("notes.json")]);
    assert_eq!(std::fs::read_to_string(dir.path().join("notes.json")).unwrap(), "{}");
}
