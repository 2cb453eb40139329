use projstate::core::config_store::{ConfigStore, MemoryConfigStore, NAMESPACE, SecondaryTier, config_key};
use projstate::core::error::{TierError, WriteError};
use projstate::core::locks::global_locks;
use projstate::core::pipeline::{HealMode, TierStatus, TieredStore};
use projstate::core::store::{DefaultReason, ProjectId, Provenance, StateKey, TierKind};
use projstate::core::tier::{BackupTier, PrimaryTier, Tier};
use projstate::plugins::requirements::{Priority, RequirementItem, Requirements};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

type Secondary = Arc<SecondaryTier<MemoryConfigStore>>;

fn full_store(root: &Path) -> (TieredStore, Secondary) {
    let secondary = Arc::new(SecondaryTier::new(MemoryConfigStore::new()));
    let store = TieredStore::new(PrimaryTier::new(root))
        .with_tier(Arc::new(BackupTier::new(root)))
        .with_tier(secondary.clone());
    (store, secondary)
}

fn ids(project: &str, key: &str) -> (ProjectId, StateKey) {
    (ProjectId::new(project).unwrap(), StateKey::new(key).unwrap())
}

fn sample_requirements() -> Requirements {
    Requirements {
        extracted_items: vec![RequirementItem {
            id: "req-1".into(),
            title: "Login".into(),
            description: "Users sign in with email".into(),
            priority: Priority::High,
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// A tier whose backend is offline.
struct OfflineTier;

impl Tier for OfflineTier {
    fn kind(&self) -> TierKind {
        TierKind::Secondary
    }

    fn get(&self, _: &ProjectId, _: &StateKey) -> Result<Vec<u8>, TierError> {
        Err(TierError::Unreadable("offline".into()))
    }

    fn put(&self, _: &ProjectId, _: &StateKey, _: &[u8]) -> Result<(), TierError> {
        Err(TierError::PermissionDenied("offline".into()))
    }

    fn purge(&self, _: &ProjectId) -> Result<(), TierError> {
        Ok(())
    }

    fn locate(&self, _: &ProjectId, _: &StateKey) -> String {
        "offline".into()
    }
}

#[test]
fn save_writes_primary_and_mirrors_secondary() {
    let tmp = tempdir().unwrap();
    let (store, secondary) = full_store(tmp.path());
    let (pid, key) = ids("p1", "notes");

    store.save(&pid, &key, &json!({"v": 1})).unwrap();

    let primary: Value = serde_json::from_slice(&fs::read(store.primary().path(&pid, &key)).unwrap()).unwrap();
    assert_eq!(primary, json!({"v": 1}));
    let mirrored = secondary
        .store()
        .config_get(NAMESPACE, &config_key(&pid, &key))
        .unwrap()
        .expect("secondary mirror");
    assert_eq!(serde_json::from_slice::<Value>(&mirrored).unwrap(), json!({"v": 1}));
    // First save has no previous generation to keep.
    assert!(!store.primary().backup_path(&pid, &key).exists());
}

#[test]
fn second_save_keeps_previous_generation_in_backup() {
    let tmp = tempdir().unwrap();
    let (store, _) = full_store(tmp.path());
    let (pid, key) = ids("p1", "notes");

    store.save(&pid, &key, &json!(1)).unwrap();
    store.save(&pid, &key, &json!(2)).unwrap();

    let backup = fs::read(store.primary().backup_path(&pid, &key)).unwrap();
    assert_eq!(serde_json::from_slice::<Value>(&backup).unwrap(), json!(1));
    assert_eq!(store.load(&pid, &key, json!(null)), json!(2));
}

#[test]
fn abandoned_stage_leaves_old_primary_intact() {
    let tmp = tempdir().unwrap();
    let (store, _) = full_store(tmp.path());
    let (pid, key) = ids("p1", "notes");
    store.save(&pid, &key, &json!("old")).unwrap();

    let staged = store.primary().stage(&pid, &key, b"\"new\"").unwrap();
    assert_eq!(store.load(&pid, &key, json!(null)), json!("old"));
    staged.abandon();

    assert_eq!(store.load(&pid, &key, json!(null)), json!("old"));
    assert!(!store.primary().temp_path(&pid, &key).exists());
}

#[test]
fn interrupted_save_leaves_temp_that_sweep_removes() {
    let tmp = tempdir().unwrap();
    let (store, _) = full_store(tmp.path());
    let (pid, key) = ids("p1", "notes");
    store.save(&pid, &key, &json!("old")).unwrap();

    // Crash between stage and commit: the staged write is simply never committed.
    let _ = store.primary().stage(&pid, &key, b"{\"half").unwrap();
    assert_eq!(store.load(&pid, &key, json!(null)), json!("old"));

    assert_eq!(store.primary().sweep_temp(&pid).unwrap(), 1);
    assert!(!store.primary().temp_path(&pid, &key).exists());
    assert_eq!(store.primary().sweep_temp(&pid).unwrap(), 0);
}

#[test]
fn concurrent_saves_never_expose_partial_primary() {
    let tmp = tempdir().unwrap();
    let (store, _) = full_store(tmp.path());
    let (pid, key) = ids("p1", "counter");
    store.save(&pid, &key, &json!({"writer": -1, "pad": "x".repeat(4096)})).unwrap();

    let writers: Vec<_> = (0..8)
        .map(|w| {
            let store = store.clone();
            let (pid, key) = (pid.clone(), key.clone());
            thread::spawn(move || {
                for _ in 0..10 {
                    store
                        .save(&pid, &key, &json!({"writer": w, "pad": "x".repeat(4096)}))
                        .unwrap();
                }
            })
        })
        .collect();

    let path = store.primary().path(&pid, &key);
    for _ in 0..200 {
        let bytes = fs::read(&path).expect("primary is never absent");
        let value: Value = serde_json::from_slice(&bytes).expect("primary is never partial");
        assert!(value["writer"].as_i64().is_some());
    }
    for handle in writers {
        handle.join().unwrap();
    }

    let last: Value = store.load(&pid, &key, json!(null));
    assert!((0..8).contains(&last["writer"].as_i64().unwrap()));
}

#[test]
fn deleted_primary_recovers_from_backup_and_heals() {
    let tmp = tempdir().unwrap();
    let (store, _) = full_store(tmp.path());
    let (pid, key) = ids("p1", "notes");
    store.save(&pid, &key, &json!("first")).unwrap();
    store.save(&pid, &key, &json!("second")).unwrap();

    fs::write(store.primary().path(&pid, &key), b"{ not json").unwrap();
    let loaded = store.load_with_provenance(&pid, &key, json!(null));
    // The backup holds the generation before the last save; the secondary mirror is
    // never consulted because the backup parses first.
    assert_eq!(loaded.value, json!("first"));
    assert_eq!(loaded.provenance, Provenance::Tier(TierKind::Backup));

    let again = store.load_with_provenance(&pid, &key, json!(null));
    assert_eq!(again.value, json!("first"));
    assert_eq!(again.provenance, Provenance::Tier(TierKind::Primary));
}

#[test]
fn deleted_primary_requirements_are_restored_on_disk() {
    let tmp = tempdir().unwrap();
    let (store, _) = full_store(tmp.path());
    let (pid, key) = (ProjectId::new("p1").unwrap(), StateKey::requirements());
    let saved = sample_requirements();
    store.save(&pid, &key, &saved).unwrap();

    fs::remove_file(store.primary().path(&pid, &key)).unwrap();
    let loaded: Requirements = store.load(&pid, &key, Requirements::default());

    assert_eq!(loaded, saved);
    let on_disk: Requirements =
        serde_json::from_slice(&fs::read(store.primary().path(&pid, &key)).unwrap()).unwrap();
    assert_eq!(on_disk, saved);
}

#[test]
fn secondary_recovery_also_restores_backup() {
    let tmp = tempdir().unwrap();
    let (store, _) = full_store(tmp.path());
    let (pid, key) = ids("p1", "notes");
    store.save(&pid, &key, &json!("a")).unwrap();
    store.save(&pid, &key, &json!("b")).unwrap();

    fs::remove_file(store.primary().path(&pid, &key)).unwrap();
    fs::remove_file(store.primary().backup_path(&pid, &key)).unwrap();

    let loaded = store.load_with_provenance(&pid, &key, json!(null));
    assert_eq!(loaded.value, json!("b"));
    assert_eq!(loaded.provenance, Provenance::Tier(TierKind::Secondary));

    let backup = fs::read(store.primary().backup_path(&pid, &key)).unwrap();
    assert_eq!(serde_json::from_slice::<Value>(&backup).unwrap(), json!("b"));
    assert_eq!(store.load_with_provenance(&pid, &key, json!(null)).from_tier(), Some(TierKind::Primary));
}

#[test]
fn deferred_heal_completes_in_background() {
    let tmp = tempdir().unwrap();
    let (store, _) = full_store(tmp.path());
    let store = store.with_heal_mode(HealMode::Deferred);
    let (pid, key) = ids("p1", "notes");
    store.save(&pid, &key, &json!(1)).unwrap();
    store.save(&pid, &key, &json!(2)).unwrap();
    fs::remove_file(store.primary().path(&pid, &key)).unwrap();

    let loaded = store.load_with_provenance(&pid, &key, json!(null));
    assert_eq!(loaded.value, json!(1));
    assert_eq!(loaded.provenance, Provenance::Tier(TierKind::Backup));

    store.wait_for_heals();
    let healed = fs::read(store.primary().path(&pid, &key)).unwrap();
    assert_eq!(serde_json::from_slice::<Value>(&healed).unwrap(), json!(1));
}

#[test]
fn deferred_heal_never_reverts_a_newer_save() {
    let tmp = tempdir().unwrap();
    let (store, _) = full_store(tmp.path());
    let store = store.with_heal_mode(HealMode::Deferred);
    let (pid, key) = ids("heal-race", "notes");
    store.save(&pid, &key, &json!("v1")).unwrap();
    store.save(&pid, &key, &json!("v2")).unwrap();
    fs::remove_file(store.primary().path(&pid, &key)).unwrap();

    global_locks()
        .with_key(&pid, &key, || {
            assert_eq!(store.load(&pid, &key, json!(null)), json!("v1"));
            // A write that commits before the heal gets the key lock.
            store.primary().put(&pid, &key, br#""v3""#).unwrap();
        })
        .unwrap();
    store.wait_for_heals();

    let loaded = store.load_with_provenance(&pid, &key, json!(null));
    assert_eq!(loaded.value, json!("v3"));
    assert_eq!(loaded.provenance, Provenance::Tier(TierKind::Primary));
}

#[test]
fn heal_writes_primary_and_backup_under_the_key_lock() {
    let tmp = tempdir().unwrap();
    let (store, _) = full_store(tmp.path());
    let store = store.with_heal_mode(HealMode::Deferred);
    let (pid, key) = ids("heal-locked", "notes");
    store.save(&pid, &key, &json!("a")).unwrap();
    store.save(&pid, &key, &json!("b")).unwrap();
    fs::remove_file(store.primary().path(&pid, &key)).unwrap();
    fs::remove_file(store.primary().backup_path(&pid, &key)).unwrap();

    global_locks()
        .with_key(&pid, &key, || {
            assert_eq!(store.load(&pid, &key, json!(null)), json!("b"));
            thread::sleep(Duration::from_millis(50));
            assert!(!store.primary().path(&pid, &key).exists());
            assert!(!store.primary().backup_path(&pid, &key).exists());
        })
        .unwrap();
    store.wait_for_heals();

    for path in [store.primary().path(&pid, &key), store.primary().backup_path(&pid, &key)] {
        let bytes = fs::read(&path).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&bytes).unwrap(), json!("b"));
    }
}

#[test]
fn failed_commit_leaves_backup_and_secondary_untouched() {
    let tmp = tempdir().unwrap();
    let (store, secondary) = full_store(tmp.path());
    let (pid, key) = ids("p1", "occupied");
    store.save(&pid, &key, &json!("v1")).unwrap();
    store.save(&pid, &key, &json!("v2")).unwrap();

    let primary = store.primary().path(&pid, &key);
    fs::remove_file(&primary).unwrap();
    fs::create_dir_all(primary.join("occupant")).unwrap();

    let err = store.save(&pid, &key, &json!("v3")).unwrap_err();
    assert!(matches!(err, WriteError::CommitFailed { .. }), "{err}");
    assert!(!store.primary().temp_path(&pid, &key).exists());

    let backup = fs::read(store.primary().backup_path(&pid, &key)).unwrap();
    assert_eq!(serde_json::from_slice::<Value>(&backup).unwrap(), json!("v1"));
    let mirrored = secondary
        .store()
        .config_get(NAMESPACE, &config_key(&pid, &key))
        .unwrap()
        .unwrap();
    assert_eq!(serde_json::from_slice::<Value>(&mirrored).unwrap(), json!("v2"));
}

#[test]
fn unparseable_primary_does_not_overwrite_good_backup() {
    let tmp = tempdir().unwrap();
    let (store, _) = full_store(tmp.path());
    let (pid, key) = ids("p1", "notes");
    store.save(&pid, &key, &json!("v1")).unwrap();
    store.save(&pid, &key, &json!("v2")).unwrap();

    fs::write(store.primary().path(&pid, &key), b"\0\0garbage").unwrap();
    store.save(&pid, &key, &json!("v3")).unwrap();

    let backup = fs::read(store.primary().backup_path(&pid, &key)).unwrap();
    assert_eq!(serde_json::from_slice::<Value>(&backup).unwrap(), json!("v1"));
    assert_eq!(store.load(&pid, &key, json!(null)), json!("v3"));
}

#[test]
fn nothing_stored_returns_default_exactly() {
    let tmp = tempdir().unwrap();
    let (store, _) = full_store(tmp.path());
    let (pid, key) = ids("p1", "missing");

    let default = json!({"fallback": [1, 2, 3]});
    let loaded = store.load_with_provenance(&pid, &key, default.clone());
    assert_eq!(loaded.value, default);
    assert_eq!(loaded.provenance, Provenance::Default(DefaultReason::Empty));
    assert_eq!(store.load_opt::<Value>(&pid, &key), None);
    // A miss never creates files.
    assert!(!store.primary().project_dir(&pid).exists());
}

#[test]
fn every_tier_damaged_is_reported_as_unreadable() {
    let tmp = tempdir().unwrap();
    let store = TieredStore::new(PrimaryTier::new(tmp.path()))
        .with_tier(Arc::new(BackupTier::new(tmp.path())))
        .with_tier(Arc::new(OfflineTier));
    let (pid, key) = ids("p1", "notes");

    fs::create_dir_all(store.primary().project_dir(&pid)).unwrap();
    fs::write(store.primary().path(&pid, &key), b"{").unwrap();
    fs::write(store.primary().backup_path(&pid, &key), b"").unwrap();

    let loaded = store.load_with_provenance(&pid, &key, json!("d"));
    assert_eq!(loaded.value, json!("d"));
    assert_eq!(loaded.provenance, Provenance::Default(DefaultReason::AllUnreadable));
}

#[test]
fn failing_mirror_does_not_fail_save() {
    let tmp = tempdir().unwrap();
    let store = TieredStore::new(PrimaryTier::new(tmp.path())).with_tier(Arc::new(OfflineTier));
    let (pid, key) = ids("p1", "notes");

    store.save(&pid, &key, &json!("kept")).unwrap();
    assert_eq!(store.load(&pid, &key, json!(null)), json!("kept"));
}

#[test]
fn inspect_reports_each_tier() {
    let tmp = tempdir().unwrap();
    let (store, _) = full_store(tmp.path());
    let (pid, key) = ids("p1", "notes");
    store.save(&pid, &key, &json!(1)).unwrap();
    fs::write(store.primary().path(&pid, &key), b"oops").unwrap();

    let reports = store.inspect(&pid, &key);
    let kinds: Vec<TierKind> = reports.iter().map(|r| r.tier).collect();
    assert_eq!(kinds, vec![TierKind::Primary, TierKind::Backup, TierKind::Secondary]);
    assert!(matches!(reports[0].status, TierStatus::Unparseable(_)));
    assert_eq!(reports[0].stat.map(|s| s.bytes), Some(4));
    assert_eq!(reports[1].status, TierStatus::Missing);
    assert_eq!(reports[2].status, TierStatus::Parseable);
    assert_eq!(store.tier_kinds(), kinds);
}

#[test]
fn purge_removes_project_from_every_tier() {
    let tmp = tempdir().unwrap();
    let (store, secondary) = full_store(tmp.path());
    let pid = ProjectId::new("p1").unwrap();
    let other = ProjectId::new("p2").unwrap();
    let a = StateKey::new("a").unwrap();
    let b = StateKey::new("b").unwrap();
    for key in [&a, &b] {
        store.save(&pid, key, &json!(1)).unwrap();
        store.save(&pid, key, &json!(2)).unwrap();
    }
    store.save(&other, &a, &json!("untouched")).unwrap();

    store.purge_project(&pid).unwrap();

    assert!(!store.primary().project_dir(&pid).exists());
    for key in [&a, &b] {
        assert_eq!(
            secondary.store().config_get(NAMESPACE, &config_key(&pid, key)).unwrap(),
            None
        );
        assert_eq!(
            store.load_with_provenance(&pid, key, json!(null)).provenance,
            Provenance::Default(DefaultReason::Empty)
        );
    }
    assert_eq!(store.load(&other, &a, json!(null)), json!("untouched"));
}

#[test]
fn purge_waits_for_in_flight_writes() {
    let tmp = tempdir().unwrap();
    let (store, _) = full_store(tmp.path());
    let (pid, key) = ids("purge-locked", "notes");
    store.save(&pid, &key, &json!(1)).unwrap();

    let purger = global_locks()
        .with_key(&pid, &key, || {
            let purger = {
                let store = store.clone();
                let pid = pid.clone();
                thread::spawn(move || store.purge_project(&pid).unwrap())
            };
            thread::sleep(Duration::from_millis(50));
            assert!(store.primary().path(&pid, &key).exists());
            purger
        })
        .unwrap();
    purger.join().unwrap();

    assert!(!store.primary().project_dir(&pid).exists());
}

#[test]
fn projects_and_keys_are_isolated() {
    let tmp = tempdir().unwrap();
    let (store, _) = full_store(tmp.path());
    let (p1, key) = ids("p1", "notes");
    let p2 = ProjectId::new("p2").unwrap();
    store.save(&p1, &key, &json!("one")).unwrap();
    store.save(&p2, &key, &json!("two")).unwrap();

    assert_eq!(store.load(&p1, &key, json!(null)), json!("one"));
    assert_eq!(store.load(&p2, &key, json!(null)), json!("two"));
    assert_eq!(store.load(&p1, &StateKey::mockups(), json!([])), json!([]));
}

#[test]
fn invalid_identifiers_are_rejected() {
    assert!(ProjectId::new("").is_err());
    assert!(ProjectId::new("../etc").is_err());
    assert!(ProjectId::new("a/b").is_err());
    assert!(StateKey::new(".hidden").is_err());
    assert!(StateKey::new("implementationScope").is_ok());
}
