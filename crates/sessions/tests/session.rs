#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    fs,
    path::Path,
    time::{Duration, SystemTime},
};

use osm_sessions::{
    Cleaner, CleanupPolicy, SessionLayout, SessionStore, acquire_lock, delete_session, probe_lock,
    scan_sessions,
};

const DAY: Duration = Duration::from_secs(86_400);

fn write_session(layout: &SessionLayout, id: &str, age: Duration) {
    let path = layout.session_file_path(id).unwrap();
    fs::write(&path, format!("{{\"id\":\"{id}\"}}")).unwrap();
    fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(SystemTime::now() - age)
        .unwrap();
}

fn session_files(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| {
            let e = e.unwrap();
            (e.file_name().to_string_lossy().into_owned(), fs::read(e.path()).unwrap())
        })
        .collect();
    files.sort();
    files
}

#[test]
fn age_policy_removes_old_sessions_oldest_first() {
    let dir = tempfile::tempdir().unwrap();
    let layout = SessionLayout::new(dir.path());
    for days in [10, 20, 30, 40, 50] {
        write_session(&layout, &format!("d{days}"), DAY * days);
    }

    let policy = CleanupPolicy {
        max_age_days: 25,
        ..Default::default()
    };
    let report = Cleaner::new(layout.clone(), policy).execute_cleanup(None).unwrap();
    assert_eq!(report.removed, ["d50", "d40", "d30"]);
    assert!(report.skipped.is_empty());

    let left: Vec<String> = scan_sessions(&layout)
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(left, ["d10", "d20"]);
}

#[test]
fn count_policy_spares_active_and_excluded_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let layout = SessionLayout::new(dir.path());
    for i in 0..10u32 {
        write_session(&layout, &format!("s{i}"), Duration::from_secs(60 * u64::from(i + 1)));
    }
    // s9 is the oldest, s8 next: both would go first without protection.
    let active = SessionStore::open(&layout, "s9").unwrap();

    let policy = CleanupPolicy {
        max_count: 3,
        ..Default::default()
    };
    let report = Cleaner::new(layout.clone(), policy)
        .execute_cleanup(Some("s8"))
        .unwrap();
    assert_eq!(report.removed, ["s7", "s6", "s5", "s4", "s3"]);

    let mut left: Vec<String> = scan_sessions(&layout)
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    left.sort();
    assert_eq!(left, ["s0", "s1", "s2", "s8", "s9"]);
    active.close().unwrap();
}

#[test]
fn dry_run_leaves_directory_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let layout = SessionLayout::new(dir.path());
    for days in [1, 2, 3] {
        write_session(&layout, &format!("d{days}"), DAY * days);
    }
    // An idle lock file and an orphan lock file.
    acquire_lock(&layout.session_lock_file_path("d1").unwrap())
        .unwrap()
        .unwrap()
        .close();
    acquire_lock(&layout.session_lock_file_path("gone").unwrap())
        .unwrap()
        .unwrap()
        .close();
    let before = session_files(dir.path());

    let policy = CleanupPolicy {
        max_count: 1,
        dry_run: true,
        ..Default::default()
    };
    let report = Cleaner::new(layout, policy)
        .with_min_orphan_age(Duration::ZERO)
        .execute_cleanup(None)
        .unwrap();
    assert_eq!(report.removed, ["d3", "d2"]);
    assert_eq!(report.orphaned_locks, ["gone"]);
    assert_eq!(session_files(dir.path()), before);
}

#[test]
fn delete_removes_data_and_lock_but_refuses_active() {
    let dir = tempfile::tempdir().unwrap();
    let layout = SessionLayout::new(dir.path());
    write_session(&layout, "idle", DAY);
    write_session(&layout, "busy", DAY);

    delete_session(&layout, "idle").unwrap();
    assert!(!layout.session_file_path("idle").unwrap().exists());
    assert!(!layout.session_lock_file_path("idle").unwrap().exists());

    let store = SessionStore::open(&layout, "busy").unwrap();
    let err = delete_session(&layout, "busy").unwrap_err();
    assert!(err.is_lock_contention());
    assert!(layout.session_file_path("busy").unwrap().exists());
    store.close().unwrap();

    delete_session(&layout, "busy").unwrap();
    assert!(scan_sessions(&layout).unwrap().is_empty());
}

#[test]
fn failed_delete_keeps_lock_file_unheld() {
    let dir = tempfile::tempdir().unwrap();
    let layout = SessionLayout::new(dir.path());
    // unlink(2) refuses a directory, so removing the data path fails.
    let path = layout.session_file_path("stuck").unwrap();
    fs::create_dir(&path).unwrap();

    let err = delete_session(&layout, "stuck").unwrap_err();
    assert!(!err.is_lock_contention());
    assert!(err.to_string().starts_with("remove session"));

    let lock_path = layout.session_lock_file_path("stuck").unwrap();
    assert!(lock_path.exists());
    assert!(!probe_lock(&lock_path).unwrap());
    assert!(path.is_dir());
}

#[test]
fn store_survives_concurrent_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let layout = SessionLayout::new(dir.path());
    let store = SessionStore::open(&layout, "live").unwrap();
    store.save(b"{\"history\":[]}").unwrap();
    fs::File::options()
        .write(true)
        .open(store.path())
        .unwrap()
        .set_modified(SystemTime::now() - DAY * 365)
        .unwrap();

    let policy = CleanupPolicy {
        purge: true,
        ..Default::default()
    };
    let report = Cleaner::new(layout.clone(), policy).execute_cleanup(None).unwrap();
    assert!(report.removed.is_empty());
    assert_eq!(store.load().unwrap().as_deref(), Some(&b"{\"history\":[]}"[..]));
    store.close().unwrap();
}
