use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use wd_core::types::{Patch, PatchStatus};
use wd_daemon::admission::{sha256_hex, AdmissionError, DiffCheck, DiffMonitor, SummarySync};
use wd_daemon::patch_store::PatchStore;
use wd_daemon::signal_bus::{Signal, SignalBus};

const PATCH_ID: &str = "patch-v1.2.0(P3)_relay-fix";

async fn completed_store(dir: &Path, content: &str) -> PatchStore {
    let store = PatchStore::new(dir.join("patches"));
    store.ensure_dirs().await.unwrap();
    let mut patch = Patch::new(PATCH_ID, "GPT", content);
    patch.transition(PatchStatus::Applied).unwrap();
    store.save_completed(&patch).await.unwrap();
    store
}

fn summary(dir: &Path, name: &str, text: &str, age: Duration) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    let file = std::fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
    path
}

#[tokio::test]
async fn summary_verdict_is_recorded_on_completed_patch() {
    let tmp = tempfile::tempdir().unwrap();
    let store = completed_store(tmp.path(), "diff").await;
    let signals = SignalBus::local();
    let rx = signals.subscribe();
    let sync = SummarySync::new(store.clone());

    // Summary uses the unparenthesised phase form.
    let path = summary(
        &tmp.path().join("summaries"),
        "relay.md",
        "Result for patch-v1.2.0P3_relay-fix: ✅ all checks green",
        Duration::ZERO,
    );
    let verdict = sync.sync_file(&path, &signals).await.unwrap().unwrap();
    assert_eq!(verdict.patch_id, PATCH_ID);
    assert!(verdict.passed);

    let record = store.load_completed(PATCH_ID).await.unwrap().unwrap();
    assert_eq!(record.validation.summary_passed, Some(true));
    assert_eq!(record.status, PatchStatus::Applied);

    match rx.try_recv().unwrap() {
        Signal::SummarySync {
            patch_id,
            passed,
            summary,
        } => {
            assert_eq!(patch_id, PATCH_ID);
            assert!(passed);
            assert_eq!(summary, "relay.md");
        }
        other => panic!("unexpected signal {other:?}"),
    }
}

#[tokio::test]
async fn failing_summary_and_unknown_patch() {
    let tmp = tempfile::tempdir().unwrap();
    let store = completed_store(tmp.path(), "diff").await;
    let signals = SignalBus::local();
    let sync = SummarySync::new(store.clone());
    let dir = tmp.path().join("summaries");

    let failing = summary(&dir, "a.md", "patch-v1.2.0(P3)_relay-fix: FAIL", Duration::ZERO);
    let verdict = sync.sync_file(&failing, &signals).await.unwrap().unwrap();
    assert!(!verdict.passed);
    assert_eq!(
        store.load_completed(PATCH_ID).await.unwrap().unwrap().validation.summary_passed,
        Some(false)
    );

    let unknown = summary(&dir, "b.md", "patch-v9.9.9_ghost PASS", Duration::ZERO);
    assert!(matches!(
        sync.sync_file(&unknown, &signals).await,
        Err(AdmissionError::NoCompletedRecord(id)) if id == "patch-v9.9.9_ghost"
    ));

    let unrelated = summary(&dir, "c.txt", "weekly notes, PASS", Duration::ZERO);
    assert!(sync.sync_file(&unrelated, &signals).await.unwrap().is_none());
}

#[tokio::test]
async fn diff_monitor_reports_mismatch_once_then_verifies() {
    let tmp = tempfile::tempdir().unwrap();
    let store = completed_store(tmp.path(), "the applied diff").await;
    let dir = tmp.path().join("summaries");
    let signals = SignalBus::local();
    let rx = signals.subscribe();
    let mut monitor = DiffMonitor::new(store.clone(), &dir);

    let wrong = sha256_hex(b"some other diff");
    summary(
        &dir,
        "old.md",
        &format!("{PATCH_ID} PASS\nsha256: {wrong}\n"),
        Duration::from_secs(60),
    );

    for _ in 0..2 {
        match monitor.check(&signals).await.unwrap() {
            Some(DiffCheck::Mismatch { expected, actual, .. }) => {
                assert_eq!(expected, wrong);
                assert_eq!(actual, sha256_hex(b"the applied diff"));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }
    let mismatches = rx
        .try_iter()
        .filter(|s| matches!(s, Signal::DiffMismatch { .. }))
        .count();
    assert_eq!(mismatches, 1);
    // Informational only: the record keeps its status.
    let record = store.load_completed(PATCH_ID).await.unwrap().unwrap();
    assert_eq!(record.status, PatchStatus::Applied);
    assert!(!record.validation.diff_verified);

    let right = sha256_hex(b"the applied diff");
    summary(&dir, "new.md", &format!("{PATCH_ID} ✅\nSHA256={right}"), Duration::ZERO);
    assert_eq!(
        monitor.check(&signals).await.unwrap(),
        Some(DiffCheck::Match {
            patch_id: PATCH_ID.to_string()
        })
    );
    assert!(store
        .load_completed(PATCH_ID)
        .await
        .unwrap()
        .unwrap()
        .validation
        .diff_verified);
}

#[tokio::test]
async fn diff_monitor_is_quiet_without_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    let store = PatchStore::new(tmp.path().join("patches"));
    let mut monitor = DiffMonitor::new(store, tmp.path().join("summaries"));
    assert_eq!(monitor.check(&SignalBus::local()).await.unwrap(), None);
}
