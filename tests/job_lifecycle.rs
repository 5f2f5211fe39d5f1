use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use printwatch::config::TrackerConfig;
use printwatch::shared::{EXTERNAL_SLOT, JobSnapshotRecord, JobStatus, SpoolRef};
use printwatch::tracker::{
    EventKind, JobFinalization, JobLedger, JobTracker, LedgerError, NewJob, OpenJob, RuntimeRegistry, Transition,
};
use printwatch::{MemoryLedger, MemoryNotifier, SnapshotStore};
use serde_json::{Value, json};
use tempfile::{TempDir, tempdir};

const DEVICE: &str = "01P00A000000001";

struct Harness {
    dir: TempDir,
    ledger: Arc<MemoryLedger>,
    notifier: Arc<MemoryNotifier>,
    tracker: JobTracker,
}

impl Harness {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let tracker = tracker_for(&dir, ledger.clone(), notifier.clone());
        Self { dir, ledger, notifier, tracker }
    }

    /// A fresh tracker over the same ledger and snapshot file, as after a process restart.
    fn restart(&mut self) {
        self.tracker = tracker_for(&self.dir, self.ledger.clone(), self.notifier.clone());
    }

    fn store(&self) -> SnapshotStore {
        SnapshotStore::new(self.dir.path().join("snapshots.json"))
    }

    async fn send(&self, payload: Value) -> Transition {
        self.tracker.handle_telemetry(DEVICE, &payload, None).await.transition
    }

    fn event_kinds(&self) -> Vec<EventKind> {
        self.notifier.events().into_iter().map(|e| e.kind).collect()
    }
}

fn tracker_for(dir: &TempDir, ledger: Arc<MemoryLedger>, notifier: Arc<MemoryNotifier>) -> JobTracker {
    let config = TrackerConfig {
        snapshot_path: dir.path().join("snapshots.json"),
        ..TrackerConfig::default()
    };
    let store = SnapshotStore::new(&config.snapshot_path);
    JobTracker::new(config, ledger, notifier, store)
}

/// Bambu-style report with two AMS trays of 100 m each.
fn report(state: &str, layer: u32, percent: f64, slot: u32, remains: [f64; 2]) -> Value {
    json!({"print": {
        "gcode_state": state,
        "mc_percent": percent,
        "layer_num": layer,
        "total_layer_num": 200,
        "subtask_name": "benchy",
        "ams": {
            "tray_now": slot.to_string(),
            "tray_tar": slot.to_string(),
            "ams": [{"id": "0", "tray": [
                {"id": "0", "remain": remains[0], "total_len": 100000, "tray_type": "PLA"},
                {"id": "1", "remain": remains[1], "total_len": 100000, "tray_type": "PETG"}
            ]}]
        }
    }})
}

fn job_id(transition: &Transition) -> String {
    match transition {
        Transition::Started { job_id }
        | Transition::Resumed { job_id }
        | Transition::Updated { job_id }
        | Transition::Finished { job_id, .. } => job_id.clone(),
        other => panic!("no job in transition {other:?}"),
    }
}

#[tokio::test]
async fn test_end_to_end_fallback_accounting() {
    let h = Harness::new();
    let spool = h.ledger.add_spool(DEVICE, 0, 1000.0, 200.0).await;

    let started = h.send(report("RUNNING", 0, 0.0, 0, [100.0, 100.0])).await;
    assert!(matches!(started, Transition::Started { .. }));
    let id = job_id(&started);
    assert!(h.store().load(DEVICE).is_some());

    assert_eq!(h.send(report("RUNNING", 100, 50.0, 0, [90.0, 100.0])).await, Transition::Updated { job_id: id.clone() });
    let finished = h.send(report("FINISH", 200, 100.0, 0, [75.0, 100.0])).await;
    assert_eq!(finished, Transition::Finished { job_id: id.clone(), status: JobStatus::Completed });

    let job = h.ledger.job(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.name, "benchy");
    assert!((job.used_length_mm.unwrap() - 25_000.0).abs() < 1e-6);
    assert!((job.used_mass_g.unwrap() - 200.0).abs() < 1e-6);
    assert_eq!(job.spool_id.as_deref(), Some(spool.as_str()));

    assert!((h.ledger.spool(&spool).await.unwrap().consumed_g - 200.0).abs() < 1e-6);
    assert!(h.tracker.registry().is_empty().await);
    assert!(h.store().load(DEVICE).is_none());
    assert!(h.notifier.events().is_empty());
}

#[tokio::test]
async fn test_resume_after_restart_keeps_job() {
    let mut h = Harness::new();
    let id = job_id(&h.send(report("RUNNING", 5, 40.0, 0, [100.0, 100.0])).await);
    let record = h.store().load(DEVICE).unwrap();
    assert_eq!(record.last_layer, Some(5));
    assert_eq!(record.last_progress, Some(40.0));

    h.restart();
    assert!(h.tracker.registry().is_empty().await);
    let resumed = h.send(report("RUNNING", 6, 42.0, 0, [99.0, 100.0])).await;
    assert_eq!(resumed, Transition::Resumed { job_id: id.clone() });
    assert_eq!(h.ledger.jobs().await.len(), 1);
    assert_eq!(h.tracker.registry().job_id(DEVICE).await, Some(id));
}

#[tokio::test]
async fn test_new_print_after_crash_fails_old_job() {
    let mut h = Harness::new();
    let old = job_id(&h.send(report("RUNNING", 5, 40.0, 0, [100.0, 100.0])).await);

    h.restart();
    let started = h.send(report("RUNNING", 1, 2.0, 0, [100.0, 100.0])).await;
    let new = job_id(&started);
    assert!(matches!(started, Transition::Started { .. }));
    assert_ne!(old, new);
    assert_eq!(h.ledger.job(&old).await.unwrap().status, JobStatus::Failed);
    assert_eq!(h.ledger.job(&new).await.unwrap().status, JobStatus::Running);
    assert!(h.event_kinds().contains(&EventKind::JobFailed));
    assert_eq!(h.store().load(DEVICE).unwrap().job_id, new);
}

#[tokio::test]
async fn test_slot_switch_accounts_each_spool() {
    let h = Harness::new();
    let spool_a = h.ledger.add_spool(DEVICE, 0, 1000.0, 200.0).await;
    let spool_b = h.ledger.add_spool(DEVICE, 1, 500.0, 100.0).await;

    let id = job_id(&h.send(report("RUNNING", 1, 5.0, 0, [100.0, 100.0])).await);
    h.send(report("RUNNING", 10, 20.0, 0, [90.0, 100.0])).await;
    h.send(report("CHANGING_FILAMENT", 11, 21.0, 1, [90.0, 100.0])).await;

    let state = h.tracker.registry().get(DEVICE).await.unwrap();
    assert_eq!(state.active_slot(), Some(1));
    assert_eq!(state.usage.len(), 1);
    assert_eq!(h.ledger.job(&id).await.unwrap().spool_id.as_deref(), Some(spool_b.as_str()));

    h.send(report("RUNNING", 50, 60.0, 1, [90.0, 80.0])).await;
    h.send(report("FINISH", 200, 100.0, 1, [90.0, 75.0])).await;

    let job = h.ledger.job(&id).await.unwrap();
    // A: 10% of 800 g, B: 25% of 400 g
    assert!((job.used_mass_g.unwrap() - 180.0).abs() < 1e-6);
    assert!((job.used_length_mm.unwrap() - 35_000.0).abs() < 1e-6);
    assert_eq!(job.usage.len(), 2);
    assert_eq!(job.spool_id.as_deref(), Some(spool_a.as_str()));
    assert!((h.ledger.spool(&spool_a).await.unwrap().consumed_g - 80.0).abs() < 1e-6);
    assert!((h.ledger.spool(&spool_b).await.unwrap().consumed_g - 100.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_remaining_percent_ratchet() {
    let h = Harness::new();
    h.send(report("RUNNING", 1, 1.0, 0, [80.0, 100.0])).await;
    h.send(report("RUNNING", 2, 2.0, 0, [85.0, 100.0])).await;
    let slot = h.tracker.registry().get(DEVICE).await.unwrap().open_slot.unwrap();
    assert_eq!(slot.last_remain, Some(80.0));

    h.send(report("RUNNING", 3, 3.0, 0, [70.0, 100.0])).await;
    let slot = h.tracker.registry().get(DEVICE).await.unwrap().open_slot.unwrap();
    assert_eq!(slot.last_remain, Some(70.0));
    assert_eq!(slot.start_remain, Some(80.0));
}

#[tokio::test]
async fn test_spool_marked_empty_at_zero() {
    let h = Harness::new();
    let spool = h.ledger.add_spool(DEVICE, 0, 1000.0, 200.0).await;
    h.send(report("RUNNING", 1, 1.0, 0, [10.0, 100.0])).await;
    h.send(report("FINISH", 200, 100.0, 0, [0.0, 100.0])).await;
    assert!(h.ledger.spool(&spool).await.unwrap().empty);
}

#[tokio::test]
async fn test_abort_and_missing_spool_notifications() {
    let h = Harness::new();
    h.send(report("RUNNING", 1, 1.0, 0, [100.0, 100.0])).await;
    let finished = h.send(report("CANCELED", 3, 4.0, 0, [98.0, 100.0])).await;
    assert!(matches!(finished, Transition::Finished { status: JobStatus::Cancelled, .. }));
    let kinds = h.event_kinds();
    assert!(kinds.contains(&EventKind::JobAborted));
    assert!(kinds.contains(&EventKind::JobNoSpool));
    // Length is still known from the remaining percent
    assert!(!kinds.contains(&EventKind::JobNoTracking));
}

#[tokio::test]
async fn test_no_tracking_without_any_signal() {
    let h = Harness::new();
    let bare = |state: &str| json!({"print": {"gcode_state": state, "mc_percent": 50, "layer_num": 3}});
    h.send(bare("RUNNING")).await;
    let state = h.tracker.registry().get(DEVICE).await.unwrap();
    assert!(state.fallback_warned);
    h.send(bare("FAILED")).await;

    let jobs = h.ledger.jobs().await;
    let job = &jobs[0];
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.used_length_mm, None);
    assert_eq!(job.used_mass_g, None);
    assert_eq!(h.event_kinds(), vec![EventKind::JobFailed, EventKind::JobNoSpool, EventKind::JobNoTracking]);
}

fn moonraker(state: &str, progress: f64, filament_used: f64) -> Value {
    json!({"jsonrpc": "2.0", "result": {"status": {
        "print_stats": {"state": state, "filename": "cube.gcode", "filament_used": filament_used},
        "display_status": {"progress": progress}
    }}})
}

#[tokio::test]
async fn test_counter_tracking_skips_priming() {
    let h = Harness::new();
    let id = job_id(&h.send(moonraker("printing", 0.0, 0.0)).await);
    h.send(moonraker("printing", 0.005, 150.0)).await;
    assert!(!h.tracker.registry().get(DEVICE).await.unwrap().tracking_started);

    h.send(moonraker("printing", 0.02, 400.0)).await;
    let state = h.tracker.registry().get(DEVICE).await.unwrap();
    assert!(state.tracking_started);
    assert_eq!(state.counter_baseline, Some(400.0));

    h.send(moonraker("printing", 0.5, 5_400.0)).await;
    // A counter going backwards is ignored
    h.send(moonraker("printing", 0.55, 5_000.0)).await;
    assert_eq!(h.tracker.registry().get(DEVICE).await.unwrap().last_counter, Some(5_400.0));

    h.send(moonraker("complete", 1.0, 10_400.0)).await;
    let job = h.ledger.job(&id).await.unwrap();
    assert_eq!(job.name, "cube.gcode");
    assert_eq!(job.status, JobStatus::Completed);
    assert!((job.used_length_mm.unwrap() - 10_000.0).abs() < 1e-6);
    assert_eq!(job.used_mass_g, None);
    assert_eq!(h.event_kinds(), vec![EventKind::JobNoSpool]);
}

#[tokio::test]
async fn test_fallback_then_counter_carries_length() {
    let h = Harness::new();
    h.ledger.add_spool(DEVICE, 0, 1000.0, 200.0).await;
    let id = job_id(&h.send(report("RUNNING", 0, 0.0, 0, [100.0, 100.0])).await);
    h.send(report("RUNNING", 2, 5.0, 0, [95.0, 100.0])).await;

    let mut with_counter = report("RUNNING", 3, 6.0, 0, [95.0, 100.0]);
    with_counter["print"]["filament_used_mm"] = json!(1_000.0);
    h.send(with_counter).await;
    let state = h.tracker.registry().get(DEVICE).await.unwrap();
    assert!(!state.using_fallback);
    assert_eq!(state.counter_baseline, Some(1_000.0));

    let mut finish = report("FINISH", 200, 100.0, 0, [90.0, 100.0]);
    finish["print"]["filament_used_mm"] = json!(4_000.0);
    h.send(finish).await;

    let job = h.ledger.job(&id).await.unwrap();
    // 5% of 100 m before the counter appeared, then 3 m counted
    assert!((job.used_length_mm.unwrap() - 8_000.0).abs() < 1e-6);
    assert!((job.used_mass_g.unwrap() - 80.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_orphaned_open_job_is_failed() {
    let h = Harness::new();
    let orphan = h.ledger.seed_open_job(DEVICE, "leftover", Utc::now() - Duration::hours(1)).await;
    let new = job_id(&h.send(report("RUNNING", 10, 30.0, 0, [100.0, 100.0])).await);
    assert_ne!(orphan, new);
    assert_eq!(h.ledger.job(&orphan).await.unwrap().status, JobStatus::Failed);
    assert_eq!(h.notifier.events()[0].job_name, "leftover");
}

#[tokio::test]
async fn test_multiple_open_jobs_keep_oldest() {
    let h = Harness::new();
    let oldest = h.ledger.seed_open_job(DEVICE, "first", Utc::now() - Duration::hours(3)).await;
    let newer = h.ledger.seed_open_job(DEVICE, "second", Utc::now() - Duration::hours(1)).await;
    let record = JobSnapshotRecord {
        job_id: oldest.clone(),
        job_name: "first".into(),
        started_at: Utc::now() - Duration::hours(3),
        last_layer: Some(5),
        last_progress: Some(40.0),
        counter_baseline: None,
        last_counter: None,
        tracking_started: true,
        using_fallback: true,
        fallback_warned: false,
        open_slot: None,
        usage: Vec::new(),
    };
    h.store().save(DEVICE, &record).unwrap();

    let resumed = h.send(report("RUNNING", 6, 42.0, 0, [100.0, 100.0])).await;
    assert_eq!(resumed, Transition::Resumed { job_id: oldest.clone() });
    assert_eq!(h.ledger.job(&newer).await.unwrap().status, JobStatus::Failed);
    assert_eq!(h.ledger.job(&oldest).await.unwrap().status, JobStatus::Running);
}

#[tokio::test]
async fn test_stale_open_job_is_not_resumed() {
    let h = Harness::new();
    let started_at = Utc::now() - Duration::hours(72);
    let stale = h.ledger.seed_open_job(DEVICE, "weekend", started_at).await;
    let record = JobSnapshotRecord {
        job_id: stale.clone(),
        job_name: "weekend".into(),
        started_at,
        last_layer: Some(5),
        last_progress: Some(40.0),
        counter_baseline: None,
        last_counter: None,
        tracking_started: true,
        using_fallback: true,
        fallback_warned: false,
        open_slot: None,
        usage: Vec::new(),
    };
    h.store().save(DEVICE, &record).unwrap();

    let started = h.send(report("RUNNING", 6, 42.0, 0, [100.0, 100.0])).await;
    assert!(matches!(started, Transition::Started { .. }));
    assert_eq!(h.ledger.job(&stale).await.unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_snapshot_without_open_job_is_discarded() {
    let h = Harness::new();
    let ghost = JobSnapshotRecord {
        job_id: "ghost".into(),
        job_name: "ghost".into(),
        started_at: Utc::now(),
        last_layer: Some(50),
        last_progress: Some(80.0),
        counter_baseline: None,
        last_counter: None,
        tracking_started: true,
        using_fallback: true,
        fallback_warned: false,
        open_slot: None,
        usage: Vec::new(),
    };
    h.store().save(DEVICE, &ghost).unwrap();

    let id = job_id(&h.send(report("RUNNING", 1, 1.0, 0, [100.0, 100.0])).await);
    assert_eq!(h.store().load(DEVICE).unwrap().job_id, id);
    assert!(h.notifier.events().is_empty());
}

#[tokio::test]
async fn test_unclassified_state_changes_nothing() {
    let h = Harness::new();
    assert_eq!(h.send(report("IDLE", 0, 0.0, 0, [100.0, 100.0])).await, Transition::None);
    assert!(h.ledger.jobs().await.is_empty());

    let id = job_id(&h.send(report("RUNNING", 1, 1.0, 0, [100.0, 100.0])).await);
    assert_eq!(h.send(report("OFFLINE", 1, 1.0, 0, [100.0, 100.0])).await, Transition::None);
    assert_eq!(h.tracker.registry().job_id(DEVICE).await, Some(id));
}

#[tokio::test]
async fn test_ledger_fault_drops_only_that_device() {
    let dir = tempdir().unwrap();
    let ledger = Arc::new(MemoryLedger::new());
    let notifier = Arc::new(MemoryNotifier::new());
    let registry = Arc::new(RuntimeRegistry::new());
    let config = TrackerConfig { snapshot_path: dir.path().join("s.json"), ..TrackerConfig::default() };
    let tracker = JobTracker::with_registry(
        config.clone(),
        ledger.clone(),
        notifier,
        SnapshotStore::new(&config.snapshot_path),
        registry.clone(),
    );

    let a = tracker.handle_telemetry("printer-a", &report("RUNNING", 5, 40.0, 0, [100.0, 100.0]), None).await;
    let b = tracker.handle_telemetry("printer-b", &report("RUNNING", 5, 40.0, 0, [100.0, 100.0]), None).await;
    let (job_a, job_b) = (job_id(&a.transition), job_id(&b.transition));

    ledger.set_failing(true);
    let faulted = tracker.handle_telemetry("printer-a", &report("FINISH", 200, 100.0, 0, [90.0, 100.0]), None).await;
    assert!(matches!(faulted.transition, Transition::Faulted { .. }));
    // The snapshot is still produced for a faulting transition
    assert_eq!(faulted.snapshot.state.as_deref(), Some("FINISH"));
    assert!(registry.job_id("printer-a").await.is_none());
    assert_eq!(registry.job_id("printer-b").await, Some(job_b.clone()));
    ledger.set_failing(false);

    let b = tracker.handle_telemetry("printer-b", &report("RUNNING", 6, 45.0, 0, [99.0, 100.0]), None).await;
    assert_eq!(b.transition, Transition::Updated { job_id: job_b });

    let a = tracker.handle_telemetry("printer-a", &report("RUNNING", 7, 50.0, 0, [95.0, 100.0]), None).await;
    assert_eq!(a.transition, Transition::Resumed { job_id: job_a });
}

/// Report with the AMS present but nothing loaded, as while preparing.
fn unloaded(state: &str) -> Value {
    let mut r = report(state, 0, 0.0, 0, [100.0, 100.0]);
    r["print"]["ams"]["tray_now"] = json!("255");
    r["print"]["ams"]["tray_tar"] = json!("255");
    r
}

#[tokio::test]
async fn test_job_waits_for_first_loaded_slot() {
    let h = Harness::new();
    let external = h.ledger.add_spool(DEVICE, EXTERNAL_SLOT, 1000.0, 200.0).await;
    let spool = h.ledger.add_spool(DEVICE, 0, 1000.0, 200.0).await;

    let id = job_id(&h.send(unloaded("PREPARE")).await);
    let state = h.tracker.registry().get(DEVICE).await.unwrap();
    assert_eq!(state.active_slot(), None);
    assert!(!state.fallback_warned);
    assert_eq!(h.ledger.job(&id).await.unwrap().spool_id, None);

    h.send(report("RUNNING", 1, 1.0, 0, [100.0, 100.0])).await;
    h.send(report("RUNNING", 100, 50.0, 0, [95.0, 100.0])).await;
    h.send(report("FINISH", 200, 100.0, 0, [90.0, 100.0])).await;

    let job = h.ledger.job(&id).await.unwrap();
    assert_eq!(job.spool_id.as_deref(), Some(spool.as_str()));
    assert_eq!(job.usage.len(), 1);
    assert_eq!(job.usage[0].slot, 0);
    assert!((job.used_length_mm.unwrap() - 10_000.0).abs() < 1e-6);
    assert!((job.used_mass_g.unwrap() - 80.0).abs() < 1e-6);
    assert_eq!(h.ledger.spool(&external).await.unwrap().consumed_g, 0.0);
    assert!(h.notifier.events().is_empty());
}

#[tokio::test]
async fn test_device_without_ams_uses_external_holder() {
    let h = Harness::new();
    let external = h.ledger.add_spool(DEVICE, EXTERNAL_SLOT, 1000.0, 200.0).await;
    let id = job_id(&h.send(json!({"print": {"gcode_state": "RUNNING", "mc_percent": 1, "tray_now": "255"}})).await);
    let state = h.tracker.registry().get(DEVICE).await.unwrap();
    assert_eq!(state.active_slot(), Some(EXTERNAL_SLOT));
    assert_eq!(h.ledger.job(&id).await.unwrap().spool_id.as_deref(), Some(external.as_str()));
}

/// Same report with the total length of tray 1 missing.
fn report_without_len(state: &str, layer: u32, percent: f64, slot: u32, remains: [f64; 2]) -> Value {
    let mut r = report(state, layer, percent, slot, remains);
    if let Some(tray) = r["print"]["ams"]["ams"][0]["tray"][1].as_object_mut() {
        tray.remove("total_len");
    }
    r
}

#[tokio::test]
async fn test_unknown_slot_length_makes_job_length_unavailable() {
    let h = Harness::new();
    h.ledger.add_spool(DEVICE, 0, 1000.0, 200.0).await;
    h.ledger.add_spool(DEVICE, 1, 500.0, 100.0).await;

    let id = job_id(&h.send(report_without_len("RUNNING", 1, 5.0, 0, [100.0, 100.0])).await);
    h.send(report_without_len("RUNNING", 10, 20.0, 0, [90.0, 100.0])).await;
    h.send(report_without_len("CHANGING_FILAMENT", 11, 21.0, 1, [90.0, 100.0])).await;
    assert!(h.tracker.registry().get(DEVICE).await.unwrap().fallback_warned);
    h.send(report_without_len("RUNNING", 50, 60.0, 1, [90.0, 80.0])).await;
    h.send(report_without_len("FINISH", 200, 100.0, 1, [90.0, 80.0])).await;

    let job = h.ledger.job(&id).await.unwrap();
    assert_eq!(job.used_length_mm, None);
    assert_eq!(job.usage[0].used_length_mm.map(f64::round), Some(10_000.0));
    assert_eq!(job.usage[1].used_length_mm, None);
    // A: 10% of 800 g, B: 20% of 400 g
    assert!((job.used_mass_g.unwrap() - 160.0).abs() < 1e-6);
    assert!(!h.event_kinds().contains(&EventKind::JobNoTracking));
}

#[tokio::test]
async fn test_out_of_range_staleness_still_starts_jobs() {
    let dir = tempdir().unwrap();
    let config = TrackerConfig {
        snapshot_path: dir.path().join("s.json"),
        staleness_hours: 1e15,
        ..TrackerConfig::default()
    };
    let store = SnapshotStore::new(&config.snapshot_path);
    let tracker = JobTracker::new(config, Arc::new(MemoryLedger::new()), Arc::new(MemoryNotifier::new()), store);

    let outcome = tracker.handle_telemetry(DEVICE, &report("RUNNING", 1, 1.0, 0, [100.0, 100.0]), None).await;
    assert!(matches!(outcome.transition, Transition::Started { .. }));
}

/// Ledger whose job creation panics.
struct PanickingLedger;

#[async_trait]
impl JobLedger for PanickingLedger {
    async fn open_jobs(&self, _device_id: &str) -> Result<Vec<OpenJob>, LedgerError> {
        Ok(Vec::new())
    }
    async fn create_job(&self, _job: NewJob) -> Result<String, LedgerError> {
        panic!("database driver exploded")
    }
    async fn set_job_spool(&self, _job_id: &str, _spool_id: Option<&str>) -> Result<(), LedgerError> {
        Ok(())
    }
    async fn finalize_job(&self, _job_id: &str, _f: &JobFinalization) -> Result<(), LedgerError> {
        Ok(())
    }
    async fn find_spool(&self, _device_id: &str, _slot: u32) -> Result<Option<SpoolRef>, LedgerError> {
        Ok(None)
    }
    async fn decrement_spool(&self, _spool_id: &str, _grams: f64) -> Result<(), LedgerError> {
        Ok(())
    }
    async fn mark_spool_empty(&self, _spool_id: &str) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_panicking_collaborator_is_contained() {
    let dir = tempdir().unwrap();
    let config = TrackerConfig { snapshot_path: dir.path().join("s.json"), ..TrackerConfig::default() };
    let store = SnapshotStore::new(&config.snapshot_path);
    let tracker = JobTracker::new(config, Arc::new(PanickingLedger), Arc::new(MemoryNotifier::new()), store);

    let outcome = tracker.handle_telemetry(DEVICE, &report("RUNNING", 1, 1.0, 0, [100.0, 100.0]), None).await;
    match outcome.transition {
        Transition::Faulted { error } => assert!(error.contains("database driver exploded")),
        other => panic!("expected fault, got {other:?}"),
    }
    assert!(tracker.registry().is_empty().await);
}
