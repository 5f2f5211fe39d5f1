//! Per-device print job lifecycle.
//!
//! [`JobTracker::handle_telemetry`] is the single entry point. Each report is normalized,
//! its state string classified, and the device's job moved through
//! IDLE → RUNNING → terminal. Consumption is accounted per slot while running and written
//! to the [`JobLedger`] at the end.
//!
//! Reports for one device identity must arrive one at a time; the transport serializes
//! them. Different devices may be handled concurrently.

pub mod classify;
pub mod ledger;
pub mod notify;
pub mod recovery;
pub mod runtime;

pub use classify::{StateClass, classify};
pub use ledger::{JobFinalization, JobLedger, LedgerError, NewJob, OpenJob};
pub use notify::{EventKind, JobEvent, LogNotifier, Notifier};
pub use recovery::{FailReason, Observed, RecoveryPlan, plan_recovery};
pub use runtime::{JobRuntimeState, RuntimeRegistry};

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use printwatch_shared::{DeviceSnapshot, EXTERNAL_SLOT, JobSnapshotRecord, JobStatus};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::TrackerConfig;
use crate::consumption::{self, Ratchet, ratchet_down, ratchet_up};
use crate::snapshot_store::SnapshotStore;
use crate::telemetry::{find_tray, loaded_slot, normalize};
use runtime::seed_slot;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Transition panicked: {0}")]
    Panicked(String),
}

/// What a telemetry report did to the device's job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    None,
    Started { job_id: String },
    Resumed { job_id: String },
    Updated { job_id: String },
    Finished { job_id: String, status: JobStatus },
    /// The transition failed and the device's in-memory job was dropped.
    Faulted { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryOutcome {
    pub snapshot: DeviceSnapshot,
    pub transition: Transition,
}

pub struct JobTracker {
    config: TrackerConfig,
    ledger: Arc<dyn JobLedger>,
    notifier: Arc<dyn Notifier>,
    store: SnapshotStore,
    registry: Arc<RuntimeRegistry>,
}

impl JobTracker {
    pub fn new(
        config: TrackerConfig,
        ledger: Arc<dyn JobLedger>,
        notifier: Arc<dyn Notifier>,
        store: SnapshotStore,
    ) -> Self {
        Self::with_registry(config, ledger, notifier, store, Arc::new(RuntimeRegistry::new()))
    }

    pub fn with_registry(
        config: TrackerConfig,
        ledger: Arc<dyn JobLedger>,
        notifier: Arc<dyn Notifier>,
        store: SnapshotStore,
        registry: Arc<RuntimeRegistry>,
    ) -> Self {
        Self { config, ledger, notifier, store, registry }
    }

    pub fn registry(&self) -> &Arc<RuntimeRegistry> {
        &self.registry
    }

    /// Process one telemetry report. Never fails: a faulting transition is logged and the
    /// device starts clean on its next report.
    pub async fn handle_telemetry(&self, device_id: &str, payload: &Value, model_hint: Option<&str>) -> TelemetryOutcome {
        let snapshot = normalize(payload, model_hint);
        let class = snapshot.state.as_deref().map(classify).unwrap_or(StateClass::Unclassified);
        let entry = self.registry.take(device_id).await;

        let result = match AssertUnwindSafe(self.transition(device_id, entry, &snapshot, class))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(TrackerError::Panicked(panic_message(panic.as_ref()))),
        };

        let transition = match result {
            Ok((Some(state), transition)) => {
                self.registry.put(state).await;
                transition
            }
            Ok((None, transition)) => transition,
            Err(e) => {
                tracing::error!(
                    device = device_id,
                    state = ?snapshot.state,
                    payload = %payload,
                    "Job transition failed, dropping runtime state: {}",
                    e
                );
                Transition::Faulted { error: e.to_string() }
            }
        };

        TelemetryOutcome { snapshot, transition }
    }

    async fn transition(
        &self,
        device_id: &str,
        entry: Option<JobRuntimeState>,
        snapshot: &DeviceSnapshot,
        class: StateClass,
    ) -> Result<(Option<JobRuntimeState>, Transition), TrackerError> {
        match (entry, class) {
            (None, StateClass::Printing) => {
                let (state, transition) = self.start_or_resume(device_id, snapshot).await?;
                Ok((Some(state), transition))
            }
            (None, _) => Ok((None, Transition::None)),
            (Some(mut state), StateClass::Printing) => {
                if self.update(&mut state, snapshot).await? {
                    self.persist(&state).await;
                }
                let job_id = state.job_id.clone();
                Ok((Some(state), Transition::Updated { job_id }))
            }
            (Some(mut state), StateClass::Terminal(status)) => {
                self.update(&mut state, snapshot).await?;
                let job_id = state.job_id.clone();
                self.finalize(state, status).await?;
                Ok((None, Transition::Finished { job_id, status }))
            }
            (Some(state), StateClass::Unclassified) => Ok((Some(state), Transition::None)),
        }
    }

    async fn start_or_resume(
        &self,
        device_id: &str,
        snapshot: &DeviceSnapshot,
    ) -> Result<(JobRuntimeState, Transition), TrackerError> {
        let record = self.load_snapshot(device_id).await;
        let open_jobs = self.ledger.open_jobs(device_id).await?;
        let observed = Observed { layer: snapshot.layer.current, progress: snapshot.progress };
        let plan = plan_recovery(record.as_ref(), open_jobs, observed, Utc::now(), self.config.staleness());

        let mut snapshot_consumed = false;
        for (job, reason) in plan.fail {
            tracing::warn!(device = device_id, job_id = %job.id, reason = %reason, "Closing open job as failed");
            let history = record.as_ref().filter(|r| r.job_id == job.id).cloned();
            snapshot_consumed |= history.is_some();
            self.fail_open_job(device_id, job, history).await?;
        }

        let resumable = plan
            .resume
            .and_then(|job| record.as_ref().filter(|r| r.job_id == job.id).cloned());
        if let Some(record) = resumable {
            let mut state = JobRuntimeState::from_record(device_id, record);
            tracing::info!(device = device_id, job_id = %state.job_id, "Resuming job after restart");
            self.update(&mut state, snapshot).await?;
            self.persist(&state).await;
            let job_id = state.job_id.clone();
            return Ok((state, Transition::Resumed { job_id }));
        }

        if let Some(stale) = record.as_ref().filter(|_| !snapshot_consumed) {
            tracing::info!(device = device_id, job_id = %stale.job_id, "Discarding snapshot without an open job");
            self.discard_snapshot(device_id).await;
        }

        let state = self.create_job(device_id, snapshot).await?;
        let job_id = state.job_id.clone();
        Ok((state, Transition::Started { job_id }))
    }

    async fn create_job(&self, device_id: &str, snapshot: &DeviceSnapshot) -> Result<JobRuntimeState, TrackerError> {
        let slot = start_slot(snapshot);
        let spool = match slot {
            Some(slot) => self.ledger.find_spool(device_id, slot).await?,
            None => None,
        };
        let name = snapshot
            .job
            .file
            .clone()
            .unwrap_or_else(|| format!("{} print", self.config.device_name(device_id)));
        let started_at = Utc::now();

        let job_id = self
            .ledger
            .create_job(NewJob {
                device_id: device_id.to_string(),
                name: name.clone(),
                started_at,
                spool_id: spool.as_ref().map(|s| s.id.clone()),
            })
            .await?;
        tracing::info!(device = device_id, job_id = %job_id, slot = ?slot, spool = ?spool.as_ref().map(|s| &s.id), "Job started: {}", name);

        let mut state = JobRuntimeState::new(job_id, name, device_id.to_string(), started_at);
        // With nothing loaded yet, the first reported slot opens the first period.
        state.open_slot = slot.map(|slot| {
            let tray = find_tray(&snapshot.ams_units, snapshot.external_tray.as_ref(), slot);
            seed_slot(slot, tray, spool, None)
        });
        state.using_fallback = snapshot.filament_used_mm.is_none();
        state.last_counter = snapshot.filament_used_mm;

        self.update(&mut state, snapshot).await?;
        self.persist(&state).await;
        Ok(state)
    }

    /// Fold one report into a running job. Returns `true` when the change is worth persisting.
    async fn update(&self, state: &mut JobRuntimeState, snapshot: &DeviceSnapshot) -> Result<bool, TrackerError> {
        let mut changed = false;

        if let Some(observed) = snapshot.filament_used_mm {
            changed |= self.observe_counter(state, observed);
        }

        if let Some(slot) = loaded_slot(snapshot.tray_now, snapshot.tray_target) {
            if state.active_slot() != Some(slot) {
                self.switch_slot(state, slot, snapshot).await?;
                changed = true;
            }
        }

        changed |= self.observe_remain(state, snapshot);

        if !state.tracking_started && self.config.threshold().reached(snapshot.layer.current, snapshot.progress) {
            state.tracking_started = true;
            if !state.using_fallback {
                state.counter_baseline = state.last_counter;
                if let Some(slot) = state.open_slot.as_mut() {
                    slot.counter_start = state.last_counter;
                }
            }
            tracing::info!(
                device = %state.device_id,
                job_id = %state.job_id,
                baseline = ?state.counter_baseline,
                "Consumption tracking started"
            );
            changed = true;
        }

        if state.using_fallback && !state.fallback_warned {
            let unknown_length = state.open_slot.as_ref().filter(|s| s.total_length_mm.is_none()).map(|s| s.slot);
            if let Some(slot) = unknown_length {
                tracing::warn!(
                    device = %state.device_id,
                    job_id = %state.job_id,
                    slot,
                    "No filament counter and slot total length unknown: used length unavailable"
                );
                state.fallback_warned = true;
                changed = true;
            }
        }

        if let Some(layer) = snapshot.layer.current.filter(|l| state.last_layer.is_none_or(|last| *l > last)) {
            state.last_layer = Some(layer);
            changed = true;
        }
        if let Some(progress) = snapshot.progress.filter(|p| state.last_progress.is_none_or(|last| *p > last)) {
            state.last_progress = Some(progress);
            changed = true;
        }

        Ok(changed)
    }

    fn observe_counter(&self, state: &mut JobRuntimeState, observed: f64) -> bool {
        match ratchet_up(state.last_counter, observed) {
            Ratchet::Rejected { kept, observed } => {
                tracing::warn!(
                    device = %state.device_id,
                    job_id = %state.job_id,
                    kept,
                    observed,
                    "Filament counter went backwards, keeping previous value"
                );
                false
            }
            Ratchet::Accepted(value) => {
                state.last_counter = Some(value);
                if state.using_fallback {
                    switch_to_counter(state, value);
                    return true;
                }
                false
            }
        }
    }

    fn observe_remain(&self, state: &mut JobRuntimeState, snapshot: &DeviceSnapshot) -> bool {
        let Some(slot) = state.open_slot.as_mut() else {
            return false;
        };
        let Some(observed) = find_tray(&snapshot.ams_units, snapshot.external_tray.as_ref(), slot.slot)
            .and_then(|tray| tray.remain_percent)
        else {
            return false;
        };

        if slot.start_remain.is_none() {
            slot.start_remain = Some(observed);
            slot.last_remain = Some(observed);
            return true;
        }

        match ratchet_down(slot.last_remain, observed) {
            Ratchet::Accepted(value) => {
                let moved = slot.last_remain != Some(value);
                slot.last_remain = Some(value);
                moved
            }
            Ratchet::Rejected { kept, observed } => {
                if observed - kept > self.config.ratchet_tolerance_percent {
                    tracing::warn!(
                        device = %state.device_id,
                        slot = slot.slot,
                        kept,
                        observed,
                        "Remaining percent increased mid-job, keeping previous value"
                    );
                } else {
                    tracing::debug!(device = %state.device_id, slot = slot.slot, kept, observed, "Ignoring remaining-percent jitter");
                }
                false
            }
        }
    }

    async fn switch_slot(&self, state: &mut JobRuntimeState, slot: u32, snapshot: &DeviceSnapshot) -> Result<(), TrackerError> {
        if let Some(closed) = state.close_open_slot() {
            tracing::info!(
                device = %state.device_id,
                job_id = %state.job_id,
                from = closed.slot,
                to = slot,
                used_length_mm = ?closed.used_length_mm,
                used_mass_g = ?closed.used_mass_g,
                "Active slot changed"
            );
        }

        let spool = self.ledger.find_spool(&state.device_id, slot).await?;
        if let Some(spool) = &spool {
            self.ledger.set_job_spool(&state.job_id, Some(&spool.id)).await?;
        }

        let counter_start = if state.tracking_started && !state.using_fallback {
            state.last_counter
        } else {
            None
        };
        let tray = find_tray(&snapshot.ams_units, snapshot.external_tray.as_ref(), slot);
        state.open_slot = Some(seed_slot(slot, tray, spool, counter_start));
        Ok(())
    }

    async fn finalize(&self, mut state: JobRuntimeState, status: JobStatus) -> Result<(), TrackerError> {
        state.close_open_slot();
        let totals = consumption::job_totals(&state.usage);
        let spool_id = state.usage.iter().find_map(|u| u.spool_id.clone());

        // A period with unknown length makes the job length unknown; the per-slot records
        // keep whatever was measured.
        let used_length_mm = if totals.length_incomplete {
            tracing::warn!(
                device = %state.device_id,
                job_id = %state.job_id,
                measured_mm = ?totals.length_mm,
                "Used length unknown for part of the job, reporting it as unavailable"
            );
            None
        } else {
            totals.length_mm
        };

        let finalization = JobFinalization {
            status,
            used_length_mm,
            used_mass_g: totals.mass_g,
            spool_id: spool_id.clone(),
            finished_at: Utc::now(),
            usage: state.usage.clone(),
        };
        self.ledger.finalize_job(&state.job_id, &finalization).await?;
        tracing::info!(
            device = %state.device_id,
            job_id = %state.job_id,
            status = %status,
            used_length_mm = ?used_length_mm,
            used_mass_g = ?totals.mass_g,
            "Job finished"
        );

        let mut last_remain: BTreeMap<&str, Option<f64>> = BTreeMap::new();
        for usage in &state.usage {
            let Some(id) = usage.spool_id.as_deref() else {
                continue;
            };
            if let Some(grams) = usage.used_mass_g.filter(|g| *g > 0.0) {
                self.ledger.decrement_spool(id, grams).await?;
            }
            last_remain.insert(id, usage.end_remain);
        }
        for (id, remain) in last_remain {
            if remain.is_some_and(|r| r <= 0.0) {
                tracing::info!(device = %state.device_id, spool = id, "Spool ran out, marking empty");
                self.ledger.mark_spool_empty(id).await?;
            }
        }

        if status.is_failure() {
            self.notify(EventKind::JobFailed, &state, status);
        } else if status.is_abort() {
            self.notify(EventKind::JobAborted, &state, status);
        }
        if spool_id.is_none() {
            self.notify(EventKind::JobNoSpool, &state, status);
        }
        if used_length_mm.is_none() && totals.mass_g.is_none() {
            self.notify(EventKind::JobNoTracking, &state, status);
        }

        self.discard_snapshot(&state.device_id).await;
        Ok(())
    }

    /// Close an open ledger job as failed during recovery, accounting whatever the
    /// snapshot recorded for it.
    async fn fail_open_job(
        &self,
        device_id: &str,
        job: OpenJob,
        history: Option<JobSnapshotRecord>,
    ) -> Result<(), TrackerError> {
        match history {
            Some(record) => self.finalize(JobRuntimeState::from_record(device_id, record), JobStatus::Failed).await,
            None => {
                let finalization = JobFinalization::failed_unaccounted(job.spool_id.clone());
                self.ledger.finalize_job(&job.id, &finalization).await?;
                self.notifier.notify(JobEvent {
                    kind: EventKind::JobFailed,
                    job_name: job.name,
                    device_name: self.config.device_name(device_id).to_string(),
                    status: JobStatus::Failed,
                });
                Ok(())
            }
        }
    }

    fn notify(&self, kind: EventKind, state: &JobRuntimeState, status: JobStatus) {
        self.notifier.notify(JobEvent {
            kind,
            job_name: state.job_name.clone(),
            device_name: self.config.device_name(&state.device_id).to_string(),
            status,
        });
    }

    // Snapshot file I/O runs on the blocking pool. Writes are advisory: a failure is
    // logged and never aborts a transition.
    async fn load_snapshot(&self, device_id: &str) -> Option<JobSnapshotRecord> {
        let store = self.store.clone();
        let device = device_id.to_string();
        match tokio::task::spawn_blocking(move || store.load(&device)).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(device = device_id, "Snapshot load task failed: {}", e);
                None
            }
        }
    }

    async fn persist(&self, state: &JobRuntimeState) {
        let store = self.store.clone();
        let device = state.device_id.clone();
        let record = state.to_record();
        match tokio::task::spawn_blocking(move || store.save(&device, &record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(device = %state.device_id, job_id = %state.job_id, "Failed to persist job snapshot: {}", e)
            }
            Err(e) => tracing::warn!(device = %state.device_id, "Snapshot save task failed: {}", e),
        }
    }

    async fn discard_snapshot(&self, device_id: &str) {
        let store = self.store.clone();
        let device = device_id.to_string();
        match tokio::task::spawn_blocking(move || store.delete(&device)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(device = device_id, "Failed to delete job snapshot: {}", e),
            Err(e) => tracing::warn!(device = device_id, "Snapshot delete task failed: {}", e),
        }
    }
}

/// Slot a new job starts on. A device without AMS units feeds from the external holder;
/// an AMS that reports nothing loaded (e.g. 255 while preparing) has no slot yet.
fn start_slot(snapshot: &DeviceSnapshot) -> Option<u32> {
    match loaded_slot(snapshot.tray_now, snapshot.tray_target) {
        Some(slot) => Some(slot),
        None if snapshot.ams_units.is_empty() => Some(EXTERNAL_SLOT),
        None => None,
    }
}

/// Move a job from remaining-percent to counter accounting, carrying what the open slot
/// has used so far.
fn switch_to_counter(state: &mut JobRuntimeState, counter: f64) {
    state.using_fallback = false;
    let counting = state.tracking_started;
    if counting {
        state.counter_baseline = Some(counter);
    }
    if let Some(slot) = state.open_slot.as_mut() {
        slot.length_carry_mm += consumption::fallback_length(slot).unwrap_or(0.0);
        slot.counter_start = counting.then_some(counter);
    }
    tracing::info!(
        device = %state.device_id,
        job_id = %state.job_id,
        counter,
        "Filament counter appeared, switching from remaining-percent accounting"
    );
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
