//! In-memory per-device job state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use printwatch_shared::{JobSnapshotRecord, SlotBaseline, SlotUsage, SpoolRef, Tray};
use tokio::sync::Mutex;

use crate::consumption::{self, LengthStrategy};

/// Live state of one running job. Owned by exactly one handler at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRuntimeState {
    pub job_id: String,
    pub job_name: String,
    pub device_id: String,
    pub started_at: DateTime<Utc>,
    pub last_layer: Option<u32>,
    pub last_progress: Option<f64>,
    pub open_slot: Option<SlotBaseline>,
    /// Finalized slot periods, oldest first.
    pub usage: Vec<SlotUsage>,
    /// Counter value when tracking started.
    pub counter_baseline: Option<f64>,
    /// Last accepted counter value.
    pub last_counter: Option<f64>,
    pub tracking_started: bool,
    pub using_fallback: bool,
    pub fallback_warned: bool,
}

impl JobRuntimeState {
    pub fn new(job_id: String, job_name: String, device_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            job_name,
            device_id,
            started_at,
            last_layer: None,
            last_progress: None,
            open_slot: None,
            usage: Vec::new(),
            counter_baseline: None,
            last_counter: None,
            tracking_started: false,
            using_fallback: true,
            fallback_warned: false,
        }
    }

    pub fn from_record(device_id: &str, record: JobSnapshotRecord) -> Self {
        Self {
            job_id: record.job_id,
            job_name: record.job_name,
            device_id: device_id.to_string(),
            started_at: record.started_at,
            last_layer: record.last_layer,
            last_progress: record.last_progress,
            open_slot: record.open_slot,
            usage: record.usage,
            counter_baseline: record.counter_baseline,
            last_counter: record.last_counter.or(record.counter_baseline),
            tracking_started: record.tracking_started,
            using_fallback: record.using_fallback,
            fallback_warned: record.fallback_warned,
        }
    }

    pub fn to_record(&self) -> JobSnapshotRecord {
        JobSnapshotRecord {
            job_id: self.job_id.clone(),
            job_name: self.job_name.clone(),
            started_at: self.started_at,
            last_layer: self.last_layer,
            last_progress: self.last_progress,
            counter_baseline: self.counter_baseline,
            last_counter: self.last_counter,
            tracking_started: self.tracking_started,
            using_fallback: self.using_fallback,
            fallback_warned: self.fallback_warned,
            open_slot: self.open_slot.clone(),
            usage: self.usage.clone(),
        }
    }

    pub fn strategy(&self) -> LengthStrategy {
        if self.using_fallback {
            LengthStrategy::RemainPercent
        } else {
            LengthStrategy::Counter
        }
    }

    pub fn active_slot(&self) -> Option<u32> {
        self.open_slot.as_ref().map(|s| s.slot)
    }

    /// Usage of the open slot as of the last accepted readings.
    pub fn open_usage(&self) -> Option<SlotUsage> {
        self.open_slot
            .as_ref()
            .map(|slot| consumption::open_slot_usage(slot, self.strategy(), self.last_counter))
    }

    /// Close the open slot and append its usage to the finalized records.
    pub fn close_open_slot(&mut self) -> Option<SlotUsage> {
        let usage = self.open_usage()?;
        self.open_slot = None;
        self.usage.push(usage.clone());
        Some(usage)
    }
}

/// Fresh baselines for a slot that just became active.
pub fn seed_slot(slot: u32, tray: Option<&Tray>, spool: Option<SpoolRef>, counter_start: Option<f64>) -> SlotBaseline {
    let remain = tray.and_then(|t| t.remain_percent);
    SlotBaseline {
        slot,
        spool,
        start_remain: remain,
        last_remain: remain,
        total_length_mm: tray.and_then(|t| t.total_length_mm),
        counter_start,
        length_carry_mm: 0.0,
    }
}

/// Device identity → running job. Locked only for insert/remove, never while a
/// transition is being processed.
#[derive(Debug, Default)]
pub struct RuntimeRegistry {
    jobs: Mutex<HashMap<String, JobRuntimeState>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return the entry for `device_id`.
    pub async fn take(&self, device_id: &str) -> Option<JobRuntimeState> {
        self.jobs.lock().await.remove(device_id)
    }

    pub async fn put(&self, state: JobRuntimeState) {
        self.jobs.lock().await.insert(state.device_id.clone(), state);
    }

    pub async fn job_id(&self, device_id: &str) -> Option<String> {
        self.jobs.lock().await.get(device_id).map(|s| s.job_id.clone())
    }

    pub async fn get(&self, device_id: &str) -> Option<JobRuntimeState> {
        self.jobs.lock().await.get(device_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}
