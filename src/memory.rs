//! In-memory collaborators: a complete [`JobLedger`] without persistence and a recording
//! [`Notifier`]. Used by the replay command and by tests.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use printwatch_shared::{JobStatus, SlotUsage, SpoolRef};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::tracker::{JobEvent, JobFinalization, JobLedger, LedgerError, NewJob, Notifier, OpenJob};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: String,
    pub device_id: String,
    pub name: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub spool_id: Option<String>,
    pub used_length_mm: Option<f64>,
    pub used_mass_g: Option<f64>,
    pub usage: Vec<SlotUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpoolRecord {
    pub id: String,
    pub device_id: String,
    pub slot: u32,
    pub full_weight_g: Option<f64>,
    pub empty_weight_g: Option<f64>,
    /// Grams taken off the spool by finished jobs.
    pub consumed_g: f64,
    pub empty: bool,
}

impl SpoolRecord {
    fn to_ref(&self) -> SpoolRef {
        SpoolRef {
            id: self.id.clone(),
            full_weight_g: self.full_weight_g,
            empty_weight_g: self.empty_weight_g,
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    jobs: HashMap<String, JobRecord>,
    spools: HashMap<String, SpoolRecord>,
}

/// Ledger kept entirely in memory. `set_failing(true)` makes every call fail with
/// [`LedgerError::Backend`].
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    failing: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Assign a spool to a device slot and return its id.
    pub async fn add_spool(&self, device_id: &str, slot: u32, full_weight_g: f64, empty_weight_g: f64) -> String {
        let id = Uuid::new_v4().to_string();
        let spool = SpoolRecord {
            id: id.clone(),
            device_id: device_id.to_string(),
            slot,
            full_weight_g: Some(full_weight_g),
            empty_weight_g: Some(empty_weight_g),
            consumed_g: 0.0,
            empty: false,
        };
        self.state.lock().await.spools.insert(id.clone(), spool);
        id
    }

    /// Insert a job that is already running, as if left over from an earlier process.
    pub async fn seed_open_job(&self, device_id: &str, name: &str, started_at: DateTime<Utc>) -> String {
        let id = Uuid::new_v4().to_string();
        let job = JobRecord {
            id: id.clone(),
            device_id: device_id.to_string(),
            name: name.to_string(),
            status: JobStatus::Running,
            started_at,
            finished_at: None,
            spool_id: None,
            used_length_mm: None,
            used_mass_g: None,
            usage: Vec::new(),
        };
        self.state.lock().await.jobs.insert(id.clone(), job);
        id
    }

    pub async fn job(&self, job_id: &str) -> Option<JobRecord> {
        self.state.lock().await.jobs.get(job_id).cloned()
    }

    /// Every job, oldest first.
    pub async fn jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.state.lock().await.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub async fn spool(&self, spool_id: &str) -> Option<SpoolRecord> {
        self.state.lock().await.spools.get(spool_id).cloned()
    }

    fn check(&self) -> Result<(), LedgerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LedgerError::Backend("ledger unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobLedger for MemoryLedger {
    async fn open_jobs(&self, device_id: &str) -> Result<Vec<OpenJob>, LedgerError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .values()
            .filter(|j| j.device_id == device_id && j.status == JobStatus::Running)
            .map(|j| OpenJob {
                id: j.id.clone(),
                name: j.name.clone(),
                device_id: j.device_id.clone(),
                started_at: j.started_at,
                spool_id: j.spool_id.clone(),
            })
            .collect())
    }

    async fn create_job(&self, job: NewJob) -> Result<String, LedgerError> {
        self.check()?;
        let id = Uuid::new_v4().to_string();
        let record = JobRecord {
            id: id.clone(),
            device_id: job.device_id,
            name: job.name,
            status: JobStatus::Running,
            started_at: job.started_at,
            finished_at: None,
            spool_id: job.spool_id,
            used_length_mm: None,
            used_mass_g: None,
            usage: Vec::new(),
        };
        self.state.lock().await.jobs.insert(id.clone(), record);
        Ok(id)
    }

    async fn set_job_spool(&self, job_id: &str, spool_id: Option<&str>) -> Result<(), LedgerError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let job = state.jobs.get_mut(job_id).ok_or_else(|| LedgerError::NotFound(format!("job {job_id}")))?;
        job.spool_id = spool_id.map(str::to_string);
        Ok(())
    }

    async fn finalize_job(&self, job_id: &str, finalization: &JobFinalization) -> Result<(), LedgerError> {
        self.check()?;
        if !finalization.status.is_terminal() {
            return Err(LedgerError::Rejected(format!("job {job_id} cannot be finalized as running")));
        }
        let negative = |v: Option<f64>| v.is_some_and(|v| v < 0.0);
        if negative(finalization.used_length_mm) || negative(finalization.used_mass_g) {
            return Err(LedgerError::Rejected(format!("job {job_id}: negative consumption")));
        }

        let mut state = self.state.lock().await;
        let job = state.jobs.get_mut(job_id).ok_or_else(|| LedgerError::NotFound(format!("job {job_id}")))?;
        if job.status.is_terminal() {
            return Err(LedgerError::Rejected(format!("job {job_id} already {}", job.status)));
        }
        job.status = finalization.status;
        job.used_length_mm = finalization.used_length_mm;
        job.used_mass_g = finalization.used_mass_g;
        job.finished_at = Some(finalization.finished_at);
        job.usage = finalization.usage.clone();
        if finalization.spool_id.is_some() {
            job.spool_id = finalization.spool_id.clone();
        }
        Ok(())
    }

    async fn find_spool(&self, device_id: &str, slot: u32) -> Result<Option<SpoolRef>, LedgerError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .spools
            .values()
            .find(|s| s.device_id == device_id && s.slot == slot && !s.empty)
            .map(SpoolRecord::to_ref))
    }

    async fn decrement_spool(&self, spool_id: &str, grams: f64) -> Result<(), LedgerError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let spool = state
            .spools
            .get_mut(spool_id)
            .ok_or_else(|| LedgerError::NotFound(format!("spool {spool_id}")))?;
        spool.consumed_g += grams.max(0.0);
        Ok(())
    }

    async fn mark_spool_empty(&self, spool_id: &str) -> Result<(), LedgerError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let spool = state
            .spools
            .get_mut(spool_id)
            .ok_or_else(|| LedgerError::NotFound(format!("spool {spool_id}")))?;
        spool.empty = true;
        Ok(())
    }
}

/// Records every event for later inspection.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    events: StdMutex<Vec<JobEvent>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, event: JobEvent) {
        tracing::debug!(event = event.kind.as_str(), job = %event.job_name, "Recorded notification");
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
