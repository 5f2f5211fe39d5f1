//! External job/spool ledger interface.
//!
//! The tracker never stores jobs or spools itself; it drives an implementation of
//! [`JobLedger`] (a database-backed service in production, [`crate::memory::MemoryLedger`]
//! for replay and tests).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use printwatch_shared::{JobStatus, SlotUsage, SpoolRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rejected by ledger: {0}")]
    Rejected(String),
    #[error("Ledger backend error: {0}")]
    Backend(String),
}

/// A job the ledger still considers running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenJob {
    pub id: String,
    pub name: String,
    pub device_id: String,
    pub started_at: DateTime<Utc>,
    pub spool_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub device_id: String,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub spool_id: Option<String>,
}

/// Final accounting written when a job leaves the running state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobFinalization {
    pub status: JobStatus,
    /// `None` when no length could be attributed.
    pub used_length_mm: Option<f64>,
    pub used_mass_g: Option<f64>,
    pub spool_id: Option<String>,
    pub finished_at: DateTime<Utc>,
    pub usage: Vec<SlotUsage>,
}

impl JobFinalization {
    /// Failure with nothing accounted, for jobs whose history is unknown.
    pub fn failed_unaccounted(spool_id: Option<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            used_length_mm: None,
            used_mass_g: None,
            spool_id,
            finished_at: Utc::now(),
            usage: Vec::new(),
        }
    }
}

#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Jobs for `device_id` still marked running.
    async fn open_jobs(&self, device_id: &str) -> Result<Vec<OpenJob>, LedgerError>;
    /// Create a running job and return its id.
    async fn create_job(&self, job: NewJob) -> Result<String, LedgerError>;
    async fn set_job_spool(&self, job_id: &str, spool_id: Option<&str>) -> Result<(), LedgerError>;
    async fn finalize_job(&self, job_id: &str, finalization: &JobFinalization) -> Result<(), LedgerError>;
    /// Spool currently assigned to a device slot.
    async fn find_spool(&self, device_id: &str, slot: u32) -> Result<Option<SpoolRef>, LedgerError>;
    async fn decrement_spool(&self, spool_id: &str, grams: f64) -> Result<(), LedgerError>;
    async fn mark_spool_empty(&self, spool_id: &str) -> Result<(), LedgerError>;
}
