use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger-facing job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Error,
    Exception,
    Aborted,
    Cancelled,
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
            JobStatus::Exception => "exception",
            JobStatus::Aborted => "aborted",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    /// Failed, error or exception.
    pub fn is_failure(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Error | JobStatus::Exception)
    }

    /// Aborted, cancelled or stopped by the user.
    pub fn is_abort(&self) -> bool {
        matches!(self, JobStatus::Aborted | JobStatus::Cancelled | JobStatus::Stopped)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spool attached to a slot, as known by the external ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpoolRef {
    pub id: String,
    /// Gross weight of a full spool in grams.
    pub full_weight_g: Option<f64>,
    /// Weight of the empty spool core in grams.
    pub empty_weight_g: Option<f64>,
}

impl SpoolRef {
    /// Net filament weight of a full spool, if both weights are known and sane.
    pub fn net_weight_g(&self) -> Option<f64> {
        match (self.full_weight_g, self.empty_weight_g) {
            (Some(full), Some(empty)) if full > empty => Some(full - empty),
            _ => None,
        }
    }
}

/// Baselines of the slot currently feeding the extruder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotBaseline {
    pub slot: u32,
    pub spool: Option<SpoolRef>,
    /// Remaining percent when the slot became active.
    pub start_remain: Option<f64>,
    /// Last accepted remaining percent (ratcheted).
    pub last_remain: Option<f64>,
    pub total_length_mm: Option<f64>,
    /// Absolute counter value when this slot started counting.
    pub counter_start: Option<f64>,
    /// Length accounted by the fallback strategy before the counter appeared.
    #[serde(default)]
    pub length_carry_mm: f64,
}

/// Finalized consumption of one slot period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotUsage {
    pub slot: u32,
    pub spool_id: Option<String>,
    /// `None` when length could not be attributed.
    pub used_length_mm: Option<f64>,
    pub used_mass_g: Option<f64>,
    /// Last accepted remaining percent at finalization.
    pub end_remain: Option<f64>,
}

/// Persisted continuity hint for an in-flight job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshotRecord {
    pub job_id: String,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub last_layer: Option<u32>,
    pub last_progress: Option<f64>,
    pub counter_baseline: Option<f64>,
    #[serde(default)]
    pub last_counter: Option<f64>,
    #[serde(default)]
    pub tracking_started: bool,
    #[serde(default)]
    pub using_fallback: bool,
    #[serde(default)]
    pub fallback_warned: bool,
    #[serde(default)]
    pub open_slot: Option<SlotBaseline>,
    #[serde(default)]
    pub usage: Vec<SlotUsage>,
}
