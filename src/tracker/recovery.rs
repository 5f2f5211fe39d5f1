//! Restart recovery: deciding whether a printing device continues an open ledger job or
//! starts a new one.

use chrono::{DateTime, Duration, Utc};
use printwatch_shared::JobSnapshotRecord;
use std::fmt;

use super::ledger::OpenJob;

/// Why an open ledger job is being closed as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// Another, older open job exists for the same device.
    Duplicate,
    Stale,
    /// The device reports less progress than the snapshot: a new print started.
    Regressed,
    /// No snapshot describes this job.
    Orphaned,
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailReason::Duplicate => "duplicate open job",
            FailReason::Stale => "stale open job",
            FailReason::Regressed => "progress regressed",
            FailReason::Orphaned => "orphaned open job",
        };
        f.write_str(s)
    }
}

/// Progress observed in the telemetry that triggered the check.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Observed {
    pub layer: Option<u32>,
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecoveryPlan {
    /// Open job to continue with the persisted snapshot.
    pub resume: Option<OpenJob>,
    /// Open jobs to finalize as failed before anything else.
    pub fail: Vec<(OpenJob, FailReason)>,
}

/// Plan recovery from the persisted snapshot and the ledger's open jobs.
///
/// Only the oldest open job is a candidate. It is resumed when the snapshot belongs to it,
/// it is within the staleness bound, and the device has not gone backwards.
pub fn plan_recovery(
    snapshot: Option<&JobSnapshotRecord>,
    mut open_jobs: Vec<OpenJob>,
    observed: Observed,
    now: DateTime<Utc>,
    staleness: Duration,
) -> RecoveryPlan {
    let mut plan = RecoveryPlan::default();
    if open_jobs.is_empty() {
        return plan;
    }

    open_jobs.sort_by_key(|job| job.started_at);
    let mut jobs = open_jobs.into_iter();
    let Some(oldest) = jobs.next() else {
        return plan;
    };
    plan.fail.extend(jobs.map(|job| (job, FailReason::Duplicate)));

    let verdict = match snapshot.filter(|s| s.job_id == oldest.id) {
        None => Some(FailReason::Orphaned),
        Some(_) if now - oldest.started_at > staleness => Some(FailReason::Stale),
        Some(s) if regressed(s, observed) => Some(FailReason::Regressed),
        Some(_) => None,
    };

    match verdict {
        Some(reason) => plan.fail.push((oldest, reason)),
        None => plan.resume = Some(oldest),
    }
    plan
}

/// Observed position is behind the snapshot. Unknown values never count as regression,
/// and equal values are a resume.
fn regressed(snapshot: &JobSnapshotRecord, observed: Observed) -> bool {
    let layer_back = matches!((snapshot.last_layer, observed.layer), (Some(was), Some(now)) if now < was);
    let progress_back = matches!((snapshot.last_progress, observed.progress), (Some(was), Some(now)) if now < was);
    layer_back || progress_back
}
