//! User-facing job notifications.

use printwatch_shared::JobStatus;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobFailed,
    JobAborted,
    JobNoTracking,
    JobNoSpool,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::JobFailed => "job_failed",
            EventKind::JobAborted => "job_aborted",
            EventKind::JobNoTracking => "job_no_tracking",
            EventKind::JobNoSpool => "job_no_spool",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobEvent {
    pub kind: EventKind,
    pub job_name: String,
    pub device_name: String,
    pub status: JobStatus,
}

/// Fire-and-forget event sink. Implementations must not block or fail the caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: JobEvent);
}

/// Emits every event as a tracing record.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: JobEvent) {
        tracing::warn!(
            event = event.kind.as_str(),
            device = %event.device_name,
            job = %event.job_name,
            status = %event.status,
            "Job notification"
        );
    }
}
