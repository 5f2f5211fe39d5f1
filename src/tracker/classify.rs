//! Device state string classification.

use printwatch_shared::JobStatus;

/// Which lifecycle set a device state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateClass {
    /// Printing or a transient sub-state (purge, calibration, filament change) that
    /// does not end the job.
    Printing,
    Terminal(JobStatus),
    Unclassified,
}

const PRINTING: &[&str] = &[
    "RUNNING",
    "PRINTING",
    "PREPARE",
    "SLICING",
    "PAUSE",
    "PAUSED",
    "PURGING",
    "CALIBRATING",
    "CHANGING_FILAMENT",
    "HEATING",
    "RESUMING",
];

/// Classify a raw state string, ignoring case and surrounding whitespace.
pub fn classify(state: &str) -> StateClass {
    let upper = state.trim().to_ascii_uppercase();
    if PRINTING.contains(&upper.as_str()) {
        return StateClass::Printing;
    }
    match terminal_status(&upper) {
        Some(status) => StateClass::Terminal(status),
        None => StateClass::Unclassified,
    }
}

fn terminal_status(upper: &str) -> Option<JobStatus> {
    let status = match upper {
        "FINISH" | "FINISHED" | "COMPLETE" | "COMPLETED" | "SUCCESS" => JobStatus::Completed,
        "FAILED" | "FAIL" => JobStatus::Failed,
        "ERROR" => JobStatus::Error,
        "EXCEPTION" => JobStatus::Exception,
        "ABORT" | "ABORTED" => JobStatus::Aborted,
        "CANCEL" | "CANCELLED" | "CANCELED" => JobStatus::Cancelled,
        "STOP" | "STOPPED" => JobStatus::Stopped,
        _ => return None,
    };
    Some(status)
}
