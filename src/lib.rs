//! printwatch: printer telemetry normalization and crash-recoverable print job tracking
//! with filament consumption accounting.

pub mod config;
pub mod consumption;
pub mod memory;
pub mod snapshot_store;
pub mod telemetry;
pub mod tracker;

pub use printwatch_shared as shared;

pub use config::{Config, ConfigError, load_config};
pub use memory::{MemoryLedger, MemoryNotifier};
pub use snapshot_store::{SnapshotError, SnapshotStore};
pub use telemetry::normalize;
pub use tracker::{JobTracker, TelemetryOutcome, TrackerError, Transition};
