// printwatch_shared: data model shared by the telemetry pipeline, the job tracker and the CLI

pub mod ams;
pub mod device;
pub mod print_job;

pub use ams::{split_slot, AmsUnit, MaterialHints, Tray};
pub use device::{DeviceSnapshot, FanSpeeds, JobInfo, LayerInfo, LightInfo, PrinterFamily, Temperatures};
pub use print_job::{JobSnapshotRecord, JobStatus, SlotBaseline, SlotUsage, SpoolRef};

/// Global slot index used for the external spool holder.
pub const EXTERNAL_SLOT: u32 = 254;

/// Raw tray index meaning "nothing loaded".
pub const UNLOADED_SLOT: u32 = 255;

/// Trays per AMS unit; global slot = unit * TRAYS_PER_UNIT + tray.
pub const TRAYS_PER_UNIT: u32 = 4;
