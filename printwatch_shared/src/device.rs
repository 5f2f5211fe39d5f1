//! Canonical device-state snapshot produced by the telemetry normalizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ams::{AmsUnit, Tray};

/// Payload family a snapshot was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterFamily {
    /// Flat `print` report shared by the X1/P1/A1 controllers.
    Bambu,
    /// Same vendor, with temperatures, fans and job data nested under `print.device`.
    BambuNested,
    /// Klipper/Moonraker style `status` object.
    Moonraker,
    /// Unrecognized shape; everything lands in `extras`.
    #[default]
    Generic,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Temperatures {
    pub nozzle: Option<f64>,
    pub nozzle_target: Option<f64>,
    pub bed: Option<f64>,
    pub bed_target: Option<f64>,
    pub chamber: Option<f64>,
}

/// Fan speeds, always in percent (0-100).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FanSpeeds {
    pub part: Option<f64>,
    pub aux: Option<f64>,
    pub chamber: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub current: Option<u32>,
    pub total: Option<u32>,
}

impl LayerInfo {
    /// Clamp `current` to `total` when both are known.
    pub fn clamped(current: Option<u32>, total: Option<u32>) -> Self {
        let current = match (current, total) {
            (Some(c), Some(t)) if c > t => Some(t),
            (c, _) => c,
        };
        Self { current, total }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightInfo {
    pub state: Option<String>,
    pub brightness: Option<f64>,
}

/// Current job as reported by the device. Times are in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub file: Option<String>,
    pub elapsed_s: Option<f64>,
    pub remaining_s: Option<f64>,
}

/// One normalized telemetry report.
///
/// Every leaf is optional: `None` means the payload did not carry the field (or carried
/// something that could not be coerced), never that parsing failed as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub family: PrinterFamily,
    pub model: Option<String>,
    pub state: Option<String>,
    /// Progress in percent (0-100).
    pub progress: Option<f64>,
    pub temperatures: Temperatures,
    pub fans: FanSpeeds,
    pub layer: LayerInfo,
    pub light: LightInfo,
    pub job: JobInfo,
    pub error_code: Option<String>,
    /// Absolute, job-wide extruded filament length in mm, when the protocol reports one.
    pub filament_used_mm: Option<f64>,
    /// Raw loaded-tray index (global slot, 254 external, 255 none).
    pub tray_now: Option<u32>,
    /// Raw target-tray index during a filament change.
    pub tray_target: Option<u32>,
    pub ams_raw: Option<Value>,
    pub ams_units: Vec<AmsUnit>,
    /// Spool on the external holder, when reported.
    pub external_tray: Option<Tray>,
    pub extras: Map<String, Value>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl DeviceSnapshot {
    /// Snapshot for an unrecognized payload: the whole object is kept in `extras`.
    pub fn generic(payload: &Value) -> Self {
        let extras = match payload {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        };
        Self {
            family: PrinterFamily::Generic,
            extras,
            ..Self::default()
        }
    }
}
