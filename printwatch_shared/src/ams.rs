//! AMS (Automatic Material System) units and their trays.

use serde::{Deserialize, Serialize};

use crate::TRAYS_PER_UNIT;

/// Material hints read off the spool tag or set on the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialHints {
    /// Filament type (e.g. "PLA", "PETG").
    pub material: Option<String>,
    pub sub_brand: Option<String>,
    /// Colour as RRGGBBAA hex.
    pub color: Option<String>,
    /// Vendor filament profile id.
    pub filament_id: Option<String>,
    /// Nominal spool net weight in grams.
    pub spool_weight_g: Option<f64>,
    pub nozzle_temp_min: Option<f64>,
    pub nozzle_temp_max: Option<f64>,
}

/// A single filament slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tray {
    /// Slot index within its unit (0-3), or the global index for the external holder.
    pub slot: u32,
    pub tag_id: Option<String>,
    pub spool_uuid: Option<String>,
    /// Remaining filament in percent. `None` when the device does not know.
    pub remain_percent: Option<f64>,
    /// Total filament length of a full spool in mm.
    pub total_length_mm: Option<f64>,
    pub hints: MaterialHints,
}

/// One AMS unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AmsUnit {
    pub id: u32,
    pub temperature: Option<f64>,
    /// Humidity as reported (index or percent depending on firmware).
    pub humidity: Option<f64>,
    /// Active tray index within this unit.
    pub active_slot: Option<u32>,
    pub trays: Vec<Tray>,
}

impl AmsUnit {
    pub fn tray(&self, slot: u32) -> Option<&Tray> {
        self.trays.iter().find(|t| t.slot == slot)
    }
}

/// Split a global slot index into (unit, tray).
pub fn split_slot(global: u32) -> (u32, u32) {
    (global / TRAYS_PER_UNIT, global % TRAYS_PER_UNIT)
}
