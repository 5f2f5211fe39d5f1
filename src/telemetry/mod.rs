//! Stateless telemetry parsing: payload normalization and AMS extraction.

pub mod ams;
pub mod normalizer;
pub mod resolve;

pub use ams::{active_slot, find_tray, loaded_slot, parse_external_tray, parse_trays};
pub use normalizer::{detect_family, family_from_hint, normalize};
pub use resolve::Candidates;
