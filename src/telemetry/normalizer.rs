//! Raw telemetry payload → [`DeviceSnapshot`].
//!
//! Family resolution: explicit model hint, then structural heuristics, then the generic
//! fallback. Each family is described by a [`FieldMap`]: one ordered [`Candidates`] list
//! per canonical field, evaluated against the family's root object.

use chrono::{DateTime, Utc};
use printwatch_shared::{
    DeviceSnapshot, FanSpeeds, JobInfo, LayerInfo, LightInfo, PrinterFamily, Temperatures,
};
use serde_json::{Map, Value};

use super::ams::{TRAY_NOW, TRAY_TARGET, is_flat_ams_key, parse_external_tray, parse_trays};
use super::resolve::{Candidates, coerce_number, coerce_string, lookup};

/// How a family reports fan speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanScale {
    /// 0-15 steps; larger values are taken as percent already.
    Steps15,
    /// 0.0-1.0; larger values are taken as percent already.
    Fraction,
}

/// Candidate lists for every canonical field of one payload family.
#[derive(Debug, Clone, Copy)]
pub struct FieldMap {
    pub model: Candidates,
    pub state: Candidates,
    pub progress: Candidates,
    /// Progress is reported on a 0-1 scale.
    pub progress_fraction: bool,
    pub nozzle: Candidates,
    pub nozzle_target: Candidates,
    pub bed: Candidates,
    pub bed_target: Candidates,
    pub chamber: Candidates,
    pub fan_part: Candidates,
    pub fan_aux: Candidates,
    pub fan_chamber: Candidates,
    pub fan_scale: FanScale,
    pub layer_current: Candidates,
    pub layer_total: Candidates,
    pub job_file: Candidates,
    pub elapsed_s: Candidates,
    pub elapsed_min: Candidates,
    pub remaining_s: Candidates,
    pub remaining_min: Candidates,
    pub error_code: Candidates,
    pub filament_used_mm: Candidates,
    pub timestamp_ms: Candidates,
    /// Top-level keys of the root object that the map consumes; everything else goes
    /// to `extras`.
    pub consumed: &'static [&'static str],
}

pub const BAMBU_FIELDS: FieldMap = FieldMap {
    model: Candidates(&[&["printer_type"], &["model"], &["device_model"]]),
    state: Candidates(&[&["gcode_state"], &["print_status"], &["state"]]),
    progress: Candidates(&[&["mc_percent"], &["percent"], &["progress"]]),
    progress_fraction: false,
    nozzle: Candidates(&[&["nozzle_temper"], &["nozzle_temp"]]),
    nozzle_target: Candidates(&[&["nozzle_target_temper"], &["nozzle_target_temp"]]),
    bed: Candidates(&[&["bed_temper"], &["bed_temp"]]),
    bed_target: Candidates(&[&["bed_target_temper"], &["bed_target_temp"]]),
    chamber: Candidates(&[&["chamber_temper"], &["chamber_temp"], &["frame_temper"]]),
    fan_part: Candidates(&[&["cooling_fan_speed"], &["fan_gear"]]),
    fan_aux: Candidates(&[&["big_fan1_speed"], &["aux_fan_speed"]]),
    fan_chamber: Candidates(&[&["big_fan2_speed"], &["chamber_fan_speed"]]),
    fan_scale: FanScale::Steps15,
    layer_current: Candidates(&[&["layer_num"], &["current_layer"]]),
    layer_total: Candidates(&[&["total_layer_num"], &["total_layers"]]),
    job_file: Candidates(&[&["subtask_name"], &["gcode_file"], &["file"]]),
    elapsed_s: Candidates(&[&["print_time_s"], &["elapsed_time"]]),
    elapsed_min: Candidates(&[&["mc_print_time"]]),
    remaining_s: Candidates::NONE,
    remaining_min: Candidates(&[&["mc_remaining_time"], &["remaining_time"]]),
    error_code: Candidates(&[&["print_error"], &["mc_print_error_code"]]),
    filament_used_mm: Candidates(&[&["filament_used_mm"]]),
    timestamp_ms: Candidates(&[&["t_utc"], &["timestamp"]]),
    consumed: &[
        "printer_type", "model", "device_model", "gcode_state", "print_status", "state",
        "mc_percent", "percent", "progress", "nozzle_temper", "nozzle_temp",
        "nozzle_target_temper", "nozzle_target_temp", "bed_temper", "bed_temp",
        "bed_target_temper", "bed_target_temp", "chamber_temper", "chamber_temp",
        "frame_temper", "cooling_fan_speed", "fan_gear", "big_fan1_speed", "aux_fan_speed",
        "big_fan2_speed", "chamber_fan_speed", "layer_num", "current_layer",
        "total_layer_num", "total_layers", "subtask_name", "gcode_file", "file",
        "print_time_s", "elapsed_time", "mc_print_time", "mc_remaining_time",
        "remaining_time", "print_error", "mc_print_error_code", "filament_used_mm", "t_utc",
        "timestamp", "ams", "vt_tray", "lights_report", "tray_now", "tray_tar", "device",
    ],
};

pub const BAMBU_NESTED_FIELDS: FieldMap = FieldMap {
    nozzle: Candidates(&[
        &["device", "extruder", "info", "0", "temp"],
        &["device", "nozzle", "temp"],
        &["nozzle_temper"],
    ]),
    nozzle_target: Candidates(&[
        &["device", "extruder", "info", "0", "target"],
        &["device", "nozzle", "target"],
        &["nozzle_target_temper"],
    ]),
    bed: Candidates(&[&["device", "bed", "info", "temp"], &["device", "bed", "temp"], &["bed_temper"]]),
    bed_target: Candidates(&[
        &["device", "bed", "info", "target"],
        &["device", "bed", "target"],
        &["bed_target_temper"],
    ]),
    chamber: Candidates(&[&["device", "ctc", "info", "temp"], &["device", "chamber", "temp"], &["chamber_temper"]]),
    fan_part: Candidates(&[&["device", "fan", "part"], &["device", "airduct", "part_fan"], &["cooling_fan_speed"]]),
    fan_aux: Candidates(&[&["device", "fan", "aux"], &["device", "airduct", "aux_fan"], &["big_fan1_speed"]]),
    fan_chamber: Candidates(&[
        &["device", "fan", "chamber"],
        &["device", "airduct", "chamber_fan"],
        &["big_fan2_speed"],
    ]),
    job_file: Candidates(&[&["device", "job", "file"], &["subtask_name"], &["gcode_file"]]),
    elapsed_min: Candidates(&[&["device", "job", "elapsed_min"], &["mc_print_time"]]),
    remaining_min: Candidates(&[&["device", "job", "remaining_min"], &["mc_remaining_time"]]),
    ..BAMBU_FIELDS
};

pub const MOONRAKER_FIELDS: FieldMap = FieldMap {
    model: Candidates(&[&["system_info", "product"], &["machine", "model"]]),
    state: Candidates(&[&["print_stats", "state"], &["idle_timeout", "state"], &["webhooks", "state"]]),
    progress: Candidates(&[&["display_status", "progress"], &["virtual_sdcard", "progress"]]),
    progress_fraction: true,
    nozzle: Candidates(&[&["extruder", "temperature"], &["extruder0", "temperature"]]),
    nozzle_target: Candidates(&[&["extruder", "target"], &["extruder0", "target"]]),
    bed: Candidates(&[&["heater_bed", "temperature"]]),
    bed_target: Candidates(&[&["heater_bed", "target"]]),
    chamber: Candidates(&[
        &["temperature_sensor chamber", "temperature"],
        &["heater_generic chamber", "temperature"],
        &["temperature_fan chamber", "temperature"],
    ]),
    fan_part: Candidates(&[&["fan", "speed"]]),
    fan_aux: Candidates(&[&["fan_generic aux", "speed"], &["fan_generic auxiliary_cooling_fan", "speed"]]),
    fan_chamber: Candidates(&[&["fan_generic chamber", "speed"], &["temperature_fan chamber", "speed"]]),
    fan_scale: FanScale::Fraction,
    layer_current: Candidates(&[&["print_stats", "info", "current_layer"]]),
    layer_total: Candidates(&[&["print_stats", "info", "total_layer"]]),
    job_file: Candidates(&[&["print_stats", "filename"], &["virtual_sdcard", "file_path"]]),
    elapsed_s: Candidates(&[&["print_stats", "print_duration"], &["print_stats", "total_duration"]]),
    elapsed_min: Candidates::NONE,
    remaining_s: Candidates(&[&["display_status", "remaining"]]),
    remaining_min: Candidates::NONE,
    error_code: Candidates(&[&["print_stats", "message"]]),
    filament_used_mm: Candidates(&[&["print_stats", "filament_used"]]),
    timestamp_ms: Candidates::NONE,
    consumed: &[
        "print_stats", "idle_timeout", "webhooks", "display_status", "virtual_sdcard",
        "extruder", "extruder0", "heater_bed", "temperature_sensor chamber",
        "heater_generic chamber", "temperature_fan chamber", "fan", "fan_generic aux",
        "fan_generic auxiliary_cooling_fan", "fan_generic chamber", "output_pin caselight",
        "led chamber_light", "system_info", "machine",
    ],
};

/// Root objects that may hold a Moonraker status map.
const MOONRAKER_STATUS: Candidates = Candidates(&[&["status"], &["result", "status"], &["params", "0"]]);
const MOONRAKER_MARKERS: &[&str] = &["print_stats", "display_status", "virtual_sdcard", "heater_bed", "extruder"];
const BAMBU_MARKERS: &[&str] = &["gcode_state", "mc_percent", "nozzle_temper", "ams", "command", "layer_num"];

/// Normalize one raw telemetry report. Never fails: unknown shapes produce a generic
/// snapshot holding the payload in `extras`.
pub fn normalize(payload: &Value, model_hint: Option<&str>) -> DeviceSnapshot {
    let family = model_hint
        .and_then(family_from_hint)
        .unwrap_or_else(|| detect_family(payload));

    let mut snapshot = match family {
        PrinterFamily::Bambu => normalize_bambu(payload, &BAMBU_FIELDS),
        PrinterFamily::BambuNested => normalize_bambu(payload, &BAMBU_NESTED_FIELDS),
        PrinterFamily::Moonraker => normalize_moonraker(payload),
        PrinterFamily::Generic => {
            tracing::debug!(hint = ?model_hint, "Unrecognized telemetry shape, keeping raw payload");
            return DeviceSnapshot::generic(payload);
        }
    };
    snapshot.family = family;
    if let Some(hint) = model_hint.map(str::trim).filter(|h| !h.is_empty()) {
        snapshot.model = Some(hint.to_string());
    }
    snapshot
}

/// Map a user-supplied model name to a family. Unknown names return `None` so that
/// structural detection still runs.
pub fn family_from_hint(hint: &str) -> Option<PrinterFamily> {
    let key: String = hint
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    if key.is_empty() {
        return None;
    }
    let key = key.strip_prefix("bambulab").or_else(|| key.strip_prefix("bambu")).unwrap_or(&key);

    if key.starts_with("h2") {
        Some(PrinterFamily::BambuNested)
    } else if key.is_empty() || ["x1", "p1", "a1"].iter().any(|p| key.starts_with(p)) {
        Some(PrinterFamily::Bambu)
    } else if ["klipper", "moonraker", "mainsail", "fluidd"].iter().any(|p| key.starts_with(p)) {
        Some(PrinterFamily::Moonraker)
    } else {
        None
    }
}

/// Structural signature detection. Bambu keys are looked for inside the `print` envelope
/// first, then on the report itself (legacy flat reports).
pub fn detect_family(payload: &Value) -> PrinterFamily {
    if let Some(print) = payload.get("print").and_then(Value::as_object) {
        if print.get("device").is_some_and(Value::is_object) {
            return PrinterFamily::BambuNested;
        }
        if BAMBU_MARKERS.iter().any(|k| print.contains_key(*k)) {
            return PrinterFamily::Bambu;
        }
    }
    if let Some(Value::Object(status)) = MOONRAKER_STATUS.value(payload) {
        if MOONRAKER_MARKERS.iter().any(|k| status.contains_key(*k)) {
            return PrinterFamily::Moonraker;
        }
    }
    if let Some(root) = payload.as_object() {
        let bambu_keys = BAMBU_MARKERS.iter().any(|k| root.contains_key(*k));
        if bambu_keys || root.keys().any(|k| is_flat_ams_key(k)) {
            return PrinterFamily::Bambu;
        }
    }
    PrinterFamily::Generic
}

/// Shared mapping routine: resolve every candidate list against `root`.
fn apply_fields(root: &Value, fields: &FieldMap) -> DeviceSnapshot {
    let progress = fields.progress.number(root).map(|p| {
        let percent = if fields.progress_fraction && p <= 1.0 { p * 100.0 } else { p };
        percent.clamp(0.0, 100.0)
    });

    let minutes = |c: &Candidates| c.number(root).filter(|m| *m >= 0.0).map(|m| m * 60.0);
    let seconds = |c: &Candidates| c.number(root).filter(|s| *s >= 0.0);

    DeviceSnapshot {
        model: fields.model.string(root),
        state: fields.state.string(root),
        progress,
        temperatures: Temperatures {
            nozzle: fields.nozzle.number(root),
            nozzle_target: fields.nozzle_target.number(root),
            bed: fields.bed.number(root),
            bed_target: fields.bed_target.number(root),
            chamber: fields.chamber.number(root),
        },
        fans: FanSpeeds {
            part: fields.fan_part.number(root).map(|v| fan_percent(v, fields.fan_scale)),
            aux: fields.fan_aux.number(root).map(|v| fan_percent(v, fields.fan_scale)),
            chamber: fields.fan_chamber.number(root).map(|v| fan_percent(v, fields.fan_scale)),
        },
        layer: LayerInfo::clamped(fields.layer_current.unsigned(root), fields.layer_total.unsigned(root)),
        job: JobInfo {
            file: fields.job_file.string(root),
            elapsed_s: seconds(&fields.elapsed_s).or_else(|| minutes(&fields.elapsed_min)),
            remaining_s: seconds(&fields.remaining_s).or_else(|| minutes(&fields.remaining_min)),
        },
        filament_used_mm: fields.filament_used_mm.number(root).filter(|mm| *mm >= 0.0),
        timestamp: fields.timestamp_ms.number(root).and_then(timestamp_from_epoch),
        extras: collect_extras(root, fields.consumed),
        ..DeviceSnapshot::default()
    }
}

fn normalize_bambu(payload: &Value, fields: &FieldMap) -> DeviceSnapshot {
    let root = payload.get("print").filter(|v| v.is_object()).unwrap_or(payload);
    let mut snapshot = apply_fields(root, fields);
    snapshot.extras.retain(|key, _| !is_flat_ams_key(key));

    // `print_error` is 0 on firmware that reports through `mc_print_error_code`.
    snapshot.error_code = fields
        .error_code
        .0
        .iter()
        .filter_map(|path| lookup(root, path))
        .find_map(bambu_error_code);
    snapshot.light = bambu_light(root);
    snapshot.tray_now = TRAY_NOW.unsigned(payload);
    snapshot.tray_target = TRAY_TARGET.unsigned(payload);
    snapshot.ams_raw = root.get("ams").cloned();
    snapshot.ams_units = parse_trays(payload);
    snapshot.external_tray = parse_external_tray(payload);
    snapshot
}

fn normalize_moonraker(payload: &Value) -> DeviceSnapshot {
    let root = match MOONRAKER_STATUS.value(payload) {
        Some(status) if status.is_object() => status,
        _ => payload,
    };
    let mut snapshot = apply_fields(root, &MOONRAKER_FIELDS);

    let errored = snapshot.state.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("error"));
    snapshot.error_code = MOONRAKER_FIELDS.error_code.string(root).filter(|_| errored);
    snapshot.light = moonraker_light(root);
    snapshot
}

/// `print_error` is an integer whose halves form the vendor's `XXXX_XXXX` code.
fn bambu_error_code(value: &Value) -> Option<String> {
    match coerce_number(value) {
        Some(n) if n > 0.0 && n <= u32::MAX as f64 => {
            let code = n as u32;
            Some(format!("{:04X}_{:04X}", code >> 16, code & 0xFFFF))
        }
        Some(_) => None,
        None => coerce_string(value).filter(|s| s != "0"),
    }
}

fn bambu_light(root: &Value) -> LightInfo {
    let entry = root
        .get("lights_report")
        .and_then(Value::as_array)
        .and_then(|lights| {
            lights
                .iter()
                .find(|l| l.get("node").and_then(Value::as_str) == Some("chamber_light"))
                .or_else(|| lights.first())
        });
    LightInfo {
        state: entry.and_then(|l| l.get("mode")).and_then(coerce_string),
        brightness: None,
    }
}

fn moonraker_light(root: &Value) -> LightInfo {
    let value = lookup(root, &["output_pin caselight", "value"])
        .or_else(|| lookup(root, &["led chamber_light", "color_data", "0", "3"]))
        .and_then(coerce_number);
    match value {
        Some(v) => LightInfo {
            state: Some(if v > 0.0 { "on" } else { "off" }.to_string()),
            brightness: Some((if v <= 1.0 { v * 100.0 } else { v }).clamp(0.0, 100.0)),
        },
        None => LightInfo::default(),
    }
}

fn fan_percent(value: f64, scale: FanScale) -> f64 {
    let percent = match scale {
        FanScale::Steps15 if value <= 15.0 => (value * 100.0 / 15.0).round(),
        FanScale::Fraction if value <= 1.0 => value * 100.0,
        _ => value,
    };
    percent.clamp(0.0, 100.0)
}

/// Accepts epoch seconds or milliseconds.
fn timestamp_from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if value <= 0.0 {
        return None;
    }
    let millis = if value < 1e11 { value * 1000.0 } else { value };
    DateTime::from_timestamp_millis(millis as i64)
}

fn collect_extras(root: &Value, consumed: &[&str]) -> Map<String, Value> {
    match root {
        Value::Object(map) => map
            .iter()
            .filter(|(k, _)| !consumed.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => Map::new(),
    }
}
