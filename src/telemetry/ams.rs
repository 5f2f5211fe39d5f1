//! AMS unit and tray extraction.
//!
//! Three payload layouts are understood:
//!
//! - units under `ams.ams[]` with trays under `tray[]` (current firmware),
//! - units under `ams.units[]` with trays under `trays[]` (older firmware and bridges),
//! - flat legacy keys on the report itself: `ams_<unit>_tray_<slot>_<field>` and
//!   `ams_<unit>_<field>`.
//!
//! Malformed units or trays are skipped one by one; parsing never fails as a whole.

use std::collections::BTreeMap;

use printwatch_shared::{AmsUnit, EXTERNAL_SLOT, MaterialHints, TRAYS_PER_UNIT, Tray, UNLOADED_SLOT, split_slot};
use serde_json::{Map, Value};

use super::resolve::{Candidates, coerce_number, lookup};

const CONTAINER: Candidates = Candidates(&[&["print", "ams"], &["ams"]]);
const UNIT_LISTS: &[&str] = &["ams", "units"];
const TRAY_LISTS: &[&str] = &["tray", "trays"];

pub const TRAY_NOW: Candidates = Candidates(&[
    &["print", "ams", "tray_now"],
    &["ams", "tray_now"],
    &["print", "tray_now"],
    &["tray_now"],
]);
pub const TRAY_TARGET: Candidates = Candidates(&[
    &["print", "ams", "tray_tar"],
    &["ams", "tray_tar"],
    &["print", "tray_tar"],
    &["tray_tar"],
]);
const EXTERNAL: Candidates = Candidates(&[&["print", "vt_tray"], &["vt_tray"], &["print", "vir_slot", "0"]]);

const UNIT_ID: Candidates = Candidates(&[&["id"], &["unit_id"], &["ams_id"]]);
const UNIT_HUMIDITY: Candidates = Candidates(&[&["humidity"], &["humidity_percent"], &["humidity_raw"]]);
const UNIT_TEMP: Candidates = Candidates(&[&["temp"], &["temperature"]]);

// Unit-level fields hold a tray index within the unit; container-level fields hold a
// global slot index.
const UNIT_ACTIVE: Candidates = Candidates(&[&["active_tray"], &["tray_active"]]);
const CONTAINER_ACTIVE: Candidates = Candidates(&[&["active_tray"], &["current_tray"], &["tray_tar"], &["tray_now"]]);

const TRAY_SLOT: Candidates = Candidates(&[&["id"], &["tray_id"], &["slot"]]);
const TRAY_TAG: Candidates = Candidates(&[&["tag_uid"], &["tag_id"], &["rfid"]]);
const TRAY_UUID: Candidates = Candidates(&[&["tray_uuid"], &["spool_uuid"], &["uuid"]]);
const TRAY_REMAIN: Candidates = Candidates(&[&["remain"], &["remain_percent"], &["remaining"]]);
const TRAY_TOTAL_LEN: Candidates = Candidates(&[&["total_len"], &["total_length"], &["tray_total_len"]]);
const TRAY_MATERIAL: Candidates = Candidates(&[&["tray_type"], &["material"], &["type"]]);
const TRAY_SUB_BRAND: Candidates = Candidates(&[&["tray_sub_brands"], &["sub_brand"]]);
const TRAY_COLOR: Candidates = Candidates(&[&["tray_color"], &["color"]]);
const TRAY_FILAMENT_ID: Candidates = Candidates(&[&["tray_info_idx"], &["filament_id"]]);
const TRAY_WEIGHT: Candidates = Candidates(&[&["tray_weight"], &["spool_weight"]]);
const TRAY_TEMP_MIN: Candidates = Candidates(&[&["nozzle_temp_min"], &["min_temp"]]);
const TRAY_TEMP_MAX: Candidates = Candidates(&[&["nozzle_temp_max"], &["max_temp"]]);

/// Extract every AMS unit from a raw report, ordered by unit id.
pub fn parse_trays(payload: &Value) -> Vec<AmsUnit> {
    let container = CONTAINER.value(payload);

    let mut units = match container {
        Some(Value::Array(items)) => parse_units(items, None),
        Some(Value::Object(map)) => UNIT_LISTS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .map(|items| parse_units(items, container))
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    if units.is_empty() {
        let flat_root = payload.get("print").filter(|v| v.is_object()).unwrap_or(payload);
        if let Value::Object(map) = flat_root {
            units = parse_flat_units(map);
        }
    }

    units.sort_by_key(|u| u.id);
    units
}

/// Tray on the external spool holder, if the report has one.
pub fn parse_external_tray(payload: &Value) -> Option<Tray> {
    let raw = EXTERNAL.value(payload)?;
    let mut tray = parse_tray(raw, 0)?;
    tray.slot = EXTERNAL_SLOT;
    Some(tray)
}

/// Global slot currently feeding the extruder: the loaded tray first, then the
/// target of an in-progress change. `None` when nothing usable is reported.
pub fn loaded_slot(tray_now: Option<u32>, tray_target: Option<u32>) -> Option<u32> {
    [tray_now, tray_target].into_iter().flatten().find(|slot| is_valid_global(*slot))
}

/// Job-level loaded slot straight from a raw report.
pub fn active_slot(payload: &Value) -> Option<u32> {
    loaded_slot(TRAY_NOW.unsigned(payload), TRAY_TARGET.unsigned(payload))
}

/// Tray for a global slot index.
pub fn find_tray<'a>(units: &'a [AmsUnit], external: Option<&'a Tray>, slot: u32) -> Option<&'a Tray> {
    if slot == EXTERNAL_SLOT {
        return external;
    }
    let (unit_id, tray_slot) = split_slot(slot);
    units.iter().find(|u| u.id == unit_id)?.tray(tray_slot)
}

/// `ams_<unit>_...` key of the flat legacy layout.
pub fn is_flat_ams_key(key: &str) -> bool {
    key.strip_prefix("ams_")
        .and_then(|rest| rest.split_once('_'))
        .is_some_and(|(unit, _)| !unit.is_empty() && unit.bytes().all(|b| b.is_ascii_digit()))
}

fn is_valid_global(slot: u32) -> bool {
    slot < UNLOADED_SLOT
}

fn parse_units(items: &[Value], container: Option<&Value>) -> Vec<AmsUnit> {
    items
        .iter()
        .enumerate()
        .filter_map(|(position, raw)| parse_unit(raw, position as u32, container))
        .collect()
}

fn parse_unit(raw: &Value, position: u32, container: Option<&Value>) -> Option<AmsUnit> {
    let map = raw.as_object()?;
    let id = UNIT_ID.unsigned(raw).unwrap_or(position);

    let trays = TRAY_LISTS
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_array))
        .map(|items| {
            let mut trays: Vec<Tray> = items
                .iter()
                .enumerate()
                .filter_map(|(pos, t)| parse_tray(t, pos as u32))
                .collect();
            trays.sort_by_key(|t| t.slot);
            trays
        })
        .unwrap_or_default();

    Some(AmsUnit {
        id,
        temperature: UNIT_TEMP.number(raw),
        humidity: UNIT_HUMIDITY.number(raw),
        active_slot: resolve_unit_active(raw, id, container),
        trays,
    })
}

fn resolve_unit_active(unit: &Value, unit_id: u32, container: Option<&Value>) -> Option<u32> {
    if let Some(local) = UNIT_ACTIVE.unsigned(unit).filter(|s| *s < TRAYS_PER_UNIT) {
        return Some(local);
    }
    let container = container?;
    CONTAINER_ACTIVE
        .0
        .iter()
        .filter_map(|path| lookup(container, path))
        .filter_map(coerce_number)
        .filter(|n| *n >= 0.0)
        .map(|n| n as u32)
        .find(|global| *global < EXTERNAL_SLOT)
        .map(split_slot)
        .filter(|(unit, _)| *unit == unit_id)
        .map(|(_, tray)| tray)
}

fn parse_tray(raw: &Value, position: u32) -> Option<Tray> {
    raw.as_object()?;
    Some(Tray {
        slot: TRAY_SLOT.unsigned(raw).unwrap_or(position),
        tag_id: TRAY_TAG.string(raw).filter(|s| !is_blank_id(s)),
        spool_uuid: TRAY_UUID.string(raw).filter(|s| !is_blank_id(s)),
        remain_percent: TRAY_REMAIN.number(raw).filter(|r| *r >= 0.0).map(|r| r.min(100.0)),
        total_length_mm: TRAY_TOTAL_LEN.number(raw).filter(|l| *l > 0.0),
        hints: MaterialHints {
            material: TRAY_MATERIAL.string(raw),
            sub_brand: TRAY_SUB_BRAND.string(raw),
            color: TRAY_COLOR.string(raw),
            filament_id: TRAY_FILAMENT_ID.string(raw),
            spool_weight_g: TRAY_WEIGHT.number(raw).filter(|w| *w > 0.0),
            nozzle_temp_min: TRAY_TEMP_MIN.number(raw),
            nozzle_temp_max: TRAY_TEMP_MAX.number(raw),
        },
    })
}

/// Unprogrammed tags report all-zero identifiers.
fn is_blank_id(id: &str) -> bool {
    id.chars().all(|c| c == '0' || c == '-')
}

/// Rebuild unit/tray objects from flat `ams_<u>_tray_<t>_<field>` keys, then run them
/// through the regular parsers.
fn parse_flat_units(map: &Map<String, Value>) -> Vec<AmsUnit> {
    let mut units: BTreeMap<u32, Map<String, Value>> = BTreeMap::new();
    let mut trays: BTreeMap<(u32, u32), Map<String, Value>> = BTreeMap::new();

    for (key, value) in map {
        let Some(rest) = key.strip_prefix("ams_") else {
            continue;
        };
        let Some((unit, rest)) = rest.split_once('_') else {
            continue;
        };
        let Ok(unit) = unit.parse::<u32>() else {
            continue;
        };
        match rest.strip_prefix("tray_").and_then(|r| r.split_once('_')) {
            Some((slot, field)) => {
                let Ok(slot) = slot.parse::<u32>() else {
                    continue;
                };
                units.entry(unit).or_default();
                trays
                    .entry((unit, slot))
                    .or_default()
                    .insert(field.to_string(), value.clone());
            }
            None => {
                units.entry(unit).or_default().insert(rest.to_string(), value.clone());
            }
        }
    }

    let container = map.get("tray_now").map(|now| {
        let mut c = Map::new();
        c.insert("tray_now".to_string(), now.clone());
        if let Some(target) = map.get("tray_tar") {
            c.insert("tray_tar".to_string(), target.clone());
        }
        Value::Object(c)
    });

    units
        .into_iter()
        .filter_map(|(unit_id, mut fields)| {
            let unit_trays: Vec<Value> = trays
                .iter()
                .filter(|((u, _), _)| *u == unit_id)
                .map(|((_, slot), tray)| {
                    let mut tray = tray.clone();
                    tray.entry("id").or_insert_with(|| Value::from(*slot));
                    Value::Object(tray)
                })
                .collect();
            fields.insert("id".to_string(), Value::from(unit_id));
            fields.insert("tray".to_string(), Value::Array(unit_trays));
            parse_unit(&Value::Object(fields), unit_id, container.as_ref())
        })
        .collect()
}
