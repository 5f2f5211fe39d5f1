//! Filament consumption estimation.
//!
//! Two signals feed a job total. The primary one is an absolute, job-wide extruded-length
//! counter; the fallback is the AMS remaining-percent of the active slot multiplied by the
//! slot's total filament length. Mass always comes from the remaining-percent delta and the
//! spool's net weight, whichever length strategy is active.
//!
//! Everything here is pure; the job tracker owns the state and decides when to call in.

use printwatch_shared::{SlotBaseline, SlotUsage};
use serde::Serialize;

/// Which length signal a job is currently using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthStrategy {
    Counter,
    RemainPercent,
}

/// Result of offering a new reading to a monotonic ratchet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ratchet {
    Accepted(f64),
    /// The reading moved the wrong way; `kept` is the previous accepted value.
    Rejected { kept: f64, observed: f64 },
}

impl Ratchet {
    pub fn value(&self) -> f64 {
        match self {
            Ratchet::Accepted(v) => *v,
            Ratchet::Rejected { kept, .. } => *kept,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Ratchet::Rejected { .. })
    }
}

/// Remaining percent may only go down.
pub fn ratchet_down(last: Option<f64>, observed: f64) -> Ratchet {
    match last {
        Some(kept) if observed > kept => Ratchet::Rejected { kept, observed },
        _ => Ratchet::Accepted(observed),
    }
}

/// The extruded-length counter may only go up.
pub fn ratchet_up(last: Option<f64>, observed: f64) -> Ratchet {
    match last {
        Some(kept) if observed < kept => Ratchet::Rejected { kept, observed },
        _ => Ratchet::Accepted(observed),
    }
}

/// Thresholds that mark the end of priming/purging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingThreshold {
    pub min_layer: u32,
    pub min_progress: f64,
}

impl TrackingThreshold {
    /// `true` once the job is past its first non-priming layer.
    pub fn reached(&self, layer: Option<u32>, progress: Option<f64>) -> bool {
        layer.is_some_and(|l| l >= self.min_layer) || progress.is_some_and(|p| p >= self.min_progress)
    }
}

/// Percent consumed since the slot became active. Never negative.
pub fn remain_delta(slot: &SlotBaseline) -> Option<f64> {
    match (slot.start_remain, slot.last_remain) {
        (Some(start), Some(last)) => Some((start - last).max(0.0)),
        _ => None,
    }
}

/// Length from the remaining-percent delta. `None` when the slot's total length is unknown:
/// consumption is unavailable, not zero.
pub fn fallback_length(slot: &SlotBaseline) -> Option<f64> {
    let total = slot.total_length_mm.filter(|t| *t > 0.0)?;
    remain_delta(slot).map(|delta| delta / 100.0 * total)
}

/// Length from the absolute counter since the slot started counting.
pub fn counter_length(slot: &SlotBaseline, counter: Option<f64>) -> Option<f64> {
    match (slot.counter_start, counter) {
        (Some(start), Some(now)) => Some((now - start).max(0.0)),
        _ => None,
    }
}

/// Mass from the remaining-percent delta and the spool's net weight.
pub fn slot_mass(slot: &SlotBaseline) -> Option<f64> {
    let net = slot.spool.as_ref()?.net_weight_g()?;
    remain_delta(slot).map(|delta| delta / 100.0 * net)
}

/// Live usage of the open slot.
///
/// With the counter strategy, a slot that has not started counting yet (still priming)
/// reports only what was carried over from the fallback period.
pub fn open_slot_usage(slot: &SlotBaseline, strategy: LengthStrategy, counter: Option<f64>) -> SlotUsage {
    let used_length_mm = match strategy {
        LengthStrategy::Counter => match slot.counter_start {
            Some(_) => counter_length(slot, counter).map(|l| l + slot.length_carry_mm),
            None => Some(slot.length_carry_mm),
        },
        LengthStrategy::RemainPercent => fallback_length(slot).map(|l| l + slot.length_carry_mm),
    };
    SlotUsage {
        slot: slot.slot,
        spool_id: slot.spool.as_ref().map(|s| s.id.clone()),
        used_length_mm,
        used_mass_g: slot_mass(slot),
        end_remain: slot.last_remain,
    }
}

/// Summed consumption of a job.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct JobTotals {
    pub length_mm: Option<f64>,
    pub mass_g: Option<f64>,
    /// At least one slot period had no length attribution.
    pub length_incomplete: bool,
}

/// Sum finalized slot records plus the open slot's live usage.
pub fn job_totals<'a>(records: impl IntoIterator<Item = &'a SlotUsage>) -> JobTotals {
    let mut totals = JobTotals::default();
    for record in records {
        match record.used_length_mm {
            Some(l) => *totals.length_mm.get_or_insert(0.0) += l,
            None => totals.length_incomplete = true,
        }
        if let Some(m) = record.used_mass_g {
            *totals.mass_g.get_or_insert(0.0) += m;
        }
    }
    totals
}
