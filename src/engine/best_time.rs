use std::collections::HashMap;

use ulid::Ulid;

use crate::model::{BestTimeResult, Ms, Participant, Span};
use crate::time::{add_minutes, build_timeline, minutes_between, SLOT_MINUTES};

use super::EngineError;

// ── Best-Time Algorithm ───────────────────────────────────────────

/// Find the contiguous window of `duration_minutes` that maximizes the count
/// of participants available for *every* slot in the window.
///
/// Deterministic: candidates are scanned front to back and only a strictly
/// greater attendance count displaces the current best, so among windows with
/// equal maximal attendance the earliest start always wins. `participant_ids`
/// follow the input order of `participants`.
///
/// `Ok(None)` when no window fits the range or no participant can attend any
/// window in full.
pub fn find_best_time(
    range: Span,
    duration_minutes: i64,
    participants: &[Participant],
) -> Result<Option<BestTimeResult>, EngineError> {
    if duration_minutes % SLOT_MINUTES != 0 {
        return Err(EngineError::InvalidInput(
            "durationMinutes must be a multiple of 15".into(),
        ));
    }

    let timeline = build_timeline(range.start, range.end);
    if duration_minutes > minutes_between(range.start, range.end) {
        return Ok(None);
    }
    if duration_minutes <= 0 {
        return Ok(None);
    }
    let window_slots = (duration_minutes / SLOT_MINUTES) as usize;
    if timeline.is_empty() || window_slots > timeline.len() {
        return Ok(None);
    }

    let slot_index: HashMap<Ms, usize> =
        timeline.iter().enumerate().map(|(i, &slot)| (slot, i)).collect();

    // Per participant: binary availability vector over timeline positions,
    // then prefix sums so "available slots in [s, e)" is an O(1) lookup.
    // Positional, aligned with `participants`.
    let prefixes: Vec<Vec<u32>> = participants
        .iter()
        .map(|p| {
            let mut available = vec![0u32; timeline.len()];
            for slot in &p.slots {
                if let Some(&idx) = slot_index.get(slot) {
                    available[idx] = 1;
                }
            }
            let mut prefix = vec![0u32; timeline.len() + 1];
            for i in 0..timeline.len() {
                prefix[i + 1] = prefix[i] + available[i];
            }
            prefix
        })
        .collect();

    let mut best_start: Option<usize> = None;
    let mut best_count = 0usize;
    let mut best_ids: Vec<Ulid> = Vec::new();

    for start in 0..=timeline.len() - window_slots {
        let end = start + window_slots;
        let ids: Vec<Ulid> = participants
            .iter()
            .zip(&prefixes)
            .filter(|(_, prefix)| (prefix[end] - prefix[start]) as usize == window_slots)
            .map(|(p, _)| p.id)
            .collect();

        if ids.len() > best_count {
            best_count = ids.len();
            best_start = Some(start);
            best_ids = ids;
        }
    }

    match best_start {
        Some(start) if best_count > 0 => {
            let start_time = timeline[start];
            Ok(Some(BestTimeResult {
                start: start_time,
                end: add_minutes(start_time, duration_minutes),
                participant_ids: best_ids,
                count: best_count,
            }))
        }
        _ => Ok(None),
    }
}

/// Participants holding every slot instant in `window`, in input order.
///
/// Shared by state aggregation and finalize so their attendance checks can
/// never drift apart: both match slot-by-slot on exact instants.
pub fn window_attendance(window: Span, participants: &[Participant]) -> Vec<Ulid> {
    let required = build_timeline(window.start, window.end);
    participants
        .iter()
        .filter(|p| required.iter().all(|slot| p.holds_slot(*slot)))
        .map(|p| p.id)
        .collect()
}
