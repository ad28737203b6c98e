use std::collections::HashMap;

use crate::model::{
    BestTimeResult, BestTimeView, HeatmapSlotView, Ms, ParticipantView, PlanMetaView,
    PlanStateBody, PlanStateView,
};
use crate::time::{build_timeline, to_iso};

use super::{find_best_time, window_attendance, Engine, EngineError};

/// The viewer-independent share of a state response. One entry per plan
/// token; `is_owner` is recomputed per request against `owner_name`.
#[derive(Clone)]
pub(super) struct CachedPlanState {
    pub owner_name: String,
    pub body: PlanStateBody,
}

impl Engine {
    /// Aggregate the full plan state: heatmap, response counts, participant
    /// roster, and the current best window (or the committed one once
    /// finalized). Served from the TTL cache when fresh.
    pub async fn compute_state(
        &self,
        token: &str,
        viewer_name: Option<&str>,
    ) -> Result<PlanStateView, EngineError> {
        if let Some(cached) = self.state_cache.get(token) {
            metrics::counter!(crate::observability::STATE_CACHE_HITS_TOTAL).increment(1);
            let is_owner = viewer_name == Some(cached.owner_name.as_str());
            return Ok(PlanStateView {
                body: cached.body,
                is_owner,
            });
        }
        metrics::counter!(crate::observability::STATE_CACHE_MISSES_TOTAL).increment(1);

        let plan_arc = self
            .get_plan(token)
            .ok_or_else(|| EngineError::NotFound("plan".into()))?;
        let plan = plan_arc.read().await;

        let timeline = build_timeline(plan.range.start, plan.range.end);
        let slot_index: HashMap<Ms, usize> =
            timeline.iter().enumerate().map(|(i, &slot)| (slot, i)).collect();

        let mut heat_counts = vec![0usize; timeline.len()];
        for p in &plan.participants {
            for slot in &p.slots {
                if let Some(&idx) = slot_index.get(slot) {
                    heat_counts[idx] += 1;
                }
            }
        }
        let heatmap_data = timeline
            .iter()
            .zip(&heat_counts)
            .map(|(&slot, &count)| HeatmapSlotView {
                slot_time: to_iso(slot),
                count,
            })
            .collect();

        let participants: Vec<ParticipantView> = plan
            .participants
            .iter()
            .map(|p| ParticipantView {
                id: p.id,
                name: p.name.clone(),
                joined_at: to_iso(p.joined_at),
                last_active_at: to_iso(p.last_active_at),
                responded: p.has_responded(),
            })
            .collect();
        let response_count = plan.participants.iter().filter(|p| p.has_responded()).count();

        // Once finalized, the committed window is the answer; attendance is
        // still recomputed so later availability edits show up in the count.
        let best = match plan.finalized {
            Some(window) => {
                let ids = window_attendance(window.span(), &plan.participants);
                Some(BestTimeResult {
                    start: window.start,
                    end: window.end,
                    count: ids.len(),
                    participant_ids: ids,
                })
            }
            None => find_best_time(plan.range, plan.duration_minutes, &plan.participants)?,
        };
        let best_time = best.map(|b| BestTimeView {
            start_time: to_iso(b.start),
            end_time: to_iso(b.end),
            participant_ids: b.participant_ids,
            count: b.count,
        });

        let body = PlanStateBody {
            plan: PlanMetaView {
                title: plan.title.clone(),
                duration_minutes: plan.duration_minutes,
                range_start: to_iso(plan.range.start),
                range_end: to_iso(plan.range.end),
                finalized_start: plan.finalized.map(|w| to_iso(w.start)),
                finalized_end: plan.finalized.map(|w| to_iso(w.end)),
                finalized_at: plan.finalized.map(|w| to_iso(w.at)),
            },
            participants,
            response_count,
            total_participants: plan.participants.len(),
            best_time,
            heatmap_data,
        };

        self.state_cache.set(
            token.to_string(),
            CachedPlanState {
                owner_name: plan.owner_name.clone(),
                body: body.clone(),
            },
        );

        let is_owner = viewer_name == Some(plan.owner_name.as_str());
        Ok(PlanStateView { body, is_owner })
    }
}
