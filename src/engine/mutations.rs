use ulid::Ulid;

use crate::auth::{generate_owner_key, generate_plan_token, hash_owner_key, verify_owner_key};
use crate::limits::{
    MAX_NAME_LEN, MAX_PARTICIPANTS_PER_PLAN, MAX_PLANS, MAX_TIMELINE_SLOTS, MAX_TITLE_LEN,
    MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS, TOKEN_GENERATION_ATTEMPTS,
};
use crate::model::{Event, FinalizedWindow, FinalizeView, Ms, PlanState, Span};
use crate::time::{
    build_timeline, is_slot_aligned, minutes_between, now_ms, to_iso, SLOT_MINUTES,
};

use super::{find_best_time, window_attendance, Engine, EngineError};

/// What the creator gets back. The owner key is returned exactly once and
/// never stored in the clear.
#[derive(Debug)]
pub struct CreatedPlan {
    pub token: String,
    pub owner_key: String,
}

#[derive(Debug)]
pub struct JoinOutcome {
    pub participant_id: Ulid,
    pub is_owner: bool,
}

impl Engine {
    /// Create a plan over a slot-normalized range and hand the creator the
    /// share token plus the one-time owner key.
    pub async fn create_plan(
        &self,
        title: &str,
        owner_name: &str,
        range: Span,
        duration_minutes: i64,
    ) -> Result<CreatedPlan, EngineError> {
        let title = title.trim();
        let owner_name = owner_name.trim();
        if title.is_empty() {
            return Err(EngineError::InvalidInput("title must not be empty".into()));
        }
        if owner_name.is_empty() {
            return Err(EngineError::InvalidInput("name must not be empty".into()));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(EngineError::LimitExceeded("title too long"));
        }
        if owner_name.chars().count() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        if duration_minutes <= 0 || duration_minutes % SLOT_MINUTES != 0 {
            return Err(EngineError::InvalidInput(
                "durationMinutes must be a positive multiple of 15".into(),
            ));
        }
        if self.plan_count() >= MAX_PLANS {
            return Err(EngineError::LimitExceeded("too many plans"));
        }

        if range.start < MIN_VALID_TIMESTAMP_MS || range.end > MAX_VALID_TIMESTAMP_MS {
            return Err(EngineError::InvalidInput(
                "time range is outside the supported date range".into(),
            ));
        }
        let range_minutes = minutes_between(range.start, range.end);
        if range_minutes <= 0 {
            return Err(EngineError::InvalidInput(
                "time range must be greater than zero".into(),
            ));
        }
        if build_timeline(range.start, range.end).len() > MAX_TIMELINE_SLOTS {
            return Err(EngineError::LimitExceeded("time range too long"));
        }
        if duration_minutes > range_minutes {
            return Err(EngineError::InvalidInput(
                "durationMinutes exceeds the selected time range".into(),
            ));
        }

        let token = self.unique_token()?;
        let owner_key = generate_owner_key();
        let owner_key_hash = hash_owner_key(&self.salt, &owner_key);

        let event = Event::PlanCreated {
            token: token.clone(),
            title: title.to_string(),
            owner_name: owner_name.to_string(),
            owner_key_hash,
            duration_minutes,
            range,
        };
        self.wal_append(&event).await?;

        let plan = PlanState::new(
            token.clone(),
            title.to_string(),
            owner_name.to_string(),
            owner_key_hash,
            duration_minutes,
            range,
        );
        self.insert_plan(token.clone(), plan);

        tracing::info!(%token, duration_minutes, "plan created");
        Ok(CreatedPlan { token, owner_key })
    }

    fn unique_token(&self) -> Result<String, EngineError> {
        for _ in 0..TOKEN_GENERATION_ATTEMPTS {
            let token = generate_plan_token();
            if !self.contains_plan(&token) {
                return Ok(token);
            }
        }
        Err(EngineError::Internal("unable to generate a unique plan token"))
    }

    /// Join by name. Joining again under the same name is an upsert that
    /// returns the original participant id.
    pub async fn join_plan(&self, token: &str, name: &str) -> Result<JoinOutcome, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidInput("name must not be empty".into()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("name too long"));
        }

        let plan_arc = self
            .get_plan(token)
            .ok_or_else(|| EngineError::NotFound("plan".into()))?;
        let mut plan = plan_arc.write().await;

        let participant_id = match plan.participant_by_name(name) {
            Some(existing) => existing.id,
            None => {
                if plan.participants.len() >= MAX_PARTICIPANTS_PER_PLAN {
                    return Err(EngineError::LimitExceeded("too many participants"));
                }
                Ulid::new()
            }
        };

        let event = Event::ParticipantJoined {
            token: token.to_string(),
            participant_id,
            name: name.to_string(),
            at: now_ms(),
        };
        self.persist_and_apply(&mut plan, &event).await?;

        Ok(JoinOutcome {
            participant_id,
            is_owner: name == plan.owner_name,
        })
    }

    /// Replace the participant's entire slot set. Every timestamp must be
    /// slot-aligned and inside the plan's range; the stored set is sorted and
    /// deduplicated.
    pub async fn replace_availability(
        &self,
        token: &str,
        participant_id: &Ulid,
        timestamps: &[Ms],
    ) -> Result<usize, EngineError> {
        let plan_arc = self
            .get_plan(token)
            .ok_or_else(|| EngineError::NotFound("plan".into()))?;
        let mut plan = plan_arc.write().await;

        if plan.participant(participant_id).is_none() {
            return Err(EngineError::NotFound("participant".into()));
        }

        let timeline_len = build_timeline(plan.range.start, plan.range.end).len();
        if timestamps.len() > timeline_len {
            return Err(EngineError::InvalidInput(
                "more timestamps than slots in the plan range".into(),
            ));
        }
        for &ts in timestamps {
            if !is_slot_aligned(ts) {
                return Err(EngineError::InvalidInput(format!(
                    "timestamp {} is not aligned to a 15-minute slot",
                    to_iso(ts)
                )));
            }
            if ts < plan.range.start || ts >= plan.range.end {
                return Err(EngineError::InvalidInput(format!(
                    "timestamp {} is outside the plan range",
                    to_iso(ts)
                )));
            }
        }

        let mut slots = timestamps.to_vec();
        slots.sort_unstable();
        slots.dedup();
        let stored = slots.len();

        let event = Event::AvailabilityReplaced {
            token: token.to_string(),
            participant_id: *participant_id,
            slots,
            at: now_ms(),
        };
        self.persist_and_apply(&mut plan, &event).await?;

        Ok(stored)
    }

    /// Lock in the best window. Idempotent: once finalized, every subsequent
    /// call returns the committed window unchanged (attendance is recomputed
    /// against current availability). The write guard is held across the
    /// check, the search, and the apply, so concurrent finalize calls
    /// serialize and all agree on one window.
    pub async fn finalize_plan(
        &self,
        token: &str,
        owner_key: &str,
    ) -> Result<FinalizeView, EngineError> {
        let plan_arc = self
            .get_plan(token)
            .ok_or_else(|| EngineError::NotFound("plan".into()))?;
        let mut plan = plan_arc.write().await;

        if !verify_owner_key(&plan.owner_key_hash, &self.salt, owner_key) {
            return Err(EngineError::Unauthorized);
        }

        if let Some(window) = plan.finalized {
            let ids = window_attendance(window.span(), &plan.participants);
            // Replays may observe a cached pre-finalize state otherwise.
            self.state_cache.invalidate(token);
            return Ok(FinalizeView {
                finalized_start: to_iso(window.start),
                finalized_end: to_iso(window.end),
                count: ids.len(),
                participant_ids: ids,
            });
        }

        let best = find_best_time(plan.range, plan.duration_minutes, &plan.participants)?
            .ok_or(EngineError::Conflict(
                "cannot finalize because no valid overlap exists",
            ))?;

        let window = FinalizedWindow {
            start: best.start,
            end: best.end,
            at: now_ms(),
        };
        let event = Event::PlanFinalized {
            token: token.to_string(),
            window,
        };
        self.persist_and_apply(&mut plan, &event).await?;

        tracing::info!(%token, start = %to_iso(window.start), "plan finalized");
        Ok(FinalizeView {
            finalized_start: to_iso(window.start),
            finalized_end: to_iso(window.end),
            participant_ids: best.participant_ids,
            count: best.count,
        })
    }
}
