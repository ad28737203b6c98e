use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration_ms() / 60_000
    }
}

/// One person on a plan. `slots` holds every 15-minute slot start they marked
/// available, sorted ascending and deduplicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: Ulid,
    pub name: String,
    pub joined_at: Ms,
    pub last_active_at: Ms,
    pub slots: Vec<Ms>,
}

impl Participant {
    pub fn new(id: Ulid, name: String, at: Ms) -> Self {
        Self {
            id,
            name,
            joined_at: at,
            last_active_at: at,
            slots: Vec::new(),
        }
    }

    /// A participant "has responded" iff they submitted at least one slot.
    pub fn has_responded(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn holds_slot(&self, slot: Ms) -> bool {
        self.slots.binary_search(&slot).is_ok()
    }
}

/// A committed meeting window. Immutable once set — finalize replays must
/// return exactly this window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedWindow {
    pub start: Ms,
    pub end: Ms,
    pub at: Ms,
}

impl FinalizedWindow {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

#[derive(Debug, Clone)]
pub struct PlanState {
    pub token: String,
    pub title: String,
    pub owner_name: String,
    /// Salted SHA-256 of the owner key. Verified in constant time.
    pub owner_key_hash: [u8; 32],
    /// Positive multiple of 15.
    pub duration_minutes: i64,
    /// Slot-aligned availability range, half-open.
    pub range: Span,
    pub finalized: Option<FinalizedWindow>,
    /// Join order preserved — the finder's output ordering follows it.
    pub participants: Vec<Participant>,
}

impl PlanState {
    pub fn new(
        token: String,
        title: String,
        owner_name: String,
        owner_key_hash: [u8; 32],
        duration_minutes: i64,
        range: Span,
    ) -> Self {
        Self {
            token,
            title,
            owner_name,
            owner_key_hash,
            duration_minutes,
            range,
            finalized: None,
            participants: Vec::new(),
        }
    }

    pub fn participant(&self, id: &Ulid) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    pub fn participant_mut(&mut self, id: &Ulid) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| &p.id == id)
    }

    pub fn participant_by_name(&self, name: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.name == name)
    }
}

/// Flat event types — the WAL record format. Replaying the sequence rebuilds
/// exact plan state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    PlanCreated {
        token: String,
        title: String,
        owner_name: String,
        owner_key_hash: [u8; 32],
        duration_minutes: i64,
        range: Span,
    },
    /// Upsert by name: a known name refreshes `last_active_at`, a new name
    /// appends a participant.
    ParticipantJoined {
        token: String,
        participant_id: Ulid,
        name: String,
        at: Ms,
    },
    /// Full replace of the participant's slot set (sorted, deduplicated).
    AvailabilityReplaced {
        token: String,
        participant_id: Ulid,
        slots: Vec<Ms>,
        at: Ms,
    },
    PlanFinalized {
        token: String,
        window: FinalizedWindow,
    },
}

impl Event {
    pub fn token(&self) -> &str {
        match self {
            Event::PlanCreated { token, .. }
            | Event::ParticipantJoined { token, .. }
            | Event::AvailabilityReplaced { token, .. }
            | Event::PlanFinalized { token, .. } => token,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Output of the best-time search, in canonical instants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestTimeResult {
    pub start: Ms,
    pub end: Ms,
    /// Fully-available participants, in join order.
    pub participant_ids: Vec<Ulid>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMetaView {
    pub title: String,
    pub duration_minutes: i64,
    pub range_start: String,
    pub range_end: String,
    pub finalized_start: Option<String>,
    pub finalized_end: Option<String>,
    pub finalized_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub id: Ulid,
    pub name: String,
    pub joined_at: String,
    pub last_active_at: String,
    pub responded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapSlotView {
    pub slot_time: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BestTimeView {
    pub start_time: String,
    pub end_time: String,
    pub participant_ids: Vec<Ulid>,
    pub count: usize,
}

/// Everything in the plan-state response except the viewer-specific
/// `isOwner` flag. This is the cacheable part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStateBody {
    pub plan: PlanMetaView,
    pub participants: Vec<ParticipantView>,
    pub response_count: usize,
    pub total_participants: usize,
    pub best_time: Option<BestTimeView>,
    pub heatmap_data: Vec<HeatmapSlotView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStateView {
    #[serde(flatten)]
    pub body: PlanStateBody,
    pub is_owner: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeView {
    pub finalized_start: String,
    pub finalized_end: String,
    pub participant_ids: Vec<Ulid>,
    pub count: usize,
}
