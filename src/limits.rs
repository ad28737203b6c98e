//! Hard limits. Everything user-supplied is bounded before it touches the
//! engine.

use crate::model::Ms;

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_PLANS: usize = 100_000;
pub const MAX_PARTICIPANTS_PER_PLAN: usize = 200;
/// Longest plan range, in 15-minute slots (~41 days). Also caps a single
/// availability submission.
pub const MAX_TIMELINE_SLOTS: usize = 4000;

pub const TOKEN_LEN: usize = 8;
pub const OWNER_KEY_LEN: usize = 24;
pub const TOKEN_GENERATION_ATTEMPTS: usize = 10;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const STATE_CACHE_TTL_MS: u64 = 3000;
