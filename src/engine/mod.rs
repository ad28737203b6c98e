mod best_time;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use best_time::{find_best_time, window_attendance};
pub use error::EngineError;
pub use mutations::{CreatedPlan, JoinOutcome};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::cache::TtlCache;
use crate::limits::STATE_CACHE_TTL_MS;
use crate::model::*;
use crate::wal::Wal;

use queries::CachedPlanState;

pub type SharedPlanState = Arc<RwLock<PlanState>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block on the first append, drain whatever else is immediately queued,
/// then do a single flush+fsync for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }
                flush_and_respond(&mut wal, &mut batch);
                if let Some(cmd) = deferred {
                    handle_non_append(&mut wal, cmd);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    plans: DashMap<String, SharedPlanState>,
    wal_tx: mpsc::Sender<WalCommand>,
    state_cache: TtlCache<CachedPlanState>,
    salt: String,
}

/// Apply an event directly to a PlanState (no locking — caller holds the
/// write lock).
fn apply_to_plan(plan: &mut PlanState, event: &Event) {
    match event {
        Event::ParticipantJoined {
            participant_id,
            name,
            at,
            ..
        } => {
            // Upsert by name: rejoining refreshes activity, never duplicates.
            if let Some(p) = plan.participants.iter_mut().find(|p| &p.name == name) {
                p.last_active_at = *at;
            } else {
                plan.participants
                    .push(Participant::new(*participant_id, name.clone(), *at));
            }
        }
        Event::AvailabilityReplaced {
            participant_id,
            slots,
            at,
            ..
        } => {
            if let Some(p) = plan.participant_mut(participant_id) {
                p.slots = slots.clone();
                p.last_active_at = *at;
            }
        }
        Event::PlanFinalized { window, .. } => {
            // First writer wins; a finalized window never moves.
            if plan.finalized.is_none() {
                plan.finalized = Some(*window);
            }
        }
        // Handled at the map level, not per plan.
        Event::PlanCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, salt: String) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            plans: DashMap::new(),
            wal_tx,
            state_cache: TtlCache::new(Duration::from_millis(STATE_CACHE_TTL_MS)),
            salt,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never blocking_write here: this may run inside
        // an async context.
        for event in &events {
            match event {
                Event::PlanCreated {
                    token,
                    title,
                    owner_name,
                    owner_key_hash,
                    duration_minutes,
                    range,
                } => {
                    let plan = PlanState::new(
                        token.clone(),
                        title.clone(),
                        owner_name.clone(),
                        *owner_key_hash,
                        *duration_minutes,
                        *range,
                    );
                    engine.plans.insert(token.clone(), Arc::new(RwLock::new(plan)));
                }
                other => {
                    if let Some(entry) = engine.plans.get(other.token()) {
                        let plan_arc = entry.value().clone();
                        let mut guard = plan_arc.try_write().expect("replay: uncontended write");
                        apply_to_plan(&mut guard, other);
                    }
                }
            }
        }

        metrics::gauge!(crate::observability::PLANS_ACTIVE).set(engine.plans.len() as f64);
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn plan_count(&self) -> usize {
        self.plans.len()
    }

    pub fn get_plan(&self, token: &str) -> Option<SharedPlanState> {
        self.plans.get(token).map(|e| e.value().clone())
    }

    pub(super) fn contains_plan(&self, token: &str) -> bool {
        self.plans.contains_key(token)
    }

    pub(super) fn insert_plan(&self, token: String, plan: PlanState) {
        self.plans.insert(token, Arc::new(RwLock::new(plan)));
        metrics::gauge!(crate::observability::PLANS_ACTIVE).set(self.plans.len() as f64);
    }

    /// WAL-append + apply + cache-invalidate in one call. The invalidation
    /// happens before the mutation returns, so a racing read observes either
    /// the pre-mutation cache entry or a fresh recomputation — never a stale
    /// entry after this call completes.
    pub(super) async fn persist_and_apply(
        &self,
        plan: &mut PlanState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_plan(plan, event);
        self.state_cache.invalidate(event.token());
        Ok(())
    }

    /// Minimal event sequence that recreates the current state.
    async fn snapshot_events(&self) -> Vec<Event> {
        // Collect Arcs first; a DashMap shard guard must not be held across
        // an await.
        let plan_arcs: Vec<SharedPlanState> =
            self.plans.iter().map(|e| e.value().clone()).collect();

        let mut events = Vec::new();
        for plan_arc in plan_arcs {
            let plan = plan_arc.read().await;
            events.push(Event::PlanCreated {
                token: plan.token.clone(),
                title: plan.title.clone(),
                owner_name: plan.owner_name.clone(),
                owner_key_hash: plan.owner_key_hash,
                duration_minutes: plan.duration_minutes,
                range: plan.range,
            });
            for p in &plan.participants {
                events.push(Event::ParticipantJoined {
                    token: plan.token.clone(),
                    participant_id: p.id,
                    name: p.name.clone(),
                    at: p.joined_at,
                });
                events.push(Event::AvailabilityReplaced {
                    token: plan.token.clone(),
                    participant_id: p.id,
                    slots: p.slots.clone(),
                    at: p.last_active_at,
                });
            }
            if let Some(window) = plan.finalized {
                events.push(Event::PlanFinalized {
                    token: plan.token.clone(),
                    window,
                });
            }
        }
        events
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let events = self.snapshot_events().await;
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
