mod conflict;
mod error;
mod fitter;

pub use error::RegistryError;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::model::{Allocation, Ms, Span, State};
use crate::notify::NotificationGate;
use crate::observability;

use conflict::now_ms;

/// Authoritative store of live allocations.
///
/// One mutex guards the whole map: classification, conflict resolution,
/// fitting, mutation, cascade and notification enqueue all run as a single
/// critical section, so every decision sees a consistent snapshot and
/// cascades never interleave. Internal helpers operate on the borrowed,
/// already-locked map — there is no re-entrant locking.
pub struct Registry {
    allocations: Mutex<HashMap<String, Allocation>>,
    gate: Arc<dyn NotificationGate>,
}

impl Registry {
    pub fn new(gate: Arc<dyn NotificationGate>) -> Self {
        Self {
            allocations: Mutex::new(HashMap::new()),
            gate,
        }
    }

    // ── Read surface ─────────────────────────────────────

    pub async fn get(&self, id: &str) -> Option<Allocation> {
        self.allocations.lock().await.get(id).cloned()
    }

    pub async fn get_state(&self, id: &str) -> Option<State> {
        self.allocations.lock().await.get(id).map(|a| a.state)
    }

    pub async fn get_slot(&self, id: &str) -> Option<Span> {
        self.allocations.lock().await.get(id).map(|a| a.slot)
    }

    /// True iff a record exists for `id` and its state is live.
    pub async fn is_alive(&self, id: &str) -> bool {
        self.allocations
            .lock()
            .await
            .get(id)
            .is_some_and(|a| a.state.is_live())
    }

    pub async fn len(&self) -> usize {
        self.allocations.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.allocations.lock().await.is_empty()
    }

    // ── Ingress ──────────────────────────────────────────

    /// Single ingress operation: classify `incoming` against the stored
    /// record for its id and route it to request, inform, modify or
    /// finalize handling.
    pub async fn handle(&self, incoming: Allocation) -> Result<(), RegistryError> {
        let mut map = self.allocations.lock().await;
        let stored_state = map.get(&incoming.id).map(|a| a.state);
        match (stored_state, incoming.state) {
            (None, State::Requested) => {
                info!(id = %incoming.id, "admitting allocation request");
                metrics::counter!(observability::HANDLE_TOTAL, "action" => "request")
                    .increment(1);
                self.request(&mut map, incoming)
            }
            (Some(_), State::Requested) => {
                info!(id = %incoming.id, "known id re-requested, re-publishing current record");
                metrics::counter!(observability::HANDLE_TOTAL, "action" => "inform")
                    .increment(1);
                self.inform(&map, &incoming.id);
                Ok(())
            }
            (Some(State::Scheduled), State::Cancelled)
            | (Some(State::Allocated), State::Aborted | State::Released) => {
                info!(
                    id = %incoming.id,
                    from = ?stored_state,
                    to = ?incoming.state,
                    "client-requested state transition"
                );
                metrics::counter!(observability::HANDLE_TOTAL, "action" => "finalize")
                    .increment(1);
                self.finalize(&mut map, incoming, "client request")
            }
            (Some(stored), incoming_state @ (State::Scheduled | State::Allocated))
                if stored == incoming_state =>
            {
                info!(id = %incoming.id, state = ?incoming_state, "client-requested modification");
                metrics::counter!(observability::HANDLE_TOTAL, "action" => "modify")
                    .increment(1);
                self.modify(&mut map, incoming)
            }
            (stored, incoming_state) => {
                warn!(
                    id = %incoming.id,
                    stored = ?stored,
                    incoming = ?incoming_state,
                    "illegal client-requested state transition, ignoring"
                );
                metrics::counter!(observability::HANDLE_TOTAL, "action" => "illegal")
                    .increment(1);
                Err(RegistryError::IllegalTransition {
                    stored,
                    incoming: incoming_state,
                })
            }
        }
    }

    // ── Handlers ─────────────────────────────────────────

    /// Admit a new allocation. The tentative record is inserted before the
    /// fit is computed so concurrent conflict checks already see it.
    fn request(
        &self,
        map: &mut HashMap<String, Allocation>,
        allocation: Allocation,
    ) -> Result<(), RegistryError> {
        let id = allocation.id.clone();
        map.insert(id.clone(), allocation.clone());
        metrics::gauge!(observability::ALLOCATIONS_LIVE).set(map.len() as f64);
        self.gate.init(&id);

        let now = now_ms();
        match self.find_slot(map, &allocation, false, now) {
            None => {
                debug!(id = %id, "request failed, slot not available");
                metrics::counter!(observability::REQUESTS_REJECTED_TOTAL).increment(1);
                self.reject(map, &id, "slot not available");
                Err(RegistryError::SlotUnavailable(id))
            }
            Some(m) if m.end < now => {
                debug!(id = %id, "request failed, slot expired");
                self.release(map, &id, "slot expired");
                Err(RegistryError::SlotExpired(id))
            }
            Some(m) => {
                debug!(id = %id, start = m.start, end = m.end, "request granted");
                metrics::counter!(observability::REQUESTS_GRANTED_TOTAL).increment(1);
                self.schedule(map, allocation.with_slot(m));
                Ok(())
            }
        }
    }

    /// Store the fitted record as SCHEDULED, cascade, publish.
    fn schedule(&self, map: &mut HashMap<String, Allocation>, allocation: Allocation) {
        let id = allocation.id.clone();
        if !map.contains_key(&id) {
            warn!(id = %id, "attempt to schedule allocation ignored, not alive");
            return;
        }
        let scheduled = allocation.with_state(State::Scheduled);
        map.insert(id.clone(), scheduled.clone());
        self.update_affected(map, &scheduled, "slot superseded");
        if let Some(current) = map.get(&id) {
            self.gate.update(current, true);
        }
    }

    /// Re-publish the authoritative current record so a client re-submitting
    /// a known id learns its actual state instead of creating a duplicate.
    fn inform(&self, map: &HashMap<String, Allocation>, id: &str) {
        if let Some(current) = map.get(id) {
            self.gate.update(current, true);
        }
    }

    /// Attempt a re-fit for an already-live allocation. A failed fit keeps
    /// the stored slot but still cascades — the attempt itself may have
    /// changed ordering inputs for its peers.
    fn modify(
        &self,
        map: &mut HashMap<String, Allocation>,
        allocation: Allocation,
    ) -> Result<(), RegistryError> {
        let id = allocation.id.clone();
        let Some(stored) = map.get(&id).cloned() else {
            warn!(id = %id, "attempt to modify allocation ignored, not alive");
            return Err(RegistryError::NotAlive(id));
        };
        let now = now_ms();
        match self.find_slot(map, &allocation, false, now) {
            None => {
                debug!(id = %id, "modification failed, slot not available");
                self.update_entry(map, stored, Some("slot not available"), true);
                Err(RegistryError::SlotUnavailable(id))
            }
            Some(m) => {
                debug!(id = %id, start = m.start, end = m.end, "modification successful");
                self.update_entry(map, allocation.with_slot(m), Some("modification successful"), true);
                Ok(())
            }
        }
    }

    /// Store the incoming record carrying its terminal state, annotate,
    /// publish the final snapshot and drop it from the registry.
    fn finalize(
        &self,
        map: &mut HashMap<String, Allocation>,
        allocation: Allocation,
        reason: &str,
    ) -> Result<(), RegistryError> {
        if !map.contains_key(&allocation.id) {
            warn!(id = %allocation.id, "attempt to finalize allocation ignored, not alive");
            return Err(RegistryError::NotAlive(allocation.id));
        }
        let mut fin = allocation;
        fin.reasons.note(reason);
        self.remove_final(map, fin);
        Ok(())
    }

    /// Drive the stored record for `id` to `state` and drop it.
    fn finalize_as(
        &self,
        map: &mut HashMap<String, Allocation>,
        id: &str,
        state: State,
        reason: &str,
    ) {
        let Some(stored) = map.get(id).cloned() else {
            warn!(id, to = ?state, "attempt to finalize allocation ignored, not alive");
            return;
        };
        let mut fin = stored.with_state(state);
        fin.reasons.note(reason);
        self.remove_final(map, fin);
    }

    fn reject(&self, map: &mut HashMap<String, Allocation>, id: &str, reason: &str) {
        debug!(id, reason, "rejecting");
        self.finalize_as(map, id, State::Rejected, reason);
    }

    fn release(&self, map: &mut HashMap<String, Allocation>, id: &str, reason: &str) {
        debug!(id, reason, "releasing");
        self.finalize_as(map, id, State::Released, reason);
    }

    /// Publish a terminal snapshot and remove the record. The id is absent
    /// from the registry the instant this returns.
    fn remove_final(&self, map: &mut HashMap<String, Allocation>, fin: Allocation) {
        metrics::counter!(
            observability::FINALIZED_TOTAL,
            "state" => observability::state_label(fin.state)
        )
        .increment(1);
        self.gate.update(&fin, true);
        map.remove(&fin.id);
        metrics::gauge!(observability::ALLOCATIONS_LIVE).set(map.len() as f64);
    }

    /// Replace the stored record, annotate, optionally cascade, publish.
    fn update_entry(
        &self,
        map: &mut HashMap<String, Allocation>,
        allocation: Allocation,
        reason: Option<&str>,
        cascade: bool,
    ) {
        let id = allocation.id.clone();
        if !map.contains_key(&id) {
            warn!(id = %id, "attempt to update allocation ignored, not alive");
            return;
        }
        map.insert(id.clone(), allocation.clone());
        if let Some(reason) = reason
            && let Some(stored) = map.get_mut(&id) {
                stored.reasons.note(reason);
            }
        if cascade {
            self.update_affected(map, &allocation, "slot superseded");
        }
        if let Some(current) = map.get(&id) {
            self.gate.update(current, true);
        }
    }

    // ── Fitting pipeline ─────────────────────────────────

    /// Collect blockers for `allocation` and fit its slot around them.
    fn find_slot(
        &self,
        map: &HashMap<String, Allocation>,
        allocation: &Allocation,
        refit: bool,
        now: Ms,
    ) -> Option<Span> {
        let blockers = conflict::blockers(map, allocation, refit, now);
        trace!(id = %allocation.id, blockers = blockers.len(), refit, "fitting");
        let spans: Vec<Span> = blockers.iter().map(|b| b.slot).collect();
        fitter::fit(allocation, &spans, now)
    }

    /// Cascade: re-evaluate every live allocation disturbed by `allocation`.
    ///
    /// An affected record that no longer fits is driven to a terminal state
    /// (REQUESTED/SCHEDULED become CANCELLED, ALLOCATED becomes ABORTED); a
    /// record whose slot merely moved is replaced without a nested cascade.
    /// The affected set never contains the triggering id, so the walk is
    /// bounded by the number of live records.
    fn update_affected(
        &self,
        map: &mut HashMap<String, Allocation>,
        allocation: &Allocation,
        reason: &str,
    ) {
        let now = now_ms();
        let affected = conflict::affected(map, allocation, now);
        debug!(id = %allocation.id, affected = affected.len(), "cascading to affected allocations");
        for running in affected {
            match self.find_slot(map, &running, true, now) {
                None => {
                    let state = match running.state {
                        State::Allocated => State::Aborted,
                        _ => State::Cancelled,
                    };
                    debug!(id = %running.id, to = ?state, "no slot remains, finalizing");
                    metrics::counter!(observability::CASCADE_FINALIZED_TOTAL).increment(1);
                    let _ = self.finalize(map, running.with_state(state), reason);
                }
                Some(m) if m != running.slot => {
                    debug!(id = %running.id, start = m.start, end = m.end, "rescheduling");
                    metrics::counter!(observability::CASCADE_RESCHEDULED_TOTAL).increment(1);
                    self.update_entry(map, running.with_slot(m), Some(reason), false);
                }
                Some(_) => {}
            }
        }
    }

    // ── Lifecycle sweeps ─────────────────────────────────

    /// Promote SCHEDULED allocations whose start has arrived to ALLOCATED.
    /// Returns the promoted ids.
    pub async fn activate_due(&self, now: Ms) -> Vec<String> {
        let mut map = self.allocations.lock().await;
        let due: Vec<String> = map
            .values()
            .filter(|a| a.state == State::Scheduled && a.slot.contains_instant(now))
            .map(|a| a.id.clone())
            .collect();
        for id in &due {
            if let Some(stored) = map.get(id).cloned() {
                debug!(id = %id, "slot start reached, allocating");
                self.update_entry(&mut map, stored.with_state(State::Allocated), None, false);
            }
        }
        due
    }

    /// Ids of live allocations whose slot has fully elapsed at `now`.
    pub async fn collect_expired(&self, now: Ms) -> Vec<String> {
        self.allocations
            .lock()
            .await
            .values()
            .filter(|a| a.slot.end < now)
            .map(|a| a.id.clone())
            .collect()
    }

    /// Release an allocation whose slot has elapsed at `now`. Returns
    /// whether a record was dropped.
    pub async fn release_expired(&self, id: &str, now: Ms) -> bool {
        let mut map = self.allocations.lock().await;
        match map.get(id) {
            Some(a) if a.slot.end < now => {
                self.release(&mut map, id, "slot expired");
                true
            }
            _ => false,
        }
    }
}
