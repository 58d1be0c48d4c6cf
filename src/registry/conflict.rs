use std::collections::HashMap;

use crate::model::{Allocation, Initiator, Ms};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Suffix after the last `#`, when both halves are non-empty.
fn ticket(id: &str) -> Option<&str> {
    let (prefix, suffix) = id.rsplit_once('#')?;
    if prefix.is_empty() || suffix.is_empty() {
        None
    } else {
        Some(suffix)
    }
}

/// Two ids issued under the same ticket never block or disturb each other,
/// regardless of priority. Ids without a ticket get no special permission.
pub(crate) fn is_permitted(one: &str, two: &str) -> bool {
    match (ticket(one), ticket(two)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Hierarchical name overlap: `"arm"` claims `"arm/gripper"` and vice versa.
pub(crate) fn shares_resource(one: &[String], two: &[String]) -> bool {
    one.iter()
        .any(|a| two.iter().any(|b| a.starts_with(b.as_str()) || b.starts_with(a.as_str())))
}

/// Live allocations standing in the way of `candidate`.
///
/// A stored record blocks when it shares a resource and outranks the
/// candidate, or ranks equal while the pass is a refit or the candidate is
/// SYSTEM-initiated — a fresh human request is never blocked by an
/// equal-priority peer. Permitted peers and elapsed slots are dropped; the
/// rest is sorted earliest-ending first so the fitter searches
/// deterministically.
pub(crate) fn blockers(
    stored: &HashMap<String, Allocation>,
    candidate: &Allocation,
    refit: bool,
    now: Ms,
) -> Vec<Allocation> {
    let mut blocking: Vec<Allocation> = stored
        .values()
        .filter(|s| s.id != candidate.id)
        .filter(|s| !is_permitted(&s.id, &candidate.id))
        .filter(|s| shares_resource(&s.resource_ids, &candidate.resource_ids))
        .filter(|s| {
            s.priority > candidate.priority
                || (s.priority == candidate.priority
                    && (refit || candidate.initiator == Initiator::System))
        })
        .filter(|s| s.slot.end >= now)
        .cloned()
        .collect();
    blocking.sort_by_key(|s| s.slot.end);
    blocking
}

/// Live allocations disturbed by granting `candidate`: everyone sharing a
/// resource at strictly lower priority, plus equal-priority peers when the
/// candidate is HUMAN-initiated. Deliberately asymmetric to `blockers` — the
/// permission exemption is applied there, so a permitted peer re-fits to its
/// unchanged slot and comes out untouched.
pub(crate) fn affected(
    stored: &HashMap<String, Allocation>,
    candidate: &Allocation,
    now: Ms,
) -> Vec<Allocation> {
    let mut affected: Vec<Allocation> = stored
        .values()
        .filter(|s| s.id != candidate.id)
        .filter(|s| shares_resource(&s.resource_ids, &candidate.resource_ids))
        .filter(|s| {
            s.priority < candidate.priority
                || (s.priority == candidate.priority && candidate.initiator == Initiator::Human)
        })
        .filter(|s| s.slot.end >= now)
        .cloned()
        .collect();
    affected.sort_by_key(|s| s.slot.end);
    affected
}
