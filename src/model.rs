use std::fmt;

use serde::{Deserialize, Serialize};

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
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Allocation lifecycle state. Live states keep the record in the registry;
/// reaching a terminal state removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Requested,
    Scheduled,
    Allocated,
    Cancelled,
    Aborted,
    Released,
    Rejected,
}

impl State {
    pub fn is_live(&self) -> bool {
        matches!(self, State::Requested | State::Scheduled | State::Allocated)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_live()
    }
}

/// How to pick a concrete slot among feasible windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Policy {
    /// Keep the requested position if at all possible.
    Preserve,
    /// Earliest feasible window of the requested duration.
    First,
    /// Longest feasible window; duration may differ from the requested one.
    Maximum,
}

/// Totally ordered: a higher-priority allocation displaces lower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
    Emergency,
}

/// Origin of a request. Human requests win equal-priority ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Initiator {
    Human,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Annotation {
    reason: String,
    count: u32,
}

/// Registry-maintained audit log: ordered `(reason, count)` pairs, rendered
/// as space-separated `reason[n]` tokens. Noting a reason that is already
/// present bumps its counter in place instead of appending a duplicate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotations(Vec<Annotation>);

impl Annotations {
    pub fn note(&mut self, reason: &str) {
        if let Some(a) = self.0.iter_mut().find(|a| a.reason == reason) {
            a.count += 1;
        } else {
            self.0.push(Annotation {
                reason: reason.to_string(),
                count: 1,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Annotations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, a) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}[{}]", a.reason, a.count)?;
        }
        Ok(())
    }
}

/// The central record: a request for (or grant of) exclusive use of a set of
/// resources over a time slot.
///
/// Treated as an immutable value — the registry replaces whole records, it
/// never mutates one in place. `with_state`/`with_slot` produce the changed
/// copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Unique among live allocations, conventionally `<ticket>#<session>`.
    /// Ids sharing the suffix after the last `#` never block each other.
    pub id: String,
    pub state: State,
    /// Currently requested or granted window.
    pub slot: Span,
    /// Outer bound the granted slot must lie in; defaults to `slot`.
    pub constraints: Option<Span>,
    pub policy: Policy,
    pub priority: Priority,
    pub initiator: Initiator,
    /// Hierarchical resource names, compared by string prefix. Never empty.
    pub resource_ids: Vec<String>,
    /// Free text supplied by the requester.
    pub description: Option<String>,
    /// Reasons appended by the registry, see [`Annotations`].
    #[serde(default)]
    pub reasons: Annotations,
}

impl Allocation {
    /// The window the granted slot must stay inside. Absent constraints pin
    /// the grant to the originally requested window.
    pub fn bound(&self) -> Span {
        self.constraints.unwrap_or(self.slot)
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    pub fn with_slot(mut self, slot: Span) -> Self {
        self.slot = slot;
        self
    }

    /// Requester description plus rendered reason annotations.
    pub fn display_description(&self) -> String {
        match (&self.description, self.reasons.is_empty()) {
            (Some(d), true) => d.clone(),
            (Some(d), false) => format!("{d} {}", self.reasons),
            (None, false) => self.reasons.to_string(),
            (None, true) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        let partial = Span::new(50, 200);
        assert!(outer.contains_span(&inner));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&partial));
    }

    #[test]
    fn state_liveness() {
        assert!(State::Requested.is_live());
        assert!(State::Scheduled.is_live());
        assert!(State::Allocated.is_live());
        assert!(State::Cancelled.is_terminal());
        assert!(State::Aborted.is_terminal());
        assert!(State::Released.is_terminal());
        assert!(State::Rejected.is_terminal());
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Urgent);
        assert!(Priority::Urgent < Priority::Emergency);
    }

    #[test]
    fn annotations_count_in_place() {
        let mut reasons = Annotations::default();
        reasons.note("slot not available");
        reasons.note("slot not available");
        assert_eq!(reasons.to_string(), "slot not available[2]");
    }

    #[test]
    fn annotations_preserve_order() {
        let mut reasons = Annotations::default();
        reasons.note("slot superseded");
        reasons.note("slot not available");
        reasons.note("slot superseded");
        assert_eq!(
            reasons.to_string(),
            "slot superseded[2] slot not available[1]"
        );
    }

    fn sample() -> Allocation {
        Allocation {
            id: "job#1".into(),
            state: State::Requested,
            slot: Span::new(100, 200),
            constraints: None,
            policy: Policy::First,
            priority: Priority::Normal,
            initiator: Initiator::System,
            resource_ids: vec!["r".into()],
            description: None,
            reasons: Annotations::default(),
        }
    }

    #[test]
    fn display_description_variants() {
        let mut a = sample();
        assert_eq!(a.display_description(), "");

        a.reasons.note("slot expired");
        assert_eq!(a.display_description(), "slot expired[1]");

        a.description = Some("nightly sweep".into());
        assert_eq!(a.display_description(), "nightly sweep slot expired[1]");
    }

    #[test]
    fn bound_defaults_to_slot() {
        let mut a = sample();
        assert_eq!(a.bound(), Span::new(100, 200));
        a.constraints = Some(Span::new(0, 1000));
        assert_eq!(a.bound(), Span::new(0, 1000));
    }

    #[test]
    fn with_field_changed_copies() {
        let a = sample();
        let b = a.clone().with_state(State::Scheduled);
        assert_eq!(b.state, State::Scheduled);
        assert_eq!(b.slot, a.slot);
        let c = b.with_slot(Span::new(300, 400));
        assert_eq!(c.slot, Span::new(300, 400));
        assert_eq!(c.state, State::Scheduled);
    }
}
