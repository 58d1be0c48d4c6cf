use crate::model::{Allocation, Ms, Policy, Span, State};

// ── Interval kernel ──────────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub(crate) fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Subtract sorted `to_remove` from each span in `base`.
pub(crate) fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Free windows left inside `bound` once all blocker spans are carved out.
fn free_windows(bound: Span, blocking: &[Span]) -> Vec<Span> {
    let mut blocked = blocking.to_vec();
    blocked.sort_by_key(|s| s.start);
    let blocked = merge_overlapping(&blocked);
    subtract_intervals(&[bound], &blocked)
}

// ── Policy searches ──────────────────────────────────────────────

/// Earliest window of `duration` among the free windows.
fn find_first(duration: Ms, free: &[Span]) -> Option<Span> {
    free.iter()
        .find(|w| w.duration_ms() >= duration)
        .map(|w| Span::new(w.start, w.start + duration))
}

/// Window of `duration` starting as close as possible to `preferred`.
/// Earlier window wins a distance tie.
fn find_preserve(preferred: Ms, duration: Ms, free: &[Span]) -> Option<Span> {
    let mut best: Option<(Ms, Span)> = None;
    for w in free {
        if w.duration_ms() < duration {
            continue;
        }
        let start = preferred.clamp(w.start, w.end - duration);
        let dist = (start - preferred).abs();
        match best {
            Some((d, _)) if d <= dist => {}
            _ => best = Some((dist, Span::new(start, start + duration))),
        }
    }
    best.map(|(_, s)| s)
}

/// Longest non-empty free window, earliest winning ties.
fn find_max(free: &[Span]) -> Option<Span> {
    let mut best: Option<Span> = None;
    for &w in free {
        if w.duration_ms() == 0 {
            continue;
        }
        match best {
            Some(b) if b.duration_ms() >= w.duration_ms() => {}
            _ => best = Some(w),
        }
    }
    best
}

// ── Running allocations ──────────────────────────────────────────

/// Remainder of a running slot after carving out every blocker: the earliest
/// piece not already elapsed, stretched backward so the current instant stays
/// inside. A running allocation must never retroactively become invalid.
fn find_remaining(slot: Span, blocking: &[Span], now: Ms) -> Option<Span> {
    let mut blocked = blocking.to_vec();
    blocked.sort_by_key(|s| s.start);
    let blocked = merge_overlapping(&blocked);
    subtract_intervals(&[slot], &blocked)
        .into_iter()
        .find(|p| p.end > now)
        .map(|p| Span::new(p.start.min(now), p.end))
}

/// Extend a slot so it reaches the current instant.
fn include_now(slot: Span, now: Ms) -> Span {
    Span::new(slot.start.min(now), slot.end.max(now))
}

// ── Entry point ──────────────────────────────────────────────────

/// Concrete granted window for `candidate` against `blocking`, or `None`
/// when infeasible. Blocker spans must be sorted by end time (the conflict
/// resolver's order); the kernel re-sorts by start internally.
pub(crate) fn fit(candidate: &Allocation, blocking: &[Span], now: Ms) -> Option<Span> {
    if candidate.state == State::Allocated {
        return if blocking.is_empty() {
            Some(include_now(candidate.slot, now))
        } else {
            find_remaining(candidate.slot, blocking, now)
        };
    }
    if blocking.is_empty() {
        return Some(candidate.slot);
    }
    let free = free_windows(candidate.bound(), blocking);
    let duration = candidate.slot.duration_ms();
    match candidate.policy {
        Policy::Preserve => find_preserve(candidate.slot.start, duration, &free),
        Policy::First => find_first(duration, &free),
        Policy::Maximum => find_max(&free),
    }
}
