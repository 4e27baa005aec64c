//! Timer heap.
//!
//! Grounded in mio's `src/timer.rs` (a tick-wheel keyed by coarse
//! `Instant` buckets) but simplified to a multi-entry ordered map:
//! `(deadline, handler)` pairs in a `BTreeMap<Instant, Vec<HandlerId>>`,
//! with staleness detected at pop time by comparing the popped deadline
//! against the handler's own recorded next-fire instant (mio's wheel
//! instead discards on generation mismatch; either resolves the same
//! "handler rescheduled after this entry was queued" race).

use std::collections::BTreeMap;
use std::time::Instant;

use super::event::HandlerId;

#[derive(Default)]
pub struct TimerWheel {
    entries: BTreeMap<Instant, Vec<HandlerId>>,
}

impl TimerWheel {
    pub fn new() -> Self {
        TimerWheel { entries: BTreeMap::new() }
    }

    pub fn insert(&mut self, deadline: Instant, id: HandlerId) {
        self.entries.entry(deadline).or_default().push(id);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// The earliest deadline still queued, for computing the reactor's
    /// sleep bound.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().copied()
    }

    /// Remove and return every `(deadline, HandlerId)` entry whose
    /// deadline is `<= now`, in deadline order (and insertion order
    /// within a deadline, since `Vec` preserves push order).
    pub fn pop_ready(&mut self, now: Instant) -> Vec<(Instant, HandlerId)> {
        let mut ready = Vec::new();
        let still_pending = self.entries.split_off(&(now + std::time::Duration::from_nanos(1)));
        for (deadline, ids) in std::mem::replace(&mut self.entries, still_pending) {
            for id in ids {
                ready.push((deadline, id));
            }
        }
        ready
    }

    /// Drop every entry referencing `id`, e.g. when the handler detaches.
    pub fn remove_all(&mut self, id: HandlerId) {
        self.entries.retain(|_, ids| {
            ids.retain(|&x| x != id);
            !ids.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pop_ready_respects_deadline_order() {
        let mut wheel = TimerWheel::new();
        let base = Instant::now();
        wheel.insert(base + Duration::from_millis(20), HandlerId(2));
        wheel.insert(base + Duration::from_millis(10), HandlerId(1));
        wheel.insert(base + Duration::from_millis(30), HandlerId(3));

        let ready = wheel.pop_ready(base + Duration::from_millis(25));
        let ids: Vec<_> = ready.iter().map(|(_, id)| id.0).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(wheel.next_deadline(), Some(base + Duration::from_millis(30)));
    }

    #[test]
    fn insertion_order_within_equal_deadline() {
        let mut wheel = TimerWheel::new();
        let deadline = Instant::now();
        wheel.insert(deadline, HandlerId(1));
        wheel.insert(deadline, HandlerId(2));
        wheel.insert(deadline, HandlerId(3));

        let ready = wheel.pop_ready(deadline);
        let ids: Vec<_> = ready.iter().map(|(_, id)| id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
