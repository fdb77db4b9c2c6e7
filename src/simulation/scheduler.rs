//! Virtual-time event scheduler.
//!
//! A single-threaded cooperative timeline: the clock only moves when the next
//! event is popped, and never backwards. Handlers run to completion between
//! pops, so everything between two scheduled wakeups is atomic from the
//! timeline's perspective. Determinism comes from the strict `(time, seq)`
//! dispatch order; no wall-clock value ever enters the engine.

use std::collections::BinaryHeap;

use super::event::{Event, Scheduled};
use super::packet::NodeId;

/// Abort the run on a broken engine invariant, with enough context to find
/// the culprit in a trace: virtual time, node and invariant name.
pub fn invariant_violation(now: u64, node: Option<NodeId>, invariant: &str, detail: &str) -> ! {
    match node {
        Some(node) => panic!(
            "invariant violated at t={now}us on node {node}: {invariant} ({detail})"
        ),
        None => panic!("invariant violated at t={now}us: {invariant} ({detail})"),
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    now: u64,
    queue: BinaryHeap<Scheduled>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler::default()
    }

    /// Current virtual time (us).
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Schedule an event at an absolute instant. Scheduling into the past is
    /// an engine bug, not a recoverable condition.
    pub fn schedule_at(&mut self, time: u64, event: Event) {
        if time < self.now {
            invariant_violation(
                self.now,
                None,
                "monotonic-clock",
                &format!("event scheduled at t={time}us, before now"),
            );
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled { time, seq, event });
    }

    /// Schedule an event `dt` microseconds from now.
    pub fn schedule_in(&mut self, dt: u64, event: Event) {
        self.schedule_at(self.now.saturating_add(dt), event);
    }

    /// Pop the next event no later than `horizon`, advancing the clock to its
    /// instant. Returns `None` when the queue is exhausted or the next event
    /// lies beyond the horizon (the clock is then left untouched; callers
    /// advance it explicitly with [`Scheduler::advance_to`]).
    pub fn pop_next(&mut self, horizon: u64) -> Option<Scheduled> {
        let due = self.queue.peek().map(|s| s.time <= horizon).unwrap_or(false);
        if !due {
            return None;
        }
        let scheduled = self.queue.pop().expect("peeked event vanished");
        debug_assert!(scheduled.time >= self.now);
        self.now = scheduled.time;
        Some(scheduled)
    }

    /// Move the clock forward to `time` without dispatching anything.
    pub fn advance_to(&mut self, time: u64) {
        if time > self.now {
            self.now = time;
        }
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_follows_pops_and_is_monotonic() {
        let mut sched = Scheduler::new();
        sched.schedule_in(100, Event::MetricsTick);
        sched.schedule_in(50, Event::MetricsTick);

        let first = sched.pop_next(u64::MAX).unwrap();
        assert_eq!(first.time, 50);
        assert_eq!(sched.now(), 50);

        let second = sched.pop_next(u64::MAX).unwrap();
        assert_eq!(second.time, 100);
        assert_eq!(sched.now(), 100);
        assert!(sched.pop_next(u64::MAX).is_none());
    }

    #[test]
    fn horizon_bounds_dispatch() {
        let mut sched = Scheduler::new();
        sched.schedule_in(500, Event::MetricsTick);
        assert!(sched.pop_next(499).is_none());
        assert_eq!(sched.now(), 0);

        sched.advance_to(499);
        assert_eq!(sched.now(), 499);
        assert!(sched.pop_next(500).is_some());
    }

    #[test]
    fn same_instant_dispatch_is_fifo() {
        let mut sched = Scheduler::new();
        for node in 0..4 {
            sched.schedule_at(10, Event::HelloTimer { node });
        }
        let mut order = Vec::new();
        while let Some(s) = sched.pop_next(u64::MAX) {
            if let Event::HelloTimer { node } = s.event {
                order.push(node);
            }
        }
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "monotonic-clock")]
    fn scheduling_into_the_past_aborts() {
        let mut sched = Scheduler::new();
        sched.schedule_at(100, Event::MetricsTick);
        sched.pop_next(u64::MAX);
        sched.schedule_at(50, Event::MetricsTick);
    }
}
