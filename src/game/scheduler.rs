use crate::game::pattern::{Pattern, SUBDIVISIONS_PER_BEAT};
use crate::game::timing::{self, SCHED_LOOKAHEAD_S};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

pub const REPETITIONS_PER_PATTERN: u32 = 1;
pub const PATTERNS_PER_LEVEL: u32 = 4;

// LISTEN measures swell a cymbal over their last two slots.
pub const SWELL_START_SLOT: usize = 14;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Listen,
    Tap,
}

impl Phase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Phase::Listen => "LISTEN",
            Phase::Tap => "TAP",
        }
    }
}

/// Everything needed to play (and later judge) one measure. The pattern is a
/// private copy, never a view into the pool.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurePlan {
    pub phase: Phase,
    pub start: f64,
    pub bpm: u32,
    pub level: u8,
    pub repetition: u32,
    pub pattern: Pattern,
}

impl MeasurePlan {
    #[inline(always)]
    pub fn end(&self) -> f64 {
        self.start + timing::measure_seconds(self.bpm)
    }

    /// Kick on every beat boundary.
    pub fn kick_times(&self) -> impl Iterator<Item = f64> + '_ {
        let subdiv = timing::subdivision_seconds(self.bpm);
        (0..crate::game::pattern::PATTERN_LENGTH)
            .step_by(SUBDIVISIONS_PER_BEAT)
            .map(move |slot| (slot as f64).mul_add(subdiv, self.start))
    }

    pub fn swell_start(&self) -> f64 {
        (SWELL_START_SLOT as f64).mul_add(timing::subdivision_seconds(self.bpm), self.start)
    }
}

/// Side effects that must happen at a given audio-clock time. These never
/// decide a judgment; they only move phase state forward and feed the host.
#[derive(Clone, Debug, PartialEq)]
pub enum Deferred {
    EnterPhase(MeasurePlan),
    PatternHit { label: String },
    /// Closes the TAP measure that started at `measure_start`.
    FinalizeTap { measure_start: f64 },
    Victory,
}

struct Entry<A> {
    at: f64,
    seq: u64,
    action: A,
}

impl<A> PartialEq for Entry<A> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<A> Eq for Entry<A> {}

impl<A> PartialOrd for Entry<A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<A> Ord for Entry<A> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at.total_cmp(&other.at).then(self.seq.cmp(&other.seq))
    }
}

/// Time-ordered queue of deferred actions. Actions due at the same instant
/// come out in insertion order.
pub struct DeferredQueue<A> {
    heap: BinaryHeap<Reverse<Entry<A>>>,
    next_seq: u64,
}

impl<A> Default for DeferredQueue<A> {
    fn default() -> Self {
        Self { heap: BinaryHeap::new(), next_seq: 0 }
    }
}

impl<A> DeferredQueue<A> {
    pub fn push(&mut self, at: f64, action: A) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Entry { at, seq, action }));
    }

    /// Pops the earliest action if it is due at `now`.
    pub fn pop_due(&mut self, now: f64) -> Option<(f64, A)> {
        match self.heap.peek() {
            Some(Reverse(e)) if e.at <= now => {}
            _ => return None,
        }
        self.heap.pop().map(|Reverse(e)| (e.at, e.action))
    }

    pub fn next_due(&self) -> Option<f64> {
        self.heap.peek().map(|Reverse(e)| e.at)
    }

    /// Cancels everything.
    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// What the scheduler moved on to after queueing a measure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Advance {
    /// LISTEN done, TAP of the same pattern comes next.
    ToTap,
    /// Another repetition of the same pattern.
    Repeat,
    /// Next pattern of the pool.
    NextPattern,
    /// The level's pattern quota is complete; progression decides what's next.
    LevelComplete,
}

/// Measure bookkeeping: where the next measure starts and which phase it
/// plays. Purely arithmetic, so it never drifts with the host timer.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasureCursor {
    next_measure_time: f64,
    phase: Phase,
    repetition: u32,
    completed: u32,
}

impl MeasureCursor {
    pub fn starting_at(first_measure_time: f64) -> Self {
        Self { next_measure_time: first_measure_time, phase: Phase::Listen, repetition: 1, completed: 0 }
    }

    #[inline(always)]
    pub fn next_measure_time(&self) -> f64 {
        self.next_measure_time
    }

    #[inline(always)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline(always)]
    pub fn repetition(&self) -> u32 {
        self.repetition
    }

    #[inline(always)]
    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// True while the next unscheduled measure starts inside the lookahead
    /// horizon.
    #[inline(always)]
    pub fn is_due(&self, now: f64) -> bool {
        self.next_measure_time < now + SCHED_LOOKAHEAD_S
    }

    /// Steps past the measure just queued. `measure_s` is that measure's
    /// duration at the tempo it was queued with.
    pub fn advance(&mut self, measure_s: f64) -> Advance {
        self.next_measure_time += measure_s;
        match self.phase {
            Phase::Listen => {
                self.phase = Phase::Tap;
                Advance::ToTap
            }
            Phase::Tap => {
                self.phase = Phase::Listen;
                self.repetition += 1;
                if self.repetition <= REPETITIONS_PER_PATTERN {
                    return Advance::Repeat;
                }
                self.repetition = 1;
                self.completed += 1;
                if self.completed >= PATTERNS_PER_LEVEL {
                    self.completed = 0;
                    Advance::LevelComplete
                } else {
                    Advance::NextPattern
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Advance, DeferredQueue, MeasureCursor, MeasurePlan, PATTERNS_PER_LEVEL, Phase};
    use crate::game::pattern::{PATTERN_LENGTH, Pattern};

    #[test]
    fn queue_orders_by_time_then_insertion() {
        let mut q = DeferredQueue::default();
        q.push(2.0, "late");
        q.push(1.0, "first");
        q.push(1.0, "second");
        assert_eq!(q.pop_due(0.5), None);
        assert_eq!(q.pop_due(5.0), Some((1.0, "first")));
        assert_eq!(q.pop_due(5.0), Some((1.0, "second")));
        assert_eq!(q.next_due(), Some(2.0));
        assert_eq!(q.pop_due(1.99), None);
        q.clear();
        assert!(q.is_empty());
    }

    #[test]
    fn cursor_cycles_listen_tap_and_counts_patterns() {
        let mut cursor = MeasureCursor::starting_at(1.0);
        let mut seen = Vec::new();
        for _ in 0..(PATTERNS_PER_LEVEL * 2) {
            seen.push(cursor.advance(4.0));
        }
        assert_eq!(
            seen,
            vec![
                Advance::ToTap,
                Advance::NextPattern,
                Advance::ToTap,
                Advance::NextPattern,
                Advance::ToTap,
                Advance::NextPattern,
                Advance::ToTap,
                Advance::LevelComplete,
            ]
        );
        assert_eq!(cursor.completed(), 0);
        assert_eq!(cursor.phase(), Phase::Listen);
        assert!((cursor.next_measure_time() - 33.0).abs() < 1e-12);
    }

    #[test]
    fn lookahead_horizon() {
        let cursor = MeasureCursor::starting_at(10.0);
        assert!(!cursor.is_due(9.8));
        assert!(cursor.is_due(9.9));
    }

    #[test]
    fn measure_plan_percussion_layout() {
        let plan = MeasurePlan {
            phase: Phase::Listen,
            start: 2.0,
            bpm: 60,
            level: 1,
            repetition: 1,
            pattern: Pattern::from_parts([false; PATTERN_LENGTH], &[]),
        };
        let kicks: Vec<f64> = plan.kick_times().collect();
        assert_eq!(kicks, vec![2.0, 3.0, 4.0, 5.0]);
        assert!((plan.swell_start() - 5.5).abs() < 1e-12);
        assert!((plan.end() - 6.0).abs() < 1e-12);
    }
}
