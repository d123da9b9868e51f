use crate::game::interp::{LevelParams, reserve_measure_end};
use crate::game::timing;
use rand::{Rng, RngExt};
use smallvec::SmallVec;
use std::fmt;

pub const PATTERN_LENGTH: usize = 16;
pub const SUBDIVISIONS_PER_BEAT: usize = 4;
pub const BEATS_PER_MEASURE: usize = PATTERN_LENGTH / SUBDIVISIONS_PER_BEAT;
pub const TRIPLET_SUBHITS: usize = 3;

pub const FIRST_HIT_SLOTS: [usize; 3] = [1, 2, 3];
pub const JUMP_VALUES: [usize; 5] = [1, 2, 3, 4, 5];
// Beat boundaries after the first one.
pub const TRIPLET_BEAT_STARTS: [usize; 3] = [4, 8, 12];
pub const AFTER_TRIPLET_OFFSETS: [usize; 4] = [0, 1, 2, 3];

/// Two distinct patterns, each played twice: A B A B.
pub const POOL_SIZE: usize = 4;

#[inline(always)]
fn usable_weight(w: f64) -> f64 {
    if w.is_finite() { w.max(0.0) } else { 0.0 }
}

/// Picks an index from `weights` given a uniform sample `unit` in [0, 1).
///
/// Walks the cumulative sum in index order and returns the first index whose
/// running total reaches `unit * total`. Negative or non-finite weights count
/// as zero. A non-positive total always yields index 0.
pub fn weighted_index(weights: &[f64], unit: f64) -> usize {
    let total: f64 = weights.iter().copied().map(usable_weight).sum();
    if total <= 0.0 {
        return 0;
    }
    let r = unit * total;
    let mut acc = 0.0;
    for (i, w) in weights.iter().copied().enumerate() {
        acc += usable_weight(w);
        if r <= acc {
            return i;
        }
    }
    weights.len().saturating_sub(1)
}

pub fn weighted_choice<T: Copy, const N: usize, R: Rng + ?Sized>(
    values: &[T; N],
    weights: &[f64; N],
    rng: &mut R,
) -> T {
    let unit: f64 = rng.random();
    values[weighted_index(weights, unit)]
}

/// Position of one audible event inside a measure.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NoteEvent {
    pub slot: usize,
    /// 1-based triplet sub-hit, `None` for a plain grid hit.
    pub triplet: Option<u8>,
    pub target_time: f64,
}

impl NoteEvent {
    pub fn label(&self) -> String {
        match self.triplet {
            Some(k) => format!("beat {} triplet #{k}", self.slot / SUBDIVISIONS_PER_BEAT + 1),
            None => format!("note[{}]", self.slot + 1),
        }
    }
}

/// A measure-long hit grid. The last slot is the measure-end boundary and is
/// never a hit. A triplet beat keeps only its start slot flagged; the three
/// sub-hits are implied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    grid: [bool; PATTERN_LENGTH],
    triplet_beat_starts: SmallVec<[usize; 3]>,
}

impl Pattern {
    /// Builds a pattern from raw parts, repairing anything that breaks the
    /// grid invariants (measure-end hit, triplet interiors, unflagged starts).
    pub fn from_parts(mut grid: [bool; PATTERN_LENGTH], triplet_beat_starts: &[usize]) -> Self {
        let mut starts: SmallVec<[usize; 3]> = SmallVec::new();
        for &start in triplet_beat_starts {
            if start % SUBDIVISIONS_PER_BEAT != 0 || start >= PATTERN_LENGTH || starts.contains(&start) {
                continue;
            }
            starts.push(start);
        }
        starts.sort_unstable();
        for &start in &starts {
            reshape_triplet_beat(&mut grid, start);
        }
        grid[PATTERN_LENGTH - 1] = false;
        Self { grid, triplet_beat_starts: starts }
    }

    #[inline(always)]
    pub fn grid(&self) -> &[bool; PATTERN_LENGTH] {
        &self.grid
    }

    #[inline(always)]
    pub fn triplet_beat_starts(&self) -> &[usize] {
        &self.triplet_beat_starts
    }

    #[inline(always)]
    pub fn is_triplet_start(&self, slot: usize) -> bool {
        self.triplet_beat_starts.contains(&slot)
    }

    pub fn hit_count(&self) -> usize {
        self.grid
            .iter()
            .enumerate()
            .filter(|(_, hit)| **hit)
            .map(|(slot, _)| if self.is_triplet_start(slot) { TRIPLET_SUBHITS } else { 1 })
            .sum()
    }

    /// Every audible event of this pattern played at `bpm` from
    /// `measure_start`, sorted by target time.
    pub fn events(&self, bpm: u32, measure_start: f64) -> Vec<NoteEvent> {
        let subdiv = timing::subdivision_seconds(bpm);
        let beat = subdiv * SUBDIVISIONS_PER_BEAT as f64;
        let mut out = Vec::with_capacity(self.hit_count());
        for (slot, _) in self.grid.iter().enumerate().filter(|(_, hit)| **hit) {
            let slot_time = (slot as f64).mul_add(subdiv, measure_start);
            if self.is_triplet_start(slot) {
                for k in 0..TRIPLET_SUBHITS {
                    out.push(NoteEvent {
                        slot,
                        triplet: Some(k as u8 + 1),
                        target_time: slot_time + (k as f64 * beat) / TRIPLET_SUBHITS as f64,
                    });
                }
            } else {
                out.push(NoteEvent { slot, triplet: None, target_time: slot_time });
            }
        }
        out.sort_by(|a, b| a.target_time.total_cmp(&b.target_time));
        out
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for hit in self.grid {
            f.write_str(if hit { "x" } else { "." })?;
        }
        if !self.triplet_beat_starts.is_empty() {
            let beats: Vec<String> = self
                .triplet_beat_starts
                .iter()
                .map(|s| (s / SUBDIVISIONS_PER_BEAT + 1).to_string())
                .collect();
            write!(f, " | triplets: {}", beats.join(","))?;
        }
        Ok(())
    }
}

// Step one of the triplet transform: the beat keeps its start slot only.
fn reshape_triplet_beat(grid: &mut [bool; PATTERN_LENGTH], start: usize) {
    let end = (start + SUBDIVISIONS_PER_BEAT).min(PATTERN_LENGTH);
    grid[start..end].fill(false);
    grid[start] = true;
}

// Step two: the following beat is replaced by a single hit at `offset`.
fn overwrite_next_beat(grid: &mut [bool; PATTERN_LENGTH], next_start: usize, offset: usize) {
    let end = (next_start + SUBDIVISIONS_PER_BEAT).min(PATTERN_LENGTH);
    grid[next_start..end].fill(false);
    let slot = next_start + offset;
    if slot < PATTERN_LENGTH - 1 {
        grid[slot] = true;
    }
}

fn after_triplet_weights(params: &LevelParams, beat_start: usize) -> Option<[f64; 4]> {
    match beat_start {
        4 => Some(params.after_triplet2_weights),
        8 => Some(reserve_measure_end(params.after_triplet3_weights)),
        _ => None,
    }
}

/// Draws one pattern. Always terminates: jumps are strictly positive.
pub fn generate<R: Rng + ?Sized>(params: &LevelParams, rng: &mut R) -> Pattern {
    let mut grid = [false; PATTERN_LENGTH];
    let mut pos = weighted_choice(&FIRST_HIT_SLOTS, &params.first_hit_weights, rng);
    while pos < PATTERN_LENGTH - 1 {
        grid[pos] = true;
        pos += weighted_choice(&JUMP_VALUES, &params.jump_weights, rng);
    }
    grid[PATTERN_LENGTH - 1] = false;

    let mut triplet_beat_starts: SmallVec<[usize; 3]> = SmallVec::new();
    for (beat_index, &start) in TRIPLET_BEAT_STARTS.iter().enumerate() {
        if !grid[start] {
            continue;
        }
        let chance = params.triplet_chance[beat_index];
        if rng.random::<f64>() >= chance {
            continue;
        }
        triplet_beat_starts.push(start);
        reshape_triplet_beat(&mut grid, start);
        if let Some(weights) = after_triplet_weights(params, start) {
            let offset = weighted_choice(&AFTER_TRIPLET_OFFSETS, &weights, rng);
            overwrite_next_beat(&mut grid, start + SUBDIVISIONS_PER_BEAT, offset);
        }
    }

    Pattern { grid, triplet_beat_starts }
}

/// The rotating set of patterns for one level. The pool is a read-only
/// template: measures always receive a clone.
#[derive(Clone, Debug)]
pub struct PatternPool {
    slots: [Pattern; POOL_SIZE],
    index: usize,
}

impl PatternPool {
    pub fn generate<R: Rng + ?Sized>(params: &LevelParams, rng: &mut R) -> Self {
        let first = generate(params, rng);
        let second = generate(params, rng);
        Self {
            slots: [first.clone(), second.clone(), first, second],
            index: 0,
        }
    }

    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline(always)]
    pub fn current(&self) -> &Pattern {
        &self.slots[self.index]
    }

    /// A detached copy for a live measure.
    #[inline(always)]
    pub fn live_copy(&self) -> Pattern {
        self.current().clone()
    }

    /// Moves to the next slot; `false` once the pool is exhausted.
    pub fn advance(&mut self) -> bool {
        if self.index + 1 >= POOL_SIZE {
            return false;
        }
        self.index += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PATTERN_LENGTH, Pattern, PatternPool, TRIPLET_BEAT_STARTS, generate, weighted_choice,
        weighted_index,
    };
    use crate::game::interp::{Endpoints, LevelTables};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn check_invariants(p: &Pattern) {
        let grid = p.grid();
        assert!(!grid[PATTERN_LENGTH - 1], "measure end must stay free: {p}");
        assert!(grid[..PATTERN_LENGTH - 1].iter().any(|h| *h), "pattern has no hit: {p}");
        for &start in p.triplet_beat_starts() {
            assert!(grid[start], "triplet start must be flagged: {p}");
            assert!(
                grid[start + 1..start + 4].iter().all(|h| !*h),
                "triplet interior must be empty: {p}"
            );
        }
    }

    #[test]
    fn zero_weights_pick_the_first_candidate() {
        assert_eq!(weighted_index(&[0.0, 0.0, 0.0], 0.99), 0);
        assert_eq!(weighted_index(&[-3.0, f64::NAN, 0.0], 0.5), 0);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            assert_eq!(weighted_choice(&['a', 'b', 'c'], &[0.0, 0.0, 0.0], &mut rng), 'a');
        }
    }

    #[test]
    fn weighted_index_walks_cumulative_sum() {
        let w = [1.0, 0.0, 3.0];
        assert_eq!(weighted_index(&w, 0.0), 0);
        // Tie on the boundary resolves to the first index reaching it.
        assert_eq!(weighted_index(&w, 0.25), 0);
        assert_eq!(weighted_index(&w, 0.26), 2);
        assert_eq!(weighted_index(&w, 0.999), 2);
    }

    #[test]
    fn generated_patterns_hold_invariants_at_every_level() {
        let mut tables = LevelTables::default();
        tables.triplet_chance = Endpoints::new([1.0, 1.0, 1.0], [0.5, 0.5, 0.5]);
        let mut rng = StdRng::seed_from_u64(42);
        for level in 1..=10 {
            let params = tables.params_at(level);
            for _ in 0..200 {
                check_invariants(&generate(&params, &mut rng));
            }
        }
    }

    #[test]
    fn level_one_defaults_yield_half_note_grid() {
        // First hit on slot 2, jumps of 2 or 4 only.
        let params = LevelTables::default().params_at(1);
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            let p = generate(&params, &mut rng);
            assert!(p.grid()[2]);
            assert!(p.grid().iter().enumerate().all(|(i, h)| !*h || i % 2 == 0));
            assert!(p.triplet_beat_starts().is_empty());
        }
    }

    #[test]
    fn certain_triplet_overwrites_following_beat() {
        let mut tables = LevelTables::default();
        // Always start on slot 1, always jump 3: hits at 1,4,7,10,13.
        tables.first_hit = Endpoints::new([10.0, 0.0, 0.0], [10.0, 0.0, 0.0]);
        tables.jump = Endpoints::new([0.0, 0.0, 10.0, 0.0, 0.0], [0.0, 0.0, 10.0, 0.0, 0.0]);
        tables.triplet_chance = Endpoints::new([1.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
        tables.after_triplet2 = Endpoints::new([0.0, 0.0, 10.0, 0.0], [0.0, 0.0, 10.0, 0.0]);
        let params = tables.params_at(1);
        let p = generate(&params, &mut StdRng::seed_from_u64(1));
        assert_eq!(p.triplet_beat_starts(), &[4]);
        let hits: Vec<usize> = (0..PATTERN_LENGTH).filter(|i| p.grid()[*i]).collect();
        assert_eq!(hits, vec![1, 4, 10, 13]);
        assert_eq!(p.to_string(), ".x..x.....x..x.. | triplets: 2");
    }

    #[test]
    fn triplet_events_split_the_beat_in_three() {
        let mut grid = [false; PATTERN_LENGTH];
        grid[2] = true;
        grid[8] = true;
        grid[9] = true;
        let p = Pattern::from_parts(grid, &[8]);
        assert!(!p.grid()[9], "triplet interior is cleared");
        // 60 BPM: subdivision 0.25 s, beat 1 s.
        let events = p.events(60, 10.0);
        assert_eq!(events.len(), 4);
        assert!((events[0].target_time - 10.5).abs() < 1e-9);
        assert_eq!(events[0].label(), "note[3]");
        assert!((events[1].target_time - 12.0).abs() < 1e-9);
        assert!((events[2].target_time - (12.0 + 1.0 / 3.0)).abs() < 1e-9);
        assert!((events[3].target_time - (12.0 + 2.0 / 3.0)).abs() < 1e-9);
        assert_eq!(events[3].label(), "beat 3 triplet #3");
        assert!(events.windows(2).all(|w| w[0].target_time <= w[1].target_time));
    }

    #[test]
    fn pool_repeats_two_patterns_and_hands_out_copies() {
        let params = LevelTables::default().params_at(10);
        let mut rng = StdRng::seed_from_u64(77);
        let mut pool = PatternPool::generate(&params, &mut rng);
        let a = pool.live_copy();
        assert!(pool.advance());
        let b = pool.live_copy();
        assert!(pool.advance());
        assert_eq!(pool.live_copy(), a);
        assert!(pool.advance());
        assert_eq!(pool.live_copy(), b);
        assert!(!pool.advance());
        assert_eq!(pool.index(), 3);
        assert_eq!(pool.current(), &b);
    }

    #[test]
    fn triplet_candidates_sit_on_beat_boundaries() {
        assert!(TRIPLET_BEAT_STARTS.iter().all(|s| s % 4 == 0 && *s > 0));
    }
}
