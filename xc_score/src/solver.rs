//! Turning-point search: the polygon through recorded fixes with the largest total leg
//! length for a fixed number of turn points.
//!
//! The search alternates two steps. A combinatorial pass scores every `points + 2` subset of
//! a small candidate pool and keeps the best one. A refinement step then proposes, for every
//! vertex of the current best polygon, the fixes that would lengthen its adjacent legs the
//! most; those proposals (plus the indices of near-best combinations) form the next pool.
//! The search stops when a round proposes nothing new, when a pass fails to improve, after
//! `max_iter` rounds, or when the optional time limit expires. It is deterministic but not
//! guaranteed to find the global optimum.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use itertools::Itertools;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::distance::DistanceIndex;
use crate::track::Track;
use crate::XcError;

/// Combinations scored per parallel batch.
const COMBINATION_CHUNK: usize = 16_384;

/// Near-best band at round 0; widens by `NEAR_BEST_STEP` every round.
const NEAR_BEST_BASE: f64 = 0.95;
const NEAR_BEST_STEP: f64 = 0.02;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolveParams {
    /// Interior turn points; the polygon has `points + 2` vertices.
    pub points: usize,
    /// Size of the evenly spaced seed pool (raised to at least `points + 2`).
    pub guess: usize,
    /// Upper bound on refinement rounds.
    pub max_iter: usize,
    /// Wall-clock cap in seconds, checked between rounds.
    pub time_limit_s: Option<f64>,
}

impl Default for SolveParams {
    fn default() -> Self {
        Self {
            points: 3,
            guess: 0,
            max_iter: 20,
            time_limit_s: None,
        }
    }
}

impl SolveParams {
    pub fn params_hash_sha256(&self) -> Result<String, XcError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| XcError::InvalidParameter(e.to_string()))?;
        Ok(sha256_hex(&bytes))
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// A refinement round proposed no index outside the previous pass.
    Converged,
    /// The last pass did not beat the incumbent.
    NoImprovement,
    MaxIterations,
    TimeLimit,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Solution {
    /// Total leg length in meters; a lower bound on the true optimum.
    pub distance_m: f64,
    /// Strictly increasing track indices of the `points + 2` vertices.
    pub indices: Vec<usize>,
    pub rounds: usize,
    pub termination: Termination,
}

/// Best combination seen so far.
#[derive(Clone, Debug)]
struct Candidate {
    coords: Vec<usize>,
    distance: f64,
}

/// Outcome of one combinatorial pass over a pool.
#[derive(Debug)]
struct PassOutcome {
    best: Option<Candidate>,
    /// Indices of combinations inside the near-best band.
    keep: BTreeSet<usize>,
    /// Every index of every evaluated combination.
    data: BTreeSet<usize>,
    changed: bool,
    evaluated: usize,
}

pub struct TurningPointSolver<'a> {
    index: DistanceIndex<'a>,
    params: SolveParams,
}

impl<'a> TurningPointSolver<'a> {
    pub fn new(track: &'a Track, params: SolveParams) -> Self {
        Self {
            index: DistanceIndex::new(track),
            params,
        }
    }

    pub fn params(&self) -> &SolveParams {
        &self.params
    }

    pub fn distance_index(&self) -> &DistanceIndex<'a> {
        &self.index
    }

    pub fn solve(&self) -> Result<Solution, XcError> {
        let n = self.index.len();
        let size = self.params.points + 2;
        if n < 2 {
            return Err(XcError::InvalidRequest(format!(
                "a track of {n} fixes cannot be scored"
            )));
        }
        if size > n {
            return Err(XcError::InvalidRequest(format!(
                "{} turn points need {size} fixes, track has {n}",
                self.params.points
            )));
        }
        let deadline = match self.params.time_limit_s {
            // Limits beyond what `Instant` can represent mean no deadline.
            Some(secs) if secs.is_finite() && secs >= 0.0 => Duration::try_from_secs_f64(secs)
                .ok()
                .and_then(|limit| Instant::now().checked_add(limit)),
            Some(secs) => {
                return Err(XcError::InvalidParameter(format!(
                    "time limit {secs} is not a non-negative number of seconds"
                )))
            }
            None => None,
        };

        let guess = self.params.guess.max(size);
        let seed = seed_pool(n, guess);
        let first = self.evaluate_pool(&seed, size, None, 0);
        debug!(
            pool = seed.len(),
            evaluated = first.evaluated,
            "seed pass complete"
        );
        let mut best = first.best.ok_or_else(|| {
            XcError::InvalidRequest(format!("seed pool of {} yields no combination", seed.len()))
        })?;
        let mut changed = first.changed;
        let mut keep = BTreeSet::new();
        let mut data = BTreeSet::new();
        let mut rounds = 0usize;

        let termination = loop {
            if !changed {
                break Termination::NoImprovement;
            }
            if rounds >= self.params.max_iter {
                break Termination::MaxIterations;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(rounds, "time limit reached, returning best polygon so far");
                break Termination::TimeLimit;
            }

            let pool = self.next_pool(&keep, &best.coords);
            if pool.is_subset(&data) {
                info!(rounds, "no new candidates to process");
                break Termination::Converged;
            }

            let pool: Vec<usize> = pool.into_iter().collect();
            let outcome = self.evaluate_pool(&pool, size, Some(best.clone()), rounds);
            rounds += 1;
            debug!(
                round = rounds,
                pool = pool.len(),
                evaluated = outcome.evaluated,
                improved = outcome.changed,
                "refinement pass complete"
            );
            if let Some(candidate) = outcome.best {
                best = candidate;
            }
            keep = outcome.keep;
            data = outcome.data;
            changed = outcome.changed;
        };

        let distance_m = self.index.path_length(&best.coords);
        info!(
            distance_m,
            rounds,
            rows = self.index.materialized_rows(),
            ?termination,
            "turning point search finished"
        );
        Ok(Solution {
            distance_m,
            indices: best.coords,
            rounds,
            termination,
        })
    }

    /// Candidates for the next pass: the near-best indices of the last pass plus the
    /// refinement proposals around `coords`.
    fn next_pool(&self, keep: &BTreeSet<usize>, coords: &[usize]) -> BTreeSet<usize> {
        let mut pool = keep.clone();
        self.propose(coords, &mut pool);
        pool
    }

    /// Add the refinement proposals for every vertex of `coords` to `pool`.
    fn propose(&self, coords: &[usize], pool: &mut BTreeSet<usize>) {
        let last_fix = self.index.len() - 1;
        let last_vertex = coords.len() - 1;
        for (n, &j) in coords.iter().enumerate() {
            let i = if n == 0 { 0 } else { coords[n - 1] };
            let k = if n == last_vertex { last_fix } else { coords[n + 1] };

            let row_i = self.index.row(i);
            let row_j = self.index.row(j);
            let row_k = self.index.row(k);

            pool.insert(j);
            pool.extend(argmax_in(i, k, |x| row_i[x] + row_k[x]));
            if n == 0 {
                pool.extend(argmax_in(0, k, |x| row_k[x]));
            }
            if n == last_vertex {
                pool.extend(argmax_in(i, last_fix, |x| row_i[x]));
            }
            if i < j {
                pool.extend(argmax_in(i, j, |x| row_i[x] + row_j[x]));
            }
            if j < k {
                pool.extend(argmax_in(j, k, |x| row_j[x] + row_k[x]));
            }
        }
    }

    /// Score every `size`-combination of the sorted `pool`, starting from `incumbent`.
    ///
    /// Chunks are scored in parallel and then swept in enumeration order, so the outcome is
    /// the same as a sequential sweep: strict improvement replaces the incumbent (earliest
    /// combination wins ties) and combinations above the near-best band of the running best
    /// contribute their indices to `keep`.
    fn evaluate_pool(
        &self,
        pool: &[usize],
        size: usize,
        incumbent: Option<Candidate>,
        round: usize,
    ) -> PassOutcome {
        self.index.prefetch(pool);
        let band = NEAR_BEST_BASE + NEAR_BEST_STEP * round as f64;

        let mut outcome = PassOutcome {
            best: incumbent,
            keep: BTreeSet::new(),
            data: BTreeSet::new(),
            changed: false,
            evaluated: 0,
        };
        let mut combinations = pool.iter().copied().combinations(size);
        loop {
            let chunk: Vec<Vec<usize>> = combinations.by_ref().take(COMBINATION_CHUNK).collect();
            if chunk.is_empty() {
                break;
            }
            let scores: Vec<f64> = chunk
                .par_iter()
                .map(|coords| self.index.path_length(coords))
                .collect();

            outcome.evaluated += chunk.len();
            for (coords, distance) in chunk.into_iter().zip(scores) {
                outcome.data.extend(coords.iter().copied());
                match outcome.best.as_ref().map(|b| b.distance) {
                    Some(best) if distance <= best => {
                        if distance > band * best {
                            outcome.keep.extend(coords.iter().copied());
                        }
                    }
                    _ => {
                        outcome.best = Some(Candidate { coords, distance });
                        outcome.changed = true;
                    }
                }
            }
        }
        outcome
    }
}

/// Score `track` with the given parameters.
pub fn solve(track: &Track, params: &SolveParams) -> Result<Solution, XcError> {
    TurningPointSolver::new(track, params.clone()).solve()
}

/// `guess` evenly spaced indices over `[0, n-1]`, floored and deduplicated.
fn seed_pool(n: usize, guess: usize) -> Vec<usize> {
    if guess < 2 {
        return vec![0];
    }
    let mut pool: Vec<usize> = (0..guess).map(|g| g * (n - 1) / (guess - 1)).collect();
    pool.dedup();
    pool
}

/// First index in `lo..=hi` maximizing `score`, or `None` for an empty range.
fn argmax_in<F>(lo: usize, hi: usize, score: F) -> Option<usize>
where
    F: Fn(usize) -> f64,
{
    let mut best: Option<(usize, f64)> = None;
    for x in lo..=hi {
        let value = score(x);
        if best.map_or(true, |(_, b)| value > b) {
            best = Some((x, value));
        }
    }
    best.map(|(x, _)| x)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
