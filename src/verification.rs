//! The verification engine (spec §4.4): folds accumulated MISS/NOSHOW test
//! results into a Bayesian alive/dead estimate for a GodPack, cached for
//! five minutes unless a caller forces a recalculation.

use std::collections::BTreeMap;

use chrono::Utc;
use strum_macros::{Display, EnumString};

use crate::{
    events::{EmissionBus, Event, EventKind, SeverityLevel},
    models::{GodPack, GpState, GpStatistics, NewGpStatistics, TestKind, TestResult},
    storage::Storage,
    Error,
};

/// Binomial coefficient `C(n, k)`, computed as a running product rather
/// than via factorials since `n` here never exceeds a friend list's size.
fn binomial(n: i64, k: i64) -> f64 {
    if k < 0 || n < 0 || k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    let mut result = 1.0_f64;
    for i in 0..k {
        result = result * (n - i) as f64 / (i + 1) as f64;
    }
    result
}

/// The fraction of a pack-equivalent a single NOSHOW test consumes: the
/// hypergeometric complement of drawing none of the GodPack's `s` open
/// slots in a blind look at an `f`-sized friend list (spec §4.4). Falls
/// back to the full 1.0 pack-equivalent wherever the combinatorics are
/// degenerate (guards replacing the source's divide-by-zero handling, per
/// §9).
fn noshow_weight(open_slots: i32, friend_count: i32) -> f64 {
    let s = i64::from(open_slots);
    let f = i64::from(friend_count.max(6));
    if s < 0 || f < 0 || s >= f || f - (4 - s) - 1 < s {
        return 1.0;
    }
    let d = 1.0 - binomial(f - (4 - s) - 1, s) / binomial(f - (4 - s), s);
    d.clamp(0.0, 1.0)
}

/// A human-facing verdict. Distinct from the GodPack's own lifecycle state:
/// a `TESTING` GodPack can carry any recommendation as evidence accrues,
/// and only a `LikelyDead` recommendation (or an admin) ever moves the row.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Display, EnumString)]
pub enum Recommendation {
    #[strum(serialize = "more tests needed")]
    MoreTestsNeeded,
    #[strum(serialize = "likely ALIVE")]
    LikelyAlive,
    #[strum(serialize = "possibly ALIVE")]
    PossiblyAlive,
    #[strum(serialize = "uncertain")]
    Uncertain,
    #[strum(serialize = "likely DEAD")]
    LikelyDead,
    #[strum(serialize = "inconclusive")]
    Inconclusive,
}

fn recommend(probability_alive: f64, confidence: f64) -> Recommendation {
    if confidence < 30.0 {
        Recommendation::MoreTestsNeeded
    } else if probability_alive > 80.0 && confidence > 50.0 {
        Recommendation::LikelyAlive
    } else if probability_alive > 60.0 && confidence > 40.0 {
        Recommendation::PossiblyAlive
    } else if probability_alive > 30.0 && confidence > 50.0 {
        Recommendation::Uncertain
    } else if probability_alive < 30.0 && confidence > 60.0 {
        Recommendation::LikelyDead
    } else {
        Recommendation::Inconclusive
    }
}

#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub gp_id: i32,
    /// Percentage, 0–100.
    pub probability_alive: f64,
    /// Percentage, 0–95.
    pub confidence: f64,
    pub recommendation: Recommendation,
    pub total_tests: i32,
    pub miss_tests: i32,
    pub noshow_tests: i32,
}

/// Computes the point estimate from a GodPack's accumulated test results.
/// Exposed standalone so callers (and tests) can reason about the math
/// without going through the cache.
#[must_use]
pub fn estimate(pack_slot_count: i16, results: &[TestResult]) -> VerificationResult {
    let miss_tests = results.iter().filter(|r| r.kind() == TestKind::Miss).count();
    let noshow_tests = results.iter().filter(|r| r.kind() == TestKind::Noshow).count();
    let total_tests = results.len();

    let k = f64::from(pack_slot_count.max(1));

    // Group by tester: each tester starts with `k` pack-equivalents
    // remaining and is an independent witness against the GodPack.
    let mut by_tester: BTreeMap<i64, f64> = BTreeMap::new();
    for r in results {
        let consumed = match r.kind() {
            TestKind::Miss => 1.0,
            TestKind::Noshow => noshow_weight(r.open_slots.unwrap_or(0), r.friend_count.unwrap_or(6)),
        };
        *by_tester.entry(r.worker_id).or_insert(k) -= consumed;
    }

    let probability_alive = by_tester
        .values()
        .map(|remaining| remaining.max(0.0) / k)
        .product::<f64>()
        * 100.0;

    let w = miss_tests as f64 + 0.7 * noshow_tests as f64;
    let confidence = (100.0 * (1.0 - (-w / 3.0_f64).exp())).min(95.0);

    let recommendation = recommend(probability_alive, confidence);

    VerificationResult {
        gp_id: 0,
        probability_alive,
        confidence,
        recommendation,
        total_tests: i32::try_from(total_tests).unwrap_or(i32::MAX),
        miss_tests: i32::try_from(miss_tests).unwrap_or(i32::MAX),
        noshow_tests: i32::try_from(noshow_tests).unwrap_or(i32::MAX),
    }
}

/// Evaluates and caches GodPack alive/dead estimates, auto-transitioning a
/// `TESTING` GodPack to `DEAD` once the evidence is conclusive. `ALIVE` is
/// never set automatically — spec §4.4 reserves it for admin verification.
#[derive(Clone)]
pub struct VerificationEngine {
    storage: Storage,
    bus: EmissionBus,
    cache_ttl: chrono::Duration,
}

impl VerificationEngine {
    #[must_use]
    pub fn new(storage: Storage, bus: EmissionBus, cache_ttl: std::time::Duration) -> Self {
        Self {
            storage,
            bus,
            cache_ttl: chrono::Duration::from_std(cache_ttl).unwrap_or(chrono::Duration::zero()),
        }
    }

    /// Returns the cached estimate for `gp_id` if it is fresher than the
    /// configured TTL, otherwise recomputes it from the full test-result
    /// history and refreshes the cache. Passing `force_recalculate` always
    /// recomputes.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reads, writes, or the godpack
    /// itself do not exist.
    pub fn evaluate(
        &self,
        gp_id: i32,
        force_recalculate: bool,
    ) -> Result<VerificationResult, Error> {
        if !force_recalculate {
            if let Some(cached) = self.storage.get_gp_statistics(gp_id)? {
                let age = Utc::now().naive_utc() - cached.last_calculated_ts;
                if age < self.cache_ttl {
                    return Ok(from_cache(gp_id, &cached));
                }
            }
        }

        let gp = self
            .storage
            .get_godpack(gp_id)?
            .ok_or_else(|| Error::InvalidInput(format!("unknown godpack {gp_id}")))?;
        let results = self.storage.list_test_results_for_godpack(gp_id)?;
        let mut result = estimate(gp.pack_slot_count, &results);
        result.gp_id = gp_id;

        self.storage.put_gp_statistics(&NewGpStatistics {
            gp_id,
            probability_alive: result.probability_alive,
            total_tests: result.total_tests,
            miss_tests: result.miss_tests,
            noshow_tests: result.noshow_tests,
            confidence_level: result.confidence,
            last_calculated_ts: Utc::now().naive_utc(),
        })?;

        self.maybe_transition(&gp, &result)?;
        Ok(result)
    }

    /// Moves a `TESTING` GodPack to `DEAD` once the recommendation reaches
    /// `LikelyDead`. Never reverses a prior verdict and never sets `ALIVE`
    /// — that transition is an admin action, [`VerificationEngine::mark_alive`].
    fn maybe_transition(&self, gp: &GodPack, result: &VerificationResult) -> Result<(), Error> {
        if gp.state() != GpState::Testing || result.recommendation != Recommendation::LikelyDead {
            return Ok(());
        }
        self.storage.transition_godpack(gp.gp_id, GpState::Dead)?;
        self.bus.publish(Event {
            kind: EventKind::GodPackStateChanged,
            severity: SeverityLevel::Info,
            payload: serde_json::json!({
                "gp_id": gp.gp_id,
                "to": GpState::Dead.to_string(),
                "probability_alive": result.probability_alive,
                "confidence": result.confidence,
            }),
            actor_worker_id: None,
        })?;
        Ok(())
    }

    /// Admin action: manually confirms a `TESTING` GodPack as `ALIVE`,
    /// bypassing the automated recommendation (spec §4.4).
    ///
    /// # Errors
    ///
    /// Returns an error if the GodPack isn't in `TESTING` or the update
    /// fails.
    pub fn mark_alive(&self, gp_id: i32, actor_worker_id: Option<i64>) -> Result<(), Error> {
        self.storage.transition_godpack(gp_id, GpState::Alive)?;
        self.bus.publish(Event {
            kind: EventKind::GodPackStateChanged,
            severity: SeverityLevel::Info,
            payload: serde_json::json!({ "gp_id": gp_id, "to": GpState::Alive.to_string(), "manual": true }),
            actor_worker_id,
        })?;
        Ok(())
    }
}

fn from_cache(gp_id: i32, cached: &GpStatistics) -> VerificationResult {
    let recommendation = recommend(cached.probability_alive, cached.confidence_level);
    VerificationResult {
        gp_id,
        probability_alive: cached.probability_alive,
        confidence: cached.confidence_level,
        recommendation,
        total_tests: cached.total_tests,
        miss_tests: cached.miss_tests,
        noshow_tests: cached.noshow_tests,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn miss(worker_id: i64) -> TestResult {
        TestResult {
            id: 0,
            worker_id,
            gp_id: 1,
            ts: Utc::now().naive_utc(),
            kind: TestKind::Miss.to_string(),
            open_slots: None,
            friend_count: None,
        }
    }

    fn noshow(worker_id: i64, open_slots: i32, friend_count: i32) -> TestResult {
        TestResult {
            id: 0,
            worker_id,
            gp_id: 1,
            ts: Utc::now().naive_utc(),
            kind: TestKind::Noshow.to_string(),
            open_slots: Some(open_slots),
            friend_count: Some(friend_count),
        }
    }

    #[test]
    fn no_evidence_is_inconclusive() {
        let r = estimate(1, &[]);
        assert_eq!(r.recommendation, Recommendation::MoreTestsNeeded);
        assert!((r.probability_alive - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn three_distinct_misses_match_the_worked_example() {
        // spec §8 scenario 4: three MISS tests from three distinct workers
        // on a pack_slot_count=3 GodPack.
        let results = vec![miss(1), miss(2), miss(3)];
        let r = estimate(3, &results);
        assert!((r.probability_alive - 29.6).abs() < 0.1);
        assert!((r.confidence - 63.2).abs() < 0.1);
    }

    #[test]
    fn noshow_weight_matches_the_worked_example() {
        // spec §8 scenario 5: d(4, 6) = 1 - C(5,4)/C(6,4) = 2/3.
        let d = noshow_weight(4, 6);
        assert!((d - 2.0 / 3.0).abs() < 1e-9);

        let results = vec![noshow(1, 4, 6)];
        let r = estimate(2, &results);
        assert!((r.probability_alive - 66.7).abs() < 0.1);
    }

    #[test]
    fn repeated_misses_from_one_worker_drive_toward_dead() {
        let results = vec![miss(1), miss(1), miss(1), miss(1), miss(1), miss(1)];
        let r = estimate(1, &results);
        assert_eq!(r.recommendation, Recommendation::LikelyDead);
        assert!(r.confidence >= 60.0);
        assert!(r.probability_alive < 30.0);
    }

    #[test]
    fn more_open_slots_make_noshows_weaker_evidence() {
        let few_friends = vec![noshow(1, 1, 6)];
        let many_friends = vec![noshow(1, 1, 50)];
        let tight = estimate(1, &few_friends);
        let loose = estimate(1, &many_friends);
        // a bigger friend list makes a single blind miss less surprising,
        // so the same test should look less like evidence of death.
        assert!(loose.probability_alive > tight.probability_alive);
    }
}
