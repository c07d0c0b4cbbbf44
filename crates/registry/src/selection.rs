//! Pure instance selection: filters, then strategy scoring.
//!
//! Deterministic under test: every strategy breaks ties by lexicographic
//! instance id (random excepted, by nature).

use rand::Rng;

use crate::instance::{Instance, SelectionCriteria, SelectionStrategy};

/// Apply the criteria filters in order.  The result is the candidate set
/// handed to strategy scoring.
pub fn filter_candidates<'a>(
    instances: &'a [Instance],
    criteria: &SelectionCriteria,
) -> Vec<&'a Instance> {
    instances
        .iter()
        .filter(|i| i.health.is_routable())
        .filter(|i| {
            criteria
                .preferred_provider
                .map(|p| i.provider == p)
                .unwrap_or(true)
        })
        .filter(|i| i.has_capabilities(&criteria.required_capabilities))
        .filter(|i| {
            criteria
                .region
                .as_ref()
                .map(|r| &i.region == r)
                .unwrap_or(true)
        })
        .filter(|i| !criteria.exclude.contains(&i.id))
        .filter(|i| {
            criteria.tags.is_empty() || criteria.tags.iter().any(|t| i.tags.contains(t))
        })
        .filter(|i| {
            criteria
                .min_available_capacity
                .map(|min| i.capacity.available >= min)
                .unwrap_or(true)
        })
        .collect()
}

/// Pick one candidate per the strategy.  `round_robin_tick` is the caller's
/// monotone counter value for this selection.
pub fn apply_strategy<'a>(
    mut candidates: Vec<&'a Instance>,
    criteria: &SelectionCriteria,
    round_robin_tick: u64,
) -> Option<&'a Instance> {
    if candidates.is_empty() {
        return None;
    }
    match criteria.strategy {
        SelectionStrategy::LeastLoaded => {
            candidates.sort_by(|a, b| {
                b.capacity
                    .available
                    .cmp(&a.capacity.available)
                    .then_with(|| {
                        a.capacity
                            .utilization_percent
                            .partial_cmp(&b.capacity.utilization_percent)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .then_with(|| a.id.cmp(&b.id))
            });
            candidates.first().copied()
        }
        SelectionStrategy::RoundRobin => {
            candidates.sort_by(|a, b| a.id.cmp(&b.id));
            let idx = (round_robin_tick % candidates.len() as u64) as usize;
            candidates.get(idx).copied()
        }
        SelectionStrategy::Random => {
            let idx = rand::thread_rng().gen_range(0..candidates.len());
            candidates.get(idx).copied()
        }
        SelectionStrategy::CapabilityMatch => {
            let required = &criteria.required_capabilities;
            candidates
                .into_iter()
                .map(|i| {
                    let score = capability_score(i, required) + f64::from(i.capacity.available);
                    (i, score)
                })
                .max_by(|(a, sa), (b, sb)| {
                    sa.partial_cmp(sb)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        // Prefer the lexicographically smaller id on ties.
                        .then_with(|| b.id.cmp(&a.id))
                })
                .map(|(i, _)| i)
        }
    }
}

fn capability_score(instance: &Instance, required: &[String]) -> f64 {
    if required.is_empty() {
        return 100.0;
    }
    let matching = required
        .iter()
        .filter(|cap| instance.capabilities.contains(cap))
        .count();
    matching as f64 / required.len() as f64 * 100.0
}
