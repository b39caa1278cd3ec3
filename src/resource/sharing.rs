//! Sharing policies.
//!
//! A sharing policy decides how the capacity of every resource is divided among the flows
//! (running resource actions) that use it. The kernel only relies on the contract of
//! [`SharingPolicy::share`]; the formulas are interchangeable.

use super::ResourceId;

/// One running action as seen by a sharing policy.
#[derive(Debug, Clone, Copy)]
pub struct Flow<'a> {
    /// Every resource this flow consumes capacity from.
    pub resources: &'a [ResourceId],
    /// Relative share compared to other flows. Flows with a weight of zero get nothing.
    pub weight: f64,
    /// Upper limit on the rate, `f64::INFINITY` when unbounded.
    pub bound: f64,
}

/// Computes flow rates from resource capacities.
pub trait SharingPolicy {
    /// Returns one rate per flow, in the order of `flows`.
    ///
    /// `capacities` is indexed by [`ResourceId::index`]. The rate of a flow never exceeds its
    /// bound, and the rates of the flows crossing a resource never sum to more than its capacity.
    /// A flow crossing no resource is limited by its bound only.
    fn share(&self, capacities: &[f64], flows: &[Flow<'_>]) -> Vec<f64>;
}

/// Splits each resource among its flows in proportion to their weight.
///
/// A flow crossing several resources gets the smallest of its shares. Capacity left unused by
/// bounded flows is not redistributed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FairShare;

impl SharingPolicy for FairShare {
    fn share(&self, capacities: &[f64], flows: &[Flow<'_>]) -> Vec<f64> {
        let mut weights = vec![0.0; capacities.len()];
        for flow in flows.iter().filter(|f| f.weight > 0.0) {
            for r in flow.resources {
                weights[r.index()] += flow.weight;
            }
        }
        flows
            .iter()
            .map(|flow| {
                if flow.weight <= 0.0 {
                    return 0.0;
                }
                flow.resources
                    .iter()
                    .map(|r| capacities[r.index()] * flow.weight / weights[r.index()])
                    .fold(flow.bound, f64::min)
            })
            .collect()
    }
}

/// Weighted max-min fairness.
///
/// Rates are raised together, proportionally to the weights, until a resource saturates or a
/// flow reaches its bound; those flows are then frozen and the others keep rising.
#[derive(Debug, Default, Clone, Copy)]
pub struct MaxMinFairness;

const SATURATION_TOLERANCE: f64 = 1e-12;

impl SharingPolicy for MaxMinFairness {
    fn share(&self, capacities: &[f64], flows: &[Flow<'_>]) -> Vec<f64> {
        let mut rates = vec![0.0; flows.len()];
        let mut fixed: Vec<bool> = flows
            .iter()
            .map(|f| f.weight <= 0.0 || f.resources.is_empty())
            .collect();
        for (rate, flow) in rates.iter_mut().zip(flows) {
            if flow.weight > 0.0 && flow.resources.is_empty() {
                *rate = flow.bound;
            }
        }
        let mut remaining = capacities.to_vec();

        while fixed.iter().any(|f| !f) {
            let mut weights = vec![0.0; capacities.len()];
            for (flow, _) in flows.iter().zip(&fixed).filter(|(_, f)| !**f) {
                for r in flow.resources {
                    weights[r.index()] += flow.weight;
                }
            }

            let mut level = f64::INFINITY;
            for (capacity, weight) in remaining.iter().zip(&weights) {
                if *weight > 0.0 {
                    level = level.min(capacity.max(0.0) / weight);
                }
            }
            for (flow, _) in flows.iter().zip(&fixed).filter(|(_, f)| !**f) {
                level = level.min(flow.bound / flow.weight);
            }
            let threshold = level * (1.0 + SATURATION_TOLERANCE);

            let mut newly_fixed = Vec::new();
            for (i, flow) in flows.iter().enumerate() {
                if fixed[i] {
                    continue;
                }
                let saturated = flow.resources.iter().any(|r| {
                    let weight = weights[r.index()];
                    weight > 0.0 && remaining[r.index()].max(0.0) / weight <= threshold
                });
                if saturated || flow.bound / flow.weight <= threshold {
                    rates[i] = (level * flow.weight).min(flow.bound);
                    newly_fixed.push(i);
                }
            }
            for &i in &newly_fixed {
                fixed[i] = true;
                for r in flows[i].resources {
                    remaining[r.index()] -= rates[i];
                }
            }
        }
        rates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(index: usize) -> ResourceId {
        ResourceId(index)
    }

    fn flow(resources: &[ResourceId]) -> Flow<'_> {
        Flow {
            resources,
            weight: 1.0,
            bound: f64::INFINITY,
        }
    }

    #[test]
    fn fair_share_splits_by_weight() {
        let res = [r(0)];
        let flows = [
            flow(&res),
            Flow {
                weight: 3.0,
                ..flow(&res)
            },
        ];
        assert_eq!(FairShare.share(&[100.0], &flows), vec![25.0, 75.0]);
    }

    #[test]
    fn fair_share_respects_bounds_and_zero_weight() {
        let res = [r(0)];
        let flows = [
            Flow {
                bound: 10.0,
                ..flow(&res)
            },
            Flow {
                weight: 0.0,
                ..flow(&res)
            },
        ];
        assert_eq!(FairShare.share(&[100.0], &flows), vec![10.0, 0.0]);
    }

    #[test]
    fn max_min_redistributes_unused_capacity() {
        // link 0 is shared by both flows, link 1 only limits the first one
        let both = [r(0), r(1)];
        let single = [r(0)];
        let flows = [flow(&both), flow(&single)];
        let rates = MaxMinFairness.share(&[100.0, 10.0], &flows);
        assert_eq!(rates, vec![10.0, 90.0]);
    }

    #[test]
    fn max_min_with_bound() {
        let res = [r(0)];
        let flows = [
            Flow {
                bound: 20.0,
                ..flow(&res)
            },
            flow(&res),
            flow(&res),
        ];
        let rates = MaxMinFairness.share(&[100.0], &flows);
        assert_eq!(rates, vec![20.0, 40.0, 40.0]);
    }

    #[test]
    fn flows_without_resources_get_their_bound() {
        let flows = [flow(&[])];
        assert_eq!(MaxMinFairness.share(&[], &flows), vec![f64::INFINITY]);
        assert_eq!(FairShare.share(&[], &flows), vec![f64::INFINITY]);
    }
}
