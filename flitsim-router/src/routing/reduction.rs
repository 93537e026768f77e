// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Narrowing a routing response down before it is requested.

use crate::routing::Candidate;
use crate::settings::ReductionMode;

/// Filter `candidates` according to `mode`.
///
/// `status` gives the congestion of a candidate's output and is only
/// consulted in `Adaptive` mode.
#[must_use]
pub fn reduce<F>(mode: ReductionMode, candidates: Vec<Candidate>, status: F) -> Vec<Candidate>
where
    F: Fn(&Candidate) -> f64,
{
    if mode == ReductionMode::All {
        return candidates;
    }

    let Some(min_hops) = candidates.iter().map(|c| c.hops).min() else {
        return candidates;
    };
    let minimal: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.hops == min_hops)
        .collect();
    if mode == ReductionMode::Minimal {
        return minimal;
    }

    let statuses: Vec<f64> = minimal.iter().map(&status).collect();
    let least = statuses.iter().copied().fold(f64::INFINITY, f64::min);
    minimal
        .into_iter()
        .zip(statuses)
        .filter(|(_, s)| *s <= least)
        .map(|(c, _)| c)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(port: usize, vc: usize, hops: u32) -> Candidate {
        Candidate { port, vc, hops }
    }

    #[test]
    fn modes() {
        let candidates = vec![
            candidate(0, 0, 2),
            candidate(1, 0, 1),
            candidate(2, 1, 1),
            candidate(3, 0, 3),
        ];

        let all = reduce(ReductionMode::All, candidates.clone(), |_| 0.0);
        assert_eq!(all, candidates);

        let minimal = reduce(ReductionMode::Minimal, candidates.clone(), |_| 0.0);
        assert_eq!(minimal, vec![candidate(1, 0, 1), candidate(2, 1, 1)]);

        // Port 1 is busier so only port 2 remains
        let adaptive = reduce(ReductionMode::Adaptive, candidates, |c| {
            if c.port == 1 { 4.0 } else { 1.0 }
        });
        assert_eq!(adaptive, vec![candidate(2, 1, 1)]);
    }

    #[test]
    fn empty() {
        assert!(reduce(ReductionMode::Adaptive, Vec::new(), |_| 0.0).is_empty());
    }
}
