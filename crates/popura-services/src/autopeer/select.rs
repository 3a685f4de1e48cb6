//! Candidate ranking and sampling.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use url::Url;

use super::probe::{probe_peers, ProbeResult};
use super::proxy::ProxyConfig;

/// Keep reachable results, fastest first, at most `n`.
///
/// The sort is stable, so equal latencies keep probe order.
pub fn rank_reachable(results: Vec<ProbeResult>, n: usize) -> Vec<Url> {
    let mut online: Vec<ProbeResult> = results.into_iter().filter(|r| r.reachable).collect();
    online.sort_by_key(|r| r.latency);
    online.into_iter().take(n).map(|r| r.candidate).collect()
}

/// Probe `candidates` and return up to `n` online peers with the best latency.
pub async fn closest_peers(
    candidates: &[Url],
    n: usize,
    proxy: Option<&ProxyConfig>,
    timeout: Duration,
) -> Vec<Url> {
    let results = probe_peers(candidates, proxy, timeout).await;
    let online = results.iter().filter(|r| r.reachable).count();
    tracing::debug!(
        probed = results.len(),
        online,
        "catalog probe finished"
    );
    rank_reachable(results, n)
}

/// Pick `n` distinct elements at random. Lists no longer than `n` come back
/// unchanged.
pub fn random_pick<T: Clone>(list: &[T], n: usize) -> Vec<T> {
    if list.len() <= n {
        return list.to_vec();
    }
    let mut rng = StdRng::from_entropy();
    rand::seq::index::sample(&mut rng, list.len(), n)
        .into_iter()
        .map(|i| list[i].clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn uri(name: &str) -> Url {
        Url::parse(&format!("tcp://{name}.example:4000")).unwrap()
    }

    #[test]
    fn closest_two_skip_unreachable() {
        let results = vec![
            ProbeResult::reachable(uri("a"), Duration::from_millis(100)),
            ProbeResult::unreachable(uri("b")),
            ProbeResult::reachable(uri("c"), Duration::from_millis(20)),
        ];
        assert_eq!(rank_reachable(results, 2), vec![uri("c"), uri("a")]);
    }

    #[test]
    fn fewer_online_than_requested() {
        let results = vec![
            ProbeResult::unreachable(uri("a")),
            ProbeResult::reachable(uri("b"), Duration::from_millis(5)),
        ];
        assert_eq!(rank_reachable(results, 10), vec![uri("b")]);
        assert!(rank_reachable(vec![ProbeResult::unreachable(uri("x"))], 3).is_empty());
    }

    #[test]
    fn ranking_is_bounded_and_non_decreasing() {
        let results: Vec<ProbeResult> = (0..20u64)
            .map(|i| {
                let latency = Duration::from_millis((i * 37) % 11);
                if i % 3 == 0 {
                    ProbeResult::unreachable(uri(&format!("p{i}")))
                } else {
                    ProbeResult::reachable(uri(&format!("p{i}")), latency)
                }
            })
            .collect();
        let latency_of: std::collections::HashMap<Url, Duration> = results
            .iter()
            .map(|r| (r.candidate.clone(), r.latency))
            .collect();
        let reachable = results.iter().filter(|r| r.reachable).count();

        for n in [0, 1, 5, 13, 50] {
            let ranked = rank_reachable(results.clone(), n);
            assert!(ranked.len() <= n.min(reachable));
            let latencies: Vec<Duration> = ranked.iter().map(|u| latency_of[u]).collect();
            assert!(latencies.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn equal_latency_keeps_probe_order() {
        let d = Duration::from_millis(7);
        let results = vec![
            ProbeResult::reachable(uri("first"), d),
            ProbeResult::reachable(uri("second"), d),
        ];
        assert_eq!(rank_reachable(results, 2), vec![uri("first"), uri("second")]);
    }

    #[test]
    fn random_pick_returns_short_lists_unchanged() {
        let list = vec![1, 2, 3];
        assert_eq!(random_pick(&list, 3), list);
        assert_eq!(random_pick(&list, 10), list);
        assert!(random_pick::<u8>(&[], 1).is_empty());
    }

    #[test]
    fn random_pick_draws_distinct_members() {
        let list: Vec<u32> = (0..50).collect();
        for _ in 0..100 {
            let picked = random_pick(&list, 7);
            assert_eq!(picked.len(), 7);
            let unique: HashSet<_> = picked.iter().collect();
            assert_eq!(unique.len(), 7);
            assert!(picked.iter().all(|p| list.contains(p)));
        }
    }

    #[test]
    fn random_pick_reaches_beyond_the_first_n() {
        let list: Vec<u32> = (0..10).collect();
        let seen: HashSet<u32> = (0..200).flat_map(|_| random_pick(&list, 1)).collect();
        assert!(seen.iter().any(|&v| v > 0));
    }
}
