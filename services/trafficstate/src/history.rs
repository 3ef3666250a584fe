use std::collections::{BTreeSet, VecDeque};

use tokio::sync::Mutex;

use crate::model::Observation;

/// Maximum number of observations retained.
pub const HISTORY_CAP: usize = 100;

struct HistoryState {
    recent: VecDeque<Observation>,
    gateways: BTreeSet<String>,
}

/// Bounded recent-observation window plus the set of gateways ever seen.
///
/// One mutex guards both structures so the append path (insert gateway,
/// push observation, evict oldest) is a single critical section and
/// readers always see a consistent point-in-time view.
pub struct HistoryStore {
    inner: Mutex<HistoryState>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HistoryState {
                recent: VecDeque::with_capacity(HISTORY_CAP),
                gateways: BTreeSet::new(),
            }),
        }
    }

    /// Records an observation, evicting the oldest entry once the cap
    /// would be exceeded. The gateway set only ever grows.
    pub async fn append(&self, observation: Observation) {
        let mut state = self.inner.lock().await;
        state.gateways.insert(observation.gateway.clone());
        state.recent.push_back(observation);
        if state.recent.len() > HISTORY_CAP {
            state.recent.pop_front();
        }
    }

    /// The last `n` observations in insertion order, oldest first.
    pub async fn snapshot(&self, n: usize) -> Vec<Observation> {
        let state = self.inner.lock().await;
        let skip = state.recent.len().saturating_sub(n);
        state.recent.iter().skip(skip).cloned().collect()
    }

    /// Every gateway identifier observed so far, sorted.
    pub async fn gateways(&self) -> Vec<String> {
        let state = self.inner.lock().await;
        state.gateways.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.recent.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.recent.is_empty()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrafficLevel;

    fn observation(n: u32, gateway: &str) -> Observation {
        Observation {
            timestamp: format!("t{}", n),
            lat: 0.0,
            lng: 0.0,
            vehicle_count: n,
            gateway: gateway.to_string(),
            traffic_level: TrafficLevel::classify(n),
        }
    }

    #[tokio::test]
    async fn test_cap_keeps_last_hundred_in_order() {
        let store = HistoryStore::new();
        for n in 1..=150 {
            store.append(observation(n, "gw-1")).await;
        }

        assert_eq!(store.len().await, 100);
        let all = store.snapshot(HISTORY_CAP).await;
        assert_eq!(all.len(), 100);
        assert_eq!(all.first().unwrap().timestamp, "t51");
        assert_eq!(all.last().unwrap().timestamp, "t150");
        for (i, obs) in all.iter().enumerate() {
            assert_eq!(obs.vehicle_count, 51 + i as u32);
        }
    }

    #[tokio::test]
    async fn test_snapshot_returns_last_n_oldest_first() {
        let store = HistoryStore::new();
        for n in 1..=5 {
            store.append(observation(n, "gw-1")).await;
        }

        let last_three = store.snapshot(3).await;
        let timestamps: Vec<&str> =
            last_three.iter().map(|o| o.timestamp.as_str()).collect();
        assert_eq!(timestamps, vec!["t3", "t4", "t5"]);

        // asking for more than is stored returns everything
        assert_eq!(store.snapshot(50).await.len(), 5);
    }

    #[tokio::test]
    async fn test_gateways_sorted_and_deduplicated() {
        let store = HistoryStore::new();
        for gateway in ["gw-b", "gw-a", "gw-b", "gw-c", "gw-a"] {
            store.append(observation(1, gateway)).await;
        }
        assert_eq!(store.gateways().await, vec!["gw-a", "gw-b", "gw-c"]);
    }

    #[tokio::test]
    async fn test_gateway_set_is_monotone() {
        let store = HistoryStore::new();
        let mut previous = 0;
        for n in 0..200u32 {
            store.append(observation(n, &format!("gw-{}", n % 7))).await;
            let size = store.gateways().await.len();
            assert!(size >= previous);
            previous = size;
        }
        assert_eq!(previous, 7);
    }

    #[tokio::test]
    async fn test_starts_empty() {
        let store = HistoryStore::new();
        assert!(store.is_empty().await);
        assert!(store.snapshot(25).await.is_empty());
        assert!(store.gateways().await.is_empty());
    }
}
