//! Lazily-created per-hostname gates

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;

/// Map from hostname to that hostname's semaphore
///
/// Gates are created on first use. Without an idle cap they are never removed,
/// which is fine for a worker that sees a bounded job's worth of domains. With
/// a cap, gates that nobody holds or waits on are evicted once the map grows
/// past it.
#[derive(Debug)]
pub struct DomainGates {
    per_domain: usize,
    max_idle: Option<usize>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl DomainGates {
    pub fn new(per_domain: usize, max_idle: Option<usize>) -> Self {
        Self {
            per_domain: per_domain.max(1),
            max_idle,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the gate for `domain`, creating it if needed
    ///
    /// The returned `Arc` is what makes a gate "busy": holders and waiters
    /// keep a clone alive, so a gate whose only reference is the map entry is
    /// fully idle and safe to drop.
    pub fn gate(&self, domain: &str) -> Arc<Semaphore> {
        // Semaphore state lives outside the map, so a poisoned map is still consistent
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(gate) = gates.get(domain) {
            return Arc::clone(gate);
        }

        let gate = Arc::new(Semaphore::new(self.per_domain));
        gates.insert(domain.to_string(), Arc::clone(&gate));

        if let Some(cap) = self.max_idle {
            if gates.len() > cap {
                let before = gates.len();
                gates.retain(|_, g| !is_idle(g, self.per_domain));
                tracing::debug!(
                    evicted = before - gates.len(),
                    retained = gates.len(),
                    "Evicted idle domain gates"
                );
            }
        }

        gate
    }

    pub fn len(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_idle(gate: &Arc<Semaphore>, per_domain: usize) -> bool {
    Arc::strong_count(gate) == 1 && gate.available_permits() == per_domain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_domain_shares_gate() {
        let gates = DomainGates::new(2, None);
        let a = gates.gate("example.com");
        let b = gates.gate("example.com");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(gates.len(), 1);
    }

    #[test]
    fn test_unbounded_map_keeps_everything() {
        let gates = DomainGates::new(1, None);
        for i in 0..50 {
            gates.gate(&format!("site{}.com", i));
        }
        assert_eq!(gates.len(), 50);
    }

    #[test]
    fn test_idle_gates_evicted_past_cap() {
        let gates = DomainGates::new(1, Some(3));
        for i in 0..10 {
            gates.gate(&format!("site{}.com", i));
        }
        assert!(gates.len() <= 3);
    }

    #[tokio::test]
    async fn test_busy_gate_survives_eviction() {
        let gates = DomainGates::new(1, Some(1));

        let busy = gates.gate("busy.com");
        let _permit = Arc::clone(&busy).acquire_owned().await.unwrap();
        drop(busy);

        for i in 0..5 {
            gates.gate(&format!("idle{}.com", i));
        }

        // The held permit keeps busy.com's semaphore alive and in the map
        let again = gates.gate("busy.com");
        assert_eq!(again.available_permits(), 0);
    }
}
