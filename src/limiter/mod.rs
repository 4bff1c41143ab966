//! Admission control for fetch pipelines
//!
//! Two gates are composed: a global gate capping in-flight pipelines for the
//! whole worker process, and one gate per target hostname. A pipeline holds a
//! [`FetchPermit`] for its entire run; dropping the permit releases both gates,
//! so every exit path (early return, `?`, panic unwinding) gives the slots back.
//!
//! Both gates are `tokio::sync::Semaphore`s, which queue waiters in FIFO order.

mod domain_gates;

pub use domain_gates::DomainGates;

use crate::HarvestError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Slots held by one running pipeline
///
/// Field order matters only for readability: the domain slot is released
/// first, then the global one.
#[derive(Debug)]
pub struct FetchPermit {
    _domain: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
    domain: String,
}

impl FetchPermit {
    /// The hostname this permit was granted for
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

/// Global + per-domain concurrency limiter
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    global: Arc<Semaphore>,
    global_limit: usize,
    domains: DomainGates,
}

impl ConcurrencyLimiter {
    /// Creates a limiter with unbounded domain-gate retention
    ///
    /// Limits below 1 are raised to 1 so that a misconfigured gate can never
    /// deadlock the worker.
    pub fn new(global_limit: usize, per_domain_limit: usize) -> Self {
        Self::with_idle_cap(global_limit, per_domain_limit, None)
    }

    /// Creates a limiter that retains at most `max_idle_domains` idle domain gates
    pub fn with_idle_cap(
        global_limit: usize,
        per_domain_limit: usize,
        max_idle_domains: Option<usize>,
    ) -> Self {
        let global_limit = global_limit.max(1);
        Self {
            global: Arc::new(Semaphore::new(global_limit)),
            global_limit,
            domains: DomainGates::new(per_domain_limit.max(1), max_idle_domains),
        }
    }

    /// Waits for a global slot, then a slot for `domain`
    ///
    /// # Errors
    ///
    /// Returns `HarvestError::LimiterClosed` if a semaphore was closed, which
    /// only happens while the process is tearing down.
    pub async fn acquire(&self, domain: &str) -> Result<FetchPermit, HarvestError> {
        let global = Arc::clone(&self.global)
            .acquire_owned()
            .await
            .map_err(|_| HarvestError::LimiterClosed)?;

        let gate = self.domains.gate(domain);
        let domain_permit = gate
            .acquire_owned()
            .await
            .map_err(|_| HarvestError::LimiterClosed)?;

        Ok(FetchPermit {
            _domain: domain_permit,
            _global: global,
            domain: domain.to_string(),
        })
    }

    /// Number of pipelines currently holding a global slot
    pub fn in_flight(&self) -> usize {
        self.global_limit - self.global.available_permits()
    }

    /// Number of domain gates currently retained
    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }
}
