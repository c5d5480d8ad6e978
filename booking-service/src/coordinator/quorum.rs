//! Majority locking across independent coordinator nodes.
//!
//! A key counts as set only when a majority of nodes accepted it and the
//! time spent collecting those grants still leaves part of the TTL, minus an
//! allowance for clock drift between nodes. A failed round gives back
//! whatever partial grants it collected so the next contender is not blocked
//! until expiry.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::Coordinator;
use crate::error::CoordinatorError;

const DRIFT_FACTOR: f64 = 0.01;
const DRIFT_FLOOR: Duration = Duration::from_millis(2);

pub struct QuorumCoordinator {
    nodes: Vec<Arc<dyn Coordinator>>,
}

impl QuorumCoordinator {
    pub fn new(nodes: Vec<Arc<dyn Coordinator>>) -> Self {
        Self { nodes }
    }

    pub fn quorum(&self) -> usize {
        self.nodes.len() / 2 + 1
    }

    fn drift(ttl: Duration) -> Duration {
        ttl.mul_f64(DRIFT_FACTOR) + DRIFT_FLOOR
    }

    /// Errors once so many nodes failed that a majority can no longer agree.
    fn check_reachable<T>(&self, results: &[Result<T, CoordinatorError>]) -> Result<(), CoordinatorError> {
        let failed = results.iter().filter(|r| r.is_err()).count();
        if self.nodes.len() - failed < self.quorum() {
            let first = results
                .iter()
                .find_map(|r| r.as_ref().err())
                .map(ToString::to_string)
                .unwrap_or_default();
            return Err(CoordinatorError::Unavailable(format!(
                "{failed} of {} nodes unreachable: {first}",
                self.nodes.len()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Coordinator for QuorumCoordinator {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CoordinatorError> {
        let started = Instant::now();
        let results = join_all(
            self.nodes
                .iter()
                .map(|node| node.set_if_absent(key, value, ttl)),
        )
        .await;

        let granted = results.iter().filter(|r| matches!(r, Ok(true))).count();
        let validity = ttl
            .checked_sub(started.elapsed())
            .and_then(|left| left.checked_sub(Self::drift(ttl)));

        if granted >= self.quorum() && validity.is_some_and(|v| !v.is_zero()) {
            debug!(%key, granted, nodes = self.nodes.len(), "quorum reached");
            return Ok(true);
        }

        if granted > 0 {
            debug!(%key, granted, "quorum not reached, rolling back partial grants");
            for (node, result) in self.nodes.iter().zip(&results) {
                if matches!(result, Ok(true)) {
                    if let Err(e) = node.compare_and_delete(key, value).await {
                        warn!(%key, error = %e, "failed to roll back partial lock grant");
                    }
                }
            }
        }

        self.check_reachable(&results)?;
        Ok(false)
    }

    /// Returns the value a majority of nodes agree on, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, CoordinatorError> {
        let results = join_all(self.nodes.iter().map(|node| node.get(key))).await;
        self.check_reachable(&results)?;

        let mut votes: HashMap<String, usize> = HashMap::new();
        for value in results.into_iter().flatten().flatten() {
            *votes.entry(value).or_default() += 1;
        }
        let quorum = self.quorum();
        Ok(votes
            .into_iter()
            .find(|(_, count)| *count >= quorum)
            .map(|(value, _)| value))
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> Result<bool, CoordinatorError> {
        let results = join_all(
            self.nodes
                .iter()
                .map(|node| node.compare_and_delete(key, expected)),
        )
        .await;

        let deleted = results.iter().filter(|r| matches!(r, Ok(true))).count();
        if deleted > 0 {
            return Ok(true);
        }
        if results.iter().all(|r| r.is_err()) {
            self.check_reachable(&results)?;
        }
        Ok(false)
    }

    async fn ping(&self) -> Result<(), CoordinatorError> {
        let results = join_all(self.nodes.iter().map(|node| node.ping())).await;
        self.check_reachable(&results)
    }
}
