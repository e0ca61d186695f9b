//! Append-only registry of applied payment identifiers.
//!
//! Guards the ledger against double-crediting when a confirmation
//! event is redelivered or a status endpoint is polled again after a
//! terminal result. Records are never overwritten.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRecord {
    pub charge_id: String,
    pub tokens_applied: u64,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Record `charge_id` if it has not been seen before. Returns true
    /// when the record was created (caller may credit), false when the
    /// identifier was already applied (caller must not credit).
    async fn record_if_absent(&self, charge_id: &str, tokens: u64) -> Result<bool>;

    /// Look up an applied record, if any.
    async fn get(&self, charge_id: &str) -> Result<Option<AppliedRecord>>;
}

#[derive(Debug, Default)]
pub struct InMemoryIdempotency {
    applied: Mutex<HashMap<String, AppliedRecord>>,
}

impl InMemoryIdempotency {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotency {
    async fn record_if_absent(&self, charge_id: &str, tokens: u64) -> Result<bool> {
        let mut applied = self.applied.lock();
        if applied.contains_key(charge_id) {
            return Ok(false);
        }
        applied.insert(
            charge_id.to_string(),
            AppliedRecord {
                charge_id: charge_id.to_string(),
                tokens_applied: tokens,
            },
        );
        Ok(true)
    }

    async fn get(&self, charge_id: &str) -> Result<Option<AppliedRecord>> {
        Ok(self.applied.lock().get(charge_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_record_wins_duplicates_are_noops() {
        let reg = InMemoryIdempotency::new();
        assert!(reg.record_if_absent("ch_1", 100).await.unwrap());
        assert!(!reg.record_if_absent("ch_1", 100).await.unwrap());
        // Amount of a later duplicate never overwrites the original.
        assert!(!reg.record_if_absent("ch_1", 999).await.unwrap());

        let rec = reg.get("ch_1").await.unwrap().unwrap();
        assert_eq!(rec.tokens_applied, 100);
        assert!(reg.get("ch_2").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicates_record_once() {
        let reg = Arc::new(InMemoryIdempotency::new());
        let tasks = (0..32).map(|_| {
            let reg = reg.clone();
            tokio::spawn(async move { reg.record_if_absent("ch_race", 50).await.unwrap() })
        });
        let wins = join_all(tasks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(wins, 1);
    }
}
