//! Authoritative per-account token balances.
//!
//! The ledger is the only component allowed to mutate a balance, and
//! every mutation is a single atomic step: no await point while the
//! map lock is held.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::AccountId;

/// Atomic balance store. Implementations must guarantee that
/// `debit_if_sufficient` is check-and-subtract in one step relative to
/// any concurrent debit/credit on the same account.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Subtract `amount` if the balance covers it. Returns whether the
    /// debit was applied. An absent account is treated as balance 0.
    async fn debit_if_sufficient(&self, account: AccountId, amount: u64) -> Result<bool>;

    /// Add `amount` unconditionally, creating the account if absent.
    /// Used for top-ups and refunds.
    async fn credit(&self, account: AccountId, amount: u64) -> Result<()>;

    /// Point-in-time balance read; never observes a torn value.
    async fn balance(&self, account: AccountId) -> Result<u64>;
}

/// Process-local ledger guarded by a single mutex. The lock is held
/// only across the in-memory update itself.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: Mutex<HashMap<AccountId, u64>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account, e.g. for tests or promo grants.
    pub fn with_balance(account: AccountId, balance: u64) -> Self {
        let ledger = Self::new();
        ledger.balances.lock().insert(account, balance);
        ledger
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn debit_if_sufficient(&self, account: AccountId, amount: u64) -> Result<bool> {
        let mut balances = self.balances.lock();
        let entry = balances.entry(account).or_insert(0);
        if *entry < amount {
            return Ok(false);
        }
        *entry -= amount;
        Ok(true)
    }

    async fn credit(&self, account: AccountId, amount: u64) -> Result<()> {
        let mut balances = self.balances.lock();
        let entry = balances.entry(account).or_insert(0);
        *entry = entry.saturating_add(amount);
        Ok(())
    }

    async fn balance(&self, account: AccountId) -> Result<u64> {
        Ok(self.balances.lock().get(&account).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::Arc;

    #[tokio::test]
    async fn absent_account_reads_zero_and_refuses_debit() {
        let ledger = InMemoryLedger::new();
        assert_eq!(ledger.balance(7).await.unwrap(), 0);
        assert!(!ledger.debit_if_sufficient(7, 1).await.unwrap());
        assert_eq!(ledger.balance(7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn debit_is_all_or_nothing() {
        let ledger = InMemoryLedger::with_balance(1, 50);
        assert!(ledger.debit_if_sufficient(1, 30).await.unwrap());
        assert_eq!(ledger.balance(1).await.unwrap(), 20);
        assert!(!ledger.debit_if_sufficient(1, 21).await.unwrap());
        assert_eq!(ledger.balance(1).await.unwrap(), 20);
        assert!(ledger.debit_if_sufficient(1, 20).await.unwrap());
        assert_eq!(ledger.balance(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn credit_creates_account_lazily() {
        let ledger = InMemoryLedger::new();
        ledger.credit(42, 100).await.unwrap();
        assert_eq!(ledger.balance(42).await.unwrap(), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_debits_never_oversell() {
        let ledger = Arc::new(InMemoryLedger::with_balance(1, 100));

        // 50 tasks each try to debit 10; only 10 can succeed.
        let tasks = (0..50).map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.debit_if_sufficient(1, 10).await.unwrap() })
        });
        let results = join_all(tasks).await;
        let successes = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();

        assert_eq!(successes, 10);
        assert_eq!(ledger.balance(1).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_mix_conserves_tokens() {
        let ledger = Arc::new(InMemoryLedger::with_balance(9, 1_000));

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let l = ledger.clone();
            tasks.push(tokio::spawn(async move {
                l.credit(9, 5).await.unwrap();
            }));
            let l = ledger.clone();
            tasks.push(tokio::spawn(async move {
                // Always covered: balance never drops below 1000 - 20*5
                assert!(l.debit_if_sufficient(9, 5).await.unwrap());
            }));
        }
        join_all(tasks).await;

        // 20 credits of 5 and 20 debits of 5 cancel out.
        assert_eq!(ledger.balance(9).await.unwrap(), 1_000);
    }
}
