//! Merge credit ledger.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreResult;

/// Result of an atomic compare-and-debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// Units were taken; the new balance is returned.
    Debited { balance_after: i64 },
    /// Balance was too low; nothing changed.
    Insufficient { balance: i64 },
}

impl DebitOutcome {
    pub fn is_debited(&self) -> bool {
        matches!(self, DebitOutcome::Debited { .. })
    }
}

/// Per-account merge credit balances.
///
/// `try_debit` checks and subtracts in one step, so two tasks racing on
/// the same account can never both spend the last credits.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Current balance. Unknown accounts have zero.
    async fn balance(&self, account_id: &str) -> StoreResult<i64>;

    /// Whether `units` could be debited right now.
    async fn check_sufficient(&self, account_id: &str, units: u64) -> StoreResult<bool> {
        Ok(self.balance(account_id).await? >= units as i64)
    }

    /// Debit `units` only if the balance covers them.
    async fn try_debit(&self, account_id: &str, units: u64) -> StoreResult<DebitOutcome>;

    /// Add `units` (grants and refunds). Returns the new balance.
    async fn credit(&self, account_id: &str, units: u64) -> StoreResult<i64>;
}

/// In-process credit ledger.
#[derive(Debug, Default)]
pub struct MemoryCreditLedger {
    balances: Mutex<HashMap<String, i64>>,
}

impl MemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-seeded with balances.
    pub fn with_balances<I, S>(balances: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        Self {
            balances: Mutex::new(balances.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }
}

#[async_trait]
impl CreditLedger for MemoryCreditLedger {
    async fn balance(&self, account_id: &str) -> StoreResult<i64> {
        Ok(self.balances.lock().await.get(account_id).copied().unwrap_or(0))
    }

    async fn try_debit(&self, account_id: &str, units: u64) -> StoreResult<DebitOutcome> {
        let mut balances = self.balances.lock().await;
        let balance = balances.get(account_id).copied().unwrap_or(0);
        let units = units as i64;

        if balance < units {
            debug!(account_id, balance, units, "Debit refused");
            return Ok(DebitOutcome::Insufficient { balance });
        }

        let balance_after = balance - units;
        balances.insert(account_id.to_string(), balance_after);
        Ok(DebitOutcome::Debited { balance_after })
    }

    async fn credit(&self, account_id: &str, units: u64) -> StoreResult<i64> {
        let mut balances = self.balances.lock().await;
        let entry = balances.entry(account_id.to_string()).or_insert(0);
        *entry += units as i64;
        Ok(*entry)
    }
}
