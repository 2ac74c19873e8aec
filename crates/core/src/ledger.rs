//! Allowance ledger - the per-user request balance that gates paid work.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::LedgerError;

/// Credits granted to an account the first time it is seen.
pub const INITIAL_GRANT: i64 = 100;

/// A user's balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub credits: i64,
    pub credits_used: i64,
    #[serde(default)]
    pub unlimited: bool,
}

/// Outcome of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    Granted,
    Exhausted,
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Atomic check-and-decrement of per-user credits.
///
/// `reserve` must behave as one serializable read-modify-write per user:
/// 1. no record: create it with `initial_grant - 1` credits and grant
/// 2. unlimited: grant without mutation
/// 3. no credits left: deny
/// 4. otherwise: decrement credits, increment credits_used, grant
#[async_trait]
pub trait AllowanceLedger: Send + Sync {
    async fn reserve(&self, user_id: &str) -> Result<Admission, LedgerError>;

    /// Current balance, or `None` for a user never seen.
    async fn balance(&self, user_id: &str) -> Result<Option<Account>, LedgerError>;

    /// Add credits to an account, creating it if needed.
    async fn grant(&self, user_id: &str, credits: i64) -> Result<Account, LedgerError>;

    /// Toggle the unlimited flag, creating the account if needed.
    async fn set_unlimited(&self, user_id: &str, unlimited: bool) -> Result<Account, LedgerError>;
}
