//! In-memory store - useful for testing and single-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use switchboard_core::error::{LedgerError, StoreError};
use switchboard_core::ledger::{Account, Admission, AllowanceLedger, INITIAL_GRANT};
use switchboard_core::message::Message;
use switchboard_core::store::{
    ConversationStore, MonthlyUsage, ProfileStore, UsageRecord, UsageSink, UserProfile,
};
use tokio::sync::{Mutex, RwLock};

/// Keeps every collection in process memory. Account updates happen under
/// one mutex, so reservations are serialized.
#[derive(Clone)]
pub struct InMemoryStore {
    initial_grant: i64,
    accounts: Arc<Mutex<HashMap<String, Account>>>,
    usage_log: Arc<RwLock<Vec<UsageRecord>>>,
    monthly: Arc<RwLock<HashMap<(String, String), MonthlyUsage>>>,
    conversations: Arc<RwLock<HashMap<String, Vec<Message>>>>,
    profiles: Arc<RwLock<HashMap<String, UserProfile>>>,
}

impl InMemoryStore {
    pub fn new(initial_grant: i64) -> Self {
        Self {
            initial_grant,
            accounts: Arc::default(),
            usage_log: Arc::default(),
            monthly: Arc::default(),
            conversations: Arc::default(),
            profiles: Arc::default(),
        }
    }

    fn fresh_account(&self, user_id: &str) -> Account {
        Account {
            user_id: user_id.to_string(),
            credits: self.initial_grant,
            credits_used: 0,
            unlimited: false,
        }
    }

    /// Every usage record written so far, oldest first.
    pub async fn usage_log(&self) -> Vec<UsageRecord> {
        self.usage_log.read().await.clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(INITIAL_GRANT)
    }
}

#[async_trait]
impl AllowanceLedger for InMemoryStore {
    async fn reserve(&self, user_id: &str) -> Result<Admission, LedgerError> {
        let mut accounts = self.accounts.lock().await;

        let Some(account) = accounts.get_mut(user_id) else {
            let mut account = self.fresh_account(user_id);
            account.credits -= 1;
            account.credits_used = 1;
            accounts.insert(user_id.to_string(), account);
            return Ok(Admission::Granted);
        };

        if account.unlimited {
            return Ok(Admission::Granted);
        }
        if account.credits <= 0 {
            return Ok(Admission::Exhausted);
        }

        account.credits -= 1;
        account.credits_used += 1;
        Ok(Admission::Granted)
    }

    async fn balance(&self, user_id: &str) -> Result<Option<Account>, LedgerError> {
        Ok(self.accounts.lock().await.get(user_id).cloned())
    }

    async fn grant(&self, user_id: &str, credits: i64) -> Result<Account, LedgerError> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts
            .entry(user_id.to_string())
            .or_insert_with(|| self.fresh_account(user_id));
        account.credits = (account.credits + credits).max(0);
        Ok(account.clone())
    }

    async fn set_unlimited(&self, user_id: &str, unlimited: bool) -> Result<Account, LedgerError> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts
            .entry(user_id.to_string())
            .or_insert_with(|| self.fresh_account(user_id));
        account.unlimited = unlimited;
        Ok(account.clone())
    }
}

#[async_trait]
impl UsageSink for InMemoryStore {
    async fn record_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        // Hold the aggregate lock across both writes so readers never see
        // the log ahead of the totals.
        let mut monthly = self.monthly.write().await;
        self.usage_log.write().await.push(record.clone());

        let key = (record.user_id.clone(), record.month_key());
        let entry = monthly.entry(key).or_insert_with(|| MonthlyUsage {
            user_id: record.user_id.clone(),
            month: record.month_key(),
            ..Default::default()
        });
        entry.requests += 1;
        entry.input_tokens += record.input_tokens;
        entry.output_tokens += record.output_tokens;
        entry.cost_cents += record.cost_cents;
        Ok(())
    }

    async fn monthly_usage(&self, user_id: &str) -> Result<Vec<MonthlyUsage>, StoreError> {
        let mut rows: Vec<MonthlyUsage> = self
            .monthly
            .read()
            .await
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.month.cmp(&a.month));
        Ok(rows)
    }

    async fn recent_usage(&self, user_id: &str, limit: usize) -> Result<Vec<UsageRecord>, StoreError> {
        Ok(self
            .usage_log
            .read()
            .await
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn load_conversation(&self, user_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self.conversations.read().await.get(user_id).cloned().unwrap_or_default())
    }

    async fn save_conversation(&self, user_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        self.conversations
            .write()
            .await
            .insert(user_id.to_string(), messages.to_vec());
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for InMemoryStore {
    async fn load_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn save_profile(&self, user_id: &str, profile: &UserProfile) -> Result<(), StoreError> {
        self.profiles
            .write()
            .await
            .insert(user_id.to_string(), profile.clone());
        Ok(())
    }
}
