//! Persistence contracts: conversations, user profiles, and usage accounting.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use crate::error::StoreError;
use crate::message::Message;
use crate::routing::TaskCategory;

/// Stores the active conversation for each user.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The user's active conversation, empty if none was saved.
    async fn load_conversation(&self, user_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Replace the user's active conversation.
    async fn save_conversation(&self, user_id: &str, messages: &[Message]) -> Result<(), StoreError>;
}

/// Something the user is doing right now, optionally time-limited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentItem {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CurrentItem {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|t| t > now)
    }
}

/// Facts a user has chosen to share with the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub currently: Vec<CurrentItem>,
}

impl UserProfile {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.currently.is_empty()
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;

    async fn save_profile(&self, user_id: &str, profile: &UserProfile) -> Result<(), StoreError>;
}

/// One completed turn, as written to the usage log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub resolved_model: String,
    /// What the client asked for ("auto" or an explicit model id)
    pub requested_model: String,
    pub category: Option<TaskCategory>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_cents: i64,
    #[serde(default)]
    pub web_search: bool,
    #[serde(default)]
    pub documents: bool,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    /// Aggregation bucket, e.g. "2026-10".
    pub fn month_key(&self) -> String {
        month_key(self.timestamp)
    }
}

pub fn month_key(at: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", at.year(), at.month())
}

/// Per-user monthly totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyUsage {
    pub user_id: String,
    pub month: String,
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_cents: i64,
}

#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Append the record to the log and fold it into the monthly aggregate.
    /// Concurrent calls for the same month must not lose increments.
    async fn record_usage(&self, record: &UsageRecord) -> Result<(), StoreError>;

    /// Monthly aggregates for a user, newest first.
    async fn monthly_usage(&self, user_id: &str) -> Result<Vec<MonthlyUsage>, StoreError>;

    /// Most recent log entries for a user, newest first.
    async fn recent_usage(&self, user_id: &str, limit: usize) -> Result<Vec<UsageRecord>, StoreError>;
}
