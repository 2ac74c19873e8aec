//! SQLite backend for accounts, usage accounting, conversations and profiles.
//!
//! Tables:
//! - `accounts` - per-user credit balance, the only contended row type
//! - `usage_log` - append-only record per completed turn
//! - `monthly_usage` - per-(user, month) totals, updated by increment
//! - `conversations` / `profiles` - JSON documents keyed by user
//!
//! Every balance mutation is a single conditional statement, so SQLite's
//! write lock makes each check-and-decrement atomic without a read-then-write
//! window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use switchboard_core::error::{LedgerError, StoreError};
use switchboard_core::ledger::{Account, Admission, AllowanceLedger};
use switchboard_core::message::Message;
use switchboard_core::routing::TaskCategory;
use switchboard_core::store::{
    ConversationStore, MonthlyUsage, ProfileStore, UsageRecord, UsageSink, UserProfile,
};
use tracing::{debug, info};

/// A SQLite store implementing every persistence contract.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    initial_grant: i64,
}

impl SqliteStore {
    /// Open (creating if needed) a database file.
    pub async fn open(path: &Path, initial_grant: i64) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Storage(format!("Failed to create {}: {e}", parent.display())))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool, initial_grant };
        store.run_migrations().await?;
        info!("SQLite store initialized at {}", path.display());
        Ok(store)
    }

    /// An ephemeral in-process database (useful for tests).
    ///
    /// Uses a single connection, since each `:memory:` connection would
    /// otherwise see its own empty database.
    pub async fn in_memory(initial_grant: i64) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool, initial_grant };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            (
                "accounts table",
                r#"
                CREATE TABLE IF NOT EXISTS accounts (
                    user_id      TEXT PRIMARY KEY,
                    credits      INTEGER NOT NULL CHECK (credits >= 0),
                    credits_used INTEGER NOT NULL DEFAULT 0,
                    unlimited    INTEGER NOT NULL DEFAULT 0,
                    created_at   TEXT NOT NULL
                )
                "#,
            ),
            (
                "usage_log table",
                r#"
                CREATE TABLE IF NOT EXISTS usage_log (
                    id              INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id         TEXT NOT NULL,
                    resolved_model  TEXT NOT NULL,
                    requested_model TEXT NOT NULL,
                    category        TEXT,
                    input_tokens    INTEGER NOT NULL,
                    output_tokens   INTEGER NOT NULL,
                    cost_cents      INTEGER NOT NULL,
                    web_search      INTEGER NOT NULL DEFAULT 0,
                    documents       INTEGER NOT NULL DEFAULT 0,
                    created_at      TEXT NOT NULL
                )
                "#,
            ),
            (
                "usage_log index",
                "CREATE INDEX IF NOT EXISTS idx_usage_log_user ON usage_log(user_id, created_at DESC)",
            ),
            (
                "monthly_usage table",
                r#"
                CREATE TABLE IF NOT EXISTS monthly_usage (
                    user_id       TEXT NOT NULL,
                    month         TEXT NOT NULL,
                    requests      INTEGER NOT NULL DEFAULT 0,
                    input_tokens  INTEGER NOT NULL DEFAULT 0,
                    output_tokens INTEGER NOT NULL DEFAULT 0,
                    cost_cents    INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (user_id, month)
                )
                "#,
            ),
            (
                "conversations table",
                r#"
                CREATE TABLE IF NOT EXISTS conversations (
                    user_id    TEXT PRIMARY KEY,
                    messages   TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "profiles table",
                r#"
                CREATE TABLE IF NOT EXISTS profiles (
                    user_id    TEXT PRIMARY KEY,
                    profile    TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_account(row: &sqlx::sqlite::SqliteRow) -> Result<Account, sqlx::Error> {
        Ok(Account {
            user_id: row.try_get("user_id")?,
            credits: row.try_get("credits")?,
            credits_used: row.try_get("credits_used")?,
            unlimited: row.try_get::<i64, _>("unlimited")? != 0,
        })
    }

    fn row_to_usage(row: &sqlx::sqlite::SqliteRow) -> Result<UsageRecord, StoreError> {
        let get = |e: sqlx::Error| StoreError::Storage(format!("usage_log row: {e}"));

        let category: Option<String> = row.try_get("category").map_err(get)?;
        let created_at: String = row.try_get("created_at").map_err(get)?;

        Ok(UsageRecord {
            user_id: row.try_get("user_id").map_err(get)?,
            resolved_model: row.try_get("resolved_model").map_err(get)?,
            requested_model: row.try_get("requested_model").map_err(get)?,
            category: category.and_then(|c| c.parse::<TaskCategory>().ok()),
            input_tokens: row.try_get::<i64, _>("input_tokens").map_err(get)?.max(0) as u64,
            output_tokens: row.try_get::<i64, _>("output_tokens").map_err(get)?.max(0) as u64,
            cost_cents: row.try_get("cost_cents").map_err(get)?,
            web_search: row.try_get::<i64, _>("web_search").map_err(get)? != 0,
            documents: row.try_get::<i64, _>("documents").map_err(get)? != 0,
            timestamp: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| StoreError::Serialization(format!("created_at: {e}")))?,
        })
    }

    async fn fetch_account(&self, user_id: &str) -> Result<Option<Account>, sqlx::Error> {
        let row = sqlx::query("SELECT user_id, credits, credits_used, unlimited FROM accounts WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_account).transpose()
    }
}

fn unavailable(e: sqlx::Error) -> LedgerError {
    LedgerError::Unavailable(e.to_string())
}

#[async_trait]
impl AllowanceLedger for SqliteStore {
    async fn reserve(&self, user_id: &str) -> Result<Admission, LedgerError> {
        let now = Utc::now().to_rfc3339();

        // First use: the account is created with this request already charged
        let created = sqlx::query(
            r#"
            INSERT INTO accounts (user_id, credits, credits_used, unlimited, created_at)
            VALUES (?1, ?2, 1, 0, ?3)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(self.initial_grant - 1)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if created.rows_affected() == 1 {
            debug!(user_id, "Created account on first use");
            return Ok(Admission::Granted);
        }

        let charged = sqlx::query(
            r#"
            UPDATE accounts
            SET credits = credits - 1, credits_used = credits_used + 1
            WHERE user_id = ?1 AND unlimited = 0 AND credits > 0
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if charged.rows_affected() == 1 {
            return Ok(Admission::Granted);
        }

        // Either unlimited (never charged) or out of credits
        let unlimited: Option<i64> = sqlx::query_scalar("SELECT unlimited FROM accounts WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        match unlimited {
            Some(flag) if flag != 0 => Ok(Admission::Granted),
            _ => Ok(Admission::Exhausted),
        }
    }

    async fn balance(&self, user_id: &str) -> Result<Option<Account>, LedgerError> {
        self.fetch_account(user_id).await.map_err(unavailable)
    }

    async fn grant(&self, user_id: &str, credits: i64) -> Result<Account, LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (user_id, credits, credits_used, unlimited, created_at)
            VALUES (?1, MAX(?2 + ?3, 0), 0, 0, ?4)
            ON CONFLICT(user_id) DO UPDATE SET credits = MAX(credits + ?3, 0)
            "#,
        )
        .bind(user_id)
        .bind(self.initial_grant)
        .bind(credits)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        self.fetch_account(user_id)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| LedgerError::Unavailable(format!("account {user_id} vanished after grant")))
    }

    async fn set_unlimited(&self, user_id: &str, unlimited: bool) -> Result<Account, LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (user_id, credits, credits_used, unlimited, created_at)
            VALUES (?1, ?2, 0, ?3, ?4)
            ON CONFLICT(user_id) DO UPDATE SET unlimited = excluded.unlimited
            "#,
        )
        .bind(user_id)
        .bind(self.initial_grant)
        .bind(i64::from(unlimited))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        self.fetch_account(user_id)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| LedgerError::Unavailable(format!("account {user_id} vanished after update")))
    }
}

#[async_trait]
impl UsageSink for SqliteStore {
    async fn record_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO usage_log (user_id, resolved_model, requested_model, category,
                                   input_tokens, output_tokens, cost_cents,
                                   web_search, documents, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.resolved_model)
        .bind(&record.requested_model)
        .bind(record.category.map(|c| c.as_str()))
        .bind(record.input_tokens as i64)
        .bind(record.output_tokens as i64)
        .bind(record.cost_cents)
        .bind(i64::from(record.web_search))
        .bind(i64::from(record.documents))
        .bind(record.timestamp.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("usage_log insert: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO monthly_usage (user_id, month, requests, input_tokens, output_tokens, cost_cents)
            VALUES (?, ?, 1, ?, ?, ?)
            ON CONFLICT(user_id, month) DO UPDATE SET
                requests      = requests + 1,
                input_tokens  = input_tokens + excluded.input_tokens,
                output_tokens = output_tokens + excluded.output_tokens,
                cost_cents    = cost_cents + excluded.cost_cents
            "#,
        )
        .bind(&record.user_id)
        .bind(record.month_key())
        .bind(record.input_tokens as i64)
        .bind(record.output_tokens as i64)
        .bind(record.cost_cents)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("monthly_usage upsert: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))
    }

    async fn monthly_usage(&self, user_id: &str) -> Result<Vec<MonthlyUsage>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, month, requests, input_tokens, output_tokens, cost_cents
            FROM monthly_usage WHERE user_id = ? ORDER BY month DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("monthly_usage query: {e}")))?;

        rows.iter()
            .map(|row| {
                let get = |e: sqlx::Error| StoreError::Storage(format!("monthly_usage row: {e}"));
                Ok(MonthlyUsage {
                    user_id: row.try_get("user_id").map_err(get)?,
                    month: row.try_get("month").map_err(get)?,
                    requests: row.try_get::<i64, _>("requests").map_err(get)?.max(0) as u64,
                    input_tokens: row.try_get::<i64, _>("input_tokens").map_err(get)?.max(0) as u64,
                    output_tokens: row.try_get::<i64, _>("output_tokens").map_err(get)?.max(0) as u64,
                    cost_cents: row.try_get("cost_cents").map_err(get)?,
                })
            })
            .collect()
    }

    async fn recent_usage(&self, user_id: &str, limit: usize) -> Result<Vec<UsageRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM usage_log WHERE user_id = ?
            ORDER BY created_at DESC, id DESC LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("usage_log query: {e}")))?;

        rows.iter().map(Self::row_to_usage).collect()
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn load_conversation(&self, user_id: &str) -> Result<Vec<Message>, StoreError> {
        let json: Option<String> = sqlx::query_scalar("SELECT messages FROM conversations WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("conversation query: {e}")))?;

        match json {
            Some(json) => serde_json::from_str(&json).map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    async fn save_conversation(&self, user_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let json = serde_json::to_string(messages).map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO conversations (user_id, messages, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET messages = excluded.messages, updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("conversation upsert: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn load_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let json: Option<String> = sqlx::query_scalar("SELECT profile FROM profiles WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("profile query: {e}")))?;

        json.map(|j| serde_json::from_str(&j).map_err(|e| StoreError::Serialization(e.to_string())))
            .transpose()
    }

    async fn save_profile(&self, user_id: &str, profile: &UserProfile) -> Result<(), StoreError> {
        let json = serde_json::to_string(profile).map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO profiles (user_id, profile, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET profile = excluded.profile, updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("profile upsert: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use switchboard_core::store::CurrentItem;

    async fn test_store(grant: i64) -> SqliteStore {
        SqliteStore::in_memory(grant).await.unwrap()
    }

    fn record(user: &str, input: u64, output: u64, cents: i64) -> UsageRecord {
        UsageRecord {
            user_id: user.into(),
            resolved_model: "gpt-5-mini".into(),
            requested_model: "auto".into(),
            category: Some(TaskCategory::General),
            input_tokens: input,
            output_tokens: output,
            cost_cents: cents,
            web_search: false,
            documents: true,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn first_reserve_creates_charged_account() {
        let store = test_store(100).await;
        assert_eq!(store.reserve("alice").await.unwrap(), Admission::Granted);

        let account = store.balance("alice").await.unwrap().unwrap();
        assert_eq!(account.credits, 99);
        assert_eq!(account.credits_used, 1);
        assert!(!account.unlimited);
    }

    #[tokio::test]
    async fn sequential_reserves_exhaust_balance() {
        let store = test_store(5).await;
        for _ in 0..5 {
            assert_eq!(store.reserve("bob").await.unwrap(), Admission::Granted);
        }
        assert_eq!(store.reserve("bob").await.unwrap(), Admission::Exhausted);

        let account = store.balance("bob").await.unwrap().unwrap();
        assert_eq!(account.credits, 0);
        assert_eq!(account.credits_used, 5);
    }

    #[tokio::test]
    async fn unlimited_account_is_never_charged() {
        let store = test_store(3).await;
        store.set_unlimited("vip", true).await.unwrap();
        for _ in 0..10 {
            assert_eq!(store.reserve("vip").await.unwrap(), Admission::Granted);
        }
        let account = store.balance("vip").await.unwrap().unwrap();
        assert_eq!(account.credits, 3);
        assert_eq!(account.credits_used, 0);

        store.set_unlimited("vip", false).await.unwrap();
        assert_eq!(store.reserve("vip").await.unwrap(), Admission::Granted);
        assert_eq!(store.balance("vip").await.unwrap().unwrap().credits, 2);
    }

    #[tokio::test]
    async fn unlimited_with_zero_credits_is_granted() {
        let store = test_store(1).await;
        store.reserve("carol").await.unwrap();
        assert_eq!(store.reserve("carol").await.unwrap(), Admission::Exhausted);
        store.set_unlimited("carol", true).await.unwrap();
        assert_eq!(store.reserve("carol").await.unwrap(), Admission::Granted);
    }

    #[tokio::test]
    async fn grant_tops_up_balance() {
        let store = test_store(2).await;
        store.reserve("dan").await.unwrap();
        store.reserve("dan").await.unwrap();
        assert_eq!(store.reserve("dan").await.unwrap(), Admission::Exhausted);

        let account = store.grant("dan", 3).await.unwrap();
        assert_eq!(account.credits, 3);
        assert_eq!(store.reserve("dan").await.unwrap(), Admission::Granted);

        let fresh = store.grant("erin", 10).await.unwrap();
        assert_eq!(fresh.credits, 12);
        assert_eq!(fresh.credits_used, 0);
    }

    #[tokio::test]
    async fn concurrent_reserves_never_overdraw() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(&dir.path().join("ledger.db"), 20).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.reserve("racer").await.unwrap() }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_granted() {
                granted += 1;
            }
        }

        assert_eq!(granted, 20);
        let account = store.balance("racer").await.unwrap().unwrap();
        assert_eq!(account.credits, 0);
        assert_eq!(account.credits_used, 20);
    }

    #[tokio::test]
    async fn usage_is_logged_and_aggregated() {
        let store = test_store(100).await;
        store.record_usage(&record("frank", 1000, 200, 1)).await.unwrap();
        store.record_usage(&record("frank", 500, 300, 2)).await.unwrap();
        store.record_usage(&record("grace", 10, 10, 1)).await.unwrap();

        let monthly = store.monthly_usage("frank").await.unwrap();
        assert_eq!(monthly.len(), 1);
        assert_eq!(monthly[0].requests, 2);
        assert_eq!(monthly[0].input_tokens, 1500);
        assert_eq!(monthly[0].output_tokens, 500);
        assert_eq!(monthly[0].cost_cents, 3);

        let recent = store.recent_usage("frank", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].category, Some(TaskCategory::General));
        assert!(recent[0].documents);
    }

    #[tokio::test]
    async fn conversation_replace_and_load() {
        let store = test_store(100).await;
        assert!(store.load_conversation("henry").await.unwrap().is_empty());

        let convo = vec![Message::user("hi"), Message::assistant("hello")];
        store.save_conversation("henry", &convo).await.unwrap();
        assert_eq!(store.load_conversation("henry").await.unwrap(), convo);

        let longer = vec![Message::user("hi"), Message::assistant("hello"), Message::user("again")];
        store.save_conversation("henry", &longer).await.unwrap();
        assert_eq!(store.load_conversation("henry").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn profile_roundtrip() {
        let store = test_store(100).await;
        assert!(store.load_profile("iris").await.unwrap().is_none());

        let profile = UserProfile {
            facts: vec!["works in Rust".into()],
            currently: vec![CurrentItem { text: "moving house".into(), expires_at: None }],
        };
        store.save_profile("iris", &profile).await.unwrap();
        assert_eq!(store.load_profile("iris").await.unwrap(), Some(profile));
    }
}
