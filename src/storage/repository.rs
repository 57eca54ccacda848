use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use crate::config::StoreConfig;
use crate::domain::{
    Cents, EntryKind, EntryStatus, IntegrityStats, LedgerEntry, PageRequest, User, UserId, Wallet,
};

use super::{MIGRATION_001_INITIAL, UnitOfWork};

pub(crate) const USER_COLUMNS: &str = "id, username, email, created_at, updated_at, deleted_at";
pub(crate) const WALLET_COLUMNS: &str =
    "id, user_id, balance_cents, created_at, updated_at, deleted_at";
pub(crate) const ENTRY_COLUMNS: &str =
    "id, kind, from_user_id, to_user_id, amount_cents, description, status, created_at";

/// Repository for persisting and querying users, wallets and ledger entries.
///
/// Reads go straight to the pool. Anything that changes a balance goes
/// through a [`UnitOfWork`] obtained from [`Repository::begin`].
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database. The file must already exist.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        Self::open(config, false).await
    }

    /// Initialize a database (create if missing + migrate).
    pub async fn init(config: &StoreConfig) -> Result<Self> {
        let repo = Self::open(config, true).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    #[instrument(skip(config), fields(path = %config.database_path))]
    async fn open(config: &StoreConfig, create_if_missing: bool) -> Result<Self> {
        debug!(
            max_conn = config.max_connections,
            busy_timeout_ms = config.busy_timeout.as_millis() as u64,
            "Creating connection pool"
        );

        let options = SqliteConnectOptions::from_str(&config.database_url())
            .context("Invalid database path")?
            .create_if_missing(create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Ok(Self::new(pool))
    }

    /// Run database migrations. Safe to run more than once.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        debug!("Migrations completed");
        Ok(())
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Open a write unit of work.
    ///
    /// `BEGIN IMMEDIATE` takes SQLite's write lock up front, so no other
    /// writer can commit between our balance read and our balance write, and
    /// two units of work can never each hold a lock the other one waits for.
    pub async fn begin(&self) -> Result<UnitOfWork> {
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("Failed to begin unit of work")?;
        Ok(UnitOfWork::new(tx))
    }

    // ========================
    // User operations
    // ========================

    /// Get a user by ID.
    pub async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user")?;

        row.as_ref().map(row_to_user).transpose()
    }

    /// List all users, ordered by ID.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list users")?;

        rows.iter().map(row_to_user).collect()
    }

    // ========================
    // Wallet operations
    // ========================

    /// Get the wallet owned by a user.
    pub async fn get_wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = ? AND deleted_at IS NULL"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch wallet")?;

        row.as_ref().map(row_to_wallet).transpose()
    }

    /// List all wallets, ordered by owner.
    pub async fn list_wallets(&self) -> Result<Vec<Wallet>> {
        let rows = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE deleted_at IS NULL ORDER BY user_id"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list wallets")?;

        rows.iter().map(row_to_wallet).collect()
    }

    // ========================
    // Ledger operations
    // ========================

    /// One page of entries where the user is source or destination,
    /// newest first.
    pub async fn list_entries_for_user(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM ledger_entries
            WHERE (from_user_id = ? OR to_user_id = ?) AND deleted_at IS NULL
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(user_id)
        .bind(user_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list entries for user")?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Count entries where the user is source or destination.
    pub async fn count_entries_for_user(&self, user_id: UserId) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM ledger_entries
            WHERE (from_user_id = ? OR to_user_id = ?) AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count entries for user")?;

        Ok(row.get("count"))
    }

    /// Net ledger movement per user: incoming amounts minus outgoing amounts.
    /// Users without entries are absent from the map.
    pub async fn compute_ledger_balances(&self) -> Result<HashMap<UserId, Cents>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, SUM(amount) as balance
            FROM (
                SELECT to_user_id as user_id, amount_cents as amount
                FROM ledger_entries
                WHERE to_user_id IS NOT NULL AND deleted_at IS NULL
                UNION ALL
                SELECT from_user_id as user_id, -amount_cents as amount
                FROM ledger_entries
                WHERE from_user_id IS NOT NULL AND deleted_at IS NULL
            )
            GROUP BY user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to compute ledger balances")?;

        Ok(rows
            .iter()
            .map(|row| (row.get("user_id"), row.get("balance")))
            .collect())
    }

    /// Gather the counters used by the integrity check.
    pub async fn get_integrity_stats(&self) -> Result<IntegrityStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users WHERE deleted_at IS NULL) as user_count,
                (SELECT COUNT(*) FROM wallets WHERE deleted_at IS NULL) as wallet_count,
                (SELECT COUNT(*) FROM ledger_entries WHERE deleted_at IS NULL) as entry_count,
                (SELECT COUNT(*) FROM ledger_entries
                    WHERE deleted_at IS NULL AND amount_cents <= 0) as non_positive_amounts,
                (SELECT COUNT(*) FROM ledger_entries e
                    WHERE e.deleted_at IS NULL
                      AND ((e.from_user_id IS NOT NULL
                            AND NOT EXISTS (SELECT 1 FROM wallets w
                                        WHERE w.user_id = e.from_user_id AND w.deleted_at IS NULL))
                        OR (e.to_user_id IS NOT NULL
                            AND NOT EXISTS (SELECT 1 FROM wallets w
                                        WHERE w.user_id = e.to_user_id AND w.deleted_at IS NULL)))
                ) as dangling_references,
                (SELECT COUNT(*) FROM ledger_entries
                    WHERE deleted_at IS NULL
                      AND ((kind = 'deposit' AND (from_user_id IS NOT NULL OR to_user_id IS NULL))
                        OR (kind = 'withdrawal' AND (from_user_id IS NULL OR to_user_id IS NOT NULL))
                        OR (kind = 'transfer' AND (from_user_id IS NULL OR to_user_id IS NULL
                                                   OR from_user_id = to_user_id)))
                ) as malformed_entries,
                (SELECT COUNT(*) FROM users u
                    WHERE u.deleted_at IS NULL
                      AND NOT EXISTS (SELECT 1 FROM wallets w
                                      WHERE w.user_id = u.id AND w.deleted_at IS NULL)
                ) as users_without_wallet
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to gather integrity stats")?;

        Ok(IntegrityStats {
            user_count: row.get("user_count"),
            wallet_count: row.get("wallet_count"),
            entry_count: row.get("entry_count"),
            non_positive_amounts: row.get("non_positive_amounts"),
            dangling_references: row.get("dangling_references"),
            malformed_entries: row.get("malformed_entries"),
            users_without_wallet: row.get("users_without_wallet"),
        })
    }
}

fn parse_timestamp(value: &str, what: &'static str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid {what} timestamp"))?
        .with_timezone(&Utc))
}

fn parse_optional_timestamp(
    value: Option<String>,
    what: &'static str,
) -> Result<Option<DateTime<Utc>>> {
    value.map(|s| parse_timestamp(&s, what)).transpose()
}

pub(crate) fn row_to_user(row: &SqliteRow) -> Result<User> {
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(User {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
        deleted_at: parse_optional_timestamp(row.get("deleted_at"), "deleted_at")?,
    })
}

pub(crate) fn row_to_wallet(row: &SqliteRow) -> Result<Wallet> {
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Wallet {
        id: row.get("id"),
        user_id: row.get("user_id"),
        balance_cents: row.get("balance_cents"),
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
        deleted_at: parse_optional_timestamp(row.get("deleted_at"), "deleted_at")?,
    })
}

pub(crate) fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");

    Ok(LedgerEntry {
        id: row.get("id"),
        kind: EntryKind::from_str(&kind)
            .ok_or_else(|| anyhow::anyhow!("Invalid entry kind: {}", kind))?,
        from_user_id: row.get("from_user_id"),
        to_user_id: row.get("to_user_id"),
        amount_cents: row.get("amount_cents"),
        description: row.get("description"),
        status: EntryStatus::from_str(&status)
            .ok_or_else(|| anyhow::anyhow!("Invalid entry status: {}", status))?,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}
