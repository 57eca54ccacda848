use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};

use crate::domain::{Cents, EntryStatus, LedgerEntry, NewEntry, User, UserId, Wallet, WalletId};

use super::format_timestamp;
use super::repository::{
    ENTRY_COLUMNS, USER_COLUMNS, WALLET_COLUMNS, row_to_entry, row_to_user, row_to_wallet,
};

/// One all-or-nothing sequence of reads and writes against the ledger store.
///
/// Nothing written through a unit of work is visible to anyone else until
/// [`UnitOfWork::commit`]. Dropping it without committing rolls it back.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("Failed to commit unit of work")
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back unit of work")
    }

    // ========================
    // Users
    // ========================

    pub async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email)
            .fetch_optional(&mut *self.tx)
            .await
            .context("Failed to fetch user by email")?;

        row.as_ref().map(row_to_user).transpose()
    }

    /// Insert a user. A taken email surfaces as a unique-constraint error
    /// from the store.
    pub async fn insert_user(
        &mut self,
        username: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<User> {
        let ts = format_timestamp(now);
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (username, email, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(username)
        .bind(email)
        .bind(&ts)
        .bind(&ts)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to save user")?;

        row_to_user(&row)
    }

    // ========================
    // Wallets
    // ========================

    pub async fn insert_wallet(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<Wallet> {
        let ts = format_timestamp(now);
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO wallets (user_id, balance_cents, created_at, updated_at)
            VALUES (?, 0, ?, ?)
            RETURNING {WALLET_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(&ts)
        .bind(&ts)
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to save wallet")?;

        row_to_wallet(&row)
    }

    /// Read a wallet inside this unit of work. The value is current: no other
    /// writer can commit until this unit of work ends.
    pub async fn find_wallet_by_user(&mut self, user_id: UserId) -> Result<Option<Wallet>> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = ? AND deleted_at IS NULL"
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to fetch wallet")?;

        row.as_ref().map(row_to_wallet).transpose()
    }

    pub async fn set_balance(
        &mut self,
        wallet_id: WalletId,
        balance_cents: Cents,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET balance_cents = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(balance_cents)
        .bind(format_timestamp(now))
        .bind(wallet_id)
        .execute(&mut *self.tx)
        .await
        .context("Failed to update wallet balance")?;

        if result.rows_affected() != 1 {
            bail!("Wallet {} vanished during unit of work", wallet_id);
        }
        Ok(())
    }

    // ========================
    // Ledger entries
    // ========================

    /// Append an entry. The store assigns its id.
    pub async fn append_entry(&mut self, entry: &NewEntry, now: DateTime<Utc>) -> Result<LedgerEntry> {
        debug_assert_eq!(entry.kind.has_source(), entry.from_user_id.is_some());
        debug_assert_eq!(entry.kind.has_destination(), entry.to_user_id.is_some());

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO ledger_entries (kind, from_user_id, to_user_id, amount_cents, description, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(entry.kind.as_str())
        .bind(entry.from_user_id)
        .bind(entry.to_user_id)
        .bind(entry.amount_cents)
        .bind(&entry.description)
        .bind(EntryStatus::Completed.as_str())
        .bind(format_timestamp(now))
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to save ledger entry")?;

        row_to_entry(&row)
    }
}
