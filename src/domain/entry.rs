use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BalanceError, Cents, UserId};

pub type EntryId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Money entering a wallet from outside the system
    Deposit,
    /// Money leaving a wallet to outside the system
    Withdrawal,
    /// Money moving between two wallets
    Transfer,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Deposit => "deposit",
            EntryKind::Withdrawal => "withdrawal",
            EntryKind::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(EntryKind::Deposit),
            "withdrawal" => Some(EntryKind::Withdrawal),
            "transfer" => Some(EntryKind::Transfer),
            _ => None,
        }
    }

    /// Whether entries of this kind carry a source and a destination.
    pub fn has_source(&self) -> bool {
        matches!(self, EntryKind::Withdrawal | EntryKind::Transfer)
    }

    pub fn has_destination(&self) -> bool {
        matches!(self, EntryKind::Deposit | EntryKind::Transfer)
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failed attempts never produce an entry, so `Completed` is the only status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Completed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(EntryStatus::Completed),
            _ => None,
        }
    }
}

/// An immutable record of one committed balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Assigned by the store, strictly increasing
    pub id: EntryId,
    pub kind: EntryKind,
    /// Balance decreases (withdrawal, transfer)
    pub from_user_id: Option<UserId>,
    /// Balance increases (deposit, transfer)
    pub to_user_id: Option<UserId>,
    /// Always positive
    pub amount_cents: Cents,
    pub description: Option<String>,
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// How this entry moves `user_id`'s balance: positive when money arrives,
    /// negative when it leaves, zero when the entry does not involve the user.
    pub fn delta_for(&self, user_id: UserId) -> Cents {
        let mut delta = 0;
        if self.to_user_id == Some(user_id) {
            delta += self.amount_cents;
        }
        if self.from_user_id == Some(user_id) {
            delta -= self.amount_cents;
        }
        delta
    }
}

/// A ledger entry that has not been written yet. The store assigns `id`
/// and `created_at` when it appends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub kind: EntryKind,
    pub from_user_id: Option<UserId>,
    pub to_user_id: Option<UserId>,
    pub amount_cents: Cents,
    pub description: Option<String>,
}

impl NewEntry {
    pub fn deposit(to_user_id: UserId, amount_cents: Cents) -> Result<Self, BalanceError> {
        Self::build(EntryKind::Deposit, None, Some(to_user_id), amount_cents)
    }

    pub fn withdrawal(from_user_id: UserId, amount_cents: Cents) -> Result<Self, BalanceError> {
        Self::build(EntryKind::Withdrawal, Some(from_user_id), None, amount_cents)
    }

    pub fn transfer(
        from_user_id: UserId,
        to_user_id: UserId,
        amount_cents: Cents,
    ) -> Result<Self, BalanceError> {
        Self::build(
            EntryKind::Transfer,
            Some(from_user_id),
            Some(to_user_id),
            amount_cents,
        )
    }

    fn build(
        kind: EntryKind,
        from_user_id: Option<UserId>,
        to_user_id: Option<UserId>,
        amount_cents: Cents,
    ) -> Result<Self, BalanceError> {
        if amount_cents <= 0 {
            return Err(BalanceError::NonPositiveAmount);
        }
        Ok(Self {
            kind,
            from_user_id,
            to_user_id,
            amount_cents,
            description: None,
        })
    }

    /// Blank descriptions are stored as absent.
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self
    }
}
