use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, UserId};

pub type WalletId = i64;

/// The balance record owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    /// Never negative in any committed state
    pub balance_cents: Cents,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Why a balance change was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceError {
    NonPositiveAmount,
    Insufficient { balance: Cents, required: Cents },
    Overflow,
}

impl Wallet {
    /// Balance after adding `amount_cents`, without touching `self`.
    pub fn credited(&self, amount_cents: Cents) -> Result<Cents, BalanceError> {
        if amount_cents <= 0 {
            return Err(BalanceError::NonPositiveAmount);
        }
        self.balance_cents
            .checked_add(amount_cents)
            .ok_or(BalanceError::Overflow)
    }

    /// Balance after removing `amount_cents`, refusing to go below zero.
    pub fn debited(&self, amount_cents: Cents) -> Result<Cents, BalanceError> {
        if amount_cents <= 0 {
            return Err(BalanceError::NonPositiveAmount);
        }
        if self.balance_cents < amount_cents {
            return Err(BalanceError::Insufficient {
                balance: self.balance_cents,
                required: amount_cents,
            });
        }
        Ok(self.balance_cents - amount_cents)
    }
}
