use std::collections::HashMap;

use thiserror::Error;

use super::{Cents, UserId, Wallet};

/// Upper bound applied to `page_size` when the caller does not configure one.
pub const DEFAULT_MAX_PAGE_SIZE: i64 = 100;

/// A validated page of history: 1-based `page`, `page_size` clamped to the
/// configured maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: i64,
    page_size: i64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error("page must be at least 1, got {0}")]
    InvalidPage(i64),

    #[error("page size must be at least 1, got {0}")]
    InvalidPageSize(i64),

    #[error("page {0} is out of range")]
    OutOfRange(i64),
}

impl PageRequest {
    pub fn new(page: i64, page_size: i64, max_page_size: i64) -> Result<Self, PageError> {
        if page < 1 {
            return Err(PageError::InvalidPage(page));
        }
        if page_size < 1 {
            return Err(PageError::InvalidPageSize(page_size));
        }
        let page_size = page_size.min(max_page_size.max(1));
        (page - 1)
            .checked_mul(page_size)
            .ok_or(PageError::OutOfRange(page))?;
        Ok(Self { page, page_size })
    }

    pub fn page(&self) -> i64 {
        self.page
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    /// Rows to skip. Cannot overflow, `new` checked it.
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }
}

/// Raw counters gathered by the store for an integrity check.
#[derive(Debug, Clone, Default)]
pub struct IntegrityStats {
    pub user_count: i64,
    pub wallet_count: i64,
    pub entry_count: i64,
    /// Entries with `amount_cents <= 0`
    pub non_positive_amounts: i64,
    /// Entries naming a user that has no wallet
    pub dangling_references: i64,
    /// Entries whose source/destination columns do not fit their kind
    pub malformed_entries: i64,
    pub users_without_wallet: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    BalanceMismatch {
        user_id: UserId,
        stored: Cents,
        derived: Cents,
    },
    NegativeBalance {
        user_id: UserId,
        balance: Cents,
    },
    NonPositiveAmounts(i64),
    DanglingReferences(i64),
    MalformedEntries(i64),
    UsersWithoutWallet(i64),
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityIssue::BalanceMismatch {
                user_id,
                stored,
                derived,
            } => write!(
                f,
                "wallet of user {} holds {} cents but its ledger sums to {} cents",
                user_id, stored, derived
            ),
            IntegrityIssue::NegativeBalance { user_id, balance } => {
                write!(f, "wallet of user {} is negative ({} cents)", user_id, balance)
            }
            IntegrityIssue::NonPositiveAmounts(n) => {
                write!(f, "{} entries have a non-positive amount", n)
            }
            IntegrityIssue::DanglingReferences(n) => {
                write!(f, "{} entries reference a user without a wallet", n)
            }
            IntegrityIssue::MalformedEntries(n) => {
                write!(f, "{} entries have parties that do not match their kind", n)
            }
            IntegrityIssue::UsersWithoutWallet(n) => write!(f, "{} users have no wallet", n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub user_count: i64,
    pub wallet_count: i64,
    pub entry_count: i64,
    /// Sum of all stored balances
    pub total_balance: Cents,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Compare each wallet's stored balance with the balance derived from the
/// ledger. `derived` maps user id to net ledger movement; users with no
/// entries may be absent and count as zero.
pub fn build_integrity_report(
    wallets: &[Wallet],
    derived: &HashMap<UserId, Cents>,
    stats: &IntegrityStats,
) -> IntegrityReport {
    let mut issues = Vec::new();

    for wallet in wallets {
        let derived_balance = derived.get(&wallet.user_id).copied().unwrap_or(0);
        if wallet.balance_cents != derived_balance {
            issues.push(IntegrityIssue::BalanceMismatch {
                user_id: wallet.user_id,
                stored: wallet.balance_cents,
                derived: derived_balance,
            });
        }
        if wallet.balance_cents < 0 {
            issues.push(IntegrityIssue::NegativeBalance {
                user_id: wallet.user_id,
                balance: wallet.balance_cents,
            });
        }
    }

    let counters: [(i64, fn(i64) -> IntegrityIssue); 4] = [
        (stats.non_positive_amounts, IntegrityIssue::NonPositiveAmounts),
        (stats.dangling_references, IntegrityIssue::DanglingReferences),
        (stats.malformed_entries, IntegrityIssue::MalformedEntries),
        (stats.users_without_wallet, IntegrityIssue::UsersWithoutWallet),
    ];
    for (count, issue) in counters {
        if count > 0 {
            issues.push(issue(count));
        }
    }

    IntegrityReport {
        user_count: stats.user_count,
        wallet_count: stats.wallet_count,
        entry_count: stats.entry_count,
        total_balance: wallets.iter().map(|w| w.balance_cents).sum(),
        issues,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn wallet(user_id: UserId, balance_cents: Cents) -> Wallet {
        let now = Utc::now();
        Wallet {
            id: user_id,
            user_id,
            balance_cents,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_page_offsets() {
        let first = PageRequest::new(1, 10, DEFAULT_MAX_PAGE_SIZE).unwrap();
        assert_eq!((first.offset(), first.limit()), (0, 10));

        let third = PageRequest::new(3, 25, DEFAULT_MAX_PAGE_SIZE).unwrap();
        assert_eq!((third.offset(), third.limit()), (50, 25));
    }

    #[test]
    fn test_page_size_is_clamped() {
        let page = PageRequest::new(2, 10_000, 100).unwrap();
        assert_eq!(page.page_size(), 100);
        assert_eq!(page.offset(), 100);
    }

    #[test]
    fn test_non_positive_paging_is_rejected() {
        assert_eq!(
            PageRequest::new(0, 10, 100),
            Err(PageError::InvalidPage(0))
        );
        assert_eq!(
            PageRequest::new(1, -3, 100),
            Err(PageError::InvalidPageSize(-3))
        );
    }

    #[test]
    fn test_huge_page_is_rejected() {
        assert_eq!(
            PageRequest::new(i64::MAX, 100, 100),
            Err(PageError::OutOfRange(i64::MAX))
        );
    }

    #[test]
    fn test_consistent_ledger_is_healthy() {
        let wallets = vec![wallet(1, 5000), wallet(2, 2000), wallet(3, 0)];
        let derived = HashMap::from([(1, 5000), (2, 2000)]);
        let stats = IntegrityStats {
            user_count: 3,
            wallet_count: 3,
            entry_count: 4,
            ..Default::default()
        };

        let report = build_integrity_report(&wallets, &derived, &stats);

        assert!(report.is_healthy(), "{:?}", report.issues);
        assert_eq!(report.total_balance, 7000);
        assert_eq!(report.entry_count, 4);
    }

    #[test]
    fn test_drifted_balance_is_reported() {
        let wallets = vec![wallet(1, 5000)];
        let derived = HashMap::from([(1, 4000)]);

        let report = build_integrity_report(&wallets, &derived, &IntegrityStats::default());

        assert_eq!(
            report.issues,
            vec![IntegrityIssue::BalanceMismatch {
                user_id: 1,
                stored: 5000,
                derived: 4000
            }]
        );
    }

    #[test]
    fn test_store_counters_become_issues() {
        let stats = IntegrityStats {
            non_positive_amounts: 1,
            malformed_entries: 2,
            ..Default::default()
        };

        let report = build_integrity_report(&[], &HashMap::new(), &stats);

        assert_eq!(
            report.issues,
            vec![
                IntegrityIssue::NonPositiveAmounts(1),
                IntegrityIssue::MalformedEntries(2)
            ]
        );
        assert!(!report.is_healthy());
    }
}
