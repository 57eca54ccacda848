use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::StoreConfig;
use crate::domain::{
    BalanceError, Cents, IntegrityReport, LedgerEntry, NewEntry, PageRequest, User, UserId,
    Wallet, build_integrity_report, normalize_contact,
};
use crate::storage::{Repository, UnitOfWork};

use super::AppError;
use super::error::is_unique_violation;

/// Application service providing the wallet operations.
/// This is the primary interface for any client (CLI, API, etc.).
///
/// Every balance change runs in its own [`UnitOfWork`]: the wallet is re-read
/// inside it, validated, updated and paired with exactly one ledger entry
/// before commit. Any failure rolls the whole unit back.
///
/// The operation timeout covers opening the unit of work and its body. The
/// final commit or rollback runs outside it and is bounded by the store's own
/// busy timeout.
#[derive(Clone)]
pub struct WalletService {
    repo: Repository,
    operation_timeout: Duration,
    max_page_size: i64,
}

/// Result of registering a user
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub user: User,
    pub wallet: Wallet,
}

/// A user together with their wallet
#[derive(Debug, Clone, Serialize)]
pub struct UserAccount {
    pub user: User,
    pub wallet: Wallet,
}

/// Result of a transfer
#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub from_balance: Cents,
    pub to_balance: Cents,
    pub entry: LedgerEntry,
}

impl WalletService {
    /// Create a new wallet service over the given repository.
    pub fn new(repo: Repository, config: &StoreConfig) -> Self {
        Self {
            repo,
            operation_timeout: config.operation_timeout,
            max_page_size: config.max_page_size,
        }
    }

    /// Initialize the database (creating it if needed) and build a service.
    pub async fn init(config: &StoreConfig) -> Result<Self, AppError> {
        let repo = Repository::init(config).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database.
    pub async fn connect(config: &StoreConfig) -> Result<Self, AppError> {
        let repo = Repository::connect(config).await?;
        Ok(Self::new(repo, config))
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    // ========================
    // Users
    // ========================

    /// Create a user and their zero-balance wallet in one unit of work.
    #[instrument(skip(self, name, contact))]
    pub async fn register_user(&self, name: &str, contact: &str) -> Result<Registration, AppError> {
        let username = name.trim();
        if username.is_empty() {
            return Err(AppError::InvalidArgument("name must not be blank".into()));
        }
        let email = normalize_contact(contact);
        if email.is_empty() {
            return Err(AppError::InvalidArgument("contact must not be blank".into()));
        }

        let result = async {
            let (uow, outcome) = self
                .with_timeout("register_user", async {
                    let mut uow = self.repo.begin().await?;
                    let outcome = Self::apply_registration(&mut uow, username, &email).await;
                    Ok::<_, AppError>((uow, outcome))
                })
                .await?;
            Self::finish(uow, outcome).await
        }
        .await;

        match &result {
            Ok(reg) => info!(user_id = reg.user.id, wallet_id = reg.wallet.id, "User registered"),
            Err(err) => warn!(error = %err, "Registration rejected"),
        }
        result
    }

    async fn apply_registration(
        uow: &mut UnitOfWork,
        username: &str,
        email: &str,
    ) -> Result<Registration, AppError> {
        if uow.find_user_by_email(email).await?.is_some() {
            return Err(AppError::DuplicateContact(email.to_string()));
        }

        let now = Utc::now();
        let user = uow
            .insert_user(username, email, now)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    AppError::DuplicateContact(email.to_string())
                } else {
                    err.into()
                }
            })?;
        let wallet = uow.insert_wallet(user.id, now).await?;

        Ok(Registration { user, wallet })
    }

    /// Get a user and their wallet.
    pub async fn get_user(&self, user_id: UserId) -> Result<UserAccount, AppError> {
        self.with_timeout("get_user", async {
            let user = self
                .repo
                .get_user(user_id)
                .await?
                .ok_or(AppError::UserNotFound(user_id))?;
            let wallet = self
                .repo
                .get_wallet_by_user(user_id)
                .await?
                .ok_or(AppError::AccountNotFound(user_id))?;
            Ok::<_, AppError>(UserAccount { user, wallet })
        })
        .await
    }

    /// List every user with their wallet, ordered by user ID.
    pub async fn list_users(&self) -> Result<Vec<UserAccount>, AppError> {
        self.with_timeout("list_users", async {
            let users = self.repo.list_users().await?;
            let mut wallets: HashMap<UserId, Wallet> = self
                .repo
                .list_wallets()
                .await?
                .into_iter()
                .map(|w| (w.user_id, w))
                .collect();

            Ok::<_, AppError>(users
                .into_iter()
                .filter_map(|user| match wallets.remove(&user.id) {
                    Some(wallet) => Some(UserAccount { user, wallet }),
                    None => {
                        warn!(user_id = user.id, "User has no wallet");
                        None
                    }
                })
                .collect())
        })
        .await
    }

    // ========================
    // Balance mutations
    // ========================

    /// Credit a user's wallet. Returns the new balance.
    #[instrument(skip(self, description))]
    pub async fn deposit(
        &self,
        user_id: UserId,
        amount_cents: Cents,
        description: Option<String>,
    ) -> Result<Cents, AppError> {
        ensure_positive(amount_cents)?;

        let result = async {
            let (uow, outcome) = self
                .with_timeout("deposit", async {
                    let mut uow = self.repo.begin().await?;
                    let outcome =
                        Self::apply_deposit(&mut uow, user_id, amount_cents, description).await;
                    Ok::<_, AppError>((uow, outcome))
                })
                .await?;
            Self::finish(uow, outcome).await
        }
        .await;

        match &result {
            Ok(balance) => info!(user_id, amount_cents, balance, "Deposit committed"),
            Err(err) => warn!(user_id, amount_cents, error = %err, "Deposit rejected"),
        }
        result
    }

    async fn apply_deposit(
        uow: &mut UnitOfWork,
        user_id: UserId,
        amount_cents: Cents,
        description: Option<String>,
    ) -> Result<Cents, AppError> {
        let wallet = uow
            .find_wallet_by_user(user_id)
            .await?
            .ok_or(AppError::AccountNotFound(user_id))?;
        let balance = wallet
            .credited(amount_cents)
            .map_err(|e| balance_error(user_id, e))?;

        let now = Utc::now();
        uow.set_balance(wallet.id, balance, now).await?;
        let entry = NewEntry::deposit(user_id, amount_cents)
            .map_err(|e| balance_error(user_id, e))?
            .with_description(description);
        uow.append_entry(&entry, now).await?;

        Ok(balance)
    }

    /// Debit a user's wallet. Returns the new balance.
    #[instrument(skip(self, description))]
    pub async fn withdraw(
        &self,
        user_id: UserId,
        amount_cents: Cents,
        description: Option<String>,
    ) -> Result<Cents, AppError> {
        ensure_positive(amount_cents)?;

        let result = async {
            let (uow, outcome) = self
                .with_timeout("withdraw", async {
                    let mut uow = self.repo.begin().await?;
                    let outcome =
                        Self::apply_withdrawal(&mut uow, user_id, amount_cents, description).await;
                    Ok::<_, AppError>((uow, outcome))
                })
                .await?;
            Self::finish(uow, outcome).await
        }
        .await;

        match &result {
            Ok(balance) => info!(user_id, amount_cents, balance, "Withdrawal committed"),
            Err(err) => warn!(user_id, amount_cents, error = %err, "Withdrawal rejected"),
        }
        result
    }

    async fn apply_withdrawal(
        uow: &mut UnitOfWork,
        user_id: UserId,
        amount_cents: Cents,
        description: Option<String>,
    ) -> Result<Cents, AppError> {
        let wallet = uow
            .find_wallet_by_user(user_id)
            .await?
            .ok_or(AppError::AccountNotFound(user_id))?;
        let balance = wallet
            .debited(amount_cents)
            .map_err(|e| balance_error(user_id, e))?;

        let now = Utc::now();
        uow.set_balance(wallet.id, balance, now).await?;
        let entry = NewEntry::withdrawal(user_id, amount_cents)
            .map_err(|e| balance_error(user_id, e))?
            .with_description(description);
        uow.append_entry(&entry, now).await?;

        Ok(balance)
    }

    /// Move money between two wallets: one debit, one credit and one ledger
    /// entry, all or nothing.
    #[instrument(skip(self, description))]
    pub async fn transfer(
        &self,
        from_user_id: UserId,
        to_user_id: UserId,
        amount_cents: Cents,
        description: Option<String>,
    ) -> Result<TransferOutcome, AppError> {
        if from_user_id == to_user_id {
            return Err(AppError::InvalidArgument(
                "cannot transfer to the same wallet".into(),
            ));
        }
        ensure_positive(amount_cents)?;

        let result = async {
            let (uow, outcome) = self
                .with_timeout("transfer", async {
                    let mut uow = self.repo.begin().await?;
                    let outcome = Self::apply_transfer(
                        &mut uow,
                        from_user_id,
                        to_user_id,
                        amount_cents,
                        description,
                    )
                    .await;
                    Ok::<_, AppError>((uow, outcome))
                })
                .await?;
            Self::finish(uow, outcome).await
        }
        .await;

        match &result {
            Ok(outcome) => info!(
                from_user_id,
                to_user_id,
                amount_cents,
                entry_id = outcome.entry.id,
                "Transfer committed"
            ),
            Err(err) => warn!(
                from_user_id,
                to_user_id,
                amount_cents,
                error = %err,
                "Transfer rejected"
            ),
        }
        result
    }

    async fn apply_transfer(
        uow: &mut UnitOfWork,
        from_user_id: UserId,
        to_user_id: UserId,
        amount_cents: Cents,
        description: Option<String>,
    ) -> Result<TransferOutcome, AppError> {
        // Rows are always visited in ascending owner order, whatever the
        // direction of the transfer.
        let ascending = from_user_id < to_user_id;
        let (low, high) = if ascending {
            (from_user_id, to_user_id)
        } else {
            (to_user_id, from_user_id)
        };
        let low_wallet = uow.find_wallet_by_user(low).await?;
        let high_wallet = uow.find_wallet_by_user(high).await?;
        let (source, destination) = if ascending {
            (low_wallet, high_wallet)
        } else {
            (high_wallet, low_wallet)
        };

        let source = source.ok_or(AppError::SenderNotFound(from_user_id))?;
        let destination = destination.ok_or(AppError::RecipientNotFound(to_user_id))?;

        let from_balance = source
            .debited(amount_cents)
            .map_err(|e| balance_error(from_user_id, e))?;
        let to_balance = destination
            .credited(amount_cents)
            .map_err(|e| balance_error(to_user_id, e))?;

        let now = Utc::now();
        uow.set_balance(source.id, from_balance, now).await?;
        uow.set_balance(destination.id, to_balance, now).await?;
        let entry = NewEntry::transfer(from_user_id, to_user_id, amount_cents)
            .map_err(|e| balance_error(from_user_id, e))?
            .with_description(description);
        let entry = uow.append_entry(&entry, now).await?;

        Ok(TransferOutcome {
            from_balance,
            to_balance,
            entry,
        })
    }

    // ========================
    // Reads
    // ========================

    /// Current balance of a user's wallet.
    pub async fn get_balance(&self, user_id: UserId) -> Result<Cents, AppError> {
        self.with_timeout("get_balance", async {
            let wallet = self
                .repo
                .get_wallet_by_user(user_id)
                .await?
                .ok_or(AppError::AccountNotFound(user_id))?;
            Ok::<_, AppError>(wallet.balance_cents)
        })
        .await
    }

    /// One page of a user's ledger entries, newest first. An unknown user or
    /// a page past the end yields an empty list.
    pub async fn get_history(
        &self,
        user_id: UserId,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<LedgerEntry>, AppError> {
        let page = PageRequest::new(page, page_size, self.max_page_size)?;
        self.with_timeout("get_history", async {
            Ok::<_, AppError>(self.repo.list_entries_for_user(user_id, page).await?)
        })
        .await
    }

    /// Check ledger integrity and return a report.
    ///
    /// The counters are read without a shared snapshot; run it while no
    /// writes are in flight for an exact answer.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let report = self
            .with_timeout("check_integrity", async {
                let stats = self.repo.get_integrity_stats().await?;
                let wallets = self.repo.list_wallets().await?;
                let derived = self.repo.compute_ledger_balances().await?;
                Ok::<_, AppError>(build_integrity_report(&wallets, &derived, &stats))
            })
            .await?;
        if !report.is_healthy() {
            warn!(issues = report.issues.len(), "Ledger integrity check failed");
        }
        Ok(report)
    }

    // ========================
    // Unit-of-work plumbing
    // ========================

    /// Commit on success. On failure roll back explicitly, then hand the
    /// original error back.
    async fn finish<T>(uow: UnitOfWork, outcome: Result<T, AppError>) -> Result<T, AppError> {
        match outcome {
            Ok(value) => {
                uow.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = uow.rollback().await {
                    warn!(error = %format!("{:#}", rollback_err), "Rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Bound an operation by the configured timeout. A unit of work cut off
    /// here is dropped, which rolls it back. `finish` stays outside: a commit
    /// handed to the store cannot be called off.
    async fn with_timeout<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "{} exceeded {:?}",
                operation, self.operation_timeout
            ))),
        }
    }
}

fn ensure_positive(amount_cents: Cents) -> Result<(), AppError> {
    if amount_cents <= 0 {
        return Err(AppError::InvalidArgument(format!(
            "amount must be positive, got {}",
            amount_cents
        )));
    }
    Ok(())
}

fn balance_error(user_id: UserId, err: BalanceError) -> AppError {
    match err {
        BalanceError::NonPositiveAmount => {
            AppError::InvalidArgument("amount must be positive".into())
        }
        BalanceError::Insufficient { balance, required } => AppError::InsufficientBalance {
            user_id,
            balance,
            required,
        },
        BalanceError::Overflow => AppError::InvalidArgument(format!(
            "amount would overflow the balance of user {}",
            user_id
        )),
    }
}
