use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt};

use crate::application::WalletService;
use crate::config::StoreConfig;
use crate::domain::{LedgerEntry, UserId, format_cents, parse_cents};

/// Wallet Ledger - balances, transfers and an append-only history
#[derive(Parser)]
#[command(name = "wallet-ledger")]
#[command(about = "A ledger-backed wallet service with atomic deposits, withdrawals and transfers")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(long, env = "WALLET_DATABASE", default_value = "wallet.db", global = true)]
    pub database: String,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, env = "WALLET_LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "WALLET_JSON_LOGS", global = true)]
    pub json_logs: bool,

    /// Maximum pooled database connections
    #[arg(long, env = "WALLET_MAX_CONNECTIONS", default_value_t = 8, global = true)]
    pub max_connections: u32,

    /// How long to wait for the database write lock, in milliseconds
    #[arg(long, env = "WALLET_BUSY_TIMEOUT_MS", default_value_t = 5_000, global = true)]
    pub busy_timeout_ms: u64,

    /// Upper bound on a single operation, in milliseconds
    #[arg(long, env = "WALLET_OPERATION_TIMEOUT_MS", default_value_t = 15_000, global = true)]
    pub operation_timeout_ms: u64,

    /// Largest history page that will be returned
    #[arg(long, env = "WALLET_MAX_PAGE_SIZE", default_value_t = 100, global = true)]
    pub max_page_size: i64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Register a user and open their wallet
    Register {
        /// Display name
        name: String,

        /// Contact email (must be unique)
        #[arg(short, long)]
        email: String,
    },

    /// List all users with their balances
    Users {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one user and their wallet
    User {
        /// User ID
        id: UserId,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a user's balance
    Balance {
        /// User ID
        user: UserId,
    },

    /// Add money to a user's wallet
    Deposit {
        /// User ID
        user: UserId,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Description of the deposit
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Take money out of a user's wallet
    Withdraw {
        /// User ID
        user: UserId,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Description of the withdrawal
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Move money from one user's wallet to another's
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Sending user ID
        #[arg(long)]
        from: UserId,

        /// Receiving user ID
        #[arg(long)]
        to: UserId,

        /// Description of the transfer
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show a user's transaction history, newest first
    History {
        /// User ID
        user: UserId,

        /// Page number, starting at 1
        #[arg(long, default_value_t = 1)]
        page: i64,

        /// Entries per page
        #[arg(short, long, default_value_t = 10)]
        limit: i64,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Verify ledger integrity
    Check,
}

impl Cli {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.database)
            .with_max_connections(self.max_connections)
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
            .with_operation_timeout(Duration::from_millis(self.operation_timeout_ms))
            .with_max_page_size(self.max_page_size)
    }

    /// Install the global tracing subscriber. Logs go to stderr so they never
    /// mix with command output.
    pub fn init_tracing(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level));

        if self.json_logs {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .json()
                .init();
        } else {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
    }

    pub async fn run(self) -> Result<()> {
        let config = self.store_config();
        let service = match self.command {
            Commands::Init => WalletService::init(&config).await?,
            _ => WalletService::connect(&config).await?,
        };

        let outcome = run_command(&service, &config, self.command).await;
        service.repository().close().await;
        outcome
    }
}

async fn run_command(service: &WalletService, config: &StoreConfig, command: Commands) -> Result<()> {
    match command {
        Commands::Init => {
            println!("Database initialized: {}", config.database_path);
        }

        Commands::Register { name, email } => {
            let registration = service.register_user(&name, &email).await?;
            println!(
                "Registered user {} ({}) with wallet {}",
                registration.user.id, registration.user.email, registration.wallet.id
            );
        }

        Commands::Users { json } => {
            let accounts = service.list_users().await?;
            if json {
                print_json(&accounts)?;
            } else if accounts.is_empty() {
                println!("No users found.");
            } else {
                println!("{:<6} {:<20} {:<28} {:>12}", "ID", "NAME", "EMAIL", "BALANCE");
                println!("{}", "-".repeat(69));
                for account in accounts {
                    println!(
                        "{:<6} {:<20} {:<28} {:>12}",
                        account.user.id,
                        truncate(&account.user.username, 20),
                        truncate(&account.user.email, 28),
                        format_cents(account.wallet.balance_cents)
                    );
                }
            }
        }

        Commands::User { id, json } => {
            let account = service.get_user(id).await?;
            if json {
                print_json(&account)?;
            } else {
                println!("User:       {}", account.user.id);
                println!("Name:       {}", account.user.username);
                println!("Email:      {}", account.user.email);
                println!("Wallet:     {}", account.wallet.id);
                println!("Balance:    {}", format_cents(account.wallet.balance_cents));
                println!(
                    "Registered: {}",
                    account.user.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        Commands::Balance { user } => {
            let balance = service.get_balance(user).await?;
            println!("{}", format_cents(balance));
        }

        Commands::Deposit {
            user,
            amount,
            description,
        } => {
            let amount_cents = parse_amount(&amount)?;
            let balance = service.deposit(user, amount_cents, description).await?;
            println!(
                "Deposited {} to user {}. Balance: {}",
                format_cents(amount_cents),
                user,
                format_cents(balance)
            );
        }

        Commands::Withdraw {
            user,
            amount,
            description,
        } => {
            let amount_cents = parse_amount(&amount)?;
            let balance = service.withdraw(user, amount_cents, description).await?;
            println!(
                "Withdrew {} from user {}. Balance: {}",
                format_cents(amount_cents),
                user,
                format_cents(balance)
            );
        }

        Commands::Transfer {
            amount,
            from,
            to,
            description,
        } => {
            let amount_cents = parse_amount(&amount)?;
            let outcome = service
                .transfer(from, to, amount_cents, description)
                .await?;
            println!(
                "Transferred {} from user {} to user {} (entry {})",
                format_cents(amount_cents),
                from,
                to,
                outcome.entry.id
            );
            println!(
                "Balances: {} -> {}, {} -> {}",
                from,
                format_cents(outcome.from_balance),
                to,
                format_cents(outcome.to_balance)
            );
        }

        Commands::History {
            user,
            page,
            limit,
            json,
        } => {
            let entries = service.get_history(user, page, limit).await?;
            if json {
                print_json(&entries)?;
            } else {
                print_history(user, &entries);
            }
        }

        Commands::Check => {
            let report = service.check_integrity().await?;

            println!("Users:   {}", report.user_count);
            println!("Wallets: {}", report.wallet_count);
            println!("Entries: {}", report.entry_count);
            println!("Total:   {}", format_cents(report.total_balance));
            println!();

            if report.is_healthy() {
                println!("Ledger is consistent.");
            } else {
                println!("Issues found:");
                for issue in &report.issues {
                    println!("  - {}", issue);
                }
                anyhow::bail!("Ledger integrity check failed");
            }
        }
    }
    Ok(())
}

fn parse_amount(amount: &str) -> Result<i64> {
    parse_cents(amount).with_context(|| format!("Invalid amount '{}'. Use '50.00' or '50'", amount))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_history(user: UserId, entries: &[LedgerEntry]) {
    if entries.is_empty() {
        println!("No entries found.");
        return;
    }

    println!(
        "{:<8} {:<19} {:<10} {:>6} {:>6} {:>12}  {}",
        "ID", "DATE", "KIND", "FROM", "TO", "AMOUNT", "DESCRIPTION"
    );
    println!("{}", "-".repeat(80));
    for entry in entries {
        // Signed from this user's point of view
        let amount = entry.delta_for(user);
        println!(
            "{:<8} {:<19} {:<10} {:>6} {:>6} {:>12}  {}",
            entry.id,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.kind.as_str(),
            entry.from_user_id.map(|id| id.to_string()).unwrap_or_default(),
            entry.to_user_id.map(|id| id.to_string()).unwrap_or_default(),
            format_cents(amount),
            entry.description.as_deref().unwrap_or("")
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
