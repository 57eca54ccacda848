// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use tempfile::TempDir;
use wallet_ledger::application::WalletService;
use wallet_ledger::config::StoreConfig;
use wallet_ledger::domain::{Cents, UserId};

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(WalletService, TempDir)> {
    test_service_with(|config| config).await
}

/// Same as [`test_service`], with a hook to adjust the configuration.
pub async fn test_service_with(
    configure: impl FnOnce(StoreConfig) -> StoreConfig,
) -> Result<(WalletService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let config = configure(StoreConfig::new(db_path.to_str().unwrap()));
    let service = WalletService::init(&config).await?;
    Ok((service, temp_dir))
}

/// Register a user and return their ID.
pub async fn register(service: &WalletService, name: &str, email: &str) -> Result<UserId> {
    Ok(service.register_user(name, email).await?.user.id)
}

/// Register a user and fund their wallet.
pub async fn funded_user(
    service: &WalletService,
    name: &str,
    email: &str,
    amount: Cents,
) -> Result<UserId> {
    let id = register(service, name, email).await?;
    if amount > 0 {
        service.deposit(id, amount, Some("opening".into())).await?;
    }
    Ok(id)
}

/// Assert the ledger re-derives every balance and has no malformed rows.
pub async fn assert_ledger_consistent(service: &WalletService) -> Result<()> {
    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "integrity issues: {:?}", report.issues);
    Ok(())
}
