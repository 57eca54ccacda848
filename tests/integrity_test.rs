mod common;

use std::time::Duration;

use anyhow::Result;
use common::{funded_user, register, test_service};
use sqlx::SqlitePool;
use wallet_ledger::application::{AppError, WalletService};
use wallet_ledger::config::StoreConfig;
use wallet_ledger::domain::IntegrityIssue;

async fn raw_pool(temp: &tempfile::TempDir) -> Result<SqlitePool> {
    let db_path = temp.path().join("test.db");
    Ok(SqlitePool::connect(&format!("sqlite:{}", db_path.display())).await?)
}

#[tokio::test]
async fn test_report_counts() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = funded_user(&service, "Alice", "a@x.com", 5000).await?;
    let bob = register(&service, "Bob", "b@x.com").await?;
    service.transfer(alice, bob, 1200, None).await?;

    let report = service.check_integrity().await?;
    assert_eq!(report.user_count, 2);
    assert_eq!(report.wallet_count, 2);
    assert_eq!(report.entry_count, 2);
    assert_eq!(report.total_balance, 5000);
    assert!(report.is_healthy());
    Ok(())
}

#[tokio::test]
async fn test_soft_deleted_entries_are_ignored() -> Result<()> {
    let (service, temp) = test_service().await?;
    let alice = funded_user(&service, "Alice", "a@x.com", 5000).await?;
    let bob = register(&service, "Bob", "b@x.com").await?;

    // A deposit carrying a source is malformed, but this one is deleted.
    let pool = raw_pool(&temp).await?;
    sqlx::query(
        r#"
        INSERT INTO ledger_entries (kind, from_user_id, to_user_id, amount_cents, status, created_at, deleted_at)
        VALUES ('deposit', ?, ?, 300, 'completed', '2026-01-01T00:00:00.000000Z', '2026-01-02T00:00:00.000000Z')
        "#,
    )
    .bind(alice)
    .bind(bob)
    .execute(&pool)
    .await?;

    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "integrity issues: {:?}", report.issues);
    assert_eq!(report.entry_count, 1);
    assert!(service.get_history(bob, 1, 10).await?.is_empty());

    // The same row left live is reported.
    sqlx::query("UPDATE ledger_entries SET deleted_at = NULL WHERE kind = 'deposit' AND from_user_id IS NOT NULL")
        .execute(&pool)
        .await?;
    pool.close().await;

    let report = service.check_integrity().await?;
    assert!(!report.is_healthy());
    assert!(
        report
            .issues
            .iter()
            .any(|issue| matches!(issue, IntegrityIssue::MalformedEntries(1)))
    );
    Ok(())
}

#[tokio::test]
async fn test_integrity_check_honours_operation_timeout() -> Result<()> {
    let (service, temp) = test_service().await?;
    funded_user(&service, "Alice", "a@x.com", 1000).await?;

    let db_path = temp.path().join("test.db");
    let config =
        StoreConfig::new(db_path.to_str().unwrap()).with_operation_timeout(Duration::ZERO);
    let hurried = WalletService::connect(&config).await?;

    assert!(matches!(
        hurried.check_integrity().await,
        Err(AppError::Timeout(_))
    ));
    Ok(())
}
