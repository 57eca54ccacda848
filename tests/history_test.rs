mod common;

use anyhow::Result;
use common::{funded_user, register, test_service, test_service_with};
use wallet_ledger::application::AppError;
use wallet_ledger::domain::EntryKind;

#[tokio::test]
async fn test_history_is_newest_first() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = register(&service, "Alice", "a@x.com").await?;
    let bob = register(&service, "Bob", "b@x.com").await?;

    service.deposit(alice, 10000, Some("salary".into())).await?;
    service.withdraw(alice, 3000, Some("rent".into())).await?;
    service.transfer(alice, bob, 2000, Some("dinner".into())).await?;

    let history = service.get_history(alice, 1, 10).await?;
    let kinds: Vec<_> = history.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EntryKind::Transfer, EntryKind::Withdrawal, EntryKind::Deposit]
    );
    let descriptions: Vec<_> = history
        .iter()
        .map(|e| e.description.as_deref().unwrap_or(""))
        .collect();
    assert_eq!(descriptions, vec!["dinner", "rent", "salary"]);

    for pair in history.windows(2) {
        assert!(pair[0].created_at >= pair[1].created_at);
        assert!(pair[0].id > pair[1].id);
    }
    Ok(())
}

#[tokio::test]
async fn test_history_entry_shapes() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = register(&service, "Alice", "a@x.com").await?;

    service.deposit(alice, 500, None).await?;
    service.withdraw(alice, 200, Some("   ".into())).await?;

    let history = service.get_history(alice, 1, 10).await?;
    let withdrawal = &history[0];
    assert_eq!(withdrawal.kind, EntryKind::Withdrawal);
    assert_eq!(withdrawal.from_user_id, Some(alice));
    assert_eq!(withdrawal.to_user_id, None);
    assert_eq!(withdrawal.description, None);
    assert_eq!(withdrawal.delta_for(alice), -200);

    let deposit = &history[1];
    assert_eq!(deposit.kind, EntryKind::Deposit);
    assert_eq!(deposit.from_user_id, None);
    assert_eq!(deposit.to_user_id, Some(alice));
    assert_eq!(deposit.delta_for(alice), 500);
    Ok(())
}

#[tokio::test]
async fn test_history_pagination() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = funded_user(&service, "Alice", "a@x.com", 1000).await?;
    service.withdraw(alice, 100, None).await?;

    let first = service.get_history(alice, 1, 2).await?;
    assert_eq!(first.len(), 2);
    assert!(service.get_history(alice, 2, 2).await?.is_empty());

    let newest = service.get_history(alice, 1, 1).await?;
    let oldest = service.get_history(alice, 2, 1).await?;
    assert_eq!(newest[0], first[0]);
    assert_eq!(oldest[0], first[1]);
    Ok(())
}

#[tokio::test]
async fn test_page_size_is_clamped() -> Result<()> {
    let (service, _temp) = test_service_with(|config| config.with_max_page_size(3)).await?;
    let alice = register(&service, "Alice", "a@x.com").await?;
    for _ in 0..5 {
        service.deposit(alice, 100, None).await?;
    }

    assert_eq!(service.get_history(alice, 1, 50).await?.len(), 3);
    assert_eq!(service.get_history(alice, 2, 50).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_invalid_paging_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = funded_user(&service, "Alice", "a@x.com", 1000).await?;

    for (page, page_size) in [(0, 10), (-1, 10), (1, 0), (1, -5)] {
        assert!(
            matches!(
                service.get_history(alice, page, page_size).await,
                Err(AppError::InvalidArgument(_))
            ),
            "page {} size {} should be rejected",
            page,
            page_size
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_history_for_unknown_user_is_empty() -> Result<()> {
    let (service, _temp) = test_service().await?;
    funded_user(&service, "Alice", "a@x.com", 1000).await?;

    assert!(service.get_history(999, 1, 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_transfer_shows_in_both_histories() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let alice = funded_user(&service, "Alice", "a@x.com", 1000).await?;
    let bob = register(&service, "Bob", "b@x.com").await?;
    let carol = register(&service, "Carol", "c@x.com").await?;

    let outcome = service.transfer(alice, bob, 300, None).await?;

    let alice_latest = &service.get_history(alice, 1, 1).await?[0];
    let bob_latest = &service.get_history(bob, 1, 1).await?[0];
    assert_eq!(alice_latest.id, outcome.entry.id);
    assert_eq!(bob_latest.id, outcome.entry.id);
    assert_eq!(alice_latest.delta_for(alice), -300);
    assert_eq!(bob_latest.delta_for(bob), 300);

    assert!(service.get_history(carol, 1, 10).await?.is_empty());
    Ok(())
}
