use api::repositories::{AccountStore, PostgresAccountStore, StoreError};
use domain::{Account, AccountType, Wallet, WalletType};
use sqlx::PgPool;
use uuid::Uuid;

fn account(wallet: &Wallet, address: &str, blockchain: &str) -> Account {
    Account {
        id: Uuid::new_v4(),
        wallet_id: wallet.id,
        address: address.to_string(),
        blockchain: blockchain.into(),
        account_type: AccountType::Legacy,
        encrypted_key: Some("sealed".to_string()),
    }
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn commit_import_is_atomic(pool: PgPool) {
    let store = PostgresAccountStore::new(pool);
    let wallet = Wallet::new("imported", WalletType::Legacy);
    store
        .commit_import(Some(&wallet), &[account(&wallet, "NAddr", "neo3")])
        .await
        .expect("first commit");

    let second = Wallet::new("again", WalletType::Legacy);
    let err = store
        .commit_import(
            Some(&second),
            &[account(&second, "0xabc", "ethereum"), account(&second, "NAddr", "neo3")],
        )
        .await
        .expect_err("unique pair");
    assert!(matches!(err, StoreError::Conflict { .. }));

    assert_eq!(store.list_wallets().await.expect("wallets").len(), 1);
    assert_eq!(store.list_accounts().await.expect("accounts").len(), 1);
    assert!(!store.exists("0xabc", &"ethereum".into()).await.expect("exists"));
}

#[sqlx::test(migrations = "../migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn account_round_trips_through_rows(pool: PgPool) {
    let store = PostgresAccountStore::new(pool);
    let wallet = store
        .insert_wallet(&Wallet::new("main", WalletType::Standard))
        .await
        .expect("wallet");
    let stored = store
        .insert_account(&account(&wallet, "0xabc", "ethereum"))
        .await
        .expect("account");

    let found = store
        .find_account("0xabc", &"ethereum".into())
        .await
        .expect("query")
        .expect("present");
    assert_eq!(found, stored);
    assert_eq!(store.find_wallet(wallet.id).await.expect("query"), Some(wallet));

    let orphan = Wallet::new("ghost", WalletType::Legacy);
    let err = store
        .insert_account(&account(&orphan, "0xdef", "ethereum"))
        .await
        .expect_err("missing wallet");
    assert!(matches!(err, StoreError::WalletNotFound(_)));
}
