//! Integration tests for credential records in the JSON file store.

mod common;

use marketkey_core::{
    AesGcmCodec, Country, CredentialContext, Credentials, CredentialsUpdate, FileRecordStore,
    GrantType, MemoryCache, NewCredentials, RecordStore, Secret,
};
use std::sync::Arc;
use tempfile::TempDir;

fn context(store: FileRecordStore, key: [u8; 32]) -> CredentialContext {
    let harness = common::Harness::new();
    CredentialContext::new(
        Arc::new(store),
        Arc::new(MemoryCache::new()),
        Arc::new(AesGcmCodec::new(&key)),
        harness.exchange.clone(),
    )
}

#[tokio::test]
async fn test_records_survive_reload() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("records.json");

    let id = {
        let ctx = context(FileRecordStore::load_from_path(&path).unwrap(), common::KEY);
        let seller = ctx.create_seller(Some("acme".to_string())).await.unwrap();
        let mut credentials = Credentials::create(
            &ctx,
            NewCredentials::new(seller.id, "client-id", "client-secret")
                .with_country(Country::Ca)
                .with_grant_type(GrantType::RefreshToken)
                .with_refresh_token("refresh-1")
                .with_channel_type("channel"),
        )
        .await
        .unwrap();

        credentials
            .update(
                &ctx,
                CredentialsUpdate {
                    private_key: Some(Secret::new("private-key")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        credentials.id()
    };

    // Secrets never reach the file in plaintext.
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(!contents.contains("client-secret"));
    assert!(!contents.contains("refresh-1"));
    assert!(!contents.contains("private-key"));
    assert!(contents.contains("client-id"));

    let ctx = context(FileRecordStore::load_from_path(&path).unwrap(), common::KEY);
    let credentials = Credentials::find(&ctx, id).await.unwrap();

    assert_eq!(credentials.client_secret().expose(), "client-secret");
    assert_eq!(credentials.refresh_token().unwrap().expose(), "refresh-1");
    assert_eq!(credentials.private_key().unwrap().expose(), "private-key");
    assert_eq!(credentials.country(), Country::Ca);
    assert_eq!(credentials.grant_type(), GrantType::RefreshToken);
    assert_eq!(credentials.channel_type(), Some("channel"));
    assert_eq!(credentials.seller(&ctx).await.unwrap().name.as_deref(), Some("acme"));
}

#[tokio::test]
async fn test_wrong_key_fails_to_decode() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("records.json");

    let ctx = context(FileRecordStore::load_from_path(&path).unwrap(), common::KEY);
    let seller = ctx.create_seller(None).await.unwrap();
    let id = Credentials::create(&ctx, NewCredentials::new(seller.id, "client-id", "secret"))
        .await
        .unwrap()
        .id();

    let other = context(FileRecordStore::load_from_path(&path).unwrap(), [9u8; 32]);
    let err = Credentials::find(&other, id).await.unwrap_err();
    assert!(matches!(
        err,
        marketkey_core::MarketkeyError::Codec(marketkey_core::CodecError::Decoding { .. })
    ));
}

#[tokio::test]
async fn test_seller_listing_and_cascade_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("records.json");

    let ctx = context(FileRecordStore::load_from_path(&path).unwrap(), common::KEY);
    let keep = ctx.create_seller(Some("keep".to_string())).await.unwrap();
    let gone = ctx.create_seller(Some("drop".to_string())).await.unwrap();
    for seller in [keep.id, gone.id] {
        Credentials::create(&ctx, NewCredentials::new(seller, "client", "secret"))
            .await
            .unwrap();
    }

    let deleted = ctx.delete_seller(gone.id).await.unwrap();
    assert_eq!(deleted.len(), 1);

    let reloaded = FileRecordStore::load_from_path(&path).unwrap();
    let sellers = reloaded.list_sellers().await.unwrap();
    assert_eq!(sellers.len(), 1);
    assert_eq!(sellers[0].id, keep.id);
    assert!(reloaded.list_credentials(gone.id).await.unwrap().is_empty());
    assert_eq!(reloaded.list_credentials(keep.id).await.unwrap().len(), 1);

    let remaining = ctx.credentials_for_seller(keep.id).await.unwrap();
    assert_eq!(remaining[0].client_secret().expose(), "secret");
}
