//! Integration tests for the credential registry.
//!
//! These tests verify that the registry:
//! - Rejects unknown capability classes and providers before any I/O
//! - Builds authenticated clients from ids or records
//! - Hands out shared or independent provider instances
//! - Pre-registers placeholder clients that refuse to sign

mod common;

use common::Harness;
use marketkey_core::registry::API_CLASSES;
use marketkey_core::{
    AesGcmCodec, ConfigError, CredentialContext, CredentialId, CredentialRegistry, Credentials,
    HttpTokenExchange, MarketkeyError, MemoryCache, MemoryRecordStore, NewCredentials,
    RegistryError, infer_region,
};
use std::sync::Arc;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, method, path},
};

async fn seeded(
    harness: Harness,
) -> (CredentialRegistry, Arc<common::ScriptedExchange>, Credentials) {
    let exchange = harness.exchange.clone();
    let ctx = harness.ctx;
    let seller = ctx.create_seller(Some("acme".to_string())).await.unwrap();
    let credentials = Credentials::create(
        &ctx,
        NewCredentials::new(seller.id, "client-id", "client-secret")
            .with_consumer_id("consumer-id")
            .with_private_key(common::SIGNING_KEY),
    )
    .await
    .unwrap();

    (CredentialRegistry::new(Arc::new(ctx)).unwrap(), exchange, credentials)
}

#[tokio::test]
async fn test_unknown_class_fails_without_io() {
    let (registry, exchange, _) = seeded(Harness::new()).await;

    // The id does not exist either; the class check must win.
    let err = registry
        .build_client("mp::us::TeleportApi", CredentialId::new(999))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MarketkeyError::Registry(RegistryError::InvalidCapability { .. })
    ));
    assert_eq!(exchange.calls(), 0);
}

#[tokio::test]
async fn test_unknown_provider() {
    let (registry, exchange, credentials) = seeded(Harness::new()).await;

    let err = registry
        .build_provider("unknown", credentials, true)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MarketkeyError::Registry(RegistryError::UnknownProvider { .. })
    ));
    assert_eq!(exchange.calls(), 0);
}

#[tokio::test]
async fn test_unknown_credential_id() {
    let (registry, _, _) = seeded(Harness::new()).await;

    let err = registry
        .build_client("mp::us::OrdersApi", 999u64)
        .await
        .unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_build_client_by_id() {
    let (registry, exchange, credentials) = seeded(Harness::new()).await;

    let client = registry
        .build_client("mp::ca::OrdersApi", credentials.id())
        .await
        .unwrap();

    assert_eq!(client.class().path(), "mp::ca::OrdersApi");
    assert!(!client.config().is_dummy());
    assert_eq!(client.config().access_token().unwrap().token.expose(), "tok123");

    let headers = client.auth_headers("/v3/ca/orders", "GET", "limit=5").unwrap();
    let header = |wanted: &str| {
        headers
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, value)| value.clone())
            .unwrap()
    };
    assert_eq!(header("WM_SEC.ACCESS_TOKEN"), "tok123");

    // The client signs with the same argument order as its configuration.
    let timestamp: i64 = header("WM_SEC.TIMESTAMP").parse().unwrap();
    let expected = client
        .config()
        .sign("/v3/ca/orders", "GET", timestamp, "limit=5")
        .unwrap();
    assert_eq!(header("WM_SEC.AUTH_SIGNATURE"), expected);

    // A second client for the same record reuses the cached token.
    registry
        .build_client("mp::ca::ItemsApi", credentials.id())
        .await
        .unwrap();
    assert_eq!(exchange.calls(), 1);
}

#[tokio::test]
async fn test_resolve_record_skips_store() {
    let (registry, _, credentials) = seeded(Harness::new()).await;
    let id = credentials.id();

    let resolved = registry.resolve_credential(credentials).await.unwrap();
    assert_eq!(resolved.id(), id);
}

#[tokio::test]
async fn test_shared_and_cloned_providers() {
    let (registry, _, credentials) = seeded(Harness::new()).await;

    let shared_a = registry
        .build_provider("marketplace", credentials.id(), false)
        .await
        .unwrap();
    let shared_b = registry
        .build_provider("marketplace", credentials.id(), false)
        .await
        .unwrap();
    let cloned = registry
        .build_provider("marketplace", credentials.id(), true)
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&shared_a, &shared_b));
    assert!(!Arc::ptr_eq(&shared_a, &cloned));
    assert_eq!(shared_a.config(), cloned.config());

    let orders = shared_a.api("OrdersApi").unwrap();
    assert_eq!(orders.class().path(), "mp::us::OrdersApi");
    assert!(matches!(
        shared_a.api("DsvCostApi"),
        Err(RegistryError::UnknownApi { .. })
    ));
}

#[tokio::test]
async fn test_shared_provider_sees_updated_credentials() {
    let (registry, _, mut credentials) = seeded(Harness::new()).await;

    let provider = registry
        .build_provider("supplier", credentials.id(), false)
        .await
        .unwrap();
    assert!(provider.config().partner_id().is_none());

    credentials
        .update(
            registry.context(),
            marketkey_core::CredentialsUpdate {
                partner_id: Some("partner-1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let again = registry
        .build_provider("supplier", credentials.id(), false)
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&provider, &again));
    assert_eq!(provider.config().partner_id(), Some("partner-1"));
}

#[tokio::test]
async fn test_placeholders_refuse_to_sign() {
    let (registry, exchange, _) = seeded(Harness::new()).await;

    assert_eq!(registry.placeholders().count(), API_CLASSES.len());
    for client in registry.placeholders() {
        assert!(client.config().is_dummy());
        assert_eq!(client.config().country(), client.class().country);
        assert_eq!(
            client.config().country(),
            infer_region(&client.class().path()).unwrap()
        );
        assert!(matches!(
            client.config().sign("/v3/orders", "GET", 1_700_000_000_000, ""),
            Err(ConfigError::DummySign)
        ));
    }

    let placeholder = registry.placeholder("supplier::us::DsvOrdersApi").unwrap();
    assert_eq!(placeholder.class().name, "DsvOrdersApi");
    assert!(registry.placeholder("supplier::ca::DsvOrdersApi").is_err());
    assert_eq!(exchange.calls(), 0);
}

#[tokio::test]
async fn test_end_to_end_with_token_endpoint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v3/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "tok123",
            "token_type": "Bearer",
            "expires_in": 900
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let ctx = CredentialContext::new(
        Arc::new(MemoryRecordStore::new()),
        Arc::new(MemoryCache::new()),
        Arc::new(AesGcmCodec::new(&common::KEY)),
        Arc::new(HttpTokenExchange::with_base_url(&mock_server.uri()).unwrap()),
    );
    let seller = ctx.create_seller(None).await.unwrap();
    let credentials = Credentials::create(
        &ctx,
        NewCredentials::new(seller.id, "client-id", "client-secret").with_consumer_id("consumer"),
    )
    .await
    .unwrap();
    let id = credentials.id();

    let registry = CredentialRegistry::new(Arc::new(ctx)).unwrap();
    let orders = registry.build_client("mp::us::OrdersApi", id).await.unwrap();
    let feeds = registry.build_client("mp::us::FeedsApi", id).await.unwrap();

    assert_eq!(orders.config().access_token().unwrap().token.expose(), "tok123");
    assert_eq!(feeds.config().access_token(), orders.config().access_token());
    // MockServer verifies the single expected call on drop.
}
