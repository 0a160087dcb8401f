// Integration tests for the credential lifecycle
//
// These tests drive the AuthManager against a real file-backed store and a
// mocked Google token endpoint.

use chrono::{Duration as ChronoDuration, Utc};
use mockito::Matcher;
use proptest::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gdrive_mcp::auth::{
    AuthManager, CredentialBundle, CredentialStore, FileCredentialStore, GoogleTokenEndpoint,
    MemoryCredentialStore, PersistedCredentialRecord, RefreshSettings, RefreshTokenAuthorizer,
};
use gdrive_mcp::error::AuthError;

// ==================================================================================================
// Test Helpers
// ==================================================================================================

fn bundle(access_token: &str, expires_in: ChronoDuration) -> CredentialBundle {
    CredentialBundle {
        access_token: access_token.to_string(),
        refresh_token: "refresh-token-1".to_string(),
        expires_at: Utc::now() + expires_in,
        token_type: "Bearer".to_string(),
    }
}

fn write_record(path: &Path, bundle: CredentialBundle) {
    let store = FileCredentialStore::new(path.to_path_buf());
    store
        .save(&PersistedCredentialRecord::new(
            Some("client-id".to_string()),
            bundle,
            Utc::now(),
        ))
        .expect("Failed to seed credential file");
}

fn endpoint(token_url: String) -> Arc<GoogleTokenEndpoint> {
    Arc::new(
        GoogleTokenEndpoint::new(
            token_url,
            "client-id".to_string(),
            "client-secret".to_string(),
            Duration::from_secs(5),
        )
        .expect("Failed to create token endpoint"),
    )
}

fn file_manager(path: &Path, token_url: String) -> AuthManager {
    AuthManager::new(
        Arc::new(FileCredentialStore::new(path.to_path_buf())),
        endpoint(token_url),
        RefreshSettings::default(),
    )
    .with_client_id("client-id")
}

// ==================================================================================================
// Refresh
// ==================================================================================================

#[tokio::test]
async fn test_expired_record_is_refreshed_and_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    write_record(&path, bundle("expired-token", ChronoDuration::seconds(-1)));

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "refresh-token-1".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"fresh-token","expires_in":3600,"token_type":"Bearer"}"#)
        .expect(1)
        .create_async()
        .await;

    let manager = file_manager(&path, format!("{}/token", server.url()));
    let before = Utc::now();
    let credential = manager.get_valid_credentials().await.unwrap();

    assert_eq!(credential.access_token, "fresh-token");
    let lifetime = credential.expires_at - before;
    assert!(lifetime > ChronoDuration::seconds(3590));
    assert!(lifetime <= ChronoDuration::seconds(3601));

    // Persisted record reflects the refresh and keeps the refresh token
    let record = FileCredentialStore::new(path.clone())
        .read_record()
        .unwrap()
        .unwrap();
    assert_eq!(record.credentials.access_token, "fresh-token");
    assert_eq!(record.credentials.refresh_token, "refresh-token-1");
    assert_eq!(record.client_id.as_deref(), Some("client-id"));

    // Second call is served from memory
    let again = manager.get_valid_credentials().await.unwrap();
    assert_eq!(again.access_token, "fresh-token");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    write_record(&path, bundle("expired-token", ChronoDuration::seconds(-1)));

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"shared-token","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let manager = Arc::new(file_manager(&path, format!("{}/token", server.url())));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_valid_credentials().await })
        })
        .collect();

    for handle in handles {
        let credential = handle.await.unwrap().unwrap();
        assert_eq!(credential.access_token, "shared-token");
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_invalid_grant_leaves_record_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    write_record(&path, bundle("expired-token", ChronoDuration::seconds(-1)));
    let original = std::fs::read(&path).unwrap();

    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#)
        .create_async()
        .await;

    let manager = file_manager(&path, format!("{}/token", server.url()));
    let err = manager.get_valid_credentials().await.unwrap_err();

    match err {
        AuthError::RefreshFailed(message) => assert!(message.contains("invalid_grant")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(std::fs::read(&path).unwrap(), original);
}

#[tokio::test]
async fn test_token_inside_margin_is_refreshed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    // Valid for two more minutes, inside the five minute margin
    write_record(&path, bundle("aging-token", ChronoDuration::minutes(2)));

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"renewed-token","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let manager = file_manager(&path, format!("{}/token", server.url()));
    let credential = manager.get_valid_credentials().await.unwrap();

    assert_eq!(credential.access_token, "renewed-token");
    mock.assert_async().await;
}

// ==================================================================================================
// Missing and corrupt records
// ==================================================================================================

#[tokio::test]
async fn test_missing_record_without_authorizer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");

    let manager = file_manager(&path, "http://127.0.0.1:9/token".to_string());

    assert!(manager.load_credentials_quietly().is_none());
    let err = manager.get_valid_credentials().await.unwrap_err();
    assert!(matches!(err, AuthError::NoCredentials(_)));
    assert!(!path.exists());
}

#[tokio::test]
async fn test_corrupt_record_is_treated_as_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    std::fs::write(&path, b"{ this is not json").unwrap();

    let manager = file_manager(&path, "http://127.0.0.1:9/token".to_string());

    assert!(manager.load_credentials_quietly().is_none());
    let err = manager.get_valid_credentials().await.unwrap_err();
    assert!(matches!(err, AuthError::NoCredentials(_)));

    let store = FileCredentialStore::new(path.clone());
    assert!(matches!(store.read_record(), Err(AuthError::StoreCorrupt(_))));
}

#[tokio::test]
async fn test_quiet_load_does_not_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    write_record(&path, bundle("expired-token", ChronoDuration::seconds(-60)));

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .expect(0)
        .create_async()
        .await;

    let manager = file_manager(&path, format!("{}/token", server.url()));
    let loaded = manager.load_credentials_quietly().unwrap();

    assert_eq!(loaded.access_token, "expired-token");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_bootstrap_from_refresh_token_writes_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("credentials.json");

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/token")
        .match_body(Matcher::UrlEncoded("refresh_token".into(), "seed-token".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"bootstrapped","expires_in":3600}"#)
        .expect(1)
        .create_async()
        .await;

    let manager = file_manager(&path, format!("{}/token", server.url()))
        .with_authorizer(Arc::new(RefreshTokenAuthorizer::new("seed-token".to_string())));

    let credential = manager.get_valid_credentials().await.unwrap();
    assert_eq!(credential.access_token, "bootstrapped");

    let record = FileCredentialStore::new(path.clone())
        .read_record()
        .unwrap()
        .unwrap();
    assert_eq!(record.credentials.refresh_token, "seed-token");
    mock.assert_async().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_record_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    write_record(&path, bundle("token", ChronoDuration::hours(1)));

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

// ==================================================================================================
// Properties
// ==================================================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A bundle valid beyond the margin is served without any network call
    #[test]
    fn test_fresh_bundle_never_contacts_endpoint(extra_secs in 1i64..86_400) {
        let margin = RefreshSettings::default().margin;
        let store = Arc::new(MemoryCredentialStore::with_record(PersistedCredentialRecord::new(
            None,
            bundle("cached-token", margin + ChronoDuration::seconds(extra_secs + 5)),
            Utc::now(),
        )));

        // Port 9 (discard) is never listening; any refresh attempt would fail
        let manager = AuthManager::new(
            store,
            endpoint("http://127.0.0.1:9/token".to_string()),
            RefreshSettings::default(),
        );

        let credential = tokio_test::block_on(manager.get_valid_credentials()).unwrap();
        prop_assert_eq!(credential.access_token, "cached-token");
    }

    /// The refresh token survives a refresh that does not rotate it
    #[test]
    fn test_refresh_token_preserved(expires_in in 60u64..7200) {
        let current = bundle("old", ChronoDuration::seconds(-1));
        let grant = gdrive_mcp::auth::TokenGrant {
            access_token: "new".to_string(),
            refresh_token: None,
            expires_in,
            token_type: "Bearer".to_string(),
        };

        let now = Utc::now();
        let refreshed = current.refreshed(grant, now);
        prop_assert_eq!(refreshed.refresh_token, "refresh-token-1");
        prop_assert_eq!(refreshed.expires_at, now + ChronoDuration::seconds(expires_in as i64));
    }
}
