// Connection registry: tier precedence, mutation, credentials, caching

use std::collections::HashMap;
use tempfile::tempdir;

use super::common::{create_test_db, seed_source_db, test_config};
use crate::models::connection::{
    ConnectionSpec, CredentialRef, DatabaseEngine, SchemaFilter, SourceTier,
};
use crate::services::registry::ConnectionRegistry;
use crate::utils::ApiError;

fn user_spec(name: &str, database: &str) -> ConnectionSpec {
    ConnectionSpec {
        name: name.to_string(),
        engine: DatabaseEngine::Sqlite,
        host: None,
        port: None,
        database: Some(database.to_string()),
        username: None,
        credentials: CredentialRef::None,
        allowed_schemas: None,
        predefined_schemas: HashMap::new(),
        tier: SourceTier::User,
        owner: "alice".to_string(),
    }
}

#[tokio::test]
async fn file_tier_connections_are_visible() {
    let dir = tempdir().unwrap();
    let source = seed_source_db(dir.path()).await;
    let config = test_config(&source, dir.path());
    let registry = ConnectionRegistry::new(create_test_db().await, &config);

    let spec = registry.get_spec("anyone", "testdb").await.unwrap();
    assert_eq!(spec.tier, SourceTier::File);
    assert_eq!(spec.engine, DatabaseEngine::Sqlite);
    assert!(registry.exists("anyone", "testdb").await);
    assert!(!registry.exists("anyone", "nope").await);
}

#[tokio::test]
async fn user_tier_shadows_file_tier() {
    let dir = tempdir().unwrap();
    let source = seed_source_db(dir.path()).await;
    let config = test_config(&source, dir.path());
    let registry = ConnectionRegistry::new(create_test_db().await, &config);

    registry
        .add_user_connection("alice", user_spec("testdb", "/tmp/other.db"))
        .await
        .unwrap();

    // alice sees her own spec, bob still sees the file tier
    let for_alice = registry.get_spec("alice", "testdb").await.unwrap();
    assert_eq!(for_alice.tier, SourceTier::User);
    assert_eq!(for_alice.database.as_deref(), Some("/tmp/other.db"));

    let for_bob = registry.get_spec("bob", "testdb").await.unwrap();
    assert_eq!(for_bob.tier, SourceTier::File);

    // precedence also applies in listings
    let listed = registry.list("alice").await.unwrap();
    let entry = listed.iter().find(|s| s.name == "testdb").unwrap();
    assert_eq!(entry.tier, SourceTier::User);
}

#[tokio::test]
async fn duplicate_user_connection_is_rejected() {
    let dir = tempdir().unwrap();
    let source = seed_source_db(dir.path()).await;
    let config = test_config(&source, dir.path());
    let registry = ConnectionRegistry::new(create_test_db().await, &config);

    registry.add_user_connection("alice", user_spec("mine", ":memory:")).await.unwrap();
    let err = registry
        .add_user_connection("alice", user_spec("mine", ":memory:"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ValidationError(_)));
}

#[tokio::test]
async fn inline_secrets_move_to_the_session_cache() {
    let dir = tempdir().unwrap();
    let source = seed_source_db(dir.path()).await;
    let config = test_config(&source, dir.path());
    let registry = ConnectionRegistry::new(create_test_db().await, &config);

    let mut spec = user_spec("secretive", ":memory:");
    spec.credentials = CredentialRef::Inline { secret: "hunter2".to_string() };
    let stored = registry.add_user_connection("alice", spec).await.unwrap();

    // never persisted inline
    assert_eq!(stored.credentials, CredentialRef::SessionCache);
    let reloaded = registry.get_spec("alice", "secretive").await.unwrap();
    assert_eq!(reloaded.credentials, CredentialRef::SessionCache);
}

#[tokio::test]
async fn missing_session_credential_is_auth_missing() {
    let dir = tempdir().unwrap();
    let source = seed_source_db(dir.path()).await;
    let config = test_config(&source, dir.path());
    let registry = ConnectionRegistry::new(create_test_db().await, &config);

    // Session-cached credential for a mysql spec that was never primed
    let mut spec = user_spec("needs_auth", ":memory:");
    spec.engine = DatabaseEngine::Mysql;
    spec.credentials = CredentialRef::SessionCache;
    registry.add_user_connection("alice", spec).await.unwrap();
    // Credential cached during add; clearing simulates a fresh process
    registry.clear_session_credentials("alice");

    let err = registry.resolve("alice", "needs_auth").await.unwrap_err();
    assert!(matches!(err, ApiError::AuthMissing { .. }));
}

#[tokio::test]
async fn resolve_memoizes_until_invalidated() {
    let dir = tempdir().unwrap();
    let source = seed_source_db(dir.path()).await;
    let config = test_config(&source, dir.path());
    let registry = ConnectionRegistry::new(create_test_db().await, &config);

    assert_eq!(registry.handler_count(), 0);
    registry.resolve("alice", "testdb").await.unwrap();
    assert_eq!(registry.handler_count(), 1);
    registry.resolve("alice", "testdb").await.unwrap();
    assert_eq!(registry.handler_count(), 1);

    registry.invalidate("alice", "testdb");
    assert_eq!(registry.handler_count(), 0);

    registry.resolve("alice", "testdb").await.unwrap();
    registry.dispose_all();
    assert_eq!(registry.handler_count(), 0);
}

#[tokio::test]
async fn delete_requires_an_existing_user_connection() {
    let dir = tempdir().unwrap();
    let source = seed_source_db(dir.path()).await;
    let config = test_config(&source, dir.path());
    let registry = ConnectionRegistry::new(create_test_db().await, &config);

    // the file-tier spec is not deletable through the user interface
    let err = registry.delete_user_connection("alice", "testdb").await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));

    registry.add_user_connection("alice", user_spec("gone_soon", ":memory:")).await.unwrap();
    registry.delete_user_connection("alice", "gone_soon").await.unwrap();
    assert!(!registry.exists("alice", "gone_soon").await);
}

#[tokio::test]
async fn predefined_schema_filters_round_trip() {
    let dir = tempdir().unwrap();
    let source = seed_source_db(dir.path()).await;
    let config = test_config(&source, dir.path());
    let registry = ConnectionRegistry::new(create_test_db().await, &config);

    registry.add_user_connection("alice", user_spec("filtered", ":memory:")).await.unwrap();

    let filter = SchemaFilter {
        tables: vec!["users".to_string()],
        ..Default::default()
    };
    let spec = registry
        .set_schema_filter("alice", "filtered", "main", filter)
        .await
        .unwrap();
    assert!(spec.predefined_schemas.contains_key("main"));

    let spec = registry.remove_schema_filter("alice", "filtered", "main").await.unwrap();
    assert!(spec.predefined_schemas.is_empty());

    let err = registry
        .remove_schema_filter("alice", "filtered", "main")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}
