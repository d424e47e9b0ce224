// Tests for the async meta store service
//
// The service owns one database handle behind an async mutex; start opens
// it from the config and stop disconnects it.

use anyhow::Result;
use meta_sqlite::{DatabaseConfig, Error, Lifecycle, MetaStoreService, Value};
use tempfile::tempdir;

#[tokio::test]
async fn test_service_lifecycle() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("service.db");
    let service = MetaStoreService::new(DatabaseConfig::new(&path, "1.0").with_create_new(true));

    assert!(!service.is_running().await);
    service.start().await?;
    assert!(service.is_running().await);

    service.set_meta_value("owner", "node-1").await?;
    assert_eq!(service.get_meta_value("owner").await?, "node-1");
    assert_eq!(service.get_meta_value("version").await?, "1.0");

    service
        .create_table("peers", &["id", "addr"], &["INTEGER", "TEXT"])
        .await?;
    assert!(service.get_all_rows("peers").await?.is_empty());

    service.stop().await?;
    assert!(!service.is_running().await);

    // Reopen without recreating; the meta row survives.
    let reopened = MetaStoreService::new(DatabaseConfig::new(&path, "1.0"));
    reopened.start().await?;
    assert_eq!(reopened.get_meta_value("owner").await?, "node-1");
    let dict = reopened.get_table_as_dict("self", &["key", "value"]).await?;
    assert_eq!(dict[&Value::from("owner")]["value"], Value::from("node-1"));
    reopened.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_calls_before_start_are_rejected() -> Result<()> {
    let dir = tempdir()?;
    let service = MetaStoreService::new(
        DatabaseConfig::new(dir.path().join("idle.db"), "1.0").with_create_new(true),
    );

    let err = service.get_meta_value("version").await.unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Closed)));

    // Stopping an idle service is harmless.
    service.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_double_start_fails() -> Result<()> {
    let dir = tempdir()?;
    let service = MetaStoreService::new(
        DatabaseConfig::new(dir.path().join("twice.db"), "1.0").with_create_new(true),
    );
    service.start().await?;
    assert!(service.start().await.is_err());
    service.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_start_reports_version_mismatch() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("versioned.db");

    let creator = MetaStoreService::new(DatabaseConfig::new(&path, "1.0").with_create_new(true));
    creator.start().await?;
    creator.stop().await?;

    let service = MetaStoreService::new(DatabaseConfig::new(&path, "2.0"));
    let err = service.start().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::IncompatibleVersion { .. })
    ));
    assert!(!service.is_running().await);
    Ok(())
}

#[tokio::test]
async fn test_clones_share_the_handle() -> Result<()> {
    let dir = tempdir()?;
    let service = MetaStoreService::new(
        DatabaseConfig::new(dir.path().join("shared.db"), "1.0").with_create_new(true),
    );
    let clone = service.clone();

    service.start().await?;
    clone.set_meta_value("from_clone", "yes").await?;
    assert_eq!(service.get_meta_value("from_clone").await?, "yes");
    clone.stop().await?;
    assert!(!service.is_running().await);
    Ok(())
}
