//! Application-state database (SQLite) bootstrap

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::time::Duration;

/// Create the pool and run pending migrations
pub async fn create_pool(url: &str) -> Result<SqlitePool, anyhow::Error> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        let path = path.split('?').next().unwrap_or(path);
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await?;

    sqlx::migrate!().run(&pool).await?;

    Ok(pool)
}
