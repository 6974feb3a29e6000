// Storage Adapter
// Purpose: persist metadata documents as JSON under a deterministic
// {base}/{db}/{schema}/{table}.json layout with atomic replacement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use utoipa::ToSchema;

use crate::models::metadata::MetadataDocument;
use crate::utils::{ApiError, ApiResult, sanitize_filename};

/// One stored document reference
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredEntry {
    pub database_name: String,
    pub schema_name: String,
    pub table_name: String,
    pub file_path: String,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct MetadataStore {
    base_dir: PathBuf,
}

impl MetadataStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    /// Deterministic path: each component sanitized to filesystem-safe form
    pub fn path_for(&self, database: &str, schema: &str, table: &str) -> PathBuf {
        self.base_dir
            .join(sanitize_filename(database))
            .join(sanitize_filename(schema))
            .join(format!("{}.json", sanitize_filename(table)))
    }

    /// Write the document atomically: materialize at a temporary path in
    /// the target directory, then rename into place.
    pub async fn write(&self, document: &MetadataDocument) -> ApiResult<PathBuf> {
        let path = self.path_for(
            &document.database_name,
            &document.schema_name,
            &document.table_name,
        );
        let dir = path
            .parent()
            .ok_or_else(|| ApiError::internal_error("metadata path has no parent"))?;
        tokio::fs::create_dir_all(dir).await?;

        let payload = serde_json::to_vec_pretty(document)?;
        let tmp = dir.join(format!(
            ".{}.tmp-{}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("metadata.json"),
            uuid::Uuid::new_v4()
        ));

        tokio::fs::write(&tmp, &payload).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::info!(
            "Stored metadata for {}.{}.{} at {}",
            document.database_name,
            document.schema_name,
            document.table_name,
            path.display()
        );
        Ok(path)
    }

    pub async fn read(
        &self,
        database: &str,
        schema: &str,
        table: &str,
    ) -> ApiResult<MetadataDocument> {
        let path = self.path_for(database, schema, table);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ApiError::not_found(format!(
                    "metadata for {}.{}.{}",
                    database, schema, table
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let document = serde_json::from_slice(&raw)?;
        Ok(document)
    }

    pub async fn exists(&self, database: &str, schema: &str, table: &str) -> bool {
        tokio::fs::try_exists(self.path_for(database, schema, table))
            .await
            .unwrap_or(false)
    }

    pub async fn delete(&self, database: &str, schema: &str, table: &str) -> ApiResult<()> {
        let path = self.path_for(database, schema, table);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ApiError::not_found(
                format!("metadata for {}.{}.{}", database, schema, table),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Every stored document for a database, newest first
    pub async fn list(&self, database: &str) -> ApiResult<Vec<StoredEntry>> {
        let db_dir = self.base_dir.join(sanitize_filename(database));
        let mut entries = Vec::new();

        let mut schema_dirs = match tokio::fs::read_dir(&db_dir).await {
            Ok(dirs) => dirs,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(schema_dir) = schema_dirs.next_entry().await? {
            if !schema_dir.file_type().await?.is_dir() {
                continue;
            }
            let schema_name = schema_dir.file_name().to_string_lossy().to_string();
            let mut files = tokio::fs::read_dir(schema_dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if !is_metadata_file(&path) {
                    continue;
                }
                let table_name = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                let modified_at = file
                    .metadata()
                    .await
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .map(DateTime::<Utc>::from);
                entries.push(StoredEntry {
                    database_name: database.to_string(),
                    schema_name: schema_name.clone(),
                    table_name,
                    file_path: path.to_string_lossy().to_string(),
                    modified_at,
                });
            }
        }

        entries.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(entries)
    }
}

fn is_metadata_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| !n.starts_with('.'))
            .unwrap_or(false)
}
