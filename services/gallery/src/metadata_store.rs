use crate::config::DatabaseConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors raised by the metadata store
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Stored photo metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Store-assigned identifier
    pub id: i64,
    /// Object storage key of the image bytes
    pub storage_key: String,
    /// Identifier of the uploading user
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    /// Sanitized display name of the uploaded file
    pub original_filename: String,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

/// Photo metadata as handed to the store, before id and timestamp assignment
#[derive(Debug, Clone, PartialEq)]
pub struct NewPhoto {
    pub storage_key: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub original_filename: String,
}

/// Row layout of the `photos` table
#[derive(Debug, FromRow)]
struct PhotoRow {
    id: i64,
    filepath: String,
    user_id: String,
    timestamp: i64,
    description: Option<String>,
    title: String,
    original_filename: String,
}

impl From<PhotoRow> for PhotoRecord {
    fn from(row: PhotoRow) -> Self {
        Self {
            id: row.id,
            storage_key: row.filepath,
            owner_id: row.user_id,
            title: row.title,
            description: row.description,
            original_filename: row.original_filename,
            created_at: DateTime::from_timestamp_millis(row.timestamp).unwrap_or_default(),
        }
    }
}

/// Persistence for photo records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Insert a photo, assigning its id and creation time
    async fn create(&self, photo: NewPhoto) -> Result<PhotoRecord, StorageError>;

    /// All photos, newest first
    async fn list_all(&self) -> Result<Vec<PhotoRecord>, StorageError>;

    /// Photos uploaded by one user, newest first
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<PhotoRecord>, StorageError>;

    /// Look up a single photo
    async fn get(&self, id: i64) -> Result<Option<PhotoRecord>, StorageError>;

    /// Check database connectivity
    async fn ping(&self) -> Result<(), StorageError>;
}

const SELECT_PHOTOS: &str = r#"
    SELECT id, filepath, user_id, timestamp, description, title, original_filename
    FROM photos
"#;

/// Metadata store for photo records in SQLite
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect_with(options)
            .await?;

        info!(url = %config.url, "Connected to SQLite database");

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl PhotoStore for MetadataStore {
    #[instrument(skip(self, photo), fields(owner_id = %photo.owner_id, storage_key = %photo.storage_key))]
    async fn create(&self, photo: NewPhoto) -> Result<PhotoRecord, StorageError> {
        let timestamp = Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            INSERT INTO photos (
                filepath, user_id, timestamp, description, title, original_filename
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&photo.storage_key)
        .bind(&photo.owner_id)
        .bind(timestamp)
        .bind(&photo.description)
        .bind(&photo.title)
        .bind(&photo.original_filename)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();

        debug!(photo_id = id, "Photo metadata saved");

        Ok(PhotoRecord {
            id,
            storage_key: photo.storage_key,
            owner_id: photo.owner_id,
            title: photo.title,
            description: photo.description,
            original_filename: photo.original_filename,
            created_at: DateTime::from_timestamp_millis(timestamp).unwrap_or_default(),
        })
    }

    async fn list_all(&self) -> Result<Vec<PhotoRecord>, StorageError> {
        let sql = format!("{SELECT_PHOTOS} ORDER BY timestamp DESC, id DESC");

        let rows = sqlx::query_as::<_, PhotoRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(PhotoRecord::from).collect())
    }

    #[instrument(skip(self))]
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<PhotoRecord>, StorageError> {
        let sql = format!("{SELECT_PHOTOS} WHERE user_id = ? ORDER BY timestamp DESC, id DESC");

        let rows = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(PhotoRecord::from).collect())
    }

    async fn get(&self, id: i64) -> Result<Option<PhotoRecord>, StorageError> {
        let sql = format!("{SELECT_PHOTOS} WHERE id = ?");

        let row = sqlx::query_as::<_, PhotoRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(PhotoRecord::from))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
