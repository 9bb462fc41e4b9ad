use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ChangeSet, MediaRecord, MetadataStore, NewMediaRecord, RecordUpdate, dir_of};
use crate::error::{MediaError, Result};
use crate::paths::VirtualPath;

// Six binds per row; stays well under the 65535 parameter limit.
const INSERT_BATCH_ROWS: usize = 1_000;

#[derive(Clone, Debug)]
pub struct PostgresMetadataStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct MediaRecordRow {
    id: Uuid,
    path: String,
    dir_path: String,
    title: String,
    file_modified_at: DateTime<Utc>,
    file_size: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MediaRecordRow> for MediaRecord {
    type Error = MediaError;

    fn try_from(row: MediaRecordRow) -> Result<Self> {
        Ok(MediaRecord {
            id: row.id,
            path: VirtualPath::parse(&row.path)?,
            dir_path: VirtualPath::parse(&row.dir_path)?,
            title: row.title,
            file_modified_at: row.file_modified_at,
            file_size: u64::try_from(row.file_size).unwrap_or_default(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl PostgresMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        crate::MIGRATOR.run(&self.pool).await?;
        info!("media_records schema is up to date");
        Ok(())
    }

    async fn insert_records(conn: &mut PgConnection, records: &[NewMediaRecord]) -> Result<()> {
        for chunk in records.chunks(INSERT_BATCH_ROWS) {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO media_records (id, path, dir_path, title, file_modified_at, file_size) ",
            );
            builder.push_values(chunk, |mut row, record| {
                row.push_bind(Uuid::now_v7())
                    .push_bind(record.path.to_string())
                    .push_bind(record.dir_path.to_string())
                    .push_bind(record.title.clone())
                    .push_bind(record.file_modified_at)
                    .push_bind(clamp_size(record.file_size));
            });
            // A concurrent reconcile of the same directory may have inserted
            // the row first; its identity and title win.
            builder.push(
                r#"
                ON CONFLICT (path) DO UPDATE SET
                    file_modified_at = EXCLUDED.file_modified_at,
                    file_size = EXCLUDED.file_size,
                    updated_at = NOW()
                "#,
            );
            builder.build().execute(&mut *conn).await?;
        }
        Ok(())
    }

    async fn update_record(conn: &mut PgConnection, update: &RecordUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE media_records
            SET file_modified_at = $2, file_size = $3, updated_at = NOW()
            WHERE path = $1
            "#,
        )
        .bind(update.path.as_str())
        .bind(update.file_modified_at)
        .bind(clamp_size(update.file_size))
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn delete_records(conn: &mut PgConnection, paths: &[VirtualPath]) -> Result<u64> {
        let paths: Vec<String> = paths.iter().map(ToString::to_string).collect();
        let result = sqlx::query("DELETE FROM media_records WHERE path = ANY($1)")
            .bind(paths)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}

fn clamp_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    async fn list_records(&self, dir: &VirtualPath) -> Result<Vec<MediaRecord>> {
        let rows = sqlx::query_as::<_, MediaRecordRow>(
            r#"
            SELECT id, path, dir_path, title, file_modified_at, file_size, created_at, updated_at
            FROM media_records
            WHERE dir_path = $1
            ORDER BY path
            "#,
        )
        .bind(dir.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MediaRecord::try_from).collect()
    }

    async fn get_record(&self, path: &VirtualPath) -> Result<Option<MediaRecord>> {
        let row = sqlx::query_as::<_, MediaRecordRow>(
            r#"
            SELECT id, path, dir_path, title, file_modified_at, file_size, created_at, updated_at
            FROM media_records
            WHERE path = $1
            "#,
        )
        .bind(path.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(MediaRecord::try_from).transpose()
    }

    async fn commit(&self, changes: &ChangeSet) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if !changes.inserts.is_empty() {
            Self::insert_records(&mut *tx, &changes.inserts).await?;
        }
        for update in &changes.updates {
            Self::update_record(&mut *tx, update).await?;
        }
        if !changes.deletes.is_empty() {
            let removed = Self::delete_records(&mut *tx, &changes.deletes).await?;
            debug!(dir = %changes.dir_path, removed, "deleted stale media records");
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_title(&self, path: &VirtualPath, title: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE media_records SET title = $2, updated_at = NOW() WHERE path = $1",
        )
        .bind(path.as_str())
        .bind(title)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn rewrite_prefix(&self, from: &VirtualPath, to: &VirtualPath) -> Result<u64> {
        if from.is_root() || to.is_root() {
            return Err(MediaError::InvalidPath {
                path: from.to_string(),
                reason: "cannot relocate the library root",
            });
        }

        // Every SET expression sees the pre-update row.
        let result = sqlx::query(
            r#"
            UPDATE media_records
            SET dir_path = CASE
                    WHEN path = $1 THEN $3
                    WHEN dir_path = $1 THEN $2
                    ELSE $2 || substr(dir_path, char_length($1) + 1)
                END,
                path = $2 || substr(path, char_length($1) + 1),
                updated_at = NOW()
            WHERE path = $1 OR starts_with(path, $1 || '/')
            "#,
        )
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(dir_of(to).to_string())
        .execute(&self.pool)
        .await?;

        info!(%from, %to, moved = result.rows_affected(), "rewrote media record paths");
        Ok(result.rows_affected())
    }
}
