use crate::{hierarchy_json, hierarchy_path};
use crate::models::{DatasetImage, NewDatasetImage};
use sqlx::SqlitePool;
use tracing::debug;

const COLUMNS: &str = "id, fingerprint, hierarchy_json, remote_ref, uploaded_by, created_at";

/// Metadata store for curated dataset images.
#[derive(Debug, Clone)]
pub struct DatasetRepo {
    pool: SqlitePool,
}

impl DatasetRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Earliest record for `fingerprint`, if any.
    pub async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> sqlx::Result<Option<DatasetImage>> {
        sqlx::query_as::<_, DatasetImage>(&format!(
            "SELECT {COLUMNS} FROM dataset_images WHERE fingerprint = ?1 ORDER BY id LIMIT 1"
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn find_by_id(&self, id: i64) -> sqlx::Result<Option<DatasetImage>> {
        sqlx::query_as::<_, DatasetImage>(&format!(
            "SELECT {COLUMNS} FROM dataset_images WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn find_by_remote_ref(&self, remote_ref: &str) -> sqlx::Result<Option<DatasetImage>> {
        sqlx::query_as::<_, DatasetImage>(&format!(
            "SELECT {COLUMNS} FROM dataset_images WHERE remote_ref = ?1 ORDER BY id LIMIT 1"
        ))
        .bind(remote_ref)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn insert(&self, image: &NewDatasetImage) -> sqlx::Result<DatasetImage> {
        let hierarchy_json = hierarchy_json(&image.hierarchy)?;
        let res = sqlx::query(
            r#"
            INSERT INTO dataset_images (fingerprint, hierarchy_json, hierarchy_path, remote_ref, uploaded_by, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&image.fingerprint)
        .bind(&hierarchy_json)
        .bind(hierarchy_path(&image.hierarchy))
        .bind(&image.remote_ref)
        .bind(&image.uploaded_by)
        .bind(image.created_at)
        .execute(&self.pool)
        .await?;
        debug!(id = res.last_insert_rowid(), fingerprint = %image.fingerprint, "dataset record inserted");
        Ok(DatasetImage {
            id: res.last_insert_rowid(),
            fingerprint: image.fingerprint.clone(),
            hierarchy_json,
            remote_ref: image.remote_ref.clone(),
            uploaded_by: image.uploaded_by.clone(),
            created_at: image.created_at,
        })
    }

    /// Moves a record to a new category and object. Returns false when the
    /// record no longer exists.
    pub async fn update_placement(
        &self,
        id: i64,
        hierarchy: &[String],
        remote_ref: &str,
    ) -> sqlx::Result<bool> {
        let hierarchy_json = hierarchy_json(hierarchy)?;
        let res = sqlx::query(
            "UPDATE dataset_images SET hierarchy_json = ?2, hierarchy_path = ?3, remote_ref = ?4 WHERE id = ?1",
        )
        .bind(id)
        .bind(hierarchy_json)
        .bind(hierarchy_path(hierarchy))
        .bind(remote_ref)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn delete(&self, id: i64) -> sqlx::Result<bool> {
        let res = sqlx::query("DELETE FROM dataset_images WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        debug!(id, removed = res.rows_affected(), "dataset record deleted");
        Ok(res.rows_affected() > 0)
    }

    /// Whether a record other than `id` points at `remote_ref`.
    pub async fn is_remote_ref_shared(&self, remote_ref: &str, id: i64) -> sqlx::Result<bool> {
        let others: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM dataset_images WHERE remote_ref = ?1 AND id != ?2",
        )
        .bind(remote_ref)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(others > 0)
    }

    /// All records in insertion order.
    pub async fn scan_all(&self) -> sqlx::Result<Vec<DatasetImage>> {
        sqlx::query_as::<_, DatasetImage>(&format!(
            "SELECT {COLUMNS} FROM dataset_images ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
    }

    /// Records placed exactly at `hierarchy` or anywhere below it.
    pub async fn list_in_subtree(&self, hierarchy: &[String]) -> sqlx::Result<Vec<DatasetImage>> {
        let path = hierarchy_path(hierarchy);
        sqlx::query_as::<_, DatasetImage>(&format!(
            "SELECT {COLUMNS} FROM dataset_images
             WHERE hierarchy_path = ?1 OR substr(hierarchy_path, 1, length(?1) + 1) = ?1 || '/'
             ORDER BY id"
        ))
        .bind(path)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count(&self) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM dataset_images")
            .fetch_one(&self.pool)
            .await
    }
}
