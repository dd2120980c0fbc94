use crate::hierarchy_json;
use crate::models::{NewPrediction, Prediction};
use sqlx::SqlitePool;

#[derive(Debug, Clone)]
pub struct PredictionRepo {
    pool: SqlitePool,
}

impl PredictionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, prediction: &NewPrediction) -> sqlx::Result<Prediction> {
        let hierarchy_json = hierarchy_json(&prediction.hierarchy)?;
        let res = sqlx::query(
            r#"
            INSERT INTO predictions (label, hierarchy_json, confidence, dominant_color, remote_ref, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&prediction.label)
        .bind(&hierarchy_json)
        .bind(prediction.confidence)
        .bind(&prediction.dominant_color)
        .bind(&prediction.remote_ref)
        .bind(prediction.created_at)
        .execute(&self.pool)
        .await?;
        Ok(Prediction {
            id: res.last_insert_rowid(),
            label: prediction.label.clone(),
            hierarchy_json,
            confidence: prediction.confidence,
            dominant_color: prediction.dominant_color.clone(),
            remote_ref: prediction.remote_ref.clone(),
            created_at: prediction.created_at,
        })
    }

    pub async fn list(&self) -> sqlx::Result<Vec<Prediction>> {
        sqlx::query_as::<_, Prediction>(
            "SELECT id, label, hierarchy_json, confidence, dominant_color, remote_ref, created_at FROM predictions ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn find(&self, id: i64) -> sqlx::Result<Option<Prediction>> {
        sqlx::query_as::<_, Prediction>(
            "SELECT id, label, hierarchy_json, confidence, dominant_color, remote_ref, created_at FROM predictions WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn delete(&self, id: i64) -> sqlx::Result<bool> {
        let res = sqlx::query("DELETE FROM predictions WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
