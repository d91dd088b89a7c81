use async_trait::async_trait;
use shared::VisionLogRecord;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::{LogBackend, StoreError};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS vision_logs (
    id          BIGSERIAL PRIMARY KEY,
    user_id     TEXT,
    fruit       TEXT NOT NULL,
    disease     TEXT NOT NULL,
    confidence  DOUBLE PRECISION NOT NULL,
    reasons     TEXT[] NOT NULL DEFAULT '{}',
    image_path  TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL
)
"#;

/// Secondary backend. Connections are opened on demand and the table is
/// created on the first write.
pub struct PostgresLogBackend {
    pool: PgPool,
    schema_ready: OnceCell<()>,
}

impl PostgresLogBackend {
    pub fn connect_lazy(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)?;
        Ok(Self::new(pool))
    }

    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: OnceCell::new(),
        }
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
                log::info!("vision_logs table ready");
                Ok::<(), StoreError>(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LogBackend for PostgresLogBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn append(&self, record: &VisionLogRecord) -> Result<(), StoreError> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO vision_logs (user_id, fruit, disease, confidence, reasons, image_path, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.user_id.as_deref())
        .bind(&record.fruit)
        .bind(&record.disease)
        .bind(record.confidence)
        .bind(&record.reasons)
        .bind(&record.image_path)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        log::debug!("Vision log written to Postgres");
        Ok(())
    }
}
