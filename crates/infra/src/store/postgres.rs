//! Postgres-backed validation store.
//!
//! The validation worker runs on a plain OS thread, so every operation blocks
//! on the tokio runtime handle given at construction. When called from inside
//! a multi-threaded runtime the blocking section is wrapped in
//! `block_in_place`.
//!
//! ## Error Mapping
//!
//! | SQLx error | StoreError |
//! |------------|------------|
//! | any driver / pool error | `Storage` |
//! | undecodable `osm_uid` or `reason` column | `Corrupt` |
//! | `UPDATE`/`DELETE` touching no row | `ShopNotFound` / `TaskNotFound` |

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::instrument;
use uuid::Uuid;

use shopgeo_core::{
    AppliedValidation, LocationUid, NewShop, NewValidationTask, QueuedValidation, Shop, ShopId,
    TaskId, UserId, ValidationReason, ValidationTask,
};

use crate::runtime;

use super::{ShopStore, StoreError, ValidationQueueStore, ValidationStore};

/// Tables used by the validation subsystem. Created on demand for dev
/// databases; production schemas are owned by the wider system.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS shop (
    id BIGSERIAL PRIMARY KEY,
    osm_uid TEXT NOT NULL UNIQUE,
    creation_time TIMESTAMPTZ NOT NULL,
    creator_user_id UUID NOT NULL,
    lat DOUBLE PRECISION NULL,
    lon DOUBLE PRECISION NULL,
    last_auto_validation_time TIMESTAMPTZ NULL
);

CREATE TABLE IF NOT EXISTS shops_validation_queue (
    id BIGSERIAL PRIMARY KEY,
    shop_id BIGINT NOT NULL REFERENCES shop (id),
    enqueuing_time TIMESTAMPTZ NOT NULL,
    source_user_id UUID NOT NULL,
    reason SMALLINT NOT NULL
);

CREATE INDEX IF NOT EXISTS shops_validation_queue_reason_time
    ON shops_validation_queue (reason, enqueuing_time, id);
CREATE INDEX IF NOT EXISTS shops_validation_queue_shop
    ON shops_validation_queue (shop_id);
"#;

/// Only rows `select_by_reason` can return count as queued work; a row with a
/// code this build does not know must not keep the worker busy.
const EXISTS_SELECTABLE_TASK: &str =
    "SELECT EXISTS (SELECT 1 FROM shops_validation_queue WHERE reason = ANY($1))";

fn selectable_reason_codes() -> Vec<i16> {
    ValidationReason::ALL
        .into_iter()
        .map(ValidationReason::persistent_code)
        .collect()
}

const SHOP_COLUMNS: &str =
    "s.id, s.osm_uid, s.lat, s.lon, s.last_auto_validation_time, s.creator_user_id";

/// Postgres store for shops and the validation queue.
#[derive(Debug, Clone)]
pub struct PostgresValidationStore {
    pool: PgPool,
    runtime: Handle,
}

impl PostgresValidationStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    /// Create the tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        runtime::block_on(&self.runtime, fut)
    }
}

fn shop_from_row(row: &PgRow) -> Result<Shop, StoreError> {
    let uid: String = row.try_get("osm_uid")?;
    let location_uid = uid
        .parse::<LocationUid>()
        .map_err(|e| StoreError::Corrupt(format!("shop.osm_uid {uid:?}: {e}")))?;
    Ok(Shop {
        id: ShopId::new(row.try_get("id")?),
        location_uid,
        lat: row.try_get("lat")?,
        lon: row.try_get("lon")?,
        last_validation_time: row.try_get("last_auto_validation_time")?,
        creator: UserId::from_uuid(row.try_get::<Uuid, _>("creator_user_id")?),
    })
}

fn queued_from_row(row: &PgRow) -> Result<QueuedValidation, StoreError> {
    let code: i16 = row.try_get("reason")?;
    let reason = ValidationReason::from_persistent_code(code)
        .map_err(|e| StoreError::Corrupt(format!("shops_validation_queue.reason: {e}")))?;
    let task = ValidationTask {
        id: TaskId::new(row.try_get("task_id")?),
        shop_id: ShopId::new(row.try_get("shop_id")?),
        source: UserId::from_uuid(row.try_get::<Uuid, _>("source_user_id")?),
        reason,
        enqueued_at: row.try_get("enqueuing_time")?,
    };
    Ok(QueuedValidation {
        task,
        shop: shop_from_row(row)?,
    })
}

async fn insert_task(
    tx: &mut Transaction<'_, Postgres>,
    task: &NewValidationTask,
) -> Result<TaskId, StoreError> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO shops_validation_queue (shop_id, enqueuing_time, source_user_id, reason)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(task.shop_id.get())
    .bind(task.enqueued_at)
    .bind(task.source.as_uuid())
    .bind(task.reason.persistent_code())
    .fetch_one(&mut **tx)
    .await?;
    Ok(TaskId::new(id))
}

impl ShopStore for PostgresValidationStore {
    #[instrument(skip(self, shop), fields(uid = %shop.location_uid))]
    fn insert_shop(&self, shop: NewShop) -> Result<ShopId, StoreError> {
        self.block_on(async {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO shop (
                    osm_uid, creation_time, creator_user_id, lat, lon, last_auto_validation_time
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id
                "#,
            )
            .bind(shop.location_uid.to_string())
            .bind(shop.created_at)
            .bind(shop.creator.as_uuid())
            .bind(shop.lat)
            .bind(shop.lon)
            .bind(shop.last_validation_time)
            .fetch_one(&self.pool)
            .await?;
            Ok(ShopId::new(id))
        })
    }

    fn get_shop(&self, id: ShopId) -> Result<Option<Shop>, StoreError> {
        self.block_on(async {
            let row = sqlx::query(&format!("SELECT {SHOP_COLUMNS} FROM shop s WHERE s.id = $1"))
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?;
            row.as_ref().map(shop_from_row).transpose()
        })
    }

    #[instrument(skip(self))]
    fn select_shops_needing_validation(
        &self,
        exclude_already_queued: bool,
        stale_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Shop>, StoreError> {
        self.block_on(async {
            let rows = sqlx::query(&format!(
                r#"
                SELECT {SHOP_COLUMNS}
                FROM shop s
                WHERE (
                    s.lat IS NULL
                    OR s.lon IS NULL
                    OR s.last_auto_validation_time IS NULL
                    OR ($1::timestamptz IS NOT NULL AND s.last_auto_validation_time < $1)
                )
                AND (
                    NOT $2
                    OR NOT EXISTS (
                        SELECT 1 FROM shops_validation_queue q WHERE q.shop_id = s.id
                    )
                )
                ORDER BY s.id
                "#
            ))
            .bind(stale_before)
            .bind(exclude_already_queued)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(shop_from_row).collect()
        })
    }

    fn update_coordinates(
        &self,
        shop_id: ShopId,
        lat: f64,
        lon: f64,
        validated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.block_on(async {
            let result = sqlx::query(
                r#"
                UPDATE shop
                SET lat = $1, lon = $2, last_auto_validation_time = $3
                WHERE id = $4
                "#,
            )
            .bind(lat)
            .bind(lon)
            .bind(validated_at)
            .bind(shop_id.get())
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::ShopNotFound(shop_id));
            }
            Ok(())
        })
    }
}

impl ValidationQueueStore for PostgresValidationStore {
    fn insert(&self, task: NewValidationTask) -> Result<TaskId, StoreError> {
        self.insert_batch(vec![task])?
            .pop()
            .ok_or_else(|| StoreError::Storage("insert returned no id".to_string()))
    }

    #[instrument(skip(self), fields(reason = %reason))]
    fn select_by_reason(
        &self,
        reason: ValidationReason,
        limit: usize,
    ) -> Result<Vec<QueuedValidation>, StoreError> {
        self.block_on(async {
            let rows = sqlx::query(&format!(
                r#"
                SELECT
                    q.id AS task_id,
                    q.shop_id,
                    q.enqueuing_time,
                    q.source_user_id,
                    q.reason,
                    {SHOP_COLUMNS}
                FROM shops_validation_queue q
                JOIN shop s ON s.id = q.shop_id
                WHERE q.reason = $1
                ORDER BY q.enqueuing_time, q.id
                LIMIT $2
                "#
            ))
            .bind(reason.persistent_code())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(queued_from_row).collect()
        })
    }

    fn delete_by_id(&self, task_id: TaskId) -> Result<(), StoreError> {
        self.block_on(async {
            let result = sqlx::query("DELETE FROM shops_validation_queue WHERE id = $1")
                .bind(task_id.get())
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::TaskNotFound(task_id));
            }
            Ok(())
        })
    }

    fn exists_any(&self) -> Result<bool, StoreError> {
        self.block_on(async {
            let exists: bool = sqlx::query_scalar(EXISTS_SELECTABLE_TASK)
                .bind(selectable_reason_codes())
                .fetch_one(&self.pool)
                .await?;
            Ok(exists)
        })
    }

    fn count(&self) -> Result<usize, StoreError> {
        self.block_on(async {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shops_validation_queue")
                .fetch_one(&self.pool)
                .await?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
    }
}

impl ValidationStore for PostgresValidationStore {
    #[instrument(skip(self, tasks), fields(count = tasks.len()))]
    fn insert_batch(&self, tasks: Vec<NewValidationTask>) -> Result<Vec<TaskId>, StoreError> {
        self.block_on(async {
            let mut tx = self.pool.begin().await?;
            let mut ids = Vec::with_capacity(tasks.len());
            for task in &tasks {
                ids.push(insert_task(&mut tx, task).await?);
            }
            tx.commit().await?;
            Ok(ids)
        })
    }

    #[instrument(skip(self, applied), fields(count = applied.len()))]
    fn apply_batch(&self, applied: &[AppliedValidation]) -> Result<(), StoreError> {
        self.block_on(async {
            let mut tx = self.pool.begin().await?;
            for a in applied {
                let result = sqlx::query(
                    r#"
                    UPDATE shop
                    SET lat = $1, lon = $2, last_auto_validation_time = $3
                    WHERE id = $4
                    "#,
                )
                .bind(a.coordinates.lat)
                .bind(a.coordinates.lon)
                .bind(a.validated_at)
                .bind(a.shop_id.get())
                .execute(&mut *tx)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(StoreError::ShopNotFound(a.shop_id));
                }

                sqlx::query("DELETE FROM shops_validation_queue WHERE id = $1")
                    .bind(a.task_id.get())
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(())
        })
    }
}
