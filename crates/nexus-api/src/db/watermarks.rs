//! Id high-water marks, maintained by the `retire_id` delete trigger.

use sqlx::PgPool;

/// `(table_name, next_id)` for every table that has had a row deleted.
pub async fn load_all(pool: &PgPool) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (String, i64)>("SELECT table_name, next_id FROM id_watermarks")
        .fetch_all(pool)
        .await
}
