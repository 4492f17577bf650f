//! # Activity Log
//!
//! Every mutating API operation appends one entry naming the acting user,
//! the action, and the target record. Entries are never updated or deleted.

use chrono::Utc;
use serde_json::Value;

use crate::state::{ActivityLogRecord, AppState};

/// Append an activity entry and write it through.
pub async fn record(
    state: &AppState,
    user_id: Option<i64>,
    action: &str,
    target_type: &str,
    target_id: Option<i64>,
    details: Value,
) -> ActivityLogRecord {
    let entry = state.activity_logs.insert_with(|id| ActivityLogRecord {
        id,
        user_id,
        action: action.to_string(),
        target_type: target_type.to_string(),
        target_id,
        details,
        created_at: Utc::now(),
    });
    tracing::debug!(
        user_id = ?user_id,
        action,
        target_type,
        target_id = ?target_id,
        "activity recorded"
    );

    crate::db::write_through(state.db_pool.as_ref(), "activity_log", entry.id, |pool| {
        crate::db::activity_logs::insert(pool, &entry)
    })
    .await;

    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn entries_get_sequential_ids() {
        let state = AppState::new();
        let a = record(&state, Some(1), "created", "outlet", Some(4), json!({})).await;
        let b = record(&state, None, "deleted", "outlet", Some(4), json!({"name": "Harbour"})).await;
        assert_eq!(b.id, a.id + 1);
        assert_eq!(state.activity_logs.len(), 2);
        assert_eq!(state.activity_logs.get(&b.id).unwrap().details["name"], "Harbour");
    }
}
