//! Message transcript
//!
//! Append-only per-session log of the frames the core relays: every inbound
//! `assistant` and `result` frame, and every outbound `user` frame.

use super::{ts_column, Database};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use serde_json::Value;

/// Which way a transcript frame travelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Inbound => "inbound",
            MessageDirection::Outbound => "outbound",
        }
    }
}

/// One transcript row
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: i64,
    pub session_id: String,
    pub direction: MessageDirection,
    pub message_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl Database {
    pub fn append_message(
        &self,
        session_id: &str,
        direction: MessageDirection,
        message_type: &str,
        payload: &Value,
    ) -> crate::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (session_id, direction, message_type, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    session_id,
                    direction.as_str(),
                    message_type,
                    payload.to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Transcript rows in insertion order, optionally capped to the most
    /// recent `limit`
    pub fn list_messages(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> crate::Result<Vec<MessageRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, direction, message_type, payload, created_at
                 FROM messages WHERE session_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![session_id], row_to_message)?;
            let mut records = rows.collect::<Result<Vec<_>, _>>()?;
            if let Some(limit) = limit {
                let skip = records.len().saturating_sub(limit);
                records.drain(..skip);
            }
            Ok(records)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let direction: String = row.get(2)?;
    let payload: String = row.get(4)?;
    Ok(MessageRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        direction: match direction.as_str() {
            "outbound" => MessageDirection::Outbound,
            _ => MessageDirection::Inbound,
        },
        message_type: row.get(3)?,
        payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
        created_at: ts_column(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::store::Project;
    use serde_json::json;

    fn db_with_session() -> Database {
        let db = Database::open_in_memory().unwrap();
        let project = Project::new("demo", "/tmp/demo");
        db.insert_project(&project).unwrap();
        db.insert_session(&Session::starting("s1", &project.id, "demo", None, 1, 8300))
            .unwrap();
        db
    }

    #[test]
    fn test_append_and_list_in_order() {
        let db = db_with_session();
        db.append_message("s1", MessageDirection::Outbound, "user", &json!({"n": 1}))
            .unwrap();
        db.append_message("s1", MessageDirection::Inbound, "assistant", &json!({"n": 2}))
            .unwrap();
        db.append_message("s1", MessageDirection::Inbound, "result", &json!({"n": 3}))
            .unwrap();

        let records = db.list_messages("s1", None).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].message_type, "user");
        assert_eq!(records[0].direction, MessageDirection::Outbound);
        assert_eq!(records[2].payload, json!({"n": 3}));
    }

    #[test]
    fn test_limit_keeps_most_recent() {
        let db = db_with_session();
        for n in 0..5 {
            db.append_message("s1", MessageDirection::Inbound, "assistant", &json!({"n": n}))
                .unwrap();
        }

        let records = db.list_messages("s1", Some(2)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].payload, json!({"n": 3}));
        assert_eq!(records[1].payload, json!({"n": 4}));
    }

    #[test]
    fn test_unknown_session_rejected_by_fk() {
        let db = db_with_session();
        let result = db.append_message(
            "missing",
            MessageDirection::Inbound,
            "assistant",
            &json!({}),
        );
        assert!(result.is_err());
    }
}
