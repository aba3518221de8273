//! Permission decision audit log (append-only)

use super::{ts_column, Database};
use crate::permissions::{DecisionSource, PermissionLogEntry};
use crate::protocol::DecisionBehavior;
use chrono::Utc;
use rusqlite::params;
use serde_json::Value;

impl Database {
    /// Append one audit row for a permission decision
    #[allow(clippy::too_many_arguments)]
    pub fn append_permission_log(
        &self,
        session_id: &str,
        request_id: &str,
        tool_name: &str,
        tool_input: &Value,
        decision: DecisionBehavior,
        decision_source: DecisionSource,
        rule_id: Option<&str>,
        decided_by: &str,
    ) -> crate::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO permission_log (session_id, request_id, tool_name, tool_input,
                     decision, decision_source, rule_id, decided_by, decided_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    session_id,
                    request_id,
                    tool_name,
                    tool_input.to_string(),
                    decision.as_str(),
                    decision_source.as_str(),
                    rule_id,
                    decided_by,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Audit rows for one session, oldest first
    pub fn list_permission_log(&self, session_id: &str) -> crate::Result<Vec<PermissionLogEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, request_id, tool_name, tool_input, decision,
                        decision_source, rule_id, decided_by, decided_at
                 FROM permission_log WHERE session_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![session_id], row_to_entry)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Total number of audit rows
    pub fn count_permission_log(&self) -> crate::Result<u64> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM permission_log", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<PermissionLogEntry> {
    let decision: String = row.get(5)?;
    let source: String = row.get(6)?;
    let tool_input: String = row.get(4)?;
    Ok(PermissionLogEntry {
        id: row.get(0)?,
        session_id: row.get(1)?,
        request_id: row.get(2)?,
        tool_name: row.get(3)?,
        tool_input: serde_json::from_str(&tool_input).unwrap_or(Value::Null),
        decision: if decision == "deny" {
            DecisionBehavior::Deny
        } else {
            DecisionBehavior::Allow
        },
        decision_source: if source == "auto_rule" {
            DecisionSource::AutoRule
        } else {
            DecisionSource::AutoDefault
        },
        rule_id: row.get(7)?,
        decided_by: row.get(8)?,
        decided_at: ts_column(row, 9)?,
    })
}
