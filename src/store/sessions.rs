//! Session rows

use super::{opt_ts_column, ts_column, Database};
use crate::session::{Session, SessionStatus};
use chrono::Utc;
use rusqlite::params;

impl Database {
    pub fn insert_session(&self, session: &Session) -> crate::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, project_id, agent_session_id, name, status, model,
                     cli_pid, ws_port, total_cost_usd, total_input_tokens, total_output_tokens,
                     num_turns, error_message, created_at, last_active_at, closed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    session.id,
                    session.project_id,
                    session.agent_session_id,
                    session.name,
                    session.status.as_str(),
                    session.model,
                    session.cli_pid,
                    session.ws_port,
                    session.total_cost_usd,
                    session.total_input_tokens as i64,
                    session.total_output_tokens as i64,
                    session.num_turns as i64,
                    session.error_message,
                    session.created_at.to_rfc3339(),
                    session.last_active_at.to_rfc3339(),
                    session.closed_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_session(&self, id: &str) -> crate::Result<Option<Session>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_SESSION))?;
            let mut rows = stmt.query_map(params![id], row_to_session)?;
            Ok(rows.next().transpose()?)
        })
    }

    pub fn list_sessions(&self) -> crate::Result<Vec<Session>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{} ORDER BY created_at DESC", SELECT_SESSION))?;
            let rows = stmt.query_map([], row_to_session)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Update the status of a non-terminal transition
    pub fn set_session_status(&self, id: &str, status: SessionStatus) -> crate::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )?;
            Ok(())
        })
    }

    /// Record the agent's self-assigned id; once set it is never overwritten
    pub fn set_agent_session_id(&self, id: &str, agent_session_id: &str) -> crate::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET agent_session_id = ?1
                 WHERE id = ?2 AND (agent_session_id IS NULL OR agent_session_id = '')",
                params![agent_session_id, id],
            )?;
            Ok(())
        })
    }

    /// Apply a `result` frame's cumulative metrics in one atomic update
    ///
    /// Cost and token counters are SET from the payload (the agent reports
    /// running totals), the turn counter increments, and the session returns
    /// to `idle`.
    pub fn apply_turn_result(
        &self,
        id: &str,
        total_cost_usd: f64,
        input_tokens: u64,
        output_tokens: u64,
    ) -> crate::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET total_cost_usd = ?1, total_input_tokens = ?2,
                     total_output_tokens = ?3, num_turns = num_turns + 1,
                     last_active_at = ?4, status = ?5
                 WHERE id = ?6",
                params![
                    total_cost_usd,
                    input_tokens as i64,
                    output_tokens as i64,
                    Utc::now().to_rfc3339(),
                    SessionStatus::Idle.as_str(),
                    id,
                ],
            )?;
            Ok(())
        })
    }

    /// Transition to the terminal `error` state
    pub fn mark_session_error(&self, id: &str, message: &str) -> crate::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET status = ?1, error_message = ?2, closed_at = ?3
                 WHERE id = ?4",
                params![
                    SessionStatus::Error.as_str(),
                    message,
                    Utc::now().to_rfc3339(),
                    id,
                ],
            )?;
            Ok(())
        })
    }

    /// Transition to the terminal `closed` state; the bridge port is gone
    pub fn mark_session_closed(&self, id: &str) -> crate::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET status = ?1, closed_at = ?2, ws_port = NULL WHERE id = ?3",
                params![SessionStatus::Closed.as_str(), Utc::now().to_rfc3339(), id],
            )?;
            Ok(())
        })
    }

    /// Sessions left in a non-terminal state, as `(id, cli_pid)` pairs
    ///
    /// Used by orphan cleanup after a restart; excluding terminal states
    /// keeps a repeated cleanup pass a strict no-op.
    pub fn list_orphaned_sessions(&self) -> crate::Result<Vec<(String, Option<u32>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, cli_pid FROM sessions WHERE status NOT IN ('closed', 'error')",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

const SELECT_SESSION: &str = "SELECT id, project_id, agent_session_id, name, status, model,
    cli_pid, ws_port, total_cost_usd, total_input_tokens, total_output_tokens, num_turns,
    error_message, created_at, last_active_at, closed_at FROM sessions";

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let status: String = row.get(4)?;
    Ok(Session {
        id: row.get(0)?,
        project_id: row.get(1)?,
        agent_session_id: row.get(2)?,
        name: row.get(3)?,
        status: status.parse().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown status: {}", status).into(),
            )
        })?,
        model: row.get(5)?,
        cli_pid: row.get(6)?,
        ws_port: row.get(7)?,
        total_cost_usd: row.get(8)?,
        total_input_tokens: row.get::<_, i64>(9)? as u64,
        total_output_tokens: row.get::<_, i64>(10)? as u64,
        num_turns: row.get::<_, i64>(11)? as u64,
        error_message: row.get(12)?,
        created_at: ts_column(row, 13)?,
        last_active_at: ts_column(row, 14)?,
        closed_at: opt_ts_column(row, 15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Project;

    fn db_with_project() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let project = Project::new("demo", "/tmp/demo");
        db.insert_project(&project).unwrap();
        (db, project.id)
    }

    fn seed_session(db: &Database, project_id: &str, id: &str) {
        db.insert_session(&Session::starting(id, project_id, "demo", None, 100, 8300))
            .unwrap();
    }

    #[test]
    fn test_insert_and_get() {
        let (db, project_id) = db_with_project();
        seed_session(&db, &project_id, "s1");

        let session = db.get_session("s1").unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Starting);
        assert_eq!(session.ws_port, Some(8300));
        assert_eq!(session.cli_pid, Some(100));
    }

    #[test]
    fn test_status_transition() {
        let (db, project_id) = db_with_project();
        seed_session(&db, &project_id, "s1");

        db.set_session_status("s1", SessionStatus::Idle).unwrap();
        let session = db.get_session("s1").unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Idle);
        assert!(session.closed_at.is_none());
    }

    #[test]
    fn test_agent_session_id_set_once() {
        let (db, project_id) = db_with_project();
        seed_session(&db, &project_id, "s1");

        db.set_agent_session_id("s1", "agent-1").unwrap();
        db.set_agent_session_id("s1", "agent-2").unwrap();

        let session = db.get_session("s1").unwrap().unwrap();
        assert_eq!(session.agent_session_id.as_deref(), Some("agent-1"));
    }

    #[test]
    fn test_apply_turn_result_sets_not_adds() {
        let (db, project_id) = db_with_project();
        seed_session(&db, &project_id, "s1");
        db.set_session_status("s1", SessionStatus::Active).unwrap();

        db.apply_turn_result("s1", 0.05, 100, 50).unwrap();
        let session = db.get_session("s1").unwrap().unwrap();
        assert_eq!(session.total_cost_usd, 0.05);
        assert_eq!(session.total_input_tokens, 100);
        assert_eq!(session.total_output_tokens, 50);
        assert_eq!(session.num_turns, 1);
        assert_eq!(session.status, SessionStatus::Idle);

        // Second result overwrites the totals and bumps the turn count
        db.apply_turn_result("s1", 0.12, 240, 130).unwrap();
        let session = db.get_session("s1").unwrap().unwrap();
        assert_eq!(session.total_cost_usd, 0.12);
        assert_eq!(session.total_input_tokens, 240);
        assert_eq!(session.total_output_tokens, 130);
        assert_eq!(session.num_turns, 2);
    }

    #[test]
    fn test_mark_error_sets_closed_at() {
        let (db, project_id) = db_with_project();
        seed_session(&db, &project_id, "s1");

        db.mark_session_error("s1", "agent crashed").unwrap();
        let session = db.get_session("s1").unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.error_message.as_deref(), Some("agent crashed"));
        assert!(session.closed_at.is_some());
    }

    #[test]
    fn test_mark_closed() {
        let (db, project_id) = db_with_project();
        seed_session(&db, &project_id, "s1");

        db.mark_session_closed("s1").unwrap();
        let session = db.get_session("s1").unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Closed);
        assert!(session.closed_at.is_some());
        assert!(session.ws_port.is_none());
    }

    #[test]
    fn test_list_orphans_excludes_terminal() {
        let (db, project_id) = db_with_project();
        seed_session(&db, &project_id, "s1");
        seed_session(&db, &project_id, "s2");
        seed_session(&db, &project_id, "s3");
        db.set_session_status("s2", SessionStatus::Active).unwrap();
        db.mark_session_closed("s3").unwrap();

        let orphans = db.list_orphaned_sessions().unwrap();
        let ids: Vec<&str> = orphans.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(orphans.len(), 2);
        assert!(ids.contains(&"s1"));
        assert!(ids.contains(&"s2"));

        db.mark_session_error("s1", "orphaned").unwrap();
        db.mark_session_error("s2", "orphaned").unwrap();
        assert!(db.list_orphaned_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_list_sessions() {
        let (db, project_id) = db_with_project();
        seed_session(&db, &project_id, "s1");
        seed_session(&db, &project_id, "s2");
        assert_eq!(db.list_sessions().unwrap().len(), 2);
    }
}
