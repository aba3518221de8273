//! Project rows
//!
//! Projects are created by the import surface and otherwise read-only to the
//! core: sessions borrow the folder path, default model/permission mode, and
//! prompt overrides.

use super::{ts_column, Database};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

/// A folder-backed project configuration
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub folder_path: String,
    pub default_model: Option<String>,
    pub default_permission_mode: Option<String>,
    pub system_prompt: Option<String>,
    pub append_system_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: &str, folder_path: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            folder_path: folder_path.to_string(),
            default_model: None,
            default_permission_mode: None,
            system_prompt: None,
            append_system_prompt: None,
            created_at: Utc::now(),
        }
    }
}

impl Database {
    /// Insert a project; a duplicate folder path is a conflict
    pub fn insert_project(&self, project: &Project) -> crate::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, name, folder_path, default_model,
                     default_permission_mode, system_prompt, append_system_prompt, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    project.id,
                    project.name,
                    project.folder_path,
                    project.default_model,
                    project.default_permission_mode,
                    project.system_prompt,
                    project.append_system_prompt,
                    project.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    crate::Error::Conflict(format!(
                        "project folder already imported: {}",
                        project.folder_path
                    ))
                }
                other => other.into(),
            })?;
            Ok(())
        })
    }

    pub fn get_project(&self, id: &str) -> crate::Result<Option<Project>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, folder_path, default_model, default_permission_mode,
                        system_prompt, append_system_prompt, created_at
                 FROM projects WHERE id = ?1",
            )?;
            let mut rows = stmt.query_map(params![id], row_to_project)?;
            Ok(rows.next().transpose()?)
        })
    }

    pub fn list_projects(&self) -> crate::Result<Vec<Project>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, folder_path, default_model, default_permission_mode,
                        system_prompt, append_system_prompt, created_at
                 FROM projects ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map([], row_to_project)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        folder_path: row.get(2)?,
        default_model: row.get(3)?,
        default_permission_mode: row.get(4)?,
        system_prompt: row.get(5)?,
        append_system_prompt: row.get(6)?,
        created_at: ts_column(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let project = Project::new("demo", "/tmp/demo");
        db.insert_project(&project).unwrap();

        let loaded = db.get_project(&project.id).unwrap().unwrap();
        assert_eq!(loaded.name, "demo");
        assert_eq!(loaded.folder_path, "/tmp/demo");
        assert!(loaded.default_model.is_none());
    }

    #[test]
    fn test_get_missing_returns_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_project("nope").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_folder_is_conflict() {
        let db = Database::open_in_memory().unwrap();
        db.insert_project(&Project::new("a", "/tmp/same")).unwrap();

        let result = db.insert_project(&Project::new("b", "/tmp/same"));
        assert!(matches!(result, Err(crate::Error::Conflict(_))));
    }

    #[test]
    fn test_list_projects() {
        let db = Database::open_in_memory().unwrap();
        db.insert_project(&Project::new("a", "/tmp/a")).unwrap();
        db.insert_project(&Project::new("b", "/tmp/b")).unwrap();
        assert_eq!(db.list_projects().unwrap().len(), 2);
    }
}
