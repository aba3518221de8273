//! Permission rule rows

use super::{ts_column, Database};
use crate::permissions::PermissionRule;
use crate::protocol::DecisionBehavior;
use rusqlite::{params, ToSql};
use serde_json::{Map, Value};

/// The only columns a rule update may touch. Enforcing this allowlist is a
/// security property of the update path, not an ergonomic choice.
const UPDATABLE_COLUMNS: &[&str] = &["tool_name", "rule_content", "behavior", "priority"];

impl Database {
    pub fn insert_rule(&self, rule: &PermissionRule) -> crate::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO permission_rules (id, project_id, tool_name, rule_content,
                     behavior, priority, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    rule.id,
                    rule.project_id,
                    rule.tool_name,
                    rule.rule_content,
                    rule.behavior.as_str(),
                    rule.priority,
                    rule.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_rule(&self, id: &str) -> crate::Result<Option<PermissionRule>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_RULE))?;
            let mut rows = stmt.query_map(params![id], row_to_rule)?;
            Ok(rows.next().transpose()?)
        })
    }

    /// Rules for one project (`Some`) or the global set (`None`), ordered
    /// highest priority first with creation order breaking ties
    pub fn list_rules(&self, project_id: Option<&str>) -> crate::Result<Vec<PermissionRule>> {
        self.with_conn(|conn| {
            let order = "ORDER BY priority DESC, created_at ASC, id ASC";
            let rows = match project_id {
                Some(project_id) => {
                    let mut stmt = conn
                        .prepare(&format!("{} WHERE project_id = ?1 {}", SELECT_RULE, order))?;
                    let rows = stmt.query_map(params![project_id], row_to_rule)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn
                        .prepare(&format!("{} WHERE project_id IS NULL {}", SELECT_RULE, order))?;
                    let rows = stmt.query_map([], row_to_rule)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
            };
            Ok(rows)
        })
    }

    /// Apply a partial update from an arbitrary field dictionary
    ///
    /// Exactly the intersection of the payload keys with the column
    /// allowlist is written; every other key is silently ignored.
    pub fn update_rule(
        &self,
        id: &str,
        fields: &Map<String, Value>,
    ) -> crate::Result<PermissionRule> {
        let mut assignments: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        for column in UPDATABLE_COLUMNS {
            let Some(value) = fields.get(*column) else {
                continue;
            };
            let boxed: Box<dyn ToSql> = match *column {
                "priority" => Box::new(value.as_i64().ok_or_else(|| {
                    crate::Error::Validation("priority must be an integer".to_string())
                })?),
                "behavior" => {
                    let behavior = value.as_str().ok_or_else(|| {
                        crate::Error::Validation("behavior must be a string".to_string())
                    })?;
                    if behavior != "allow" && behavior != "deny" {
                        return Err(crate::Error::Validation(format!(
                            "behavior must be 'allow' or 'deny', got '{}'",
                            behavior
                        )));
                    }
                    Box::new(behavior.to_string())
                }
                _ => Box::new(
                    value
                        .as_str()
                        .ok_or_else(|| {
                            crate::Error::Validation(format!("{} must be a string", column))
                        })?
                        .to_string(),
                ),
            };
            assignments.push(format!("{} = ?{}", column, values.len() + 1));
            values.push(boxed);
        }

        if !assignments.is_empty() {
            let sql = format!(
                "UPDATE permission_rules SET {} WHERE id = ?{}",
                assignments.join(", "),
                values.len() + 1
            );
            values.push(Box::new(id.to_string()));

            let updated = self.with_conn(|conn| {
                let params: Vec<&dyn ToSql> = values.iter().map(|v| &**v as &dyn ToSql).collect();
                Ok(conn.execute(&sql, params.as_slice())?)
            })?;
            if updated == 0 {
                return Err(crate::Error::NotFound(format!("rule {}", id)));
            }
        }

        self.get_rule(id)?
            .ok_or_else(|| crate::Error::NotFound(format!("rule {}", id)))
    }

    pub fn delete_rule(&self, id: &str) -> crate::Result<()> {
        let deleted = self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM permission_rules WHERE id = ?1", params![id])?)
        })?;
        if deleted == 0 {
            return Err(crate::Error::NotFound(format!("rule {}", id)));
        }
        Ok(())
    }
}

const SELECT_RULE: &str = "SELECT id, project_id, tool_name, rule_content, behavior, priority,
    created_at FROM permission_rules";

fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<PermissionRule> {
    let behavior: String = row.get(4)?;
    Ok(PermissionRule {
        id: row.get(0)?,
        project_id: row.get(1)?,
        tool_name: row.get(2)?,
        rule_content: row.get(3)?,
        behavior: if behavior == "deny" {
            DecisionBehavior::Deny
        } else {
            DecisionBehavior::Allow
        },
        priority: row.get(5)?,
        created_at: ts_column(row, 6)?,
    })
}
