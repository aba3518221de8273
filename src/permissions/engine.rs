//! Rule evaluation
//!
//! Deterministic, synchronous ordering: project deny rules, global deny
//! rules, project allow rules, global allow rules, each highest priority
//! first; no match falls through to the default allow. Evaluation can never
//! fail to return a decision (internal errors are logged and degrade to the
//! default), and every decision appends exactly one audit row.

use crate::permissions::matcher::rule_matches;
use crate::permissions::{DecisionSource, PermissionRule};
use crate::protocol::DecisionBehavior;
use crate::store::Database;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Audit attribution for rule-driven decisions
const DECIDED_BY: &str = "engine";

/// Outcome of one evaluation
#[derive(Debug, Clone)]
pub struct Decision {
    pub behavior: DecisionBehavior,
    pub source: DecisionSource,
    pub rule_id: Option<String>,
    /// Forward-compat passthrough; no rule currently produces one
    pub updated_input: Option<Value>,
}

impl Decision {
    fn default_allow() -> Self {
        Self {
            behavior: DecisionBehavior::Allow,
            source: DecisionSource::AutoDefault,
            rule_id: None,
            updated_input: None,
        }
    }

    fn from_rule(rule: &PermissionRule) -> Self {
        Self {
            behavior: rule.behavior,
            source: DecisionSource::AutoRule,
            rule_id: Some(rule.id.clone()),
            updated_input: None,
        }
    }
}

/// Rule store plus the evaluation loop
pub struct PermissionEngine {
    store: Arc<Database>,
}

impl PermissionEngine {
    pub fn new(store: Arc<Database>) -> Self {
        Self { store }
    }

    // =========================================================================
    // Rule CRUD
    // =========================================================================

    pub fn create_rule(
        &self,
        project_id: Option<&str>,
        tool_name: &str,
        rule_content: &str,
        behavior: DecisionBehavior,
        priority: i64,
    ) -> crate::Result<PermissionRule> {
        if tool_name.is_empty() {
            return Err(crate::Error::Validation(
                "tool_name must not be empty".to_string(),
            ));
        }
        let rule = PermissionRule::new(project_id, tool_name, rule_content, behavior, priority);
        self.store.insert_rule(&rule)?;
        Ok(rule)
    }

    /// Rules for a project (`Some`) or the global set (`None`)
    pub fn list_rules(&self, project_id: Option<&str>) -> crate::Result<Vec<PermissionRule>> {
        self.store.list_rules(project_id)
    }

    /// Partial update from an arbitrary field dictionary; only `tool_name`,
    /// `rule_content`, `behavior`, and `priority` can change
    pub fn update_rule(
        &self,
        id: &str,
        fields: &Map<String, Value>,
    ) -> crate::Result<PermissionRule> {
        self.store.update_rule(id, fields)
    }

    pub fn delete_rule(&self, id: &str) -> crate::Result<()> {
        self.store.delete_rule(id)
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Decide a tool-use request and append the audit row
    pub fn evaluate(
        &self,
        session_id: &str,
        project_id: Option<&str>,
        request_id: &str,
        tool_name: &str,
        tool_input: &Value,
    ) -> Decision {
        let decision = match self.evaluate_rules(project_id, tool_name, tool_input) {
            Ok(decision) => decision,
            Err(e) => {
                // The agent must always get an answer; degrade to the
                // default rather than stalling the session.
                tracing::error!(session_id, tool_name, "rule evaluation failed: {}", e);
                Decision::default_allow()
            }
        };

        if let Err(e) = self.store.append_permission_log(
            session_id,
            request_id,
            tool_name,
            tool_input,
            decision.behavior,
            decision.source,
            decision.rule_id.as_deref(),
            DECIDED_BY,
        ) {
            tracing::error!(session_id, request_id, "audit log write failed: {}", e);
        }

        tracing::info!(
            session_id,
            request_id,
            tool_name,
            decision = decision.behavior.as_str(),
            source = decision.source.as_str(),
            rule_id = decision.rule_id.as_deref().unwrap_or("-"),
            "permission decision"
        );

        decision
    }

    fn evaluate_rules(
        &self,
        project_id: Option<&str>,
        tool_name: &str,
        tool_input: &Value,
    ) -> crate::Result<Decision> {
        let project_rules = match project_id {
            Some(project_id) => self.store.list_rules(Some(project_id))?,
            None => Vec::new(),
        };
        let global_rules = self.store.list_rules(None)?;

        let phases: [(&[PermissionRule], DecisionBehavior); 4] = [
            (&project_rules, DecisionBehavior::Deny),
            (&global_rules, DecisionBehavior::Deny),
            (&project_rules, DecisionBehavior::Allow),
            (&global_rules, DecisionBehavior::Allow),
        ];

        for (rules, behavior) in phases {
            // Lists arrive highest priority first from the store
            for rule in rules.iter().filter(|r| r.behavior == behavior) {
                if rule_matches(rule, tool_name, tool_input) {
                    return Ok(Decision::from_rule(rule));
                }
            }
        }

        Ok(Decision::default_allow())
    }
}
