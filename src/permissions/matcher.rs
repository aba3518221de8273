//! Rule pattern matcher
//!
//! Patterns are a limited glob: `*` matches any run of characters and
//! everything else is literal. A pattern of the form `prefix:*` instead
//! matches any target that starts with `prefix`. Which part of the tool
//! input a pattern runs against depends on the tool.

use crate::permissions::PermissionRule;
use serde_json::Value;

/// Whether `rule` matches a tool-use request
pub fn rule_matches(rule: &PermissionRule, tool_name: &str, tool_input: &Value) -> bool {
    if rule.tool_name != "*" && rule.tool_name != tool_name {
        return false;
    }
    if rule.rule_content.is_empty() {
        return true;
    }
    pattern_matches(&rule.rule_content, &match_target(tool_name, tool_input))
}

/// Extract the string a pattern runs against for the given tool
///
/// `Bash` matches on the command line, the file tools on the file path, and
/// everything else on the serialized input.
pub fn match_target(tool_name: &str, tool_input: &Value) -> String {
    match tool_name {
        "Bash" => tool_input
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        "Read" | "Write" | "Edit" => tool_input
            .get("file_path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => tool_input.to_string(),
    }
}

/// Match `pattern` against the whole of `target`
pub fn pattern_matches(pattern: &str, target: &str) -> bool {
    // `prefix:*` means starts-with; only the suffix after the first colon
    // is inspected.
    if let Some((prefix, suffix)) = pattern.split_once(':') {
        if suffix == "*" {
            return target.starts_with(prefix);
        }
    }

    match glob_to_regex(pattern) {
        Ok(re) => re.is_match(target),
        Err(e) => {
            tracing::warn!(pattern, "unusable rule pattern: {}", e);
            false
        }
    }
}

/// Convert a star-glob into a fully anchored regex
///
/// Every regex metacharacter except `*` is escaped, so the pattern is
/// literal apart from the wildcard.
fn glob_to_regex(pattern: &str) -> Result<regex::Regex, regex::Error> {
    let escaped: Vec<String> = pattern.split('*').map(|s| regex::escape(s)).collect();
    regex::Regex::new(&format!("^{}$", escaped.join(".*")))
}
