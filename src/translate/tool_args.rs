//! Tool-call argument gating shared by both downstream protocols.
//!
//! Upstream may report the same call several times while its arguments are
//! still forming. [`ArgumentGate`] decides which reports are worth emitting:
//! arguments are canonicalised (so key order never causes a re-emission),
//! checked against per-tool rules, and compared with the last value sent
//! for that call id.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::backend::ToolCall;

/// Extra requirements for one tool name, matched case-insensitively.
#[derive(Debug, Clone)]
pub struct ToolRule {
    pub name: String,
    /// Emit only once the call reports `completed`.
    pub require_completed: bool,
    /// Arguments must be a non-empty JSON object.
    pub require_object: bool,
    /// String fields that must be present and non-blank.
    pub required_fields: Vec<String>,
}

impl ToolRule {
    fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.trim())
    }
}

/// Rules applied before any emission. The default set guards the `Task`
/// tool, whose consumers reject partial arguments outright.
#[derive(Debug, Clone)]
pub struct ToolArgumentPolicy {
    rules: Vec<ToolRule>,
}

impl Default for ToolArgumentPolicy {
    fn default() -> Self {
        Self {
            rules: vec![ToolRule {
                name: "Task".to_string(),
                require_completed: true,
                require_object: true,
                required_fields: ["description", "prompt", "subagent_type"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            }],
        }
    }
}

impl ToolArgumentPolicy {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: ToolRule) -> Self {
        self.rules.push(rule);
        self
    }

    fn rule_for(&self, name: &str) -> Option<&ToolRule> {
        self.rules.iter().find(|r| r.matches(name))
    }
}

/// Re-serialise valid JSON so equal values compare equal as text. Invalid
/// JSON is returned trimmed.
pub fn canonicalize_arguments(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .and_then(|value| serde_json::to_string(&value).ok())
        .unwrap_or_else(|| trimmed.to_string())
}

fn has_required_fields(obj: &Map<String, Value>, fields: &[String]) -> bool {
    fields.iter().all(|field| {
        obj.get(field)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty())
    })
}

/// Per-request emission state: the policy plus the last arguments sent for
/// each call id.
#[derive(Debug, Default)]
pub struct ArgumentGate {
    policy: ToolArgumentPolicy,
    last_args: HashMap<String, String>,
}

impl ArgumentGate {
    pub fn new(policy: ToolArgumentPolicy) -> Self {
        Self {
            policy,
            last_args: HashMap::new(),
        }
    }

    /// Canonical arguments to emit for `call`, or `None` when the report is
    /// premature, invalid under the policy, or a repeat of what was sent.
    pub fn admit(&mut self, call: &ToolCall) -> Option<String> {
        let call_id = call.id.trim();
        if call_id.is_empty() {
            return None;
        }
        let rule = self.policy.rule_for(&call.name);
        if rule.is_some_and(|r| r.require_completed) && !call.status.is_completed() {
            return None;
        }

        let mut args = call.arguments.trim().to_string();
        if rule.is_some_and(|r| r.require_object) && (args.is_empty() || args == "{}") {
            return None;
        }
        if args.is_empty() {
            if !call.status.as_str().is_empty() && !call.status.is_completed() {
                return None;
            }
            args = "{}".to_string();
        }
        let args = canonicalize_arguments(&args);

        if let Some(rule) = rule.filter(|r| r.require_object) {
            let obj = match serde_json::from_str::<Value>(&args) {
                Ok(Value::Object(obj)) if !obj.is_empty() => obj,
                _ => return None,
            };
            if !has_required_fields(&obj, &rule.required_fields) {
                return None;
            }
        }

        if self.last_args.get(call_id) == Some(&args) {
            return None;
        }
        self.last_args.insert(call_id.to_string(), args.clone());
        Some(args)
    }

    /// Stricter variant for block-structured output: only completed calls
    /// whose arguments are a JSON object.
    pub fn admit_object(&mut self, call: &ToolCall) -> Option<String> {
        if !call.status.is_completed() {
            return None;
        }
        let args = self.admit(call)?;
        match serde_json::from_str::<Value>(&args) {
            Ok(Value::Object(_)) => Some(args),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CallStatus;

    fn call(id: &str, name: &str, args: &str, status: CallStatus) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: args.to_string(),
            status,
        }
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        for raw in [r#"{ "b": 2, "a": [1, {"z":1,"y":2}] }"#, "  [1,2] ", "not json", "\"s\""] {
            let once = canonicalize_arguments(raw);
            assert_eq!(canonicalize_arguments(&once), once);
        }
        assert_eq!(canonicalize_arguments(r#"{ "b": 2, "a": 1 }"#), r#"{"a":1,"b":2}"#);
        assert_eq!(canonicalize_arguments("  not json "), "not json");
    }

    #[test]
    fn test_key_order_does_not_re_emit() {
        let mut gate = ArgumentGate::default();
        let first = gate.admit(&call("call_1", "f", r#"{"a":1,"b":2}"#, CallStatus::Completed));
        assert_eq!(first.as_deref(), Some(r#"{"a":1,"b":2}"#));
        assert_eq!(
            gate.admit(&call("call_1", "f", r#"{"b":2, "a":1}"#, CallStatus::Completed)),
            None
        );
        // A genuine change goes through.
        assert!(gate
            .admit(&call("call_1", "f", r#"{"a":1,"b":3}"#, CallStatus::Completed))
            .is_some());
    }

    #[test]
    fn test_empty_arguments() {
        let mut gate = ArgumentGate::default();
        assert_eq!(gate.admit(&call("call_1", "f", "", CallStatus::InProgress)), None);
        assert_eq!(
            gate.admit(&call("call_1", "f", " ", CallStatus::Completed)).as_deref(),
            Some("{}")
        );
        assert_eq!(
            gate.admit(&call("call_2", "f", "", CallStatus::Unknown)).as_deref(),
            Some("{}")
        );
        assert_eq!(gate.admit(&call(" ", "f", "{}", CallStatus::Completed)), None);
    }

    #[test]
    fn test_task_rule() {
        let mut gate = ArgumentGate::default();
        let full = r#"{"description":"d","prompt":"p","subagent_type":"general"}"#;
        assert_eq!(gate.admit(&call("call_1", "Task", full, CallStatus::InProgress)), None);
        assert_eq!(gate.admit(&call("call_1", "task", "{}", CallStatus::Completed)), None);
        assert_eq!(
            gate.admit(&call(
                "call_1",
                "Task",
                r#"{"description":"d","prompt":" ","subagent_type":"general"}"#,
                CallStatus::Completed
            )),
            None
        );
        assert!(gate.admit(&call("call_1", "Task", full, CallStatus::Completed)).is_some());
    }

    #[test]
    fn test_custom_rule() {
        let policy = ToolArgumentPolicy::empty().with_rule(ToolRule {
            name: "Write".to_string(),
            require_completed: true,
            require_object: false,
            required_fields: Vec::new(),
        });
        let mut gate = ArgumentGate::new(policy);
        assert_eq!(gate.admit(&call("call_1", "write", "{}", CallStatus::InProgress)), None);
        assert!(gate.admit(&call("call_1", "Task", "{}", CallStatus::InProgress)).is_some());
    }

    #[test]
    fn test_admit_object() {
        let mut gate = ArgumentGate::default();
        let partial = call("call_1", "f", r#"{"a":1}"#, CallStatus::InProgress);
        assert_eq!(gate.admit_object(&partial), None);
        assert_eq!(gate.admit_object(&call("call_2", "f", "[1]", CallStatus::Completed)), None);
        assert_eq!(gate.admit_object(&call("call_3", "f", "{oops", CallStatus::Completed)), None);
        assert_eq!(
            gate.admit_object(&call("call_4", "f", "", CallStatus::Completed)).as_deref(),
            Some("{}")
        );
    }
}
