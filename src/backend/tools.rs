//! Tool declarations sent upstream.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const TOOL_TYPE_WEB_SEARCH: &str = "web_search";
pub const TOOL_TYPE_CODE_INTERPRETER: &str = "code_interpreter";

/// Function tool as callers describe it, before upstream mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionSpec {
    /// Declared tool type; `function` for ordinary tools.
    pub kind: String,
    pub name: String,
    pub description: Option<String>,
    pub parameters: Option<serde_json::Value>,
}

impl FunctionSpec {
    pub fn function(
        name: impl Into<String>,
        description: Option<String>,
        parameters: Option<serde_json::Value>,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            name: name.into(),
            description,
            parameters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContainer {
    #[serde(rename = "type")]
    pub container_type: String,
}

/// One element of the upstream `tools` array. Built-in and function tools
/// share the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ToolContainer>,
}

impl ToolDefinition {
    fn native(tool_type: &str) -> Self {
        let container = (tool_type == TOOL_TYPE_CODE_INTERPRETER).then(|| ToolContainer {
            container_type: "auto".to_string(),
        });
        Self {
            tool_type: tool_type.to_string(),
            name: None,
            description: None,
            parameters: None,
            container,
        }
    }
}

fn native_type_for(spec: &FunctionSpec) -> Option<&'static str> {
    let kind = spec.kind.trim().to_ascii_lowercase();
    match kind.as_str() {
        TOOL_TYPE_WEB_SEARCH => return Some(TOOL_TYPE_WEB_SEARCH),
        TOOL_TYPE_CODE_INTERPRETER => return Some(TOOL_TYPE_CODE_INTERPRETER),
        "function" => {}
        _ => return None,
    }
    match spec.name.trim().to_ascii_lowercase().as_str() {
        "web_search" => Some(TOOL_TYPE_WEB_SEARCH),
        "python_runner" => Some(TOOL_TYPE_CODE_INTERPRETER),
        _ => None,
    }
}

/// Map caller tools to upstream definitions: de-duplicated built-ins first,
/// then function tools de-duplicated by case-insensitive name.
pub fn tool_definitions(specs: &[FunctionSpec]) -> Vec<ToolDefinition> {
    let mut native_seen = HashSet::new();
    let natives = specs
        .iter()
        .filter_map(native_type_for)
        .filter(|t| native_seen.insert(*t))
        .map(ToolDefinition::native);

    let mut name_seen = HashSet::new();
    let functions = specs
        .iter()
        .filter(|spec| spec.kind.trim().eq_ignore_ascii_case("function"))
        .filter(|spec| native_type_for(spec).is_none())
        .filter_map(|spec| {
            let name = spec.name.trim();
            if name.is_empty() || !name_seen.insert(name.to_ascii_lowercase()) {
                return None;
            }
            Some(ToolDefinition {
                tool_type: "function".to_string(),
                name: Some(name.to_string()),
                description: spec.description.clone().filter(|d| !d.is_empty()),
                parameters: spec.parameters.clone().filter(|p| !p.is_null()),
                container: None,
            })
        });

    natives.chain(functions).collect()
}

/// Whether the upstream rejected a tool type it does not support.
pub fn is_unsupported_tool_type_error(message: &str, tool_type: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    let tool_type = tool_type.trim().to_ascii_lowercase();
    !tool_type.is_empty() && msg.contains("unsupported tool type") && msg.contains(&tool_type)
}

/// Drop every definition of `tool_type`; reports whether anything was removed.
pub fn remove_tool_type(tools: &[ToolDefinition], tool_type: &str) -> (Vec<ToolDefinition>, bool) {
    let kept: Vec<ToolDefinition> = tools
        .iter()
        .filter(|t| !t.tool_type.eq_ignore_ascii_case(tool_type))
        .cloned()
        .collect();
    let removed = kept.len() != tools.len();
    (kept, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(kind: &str, name: &str) -> FunctionSpec {
        FunctionSpec {
            kind: kind.to_string(),
            name: name.to_string(),
            description: None,
            parameters: Some(json!({"type":"object"})),
        }
    }

    #[test]
    fn test_builtins_precede_functions_and_dedupe() {
        let tools = tool_definitions(&[
            spec("function", "Lookup"),
            spec("web_search", ""),
            spec("function", "web_search"),
            spec("function", "python_runner"),
            spec("function", "lookup"),
            spec("function", "  "),
        ]);
        let types: Vec<&str> = tools.iter().map(|t| t.tool_type.as_str()).collect();
        assert_eq!(types, vec!["web_search", "code_interpreter", "function"]);
        assert_eq!(tools[1].container.as_ref().unwrap().container_type, "auto");
        assert_eq!(tools[2].name.as_deref(), Some("Lookup"));
    }

    #[test]
    fn test_serialized_shape() {
        let tools = tool_definitions(&[spec("code_interpreter", ""), spec("function", "f")]);
        let value = serde_json::to_value(&tools).unwrap();
        assert_eq!(
            value,
            json!([
                {"type":"code_interpreter","container":{"type":"auto"}},
                {"type":"function","name":"f","parameters":{"type":"object"}}
            ])
        );
    }

    #[test]
    fn test_unsupported_tool_type_detection() {
        assert!(is_unsupported_tool_type_error(
            "Unsupported tool type: code_interpreter",
            TOOL_TYPE_CODE_INTERPRETER
        ));
        assert!(!is_unsupported_tool_type_error(
            "unsupported tool type: web_search",
            TOOL_TYPE_CODE_INTERPRETER
        ));
        assert!(!is_unsupported_tool_type_error("", TOOL_TYPE_CODE_INTERPRETER));
    }

    #[test]
    fn test_remove_tool_type() {
        let tools = tool_definitions(&[spec("code_interpreter", ""), spec("function", "f")]);
        let (kept, removed) = remove_tool_type(&tools, TOOL_TYPE_CODE_INTERPRETER);
        assert!(removed);
        assert_eq!(kept.len(), 1);

        let (again, removed) = remove_tool_type(&kept, TOOL_TYPE_CODE_INTERPRETER);
        assert!(!removed);
        assert_eq!(again, kept);
    }
}
