//! Model naming: namespace stripping, support checks and the listings served
//! on `/v1/models`.

use crate::config::ModelsConfig;
use serde::Serialize;

const CLAUDE_MODEL_CREATED_AT: &str = "1970-01-01T00:00:00Z";

/// Model entry in the Anthropic list shape.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClaudeModelInfo {
    #[serde(rename = "type")]
    pub model_type: &'static str,
    pub id: String,
    pub display_name: String,
    pub created_at: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaudeModelList {
    pub data: Vec<ClaudeModelInfo>,
    pub first_id: String,
    pub has_more: bool,
    pub last_id: String,
}

#[derive(Debug, Clone)]
pub struct ModelCatalog {
    config: ModelsConfig,
}

impl ModelCatalog {
    pub fn new(config: ModelsConfig) -> Self {
        Self { config }
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Namespaced id of the first preset.
    pub fn default_model(&self) -> String {
        let id = self
            .config
            .presets
            .first()
            .map(|(id, _)| id.as_str())
            .unwrap_or_default();
        format!("{}{}", self.config.namespace, id)
    }

    /// Strip any known namespace or vendor prefix.
    pub fn normalize<'a>(&self, model_id: &'a str) -> &'a str {
        let trimmed = model_id.trim();
        [
            self.config.namespace.as_str(),
            self.config.legacy_namespace.as_str(),
            "chatgpt/",
            "opencode/",
        ]
        .into_iter()
        .filter(|prefix| !prefix.is_empty())
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed)
    }

    pub fn is_supported(&self, model_id: &str) -> bool {
        let trimmed = model_id.trim();
        if trimmed.is_empty() {
            return false;
        }
        let normalized = self.normalize(trimmed);
        self.config.presets.iter().any(|(id, _)| id == normalized)
    }

    /// `(namespaced id, display name)` for every preset, in config order.
    pub fn presets(&self) -> Vec<(String, String)> {
        self.config
            .presets
            .iter()
            .map(|(id, name)| (format!("{}{}", self.config.namespace, id), name.clone()))
            .collect()
    }

    /// Map Claude CLI aliases and bare ids onto a namespaced preset id.
    pub fn claude_alias(&self, model: &str) -> String {
        let trimmed = model.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        let lower = trimmed.to_ascii_lowercase();
        let mini = format!("{}{}", self.config.namespace, self.config.mini_model);
        match lower.as_str() {
            "sonnet" | "opus" => return self.default_model(),
            "haiku" => return mini,
            _ => {}
        }
        if lower.starts_with("claude-haiku") {
            return mini;
        }
        if lower.starts_with("claude-") {
            return self.default_model();
        }
        if trimmed.starts_with(&self.config.namespace)
            || trimmed.starts_with(&self.config.legacy_namespace)
        {
            return trimmed.to_string();
        }
        format!("{}{}", self.config.namespace, trimmed)
    }

    /// Resolve a Claude-facing model name to the backend model id.
    pub fn resolve_claude_model(&self, model: &str) -> Option<String> {
        let candidate = self.claude_alias(model);
        self.is_supported(&candidate)
            .then(|| self.normalize(&candidate).to_string())
    }

    fn claude_display_name(&self, model_id: &str) -> String {
        match model_id.to_ascii_lowercase().as_str() {
            "sonnet" => return "Sonnet".to_string(),
            "opus" => return "Opus".to_string(),
            "haiku" => return "Haiku".to_string(),
            _ => {}
        }
        let normalized = self.normalize(model_id);
        self.config
            .presets
            .iter()
            .find(|(id, _)| id.eq_ignore_ascii_case(normalized))
            .map(|(_, name)| name.clone())
            .unwrap_or_else(|| model_id.to_string())
    }

    pub fn claude_model_info(&self, model_id: &str) -> ClaudeModelInfo {
        let id = model_id.trim().to_string();
        ClaudeModelInfo {
            model_type: "model",
            display_name: self.claude_display_name(&id),
            id,
            created_at: CLAUDE_MODEL_CREATED_AT,
        }
    }

    /// Aliases first, then every preset.
    pub fn claude_models(&self) -> ClaudeModelList {
        let mut seen = std::collections::HashSet::new();
        let data: Vec<ClaudeModelInfo> = ["sonnet", "opus", "haiku"]
            .into_iter()
            .map(str::to_string)
            .chain(self.presets().into_iter().map(|(id, _)| id))
            .filter(|id| seen.insert(id.to_ascii_lowercase()))
            .map(|id| self.claude_model_info(&id))
            .collect();

        ClaudeModelList {
            first_id: data.first().map(|m| m.id.clone()).unwrap_or_default(),
            last_id: data.last().map(|m| m.id.clone()).unwrap_or_default(),
            has_more: false,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ModelCatalog {
        ModelCatalog::new(ModelsConfig::default())
    }

    #[test]
    fn test_normalize_prefixes() {
        let c = catalog();
        assert_eq!(c.normalize("chatgpt/codex/gpt-5.1"), "gpt-5.1");
        assert_eq!(c.normalize("opencode/codex/gpt-5.1"), "gpt-5.1");
        assert_eq!(c.normalize("chatgpt/gpt-5.2"), "gpt-5.2");
        assert_eq!(c.normalize(" gpt-5.2 "), "gpt-5.2");
    }

    #[test]
    fn test_is_supported() {
        let c = catalog();
        assert!(c.is_supported("chatgpt/codex/gpt-5.3-codex"));
        assert!(c.is_supported("gpt-5.1-codex-mini"));
        assert!(!c.is_supported("gpt-4o"));
        assert!(!c.is_supported("  "));
    }

    #[test]
    fn test_claude_aliases() {
        let c = catalog();
        assert_eq!(c.claude_alias("sonnet"), "chatgpt/codex/gpt-5.3-codex");
        assert_eq!(c.claude_alias("claude-opus-4-1"), "chatgpt/codex/gpt-5.3-codex");
        assert_eq!(
            c.claude_alias("claude-haiku-4-5"),
            "chatgpt/codex/gpt-5.1-codex-mini"
        );
        assert_eq!(c.claude_alias("gpt-5.2"), "chatgpt/codex/gpt-5.2");
        assert_eq!(
            c.resolve_claude_model("haiku").as_deref(),
            Some("gpt-5.1-codex-mini")
        );
        assert_eq!(c.resolve_claude_model("gpt-4o"), None);
    }

    #[test]
    fn test_claude_model_list_starts_with_aliases() {
        let list = catalog().claude_models();
        assert_eq!(list.first_id, "sonnet");
        assert_eq!(list.data[1].display_name, "Opus");
        assert_eq!(list.data[3].id, "chatgpt/codex/gpt-5.3-codex");
        assert_eq!(list.data[3].display_name, "GPT-5.3 Codex");
        assert_eq!(list.last_id, "chatgpt/codex/gpt-5.1");
        assert!(!list.has_more);
    }
}
