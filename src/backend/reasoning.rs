//! Reasoning-effort normalisation and the downgrade used on rejection.

/// Trim the value and treat `undefined`/`null` placeholders as unset.
pub fn normalize_reasoning_effort(raw: &str) -> String {
    normalize_placeholder(raw)
}

/// Clean up placeholder strings some clients send for unset fields.
pub fn normalize_placeholder(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "" | "undefined" | "[undefined]" | "null" | "[null]" => String::new(),
        _ => trimmed.to_string(),
    }
}

/// Supported value to retry with, if one exists.
pub fn fallback_reasoning_effort(effort: &str) -> Option<&'static str> {
    match effort.trim().to_ascii_lowercase().as_str() {
        "xhigh" | "x-high" => Some("high"),
        _ => None,
    }
}

/// Whether `message` rejects `effort` as a `reasoning.effort` value.
pub fn is_unsupported_reasoning_effort_error(message: &str, effort: &str) -> bool {
    let msg = message.trim().to_ascii_lowercase();
    let effort = effort.trim().to_ascii_lowercase();
    if msg.is_empty() || effort.is_empty() {
        return false;
    }
    msg.contains("reasoning.effort") && msg.contains("unsupported") && contains_token(&msg, &effort)
}

/// Text to classify for an effort rejection: the upstream `error.message`,
/// with `reasoning.effort` added when only `error.param` names it. Bodies
/// that are not an error object are returned as-is.
pub fn reasoning_error_text(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let Some(error) = parsed.as_ref().and_then(|v| v.get("error")) else {
        return body.to_string();
    };
    let message = error
        .get("message")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(body);
    let param = error.get("param").and_then(serde_json::Value::as_str).unwrap_or("");
    if param.trim() == "reasoning.effort" && !message.contains("reasoning.effort") {
        format!("{message} (param: reasoning.effort)")
    } else {
        message.to_string()
    }
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-'
}

fn contains_token(haystack: &str, token: &str) -> bool {
    let bytes = haystack.as_bytes();
    haystack.match_indices(token).any(|(start, _)| {
        let end = start + token.len();
        let before_ok = start == 0 || !is_token_byte(bytes[start - 1]);
        let after_ok = end >= bytes.len() || !is_token_byte(bytes[end]);
        before_ok && after_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasoning_error_text_reads_param() {
        let body = r#"{"error":{"message":"Unsupported value: 'xhigh'","param":"reasoning.effort"}}"#;
        let text = reasoning_error_text(body);
        assert_eq!(text, "Unsupported value: 'xhigh' (param: reasoning.effort)");
        assert!(is_unsupported_reasoning_effort_error(&text, "xhigh"));

        let body = r#"{"error":{"message":"Unsupported value: 'xhigh'","param":"temperature"}}"#;
        let text = reasoning_error_text(body);
        assert_eq!(text, "Unsupported value: 'xhigh'");
        assert!(!is_unsupported_reasoning_effort_error(&text, "xhigh"));

        assert_eq!(reasoning_error_text("plain failure"), "plain failure");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_reasoning_effort(" high "), "high");
        assert_eq!(normalize_reasoning_effort("[undefined]"), "");
        assert_eq!(normalize_reasoning_effort("NULL"), "");
        assert_eq!(normalize_reasoning_effort("xhigh"), "xhigh");
    }

    #[test]
    fn test_fallback() {
        assert_eq!(fallback_reasoning_effort("xhigh"), Some("high"));
        assert_eq!(fallback_reasoning_effort("X-High"), Some("high"));
        assert_eq!(fallback_reasoning_effort("high"), None);
    }

    #[test]
    fn test_unsupported_effort_detection() {
        let msg = "Unsupported value: 'xhigh' is not supported for reasoning.effort with this model.";
        assert!(is_unsupported_reasoning_effort_error(msg, "xhigh"));
        assert!(!is_unsupported_reasoning_effort_error(msg, "high"));
        assert!(!is_unsupported_reasoning_effort_error(
            "unsupported parameter: temperature",
            "xhigh"
        ));
        assert!(!is_unsupported_reasoning_effort_error(msg, ""));
    }

    #[test]
    fn test_token_boundaries() {
        assert!(contains_token("effort xhigh unsupported", "xhigh"));
        assert!(!contains_token("effort x-xhigh unsupported", "xhigh"));
        assert!(contains_token("high", "high"));
        assert!(contains_token("superhigh, then 'high'", "high"));
    }
}
