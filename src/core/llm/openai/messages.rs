//! Request construction and SSE chunk parsing for the chat-completions
//! streaming protocol.

use serde_json::{json, Value};

use crate::core::llm::base::{ChatRole, ChatTurn, LlmConfig};

/// Build the full message array for one request: the configured system
/// directive (with caller context appended) followed by the history.
pub fn build_messages(
    config: &LlmConfig,
    history: &[ChatTurn],
    client_name: Option<&str>,
) -> Vec<Value> {
    let mut system = config.system_prompt.clone();
    if let Some(name) = client_name.filter(|n| !n.trim().is_empty()) {
        if !system.is_empty() {
            system.push('\n');
        }
        system.push_str(&format!("The caller's name is {}.", name.trim()));
    }

    let mut messages = Vec::with_capacity(history.len() + 1);
    if !system.is_empty() {
        messages.push(json!({"role": "system", "content": system}));
    }
    for turn in history {
        let role = match turn.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        messages.push(json!({"role": role, "content": turn.content}));
    }
    messages
}

/// Build the streaming request body.
pub fn build_request_body(
    config: &LlmConfig,
    history: &[ChatTurn],
    client_name: Option<&str>,
) -> Value {
    json!({
        "model": config.model,
        "messages": build_messages(config, history, client_name),
        "temperature": config.temperature,
        "max_tokens": config.max_tokens,
        "stream": true,
    })
}

/// Extract the text delta from one parsed SSE chunk
/// (`choices[0].delta.content`), ignoring empty deltas.
pub fn extract_delta(chunk: &Value) -> Option<&str> {
    chunk
        .get("choices")?
        .as_array()?
        .first()?
        .get("delta")?
        .get("content")?
        .as_str()
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LlmConfig {
        LlmConfig {
            api_key: "sk-test".to_string(),
            system_prompt: "You are a helpful voice assistant.".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_messages_prepends_system_directive() {
        let history = vec![ChatTurn::user("hola")];
        let messages = build_messages(&test_config(), &history, None);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "You are a helpful voice assistant.");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "hola");
    }

    #[test]
    fn test_build_messages_appends_caller_name() {
        let messages = build_messages(&test_config(), &[], Some("Iván"));
        let system = messages[0]["content"].as_str().unwrap();
        assert!(system.starts_with("You are a helpful voice assistant."));
        assert!(system.contains("The caller's name is Iván."));
    }

    #[test]
    fn test_build_messages_ignores_blank_caller_name() {
        let messages = build_messages(&test_config(), &[], Some("   "));
        let system = messages[0]["content"].as_str().unwrap();
        assert!(!system.contains("caller's name"));
    }

    #[test]
    fn test_build_messages_without_system_prompt() {
        let config = LlmConfig {
            system_prompt: String::new(),
            ..test_config()
        };
        let history = vec![ChatTurn::user("hola"), ChatTurn::assistant("¡Hola!")];
        let messages = build_messages(&config, &history, None);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn test_build_request_body() {
        let body = build_request_body(&test_config(), &[ChatTurn::user("hola")], None);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 300);
        assert!(body["messages"].is_array());
    }

    #[test]
    fn test_extract_delta() {
        let chunk: Value = serde_json::from_str(
            r#"{"choices": [{"delta": {"content": "Vale."}, "finish_reason": null}]}"#,
        )
        .unwrap();
        assert_eq!(extract_delta(&chunk), Some("Vale."));
    }

    #[test]
    fn test_extract_delta_ignores_empty_and_role_chunks() {
        let role_chunk: Value =
            serde_json::from_str(r#"{"choices": [{"delta": {"role": "assistant"}}]}"#).unwrap();
        assert_eq!(extract_delta(&role_chunk), None);

        let empty_chunk: Value =
            serde_json::from_str(r#"{"choices": [{"delta": {"content": ""}}]}"#).unwrap();
        assert_eq!(extract_delta(&empty_chunk), None);

        let finish_chunk: Value =
            serde_json::from_str(r#"{"choices": [{"delta": {}, "finish_reason": "stop"}]}"#)
                .unwrap();
        assert_eq!(extract_delta(&finish_chunk), None);
    }
}
