//! Chat model client for OpenAI-compatible chat-completions endpoints.
//!
//! The agent talks to the model through the [`ChatModel`] trait. The only
//! implementation, [`OpenAiChatModel`], sends non-streaming requests with
//! tool definitions and shares the embedding providers' retry policy.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LlmConfig;
use crate::http::{client_with_timeout, post_json_with_retry};

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as sent by the model. May be malformed.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }
}

/// One model reply: either final text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn into_message(self) -> ChatMessage {
        ChatMessage::Assistant {
            content: self.content,
            tool_calls: self.tool_calls,
        }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send the conversation and the available tool definitions
    /// (OpenAI function-calling schema) and return the next reply.
    async fn complete(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<ChatCompletion>;
}

pub struct OpenAiChatModel {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: client_with_timeout(config.timeout_secs)?,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

/// Convert messages to the chat-completions wire format.
fn to_wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg {
            ChatMessage::System { content } => serde_json::json!({
                "role": "system",
                "content": content,
            }),
            ChatMessage::User { content } => serde_json::json!({
                "role": "user",
                "content": content,
            }),
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut m = serde_json::json!({
                    "role": "assistant",
                    "content": content,
                });
                if !tool_calls.is_empty() {
                    m["tool_calls"] = tool_calls
                        .iter()
                        .map(|call| {
                            serde_json::json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments,
                                }
                            })
                        })
                        .collect();
                }
                m
            }
            ChatMessage::Tool {
                tool_call_id,
                content,
            } => serde_json::json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content,
            }),
        })
        .collect()
}

fn build_request_body(
    model: &str,
    temperature: f32,
    messages: &[ChatMessage],
    tools: &[Value],
) -> Value {
    let mut body = serde_json::json!({
        "model": model,
        "messages": to_wire_messages(messages),
        "temperature": temperature,
        "stream": false,
    });
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.to_vec());
    }
    body
}

/// Read `choices[0].message` from a chat-completions response.
fn parse_completion(json: &Value) -> Result<ChatCompletion> {
    let Some(message) = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
    else {
        bail!("Invalid chat completion response: missing choices[0].message");
    };

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .map(str::to_string);

    let tool_calls = message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(i, call)| ToolCall {
                    id: call
                        .get("id")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call_{}", i)),
                    name: call["function"]["name"].as_str().unwrap_or("").to_string(),
                    arguments: match &call["function"]["arguments"] {
                        Value::String(s) => s.clone(),
                        Value::Null => "{}".to_string(),
                        other => other.to_string(),
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatCompletion {
        content,
        tool_calls,
    })
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<ChatCompletion> {
        let body = build_request_body(&self.model, self.temperature, messages, tools);
        let bearer = (!self.api_key.is_empty()).then_some(self.api_key.as_str());
        let json = post_json_with_retry(
            &self.client,
            &self.endpoint,
            bearer,
            &body,
            self.max_retries,
            "Chat",
        )
        .await?;
        let completion = parse_completion(&json)?;
        tracing::debug!(
            tool_calls = completion.tool_calls.len(),
            has_content = completion.content.is_some(),
            "chat completion received"
        );
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_includes_tools_when_provided() {
        let tools = vec![serde_json::json!({"type": "function", "function": {"name": "x"}})];
        let body = build_request_body("m", 0.0, &[ChatMessage::user("hi")], &tools);
        assert_eq!(body["model"], "m");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["tools"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn request_body_omits_tools_when_empty() {
        let body = build_request_body("m", 0.0, &[ChatMessage::user("hi")], &[]);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn assistant_tool_calls_use_function_shape() {
        let msg = ChatMessage::Assistant {
            content: None,
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "sql_db_list_tables".into(),
                arguments: "{}".into(),
            }],
        };
        let wire = to_wire_messages(&[msg, ChatMessage::tool("call_1", "orders")]);
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "sql_db_list_tables");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_1");
    }

    #[test]
    fn parses_text_reply() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "42" } }]
        });
        assert_eq!(parse_completion(&json).unwrap(), ChatCompletion::text("42"));
    }

    #[test]
    fn parses_tool_calls() {
        let json = serde_json::json!({
            "choices": [{ "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_9",
                    "type": "function",
                    "function": { "name": "sql_db_query", "arguments": "{\"query\":\"SELECT 1\"}" }
                }]
            }}]
        });
        let completion = parse_completion(&json).unwrap();
        assert!(completion.content.is_none());
        assert_eq!(completion.tool_calls[0].id, "call_9");
        assert_eq!(completion.tool_calls[0].arguments, "{\"query\":\"SELECT 1\"}");
    }

    #[test]
    fn missing_choices_is_an_error() {
        assert!(parse_completion(&serde_json::json!({"error": "x"})).is_err());
    }
}
