//! Ollama stat generator (OpenAI-compatible API, JSON mode)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use realmlink_domain::GeneratedStats;

use crate::infrastructure::ports::{StatGenError, StatGeneratorPort};
use crate::infrastructure::settings::OllamaSettings;

const SYSTEM_PROMPT: &str = "You write D&D 5e monster stat blocks. \
Answer with a single JSON object with the fields name (string), hp (integer), \
ac (integer) and notes (one short sentence). No prose, no markdown.";

/// Client for Ollama's OpenAI-compatible chat API
#[derive(Clone)]
pub struct OllamaStatGenerator {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaStatGenerator {
    pub fn new(settings: &OllamaSettings) -> Self {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
        }
    }

    /// Create client with custom timeout (for testing).
    pub fn with_timeout(base_url: &str, model: &str, timeout: Duration) -> Self {
        Self::new(&OllamaSettings {
            base_url: base_url.to_string(),
            model: model.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl StatGeneratorPort for OllamaStatGenerator {
    async fn generate(&self, prompt: &str) -> Result<GeneratedStats, StatGenError> {
        let api_request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!(
                        "Generate a monster based on this description: \"{}\"",
                        prompt
                    ),
                },
            ],
            response_format: ResponseFormat {
                r#type: "json_object".to_string(),
            },
            temperature: Some(0.7),
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&api_request)
            .send()
            .await
            .map_err(|e| StatGenError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .map_err(|e| StatGenError::RequestFailed(e.to_string()))?;
            return Err(StatGenError::RequestFailed(error_text));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| StatGenError::InvalidResponse(e.to_string()))?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        parse_stats(&content)
    }
}

/// Parse a model reply into stats. Markdown code fences are tolerated.
pub fn parse_stats(content: &str) -> Result<GeneratedStats, StatGenError> {
    let text = strip_code_fences(content);
    if text.is_empty() {
        return Err(StatGenError::Empty);
    }
    serde_json::from_str::<GeneratedStats>(text)
        .map_err(|e| StatGenError::InvalidResponse(e.to_string()))
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = trimmed.trim_start_matches("```");
    let body = body.strip_prefix("json").unwrap_or(body);
    body.trim_end_matches("```").trim()
}

// =============================================================================
// OpenAI-compatible API types
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_json_parses() {
        let stats = parse_stats(r#"{"name":"Bog Hag","hp":45,"ac":13,"notes":"Smells of peat"}"#)
            .expect("valid");
        assert_eq!(stats.name, "Bog Hag");
        assert_eq!(stats.hp, 45);
    }

    #[test]
    fn fenced_json_parses() {
        let reply = "```json\n{\"name\":\"Ash Wight\",\"hp\":22,\"ac\":14,\"notes\":\"\"}\n```";
        let stats = parse_stats(reply).expect("valid");
        assert_eq!(stats.ac, 14);
    }

    #[test]
    fn empty_and_prose_replies_fail() {
        assert!(matches!(parse_stats("   "), Err(StatGenError::Empty)));
        assert!(matches!(parse_stats("```\n```"), Err(StatGenError::Empty)));
        assert!(matches!(
            parse_stats("A scary goblin"),
            Err(StatGenError::InvalidResponse(_))
        ));
    }
}
