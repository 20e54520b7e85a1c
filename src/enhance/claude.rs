use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::TextEnhancer;
use crate::{Result, TranscriberError};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Enhancer backed by the Anthropic Messages API
pub struct ClaudeEnhancer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

impl ClaudeEnhancer {
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TranscriberError::Enhancement(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model,
            max_tokens,
        })
    }
}

fn language_hint(language: &str) -> &'static str {
    match language {
        "ru" => "The text is in Russian. ",
        "en" => "The text is in English. ",
        "de" => "The text is in German. ",
        "fr" => "The text is in French. ",
        "es" => "The text is in Spanish. ",
        _ => "",
    }
}

fn build_prompt(text: &str, language: &str) -> String {
    format!(
        "Format the following transcription text for readability.\n\
         {}\n\
         Your task:\n\
         1. Fix punctuation and capitalization\n\
         2. Split into logical paragraphs\n\
         3. Do NOT change the meaning or add/remove content\n\
         4. Do NOT add any commentary or explanation\n\
         5. Return ONLY the formatted text\n\
         \n\
         Transcription:\n\
         {}",
        language_hint(language),
        text
    )
}

#[async_trait]
impl TextEnhancer for ClaudeEnhancer {
    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn enhance(&self, text: &str, language: &str) -> Result<String> {
        let request = MessageRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: build_prompt(text, language),
            }],
        };

        tracing::debug!("Sending {} characters to {} for enhancement", text.len(), self.model);

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranscriberError::Enhancement("Claude API request timed out".to_string())
                } else {
                    TranscriberError::Enhancement(format!("HTTP request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriberError::Enhancement(format!(
                "Claude API error: {} - {}",
                status, body
            )));
        }

        let message: MessageResponse = response
            .json()
            .await
            .map_err(|e| TranscriberError::Enhancement(format!("Response parse error: {}", e)))?;

        let text = message
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(TranscriberError::Enhancement("Empty response from Claude API".to_string()));
        }

        Ok(text.trim().to_string())
    }

    fn name(&self) -> &'static str {
        "claude"
    }
}
