use async_trait::async_trait;
use serde_json::json;
use tera::{Context, Tera};
use tracing::debug;

use crate::config::{Config, LlmConfig};
use crate::error::{CalldocError, Result};
use super::documenter::{clean_docstring, DocumentationSink, SinkError};

const PROMPT_TEMPLATE: &str = "prompt";

const DEFAULT_PROMPT: &str = r#"Generate a Google-style Python docstring for the following function or class. Only return the docstring text, without the surrounding quotes or any additional commentary.

Function code:
{{ code }}

Context from child functions (if any):
{{ context }}

Describe the logic and purpose of the code, then its arguments, return value and raised exceptions where they apply.
"#;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a code managing software engineer who writes clean and precise documentation.";

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Factory function to create the documentation sink described by the config
pub fn create_sink(config: &Config) -> Result<LlmSink> {
    match config.llm.provider.as_str() {
        "anthropic" | "openai" => LlmSink::new(config),
        other => Err(CalldocError::Config(format!("Unsupported LLM provider: {}", other))),
    }
}

/// HTTP documentation sink for the Anthropic Messages and OpenAI Chat Completions APIs
pub struct LlmSink {
    config: LlmConfig,
    api_key: String,
    system_prompt: String,
    templates: Tera,
    client: reqwest::Client,
}

impl LlmSink {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = resolve_api_key(&config.llm)?;

        let mut templates = Tera::default();
        let prompt = config.templates.prompt.as_deref().unwrap_or(DEFAULT_PROMPT);
        templates.add_raw_template(PROMPT_TEMPLATE, prompt)?;

        Ok(Self {
            config: config.llm.clone(),
            api_key,
            system_prompt: config
                .templates
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            templates,
            client: reqwest::Client::new(),
        })
    }

    /// Render the user prompt for one declaration
    pub fn render_prompt(&self, code: &str, context: &str) -> std::result::Result<String, SinkError> {
        let mut tera_context = Context::new();
        tera_context.insert("code", code);
        tera_context.insert("context", context);
        self.templates
            .render(PROMPT_TEMPLATE, &tera_context)
            .map_err(|e| SinkError::Prompt(e.to_string()))
    }

    fn base_url(&self, default: &str) -> String {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    async fn call_anthropic_api(&self, prompt: &str) -> std::result::Result<String, SinkError> {
        let payload = json!({
            "model": self.config.model,
            "system": self.system_prompt,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "max_tokens": self.config.max_tokens.unwrap_or(1024),
            "temperature": self.config.temperature.unwrap_or(0.2)
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url(ANTHROPIC_BASE_URL)))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| SinkError::Request(e.to_string()))?;

        let response_data = read_json(response).await?;
        response_data["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SinkError::Malformed("missing content[0].text".to_string()))
    }

    async fn call_openai_api(&self, prompt: &str) -> std::result::Result<String, SinkError> {
        let payload = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": prompt }
            ],
            "max_tokens": self.config.max_tokens.unwrap_or(1024),
            "temperature": self.config.temperature.unwrap_or(0.2)
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url(OPENAI_BASE_URL)))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| SinkError::Request(e.to_string()))?;

        let response_data = read_json(response).await?;
        response_data["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SinkError::Malformed("missing choices[0].message.content".to_string()))
    }
}

#[async_trait]
impl DocumentationSink for LlmSink {
    async fn generate(&self, code: &str, context: &str) -> std::result::Result<String, SinkError> {
        let prompt = self.render_prompt(code, context)?;
        debug!("Requesting docstring from {} ({} prompt bytes)", self.config.model, prompt.len());

        let raw = match self.config.provider.as_str() {
            "anthropic" => self.call_anthropic_api(&prompt).await?,
            "openai" => self.call_openai_api(&prompt).await?,
            other => return Err(SinkError::Config(format!("Unsupported LLM provider: {}", other))),
        };
        clean_docstring(&raw)
    }

    fn name(&self) -> &str {
        match self.config.provider.as_str() {
            "anthropic" => "Anthropic",
            "openai" => "OpenAI",
            _ => "Unknown provider",
        }
    }
}

fn resolve_api_key(config: &LlmConfig) -> Result<String> {
    if let Some(key) = config.api_key.as_ref().filter(|k| !k.is_empty()) {
        return Ok(key.clone());
    }
    let Some(var) = config.api_key_env.as_deref() else {
        return Err(CalldocError::Config("API key required for external LLM providers".to_string()));
    };
    std::env::var(var)
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| CalldocError::Config(format!("API key not set: export {}", var)))
}

async fn read_json(response: reqwest::Response) -> std::result::Result<serde_json::Value, SinkError> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(SinkError::Status { status, body });
    }
    response
        .json()
        .await
        .map_err(|e| SinkError::Malformed(e.to_string()))
}
