use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::prompt::{build_user_message, parse_classification, SYSTEM_PROMPT};
use crate::{Classification, Classifier, ClassifierError};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            temperature: 0.0,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Load configuration from environment variables (and `.env`).
    pub fn from_env() -> Result<Self, ClassifierError> {
        dotenvy::dotenv().ok();

        let api_key = env_non_empty("OPENAI_API_KEY").ok_or(ClassifierError::MissingEnv {
            key: "OPENAI_API_KEY",
        })?;
        let mut config = Self::new(api_key);
        if let Some(base_url) = env_non_empty("OPENAI_API_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(model) = env_non_empty("OPENAI_MODEL") {
            config.model = model;
        }
        if let Some(timeout) = env_non_empty("API_TIMEOUT_SECS")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
        {
            config.timeout = Duration::from_secs(timeout);
        }
        Ok(config)
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Blocking client for `POST {base_url}/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiClassifier {
    config: OpenAiConfig,
    client: reqwest::blocking::Client,
}

impl OpenAiClassifier {
    pub fn new(config: OpenAiConfig) -> Result<Self, ClassifierError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> Result<Self, ClassifierError> {
        Self::new(OpenAiConfig::from_env()?)
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

impl Classifier for OpenAiClassifier {
    fn classify(&self, filename: &str, text: &str) -> Result<Classification, ClassifierError> {
        let request = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_user_message(filename, text),
                },
            ],
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            error!("classifier request for {} failed: {} - {}", filename, status, body);
            return Err(ClassifierError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = response.json()?;
        let raw = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(ClassifierError::EmptyResponse)?;
        debug!("[{}] raw classifier reply:\n{}", filename, raw);

        parse_classification(&raw)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    #[serde(default)]
    content: Option<String>,
}
