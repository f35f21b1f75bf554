use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;

use comanda_agent::llm::LlmClient;
use comanda_core::config::{LlmConfig, LlmProvider};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 512;

/// Completion client for the configured provider.
///
/// Only the raw completion text is returned; parsing it into an intent guess
/// belongs to the classifier.
pub struct HttpLlmClient {
    client: Client,
    provider: LlmProvider,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build llm http client")?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(config.provider).to_string());
        let base_url = base_url.trim_end_matches('/');
        let endpoint = match config.provider {
            LlmProvider::OpenAi => format!("{base_url}/v1/chat/completions"),
            LlmProvider::Anthropic => format!("{base_url}/v1/messages"),
            LlmProvider::Ollama => format!("{base_url}/api/generate"),
        };

        Ok(Self {
            client,
            provider: config.provider,
            endpoint,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn body(&self, prompt: &str) -> serde_json::Value {
        match self.provider {
            LlmProvider::OpenAi => json!({
                "model": self.model,
                "temperature": 0,
                "messages": [ChatMessage { role: "user", content: prompt }],
            }),
            LlmProvider::Anthropic => json!({
                "model": self.model,
                "max_tokens": MAX_TOKENS,
                "messages": [ChatMessage { role: "user", content: prompt }],
            }),
            LlmProvider::Ollama => json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
            }),
        }
    }
}

fn default_base_url(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => "https://api.openai.com",
        LlmProvider::Anthropic => "https://api.anthropic.com",
        LlmProvider::Ollama => "http://localhost:11434",
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let mut request = self.client.post(&self.endpoint).json(&self.body(prompt));
        if let Some(key) = &self.api_key {
            request = match self.provider {
                LlmProvider::Anthropic => request
                    .header("x-api-key", key.expose_secret())
                    .header("anthropic-version", ANTHROPIC_VERSION),
                LlmProvider::OpenAi | LlmProvider::Ollama => {
                    request.bearer_auth(key.expose_secret())
                }
            };
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("{} request failed", self.provider.as_str()))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{} returned HTTP {status}", self.provider.as_str());
        }

        match self.provider {
            LlmProvider::OpenAi => {
                let parsed: OpenAiResponse = response.json().await.context("invalid openai response")?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .map(|choice| choice.message.content)
                    .ok_or_else(|| anyhow!("openai response carried no choices"))
            }
            LlmProvider::Anthropic => {
                let parsed: AnthropicResponse =
                    response.json().await.context("invalid anthropic response")?;
                let text =
                    parsed.content.into_iter().filter_map(|block| block.text).collect::<String>();
                if text.is_empty() {
                    bail!("anthropic response carried no text");
                }
                Ok(text)
            }
            LlmProvider::Ollama => {
                let parsed: OllamaResponse = response.json().await.context("invalid ollama response")?;
                Ok(parsed.response)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use secrecy::SecretString;
    use serde_json::{json, Value};

    use comanda_agent::llm::LlmClient;
    use comanda_core::config::{AppConfig, LlmConfig, LlmProvider};

    use super::HttpLlmClient;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let address = listener.local_addr().expect("stub address");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("stub server");
        });
        format!("http://{address}")
    }

    fn config(provider: LlmProvider, base_url: String) -> LlmConfig {
        let mut config = AppConfig::default().llm;
        config.enabled = true;
        config.provider = provider;
        config.api_key = Some(SecretString::from("sk-test".to_string()));
        config.base_url = Some(base_url);
        config.model = "test-model".to_string();
        config
    }

    #[tokio::test]
    async fn openai_completion_is_read_from_the_first_choice() {
        async fn completions(
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> (StatusCode, Json<Value>) {
            let authorized = headers
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value == "Bearer sk-test");
            if !authorized || body["model"] != "test-model" {
                return (StatusCode::UNAUTHORIZED, Json(json!({})));
            }
            (
                StatusCode::OK,
                Json(json!({ "choices": [{ "message": { "content": "{\"intent\":\"help\"}" } }] })),
            )
        }

        let base_url = serve(Router::new().route("/v1/chat/completions", post(completions))).await;
        let client = HttpLlmClient::from_config(&config(LlmProvider::OpenAi, base_url)).expect("client");

        let reply = client.complete("oi").await.expect("completion");
        assert_eq!(reply, "{\"intent\":\"help\"}");
    }

    #[tokio::test]
    async fn anthropic_uses_its_own_headers_and_text_blocks() {
        async fn messages(headers: HeaderMap) -> (StatusCode, Json<Value>) {
            let keyed = headers.get("x-api-key").is_some_and(|value| value == "sk-test");
            let versioned = headers.get("anthropic-version").is_some();
            if !(keyed && versioned) {
                return (StatusCode::UNAUTHORIZED, Json(json!({})));
            }
            (StatusCode::OK, Json(json!({ "content": [{ "type": "text", "text": "ok" }] })))
        }

        let base_url = serve(Router::new().route("/v1/messages", post(messages))).await;
        let client =
            HttpLlmClient::from_config(&config(LlmProvider::Anthropic, base_url)).expect("client");

        assert_eq!(client.complete("oi").await.expect("completion"), "ok");
    }

    #[tokio::test]
    async fn provider_errors_surface_as_failures() {
        let router = Router::new().route(
            "/api/generate",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "loading model") }),
        );
        let base_url = serve(router).await;
        let client = HttpLlmClient::from_config(&config(LlmProvider::Ollama, base_url)).expect("client");

        let error = client.complete("oi").await.expect_err("provider down");
        assert!(error.to_string().contains("ollama"));
    }
}
