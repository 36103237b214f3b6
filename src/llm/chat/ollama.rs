use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use async_trait::async_trait;
use std::error::Error as StdError;
use super::{ ensure_not_empty, ChatClient };
use crate::history::format_history_for_prompt;
use crate::llm::error::{ classify_status, classify_transport };
use crate::llm::{ LlmConfig, LlmType, UpstreamError };
use crate::models::chat::ConversationMessage;
use log::debug;

/// Single-prompt provider: the conversation is flattened into one text.
#[derive(Debug)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
    completion_model: String,
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

impl OllamaClient {
    pub fn new(base_url: Option<String>, completion_model: Option<String>) -> Self {
        let model = completion_model.unwrap_or_else(|| "llama3".to_string());
        let url = base_url.unwrap_or_else(|| "http://localhost:11434".into());

        Self {
            http: HttpClient::new(),
            base_url: url.trim_end_matches('/').to_string(),
            completion_model: model,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        if config.llm_type != LlmType::Ollama {
            return Err("Invalid config type for OllamaClient".into());
        }

        Ok(Self::new(config.base_url.clone(), config.completion_model.clone()))
    }

    pub async fn generate(&self, prompt: &str) -> Result<GenerateResponse, UpstreamError> {
        let url = format!("{}/api/generate", self.base_url);
        let req = GenerateRequest {
            model: self.completion_model.clone(),
            prompt: prompt.to_string(),
            stream: false,
        };
        let resp = self.http
            .post(&url)
            .json(&req)
            .send().await
            .map_err(|e| classify_transport(&e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!("Ollama returned {}: {}", status, body);
            return Err(classify_status(status, &body));
        }

        resp.json::<GenerateResponse>().await.map_err(|e| UpstreamError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn complete(
        &self,
        conversation: &[ConversationMessage]
    ) -> Result<String, UpstreamError> {
        ensure_not_empty(conversation)?;
        let mut prompt = format_history_for_prompt(conversation);
        prompt.push_str("Assistant:");
        let gen_resp = self.generate(&prompt).await?;
        Ok(gen_resp.response.trim().to_string())
    }

    fn get_model(&self) -> String {
        self.completion_model.clone()
    }

    fn get_llm_type(&self) -> LlmType {
        LlmType::Ollama
    }
}
