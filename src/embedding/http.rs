/// Ollama / LM Studio embedding provider over HTTP
use super::{clamp_input, DetectedProvider, EmbeddingError, EmbeddingProvider, ProviderKind};
use crate::config::EmbeddingConfig;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Halvings attempted when a text overflows the model context
const MAX_CONTEXT_RETRIES: u32 = 3;

/// Extra attempts for transient Ollama failures
const MAX_REQUEST_RETRIES: u32 = 3;

#[derive(Deserialize)]
struct OllamaEmbedding {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OllamaBatchEmbedding {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

/// Embedding provider talking to a local Ollama or LM Studio server.
///
/// Detection prefers Ollama and falls back to LM Studio unless the
/// configured backend pins one of them.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl HttpEmbeddingProvider {
    pub fn new(config: EmbeddingConfig) -> Self {
        let client = reqwest::Client::builder()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, config }
    }

    fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.config.ping_timeout_ms)
    }

    fn request_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            MAX_REQUEST_RETRIES + 1,
            Duration::from_millis(self.config.request_retry_delay_ms),
        )
    }

    async fn ping(&self, url: &str) -> bool {
        match self
            .client
            .get(url)
            .timeout(self.ping_timeout())
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Embedding ping {} failed: {}", url, e);
                false
            }
        }
    }

    async fn detect_ollama(&self) -> Option<DetectedProvider> {
        let base = self.config.ollama_host.trim_end_matches('/');
        self.ping(&format!("{}/api/tags", base))
            .await
            .then(|| DetectedProvider::http(ProviderKind::Ollama, base))
    }

    async fn detect_lmstudio(&self) -> Option<DetectedProvider> {
        let base = self.config.lmstudio_host.trim_end_matches('/');
        self.ping(&format!("{}/models", base))
            .await
            .then(|| DetectedProvider::http(ProviderKind::LmStudio, base))
    }

    fn base_url<'a>(&self, provider: &'a DetectedProvider) -> Result<&'a str, EmbeddingError> {
        provider
            .base_url
            .as_deref()
            .ok_or(EmbeddingError::UnsupportedProvider(provider.kind))
    }

    async fn post_json(
        &self,
        url: String,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, EmbeddingError> {
        let response = self.client.post(url).json(&body).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if body.contains("context length") {
            return Err(EmbeddingError::ContextLength(body));
        }
        Err(EmbeddingError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn ollama_embed_once(&self, base: &str, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": text,
        });
        let response = self.post_json(format!("{}/api/embeddings", base), body).await?;
        let parsed: OllamaEmbedding = response.json().await?;
        Ok(parsed.embedding)
    }

    /// Single Ollama embedding with retries on transient failures
    async fn ollama_embed(&self, base: &str, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.request_retry()
            .run_while(
                |attempt| {
                    if attempt > 0 {
                        info!("Retrying embedding request (attempt {})", attempt + 1);
                    }
                },
                |_| self.ollama_embed_once(base, text),
                EmbeddingError::is_transient,
            )
            .await
            .map_err(|exhausted| exhausted.last_error)
    }

    /// Native Ollama batch endpoint; `None` when the server does not support it
    async fn ollama_embed_native_batch(&self, base: &str, texts: &[&str]) -> Option<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.config.model,
            "input": texts,
        });

        let response = match self.post_json(format!("{}/api/embed", base), body).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Batch embed endpoint unavailable: {}", e);
                return None;
            }
        };

        match response.json::<OllamaBatchEmbedding>().await {
            Ok(parsed) if parsed.embeddings.len() == texts.len() => Some(parsed.embeddings),
            Ok(parsed) => {
                debug!(
                    "Batch embed returned {} vectors for {} inputs",
                    parsed.embeddings.len(),
                    texts.len()
                );
                None
            }
            Err(e) => {
                debug!("Batch embed response unreadable: {}", e);
                None
            }
        }
    }

    async fn lmstudio_embed(&self, base: &str, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "input": text,
        });
        let response = self.post_json(format!("{}/embeddings", base), body).await?;
        let parsed: OpenAiEmbeddingResponse = response.json().await?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::InvalidResponse("No embedding in response".to_string()))
    }

    async fn embed_one(
        &self,
        text: &str,
        provider: &DetectedProvider,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let base = self.base_url(provider)?;
        match provider.kind {
            ProviderKind::Ollama => self.ollama_embed(base, text).await,
            ProviderKind::LmStudio => self.lmstudio_embed(base, text).await,
            ProviderKind::Local => Err(EmbeddingError::UnsupportedProvider(provider.kind)),
        }
    }

    /// Embed one text, halving it when the model rejects its length
    async fn embed_shrinking(
        &self,
        text: &str,
        provider: &DetectedProvider,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let mut attempt_text = text;
        let mut retries = 0;

        loop {
            match self.embed_one(attempt_text, provider).await {
                Ok(embedding) => return Ok(embedding),
                Err(EmbeddingError::ContextLength(_)) if retries < MAX_CONTEXT_RETRIES => {
                    let half = attempt_text.chars().count() / 2;
                    attempt_text = clamp_input(attempt_text, half);
                    retries += 1;
                    warn!(
                        "Text too long for model, reducing to {} chars ({}/{})",
                        half, retries, MAX_CONTEXT_RETRIES
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn detect(&self) -> Option<DetectedProvider> {
        match self.config.backend.as_str() {
            "ollama" => self.detect_ollama().await,
            "lmstudio" => self.detect_lmstudio().await,
            _ => match self.detect_ollama().await {
                Some(found) => Some(found),
                None => self.detect_lmstudio().await,
            },
        }
    }

    async fn ensure_model(&self, provider: &DetectedProvider) -> bool {
        if provider.kind != ProviderKind::Ollama {
            // LM Studio serves whatever model the user loaded
            return true;
        }
        let Ok(base) = self.base_url(provider) else {
            return false;
        };

        let model = &self.config.model;
        let show = self
            .client
            .post(format!("{}/api/show", base))
            .json(&serde_json::json!({ "name": model }))
            .send()
            .await;

        match show {
            Ok(response) if response.status().is_success() => return true,
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to check embedding model {}: {}", model, e);
                return false;
            }
        }

        info!("Pulling embedding model {}...", model);
        let pull = self
            .client
            .post(format!("{}/api/pull", base))
            .json(&serde_json::json!({ "name": model, "stream": false }))
            .send()
            .await;

        match pull {
            Ok(response) if response.status().is_success() => {
                // Drain the progress body before reporting success
                if let Err(e) = response.bytes().await {
                    warn!("Model pull for {} did not complete: {}", model, e);
                    return false;
                }
                info!("Embedding model {} ready", model);
                true
            }
            Ok(response) => {
                warn!("Model pull for {} failed: {}", model, response.status());
                false
            }
            Err(e) => {
                warn!("Model pull for {} failed: {}", model, e);
                false
            }
        }
    }

    async fn embed(
        &self,
        text: &str,
        provider: &DetectedProvider,
    ) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_one(clamp_input(text, self.config.max_input_chars), provider)
            .await
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        provider: &DetectedProvider,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let safe: Vec<&str> = texts
            .iter()
            .map(|t| clamp_input(t, self.config.max_input_chars))
            .collect();

        let mut results = Vec::with_capacity(safe.len());
        for (i, batch) in safe.chunks(self.config.batch_size.max(1)).enumerate() {
            if i > 0 && self.config.batch_pause_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.batch_pause_ms)).await;
            }

            if provider.kind == ProviderKind::Ollama {
                let base = self.base_url(provider)?;
                if let Some(embeddings) = self.ollama_embed_native_batch(base, batch).await {
                    results.extend(embeddings);
                    continue;
                }
            }

            for text in batch {
                results.push(self.embed_shrinking(text, provider).await?);
            }
        }

        if results.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "Embedding count mismatch: expected {}, got {}",
                texts.len(),
                results.len()
            )));
        }

        Ok(results)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
