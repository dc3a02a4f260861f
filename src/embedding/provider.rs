/// FastEmbed implementation of the embedding provider
use super::{clamp_input, DetectedProvider, EmbeddingError, EmbeddingProvider, ProviderKind};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// FastEmbed provider for local embedding generation
///
/// Always available: detection never touches the network. The model is
/// downloaded and loaded lazily by `ensure_model` (or the first embed).
pub struct FastEmbedProvider {
    model: OnceCell<Arc<TextEmbedding>>,
    embedding_model: EmbeddingModel,
    model_name: String,
    dimension: usize,
    max_input_chars: usize,
}

impl FastEmbedProvider {
    /// Create a provider for the named model without loading it
    ///
    /// **Important**: Models are downloaded on-demand to `~/.cache/huggingface/`
    /// on first use. The smallest model (all-MiniLM-L6-v2) is ~90MB.
    /// - all-MiniLM-L6-v2: 90MB (384 dims) - recommended for most use cases
    /// - bge-small-en-v1.5: 130MB (384 dims) - better accuracy
    /// - bge-base-en-v1.5: 440MB (768 dims) - highest accuracy
    pub fn new(model_name: &str, max_input_chars: usize) -> Result<Self, EmbeddingError> {
        let (embedding_model, dimension) = match model_name {
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
            "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
            _ => {
                return Err(EmbeddingError::InitializationError(format!(
                    "Unsupported model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                    model_name
                )));
            }
        };

        Ok(Self {
            model: OnceCell::new(),
            embedding_model,
            model_name: model_name.to_string(),
            dimension,
            max_input_chars,
        })
    }

    /// Create provider with default model (all-MiniLM-L6-v2)
    pub fn with_default_model() -> Result<Self, EmbeddingError> {
        Self::new("all-MiniLM-L6-v2", 2000)
    }

    async fn model(&self) -> Result<Arc<TextEmbedding>, EmbeddingError> {
        self.model
            .get_or_try_init(|| async {
                tracing::info!(
                    "Initializing embedding model: {} ({}D, downloaded if not cached)",
                    self.model_name,
                    self.dimension
                );

                let init_options =
                    InitOptions::new(self.embedding_model.clone()).with_show_download_progress(true);

                tokio::task::spawn_blocking(move || TextEmbedding::try_new(init_options))
                    .await
                    .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?
                    .map(Arc::new)
                    .map_err(|e| EmbeddingError::InitializationError(e.to_string()))
            })
            .await
            .cloned()
    }

    async fn run_model(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = self.model().await?;
        let expected = texts.len();

        let embeddings = tokio::task::spawn_blocking(move || model.embed(texts, None))
            .await
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?
            .map_err(|e| EmbeddingError::GenerationError(e.to_string()))?;

        if embeddings.len() != expected {
            return Err(EmbeddingError::GenerationError(format!(
                "Expected {} embeddings, got {}",
                expected,
                embeddings.len()
            )));
        }

        // Verify all dimensions
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(EmbeddingError::GenerationError(format!(
                "Dimension mismatch: expected {}, got {}",
                self.dimension,
                bad.len()
            )));
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn detect(&self) -> Option<DetectedProvider> {
        Some(DetectedProvider::local())
    }

    async fn ensure_model(&self, _provider: &DetectedProvider) -> bool {
        match self.model().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Local embedding model unavailable: {}", e);
                false
            }
        }
    }

    async fn embed(
        &self,
        text: &str,
        provider: &DetectedProvider,
    ) -> Result<Vec<f32>, EmbeddingError> {
        if provider.kind != ProviderKind::Local {
            return Err(EmbeddingError::UnsupportedProvider(provider.kind));
        }
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        let text = clamp_input(text, self.max_input_chars).to_string();
        let mut embeddings = self.run_model(vec![text]).await?;
        embeddings
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationError("No embeddings generated".to_string()))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        provider: &DetectedProvider,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if provider.kind != ProviderKind::Local {
            return Err(EmbeddingError::UnsupportedProvider(provider.kind));
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.is_empty()) {
            return Err(EmbeddingError::InvalidInput(
                "Batch contains empty text".to_string(),
            ));
        }

        let safe = texts
            .iter()
            .map(|t| clamp_input(t, self.max_input_chars).to_string())
            .collect();
        self.run_model(safe).await
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
