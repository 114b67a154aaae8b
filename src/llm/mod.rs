//! Analysis service client
//!
//! The engine only needs one contract from the outside world: send a
//! prompt (and optionally page images) to a model, get text back. The
//! `Provider` trait abstracts the transport; `ServiceClient` adds the
//! ordered model fallback chain and the per-call timeout. A provider is
//! chosen once, when the client is built, and injected into every stage.
//!
//! Implementations:
//! - `CommandProvider`: one external process per call (production)
//! - `MockProvider`: preconfigured responses (testing)

mod command;
mod mock;

pub use command::CommandProvider;
pub use mock::{MockCall, MockProvider};

use crate::config::ServiceConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// A rendered page handed to a vision-capable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageImage {
    /// 1-based page number in the source document.
    pub page: u32,
    pub path: PathBuf,
}

impl PageImage {
    pub fn new(page: u32, path: impl Into<PathBuf>) -> Self {
        Self {
            page,
            path: path.into(),
        }
    }
}

/// Errors from the analysis service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("service not available: {0}")]
    Unavailable(String),
    #[error("call to model '{model}' failed: {message}")]
    CallFailed { model: String, message: String },
    #[error("call to model '{model}' timed out after {secs}s")]
    Timeout { model: String, secs: u64 },
    #[error("all {attempts} model(s) failed; last error: {last}")]
    Exhausted { attempts: usize, last: String },
    #[error("no models configured")]
    NoModels,
}

/// Transport to a model.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Run one stateless analysis call and return the raw response text.
    async fn analyze(
        &self,
        model: &str,
        prompt: &str,
        images: &[PageImage],
    ) -> Result<String, ServiceError>;
}

/// Provider plus fallback models plus timeout.
///
/// Cheap to clone; clones share the provider.
#[derive(Clone)]
pub struct ServiceClient {
    provider: Arc<dyn Provider>,
    models: Vec<String>,
    timeout: Duration,
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("provider", &self.provider.name())
            .field("models", &self.models)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ServiceClient {
    pub fn new(provider: Arc<dyn Provider>, models: Vec<String>, timeout: Duration) -> Self {
        Self {
            provider,
            models,
            timeout,
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &ServiceConfig) -> Self {
        Self::new(provider, config.models.clone(), config.timeout())
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Call each model in order until one answers.
    ///
    /// A timed-out attempt counts as a failed one. Attempts share nothing.
    pub async fn call(&self, prompt: &str, images: &[PageImage]) -> Result<String, ServiceError> {
        if self.models.is_empty() {
            return Err(ServiceError::NoModels);
        }

        let mut last = None;
        for model in &self.models {
            let attempt = timeout(self.timeout, self.provider.analyze(model, prompt, images)).await;
            let err = match attempt {
                Ok(Ok(text)) => {
                    tracing::debug!(provider = self.provider.name(), model = %model, chars = text.len(), "service call succeeded");
                    return Ok(text);
                }
                Ok(Err(e)) => e,
                Err(_) => ServiceError::Timeout {
                    model: model.clone(),
                    secs: self.timeout.as_secs(),
                },
            };
            tracing::warn!(provider = self.provider.name(), model = %model, error = %err, "service call failed, trying next model");
            last = Some(err);
        }

        Err(ServiceError::Exhausted {
            attempts: self.models.len(),
            last: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}
