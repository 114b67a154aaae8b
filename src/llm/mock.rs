//! Mock provider for tests: returns preconfigured responses

use super::{PageImage, Provider, ServiceError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub model: String,
    pub prompt: String,
    pub pages: Vec<u32>,
}

/// Responds by prompt content.
///
/// A response is registered under a marker; a call is answered by the first
/// registration whose marker occurs in the prompt.
pub struct MockProvider {
    available: bool,
    responses: Vec<(String, Result<String, String>)>,
    failing_models: HashSet<String>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockProvider {
    /// Create a mock provider that answers calls.
    pub fn available() -> Self {
        Self {
            available: true,
            responses: Vec::new(),
            failing_models: HashSet::new(),
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock provider that rejects every call.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::available()
        }
    }

    /// Answer prompts containing `marker` with `response`.
    pub fn with_response(mut self, marker: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.push((marker.into(), Ok(response.into())));
        self
    }

    /// Fail prompts containing `marker`.
    pub fn with_failure(mut self, marker: impl Into<String>, message: impl Into<String>) -> Self {
        self.responses.push((marker.into(), Err(message.into())));
        self
    }

    /// Fail every call made against `model`.
    pub fn failing_model(mut self, model: impl Into<String>) -> Self {
        self.failing_models.insert(model.into());
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared handle to the call log; stays readable after the provider
    /// has been moved into a client.
    pub fn call_log(&self) -> Arc<Mutex<Vec<MockCall>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn analyze(
        &self,
        model: &str,
        prompt: &str,
        images: &[PageImage],
    ) -> Result<String, ServiceError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(MockCall {
                model: model.to_string(),
                prompt: prompt.to_string(),
                pages: images.iter().map(|i| i.page).collect(),
            });
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if !self.available {
            return Err(ServiceError::Unavailable(
                "mock provider configured as unavailable".to_string(),
            ));
        }
        if self.failing_models.contains(model) {
            return Err(ServiceError::CallFailed {
                model: model.to_string(),
                message: "mock failure for model".to_string(),
            });
        }

        match self.responses.iter().find(|(marker, _)| prompt.contains(marker.as_str())) {
            Some((_, Ok(text))) => Ok(text.clone()),
            Some((_, Err(message))) => Err(ServiceError::CallFailed {
                model: model.to_string(),
                message: message.clone(),
            }),
            None => Err(ServiceError::CallFailed {
                model: model.to_string(),
                message: "no mock response for prompt".to_string(),
            }),
        }
    }
}
