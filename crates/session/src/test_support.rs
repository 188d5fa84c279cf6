use std::sync::Mutex;
use std::time::Duration;

use parley_llm::{
    BoxFuture, GenerationProvider, ImageRef, ImageRequest, Model, ProviderError, ProviderResult,
    TextRequest,
};
use tokio::sync::Notify;

fn unavailable() -> ProviderError {
    ProviderError::Status {
        stage: "scripted-provider",
        url: "https://provider.test/v1".to_string(),
        status: 503,
        body: "service unavailable".to_string(),
    }
}

/// Answers immediately (or after a fixed delay) with canned output and
/// records every request it receives.
pub(crate) struct ScriptedProvider {
    text_reply: Option<String>,
    image_reply: Option<String>,
    delay: Option<Duration>,
    text_requests: Mutex<Vec<TextRequest>>,
    image_requests: Mutex<Vec<ImageRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn replying(text: &str) -> Self {
        Self {
            text_reply: Some(text.to_string()),
            image_reply: None,
            delay: None,
            text_requests: Mutex::new(Vec::new()),
            image_requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            text_reply: None,
            ..Self::replying("")
        }
    }

    pub(crate) fn with_image(mut self, url: &str) -> Self {
        self.image_reply = Some(url.to_string());
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn text_calls(&self) -> usize {
        self.text_requests.lock().map_or(0, |requests| requests.len())
    }

    pub(crate) fn last_text_request(&self) -> Option<TextRequest> {
        self.text_requests
            .lock()
            .ok()
            .and_then(|requests| requests.last().cloned())
    }

    pub(crate) fn last_image_request(&self) -> Option<ImageRequest> {
        self.image_requests
            .lock()
            .ok()
            .and_then(|requests| requests.last().cloned())
    }
}

impl GenerationProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn default_model(&self) -> &str {
        "test-model"
    }

    fn fallback_models(&self) -> &[Model] {
        &[]
    }

    fn supports_images(&self) -> bool {
        self.image_reply.is_some()
    }

    fn generate_text<'a>(&'a self, request: TextRequest) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            if let Ok(mut requests) = self.text_requests.lock() {
                requests.push(request);
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.text_reply.clone().ok_or_else(unavailable)
        })
    }

    fn generate_image<'a>(
        &'a self,
        request: ImageRequest,
    ) -> BoxFuture<'a, ProviderResult<ImageRef>> {
        Box::pin(async move {
            if let Ok(mut requests) = self.image_requests.lock() {
                requests.push(request);
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.image_reply
                .clone()
                .map(ImageRef::new)
                .ok_or_else(unavailable)
        })
    }
}

/// Holds every call open until the test releases it.
pub(crate) struct GatedProvider {
    reply: String,
    started: Notify,
    gate: Notify,
}

impl GatedProvider {
    pub(crate) fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            started: Notify::new(),
            gate: Notify::new(),
        }
    }

    /// Resolves once a call has reached the provider.
    pub(crate) async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Lets one waiting call complete.
    pub(crate) fn release(&self) {
        self.gate.notify_one();
    }
}

impl GenerationProvider for GatedProvider {
    fn id(&self) -> &str {
        "gated"
    }

    fn name(&self) -> &str {
        "Gated"
    }

    fn default_model(&self) -> &str {
        "test-model"
    }

    fn fallback_models(&self) -> &[Model] {
        &[]
    }

    fn supports_images(&self) -> bool {
        true
    }

    fn generate_text<'a>(&'a self, _request: TextRequest) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            self.started.notify_one();
            self.gate.notified().await;
            Ok(self.reply.clone())
        })
    }

    fn generate_image<'a>(
        &'a self,
        _request: ImageRequest,
    ) -> BoxFuture<'a, ProviderResult<ImageRef>> {
        Box::pin(async move {
            self.started.notify_one();
            self.gate.notified().await;
            Ok(ImageRef::new(self.reply.clone()))
        })
    }
}
