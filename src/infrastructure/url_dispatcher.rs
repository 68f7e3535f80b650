use crate::infrastructure::error::BridgeError;
use async_trait::async_trait;
use std::sync::Mutex;
use url::Url;

#[async_trait]
pub trait UrlDispatcher: Send + Sync {
    async fn dispatch(&self, url: &Url) -> Result<(), BridgeError>;
}

/// Hands the URL to the operating system, which routes `bear://` to Bear.
#[derive(Debug, Clone, Default)]
pub struct SystemUrlDispatcher;

#[async_trait]
impl UrlDispatcher for SystemUrlDispatcher {
    async fn dispatch(&self, url: &Url) -> Result<(), BridgeError> {
        let target = url.to_string();
        tokio::task::spawn_blocking(move || open::that(&target))
            .await
            .map_err(|error| BridgeError::Dispatch(format!("dispatch task failed: {error}")))?
            .map_err(|error| BridgeError::Dispatch(format!("failed to open url: {error}")))
    }
}

#[derive(Debug, Default)]
pub struct RecordingUrlDispatcher {
    dispatched: Mutex<Vec<Url>>,
}

impl RecordingUrlDispatcher {
    pub fn dispatched(&self) -> Vec<Url> {
        self.dispatched
            .lock()
            .map(|urls| urls.clone())
            .unwrap_or_default()
    }

    pub fn take(&self) -> Vec<Url> {
        self.dispatched
            .lock()
            .map(|mut urls| std::mem::take(&mut *urls))
            .unwrap_or_default()
    }
}

#[async_trait]
impl UrlDispatcher for RecordingUrlDispatcher {
    async fn dispatch(&self, url: &Url) -> Result<(), BridgeError> {
        let mut dispatched = self
            .dispatched
            .lock()
            .map_err(|error| BridgeError::Dispatch(format!("recording lock poisoned: {error}")))?;
        dispatched.push(url.clone());
        Ok(())
    }
}

/// Refuses every URL containing `needle` (an empty needle refuses all) and
/// records the rest.
#[derive(Debug, Default)]
pub struct FailingUrlDispatcher {
    needle: String,
    delivered: RecordingUrlDispatcher,
}

impl FailingUrlDispatcher {
    pub fn failing_on(needle: impl Into<String>) -> Self {
        Self {
            needle: needle.into(),
            delivered: RecordingUrlDispatcher::default(),
        }
    }

    pub fn dispatched(&self) -> Vec<Url> {
        self.delivered.dispatched()
    }

    pub fn take(&self) -> Vec<Url> {
        self.delivered.take()
    }
}

#[async_trait]
impl UrlDispatcher for FailingUrlDispatcher {
    async fn dispatch(&self, url: &Url) -> Result<(), BridgeError> {
        if url.as_str().contains(&self.needle) {
            return Err(BridgeError::Dispatch(format!("refused to open {url}")));
        }
        self.delivered.dispatch(url).await
    }
}
