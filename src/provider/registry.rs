//! Provider construction
//!
//! The registry holds a backend factory per provider. Arming invokes only the
//! selected factory, so the other provider is never built, let alone
//! connected.

use super::gemini::GeminiDialect;
use super::link::{LinkParts, LiveLink, TurnDialect};
use super::openai::OpenAiDialect;
use super::{
    AudioOutput, CapabilityProvider, MicrophoneSource, ProviderEvent, ProviderSettings,
    RealtimeBackend,
};
use crate::dispatcher::FunctionCallDispatcher;
use crate::selector::ProviderKind;
use crate::{ConciergeError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Builds the backend for one provider
pub type BackendFactory = Box<dyn FnOnce() -> Arc<dyn RealtimeBackend> + Send>;

/// The single armed provider of a mount
///
/// The variant is fixed at arming time by the turn dialect its link carries.
pub struct ArmedProvider {
    link: LiveLink,
}

#[async_trait]
impl CapabilityProvider for ArmedProvider {
    fn kind(&self) -> ProviderKind {
        self.link.kind()
    }

    async fn start(&self) -> Result<()> {
        self.link.start().await
    }

    async fn stop(&self) -> Result<()> {
        self.link.stop().await
    }

    fn toggle_mute(&self) -> bool {
        self.link.toggle_mute()
    }

    fn is_muted(&self) -> bool {
        self.link.is_muted()
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn push_to_talk(&self, pressed: bool) -> Result<()> {
        self.link.push_to_talk(pressed)
    }

    fn audio_output(&self) -> Option<Arc<dyn AudioOutput>> {
        Some(self.link.audio_output())
    }
}

/// Backend factories plus the shared audio and dispatch collaborators
pub struct ProviderRegistry {
    openai: Option<BackendFactory>,
    gemini: Option<BackendFactory>,
    microphone: Arc<dyn MicrophoneSource>,
    output: Arc<dyn AudioOutput>,
    dispatcher: FunctionCallDispatcher,
}

impl ProviderRegistry {
    pub fn new(
        microphone: Arc<dyn MicrophoneSource>,
        output: Arc<dyn AudioOutput>,
        dispatcher: FunctionCallDispatcher,
    ) -> Self {
        Self {
            openai: None,
            gemini: None,
            microphone,
            output,
            dispatcher,
        }
    }

    /// Register the backend factory for the OpenAI-style provider
    pub fn with_openai<F>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> Arc<dyn RealtimeBackend> + Send + 'static,
    {
        self.openai = Some(Box::new(factory));
        self
    }

    /// Register the backend factory for the Gemini-style provider
    pub fn with_gemini<F>(mut self, factory: F) -> Self
    where
        F: FnOnce() -> Arc<dyn RealtimeBackend> + Send + 'static,
    {
        self.gemini = Some(Box::new(factory));
        self
    }

    /// Microphone used for the mount-time access check
    pub fn microphone(&self) -> Arc<dyn MicrophoneSource> {
        Arc::clone(&self.microphone)
    }

    /// Build the selected provider
    ///
    /// Takes only the selected factory. On error the registry is left as it
    /// was, so arming can be retried.
    pub fn arm(
        &mut self,
        kind: ProviderKind,
        settings: ProviderSettings,
        events: mpsc::UnboundedSender<ProviderEvent>,
    ) -> Result<ArmedProvider> {
        let factory = match kind {
            ProviderKind::OpenAi => self.openai.take(),
            ProviderKind::Gemini => self.gemini.take(),
        }
        .ok_or_else(|| {
            ConciergeError::Config(format!("no backend registered for provider '{}'", kind))
        })?;

        let parts = LinkParts {
            settings,
            backend: factory(),
            microphone: Arc::clone(&self.microphone),
            output: Arc::clone(&self.output),
            dispatcher: self.dispatcher.clone(),
            events,
        };
        let dialect: Arc<dyn TurnDialect> = match kind {
            ProviderKind::OpenAi => Arc::new(OpenAiDialect),
            ProviderKind::Gemini => Arc::new(GeminiDialect),
        };

        info!("Arming {} provider", kind);
        Ok(ArmedProvider {
            link: LiveLink::new(kind, dialect, parts),
        })
    }
}
