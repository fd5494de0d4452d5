//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use crate::engines::styletts2::{SynthesisOrchestrator, SynthesisParams, VoiceStore};

use super::storage::ObjectStore;

/// Request-independent service settings.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub api_key: String,
    pub max_text_chars: usize,
    pub key_prefix: String,
    pub presign_ttl: Duration,
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<ServiceSettings>,
    /// `None` until a model is loaded
    pub orchestrator: Option<SynthesisOrchestrator>,
    pub voices: Arc<VoiceStore>,
    pub store: Arc<dyn ObjectStore>,
    pub synthesis: SynthesisParams,
}

impl AppState {
    pub fn new(
        settings: ServiceSettings,
        orchestrator: Option<SynthesisOrchestrator>,
        voices: Arc<VoiceStore>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        let synthesis = orchestrator
            .as_ref()
            .map(|o| SynthesisParams::from_config(o.model().config()))
            .unwrap_or_default();
        Self {
            settings: Arc::new(settings),
            orchestrator,
            voices,
            store,
            synthesis,
        }
    }

    pub fn model_loaded(&self) -> bool {
        self.orchestrator.is_some()
    }
}
