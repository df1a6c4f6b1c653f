pub mod chat;
pub mod error;
pub mod facts;
pub mod hooks;
pub mod language;
pub mod llm;
pub mod name_detector;
pub mod prompt;
pub mod server;

use std::sync::Arc;

pub use facts::{FactLookup, FactMatcher, WikidataLookup};
pub use hooks::{HookRegistry, TranscriptHook};
pub use language::LanguageDetector;
pub use llm::{ChatModel, ModelSettings, OpenAiClient};
pub use name_detector::NameDetector;
pub use prompt::ReplyLimits;
pub use server::RelayServer;

use crate::storage::SessionState;

/// Text classifiers applied to every user message
#[derive(Debug, Clone, Default)]
pub struct Detectors {
    pub names: NameDetector,
    pub language: LanguageDetector,
    pub facts: FactMatcher,
}

#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    /// Turns sent to the model after the system instruction
    pub context_turns: usize,
    pub reply_limits: ReplyLimits,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            context_turns: 10,
            reply_limits: ReplyLimits::default(),
        }
    }
}

/// Shared state handed to every request
#[derive(Clone)]
pub struct RelayState {
    pub sessions: SessionState,
    pub model: Arc<dyn ChatModel>,
    /// `None` disables the fact shortcut
    pub facts: Option<Arc<dyn FactLookup>>,
    pub detectors: Arc<Detectors>,
    pub hooks: HookRegistry,
    pub settings: RelaySettings,
}
