//! # Speech and Translation Providers
//!
//! Every external backend implements one or more capability traits:
//!
//! - [`SpeechToText`]: `transcribe(audio, language_hint) -> text`
//! - [`Translator`]: `translate(text, source, target) -> text`
//! - [`SpeechSynthesizer`]: `synthesize(text, language) -> audio`
//!
//! Backends are black boxes to the relay. A [`ProviderChain`] holds an ordered
//! list of them per capability and falls back from one to the next on error
//! or timeout. Which backends go in which chain is decided by configuration
//! in [`ProviderSet::from_config`], so adding a provider never touches the
//! relay engine.
//!
//! ## Offline mode:
//! If no backend of a capability has credentials, the chain is made of the
//! deterministic [`mock`] provider instead. That keeps the relay usable in
//! development, and it is always logged as a configuration warning.

pub mod chain;
pub mod language;
pub mod libretranslate;
pub mod mock;
pub mod openai;

pub use chain::{ProviderChain, ProviderMetrics};

use crate::config::ProvidersConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Common surface of every backend.
pub trait Provider: Send + Sync {
    /// Short name used in logs and metrics ("openai", "mock", ...)
    fn name(&self) -> &str;
}

#[async_trait]
pub trait SpeechToText: Provider {
    async fn transcribe(&self, audio: &[u8], language_hint: &str) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait Translator: Provider {
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Provider {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, ProviderError>;
}

/// The three things a chain can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Transcription,
    Translation,
    SpeechSynthesis,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Transcription => write!(f, "transcription"),
            Capability::Translation => write!(f, "translation"),
            Capability::SpeechSynthesis => write!(f, "speech synthesis"),
        }
    }
}

pub type SttChain = ProviderChain<dyn SpeechToText>;
pub type TranslationChain = ProviderChain<dyn Translator>;
pub type TtsChain = ProviderChain<dyn SpeechSynthesizer>;

impl ProviderChain<dyn SpeechToText> {
    pub async fn transcribe(&self, audio: &[u8], language_hint: &str) -> Result<String, crate::error::RelayError> {
        self.invoke(|provider| provider.transcribe(audio, language_hint)).await
    }
}

impl ProviderChain<dyn Translator> {
    pub async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, crate::error::RelayError> {
        self.invoke(|provider| provider.translate(text, source_language, target_language))
            .await
    }
}

impl ProviderChain<dyn SpeechSynthesizer> {
    pub async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, crate::error::RelayError> {
        self.invoke(|provider| provider.synthesize(text, language)).await
    }
}

/// The three chains the relay engine works with.
pub struct ProviderSet {
    pub stt: SttChain,
    pub translation: TranslationChain,
    pub tts: TtsChain,
}

impl ProviderSet {
    /// Build every chain from configuration.
    ///
    /// ## Assembly rules:
    /// 1. Providers are added in the configured order
    /// 2. A provider without credentials is skipped with a warning
    /// 3. An empty chain falls back to the mock provider (offline mode)
    /// 4. `mock_fallback = true` appends the mock provider to every chain
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let timeout = config.timeout();
        let http = reqwest::Client::new();
        let mock = Arc::new(mock::MockProvider);

        let openai = config.openai.api_key.as_ref().filter(|k| !k.trim().is_empty()).map(|key| {
            Arc::new(openai::OpenAiProvider::new(http.clone(), key.clone(), &config.openai))
        });
        let libretranslate = config.libretranslate.url.as_ref().filter(|u| !u.trim().is_empty()).map(|url| {
            Arc::new(libretranslate::LibreTranslateProvider::new(
                http.clone(),
                url.clone(),
                config.libretranslate.api_key.clone(),
            ))
        });

        let mut stt: Vec<Arc<dyn SpeechToText>> = Vec::new();
        for name in &config.stt {
            match name.as_str() {
                "openai" if openai.is_some() => stt.extend(openai.iter().map(|p| p.clone() as Arc<dyn SpeechToText>)),
                "mock" => stt.push(mock.clone()),
                _ => warn!(provider = %name, "Speech-to-text provider has no credentials, skipping"),
            }
        }

        let mut translation: Vec<Arc<dyn Translator>> = Vec::new();
        for name in &config.translation {
            match name.as_str() {
                "openai" if openai.is_some() => {
                    translation.extend(openai.iter().map(|p| p.clone() as Arc<dyn Translator>))
                }
                "libretranslate" if libretranslate.is_some() => {
                    translation.extend(libretranslate.iter().map(|p| p.clone() as Arc<dyn Translator>))
                }
                "mock" => translation.push(mock.clone()),
                _ => warn!(provider = %name, "Translation provider has no credentials, skipping"),
            }
        }

        let mut tts: Vec<Arc<dyn SpeechSynthesizer>> = Vec::new();
        for name in &config.tts {
            match name.as_str() {
                "openai" if openai.is_some() => tts.extend(openai.iter().map(|p| p.clone() as Arc<dyn SpeechSynthesizer>)),
                "mock" => tts.push(mock.clone()),
                _ => warn!(provider = %name, "Speech synthesis provider has no credentials, skipping"),
            }
        }

        let mock_stt: Arc<dyn SpeechToText> = mock.clone();
        let mock_translation: Arc<dyn Translator> = mock.clone();
        let mock_tts: Arc<dyn SpeechSynthesizer> = mock;

        let set = Self {
            stt: finish_chain(Capability::Transcription, stt, mock_stt, config.mock_fallback, timeout),
            translation: finish_chain(Capability::Translation, translation, mock_translation, config.mock_fallback, timeout),
            tts: finish_chain(Capability::SpeechSynthesis, tts, mock_tts, config.mock_fallback, timeout),
        };

        info!(
            stt = ?set.stt.provider_names(),
            translation = ?set.translation.provider_names(),
            tts = ?set.tts.provider_names(),
            "Provider chains ready"
        );
        set
    }

    /// True when any capability is served only by the mock provider.
    pub fn is_offline(&self) -> bool {
        self.stt.is_mock_only() || self.translation.is_mock_only() || self.tts.is_mock_only()
    }

    pub fn metrics(&self) -> Vec<ProviderMetrics> {
        let mut all = self.stt.metrics();
        all.extend(self.translation.metrics());
        all.extend(self.tts.metrics());
        all
    }
}

/// Apply the offline / mock-fallback rules and wrap the list in a chain.
fn finish_chain<P: ?Sized + Provider>(
    capability: Capability,
    mut providers: Vec<Arc<P>>,
    mock: Arc<P>,
    mock_fallback: bool,
    timeout: std::time::Duration,
) -> ProviderChain<P> {
    let has_mock = providers.iter().any(|p| p.name() == mock::MOCK_PROVIDER_NAME);

    if providers.is_empty() {
        warn!(
            capability = %capability,
            "No credentials configured; running in OFFLINE mode with deterministic stub output"
        );
        providers.push(mock);
    } else if mock_fallback && !has_mock {
        warn!(
            capability = %capability,
            "mock_fallback enabled; stub output will be delivered if every live provider fails"
        );
        providers.push(mock);
    }

    ProviderChain::new(capability, providers, timeout)
}
