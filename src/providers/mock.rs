//! Deterministic stand-in for every capability, used in offline mode and as
//! an optional last-resort fallback.

use super::{Provider, SpeechSynthesizer, SpeechToText, Translator};
use crate::error::ProviderError;
use async_trait::async_trait;
use tracing::debug;

pub const MOCK_PROVIDER_NAME: &str = "mock";

pub const MOCK_TRANSCRIPT: &str = "Hello, this is a simulated transcription from Mock Mode.";

/// Header of an empty 16-bit mono 44.1kHz WAV file.
pub const SILENT_WAV: [u8; 44] = [
    0x52, 0x49, 0x46, 0x46, 0x24, 0x00, 0x00, 0x00, // "RIFF", chunk size
    0x57, 0x41, 0x56, 0x45, 0x66, 0x6d, 0x74, 0x20, // "WAVE", "fmt "
    0x10, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, // PCM, mono
    0x44, 0xac, 0x00, 0x00, 0x88, 0x58, 0x01, 0x00, // 44100 Hz, byte rate
    0x02, 0x00, 0x10, 0x00, 0x64, 0x61, 0x74, 0x61, // block align, 16 bit, "data"
    0x00, 0x00, 0x00, 0x00,
];

#[derive(Debug, Clone, Copy, Default)]
pub struct MockProvider;

impl Provider for MockProvider {
    fn name(&self) -> &str {
        MOCK_PROVIDER_NAME
    }
}

#[async_trait]
impl SpeechToText for MockProvider {
    async fn transcribe(&self, audio: &[u8], language_hint: &str) -> Result<String, ProviderError> {
        debug!(bytes = audio.len(), language = %language_hint, "[MOCK] transcribing audio");
        Ok(MOCK_TRANSCRIPT.to_string())
    }
}

#[async_trait]
impl Translator for MockProvider {
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, ProviderError> {
        debug!(from = %source_language, to = %target_language, "[MOCK] translating text");
        Ok(format!("[MOCK] Translated \"{}\" to {}", text, target_language))
    }
}

#[async_trait]
impl SpeechSynthesizer for MockProvider {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, ProviderError> {
        debug!(chars = text.len(), language = %language, "[MOCK] synthesizing speech");
        Ok(SILENT_WAV.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_output_is_deterministic() {
        let mock = MockProvider;
        let first = mock.translate("Hello", "English", "Spanish").await.unwrap();
        let second = mock.translate("Hello", "English", "Spanish").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "[MOCK] Translated \"Hello\" to Spanish");

        assert_eq!(mock.transcribe(&[0u8; 200], "English").await.unwrap(), MOCK_TRANSCRIPT);

        let wav = mock.synthesize("Hola", "Spanish").await.unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(wav.len(), 44);
    }
}
