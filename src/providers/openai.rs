//! OpenAI backends: Whisper transcription, chat-completion translation and
//! text-to-speech.

use super::language::{language_code, voice_for};
use super::{Provider, SpeechSynthesizer, SpeechToText, Translator};
use crate::config::OpenAiConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

/// OpenAI API client implementing all three capabilities.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    transcription_model: String,
    translation_model: String,
    speech_model: String,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, api_key: String, config: &OpenAiConfig) -> Self {
        Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            transcription_model: config.transcription_model.clone(),
            translation_model: config.translation_model.clone(),
            speech_model: config.speech_model.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Turn a non-2xx response into a provider failure with the body attached.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::failure(format!("OpenAI returned {}: {}", status, body)))
    }
}

impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    speed: f32,
}

fn translation_prompt(source_language: &str, target_language: &str) -> String {
    format!(
        "You are a professional translator. Translate the following text from {} to {}. \
         Provide ONLY the translation, no explanations or additional text. \
         Preserve the tone, emotion, and context of the original message.",
        source_language, target_language
    )
}

#[async_trait]
impl SpeechToText for OpenAiProvider {
    async fn transcribe(&self, audio: &[u8], language_hint: &str) -> Result<String, ProviderError> {
        let file = Part::bytes(audio.to_vec())
            .file_name("audio.webm")
            .mime_str("audio/webm")?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.transcription_model.clone())
            .text("language", language_code(language_hint))
            .text("response_format", "json");

        let response = self
            .client
            .post(self.url("audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let parsed: TranscriptionResponse = Self::check(response).await?.json().await?;
        Ok(parsed.text)
    }
}

#[async_trait]
impl Translator for OpenAiProvider {
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.translation_model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: translation_prompt(source_language, target_language),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: text.to_string(),
                },
            ],
            temperature: 0.3,
            max_tokens: 1000,
        };

        let response = self
            .client
            .post(self.url("chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let parsed: ChatResponse = Self::check(response).await?.json().await?;
        let translation = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .ok_or_else(|| ProviderError::failure("OpenAI returned no choices"))?;

        if translation.is_empty() {
            return Err(ProviderError::failure("OpenAI returned an empty translation"));
        }
        Ok(translation)
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiProvider {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, ProviderError> {
        let request = SpeechRequest {
            model: &self.speech_model,
            voice: voice_for(language),
            input: text,
            speed: 1.0,
        };

        let response = self
            .client
            .post(self.url("audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let bytes = Self::check(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_urls_ignore_trailing_slash() {
        let mut config = AppConfig::default().providers.openai;
        config.base_url = "http://localhost:9999/v1/".to_string();
        let provider = OpenAiProvider::new(reqwest::Client::new(), "sk-test".into(), &config);
        assert_eq!(provider.url("chat/completions"), "http://localhost:9999/v1/chat/completions");
    }

    #[test]
    fn test_translation_prompt_names_both_languages() {
        let prompt = translation_prompt("English", "Spanish");
        assert!(prompt.contains("from English to Spanish"));
    }

    #[test]
    fn test_speech_request_shape() {
        let request = SpeechRequest { model: "tts-1", voice: voice_for("French"), input: "Bonjour", speed: 1.0 };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["voice"], "shimmer");
        assert_eq!(json["input"], "Bonjour");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_a_failure() {
        let mut config = AppConfig::default().providers.openai;
        // Nothing listens on port 9 locally
        config.base_url = "http://127.0.0.1:9".to_string();
        let provider = OpenAiProvider::new(reqwest::Client::new(), "sk-test".into(), &config);
        let result = provider.translate("Hello", "English", "Spanish").await;
        assert!(matches!(result, Err(ProviderError::Failure(_))));
    }
}
