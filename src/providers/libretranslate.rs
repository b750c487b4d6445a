//! LibreTranslate backend (translation only).

use super::language::language_code;
use super::{Provider, Translator};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub struct LibreTranslateProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    translated_text: String,
}

impl LibreTranslateProvider {
    pub fn new(client: reqwest::Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

impl Provider for LibreTranslateProvider {
    fn name(&self) -> &str {
        "libretranslate"
    }
}

#[async_trait]
impl Translator for LibreTranslateProvider {
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String, ProviderError> {
        let request = TranslateRequest {
            q: text,
            source: language_code(source_language),
            target: language_code(target_language),
            format: "text",
            api_key: self.api_key.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/translate", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::failure(format!("LibreTranslate returned {}: {}", status, body)));
        }

        let parsed: TranslateResponse = response.json().await?;
        Ok(parsed.translated_text)
    }
}
