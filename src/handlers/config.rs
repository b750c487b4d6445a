use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/config`: the effective configuration with credentials masked.
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = serde_json::to_value(state.config.redacted())?;
    let providers = state.engine.services().providers.as_ref();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config,
        "active_chains": {
            "stt": providers.stt.provider_names(),
            "translation": providers.translation.provider_names(),
            "tts": providers.tts.provider_names(),
        }
    })))
}
