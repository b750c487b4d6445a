use crate::error::{AppError, AppResult};
use crate::relay::engine::HealthSnapshot;
use crate::relay::rooms::{normalize_room_id, Member, RoomSummary};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;
use std::process;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    relay: HealthSnapshot,
    /// Seconds since startup
    uptime: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomDetail {
    #[serde(flatten)]
    summary: RoomSummary,
    members: Vec<Member>,
}

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        relay: state.engine.health(),
        uptime: state.get_uptime_seconds(),
    })
}

pub async fn stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.engine.stats())
}

/// `GET /api/v1/stats/{room_id}`: one room with its members.
pub async fn room_stats(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let room_id = normalize_room_id(&path.into_inner());
    if room_id.is_empty() {
        return Err(AppError::BadRequest("room id must not be blank".to_string()));
    }

    let rooms = &state.engine.services().rooms;
    let summary = rooms
        .summaries()
        .into_iter()
        .find(|summary| summary.room_id == room_id)
        .ok_or_else(|| AppError::NotFound(format!("room '{}' does not exist", room_id)))?;

    Ok(HttpResponse::Ok().json(RoomDetail {
        members: rooms.members(&room_id),
        summary,
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let services = state.engine.services();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    let providers: Vec<_> = services
        .providers
        .metrics()
        .into_iter()
        .map(|m| -> Result<serde_json::Value, serde_json::Error> {
            let success_rate = m.success_rate();
            let average_latency_ms = m.average_latency_ms();
            let mut value = serde_json::to_value(m)?;
            value["success_rate"] = json!(success_rate);
            value["average_latency_ms"] = json!(average_latency_ms);
            Ok(value)
        })
        .collect::<Result<_, _>>()?;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "http": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            },
            "endpoints": endpoint_stats,
        },
        "connections": {
            "active": metrics.active_connections,
            "total": metrics.total_connections,
            "registered": state.hub.len(),
        },
        "relay": state.engine.counters(),
        "rate_limiter": {
            "tracked_connections": services.limiter.tracked_connections(),
        },
        "cache": services.cache.stats(),
        "providers": providers,
        "memory": get_memory_info(),
    })))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) {
            let field_bytes = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
                    .unwrap_or(0)
            };

            return json!({
                "resident_memory_bytes": field_bytes("VmRSS:"),
                "virtual_memory_bytes": field_bytes("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "pid": process::id(),
        "available": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::relay::events::JoinRoom;
    use actix_web::{test, App};

    fn state_with_room() -> AppState {
        let state = AppState::new(AppConfig::default());
        for (id, language) in [("a", "English"), ("b", "Spanish")] {
            state.engine.join(
                id,
                JoinRoom {
                    room_id: "Lobby".into(),
                    language: language.into(),
                },
            );
        }
        state
    }

    #[actix_web::test]
    async fn test_health_reports_rooms_and_offline_mode() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state_with_room()))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request()).await;

        assert_eq!(body["status"], "ok");
        assert_eq!(body["activeRoomCount"], 1);
        assert_eq!(body["totalMemberCount"], 2);
        assert_eq!(body["cacheSize"], 0);
        assert_eq!(body["offlineMode"], true);
        assert!(body["uptime"].is_u64());
    }

    #[actix_web::test]
    async fn test_stats_lists_rooms() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state_with_room()))
                .route("/stats", web::get().to(stats)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/stats").to_request()).await;

        assert_eq!(body["totalRooms"], 1);
        assert_eq!(body["rooms"][0]["roomId"], "lobby");
        assert_eq!(body["rooms"][0]["memberCount"], 2);
        assert_eq!(body["rooms"][0]["languages"], json!(["English", "Spanish"]));
    }

    #[actix_web::test]
    async fn test_room_stats_found_and_missing() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state_with_room()))
                .route("/stats/{room_id}", web::get().to(room_stats)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/stats/LOBBY").to_request()).await;
        assert_eq!(body["roomId"], "lobby");
        assert_eq!(body["members"][1]["connectionId"], "b");

        let response = test::call_service(&app, test::TestRequest::get().uri("/stats/attic").to_request()).await;
        assert_eq!(response.status(), actix_web::http::StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_metrics_include_providers_and_cache() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(AppConfig::default())))
                .route("/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/metrics").to_request()).await;

        assert_eq!(body["cache"]["capacity"], 1000);
        assert_eq!(body["providers"].as_array().map(|p| p.len()), Some(3));
        assert_eq!(body["connections"]["active"], 0);
    }
}
