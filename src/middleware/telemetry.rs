//! Request telemetry: one span of structured logging plus endpoint metrics
//! per HTTP request.
//!
//! Every response carries an `x-request-id` header (the client's, if it sent
//! one) so log lines can be matched to requests. WebSocket upgrades are
//! logged when the upgrade completes, not when the socket closes.

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Paths polled by load balancers; logged at debug to keep the log readable.
const QUIET_PATHS: &[&str] = &["/health", "/api/v1/health"];

pub struct RequestTelemetry;

impl<S, B> Transform<S, ServiceRequest> for RequestTelemetry
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestTelemetryService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestTelemetryService { service }))
    }
}

pub struct RequestTelemetryService<S> {
    service: S,
}

fn request_id(req: &ServiceRequest) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

impl<S, B> Service<ServiceRequest> for RequestTelemetryService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let request_id = request_id(&req);
        let method = req.method().to_string();
        let path = req.path().to_string();
        let endpoint = format!("{} {}", method, req.match_pattern().unwrap_or_else(|| path.clone()));
        let remote_addr = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();
        let state = req.app_data::<web::Data<AppState>>().cloned();
        let quiet = QUIET_PATHS.contains(&path.as_str());

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            let status = result.as_ref().map(|response| response.status());
            let is_error = match status {
                Ok(status) => status.is_client_error() || status.is_server_error(),
                Err(_) => true,
            };

            if let Some(state) = &state {
                state.record_endpoint_request(&endpoint, duration_ms, is_error);
            }

            match (&status, quiet) {
                (Ok(status), true) => debug!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    status = status.as_u16(),
                    duration_ms,
                    "Request completed"
                ),
                (Ok(status), false) => info!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    remote_addr = %remote_addr,
                    status = status.as_u16(),
                    duration_ms,
                    "Request completed"
                ),
                (Err(err), _) => warn!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    remote_addr = %remote_addr,
                    duration_ms,
                    error = %err,
                    "Request failed"
                ),
            }

            let mut response = result?;
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App, HttpResponse};

    #[actix_web::test]
    async fn test_requests_are_counted_per_endpoint() {
        let state = AppState::new(AppConfig::default());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .wrap(RequestTelemetry)
                .route("/ok", web::get().to(|| async { HttpResponse::Ok().finish() }))
                .route("/missing", web::get().to(|| async { HttpResponse::NotFound().finish() })),
        )
        .await;

        for uri in ["/ok", "/ok", "/missing"] {
            test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
        }

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 3);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(metrics.endpoint_metrics["GET /ok"].request_count, 2);
        assert_eq!(metrics.endpoint_metrics["GET /missing"].error_count, 1);
    }

    #[actix_web::test]
    async fn test_request_id_is_echoed_or_generated() {
        let app = test::init_service(
            App::new()
                .wrap(RequestTelemetry)
                .route("/ok", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let response = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/ok")
                .insert_header((REQUEST_ID_HEADER, "req-42"))
                .to_request(),
        )
        .await;
        assert_eq!(response.headers().get(REQUEST_ID_HEADER).unwrap(), "req-42");

        let response = test::call_service(&app, test::TestRequest::get().uri("/ok").to_request()).await;
        let generated = response.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(generated).is_ok());
    }
}
