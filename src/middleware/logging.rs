//! Connection logging for the HTTP side of the bridge.
//!
//! Media streams arrive as ordinary HTTP requests that upgrade to WebSocket,
//! so this logs each one with a request id and whether it asked for an
//! upgrade. Refused upgrades (e.g. the call limit) are logged at warn.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct ConnectionLogging;

impl<S, B> Transform<S, ServiceRequest> for ConnectionLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = ConnectionLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ConnectionLoggingMiddleware { service }))
    }
}

pub struct ConnectionLoggingMiddleware<S> {
    service: S,
}

/// True when the request asks to switch to the WebSocket protocol.
fn is_websocket_upgrade(req: &ServiceRequest) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

impl<S, B> Service<ServiceRequest> for ConnectionLoggingMiddleware<S>
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
        let request_id = Uuid::new_v4().to_string();
        let method = req.method().to_string();
        let uri = req.uri().to_string();
        let upgrade = is_websocket_upgrade(&req);
        let remote_addr = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();

        info!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            remote_addr = %remote_addr,
            upgrade,
            "Connection request"
        );

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            match &result {
                Ok(response) if response.status().is_client_error() || response.status().is_server_error() => {
                    warn!(
                        request_id = %request_id,
                        uri = %uri,
                        status = response.status().as_u16(),
                        duration_ms,
                        "Connection refused"
                    );
                }
                Ok(response) => {
                    info!(
                        request_id = %request_id,
                        uri = %uri,
                        status = response.status().as_u16(),
                        duration_ms,
                        upgrade,
                        "Connection accepted"
                    );
                }
                Err(err) => {
                    error!(
                        request_id = %request_id,
                        uri = %uri,
                        remote_addr = %remote_addr,
                        duration_ms,
                        error = %err,
                        "Connection failed"
                    );
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, web, App, HttpResponse};

    #[actix_web::test]
    async fn test_passes_responses_through() {
        let app = test::init_service(
            App::new()
                .wrap(ConnectionLogging)
                .route("/ok", web::get().to(|| async { HttpResponse::Ok().finish() }))
                .route("/busy", web::get().to(|| async { HttpResponse::ServiceUnavailable().finish() })),
        )
        .await;

        let ok = test::call_service(&app, test::TestRequest::get().uri("/ok").to_request()).await;
        assert_eq!(ok.status(), StatusCode::OK);

        let busy = test::call_service(&app, test::TestRequest::get().uri("/busy").to_request()).await;
        assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_detects_websocket_upgrade() {
        let upgrade = test::TestRequest::get()
            .insert_header((header::UPGRADE, "WebSocket"))
            .to_srv_request();
        assert!(is_websocket_upgrade(&upgrade));

        let plain = test::TestRequest::get().to_srv_request();
        assert!(!is_websocket_upgrade(&plain));
    }
}
