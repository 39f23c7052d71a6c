// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request middleware: correlation ids, metering-header hygiene, CORS.

use axum::{
    extract::Request,
    http::{HeaderValue, header},
    middleware::Next,
    response::Response,
};
use tower_http::cors::CorsLayer;
use tracing::warn;

/// Correlation identifier fixed by the ingress, carried in request
/// extensions and echoed in the response headers.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

/// Header carrying the caller-supplied correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Fix the request's correlation id: honour `X-Correlation-Id` when present,
/// generate a UUIDv4 otherwise, and echo it on the response.
pub async fn correlation(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(crate::new_correlation_id);

    request.extensions_mut().insert(CorrelationId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

/// Strip every `X-Metering-*` header from browser-originated requests.
///
/// The trusted metering envelope is server-only; a request carrying an
/// `Origin` or `Referer` header crossed the browser boundary and must not
/// be able to present one. Server-to-server callers send neither header.
pub async fn metering_header_hygiene(mut request: Request, next: Next) -> Response {
    let browser_boundary = request.headers().contains_key(header::ORIGIN)
        || request.headers().contains_key(header::REFERER);

    if browser_boundary {
        let mut stripped = 0;
        for name in agw_metering::ENVELOPE_HEADERS {
            if request.headers_mut().remove(name).is_some() {
                stripped += 1;
            }
        }
        if stripped > 0 {
            warn!(stripped, "stripped metering headers at the browser boundary");
        }
    }

    next.run(request).await
}

/// Permissive CORS for the read-only admin surface.
pub fn admin_cors() -> CorsLayer {
    CorsLayer::permissive()
}
