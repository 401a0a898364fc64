use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{error, warn};

/// Log failed requests on the way out: 4xx as client errors, 5xx as server
/// errors. Successful content responses stay quiet here; the security
/// event sink covers the interesting ones.
pub async fn log_request_errors(req: Request<Body>, next: Next) -> Response {
    let uri = req.uri().clone();
    let method = req.method().clone();
    let started = Instant::now();

    let response = next.run(req).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if status.is_client_error() {
        warn!(
            method = %method,
            uri = %uri,
            status = %status,
            elapsed_ms,
            "Client error"
        );
    } else if status.is_server_error() {
        error!(
            method = %method,
            uri = %uri,
            status = %status,
            elapsed_ms,
            "Server error"
        );
    }

    response
}
