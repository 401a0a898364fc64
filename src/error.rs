use axum::body::Body;
use axum::http::{Response, StatusCode, header};
use thiserror::Error;

/// Generic body returned for every denial-class failure so that responses
/// cannot be used as a resource-enumeration oracle.
pub const GENERIC_DENIED: &str = "Access denied";

/// Delivery error taxonomy.
///
/// `AccessDenied`, `Forbidden` and friends are distinct variants so that
/// telemetry stays meaningful, but they all collapse to the same generic
/// client-facing message. Only `RateLimited` exposes machine-readable
/// detail (`Retry-After`).
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// No usable principal on the request (no session cookie, no admin key).
    #[error("unauthenticated")]
    Unauthenticated,

    /// Invalid/expired token, session mismatch, missing project grant,
    /// hotlink block or blocklist hit.
    #[error("access denied: {0}")]
    AccessDenied(&'static str),

    /// A rate-limit tier was exceeded; carries the remaining window time.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Catalog row or backing file is absent.
    #[error("resource not found")]
    ResourceNotFound,

    /// The required file variant has not been produced yet.
    #[error("resource not ready")]
    ResourceNotReady,

    /// Policy violation distinct from authn/authz, e.g. asset downloads
    /// disabled for the project.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Disk I/O or other internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    pub fn status(&self) -> StatusCode {
        match self {
            DeliveryError::Unauthenticated => StatusCode::UNAUTHORIZED,
            DeliveryError::AccessDenied(_) | DeliveryError::Forbidden(_) => StatusCode::FORBIDDEN,
            DeliveryError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            DeliveryError::ResourceNotFound => StatusCode::NOT_FOUND,
            DeliveryError::ResourceNotReady => StatusCode::CONFLICT,
            DeliveryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build the client-facing response. Internal detail never leaks here;
    /// it is logged server-side by the caller.
    pub fn into_response(self) -> Response<Body> {
        let status = self.status();
        let body = match &self {
            DeliveryError::Unauthenticated => "Authentication required",
            DeliveryError::RateLimited { .. } => "Too many requests",
            DeliveryError::ResourceNotFound => "Not found",
            DeliveryError::ResourceNotReady => "Not ready",
            DeliveryError::Internal(_) => "Internal error",
            DeliveryError::AccessDenied(_) | DeliveryError::Forbidden(_) => GENERIC_DENIED,
        };

        let mut builder = Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .header("X-Content-Type-Options", "nosniff");
        if let DeliveryError::RateLimited { retry_after_secs } = &self {
            builder = builder.header(header::RETRY_AFTER, retry_after_secs.to_string());
        }
        builder.body(Body::from(body)).unwrap()
    }
}

impl From<std::io::Error> for DeliveryError {
    fn from(error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::NotFound {
            DeliveryError::ResourceNotFound
        } else {
            DeliveryError::Internal(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_variants_share_generic_body() {
        for err in [
            DeliveryError::AccessDenied("expired token"),
            DeliveryError::AccessDenied("session mismatch"),
            DeliveryError::Forbidden("asset downloads disabled"),
        ] {
            let res = err.into_response();
            assert_eq!(res.status(), StatusCode::FORBIDDEN);
        }
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let res = DeliveryError::RateLimited {
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            DeliveryError::ResourceNotFound.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DeliveryError::ResourceNotReady.status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            DeliveryError::Unauthenticated.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            DeliveryError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
