use crate::app_state::AppState;
use crate::catalog::{
    AssetRecord, MediaCatalog, MediaRecord, ProjectRecord, ResourceKind, Variant,
};
use crate::error::DeliveryError;
use crate::events::{EventType, SecurityEvent, Severity};
use crate::hotlink::HotlinkDecision;
use crate::rate_limit::RateTier;
use crate::session::{Principal, SessionKind, session_id_from_cookie};
use crate::token::AccessToken;
use axum::body::Body;
use axum::extract::{ConnectInfo, Extension, Path as AxumPath, Query};
use axum::http::{HeaderMap, Response, StatusCode, header};
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
pub struct ContentQuery {
    #[serde(default)]
    pub download: Option<bool>,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub asset: Option<String>,
}

/// Client address for rate limiting and blocklists. The first
/// `X-Forwarded-For` hop is only honored when the deployment declares a
/// trusted reverse proxy in front; a direct client could otherwise spoof
/// its way past the IP gates.
fn client_ip(trust_forwarded_for: bool, headers: &HeaderMap, addr: &SocketAddr) -> String {
    if trust_forwarded_for
        && let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    {
        return forwarded;
    }
    addr.ip().to_string()
}

/// Resolve the caller to a `Principal`: admin bearer credential first,
/// then the session cookie. This is the only place the cookie is read.
async fn resolve_principal(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Principal, DeliveryError> {
    if let Some(auth) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        && let Some(presented) = auth.strip_prefix("Bearer ")
    {
        return match &state.admin_api_key {
            Some(key) if presented == key => Ok(Principal::Admin),
            _ => Err(DeliveryError::Unauthenticated),
        };
    }

    let session_id = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(session_id_from_cookie)
        .ok_or(DeliveryError::Unauthenticated)?;

    let record = state
        .sessions
        .load(session_id)
        .await
        .map_err(|error| DeliveryError::Internal(error.to_string()))?
        .ok_or(DeliveryError::Unauthenticated)?;

    Ok(match record.kind {
        SessionKind::Share => Principal::Share {
            session_id: record.session_id,
        },
        SessionKind::Guest => Principal::Guest {
            session_id: record.session_id,
        },
    })
}

/// `GET /content/{token}?download={bool}&variant={name}&asset={id}`
///
/// The single external endpoint. Every gate runs in a fixed order: token,
/// rate limits, session membership, hotlink check, variant policy, stream.
pub async fn serve_content(
    Extension(state): Extension<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    AxumPath(token): AxumPath<String>,
    Query(query): Query<ContentQuery>,
    headers: HeaderMap,
) -> Result<Response<Body>, Infallible> {
    let ip = client_ip(state.trust_forwarded_for, &headers, &addr);

    match serve_content_inner(&state, &ip, &token, &query, &headers).await {
        Ok(res) => Ok(res),
        Err(err) => {
            debug!(%ip, error = %err, "Content request rejected");
            Ok(err.into_response())
        }
    }
}

async fn serve_content_inner(
    state: &AppState,
    ip: &str,
    token: &str,
    query: &ContentQuery,
    headers: &HeaderMap,
) -> Result<Response<Body>, DeliveryError> {
    let principal = resolve_principal(state, headers).await?;

    let record = match state.tokens.verify(token, &principal).await {
        Ok(record) => record,
        Err(err) => {
            if matches!(err, DeliveryError::AccessDenied(_)) {
                state.events.record(
                    SecurityEvent::new(EventType::AccessDenied, Severity::Warning, err.to_string())
                        .ip(ip)
                        .blocked(),
                );
            }
            return Err(err);
        }
    };

    // Admin access skips the session binding but must still prove the
    // project is live.
    if principal.is_admin() && state.catalog.project(&record.project_id).await.is_none() {
        state.events.record(
            SecurityEvent::new(
                EventType::AccessDenied,
                Severity::Warning,
                "admin access to removed project",
            )
            .ip(ip)
            .project(&record.project_id)
            .blocked(),
        );
        return Err(DeliveryError::AccessDenied("project removed"));
    }

    check_rate_limits(state, ip, &principal, &record).await?;
    check_session_access(state, ip, &principal, &record).await?;
    check_hotlink(state, ip, &principal, &record, headers).await?;

    let resolved = resolve_request(state, &principal, &record, query).await?;

    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());

    match state.streamer.serve(&resolved, range).await {
        Ok(res) => {
            state.events.record(
                SecurityEvent::new(
                    EventType::ContentServed,
                    Severity::Info,
                    format!("variant {}", record.variant),
                )
                .ip(ip)
                .project(&record.project_id)
                .resource(&record.resource_id),
            );
            Ok(res)
        }
        Err(err) => {
            if matches!(err, DeliveryError::Internal(_)) {
                state.events.record(
                    SecurityEvent::new(EventType::StreamError, Severity::Critical, err.to_string())
                        .ip(ip)
                        .resource(&record.resource_id),
                );
            }
            Err(err)
        }
    }
}

/// IP tier first (the high ceiling), then the session tier. Admin requests
/// carry no session and only count against the IP tier.
async fn check_rate_limits(
    state: &AppState,
    ip: &str,
    principal: &Principal,
    record: &AccessToken,
) -> Result<(), DeliveryError> {
    if let Err(err) = state.rate_limiter.check(RateTier::Ip, ip).await {
        state.events.record(
            SecurityEvent::new(EventType::RateLimitHit, Severity::Warning, "ip tier")
                .ip(ip)
                .project(&record.project_id)
                .blocked(),
        );
        return Err(err);
    }

    if let Some(session_id) = principal.session_id()
        && let Err(err) = state.rate_limiter.check(RateTier::Session, session_id).await
    {
        // Session-tier hits happen during aggressive scrubbing, hence the
        // lower severity.
        state.events.record(
            SecurityEvent::new(EventType::RateLimitHit, Severity::Info, "session tier")
                .ip(ip)
                .session(session_id)
                .blocked(),
        );
        return Err(err);
    }

    Ok(())
}

async fn check_session_access(
    state: &AppState,
    ip: &str,
    principal: &Principal,
    record: &AccessToken,
) -> Result<(), DeliveryError> {
    let Some(session_id) = principal.session_id() else {
        return Ok(());
    };

    let allowed = state
        .sessions
        .has_access(session_id, &record.project_id)
        .await
        .map_err(|error| DeliveryError::Internal(error.to_string()))?;

    if !allowed {
        state.events.record(
            SecurityEvent::new(
                EventType::AccessDenied,
                Severity::Warning,
                "session lacks project grant",
            )
            .ip(ip)
            .session(session_id)
            .project(&record.project_id)
            .blocked(),
        );
        return Err(DeliveryError::AccessDenied("no project grant"));
    }

    // Sliding expiration on each authorized access.
    _ = state.sessions.touch(session_id).await;
    Ok(())
}

async fn check_hotlink(
    state: &AppState,
    ip: &str,
    principal: &Principal,
    record: &AccessToken,
    headers: &HeaderMap,
) -> Result<(), DeliveryError> {
    let referer = headers.get(header::REFERER).and_then(|v| v.to_str().ok());
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let scope = principal.session_id().unwrap_or("admin");

    let decision = state
        .hotlink
        .evaluate(scope, &record.resource_id, referer, origin, ip)
        .await
        .map_err(|error| DeliveryError::Internal(error.to_string()))?;

    match decision {
        HotlinkDecision::Allow => Ok(()),
        HotlinkDecision::AllowSuspicious { reason } => {
            state.events.record(
                SecurityEvent::new(EventType::HotlinkSuspected, Severity::Warning, reason)
                    .ip(ip)
                    .session(scope)
                    .resource(&record.resource_id),
            );
            Ok(())
        }
        HotlinkDecision::Block { reason } => {
            state.events.record(
                SecurityEvent::new(EventType::HotlinkBlocked, Severity::Warning, reason)
                    .ip(ip)
                    .session(scope)
                    .resource(&record.resource_id)
                    .blocked(),
            );
            Err(DeliveryError::AccessDenied("hotlink blocked"))
        }
    }
}

async fn resolve_request(
    state: &AppState,
    principal: &Principal,
    record: &AccessToken,
    query: &ContentQuery,
) -> Result<crate::policy::ResolvedMedia, DeliveryError> {
    let download = query.download.unwrap_or(false);

    // Asset delivery: either the token was issued for the asset directly,
    // or an asset id rides along on a token from the same project.
    let asset_id = match record.resource_kind {
        ResourceKind::Asset => Some(record.resource_id.clone()),
        _ => query.asset.clone(),
    };

    if let Some(asset_id) = asset_id {
        let asset = state
            .catalog
            .asset(&asset_id)
            .await
            .ok_or(DeliveryError::ResourceNotFound)?;
        if asset.project_id != record.project_id {
            return Err(DeliveryError::AccessDenied("asset outside token scope"));
        }

        let project = state
            .catalog
            .project(&asset.project_id)
            .await
            .ok_or(DeliveryError::ResourceNotFound)?;
        let owning_video = match &asset.video_id {
            Some(video_id) => state.catalog.media(video_id).await,
            None => None,
        };

        return state
            .policy
            .resolve_asset(&asset, owning_video.as_ref(), &project, principal);
    }

    let media = state
        .catalog
        .media(&record.resource_id)
        .await
        .ok_or(DeliveryError::ResourceNotFound)?;
    if media.project_id != record.project_id {
        return Err(DeliveryError::AccessDenied("media outside token scope"));
    }

    // The query may only narrow the token to a lesser variant; streaming
    // quality itself stays bound to what was issued.
    let requested = match &query.variant {
        Some(name) => match name.parse::<Variant>() {
            Ok(v @ (Variant::Thumbnail | Variant::Social | Variant::Full)) => v,
            _ => return Err(DeliveryError::ResourceNotFound),
        },
        None => record.variant,
    };

    state
        .policy
        .resolve_variant(&media, requested, principal, download)
}

//
// Internal control API
//

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub kind: SessionKind,
    #[serde(default)]
    pub project_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub cookie: String,
}

#[axum::debug_handler]
pub async fn create_session(
    Extension(state): Extension<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    let record = match state.sessions.create(request.kind).await {
        Ok(record) => record,
        Err(error) => {
            warn!(?error, "Failed to create session");
            return err_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session");
        }
    };

    for project_id in &request.project_ids {
        if let Err(error) = state
            .sessions
            .grant_project(&record.session_id, project_id)
            .await
        {
            warn!(?error, %project_id, "Failed to grant project");
            return err_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to grant project");
        }
    }

    let cookie = state.sessions.cookie_value(&record.session_id);
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie.clone())],
        Json(CreateSessionResponse {
            session_id: record.session_id,
            cookie,
        }),
    )
        .into_response()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueTokenRequest {
    pub resource_kind: ResourceKind,
    pub resource_id: String,
    pub variant: Variant,
    pub session_id: String,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueTokenResponse {
    pub token: String,
    pub expires_in_secs: u64,
}

#[axum::debug_handler]
pub async fn issue_token(
    Extension(state): Extension<AppState>,
    Json(request): Json<IssueTokenRequest>,
) -> impl IntoResponse {
    if request.resource_id.is_empty() || request.session_id.is_empty() {
        warn!("resource_id or session_id is empty");
        return err_response(
            StatusCode::BAD_REQUEST,
            "resource_id and session_id are required",
        );
    }

    // Tokens are only issued for resources the catalog knows about; the
    // project binding derives from the catalog row, never from the caller.
    let project_id = match request.resource_kind {
        ResourceKind::Asset => match state.catalog.asset(&request.resource_id).await {
            Some(asset) => asset.project_id,
            None => return err_response(StatusCode::NOT_FOUND, "Unknown asset"),
        },
        _ => match state.catalog.media(&request.resource_id).await {
            Some(media) => media.project_id,
            None => return err_response(StatusCode::NOT_FOUND, "Unknown resource"),
        },
    };

    let ttl = Duration::from_secs(request.ttl_secs.unwrap_or(state.token_ttl.as_secs()));

    match state
        .tokens
        .issue(
            request.resource_kind,
            &request.resource_id,
            &project_id,
            request.variant,
            &request.session_id,
            ttl,
        )
        .await
    {
        Ok(record) => {
            state.events.record(
                SecurityEvent::new(
                    EventType::TokenIssued,
                    Severity::Info,
                    format!("variant {}", record.variant),
                )
                .session(&record.session_id)
                .project(&record.project_id)
                .resource(&record.resource_id),
            );
            (
                StatusCode::OK,
                Json(IssueTokenResponse {
                    token: record.token,
                    expires_in_secs: record.ttl_secs,
                }),
            )
                .into_response()
        }
        Err(error) => {
            warn!(?error, "Failed to issue token");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to issue token")
        }
    }
}

#[axum::debug_handler]
pub async fn revoke_token(
    Extension(state): Extension<AppState>,
    AxumPath(token): AxumPath<String>,
) -> impl IntoResponse {
    match state.tokens.revoke(&token).await {
        Ok(()) => {
            state.events.record(SecurityEvent::new(
                EventType::TokenRevoked,
                Severity::Info,
                "explicit revocation",
            ));
            StatusCode::NO_CONTENT.into_response()
        }
        Err(error) => {
            warn!(?error, "Failed to revoke token");
            err_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to revoke token")
        }
    }
}

#[axum::debug_handler]
pub async fn register_project(
    Extension(state): Extension<AppState>,
    Json(record): Json<ProjectRecord>,
) -> impl IntoResponse {
    debug!(project_id = %record.id, "Project registered");
    state.catalog.upsert_project(record);
    StatusCode::NO_CONTENT
}

#[axum::debug_handler]
pub async fn register_media(
    Extension(state): Extension<AppState>,
    Json(record): Json<MediaRecord>,
) -> impl IntoResponse {
    debug!(media_id = %record.id, project_id = %record.project_id, "Media registered");
    state.catalog.upsert_media(record);
    StatusCode::NO_CONTENT
}

#[axum::debug_handler]
pub async fn register_asset(
    Extension(state): Extension<AppState>,
    Json(record): Json<AssetRecord>,
) -> impl IntoResponse {
    debug!(asset_id = %record.id, project_id = %record.project_id, "Asset registered");
    state.catalog.upsert_asset(record);
    StatusCode::NO_CONTENT
}

#[axum::debug_handler]
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub(crate) fn err_response(status: StatusCode, body_str: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(body_str))
        .unwrap()
}
