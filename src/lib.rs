pub mod api;
pub mod app_state;
pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod hotlink;
pub mod kv;
pub mod policy;
pub mod rate_limit;
pub mod session;
pub mod stream;
pub mod token;

use axum::Router;
use axum::extract::Extension;
use axum::routing::{delete, get, post};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tracing::info;

//
// Re-export
//
pub use api::{
    create_session, healthz, issue_token, log_request_errors, register_asset, register_media,
    register_project, revoke_token, serve_content,
};
pub use app_state::AppState;
pub use catalog::{AssetRecord, MediaCatalog, MediaRecord, ProjectRecord, ResourceKind, Variant};
pub use config::Config;
pub use error::DeliveryError;
pub use session::{Principal, SessionKind};
pub use token::AccessToken;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let listen_on_port = config.listen_on_port;
    let internal_port = config.internal_port;

    let state = AppState::new(&config)?;

    // CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // External routes: the single token-gated content endpoint. Needs
    // ConnectInfo for the rate-limit and hotlink IP signal.
    let external_app = Router::new()
        .route("/content/{token}", get(serve_content))
        .layer(axum::middleware::from_fn(api::log_request_errors))
        .layer(cors.clone())
        .layer(Extension(state.clone()));

    // Internal routes: session/token lifecycle and catalog registration,
    // reachable only from the trusted network.
    let internal_app = Router::new()
        .route("/sessions", post(create_session))
        .route("/tokens", post(issue_token))
        .route("/tokens/{token}", delete(revoke_token))
        .route("/projects", post(register_project))
        .route("/media", post(register_media))
        .route("/assets", post(register_asset))
        .route("/healthz", get(healthz))
        .layer(axum::middleware::from_fn(api::log_request_errors))
        .layer(cors)
        .layer(Extension(state));

    let external_addr = format!("0.0.0.0:{listen_on_port}");
    info!("External content API listening on {external_addr}");
    let external_listener = TcpListener::bind(&external_addr).await?;

    let internal_addr = format!("0.0.0.0:{internal_port}");
    info!("Internal control API listening on {internal_addr}");
    let internal_listener = TcpListener::bind(&internal_addr).await?;

    // Run both servers concurrently
    tokio::select! {
        result = axum::serve(
            external_listener,
            external_app.into_make_service_with_connect_info::<SocketAddr>(),
        ) => {
            result?;
        }
        result = axum::serve(internal_listener, internal_app) => {
            result?;
        }
    }

    Ok(())
}
