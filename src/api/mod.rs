pub mod middleware;
pub mod routes;

pub use middleware::log_request_errors;
pub use routes::{
    create_session, healthz, issue_token, register_asset, register_media, register_project,
    revoke_token, serve_content,
};
