use crate::catalog::MemoryCatalog;
use crate::config::Config;
use crate::events::SecurityEventLog;
use crate::hotlink::HotlinkDetector;
use crate::kv::{KeyValueStore, MemoryStore};
use crate::policy::AccessPolicy;
use crate::rate_limit::RateLimiter;
use crate::session::SessionRegistry;
use crate::stream::{ChunkCaps, StreamEngine};
use crate::token::TokenService;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Shared per-process state. Cloneable; every handler receives it via
/// `Extension`. All mutable state lives behind the KV store so replicas
/// stay interchangeable.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn KeyValueStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub tokens: TokenService,
    pub sessions: SessionRegistry,
    pub rate_limiter: RateLimiter,
    pub hotlink: HotlinkDetector,
    pub policy: AccessPolicy,
    pub streamer: StreamEngine,
    pub events: SecurityEventLog,

    pub admin_api_key: Option<String>,
    pub token_ttl: Duration,
    pub trust_forwarded_for: bool,
}

impl AppState {
    /// Build the full component graph from configuration. Must run inside
    /// a tokio runtime (the event sink spawns its drain task).
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        Self::with_store(config, store)
    }

    /// Same as [`AppState::new`] with an externally supplied store, the
    /// seam tests and multi-process deployments use.
    pub fn with_store(config: &Config, store: Arc<dyn KeyValueStore>) -> anyhow::Result<Self> {
        let hotlink_mode = config.hotlink_mode()?;
        let session_ttl = Duration::from_secs(config.session_ttl_secs);

        let sessions = SessionRegistry::new(store.clone(), session_ttl, config.secure_cookies);
        let tokens = TokenService::new(store.clone());
        let rate_limiter = RateLimiter::new(
            store.clone(),
            config.ip_rate_limit,
            config.session_rate_limit,
            Duration::from_secs(config.rate_window_secs),
        );
        let hotlink = HotlinkDetector::new(
            store.clone(),
            hotlink_mode,
            config.blocked_domains.clone(),
            config.blocked_ips.clone(),
            session_ttl,
        );
        let events = SecurityEventLog::spawn();
        let streamer = StreamEngine::new(
            ChunkCaps {
                stream: config.stream_chunk_cap_bytes,
                download: config.download_chunk_cap_bytes,
            },
            events.clone(),
        );

        info!(
            ?hotlink_mode,
            ip_rate_limit = config.ip_rate_limit,
            session_rate_limit = config.session_rate_limit,
            token_ttl_secs = config.token_ttl_secs,
            "Delivery state initialized"
        );

        Ok(Self {
            store,
            catalog: Arc::new(MemoryCatalog::new()),
            tokens,
            sessions,
            rate_limiter,
            hotlink,
            policy: AccessPolicy::new(),
            streamer,
            events,
            admin_api_key: config.admin_api_key.clone(),
            token_ttl: Duration::from_secs(config.token_ttl_secs),
            trust_forwarded_for: config.trust_forwarded_for,
        })
    }
}
