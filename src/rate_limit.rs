use crate::error::DeliveryError;
use crate::kv::KeyValueStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Rate-limit tier, evaluated in order on the content path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateTier {
    /// Very high ceiling: one video player legitimately issues dozens of
    /// range requests per second while scrubbing.
    Ip,
    /// Lower but still generous per-session ceiling.
    Session,
}

impl RateTier {
    fn key(&self, identifier: &str) -> String {
        match self {
            RateTier::Ip => format!("rl:ip:{identifier}"),
            RateTier::Session => format!("rl:sess:{identifier}"),
        }
    }
}

/// Fixed-window counters over the shared store. Increments are atomic at
/// the store level, so concurrent chunk requests from one session count
/// correctly.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    ip_limit: u64,
    session_limit: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, ip_limit: u64, session_limit: u64, window: Duration) -> Self {
        Self {
            store,
            ip_limit,
            session_limit,
            window,
        }
    }

    fn limit(&self, tier: RateTier) -> u64 {
        match tier {
            RateTier::Ip => self.ip_limit,
            RateTier::Session => self.session_limit,
        }
    }

    /// Count one request against `identifier`. Request `N` at the limit
    /// passes; request `N + 1` within the window is rejected with the
    /// remaining window time as the retry delay.
    pub async fn check(&self, tier: RateTier, identifier: &str) -> Result<(), DeliveryError> {
        let limit = self.limit(tier);
        if limit == 0 {
            return Ok(());
        }

        let (count, remaining) = self
            .store
            .incr_with_window(&tier.key(identifier), self.window)
            .await
            .map_err(|error| DeliveryError::Internal(error.to_string()))?;

        if count > limit {
            debug!(?tier, identifier, count, limit, "Rate limit exceeded");
            return Err(DeliveryError::RateLimited {
                retry_after_secs: remaining.as_secs().max(1),
            });
        }
        Ok(())
    }
}
