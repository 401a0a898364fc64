use crate::kv::KeyValueStore;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Enforcement mode for the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HotlinkMode {
    /// No checks at all.
    Disabled,
    /// Compute the verdict and surface it for logging, always allow.
    LogOnly,
    /// Deny positive verdicts.
    BlockStrict,
}

impl FromStr for HotlinkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(HotlinkMode::Disabled),
            "log_only" => Ok(HotlinkMode::LogOnly),
            "block_strict" => Ok(HotlinkMode::BlockStrict),
            other => Err(format!("unknown hotlink mode: {other}")),
        }
    }
}

/// Outcome of a hotlink evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotlinkDecision {
    Allow,
    /// Positive verdict under `LogOnly`: the request proceeds but the
    /// caller must emit a warning event.
    AllowSuspicious { reason: &'static str },
    Block { reason: &'static str },
}

impl HotlinkDecision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, HotlinkDecision::Block { .. })
    }
}

fn signals_key(session_id: &str, resource_id: &str) -> String {
    format!("hotlink:{session_id}:{resource_id}")
}

/// Extract a lowercase host from a Referer/Origin value.
fn extract_host(value: &str) -> Option<String> {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .unwrap_or(value);
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.split(':').next()?.trim().to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

/// Heuristic + blocklist anti-hotlinking check.
///
/// The heuristic keys off referrer drift: for a session+resource pair that
/// already has observed history, a referrer host never seen before is
/// suspicious. A first request with no prior history is not flagged.
#[derive(Clone)]
pub struct HotlinkDetector {
    store: Arc<dyn KeyValueStore>,
    mode: HotlinkMode,
    blocked_domains: Vec<String>,
    blocked_ips: Vec<String>,
    signal_ttl: Duration,
}

impl HotlinkDetector {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        mode: HotlinkMode,
        blocked_domains: Vec<String>,
        blocked_ips: Vec<String>,
        signal_ttl: Duration,
    ) -> Self {
        Self {
            store,
            mode,
            blocked_domains: blocked_domains
                .into_iter()
                .map(|d| d.to_ascii_lowercase())
                .collect(),
            blocked_ips,
            signal_ttl,
        }
    }

    pub fn mode(&self) -> HotlinkMode {
        self.mode
    }

    pub async fn evaluate(
        &self,
        session_id: &str,
        resource_id: &str,
        referer: Option<&str>,
        origin: Option<&str>,
        ip: &str,
    ) -> Result<HotlinkDecision> {
        if self.mode == HotlinkMode::Disabled {
            return Ok(HotlinkDecision::Allow);
        }

        // The IP blocklist is enforced unconditionally in any active mode,
        // including LogOnly.
        if self.blocked_ips.iter().any(|blocked| blocked == ip) {
            debug!(ip, "Blocked IP hit");
            return Ok(HotlinkDecision::Block {
                reason: "ip blocklist",
            });
        }

        let host = referer.and_then(extract_host).or_else(|| origin.and_then(extract_host));

        let verdict = match &host {
            Some(host) if self.blocked_domains.iter().any(|d| d == host) => {
                Some("domain blocklist")
            }
            Some(host) => {
                let key = signals_key(session_id, resource_id);
                let seen = self.store.set_contains(&key, host).await?;
                let established = self.store.set_len(&key).await? > 0;
                (!seen && established).then_some("referrer drift")
            }
            // Requests without Referer/Origin are not flagged; native
            // players routinely omit both.
            None => None,
        };

        // Append the observation for future comparisons regardless of the
        // verdict (append-only, never overwrite).
        if let Some(host) = &host {
            self.store
                .set_add(&signals_key(session_id, resource_id), host, self.signal_ttl)
                .await?;
        }

        match (verdict, self.mode) {
            (None, _) => Ok(HotlinkDecision::Allow),
            (Some(reason), HotlinkMode::BlockStrict) => Ok(HotlinkDecision::Block { reason }),
            (Some(reason), _) => Ok(HotlinkDecision::AllowSuspicious { reason }),
        }
    }
}
