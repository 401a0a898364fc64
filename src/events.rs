use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    TokenIssued,
    TokenRevoked,
    AccessDenied,
    RateLimitHit,
    HotlinkSuspected,
    HotlinkBlocked,
    StreamError,
    ContentServed,
}

/// Write-only, append-only security observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_type: EventType,
    pub severity: Severity,
    pub ip: Option<String>,
    pub session_id: Option<String>,
    pub project_id: Option<String>,
    pub resource_id: Option<String>,
    pub detail: String,
    pub was_blocked: bool,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(event_type: EventType, severity: Severity, detail: impl Into<String>) -> Self {
        Self {
            event_type,
            severity,
            ip: None,
            session_id: None,
            project_id: None,
            resource_id: None,
            detail: detail.into(),
            was_blocked: false,
            timestamp: Utc::now(),
        }
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn blocked(mut self) -> Self {
        self.was_blocked = true;
        self
    }
}

/// Best-effort, fire-and-forget event sink.
///
/// Events are pushed onto an unbounded channel and drained by a background
/// task into structured log output. A failure here must never fail or delay
/// a content response, so `record` swallows send errors.
#[derive(Clone)]
pub struct SecurityEventLog {
    tx: UnboundedSender<SecurityEvent>,
}

impl SecurityEventLog {
    /// Spawn the drain task. Must be called inside a tokio runtime.
    pub fn spawn() -> Self {
        let (log, mut rx) = Self::channel();
        tokio::spawn(async move {
            while let Some(event) = rx.next().await {
                emit(&event);
            }
        });
        log
    }

    /// A sink whose events land in the returned receiver instead of the
    /// log drain, so callers can inspect what was recorded.
    pub fn channel() -> (Self, UnboundedReceiver<SecurityEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    pub fn record(&self, event: SecurityEvent) {
        _ = self.tx.unbounded_send(event);
    }
}

fn emit(event: &SecurityEvent) {
    let payload = serde_json::to_string(event).unwrap_or_default();
    match event.severity {
        Severity::Info => info!(event = %payload, "security event"),
        Severity::Warning => warn!(event = %payload, "security event"),
        Severity::Critical => error!(event = %payload, "security event"),
    }
}
