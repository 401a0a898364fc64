use crate::kv::KeyValueStore;
use crate::token::opaque_id;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub const SESSION_COOKIE: &str = "mg_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Share,
    Guest,
}

/// The authenticated caller of a content request.
///
/// A closed variant set instead of boolean capability flags: authorization
/// logic downstream is an exhaustive match, so an unhandled combination is
/// a compile error rather than a missed branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Authenticated with the admin credential. Bypasses the session
    /// project set but must still pass a project liveness check.
    Admin,
    /// Cookie-bound share-link session scoped to granted projects.
    Share { session_id: String },
    /// Restricted share session variant with reduced capabilities.
    Guest { session_id: String },
}

impl Principal {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Principal::Admin => None,
            Principal::Share { session_id } | Principal::Guest { session_id } => Some(session_id),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Principal::Admin)
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Principal::Guest { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub kind: SessionKind,
    pub created_at_unix: u64,
    pub ttl_secs: u64,
}

fn record_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn projects_key(session_id: &str) -> String {
    format!("session:{session_id}:projects")
}

/// Authoritative session -> authorized-projects mapping, backed by the
/// shared store so stateless replicas agree on grants.
#[derive(Clone)]
pub struct SessionRegistry {
    store: Arc<dyn KeyValueStore>,
    session_ttl: Duration,
    secure_cookies: bool,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, session_ttl: Duration, secure_cookies: bool) -> Self {
        Self {
            store,
            session_ttl,
            secure_cookies,
        }
    }

    pub async fn create(&self, kind: SessionKind) -> Result<SessionRecord> {
        // Guest ids carry a distinct namespace so the two populations can
        // never collide in the store.
        let prefix = match kind {
            SessionKind::Share => "s",
            SessionKind::Guest => "g",
        };
        let session_id = format!("{prefix}.{}", opaque_id(24));
        let record = SessionRecord {
            session_id: session_id.clone(),
            kind,
            created_at_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            ttl_secs: self.session_ttl.as_secs(),
        };

        let json = serde_json::to_string(&record)?;
        self.store
            .set_with_ttl(&record_key(&session_id), &json, self.session_ttl)
            .await?;
        debug!(%session_id, ?kind, "Session created");
        Ok(record)
    }

    pub async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let Some(json) = self.store.get(&record_key(session_id)).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&json).ok())
    }

    /// Add a project to the session's authorized set and refresh the set's
    /// TTL (sliding expiration).
    pub async fn grant_project(&self, session_id: &str, project_id: &str) -> Result<()> {
        self.store
            .set_add(&projects_key(session_id), project_id, self.session_ttl)
            .await?;
        debug!(%session_id, %project_id, "Project granted to session");
        Ok(())
    }

    pub async fn has_access(&self, session_id: &str, project_id: &str) -> Result<bool> {
        self.store
            .set_contains(&projects_key(session_id), project_id)
            .await
    }

    /// Refresh session TTLs on authorized access.
    pub async fn touch(&self, session_id: &str) -> Result<()> {
        self.store
            .expire(&record_key(session_id), self.session_ttl)
            .await?;
        self.store
            .expire(&projects_key(session_id), self.session_ttl)
            .await?;
        Ok(())
    }

    /// Set-Cookie value for a freshly created session.
    pub fn cookie_value(&self, session_id: &str) -> String {
        let mut cookie = format!(
            "{SESSION_COOKIE}={session_id}; Max-Age={}; Path=/; HttpOnly; SameSite=Strict",
            self.session_ttl.as_secs()
        );
        if self.secure_cookies {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Extract the session id from a Cookie header value.
pub fn session_id_from_cookie(cookie_header: &str) -> Option<&str> {
    cookie_header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then_some(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(MemoryStore::new()), Duration::from_secs(900), false)
    }

    #[tokio::test]
    async fn create_and_load_session() {
        let registry = registry();
        let record = registry.create(SessionKind::Share).await.unwrap();
        assert!(record.session_id.starts_with("s."));

        let loaded = registry.load(&record.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.kind, SessionKind::Share);

        let guest = registry.create(SessionKind::Guest).await.unwrap();
        assert!(guest.session_id.starts_with("g."));
    }

    #[tokio::test]
    async fn grant_and_membership() {
        let registry = registry();
        let record = registry.create(SessionKind::Share).await.unwrap();

        assert!(!registry.has_access(&record.session_id, "p1").await.unwrap());
        registry
            .grant_project(&record.session_id, "p1")
            .await
            .unwrap();
        assert!(registry.has_access(&record.session_id, "p1").await.unwrap());
        assert!(!registry.has_access(&record.session_id, "p2").await.unwrap());
    }

    #[tokio::test]
    async fn missing_session_loads_none() {
        let registry = registry();
        assert!(registry.load("s.unknown").await.unwrap().is_none());
    }

    #[test]
    fn cookie_parsing() {
        assert_eq!(
            session_id_from_cookie("mg_session=s.abc123; theme=dark"),
            Some("s.abc123")
        );
        assert_eq!(
            session_id_from_cookie("theme=dark;  mg_session=g.xyz"),
            Some("g.xyz")
        );
        assert_eq!(session_id_from_cookie("theme=dark"), None);
        assert_eq!(session_id_from_cookie("mg_session="), None);
    }

    #[test]
    fn cookie_value_attributes() {
        let registry = registry();
        let cookie = registry.cookie_value("s.abc");
        assert!(cookie.starts_with("mg_session=s.abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(!cookie.contains("Secure"));

        let secure =
            SessionRegistry::new(Arc::new(MemoryStore::new()), Duration::from_secs(10), true);
        assert!(secure.cookie_value("s.abc").contains("; Secure"));
    }

    #[test]
    fn principal_accessors() {
        assert!(Principal::Admin.is_admin());
        assert_eq!(Principal::Admin.session_id(), None);

        let guest = Principal::Guest {
            session_id: "g.1".into(),
        };
        assert!(guest.is_guest());
        assert_eq!(guest.session_id(), Some("g.1"));
    }
}
