use crate::catalog::{ResourceKind, Variant};
use crate::error::DeliveryError;
use crate::kv::KeyValueStore;
use crate::session::Principal;
use anyhow::Result;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Generate an opaque random identifier with `bytes * 8` bits of entropy,
/// base64url-encoded without padding.
pub(crate) fn opaque_id(bytes: usize) -> String {
    use rand::RngCore;
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Typed token record persisted at the KV boundary.
///
/// A token is valid for repeated reads until `issued_at_unix + ttl_secs`;
/// it is never single-use, since a video player issues many range requests
/// against one token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub resource_kind: ResourceKind,
    pub resource_id: String,
    pub project_id: String,
    pub variant: Variant,
    pub session_id: String,
    pub issued_at_unix: u64,
    pub ttl_secs: u64,
}

/// Upper bound on caller-supplied TTLs; anything longer is clamped at
/// issuance so expiry arithmetic stays in range.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

impl AccessToken {
    pub fn expired_at(&self, now_unix: u64) -> bool {
        now_unix >= self.issued_at_unix.saturating_add(self.ttl_secs)
    }
}

fn token_key(token: &str) -> String {
    format!("token:{token}")
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Issues and verifies short-lived, multi-use access tokens bound to a
/// resource, variant and session.
#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn KeyValueStore>,
}

impl TokenService {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Generate and persist a token. 256 bits of entropy; collision
    /// probability is negligible, so no uniqueness check is made.
    pub async fn issue(
        &self,
        resource_kind: ResourceKind,
        resource_id: &str,
        project_id: &str,
        variant: Variant,
        session_id: &str,
        ttl: Duration,
    ) -> Result<AccessToken> {
        let ttl = ttl.min(MAX_TOKEN_TTL);
        let record = AccessToken {
            token: opaque_id(32),
            resource_kind,
            resource_id: resource_id.to_string(),
            project_id: project_id.to_string(),
            variant,
            session_id: session_id.to_string(),
            issued_at_unix: now_unix(),
            ttl_secs: ttl.as_secs(),
        };

        let json = serde_json::to_string(&record)?;
        self.store
            .set_with_ttl(&token_key(&record.token), &json, ttl)
            .await?;

        debug!(
            resource_id,
            project_id,
            variant = %variant,
            ttl_secs = ttl.as_secs(),
            "Token issued"
        );
        Ok(record)
    }

    /// Look up and validate a token. Read-only and non-consuming:
    /// re-verification across many range requests must succeed identically.
    ///
    /// Non-admin principals must present the exact session the token was
    /// bound to. For admins the binding is informational only; the caller
    /// is responsible for the project liveness check.
    pub async fn verify(
        &self,
        token: &str,
        principal: &Principal,
    ) -> Result<AccessToken, DeliveryError> {
        let json = self
            .store
            .get(&token_key(token))
            .await
            .map_err(|error| DeliveryError::Internal(error.to_string()))?
            .ok_or(DeliveryError::AccessDenied("unknown or expired token"))?;

        let record: AccessToken = serde_json::from_str(&json)
            .map_err(|_| DeliveryError::AccessDenied("malformed token record"))?;

        // The store TTL already bounds the record's lifetime; the wall-clock
        // check keeps the invariant exact at the expiry boundary.
        if record.expired_at(now_unix()) {
            return Err(DeliveryError::AccessDenied("token expired"));
        }

        match principal {
            Principal::Admin => {}
            Principal::Share { session_id } | Principal::Guest { session_id } => {
                if *session_id != record.session_id {
                    return Err(DeliveryError::AccessDenied("token bound to another session"));
                }
            }
        }

        Ok(record)
    }

    /// Delete the token record, invalidating it immediately. The interface
    /// higher-level actors use for instant revocation (e.g. an admin
    /// deleting a project).
    pub async fn revoke(&self, token: &str) -> Result<()> {
        self.store.delete(&token_key(token)).await?;
        debug!("Token revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    fn service() -> TokenService {
        TokenService::new(Arc::new(MemoryStore::new()))
    }

    fn share(session_id: &str) -> Principal {
        Principal::Share {
            session_id: session_id.to_string(),
        }
    }

    #[test]
    fn opaque_id_length_and_uniqueness() {
        let a = opaque_id(32);
        let b = opaque_id(32);
        // 32 bytes -> 43 base64url chars without padding
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn issue_then_verify_repeatedly() {
        let service = service();
        let record = service
            .issue(
                ResourceKind::Video,
                "v1",
                "p1",
                Variant::Hd720,
                "s.alpha",
                Duration::from_secs(900),
            )
            .await
            .unwrap();

        // Non-consuming: many verifications of the same token succeed.
        for _ in 0..5 {
            let verified = service.verify(&record.token, &share("s.alpha")).await.unwrap();
            assert_eq!(verified.resource_id, "v1");
            assert_eq!(verified.variant, Variant::Hd720);
        }
    }

    #[tokio::test]
    async fn verify_rejects_session_mismatch_for_non_admin() {
        let service = service();
        let record = service
            .issue(
                ResourceKind::Video,
                "v1",
                "p1",
                Variant::Hd720,
                "s.alpha",
                Duration::from_secs(900),
            )
            .await
            .unwrap();

        let err = service
            .verify(&record.token, &share("s.other"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::AccessDenied(_)));

        let guest = Principal::Guest {
            session_id: "g.other".into(),
        };
        assert!(service.verify(&record.token, &guest).await.is_err());

        // Admin ignores the binding entirely.
        assert!(service.verify(&record.token, &Principal::Admin).await.is_ok());
    }

    #[tokio::test]
    async fn verify_rejects_unknown_and_expired_tokens() {
        let service = service();
        assert!(service.verify("nope", &Principal::Admin).await.is_err());

        let record = service
            .issue(
                ResourceKind::Photo,
                "ph1",
                "p1",
                Variant::Social,
                "s.alpha",
                Duration::from_millis(20),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = service
            .verify(&record.token, &share("s.alpha"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn revoke_invalidates_immediately() {
        let service = service();
        let record = service
            .issue(
                ResourceKind::Asset,
                "a1",
                "p1",
                Variant::Full,
                "s.alpha",
                Duration::from_secs(900),
            )
            .await
            .unwrap();

        assert!(service.verify(&record.token, &share("s.alpha")).await.is_ok());
        service.revoke(&record.token).await.unwrap();
        assert!(service.verify(&record.token, &share("s.alpha")).await.is_err());
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let record = AccessToken {
            token: "t".into(),
            resource_kind: ResourceKind::Video,
            resource_id: "v1".into(),
            project_id: "p1".into(),
            variant: Variant::Original,
            session_id: "s.1".into(),
            issued_at_unix: 1000,
            ttl_secs: 900,
        };
        assert!(!record.expired_at(1899));
        assert!(record.expired_at(1900));
        assert!(record.expired_at(1901));
    }

    #[test]
    fn huge_ttl_never_overflows_the_expiry_check() {
        let record = AccessToken {
            token: "t".into(),
            resource_kind: ResourceKind::Video,
            resource_id: "v1".into(),
            project_id: "p1".into(),
            variant: Variant::Original,
            session_id: "s.1".into(),
            issued_at_unix: u64::MAX - 10,
            ttl_secs: u64::MAX,
        };
        assert!(!record.expired_at(u64::MAX));
    }

    #[tokio::test]
    async fn issuance_clamps_oversized_ttls() {
        let service = service();
        let record = service
            .issue(
                ResourceKind::Video,
                "v1",
                "p1",
                Variant::Hd720,
                "s.alpha",
                Duration::from_secs(u64::MAX),
            )
            .await
            .unwrap();

        assert_eq!(record.ttl_secs, MAX_TOKEN_TTL.as_secs());
        assert!(service.verify(&record.token, &share("s.alpha")).await.is_ok());
    }
}
