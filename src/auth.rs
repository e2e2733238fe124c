use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::message::Classification;

// ============================================================================
// Bearer Token Authentication & RBAC
// ============================================================================
//
// HS256 tokens verified on every request (zero trust: possession of a valid,
// unexpired token is the only authentication state). Roles carry a fixed
// permission set; explicit permissions in the token override the role map.
//
// ============================================================================

pub const TOKEN_ISSUER: &str = "tacedge-gateway";
pub const TOKEN_AUDIENCE: &str = "tacedge-services";

/// Allowed clock skew when validating `exp` / `nbf`.
const CLOCK_SKEW_LEEWAY_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Operator,
    Supervisor,
    Admin,
    Service,
}

impl Role {
    pub fn permissions(&self) -> &'static [&'static str] {
        match self {
            Role::Operator => &["message:send", "message:read", "node:status"],
            Role::Supervisor => &[
                "message:send",
                "message:read",
                "message:delete",
                "node:status",
                "audit:read",
            ],
            Role::Admin => &[
                "message:send",
                "message:read",
                "message:delete",
                "node:status",
                "node:manage",
                "config:write",
                "audit:read",
                "audit:export",
            ],
            Role::Service => &["message:send", "message:read", "node:status", "internal:call"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Operator => "operator",
            Role::Supervisor => "supervisor",
            Role::Admin => "admin",
            Role::Service => "service",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub jti: String,
    pub role: Role,
    pub permissions: Vec<String>,
    pub node_id: String,
    pub classification_level: Classification,
}

impl Claims {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// Whether this subject may submit with the given `sender` field. Service
    /// accounts and admins relay on behalf of field nodes.
    pub fn may_act_as(&self, sender: &str) -> bool {
        self.node_id == sender || matches!(self.role, Role::Admin | Role::Service)
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("token invalid: {0}")]
    Invalid(String),
}

impl AuthError {
    /// Short reason string recorded in IA `AUTH_FAILURE` events.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Expired => "expired",
            AuthError::NotYetValid => "not_yet_valid",
            AuthError::Invalid(_) => "invalid",
        }
    }
}

pub struct AuthManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
}

impl AuthManager {
    pub fn new(signing_key: &str, token_ttl_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(signing_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(signing_key.as_bytes()),
            token_ttl: Duration::hours(token_ttl_hours),
        }
    }

    /// Issue a token for a node acting in a role. Permissions default to the
    /// role map; the classification level is the subject's read ceiling.
    pub fn issue(
        &self,
        node_id: &str,
        role: Role,
        classification_level: Classification,
    ) -> Result<(String, Claims), AuthError> {
        self.issue_with_ttl(node_id, role, classification_level, self.token_ttl)
    }

    /// Issue with an explicit lifetime. A non-positive TTL produces an
    /// already-expired token; tests use this to exercise expiry handling.
    pub fn issue_with_ttl(
        &self,
        node_id: &str,
        role: Role,
        classification_level: Classification,
        ttl: Duration,
    ) -> Result<(String, Claims), AuthError> {
        let now = Utc::now();
        let claims = Claims {
            iss: TOKEN_ISSUER.to_string(),
            sub: node_id.to_string(),
            aud: TOKEN_AUDIENCE.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            role,
            permissions: role.permissions().iter().map(|p| p.to_string()).collect(),
            node_id: node_id.to_string(),
            classification_level,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Invalid(e.to_string()))?;
        Ok((token, claims))
    }

    /// Verify signature, expiry, not-before, issuer, and audience.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = CLOCK_SKEW_LEEWAY_SECS;
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.set_audience(&[TOKEN_AUDIENCE]);
        validation.validate_nbf = true;

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(AuthError::Expired),
                jsonwebtoken::errors::ErrorKind::ImmatureSignature => Err(AuthError::NotYetValid),
                _ => Err(AuthError::Invalid(e.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "a1b2c3d4e5f6g7h8i9j0k1l2m3n4o5p6q7r8s9t0";

    #[test]
    fn issue_and_verify_roundtrip() {
        let auth = AuthManager::new(TEST_KEY, 24);
        let (token, issued) = auth
            .issue("NODE-ALPHA", Role::Operator, Classification::Secret)
            .unwrap();

        let claims = auth.verify(&token).unwrap();
        assert_eq!(claims.node_id, "NODE-ALPHA");
        assert_eq!(claims.role, Role::Operator);
        assert_eq!(claims.jti, issued.jti);
        assert!(claims.has_permission("message:send"));
        assert!(!claims.has_permission("audit:read"));
    }

    #[test]
    fn expired_token_is_rejected_with_expired_reason() {
        let auth = AuthManager::new(TEST_KEY, 24);
        // Expired beyond the 30 s leeway
        let (token, _) = auth
            .issue_with_ttl(
                "NODE-ALPHA",
                Role::Operator,
                Classification::Unclassified,
                Duration::seconds(-120),
            )
            .unwrap();

        let err = auth.verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::Expired));
        assert_eq!(err.reason(), "expired");
    }

    #[test]
    fn forged_signature_is_rejected() {
        let auth = AuthManager::new(TEST_KEY, 24);
        let other = AuthManager::new("another-secret-key-of-sufficient-len", 24);
        let (token, _) = other
            .issue("NODE-ALPHA", Role::Admin, Classification::TopSecret)
            .unwrap();

        let err = auth.verify(&token).unwrap_err();
        assert!(matches!(err, AuthError::Invalid(_)));
        assert_eq!(err.reason(), "invalid");
    }

    #[test]
    fn garbage_token_is_rejected() {
        let auth = AuthManager::new(TEST_KEY, 24);
        assert!(auth.verify("not-a-jwt").is_err());
        assert!(auth.verify("").is_err());
    }

    #[test]
    fn supervisor_reads_audit_operator_does_not() {
        assert!(Role::Supervisor.permissions().contains(&"audit:read"));
        assert!(!Role::Operator.permissions().contains(&"audit:read"));
        assert!(Role::Admin.permissions().contains(&"audit:export"));
        assert!(Role::Service.permissions().contains(&"internal:call"));
    }

    #[test]
    fn sender_impersonation_rules() {
        let auth = AuthManager::new(TEST_KEY, 24);
        let (_, operator) = auth
            .issue("NODE-ALPHA", Role::Operator, Classification::Unclassified)
            .unwrap();
        assert!(operator.may_act_as("NODE-ALPHA"));
        assert!(!operator.may_act_as("NODE-BRAVO"));

        let (_, service) = auth
            .issue("relay-svc", Role::Service, Classification::Unclassified)
            .unwrap();
        assert!(service.may_act_as("NODE-BRAVO"));
    }
}
