//! Authentication: signed session tokens and API-key identities

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::{McpError, McpResult};

/// Credential shapes accepted by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Server-issued signed token
    Token(String),
    /// Pre-shared API key, at least 32 characters
    ApiKey(String),
}

impl Credential {
    /// Extract a credential from request params (`{token}` or `{apiKey}`).
    pub fn from_params(params: &Value) -> Option<Credential> {
        if let Some(token) = params.get("token").and_then(Value::as_str) {
            return Some(Credential::Token(token.to_string()));
        }
        if let Some(key) = params.get("apiKey").and_then(Value::as_str) {
            return Some(Credential::ApiKey(key.to_string()));
        }
        None
    }
}

/// Verified identity
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub roles: HashSet<String>,
    pub metadata: Value,
}

/// External identity verification and capability lookup
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a credential the provider understands.
    async fn verify(&self, credential: &Credential) -> McpResult<Identity>;

    /// Capabilities granted to an identity.
    async fn capabilities(&self, identity: &Identity) -> HashSet<String>;
}

/// Reference provider: API keys of at least `MIN_API_KEY_LEN` characters
/// map deterministically to a pseudonymous user id; capability grants are
/// held in memory with a configurable default set.
pub struct StaticIdentityProvider {
    default_capabilities: HashSet<String>,
    grants: RwLock<HashMap<String, HashSet<String>>>,
}

/// Minimum accepted API-key length
pub const MIN_API_KEY_LEN: usize = 32;

impl StaticIdentityProvider {
    pub fn new(default_capabilities: HashSet<String>) -> Self {
        Self {
            default_capabilities,
            grants: RwLock::new(HashMap::new()),
        }
    }

    /// Provider granting the standard read/execute surface.
    pub fn permissive() -> Self {
        let caps = [
            "tools:*",
            "resources:*",
            "prompts:*",
            "workflows:*",
            "sampling:*",
            "logging:*",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        Self::new(caps)
    }

    /// Replace the capability grant for a user.
    pub async fn grant(&self, user_id: impl Into<String>, capabilities: HashSet<String>) {
        self.grants.write().await.insert(user_id.into(), capabilities);
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify(&self, credential: &Credential) -> McpResult<Identity> {
        match credential {
            Credential::ApiKey(key) => {
                if key.len() < MIN_API_KEY_LEN {
                    return Err(McpError::authentication_failed(
                        "API key below minimum length",
                    ));
                }
                Ok(Identity {
                    user_id: pseudonymous_user_id(key),
                    roles: HashSet::from(["client".to_string()]),
                    metadata: Value::Null,
                })
            }
            Credential::Token(_) => Err(McpError::authentication_failed(
                "token credentials are validated by the token manager",
            )),
        }
    }

    async fn capabilities(&self, identity: &Identity) -> HashSet<String> {
        let grants = self.grants.read().await;
        grants
            .get(&identity.user_id)
            .cloned()
            .unwrap_or_else(|| self.default_capabilities.clone())
    }
}

/// Deterministic pseudonymous id for an API key
pub fn pseudonymous_user_id(api_key: &str) -> String {
    let digest = Sha256::digest(api_key.as_bytes());
    format!("key-{}", hex_encode(&digest[..8]))
}

/// One live token session
#[derive(Debug, Clone)]
pub struct TokenSession {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Value,
}

impl TokenSession {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Issues, validates, refreshes and revokes signed session tokens.
///
/// Token layout: `base64url(session_id '.' expiry_unix '.' digest)` with
/// `digest = hex(sha256(session_id '.' expiry_unix '.' salt))`. A revoked
/// token stays in the revocation set until its original expiry.
pub struct TokenManager {
    salt: String,
    ttl: Duration,
    refresh_window: Duration,
    max_sessions_per_user: usize,
    sessions: RwLock<HashMap<String, TokenSession>>,
    revoked: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl TokenManager {
    pub fn new(config: &SecurityConfig, max_sessions_per_user: usize) -> Self {
        Self {
            salt: config.token_salt.clone(),
            ttl: Duration::seconds(config.token_ttl_seconds as i64),
            refresh_window: Duration::seconds(config.refresh_window_seconds as i64),
            max_sessions_per_user,
            sessions: RwLock::new(HashMap::new()),
            revoked: RwLock::new(HashMap::new()),
        }
    }

    /// Issue a token session, enforcing the per-user ceiling.
    pub async fn issue(
        &self,
        user_id: &str,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> McpResult<TokenSession> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;

        sessions.retain(|_, s| !s.is_expired(now));

        let live = sessions.values().filter(|s| s.user_id == user_id).count();
        if live >= self.max_sessions_per_user {
            return Err(McpError::authentication_failed(format!(
                "session ceiling reached for user ({} live)",
                live
            )));
        }

        let session_id = Uuid::new_v4().to_string();
        let expires_at = now + self.ttl;
        let token = self.sign(&session_id, expires_at.timestamp());

        let session = TokenSession {
            id: session_id,
            user_id: user_id.to_string(),
            token: token.clone(),
            created_at: now,
            last_activity: now,
            expires_at,
            ip_address,
            user_agent,
            metadata: Value::Null,
        };
        sessions.insert(token, session.clone());
        Ok(session)
    }

    /// Validate a token and touch its session.
    pub async fn validate(&self, token: &str) -> McpResult<TokenSession> {
        let now = Utc::now();
        let (session_id, expiry) = self.verify_signature(token)?;

        if now.timestamp() >= expiry {
            return Err(McpError::authentication_failed("token expired"));
        }
        if self.revoked.read().await.contains_key(token) {
            return Err(McpError::authentication_failed("token revoked"));
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(token)
            .ok_or_else(|| McpError::authentication_failed("unknown session"))?;
        debug_assert_eq!(session.id, session_id);
        session.last_activity = now;
        Ok(session.clone())
    }

    /// Rotate a token near expiry. Permitted only within the refresh
    /// window; the old token is revoked immediately.
    pub async fn refresh(&self, token: &str) -> McpResult<TokenSession> {
        let session = self.validate(token).await?;
        let now = Utc::now();

        if session.expires_at - now > self.refresh_window {
            return Err(McpError::authentication_failed(
                "token not yet within refresh window",
            ));
        }

        self.revoke(token).await?;

        // Re-issue after the revocation freed the user's slot
        let mut sessions = self.sessions.write().await;
        let session_id = Uuid::new_v4().to_string();
        let expires_at = now + self.ttl;
        let new_token = self.sign(&session_id, expires_at.timestamp());
        let new_session = TokenSession {
            id: session_id,
            user_id: session.user_id,
            token: new_token.clone(),
            created_at: now,
            last_activity: now,
            expires_at,
            ip_address: session.ip_address,
            user_agent: session.user_agent,
            metadata: session.metadata,
        };
        sessions.insert(new_token, new_session.clone());
        Ok(new_session)
    }

    /// Revoke a token until its original expiry.
    pub async fn revoke(&self, token: &str) -> McpResult<()> {
        let (_, expiry) = self.verify_signature(token)?;
        let expires_at = DateTime::<Utc>::from_timestamp(expiry, 0)
            .ok_or_else(|| McpError::authentication_failed("malformed token expiry"))?;

        self.sessions.write().await.remove(token);
        self.revoked
            .write()
            .await
            .insert(token.to_string(), expires_at);
        Ok(())
    }

    /// Drop expired sessions and revocations whose TTL has elapsed.
    pub async fn cleanup(&self) {
        let now = Utc::now();
        self.sessions.write().await.retain(|_, s| !s.is_expired(now));
        self.revoked.write().await.retain(|_, expiry| *expiry > now);
    }

    /// Find and touch a live session for a user, preferring one bound to
    /// the same address. Lets repeated API-key authentication share one
    /// session slot instead of minting a token per request.
    pub async fn reuse_session(
        &self,
        user_id: &str,
        ip_address: Option<&str>,
    ) -> Option<TokenSession> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let token = sessions
            .values()
            .filter(|s| s.user_id == user_id && !s.is_expired(now))
            .find(|s| match (ip_address, &s.ip_address) {
                (Some(ip), Some(bound)) => ip == bound,
                (None, _) => true,
                (Some(_), None) => true,
            })
            .map(|s| s.token.clone())?;
        let session = sessions.get_mut(&token)?;
        session.last_activity = now;
        Some(session.clone())
    }

    /// Number of live sessions for a user.
    pub async fn live_sessions_for(&self, user_id: &str) -> usize {
        let now = Utc::now();
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.user_id == user_id && !s.is_expired(now))
            .count()
    }

    fn sign(&self, session_id: &str, expiry_unix: i64) -> String {
        let digest = self.digest(session_id, expiry_unix);
        URL_SAFE_NO_PAD.encode(format!("{}.{}.{}", session_id, expiry_unix, digest))
    }

    fn digest(&self, session_id: &str, expiry_unix: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        hasher.update(b".");
        hasher.update(expiry_unix.to_string().as_bytes());
        hasher.update(b".");
        hasher.update(self.salt.as_bytes());
        hex_encode(&hasher.finalize())
    }

    /// Verify the signature and return (session_id, expiry).
    fn verify_signature(&self, token: &str) -> McpResult<(String, i64)> {
        let decoded = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| McpError::authentication_failed("malformed token"))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| McpError::authentication_failed("malformed token"))?;

        let mut parts = decoded.splitn(3, '.');
        let (session_id, expiry, digest) = match (parts.next(), parts.next(), parts.next()) {
            (Some(s), Some(e), Some(d)) => (s, e, d),
            _ => return Err(McpError::authentication_failed("malformed token")),
        };
        let expiry: i64 = expiry
            .parse()
            .map_err(|_| McpError::authentication_failed("malformed token expiry"))?;

        let expected = self.digest(session_id, expiry);
        if !constant_time_eq(digest.as_bytes(), expected.as_bytes()) {
            return Err(McpError::authentication_failed("invalid token signature"));
        }
        Ok((session_id.to_string(), expiry))
    }
}

/// Authentication front door: routes tokens to the token manager and
/// API keys to the identity provider, resolving capabilities either way.
pub struct AuthManager {
    tokens: TokenManager,
    provider: Arc<dyn IdentityProvider>,
}

/// Result of a successful authentication
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub identity: Identity,
    pub capabilities: HashSet<String>,
    pub session: TokenSession,
    /// Present when this authentication minted a fresh token
    pub issued_token: Option<String>,
}

impl AuthManager {
    pub fn new(tokens: TokenManager, provider: Arc<dyn IdentityProvider>) -> Self {
        Self { tokens, provider }
    }

    pub async fn authenticate(
        &self,
        credential: &Credential,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> McpResult<AuthOutcome> {
        match credential {
            Credential::Token(token) => {
                let session = self.tokens.validate(token).await?;
                let identity = Identity {
                    user_id: session.user_id.clone(),
                    roles: HashSet::from(["client".to_string()]),
                    metadata: Value::Null,
                };
                let capabilities = self.provider.capabilities(&identity).await;
                Ok(AuthOutcome {
                    identity,
                    capabilities,
                    session,
                    issued_token: None,
                })
            }
            Credential::ApiKey(_) => {
                let identity = self.provider.verify(credential).await?;
                let capabilities = self.provider.capabilities(&identity).await;

                if let Some(session) = self
                    .tokens
                    .reuse_session(&identity.user_id, ip_address.as_deref())
                    .await
                {
                    return Ok(AuthOutcome {
                        identity,
                        capabilities,
                        session,
                        issued_token: None,
                    });
                }

                let session = self
                    .tokens
                    .issue(&identity.user_id, ip_address, user_agent)
                    .await?;
                let issued = session.token.clone();
                Ok(AuthOutcome {
                    identity,
                    capabilities,
                    session,
                    issued_token: Some(issued),
                })
            }
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        use std::fmt::Write;
        let _ = write!(out, "{:02x}", b);
        out
    })
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
