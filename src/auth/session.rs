use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{FarmError, FarmResult};

type HmacSha256 = Hmac<Sha256>;

/// A validated bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: u64,
    /// Unix seconds.
    pub expires_at: i64,
    pub nonce: String,
}

struct Entry {
    user_id: u64,
    expires_at: i64,
    revoked: watch::Sender<bool>,
}

/// Issues and checks `<user_id>.<expires_at>.<nonce>.<hex hmac>` tokens.
///
/// The signature alone is not enough: a token is only valid while its nonce
/// is in the live session map, which is how logout revokes it.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    secret: String,
    ttl_secs: i64,
    sessions: RwLock<HashMap<String, Entry>>,
}

/// Token fields that go into the signature.
pub(crate) struct TokenContext<'a> {
    pub user_id: u64,
    pub expires_at: i64,
    pub nonce: &'a str,
}

fn mac(secret: &str) -> FarmResult<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| FarmError::Internal(format!("invalid session key: {e}")))
}

/// Signs `ctx` and returns the full token.
pub(crate) fn sign_token(secret: &str, ctx: &TokenContext<'_>) -> FarmResult<String> {
    let payload = format!("{}.{}.{}", ctx.user_id, ctx.expires_at, ctx.nonce);
    let mut mac = mac(secret)?;
    mac.update(payload.as_bytes());
    let sig = hex::encode(mac.finalize().into_bytes());
    Ok(format!("{payload}.{sig}"))
}

fn invalid() -> FarmError {
    FarmError::Unauthorized("Invalid token".into())
}

/// Checks structure and signature; expiry and revocation are checked by the
/// caller.
fn verify_token(secret: &str, token: &str) -> FarmResult<Session> {
    let parts: Vec<&str> = token.split('.').collect();
    let [user_id, expires_at, nonce, sig] = parts.as_slice() else {
        return Err(invalid());
    };
    let user_id: u64 = user_id.parse().map_err(|_| invalid())?;
    let expires_at: i64 = expires_at.parse().map_err(|_| invalid())?;
    let sig = hex::decode(sig).map_err(|_| invalid())?;

    let mut mac = mac(secret)?;
    mac.update(format!("{user_id}.{expires_at}.{nonce}").as_bytes());
    mac.verify_slice(&sig).map_err(|_| invalid())?;

    Ok(Session {
        user_id,
        expires_at,
        nonce: (*nonce).to_owned(),
    })
}

impl SessionManager {
    pub fn new(secret: impl Into<String>, ttl_secs: i64) -> Self {
        Self {
            inner: Arc::new(Inner {
                secret: secret.into(),
                ttl_secs,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Starts a session for `user_id` and returns its token.
    pub async fn issue(&self, user_id: u64) -> FarmResult<(String, Session)> {
        let now = Utc::now().timestamp();
        let expires_at = now
            .checked_add(self.inner.ttl_secs)
            .ok_or_else(|| FarmError::Internal("session expiry out of range".into()))?;
        let nonce = Uuid::new_v4().simple().to_string();
        let token = sign_token(
            &self.inner.secret,
            &TokenContext {
                user_id,
                expires_at,
                nonce: &nonce,
            },
        )?;

        let mut sessions = self.inner.sessions.write().await;
        sessions.retain(|_, e| e.expires_at > now);
        let (revoked, _) = watch::channel(false);
        sessions.insert(
            nonce.clone(),
            Entry {
                user_id,
                expires_at,
                revoked,
            },
        );
        debug!(user_id, "Session issued");

        Ok((
            token,
            Session {
                user_id,
                expires_at,
                nonce,
            },
        ))
    }

    pub async fn validate(&self, token: &str) -> FarmResult<Session> {
        let session = verify_token(&self.inner.secret, token)?;
        if session.expires_at <= Utc::now().timestamp() {
            return Err(FarmError::Unauthorized("Token has expired".into()));
        }
        let sessions = self.inner.sessions.read().await;
        match sessions.get(&session.nonce) {
            Some(e) if e.user_id == session.user_id => Ok(session),
            _ => Err(FarmError::Unauthorized("Session has ended".into())),
        }
    }

    /// Ends the session. Open event streams for it are closed.
    pub async fn revoke(&self, nonce: &str) -> bool {
        let entry = self.inner.sessions.write().await.remove(nonce);
        match entry {
            Some(e) => {
                let _ = e.revoked.send(true);
                info!(user_id = e.user_id, "Session revoked");
                true
            }
            None => false,
        }
    }

    /// Ends every session of `user_id`.
    pub async fn revoke_user(&self, user_id: u64) -> usize {
        let mut sessions = self.inner.sessions.write().await;
        let nonces: Vec<String> = sessions
            .iter()
            .filter(|(_, e)| e.user_id == user_id)
            .map(|(n, _)| n.clone())
            .collect();
        for n in &nonces {
            if let Some(e) = sessions.remove(n) {
                let _ = e.revoked.send(true);
            }
        }
        nonces.len()
    }

    /// Flips to `true` (or closes) when the session is revoked.
    pub async fn revocation(&self, nonce: &str) -> Option<watch::Receiver<bool>> {
        self.inner
            .sessions
            .read()
            .await
            .get(nonce)
            .map(|e| e.revoked.subscribe())
    }
}
