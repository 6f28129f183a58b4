//! Server-side sessions
//!
//! Session data lives in memory; the browser only holds `id.signature`
//! where the signature is an HMAC-SHA256 of the id under the secret key.
//! Unsigned, tampered, unknown or expired cookies start a fresh session.

use crate::forecast::ForecastOutcome;
use crate::history::{History, TestRecord};
use crate::stats::TestResult;
use axum::extract::{Request, State};
use axum::http::header::SET_COOKIE;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Everything a browser session carries between requests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionData {
    pub current_file: Option<String>,
    pub file_columns: Vec<String>,
    pub file_dtypes: BTreeMap<String, String>,
    pub last_result: Option<TestResult>,
    pub history: History<TestRecord>,
    pub last_forecast: Option<ForecastOutcome>,
    pub forecast_history: History<ForecastOutcome>,
    pub user_id: Option<i64>,
    /// Recent `/upload/api_fetch` calls, for the per-session limit
    pub api_fetch_times: Vec<DateTime<Utc>>,
}

impl SessionData {
    /// Forget the dataset selection
    pub fn clear_file(&mut self) {
        self.current_file = None;
        self.file_columns.clear();
        self.file_dtypes.clear();
    }
}

struct SessionEntry {
    data: SessionData,
    last_seen: Instant,
}

/// In-memory session store with signed cookie ids
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    key: Vec<u8>,
    cookie_name: String,
    lifetime: Duration,
    secure: bool,
}

impl SessionStore {
    pub fn new(secret_key: &str, cookie_name: &str, lifetime_secs: u64, secure: bool) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            key: secret_key.as_bytes().to_vec(),
            cookie_name: cookie_name.to_string(),
            lifetime: Duration::from_secs(lifetime_secs),
            secure,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    fn signature(&self, id: &str) -> Option<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(id.as_bytes());
        Some(mac.finalize().into_bytes().to_vec())
    }

    /// Cookie value for a session id
    pub fn sign(&self, id: &str) -> String {
        let sig = self.signature(id).unwrap_or_default();
        format!("{}.{}", id, URL_SAFE_NO_PAD.encode(sig))
    }

    /// Session id from a cookie value, when the signature checks out
    pub fn verify(&self, cookie_value: &str) -> Option<String> {
        let (id, sig) = cookie_value.rsplit_once('.')?;
        let sig = URL_SAFE_NO_PAD.decode(sig).ok()?;
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(id.as_bytes());
        mac.verify_slice(&sig).ok()?;
        Some(id.to_string())
    }

    fn new_id() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Existing live session for the cookie, or a new one (`true` when created)
    pub async fn resolve(self: &Arc<Self>, cookie_value: Option<&str>) -> (SessionHandle, bool) {
        let now = Instant::now();
        let candidate = cookie_value.and_then(|v| self.verify(v));

        let mut sessions = self.sessions.write().await;
        if let Some(id) = candidate {
            if let Some(entry) = sessions.get_mut(&id) {
                if now.duration_since(entry.last_seen) <= self.lifetime {
                    entry.last_seen = now;
                    return (self.handle(id), false);
                }
                debug!("Session expired");
                sessions.remove(&id);
            }
        } else if cookie_value.is_some() {
            warn!("Rejected session cookie with an invalid signature");
        }

        let lifetime = self.lifetime;
        sessions.retain(|_, e| now.duration_since(e.last_seen) <= lifetime);
        let id = Self::new_id();
        sessions.insert(
            id.clone(),
            SessionEntry {
                data: SessionData::default(),
                last_seen: now,
            },
        );
        (self.handle(id), true)
    }

    fn handle(self: &Arc<Self>, id: String) -> SessionHandle {
        SessionHandle {
            id,
            store: Arc::clone(self),
        }
    }

    /// Set-Cookie header value for a session
    pub fn set_cookie_value(&self, id: &str) -> String {
        let cookie: Cookie<'static> = Cookie::build((self.cookie_name.clone(), self.sign(id)))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .build();
        format!("{}; Max-Age={}", cookie, self.lifetime.as_secs())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Request-scoped access to one session
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    store: Arc<SessionStore>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn read<R>(&self, f: impl FnOnce(&SessionData) -> R) -> R {
        let sessions = self.store.sessions.read().await;
        match sessions.get(&self.id) {
            Some(entry) => f(&entry.data),
            None => f(&SessionData::default()),
        }
    }

    pub async fn update<R>(&self, f: impl FnOnce(&mut SessionData) -> R) -> R {
        let mut sessions = self.store.sessions.write().await;
        let entry = sessions.entry(self.id.clone()).or_insert_with(|| SessionEntry {
            data: SessionData::default(),
            last_seen: Instant::now(),
        });
        f(&mut entry.data)
    }
}

/// Attach a [`SessionHandle`] to every request; new sessions get a cookie
pub async fn session_middleware(
    State(store): State<Arc<SessionStore>>,
    mut req: Request,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(req.headers());
    let cookie_value = jar.get(store.cookie_name()).map(|c| c.value().to_string());
    let (handle, created) = store.resolve(cookie_value.as_deref()).await;
    let id = handle.id().to_string();
    req.extensions_mut().insert(handle);

    let mut response = next.run(req).await;
    if created {
        match HeaderValue::from_str(&store.set_cookie_value(&id)) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => warn!("Could not encode session cookie: {}", e),
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(lifetime: u64) -> Arc<SessionStore> {
        Arc::new(SessionStore::new("k", "boursa_session", lifetime, false))
    }

    #[test]
    fn test_sign_and_verify() {
        let s = store(60);
        let value = s.sign("abc");
        assert_eq!(s.verify(&value).as_deref(), Some("abc"));
        assert!(s.verify("abc.AAAA").is_none());
        assert!(s.verify("abc").is_none());

        let other = SessionStore::new("other-key", "boursa_session", 60, false);
        assert!(other.verify(&value).is_none());
    }

    #[tokio::test]
    async fn test_resolve_reuses_signed_session() {
        let s = store(60);
        let (first, created) = s.resolve(None).await;
        assert!(created);
        first.update(|d| d.current_file = Some("a.csv".into())).await;

        let cookie = s.sign(first.id());
        let (again, created) = s.resolve(Some(&cookie)).await;
        assert!(!created);
        assert_eq!(again.id(), first.id());
        let file = again.read(|d| d.current_file.clone()).await;
        assert_eq!(file.as_deref(), Some("a.csv"));
    }

    #[tokio::test]
    async fn test_forged_cookie_gets_fresh_session() {
        let s = store(60);
        let (first, _) = s.resolve(None).await;
        let forged = format!("{}.bm90LWEtc2ln", first.id());
        let (other, created) = s.resolve(Some(&forged)).await;
        assert!(created);
        assert_ne!(other.id(), first.id());
    }

    #[tokio::test]
    async fn test_expired_session_is_replaced() {
        let s = store(0);
        let (first, _) = s.resolve(None).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (second, created) = s.resolve(Some(&s.sign(first.id()))).await;
        assert!(created);
        assert_ne!(second.id(), first.id());
        assert_eq!(s.len().await, 1);
    }

    #[test]
    fn test_cookie_attributes() {
        let s = store(86400);
        let c = s.set_cookie_value("abc");
        assert!(c.starts_with("boursa_session=abc."));
        assert!(c.contains("HttpOnly"));
        assert!(c.contains("SameSite=Lax"));
        assert!(c.contains("Max-Age=86400"));
        assert!(!c.contains("Secure"));
    }

    #[test]
    fn test_clear_file() {
        let mut d = SessionData {
            current_file: Some("x.csv".into()),
            file_columns: vec!["A".into()],
            ..Default::default()
        };
        d.clear_file();
        assert!(d.current_file.is_none() && d.file_columns.is_empty());
    }
}
