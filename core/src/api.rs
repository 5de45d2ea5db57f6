use crate::config::ClientConfig;
use crate::session::User;
use crate::vault::TokenStore;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// Token pair issued by the auth endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "TokenPair::default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: u64,
}

impl TokenPair {
    fn default_token_type() -> String {
        "bearer".to_string()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Non-2xx response other than 401. `detail` is the server's own
    /// message, passed through verbatim.
    #[error("request failed with status {status}: {detail}")]
    Api { status: u16, detail: String },
    /// 401 from any endpoint.
    #[error("unauthorized: {detail}")]
    Unauthorized { detail: String },
    /// Transport failure: DNS, refused connection, timeout, or a body
    /// that did not parse.
    #[error("network error: {0}")]
    Network(String),
}

impl GatewayError {
    /// Server-supplied message, when one was present and non-empty.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Api { detail, .. } | Self::Unauthorized { detail } => {
                (!detail.is_empty()).then_some(detail.as_str())
            }
            Self::Network(_) => None,
        }
    }
}

/// The auth surface of the backend. [`ApiGateway`] talks to a real
/// server; [`MockApi`] is the in-process stand-in used by tests and the
/// smoke harness.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<TokenPair, GatewayError>;
    async fn register(
        &self,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<TokenPair, GatewayError>;
    async fn current_user(&self) -> Result<User, GatewayError>;
    async fn logout(&self) -> Result<(), GatewayError>;
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, GatewayError>;
}

/// HTTP client for the CineFluent backend. Attaches the stored access
/// token as a bearer header on every request that has one available.
#[derive(Clone)]
pub struct ApiGateway {
    http: reqwest::Client,
    base_url: Url,
    tokens: TokenStore,
}

impl ApiGateway {
    pub fn new(config: &ClientConfig, tokens: TokenStore) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| GatewayError::Network(err.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            tokens,
        })
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| GatewayError::Network(format!("invalid endpoint {path}: {err}")))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let payload = self.request(reqwest::Method::GET, path, None).await?;
        decode(path, payload)
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, GatewayError> {
        let payload = self.request(reqwest::Method::POST, path, body).await?;
        decode(path, payload)
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, GatewayError> {
        let payload = self.request(reqwest::Method::PUT, path, body).await?;
        decode(path, payload)
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let payload = self.request(reqwest::Method::DELETE, path, None).await?;
        decode(path, payload)
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, GatewayError> {
        let url = self.endpoint(path)?;
        let mut builder = self.http.request(method.clone(), url);
        match self.tokens.access_token() {
            Ok(Some(token)) => builder = builder.bearer_auth(token),
            Ok(None) => {}
            Err(err) => {
                // An unreadable vault should not block anonymous calls.
                warn!(%err, "token store unreadable, sending request unauthenticated");
            }
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        debug!(%method, path, "api request");
        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;
        let payload: Value = if text.is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(payload) => payload,
                Err(err) if status.is_success() => {
                    return Err(GatewayError::Network(format!(
                        "malformed response body: {err}"
                    )));
                }
                // A non-JSON error page (proxy HTML and the like) still
                // carries a meaningful status.
                Err(_) => Value::Null,
            }
        };

        if status.is_success() {
            return Ok(payload);
        }
        let detail = error_detail(&payload);
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Unauthorized { detail });
        }
        Err(GatewayError::Api {
            status: status.as_u16(),
            detail,
        })
    }
}

fn decode<T: DeserializeOwned>(path: &str, payload: Value) -> Result<T, GatewayError> {
    serde_json::from_value(payload)
        .map_err(|err| GatewayError::Network(format!("malformed response from {path}: {err}")))
}

/// FastAPI puts messages under `detail`; a few handlers use `error`.
fn error_detail(payload: &Value) -> String {
    payload["detail"]
        .as_str()
        .or_else(|| payload["error"].as_str())
        .unwrap_or_default()
        .to_string()
}

fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Network("request timed out".to_string())
    } else {
        GatewayError::Network(err.to_string())
    }
}

#[async_trait]
impl AuthApi for ApiGateway {
    async fn login(&self, email: &str, password: &str) -> Result<TokenPair, GatewayError> {
        self.post(
            "api/v1/auth/login",
            Some(&json!({ "email": email, "password": password })),
        )
        .await
    }

    async fn register(
        &self,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<TokenPair, GatewayError> {
        self.post(
            "api/v1/auth/register",
            Some(&json!({
                "email": email,
                "password": password,
                "confirm_password": confirm_password,
            })),
        )
        .await
    }

    async fn current_user(&self) -> Result<User, GatewayError> {
        self.get("api/v1/auth/me").await
    }

    async fn logout(&self) -> Result<(), GatewayError> {
        let _: Value = self.post("api/v1/auth/logout", None).await?;
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, GatewayError> {
        self.post(
            "api/v1/auth/refresh",
            Some(&json!({ "refresh_token": refresh_token })),
        )
        .await
    }
}

#[derive(Default)]
struct MockState {
    accounts: HashMap<String, String>,
    users: HashMap<String, User>,
    access_sessions: HashMap<String, String>,
    refresh_sessions: HashMap<String, String>,
}

/// In-process backend double with the same error shapes as the real
/// server. Counters and failure toggles let tests observe and steer it.
pub struct MockApi {
    tokens: TokenStore,
    latency: Duration,
    state: RwLock<MockState>,
    reject_refresh: AtomicBool,
    fail_logout: AtomicBool,
    login_calls: AtomicUsize,
    register_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    me_calls: AtomicUsize,
    active_logins: AtomicUsize,
    max_active_logins: AtomicUsize,
}

impl MockApi {
    pub fn new(tokens: TokenStore) -> Self {
        Self::with_latency(tokens, Duration::ZERO)
    }

    pub fn with_latency(tokens: TokenStore, latency: Duration) -> Self {
        Self {
            tokens,
            latency,
            state: RwLock::new(MockState::default()),
            reject_refresh: AtomicBool::new(false),
            fail_logout: AtomicBool::new(false),
            login_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            me_calls: AtomicUsize::new(0),
            active_logins: AtomicUsize::new(0),
            max_active_logins: AtomicUsize::new(0),
        }
    }

    pub fn add_account(&self, email: &str, password: &str) {
        let mut state = self.state.write();
        state.accounts.insert(email.to_string(), password.to_string());
        state
            .users
            .entry(email.to_string())
            .or_insert_with(|| sample_user(email));
    }

    /// Invalidate every outstanding access token while leaving refresh
    /// tokens valid, as a server restart would.
    pub fn expire_access_tokens(&self) {
        self.state.write().access_sessions.clear();
    }

    pub fn set_reject_refresh(&self, reject: bool) {
        self.reject_refresh.store(reject, Ordering::SeqCst);
    }

    pub fn set_fail_logout(&self, fail: bool) {
        self.fail_logout.store(fail, Ordering::SeqCst);
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn me_calls(&self) -> usize {
        self.me_calls.load(Ordering::SeqCst)
    }

    /// Highest number of logins that were in flight at the same time.
    pub fn max_concurrent_logins(&self) -> usize {
        self.max_active_logins.load(Ordering::SeqCst)
    }

    fn issue_pair(&self, email: &str) -> TokenPair {
        let pair = TokenPair {
            access_token: format!("access-{}", Uuid::new_v4()),
            refresh_token: format!("refresh-{}", Uuid::new_v4()),
            token_type: "bearer".to_string(),
            expires_in: 1800,
        };
        let mut state = self.state.write();
        state
            .access_sessions
            .insert(pair.access_token.clone(), email.to_string());
        state
            .refresh_sessions
            .insert(pair.refresh_token.clone(), email.to_string());
        pair
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl AuthApi for MockApi {
    async fn login(&self, email: &str, password: &str) -> Result<TokenPair, GatewayError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active_logins.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_logins.fetch_max(active, Ordering::SeqCst);
        self.simulate_latency().await;
        self.active_logins.fetch_sub(1, Ordering::SeqCst);

        let valid = self
            .state
            .read()
            .accounts
            .get(email)
            .is_some_and(|stored| stored == password);
        if !valid {
            return Err(GatewayError::Unauthorized {
                detail: "Incorrect email or password".to_string(),
            });
        }
        Ok(self.issue_pair(email))
    }

    async fn register(
        &self,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<TokenPair, GatewayError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if password != confirm_password {
            return Err(GatewayError::Api {
                status: 400,
                detail: "Passwords do not match".to_string(),
            });
        }
        if self.state.read().accounts.contains_key(email) {
            return Err(GatewayError::Api {
                status: 400,
                detail: "Email already registered".to_string(),
            });
        }
        self.add_account(email, password);
        Ok(self.issue_pair(email))
    }

    async fn current_user(&self) -> Result<User, GatewayError> {
        self.me_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let access = self
            .tokens
            .access_token()
            .map_err(|err| GatewayError::Network(err.to_string()))?;
        let state = self.state.read();
        access
            .and_then(|token| state.access_sessions.get(&token))
            .and_then(|email| state.users.get(email))
            .cloned()
            .ok_or_else(|| GatewayError::Unauthorized {
                detail: "Could not validate credentials".to_string(),
            })
    }

    async fn logout(&self) -> Result<(), GatewayError> {
        self.simulate_latency().await;
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(GatewayError::Network("connection reset".to_string()));
        }
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, GatewayError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if self.reject_refresh.load(Ordering::SeqCst) {
            return Err(GatewayError::Unauthorized {
                detail: "Invalid refresh token".to_string(),
            });
        }
        // Refresh rotates: the presented token is consumed.
        let email = self.state.write().refresh_sessions.remove(refresh_token);
        match email {
            Some(email) => Ok(self.issue_pair(&email)),
            None => Err(GatewayError::Unauthorized {
                detail: "Invalid refresh token".to_string(),
            }),
        }
    }
}

fn sample_user(email: &str) -> User {
    User {
        id: Uuid::new_v4(),
        email: email.to_string(),
        is_premium: false,
        created_at: Utc::now(),
        words_learned: 12,
        current_streak: 3,
        longest_streak: 7,
        total_study_time_minutes: 240,
        movies_completed: 1,
    }
}
