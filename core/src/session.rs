use crate::api::{AuthApi, GatewayError, TokenPair};
use crate::config::PasswordPolicy;
use crate::publisher::SessionPublisher;
use crate::vault::TokenStore;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const NETWORK_MESSAGE: &str = "Network error. Please try again.";

/// Authenticated account as returned by `auth/me`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub is_premium: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub words_learned: u32,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub longest_streak: u32,
    #[serde(default, rename = "total_study_time")]
    pub total_study_time_minutes: u32,
    #[serde(default)]
    pub movies_completed: u32,
}

/// Where the session currently stands. `RefreshingToken` is still an
/// authenticated state; the user keeps their data on screen while the
/// token pair is being rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Unknown,
    CheckingSession,
    Authenticated,
    RefreshingToken,
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Rejected before any network call was made.
    #[error("{0}")]
    Validation(String),
    /// The server rejected the submitted credentials.
    #[error("{0}")]
    InvalidCredentials(String),
    /// Transport-level failure.
    #[error("{0}")]
    Network(String),
    /// The refresh token was rejected; the user must sign in again.
    #[error("session expired")]
    SessionExpired,
    /// Secure storage failed while persisting or clearing tokens.
    #[error("secure storage failed: {0}")]
    Storage(String),
}

impl SessionError {
    /// Message suitable for direct display.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::InvalidCredentials(msg) | Self::Network(msg) => {
                msg.clone()
            }
            Self::SessionExpired => "Session expired. Please sign in again.".to_string(),
            Self::Storage(_) => "Secure storage is unavailable on this device.".to_string(),
        }
    }
}

/// Immutable view of the session handed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub user: Option<User>,
    pub phase: SessionPhase,
    pub is_loading: bool,
    pub error: Option<SessionError>,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self.phase,
            SessionPhase::Authenticated | SessionPhase::RefreshingToken
        )
    }
}

struct InnerSession {
    phase: SessionPhase,
    user: Option<User>,
    error: Option<SessionError>,
    loading: bool,
    /// True while a login or register submission is in flight.
    busy: bool,
    /// Bumped whenever the session identity changes (logout, expiry).
    /// Async completions captured under an older epoch are discarded.
    epoch: u64,
}

/// Drives the session lifecycle: bootstrap, login, register, logout, and
/// recovery from a rejected access token. Cheap to clone; all clones
/// share one state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<RwLock<InnerSession>>,
    tokens: TokenStore,
    api: Arc<dyn AuthApi>,
    publisher: SessionPublisher,
    password_policy: PasswordPolicy,
}

impl SessionManager {
    pub fn new(api: Arc<dyn AuthApi>, tokens: TokenStore, password_policy: PasswordPolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(InnerSession {
                phase: SessionPhase::Unknown,
                user: None,
                error: None,
                loading: true,
                busy: false,
                epoch: 0,
            })),
            tokens,
            api,
            publisher: SessionPublisher::new(),
            password_policy,
        }
    }

    pub fn publisher(&self) -> &SessionPublisher {
        &self.publisher
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.read();
        SessionSnapshot {
            user: inner.user.clone(),
            phase: inner.phase,
            is_loading: inner.loading,
            error: inner.error.clone(),
        }
    }

    fn publish(&self) {
        // Snapshot first so subscribers never run under the state lock.
        let snapshot = self.snapshot();
        self.publisher.publish(&snapshot);
    }

    /// Restore the session from persisted tokens, typically once at
    /// startup. Any storage failure degrades to the logged-out state
    /// rather than surfacing an error.
    pub async fn bootstrap(&self) {
        let epoch = {
            let mut inner = self.inner.write();
            inner.phase = SessionPhase::CheckingSession;
            inner.loading = true;
            inner.error = None;
            inner.epoch
        };
        self.publish();

        let stored = match self.tokens.load() {
            Ok(stored) => stored,
            Err(err) => {
                warn!(%err, "token store unreadable at startup, treating as signed out");
                None
            }
        };
        if stored.is_none() {
            debug!("no persisted session");
            self.commit_unauthenticated_at(epoch);
            self.publish();
            return;
        }

        match self.api.current_user().await {
            Ok(user) => {
                info!(email = %user.email, "session restored");
                self.commit_authenticated_at(epoch, user);
            }
            Err(err) => {
                debug!(%err, "persisted tokens rejected, clearing");
                let _ = self.tokens.clear();
                self.commit_unauthenticated_at(epoch);
            }
        }
        self.publish();
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<(), SessionError> {
        let Some(epoch) = self.begin_submission() else {
            debug!("login ignored, another submission is in flight");
            return Ok(());
        };
        self.publish();

        let outcome = self.api.login(email, password).await;
        let result = self.complete_sign_in(epoch, outcome, "Login failed").await;
        self.end_submission();
        self.publish();
        result
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<(), SessionError> {
        if password != confirm_password {
            let err = SessionError::Validation("Passwords do not match".to_string());
            self.record_failure_current(err.clone());
            self.publish();
            return Err(err);
        }
        if let Err(msg) = self.password_policy.validate(password) {
            let err = SessionError::Validation(msg);
            self.record_failure_current(err.clone());
            self.publish();
            return Err(err);
        }

        let Some(epoch) = self.begin_submission() else {
            debug!("register ignored, another submission is in flight");
            return Ok(());
        };
        self.publish();

        let outcome = self.api.register(email, password, confirm_password).await;
        let result = self
            .complete_sign_in(epoch, outcome, "Registration failed")
            .await;
        self.end_submission();
        self.publish();
        result
    }

    /// Shared tail of login and register: persist the pair, then confirm
    /// the session by fetching the profile. A completion whose epoch no
    /// longer matches is discarded without touching state.
    async fn complete_sign_in(
        &self,
        epoch: u64,
        outcome: Result<TokenPair, GatewayError>,
        fallback: &str,
    ) -> Result<(), SessionError> {
        let pair = match outcome {
            Ok(pair) => pair,
            Err(err) => {
                let err = credential_error(err, fallback);
                self.record_failure(epoch, err.clone());
                return Err(err);
            }
        };

        if self.stale(epoch) {
            debug!("sign-in completed after logout, discarding");
            return Ok(());
        }
        if let Err(err) = self.tokens.store(&pair.access_token, &pair.refresh_token) {
            let err = SessionError::Storage(err.to_string());
            self.record_failure(epoch, err.clone());
            return Err(err);
        }
        if self.stale(epoch) {
            // Logout won the race after the pair was written.
            let _ = self.tokens.clear();
            return Ok(());
        }

        match self.api.current_user().await {
            Ok(user) => {
                info!(email = %user.email, "signed in");
                self.commit_authenticated_at(epoch, user);
                Ok(())
            }
            Err(err) => {
                let _ = self.tokens.clear();
                let err = credential_error(err, fallback);
                self.record_failure(epoch, err.clone());
                Err(err)
            }
        }
    }

    /// End the session unconditionally. The server call is best-effort;
    /// local tokens and state are cleared regardless of its outcome.
    pub async fn logout(&self) {
        {
            let mut inner = self.inner.write();
            inner.epoch += 1;
            inner.loading = true;
        }
        self.publish();

        if let Err(err) = self.api.logout().await {
            debug!(%err, "server logout failed, clearing locally anyway");
        }
        if let Err(err) = self.tokens.clear() {
            warn!(%err, "failed to clear token store on logout");
        }

        {
            let mut inner = self.inner.write();
            inner.phase = SessionPhase::Unauthenticated;
            inner.user = None;
            inner.error = None;
            inner.loading = false;
        }
        info!("signed out");
        self.publish();
    }

    /// Recover from a 401 on a domain call by rotating the token pair.
    /// Returns `Ok(true)` when the caller may retry the original request
    /// once, `Ok(false)` when the rejection was stale or recovery is
    /// already underway elsewhere.
    pub async fn recover_unauthorized(&self) -> Result<bool, SessionError> {
        let epoch = {
            let mut inner = self.inner.write();
            if inner.busy {
                debug!("401 recovery skipped, a submission is in flight");
                return Ok(false);
            }
            inner.busy = true;
            if inner.phase == SessionPhase::Authenticated {
                inner.phase = SessionPhase::RefreshingToken;
            }
            inner.epoch
        };
        self.publish();

        let result = self.refresh_once(epoch).await;
        self.end_submission();
        self.publish();
        result
    }

    async fn refresh_once(&self, epoch: u64) -> Result<bool, SessionError> {
        let refresh = match self.tokens.refresh_token() {
            Ok(Some(token)) => token,
            Ok(None) => return self.expire(epoch),
            Err(err) => {
                warn!(%err, "token store unreadable during refresh");
                return self.expire(epoch);
            }
        };

        let pair = match self.api.refresh(&refresh).await {
            Ok(pair) => pair,
            Err(err) => {
                debug!(%err, "refresh rejected");
                return self.expire(epoch);
            }
        };

        if self.stale(epoch) {
            return Ok(false);
        }
        if let Err(err) = self.tokens.store(&pair.access_token, &pair.refresh_token) {
            let err = SessionError::Storage(err.to_string());
            self.record_failure(epoch, err.clone());
            return Err(err);
        }
        if self.stale(epoch) {
            let _ = self.tokens.clear();
            return Ok(false);
        }

        match self.api.current_user().await {
            Ok(user) => {
                debug!("token pair rotated");
                self.commit_authenticated_at(epoch, user);
                Ok(true)
            }
            Err(err) => {
                debug!(%err, "rotated tokens rejected");
                self.expire(epoch)
            }
        }
    }

    /// The refresh path failed; drop to signed-out with a session-expired
    /// error. Stale epochs mean logout already handled it.
    fn expire(&self, epoch: u64) -> Result<bool, SessionError> {
        if self.stale(epoch) {
            return Ok(false);
        }
        if let Err(err) = self.tokens.clear() {
            warn!(%err, "failed to clear token store on expiry");
        }
        {
            let mut inner = self.inner.write();
            inner.phase = SessionPhase::Unauthenticated;
            inner.user = None;
            inner.error = Some(SessionError::SessionExpired);
            inner.loading = false;
            inner.epoch += 1;
        }
        info!("session expired");
        Err(SessionError::SessionExpired)
    }

    /// Claims the submission slot. Returns the current epoch, or `None`
    /// when another submission already holds it.
    fn begin_submission(&self) -> Option<u64> {
        let mut inner = self.inner.write();
        if inner.busy {
            return None;
        }
        inner.busy = true;
        inner.loading = true;
        inner.error = None;
        Some(inner.epoch)
    }

    fn end_submission(&self) {
        let mut inner = self.inner.write();
        inner.busy = false;
        inner.loading = false;
    }

    fn stale(&self, epoch: u64) -> bool {
        self.inner.read().epoch != epoch
    }

    fn record_failure(&self, epoch: u64, err: SessionError) {
        let mut inner = self.inner.write();
        if inner.epoch != epoch {
            return;
        }
        inner.error = Some(err);
        // A failed submission must not tear down an existing session.
        if inner.phase != SessionPhase::Authenticated {
            inner.phase = SessionPhase::Unauthenticated;
        }
    }

    fn record_failure_current(&self, err: SessionError) {
        let epoch = self.inner.read().epoch;
        self.record_failure(epoch, err);
    }

    fn commit_authenticated_at(&self, epoch: u64, user: User) {
        let mut inner = self.inner.write();
        if inner.epoch != epoch {
            return;
        }
        inner.phase = SessionPhase::Authenticated;
        inner.user = Some(user);
        inner.error = None;
        inner.loading = false;
    }

    fn commit_unauthenticated_at(&self, epoch: u64) {
        let mut inner = self.inner.write();
        if inner.epoch != epoch {
            return;
        }
        inner.phase = SessionPhase::Unauthenticated;
        inner.user = None;
        inner.loading = false;
    }
}

/// Map a gateway failure from a credential submission to the session
/// error surfaced to the user. Server-supplied detail wins; transport
/// failures get the fixed retry message.
fn credential_error(err: GatewayError, fallback: &str) -> SessionError {
    match err {
        GatewayError::Network(_) => SessionError::Network(NETWORK_MESSAGE.to_string()),
        other => {
            let detail = other
                .detail()
                .map(str::to_string)
                .unwrap_or_else(|| fallback.to_string());
            SessionError::InvalidCredentials(detail)
        }
    }
}
