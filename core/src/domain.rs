use crate::api::{ApiGateway, GatewayError};
use crate::session::SessionManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreakInfo {
    pub user_id: Uuid,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_active: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressStats {
    pub user_id: Uuid,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub words_learned: u32,
    pub words_mastered: u32,
    pub total_lessons_completed: u32,
    pub total_study_time_minutes: u32,
    pub movies_started: u32,
    pub movies_completed: u32,
    pub weekly_goal: u32,
    pub weekly_progress: u32,
    #[serde(default)]
    pub recent_activity: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieProgress {
    pub movie_id: String,
    pub movie_title: String,
    pub total_scenes: u32,
    pub completed_scenes: u32,
    pub progress_percentage: f64,
    pub current_scene: u32,
    pub estimated_time_remaining_minutes: u32,
    pub difficulty_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinueLearning {
    pub has_active_session: bool,
    pub recommended_movie: Option<MovieProgress>,
    #[serde(default)]
    pub recent_movies: Vec<MovieProgress>,
    #[serde(default)]
    pub new_movie_suggestions: Vec<Value>,
}

/// Run a gateway call, and on a 401 let the session manager rotate the
/// token pair once before retrying. Every other outcome, including a
/// second 401, passes through untouched.
async fn with_refresh<T, F, Fut>(session: &SessionManager, call: F) -> Result<T, GatewayError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let first = call().await;
    if !matches!(first, Err(GatewayError::Unauthorized { .. })) {
        return first;
    }
    match session.recover_unauthorized().await {
        Ok(true) => call().await,
        _ => first,
    }
}

/// Typed wrapper over the `/gamification/*` endpoints.
#[derive(Clone)]
pub struct GamificationClient {
    gateway: ApiGateway,
    session: SessionManager,
}

impl GamificationClient {
    pub fn new(gateway: ApiGateway, session: SessionManager) -> Self {
        Self { gateway, session }
    }

    pub async fn streak(&self) -> Result<StreakInfo, GatewayError> {
        with_refresh(&self.session, || {
            self.gateway.get("api/v1/gamification/streak")
        })
        .await
    }

    pub async fn progress(&self) -> Result<ProgressStats, GatewayError> {
        with_refresh(&self.session, || {
            self.gateway.get("api/v1/gamification/progress")
        })
        .await
    }

    /// Records today's activity; the server answers with the new streak.
    pub async fn update_streak(&self) -> Result<StreakInfo, GatewayError> {
        with_refresh(&self.session, || {
            self.gateway.post("api/v1/gamification/streak", None)
        })
        .await
    }
}

/// Typed wrapper over the `/learning/*` endpoints.
#[derive(Clone)]
pub struct LearningClient {
    gateway: ApiGateway,
    session: SessionManager,
}

impl LearningClient {
    pub fn new(gateway: ApiGateway, session: SessionManager) -> Self {
        Self { gateway, session }
    }

    pub async fn continue_learning(&self) -> Result<ContinueLearning, GatewayError> {
        with_refresh(&self.session, || {
            self.gateway.get("api/v1/learning/continue")
        })
        .await
    }

    pub async fn movie_progress(&self, movie_id: &str) -> Result<MovieProgress, GatewayError> {
        let path = format!("api/v1/learning/movies/{movie_id}/progress");
        with_refresh(&self.session, || self.gateway.get(&path)).await
    }

    pub async fn start_lesson(&self, movie_id: &str) -> Result<Value, GatewayError> {
        let path = format!("api/v1/learning/movies/{movie_id}/start");
        with_refresh(&self.session, || self.gateway.post(&path, None)).await
    }

    pub async fn complete_lesson(
        &self,
        lesson_id: &str,
        results: &Value,
    ) -> Result<Value, GatewayError> {
        let path = format!("api/v1/learning/lessons/{lesson_id}/complete");
        with_refresh(&self.session, || self.gateway.post(&path, Some(results))).await
    }
}
