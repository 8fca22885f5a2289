pub mod cache;
pub mod commits;
pub mod config;
pub mod error;
pub mod github;
pub mod languages;
pub mod pagination;
pub mod querier;
pub mod repos;
pub mod retry;
pub mod scores;
pub mod wrapped;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cache::CacheStatsSnapshot;
use chrono::{DateTime, Utc};
use commits::{CommitSummary, RepoCommitSummary};
use config::AppConfig;
use error::{ActivityError, UpstreamError};
use github::CommitFilter;
use languages::LanguageBreakdown;
use querier::ActivityQuerier;
use scores::ScoreReport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use wrapped::WrappedReport;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// Shared application state accessible to all request handlers.
pub struct AppState {
    /// Service for querying user activity.
    pub querier: ActivityQuerier,
}

impl AppState {
    /// Initializes the application state from configuration loaded at startup.
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let querier = ActivityQuerier::new(config)?;
        Ok(Self { querier })
    }

    /// Wraps an already assembled querier.
    pub fn with_querier(querier: ActivityQuerier) -> Self {
        Self { querier }
    }
}

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/commits/summary/{username}", get(get_commit_summary))
        .route("/api/commits/{username}/repos", get(get_repo_commits))
        .route("/api/languages/{username}", get(get_language_breakdown))
        .route("/api/scores/{username}", get(get_score))
        .route("/api/wrapped/{username}", get(get_wrapped_report))
        .route("/api/cache/stats", get(get_cache_stats))
        .route("/api/cache/stats/reset", post(reset_cache_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// JSON error payload: a message plus the upstream status when there was one.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl From<ActivityError> for ApiError {
    fn from(err: ActivityError) -> Self {
        let upstream_status = err.status();
        let status = match err.upstream() {
            UpstreamError::Rejected { status, .. } => match *status {
                401 | 403 | 404 | 429 => {
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
                }
                _ => StatusCode::BAD_GATEWAY,
            },
            UpstreamError::Unavailable { .. } => StatusCode::BAD_GATEWAY,
        };

        let message = match status {
            StatusCode::NOT_FOUND => "GitHub user or repository not found",
            StatusCode::UNAUTHORIZED => "GitHub credential rejected",
            StatusCode::FORBIDDEN => "GitHub denied access",
            StatusCode::TOO_MANY_REQUESTS => "GitHub rate limit exceeded",
            _ => "Failed to fetch data from GitHub",
        };

        Self {
            status,
            body: ErrorBody {
                message: message.to_string(),
                status: upstream_status,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Credential from `Authorization: Bearer <token>`, if any.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[derive(Debug, Default, Deserialize)]
pub struct CommitsQuery {
    pub since: Option<DateTime<Utc>>,
    pub author: Option<String>,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "github-wrapped",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn get_commit_summary(
    Path(username): Path<String>,
    Query(query): Query<CommitsQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Json<CommitSummary> {
    let summary = state
        .querier
        .total_commits_for_user(&username, bearer_token(&headers), query.since)
        .await;
    Json(summary)
}

pub async fn get_repo_commits(
    Path(username): Path<String>,
    Query(query): Query<CommitsQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Json<RepoCommitSummary>, ApiError> {
    let filter = CommitFilter {
        author: query.author,
        since: query.since,
    };
    let summary = state
        .querier
        .summarize_commits(&username, bearer_token(&headers), &filter)
        .await
        .inspect_err(|e| tracing::error!(username, "Failed to summarize commits: {}", e))?;
    Ok(Json(summary))
}

pub async fn get_language_breakdown(
    Path(username): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Json<LanguageBreakdown>, ApiError> {
    let breakdown = state
        .querier
        .language_breakdown(&username, bearer_token(&headers))
        .await
        .inspect_err(|e| tracing::error!(username, "Failed to build language breakdown: {}", e))?;
    Ok(Json(breakdown))
}

pub async fn get_score(
    Path(username): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Json<ScoreReport>, ApiError> {
    let score = state
        .querier
        .calculate_score(&username, bearer_token(&headers))
        .await
        .inspect_err(|e| tracing::error!(username, "Failed to calculate score: {}", e))?;
    Ok(Json(score))
}

pub async fn get_wrapped_report(
    Path(username): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Json<WrappedReport>, ApiError> {
    let report = state
        .querier
        .wrapped_report(&username, bearer_token(&headers))
        .await
        .inspect_err(|e| tracing::error!(username, "Failed to build wrapped report: {}", e))?;
    tracing::debug!(username, "Returning wrapped report");
    Ok(Json(report))
}

pub async fn get_cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStatsSnapshot> {
    Json(state.querier.cache_stats().snapshot())
}

pub async fn reset_cache_stats(State(state): State<Arc<AppState>>) -> StatusCode {
    state.querier.cache_stats().reset();
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::querier::testing::*;
    use axum::{body::Body, http::HeaderValue, http::Request};
    use tower::ServiceExt; // for `oneshot`

    fn app_over(api: &FakeGitHub) -> Router {
        create_app(Arc::new(AppState::with_querier(querier(api))))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body_bytes).unwrap())
    }

    #[tokio::test]
    async fn test_fan_out_routes_are_served() {
        let api = FakeGitHub::new()
            .with_repo("octocat", "hello", 500)
            .with_repo("octocat", "world", 0)
            .with_languages("hello", &[("Rust", 3000), ("Shell", 1000)])
            .with_languages("world", &[("Rust", 1000)])
            .with_commits("hello", 3)
            .with_commits("world", 2);
        let app = app_over(&api);

        let (status, body) = get_json(app.clone(), "/api/wrapped/octocat").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalCommits"], 5);
        assert_eq!(body["score"], 31);

        let (status, body) = get_json(app.clone(), "/api/languages/octocat").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalBytes"], 5000);

        let (status, body) = get_json(app.clone(), "/api/scores/octocat").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["score"], 31);

        let (status, body) = get_json(app.clone(), "/api/commits/summary/octocat").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["repoCount"], 2);

        let (status, body) = get_json(app, "/api/commits/octocat/repos").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["repos"][1]["commitCount"], 2);
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer ghp_abc"));
        assert_eq!(bearer_token(&headers), Some("ghp_abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_upstream_statuses_map_to_http() {
        let not_found: ApiError =
            ActivityError::from(UpstreamError::rejected("list_repos", "ghost", 404, "Not Found"))
                .into();
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);
        assert_eq!(not_found.body.status, Some(404));

        let server_error: ApiError =
            ActivityError::from(UpstreamError::rejected("list_repos", "octocat", 500, "oops"))
                .into();
        assert_eq!(server_error.status, StatusCode::BAD_GATEWAY);

        let offline: ApiError =
            ActivityError::from(UpstreamError::unavailable("list_repos", "octocat", "timeout"))
                .into();
        assert_eq!(offline.status, StatusCode::BAD_GATEWAY);
        assert_eq!(offline.body.status, None);
    }
}
