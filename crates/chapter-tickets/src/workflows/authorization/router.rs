use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{Match, MatchId, MemberId, RequestId, RequestStatus};
use super::notify::NotificationSink;
use super::store::RequestStore;
use super::submission::{Submission, SubmissionCoordinator, SubmissionError};
use super::window::WindowState;

/// Router builder exposing the chapter-facing and review endpoints.
///
/// Handlers read the wall clock here and pass it down; nothing below the
/// router looks at the current time on its own.
pub fn authorization_router<S, N>(coordinator: Arc<SubmissionCoordinator<S, N>>) -> Router
where
    S: RequestStore + 'static,
    N: NotificationSink + 'static,
{
    Router::new()
        .route("/api/v1/matches", get(windows_handler::<S, N>))
        .route("/api/v1/matches/open", get(open_matches_handler::<S, N>))
        .route(
            "/api/v1/matches/:match_id/candidates",
            get(candidates_handler::<S, N>),
        )
        .route(
            "/api/v1/matches/:match_id/requests",
            get(list_handler::<S, N>).post(submit_handler::<S, N>),
        )
        .route(
            "/api/v1/matches/:match_id/summary",
            get(summary_handler::<S, N>),
        )
        .route("/api/v1/requests/:request_id", get(request_handler::<S, N>))
        .route(
            "/api/v1/requests/:request_id/status",
            patch(status_handler::<S, N>),
        )
        .with_state(coordinator)
}

#[derive(Debug, Default, Deserialize)]
pub struct ChapterFilter {
    #[serde(default)]
    pub chapter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CandidatesQuery {
    pub chapter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitPayload {
    pub chapter: String,
    pub member_ids: Vec<MemberId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: RequestStatus,
}

#[derive(Debug, Serialize)]
struct MatchWindowView {
    #[serde(flatten)]
    fixture: Match,
    window_state: WindowState,
}

pub(crate) async fn windows_handler<S, N>(
    State(coordinator): State<Arc<SubmissionCoordinator<S, N>>>,
) -> Response
where
    S: RequestStore + 'static,
    N: NotificationSink + 'static,
{
    match coordinator.window_states(Utc::now()) {
        Ok(states) => {
            let views: Vec<MatchWindowView> = states
                .into_iter()
                .map(|(fixture, window_state)| MatchWindowView {
                    fixture,
                    window_state,
                })
                .collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn open_matches_handler<S, N>(
    State(coordinator): State<Arc<SubmissionCoordinator<S, N>>>,
) -> Response
where
    S: RequestStore + 'static,
    N: NotificationSink + 'static,
{
    let now = Utc::now();
    match coordinator.open_matches(now) {
        Ok(matches) => {
            let payload = json!({
                "evaluated_at": now,
                "overlapping": matches.len() > 1,
                "matches": matches,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn candidates_handler<S, N>(
    State(coordinator): State<Arc<SubmissionCoordinator<S, N>>>,
    Path(match_id): Path<String>,
    Query(query): Query<CandidatesQuery>,
) -> Response
where
    S: RequestStore + 'static,
    N: NotificationSink + 'static,
{
    match coordinator
        .candidates(&MatchId(match_id), &query.chapter)
        .await
    {
        Ok(members) => (StatusCode::OK, Json(members)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn list_handler<S, N>(
    State(coordinator): State<Arc<SubmissionCoordinator<S, N>>>,
    Path(match_id): Path<String>,
    Query(filter): Query<ChapterFilter>,
) -> Response
where
    S: RequestStore + 'static,
    N: NotificationSink + 'static,
{
    match coordinator
        .requests(&MatchId(match_id), filter.chapter.as_deref())
        .await
    {
        Ok(requests) => (StatusCode::OK, Json(requests)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn submit_handler<S, N>(
    State(coordinator): State<Arc<SubmissionCoordinator<S, N>>>,
    Path(match_id): Path<String>,
    Json(payload): Json<SubmitPayload>,
) -> Response
where
    S: RequestStore + 'static,
    N: NotificationSink + 'static,
{
    let submission = Submission {
        match_id: MatchId(match_id),
        chapter: payload.chapter,
        member_ids: payload.member_ids,
    };

    match coordinator.submit(submission, Utc::now()).await {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn summary_handler<S, N>(
    State(coordinator): State<Arc<SubmissionCoordinator<S, N>>>,
    Path(match_id): Path<String>,
    Query(filter): Query<ChapterFilter>,
) -> Response
where
    S: RequestStore + 'static,
    N: NotificationSink + 'static,
{
    match coordinator
        .summary(&MatchId(match_id), filter.chapter.as_deref())
        .await
    {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn request_handler<S, N>(
    State(coordinator): State<Arc<SubmissionCoordinator<S, N>>>,
    Path(request_id): Path<String>,
) -> Response
where
    S: RequestStore + 'static,
    N: NotificationSink + 'static,
{
    match coordinator.get(&RequestId(request_id)).await {
        Ok(request) => (StatusCode::OK, Json(request)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn status_handler<S, N>(
    State(coordinator): State<Arc<SubmissionCoordinator<S, N>>>,
    Path(request_id): Path<String>,
    Json(payload): Json<StatusPayload>,
) -> Response
where
    S: RequestStore + 'static,
    N: NotificationSink + 'static,
{
    match coordinator
        .update_status(&RequestId(request_id), payload.status)
        .await
    {
        Ok(request) => (StatusCode::OK, Json(request)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) fn error_response(err: SubmissionError) -> Response {
    let message = err.to_string();
    let (status, payload) = match err {
        SubmissionError::Validation(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": message }),
        ),
        SubmissionError::WindowClosed { match_id } => (
            StatusCode::FORBIDDEN,
            json!({ "error": message, "match_id": match_id }),
        ),
        SubmissionError::Duplicate {
            match_id,
            member_ids,
        } => (
            StatusCode::CONFLICT,
            json!({
                "error": message,
                "match_id": match_id,
                "conflicting_member_ids": member_ids,
            }),
        ),
        SubmissionError::Transition { id, from, to } => (
            StatusCode::CONFLICT,
            json!({ "error": message, "request_id": id, "from": from, "to": to }),
        ),
        SubmissionError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            json!({ "error": message, "request_id": id }),
        ),
        infrastructure @ (SubmissionError::Storage(_) | SubmissionError::Directory(_)) => {
            let retryable = infrastructure.is_retryable();
            let status = if retryable {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, json!({ "error": message, "retryable": retryable }))
        }
    };

    (status, Json(payload)).into_response()
}
