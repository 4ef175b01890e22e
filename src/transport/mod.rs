//! HTTP transport layer.
//!
//! Thin axum handlers over [`SurveyEngine`]. Engine calls are synchronous and
//! may sleep between transaction retries, so they run on the blocking pool.

use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::answer::{AnswerSubmission, ResponseId};
use crate::engine::{InsertQuestion, SurveyEngine};
use crate::error::{ExecutionError, SurveyError};
use crate::question::{ChoiceOption, Question, QuestionDraft, QuestionId, QuestionType};

/// Maximum accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024; // 1 MiB

/// Header carrying the caller's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Build the application router.
pub fn router(engine: SurveyEngine) -> Router {
    Router::new()
        .route("/questions", get(list_questions).post(add_question))
        .route("/submit", post(submit_answers))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(cors))
        .with_state(engine)
}

// ----------------------------------------------------------------------------
// Wire types
// ----------------------------------------------------------------------------

/// Body of `POST /questions`: the question fields plus the target position.
#[derive(Debug, Clone, Deserialize)]
pub struct AddQuestionRequest {
    /// Question content.
    #[serde(flatten)]
    pub question: QuestionDraft,
    /// Requested position.
    pub order: u64,
}

/// Reply to `POST /questions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddQuestionResponse {
    /// Human-readable confirmation.
    pub message: String,
    /// Id of the created (or replayed) question.
    pub id: QuestionId,
}

/// A question as listed by `GET /questions`. Stored-only fields such as the
/// idempotency key stay server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    /// Question id.
    pub id: QuestionId,
    /// Display position.
    pub order: u64,
    /// Single or multi choice.
    #[serde(rename = "type")]
    pub kind: QuestionType,
    /// Prompt text.
    pub text: String,
    /// Whether the respondent may skip it.
    pub can_skip: bool,
    /// Selectable options.
    pub options: Vec<ChoiceOption>,
    /// Selection cap for multi-choice questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_selections: Option<u32>,
}

impl From<Question> for QuestionView {
    fn from(q: Question) -> Self {
        Self {
            id: q.id,
            order: q.order,
            kind: q.kind,
            text: q.text,
            can_skip: q.can_skip,
            options: q.options,
            max_selections: q.max_selections,
        }
    }
}

/// Reply to `POST /submit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Human-readable confirmation.
    pub message: String,
    /// Id of the stored submission.
    pub id: ResponseId,
}

/// Reply to `GET /healthz`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: String,
    /// Number of stored questions.
    pub questions: usize,
}

/// Error body shared by every failing route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error message.
    pub error: String,
}

// ----------------------------------------------------------------------------
// Errors
// ----------------------------------------------------------------------------

/// An error on its way to the client.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Status code that will be sent.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Message placed in the `error` field.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<SurveyError> for ApiError {
    fn from(err: SurveyError) -> Self {
        let status = match &err {
            SurveyError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SurveyError::Execution(ExecutionError::TransactionConflict { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SurveyError::Execution(_) | SurveyError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, status = status.as_u16(), "request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, SurveyError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("worker task failed: {e}")))?
        .map_err(ApiError::from)
}

fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    match headers.get(IDEMPOTENCY_KEY_HEADER) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|s| Some(s.to_string()))
            .map_err(|_| ApiError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                message: "Idempotency-Key must be visible ASCII".to_string(),
            }),
    }
}

// ----------------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------------

/// `POST /questions`
///
/// # Errors
/// 422 for unparsable or invalid input, 503 when the insert kept conflicting,
/// 500 for storage failures.
pub async fn add_question(
    State(engine): State<SurveyEngine>,
    headers: HeaderMap,
    payload: Result<Json<AddQuestionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AddQuestionResponse>), ApiError> {
    let Json(request) = payload?;
    let mut insert = InsertQuestion::new(request.question, request.order);
    if let Some(key) = idempotency_key(&headers)? {
        insert = insert.idempotency_key(key);
    }

    let outcome = run_blocking(move || engine.insert_question(insert)).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(AddQuestionResponse {
            message: "Question added".to_string(),
            id: outcome.id,
        }),
    ))
}

/// `GET /questions`
///
/// # Errors
/// 500 for storage failures.
pub async fn list_questions(
    State(engine): State<SurveyEngine>,
) -> Result<Json<Vec<QuestionView>>, ApiError> {
    let questions = run_blocking(move || engine.list_questions()).await?;
    Ok(Json(questions.into_iter().map(QuestionView::from).collect()))
}

/// `POST /submit`
///
/// # Errors
/// 422 for unparsable input, 500 for storage failures.
pub async fn submit_answers(
    State(engine): State<SurveyEngine>,
    peer: Option<ConnectInfo<SocketAddr>>,
    payload: Result<Json<AnswerSubmission>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(submission) = payload?;
    let client_ip = peer.map(|ConnectInfo(addr)| addr.ip().to_string());

    let id = run_blocking(move || engine.submit_answers(submission, client_ip)).await?;
    Ok(Json(SubmitResponse {
        message: "Answers submitted successfully".to_string(),
        id,
    }))
}

/// `GET /healthz`
///
/// # Errors
/// 500 when the question store cannot be read.
pub async fn healthz(State(engine): State<SurveyEngine>) -> Result<Json<HealthResponse>, ApiError> {
    let questions = run_blocking(move || engine.question_count()).await?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        questions,
    }))
}

// ----------------------------------------------------------------------------
// CORS
// ----------------------------------------------------------------------------

/// Allow any origin, method and header. The origin is echoed rather than
/// answered with `*` so credentialed requests are accepted.
async fn cors(request: Request, next: Next) -> Response {
    let origin = request.headers().get(header::ORIGIN).cloned();
    let requested_method = request
        .headers()
        .get(header::ACCESS_CONTROL_REQUEST_METHOD)
        .cloned();
    let requested_headers = request
        .headers()
        .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
        .cloned();

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let h = response.headers_mut();
    h.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        origin.unwrap_or_else(|| HeaderValue::from_static("*")),
    );
    h.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    h.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        requested_method.unwrap_or_else(|| HeaderValue::from_static("GET, POST, OPTIONS")),
    );
    h.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        requested_headers.unwrap_or_else(|| HeaderValue::from_static("*")),
    );
    h.append(header::VARY, HeaderValue::from_static("Origin"));
    response
}
