use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    errors::{ApiError, ErrorContext},
    models::*,
    quiz_service::{QuizService, ServiceError},
};

// Import logging macros
use crate::{log_api_error, log_api_start, log_api_success, log_api_warn};

/// Header carrying the authenticated caller, set by the auth layer in front of this service
pub const USER_ID_HEADER: &str = "x-user-id";

/// Room for base64 expansion and the JSON envelope around an upload
const UPLOAD_ENVELOPE_BYTES: usize = 64 * 1024;

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

#[derive(Clone)]
pub struct AppState {
    pub quiz_service: QuizService,
    pub max_upload_bytes: usize,
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// The caller's user id, read from the `X-User-Id` header
#[derive(Debug, Clone, Copy)]
pub struct UserId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ApiResponse<()>>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim);

        match raw.map(Uuid::parse_str) {
            Some(Ok(id)) => Ok(UserId(id)),
            Some(Err(_)) => Err(ApiError::Unauthorized("malformed user id header".to_string())
                .to_response_with_context(ErrorContext::new("authenticate", "user"))),
            None => Err(ApiError::Unauthorized("missing user id header".to_string())
                .to_response_with_context(ErrorContext::new("authenticate", "user"))),
        }
    }
}

fn service_failure(error: ServiceError, context: ErrorContext) -> (StatusCode, Json<ApiResponse<()>>) {
    ApiError::from(error).to_response_with_context(context)
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    log_api_start!("health");
    Json(json!({
        "status": "ok",
        "generator": state.quiz_service.pipeline().generator_name(),
    }))
}

// Quiz generation endpoints
pub async fn generate_quiz_direct(
    UserId(user_id): UserId,
    State(state): State<AppState>,
    Json(request): Json<GenerateQuizDirectRequest>,
) -> ApiResult<Vec<QuizQuestion>> {
    info!(
        user_id = %user_id,
        question_count = request.question_count,
        content_length = request.content.len(),
        "Generating quiz from submitted content"
    );

    match state.quiz_service.generate_direct(&request).await {
        Ok(questions) => {
            log_api_success!("generate_quiz_direct", count = questions.len(), "quiz generated");
            Ok(Json(ApiResponse::success(questions)))
        }
        Err(e) => {
            log_api_error!("generate_quiz_direct", error = e, "quiz generation failed");
            Err(service_failure(e, ErrorContext::new("generate_quiz_direct", "quiz")))
        }
    }
}

pub async fn generate_quiz(
    UserId(user_id): UserId,
    State(state): State<AppState>,
    Json(request): Json<GenerateQuizRequest>,
) -> ApiResult<GeneratedQuiz> {
    log_api_start!("generate_quiz", file_id = request.file_id);

    match state.quiz_service.generate_quiz_for_file(user_id, &request).await {
        Ok(generated) => {
            log_api_success!("generate_quiz", quiz_id = generated.quiz.id, "quiz generated and stored");
            Ok(Json(ApiResponse::success(generated)))
        }
        Err(e) => {
            log_api_error!("generate_quiz", error = e, "quiz generation failed");
            let context = ErrorContext::new("generate_quiz", "file").with_id(&request.file_id.to_string());
            Err(service_failure(e, context))
        }
    }
}

// File endpoints
pub async fn upload_file(
    UserId(user_id): UserId,
    State(state): State<AppState>,
    Json(request): Json<UploadFileRequest>,
) -> ApiResult<FileRecord> {
    info!(
        user_id = %user_id,
        filename = %request.filename,
        mime_type = %request.mime_type,
        "Uploading file"
    );

    match state.quiz_service.upload_file(user_id, &request).await {
        Ok(file) => {
            log_api_success!("upload_file", file_id = file.id, "file stored");
            Ok(Json(ApiResponse::success(file)))
        }
        Err(e) => Err(service_failure(e, ErrorContext::new("upload_file", "file"))),
    }
}

pub async fn get_file(
    UserId(user_id): UserId,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<FileRecord> {
    log_api_start!("get_file", file_id = id);

    match state.quiz_service.get_file(user_id, id).await {
        Ok(file) => {
            log_api_success!("get_file", file_id = id, "file retrieved");
            Ok(Json(ApiResponse::success(file)))
        }
        Err(e) => {
            let context = ErrorContext::new("get_file", "file").with_id(&id.to_string());
            Err(service_failure(e, context))
        }
    }
}

// Quiz taking endpoints
pub async fn get_quiz(
    UserId(user_id): UserId,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<QuizDetail> {
    log_api_start!("get_quiz", quiz_id = id);

    match state.quiz_service.get_quiz_for_taking(user_id, id).await {
        Ok(detail) => {
            log_api_success!("get_quiz", quiz_id = id, "quiz retrieved");
            Ok(Json(ApiResponse::success(detail)))
        }
        Err(e) => {
            log_api_error!("get_quiz", quiz_id = id, error = e, "quiz lookup failed");
            let context = ErrorContext::new("get_quiz", "quiz").with_id(&id.to_string());
            Err(service_failure(e, context))
        }
    }
}

pub async fn submit_attempt(
    UserId(user_id): UserId,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SubmitAttemptRequest>,
) -> ApiResult<AttemptResult> {
    log_api_start!("submit_attempt", quiz_id = id);

    match state.quiz_service.submit_attempt(user_id, id, &request).await {
        Ok(result) => {
            debug!(
                quiz_id = %id,
                score = result.attempt.score,
                percentage = result.attempt.percentage,
                "Attempt scored"
            );
            log_api_success!("submit_attempt", quiz_id = id, "attempt recorded");
            Ok(Json(ApiResponse::success(result)))
        }
        Err(e) => {
            if matches!(e, ServiceError::Incomplete { .. }) {
                log_api_warn!("submit_attempt", quiz_id = id, "incomplete submission");
            } else {
                log_api_error!("submit_attempt", quiz_id = id, error = e, "attempt submission failed");
            }
            let context = ErrorContext::new("submit_attempt", "quiz").with_id(&id.to_string());
            Err(service_failure(e, context))
        }
    }
}

pub async fn get_history(
    UserId(user_id): UserId,
    State(state): State<AppState>,
) -> ApiResult<QuizHistory> {
    log_api_start!("get_history", user_id = user_id);

    match state.quiz_service.history(user_id).await {
        Ok(history) => {
            log_api_success!("get_history", count = history.attempts.len(), "history loaded");
            Ok(Json(ApiResponse::success(history)))
        }
        Err(e) => {
            log_api_error!("get_history", error = e, "history lookup failed");
            Err(service_failure(e, ErrorContext::new("get_history", "attempt")))
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes / 3 * 4 + UPLOAD_ENVELOPE_BYTES;

    Router::new()
        .route("/health", get(health))
        // Direct pipeline access
        .route("/api/generate-quiz", post(generate_quiz_direct))
        // File routes
        .route("/api/files", post(upload_file))
        .route("/api/files/:id", get(get_file))
        // Quiz routes
        .route("/api/quizzes", post(generate_quiz))
        .route("/api/quizzes/:id", get(get_quiz))
        .route("/api/quizzes/:id/attempts", post(submit_attempt))
        // History
        .route("/api/history", get(get_history))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
