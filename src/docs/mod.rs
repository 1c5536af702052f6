use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, description = "Hub is running", body = HealthResponse),
        (status = 503, description = "Hub is not running", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Submit code for execution
#[utoipa::path(
    post,
    path = "/conference-session/{session_id}/code/",
    params(("session_id" = i32, Path, description = "Tutoring session ID")),
    request_body = SubmitCodeRequest,
    responses(
        (status = 200, description = "Code recorded and dispatched", body = SubmitCodeResponse),
        (status = 400, description = "Language not supported", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token"),
        (status = 409, description = "A run is still in progress", body = ErrorResponse),
        (status = 502, description = "Code recorded but not dispatched", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn submit_code_doc() {}

/// Store the result of a code run
#[utoipa::path(
    post,
    path = "/conference-session/{session_id}/code/{code_id}/",
    params(
        ("session_id" = i32, Path, description = "Tutoring session ID"),
        ("code_id" = i32, Path, description = "Code record ID")
    ),
    request_body = CodeResultRequest,
    responses(
        (status = 200, description = "Result stored", body = CodeResultResponse),
        (status = 401, description = "Missing or invalid API key"),
        (status = 404, description = "Code not found", body = ErrorResponse),
        (status = 409, description = "Result already recorded", body = ErrorResponse)
    ),
    security(("api_key" = []))
)]
#[allow(dead_code)]
pub async fn set_code_result_doc() {}

/// Hub and process diagnostics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Diagnostics snapshot", body = DiagnosticsResponse),
        (status = 401, description = "Missing or invalid API key")
    ),
    security(("api_key" = []))
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        submit_code_doc,
        set_code_result_doc,
        diagnostics_doc,
    ),
    components(
        schemas(
            HealthResponse,
            ErrorResponse,
            DiagnosticsResponse,
            SubmitCodeRequest,
            SubmitCodeResponse,
            CodeResultRequest,
            CodeResultResponse
        )
    ),
    tags(
        (name = "conference", description = "Conference code execution")
    )
)]
pub struct ApiDoc;
