use axum::{extract::{Extension, Path, State}, http::StatusCode, Json};
use std::sync::Arc;
use tracing::{error, info};

use crate::models::{CodeResultRequest, CodeResultResponse, ErrorResponse, SubmitCodeRequest, SubmitCodeResponse};
use crate::routes::auth_middleware::ClientId;
use crate::routes::AppState;
use crate::services::conference_service::ConferenceService;

type ErrorReply = (StatusCode, Json<ErrorResponse>);

fn conference_service(state: &AppState) -> Result<&Arc<ConferenceService>, ErrorReply> {
    state.conference.as_ref().ok_or_else(|| {
        error!("Code submission requested but no database is configured");
        let status = StatusCode::SERVICE_UNAVAILABLE;
        (status, Json(ErrorResponse {
            code: status.as_u16(),
            status: status.to_string(),
            error: "Code submission is not available".to_string(),
        }))
    })
}

/// Submit code for execution in a conference
pub async fn submit_code(
    State(state): State<Arc<AppState>>,
    Extension(client): Extension<ClientId>,
    Path(session_id): Path<i32>,
    Json(request): Json<SubmitCodeRequest>,
) -> Result<(StatusCode, Json<SubmitCodeResponse>), ErrorReply> {
    let service = conference_service(&state)?;

    info!("Client {} submits {} code for session {}", client.0, request.language, session_id);
    let id = service
        .submit_code(session_id, &request.code, &request.language)
        .await
        .map_err(|e| e.to_response())?;

    Ok((StatusCode::OK, Json(SubmitCodeResponse { id })))
}

/// Store the result of a code run, called by execution workers
pub async fn set_code_result(
    State(state): State<Arc<AppState>>,
    Path((session_id, code_id)): Path<(i32, i32)>,
    Json(request): Json<CodeResultRequest>,
) -> Result<(StatusCode, Json<CodeResultResponse>), ErrorReply> {
    let service = conference_service(&state)?;

    service
        .set_code_result(session_id, code_id, &request.result)
        .await
        .map_err(|e| e.to_response())?;

    Ok((StatusCode::OK, Json(CodeResultResponse { success: true })))
}
