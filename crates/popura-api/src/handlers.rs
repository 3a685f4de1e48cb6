//! Admin hook handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use popura_core::{AdminError, AdminHandlers};

#[derive(Clone)]
pub struct ApiState {
    pub admin: Arc<AdminHandlers>,
}

impl ApiState {
    pub fn new(admin: AdminHandlers) -> Self {
        Self {
            admin: Arc::new(admin),
        }
    }
}

#[derive(Serialize)]
pub struct HookInfo {
    pub name: String,
    pub description: String,
}

#[derive(Serialize)]
pub struct ListResponse {
    pub handlers: Vec<HookInfo>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<ErrorResponse>)>;

fn error_status(e: &AdminError) -> StatusCode {
    match e {
        AdminError::Unknown(_) => StatusCode::NOT_FOUND,
        AdminError::Duplicate(_) | AdminError::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn call(state: &ApiState, name: &str, args: &Value) -> ApiResult {
    state.admin.call(name, args).map(Json).map_err(|e| {
        tracing::debug!(handler = name, error = %e, "admin call failed");
        (
            error_status(&e),
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
    })
}

pub async fn handle_list(State(state): State<ApiState>) -> Json<ListResponse> {
    let handlers = state
        .admin
        .list()
        .into_iter()
        .map(|(name, description)| HookInfo { name, description })
        .collect();
    Json(ListResponse { handlers })
}

pub async fn handle_call(State(state): State<ApiState>, Path(name): Path<String>) -> ApiResult {
    call(&state, &name, &Value::Null)
}

pub async fn handle_call_with_args(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(args): Json<Value>,
) -> ApiResult {
    call(&state, &name, &args)
}
