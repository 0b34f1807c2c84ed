use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap},
    response::Json,
};
use serde_json::{json, Value};

use super::server::AppState;
use crate::error::LifecycleError;
use crate::models::workspace::{WorkspaceDescriptor, WorkspaceList, WorkspaceStatus};

/// The raw `Authorization` header. The whole value is the token; no
/// `Bearer ` prefix is stripped.
fn credential(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
}

pub async fn list_workspaces(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<WorkspaceList>, LifecycleError> {
    let namespaces = state.manager.list(credential(&headers)).await?;
    Ok(Json(WorkspaceList { namespaces }))
}

pub async fn create_workspace(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<WorkspaceDescriptor>, LifecycleError> {
    let descriptor = state.manager.create(credential(&headers)).await?;
    Ok(Json(descriptor))
}

pub async fn get_workspace(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<WorkspaceStatus>, LifecycleError> {
    let status = state.manager.get(credential(&headers), &name).await?;
    Ok(Json(status))
}

pub async fn delete_workspace(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, LifecycleError> {
    let message = state.manager.delete(credential(&headers), &name).await?;
    Ok(Json(json!({ "message": message })))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "message": "Ok" }))
}
