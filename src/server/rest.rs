//! REST handlers

use super::{ApiError, ApiResult, AppState};
use crate::protocol::DecisionBehavior;
use crate::session::CreateSessionOptions;
use crate::store::Project;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

/// Service health summary
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "live_sessions": state.manager.live_count().await,
        "event_subscribers": state.bus.subscriber_count(),
    }))
}

// =============================================================================
// Projects
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    name: String,
    folder_path: String,
    default_model: Option<String>,
    default_permission_mode: Option<String>,
    system_prompt: Option<String>,
    append_system_prompt: Option<String>,
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.name.trim().is_empty() {
        return Err(crate::Error::Validation("project name must not be empty".into()).into());
    }
    if !std::path::Path::new(&request.folder_path).is_dir() {
        return Err(crate::Error::Validation(format!(
            "project folder does not exist: {}",
            request.folder_path
        ))
        .into());
    }

    let mut project = Project::new(request.name.trim(), &request.folder_path);
    project.default_model = request.default_model;
    project.default_permission_mode = request.default_permission_mode;
    project.system_prompt = request.system_prompt;
    project.append_system_prompt = request.append_system_prompt;
    state.store.insert_project(&project)?;

    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn list_projects(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.store.list_projects()?))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = state
        .store
        .get_project(&id)?
        .ok_or_else(|| ApiError(crate::Error::NotFound(format!("project {}", id))))?;
    Ok(Json(project))
}

// =============================================================================
// Sessions
// =============================================================================

pub async fn create_session(
    State(state): State<AppState>,
    Json(options): Json<CreateSessionOptions>,
) -> ApiResult<impl IntoResponse> {
    let session = state.manager.create(options).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.manager.list_sessions()?))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let session = state
        .manager
        .get_session(&id)?
        .ok_or_else(|| ApiError(crate::Error::NotFound(format!("session {}", id))))?;
    Ok(Json(session))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.manager.kill(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    content: String,
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    state.manager.send_message(&id, &request.content).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    limit: Option<usize>,
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> ApiResult<impl IntoResponse> {
    if state.manager.get_session(&id)?.is_none() {
        return Err(crate::Error::NotFound(format!("session {}", id)).into());
    }
    Ok(Json(state.store.list_messages(&id, query.limit)?))
}

pub async fn interrupt_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.manager.interrupt(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn list_permission_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if state.manager.get_session(&id)?.is_none() {
        return Err(crate::Error::NotFound(format!("session {}", id)).into());
    }
    Ok(Json(state.store.list_permission_log(&id)?))
}

// =============================================================================
// Permission rules
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    project_id: Option<String>,
    tool_name: String,
    #[serde(default)]
    rule_content: String,
    behavior: DecisionBehavior,
    #[serde(default)]
    priority: i64,
}

pub async fn create_rule(
    State(state): State<AppState>,
    Json(request): Json<CreateRuleRequest>,
) -> ApiResult<impl IntoResponse> {
    let rule = state.permissions.create_rule(
        request.project_id.as_deref(),
        &request.tool_name,
        &request.rule_content,
        request.behavior,
        request.priority,
    )?;
    Ok((StatusCode::CREATED, Json(rule)))
}

#[derive(Debug, Deserialize)]
pub struct ListRulesQuery {
    project_id: Option<String>,
}

pub async fn list_rules(
    State(state): State<AppState>,
    Query(query): Query<ListRulesQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state.permissions.list_rules(query.project_id.as_deref())?,
    ))
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(fields): Json<serde_json::Map<String, serde_json::Value>>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.permissions.update_rule(&id, &fields)?))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.permissions.delete_rule(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::config::ConduitConfig;
    use crate::permissions::PermissionEngine;
    use crate::session::SessionManager;
    use crate::store::Database;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn make_state(dir: &TempDir) -> AppState {
        let config = ConduitConfig {
            database_path: dir.path().join("conduit.db"),
            ws_port_range_start: 18590,
            ws_port_range_end: 18599,
            ..Default::default()
        };
        let store = Arc::new(Database::open(&config.database_path).unwrap());
        let bus = Arc::new(EventBus::new());
        let permissions = Arc::new(PermissionEngine::new(store.clone()));
        let manager = SessionManager::new(
            config,
            store.clone(),
            bus.clone(),
            permissions.clone(),
        )
        .unwrap();
        AppState {
            manager,
            store,
            permissions,
            bus,
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 64)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_router_builds() {
        let dir = TempDir::new().unwrap();
        let _router = super::super::api_router(make_state(&dir));
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let dir = TempDir::new().unwrap();
        let state = make_state(&dir);
        let response = health(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["live_sessions"], 0);
    }

    #[tokio::test]
    async fn test_create_project_validates_folder() {
        let dir = TempDir::new().unwrap();
        let state = make_state(&dir);
        let request = CreateProjectRequest {
            name: "demo".to_string(),
            folder_path: "/definitely/not/a/folder".to_string(),
            default_model: None,
            default_permission_mode: None,
            system_prompt: None,
            append_system_prompt: None,
        };
        let response = create_project(State(state), Json(request))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_project_duplicate_folder_conflicts() {
        let dir = TempDir::new().unwrap();
        let state = make_state(&dir);
        let request = || CreateProjectRequest {
            name: "demo".to_string(),
            folder_path: dir.path().to_str().unwrap().to_string(),
            default_model: None,
            default_permission_mode: None,
            system_prompt: None,
            append_system_prompt: None,
        };

        let response = create_project(State(state.clone()), Json(request()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = create_project(State(state), Json(request()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_get_session_not_found() {
        let dir = TempDir::new().unwrap();
        let state = make_state(&dir);
        let response = get_session(State(state), Path("missing".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_session_not_found() {
        let dir = TempDir::new().unwrap();
        let state = make_state(&dir);
        let response = delete_session(State(state), Path("missing".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rule_crud_round_trip() {
        let dir = TempDir::new().unwrap();
        let state = make_state(&dir);

        let response = create_rule(
            State(state.clone()),
            Json(CreateRuleRequest {
                project_id: None,
                tool_name: "Bash".to_string(),
                rule_content: "git:*".to_string(),
                behavior: DecisionBehavior::Allow,
                priority: 5,
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        let rule = body_json(response).await;
        let rule_id = rule["id"].as_str().unwrap().to_string();

        let response = list_rules(
            State(state.clone()),
            Query(ListRulesQuery { project_id: None }),
        )
        .await
        .into_response();
        let rules = body_json(response).await;
        assert_eq!(rules.as_array().unwrap().len(), 1);

        let mut fields = serde_json::Map::new();
        fields.insert("priority".to_string(), serde_json::json!(9));
        fields.insert("id".to_string(), serde_json::json!("hijack"));
        let response = update_rule(State(state.clone()), Path(rule_id.clone()), Json(fields))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let updated = body_json(response).await;
        assert_eq!(updated["priority"], 9);
        assert_eq!(updated["id"], rule_id.as_str());

        let response = delete_rule(State(state), Path(rule_id))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_update_missing_rule_not_found() {
        let dir = TempDir::new().unwrap();
        let state = make_state(&dir);
        let mut fields = serde_json::Map::new();
        fields.insert("priority".to_string(), serde_json::json!(1));
        let response = update_rule(State(state), Path("missing".to_string()), Json(fields))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_messages_unknown_session() {
        let dir = TempDir::new().unwrap();
        let state = make_state(&dir);
        let response = list_messages(
            State(state),
            Path("missing".to_string()),
            Query(ListMessagesQuery { limit: None }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
