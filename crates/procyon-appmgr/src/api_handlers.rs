//! Axum handlers for the HTTP control surface.
//!
//! A thin veneer over [AppMgrService]: sync queries answer inline, lifecycle
//! operations enqueue and answer with an [AckResponse]. The caller identity
//! is fixed per router instance; deployments that need per-request identity
//! put an authenticating layer in front and build one router per principal.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use procyon_governor::CallerIdentity;
use procyon_lifecycle::{AbilityToken, Configuration, RecordId};

use crate::api_errors::ApiError;
use crate::api_models::{
    AckResponse, ConfigurationResponse, ForegroundAppsResponse, MemoryLevelRequest,
    ProcessListResponse, UpdateAbilityStateRequest,
};
use crate::service::AppMgrService;

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<AppMgrService>,
    pub caller: CallerIdentity,
}

impl ApiState {
    pub fn new(service: Arc<AppMgrService>, caller: CallerIdentity) -> Self {
        Self { service, caller }
    }
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/processes", get(list_processes))
        .route("/v1/processes/foreground", get(foreground_applications))
        .route(
            "/v1/processes/:record_id/foregrounded",
            post(application_foregrounded),
        )
        .route(
            "/v1/processes/:record_id/backgrounded",
            post(application_backgrounded),
        )
        .route(
            "/v1/processes/:record_id/terminated",
            post(application_terminated),
        )
        .route(
            "/v1/processes/:record_id/stage-done",
            post(ability_stage_done),
        )
        .route("/v1/abilities/:token/state", post(update_ability_state))
        .route("/v1/abilities/:token/terminate", post(terminate_ability))
        .route("/v1/abilities/:token/cleaned", post(ability_cleaned))
        .route("/v1/config", get(get_configuration).post(update_configuration))
        .route("/v1/memory-level", post(notify_memory_level))
        .route("/v1/kill/:bundle", post(kill_application))
        .with_state(state)
}

async fn list_processes(State(state): State<ApiState>) -> Json<ProcessListResponse> {
    Json(ProcessListResponse {
        processes: state.service.get_all_running_processes(&state.caller),
    })
}

async fn foreground_applications(
    State(state): State<ApiState>,
) -> Result<Json<ForegroundAppsResponse>, ApiError> {
    let applications = state.service.get_foreground_applications(&state.caller)?;
    Ok(Json(ForegroundAppsResponse { applications }))
}

async fn application_foregrounded(
    State(state): State<ApiState>,
    Path(record_id): Path<RecordId>,
) -> Result<Json<AckResponse>, ApiError> {
    state.service.application_foregrounded(record_id)?;
    Ok(Json(AckResponse::accepted()))
}

async fn application_backgrounded(
    State(state): State<ApiState>,
    Path(record_id): Path<RecordId>,
) -> Result<Json<AckResponse>, ApiError> {
    state.service.application_backgrounded(record_id)?;
    Ok(Json(AckResponse::accepted()))
}

async fn application_terminated(
    State(state): State<ApiState>,
    Path(record_id): Path<RecordId>,
) -> Result<Json<AckResponse>, ApiError> {
    state.service.application_terminated(record_id)?;
    Ok(Json(AckResponse::accepted()))
}

async fn ability_stage_done(
    State(state): State<ApiState>,
    Path(record_id): Path<RecordId>,
) -> Result<Json<AckResponse>, ApiError> {
    state.service.add_ability_stage_done(record_id)?;
    Ok(Json(AckResponse::accepted()))
}

async fn update_ability_state(
    State(state): State<ApiState>,
    Path(token): Path<AbilityToken>,
    Json(request): Json<UpdateAbilityStateRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    state.service.update_ability_state(token, request.state)?;
    Ok(Json(AckResponse::accepted()))
}

async fn terminate_ability(
    State(state): State<ApiState>,
    Path(token): Path<AbilityToken>,
) -> Result<Json<AckResponse>, ApiError> {
    state.service.terminate_ability(token, false)?;
    Ok(Json(AckResponse::accepted()))
}

async fn ability_cleaned(
    State(state): State<ApiState>,
    Path(token): Path<AbilityToken>,
) -> Result<Json<AckResponse>, ApiError> {
    state.service.ability_cleaned(token)?;
    Ok(Json(AckResponse::accepted()))
}

async fn get_configuration(State(state): State<ApiState>) -> Json<ConfigurationResponse> {
    Json(ConfigurationResponse {
        configuration: state.service.get_configuration(),
    })
}

async fn update_configuration(
    State(state): State<ApiState>,
    Json(config): Json<Configuration>,
) -> Result<Json<AckResponse>, ApiError> {
    state.service.update_configuration(&state.caller, &config)?;
    Ok(Json(AckResponse::accepted()))
}

async fn notify_memory_level(
    State(state): State<ApiState>,
    Json(request): Json<MemoryLevelRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    state.service.notify_memory_level(request.level)?;
    Ok(Json(AckResponse::accepted()))
}

async fn kill_application(
    State(state): State<ApiState>,
    Path(bundle): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    if !state.service.get_app_running_state_by_bundle(&bundle) {
        return Err(ApiError::not_found(format!("bundle not running: {bundle}")));
    }
    state.service.kill_application(&state.caller, &bundle)?;
    Ok(Json(AckResponse::accepted()))
}
