use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use parley_shared::errors::AppResult;
use parley_shared::types::api::ApiResponse;
use parley_shared::types::auth::AuthUser;
use parley_shared::{EnsureUserRequest, UpdateProfileRequest, UserProfile};

use super::validated;
use crate::services::identity;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<u32>,
}

/// POST /users/me - provision the caller on first sign-in
pub async fn ensure_me(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<EnsureUserRequest>,
) -> AppResult<Json<ApiResponse<UserProfile>>> {
    let req = validated(req)?;
    let user = identity::ensure_user(&state.store, &auth_user.subject, &req)?;
    Ok(Json(ApiResponse::ok(user.profile_for(user.id))))
}

/// GET /users/me
pub async fn get_me(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<UserProfile>>> {
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    Ok(Json(ApiResponse::ok(user.profile_for(user.id))))
}

/// PATCH /users/me
pub async fn update_me(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateProfileRequest>,
) -> AppResult<Json<ApiResponse<UserProfile>>> {
    let req = validated(req)?;
    let user = identity::update_profile(&state.store, &auth_user.subject, &req)?;
    Ok(Json(ApiResponse::ok_with_message(user.profile_for(user.id), "profile updated")))
}

/// GET /users/search?q=
pub async fn search(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<ApiResponse<Vec<UserProfile>>>> {
    let users = identity::search_users(&state.store, &auth_user.subject, &params.q, params.limit)?;
    Ok(Json(ApiResponse::ok(users)))
}

/// GET /users/by-username/:username
pub async fn get_by_username(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> AppResult<Json<ApiResponse<UserProfile>>> {
    let profile = identity::get_by_username(&state.store, &auth_user.subject, &username)?;
    Ok(Json(ApiResponse::ok(profile)))
}

/// GET /users/:id
pub async fn get_user(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<UserProfile>>> {
    let profile = identity::get_user(&state.store, &auth_user.subject, user_id)?;
    Ok(Json(ApiResponse::ok(profile)))
}
