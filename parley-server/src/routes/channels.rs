use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use parley_shared::errors::AppResult;
use parley_shared::types::api::ApiResponse;
use parley_shared::types::auth::AuthUser;
use parley_shared::{ChannelDetail, ChannelInfo, ChannelSummary, CreateChannelRequest, LinkResponse, SharedChannels};

use super::validated;
use crate::services::{directory, identity};
use crate::AppState;

/// GET /channels - the caller's channels with list previews
pub async fn list_channels(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<ChannelSummary>>>> {
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    let channels = directory::list_channels(&state.store, &user)?;
    Ok(Json(ApiResponse::ok(channels)))
}

/// POST /channels - create a channel, group or private conversation
pub async fn create_channel(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateChannelRequest>,
) -> AppResult<Json<ApiResponse<ChannelInfo>>> {
    let req = validated(req)?;
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    let channel = directory::create_channel(&state.store, &user, &req, state.invite_policy())?;
    Ok(Json(ApiResponse::ok(channel)))
}

/// GET /channels/:id
pub async fn get_channel(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ChannelDetail>>> {
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    let detail = directory::channel_detail(&state.store, &user, channel_id)?;
    Ok(Json(ApiResponse::ok(detail)))
}

/// GET /channels/shared/:user_id
pub async fn shared_with(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(other_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<SharedChannels>>> {
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    let shared = directory::shared_channels(&state.store, &user, other_id)?;
    Ok(Json(ApiResponse::ok(shared)))
}

/// POST /channels/:id/link - get or mint the invite token
pub async fn create_link(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<LinkResponse>>> {
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    let token = directory::create_link(&state.store, &user, channel_id)?;
    Ok(Json(ApiResponse::ok(LinkResponse { token })))
}

/// DELETE /links/:token
pub async fn revoke_link(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    directory::revoke_link(&state.store, &user, &token)?;
    Ok(Json(ApiResponse::ok_with_message((), "link revoked")))
}

/// POST /join/:token
pub async fn join(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> AppResult<Json<ApiResponse<ChannelInfo>>> {
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    let channel = directory::join_channel(&state.store, &user, &token)?;
    Ok(Json(ApiResponse::ok(channel)))
}
