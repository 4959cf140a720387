use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use parley_shared::errors::AppResult;
use parley_shared::types::api::ApiResponse;
use parley_shared::types::auth::AuthUser;
use parley_shared::{MarkSeenRequest, UnreadCount, WatermarkRow};

use crate::services::{identity, read_state};
use crate::AppState;

/// POST /channels/:id/seen - returns the stored watermark, which may be newer
/// than the one submitted
pub async fn mark_seen(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
    Json(req): Json<MarkSeenRequest>,
) -> AppResult<Json<ApiResponse<WatermarkRow>>> {
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    let advance = read_state::mark_seen(&state.store, &user, channel_id, req.last_seen_at)?;
    if advance.advanced {
        state.live.watermarks_changed(channel_id);
    }
    Ok(Json(ApiResponse::ok(WatermarkRow {
        user_id: Some(user.id),
        last_seen_at: advance.last_seen_at,
    })))
}

/// GET /channels/:id/watermarks
pub async fn watermarks(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Vec<WatermarkRow>>>> {
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    let rows = read_state::get_watermarks(&state.store, &user, channel_id)?;
    Ok(Json(ApiResponse::ok(rows)))
}

/// GET /unread
pub async fn unread(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<UnreadCount>>>> {
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    let counts = read_state::unread_summary(&state.store, &user)?;
    Ok(Json(ApiResponse::ok(counts)))
}
