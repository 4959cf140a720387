use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use uuid::Uuid;

use parley_shared::errors::AppResult;
use parley_shared::types::api::ApiResponse;
use parley_shared::types::auth::AuthUser;
use parley_shared::{CursorPage, CursorParams, EditMessageRequest, MessageView, SendMessageRequest};

use super::validated;
use crate::services::{feed, identity};
use crate::AppState;

/// GET /channels/:id/messages?cursor=&limit= - one page, newest first
pub async fn list_messages(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
    Query(params): Query<CursorParams>,
) -> AppResult<Json<ApiResponse<CursorPage<MessageView>>>> {
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    let page = feed::list_messages(&state.store, &user, channel_id, &params)?;
    Ok(Json(ApiResponse::ok(page)))
}

/// POST /channels/:id/messages
pub async fn send_message(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<Json<ApiResponse<MessageView>>> {
    let req = validated(req)?;
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    let message = feed::send_message(&state.store, &user, channel_id, &req)?;

    // Sending also moves the sender's watermark.
    state.live.messages_changed(channel_id);
    state.live.watermarks_changed(channel_id);

    Ok(Json(ApiResponse::ok(message)))
}

/// PATCH /messages/:id
pub async fn edit_message(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<EditMessageRequest>,
) -> AppResult<Json<ApiResponse<MessageView>>> {
    let req = validated(req)?;
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    let message = feed::edit_message(&state.store, &user, message_id, &req)?;
    state.live.messages_changed(message.channel_id);
    Ok(Json(ApiResponse::ok(message)))
}

/// DELETE /messages/:id - soft delete
pub async fn delete_message(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<MessageView>>> {
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    let message = feed::delete_message(&state.store, &user, message_id)?;
    state.live.messages_changed(message.channel_id);
    Ok(Json(ApiResponse::ok_with_message(message, "message deleted")))
}
