use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use parley_shared::errors::AppResult;
use parley_shared::types::api::ApiResponse;
use parley_shared::types::auth::AuthUser;
use parley_shared::{AddContactRequest, ContactView, UpdateContactRequest};

use super::validated;
use crate::services::{contacts, identity};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ContactSearch {
    #[serde(default)]
    pub q: String,
}

/// GET /contacts
pub async fn list(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<ContactView>>>> {
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    Ok(Json(ApiResponse::ok(contacts::list_contacts(&state.store, &user)?)))
}

/// POST /contacts
pub async fn add(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddContactRequest>,
) -> AppResult<Json<ApiResponse<ContactView>>> {
    let req = validated(req)?;
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    Ok(Json(ApiResponse::ok(contacts::add_contact(&state.store, &user, &req)?)))
}

/// GET /contacts/search?q=
pub async fn search(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ContactSearch>,
) -> AppResult<Json<ApiResponse<Vec<ContactView>>>> {
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    Ok(Json(ApiResponse::ok(contacts::search_contacts(&state.store, &user, &params.q)?)))
}

/// PATCH /contacts/:id
pub async fn update(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(contact_id): Path<Uuid>,
    Json(req): Json<UpdateContactRequest>,
) -> AppResult<Json<ApiResponse<ContactView>>> {
    let req = validated(req)?;
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    Ok(Json(ApiResponse::ok(contacts::update_contact(&state.store, &user, contact_id, &req)?)))
}

/// DELETE /contacts/:id
pub async fn remove(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(contact_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<()>>> {
    let user = identity::current_user(&state.store, &auth_user.subject)?;
    contacts::delete_contact(&state.store, &user, contact_id)?;
    Ok(Json(ApiResponse::ok_with_message((), "contact removed")))
}
