use uuid::Uuid;

use parley_shared::{AppError, AppResult, EnsureUserRequest, ErrorCode, UpdateProfileRequest, UserProfile};

use crate::models::User;
use crate::store::{self, Store, StoreTx};

pub const MAX_SEARCH_RESULTS: u32 = 50;

/// Trim, lower-case and check a username: 3-32 characters of `[a-z0-9_]`.
pub fn normalize_username(raw: &str) -> AppResult<String> {
    let username = raw.trim().to_lowercase();
    let valid = (3..=32).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(AppError::new(
            ErrorCode::InvalidUsername,
            "username must be 3-32 characters of a-z, 0-9 or _",
        ));
    }
    Ok(username)
}

fn claim_username(tx: &mut dyn StoreTx, user_id: Uuid, raw: &str) -> AppResult<String> {
    let username = normalize_username(raw)?;
    if let Some(holder) = tx.user_by_username(&username)? {
        if holder.id != user_id {
            return Err(AppError::new(ErrorCode::UsernameTaken, "username is already taken"));
        }
    }
    Ok(username)
}

/// The user record behind an authenticated subject.
pub fn resolve(tx: &mut dyn StoreTx, subject: &str) -> AppResult<User> {
    tx.user_by_token(subject)?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "no user is provisioned for this identity"))
}

pub fn current_user(store: &Store, subject: &str) -> AppResult<User> {
    store.transaction(|tx| resolve(tx, subject))
}

/// Provision the caller on first contact. Calling it again returns the
/// existing record unchanged.
pub fn ensure_user(store: &Store, subject: &str, req: &EnsureUserRequest) -> AppResult<User> {
    store.transaction(|tx| {
        if let Some(existing) = tx.user_by_token(subject)? {
            return Ok(existing);
        }

        let mut user = User::new(subject, req.name.trim(), None);
        if let Some(raw) = req.username.as_deref() {
            user.username = Some(claim_username(tx, user.id, raw)?);
        }
        tx.insert_user(&user)?;

        tracing::info!(user_id = %user.id, "user provisioned");
        Ok(user)
    })
}

pub fn update_profile(store: &Store, subject: &str, req: &UpdateProfileRequest) -> AppResult<User> {
    store.transaction(|tx| {
        let mut user = resolve(tx, subject)?;

        if let Some(name) = &req.name {
            user.name = name.trim().to_string();
        }
        if let Some(raw) = &req.username {
            user.username = Some(claim_username(tx, user.id, raw)?);
        }
        if let Some(bio) = &req.bio {
            user.bio = Some(bio.clone()).filter(|b| !b.trim().is_empty());
        }
        if let Some(avatar) = &req.avatar_url {
            user.avatar_url = Some(avatar.clone());
        }
        if let Some(show) = req.show_last_active {
            user.show_last_active = show;
        }

        tx.save_user(&user)?;
        tracing::debug!(user_id = %user.id, "profile updated");
        Ok(user)
    })
}

pub fn touch_last_active(store: &Store, subject: &str) -> AppResult<()> {
    store.transaction(|tx| {
        let mut user = resolve(tx, subject)?;
        user.last_active_at = store::now();
        tx.save_user(&user)
    })
}

pub fn get_user(store: &Store, subject: &str, id: Uuid) -> AppResult<UserProfile> {
    store.transaction(|tx| {
        let viewer = resolve(tx, subject)?;
        let user = tx
            .user(id)?
            .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "user not found"))?;
        Ok(user.profile_for(viewer.id))
    })
}

pub fn get_by_username(store: &Store, subject: &str, username: &str) -> AppResult<UserProfile> {
    store.transaction(|tx| {
        let viewer = resolve(tx, subject)?;
        let username = username.trim().to_lowercase();
        let user = tx
            .user_by_username(&username)?
            .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "user not found"))?;
        Ok(user.profile_for(viewer.id))
    })
}

pub fn search_users(store: &Store, subject: &str, query: &str, limit: Option<u32>) -> AppResult<Vec<UserProfile>> {
    let query = query.trim();
    let limit = limit.unwrap_or(20).clamp(1, MAX_SEARCH_RESULTS);

    store.transaction(|tx| {
        let viewer = resolve(tx, subject)?;
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let users = tx.search_users(query, viewer.id, limit as i64)?;
        Ok(users.iter().map(|u| u.profile_for(viewer.id)).collect())
    })
}
