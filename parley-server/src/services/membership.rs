//! Flat, single-hop authorization over the `(channel, user)` membership row.

use uuid::Uuid;

use parley_shared::{AppError, AppResult, ChannelKind, ErrorCode};

use crate::models::{Channel, Membership};
use crate::store::StoreTx;

pub fn require_channel(tx: &mut dyn StoreTx, channel_id: Uuid) -> AppResult<Channel> {
    tx.channel(channel_id)?
        .ok_or_else(|| AppError::new(ErrorCode::ChannelNotFound, "channel not found"))
}

pub fn is_member(tx: &mut dyn StoreTx, user_id: Uuid, channel_id: Uuid) -> AppResult<bool> {
    Ok(tx.membership(channel_id, user_id)?.is_some())
}

pub fn is_admin(tx: &mut dyn StoreTx, user_id: Uuid, channel_id: Uuid) -> AppResult<bool> {
    Ok(tx
        .membership(channel_id, user_id)?
        .is_some_and(|m| m.is_admin))
}

/// A missing channel is reported as such rather than as a membership failure.
pub fn require_member(tx: &mut dyn StoreTx, user_id: Uuid, channel_id: Uuid) -> AppResult<Membership> {
    match tx.membership(channel_id, user_id)? {
        Some(membership) => Ok(membership),
        None => {
            require_channel(tx, channel_id)?;
            Err(AppError::new(ErrorCode::NotMember, "you are not a member of this channel"))
        }
    }
}

pub fn require_admin(tx: &mut dyn StoreTx, user_id: Uuid, channel_id: Uuid) -> AppResult<Membership> {
    let membership = require_member(tx, user_id, channel_id)?;
    if !membership.is_admin {
        return Err(AppError::new(ErrorCode::NotAdmin, "you are not an admin of this channel"));
    }
    Ok(membership)
}

/// Public channels are read-only for everyone but their admins.
pub fn can_post(kind: ChannelKind, membership: &Membership) -> bool {
    kind != ChannelKind::Channel || membership.is_admin
}

pub fn require_poster(tx: &mut dyn StoreTx, user_id: Uuid, channel_id: Uuid) -> AppResult<(Channel, Membership)> {
    let membership = require_member(tx, user_id, channel_id)?;
    let channel = require_channel(tx, channel_id)?;
    if !can_post(channel.kind(), &membership) {
        return Err(AppError::new(ErrorCode::NotAdmin, "only admins can post in this channel"));
    }
    Ok((channel, membership))
}
