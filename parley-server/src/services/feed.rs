//! Server half of the message feed: paging, enrichment and writes.

use std::collections::HashMap;

use chrono::Duration;
use uuid::Uuid;

use parley_shared::{
    AppError, AppResult, Cursor, CursorPage, CursorParams, EditMessageRequest, ErrorCode, MessageView,
    SendMessageRequest, TOMBSTONE_BODY,
};

use crate::models::{Message, NewMessage, User};
use crate::sanitize::sanitize_body;
use crate::services::membership;
use crate::store::{self, Store, StoreTx};

/// How far past its own message the sender's watermark is placed.
const SENDER_WATERMARK_LEAD_MS: i64 = 5;

/// Attach author profiles and replied-to messages. Replied-to messages are
/// embedded as-is, one level deep.
pub fn enrich(tx: &mut dyn StoreTx, messages: Vec<Message>) -> AppResult<Vec<MessageView>> {
    let mut author_ids: Vec<Uuid> = messages.iter().map(|m| m.author_id).collect();
    author_ids.sort();
    author_ids.dedup();
    let authors: HashMap<Uuid, User> = tx
        .users(&author_ids)?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    let reply_ids: Vec<Uuid> = messages.iter().filter_map(|m| m.reply_to).collect();
    let replied: HashMap<Uuid, Message> = if reply_ids.is_empty() {
        HashMap::new()
    } else {
        tx.messages(&reply_ids)?.into_iter().map(|m| (m.id, m)).collect()
    };

    Ok(messages
        .iter()
        .map(|m| {
            // The tail is shared by every subscriber, so profiles are rendered
            // as any other member would see them.
            let author = authors.get(&m.author_id).map(|u| u.profile_for(Uuid::nil()));
            let reply = m.reply_to.and_then(|id| replied.get(&id)).map(Message::replied);
            m.view(author, reply)
        })
        .collect())
}

/// Newest `size` messages of a channel, oldest first.
pub fn tail(tx: &mut dyn StoreTx, channel_id: Uuid, size: i64) -> AppResult<Vec<MessageView>> {
    let mut newest = tx.messages_before(channel_id, None, size)?;
    newest.reverse();
    enrich(tx, newest)
}

/// Insert a message and move its author's watermark just past it.
pub fn post(tx: &mut dyn StoreTx, draft: NewMessage) -> AppResult<Message> {
    let message = tx.insert_message(draft)?;
    tx.advance_watermark(
        message.author_id,
        message.channel_id,
        message.created_at + Duration::milliseconds(SENDER_WATERMARK_LEAD_MS),
    )?;
    Ok(message)
}

fn clean_body(raw: &str) -> AppResult<String> {
    let body = sanitize_body(raw);
    if body.is_empty() {
        return Err(AppError::new(ErrorCode::ValidationError, "message body cannot be empty"));
    }
    Ok(body)
}

fn find_message(tx: &mut dyn StoreTx, id: Uuid) -> AppResult<Message> {
    tx.message(id)?
        .ok_or_else(|| AppError::new(ErrorCode::MessageNotFound, "message not found"))
}

/// One page of a channel's history, newest first, strictly older than the
/// cursor position.
pub fn list_messages(
    store: &Store,
    user: &User,
    channel_id: Uuid,
    params: &CursorParams,
) -> AppResult<CursorPage<MessageView>> {
    let limit = params.limit() as usize;
    let before = params
        .cursor
        .as_deref()
        .map(|token| Cursor::decode(token, channel_id))
        .transpose()?;

    store.transaction(|tx| {
        membership::require_member(tx, user.id, channel_id)?;

        let mut rows = tx.messages_before(channel_id, before, limit as i64 + 1)?;
        let is_done = rows.len() <= limit;
        rows.truncate(limit);

        let continue_cursor = rows
            .last()
            .map(|oldest| Cursor::new(channel_id, oldest.position()).encode());

        Ok(CursorPage {
            page: enrich(tx, rows)?,
            continue_cursor,
            is_done,
        })
    })
}

pub fn send_message(
    store: &Store,
    user: &User,
    channel_id: Uuid,
    req: &SendMessageRequest,
) -> AppResult<MessageView> {
    let body = clean_body(&req.body)?;

    let view = store.transaction(|tx| {
        membership::require_poster(tx, user.id, channel_id)?;

        if let Some(target_id) = req.reply_to {
            let target = find_message(tx, target_id)?;
            membership::require_member(tx, user.id, target.channel_id)?;
        }

        let message = post(
            tx,
            NewMessage {
                channel_id,
                author_id: user.id,
                body: body.clone(),
                reply_to: req.reply_to,
            },
        )?;

        let mut views = enrich(tx, vec![message])?;
        views
            .pop()
            .ok_or_else(|| AppError::internal("sent message vanished"))
    })?;

    metrics::counter!("messages_sent_total").increment(1);
    tracing::info!(channel = %channel_id, message_id = %view.id, "message sent");
    Ok(view)
}

pub fn edit_message(store: &Store, user: &User, message_id: Uuid, req: &EditMessageRequest) -> AppResult<MessageView> {
    let body = clean_body(&req.body)?;

    store.transaction(|tx| {
        let mut message = find_message(tx, message_id)?;
        if message.is_deleted() {
            return Err(AppError::new(ErrorCode::MessageNotFound, "message was deleted"));
        }
        if message.author_id != user.id {
            return Err(AppError::forbidden("only the author can edit a message"));
        }

        message.body = body.clone();
        message.edited_at = Some(store::now());
        tx.save_message(&message)?;

        tracing::debug!(message_id = %message.id, "message edited");
        let mut views = enrich(tx, vec![message])?;
        views
            .pop()
            .ok_or_else(|| AppError::internal("edited message vanished"))
    })
}

/// Soft delete: the row keeps its place in the feed with a tombstone body.
pub fn delete_message(store: &Store, user: &User, message_id: Uuid) -> AppResult<MessageView> {
    store.transaction(|tx| {
        let mut message = find_message(tx, message_id)?;
        if message.author_id != user.id && !membership::is_admin(tx, user.id, message.channel_id)? {
            return Err(AppError::forbidden("only the author or a channel admin can delete a message"));
        }

        if !message.is_deleted() {
            message.body = TOMBSTONE_BODY.to_string();
            message.deleted_at = Some(store::now());
            tx.save_message(&message)?;
            tracing::info!(message_id = %message.id, channel = %message.channel_id, "message deleted");
        }

        let mut views = enrich(tx, vec![message])?;
        views
            .pop()
            .ok_or_else(|| AppError::internal("deleted message vanished"))
    })
}
