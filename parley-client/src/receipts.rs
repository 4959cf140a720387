//! Read receipts and unread counts derived from watermark rows.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_shared::{ChannelKind, MessageView, WatermarkRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receipt {
    Sent,
    /// Someone other than the author has read past the message.
    Seen,
}

/// What to show under a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptView {
    /// Public channels: how many members have read it.
    SeenCount(usize),
    Status(Receipt),
}

/// Number of watermarks at or past `at`.
pub fn seen_count(at: DateTime<Utc>, watermarks: &[WatermarkRow]) -> usize {
    watermarks.iter().filter(|row| row.last_seen_at >= at).count()
}

pub fn receipt(message: &MessageView, watermarks: &[WatermarkRow]) -> Receipt {
    let seen = watermarks
        .iter()
        .any(|row| row.user_id != Some(message.author_id) && row.last_seen_at >= message.created_at);
    if seen {
        Receipt::Seen
    } else {
        Receipt::Sent
    }
}

pub fn receipt_view(kind: ChannelKind, message: &MessageView, watermarks: &[WatermarkRow]) -> ReceiptView {
    match kind {
        ChannelKind::Channel => ReceiptView::SeenCount(seen_count(message.created_at, watermarks)),
        ChannelKind::Group | ChannelKind::Private => ReceiptView::Status(receipt(message, watermarks)),
    }
}

/// "seen by N of M others" for a message, counting members except the author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeenBy {
    pub seen: usize,
    pub others: usize,
}

impl fmt::Display for SeenBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seen by {} of {} others", self.seen, self.others)
    }
}

pub fn seen_by(message: &MessageView, members: &[Uuid], watermarks: &[WatermarkRow]) -> SeenBy {
    let others: Vec<Uuid> = members
        .iter()
        .copied()
        .filter(|member| *member != message.author_id)
        .collect();
    let seen = others
        .iter()
        .filter(|member| {
            watermarks
                .iter()
                .any(|row| row.user_id == Some(**member) && row.last_seen_at >= message.created_at)
        })
        .count();
    SeenBy {
        seen,
        others: others.len(),
    }
}

/// Held messages newer than the viewer's watermark. Without a watermark
/// every held message is unread.
pub fn unread_count(messages: &[MessageView], own_watermark: Option<DateTime<Utc>>) -> usize {
    match own_watermark {
        Some(seen) => messages.iter().filter(|m| m.created_at > seen).count(),
        None => messages.len(),
    }
}

/// Badge text for an unread count; `None` when there is nothing unread.
pub fn unread_label(count: usize, cap: u32) -> Option<String> {
    match count {
        0 => None,
        n if n > cap as usize => Some(format!("{cap}+")),
        n => Some(n.to_string()),
    }
}
