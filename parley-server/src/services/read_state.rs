use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use parley_shared::{AppResult, ChannelKind, UnreadCount, WatermarkRow};

use crate::models::{User, Watermark};
use crate::services::membership;
use crate::store::{self, Advance, Store};

/// Unread counts stop here; one past the display ceiling of 20.
pub const UNREAD_SCAN_CAP: i64 = 21;

/// Watermark rows as `viewer` may see them. In a public channel only the
/// viewer's own row keeps its user id.
pub fn anonymize(kind: ChannelKind, viewer: Uuid, rows: &[Watermark]) -> Vec<WatermarkRow> {
    rows.iter()
        .map(|row| WatermarkRow {
            user_id: (kind != ChannelKind::Channel || row.user_id == viewer).then_some(row.user_id),
            last_seen_at: row.last_seen_at,
        })
        .collect()
}

/// Advance the caller's watermark. Older candidates leave it untouched; the
/// stored value is returned either way. Nothing can be seen before it is
/// sent, so candidates in the future are pulled back to now.
pub fn mark_seen(store: &Store, user: &User, channel_id: Uuid, at: DateTime<Utc>) -> AppResult<Advance> {
    let at = at.trunc_subsecs(6).min(store::now());
    let advance = store.transaction(|tx| {
        membership::require_member(tx, user.id, channel_id)?;
        tx.advance_watermark(user.id, channel_id, at)
    })?;

    if advance.advanced {
        metrics::counter!("watermark_advances_total").increment(1);
        tracing::debug!(channel = %channel_id, user_id = %user.id, last_seen_at = %advance.last_seen_at, "watermark advanced");
    }
    Ok(advance)
}

pub fn get_watermarks(store: &Store, viewer: &User, channel_id: Uuid) -> AppResult<Vec<WatermarkRow>> {
    store.transaction(|tx| {
        membership::require_member(tx, viewer.id, channel_id)?;
        let channel = membership::require_channel(tx, channel_id)?;
        let rows = tx.watermarks(channel_id)?;
        Ok(anonymize(channel.kind(), viewer.id, &rows))
    })
}

/// Per channel, messages by others newer than the caller's watermark.
pub fn unread_summary(store: &Store, user: &User) -> AppResult<Vec<UnreadCount>> {
    store.transaction(|tx| {
        let mut counts = Vec::new();
        for membership in tx.memberships_of_user(user.id)? {
            let after = tx
                .watermark(user.id, membership.channel_id)?
                .map(|w| w.last_seen_at);
            let unread = tx.count_messages_after(membership.channel_id, after, user.id, UNREAD_SCAN_CAP)?;
            if unread > 0 {
                counts.push(UnreadCount {
                    channel_id: membership.channel_id,
                    unread: unread as u32,
                });
            }
        }
        Ok(counts)
    })
}
