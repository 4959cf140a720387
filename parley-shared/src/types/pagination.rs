use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{AppError, AppResult, ErrorCode};

/// Hard ceiling on any page request, whatever the caller asks for.
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CursorParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl CursorParams {
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

/// Position of a message in the feed ordering: creation time, then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeedPosition {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

/// Continuation token for backward pagination. Bound to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub channel_id: Uuid,
    pub position: FeedPosition,
}

impl Cursor {
    pub fn new(channel_id: Uuid, position: FeedPosition) -> Self {
        Self { channel_id, position }
    }

    pub fn encode(&self) -> String {
        let raw = format!(
            "{}:{}:{}",
            self.channel_id,
            self.position.created_at.timestamp_micros(),
            self.position.id
        );
        hex::encode(raw)
    }

    /// Decode a token and check it was minted for `channel_id`.
    pub fn decode(token: &str, channel_id: Uuid) -> AppResult<FeedPosition> {
        let invalid = || AppError::new(ErrorCode::BadRequest, "invalid pagination cursor");

        let bytes = hex::decode(token).map_err(|_| invalid())?;
        let raw = String::from_utf8(bytes).map_err(|_| invalid())?;
        let mut parts = raw.splitn(3, ':');
        let (Some(channel), Some(micros), Some(id)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };

        let channel = Uuid::parse_str(channel).map_err(|_| invalid())?;
        if channel != channel_id {
            return Err(AppError::new(
                ErrorCode::BadRequest,
                "pagination cursor belongs to another channel",
            ));
        }

        let micros: i64 = micros.parse().map_err(|_| invalid())?;
        let created_at = DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(invalid)?;
        let id = Uuid::parse_str(id).map_err(|_| invalid())?;

        Ok(FeedPosition { created_at, id })
    }
}

/// One page of a cursor-paginated query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorPage<T> {
    pub page: Vec<T>,
    pub continue_cursor: Option<String>,
    pub is_done: bool,
}

impl<T> CursorPage<T> {
    pub fn done(page: Vec<T>) -> Self {
        Self {
            page,
            continue_cursor: None,
            is_done: true,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> CursorPage<U> {
        CursorPage {
            page: self.page.into_iter().map(f).collect(),
            continue_cursor: self.continue_cursor,
            is_done: self.is_done,
        }
    }
}
