//! Wire types exchanged between the chat server and its clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::pagination::FeedPosition;

/// Body substituted for a soft-deleted message.
pub const TOMBSTONE_BODY: &str = "This message was deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Broadcast channel: everyone reads, admins post.
    Channel,
    Group,
    /// 1:1 conversation, exactly two members.
    Private,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Channel => "channel",
            ChannelKind::Group => "group",
            ChannelKind::Private => "private",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "channel" => Ok(ChannelKind::Channel),
            "group" => Ok(ChannelKind::Group),
            "private" => Ok(ChannelKind::Private),
            _ => Err(format!("unknown channel kind: {s}")),
        }
    }
}

// --- Users ---

/// What other users may see of a user record. The identity token never
/// leaves the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    /// `None` when the user hides it from others.
    pub last_active_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "server", derive(validator::Validate))]
pub struct EnsureUserRequest {
    #[cfg_attr(feature = "server", validate(length(min = 1, max = 64, message = "name must be 1-64 characters")))]
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "server", derive(validator::Validate))]
pub struct UpdateProfileRequest {
    #[serde(default)]
    #[cfg_attr(feature = "server", validate(length(min = 1, max = 64, message = "name must be 1-64 characters")))]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    #[cfg_attr(feature = "server", validate(length(max = 280, message = "bio is limited to 280 characters")))]
    pub bio: Option<String>,
    #[serde(default)]
    #[cfg_attr(feature = "server", validate(url(message = "avatar must be a url")))]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub show_last_active: Option<bool>,
}

// --- Channels ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: Uuid,
    pub name: String,
    pub kind: ChannelKind,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Entry of the caller's channel list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSummary {
    #[serde(flatten)]
    pub channel: ChannelInfo,
    /// Other member of a private channel, named by the caller's contact entry
    /// when there is one.
    pub counterpart: Option<UserProfile>,
    pub last_message: Option<MessageView>,
    /// Caller's own read watermark for this channel.
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDetail {
    #[serde(flatten)]
    pub channel: ChannelInfo,
    pub is_admin: bool,
    pub can_send_messages: bool,
    /// Hidden from non-admins of public channels.
    pub members: Option<Vec<UserProfile>>,
    /// Active invite link, shown to admins only.
    pub link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedChannels {
    pub private: Option<ChannelInfo>,
    pub channels: Vec<ChannelInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "server", derive(validator::Validate))]
pub struct CreateChannelRequest {
    #[cfg_attr(feature = "server", validate(length(max = 100, message = "channel name is limited to 100 characters")))]
    pub name: String,
    pub kind: ChannelKind,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkResponse {
    pub token: String,
}

// --- Messages ---

/// A replied-to message as embedded in its reply. Never enriched further.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepliedMessage {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub reply_to: Option<Uuid>,
    pub author: Option<UserProfile>,
    pub replied: Option<RepliedMessage>,
}

impl MessageView {
    pub fn position(&self) -> FeedPosition {
        FeedPosition {
            created_at: self.created_at,
            id: self.id,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "server", derive(validator::Validate))]
pub struct SendMessageRequest {
    #[cfg_attr(feature = "server", validate(length(max = 4000, message = "message is limited to 4000 characters")))]
    pub body: String,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "server", derive(validator::Validate))]
pub struct EditMessageRequest {
    #[cfg_attr(feature = "server", validate(length(max = 4000, message = "message is limited to 4000 characters")))]
    pub body: String,
}

// --- Read state ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkSeenRequest {
    pub last_seen_at: DateTime<Utc>,
}

/// One member's watermark. `user_id` is `None` when the row is anonymized
/// for the viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkRow {
    pub user_id: Option<Uuid>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub channel_id: Uuid,
    /// Counts stop one past the display ceiling.
    pub unread: u32,
}

// --- Contacts ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactView {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub name: String,
    pub user: Option<UserProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "server", derive(validator::Validate))]
pub struct AddContactRequest {
    pub contact_id: Uuid,
    #[cfg_attr(feature = "server", validate(length(min = 1, max = 64, message = "contact name must be 1-64 characters")))]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "server", derive(validator::Validate))]
pub struct UpdateContactRequest {
    #[cfg_attr(feature = "server", validate(length(min = 1, max = 64, message = "contact name must be 1-64 characters")))]
    pub name: String,
}

// --- Live tail socket payloads ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub channel_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailPush {
    pub channel_id: Uuid,
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarksPush {
    pub channel_id: Uuid,
    pub rows: Vec<WatermarkRow>,
}
