use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use parley_shared::{ChannelInfo, ChannelKind, FeedPosition, MessageView, RepliedMessage, UserProfile};

use crate::schema::{channel_links, channel_members, channels, contacts, messages, read_watermarks, users};

// --- User ---

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Insertable, AsChangeset)]
#[diesel(table_name = users)]
#[diesel(treat_none_as_null = true)]
pub struct User {
    pub id: Uuid,
    pub token_identifier: String,
    pub name: String,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub last_active_at: DateTime<Utc>,
    pub show_last_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(token_identifier: impl Into<String>, name: impl Into<String>, username: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            token_identifier: token_identifier.into(),
            name: name.into(),
            username,
            avatar_url: None,
            bio: None,
            last_active_at: now,
            show_last_active: true,
            created_at: now,
        }
    }

    /// Profile as seen by `viewer`. Last activity stays hidden from others
    /// when the user opted out.
    pub fn profile_for(&self, viewer: Uuid) -> UserProfile {
        let visible = self.show_last_active || self.id == viewer;
        UserProfile {
            id: self.id,
            name: self.name.clone(),
            username: self.username.clone(),
            avatar_url: self.avatar_url.clone(),
            bio: self.bio.clone(),
            last_active_at: visible.then_some(self.last_active_at),
        }
    }
}

// --- Channel ---

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = channels)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    pub fn new(name: impl Into<String>, kind: ChannelKind, created_by: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            kind: kind.as_str().to_string(),
            created_by,
            created_at: Utc::now(),
        }
    }

    /// Rows are written through [`Channel::new`] and a check constraint, so an
    /// unknown kind only appears on a corrupted row; treat it as a group.
    pub fn kind(&self) -> ChannelKind {
        self.kind.parse().unwrap_or(ChannelKind::Group)
    }

    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind(),
            created_by: self.created_by,
            created_at: self.created_at,
        }
    }
}

// --- Membership ---

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = channel_members)]
pub struct Membership {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub is_admin: bool,
    pub private_key: Option<String>,
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(channel_id: Uuid, user_id: Uuid, is_admin: bool) -> Self {
        Self {
            id: Uuid::now_v7(),
            channel_id,
            user_id,
            is_admin,
            private_key: None,
            joined_at: Utc::now(),
        }
    }

    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.private_key = Some(key.into());
        self
    }
}

/// Order-independent key naming the private channel between two users.
pub fn private_key(a: Uuid, b: Uuid) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{low}:{high}")
}

// --- Link ---

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = channel_links)]
pub struct ChannelLink {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub token: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

// --- Message ---

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Insertable, AsChangeset)]
#[diesel(table_name = messages)]
#[diesel(treat_none_as_null = true)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn position(&self) -> FeedPosition {
        FeedPosition {
            created_at: self.created_at,
            id: self.id,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn replied(&self) -> RepliedMessage {
        RepliedMessage {
            id: self.id,
            channel_id: self.channel_id,
            author_id: self.author_id,
            body: self.body.clone(),
            created_at: self.created_at,
            edited_at: self.edited_at,
            deleted_at: self.deleted_at,
        }
    }

    pub fn view(&self, author: Option<UserProfile>, replied: Option<RepliedMessage>) -> MessageView {
        MessageView {
            id: self.id,
            channel_id: self.channel_id,
            author_id: self.author_id,
            body: self.body.clone(),
            created_at: self.created_at,
            edited_at: self.edited_at,
            deleted_at: self.deleted_at,
            reply_to: self.reply_to,
            author,
            replied,
        }
    }
}

/// A message before the store has stamped it.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub reply_to: Option<Uuid>,
}

impl NewMessage {
    pub fn stamp(self, created_at: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::now_v7(),
            channel_id: self.channel_id,
            author_id: self.author_id,
            body: self.body,
            reply_to: self.reply_to,
            created_at,
            edited_at: None,
            deleted_at: None,
        }
    }
}

// --- Watermark ---

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Insertable)]
#[diesel(table_name = read_watermarks)]
pub struct Watermark {
    pub user_id: Uuid,
    pub channel_id: Uuid,
    pub last_seen_at: DateTime<Utc>,
}

// --- Contact ---

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Insertable)]
#[diesel(table_name = contacts)]
pub struct Contact {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub contact_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(owner_id: Uuid, contact_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id,
            contact_id,
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}
