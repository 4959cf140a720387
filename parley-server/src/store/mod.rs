//! Persistence behind one transactional interface.
//!
//! Services never touch a connection directly: they run a closure against a
//! [`StoreTx`] inside [`Store::transaction`], and either the whole closure
//! commits or nothing does.

mod memory;
mod pg;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use uuid::Uuid;

use parley_shared::{AppResult, FeedPosition};

use crate::models::{Channel, ChannelLink, Contact, Membership, Message, NewMessage, User, Watermark};

pub use memory::MemoryStore;
pub use pg::PgStore;

/// Current time at the precision the database keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Creation time for the next message: now, unless the clock has not moved
/// past the newest stored message.
fn next_created_at(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = now();
    match last {
        Some(last) if last >= now => last + Duration::microseconds(1),
        _ => now,
    }
}

/// Result of a compare-and-set on a read watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    /// Value stored after the call, which may be newer than the candidate.
    pub last_seen_at: DateTime<Utc>,
    pub advanced: bool,
}

/// Operations available inside a transaction.
pub trait StoreTx {
    // --- Users ---
    fn user(&mut self, id: Uuid) -> AppResult<Option<User>>;
    fn user_by_token(&mut self, token_identifier: &str) -> AppResult<Option<User>>;
    fn user_by_username(&mut self, username: &str) -> AppResult<Option<User>>;
    fn users(&mut self, ids: &[Uuid]) -> AppResult<Vec<User>>;
    /// Case-insensitive substring match on name or username.
    fn search_users(&mut self, query: &str, exclude: Uuid, limit: i64) -> AppResult<Vec<User>>;
    fn insert_user(&mut self, user: &User) -> AppResult<()>;
    fn save_user(&mut self, user: &User) -> AppResult<()>;

    // --- Channels ---
    fn channel(&mut self, id: Uuid) -> AppResult<Option<Channel>>;
    fn channels(&mut self, ids: &[Uuid]) -> AppResult<Vec<Channel>>;
    fn insert_channel(&mut self, channel: &Channel) -> AppResult<()>;

    // --- Memberships ---
    fn membership(&mut self, channel_id: Uuid, user_id: Uuid) -> AppResult<Option<Membership>>;
    fn memberships_of_user(&mut self, user_id: Uuid) -> AppResult<Vec<Membership>>;
    fn memberships_of_channel(&mut self, channel_id: Uuid) -> AppResult<Vec<Membership>>;
    fn membership_by_private_key(&mut self, key: &str, user_id: Uuid) -> AppResult<Option<Membership>>;
    fn insert_membership(&mut self, membership: &Membership) -> AppResult<()>;

    // --- Links ---
    fn link_by_token(&mut self, token: &str) -> AppResult<Option<ChannelLink>>;
    fn link_for_channel(&mut self, channel_id: Uuid) -> AppResult<Option<ChannelLink>>;
    fn insert_link(&mut self, link: &ChannelLink) -> AppResult<()>;
    fn delete_link(&mut self, id: Uuid) -> AppResult<()>;

    // --- Messages ---
    fn message(&mut self, id: Uuid) -> AppResult<Option<Message>>;
    fn messages(&mut self, ids: &[Uuid]) -> AppResult<Vec<Message>>;
    /// Stamps the draft with a creation time strictly after every message
    /// already stored.
    fn insert_message(&mut self, draft: NewMessage) -> AppResult<Message>;
    fn save_message(&mut self, message: &Message) -> AppResult<()>;
    /// Up to `limit` messages of a channel strictly before `before`, newest first.
    fn messages_before(
        &mut self,
        channel_id: Uuid,
        before: Option<FeedPosition>,
        limit: i64,
    ) -> AppResult<Vec<Message>>;
    /// Messages newer than `after` not written by `reader`, counting at most `cap`.
    fn count_messages_after(
        &mut self,
        channel_id: Uuid,
        after: Option<DateTime<Utc>>,
        reader: Uuid,
        cap: i64,
    ) -> AppResult<i64>;

    // --- Watermarks ---
    fn watermark(&mut self, user_id: Uuid, channel_id: Uuid) -> AppResult<Option<Watermark>>;
    fn watermarks(&mut self, channel_id: Uuid) -> AppResult<Vec<Watermark>>;
    /// Creates the row or moves it forward. Never moves it back.
    fn advance_watermark(&mut self, user_id: Uuid, channel_id: Uuid, at: DateTime<Utc>) -> AppResult<Advance>;

    // --- Contacts ---
    fn contact(&mut self, id: Uuid) -> AppResult<Option<Contact>>;
    fn contact_by_pair(&mut self, owner_id: Uuid, contact_id: Uuid) -> AppResult<Option<Contact>>;
    fn contacts_of(&mut self, owner_id: Uuid) -> AppResult<Vec<Contact>>;
    fn insert_contact(&mut self, contact: &Contact) -> AppResult<()>;
    fn rename_contact(&mut self, id: Uuid, name: &str) -> AppResult<()>;
    fn delete_contact(&mut self, id: Uuid) -> AppResult<()>;
}

#[derive(Clone)]
pub enum Store {
    Postgres(PgStore),
    Memory(MemoryStore),
}

impl Store {
    pub fn memory() -> Self {
        Store::Memory(MemoryStore::default())
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Store::Postgres(_) => "postgres",
            Store::Memory(_) => "memory",
        }
    }

    /// Run `f` atomically. An `Err` from `f` rolls everything back.
    /// Run `f` in one transaction. The Postgres backend may call `f` again
    /// when the database aborts the transaction on a serialization conflict.
    pub fn transaction<T>(&self, f: impl FnMut(&mut dyn StoreTx) -> AppResult<T>) -> AppResult<T> {
        match self {
            Store::Postgres(store) => store.transaction(f),
            Store::Memory(store) => store.transaction(f),
        }
    }

    pub fn ping(&self) -> AppResult<()> {
        match self {
            Store::Postgres(store) => store.ping(),
            Store::Memory(_) => Ok(()),
        }
    }
}
