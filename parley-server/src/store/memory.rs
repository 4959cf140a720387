use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_shared::{AppError, AppResult, ErrorCode, FeedPosition};

use super::{next_created_at, Advance, StoreTx};
use crate::models::{Channel, ChannelLink, Contact, Membership, Message, NewMessage, User, Watermark};

/// Process-local store. A transaction works on a copy of the state and swaps
/// it in only when the closure succeeds.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Clone, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    channels: HashMap<Uuid, Channel>,
    memberships: HashMap<Uuid, Membership>,
    links: HashMap<Uuid, ChannelLink>,
    messages: HashMap<Uuid, Message>,
    watermarks: HashMap<(Uuid, Uuid), Watermark>,
    contacts: HashMap<Uuid, Contact>,
    last_created_at: Option<DateTime<Utc>>,
}

impl MemoryStore {
    pub(super) fn transaction<T>(&self, mut f: impl FnMut(&mut dyn StoreTx) -> AppResult<T>) -> AppResult<T> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| AppError::internal("memory store lock poisoned"))?;
        let mut working = guard.clone();
        let out = f(&mut working)?;
        *guard = working;
        Ok(out)
    }
}

fn sorted<T>(mut rows: Vec<T>, key: impl Fn(&T) -> String) -> Vec<T> {
    rows.sort_by_key(|row| key(row));
    rows
}

impl StoreTx for MemoryState {
    fn user(&mut self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.users.get(&id).cloned())
    }

    fn user_by_token(&mut self, token_identifier: &str) -> AppResult<Option<User>> {
        Ok(self
            .users
            .values()
            .find(|u| u.token_identifier == token_identifier)
            .cloned())
    }

    fn user_by_username(&mut self, username: &str) -> AppResult<Option<User>> {
        Ok(self
            .users
            .values()
            .find(|u| u.username.as_deref() == Some(username))
            .cloned())
    }

    fn users(&mut self, ids: &[Uuid]) -> AppResult<Vec<User>> {
        Ok(ids.iter().filter_map(|id| self.users.get(id).cloned()).collect())
    }

    fn search_users(&mut self, query: &str, exclude: Uuid, limit: i64) -> AppResult<Vec<User>> {
        let needle = query.to_lowercase();
        let hits: Vec<User> = self
            .users
            .values()
            .filter(|u| u.id != exclude)
            .filter(|u| {
                u.name.to_lowercase().contains(&needle)
                    || u.username.as_deref().is_some_and(|n| n.contains(&needle))
            })
            .cloned()
            .collect();
        let mut hits = sorted(hits, |u| u.name.clone());
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }

    fn insert_user(&mut self, user: &User) -> AppResult<()> {
        self.save_user(user)
    }

    fn save_user(&mut self, user: &User) -> AppResult<()> {
        if let Some(name) = &user.username {
            if self
                .users
                .values()
                .any(|u| u.id != user.id && u.username.as_ref() == Some(name))
            {
                return Err(AppError::new(ErrorCode::UsernameTaken, "username is already taken"));
            }
        }
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    fn channel(&mut self, id: Uuid) -> AppResult<Option<Channel>> {
        Ok(self.channels.get(&id).cloned())
    }

    fn channels(&mut self, ids: &[Uuid]) -> AppResult<Vec<Channel>> {
        Ok(ids.iter().filter_map(|id| self.channels.get(id).cloned()).collect())
    }

    fn insert_channel(&mut self, channel: &Channel) -> AppResult<()> {
        self.channels.insert(channel.id, channel.clone());
        Ok(())
    }

    fn membership(&mut self, channel_id: Uuid, user_id: Uuid) -> AppResult<Option<Membership>> {
        Ok(self
            .memberships
            .values()
            .find(|m| m.channel_id == channel_id && m.user_id == user_id)
            .cloned())
    }

    fn memberships_of_user(&mut self, user_id: Uuid) -> AppResult<Vec<Membership>> {
        Ok(self
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    fn memberships_of_channel(&mut self, channel_id: Uuid) -> AppResult<Vec<Membership>> {
        let mut rows: Vec<Membership> = self
            .memberships
            .values()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect();
        rows.sort_by_key(|m| (m.joined_at, m.id));
        Ok(rows)
    }

    fn membership_by_private_key(&mut self, key: &str, user_id: Uuid) -> AppResult<Option<Membership>> {
        Ok(self
            .memberships
            .values()
            .find(|m| m.user_id == user_id && m.private_key.as_deref() == Some(key))
            .cloned())
    }

    fn insert_membership(&mut self, membership: &Membership) -> AppResult<()> {
        let taken_key = match membership.private_key.as_deref() {
            Some(key) => self.membership_by_private_key(key, membership.user_id)?.is_some(),
            None => false,
        };
        if taken_key || self.membership(membership.channel_id, membership.user_id)?.is_some() {
            return Err(AppError::new(ErrorCode::AlreadyMember, "already a member of this channel"));
        }
        self.memberships.insert(membership.id, membership.clone());
        Ok(())
    }

    fn link_by_token(&mut self, token: &str) -> AppResult<Option<ChannelLink>> {
        Ok(self.links.values().find(|l| l.token == token).cloned())
    }

    fn link_for_channel(&mut self, channel_id: Uuid) -> AppResult<Option<ChannelLink>> {
        Ok(self.links.values().find(|l| l.channel_id == channel_id).cloned())
    }

    fn insert_link(&mut self, link: &ChannelLink) -> AppResult<()> {
        self.links.insert(link.id, link.clone());
        Ok(())
    }

    fn delete_link(&mut self, id: Uuid) -> AppResult<()> {
        self.links.remove(&id);
        Ok(())
    }

    fn message(&mut self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.messages.get(&id).cloned())
    }

    fn messages(&mut self, ids: &[Uuid]) -> AppResult<Vec<Message>> {
        Ok(ids.iter().filter_map(|id| self.messages.get(id).cloned()).collect())
    }

    fn insert_message(&mut self, draft: NewMessage) -> AppResult<Message> {
        let message = draft.stamp(next_created_at(self.last_created_at));
        self.last_created_at = Some(message.created_at);
        self.messages.insert(message.id, message.clone());
        Ok(message)
    }

    fn save_message(&mut self, message: &Message) -> AppResult<()> {
        self.messages.insert(message.id, message.clone());
        Ok(())
    }

    fn messages_before(
        &mut self,
        channel_id: Uuid,
        before: Option<FeedPosition>,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        let mut rows: Vec<Message> = self
            .messages
            .values()
            .filter(|m| m.channel_id == channel_id)
            .filter(|m| before.map_or(true, |pos| m.position() < pos))
            .cloned()
            .collect();
        rows.sort_by_key(|m| std::cmp::Reverse(m.position()));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    fn count_messages_after(
        &mut self,
        channel_id: Uuid,
        after: Option<DateTime<Utc>>,
        reader: Uuid,
        cap: i64,
    ) -> AppResult<i64> {
        let count = self
            .messages
            .values()
            .filter(|m| m.channel_id == channel_id && m.author_id != reader)
            .filter(|m| after.map_or(true, |at| m.created_at > at))
            .take(cap.max(0) as usize)
            .count();
        Ok(count as i64)
    }

    fn watermark(&mut self, user_id: Uuid, channel_id: Uuid) -> AppResult<Option<Watermark>> {
        Ok(self.watermarks.get(&(user_id, channel_id)).cloned())
    }

    fn watermarks(&mut self, channel_id: Uuid) -> AppResult<Vec<Watermark>> {
        let mut rows: Vec<Watermark> = self
            .watermarks
            .values()
            .filter(|w| w.channel_id == channel_id)
            .cloned()
            .collect();
        rows.sort_by_key(|w| std::cmp::Reverse(w.last_seen_at));
        Ok(rows)
    }

    fn advance_watermark(&mut self, user_id: Uuid, channel_id: Uuid, at: DateTime<Utc>) -> AppResult<Advance> {
        let row = self
            .watermarks
            .entry((user_id, channel_id))
            .or_insert_with(|| Watermark {
                user_id,
                channel_id,
                last_seen_at: DateTime::<Utc>::MIN_UTC,
            });
        let advanced = row.last_seen_at < at;
        if advanced {
            row.last_seen_at = at;
        }
        Ok(Advance {
            last_seen_at: row.last_seen_at,
            advanced,
        })
    }

    fn contact(&mut self, id: Uuid) -> AppResult<Option<Contact>> {
        Ok(self.contacts.get(&id).cloned())
    }

    fn contact_by_pair(&mut self, owner_id: Uuid, contact_id: Uuid) -> AppResult<Option<Contact>> {
        Ok(self
            .contacts
            .values()
            .find(|c| c.owner_id == owner_id && c.contact_id == contact_id)
            .cloned())
    }

    fn contacts_of(&mut self, owner_id: Uuid) -> AppResult<Vec<Contact>> {
        let rows: Vec<Contact> = self
            .contacts
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        Ok(sorted(rows, |c| c.name.clone()))
    }

    fn insert_contact(&mut self, contact: &Contact) -> AppResult<()> {
        if self.contact_by_pair(contact.owner_id, contact.contact_id)?.is_some() {
            return Err(AppError::new(ErrorCode::DuplicateContact, "contact already exists"));
        }
        self.contacts.insert(contact.id, contact.clone());
        Ok(())
    }

    fn rename_contact(&mut self, id: Uuid, name: &str) -> AppResult<()> {
        if let Some(contact) = self.contacts.get_mut(&id) {
            contact.name = name.to_string();
        }
        Ok(())
    }

    fn delete_contact(&mut self, id: Uuid) -> AppResult<()> {
        self.contacts.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn draft(channel_id: Uuid, author_id: Uuid) -> NewMessage {
        NewMessage {
            channel_id,
            author_id,
            body: "hi".into(),
            reply_to: None,
        }
    }

    #[test]
    fn failed_transaction_leaves_no_trace() {
        let store = Store::memory();
        let user = User::new("provider|a", "A", None);

        let result: AppResult<()> = store.transaction(|tx| {
            tx.insert_user(&user)?;
            Err(AppError::bad_request("abort"))
        });
        assert!(result.is_err());

        let found = store.transaction(|tx| tx.user(user.id)).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn creation_times_strictly_increase() {
        let store = Store::memory();
        let channel = Uuid::new_v4();
        let author = Uuid::new_v4();
        let stamps: Vec<DateTime<Utc>> = store
            .transaction(|tx| {
                (0..50)
                    .map(|_| tx.insert_message(draft(channel, author)).map(|m| m.created_at))
                    .collect()
            })
            .unwrap();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn watermark_never_regresses() {
        let store = Store::memory();
        let (user, channel) = (Uuid::new_v4(), Uuid::new_v4());
        let t = crate::store::now();

        let first = store.transaction(|tx| tx.advance_watermark(user, channel, t)).unwrap();
        assert!(first.advanced);
        let older = store
            .transaction(|tx| tx.advance_watermark(user, channel, t - chrono::Duration::seconds(5)))
            .unwrap();
        assert!(!older.advanced);
        assert_eq!(older.last_seen_at, t);
    }

    #[test]
    fn username_uniqueness_is_enforced() {
        let store = Store::memory();
        let a = User::new("provider|a", "A", Some("alice".into()));
        let b = User::new("provider|b", "B", Some("alice".into()));
        store.transaction(|tx| tx.insert_user(&a)).unwrap();
        let err = store.transaction(|tx| tx.insert_user(&b)).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::UsernameTaken));
    }
}
