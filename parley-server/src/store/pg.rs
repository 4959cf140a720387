use chrono::{DateTime, Utc};
use diesel::dsl::max;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use uuid::Uuid;

use parley_shared::clients::db::DbPool;
use parley_shared::{AppError, AppResult, ErrorCode, FeedPosition};

use super::{next_created_at, Advance, StoreTx};
use crate::models::{Channel, ChannelLink, Contact, Membership, Message, NewMessage, User, Watermark};
use crate::schema::{channel_links, channel_members, channels, contacts, messages, read_watermarks, users};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub(super) fn transaction<T>(&self, mut f: impl FnMut(&mut dyn StoreTx) -> AppResult<T>) -> AppResult<T> {
        let mut conn = self.pool.get().map_err(|e| AppError::Internal(e.into()))?;
        with_retries(SERIALIZATION_ATTEMPTS, || {
            conn.build_transaction()
                .serializable()
                .run(|conn| f(&mut PgTx { conn }))
        })
    }

    pub(super) fn ping(&self) -> AppResult<()> {
        let mut conn = self.pool.get().map_err(|e| AppError::Internal(e.into()))?;
        diesel::sql_query("SELECT 1").execute(&mut conn)?;
        Ok(())
    }
}

/// Attempts per transaction before a serialization failure reaches the caller.
const SERIALIZATION_ATTEMPTS: u32 = 5;

fn is_serialization_failure(err: &AppError) -> bool {
    matches!(
        err,
        AppError::Database(DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _))
    )
}

/// Run `attempt` until it succeeds, fails for another reason, or `attempts`
/// serialization failures have been seen.
fn with_retries<T>(attempts: u32, mut attempt: impl FnMut() -> AppResult<T>) -> AppResult<T> {
    let mut tried = 1;
    loop {
        match attempt() {
            Err(err) if tried < attempts && is_serialization_failure(&err) => {
                tracing::debug!(attempt = tried, "serialization conflict, retrying transaction");
                tried += 1;
            }
            result => return result,
        }
    }
}

struct PgTx<'a> {
    conn: &'a mut PgConnection,
}

/// Turn a unique-index violation into the matching conflict error.
fn conflict(err: DieselError, code: ErrorCode, message: &str) -> AppError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => AppError::new(code, message),
        other => AppError::Database(other),
    }
}

fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

impl StoreTx for PgTx<'_> {
    fn user(&mut self, id: Uuid) -> AppResult<Option<User>> {
        Ok(users::table
            .find(id)
            .select(User::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn user_by_token(&mut self, token_identifier: &str) -> AppResult<Option<User>> {
        Ok(users::table
            .filter(users::token_identifier.eq(token_identifier))
            .select(User::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn user_by_username(&mut self, username: &str) -> AppResult<Option<User>> {
        Ok(users::table
            .filter(users::username.eq(username))
            .select(User::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn users(&mut self, ids: &[Uuid]) -> AppResult<Vec<User>> {
        Ok(users::table
            .filter(users::id.eq_any(ids))
            .select(User::as_select())
            .load(self.conn)?)
    }

    fn search_users(&mut self, query: &str, exclude: Uuid, limit: i64) -> AppResult<Vec<User>> {
        let pattern = like_pattern(query);
        Ok(users::table
            .filter(users::id.ne(exclude))
            .filter(
                users::name
                    .ilike(&pattern)
                    .or(users::username.assume_not_null().ilike(&pattern)),
            )
            .order(users::name.asc())
            .limit(limit)
            .select(User::as_select())
            .load(self.conn)?)
    }

    fn insert_user(&mut self, user: &User) -> AppResult<()> {
        diesel::insert_into(users::table)
            .values(user)
            .execute(self.conn)
            .map_err(|e| conflict(e, ErrorCode::UsernameTaken, "username is already taken"))?;
        Ok(())
    }

    fn save_user(&mut self, user: &User) -> AppResult<()> {
        diesel::update(users::table.find(user.id))
            .set(user)
            .execute(self.conn)
            .map_err(|e| conflict(e, ErrorCode::UsernameTaken, "username is already taken"))?;
        Ok(())
    }

    fn channel(&mut self, id: Uuid) -> AppResult<Option<Channel>> {
        Ok(channels::table
            .find(id)
            .select(Channel::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn channels(&mut self, ids: &[Uuid]) -> AppResult<Vec<Channel>> {
        Ok(channels::table
            .filter(channels::id.eq_any(ids))
            .select(Channel::as_select())
            .load(self.conn)?)
    }

    fn insert_channel(&mut self, channel: &Channel) -> AppResult<()> {
        diesel::insert_into(channels::table).values(channel).execute(self.conn)?;
        Ok(())
    }

    fn membership(&mut self, channel_id: Uuid, user_id: Uuid) -> AppResult<Option<Membership>> {
        Ok(channel_members::table
            .filter(channel_members::channel_id.eq(channel_id))
            .filter(channel_members::user_id.eq(user_id))
            .select(Membership::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn memberships_of_user(&mut self, user_id: Uuid) -> AppResult<Vec<Membership>> {
        Ok(channel_members::table
            .filter(channel_members::user_id.eq(user_id))
            .select(Membership::as_select())
            .load(self.conn)?)
    }

    fn memberships_of_channel(&mut self, channel_id: Uuid) -> AppResult<Vec<Membership>> {
        Ok(channel_members::table
            .filter(channel_members::channel_id.eq(channel_id))
            .order(channel_members::joined_at.asc())
            .select(Membership::as_select())
            .load(self.conn)?)
    }

    fn membership_by_private_key(&mut self, key: &str, user_id: Uuid) -> AppResult<Option<Membership>> {
        Ok(channel_members::table
            .filter(channel_members::private_key.eq(key))
            .filter(channel_members::user_id.eq(user_id))
            .select(Membership::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn insert_membership(&mut self, membership: &Membership) -> AppResult<()> {
        diesel::insert_into(channel_members::table)
            .values(membership)
            .execute(self.conn)
            .map_err(|e| conflict(e, ErrorCode::AlreadyMember, "already a member of this channel"))?;
        Ok(())
    }

    fn link_by_token(&mut self, token: &str) -> AppResult<Option<ChannelLink>> {
        Ok(channel_links::table
            .filter(channel_links::token.eq(token))
            .select(ChannelLink::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn link_for_channel(&mut self, channel_id: Uuid) -> AppResult<Option<ChannelLink>> {
        Ok(channel_links::table
            .filter(channel_links::channel_id.eq(channel_id))
            .select(ChannelLink::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn insert_link(&mut self, link: &ChannelLink) -> AppResult<()> {
        diesel::insert_into(channel_links::table).values(link).execute(self.conn)?;
        Ok(())
    }

    fn delete_link(&mut self, id: Uuid) -> AppResult<()> {
        diesel::delete(channel_links::table.find(id)).execute(self.conn)?;
        Ok(())
    }

    fn message(&mut self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(messages::table
            .find(id)
            .select(Message::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn messages(&mut self, ids: &[Uuid]) -> AppResult<Vec<Message>> {
        Ok(messages::table
            .filter(messages::id.eq_any(ids))
            .select(Message::as_select())
            .load(self.conn)?)
    }

    fn insert_message(&mut self, draft: NewMessage) -> AppResult<Message> {
        let last: Option<DateTime<Utc>> = messages::table
            .select(max(messages::created_at))
            .first(self.conn)?;
        let message = draft.stamp(next_created_at(last));
        diesel::insert_into(messages::table).values(&message).execute(self.conn)?;
        Ok(message)
    }

    fn save_message(&mut self, message: &Message) -> AppResult<()> {
        diesel::update(messages::table.find(message.id))
            .set(message)
            .execute(self.conn)?;
        Ok(())
    }

    fn messages_before(
        &mut self,
        channel_id: Uuid,
        before: Option<FeedPosition>,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        let mut query = messages::table
            .filter(messages::channel_id.eq(channel_id))
            .order((messages::created_at.desc(), messages::id.desc()))
            .limit(limit)
            .select(Message::as_select())
            .into_boxed();

        if let Some(pos) = before {
            query = query.filter(
                messages::created_at.lt(pos.created_at).or(messages::created_at
                    .eq(pos.created_at)
                    .and(messages::id.lt(pos.id))),
            );
        }

        Ok(query.load(self.conn)?)
    }

    fn count_messages_after(
        &mut self,
        channel_id: Uuid,
        after: Option<DateTime<Utc>>,
        reader: Uuid,
        cap: i64,
    ) -> AppResult<i64> {
        let mut query = messages::table
            .filter(messages::channel_id.eq(channel_id))
            .filter(messages::author_id.ne(reader))
            .select(messages::id)
            .limit(cap)
            .into_boxed();

        if let Some(after) = after {
            query = query.filter(messages::created_at.gt(after));
        }

        let ids: Vec<Uuid> = query.load(self.conn)?;
        Ok(ids.len() as i64)
    }

    fn watermark(&mut self, user_id: Uuid, channel_id: Uuid) -> AppResult<Option<Watermark>> {
        Ok(read_watermarks::table
            .find((user_id, channel_id))
            .select(Watermark::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn watermarks(&mut self, channel_id: Uuid) -> AppResult<Vec<Watermark>> {
        Ok(read_watermarks::table
            .filter(read_watermarks::channel_id.eq(channel_id))
            .order(read_watermarks::last_seen_at.desc())
            .select(Watermark::as_select())
            .load(self.conn)?)
    }

    fn advance_watermark(&mut self, user_id: Uuid, channel_id: Uuid, at: DateTime<Utc>) -> AppResult<Advance> {
        let inserted = diesel::insert_into(read_watermarks::table)
            .values(&Watermark {
                user_id,
                channel_id,
                last_seen_at: at,
            })
            .on_conflict_do_nothing()
            .execute(self.conn)?;

        let updated = if inserted == 0 {
            diesel::update(
                read_watermarks::table
                    .filter(read_watermarks::user_id.eq(user_id))
                    .filter(read_watermarks::channel_id.eq(channel_id))
                    .filter(read_watermarks::last_seen_at.lt(at)),
            )
            .set(read_watermarks::last_seen_at.eq(at))
            .execute(self.conn)?
        } else {
            0
        };

        let last_seen_at: DateTime<Utc> = read_watermarks::table
            .find((user_id, channel_id))
            .select(read_watermarks::last_seen_at)
            .first(self.conn)?;

        Ok(Advance {
            last_seen_at,
            advanced: inserted + updated > 0,
        })
    }

    fn contact(&mut self, id: Uuid) -> AppResult<Option<Contact>> {
        Ok(contacts::table
            .find(id)
            .select(Contact::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn contact_by_pair(&mut self, owner_id: Uuid, contact_id: Uuid) -> AppResult<Option<Contact>> {
        Ok(contacts::table
            .filter(contacts::owner_id.eq(owner_id))
            .filter(contacts::contact_id.eq(contact_id))
            .select(Contact::as_select())
            .first(self.conn)
            .optional()?)
    }

    fn contacts_of(&mut self, owner_id: Uuid) -> AppResult<Vec<Contact>> {
        Ok(contacts::table
            .filter(contacts::owner_id.eq(owner_id))
            .order(contacts::name.asc())
            .select(Contact::as_select())
            .load(self.conn)?)
    }

    fn insert_contact(&mut self, contact: &Contact) -> AppResult<()> {
        diesel::insert_into(contacts::table)
            .values(contact)
            .execute(self.conn)
            .map_err(|e| conflict(e, ErrorCode::DuplicateContact, "contact already exists"))?;
        Ok(())
    }

    fn rename_contact(&mut self, id: Uuid, name: &str) -> AppResult<()> {
        diesel::update(contacts::table.find(id))
            .set(contacts::name.eq(name))
            .execute(self.conn)?;
        Ok(())
    }

    fn delete_contact(&mut self, id: Uuid) -> AppResult<()> {
        diesel::delete(contacts::table.find(id)).execute(self.conn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("ali"), "%ali%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    fn db_error(kind: DatabaseErrorKind) -> AppError {
        AppError::Database(DieselError::DatabaseError(kind, Box::new("conflict".to_string())))
    }

    #[test]
    fn serialization_conflicts_are_retried() {
        let mut calls = 0;
        let out = with_retries(5, || {
            calls += 1;
            if calls < 3 {
                Err(db_error(DatabaseErrorKind::SerializationFailure))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(out.unwrap(), 3);
    }

    #[test]
    fn retries_stop_after_the_last_attempt() {
        let mut calls = 0;
        let out: AppResult<()> = with_retries(5, || {
            calls += 1;
            Err(db_error(DatabaseErrorKind::SerializationFailure))
        });
        assert!(is_serialization_failure(&out.unwrap_err()));
        assert_eq!(calls, 5);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut calls = 0;
        let out: AppResult<()> = with_retries(5, || {
            calls += 1;
            Err(db_error(DatabaseErrorKind::UniqueViolation))
        });
        assert!(out.is_err());
        assert_eq!(calls, 1);
    }
}
