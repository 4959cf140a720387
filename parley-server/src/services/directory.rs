//! Channel creation, invite links and the per-user channel list.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rand::RngCore;
use uuid::Uuid;

use parley_shared::{
    AppError, AppResult, ChannelDetail, ChannelInfo, ChannelKind, ChannelSummary, CreateChannelRequest, ErrorCode,
    SharedChannels,
};

use crate::models::{private_key, Channel, ChannelLink, Membership, NewMessage, User};
use crate::sanitize::sanitize_body;
use crate::services::{feed, membership};
use crate::store::{self, Store, StoreTx};

/// Who may be pulled into a new channel or group.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvitePolicy {
    /// Only add invitees who have the creator among their contacts.
    pub contact_gated: bool,
}

fn new_link_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn create_channel(
    store: &Store,
    creator: &User,
    req: &CreateChannelRequest,
    policy: InvitePolicy,
) -> AppResult<ChannelInfo> {
    let opened = store.transaction(|tx| match req.kind {
        ChannelKind::Private => open_private(tx, creator, req),
        ChannelKind::Channel | ChannelKind::Group => open_shared(tx, creator, req, policy),
    });
    let channel = match opened {
        Err(err) if lost_private_race(req.kind, &err) => {
            tracing::debug!(creator = %creator.id, "private channel opened concurrently, reusing it");
            store.transaction(|tx| open_private(tx, creator, req))?
        }
        other => other?,
    };
    Ok(channel.info())
}

/// A private channel's two memberships are new rows of a new channel, so a
/// membership conflict means another request created the pair's channel
/// first. Reading again returns that channel.
fn lost_private_race(kind: ChannelKind, err: &AppError) -> bool {
    kind == ChannelKind::Private && err.code() == Some(ErrorCode::AlreadyMember)
}

/// Returns the existing private channel for the pair when there is one.
fn open_private(tx: &mut dyn StoreTx, creator: &User, req: &CreateChannelRequest) -> AppResult<Channel> {
    let [target] = req.member_ids.as_slice() else {
        return Err(AppError::new(
            ErrorCode::ValidationError,
            "a private channel needs exactly one other member",
        ));
    };
    if *target == creator.id {
        return Err(AppError::bad_request("cannot open a private channel with yourself"));
    }
    let target = tx
        .user(*target)?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "user not found"))?;

    let key = private_key(creator.id, target.id);
    if let Some(existing) = tx.membership_by_private_key(&key, creator.id)? {
        return membership::require_channel(tx, existing.channel_id);
    }

    let channel = Channel::new(req.name.trim(), ChannelKind::Private, creator.id);
    tx.insert_channel(&channel)?;
    tx.insert_membership(&Membership::new(channel.id, creator.id, true).with_private_key(&key))?;
    tx.insert_membership(&Membership::new(channel.id, target.id, false).with_private_key(&key))?;

    tracing::info!(channel = %channel.id, "private channel opened");
    Ok(channel)
}

fn open_shared(
    tx: &mut dyn StoreTx,
    creator: &User,
    req: &CreateChannelRequest,
    policy: InvitePolicy,
) -> AppResult<Channel> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::new(ErrorCode::ValidationError, "channel name cannot be empty"));
    }

    let mut invitees: Vec<Uuid> = Vec::new();
    for id in &req.member_ids {
        if *id != creator.id && !invitees.contains(id) {
            invitees.push(*id);
        }
    }
    let found = tx.users(&invitees)?;
    if found.len() != invitees.len() {
        return Err(AppError::new(ErrorCode::UserNotFound, "some invited users do not exist"));
    }

    let channel = Channel::new(name, req.kind, creator.id);
    tx.insert_channel(&channel)?;
    tx.insert_membership(&Membership::new(channel.id, creator.id, true))?;

    let mut skipped = 0;
    for invitee in invitees {
        if policy.contact_gated && tx.contact_by_pair(invitee, creator.id)?.is_none() {
            skipped += 1;
            continue;
        }
        tx.insert_membership(&Membership::new(channel.id, invitee, false))?;
    }

    feed::post(
        tx,
        NewMessage {
            channel_id: channel.id,
            author_id: creator.id,
            body: sanitize_body(&format!("{} created {}", creator.name, channel.name)),
            reply_to: None,
        },
    )?;

    tracing::info!(channel = %channel.id, kind = %req.kind, skipped, "channel created");
    Ok(channel)
}

/// The channel's invite token, minted on first request.
pub fn create_link(store: &Store, caller: &User, channel_id: Uuid) -> AppResult<String> {
    store.transaction(|tx| {
        let channel = membership::require_channel(tx, channel_id)?;
        if channel.kind() == ChannelKind::Private {
            return Err(AppError::new(
                ErrorCode::PrivateChannel,
                "links can only be created for channels and groups",
            ));
        }
        membership::require_admin(tx, caller.id, channel_id)?;

        if let Some(link) = tx.link_for_channel(channel_id)? {
            return Ok(link.token);
        }

        let link = ChannelLink {
            id: Uuid::now_v7(),
            channel_id,
            token: new_link_token(),
            created_by: caller.id,
            created_at: store::now(),
        };
        tx.insert_link(&link)?;
        tracing::info!(channel = %channel_id, "invite link created");
        Ok(link.token)
    })
}

enum JoinOutcome {
    Joined(Channel),
    StrayLink,
}

pub fn join_channel(store: &Store, caller: &User, token: &str) -> AppResult<ChannelInfo> {
    let outcome = store.transaction(|tx| {
        let link = tx
            .link_by_token(token)?
            .ok_or_else(|| AppError::new(ErrorCode::LinkNotFound, "invite link not found"))?;
        let channel = match tx.channel(link.channel_id)? {
            Some(channel) => channel,
            None => {
                tx.delete_link(link.id)?;
                return Err(AppError::new(ErrorCode::LinkNotFound, "invite link not found"));
            }
        };

        if channel.kind() == ChannelKind::Private {
            // Commit the cleanup; the error is raised outside the transaction.
            tx.delete_link(link.id)?;
            return Ok(JoinOutcome::StrayLink);
        }

        if membership::is_member(tx, caller.id, channel.id)? {
            return Err(AppError::new(ErrorCode::AlreadyMember, "already a member of this channel"));
        }
        tx.insert_membership(&Membership::new(channel.id, caller.id, false))?;
        Ok(JoinOutcome::Joined(channel))
    })?;

    match outcome {
        JoinOutcome::Joined(channel) => {
            tracing::info!(channel = %channel.id, user_id = %caller.id, "joined via link");
            Ok(channel.info())
        }
        JoinOutcome::StrayLink => {
            tracing::warn!("removed an invite link pointing at a private channel");
            Err(AppError::new(ErrorCode::PrivateChannel, "private channels cannot be joined by link"))
        }
    }
}

pub fn revoke_link(store: &Store, caller: &User, token: &str) -> AppResult<Uuid> {
    store.transaction(|tx| {
        let link = tx
            .link_by_token(token)?
            .ok_or_else(|| AppError::new(ErrorCode::LinkNotFound, "invite link not found"))?;
        membership::require_admin(tx, caller.id, link.channel_id)?;
        tx.delete_link(link.id)?;
        tracing::info!(channel = %link.channel_id, "invite link revoked");
        Ok(link.channel_id)
    })
}

/// The caller's channels, most recently active first.
pub fn list_channels(store: &Store, user: &User) -> AppResult<Vec<ChannelSummary>> {
    store.transaction(|tx| {
        let memberships = tx.memberships_of_user(user.id)?;
        let ids: Vec<Uuid> = memberships.iter().map(|m| m.channel_id).collect();
        let channels = tx.channels(&ids)?;
        let overrides: HashMap<Uuid, String> = tx
            .contacts_of(user.id)?
            .into_iter()
            .map(|c| (c.contact_id, c.name))
            .collect();

        let mut summaries = Vec::with_capacity(channels.len());
        for channel in channels {
            let counterpart = if channel.kind() == ChannelKind::Private {
                let other = tx
                    .memberships_of_channel(channel.id)?
                    .into_iter()
                    .find(|m| m.user_id != user.id);
                match other {
                    Some(other) => tx.user(other.user_id)?.map(|u| {
                        let mut profile = u.profile_for(user.id);
                        if let Some(name) = overrides.get(&u.id) {
                            profile.name = name.clone();
                        }
                        profile
                    }),
                    None => None,
                }
            } else {
                None
            };

            let latest = tx.messages_before(channel.id, None, 1)?;
            let last_message = feed::enrich(tx, latest)?.pop();
            let last_seen_at = tx.watermark(user.id, channel.id)?.map(|w| w.last_seen_at);

            summaries.push(ChannelSummary {
                channel: channel.info(),
                counterpart,
                last_message,
                last_seen_at,
            });
        }

        summaries.sort_by_key(|s| std::cmp::Reverse(activity(s)));
        Ok(summaries)
    })
}

fn activity(summary: &ChannelSummary) -> DateTime<Utc> {
    summary
        .last_message
        .as_ref()
        .map_or(summary.channel.created_at, |m| m.created_at)
}

pub fn channel_detail(store: &Store, user: &User, channel_id: Uuid) -> AppResult<ChannelDetail> {
    store.transaction(|tx| {
        let own = membership::require_member(tx, user.id, channel_id)?;
        let channel = membership::require_channel(tx, channel_id)?;
        let kind = channel.kind();

        let members = if kind != ChannelKind::Channel || own.is_admin {
            let ids: Vec<Uuid> = tx
                .memberships_of_channel(channel_id)?
                .iter()
                .map(|m| m.user_id)
                .collect();
            Some(tx.users(&ids)?.iter().map(|u| u.profile_for(user.id)).collect())
        } else {
            None
        };

        let link = if own.is_admin {
            tx.link_for_channel(channel_id)?.map(|l| l.token)
        } else {
            None
        };

        Ok(ChannelDetail {
            channel: channel.info(),
            is_admin: own.is_admin,
            can_send_messages: membership::can_post(kind, &own),
            members,
            link,
        })
    })
}

/// The private channel between the caller and `other`, plus every channel
/// and group both belong to.
pub fn shared_channels(store: &Store, user: &User, other: Uuid) -> AppResult<SharedChannels> {
    store.transaction(|tx| {
        if tx.user(other)?.is_none() {
            return Err(AppError::new(ErrorCode::UserNotFound, "user not found"));
        }

        let private = match tx.membership_by_private_key(&private_key(user.id, other), user.id)? {
            Some(m) => tx.channel(m.channel_id)?.map(|c| c.info()),
            None => None,
        };

        let theirs: HashSet<Uuid> = tx
            .memberships_of_user(other)?
            .into_iter()
            .map(|m| m.channel_id)
            .collect();
        let common: Vec<Uuid> = tx
            .memberships_of_user(user.id)?
            .into_iter()
            .map(|m| m.channel_id)
            .filter(|id| theirs.contains(id))
            .collect();

        let mut channels: Vec<ChannelInfo> = tx
            .channels(&common)?
            .into_iter()
            .filter(|c| c.kind() != ChannelKind::Private)
            .map(|c| c.info())
            .collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(SharedChannels { private, channels })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::Fixture;

    fn private_req(target: Uuid) -> CreateChannelRequest {
        CreateChannelRequest {
            name: String::new(),
            kind: ChannelKind::Private,
            member_ids: vec![target],
        }
    }

    #[test]
    fn private_channel_is_created_once_per_pair() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");

        let first = create_channel(&fx.store, &alice, &private_req(bob.id), InvitePolicy::default()).unwrap();
        let again = create_channel(&fx.store, &alice, &private_req(bob.id), InvitePolicy::default()).unwrap();
        let reverse = create_channel(&fx.store, &bob, &private_req(alice.id), InvitePolicy::default()).unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(first.id, reverse.id);
        assert_eq!(list_channels(&fx.store, &alice).unwrap().len(), 1);
    }

    #[test]
    fn private_membership_conflict_reads_the_existing_channel() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let existing = fx.private(&alice, &bob);

        let conflict = AppError::new(ErrorCode::AlreadyMember, "already a member of this channel");
        assert!(lost_private_race(ChannelKind::Private, &conflict));
        assert!(!lost_private_race(ChannelKind::Group, &conflict));
        assert!(!lost_private_race(ChannelKind::Private, &AppError::forbidden("no")));

        let reread = fx
            .store
            .transaction(|tx| open_private(tx, &bob, &private_req(alice.id)))
            .unwrap();
        assert_eq!(reread.id, existing.id);
    }

    #[test]
    fn private_channel_admin_is_only_the_creator() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let channel = fx.private(&alice, &bob);

        let members = fx
            .store
            .transaction(|tx| tx.memberships_of_channel(channel.id))
            .unwrap();
        assert_eq!(members.len(), 2);
        for m in members {
            assert_eq!(m.is_admin, m.user_id == alice.id);
            assert_eq!(m.private_key.as_deref(), Some(private_key(alice.id, bob.id).as_str()));
        }
    }

    #[test]
    fn private_channel_needs_one_other_member() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let carol = fx.user("carol");

        let mut req = private_req(bob.id);
        req.member_ids.push(carol.id);
        let err = create_channel(&fx.store, &alice, &req, InvitePolicy::default()).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ValidationError));

        let err = create_channel(&fx.store, &alice, &private_req(alice.id), InvitePolicy::default()).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::BadRequest));
    }

    #[test]
    fn group_gets_welcome_message_and_deduplicated_members() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let req = CreateChannelRequest {
            name: "crew".into(),
            kind: ChannelKind::Group,
            member_ids: vec![bob.id, bob.id, alice.id],
        };
        let group = create_channel(&fx.store, &alice, &req, InvitePolicy::default()).unwrap();

        let detail = channel_detail(&fx.store, &alice, group.id).unwrap();
        assert_eq!(detail.members.map(|m| m.len()), Some(2));
        assert!(detail.is_admin);

        let summaries = list_channels(&fx.store, &bob).unwrap();
        let welcome = summaries[0].last_message.as_ref().unwrap();
        assert_eq!(welcome.body, "alice created crew");
    }

    #[test]
    fn contact_gating_skips_strangers() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let friend = fx.user("friend");
        let stranger = fx.user("stranger");
        fx.add_contact(&friend, &alice, "Al");

        let req = CreateChannelRequest {
            name: "club".into(),
            kind: ChannelKind::Group,
            member_ids: vec![friend.id, stranger.id],
        };
        let group = create_channel(&fx.store, &alice, &req, InvitePolicy { contact_gated: true }).unwrap();

        let ids: Vec<Uuid> = fx
            .store
            .transaction(|tx| tx.memberships_of_channel(group.id))
            .unwrap()
            .iter()
            .map(|m| m.user_id)
            .collect();
        assert!(ids.contains(&friend.id));
        assert!(!ids.contains(&stranger.id));
    }

    #[test]
    fn link_lifecycle() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let group = fx.group(&alice, "g", &[]);

        let token = create_link(&fx.store, &alice, group.id).unwrap();
        assert_eq!(create_link(&fx.store, &alice, group.id).unwrap(), token);

        let joined = join_channel(&fx.store, &bob, &token).unwrap();
        assert_eq!(joined.id, group.id);
        let err = join_channel(&fx.store, &bob, &token).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::AlreadyMember));

        let err = create_link(&fx.store, &bob, group.id).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotAdmin));
        let err = revoke_link(&fx.store, &bob, &token).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotAdmin));

        revoke_link(&fx.store, &alice, &token).unwrap();
        let err = join_channel(&fx.store, &fx.user("carol"), &token).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::LinkNotFound));
    }

    #[test]
    fn private_channels_have_no_links() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let channel = fx.private(&alice, &bob);
        let err = create_link(&fx.store, &alice, channel.id).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::PrivateChannel));
    }

    #[test]
    fn stray_private_link_is_removed_on_join() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let carol = fx.user("carol");
        let channel = fx.private(&alice, &bob);
        fx.store
            .transaction(|tx| {
                tx.insert_link(&ChannelLink {
                    id: Uuid::now_v7(),
                    channel_id: channel.id,
                    token: "stray".into(),
                    created_by: alice.id,
                    created_at: store::now(),
                })
            })
            .unwrap();

        let err = join_channel(&fx.store, &carol, "stray").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::PrivateChannel));
        assert!(fx.store.transaction(|tx| tx.link_by_token("stray")).unwrap().is_none());
    }

    #[test]
    fn public_member_list_is_admin_only() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let news = fx.public(&alice, "news", &[&bob]);
        let token = create_link(&fx.store, &alice, news.id).unwrap();

        let as_bob = channel_detail(&fx.store, &bob, news.id).unwrap();
        assert!(as_bob.members.is_none());
        assert!(as_bob.link.is_none());
        assert!(!as_bob.can_send_messages);

        let as_alice = channel_detail(&fx.store, &alice, news.id).unwrap();
        assert_eq!(as_alice.link, Some(token));
        assert!(as_alice.can_send_messages);
    }

    #[test]
    fn counterpart_uses_contact_name() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        fx.private(&alice, &bob);
        fx.add_contact(&alice, &bob, "Bobby");

        let summaries = list_channels(&fx.store, &alice).unwrap();
        assert_eq!(summaries[0].counterpart.as_ref().map(|u| u.name.as_str()), Some("Bobby"));
        let summaries = list_channels(&fx.store, &bob).unwrap();
        assert_eq!(summaries[0].counterpart.as_ref().map(|u| u.name.as_str()), Some("alice"));
    }

    #[test]
    fn shared_channels_lists_common_ground() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let carol = fx.user("carol");
        let private = fx.private(&alice, &bob);
        let both = fx.group(&alice, "both", &[&bob]);
        fx.group(&alice, "without bob", &[&carol]);

        let shared = shared_channels(&fx.store, &bob, alice.id).unwrap();
        assert_eq!(shared.private.map(|c| c.id), Some(private.id));
        assert_eq!(shared.channels.len(), 1);
        assert_eq!(shared.channels[0].id, both.id);
    }
}
