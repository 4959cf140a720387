//! Fixture for service tests: an in-memory store plus the live hub, with
//! helpers that publish changes the way the HTTP layer does.

use uuid::Uuid;

use parley_shared::{
    AddContactRequest, ChannelInfo, ChannelKind, CreateChannelRequest, EnsureUserRequest, MessageView,
    SendMessageRequest,
};

use crate::live::LiveHub;
use crate::models::User;
use crate::services::directory::{self, InvitePolicy};
use crate::services::{contacts, feed, identity};
use crate::store::Store;

pub(crate) struct Fixture {
    pub store: Store,
    pub live: LiveHub,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_tail_size(50)
    }

    pub fn with_tail_size(tail_size: u32) -> Self {
        let store = Store::memory();
        let live = LiveHub::new(store.clone(), tail_size);
        Self { store, live }
    }

    pub fn subject(name: &str) -> String {
        format!("provider|{name}")
    }

    pub fn user(&self, name: &str) -> User {
        identity::ensure_user(
            &self.store,
            &Self::subject(name),
            &EnsureUserRequest {
                name: name.into(),
                username: Some(name.into()),
            },
        )
        .unwrap()
    }

    fn create(&self, creator: &User, name: &str, kind: ChannelKind, members: &[&User]) -> ChannelInfo {
        let req = CreateChannelRequest {
            name: name.into(),
            kind,
            member_ids: members.iter().map(|u| u.id).collect(),
        };
        directory::create_channel(&self.store, creator, &req, InvitePolicy::default()).unwrap()
    }

    pub fn group(&self, creator: &User, name: &str, members: &[&User]) -> ChannelInfo {
        self.create(creator, name, ChannelKind::Group, members)
    }

    pub fn public(&self, creator: &User, name: &str, members: &[&User]) -> ChannelInfo {
        self.create(creator, name, ChannelKind::Channel, members)
    }

    pub fn private(&self, creator: &User, other: &User) -> ChannelInfo {
        self.create(creator, "", ChannelKind::Private, &[other])
    }

    pub fn send(&self, author: &User, channel_id: Uuid, body: &str) -> MessageView {
        let view = feed::send_message(
            &self.store,
            author,
            channel_id,
            &SendMessageRequest {
                body: body.into(),
                reply_to: None,
            },
        )
        .unwrap();
        self.live.messages_changed(channel_id);
        self.live.watermarks_changed(channel_id);
        view
    }

    pub fn add_contact(&self, owner: &User, contact: &User, name: &str) {
        contacts::add_contact(
            &self.store,
            owner,
            &AddContactRequest {
                contact_id: contact.id,
                name: name.into(),
            },
        )
        .unwrap();
    }
}
