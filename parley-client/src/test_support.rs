use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_shared::{CursorPage, MessageView, WatermarkRow};

use crate::api::FeedSource;
use crate::error::{ClientError, ClientResult};

pub fn message_at(channel_id: Uuid, created_at: DateTime<Utc>) -> MessageView {
    MessageView {
        id: Uuid::now_v7(),
        channel_id,
        author_id: Uuid::nil(),
        body: "hello".into(),
        created_at,
        edited_at: None,
        deleted_at: None,
        reply_to: None,
        author: None,
        replied: None,
    }
}

/// A recorded `list_messages` call.
#[derive(Debug, Clone, PartialEq)]
pub struct PageCall {
    pub channel_id: Uuid,
    pub cursor: Option<String>,
    pub limit: u32,
}

/// Serves scripted pages in order and records every call.
#[derive(Default)]
pub struct FakeSource {
    pages: Mutex<VecDeque<ClientResult<CursorPage<MessageView>>>>,
    page_calls: Mutex<Vec<PageCall>>,
    seen_calls: Mutex<Vec<(Uuid, DateTime<Utc>)>>,
}

impl FakeSource {
    pub fn with_pages(pages: Vec<ClientResult<CursorPage<MessageView>>>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            ..Self::default()
        }
    }

    pub fn page_calls(&self) -> Vec<PageCall> {
        self.page_calls.lock().unwrap().clone()
    }

    pub fn seen_calls(&self) -> Vec<(Uuid, DateTime<Utc>)> {
        self.seen_calls.lock().unwrap().clone()
    }
}

impl FeedSource for FakeSource {
    async fn list_messages(
        &self,
        channel_id: Uuid,
        cursor: Option<String>,
        limit: u32,
    ) -> ClientResult<CursorPage<MessageView>> {
        self.page_calls.lock().unwrap().push(PageCall {
            channel_id,
            cursor,
            limit,
        });
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::api("E0001", "no scripted page")))
    }

    async fn mark_seen(&self, channel_id: Uuid, last_seen_at: DateTime<Utc>) -> ClientResult<WatermarkRow> {
        self.seen_calls.lock().unwrap().push((channel_id, last_seen_at));
        Ok(WatermarkRow {
            user_id: None,
            last_seen_at,
        })
    }
}
