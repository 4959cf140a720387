use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_shared::{ChannelKind, CursorPage, FeedPosition, MessageView, TailPush, WatermarkRow};

use crate::api::FeedSource;
use crate::cache::MessageCache;
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::read_state::SeenWriter;
use crate::receipts::{self, ReceiptView};

/// Backward pagination state of an open channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    LoadingFirstPage,
    CanLoadMore,
    LoadingMore,
    /// No older messages exist. Terminal.
    Exhausted,
}

/// An older-page fetch that has been started but not completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OlderRequest {
    pub cursor: Option<String>,
    pub limit: u32,
}

/// Upsert `incoming` into an ascending `(created_at, id)` window.
///
/// A message keeps its creation time across edits, so its position locates
/// any earlier copy of it.
pub fn merge_into(window: &mut Vec<MessageView>, incoming: impl IntoIterator<Item = MessageView>) {
    for message in incoming {
        match window.binary_search_by_key(&message.position(), MessageView::position) {
            Ok(i) => window[i] = message,
            Err(i) => window.insert(i, message),
        }
    }
}

/// The message feed of one open channel: cached history, the first page,
/// older pages on demand, live snapshots and the debounced read watermark.
pub struct FeedSession<S: FeedSource> {
    source: Arc<S>,
    cache: Arc<MessageCache>,
    channel_id: Uuid,
    kind: ChannelKind,
    state: PageState,
    messages: Vec<MessageView>,
    cursor: Option<String>,
    first_message_creation_time: Option<DateTime<Utc>>,
    watermarks: Vec<WatermarkRow>,
    own_watermark: Option<DateTime<Utc>>,
    last_scroll_offset: Option<f64>,
    seen: SeenWriter<S>,
    tail_size: u32,
    older_page_size: u32,
    near_top_px: f64,
    unread_cap: u32,
}

impl<S: FeedSource> FeedSession<S> {
    /// Open a channel and render whatever the cache already holds.
    pub fn open(
        source: Arc<S>,
        cache: Arc<MessageCache>,
        channel_id: Uuid,
        kind: ChannelKind,
        config: &ClientConfig,
    ) -> ClientResult<Self> {
        let messages = cache.recent(channel_id, config.tail_size)?;
        let first_message_creation_time = cache.first_message_creation_time(channel_id)?;
        tracing::debug!(channel = %channel_id, cached = messages.len(), "feed opened");

        Ok(Self {
            seen: SeenWriter::new(source.clone(), channel_id, config.seen_debounce()),
            source,
            cache,
            channel_id,
            kind,
            state: PageState::LoadingFirstPage,
            messages,
            cursor: None,
            first_message_creation_time,
            watermarks: Vec::new(),
            own_watermark: None,
            last_scroll_offset: None,
            tail_size: config.tail_size,
            older_page_size: config.older_page_size,
            near_top_px: config.near_top_px,
            unread_cap: config.unread_cap,
        })
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    /// Held messages, oldest first.
    pub fn messages(&self) -> &[MessageView] {
        &self.messages
    }

    /// Left edge of held history. Taken from the cache at open, then from the
    /// oldest message held once the first page lands.
    pub fn first_message_creation_time(&self) -> Option<DateTime<Utc>> {
        self.first_message_creation_time
    }

    /// Fetch the newest page. Does nothing once the first page has landed.
    pub async fn load_first_page(&mut self) -> ClientResult<()> {
        if self.state != PageState::LoadingFirstPage {
            return Ok(());
        }
        let page = self
            .source
            .list_messages(self.channel_id, None, self.tail_size)
            .await?;
        self.apply_page(page)?;
        tracing::debug!(channel = %self.channel_id, state = ?self.state, "first page loaded");
        Ok(())
    }

    /// Start an older-page fetch. `None` unless the session is in
    /// `CanLoadMore`, which makes repeated triggers harmless.
    pub fn begin_load_older(&mut self, limit: u32) -> Option<OlderRequest> {
        if self.state != PageState::CanLoadMore {
            return None;
        }
        self.state = PageState::LoadingMore;
        Some(OlderRequest {
            cursor: self.cursor.clone(),
            limit,
        })
    }

    /// Finish a fetch started by `begin_load_older`.
    pub fn complete_load_older(&mut self, result: ClientResult<CursorPage<MessageView>>) -> ClientResult<()> {
        if self.state != PageState::LoadingMore {
            return Ok(());
        }
        let applied = result.and_then(|page| self.apply_page(page));
        if applied.is_err() {
            self.state = PageState::CanLoadMore;
        }
        applied
    }

    /// Fetch one page of older messages. Returns whether a fetch was issued.
    pub async fn load_older(&mut self, limit: u32) -> ClientResult<bool> {
        let Some(request) = self.begin_load_older(limit) else {
            return Ok(false);
        };
        let result = self
            .source
            .list_messages(self.channel_id, request.cursor, request.limit)
            .await;
        self.complete_load_older(result)?;
        tracing::debug!(channel = %self.channel_id, state = ?self.state, held = self.messages.len(), "older page loaded");
        Ok(true)
    }

    /// Report the scroll offset from the top. Crossing below the near-top
    /// threshold from above loads one older page.
    pub async fn scroll(&mut self, offset: f64) -> ClientResult<bool> {
        let was_near = self.last_scroll_offset.is_some_and(|prev| prev < self.near_top_px);
        self.last_scroll_offset = Some(offset);
        if offset < self.near_top_px && !was_near {
            return self.load_older(self.older_page_size).await;
        }
        Ok(false)
    }

    fn apply_page(&mut self, page: CursorPage<MessageView>) -> ClientResult<()> {
        let exhausted = page.is_done || page.page.is_empty();
        let first_page = self.state == PageState::LoadingFirstPage;
        let page_oldest = page.page.iter().map(MessageView::position).min();
        self.store(page.page)?;
        if first_page {
            if let Some(oldest) = page_oldest {
                self.drop_older_than(oldest);
            }
        }
        self.cursor = page.continue_cursor;
        self.state = if exhausted {
            PageState::Exhausted
        } else {
            PageState::CanLoadMore
        };
        Ok(())
    }

    /// Cached rows older than the first page may not be contiguous with it.
    /// Backward paging refills them from the page's cursor.
    fn drop_older_than(&mut self, oldest: FeedPosition) {
        let keep_from = self.messages.partition_point(|m| m.position() < oldest);
        if keep_from == 0 {
            return;
        }
        self.messages.drain(..keep_from);
        self.first_message_creation_time = self.messages.first().map(|m| m.created_at);
        tracing::debug!(channel = %self.channel_id, dropped = keep_from, "cached history detached from first page");
    }

    /// Merge a live tail snapshot. Snapshots of other channels are ignored.
    pub fn apply_snapshot(&mut self, push: TailPush) -> ClientResult<()> {
        if push.channel_id != self.channel_id {
            return Ok(());
        }
        self.store(push.messages)
    }

    fn store(&mut self, messages: Vec<MessageView>) -> ClientResult<()> {
        self.cache.upsert(&messages)?;
        if let Some(oldest) = messages.iter().map(|m| m.created_at).min() {
            self.first_message_creation_time = Some(match self.first_message_creation_time {
                Some(known) => known.min(oldest),
                None => oldest,
            });
        }
        merge_into(&mut self.messages, messages);
        Ok(())
    }

    /// Replace the channel's watermarks with a pushed set. `viewer` picks out
    /// the caller's own row.
    pub fn apply_watermarks(&mut self, rows: Vec<WatermarkRow>, viewer: Uuid) {
        if let Some(own) = rows.iter().find(|row| row.user_id == Some(viewer)) {
            self.own_watermark = self.own_watermark.max(Some(own.last_seen_at));
        }
        self.watermarks = rows;
    }

    /// A message became visible; schedule a watermark write up to it.
    pub fn message_visible(&mut self, created_at: DateTime<Utc>) {
        if self.own_watermark.is_some_and(|seen| created_at <= seen) {
            return;
        }
        self.seen.schedule(created_at);
    }

    pub fn watermarks(&self) -> &[WatermarkRow] {
        &self.watermarks
    }

    pub fn receipt(&self, message: &MessageView) -> ReceiptView {
        receipts::receipt_view(self.kind, message, &self.watermarks)
    }

    pub fn unread(&self) -> usize {
        receipts::unread_count(&self.messages, self.own_watermark)
    }

    pub fn unread_label(&self) -> Option<String> {
        receipts::unread_label(self.unread(), self.unread_cap)
    }

    /// Leave the channel. Drops any pending watermark write.
    pub fn close(self) {
        self.seen.cancel();
        tracing::debug!(channel = %self.channel_id, "feed closed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::Duration;

    use super::*;
    use crate::error::ClientError;
    use crate::test_support::{message_at, FakeSource, PageCall};

    /// `count` messages one second apart, oldest first.
    fn history(channel: Uuid, count: i64) -> Vec<MessageView> {
        let base = DateTime::<Utc>::from_timestamp(1_736_935_200, 0).unwrap();
        (0..count)
            .map(|i| message_at(channel, base + Duration::seconds(i)))
            .collect()
    }

    fn page(messages: &[MessageView], cursor: Option<&str>, is_done: bool) -> ClientResult<CursorPage<MessageView>> {
        let mut newest_first = messages.to_vec();
        newest_first.reverse();
        Ok(CursorPage {
            page: newest_first,
            continue_cursor: cursor.map(str::to_string),
            is_done,
        })
    }

    fn session(source: FakeSource, channel: Uuid) -> (Arc<FakeSource>, FeedSession<FakeSource>) {
        let source = Arc::new(source);
        let cache = Arc::new(MessageCache::in_memory().unwrap());
        let session =
            FeedSession::open(source.clone(), cache, channel, ChannelKind::Group, &ClientConfig::default()).unwrap();
        (source, session)
    }

    fn ids(messages: &[MessageView]) -> Vec<Uuid> {
        messages.iter().map(|m| m.id).collect()
    }

    #[test]
    fn merge_is_idempotent_and_ordered() {
        let channel = Uuid::new_v4();
        let all = history(channel, 6);
        let mut window = Vec::new();

        merge_into(&mut window, all[3..].iter().rev().cloned());
        merge_into(&mut window, all[..4].to_vec());
        let once = window.clone();
        merge_into(&mut window, all[..4].to_vec());

        assert_eq!(window, once);
        assert_eq!(ids(&window), ids(&all));
    }

    #[test]
    fn merge_last_write_wins() {
        let channel = Uuid::new_v4();
        let all = history(channel, 3);
        let mut window = all.clone();

        let mut deleted = all[1].clone();
        deleted.body = parley_shared::TOMBSTONE_BODY.into();
        deleted.deleted_at = Some(Utc::now());
        merge_into(&mut window, [deleted]);

        assert_eq!(window.len(), 3);
        assert!(window[1].is_deleted());
    }

    #[tokio::test]
    async fn paging_to_the_end_yields_every_message_once() {
        let channel = Uuid::new_v4();
        let all = history(channel, 8);
        let source = FakeSource::with_pages(vec![
            page(&all[5..], Some("c1"), false),
            page(&all[2..5], Some("c2"), false),
            page(&all[..2], None, true),
        ]);
        let (source, mut feed) = session(source, channel);

        feed.load_first_page().await.unwrap();
        assert_eq!(feed.state(), PageState::CanLoadMore);
        assert!(feed.load_older(3).await.unwrap());
        assert_eq!(feed.state(), PageState::CanLoadMore);
        assert!(feed.load_older(3).await.unwrap());
        assert_eq!(feed.state(), PageState::Exhausted);
        assert!(!feed.load_older(3).await.unwrap());

        assert_eq!(ids(feed.messages()), ids(&all));
        assert_eq!(feed.first_message_creation_time(), Some(all[0].created_at));
        assert_eq!(
            source.page_calls(),
            vec![
                PageCall { channel_id: channel, cursor: None, limit: 50 },
                PageCall { channel_id: channel, cursor: Some("c1".into()), limit: 3 },
                PageCall { channel_id: channel, cursor: Some("c2".into()), limit: 3 },
            ]
        );
    }

    #[tokio::test]
    async fn empty_older_page_exhausts() {
        let channel = Uuid::new_v4();
        let all = history(channel, 2);
        let source = FakeSource::with_pages(vec![page(&all, Some("c1"), false), page(&[], Some("c2"), false)]);
        let (_, mut feed) = session(source, channel);

        feed.load_first_page().await.unwrap();
        feed.load_older(100).await.unwrap();
        assert_eq!(feed.state(), PageState::Exhausted);
    }

    #[tokio::test]
    async fn short_first_page_goes_straight_to_exhausted() {
        let channel = Uuid::new_v4();
        let all = history(channel, 2);
        let (source, mut feed) = session(FakeSource::with_pages(vec![page(&all, None, true)]), channel);

        assert!(!feed.load_older(100).await.unwrap());
        feed.load_first_page().await.unwrap();
        assert_eq!(feed.state(), PageState::Exhausted);
        feed.load_first_page().await.unwrap();
        assert_eq!(source.page_calls().len(), 1);
    }

    #[tokio::test]
    async fn older_fetch_cannot_be_started_twice() {
        let channel = Uuid::new_v4();
        let all = history(channel, 3);
        let (_, mut feed) = session(FakeSource::with_pages(vec![page(&all, Some("c1"), false)]), channel);
        feed.load_first_page().await.unwrap();

        let request = feed.begin_load_older(100);
        assert_eq!(request, Some(OlderRequest { cursor: Some("c1".into()), limit: 100 }));
        assert_eq!(feed.state(), PageState::LoadingMore);
        assert_eq!(feed.begin_load_older(100), None);

        feed.complete_load_older(Ok(CursorPage::done(Vec::new()))).unwrap();
        assert_eq!(feed.state(), PageState::Exhausted);
    }

    #[tokio::test]
    async fn failed_older_fetch_can_be_retried() {
        let channel = Uuid::new_v4();
        let all = history(channel, 3);
        let (_, mut feed) = session(FakeSource::with_pages(vec![page(&all, Some("c1"), false)]), channel);
        feed.load_first_page().await.unwrap();

        feed.begin_load_older(100);
        let err = feed
            .complete_load_older(Err(ClientError::api("E3002", "not a member")))
            .unwrap_err();
        assert!(err.is_authorization());
        assert_eq!(feed.state(), PageState::CanLoadMore);
    }

    #[tokio::test]
    async fn scroll_triggers_on_the_crossing_only() {
        let channel = Uuid::new_v4();
        let all = history(channel, 6);
        let source = FakeSource::with_pages(vec![
            page(&all[3..], Some("c1"), false),
            page(&all[1..3], Some("c2"), false),
            page(&all[..1], None, true),
        ]);
        let (source, mut feed) = session(source, channel);
        feed.load_first_page().await.unwrap();

        assert!(!feed.scroll(400.0).await.unwrap());
        assert!(feed.scroll(20.0).await.unwrap());
        assert!(!feed.scroll(10.0).await.unwrap());
        assert!(!feed.scroll(0.0).await.unwrap());
        assert!(!feed.scroll(120.0).await.unwrap());
        assert!(feed.scroll(30.0).await.unwrap());

        let limits: Vec<_> = source.page_calls().iter().map(|c| c.limit).collect();
        assert_eq!(limits, vec![50, 100, 100]);
        assert_eq!(feed.state(), PageState::Exhausted);
    }

    #[tokio::test]
    async fn cache_renders_before_the_network() {
        let channel = Uuid::new_v4();
        let all = history(channel, 4);
        let cache = Arc::new(MessageCache::in_memory().unwrap());
        cache.upsert(&all[1..]).unwrap();

        let source = Arc::new(FakeSource::with_pages(vec![page(&all[2..], Some("c1"), false)]));
        let mut feed =
            FeedSession::open(source, cache.clone(), channel, ChannelKind::Group, &ClientConfig::default()).unwrap();
        assert_eq!(ids(feed.messages()), ids(&all[1..]));
        assert_eq!(feed.first_message_creation_time(), Some(all[1].created_at));

        feed.load_first_page().await.unwrap();
        assert_eq!(ids(feed.messages()), ids(&all[2..]));
        assert_eq!(cache.count(channel).unwrap(), 3);
    }

    #[tokio::test]
    async fn stale_cache_is_not_stitched_to_a_newer_first_page() {
        let channel = Uuid::new_v4();
        let all = history(channel, 12);
        let cache = Arc::new(MessageCache::in_memory().unwrap());
        cache.upsert(&all[..4]).unwrap();

        let source = Arc::new(FakeSource::with_pages(vec![
            page(&all[8..], Some("c1"), false),
            page(&all[4..8], Some("c2"), false),
            page(&all[..4], None, true),
        ]));
        let mut feed =
            FeedSession::open(source.clone(), cache, channel, ChannelKind::Group, &ClientConfig::default()).unwrap();
        assert_eq!(ids(feed.messages()), ids(&all[..4]));

        feed.load_first_page().await.unwrap();
        assert_eq!(ids(feed.messages()), ids(&all[8..]));
        assert_eq!(feed.first_message_creation_time(), Some(all[8].created_at));
        assert_eq!(feed.unread(), 4);

        assert!(feed.load_older(4).await.unwrap());
        assert_eq!(ids(feed.messages()), ids(&all[4..]));
        assert!(feed.load_older(4).await.unwrap());
        assert_eq!(ids(feed.messages()), ids(&all));
        assert_eq!(feed.state(), PageState::Exhausted);

        let cursors: Vec<_> = source.page_calls().into_iter().map(|c| c.cursor).collect();
        assert_eq!(cursors, vec![None, Some("c1".into()), Some("c2".into())]);
    }

    #[tokio::test]
    async fn snapshots_merge_and_ignore_other_channels() {
        let channel = Uuid::new_v4();
        let all = history(channel, 3);
        let (_, mut feed) = session(FakeSource::with_pages(vec![page(&all[..2], None, true)]), channel);
        feed.load_first_page().await.unwrap();

        feed.apply_snapshot(TailPush {
            channel_id: Uuid::new_v4(),
            messages: history(Uuid::new_v4(), 5),
        })
        .unwrap();
        assert_eq!(feed.messages().len(), 2);

        let mut edited = all[1].clone();
        edited.body = "edited".into();
        edited.edited_at = Some(Utc::now());
        feed.apply_snapshot(TailPush {
            channel_id: channel,
            messages: vec![edited, all[2].clone()],
        })
        .unwrap();
        assert_eq!(ids(feed.messages()), ids(&all));
        assert_eq!(feed.messages()[1].body, "edited");
    }

    #[tokio::test(start_paused = true)]
    async fn visibility_writes_the_watermark_once() {
        let channel = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let all = history(channel, 4);
        let (source, mut feed) = session(FakeSource::with_pages(vec![page(&all, None, true)]), channel);
        feed.load_first_page().await.unwrap();
        feed.apply_watermarks(
            vec![WatermarkRow {
                user_id: Some(viewer),
                last_seen_at: all[1].created_at,
            }],
            viewer,
        );
        assert_eq!(feed.unread(), 2);
        assert_eq!(feed.unread_label().as_deref(), Some("2"));

        feed.message_visible(all[0].created_at);
        feed.message_visible(all[3].created_at);
        feed.message_visible(all[2].created_at);
        tokio::time::sleep(StdDuration::from_millis(350)).await;

        assert_eq!(source.seen_calls(), vec![(channel, all[3].created_at)]);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_cancels_the_pending_write() {
        let channel = Uuid::new_v4();
        let (source, mut feed) = session(FakeSource::default(), channel);
        feed.message_visible(Utc::now());
        feed.close();
        tokio::time::sleep(StdDuration::from_millis(350)).await;

        assert!(source.seen_calls().is_empty());
    }
}
