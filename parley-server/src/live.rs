//! Live query hub.
//!
//! Every query shape a client can subscribe to is keyed by channel and backed
//! by one `watch` channel holding the latest full result. Writers call the
//! `*_changed` hooks after commit; the hub reloads the affected key and
//! replaces the snapshot. Keys nobody listens to are dropped on the next
//! change.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use uuid::Uuid;

use parley_shared::{AppResult, MessageView};

use crate::models::Watermark;
use crate::services::feed;
use crate::store::Store;

pub type TailSnapshot = Arc<Vec<MessageView>>;
pub type WatermarkSnapshot = Arc<Vec<Watermark>>;

struct Topic<V> {
    name: &'static str,
    senders: DashMap<Uuid, Arc<watch::Sender<Arc<V>>>>,
}

impl<V: Send + Sync + 'static> Topic<V> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            senders: DashMap::new(),
        }
    }

    /// The entry stays locked while the first snapshot loads, so a change
    /// published meanwhile waits and then reloads.
    fn subscribe(&self, key: Uuid, load: impl FnOnce() -> AppResult<V>) -> AppResult<watch::Receiver<Arc<V>>> {
        match self.senders.entry(key) {
            Entry::Occupied(entry) => Ok(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (sender, receiver) = watch::channel(Arc::new(load()?));
                entry.insert(Arc::new(sender));
                Ok(receiver)
            }
        }
    }

    fn publish(&self, key: Uuid, load: impl FnOnce() -> AppResult<V>) {
        let idle = match self.senders.get_mut(&key) {
            None => return,
            Some(sender) if sender.receiver_count() == 0 => true,
            Some(sender) => {
                match load() {
                    Ok(value) => {
                        sender.send_replace(Arc::new(value));
                    }
                    Err(e) => {
                        tracing::warn!(topic = self.name, key = %key, error = %e, "failed to reload live snapshot");
                    }
                }
                false
            }
        };

        if idle {
            self.senders.remove_if(&key, |_, sender| sender.receiver_count() == 0);
            tracing::debug!(topic = self.name, key = %key, "dropped idle live topic");
        }
    }

    fn len(&self) -> usize {
        self.senders.len()
    }
}

pub struct LiveHub {
    store: Store,
    tail_size: i64,
    tails: Topic<Vec<MessageView>>,
    watermarks: Topic<Vec<Watermark>>,
}

impl LiveHub {
    pub fn new(store: Store, tail_size: u32) -> Self {
        Self {
            store,
            tail_size: tail_size as i64,
            tails: Topic::new("tail"),
            watermarks: Topic::new("watermarks"),
        }
    }

    /// Newest messages of a channel, oldest first.
    pub fn subscribe_tail(&self, channel_id: Uuid) -> AppResult<watch::Receiver<TailSnapshot>> {
        self.tails.subscribe(channel_id, || self.load_tail(channel_id))
    }

    pub fn subscribe_watermarks(&self, channel_id: Uuid) -> AppResult<watch::Receiver<WatermarkSnapshot>> {
        self.watermarks
            .subscribe(channel_id, || self.load_watermarks(channel_id))
    }

    pub fn messages_changed(&self, channel_id: Uuid) {
        self.tails.publish(channel_id, || self.load_tail(channel_id));
    }

    pub fn watermarks_changed(&self, channel_id: Uuid) {
        self.watermarks
            .publish(channel_id, || self.load_watermarks(channel_id));
    }

    /// Number of live keys, for the health report.
    pub fn active_topics(&self) -> usize {
        self.tails.len() + self.watermarks.len()
    }

    fn load_tail(&self, channel_id: Uuid) -> AppResult<Vec<MessageView>> {
        self.store
            .transaction(|tx| feed::tail(tx, channel_id, self.tail_size))
    }

    fn load_watermarks(&self, channel_id: Uuid) -> AppResult<Vec<Watermark>> {
        self.store.transaction(|tx| tx.watermarks(channel_id))
    }
}
