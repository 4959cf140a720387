use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::FeedSource;

#[derive(Default)]
struct WriterState {
    /// Largest timestamp scheduled since the last write.
    pending: Option<DateTime<Utc>>,
    /// Largest timestamp written in this session.
    last_sent: Option<DateTime<Utc>>,
    timer: Option<JoinHandle<()>>,
}

/// Deferred read-watermark write for one channel.
///
/// `schedule` calls within one debounce window collapse into a single
/// `mark_seen` carrying the largest timestamp. Timestamps not newer than the
/// last one written are dropped before they reach the server. `cancel`, or
/// dropping the writer, discards whatever is still pending.
pub struct SeenWriter<S: FeedSource> {
    source: Arc<S>,
    channel_id: Uuid,
    debounce: Duration,
    state: Arc<Mutex<WriterState>>,
}

fn lock(state: &Mutex<WriterState>) -> MutexGuard<'_, WriterState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: FeedSource> SeenWriter<S> {
    pub fn new(source: Arc<S>, channel_id: Uuid, debounce: Duration) -> Self {
        Self {
            source,
            channel_id,
            debounce,
            state: Arc::new(Mutex::new(WriterState::default())),
        }
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    /// Last timestamp handed to the server.
    pub fn last_sent(&self) -> Option<DateTime<Utc>> {
        lock(&self.state).last_sent
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.state).pending.is_some()
    }

    pub fn schedule(&self, at: DateTime<Utc>) {
        let mut state = lock(&self.state);
        if state.last_sent.is_some_and(|sent| at <= sent) {
            return;
        }
        state.pending = state.pending.max(Some(at));
        if state.timer.is_some() {
            return;
        }

        let shared = self.state.clone();
        let source = self.source.clone();
        let channel_id = self.channel_id;
        let debounce = self.debounce;
        // The timer clears its own handle under the same lock, so it cannot
        // race with this insertion.
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let due = {
                let mut state = lock(&shared);
                state.timer = None;
                match state.pending.take() {
                    Some(at) if state.last_sent.map_or(true, |sent| at > sent) => {
                        state.last_sent = Some(at);
                        Some(at)
                    }
                    _ => None,
                }
            };
            let Some(at) = due else {
                return;
            };

            match source.mark_seen(channel_id, at).await {
                Ok(row) => {
                    tracing::debug!(channel = %channel_id, last_seen_at = %row.last_seen_at, "watermark written");
                }
                Err(e) => {
                    tracing::warn!(channel = %channel_id, error = %e, "failed to write watermark");
                    let mut state = lock(&shared);
                    if state.last_sent == Some(at) {
                        state.last_sent = None;
                    }
                }
            }
        }));
    }

    /// Drop any pending write. A write already in flight still completes.
    pub fn cancel(&self) {
        let mut state = lock(&self.state);
        state.pending = None;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }
}

impl<S: FeedSource> Drop for SeenWriter<S> {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::test_support::FakeSource;

    fn writer() -> (Arc<FakeSource>, SeenWriter<FakeSource>, Uuid) {
        let source = Arc::new(FakeSource::default());
        let channel = Uuid::new_v4();
        let writer = SeenWriter::new(source.clone(), channel, Duration::from_millis(300));
        (source, writer, channel)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(350)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_write_of_the_maximum() {
        let (source, writer, channel) = writer();
        let base = Utc::now();

        writer.schedule(base + ChronoDuration::seconds(1));
        writer.schedule(base + ChronoDuration::seconds(3));
        writer.schedule(base + ChronoDuration::seconds(2));
        assert!(source.seen_calls().is_empty());

        settle().await;
        assert_eq!(source.seen_calls(), vec![(channel, base + ChronoDuration::seconds(3))]);
        assert_eq!(writer.last_sent(), Some(base + ChronoDuration::seconds(3)));
        assert!(!writer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timestamps_never_reach_the_server() {
        let (source, writer, _) = writer();
        let base = Utc::now();

        writer.schedule(base);
        settle().await;
        writer.schedule(base - ChronoDuration::seconds(5));
        writer.schedule(base);
        settle().await;

        assert_eq!(source.seen_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn later_bursts_write_again() {
        let (source, writer, _) = writer();
        let base = Utc::now();

        writer.schedule(base);
        settle().await;
        writer.schedule(base + ChronoDuration::seconds(1));
        settle().await;

        let calls: Vec<_> = source.seen_calls().into_iter().map(|(_, at)| at).collect();
        assert_eq!(calls, vec![base, base + ChronoDuration::seconds(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_discards_pending_write() {
        let (source, writer, _) = writer();
        writer.schedule(Utc::now());
        writer.cancel();
        settle().await;

        assert!(source.seen_calls().is_empty());
        assert_eq!(writer.last_sent(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_writer_cancels() {
        let (source, writer, _) = writer();
        writer.schedule(Utc::now());
        drop(writer);
        settle().await;

        assert!(source.seen_calls().is_empty());
    }
}
