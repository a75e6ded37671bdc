//! Per-chapter streaming of partial draft text.
//!
//! Each chapter gets an append-only feed: consumers subscribing mid-stream
//! receive the accumulated buffer so far plus every subsequent update.
//! Dropping a receiver never affects the producer; a slow consumer that
//! lags past the channel capacity skips to the live edge.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

const FEED_CAPACITY: usize = 256;

/// One update on a chapter feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamUpdate {
    /// A new chunk of draft text, already appended to the buffer.
    Chunk { text: String },
    /// The drafting attempt restarted; the buffer was cleared.
    Restarted,
    /// The chapter committed; no more chunks will follow.
    Closed,
}

/// A mid-stream subscription: the buffer as of subscription time plus a
/// receiver for everything after.
#[derive(Debug)]
pub struct ChapterSubscription {
    pub snapshot: String,
    pub updates: broadcast::Receiver<StreamUpdate>,
}

#[derive(Debug)]
struct Feed {
    buffer: String,
    tx: broadcast::Sender<StreamUpdate>,
}

impl Feed {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            buffer: String::new(),
            tx,
        }
    }
}

/// Registry of per-chapter draft feeds.
#[derive(Debug, Default)]
pub struct StreamHub {
    feeds: Mutex<HashMap<String, Feed>>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn feeds(&self) -> MutexGuard<'_, HashMap<String, Feed>> {
        self.feeds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to a chapter's feed, creating it if absent.
    pub fn subscribe(&self, chapter_id: &str) -> ChapterSubscription {
        let mut feeds = self.feeds();
        let feed = feeds.entry(chapter_id.to_string()).or_insert_with(Feed::new);
        ChapterSubscription {
            snapshot: feed.buffer.clone(),
            updates: feed.tx.subscribe(),
        }
    }

    /// Append a chunk to the buffer and fan it out to subscribers.
    pub fn publish(&self, chapter_id: &str, chunk: &str) {
        let mut feeds = self.feeds();
        let feed = feeds.entry(chapter_id.to_string()).or_insert_with(Feed::new);
        feed.buffer.push_str(chunk);
        feed.tx
            .send(StreamUpdate::Chunk {
                text: chunk.to_string(),
            })
            .ok();
    }

    /// Clear the buffer for a fresh drafting attempt.
    ///
    /// Subscribers only see `Restarted` if a previous attempt had produced
    /// text; the first attempt starts silently.
    pub fn restart(&self, chapter_id: &str) {
        let mut feeds = self.feeds();
        let feed = feeds.entry(chapter_id.to_string()).or_insert_with(Feed::new);
        if !feed.buffer.is_empty() {
            feed.buffer.clear();
            feed.tx.send(StreamUpdate::Restarted).ok();
        }
    }

    /// Mark a chapter's feed finished. The buffer stays readable.
    pub fn close(&self, chapter_id: &str) {
        if let Some(feed) = self.feeds().get(chapter_id) {
            feed.tx.send(StreamUpdate::Closed).ok();
        }
    }

    /// Current accumulated buffer for a chapter, if it has a feed.
    pub fn buffer(&self, chapter_id: &str) -> Option<String> {
        self.feeds().get(chapter_id).map(|f| f.buffer.clone())
    }
}
