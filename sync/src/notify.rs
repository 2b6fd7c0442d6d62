//! Notice fan-out to UI subscribers.
//!
//! Each subscriber owns an unbounded channel. The hub implements the
//! engine's [`Notifier`], so the store can publish without knowing who is
//! listening.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use weft_engine::{Notice, Notifier, TracingNotifier};

/// Sender half handed out per subscriber.
pub type NoticeSender = mpsc::UnboundedSender<Notice>;

/// Receiver half returned by [`NoticeHub::subscribe`].
pub type NoticeReceiver = mpsc::UnboundedReceiver<Notice>;

/// Tracks notice subscribers.
///
/// Thread-safe and can be shared via `Arc`.
#[derive(Debug, Default)]
pub struct NoticeHub {
    subscribers: DashMap<String, NoticeSender>,
}

impl NoticeHub {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a subscriber.
    ///
    /// Returns the subscriber id and the channel notices arrive on.
    pub fn subscribe(&self) -> (String, NoticeReceiver) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id.clone(), tx);
        tracing::debug!(subscriber_id = %id, "notice subscriber registered");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: &str) {
        if self.subscribers.remove(id).is_some() {
            tracing::debug!(subscriber_id = %id, "notice subscriber removed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Send a notice to every live subscriber and drop closed ones.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, notice: &Notice) -> usize {
        let mut sent = 0;
        self.subscribers.retain(|id, sender| {
            let open = sender.send(notice.clone()).is_ok();
            if open {
                sent += 1;
            } else {
                tracing::debug!(subscriber_id = %id, "dropping closed notice subscriber");
            }
            open
        });
        sent
    }
}

impl Notifier for NoticeHub {
    fn notify(&self, notice: Notice) {
        TracingNotifier.notify(notice.clone());
        self.publish(&notice);
    }
}
