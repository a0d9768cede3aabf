//! Change notifications and scoped subscriptions.
//!
//! Writers publish a [`ChangeEvent`] per insert/update/delete on a table.
//! Readers subscribe per table and receive a [`ChangeStream`]. Listener tasks
//! are owned by a [`Subscription`], which aborts the task when dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Table holding deal cards.
pub const CARDS_TABLE: &str = "projects";

/// Table holding per-user preferences.
pub const PREFERENCES_TABLE: &str = "user_preferences";

/// Kind of change applied to a table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
    /// The subscriber missed events and should re-read everything.
    Resync,
}

/// One change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub op: ChangeOp,
    pub record_id: Option<String>,
}

impl ChangeEvent {
    pub fn new(table: &str, op: ChangeOp, record_id: Option<&str>) -> Self {
        Self {
            table: table.to_string(),
            op,
            record_id: record_id.map(str::to_string),
        }
    }
}

/// Subscription capability for table changes.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self, table: &str) -> ChangeStream;
}

/// Stream of change events for one table.
pub struct ChangeStream {
    table: String,
    rx: broadcast::Receiver<ChangeEvent>,
}

impl ChangeStream {
    pub fn new(table: &str, rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self {
            table: table.to_string(),
            rx,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Next event for this table, or `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.table == self.table => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(table = %self.table, skipped, "Change stream lagged, requesting resync");
                    return Some(ChangeEvent::new(&self.table, ChangeOp::Resync, None));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// In-process change feed backed by a tokio broadcast channel.
#[derive(Clone)]
pub struct BroadcastChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl BroadcastChangeFeed {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { tx }
    }

    /// Publish a change to every subscriber of its table.
    pub fn publish(&self, event: ChangeEvent) {
        debug!(table = %event.table, op = ?event.op, "Publishing change event");
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed for BroadcastChangeFeed {
    fn subscribe(&self, table: &str) -> ChangeStream {
        ChangeStream::new(table, self.tx.subscribe())
    }
}

/// Owns a listener task. Dropping the subscription stops the task, so no
/// handler runs after its owner is gone.
#[derive(Debug)]
pub struct Subscription {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn new(name: &'static str, handle: JoinHandle<()>) -> Self {
        Self { name, handle }
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop listening now.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
        debug!(subscription = self.name, "Subscription cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stream_filters_by_table() {
        let feed = BroadcastChangeFeed::new();
        let mut stream = feed.subscribe(PREFERENCES_TABLE);

        feed.publish(ChangeEvent::new(CARDS_TABLE, ChangeOp::Update, Some("c1")));
        feed.publish(ChangeEvent::new(PREFERENCES_TABLE, ChangeOp::Insert, Some("u1")));

        let event = stream.next().await.unwrap();
        assert_eq!(event.table, PREFERENCES_TABLE);
        assert_eq!(event.record_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_stream_ends_when_feed_dropped() {
        let feed = BroadcastChangeFeed::new();
        let mut stream = feed.subscribe(CARDS_TABLE);
        drop(feed);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_subscription_aborts_task() {
        let (alive, mut closed) = tokio::sync::mpsc::channel::<()>(1);
        let handle = tokio::spawn(async move {
            let _alive = alive;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let sub = Subscription::new("test", handle);
        assert!(sub.is_active());
        sub.unsubscribe();

        // The sender is dropped only when the task is torn down.
        let ended = tokio::time::timeout(Duration::from_secs(1), closed.recv())
            .await
            .unwrap();
        assert!(ended.is_none());
    }
}
