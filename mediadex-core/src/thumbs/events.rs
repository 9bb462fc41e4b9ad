use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::error::Result;
use crate::paths::VirtualPath;

/// Fixed pub/sub channel completion events travel on.
pub const THUMBS_CHANNEL: &str = "mediadex:thumbs";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionScope {
    File,
    Directory,
}

/// "A derivative for `target` is now available", or for directory scope,
/// "the batch for `target` finished". Delivery may duplicate or drop.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "WirePayload", into = "WirePayload")]
pub struct ThumbCompletionEvent {
    pub scope: CompletionScope,
    pub target: VirtualPath,
}

/// `{"filePath": ..}` or `{"dirPath": ..}` on the wire.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_path: Option<VirtualPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dir_path: Option<VirtualPath>,
}

impl TryFrom<WirePayload> for ThumbCompletionEvent {
    type Error = String;

    fn try_from(wire: WirePayload) -> std::result::Result<Self, Self::Error> {
        match (wire.file_path, wire.dir_path) {
            (Some(path), _) => Ok(Self::file(path)),
            (None, Some(path)) => Ok(Self::directory(path)),
            (None, None) => Err("payload carries neither filePath nor dirPath".to_string()),
        }
    }
}

impl From<ThumbCompletionEvent> for WirePayload {
    fn from(event: ThumbCompletionEvent) -> Self {
        match event.scope {
            CompletionScope::File => Self {
                file_path: Some(event.target),
                dir_path: None,
            },
            CompletionScope::Directory => Self {
                file_path: None,
                dir_path: Some(event.target),
            },
        }
    }
}

impl ThumbCompletionEvent {
    pub fn file(target: VirtualPath) -> Self {
        Self {
            scope: CompletionScope::File,
            target,
        }
    }

    pub fn directory(target: VirtualPath) -> Self {
        Self {
            scope: CompletionScope::Directory,
            target,
        }
    }

    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_payload(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

impl fmt::Display for ThumbCompletionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            CompletionScope::File => write!(f, "file {}", self.target),
            CompletionScope::Directory => write!(f, "dir {}", self.target),
        }
    }
}

#[async_trait]
pub trait ThumbEventPublisher: Send + Sync {
    async fn publish(&self, event: ThumbCompletionEvent) -> Result<()>;
}

pub trait ThumbEventStream: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ThumbCompletionEvent>;
}

/// Both halves behind one trait object.
pub trait ThumbEventBus: ThumbEventPublisher + ThumbEventStream {}

impl<T: ThumbEventPublisher + ThumbEventStream> ThumbEventBus for T {}

/// Fans completion events out to subscribers in this process.
pub struct InProcThumbEventBus {
    sender: broadcast::Sender<ThumbCompletionEvent>,
    capacity: usize,
}

impl fmt::Debug for InProcThumbEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcThumbEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for InProcThumbEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl InProcThumbEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, capacity }
    }

    pub fn sender(&self) -> broadcast::Sender<ThumbCompletionEvent> {
        self.sender.clone()
    }
}

#[async_trait]
impl ThumbEventPublisher for InProcThumbEventBus {
    async fn publish(&self, event: ThumbCompletionEvent) -> Result<()> {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
        Ok(())
    }
}

impl ThumbEventStream for InProcThumbEventBus {
    fn subscribe(&self) -> broadcast::Receiver<ThumbCompletionEvent> {
        self.sender.subscribe()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum SubscriptionFilter {
    All,
    Directory(VirtualPath),
    File(VirtualPath),
}

/// A receiver narrowed to what one caller is waiting for.
#[derive(Debug)]
pub struct ThumbSubscription {
    receiver: broadcast::Receiver<ThumbCompletionEvent>,
    filter: SubscriptionFilter,
}

impl ThumbSubscription {
    pub fn all(receiver: broadcast::Receiver<ThumbCompletionEvent>) -> Self {
        Self {
            receiver,
            filter: SubscriptionFilter::All,
        }
    }

    /// File events for direct children of `dir`, plus the catch-all for `dir`.
    pub fn for_directory(
        receiver: broadcast::Receiver<ThumbCompletionEvent>,
        dir: VirtualPath,
    ) -> Self {
        Self {
            receiver,
            filter: SubscriptionFilter::Directory(dir),
        }
    }

    pub fn for_file(
        receiver: broadcast::Receiver<ThumbCompletionEvent>,
        path: VirtualPath,
    ) -> Self {
        Self {
            receiver,
            filter: SubscriptionFilter::File(path),
        }
    }

    pub fn matches(&self, event: &ThumbCompletionEvent) -> bool {
        match (&self.filter, event.scope) {
            (SubscriptionFilter::All, _) => true,
            (SubscriptionFilter::Directory(dir), CompletionScope::Directory) => {
                &event.target == dir
            }
            (SubscriptionFilter::Directory(dir), CompletionScope::File) => {
                event.target.parent().as_ref() == Some(dir)
            }
            (SubscriptionFilter::File(path), CompletionScope::File) => &event.target == path,
            (SubscriptionFilter::File(_), CompletionScope::Directory) => false,
        }
    }

    /// Next matching event, or `None` once the bus is gone. Events lost to
    /// lag are skipped.
    pub async fn recv(&mut self) -> Option<ThumbCompletionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "thumbnail subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(feature = "database")]
pub use redis_bus::RedisThumbEventBus;

#[cfg(feature = "database")]
mod redis_bus {
    use super::*;
    use futures::StreamExt;
    use redis::aio::ConnectionManager;
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;
    use tracing::{info, warn};

    /// Publishes on [`THUMBS_CHANNEL`] and relays everything arriving on it,
    /// including this process's own messages, into a local bus.
    pub struct RedisThumbEventBus {
        conn: ConnectionManager,
        channel: String,
        local: InProcThumbEventBus,
        relay: JoinHandle<()>,
    }

    impl fmt::Debug for RedisThumbEventBus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("RedisThumbEventBus")
                .field("channel", &self.channel)
                .field("local", &self.local)
                .field("relay_finished", &self.relay.is_finished())
                .finish()
        }
    }

    impl Drop for RedisThumbEventBus {
        fn drop(&mut self) {
            self.relay.abort();
        }
    }

    impl RedisThumbEventBus {
        pub async fn connect(
            client: &redis::Client,
            conn: ConnectionManager,
            shutdown: CancellationToken,
        ) -> Result<Self> {
            Self::connect_on(client, conn, THUMBS_CHANNEL, shutdown).await
        }

        pub async fn connect_on(
            client: &redis::Client,
            conn: ConnectionManager,
            channel: &str,
            shutdown: CancellationToken,
        ) -> Result<Self> {
            let mut pubsub = client.get_async_pubsub().await?;
            pubsub.subscribe(channel).await?;
            info!(channel, "subscribed to thumbnail completion channel");

            let local = InProcThumbEventBus::default();
            let sender = local.sender();
            let relay = tokio::spawn(async move {
                let mut messages = pubsub.into_on_message();
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        message = messages.next() => {
                            let Some(message) = message else {
                                warn!("thumbnail channel closed, relay stopping");
                                break;
                            };
                            let payload: String = match message.get_payload() {
                                Ok(payload) => payload,
                                Err(err) => {
                                    warn!("unreadable thumbnail event payload: {err}");
                                    continue;
                                }
                            };
                            match ThumbCompletionEvent::from_payload(&payload) {
                                Ok(event) => {
                                    let _ = sender.send(event);
                                }
                                Err(err) => warn!(%payload, "malformed thumbnail event: {err}"),
                            }
                        }
                    }
                }
            });

            Ok(Self {
                conn,
                channel: channel.to_string(),
                local,
                relay,
            })
        }
    }

    #[async_trait]
    impl ThumbEventPublisher for RedisThumbEventBus {
        async fn publish(&self, event: ThumbCompletionEvent) -> Result<()> {
            let payload = event.to_payload()?;
            let mut conn = self.conn.clone();
            let _: i64 = redis::cmd("PUBLISH")
                .arg(&self.channel)
                .arg(payload)
                .query_async(&mut conn)
                .await?;
            Ok(())
        }
    }

    impl ThumbEventStream for RedisThumbEventBus {
        fn subscribe(&self) -> broadcast::Receiver<ThumbCompletionEvent> {
            self.local.subscribe()
        }
    }
}
