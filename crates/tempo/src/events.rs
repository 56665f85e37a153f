//! What flows into the owning context and what flows out of it.

use std::collections::BTreeMap;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;
use url::Url;

use crate::downloader::TransferMessage;
use crate::engine::{Command, PlaybackState};
use crate::local::LocalEvent;
use crate::metadata::ProbeResult;
use crate::FailureKind;

/// Everything marshalled into the owning context's inbox.
///
/// Work that can be superseded carries the generation or transfer it belongs
/// to; the owner drops anything that no longer matches.
#[derive(Debug)]
pub enum EngineMessage {
    Transfer(TransferMessage),
    Local { generation: u64, event: LocalEvent },
    /// The sink rendered a buffer scheduled under `generation`.
    BufferConsumed { generation: u64 },
    /// Loudness of channel 0 for one rendered buffer, in dBFS.
    Loudness { generation: u64, db: Option<f32> },
    Probed { generation: u64, result: ProbeResult },
    Command(Command),
}

/// Notifications delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(PlaybackState),
    /// `total_progress` spans the whole file, `task_progress` the current transfer.
    DownloadProgress {
        url: Url,
        total_progress: f32,
        task_progress: f32,
    },
    DownloadFailed {
        url: Url,
        error: String,
    },
    RangeSupport {
        supports_range: bool,
        total_size: i64,
    },
    CurrentTime(f64),
    Duration(f64),
    OffsetChanged(i64),
    SecondsSaved(f64),
    RateChanged(f32),
    GoodForStream(bool),
    Buffering(bool),
    WaitingForDownloader(bool),
    Title(String),
    Artist(String),
    Album(String),
    Artwork(Bytes),
    Failure(FailureKind),
}

/// Stable handle of a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

enum Subscriber {
    Callback(Box<dyn FnMut(&EngineEvent) + Send>),
    Channel(mpsc::UnboundedSender<EngineEvent>),
}

/// Observer registry. Channel subscribers whose receiver is gone are pruned.
#[derive(Default)]
pub struct Observers {
    next_id: u64,
    subscribers: BTreeMap<SubscriberId, Subscriber>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriberId
    where
        F: FnMut(&EngineEvent) + Send + 'static,
    {
        self.insert(Subscriber::Callback(Box::new(callback)))
    }

    pub fn subscribe_channel(&mut self, sender: mpsc::UnboundedSender<EngineEvent>) -> SubscriberId {
        self.insert(Subscriber::Channel(sender))
    }

    fn insert(&mut self, subscriber: Subscriber) -> SubscriberId {
        self.next_id += 1;
        let id = SubscriberId(self.next_id);
        self.subscribers.insert(id, subscriber);
        id
    }

    /// Returns whether `id` was still registered. Safe to call twice.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn emit(&mut self, event: EngineEvent) {
        trace!(?event, "Emitting event");
        self.subscribers.retain(|_, subscriber| match subscriber {
            Subscriber::Callback(callback) => {
                callback(&event);
                true
            }
            Subscriber::Channel(sender) => sender.send(event.clone()).is_ok(),
        });
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
