//! The link between peers.
//!
//! A [`Connector`] knows how to host or reach a room and yields a
//! [`Channel`] for outgoing frames. Everything coming back (open, frames,
//! errors, close) is pushed into the [`EventSink`] handed over before the
//! channel exists, so no event can arrive without a listener.

pub mod gossip;
pub mod memory;

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::mpsc;

use crate::{error::Error, ids::RoomId};

pub use gossip::{GossipChannel, GossipConnector};
pub use memory::{MemoryChannel, MemoryRelay};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Error(String),
    Close,
}

/// A channel event tagged with the link it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub generation: u64,
    pub kind: ChannelEvent,
}

/// Where a channel reports its lifecycle.
///
/// Once detached, a sink silently swallows everything.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<LinkEvent>,
    generation: u64,
    attached: Arc<AtomicBool>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<LinkEvent>, generation: u64) -> Self {
        Self {
            tx,
            generation,
            attached: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the sink is detached or the receiver is gone.
    pub fn emit(&self, kind: ChannelEvent) -> bool {
        if !self.is_attached() {
            return false;
        }
        self.tx
            .send(LinkEvent {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }

    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}

/// Outgoing half of an established link.
pub trait Channel: Send + 'static {
    /// Queue one text frame for delivery. Never blocks.
    fn send(&self, frame: &str) -> Result<(), Error>;

    /// Tear the link down. Safe to call more than once.
    fn close(&mut self);
}

pub trait Connector: Send + Sync + 'static {
    type Channel: Channel;

    /// Open `room` for others to join. The returned channel is already open.
    fn host(
        &self,
        room: &RoomId,
        sink: EventSink,
    ) -> impl Future<Output = Result<Self::Channel, Error>> + Send;

    /// Reach an existing room. The channel is usable once the sink sees
    /// [`ChannelEvent::Open`].
    fn dial(
        &self,
        room: &RoomId,
        sink: EventSink,
    ) -> impl Future<Output = Result<Self::Channel, Error>> + Send;
}
