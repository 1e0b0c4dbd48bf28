//! Rooms as iroh-gossip topics.
//!
//! The room id names the topic. The host subscribes without bootstrap peers
//! and is open right away; guests subscribe through known endpoints and are
//! open on their first neighbor.

use bytes::Bytes;
use iroh::EndpointId;
use iroh_gossip::api::{Event, GossipReceiver, GossipSender};
use iroh_gossip::proto::TopicId;
use n0_future::StreamExt as _;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, trace, warn};

use super::{Channel, ChannelEvent, Connector, EventSink};
use crate::{error::Error, ids::RoomId, iroh::Iroh};

const TOPIC_PREFIX: &str = "p2p-plaza/room/";

/// Gossip topic carrying the frames of `room`.
pub fn topic_for(room: &RoomId) -> TopicId {
    let mut bytes = [0u8; 32];
    let name = format!("{TOPIC_PREFIX}{room}");
    for (slot, byte) in bytes.iter_mut().zip(name.bytes()) {
        *slot = byte;
    }
    TopicId::from_bytes(bytes)
}

#[derive(Clone, Debug)]
pub struct GossipConnector {
    iroh: Iroh,
    bootstrap: Vec<EndpointId>,
}

impl GossipConnector {
    pub fn new(iroh: Iroh) -> Self {
        Self {
            iroh,
            bootstrap: vec![],
        }
    }

    /// Endpoints a guest contacts to find the room.
    pub fn with_bootstrap(mut self, peers: impl IntoIterator<Item = EndpointId>) -> Self {
        self.bootstrap = peers.into_iter().collect();
        self
    }

    pub fn iroh(&self) -> &Iroh {
        &self.iroh
    }

    async fn open(
        &self,
        room: &RoomId,
        bootstrap: Vec<EndpointId>,
        sink: EventSink,
        open: bool,
    ) -> Result<GossipChannel, Error> {
        let topic = self
            .iroh
            .gossip()
            .subscribe(topic_for(room), bootstrap)
            .await
            .map_err(|e| Error::ConnectionError(e.to_string()))?;
        let (sender, receiver) = topic.split();
        let (tx, rx) = mpsc::unbounded_channel();
        // The writer exits on its own once the channel drops its sender.
        tokio::spawn(write_frames(sender, rx, sink.clone()));
        let reader = tokio::spawn(read_events(receiver, sink, open));
        Ok(GossipChannel {
            tx: Some(tx),
            reader: Some(reader),
        })
    }
}

impl Connector for GossipConnector {
    type Channel = GossipChannel;

    async fn host(&self, room: &RoomId, sink: EventSink) -> Result<GossipChannel, Error> {
        debug!(%room, endpoint = %self.iroh.id(), "hosting gossip room");
        self.open(room, vec![], sink, true).await
    }

    async fn dial(&self, room: &RoomId, sink: EventSink) -> Result<GossipChannel, Error> {
        if self.bootstrap.is_empty() {
            return Err(Error::RoomNotFound(room.to_string()));
        }
        debug!(%room, peers = self.bootstrap.len(), "joining gossip room");
        self.open(room, self.bootstrap.clone(), sink, false).await
    }
}

async fn write_frames(sender: GossipSender, mut rx: mpsc::UnboundedReceiver<Bytes>, sink: EventSink) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = sender.broadcast(frame).await {
            warn!("gossip broadcast failed: {e}");
            sink.emit(ChannelEvent::Error(e.to_string()));
            break;
        }
    }
}

async fn read_events(mut receiver: GossipReceiver, sink: EventSink, mut open: bool) {
    while let Some(event) = receiver.next().await {
        match event {
            Ok(Event::NeighborUp(peer)) => {
                debug!(%peer, "neighbor up");
                if !open {
                    open = true;
                    sink.emit(ChannelEvent::Open);
                }
            }
            Ok(Event::NeighborDown(peer)) => debug!(%peer, "neighbor down"),
            Ok(Event::Received(message)) => match String::from_utf8(message.content.to_vec()) {
                Ok(frame) => {
                    sink.emit(ChannelEvent::Message(frame));
                }
                Err(_) => warn!(from = %message.delivered_from, "dropping non-utf8 frame"),
            },
            Ok(other) => trace!(?other, "gossip event"),
            Err(e) => {
                sink.emit(ChannelEvent::Error(e.to_string()));
                break;
            }
        }
    }
    sink.emit(ChannelEvent::Close);
}

pub struct GossipChannel {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    reader: Option<JoinHandle<()>>,
}

impl Channel for GossipChannel {
    fn send(&self, frame: &str) -> Result<(), Error> {
        let tx = self.tx.as_ref().ok_or(Error::ChannelClosed)?;
        tx.send(Bytes::copy_from_slice(frame.as_bytes()))
            .map_err(|_| Error::ChannelSendFailed("gossip writer stopped".to_string()))
    }

    /// Stops reading at once; frames already queued are still flushed.
    fn close(&mut self) {
        self.tx = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for GossipChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_stable_per_room() {
        let a = RoomId::parse("abc123xyz").unwrap();
        let b = RoomId::parse("abc123xy0").unwrap();
        assert_eq!(topic_for(&a), topic_for(&a));
        assert_ne!(topic_for(&a), topic_for(&b));
        assert!(topic_for(&a).as_bytes().starts_with(TOPIC_PREFIX.as_bytes()));
    }
}
