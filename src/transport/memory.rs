//! In-process relay: every frame a member sends is rebroadcast to all other
//! members of the same room.
//!
//! Used by tests and local demos. Faults can be injected to exercise the
//! session's retry and requeue paths.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, trace};

use super::{Channel, ChannelEvent, Connector, EventSink};
use crate::{error::Error, ids::RoomId};

#[derive(Default)]
struct RelayState {
    rooms: HashMap<RoomId, HashMap<u64, EventSink>>,
    next_member: u64,
    stall_dials: bool,
    refused_dials: u32,
    sends_before_failure: u32,
    failing_sends: u32,
}

#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_room(&self, room: &RoomId) -> bool {
        self.lock().rooms.contains_key(room)
    }

    pub fn member_count(&self, room: &RoomId) -> usize {
        self.lock().rooms.get(room).map_or(0, HashMap::len)
    }

    /// Accept dials but never report them open.
    pub fn stall_dials(&self, stall: bool) {
        self.lock().stall_dials = stall;
    }

    /// Fail the next `count` dials with a connection error.
    pub fn refuse_dials(&self, count: u32) {
        self.lock().refused_dials = count;
    }

    /// Fail the next `count` sends from any member.
    pub fn fail_sends(&self, count: u32) {
        self.fail_sends_after(0, count);
    }

    /// Let `skip` sends through, then fail the following `count`.
    pub fn fail_sends_after(&self, skip: u32, count: u32) {
        let mut state = self.lock();
        state.sends_before_failure = skip;
        state.failing_sends = count;
    }

    /// Drop a room as if the network went away; every member sees a close.
    pub fn sever(&self, room: &RoomId) {
        let members = self.lock().rooms.remove(room);
        for sink in members.into_iter().flat_map(HashMap::into_values) {
            sink.emit(ChannelEvent::Close);
        }
        debug!(%room, "relay severed room");
    }

    fn join(&self, room: &RoomId, sink: EventSink) -> MemoryChannel {
        let mut state = self.lock();
        state.next_member += 1;
        let member = state.next_member;
        state.rooms.entry(room.clone()).or_default().insert(member, sink);
        MemoryChannel {
            relay: self.clone(),
            room: room.clone(),
            member,
            closed: false,
        }
    }
}

impl Connector for MemoryRelay {
    type Channel = MemoryChannel;

    async fn host(&self, room: &RoomId, sink: EventSink) -> Result<MemoryChannel, Error> {
        debug!(%room, "hosting room on relay");
        Ok(self.join(room, sink))
    }

    async fn dial(&self, room: &RoomId, sink: EventSink) -> Result<MemoryChannel, Error> {
        let stall = {
            let mut state = self.lock();
            if state.refused_dials > 0 {
                state.refused_dials -= 1;
                return Err(Error::ConnectionError(format!("relay refused dial to {room}")));
            }
            if !state.rooms.contains_key(room) {
                return Err(Error::RoomNotFound(room.to_string()));
            }
            state.stall_dials
        };
        let channel = self.join(room, sink.clone());
        if !stall {
            sink.emit(ChannelEvent::Open);
        }
        Ok(channel)
    }
}

pub struct MemoryChannel {
    relay: MemoryRelay,
    room: RoomId,
    member: u64,
    closed: bool,
}

impl Channel for MemoryChannel {
    fn send(&self, frame: &str) -> Result<(), Error> {
        let mut state = self.relay.lock();
        if state.failing_sends > 0 {
            if state.sends_before_failure > 0 {
                state.sends_before_failure -= 1;
            } else {
                state.failing_sends -= 1;
                return Err(Error::ChannelSendFailed("injected relay failure".to_string()));
            }
        }
        let members = state.rooms.get(&self.room).ok_or(Error::ChannelClosed)?;
        if !members.contains_key(&self.member) {
            return Err(Error::ChannelClosed);
        }
        for (_, sink) in members.iter().filter(|(id, _)| **id != self.member) {
            sink.emit(ChannelEvent::Message(frame.to_string()));
        }
        trace!(room = %self.room, member = self.member, "relayed frame");
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.relay.lock();
        if let Some(members) = state.rooms.get_mut(&self.room) {
            members.remove(&self.member);
            if members.is_empty() {
                state.rooms.remove(&self.room);
            }
        }
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LinkEvent;
    use tokio::sync::mpsc;

    fn sink(generation: u64) -> (EventSink, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::new(tx, generation), rx)
    }

    #[tokio::test]
    async fn frames_reach_everyone_but_the_sender() {
        let relay = MemoryRelay::new();
        let room = RoomId::parse("abc123xyz").unwrap();
        let (host_sink, mut host_rx) = sink(1);
        let host = relay.host(&room, host_sink).await.unwrap();
        let (guest_sink, mut guest_rx) = sink(1);
        let guest = relay.dial(&room, guest_sink).await.unwrap();
        assert_eq!(guest_rx.recv().await.unwrap().kind, ChannelEvent::Open);

        guest.send("hello").unwrap();
        host.send("welcome").unwrap();
        assert_eq!(
            host_rx.recv().await.unwrap().kind,
            ChannelEvent::Message("hello".to_string())
        );
        assert_eq!(
            guest_rx.recv().await.unwrap().kind,
            ChannelEvent::Message("welcome".to_string())
        );
        assert!(host_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dial_failures_are_typed() {
        let relay = MemoryRelay::new();
        let room = RoomId::parse("abc123xyz").unwrap();
        let (s, _rx) = sink(1);
        assert_eq!(
            relay.dial(&room, s).await.err(),
            Some(Error::RoomNotFound("abc123xyz".to_string()))
        );

        let (s, _host_rx) = sink(1);
        let _host = relay.host(&room, s).await.unwrap();
        relay.refuse_dials(1);
        let (s, _rx) = sink(2);
        assert!(matches!(relay.dial(&room, s).await, Err(Error::ConnectionError(_))));
        let (s, _rx) = sink(3);
        assert!(relay.dial(&room, s).await.is_ok());
    }

    #[tokio::test]
    async fn closing_last_member_removes_room() {
        let relay = MemoryRelay::new();
        let room = RoomId::parse("abc123xyz").unwrap();
        let (s, _rx) = sink(1);
        let mut host = relay.host(&room, s).await.unwrap();
        assert_eq!(relay.member_count(&room), 1);
        host.close();
        host.close();
        assert!(!relay.has_room(&room));
        assert_eq!(host.send("late"), Err(Error::ChannelClosed));
    }

    #[tokio::test]
    async fn severing_notifies_members() {
        let relay = MemoryRelay::new();
        let room = RoomId::parse("abc123xyz").unwrap();
        let (s, mut rx) = sink(4);
        let _host = relay.host(&room, s).await.unwrap();
        relay.sever(&room);
        assert_eq!(
            rx.recv().await.unwrap(),
            LinkEvent {
                generation: 4,
                kind: ChannelEvent::Close
            }
        );
    }
}
