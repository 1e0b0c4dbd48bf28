use std::ops::ControlFlow;

use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, error, info, warn};

use crate::{
    chat::ChatLine,
    clock::Clock,
    message::{Frame, decode},
    player::PlayerId,
    protocol::{MoveOutcome, ProtocolHandler},
    room::actions::Intent,
    session::{ConnectionStatus, PeerSession, SessionEvent},
    state::{GameStore, StateUpdate},
    transport::Connector,
};

/// Public events the room sends to the game UI
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    StatusChanged(ConnectionStatus),
    PlayerJoined(PlayerId),
    PlayerLeft(PlayerId),
    ChatReceived(ChatLine),
    Error(String),
}

/// Owns everything mutable about a room and runs its event loop.
pub(crate) struct RoomDriver<C: Connector> {
    session: PeerSession<C>,
    store: GameStore,
    protocol: ProtocolHandler,
    clock: Clock,
    intents: mpsc::Receiver<Intent>,
    events: mpsc::Sender<GameEvent>,
}

impl<C: Connector> RoomDriver<C> {
    pub(crate) fn new(
        session: PeerSession<C>,
        store: GameStore,
        protocol: ProtocolHandler,
        clock: Clock,
        intents: mpsc::Receiver<Intent>,
        events: mpsc::Sender<GameEvent>,
    ) -> Self {
        Self {
            session,
            store,
            protocol,
            clock,
            intents,
            events,
        }
    }

    pub(crate) async fn run(mut self) {
        let config = self.protocol.config();
        let mut frames = interval(config.frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut housekeeping = interval(config.housekeeping_interval);
        housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = self.session.next_event() => self.on_session_event(event),
                intent = self.intents.recv() => {
                    let Some(intent) = intent else {
                        // Every handle is gone.
                        self.session.close();
                        break;
                    };
                    if self.on_intent(intent).is_break() {
                        break;
                    }
                }
                _ = frames.tick(), if self.protocol.is_animating() => {
                    let now = self.clock.now();
                    self.protocol.advance(&mut self.store, now);
                }
                _ = housekeeping.tick() => self.on_housekeeping(),
            }
        }
        debug!("room event loop stopped");
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Message(frame) => self.on_frame(&frame),
            SessionEvent::Disconnected(reason) => {
                info!("disconnected: {reason}");
                self.emit(GameEvent::StatusChanged(ConnectionStatus::Disconnected));
            }
            SessionEvent::HeartbeatDue => {
                if let Some(message) = self.protocol.heartbeat(&self.store, self.clock.now()) {
                    self.session.send(message);
                    self.session.mark_heartbeat();
                }
            }
            SessionEvent::Reconnected => {
                self.protocol.reset();
                for message in self.protocol.announce(&self.store, self.clock.now()) {
                    self.session.send(message);
                }
                self.emit(GameEvent::StatusChanged(ConnectionStatus::Connected));
            }
            SessionEvent::ReconnectFailed(e) => {
                error!("reconnect failed: {e}");
                self.emit(GameEvent::StatusChanged(self.session.status()));
                self.emit(GameEvent::Error(e.to_string()));
            }
        }
    }

    fn on_frame(&mut self, frame: &str) {
        match decode(frame) {
            Ok(Frame::Game(message)) => {
                let kind = message.tag();
                let reaction = self.protocol.handle(&mut self.store, message, self.clock.now());
                debug!(kind, replies = reaction.replies.len(), "handled message");
                for reply in reaction.replies {
                    self.session.send(reply);
                }
                for event in reaction.events {
                    self.emit(event);
                }
            }
            Ok(Frame::Signal(signal)) => debug!(?signal, "ignoring signaling frame"),
            Err(e) => warn!("discarding inbound frame: {e}"),
        }
    }

    fn on_intent(&mut self, intent: Intent) -> ControlFlow<()> {
        let now = self.clock.now();
        match intent {
            Intent::Move { x, y, reply } => {
                let outcome = self.protocol.move_local(&mut self.store, x, y, now);
                let _ = reply.send(self.dispatch_move(outcome));
            }
            Intent::Step { dx, dy, reply } => {
                let outcome = self.protocol.step_local(&mut self.store, dx, dy, now);
                let _ = reply.send(self.dispatch_move(outcome));
            }
            Intent::Chat(text) => {
                if let Some(message) = self.protocol.chat_local(&mut self.store, &text, now) {
                    self.session.send(message);
                }
            }
            Intent::Avatar(avatar) => {
                if let Some(message) = self.protocol.set_avatar(&mut self.store, &avatar) {
                    self.session.send(message);
                }
            }
            Intent::Preset(preset) => {
                if let Some(message) = self.protocol.apply_preset(&mut self.store, &preset, now) {
                    self.session.send(message);
                }
            }
            Intent::LoadScene(scene) => self.store.update(StateUpdate::scene(*scene)),
            Intent::Resize { width, height } => self.store.resize(width, height),
            Intent::Leave(reply) => {
                if let Some(message) = self.protocol.leave(&self.store) {
                    self.session.send(message);
                }
                self.session.close();
                self.emit(GameEvent::StatusChanged(ConnectionStatus::Disconnected));
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn dispatch_move(&mut self, outcome: MoveOutcome) -> bool {
        match outcome {
            MoveOutcome::Rejected => false,
            MoveOutcome::Moved(broadcast) => {
                if let Some(message) = broadcast {
                    self.session.send(message);
                }
                true
            }
        }
    }

    fn on_housekeeping(&mut self) {
        let now = self.clock.now();
        for event in self.protocol.housekeeping(&mut self.store, now) {
            self.emit(event);
        }
        if let Some(message) = self.protocol.flush_movement(&self.store, now) {
            self.session.send(message);
        }
    }

    fn emit(&self, event: GameEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!(?event, "event channel full, dropping event"),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
