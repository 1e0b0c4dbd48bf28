//! Lifecycle of the one link this client keeps to its room.
//!
//! A [`PeerSession`] hosts or joins a room through a [`Connector`], retries
//! joins, keeps a heartbeat going while open and schedules a reconnection
//! when the link drops. Outgoing messages wait in an [`OutboundQueue`]
//! until the channel is open.

mod queue;

use std::{collections::VecDeque, fmt::Display, future::Future, pin::Pin, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, watch},
    time::{Instant, Interval, MissedTickBehavior, interval_at, sleep, sleep_until, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    config::SessionConfig,
    error::Error,
    ids::RoomId,
    message::GameMessage,
    transport::{Channel, ChannelEvent, Connector, EventSink, LinkEvent},
};

pub use queue::OutboundQueue;

const JOIN_FAILED_REASON: &str = "Unable to connect. Please check if the room is still active.";

type LinkFuture<T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Guest,
}

/// Human-readable connection phase for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Initializing,
    Connecting,
    Retrying { attempt: u32, max: u32 },
    Connected,
    Failed(String),
    Disconnected,
}

impl Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Initializing => write!(f, "Initializing connection..."),
            ConnectionStatus::Connecting => write!(f, "Connecting to peer network..."),
            ConnectionStatus::Retrying { attempt, max } => {
                write!(f, "Retrying connection {attempt}/{max}")
            }
            ConnectionStatus::Connected => write!(f, "Connected!"),
            ConnectionStatus::Failed(reason) => write!(f, "Connection failed: {reason}"),
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// What woke the session up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// An inbound text frame.
    Message(String),
    /// The open channel was lost; a reconnection is scheduled.
    Disconnected(String),
    /// Time to send a heartbeat.
    HeartbeatDue,
    /// The link is open again after a loss. Nothing from before the loss
    /// is replayed, so presence has to be announced again.
    Reconnected,
    /// Every reconnection attempt failed; the session stays down.
    ReconnectFailed(Error),
}

/// Where a reconnection currently stands.
enum RejoinStep<T> {
    /// Waiting out the reconnect delay or a retry pause.
    Wait(Instant),
    /// Hosting or dialing, bounded by the attempt deadline.
    Dial { link: LinkFuture<T>, deadline: Instant },
    /// Dialed; waiting for the channel to report open.
    AwaitOpen(Instant),
}

/// A reconnection in progress. It only advances while
/// [`PeerSession::next_event`] is polled, so callers stay responsive.
struct Rejoin<T> {
    attempt: u32,
    step: RejoinStep<T>,
}

enum RejoinWake<T> {
    Start,
    Dialed(Result<T, Error>),
    TimedOut,
}

pub struct PeerSession<C: Connector> {
    connector: Arc<C>,
    config: SessionConfig,
    local_id: RoomId,
    remote_id: Option<RoomId>,
    role: Option<Role>,
    channel_state: ChannelState,
    retry_count: u32,
    last_heartbeat_sent_at: Option<Instant>,
    channel: Option<C::Channel>,
    sink: Option<EventSink>,
    generation: u64,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    queue: OutboundQueue,
    /// Frames that arrived while a join was still waiting for its open event.
    early_frames: VecDeque<String>,
    heartbeat: Option<Interval>,
    rejoin: Option<Rejoin<C::Channel>>,
    status: watch::Sender<ConnectionStatus>,
}

impl<C: Connector> Drop for PeerSession<C> {
    fn drop(&mut self) {
        self.teardown_link();
    }
}

impl<C: Connector> PeerSession<C> {
    pub fn new(connector: C, config: SessionConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ConnectionStatus::Initializing);
        Self {
            connector: Arc::new(connector),
            queue: OutboundQueue::new(config.queue_capacity),
            config,
            local_id: RoomId::generate(),
            remote_id: None,
            role: None,
            channel_state: ChannelState::Idle,
            retry_count: 0,
            last_heartbeat_sent_at: None,
            channel: None,
            sink: None,
            generation: 0,
            events_tx,
            events_rx,
            early_frames: VecDeque::new(),
            heartbeat: None,
            rejoin: None,
            status,
        }
    }

    /// Use a known id instead of a random one, e.g. to rehost a room.
    pub fn with_local_id(mut self, id: RoomId) -> Self {
        self.local_id = id;
        self
    }

    /// Host a new room (no id) or join an existing one. Returns the room id.
    ///
    /// Any previous link is torn down first. Messages sent before the first
    /// connect are kept and go out once the channel opens.
    pub async fn connect(&mut self, room: Option<&str>) -> Result<RoomId, Error> {
        let target = room.map(RoomId::parse).transpose()?;
        if self.channel_state != ChannelState::Idle {
            self.close();
        }
        match target {
            None => {
                let room = self.local_id.clone();
                self.host_room(room).await
            }
            Some(room) => self.join(room).await,
        }
    }

    async fn host_room(&mut self, room: RoomId) -> Result<RoomId, Error> {
        self.role = Some(Role::Host);
        self.remote_id = None;
        self.channel_state = ChannelState::Connecting;
        self.set_status(ConnectionStatus::Connecting);

        let sink = self.attach();
        match self.connector.host(&room, sink).await {
            Ok(channel) => {
                self.channel = Some(channel);
                self.on_open();
                info!(%room, "hosting room");
                Ok(room)
            }
            Err(e) => {
                self.teardown_link();
                self.channel_state = ChannelState::Failed;
                self.set_status(ConnectionStatus::Failed(e.to_string()));
                Err(Error::ConnectionFailed {
                    room: room.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn join(&mut self, room: RoomId) -> Result<RoomId, Error> {
        self.role = Some(Role::Guest);
        self.remote_id = Some(room.clone());
        self.channel_state = ChannelState::Connecting;

        let max = self.config.max_attempts.max(1);
        for attempt in 1..=max {
            self.retry_count = attempt - 1;
            self.set_status(match attempt {
                1 => ConnectionStatus::Connecting,
                _ => ConnectionStatus::Retrying { attempt, max },
            });
            self.teardown_link();
            let sink = self.attach();

            match timeout(self.config.attempt_timeout, self.dial_once(&room, sink)).await {
                Ok(Ok(())) => {
                    self.on_open();
                    info!(%room, attempt, "joined room");
                    return Ok(room);
                }
                Ok(Err(e)) => {
                    warn!(%room, attempt, "join attempt failed: {e}");
                    if attempt < max {
                        sleep(self.config.retry_backoff).await;
                    }
                }
                Err(_) => warn!(%room, "{}", Error::ConnectionTimeout { attempt }),
            }
        }

        self.teardown_link();
        self.channel_state = ChannelState::Failed;
        self.set_status(ConnectionStatus::Failed(JOIN_FAILED_REASON.to_string()));
        Err(Error::ConnectionFailed {
            room: room.to_string(),
            reason: JOIN_FAILED_REASON.to_string(),
        })
    }

    /// One dial, resolved by the first open, error or close of this link.
    async fn dial_once(&mut self, room: &RoomId, sink: EventSink) -> Result<(), Error> {
        let channel = self.connector.dial(room, sink).await?;
        self.channel = Some(channel);
        loop {
            let Some(event) = self.events_rx.recv().await else {
                return Err(Error::ChannelClosed);
            };
            if event.generation != self.generation {
                continue;
            }
            match event.kind {
                ChannelEvent::Open => return Ok(()),
                ChannelEvent::Message(frame) => self.early_frames.push_back(frame),
                ChannelEvent::Error(e) => return Err(Error::ConnectionError(e)),
                ChannelEvent::Close => {
                    return Err(Error::ConnectionError("closed during setup".to_string()));
                }
            }
        }
    }

    fn on_open(&mut self) {
        self.channel_state = ChannelState::Open;
        self.retry_count = 0;
        self.rejoin = None;
        self.set_status(ConnectionStatus::Connected);
        self.flush();

        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);
    }

    fn on_lost(&mut self, reason: String) -> SessionEvent {
        warn!(room = ?self.room(), "connection lost: {reason}");
        self.heartbeat = None;
        self.teardown_link();
        self.channel_state = ChannelState::Closed;
        self.rejoin = Some(Rejoin {
            attempt: 0,
            step: RejoinStep::Wait(Instant::now() + self.config.reconnect_delay),
        });
        self.set_status(ConnectionStatus::Disconnected);
        SessionEvent::Disconnected(reason)
    }

    /// Begin the next reconnection attempt. The first one starts a fresh
    /// session: whatever was queued while the link was down is dropped.
    fn start_attempt(&mut self) {
        let (Some(role), Some(room)) = (self.role, self.room().cloned()) else {
            self.rejoin = None;
            return;
        };
        let attempt = self.rejoin.as_ref().map_or(0, |r| r.attempt) + 1;
        let max = self.config.max_attempts.max(1);
        if attempt == 1 {
            info!(%room, ?role, "reconnecting");
            self.queue.clear();
            self.early_frames.clear();
            self.last_heartbeat_sent_at = None;
        }
        self.retry_count = attempt - 1;
        self.channel_state = ChannelState::Connecting;
        self.set_status(match attempt {
            1 => ConnectionStatus::Connecting,
            _ => ConnectionStatus::Retrying { attempt, max },
        });

        self.teardown_link();
        let sink = self.attach();
        let connector = self.connector.clone();
        let link: LinkFuture<C::Channel> = Box::pin(async move {
            match role {
                Role::Host => connector.host(&room, sink).await,
                Role::Guest => connector.dial(&room, sink).await,
            }
        });
        self.rejoin = Some(Rejoin {
            attempt,
            step: RejoinStep::Dial {
                link,
                deadline: Instant::now() + self.config.attempt_timeout,
            },
        });
    }

    fn on_rejoin(&mut self, wake: RejoinWake<C::Channel>) -> Option<SessionEvent> {
        match wake {
            RejoinWake::Start => {
                self.start_attempt();
                None
            }
            RejoinWake::Dialed(Ok(channel)) => {
                self.channel = Some(channel);
                if self.role == Some(Role::Host) {
                    return Some(self.rejoined());
                }
                if let Some(rejoin) = self.rejoin.as_mut()
                    && let RejoinStep::Dial { deadline, .. } = rejoin.step
                {
                    rejoin.step = RejoinStep::AwaitOpen(deadline);
                }
                None
            }
            RejoinWake::Dialed(Err(e)) => self.attempt_failed(e.to_string(), self.config.retry_backoff),
            RejoinWake::TimedOut => {
                let attempt = self.rejoin.as_ref().map_or(0, |r| r.attempt);
                self.attempt_failed(Error::ConnectionTimeout { attempt }.to_string(), Duration::ZERO)
            }
        }
    }

    fn attempt_failed(&mut self, reason: String, pause: Duration) -> Option<SessionEvent> {
        let attempt = self.rejoin.as_ref()?.attempt;
        warn!(room = ?self.room(), attempt, "reconnect attempt failed: {reason}");
        self.teardown_link();
        if attempt >= self.config.max_attempts.max(1) {
            self.rejoin = None;
            self.channel_state = ChannelState::Failed;
            self.set_status(ConnectionStatus::Failed(JOIN_FAILED_REASON.to_string()));
            let room = self.room().map(ToString::to_string).unwrap_or_default();
            return Some(SessionEvent::ReconnectFailed(Error::ConnectionFailed {
                room,
                reason: JOIN_FAILED_REASON.to_string(),
            }));
        }
        if let Some(rejoin) = self.rejoin.as_mut() {
            rejoin.step = RejoinStep::Wait(Instant::now() + pause);
        }
        None
    }

    fn rejoined(&mut self) -> SessionEvent {
        self.on_open();
        info!(room = ?self.room(), "reconnected");
        SessionEvent::Reconnected
    }

    /// Transmit now if open, otherwise queue. Never blocks.
    pub fn send(&mut self, message: GameMessage) {
        self.queue.push_back(message);
        if self.channel_state == ChannelState::Open {
            self.flush();
        }
    }

    /// Send queued messages in order until one fails.
    pub fn flush(&mut self) {
        let Some(channel) = self.channel.as_ref() else {
            return;
        };
        let (sent, failure) = self.queue.drain_with(|message| match message.encode() {
            Ok(frame) => channel.send(&frame),
            Err(e) => {
                warn!(kind = message.tag(), "dropping unencodable message: {e}");
                Ok(())
            }
        });
        if let Some(e) = failure {
            warn!(sent, kept = self.queue.len(), "{e}");
        }
    }

    /// Tear everything down. Safe to call repeatedly or before connecting.
    pub fn close(&mut self) {
        let was_used = self.channel_state != ChannelState::Idle;
        let was_open = self.channel_state == ChannelState::Open;
        self.teardown_link();
        self.heartbeat = None;
        self.rejoin = None;
        self.queue.clear();
        self.early_frames.clear();
        self.remote_id = None;
        self.role = None;
        self.retry_count = 0;
        self.last_heartbeat_sent_at = None;
        if was_used {
            self.channel_state = ChannelState::Closed;
        }
        if was_open {
            self.set_status(ConnectionStatus::Disconnected);
            debug!("session closed");
        }
    }

    /// Try to rebuild the link now instead of waiting for the scheduled
    /// attempt. Returns false if the session is open, already dialing, or was
    /// never connected. Progress is reported by [`PeerSession::next_event`].
    pub fn reconnect(&mut self) -> bool {
        if self.channel_state == ChannelState::Open || self.role.is_none() {
            return false;
        }
        match self.rejoin.as_mut() {
            Some(Rejoin {
                step: RejoinStep::Wait(at),
                ..
            }) => *at = Instant::now(),
            Some(_) => return false,
            None => {
                self.rejoin = Some(Rejoin {
                    attempt: 0,
                    step: RejoinStep::Wait(Instant::now()),
                })
            }
        }
        true
    }

    /// Wait for the next inbound frame, heartbeat tick, link loss or
    /// reconnection outcome. Cancel safe: a reconnection in progress picks
    /// up where it left off on the next call.
    pub async fn next_event(&mut self) -> SessionEvent {
        enum Wake<T> {
            Link(LinkEvent),
            Heartbeat,
            Rejoin(RejoinWake<T>),
        }
        loop {
            if let Some(frame) = self.early_frames.pop_front() {
                return SessionEvent::Message(frame);
            }
            let wake = tokio::select! {
                Some(event) = self.events_rx.recv() => Wake::Link(event),
                _ = tick(&mut self.heartbeat) => Wake::Heartbeat,
                wake = drive(&mut self.rejoin) => Wake::Rejoin(wake),
            };
            match wake {
                Wake::Link(event) if event.generation != self.generation => {
                    debug!(generation = event.generation, "dropping event from stale link");
                }
                Wake::Link(event) => match event.kind {
                    ChannelEvent::Message(frame) => return SessionEvent::Message(frame),
                    ChannelEvent::Open if self.rejoin.is_some() && self.channel.is_some() => {
                        return self.rejoined();
                    }
                    ChannelEvent::Error(reason) if self.channel_state == ChannelState::Open => {
                        return self.on_lost(reason);
                    }
                    ChannelEvent::Close if self.channel_state == ChannelState::Open => {
                        return self.on_lost("channel closed".to_string());
                    }
                    ChannelEvent::Error(reason) if self.rejoin.is_some() => {
                        if let Some(event) = self.attempt_failed(reason, self.config.retry_backoff) {
                            return event;
                        }
                    }
                    ChannelEvent::Close if self.rejoin.is_some() => {
                        let reason = "closed during setup".to_string();
                        if let Some(event) = self.attempt_failed(reason, self.config.retry_backoff) {
                            return event;
                        }
                    }
                    other => debug!(?other, "ignoring link event while not open"),
                },
                Wake::Heartbeat if self.channel_state == ChannelState::Open => {
                    return SessionEvent::HeartbeatDue;
                }
                Wake::Heartbeat => self.heartbeat = None,
                Wake::Rejoin(wake) => {
                    if let Some(event) = self.on_rejoin(wake) {
                        return event;
                    }
                }
            }
        }
    }

    pub fn mark_heartbeat(&mut self) {
        self.last_heartbeat_sent_at = Some(Instant::now());
    }

    fn attach(&mut self) -> EventSink {
        self.generation += 1;
        let sink = EventSink::new(self.events_tx.clone(), self.generation);
        self.sink = Some(sink.clone());
        sink
    }

    /// Detach listeners first so closing cannot feed events back to us.
    fn teardown_link(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.detach();
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        debug!(%status, "connection status");
        self.status.send_replace(status);
    }

    pub fn local_id(&self) -> &RoomId {
        &self.local_id
    }

    pub fn remote_id(&self) -> Option<&RoomId> {
        self.remote_id.as_ref()
    }

    /// The room we are in, whichever side created it.
    pub fn room(&self) -> Option<&RoomId> {
        match self.role? {
            Role::Host => Some(&self.local_id),
            Role::Guest => self.remote_id.as_ref(),
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn state(&self) -> ChannelState {
        self.channel_state
    }

    pub fn is_open(&self) -> bool {
        self.channel_state == ChannelState::Open
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_heartbeat_sent_at(&self) -> Option<Instant> {
        self.last_heartbeat_sent_at
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// True from a link loss until the link is open again or gives up.
    pub fn is_reconnecting(&self) -> bool {
        self.rejoin.is_some()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn drive<T>(rejoin: &mut Option<Rejoin<T>>) -> RejoinWake<T> {
    let Some(rejoin) = rejoin else {
        return std::future::pending().await;
    };
    match &mut rejoin.step {
        RejoinStep::Wait(at) => {
            sleep_until(*at).await;
            RejoinWake::Start
        }
        RejoinStep::Dial { link, deadline } => {
            tokio::select! {
                result = link.as_mut() => RejoinWake::Dialed(result),
                _ = sleep_until(*deadline) => RejoinWake::TimedOut,
            }
        }
        RejoinStep::AwaitOpen(deadline) => {
            sleep_until(*deadline).await;
            RejoinWake::TimedOut
        }
    }
}
