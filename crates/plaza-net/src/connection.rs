//! The connection state machine.
//!
//! [`ConnectionManager`] owns the control channel and the media device and
//! advances from cold start to joined as host responses arrive:
//!
//! ```text
//! Disconnected --connect--> ControlOpen --opened--> NegotiatingMedia
//!   --both transports connected--> TransportsReady --joined--> Connected
//! ```
//!
//! It never blocks and never retries. Every network observation reaches it
//! through [`ConnectionManager::handle_event`] on the simulation thread;
//! observations from a superseded epoch are ignored. Any channel or setup
//! failure tears the connection down to `Disconnected` and is reported as a
//! [`ConnectionEvent::Failed`]; reconnecting is the caller's job.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::pending::{Correlation, PendingKind, PendingRequests};
use crate::protocol::{
    ClientMessage, ClientRequest, HostMessage, LOCATION_CHANNEL_LABEL, MediaKind, PresenceField,
    ProtocolError, ResponseBody, RouterCapabilities, RtpParameters, SctpStreamParameters,
    TransportDirection, TransportOptions, decode_host_message, encode_client_message,
    validate_chat, validate_presence_field,
};
use crate::state::{
    ConnectionState, ConnectionStateWatch, ConnectionStatus, DisconnectReason, SetupStep,
};
use crate::transport::{ChannelError, ControlChannel, DeviceError, MediaDevice, NetEvent, NetEventKind};
use crate::{Epoch, PlayerId, RequestId};

/// Caller-level control messages accepted by [`ConnectionManager::send`].
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Join a world. At most one join per connection.
    Join {
        /// World to join.
        world_uri: String,
    },
    /// Publish one field of the local presence metadata.
    PlayerData(PresenceField),
    /// Broadcast a chat line.
    Chat {
        /// Message text.
        text: String,
    },
}

/// Lifecycle notifications, drained by the simulation each tick.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The state machine moved to a new state.
    StateChanged(ConnectionState),
    /// The join succeeded and the connection is usable.
    Joined {
        /// Id the host assigned to this client.
        player_id: PlayerId,
    },
    /// A remote participant joined.
    PeerJoined {
        /// The participant.
        player_id: PlayerId,
        /// Metadata the host already knows.
        initial_data: Vec<PresenceField>,
    },
    /// A remote participant left.
    PeerLeft {
        /// The participant.
        player_id: PlayerId,
    },
    /// One metadata field of a participant changed.
    PresenceUpdated {
        /// The participant.
        player_id: PlayerId,
        /// New value.
        field: PresenceField,
    },
    /// Chat line received.
    Chat {
        /// Sender.
        player_id: PlayerId,
        /// Message text.
        text: String,
    },
    /// A `produce` request succeeded.
    ProducerCreated {
        /// Media kind.
        kind: MediaKind,
        /// Host-side producer id.
        producer_id: String,
    },
    /// A `produce` request failed. The connection stays up.
    ProduceFailed {
        /// Media kind.
        kind: MediaKind,
        /// Host message.
        reason: String,
    },
    /// The connection was lost or its setup failed. Retry is up to the caller.
    Failed {
        /// Cause.
        reason: DisconnectReason,
    },
    /// The connection was closed on purpose.
    Disconnected {
        /// Cause.
        reason: DisconnectReason,
    },
}

/// Errors returned directly to callers of the manager.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// `connect` with an empty world URI.
    #[error("world uri is empty")]
    EmptyWorldUri,
    /// `connect` with an empty host address.
    #[error("host address is empty")]
    EmptyHostAddress,
    /// A second join on one connection.
    #[error("join already requested for this connection")]
    JoinAlreadyRequested,
    /// A join for a world other than the one being connected to.
    #[error("join for {requested} does not match connection target {target}")]
    JoinTargetMismatch {
        /// World URI in the join.
        requested: String,
        /// World URI passed to `connect`.
        target: String,
    },
    /// The operation needs a joined connection.
    #[error("not connected")]
    NotConnected,
    /// `retry` before any `connect`.
    #[error("no previous connection target")]
    NoTarget,
    /// The message failed validation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The control channel refused to open.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The media device failed.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// World and host of the current or most recent connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// World URI sent in the join request.
    pub world_uri: String,
    /// Control channel address.
    pub host_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Leg {
    #[default]
    Idle,
    Creating,
    Connecting,
    Connected,
}

#[derive(Debug, Default)]
struct Legs {
    send: Leg,
    recv: Leg,
}

impl Legs {
    fn set(&mut self, direction: TransportDirection, leg: Leg) {
        match direction {
            TransportDirection::Send => self.send = leg,
            TransportDirection::Recv => self.recv = leg,
        }
    }

    fn both_connected(&self) -> bool {
        self.send == Leg::Connected && self.recv == Leg::Connected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinProgress {
    NotRequested,
    InFlight,
    Accepted(PlayerId),
}

/// Client side of one host connection. See the module docs.
pub struct ConnectionManager {
    channel: Box<dyn ControlChannel>,
    device: Box<dyn MediaDevice>,
    watch: Arc<ConnectionStateWatch>,
    state: ConnectionState,
    epoch: Epoch,
    target: Option<ConnectTarget>,
    outbound: VecDeque<ClientMessage>,
    pending: PendingRequests,
    legs: Legs,
    data_producer: Option<String>,
    join: JoinProgress,
    local_player: Option<PlayerId>,
    last_disconnect: Option<DisconnectReason>,
    events: Vec<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a disconnected manager over the given collaborators.
    pub fn new(channel: Box<dyn ControlChannel>, device: Box<dyn MediaDevice>) -> Self {
        Self {
            channel,
            device,
            watch: Arc::new(ConnectionStateWatch::new()),
            state: ConnectionState::Disconnected,
            epoch: Epoch::default(),
            target: None,
            outbound: VecDeque::new(),
            pending: PendingRequests::new(),
            legs: Legs::default(),
            data_producer: None,
            join: JoinProgress::NotRequested,
            local_player: None,
            last_disconnect: None,
            events: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Caller API
    // -----------------------------------------------------------------------

    /// Start connecting to `host_address` and join `world_uri`.
    ///
    /// A no-op when already connecting to or connected with the same target.
    /// A different target tears the current connection down first; nothing is
    /// carried over.
    pub fn connect(&mut self, world_uri: &str, host_address: &str) -> Result<(), ConnectionError> {
        if world_uri.is_empty() {
            return Err(ConnectionError::EmptyWorldUri);
        }
        if host_address.is_empty() {
            return Err(ConnectionError::EmptyHostAddress);
        }

        let target = ConnectTarget {
            world_uri: world_uri.to_owned(),
            host_address: host_address.to_owned(),
        };
        if self.state != ConnectionState::Disconnected {
            if self.target.as_ref() == Some(&target) {
                debug!(host = host_address, "connect to current target ignored");
                return Ok(());
            }
            info!(host = host_address, world = world_uri, "connection target changed, restarting");
            self.teardown(DisconnectReason::TargetChanged);
        }

        self.epoch = self.epoch.next();
        self.retarget_queued_join(world_uri);
        self.target = Some(target);
        self.set_state(ConnectionState::ControlOpen);
        info!(host = host_address, world = world_uri, epoch = %self.epoch, "opening control channel");

        if let Err(e) = self.channel.open(host_address, self.epoch) {
            warn!(host = host_address, error = %e, "control channel failed to open");
            self.teardown(DisconnectReason::ChannelFailed(e.to_string()));
            return Err(e.into());
        }
        Ok(())
    }

    /// Connect again to the most recent target.
    pub fn retry(&mut self) -> Result<(), ConnectionError> {
        let target = self.target.clone().ok_or(ConnectionError::NoTarget)?;
        self.connect(&target.world_uri, &target.host_address)
    }

    /// Send a control message.
    ///
    /// Before the channel is open the message is queued and replayed in
    /// order once it is. The queue is dropped on teardown.
    pub fn send(&mut self, message: ControlMessage) -> Result<(), ConnectionError> {
        let message = match message {
            ControlMessage::Join { world_uri } => {
                if world_uri.is_empty() {
                    return Err(ConnectionError::EmptyWorldUri);
                }
                if self.join != JoinProgress::NotRequested {
                    return Err(ConnectionError::JoinAlreadyRequested);
                }
                if let Some(target) = self.active_target() {
                    if target.world_uri != world_uri {
                        return Err(ConnectionError::JoinTargetMismatch {
                            requested: world_uri,
                            target: target.world_uri.clone(),
                        });
                    }
                }
                self.join = JoinProgress::InFlight;
                self.request_message(ClientRequest::Join { world_uri })
            }
            ControlMessage::PlayerData(field) => {
                validate_presence_field(&field)?;
                ClientMessage::PlayerData(field)
            }
            ControlMessage::Chat { text } => {
                validate_chat(&text)?;
                ClientMessage::Chat { text }
            }
        };

        if self.state.channel_open() {
            self.write(&message);
        } else {
            trace!(state = ?self.state, "queueing control message until channel opens");
            self.outbound.push_back(message);
        }
        Ok(())
    }

    /// Start producing media on the send transport. The producer id arrives
    /// later as [`ConnectionEvent::ProducerCreated`].
    pub fn produce(
        &mut self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<RequestId, ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected);
        }
        let message = self.request_message(ClientRequest::Produce {
            kind,
            rtp_parameters,
        });
        let ClientMessage::Request { request_id, .. } = message else {
            return Err(ConnectionError::NotConnected);
        };
        self.write(&message);
        Ok(request_id)
    }

    /// Send one datagram on the location data channel.
    pub fn send_location(&mut self, record: &[u8]) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Connected || self.data_producer.is_none() {
            return Err(ConnectionError::NotConnected);
        }
        self.device.send_data(record)?;
        Ok(())
    }

    /// Close the connection and forget the target.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Disconnected {
            info!(epoch = %self.epoch, "closing connection");
        }
        self.teardown(DisconnectReason::Closed);
        self.target = None;
    }

    /// Process one network observation. Stale epochs are ignored.
    pub fn handle_event(&mut self, event: NetEvent) {
        if !self.accepts_epoch(event.epoch) {
            trace!(event_epoch = %event.epoch, epoch = %self.epoch, "ignoring stale network event");
            return;
        }
        match event.kind {
            NetEventKind::ControlOpened => self.on_control_opened(),
            NetEventKind::ControlFrame(bytes) => match decode_host_message(&bytes) {
                Ok(message) => self.on_host_message(message),
                Err(e) => warn!(error = %e, len = bytes.len(), "dropping malformed control message"),
            },
            NetEventKind::ControlClosed { reason } => {
                self.teardown(DisconnectReason::ChannelClosed(reason));
            }
            NetEventKind::Datagram(_) => {
                trace!("datagram delivered to the connection manager, ignoring");
            }
        }
    }

    /// Take every event emitted since the last call.
    pub fn drain_events(&mut self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut self.events)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Whether events tagged with `epoch` belong to the live connection.
    pub fn accepts_epoch(&self, epoch: Epoch) -> bool {
        epoch == self.epoch && self.state != ConnectionState::Disconnected
    }

    /// Current state machine stage.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Presentation state derived from the stage and the last disconnect.
    pub fn status(&self) -> ConnectionStatus {
        let recovering = self
            .last_disconnect
            .as_ref()
            .is_some_and(DisconnectReason::is_failure);
        match self.state {
            ConnectionState::Connected => ConnectionStatus::Online,
            ConnectionState::Disconnected if recovering => ConnectionStatus::Reconnecting,
            ConnectionState::Disconnected => ConnectionStatus::Offline,
            _ if recovering => ConnectionStatus::Reconnecting,
            _ => ConnectionStatus::Connecting,
        }
    }

    /// Shared handle to the state watch.
    pub fn watch(&self) -> Arc<ConnectionStateWatch> {
        Arc::clone(&self.watch)
    }

    /// Current connection epoch.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Id assigned by the host, while connected.
    pub fn local_player(&self) -> Option<PlayerId> {
        self.local_player
    }

    /// Current or most recent target.
    pub fn target(&self) -> Option<&ConnectTarget> {
        self.target.as_ref()
    }

    /// Why the last connection ended.
    pub fn last_disconnect(&self) -> Option<&DisconnectReason> {
        self.last_disconnect.as_ref()
    }

    /// Messages waiting for the channel to open.
    pub fn queued_len(&self) -> usize {
        self.outbound.len()
    }

    /// Requests awaiting a response.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug!(from = ?self.state, to = ?next, epoch = %self.epoch, "connection state change");
        self.state = next;
        self.watch.set(next);
        self.events.push(ConnectionEvent::StateChanged(next));
    }

    fn teardown(&mut self, reason: DisconnectReason) {
        let was_active = self.state != ConnectionState::Disconnected;
        if was_active {
            self.channel.close();
            self.device.close();
        }

        // Anything still in flight for the old epoch is now stale.
        self.epoch = self.epoch.next();
        self.outbound.clear();
        self.pending.clear();
        self.legs = Legs::default();
        self.data_producer = None;
        self.join = JoinProgress::NotRequested;
        self.local_player = None;
        self.set_state(ConnectionState::Disconnected);

        if was_active {
            if reason.is_failure() {
                warn!(%reason, "connection lost");
                self.events.push(ConnectionEvent::Failed {
                    reason: reason.clone(),
                });
            } else {
                info!(%reason, "connection closed");
                self.events.push(ConnectionEvent::Disconnected {
                    reason: reason.clone(),
                });
            }
        }
        self.last_disconnect = Some(reason);
    }

    /// Point a join queued while disconnected at the world being connected to.
    fn retarget_queued_join(&mut self, target_uri: &str) {
        for message in &mut self.outbound {
            let ClientMessage::Request {
                request: ClientRequest::Join { world_uri },
                ..
            } = message
            else {
                continue;
            };
            if world_uri.as_str() != target_uri {
                debug!(queued = %world_uri, target = target_uri, "retargeting queued join");
                *world_uri = target_uri.to_owned();
            }
        }
    }

    /// Target of a connection that is up or coming up.
    fn active_target(&self) -> Option<&ConnectTarget> {
        self.target
            .as_ref()
            .filter(|_| self.state != ConnectionState::Disconnected)
    }

    fn fail_setup(&mut self, step: SetupStep, reason: impl ToString) {
        let reason = reason.to_string();
        warn!(?step, %reason, "transport setup failed");
        self.teardown(DisconnectReason::SetupFailed { step, reason });
    }

    fn request_message(&mut self, request: ClientRequest) -> ClientMessage {
        let request_id = self.pending.register(PendingKind::for_request(&request));
        ClientMessage::Request {
            request_id,
            request,
        }
    }

    /// Issue a state-machine request. Dropped if the channel closed meanwhile.
    fn request(&mut self, request: ClientRequest) {
        if !self.state.channel_open() {
            debug!(?request, "channel not open, dropping internal request");
            return;
        }
        let message = self.request_message(request);
        self.write(&message);
    }

    /// Encode and write one message. Returns `false` if the write tore the
    /// connection down.
    fn write(&mut self, message: &ClientMessage) -> bool {
        let bytes = match encode_client_message(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "dropping unencodable control message");
                return true;
            }
        };
        if let Err(e) = self.channel.send(bytes) {
            self.teardown(DisconnectReason::ChannelFailed(e.to_string()));
            return false;
        }
        true
    }

    fn on_control_opened(&mut self) {
        if self.state != ConnectionState::ControlOpen {
            warn!(state = ?self.state, "unexpected channel-open event");
            return;
        }
        let queued: Vec<ClientMessage> = self.outbound.drain(..).collect();
        debug!(count = queued.len(), "control channel open, flushing queue");
        for message in &queued {
            if !self.write(message) {
                return;
            }
        }
        self.set_state(ConnectionState::NegotiatingMedia);
        self.request(ClientRequest::GetCapabilities);
    }

    fn on_host_message(&mut self, message: HostMessage) {
        match message {
            HostMessage::Response { request_id, body } => {
                match self.pending.correlate(request_id, &body) {
                    Correlation::Matched(kind) => self.on_response(kind, body),
                    Correlation::Unknown => {
                        warn!(?request_id, "response to unknown request, dropping");
                    }
                    Correlation::Mismatched(kind) => {
                        warn!(?request_id, ?kind, "response does not match request, dropping");
                    }
                }
            }
            HostMessage::PlayerJoined {
                player_id,
                initial_data,
            } => self.events.push(ConnectionEvent::PeerJoined {
                player_id,
                initial_data,
            }),
            HostMessage::PlayerLeft { player_id } => {
                self.events.push(ConnectionEvent::PeerLeft { player_id });
            }
            HostMessage::PlayerData { player_id, field } => {
                self.events
                    .push(ConnectionEvent::PresenceUpdated { player_id, field });
            }
            HostMessage::ChatMessage { player_id, text } => {
                self.events.push(ConnectionEvent::Chat { player_id, text });
            }
            HostMessage::CreateConsumer(options) => match self.device.consume(&options) {
                Ok(()) => {
                    self.write(&ClientMessage::ConsumerReady {
                        consumer_id: options.consumer_id,
                    });
                }
                Err(e) => warn!(consumer = %options.consumer_id, error = %e, "consumer creation failed"),
            },
            HostMessage::CreateDataConsumer(options) => match self.device.consume_data(&options) {
                Ok(()) => {
                    self.write(&ClientMessage::ConsumerReady {
                        consumer_id: options.data_consumer_id,
                    });
                }
                Err(e) => {
                    warn!(consumer = %options.data_consumer_id, error = %e, "data consumer creation failed");
                }
            },
        }
    }

    fn on_response(&mut self, kind: PendingKind, body: ResponseBody) {
        match (kind, body) {
            (PendingKind::Produce(kind), ResponseBody::Failed { reason }) => {
                warn!(?kind, %reason, "produce rejected");
                self.events
                    .push(ConnectionEvent::ProduceFailed { kind, reason });
            }
            (PendingKind::Join, ResponseBody::Failed { reason }) => {
                warn!(%reason, "join rejected");
                self.teardown(DisconnectReason::JoinRejected(reason));
            }
            (kind, ResponseBody::Failed { reason }) => {
                let step = match kind {
                    PendingKind::CreateTransport(direction) => SetupStep::CreateTransport(direction),
                    PendingKind::ConnectTransport(direction) => {
                        SetupStep::ConnectTransport(direction)
                    }
                    PendingKind::ProduceData(_) => SetupStep::DataProducer,
                    _ => SetupStep::Capabilities,
                };
                self.fail_setup(step, reason);
            }
            (PendingKind::Capabilities, ResponseBody::Capabilities(capabilities)) => {
                self.on_capabilities(capabilities);
            }
            (PendingKind::CreateTransport(direction), ResponseBody::TransportCreated(options)) => {
                self.on_transport_created(direction, options);
            }
            (PendingKind::ConnectTransport(direction), ResponseBody::TransportConnected) => {
                self.on_transport_connected(direction);
            }
            (PendingKind::ProduceData(parameters), ResponseBody::DataProduced { data_producer_id }) => {
                self.on_data_produced(data_producer_id, parameters);
            }
            (PendingKind::Produce(kind), ResponseBody::Produced { producer_id }) => {
                info!(?kind, %producer_id, "producer created");
                self.events
                    .push(ConnectionEvent::ProducerCreated { kind, producer_id });
            }
            (PendingKind::Join, ResponseBody::Joined { player_id }) => self.on_joined(player_id),
            (kind, body) => warn!(?kind, ?body, "unhandled response"),
        }
    }

    fn on_capabilities(&mut self, capabilities: RouterCapabilities) {
        if self.state != ConnectionState::NegotiatingMedia {
            warn!(state = ?self.state, "capabilities outside negotiation, dropping");
            return;
        }
        if let Err(e) = self.device.load(&capabilities, self.epoch) {
            self.fail_setup(SetupStep::LoadDevice, e);
            return;
        }
        debug!(codecs = capabilities.codecs.len(), "device loaded, creating transports");
        for direction in [TransportDirection::Send, TransportDirection::Recv] {
            self.legs.set(direction, Leg::Creating);
            self.request(ClientRequest::CreateTransport { direction });
        }
    }

    fn on_transport_created(&mut self, direction: TransportDirection, options: TransportOptions) {
        match self.device.create_transport(direction, &options) {
            Ok(local) => {
                debug!(?direction, transport = %options.transport_id, "transport created");
                self.legs.set(direction, Leg::Connecting);
                self.request(ClientRequest::ConnectTransport {
                    direction,
                    dtls_parameters: local.dtls_parameters,
                    local_endpoint: local.local_endpoint,
                });
            }
            Err(e) => self.fail_setup(SetupStep::CreateTransport(direction), e),
        }
    }

    fn on_transport_connected(&mut self, direction: TransportDirection) {
        debug!(?direction, "transport connected");
        self.legs.set(direction, Leg::Connected);
        if self.state == ConnectionState::NegotiatingMedia && self.legs.both_connected() {
            self.on_transports_ready();
        }
    }

    fn on_transports_ready(&mut self) {
        self.set_state(ConnectionState::TransportsReady);
        self.request(ClientRequest::ProduceData {
            label: LOCATION_CHANNEL_LABEL.to_owned(),
            sctp_stream_parameters: SctpStreamParameters::unreliable(0),
        });

        match self.join {
            JoinProgress::NotRequested => {
                let Some(world_uri) = self.target.as_ref().map(|t| t.world_uri.clone()) else {
                    return;
                };
                self.join = JoinProgress::InFlight;
                self.request(ClientRequest::Join { world_uri });
            }
            JoinProgress::InFlight => debug!("join already in flight"),
            JoinProgress::Accepted(player_id) => self.enter_connected(player_id),
        }
    }

    fn on_data_produced(&mut self, data_producer_id: String, parameters: SctpStreamParameters) {
        match self.device.open_data_producer(&data_producer_id, &parameters) {
            Ok(()) => {
                debug!(%data_producer_id, "location data producer open");
                self.data_producer = Some(data_producer_id);
            }
            Err(e) => self.fail_setup(SetupStep::DataProducer, e),
        }
    }

    fn on_joined(&mut self, player_id: PlayerId) {
        self.join = JoinProgress::Accepted(player_id);
        if self.state == ConnectionState::TransportsReady {
            self.enter_connected(player_id);
        } else {
            debug!(%player_id, state = ?self.state, "join accepted before transports ready");
        }
    }

    fn enter_connected(&mut self, player_id: PlayerId) {
        self.local_player = Some(player_id);
        self.last_disconnect = None;
        self.set_state(ConnectionState::Connected);
        info!(%player_id, epoch = %self.epoch, "joined world");
        self.events.push(ConnectionEvent::Joined { player_id });
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
