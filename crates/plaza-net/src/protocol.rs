//! Control-channel message types and serialization.
//!
//! Every control message is serialized with [`postcard`] and prefixed with a
//! protocol version byte. [`encode_client_message`] / [`decode_host_message`]
//! are the client side of the contract; the mirror pair exists for hosts and
//! test doubles. Decoding validates structure (postcard schema) and then
//! semantics (lengths, empty identifiers); anything that fails either check is
//! a [`ProtocolError`] and the caller drops the message.

use serde::{Deserialize, Serialize};

use crate::{PlayerId, RequestId};

/// Current wire-protocol version. Prepended to every serialized message.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum chat message length, in characters.
pub const MAX_CHAT_LENGTH: usize = 500;

/// Maximum length of a presence string field, in characters.
pub const MAX_PRESENCE_FIELD_LENGTH: usize = 256;

/// Label of the unreliable data producer that carries location records.
pub const LOCATION_CHANNEL_LABEL: &str = "location";

// ---------------------------------------------------------------------------
// Top-level enums
// ---------------------------------------------------------------------------

/// Message sent from a client to the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientMessage {
    /// A request the host answers with a [`HostMessage::Response`] echoing
    /// the same id.
    Request {
        /// Correlation id.
        request_id: RequestId,
        /// The request body.
        request: ClientRequest,
    },
    /// Publish one field of the sender's presence metadata.
    PlayerData(PresenceField),
    /// Broadcast a chat line.
    Chat {
        /// Message text.
        text: String,
    },
    /// Acknowledge a host-initiated consumer once it exists locally.
    ConsumerReady {
        /// Id from the originating `CreateConsumer` / `CreateDataConsumer`.
        consumer_id: String,
    },
}

/// Requests correlated by [`RequestId`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ClientRequest {
    /// Ask for the host's router capabilities.
    GetCapabilities,
    /// Create a transport in the given direction.
    CreateTransport {
        /// Producer (send) or consumer (recv).
        direction: TransportDirection,
    },
    /// Complete the handshake of a created transport.
    ConnectTransport {
        /// Which transport.
        direction: TransportDirection,
        /// Local DTLS parameters from the device.
        dtls_parameters: DtlsParameters,
        /// Local socket address, if the device uses one.
        local_endpoint: Option<String>,
    },
    /// Start producing media on the send transport.
    Produce {
        /// Audio or video.
        kind: MediaKind,
        /// Encoding parameters.
        rtp_parameters: RtpParameters,
    },
    /// Open a data producer on the send transport.
    ProduceData {
        /// Channel label.
        label: String,
        /// Stream reliability parameters.
        sctp_stream_parameters: SctpStreamParameters,
    },
    /// Enter a world.
    Join {
        /// World to join.
        world_uri: String,
    },
}

/// Message sent from the host to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum HostMessage {
    /// Answer to a [`ClientMessage::Request`].
    Response {
        /// Echoed correlation id.
        request_id: RequestId,
        /// Result body.
        body: ResponseBody,
    },
    /// A participant entered the world.
    PlayerJoined {
        /// New participant.
        player_id: PlayerId,
        /// Metadata already known for that participant.
        initial_data: Vec<PresenceField>,
    },
    /// A participant left.
    PlayerLeft {
        /// Departed participant.
        player_id: PlayerId,
    },
    /// One metadata field changed.
    PlayerData {
        /// Participant the field belongs to.
        player_id: PlayerId,
        /// New value.
        field: PresenceField,
    },
    /// Chat line from a participant.
    ChatMessage {
        /// Sender.
        player_id: PlayerId,
        /// Message text.
        text: String,
    },
    /// The host created a media consumer for this client.
    CreateConsumer(ConsumerOptions),
    /// The host created a data consumer for this client.
    CreateDataConsumer(DataConsumerOptions),
}

/// Body of a [`HostMessage::Response`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ResponseBody {
    /// Answer to `GetCapabilities`.
    Capabilities(RouterCapabilities),
    /// Answer to `CreateTransport`.
    TransportCreated(TransportOptions),
    /// Answer to `ConnectTransport`.
    TransportConnected,
    /// Answer to `Produce`.
    Produced {
        /// Host-side producer id.
        producer_id: String,
    },
    /// Answer to `ProduceData`.
    DataProduced {
        /// Host-side data producer id.
        data_producer_id: String,
    },
    /// Answer to `Join`.
    Joined {
        /// Id assigned to this client.
        player_id: PlayerId,
    },
    /// The request failed.
    Failed {
        /// Human-readable reason.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

/// One field of a participant's out-of-band metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PresenceField {
    /// Resolved identity handle, e.g. `@alice@example.org`.
    Handle(String),
    /// Free-form nickname.
    Nickname(String),
    /// Avatar model reference.
    AvatarUri(String),
    /// Whether the avatar is falling (not grounded).
    Falling(bool),
}

impl PresenceField {
    /// The field kind, ignoring its value.
    pub fn key(&self) -> PresenceKey {
        match self {
            PresenceField::Handle(_) => PresenceKey::Handle,
            PresenceField::Nickname(_) => PresenceKey::Nickname,
            PresenceField::AvatarUri(_) => PresenceKey::AvatarUri,
            PresenceField::Falling(_) => PresenceKey::Falling,
        }
    }

    fn text(&self) -> Option<&str> {
        match self {
            PresenceField::Handle(s) | PresenceField::Nickname(s) | PresenceField::AvatarUri(s) => {
                Some(s)
            }
            PresenceField::Falling(_) => None,
        }
    }
}

/// Discriminant of a [`PresenceField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceKey {
    /// [`PresenceField::Handle`].
    Handle,
    /// [`PresenceField::Nickname`].
    Nickname,
    /// [`PresenceField::AvatarUri`].
    AvatarUri,
    /// [`PresenceField::Falling`].
    Falling,
}

/// Direction of a transport, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportDirection {
    /// Producer transport (client to host).
    Send,
    /// Consumer transport (host to client).
    Recv,
}

/// Media kind of a producer or consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    /// Audio track.
    Audio,
    /// Video track.
    Video,
}

/// One codec the router can forward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodecCapability {
    /// MIME type, e.g. `audio/opus`.
    pub mime_type: String,
    /// RTP clock rate.
    pub clock_rate: u32,
    /// Channel count for audio codecs.
    pub channels: Option<u8>,
    /// Preferred payload type.
    pub payload_type: Option<u8>,
}

/// Router capability description sent during negotiation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RouterCapabilities {
    /// Supported codecs.
    pub codecs: Vec<CodecCapability>,
    /// Supported RTP header extension URIs.
    pub header_extensions: Vec<String>,
}

/// DTLS role negotiated for a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DtlsRole {
    /// Let the peer decide.
    Auto,
    /// Act as DTLS client.
    Client,
    /// Act as DTLS server.
    Server,
}

/// Certificate fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DtlsFingerprint {
    /// Hash algorithm, e.g. `sha-256`.
    pub algorithm: String,
    /// Colon-separated hex digest.
    pub value: String,
}

/// DTLS handshake parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DtlsParameters {
    /// Role for this side.
    pub role: DtlsRole,
    /// Certificate fingerprints.
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// Host-side transport description returned by `CreateTransport`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportOptions {
    /// Host-side transport id.
    pub transport_id: String,
    /// Address the host listens on for this transport.
    pub endpoint: String,
    /// Host DTLS parameters.
    pub dtls_parameters: DtlsParameters,
    /// Whether the transport carries data channels.
    pub sctp_enabled: bool,
}

/// RTP encoding parameters for a producer or consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RtpParameters {
    /// Media section id.
    pub mid: Option<String>,
    /// Codecs in use.
    pub codecs: Vec<CodecCapability>,
    /// Synchronisation source.
    pub ssrc: u32,
}

/// Reliability parameters of a data stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SctpStreamParameters {
    /// Stream number.
    pub stream_id: u16,
    /// Whether delivery is ordered.
    pub ordered: bool,
    /// Retransmission limit; `Some(0)` means fire-and-forget.
    pub max_retransmits: Option<u16>,
}

impl SctpStreamParameters {
    /// Unordered, never retransmitted: the location channel.
    pub fn unreliable(stream_id: u16) -> Self {
        Self {
            stream_id,
            ordered: false,
            max_retransmits: Some(0),
        }
    }
}

/// Host-initiated media consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumerOptions {
    /// Consumer id, echoed in `ConsumerReady`.
    pub consumer_id: String,
    /// Producer being consumed.
    pub producer_id: String,
    /// Participant owning the producer.
    pub player_id: PlayerId,
    /// Media kind.
    pub kind: MediaKind,
    /// Encoding parameters.
    pub rtp_parameters: RtpParameters,
}

/// Host-initiated data consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataConsumerOptions {
    /// Data consumer id, echoed in `ConsumerReady`.
    pub data_consumer_id: String,
    /// Data producer being consumed.
    pub data_producer_id: String,
    /// Channel label.
    pub label: String,
    /// Stream parameters.
    pub sctp_stream_parameters: SctpStreamParameters,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while encoding or decoding a control message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The payload was empty (no version byte).
    #[error("empty payload, no version byte")]
    EmptyPayload,

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Postcard (de)serialization failed.
    #[error("malformed message body: {0}")]
    Postcard(#[from] postcard::Error),

    /// The message decoded but violates a semantic rule.
    #[error("invalid message: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check a chat line against the length rules.
pub fn validate_chat(text: &str) -> Result<(), ProtocolError> {
    if text.trim().is_empty() {
        return Err(ProtocolError::Invalid("chat text is empty".into()));
    }
    let len = text.chars().count();
    if len > MAX_CHAT_LENGTH {
        return Err(ProtocolError::Invalid(format!(
            "chat text is {len} characters, limit {MAX_CHAT_LENGTH}"
        )));
    }
    Ok(())
}

/// Check a presence field's string length.
pub fn validate_presence_field(field: &PresenceField) -> Result<(), ProtocolError> {
    if let Some(text) = field.text()
        && text.chars().count() > MAX_PRESENCE_FIELD_LENGTH
    {
        return Err(ProtocolError::Invalid(format!(
            "{:?} exceeds {MAX_PRESENCE_FIELD_LENGTH} characters",
            field.key()
        )));
    }
    Ok(())
}

fn require_non_empty(value: &str, what: &str) -> Result<(), ProtocolError> {
    if value.is_empty() {
        return Err(ProtocolError::Invalid(format!("{what} is empty")));
    }
    Ok(())
}

impl ClientMessage {
    /// Semantic checks applied on both encode and decode.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            ClientMessage::Request { request, .. } => match request {
                ClientRequest::Join { world_uri } => require_non_empty(world_uri, "world uri"),
                ClientRequest::ProduceData { label, .. } => require_non_empty(label, "data label"),
                _ => Ok(()),
            },
            ClientMessage::PlayerData(field) => validate_presence_field(field),
            ClientMessage::Chat { text } => validate_chat(text),
            ClientMessage::ConsumerReady { consumer_id } => {
                require_non_empty(consumer_id, "consumer id")
            }
        }
    }
}

impl HostMessage {
    /// Semantic checks applied on decode.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            HostMessage::Response { body, .. } => match body {
                ResponseBody::TransportCreated(options) => {
                    require_non_empty(&options.transport_id, "transport id")?;
                    require_non_empty(&options.endpoint, "transport endpoint")
                }
                ResponseBody::Produced { producer_id } => {
                    require_non_empty(producer_id, "producer id")
                }
                ResponseBody::DataProduced { data_producer_id } => {
                    require_non_empty(data_producer_id, "data producer id")
                }
                _ => Ok(()),
            },
            HostMessage::PlayerJoined { initial_data, .. } => {
                initial_data.iter().try_for_each(validate_presence_field)
            }
            HostMessage::PlayerLeft { .. } => Ok(()),
            HostMessage::PlayerData { field, .. } => validate_presence_field(field),
            HostMessage::ChatMessage { text, .. } => validate_chat(text),
            HostMessage::CreateConsumer(options) => {
                require_non_empty(&options.consumer_id, "consumer id")
            }
            HostMessage::CreateDataConsumer(options) => {
                require_non_empty(&options.data_consumer_id, "data consumer id")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let body = postcard::to_allocvec(msg)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

fn decode<'a, T: Deserialize<'a>>(data: &'a [u8]) -> Result<T, ProtocolError> {
    let (&version, body) = data.split_first().ok_or(ProtocolError::EmptyPayload)?;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(body)?)
}

/// Serialize a [`ClientMessage`] into a versioned binary payload.
///
/// Wire format: `[version: u8] [postcard-encoded ClientMessage]`
pub fn encode_client_message(msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    msg.validate()?;
    encode(msg)
}

/// Deserialize and validate a [`ClientMessage`].
pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let msg: ClientMessage = decode(data)?;
    msg.validate()?;
    Ok(msg)
}

/// Serialize a [`HostMessage`] into a versioned binary payload.
pub fn encode_host_message(msg: &HostMessage) -> Result<Vec<u8>, ProtocolError> {
    encode(msg)
}

/// Deserialize and validate a [`HostMessage`].
pub fn decode_host_message(data: &[u8]) -> Result<HostMessage, ProtocolError> {
    let msg: HostMessage = decode(data)?;
    msg.validate()?;
    Ok(msg)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
