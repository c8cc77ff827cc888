//! Client networking: location codec, control protocol and framing, and the
//! connection state machine with its TCP control channel and UDP data device.

pub mod connection;
pub mod framing;
pub mod ids;
pub mod location;
pub mod pending;
pub mod protocol;
pub mod reconnection;
pub mod state;
pub mod tcp_channel;
pub mod transport;
pub mod udp_device;

pub use connection::{
    ConnectTarget, ConnectionError, ConnectionEvent, ConnectionManager, ControlMessage,
};
pub use framing::{FrameConfig, FrameError, encode_frame, read_frame, write_frame};
pub use ids::{Epoch, PlayerId, RequestId};
pub use location::{LOCATION_RECORD_LEN, LocationError, LocationRecord, decode_location, encode_location};
pub use pending::{Correlation, PendingKind, PendingRequests};
pub use protocol::{
    ClientMessage, ClientRequest, HostMessage, MAX_CHAT_LENGTH, MediaKind, PresenceField,
    PresenceKey, ProtocolError, ResponseBody, RtpParameters, decode_client_message,
    decode_host_message, encode_client_message, encode_host_message,
};
pub use reconnection::{ReconnectConfig, ReconnectError, ReconnectScheduler, ReconnectState};
pub use state::{
    ConnectionState, ConnectionStateWatch, ConnectionStatus, DisconnectReason, SetupStep,
};
pub use tcp_channel::TcpControlChannel;
pub use transport::{
    ChannelError, ControlChannel, DeviceError, InboxSender, LocalTransport, MediaDevice, NetEvent,
    NetEventKind, NetworkInbox, network_inbox,
};
pub use udp_device::UdpMediaDevice;
