//! Connection lifecycle states, disconnect reasons and the observable state
//! watch.

use std::fmt;

use tokio::sync::watch;

use crate::protocol::TransportDirection;

/// Stage of the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection. Sends are queued until the next `connect`.
    Disconnected,
    /// The control channel is opening. Sends are queued.
    ControlOpen,
    /// Capabilities requested; transports being created and connected.
    NegotiatingMedia,
    /// Both transports connected; data producer and join in flight.
    TransportsReady,
    /// Joined with a player id. Steady state.
    Connected,
}

impl ConnectionState {
    /// Whether control messages can be written straight to the channel.
    pub fn channel_open(self) -> bool {
        matches!(
            self,
            ConnectionState::NegotiatingMedia
                | ConnectionState::TransportsReady
                | ConnectionState::Connected
        )
    }
}

/// Presentation state for UI and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Never connected, or closed by the caller.
    Offline,
    /// First connection attempt in progress.
    Connecting,
    /// Joined.
    Online,
    /// The last connection failed; waiting for or running a retry.
    Reconnecting,
}

/// Setup step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    /// Capability request rejected by the host.
    Capabilities,
    /// Local device rejected the capabilities.
    LoadDevice,
    /// Transport creation failed.
    CreateTransport(TransportDirection),
    /// Transport handshake failed.
    ConnectTransport(TransportDirection),
    /// Data producer could not be opened.
    DataProducer,
}

/// Why the state machine returned to [`ConnectionState::Disconnected`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The caller invoked `close()`.
    Closed,
    /// The caller connected to a different target.
    TargetChanged,
    /// The control channel closed.
    ChannelClosed(String),
    /// Writing to or opening the control channel failed.
    ChannelFailed(String),
    /// A transport setup step failed.
    SetupFailed {
        /// The step.
        step: SetupStep,
        /// Host or device message.
        reason: String,
    },
    /// The host refused the join.
    JoinRejected(String),
}

impl DisconnectReason {
    /// Whether the disconnect was unexpected (the caller should retry).
    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            DisconnectReason::Closed | DisconnectReason::TargetChanged
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Closed => f.write_str("closed by caller"),
            DisconnectReason::TargetChanged => f.write_str("connection target changed"),
            DisconnectReason::ChannelClosed(reason) => write!(f, "control channel closed: {reason}"),
            DisconnectReason::ChannelFailed(reason) => write!(f, "control channel failed: {reason}"),
            DisconnectReason::SetupFailed { step, reason } => {
                write!(f, "setup step {step:?} failed: {reason}")
            }
            DisconnectReason::JoinRejected(reason) => write!(f, "join rejected: {reason}"),
        }
    }
}

/// Observable connection state backed by a [`watch`] channel.
///
/// Multiple subscribers can observe state transitions without polling.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    /// Publish a state, notifying subscribers.
    pub fn set(&self, state: ConnectionState) {
        self.tx.send_replace(state);
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}
