//! Collaborator seams of the connection state machine and the inbound queue
//! network tasks push into.
//!
//! Channel and device implementations never touch simulation state. They tag
//! everything they observe with the [`Epoch`] they were opened under and push
//! it into a [`NetworkInbox`]; the simulation tick drains the inbox at one
//! fixed point per frame.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::Epoch;
use crate::protocol::{
    ConsumerOptions, DataConsumerOptions, DtlsParameters, RouterCapabilities, SctpStreamParameters,
    TransportDirection, TransportOptions,
};

// ---------------------------------------------------------------------------
// Inbox
// ---------------------------------------------------------------------------

/// Something a network task observed.
#[derive(Debug, Clone, PartialEq)]
pub enum NetEventKind {
    /// The reliable control channel is open.
    ControlOpened,
    /// One control frame payload arrived.
    ControlFrame(Vec<u8>),
    /// The control channel closed or failed.
    ControlClosed {
        /// Description of the cause.
        reason: String,
    },
    /// One datagram arrived on the unreliable data channel.
    Datagram(Vec<u8>),
}

/// A [`NetEventKind`] tagged with the connection epoch it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct NetEvent {
    /// Epoch the producing channel or device was opened under.
    pub epoch: Epoch,
    /// What happened.
    pub kind: NetEventKind,
}

/// Cloneable producer side of the inbox, handed to network tasks.
#[derive(Debug, Clone)]
pub struct InboxSender {
    tx: Sender<NetEvent>,
}

impl InboxSender {
    /// Push an event. Returns `false` once the inbox has been dropped, which
    /// tells the calling task to stop.
    pub fn push(&self, epoch: Epoch, kind: NetEventKind) -> bool {
        self.tx.send(NetEvent { epoch, kind }).is_ok()
    }
}

/// Consumer side of the inbox, drained once per tick.
#[derive(Debug)]
pub struct NetworkInbox {
    rx: Receiver<NetEvent>,
}

impl NetworkInbox {
    /// Take every event queued so far, in arrival order, without blocking.
    pub fn drain(&self) -> Vec<NetEvent> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        events
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create a connected inbox pair.
pub fn network_inbox() -> (InboxSender, NetworkInbox) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (InboxSender { tx }, NetworkInbox { rx })
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors reported by a [`ControlChannel`].
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// `send` was called with no open channel.
    #[error("control channel is not open")]
    NotOpen,
    /// The host address could not be used.
    #[error("invalid host address {address:?}: {reason}")]
    InvalidAddress {
        /// The address given to `open`.
        address: String,
        /// Why it was rejected.
        reason: String,
    },
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a [`MediaDevice`].
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// `load` was called twice for one connection.
    #[error("device already loaded")]
    AlreadyLoaded,
    /// An operation needs `load` first.
    #[error("device not loaded")]
    NotLoaded,
    /// The host's capabilities cannot be used by this device.
    #[error("unsupported capabilities: {0}")]
    Unsupported(String),
    /// The operation needs a transport that does not exist yet.
    #[error("no {0:?} transport")]
    MissingTransport(TransportDirection),
    /// `send_data` before the data producer was opened.
    #[error("data producer not open")]
    NoDataProducer,
    /// The datagram could not be queued; it is dropped.
    #[error("data channel would block")]
    WouldBlock,
    /// A host-provided endpoint failed to parse.
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Reliable, ordered message channel to the host.
///
/// `open` returns immediately; the channel later pushes
/// [`NetEventKind::ControlOpened`] (or `ControlClosed`) tagged with `epoch`.
pub trait ControlChannel: Send + Sync {
    /// Start opening a channel to `host_address`, closing any previous one.
    fn open(&mut self, host_address: &str, epoch: Epoch) -> Result<(), ChannelError>;

    /// Queue one encoded message for delivery.
    fn send(&mut self, payload: Vec<u8>) -> Result<(), ChannelError>;

    /// Close the channel. Idempotent. Emits no further events for the epoch.
    fn close(&mut self);
}

/// Transport parameters the device contributes to `ConnectTransport`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTransport {
    /// Local DTLS parameters.
    pub dtls_parameters: DtlsParameters,
    /// Local socket address, if the device binds one.
    pub local_endpoint: Option<String>,
}

/// Local media/data transport device.
///
/// Everything here is synchronous from the state machine's point of view;
/// inbound datagrams go through the inbox tagged with the epoch from `load`.
pub trait MediaDevice: Send + Sync {
    /// Initialise from the host's capabilities for connection `epoch`.
    fn load(&mut self, capabilities: &RouterCapabilities, epoch: Epoch) -> Result<(), DeviceError>;

    /// Create the local half of a transport.
    fn create_transport(
        &mut self,
        direction: TransportDirection,
        options: &TransportOptions,
    ) -> Result<LocalTransport, DeviceError>;

    /// Bind the host-assigned data producer on the send transport.
    fn open_data_producer(
        &mut self,
        data_producer_id: &str,
        parameters: &SctpStreamParameters,
    ) -> Result<(), DeviceError>;

    /// Send one datagram on the data producer. Unreliable: failures drop the
    /// datagram.
    fn send_data(&mut self, payload: &[u8]) -> Result<(), DeviceError>;

    /// Construct a host-initiated media consumer.
    fn consume(&mut self, options: &ConsumerOptions) -> Result<(), DeviceError>;

    /// Construct a host-initiated data consumer.
    fn consume_data(&mut self, options: &DataConsumerOptions) -> Result<(), DeviceError>;

    /// Release every transport and consumer. Idempotent.
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_arrival_order() {
        let (tx, inbox) = network_inbox();
        tx.push(Epoch(1), NetEventKind::ControlOpened);
        tx.push(Epoch(1), NetEventKind::ControlFrame(vec![1]));
        tx.push(Epoch(1), NetEventKind::Datagram(vec![2]));
        assert_eq!(inbox.len(), 3);

        let kinds: Vec<_> = inbox.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NetEventKind::ControlOpened,
                NetEventKind::ControlFrame(vec![1]),
                NetEventKind::Datagram(vec![2]),
            ]
        );
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_push_reports_dropped_inbox() {
        let (tx, inbox) = network_inbox();
        drop(inbox);
        assert!(!tx.push(Epoch(0), NetEventKind::ControlOpened));
    }

    #[test]
    fn test_drain_from_another_thread() {
        let (tx, inbox) = network_inbox();
        let handle = std::thread::spawn(move || {
            for i in 0..10u8 {
                tx.push(Epoch(2), NetEventKind::Datagram(vec![i]));
            }
        });
        handle.join().unwrap();
        assert_eq!(inbox.drain().len(), 10);
    }
}
