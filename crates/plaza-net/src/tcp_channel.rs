//! Reliable control channel over a framed TCP stream.
//!
//! [`TcpControlChannel::open`] returns immediately and spawns a link task on
//! the given runtime. The link connects, sets `TCP_NODELAY`, splits the
//! stream, and runs a reader and a writer until either fails or the channel
//! is closed. Everything the link observes goes into the inbox tagged with
//! the epoch it was opened under.

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::Epoch;
use crate::framing::{FrameConfig, read_frame, write_frame};
use crate::transport::{ChannelError, ControlChannel, InboxSender, NetEventKind};

struct Link {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    shutdown_tx: watch::Sender<bool>,
}

/// [`ControlChannel`] backed by tokio TCP.
pub struct TcpControlChannel {
    runtime: Handle,
    inbox: InboxSender,
    frame: FrameConfig,
    link: Option<Link>,
}

impl TcpControlChannel {
    /// Create a closed channel that will spawn its tasks on `runtime`.
    pub fn new(runtime: Handle, inbox: InboxSender, frame: FrameConfig) -> Self {
        Self {
            runtime,
            inbox,
            frame,
            link: None,
        }
    }

    /// Whether a link task is running.
    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }
}

impl ControlChannel for TcpControlChannel {
    fn open(&mut self, host_address: &str, epoch: Epoch) -> Result<(), ChannelError> {
        self.close();
        if host_address.is_empty() {
            return Err(ChannelError::InvalidAddress {
                address: host_address.to_owned(),
                reason: "empty".into(),
            });
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.runtime.spawn(run_link(
            host_address.to_owned(),
            epoch,
            self.inbox.clone(),
            self.frame,
            outbound_rx,
            shutdown_rx,
        ));
        self.link = Some(Link {
            outbound,
            shutdown_tx,
        });
        Ok(())
    }

    fn send(&mut self, payload: Vec<u8>) -> Result<(), ChannelError> {
        let link = self.link.as_ref().ok_or(ChannelError::NotOpen)?;
        link.outbound.send(payload).map_err(|_| ChannelError::NotOpen)
    }

    fn close(&mut self) {
        if let Some(link) = self.link.take() {
            let _ = link.shutdown_tx.send(true);
        }
    }
}

impl Drop for TcpControlChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_link(
    host_address: String,
    epoch: Epoch,
    inbox: InboxSender,
    frame: FrameConfig,
    outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let connected = tokio::select! {
        result = TcpStream::connect(host_address.as_str()) => result,
        _ = shutdown_rx.changed() => return,
    };
    let stream = match connected {
        Ok(stream) => stream,
        Err(e) => {
            warn!(host = %host_address, error = %e, "control connect failed");
            inbox.push(epoch, NetEventKind::ControlClosed {
                reason: e.to_string(),
            });
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "could not set TCP_NODELAY");
    }
    debug!(host = %host_address, %epoch, "control channel connected");
    inbox.push(epoch, NetEventKind::ControlOpened);

    let (reader, writer) = stream.into_split();
    let mut reader_task = tokio::spawn(read_loop(
        reader,
        epoch,
        inbox.clone(),
        frame,
        shutdown_rx.clone(),
    ));
    let mut writer_task = tokio::spawn(write_loop(writer, frame, outbound_rx, shutdown_rx));

    // Whichever side ends first reports; the other is stopped.
    let reason = tokio::select! {
        r = &mut reader_task => { writer_task.abort(); r }
        r = &mut writer_task => { reader_task.abort(); r }
    };
    match reason {
        Ok(Some(reason)) => {
            inbox.push(epoch, NetEventKind::ControlClosed { reason });
        }
        Ok(None) => debug!(%epoch, "control channel closed"),
        Err(e) => {
            inbox.push(epoch, NetEventKind::ControlClosed {
                reason: e.to_string(),
            });
        }
    }
}

/// Returns the failure reason, or `None` on requested shutdown.
async fn read_loop(
    mut reader: OwnedReadHalf,
    epoch: Epoch,
    inbox: InboxSender,
    frame: FrameConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Option<String> {
    loop {
        tokio::select! {
            result = read_frame(&mut reader, &frame) => match result {
                Ok(payload) => {
                    if !inbox.push(epoch, NetEventKind::ControlFrame(payload)) {
                        return None;
                    }
                }
                Err(e) => return Some(e.to_string()),
            },
            _ = shutdown_rx.changed() => return None,
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    frame: FrameConfig,
    mut outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Option<String> {
    loop {
        tokio::select! {
            payload = outbound_rx.recv() => {
                let Some(payload) = payload else { return None };
                if let Err(e) = write_frame(&mut writer, &payload, &frame).await {
                    return Some(e.to_string());
                }
            }
            _ = shutdown_rx.changed() => return None,
        }
    }
}
