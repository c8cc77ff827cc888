//! Plain-UDP media device.
//!
//! Each transport is one UDP socket connected to the endpoint the host
//! returned for it. The send socket carries the location data producer; the
//! recv socket is drained by a task that pushes every datagram into the
//! inbox tagged with the epoch the device was loaded under. No DTLS: the
//! parameters advertised are empty and the host identifies the client by
//! `local_endpoint`.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket as StdUdpSocket};

use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::Epoch;
use crate::protocol::{
    ConsumerOptions, DataConsumerOptions, DtlsParameters, DtlsRole, RouterCapabilities,
    SctpStreamParameters, TransportDirection, TransportOptions,
};
use crate::transport::{DeviceError, InboxSender, LocalTransport, MediaDevice, NetEventKind};

/// Largest datagram the recv loop accepts.
const MAX_DATAGRAM: usize = 1500;

/// [`MediaDevice`] over plain UDP sockets.
pub struct UdpMediaDevice {
    runtime: Handle,
    inbox: InboxSender,
    epoch: Option<Epoch>,
    send_socket: Option<StdUdpSocket>,
    recv_shutdown: Option<watch::Sender<bool>>,
    data_producer: Option<String>,
    consumers: HashSet<String>,
}

impl UdpMediaDevice {
    /// Create an unloaded device whose recv task runs on `runtime`.
    pub fn new(runtime: Handle, inbox: InboxSender) -> Self {
        Self {
            runtime,
            inbox,
            epoch: None,
            send_socket: None,
            recv_shutdown: None,
            data_producer: None,
            consumers: HashSet::new(),
        }
    }

    /// Number of consumers constructed for this connection.
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    fn bind_towards(endpoint: SocketAddr) -> Result<StdUdpSocket, DeviceError> {
        let local: SocketAddr = if endpoint.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = StdUdpSocket::bind(local)?;
        socket.connect(endpoint)?;
        socket.set_nonblocking(true)?;
        Ok(socket)
    }

    fn start_recv(&mut self, socket: StdUdpSocket, epoch: Epoch) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.runtime
            .spawn(recv_loop(socket, epoch, self.inbox.clone(), shutdown_rx));
        self.recv_shutdown = Some(shutdown_tx);
    }
}

impl MediaDevice for UdpMediaDevice {
    fn load(&mut self, capabilities: &RouterCapabilities, epoch: Epoch) -> Result<(), DeviceError> {
        if self.epoch.is_some() {
            return Err(DeviceError::AlreadyLoaded);
        }
        debug!(%epoch, codecs = capabilities.codecs.len(), "udp device loaded");
        self.epoch = Some(epoch);
        Ok(())
    }

    fn create_transport(
        &mut self,
        direction: TransportDirection,
        options: &TransportOptions,
    ) -> Result<LocalTransport, DeviceError> {
        let epoch = self.epoch.ok_or(DeviceError::NotLoaded)?;
        let endpoint: SocketAddr = options
            .endpoint
            .parse()
            .map_err(|_| DeviceError::InvalidEndpoint(options.endpoint.clone()))?;

        let socket = Self::bind_towards(endpoint)?;
        let local = socket.local_addr()?;
        debug!(?direction, %endpoint, %local, "udp transport bound");

        match direction {
            TransportDirection::Send => self.send_socket = Some(socket),
            TransportDirection::Recv => {
                if let Some(previous) = self.recv_shutdown.take() {
                    let _ = previous.send(true);
                }
                self.start_recv(socket, epoch);
            }
        }

        Ok(LocalTransport {
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Client,
                fingerprints: Vec::new(),
            },
            local_endpoint: Some(local.to_string()),
        })
    }

    fn open_data_producer(
        &mut self,
        data_producer_id: &str,
        parameters: &SctpStreamParameters,
    ) -> Result<(), DeviceError> {
        if self.send_socket.is_none() {
            return Err(DeviceError::MissingTransport(TransportDirection::Send));
        }
        debug!(data_producer_id, ?parameters, "data producer open");
        self.data_producer = Some(data_producer_id.to_owned());
        Ok(())
    }

    fn send_data(&mut self, payload: &[u8]) -> Result<(), DeviceError> {
        let socket = match (&self.send_socket, &self.data_producer) {
            (Some(socket), Some(_)) => socket,
            _ => return Err(DeviceError::NoDataProducer),
        };
        match socket.send(payload) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(DeviceError::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    fn consume(&mut self, options: &ConsumerOptions) -> Result<(), DeviceError> {
        if self.epoch.is_none() {
            return Err(DeviceError::NotLoaded);
        }
        // Decoding and playback belong to the media pipeline; the device only
        // tracks that the consumer exists.
        debug!(consumer = %options.consumer_id, kind = ?options.kind, player = %options.player_id, "media consumer created");
        self.consumers.insert(options.consumer_id.clone());
        Ok(())
    }

    fn consume_data(&mut self, options: &DataConsumerOptions) -> Result<(), DeviceError> {
        if self.recv_shutdown.is_none() {
            return Err(DeviceError::MissingTransport(TransportDirection::Recv));
        }
        debug!(consumer = %options.data_consumer_id, label = %options.label, "data consumer created");
        self.consumers.insert(options.data_consumer_id.clone());
        Ok(())
    }

    fn close(&mut self) {
        if let Some(shutdown) = self.recv_shutdown.take() {
            let _ = shutdown.send(true);
        }
        self.send_socket = None;
        self.data_producer = None;
        self.consumers.clear();
        self.epoch = None;
    }
}

impl Drop for UdpMediaDevice {
    fn drop(&mut self) {
        self.close();
    }
}

async fn recv_loop(
    socket: StdUdpSocket,
    epoch: Epoch,
    inbox: InboxSender,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let socket = match UdpSocket::from_std(socket) {
        Ok(socket) => socket,
        Err(e) => {
            warn!(error = %e, "could not register udp socket");
            return;
        }
    };
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            result = socket.recv(&mut buf) => match result {
                Ok(n) => {
                    trace!(len = n, "datagram");
                    if !inbox.push(epoch, NetEventKind::Datagram(buf[..n].to_vec())) {
                        return;
                    }
                }
                // ICMP port-unreachable surfaces here on some platforms.
                Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                    trace!("udp peer unreachable");
                }
                Err(e) => {
                    warn!(error = %e, "udp receive failed");
                    return;
                }
            },
            _ = shutdown_rx.changed() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::{NetworkInbox, network_inbox};

    fn options(endpoint: SocketAddr) -> TransportOptions {
        TransportOptions {
            transport_id: "t".into(),
            endpoint: endpoint.to_string(),
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Server,
                fingerprints: Vec::new(),
            },
            sctp_enabled: true,
        }
    }

    async fn wait_for_datagram(inbox: &NetworkInbox) -> (Epoch, Vec<u8>) {
        for _ in 0..200 {
            for event in inbox.drain() {
                if let NetEventKind::Datagram(bytes) = event.kind {
                    return (event.epoch, bytes);
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no datagram within 2s");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_datagrams_flow_both_ways() {
        let host = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let host_addr = host.local_addr().unwrap();
        let (tx, inbox) = network_inbox();
        let mut device = UdpMediaDevice::new(Handle::current(), tx);

        device.load(&RouterCapabilities::default(), Epoch(4)).unwrap();
        device
            .create_transport(TransportDirection::Send, &options(host_addr))
            .unwrap();
        let recv = device
            .create_transport(TransportDirection::Recv, &options(host_addr))
            .unwrap();
        device
            .open_data_producer("dp", &SctpStreamParameters::unreliable(0))
            .unwrap();

        device.send_data(&[1, 2, 3]).unwrap();
        let mut buf = [0u8; 64];
        let (n, _) = host.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);

        let recv_addr: SocketAddr = recv.local_endpoint.unwrap().parse().unwrap();
        let recv_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, recv_addr.port()));
        host.send_to(&[9; 21], recv_addr).await.unwrap();
        let (epoch, bytes) = wait_for_datagram(&inbox).await;
        assert_eq!(epoch, Epoch(4));
        assert_eq!(bytes, vec![9; 21]);

        device.close();
        assert!(matches!(device.send_data(&[1]), Err(DeviceError::NoDataProducer)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lifecycle_errors() {
        let (tx, _inbox) = network_inbox();
        let mut device = UdpMediaDevice::new(Handle::current(), tx);
        let endpoint: SocketAddr = "127.0.0.1:9".parse().unwrap();

        assert!(matches!(
            device.create_transport(TransportDirection::Send, &options(endpoint)),
            Err(DeviceError::NotLoaded)
        ));
        device.load(&RouterCapabilities::default(), Epoch(1)).unwrap();
        assert!(matches!(
            device.load(&RouterCapabilities::default(), Epoch(1)),
            Err(DeviceError::AlreadyLoaded)
        ));
        assert!(matches!(
            device.open_data_producer("dp", &SctpStreamParameters::unreliable(0)),
            Err(DeviceError::MissingTransport(TransportDirection::Send))
        ));

        let mut bad = options(endpoint);
        bad.endpoint = "not an address".into();
        assert!(matches!(
            device.create_transport(TransportDirection::Recv, &bad),
            Err(DeviceError::InvalidEndpoint(_))
        ));

        device.close();
        device.load(&RouterCapabilities::default(), Epoch(2)).unwrap();
    }
}
