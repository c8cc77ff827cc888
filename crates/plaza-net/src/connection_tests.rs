use std::sync::{Arc, Mutex};

use super::*;
use crate::protocol::{
    ConsumerOptions, DataConsumerOptions, DtlsParameters, DtlsRole, decode_client_message,
    encode_host_message,
};
use crate::state::{ConnectionState, ConnectionStatus, DisconnectReason, SetupStep};
use crate::transport::LocalTransport;

const WORLD: &str = "plaza://lobby";
const HOST: &str = "127.0.0.1:7777";

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ChannelLog {
    opened: Vec<(String, Epoch)>,
    sent: Vec<ClientMessage>,
    closes: usize,
    fail_send: bool,
}

struct RecordingChannel(Arc<Mutex<ChannelLog>>);

impl ControlChannel for RecordingChannel {
    fn open(&mut self, host_address: &str, epoch: Epoch) -> Result<(), ChannelError> {
        self.0
            .lock()
            .unwrap()
            .opened
            .push((host_address.to_owned(), epoch));
        Ok(())
    }

    fn send(&mut self, payload: Vec<u8>) -> Result<(), ChannelError> {
        let mut log = self.0.lock().unwrap();
        if log.fail_send {
            return Err(ChannelError::NotOpen);
        }
        log.sent.push(decode_client_message(&payload).unwrap());
        Ok(())
    }

    fn close(&mut self) {
        self.0.lock().unwrap().closes += 1;
    }
}

#[derive(Default)]
struct DeviceLog {
    loads: Vec<Epoch>,
    transports: Vec<TransportDirection>,
    data_producer: Option<String>,
    datagrams: Vec<Vec<u8>>,
    consumers: Vec<String>,
    closes: usize,
    fail_load: bool,
}

struct ScriptedDevice(Arc<Mutex<DeviceLog>>);

impl MediaDevice for ScriptedDevice {
    fn load(&mut self, _capabilities: &RouterCapabilities, epoch: Epoch) -> Result<(), DeviceError> {
        let mut log = self.0.lock().unwrap();
        if log.fail_load {
            return Err(DeviceError::Unsupported("no codecs".into()));
        }
        log.loads.push(epoch);
        Ok(())
    }

    fn create_transport(
        &mut self,
        direction: TransportDirection,
        _options: &TransportOptions,
    ) -> Result<LocalTransport, DeviceError> {
        self.0.lock().unwrap().transports.push(direction);
        Ok(LocalTransport {
            dtls_parameters: dtls(),
            local_endpoint: Some(format!("127.0.0.1:5000{}", direction as u8)),
        })
    }

    fn open_data_producer(
        &mut self,
        data_producer_id: &str,
        _parameters: &SctpStreamParameters,
    ) -> Result<(), DeviceError> {
        self.0.lock().unwrap().data_producer = Some(data_producer_id.to_owned());
        Ok(())
    }

    fn send_data(&mut self, payload: &[u8]) -> Result<(), DeviceError> {
        self.0.lock().unwrap().datagrams.push(payload.to_vec());
        Ok(())
    }

    fn consume(&mut self, options: &ConsumerOptions) -> Result<(), DeviceError> {
        self.0
            .lock()
            .unwrap()
            .consumers
            .push(options.consumer_id.clone());
        Ok(())
    }

    fn consume_data(&mut self, options: &DataConsumerOptions) -> Result<(), DeviceError> {
        self.0
            .lock()
            .unwrap()
            .consumers
            .push(options.data_consumer_id.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.0.lock().unwrap().closes += 1;
    }
}

fn dtls() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Auto,
        fingerprints: Vec::new(),
    }
}

fn transport_options(direction: TransportDirection) -> TransportOptions {
    TransportOptions {
        transport_id: format!("{direction:?}-transport"),
        endpoint: "127.0.0.1:40000".into(),
        dtls_parameters: dtls(),
        sctp_enabled: direction == TransportDirection::Send,
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    manager: ConnectionManager,
    channel: Arc<Mutex<ChannelLog>>,
    device: Arc<Mutex<DeviceLog>>,
}

impl Harness {
    fn new() -> Self {
        let channel = Arc::new(Mutex::new(ChannelLog::default()));
        let device = Arc::new(Mutex::new(DeviceLog::default()));
        let manager = ConnectionManager::new(
            Box::new(RecordingChannel(Arc::clone(&channel))),
            Box::new(ScriptedDevice(Arc::clone(&device))),
        );
        Self {
            manager,
            channel,
            device,
        }
    }

    fn sent(&self) -> Vec<ClientMessage> {
        self.channel.lock().unwrap().sent.clone()
    }

    fn requests(&self) -> Vec<ClientRequest> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::Request { request, .. } => Some(request),
                _ => None,
            })
            .collect()
    }

    fn deliver(&mut self, kind: NetEventKind) {
        let epoch = self.manager.epoch();
        self.manager.handle_event(NetEvent { epoch, kind });
    }

    fn opened(&mut self) {
        self.deliver(NetEventKind::ControlOpened);
    }

    fn host(&mut self, message: HostMessage) {
        let bytes = encode_host_message(&message).unwrap();
        self.deliver(NetEventKind::ControlFrame(bytes));
    }

    fn respond(&mut self, request_id: RequestId, body: ResponseBody) {
        self.host(HostMessage::Response { request_id, body });
    }

    /// Id of the most recent request matching `pred`.
    fn request_id(&self, pred: impl Fn(&ClientRequest) -> bool) -> RequestId {
        self.sent()
            .into_iter()
            .rev()
            .find_map(|m| match m {
                ClientMessage::Request {
                    request_id,
                    request,
                } if pred(&request) => Some(request_id),
                _ => None,
            })
            .expect("no matching request sent")
    }

    fn complete_transports(&mut self) {
        let caps = self.request_id(|r| matches!(r, ClientRequest::GetCapabilities));
        self.respond(caps, ResponseBody::Capabilities(RouterCapabilities::default()));
        for dir in [TransportDirection::Send, TransportDirection::Recv] {
            let id = self.request_id(
                |r| matches!(r, ClientRequest::CreateTransport { direction } if *direction == dir),
            );
            self.respond(id, ResponseBody::TransportCreated(transport_options(dir)));
        }
        for dir in [TransportDirection::Send, TransportDirection::Recv] {
            let id = self.request_id(
                |r| matches!(r, ClientRequest::ConnectTransport { direction, .. } if *direction == dir),
            );
            self.respond(id, ResponseBody::TransportConnected);
        }
    }

    fn connect_fully(&mut self, player: u8) {
        self.manager.connect(WORLD, HOST).unwrap();
        self.opened();
        self.complete_transports();
        let produce_data = self.request_id(|r| matches!(r, ClientRequest::ProduceData { .. }));
        self.respond(
            produce_data,
            ResponseBody::DataProduced {
                data_producer_id: "dp-1".into(),
            },
        );
        let join = self.request_id(|r| matches!(r, ClientRequest::Join { .. }));
        self.respond(
            join,
            ResponseBody::Joined {
                player_id: PlayerId(player),
            },
        );
    }
}

fn join_count(requests: &[ClientRequest]) -> usize {
    requests
        .iter()
        .filter(|r| matches!(r, ClientRequest::Join { .. }))
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_sends_before_connect_are_queued_and_replayed_once_in_order() {
    let mut h = Harness::new();
    h.manager
        .send(ControlMessage::Chat { text: "hi".into() })
        .unwrap();
    h.manager
        .send(ControlMessage::Join {
            world_uri: WORLD.into(),
        })
        .unwrap();
    h.manager
        .send(ControlMessage::PlayerData(PresenceField::Nickname("ana".into())))
        .unwrap();
    assert_eq!(h.manager.queued_len(), 3);
    assert!(h.sent().is_empty());

    h.manager.connect(WORLD, HOST).unwrap();
    assert!(h.sent().is_empty(), "nothing is written before the channel opens");
    h.opened();

    let sent = h.sent();
    assert!(matches!(&sent[0], ClientMessage::Chat { text } if text == "hi"));
    assert!(matches!(
        &sent[1],
        ClientMessage::Request {
            request: ClientRequest::Join { .. },
            ..
        }
    ));
    assert!(matches!(&sent[2], ClientMessage::PlayerData(PresenceField::Nickname(n)) if n == "ana"));
    assert!(matches!(
        &sent[3],
        ClientMessage::Request {
            request: ClientRequest::GetCapabilities,
            ..
        }
    ));
    assert_eq!(h.manager.queued_len(), 0);

    h.complete_transports();
    assert_eq!(h.manager.state(), ConnectionState::TransportsReady);
    assert_eq!(join_count(&h.requests()), 1, "join must not be issued twice");

    let join = h.request_id(|r| matches!(r, ClientRequest::Join { .. }));
    h.respond(join, ResponseBody::Joined { player_id: PlayerId(3) });
    assert_eq!(h.manager.state(), ConnectionState::Connected);
    assert_eq!(join_count(&h.requests()), 1);
}

#[test]
fn test_full_handshake_walks_every_state() {
    let mut h = Harness::new();
    let mut state_rx = h.manager.watch().subscribe();

    h.manager.connect(WORLD, HOST).unwrap();
    assert_eq!(h.manager.state(), ConnectionState::ControlOpen);
    assert_eq!(h.channel.lock().unwrap().opened, vec![(HOST.to_owned(), Epoch(1))]);

    h.opened();
    assert_eq!(h.manager.state(), ConnectionState::NegotiatingMedia);
    assert_eq!(h.requests(), vec![ClientRequest::GetCapabilities]);

    h.complete_transports();
    assert_eq!(h.device.lock().unwrap().loads, vec![Epoch(1)]);
    assert_eq!(
        h.device.lock().unwrap().transports,
        vec![TransportDirection::Send, TransportDirection::Recv]
    );
    assert_eq!(h.manager.state(), ConnectionState::TransportsReady);

    let requests = h.requests();
    assert!(requests.iter().any(|r| matches!(
        r,
        ClientRequest::ConnectTransport { local_endpoint: Some(_), .. }
    )));
    assert!(requests.iter().any(|r| matches!(
        r,
        ClientRequest::ProduceData { label, sctp_stream_parameters }
            if label == LOCATION_CHANNEL_LABEL && !sctp_stream_parameters.ordered
    )));
    assert!(requests.iter().any(|r| matches!(
        r,
        ClientRequest::Join { world_uri } if world_uri == WORLD
    )));

    let produce_data = h.request_id(|r| matches!(r, ClientRequest::ProduceData { .. }));
    h.respond(
        produce_data,
        ResponseBody::DataProduced {
            data_producer_id: "dp-9".into(),
        },
    );
    assert_eq!(h.device.lock().unwrap().data_producer.as_deref(), Some("dp-9"));

    let join = h.request_id(|r| matches!(r, ClientRequest::Join { .. }));
    h.respond(join, ResponseBody::Joined { player_id: PlayerId(5) });

    assert_eq!(h.manager.state(), ConnectionState::Connected);
    assert_eq!(h.manager.local_player(), Some(PlayerId(5)));
    assert_eq!(h.manager.status(), ConnectionStatus::Online);
    assert_eq!(h.manager.pending_len(), 0);
    assert_eq!(*state_rx.borrow_and_update(), ConnectionState::Connected);

    let events = h.manager.drain_events();
    let states: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::StateChanged(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            ConnectionState::ControlOpen,
            ConnectionState::NegotiatingMedia,
            ConnectionState::TransportsReady,
            ConnectionState::Connected,
        ]
    );
    assert!(events.contains(&ConnectionEvent::Joined {
        player_id: PlayerId(5)
    }));
}

#[test]
fn test_join_accepted_before_transports_ready() {
    let mut h = Harness::new();
    h.manager.connect(WORLD, HOST).unwrap();
    h.opened();
    h.manager
        .send(ControlMessage::Join {
            world_uri: WORLD.into(),
        })
        .unwrap();
    let join = h.request_id(|r| matches!(r, ClientRequest::Join { .. }));
    h.respond(join, ResponseBody::Joined { player_id: PlayerId(8) });
    assert_eq!(h.manager.state(), ConnectionState::NegotiatingMedia);
    assert_eq!(h.manager.local_player(), None);

    h.complete_transports();
    assert_eq!(h.manager.state(), ConnectionState::Connected);
    assert_eq!(h.manager.local_player(), Some(PlayerId(8)));
    assert_eq!(join_count(&h.requests()), 1);
}

#[test]
fn test_second_join_is_refused() {
    let mut h = Harness::new();
    let join = || ControlMessage::Join {
        world_uri: WORLD.into(),
    };
    h.manager.send(join()).unwrap();
    assert!(matches!(
        h.manager.send(join()),
        Err(ConnectionError::JoinAlreadyRequested)
    ));
    assert_eq!(h.manager.queued_len(), 1);
}

#[test]
fn test_join_queued_before_connect_follows_connect_target() {
    let mut h = Harness::new();
    h.manager
        .send(ControlMessage::Join {
            world_uri: "plaza://elsewhere".into(),
        })
        .unwrap();
    h.manager.connect(WORLD, HOST).unwrap();
    h.opened();

    let joins: Vec<String> = h
        .requests()
        .into_iter()
        .filter_map(|r| match r {
            ClientRequest::Join { world_uri } => Some(world_uri),
            _ => None,
        })
        .collect();
    assert_eq!(joins, vec![WORLD.to_owned()]);
}

#[test]
fn test_join_for_other_world_is_refused_while_connecting() {
    let mut h = Harness::new();
    h.manager.connect(WORLD, HOST).unwrap();
    assert!(matches!(
        h.manager.send(ControlMessage::Join {
            world_uri: "plaza://elsewhere".into(),
        }),
        Err(ConnectionError::JoinTargetMismatch { .. })
    ));
    assert_eq!(h.manager.queued_len(), 0);

    h.manager
        .send(ControlMessage::Join {
            world_uri: WORLD.into(),
        })
        .unwrap();
    assert_eq!(h.manager.queued_len(), 1);
}

#[test]
fn test_stale_epoch_events_are_ignored() {
    let mut h = Harness::new();
    h.manager.connect(WORLD, HOST).unwrap();
    let old = h.manager.epoch();
    h.manager.close();
    h.manager.connect(WORLD, HOST).unwrap();
    assert_ne!(h.manager.epoch(), old);

    h.manager.handle_event(NetEvent {
        epoch: old,
        kind: NetEventKind::ControlOpened,
    });
    assert_eq!(h.manager.state(), ConnectionState::ControlOpen);
    assert!(h.sent().is_empty());

    h.manager.handle_event(NetEvent {
        epoch: old,
        kind: NetEventKind::ControlClosed {
            reason: "late".into(),
        },
    });
    assert_eq!(h.manager.state(), ConnectionState::ControlOpen);
}

#[test]
fn test_channel_close_tears_everything_down() {
    let mut h = Harness::new();
    h.connect_fully(4);
    h.manager.drain_events();

    h.deliver(NetEventKind::ControlClosed {
        reason: "reset by peer".into(),
    });

    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    assert_eq!(h.manager.local_player(), None);
    assert_eq!(h.manager.pending_len(), 0);
    assert_eq!(h.manager.status(), ConnectionStatus::Reconnecting);
    assert_eq!(h.channel.lock().unwrap().closes, 1);
    assert_eq!(h.device.lock().unwrap().closes, 1);
    assert!(h.manager.drain_events().contains(&ConnectionEvent::Failed {
        reason: DisconnectReason::ChannelClosed("reset by peer".into()),
    }));
    assert!(matches!(
        h.manager.send_location(&[0; 21]),
        Err(ConnectionError::NotConnected)
    ));

    h.manager.retry().unwrap();
    assert_eq!(h.manager.state(), ConnectionState::ControlOpen);
    assert_eq!(h.channel.lock().unwrap().opened.len(), 2);
    assert_eq!(h.manager.status(), ConnectionStatus::Reconnecting);
}

#[test]
fn test_queued_sends_are_dropped_on_teardown() {
    let mut h = Harness::new();
    h.manager.connect(WORLD, HOST).unwrap();
    h.manager
        .send(ControlMessage::Chat { text: "lost".into() })
        .unwrap();
    assert_eq!(h.manager.queued_len(), 1);
    h.deliver(NetEventKind::ControlClosed {
        reason: "refused".into(),
    });
    assert_eq!(h.manager.queued_len(), 0);
}

#[test]
fn test_malformed_frame_is_dropped() {
    let mut h = Harness::new();
    h.connect_fully(1);
    h.manager.drain_events();

    h.deliver(NetEventKind::ControlFrame(vec![crate::protocol::PROTOCOL_VERSION, 0xFF, 0xFF]));
    h.deliver(NetEventKind::ControlFrame(Vec::new()));

    assert_eq!(h.manager.state(), ConnectionState::Connected);
    assert!(h.manager.drain_events().is_empty());
}

#[test]
fn test_mismatched_response_leaves_request_pending() {
    let mut h = Harness::new();
    h.manager.connect(WORLD, HOST).unwrap();
    h.opened();
    let caps = h.request_id(|r| matches!(r, ClientRequest::GetCapabilities));
    let before = h.manager.pending_len();

    h.respond(caps, ResponseBody::TransportConnected);
    assert_eq!(h.manager.state(), ConnectionState::NegotiatingMedia);
    assert_eq!(h.manager.pending_len(), before);

    h.respond(caps, ResponseBody::Capabilities(RouterCapabilities::default()));
    assert_eq!(h.device.lock().unwrap().loads.len(), 1);
}

#[test]
fn test_device_load_failure_tears_down() {
    let mut h = Harness::new();
    h.device.lock().unwrap().fail_load = true;
    h.manager.connect(WORLD, HOST).unwrap();
    h.opened();
    let caps = h.request_id(|r| matches!(r, ClientRequest::GetCapabilities));
    h.respond(caps, ResponseBody::Capabilities(RouterCapabilities::default()));

    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    assert!(matches!(
        h.manager.last_disconnect(),
        Some(DisconnectReason::SetupFailed {
            step: SetupStep::LoadDevice,
            ..
        })
    ));
}

#[test]
fn test_transport_failure_response_tears_down() {
    let mut h = Harness::new();
    h.manager.connect(WORLD, HOST).unwrap();
    h.opened();
    let caps = h.request_id(|r| matches!(r, ClientRequest::GetCapabilities));
    h.respond(caps, ResponseBody::Capabilities(RouterCapabilities::default()));
    let recv = h.request_id(|r| {
        matches!(
            r,
            ClientRequest::CreateTransport {
                direction: TransportDirection::Recv
            }
        )
    });
    h.respond(
        recv,
        ResponseBody::Failed {
            reason: "no ports".into(),
        },
    );

    assert_eq!(
        h.manager.last_disconnect(),
        Some(&DisconnectReason::SetupFailed {
            step: SetupStep::CreateTransport(TransportDirection::Recv),
            reason: "no ports".into(),
        })
    );
}

#[test]
fn test_join_rejection_reports_failure() {
    let mut h = Harness::new();
    h.manager.connect(WORLD, HOST).unwrap();
    h.opened();
    h.complete_transports();
    let join = h.request_id(|r| matches!(r, ClientRequest::Join { .. }));
    h.respond(
        join,
        ResponseBody::Failed {
            reason: "world full".into(),
        },
    );
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    assert!(h.manager.drain_events().contains(&ConnectionEvent::Failed {
        reason: DisconnectReason::JoinRejected("world full".into()),
    }));
}

#[test]
fn test_channel_write_failure_tears_down() {
    let mut h = Harness::new();
    h.connect_fully(2);
    h.channel.lock().unwrap().fail_send = true;
    h.manager
        .send(ControlMessage::Chat { text: "hello".into() })
        .unwrap();
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    assert!(matches!(
        h.manager.last_disconnect(),
        Some(DisconnectReason::ChannelFailed(_))
    ));
}

#[test]
fn test_same_target_is_noop_and_new_host_restarts() {
    let mut h = Harness::new();
    h.manager.connect(WORLD, HOST).unwrap();
    h.manager.connect(WORLD, HOST).unwrap();
    assert_eq!(h.channel.lock().unwrap().opened.len(), 1);

    h.manager.drain_events();
    h.manager.connect(WORLD, "10.0.0.2:7777").unwrap();
    let log = h.channel.lock().unwrap();
    assert_eq!(log.closes, 1);
    assert_eq!(log.opened.len(), 2);
    assert_eq!(log.opened[1].0, "10.0.0.2:7777");
    drop(log);

    assert_eq!(h.manager.state(), ConnectionState::ControlOpen);
    assert!(h.manager.drain_events().contains(&ConnectionEvent::Disconnected {
        reason: DisconnectReason::TargetChanged,
    }));
    assert_eq!(h.manager.status(), ConnectionStatus::Connecting);
}

#[test]
fn test_host_created_consumers_are_acknowledged() {
    let mut h = Harness::new();
    h.connect_fully(6);

    h.host(HostMessage::CreateDataConsumer(DataConsumerOptions {
        data_consumer_id: "dc-1".into(),
        data_producer_id: "dp-remote".into(),
        label: LOCATION_CHANNEL_LABEL.into(),
        sctp_stream_parameters: SctpStreamParameters::unreliable(1),
    }));
    h.host(HostMessage::CreateConsumer(ConsumerOptions {
        consumer_id: "c-1".into(),
        producer_id: "p-remote".into(),
        player_id: PlayerId(9),
        kind: MediaKind::Audio,
        rtp_parameters: RtpParameters {
            mid: None,
            codecs: Vec::new(),
            ssrc: 1,
        },
    }));

    assert_eq!(h.device.lock().unwrap().consumers, vec!["dc-1", "c-1"]);
    let acks: Vec<_> = h
        .sent()
        .into_iter()
        .filter_map(|m| match m {
            ClientMessage::ConsumerReady { consumer_id } => Some(consumer_id),
            _ => None,
        })
        .collect();
    assert_eq!(acks, vec!["dc-1", "c-1"]);
}

#[test]
fn test_presence_and_chat_become_events() {
    let mut h = Harness::new();
    h.connect_fully(1);
    h.manager.drain_events();

    h.host(HostMessage::PlayerJoined {
        player_id: PlayerId(2),
        initial_data: vec![PresenceField::Nickname("bo".into())],
    });
    h.host(HostMessage::PlayerData {
        player_id: PlayerId(2),
        field: PresenceField::Falling(true),
    });
    h.host(HostMessage::ChatMessage {
        player_id: PlayerId(2),
        text: "hey".into(),
    });
    h.host(HostMessage::PlayerLeft {
        player_id: PlayerId(2),
    });

    assert_eq!(
        h.manager.drain_events(),
        vec![
            ConnectionEvent::PeerJoined {
                player_id: PlayerId(2),
                initial_data: vec![PresenceField::Nickname("bo".into())],
            },
            ConnectionEvent::PresenceUpdated {
                player_id: PlayerId(2),
                field: PresenceField::Falling(true),
            },
            ConnectionEvent::Chat {
                player_id: PlayerId(2),
                text: "hey".into(),
            },
            ConnectionEvent::PeerLeft {
                player_id: PlayerId(2),
            },
        ]
    );
}

#[test]
fn test_produce_reports_producer_id() {
    let mut h = Harness::new();
    let rtp = RtpParameters {
        mid: Some("0".into()),
        codecs: Vec::new(),
        ssrc: 42,
    };
    assert!(matches!(
        h.manager.produce(MediaKind::Audio, rtp.clone()),
        Err(ConnectionError::NotConnected)
    ));

    h.connect_fully(1);
    h.manager.drain_events();
    let id = h.manager.produce(MediaKind::Audio, rtp).unwrap();
    h.respond(
        id,
        ResponseBody::Produced {
            producer_id: "prod-1".into(),
        },
    );
    assert_eq!(
        h.manager.drain_events(),
        vec![ConnectionEvent::ProducerCreated {
            kind: MediaKind::Audio,
            producer_id: "prod-1".into(),
        }]
    );
}

#[test]
fn test_send_location_goes_through_device() {
    let mut h = Harness::new();
    h.connect_fully(3);
    h.manager.send_location(&[7; 21]).unwrap();
    assert_eq!(h.device.lock().unwrap().datagrams, vec![vec![7; 21]]);
}

#[test]
fn test_invalid_messages_rejected_at_send() {
    let mut h = Harness::new();
    assert!(matches!(
        h.manager.send(ControlMessage::Chat { text: String::new() }),
        Err(ConnectionError::Protocol(_))
    ));
    assert!(matches!(
        h.manager.send(ControlMessage::Join {
            world_uri: String::new()
        }),
        Err(ConnectionError::EmptyWorldUri)
    ));
    assert!(matches!(
        h.manager.connect(WORLD, ""),
        Err(ConnectionError::EmptyHostAddress)
    ));
    assert_eq!(h.manager.queued_len(), 0);
}

#[test]
fn test_status_follows_lifecycle() {
    let mut h = Harness::new();
    assert_eq!(h.manager.status(), ConnectionStatus::Offline);
    h.manager.connect(WORLD, HOST).unwrap();
    assert_eq!(h.manager.status(), ConnectionStatus::Connecting);
    h.deliver(NetEventKind::ControlClosed {
        reason: "refused".into(),
    });
    assert_eq!(h.manager.status(), ConnectionStatus::Reconnecting);
    h.manager.close();
    assert_eq!(h.manager.status(), ConnectionStatus::Offline);
    assert!(matches!(h.manager.retry(), Err(ConnectionError::NoTarget)));
}

#[test]
fn test_rejoin_after_failure_binds_new_player() {
    let mut h = Harness::new();
    h.connect_fully(4);
    h.deliver(NetEventKind::ControlClosed {
        reason: "gone".into(),
    });
    h.manager.drain_events();

    h.connect_fully(9);
    assert_eq!(h.manager.local_player(), Some(PlayerId(9)));
    assert!(h.manager.drain_events().contains(&ConnectionEvent::Joined {
        player_id: PlayerId(9)
    }));
    assert_eq!(h.device.lock().unwrap().loads.len(), 2);
}
