use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use glam::{Quat, Vec3};
use plaza_ecs::{
    EngineSchedules, RenderTransform, Transform, create_world, validate_schedules,
};
use plaza_net::protocol::{
    ConsumerOptions, DataConsumerOptions, DtlsParameters, DtlsRole, RouterCapabilities,
    SctpStreamParameters, TransportDirection, TransportOptions, decode_client_message,
};
use plaza_net::{
    ChannelError, ClientMessage, ClientRequest, ControlChannel, DeviceError, Epoch, HostMessage,
    InboxSender, LocalTransport, MediaDevice, PresenceField, ResponseBody, encode_host_message,
    encode_location, network_inbox,
};

use super::*;
use crate::publisher::LocationPublisher;
use crate::remote::{LocalAvatar, RemotePlayer};
use crate::{LocalProfile, MultiplayerSettings, install};

const WORLD: &str = "plaza://lobby";
const HOST: &str = "127.0.0.1:7777";

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

struct RecordingChannel(Arc<Mutex<Vec<ClientMessage>>>);

impl ControlChannel for RecordingChannel {
    fn open(&mut self, _host_address: &str, _epoch: Epoch) -> Result<(), ChannelError> {
        Ok(())
    }

    fn send(&mut self, payload: Vec<u8>) -> Result<(), ChannelError> {
        self.0
            .lock()
            .unwrap()
            .push(decode_client_message(&payload).unwrap());
        Ok(())
    }

    fn close(&mut self) {}
}

struct LoopbackDevice {
    datagrams: Arc<Mutex<Vec<Vec<u8>>>>,
    blocked: Arc<AtomicBool>,
}

impl MediaDevice for LoopbackDevice {
    fn load(&mut self, _capabilities: &RouterCapabilities, _epoch: Epoch) -> Result<(), DeviceError> {
        Ok(())
    }

    fn create_transport(
        &mut self,
        _direction: TransportDirection,
        _options: &TransportOptions,
    ) -> Result<LocalTransport, DeviceError> {
        Ok(LocalTransport {
            dtls_parameters: dtls(),
            local_endpoint: None,
        })
    }

    fn open_data_producer(
        &mut self,
        _data_producer_id: &str,
        _parameters: &SctpStreamParameters,
    ) -> Result<(), DeviceError> {
        Ok(())
    }

    fn send_data(&mut self, payload: &[u8]) -> Result<(), DeviceError> {
        if self.blocked.load(Ordering::SeqCst) {
            return Err(DeviceError::WouldBlock);
        }
        self.datagrams.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    fn consume(&mut self, _options: &ConsumerOptions) -> Result<(), DeviceError> {
        Ok(())
    }

    fn consume_data(&mut self, _options: &DataConsumerOptions) -> Result<(), DeviceError> {
        Ok(())
    }

    fn close(&mut self) {}
}

fn dtls() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Auto,
        fingerprints: Vec::new(),
    }
}

fn transport_options(direction: TransportDirection) -> TransportOptions {
    TransportOptions {
        transport_id: format!("{direction:?}"),
        endpoint: "127.0.0.1:40000".into(),
        dtls_parameters: dtls(),
        sctp_enabled: true,
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    world: World,
    schedules: EngineSchedules,
    inbox: InboxSender,
    sent: Arc<Mutex<Vec<ClientMessage>>>,
    datagrams: Arc<Mutex<Vec<Vec<u8>>>>,
    blocked: Arc<AtomicBool>,
}

impl Harness {
    fn new() -> Self {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let datagrams = Arc::new(Mutex::new(Vec::new()));
        let blocked = Arc::new(AtomicBool::new(false));
        let (tx, inbox) = network_inbox();
        let manager = ConnectionManager::new(
            Box::new(RecordingChannel(Arc::clone(&sent))),
            Box::new(LoopbackDevice {
                datagrams: Arc::clone(&datagrams),
                blocked: Arc::clone(&blocked),
            }),
        );

        let mut world = create_world();
        let mut schedules = EngineSchedules::new();
        let settings = MultiplayerSettings {
            profile: LocalProfile {
                nickname: Some("me".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        install(&mut world, &mut schedules, settings, manager, inbox);
        validate_schedules(&mut schedules, &mut world);

        Self {
            world,
            schedules,
            inbox: tx,
            sent,
            datagrams,
            blocked,
        }
    }

    fn tick(&mut self) {
        self.schedules.run(&mut self.world, 1.0 / 60.0);
    }

    fn epoch(&self) -> Epoch {
        self.world.resource::<Connection>().epoch()
    }

    fn push(&self, kind: NetEventKind) {
        self.inbox.push(self.epoch(), kind);
    }

    fn host(&self, message: HostMessage) {
        self.push(NetEventKind::ControlFrame(
            encode_host_message(&message).unwrap(),
        ));
    }

    fn datagram(&self, player: u8, position: Vec3) {
        let record = encode_location(PlayerId(player), position, Quat::IDENTITY);
        self.push(NetEventKind::Datagram(record.to_vec()));
    }

    fn respond(&self, pred: impl Fn(&ClientRequest) -> bool, body: ResponseBody) {
        let request_id = self
            .sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|m| match m {
                ClientMessage::Request {
                    request_id,
                    request,
                } if pred(request) => Some(*request_id),
                _ => None,
            })
            .expect("no matching request sent");
        self.host(HostMessage::Response { request_id, body });
    }

    /// Drive an already-started connection through setup and join.
    fn handshake(&mut self, player: u8) {
        self.push(NetEventKind::ControlOpened);
        self.tick();
        self.respond(
            |r| matches!(r, ClientRequest::GetCapabilities),
            ResponseBody::Capabilities(RouterCapabilities::default()),
        );
        self.tick();
        for dir in [TransportDirection::Send, TransportDirection::Recv] {
            self.respond(
                |r| matches!(r, ClientRequest::CreateTransport { direction } if *direction == dir),
                ResponseBody::TransportCreated(transport_options(dir)),
            );
        }
        self.tick();
        for dir in [TransportDirection::Send, TransportDirection::Recv] {
            self.respond(
                |r| matches!(r, ClientRequest::ConnectTransport { direction, .. } if *direction == dir),
                ResponseBody::TransportConnected,
            );
        }
        self.tick();
        self.respond(
            |r| matches!(r, ClientRequest::ProduceData { .. }),
            ResponseBody::DataProduced {
                data_producer_id: "dp".into(),
            },
        );
        self.respond(
            |r| matches!(r, ClientRequest::Join { .. }),
            ResponseBody::Joined {
                player_id: PlayerId(player),
            },
        );
        self.tick();
    }

    fn connect(&mut self, player: u8) {
        self.world
            .resource_mut::<Connection>()
            .connect(WORLD, HOST)
            .unwrap();
        self.handshake(player);
    }

    fn remote_entity(&mut self, player: u8) -> Option<Entity> {
        let mut query = self.world.query::<(Entity, &RemotePlayer)>();
        query
            .iter(&self.world)
            .find(|(_, remote)| remote.0 == PlayerId(player))
            .map(|(entity, _)| entity)
    }

    fn published_nicknames(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| matches!(m, ClientMessage::PlayerData(PresenceField::Nickname(n)) if n == "me"))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_join_binds_local_player_and_republishes_profile() {
    let mut h = Harness::new();
    h.connect(5);

    assert_eq!(
        h.world.resource::<PresenceDirectory>().local_player(),
        Some(PlayerId(5))
    );
    assert_eq!(h.published_nicknames(), 1);
    let events = h.world.resource_mut::<SessionEvents>().drain();
    assert!(events.contains(&SessionEvent::Joined(PlayerId(5))));
}

#[test]
fn test_peer_join_spawns_named_avatar_and_leave_removes_it_in_one_step() {
    let mut h = Harness::new();
    h.connect(1);

    h.host(HostMessage::PlayerJoined {
        player_id: PlayerId(3),
        initial_data: vec![PresenceField::Nickname("bo".into())],
    });
    h.datagram(3, Vec3::new(1.5, 0.0, 0.0));
    h.tick();

    let entity = h.remote_entity(3).expect("avatar spawned");
    assert_eq!(h.world.get::<Name>(entity).unwrap().0, "bo");
    assert!(h.world.resource::<SnapshotBuffer>().get(PlayerId(3)).is_some());

    h.host(HostMessage::PlayerLeft {
        player_id: PlayerId(3),
    });
    h.tick();

    assert!(h.remote_entity(3).is_none());
    assert!(h.world.get::<RemotePlayer>(entity).is_none());
    assert!(h.world.resource::<SnapshotBuffer>().get(PlayerId(3)).is_none());
    assert!(!h.world.resource::<PresenceDirectory>().contains(PlayerId(3)));
    assert!(h.world.resource::<RemotePlayers>().is_empty());
}

#[test]
fn test_late_datagram_after_leave_does_not_ghost_reused_id() {
    let mut h = Harness::new();
    h.connect(1);

    h.host(HostMessage::PlayerJoined {
        player_id: PlayerId(3),
        initial_data: Vec::new(),
    });
    h.datagram(3, Vec3::new(50.0, 0.0, 0.0));
    h.tick();
    h.host(HostMessage::PlayerLeft {
        player_id: PlayerId(3),
    });
    h.tick();

    h.datagram(3, Vec3::new(50.0, 0.0, 0.0));
    h.tick();
    assert!(h.world.resource::<SnapshotBuffer>().get(PlayerId(3)).is_none());
    assert_eq!(h.world.resource::<DatagramStats>().departed, 1);

    h.host(HostMessage::PlayerJoined {
        player_id: PlayerId(3),
        initial_data: Vec::new(),
    });
    h.tick();
    let entity = h.remote_entity(3).unwrap();
    assert_eq!(
        h.world.get::<RenderTransform>(entity).unwrap().0.translation,
        Vec3::ZERO
    );

    let position = Vec3::new(-2.0, 1.0, 0.5);
    h.datagram(3, position);
    h.tick();
    assert_eq!(
        h.world.get::<RenderTransform>(entity).unwrap().0.translation,
        position
    );
}

#[test]
fn test_location_for_unknown_player_is_buffered_until_known() {
    let mut h = Harness::new();
    h.connect(1);

    let position = Vec3::new(1.5, -2.25, 4.0);
    h.datagram(9, position);
    h.tick();
    assert!(h.world.resource::<SnapshotBuffer>().get(PlayerId(9)).is_some());
    assert!(h.remote_entity(9).is_none());

    h.host(HostMessage::PlayerJoined {
        player_id: PlayerId(9),
        initial_data: Vec::new(),
    });
    h.tick();

    let entity = h.remote_entity(9).unwrap();
    let render = h.world.get::<RenderTransform>(entity).unwrap();
    assert_eq!(render.0.translation, position);
    assert_eq!(
        h.world.get::<Transform>(entity).unwrap(),
        &Transform::IDENTITY,
        "only the render transform is written"
    );
    assert_eq!(h.world.get::<Name>(entity).unwrap().0, "Guest 9");
}

#[test]
fn test_bad_datagrams_are_counted_and_dropped() {
    let mut h = Harness::new();
    h.connect(2);

    h.push(NetEventKind::Datagram(vec![1, 2, 3]));
    h.inbox.push(
        Epoch(h.epoch().0 - 1),
        NetEventKind::Datagram(encode_location(PlayerId(4), Vec3::ZERO, Quat::IDENTITY).to_vec()),
    );
    h.datagram(2, Vec3::ONE);
    h.tick();

    let stats = *h.world.resource::<DatagramStats>();
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.stale, 1);
    assert_eq!(stats.own, 1);
    assert_eq!(stats.accepted, 0);
    assert!(h.world.resource::<SnapshotBuffer>().is_empty());
}

#[test]
fn test_chat_lines_carry_display_names() {
    let mut h = Harness::new();
    h.connect(1);

    h.host(HostMessage::PlayerJoined {
        player_id: PlayerId(3),
        initial_data: vec![PresenceField::Handle("@carol@example.org".into())],
    });
    h.host(HostMessage::ChatMessage {
        player_id: PlayerId(3),
        text: "hello".into(),
    });
    h.host(HostMessage::ChatMessage {
        player_id: PlayerId(1),
        text: "hi back".into(),
    });
    h.tick();

    let chat = h.world.resource::<ChatLog>();
    let lines: Vec<_> = chat
        .iter()
        .map(|e| (e.sender.as_str(), e.text.as_str()))
        .collect();
    assert_eq!(lines, vec![("carol", "hello"), ("me", "hi back")]);
}

#[test]
fn test_presence_update_renames_avatar() {
    let mut h = Harness::new();
    h.connect(1);

    h.host(HostMessage::PlayerJoined {
        player_id: PlayerId(6),
        initial_data: Vec::new(),
    });
    h.tick();
    h.host(HostMessage::PlayerData {
        player_id: PlayerId(6),
        field: PresenceField::Nickname("dee".into()),
    });
    h.tick();

    let entity = h.remote_entity(6).unwrap();
    assert_eq!(h.world.get::<Name>(entity).unwrap().0, "dee");
}

#[test]
fn test_channel_loss_clears_remote_state() {
    let mut h = Harness::new();
    h.connect(1);
    h.host(HostMessage::PlayerJoined {
        player_id: PlayerId(2),
        initial_data: Vec::new(),
    });
    h.datagram(2, Vec3::X);
    h.tick();
    h.world.resource_mut::<SessionEvents>().drain();

    h.push(NetEventKind::ControlClosed {
        reason: "reset by peer".into(),
    });
    h.tick();

    assert!(h.remote_entity(2).is_none());
    assert!(h.world.resource::<SnapshotBuffer>().is_empty());
    let presence = h.world.resource::<PresenceDirectory>();
    assert!(presence.is_empty());
    assert_eq!(presence.local_player(), None);
    let events = h.world.resource_mut::<SessionEvents>().drain();
    assert!(matches!(
        events.as_slice(),
        [SessionEvent::Lost(reason)] if reason.is_failure()
    ));
}

#[test]
fn test_rejoin_under_new_id_republishes_profile() {
    let mut h = Harness::new();
    h.connect(5);
    h.push(NetEventKind::ControlClosed {
        reason: "timeout".into(),
    });
    h.tick();

    h.world.resource_mut::<Connection>().retry().unwrap();
    h.handshake(6);

    let presence = h.world.resource::<PresenceDirectory>();
    assert_eq!(presence.local_player(), Some(PlayerId(6)));
    assert!(!presence.contains(PlayerId(5)));
    assert_eq!(h.published_nicknames(), 2);
}

#[test]
fn test_publisher_sends_local_avatar_record() {
    let mut h = Harness::new();
    let position = Vec3::new(1.0, 2.0, 3.0);
    h.world
        .spawn((LocalAvatar, Transform::from_translation(position)));
    h.tick();
    assert!(h.datagrams.lock().unwrap().is_empty(), "nothing before connecting");

    h.connect(7);
    let datagrams = h.datagrams.lock().unwrap().clone();
    assert_eq!(datagrams.len(), 1);
    let record = plaza_net::decode_location(&datagrams[0]).unwrap();
    assert_eq!(record.player_id, PlayerId(7));
    assert_eq!(record.position, position);
    assert_eq!(h.world.resource::<LocationPublisher>().sent(), 1);
}

#[test]
fn test_blocked_location_send_is_retried_next_tick() {
    let mut h = Harness::new();
    h.world.spawn((LocalAvatar, Transform::IDENTITY));
    h.blocked.store(true, Ordering::SeqCst);
    h.connect(7);
    assert!(h.datagrams.lock().unwrap().is_empty());
    assert_eq!(h.world.resource::<LocationPublisher>().sent(), 0);

    h.blocked.store(false, Ordering::SeqCst);
    h.tick();
    assert_eq!(h.datagrams.lock().unwrap().len(), 1);
    assert_eq!(h.world.resource::<LocationPublisher>().sent(), 1);
}
