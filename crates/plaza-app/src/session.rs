//! Composition root: one world, its schedules, and the reconnection policy.
//!
//! The connection manager never retries by itself. [`Session::step`] runs a
//! simulation tick, then reads the [`SessionEvents`] the tick produced: a
//! failure arms the [`ReconnectScheduler`], a join resets it, and a due
//! attempt calls `retry` on the manager.

use std::time::{Duration, Instant};

use bevy_ecs::prelude::*;
use plaza_config::{Config, ReconnectSettings};
use plaza_ecs::{EngineSchedules, Name, TimeRes, Transform, create_world, validate_schedules};
use plaza_editor::EditorSettings;
use plaza_multiplayer::{
    Connection, LocalAvatar, LocalProfile, MultiplayerSettings, PresenceDirectory, SessionEvent,
    SessionEvents,
};
use plaza_net::{
    ConnectionError, ConnectionManager, ControlMessage, ControlChannel, FrameConfig, MediaDevice, NetworkInbox,
    ReconnectConfig, ReconnectScheduler, TcpControlChannel, UdpMediaDevice, network_inbox,
};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// The running client.
pub struct Session {
    world: World,
    schedules: EngineSchedules,
    reconnect: ReconnectScheduler,
}

impl Session {
    /// Client with the TCP control channel and UDP data device, both running
    /// their I/O on `runtime`.
    pub fn new(config: &Config, runtime: Handle) -> Self {
        let (sender, inbox) = network_inbox();
        let frame = FrameConfig::with_max_payload(config.network.max_frame_size);
        let channel = TcpControlChannel::new(runtime.clone(), sender.clone(), frame);
        let device = UdpMediaDevice::new(runtime, sender);
        Self::with_transports(config, Box::new(channel), Box::new(device), inbox)
    }

    /// Client over caller-provided transports.
    pub fn with_transports(
        config: &Config,
        channel: Box<dyn ControlChannel>,
        device: Box<dyn MediaDevice>,
        inbox: NetworkInbox,
    ) -> Self {
        let mut world = create_world();
        let mut schedules = EngineSchedules::new();

        plaza_multiplayer::install(
            &mut world,
            &mut schedules,
            multiplayer_settings(config),
            ConnectionManager::new(channel, device),
            inbox,
        );
        plaza_editor::install(
            &mut world,
            &mut schedules,
            EditorSettings {
                reconcile_interval: Duration::from_millis(config.editor.reconcile_interval_ms),
            },
        );
        validate_schedules(&mut schedules, &mut world);

        world.spawn((LocalAvatar, Transform::IDENTITY, Name("local".to_string())));

        Self {
            world,
            schedules,
            reconnect: ReconnectScheduler::new(reconnect_config(&config.reconnect)),
        }
    }

    /// Connect to `host_address` and join `world_uri`.
    pub fn connect(&mut self, world_uri: &str, host_address: &str) -> Result<(), ConnectionError> {
        self.reconnect.cancel();
        self.world
            .resource_mut::<Connection>()
            .connect(world_uri, host_address)
    }

    /// Run one simulation tick of `dt` seconds, then apply the reconnection
    /// policy to what the tick reported.
    pub fn step(&mut self, dt: f64) {
        self.schedules.run(&mut self.world, dt);
        let now = self.world.resource::<TimeRes>().now;
        self.supervise(now);
    }

    /// Take a reloaded config. Profile changes are published at once when
    /// joined; network and editor settings apply on the next start.
    pub fn apply_config(&mut self, config: &Config) {
        let profile = local_profile(config);
        if self.world.resource::<PresenceDirectory>().profile() == &profile {
            return;
        }
        let fields = self
            .world
            .resource_mut::<PresenceDirectory>()
            .set_profile(profile);
        info!(fields = fields.len(), "local profile changed");
        let mut connection = self.world.resource_mut::<Connection>();
        for field in fields {
            if let Err(e) = connection.send(ControlMessage::PlayerData(field)) {
                warn!(error = %e, "could not publish profile change");
            }
        }
    }

    /// Close the connection. Does not arm a reconnection.
    pub fn shutdown(&mut self) {
        self.reconnect.cancel();
        self.world.resource_mut::<Connection>().close();
    }

    /// The simulation world.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// The simulation world, mutably.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Reconnection state.
    pub fn reconnect(&self) -> &ReconnectScheduler {
        &self.reconnect
    }

    fn supervise(&mut self, now: Instant) {
        let events = self.world.resource_mut::<SessionEvents>().drain();
        for event in events {
            match event {
                SessionEvent::Joined(player) => {
                    info!(%player, "session established");
                    self.reconnect.on_connected();
                }
                SessionEvent::Lost(reason) if reason.is_failure() => {
                    if let Err(e) = self.reconnect.on_failure(now) {
                        error!(%e, %reason, "connection lost for good");
                    }
                }
                SessionEvent::Lost(reason) => {
                    debug!(%reason, "session ended without failure");
                    self.reconnect.cancel();
                }
            }
        }

        if self.reconnect.poll(now) {
            info!(attempt = self.reconnect.attempts(), "reconnecting");
            if let Err(e) = self.world.resource_mut::<Connection>().retry() {
                warn!(%e, "reconnection attempt failed to start");
            }
        }
    }
}

fn multiplayer_settings(config: &Config) -> MultiplayerSettings {
    MultiplayerSettings {
        publish_rate_hz: config.network.publish_rate_hz,
        profile: local_profile(config),
        ..Default::default()
    }
}

fn local_profile(config: &Config) -> LocalProfile {
    LocalProfile {
        handle: config.profile.handle.clone(),
        nickname: config.profile.nickname.clone(),
        avatar_uri: config.profile.avatar_uri.clone(),
    }
}

/// Millisecond settings to the scheduler's config.
pub fn reconnect_config(settings: &ReconnectSettings) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(settings.initial_delay_ms),
        backoff_multiplier: settings.backoff_multiplier,
        max_delay: Duration::from_millis(settings.max_delay_ms),
        max_attempts: settings.max_attempts,
        jitter: settings.jitter,
    }
}
