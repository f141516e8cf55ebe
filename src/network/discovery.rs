use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::core::{
    DeviceBaseInfo, DeviceConfig, DeviceId, Error, ManagerConfig, Result,
};
use crate::device::{Device, RecoveryHook, SessionConfig};
use crate::protocol::Packet;

use super::transport::{Transport, TransportHandle};

/// Configuration for the bounded discovery loop
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Probe cycles before giving up on missing devices
    pub attempts: u32,
    /// Settle window after each probe
    pub settle: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            attempts: crate::core::DISCOVERY_ATTEMPTS,
            settle: crate::core::DISCOVERY_SETTLE,
        }
    }
}

/// Shared state between the manager task and its handles
struct Shared {
    /// Enabled device configurations
    configs: Vec<DeviceConfig>,
    /// Tunables passed to each new session
    session_config: SessionConfig,
    /// Discovery loop tunables
    discovery: DiscoveryConfig,
    /// Handle for sending through the transport
    transport: TransportHandle,
    /// Live sessions keyed by device id
    devices: Mutex<HashMap<DeviceId, Device>>,
}

impl Shared {
    fn devices_lock(&self) -> MutexGuard<'_, HashMap<DeviceId, Device>> {
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Recovery hook handed to sessions: a unicast probe at the address
    /// a timed-out request last used
    fn recovery_hook(&self) -> RecoveryHook {
        let transport = self.transport.clone();
        Arc::new(move |addr: SocketAddr| {
            let transport = transport.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.send_hello(addr).await {
                    debug!("recovery probe to {} failed: {}", addr, e);
                }
            });
        })
    }
}

/// Owns the set of live device sessions and the discovery process
///
/// Inbound frames are routed to their session by device id; hello
/// replies from configured but session-less devices create sessions,
/// which are announced on the device channel once their detail refresh
/// completes. Unconfigured traffic is expected network noise and is
/// ignored.
pub struct DeviceManager {
    /// Shared state
    shared: Arc<Shared>,
    /// Transport, taken by `run`
    transport: Option<Transport>,
    /// Inbound frames from the transport
    packet_rx: mpsc::Receiver<(Packet, SocketAddr)>,
    /// Announcement channel for newly ready sessions
    device_tx: mpsc::Sender<Device>,
}

/// Handle for driving discovery and looking up sessions
#[derive(Clone)]
pub struct ManagerHandle {
    shared: Arc<Shared>,
}

impl DeviceManager {
    /// Binds the transport and wires the manager
    ///
    /// The returned receiver yields each device exactly once, after its
    /// session is created and its detail refresh has completed. Must be
    /// called within a tokio runtime.
    pub fn new(config: ManagerConfig) -> Result<(Self, mpsc::Receiver<Device>)> {
        let (packet_tx, packet_rx) = mpsc::channel(100);
        let (device_tx, device_rx) = mpsc::channel(16);

        let transport = Transport::bind(config.bind_addr, config.broadcast_addr, packet_tx)?;

        let configs: Vec<DeviceConfig> = config
            .devices
            .iter()
            .filter(|d| d.enabled)
            .cloned()
            .collect();
        let disabled = config.devices.len() - configs.len();
        if disabled > 0 {
            debug!("{} configured devices are disabled", disabled);
        }

        let shared = Arc::new(Shared {
            configs,
            session_config: SessionConfig {
                request_timeout: config.request_timeout,
                request_retries: config.request_retries,
                property_cache_ttl: config.property_cache_ttl,
            },
            discovery: DiscoveryConfig {
                attempts: config.discovery_attempts,
                settle: config.discovery_settle,
            },
            transport: transport.handle(),
            devices: Mutex::new(HashMap::new()),
        });

        let manager = DeviceManager {
            shared,
            transport: Some(transport),
            packet_rx,
            device_tx,
        };
        Ok((manager, device_rx))
    }

    /// Returns a handle for discovery and session lookup
    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs the transport and routes inbound frames until shutdown
    pub async fn run(mut self) -> Result<()> {
        if let Some(transport) = self.transport.take() {
            tokio::spawn(transport.run());
        }
        while let Some((packet, src)) = self.packet_rx.recv().await {
            self.handle_packet(packet, src);
        }
        Ok(())
    }

    /// Routes one inbound frame
    pub(crate) fn handle_packet(&self, packet: Packet, src: SocketAddr) {
        if let Some(device) = self.shared.devices_lock().get(&packet.device_id).cloned() {
            device.update_address(src);
            device.handle_packet(&packet);
            return;
        }

        // Only a hello reply may introduce a device
        if !packet.is_hello_reply() {
            debug!("data frame from unknown device {}, ignoring", packet.device_id);
            return;
        }

        let config = match self
            .shared
            .configs
            .iter()
            .find(|c| c.device_id == packet.device_id)
        {
            Some(config) => config.clone(),
            None => {
                debug!("no config for device {}, ignoring", packet.device_id);
                return;
            }
        };

        info!("discovered device {} ({})", packet.device_id, config.name);
        let info = DeviceBaseInfo {
            device_id: packet.device_id,
            token: config.token,
            addr: src,
            uptime_offset: packet.uptime_offset(),
        };
        let device = Device::new(
            config.name,
            info,
            self.shared.transport.clone(),
            self.shared.session_config.clone(),
            self.shared.recovery_hook(),
        );
        self.shared
            .devices_lock()
            .insert(packet.device_id, device.clone());

        // Announce only once the introspection request has answered;
        // the session stays registered either way so later frames route
        let device_tx = self.device_tx.clone();
        tokio::spawn(async move {
            match device.refresh_detail().await {
                Ok(()) => {
                    let _ = device_tx.send(device).await;
                }
                Err(e) => {
                    warn!("{}: detail refresh failed, not announcing: {}", device.name(), e);
                }
            }
        });
    }
}

impl ManagerHandle {
    /// Runs the bounded discovery loop
    ///
    /// Each cycle broadcasts a probe and waits the settle window, then
    /// checks that every enabled configured device has a live session.
    /// Gives up after the configured number of attempts with a
    /// `Discovery` error naming the devices that never replied; the
    /// condition is non-fatal and discovery may simply be run again.
    pub async fn discover(&self) -> Result<()> {
        let attempts = self.shared.discovery.attempts;
        for attempt in 1..=attempts {
            if let Err(e) = self.shared.transport.broadcast_hello().await {
                warn!("discovery broadcast failed: {}", e);
            }
            sleep(self.shared.discovery.settle).await;

            let missing = self.missing_devices();
            if missing.is_empty() {
                info!(
                    "discovery complete, {} devices online",
                    self.shared.configs.len()
                );
                return Ok(());
            }
            debug!(
                "discovery attempt {}/{}: still waiting for {}",
                attempt,
                attempts,
                missing.join(", ")
            );
        }

        let missing = self.missing_devices();
        if missing.is_empty() {
            return Ok(());
        }
        warn!("discovery gave up, missing devices: {}", missing.join(", "));
        Err(Error::Discovery { missing })
    }

    /// Returns the session for a device id, if one exists
    pub fn find_device(&self, id: DeviceId) -> Option<Device> {
        self.shared.devices_lock().get(&id).cloned()
    }

    /// Returns all live sessions
    pub fn devices(&self) -> Vec<Device> {
        self.shared.devices_lock().values().cloned().collect()
    }

    /// Names of enabled configured devices with no live session
    fn missing_devices(&self) -> Vec<String> {
        let devices = self.shared.devices_lock();
        self.shared
            .configs
            .iter()
            .filter(|c| !devices.contains_key(&c.device_id))
            .map(|c| c.name.clone())
            .collect()
    }
}
