//! Per-device session management
//!
//! A session represents one known device and multiplexes concurrent
//! logical requests over the single UDP conversation with it, keyed by
//! request id.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::core::{DeviceBaseInfo, DeviceDetail, DeviceId, DeviceToken, Error, Result};
use crate::network::TransportHandle;
use crate::protocol::{Packet, Request, Response, SessionKeys};
use crate::util::TtlCache;

/// Callback invoked with the device's last-known address when a request
/// deadline expires
///
/// The manager wires this to a unicast probe so a session can relearn a
/// changed address without owning any probe logic itself.
pub type RecoveryHook = Arc<dyn Fn(SocketAddr) + Send + Sync>;

/// Tunables for one device session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Deadline for a single request attempt
    pub request_timeout: Duration,
    /// Additional attempts after a failed request
    pub request_retries: u32,
    /// Expiry for cached property reads
    pub property_cache_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            request_timeout: crate::core::REQUEST_TIMEOUT,
            request_retries: crate::core::REQUEST_RETRIES,
            property_cache_ttl: crate::core::PROPERTY_CACHE_TTL,
        }
    }
}

/// Shared state between session handles
struct Shared {
    /// Display name from configuration
    name: String,
    /// The device's identifier
    device_id: DeviceId,
    /// The device's shared secret token
    token: DeviceToken,
    /// Session keys derived once from the token
    keys: SessionKeys,
    /// Handle for sending frames
    transport: TransportHandle,
    /// Session tunables
    config: SessionConfig,
    /// Invoked on request timeout with the last-known address
    recovery: RecoveryHook,
    /// Mutable session state
    state: Mutex<State>,
    /// Cached property reads
    cache: Mutex<TtlCache<String, Value>>,
}

/// Inner mutable state
struct State {
    /// Last-known device address, refreshed from validated inbound frames
    addr: SocketAddr,
    /// Seconds between the unix epoch and the device's own epoch
    uptime_offset: i64,
    /// Model and firmware metadata once `miIO.info` has answered
    detail: Option<DeviceDetail>,
    /// Outstanding requests keyed by id
    pending: HashMap<u32, oneshot::Sender<Response>>,
    /// Request id counter, randomly seeded per session
    next_id: u32,
}

impl State {
    /// Allocates the next request id, skipping zero and any id that
    /// still has an outstanding request
    fn alloc_request_id(&mut self) -> u32 {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id != 0 && !self.pending.contains_key(&self.next_id) {
                return self.next_id;
            }
        }
    }
}

/// Session handle for one known device
#[derive(Clone)]
pub struct Device {
    shared: Arc<Shared>,
}

impl Device {
    /// Creates a new session from a config-supplied identity
    pub fn new(
        name: impl Into<String>,
        info: DeviceBaseInfo,
        transport: TransportHandle,
        config: SessionConfig,
        recovery: RecoveryHook,
    ) -> Self {
        let keys = SessionKeys::derive(&info.token);
        let cache_ttl = config.property_cache_ttl;
        let next_id = rand::thread_rng().gen_range(1u32..=0x00ff_ffff);

        Device {
            shared: Arc::new(Shared {
                name: name.into(),
                device_id: info.device_id,
                token: info.token,
                keys,
                transport,
                config,
                recovery,
                state: Mutex::new(State {
                    addr: info.addr,
                    uptime_offset: info.uptime_offset,
                    detail: None,
                    pending: HashMap::new(),
                    next_id,
                }),
                cache: Mutex::new(TtlCache::new(cache_ttl)),
            }),
        }
    }

    /// The device's identifier
    pub fn id(&self) -> DeviceId {
        self.shared.device_id
    }

    /// The device's configured display name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Vendor model string, or `unknown` before detail refresh
    pub fn model(&self) -> String {
        self.state()
            .detail
            .as_ref()
            .map(|d| d.model.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Model and firmware metadata, if `miIO.info` has answered
    pub fn detail(&self) -> Option<DeviceDetail> {
        self.state().detail.clone()
    }

    /// Snapshot of the session's mutable identity
    pub fn base_info(&self) -> DeviceBaseInfo {
        let state = self.state();
        DeviceBaseInfo {
            device_id: self.shared.device_id,
            token: self.shared.token,
            addr: state.addr,
            uptime_offset: state.uptime_offset,
        }
    }

    /// Number of requests currently awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.state().pending.len()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cache(&self) -> MutexGuard<'_, TtlCache<String, Value>> {
        self.shared.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sends one request and awaits its response
    ///
    /// Fails with `Error::Timeout` when no matching response arrives
    /// within the deadline; the pending entry is removed and the recovery
    /// hook is invoked with the last-known address. Fails with
    /// `Error::Network` when the socket refuses the send. No retry
    /// happens here.
    pub async fn send(&self, method: &str, params: Value) -> Result<Response> {
        let (id, addr, uptime_offset) = {
            let mut state = self.state();
            let id = state.alloc_request_id();
            (id, state.addr, state.uptime_offset)
        };

        let request = Request::new(id, method, params);
        let payload = serde_json::to_string(&request)
            .map_err(|e| Error::protocol(format!("failed to serialize request: {}", e)))?;
        debug!("{} -> {}", self.shared.name, payload);

        let packet = Packet::build(
            self.shared.device_id,
            uptime_offset,
            &self.shared.token,
            &self.shared.keys,
            &payload,
        );

        let (tx, rx) = oneshot::channel();
        self.state().pending.insert(id, tx);

        if let Err(e) = self.shared.transport.send_to(&packet.to_bytes(), addr).await {
            self.state().pending.remove(&id);
            return Err(e);
        }

        match timeout(self.shared.config.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::protocol("response channel closed")),
            Err(_) => {
                self.state().pending.remove(&id);
                (self.shared.recovery)(addr);
                Err(Error::Timeout)
            }
        }
    }

    /// Sends a request, retrying failed attempts
    ///
    /// Every attempt is fully independent: fresh id, fresh deadline. The
    /// final failure is surfaced once all attempts are exhausted.
    pub async fn send_retried(&self, method: &str, params: Value) -> Result<Response> {
        let attempts = self.shared.config.request_retries + 1;
        let mut last_error = Error::Timeout;
        for attempt in 1..=attempts {
            match self.send(method, params.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(
                        "{}: {} attempt {}/{} failed: {}",
                        self.shared.name, method, attempt, attempts, e
                    );
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Reads one property, absorbing all failures into `None`
    pub async fn get_prop(&self, prop: &str) -> Option<Value> {
        self.get_props(&[prop]).await?.into_iter().next()
    }

    /// Reads several properties in one request, absorbing all failures
    /// into `None`
    pub async fn get_props(&self, props: &[&str]) -> Option<Vec<Value>> {
        match self.send_retried("get_prop", json!(props)).await {
            Ok(response) => match response.result {
                Value::Array(values) => Some(values),
                other => {
                    warn!("{}: unexpected get_prop result: {}", self.shared.name, other);
                    None
                }
            },
            Err(e) => {
                warn!("{}: property read failed: {}", self.shared.name, e);
                None
            }
        }
    }

    /// Reads one property through the TTL cache
    ///
    /// The cache is consulted before any request is dispatched; a fresh
    /// value is stored on success only.
    pub async fn get_prop_cached(&self, prop: &str) -> Option<Value> {
        if let Some(value) = self.cache().get(&prop.to_string()) {
            return Some(value);
        }
        let value = self.get_prop(prop).await?;
        self.cache().insert(prop.to_string(), value.clone());
        Some(value)
    }

    /// Fetches and stores the device's model and firmware metadata
    pub async fn refresh_detail(&self) -> Result<()> {
        let response = self.send_retried("miIO.info", json!([])).await?;
        let detail: DeviceDetail = serde_json::from_value(response.result)
            .map_err(|e| Error::protocol(format!("unparseable miIO.info result: {}", e)))?;
        debug!(
            "{}: model {} firmware {}",
            self.shared.name, detail.model, detail.fw_ver
        );
        self.state().detail = Some(detail);
        Ok(())
    }

    /// Trusts the most recent validated sender address
    pub(crate) fn update_address(&self, addr: SocketAddr) {
        let mut state = self.state();
        if state.addr != addr {
            debug!("{}: address changed {} -> {}", self.shared.name, state.addr, addr);
            state.addr = addr;
        }
    }

    /// Handles one inbound frame already matched to this device
    ///
    /// Hello replies refresh the cached uptime offset only. Data frames
    /// are decrypted and correlated with a pending request; anything that
    /// fails to validate or parse is logged and dropped, never escalated.
    pub(crate) fn handle_packet(&self, packet: &Packet) {
        if packet.is_hello_reply() {
            self.state().uptime_offset = packet.uptime_offset();
            return;
        }

        self.state().uptime_offset = packet.uptime_offset();
        let payload = match packet.decrypt(&self.shared.token, &self.shared.keys) {
            Some(payload) => payload,
            None => {
                warn!(
                    "{}: dropping frame with bad checksum or ciphertext",
                    self.shared.name
                );
                return;
            }
        };
        debug!("{} <- {}", self.shared.name, payload);

        let response: Response = match serde_json::from_str(&payload) {
            Ok(response) => response,
            Err(e) => {
                warn!("{}: unparseable response payload: {}", self.shared.name, e);
                return;
            }
        };

        match self.state().pending.remove(&response.id) {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!(
                "{}: response {} matches no pending request",
                self.shared.name, response.id
            ),
        }
    }
}
