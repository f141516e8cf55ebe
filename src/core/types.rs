use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

/// Device identifier assigned by the vendor, carried in every frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 16-byte shared secret used to derive a device's session keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceToken(pub [u8; 16]);

impl DeviceToken {
    /// Parses a token from its 32-character hex representation
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::config(format!("invalid token hex: {}", e)))?;
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|_| Error::config("token must be 16 bytes"))?;
        Ok(DeviceToken(bytes))
    }

    /// Returns the raw token bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// Static configuration for one known device, supplied at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// The device's identifier
    pub device_id: DeviceId,
    /// The device's shared secret token
    #[serde(serialize_with = "super::serde::serialize_token")]
    #[serde(deserialize_with = "super::serde::deserialize_token")]
    pub token: DeviceToken,
    /// Display name used in logs and discovery reports
    pub name: String,
    /// Disabled devices are never matched or announced
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Mutable per-session identity of a live device
///
/// `addr` and `uptime_offset` are refreshed from inbound traffic;
/// `device_id` and `token` never change after construction.
#[derive(Debug, Clone)]
pub struct DeviceBaseInfo {
    /// The device's identifier
    pub device_id: DeviceId,
    /// The device's shared secret token
    pub token: DeviceToken,
    /// Last-known network address of the device
    pub addr: SocketAddr,
    /// Seconds between the unix epoch and the device's own epoch
    pub uptime_offset: i64,
}

/// Model and firmware metadata reported by `miIO.info`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDetail {
    /// Vendor model string, e.g. `yeelink.light.lamp15`
    pub model: String,
    /// Firmware version
    #[serde(default)]
    pub fw_ver: String,
}

/// Configuration for the device manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Local address to bind the UDP socket to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Address discovery probes are broadcast to
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: SocketAddr,
    /// Known devices
    pub devices: Vec<DeviceConfig>,
    /// Deadline for a single request attempt
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Additional attempts after a failed request
    #[serde(default = "default_request_retries")]
    pub request_retries: u32,
    /// Probe cycles before discovery gives up on missing devices
    #[serde(default = "default_discovery_attempts")]
    pub discovery_attempts: u32,
    /// Settle window after each discovery probe
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    #[serde(default = "default_discovery_settle")]
    pub discovery_settle: Duration,
    /// Expiry for cached property reads
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    #[serde(default = "default_property_cache_ttl")]
    pub property_cache_ttl: Duration,
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:0".parse().unwrap()
}

fn default_broadcast_addr() -> SocketAddr {
    format!("255.255.255.255:{}", super::PROTOCOL_PORT)
        .parse()
        .unwrap()
}

fn default_request_timeout() -> Duration {
    super::REQUEST_TIMEOUT
}

fn default_request_retries() -> u32 {
    super::REQUEST_RETRIES
}

fn default_discovery_attempts() -> u32 {
    super::DISCOVERY_ATTEMPTS
}

fn default_discovery_settle() -> Duration {
    super::DISCOVERY_SETTLE
}

fn default_property_cache_ttl() -> Duration {
    super::PROPERTY_CACHE_TTL
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            bind_addr: default_bind_addr(),
            broadcast_addr: default_broadcast_addr(),
            devices: Vec::new(),
            request_timeout: default_request_timeout(),
            request_retries: default_request_retries(),
            discovery_attempts: default_discovery_attempts(),
            discovery_settle: default_discovery_settle(),
            property_cache_ttl: default_property_cache_ttl(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_hex() {
        let token = DeviceToken::from_hex("00112233445566778899aabbccddeeff").unwrap();
        assert_eq!(token.as_bytes()[0], 0x00);
        assert_eq!(token.as_bytes()[15], 0xff);
    }

    #[test]
    fn test_token_rejects_bad_input() {
        assert!(DeviceToken::from_hex("not hex at all").is_err());
        assert!(DeviceToken::from_hex("00112233").is_err());
        assert!(DeviceToken::from_hex("00112233445566778899aabbccddeeff00").is_err());
    }

    #[test]
    fn test_device_config_deserialization() {
        let json = r#"{
            "device_id": 260426251,
            "token": "ffffffffffffffffffffffffffffffff",
            "name": "Desk Lamp"
        }"#;
        let config: DeviceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.device_id, DeviceId(260426251));
        assert_eq!(config.name, "Desk Lamp");
        assert!(config.enabled);
        assert_eq!(config.token.as_bytes(), &[0xff; 16]);
    }

    #[test]
    fn test_manager_config_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.broadcast_addr.port(), super::super::PROTOCOL_PORT);
        assert_eq!(config.request_timeout, Duration::from_millis(3000));
        assert_eq!(config.request_retries, 2);
        assert_eq!(config.discovery_attempts, 10);
        assert_eq!(config.discovery_settle, Duration::from_millis(3000));
        assert!(config.devices.is_empty());
    }
}
