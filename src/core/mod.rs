//! Core types and constants for the miIO protocol engine
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{
    DeviceBaseInfo,
    DeviceConfig,
    DeviceDetail,
    DeviceId,
    DeviceToken,
    ManagerConfig,
};

use std::time::Duration;

/// UDP port miIO devices listen on
pub const PROTOCOL_PORT: u16 = 54321;

/// Maximum datagram size accepted from the socket
pub const MAX_PACKET_SIZE: usize = 4096;

/// Default deadline for a single request attempt
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default number of additional attempts after a failed request
pub const REQUEST_RETRIES: u32 = 2;

/// Default number of probe cycles before discovery reports missing devices
pub const DISCOVERY_ATTEMPTS: u32 = 10;

/// Default settle window after each discovery probe
pub const DISCOVERY_SETTLE: Duration = Duration::from_millis(3000);

/// Default expiry for cached property reads
pub const PROPERTY_CACHE_TTL: Duration = Duration::from_millis(1000);
