//! miIO local: a cloud-free protocol engine for miIO smart-home devices
//!
//! This library speaks the miIO UDP binary protocol directly to devices on
//! the local network: it broadcasts discovery probes, matches replies to
//! configured device identities, and multiplexes encrypted request/response
//! conversations per device.
//!
//! ```rust,no_run
//! use miio_local::{DeviceManager, ManagerConfig};
//!
//! # async fn demo() -> miio_local::Result<()> {
//! let config: ManagerConfig = serde_json::from_str(r#"{
//!     "devices": [{
//!         "device_id": 260426251,
//!         "token": "00112233445566778899aabbccddeeff",
//!         "name": "Desk Lamp"
//!     }]
//! }"#).unwrap();
//!
//! let (manager, mut devices) = DeviceManager::new(config)?;
//! let handle = manager.handle();
//! tokio::spawn(manager.run());
//!
//! if let Err(e) = handle.discover().await {
//!     eprintln!("{}", e);
//! }
//! while let Some(device) = devices.recv().await {
//!     println!("{} is a {}", device.name(), device.model());
//!     if let Some(power) = device.get_prop("power").await {
//!         println!("power: {}", power);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;

pub mod device;
pub mod network;
pub mod protocol;
mod util;

// Re-export commonly used items
pub use self::core::{
    DeviceConfig, DeviceDetail, DeviceId, DeviceToken, Error, ManagerConfig, Result,
};
pub use device::Device;
pub use network::{DeviceManager, ManagerHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
