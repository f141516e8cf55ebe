//! miIO wire protocol implementation
//!
//! This module defines the binary frame layout, the per-device session
//! cipher, and the JSON request/response envelopes carried as payload.

pub mod crypto;
pub mod message;
pub mod packet;

pub use self::crypto::SessionKeys;
pub use self::message::{Request, Response};
pub use self::packet::{Packet, PacketCodec};

// Constants
/// Magic word opening every frame
pub const MAGIC: u16 = 0x2131;

/// Frame header length in bytes
pub const HEADER_LEN: usize = 16;

/// Total length of a payload-less hello frame
pub const HELLO_LEN: usize = 32;

/// The fixed 32-byte discovery probe: magic, length 0x20, then stuffing
pub const HELLO_PACKET: [u8; 32] = [
    0x21, 0x31, 0x00, 0x20, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];
