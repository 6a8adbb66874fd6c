//! Approximate device identification.
//!
//! The fingerprint is a 32-bit rolling hash over a handful of client
//! properties. It is an identifier, not a security boundary: collisions are
//! acceptable, spoofing is possible, and the login path treats it only as a
//! device-recognition hint.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, juniper::GraphQLInputObject)]
pub struct DeviceDescriptor {
    pub screen_width: i32,
    pub screen_height: i32,
    pub pixel_ratio: f64,
    pub user_agent: String,
    pub language: String,
    pub platform: String,
    pub timezone: String,
}

/// `h = h * 31 + byte` on a wrapping 32-bit integer.
pub fn rolling_hash(text: &str) -> i32 {
    let mut hash: i32 = 0;
    for byte in text.bytes() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(byte as i32);
    }
    hash
}

fn sanitize_user_agent(user_agent: &str) -> String {
    user_agent
        .chars()
        .take(200)
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Deterministic fingerprint for a device descriptor.
pub fn device_fingerprint(device: &DeviceDescriptor) -> String {
    let device_string = format!(
        "{}_{}_{}_{}_{}_{}_{}",
        device.screen_width,
        device.screen_height,
        device.pixel_ratio,
        sanitize_user_agent(&device.user_agent),
        device.language,
        device.platform,
        device.timezone,
    );

    format!("device_{:x}", rolling_hash(&device_string).unsigned_abs())
}
