//! Synthetic tag positions around a gateway
//!
//! Tags carry no real positioning data, so the map places each one on a
//! small circle (1-3 m) around its reporting gateway. Radius and base angle
//! come from a SHA-256 digest of the tag MAC; changing the hash moves every
//! tag on every map.

use sha2::{Digest, Sha256};
use std::f64::consts::PI;

/// Meters per degree of latitude (flat-earth approximation)
pub const METERS_PER_DEGREE: f64 = 111_000.0;

/// Angular step between successive tags of the same gateway, radians
pub const ORDINAL_ANGLE_STEP: f64 = 0.5;

/// Digest of the tag MAC, read as a big-endian 256-bit integer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacHash([u8; 32]);

impl MacHash {
    pub fn of(tag_mac: &str) -> Self {
        Self(Sha256::digest(tag_mac.as_bytes()).into())
    }

    /// `hash mod modulus` over the full 256-bit value
    pub fn modulo(&self, modulus: u32) -> u32 {
        let m = u64::from(modulus);
        self.0.iter().fold(0u64, |acc, &byte| (acc * 256 + u64::from(byte)) % m) as u32
    }
}

/// Distance (meters) and angle (radians) of a tag relative to its gateway
pub fn polar_offset(tag_mac: &str, ordinal_index: u32) -> (f64, f64) {
    let hash = MacHash::of(tag_mac);
    let distance_meters = 1.0 + f64::from(hash.modulo(200)) / 100.0;
    let angle_rad =
        f64::from(hash.modulo(360)) * (PI / 180.0) + f64::from(ordinal_index) * ORDINAL_ANGLE_STEP;
    (distance_meters, angle_rad)
}

/// Place a tag near its gateway
///
/// Pure and deterministic. Callers must only invoke it for gateways that have
/// a geolocation.
pub fn synthesize(gateway_lat: f64, gateway_lon: f64, tag_mac: &str, ordinal_index: u32) -> (f64, f64) {
    let (distance_meters, angle_rad) = polar_offset(tag_mac, ordinal_index);

    let lat_offset = (distance_meters / METERS_PER_DEGREE) * angle_rad.cos();
    let lon_offset = (distance_meters / (METERS_PER_DEGREE * gateway_lat.to_radians().cos()))
        * angle_rad.sin();

    (gateway_lat + lat_offset, gateway_lon + lon_offset)
}
