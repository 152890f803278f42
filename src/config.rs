//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// Implementation floor for the negotiated Tx interval (RFC 5880 leaves the
// exact minimum to the implementation).
pub const MIN_SUPPORTED_INTERVAL: u32 = 50_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SessionType {
    SingleHop,
    MultiHop,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SessionRole {
    Active,
    Passive,
}

// Configuration options recognized by the core for a single session.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct SessionConfig {
    pub peer_addr: IpAddr,
    pub local_addr: IpAddr,
    pub interface: Option<String>,
    pub session_type: SessionType,
    pub role: SessionRole,
    pub desired_min_tx_interval: u32,
    pub required_min_rx_interval: u32,
    pub detect_multiplier: u8,
    pub tx_ttl: Option<u8>,
    pub rx_ttl: Option<u8>,
    pub dampening: DampenerConfig,
    // Keystore entry used to sign/verify packets for this session. `None`
    // means the session runs without authentication.
    pub auth_key_id: Option<u8>,
}

// RFC 5882 §3.2 exponential-decay dampening parameters.
#[derive(Clone, Copy, Debug)]
#[derive(Deserialize, Serialize)]
pub struct DampenerConfig {
    pub enabled: bool,
    pub suppress_threshold: f64,
    pub reuse_threshold: f64,
    pub max_suppress_time_secs: u64,
    pub half_life_secs: u64,
}

impl Default for DampenerConfig {
    fn default() -> Self {
        DampenerConfig {
            enabled: true,
            suppress_threshold: 3.0,
            reuse_threshold: 2.0,
            max_suppress_time_secs: 60,
            half_life_secs: 15,
        }
    }
}

impl SessionConfig {
    // Validates the configuration per the rules of §4.6 "Create":
    // `detect_mult >= 1`, single-hop role must be active with a bound
    // interface, and `desired_min_tx_interval` must not be below the
    // implementation floor.
    pub fn validate(&self) -> Result<(), Error> {
        if self.detect_multiplier == 0 {
            return Err(Error::ConfigInvalid(
                "detect_multiplier must be at least 1".to_string(),
            ));
        }
        if self.desired_min_tx_interval < MIN_SUPPORTED_INTERVAL {
            return Err(Error::ConfigInvalid(format!(
                "desired_min_tx_interval must be at least {MIN_SUPPORTED_INTERVAL} microseconds"
            )));
        }
        if self.session_type == SessionType::SingleHop {
            if self.role != SessionRole::Active {
                return Err(Error::ConfigInvalid(
                    "single-hop sessions must use the active role".to_string(),
                ));
            }
            if self.interface.as_deref().unwrap_or("").is_empty() {
                return Err(Error::ConfigInvalid(
                    "single-hop sessions require an interface".to_string(),
                ));
            }
        }
        Ok(())
    }
}
