//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bfdd_core::SessionConfig;
use bfdd_core::packet::AuthenticationType;
use serde::Deserialize;

// On-disk configuration for the bundled `bfdd` binary. This is a thin,
// binary-only wrapper around the core's own config types: the core has no
// opinion on file format, so the format lives here rather than in the
// library. Dampening is configured per session (`SessionConfig::dampening`),
// not at the daemon level.
#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub keys: Vec<KeyEntry>,
    pub sessions: Vec<SessionConfig>,
}

// A keystore entry. `material` is taken as a UTF-8 string for readability in
// the config file; binary key material isn't supported by this format.
#[derive(Debug, Deserialize)]
pub struct KeyEntry {
    pub key_id: u8,
    pub auth_type: AuthenticationType,
    pub material: String,
}
