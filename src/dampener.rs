//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::config::DampenerConfig;
use crate::debug::Debug;

// RFC 5882 §3.2 exponential-decay penalty state for a single peer.
#[derive(Clone, Debug)]
struct PeerPenalty {
    penalty: f64,
    last_update: DateTime<Utc>,
    suppressed: bool,
    suppressed_since: Option<DateTime<Utc>>,
}

impl PeerPenalty {
    fn new(now: DateTime<Utc>) -> Self {
        PeerPenalty {
            penalty: 0.0,
            last_update: now,
            suppressed: false,
            suppressed_since: None,
        }
    }

    fn decay(&mut self, config: &DampenerConfig, now: DateTime<Utc>) {
        let elapsed = (now - self.last_update).num_milliseconds().max(0) as f64 / 1000.0;
        let half_life = config.half_life_secs as f64;
        if half_life > 0.0 {
            self.penalty *= 2f64.powf(-elapsed / half_life);
        }
        if self.penalty < 0.001 {
            self.penalty = 0.0;
        }
        self.last_update = now;
    }
}

// Penalty-and-decay filter over state-change events, per peer address.
#[derive(Debug, Default)]
pub struct Dampener {
    peers: HashMap<IpAddr, PeerPenalty>,
}

impl Dampener {
    pub fn new() -> Self {
        Self::default()
    }

    // Records a Down event for `peer` and returns whether it is (now)
    // suppressed.
    pub fn record_down(
        &mut self,
        peer: IpAddr,
        config: &DampenerConfig,
        now: DateTime<Utc>,
    ) -> bool {
        if !config.enabled {
            return false;
        }

        let entry = self.peers.entry(peer).or_insert_with(|| PeerPenalty::new(now));
        entry.decay(config, now);
        entry.penalty += 1.0;

        if entry.suppressed {
            if let Some(since) = entry.suppressed_since {
                let max_suppress =
                    chrono::Duration::seconds(config.max_suppress_time_secs as i64);
                if now - since >= max_suppress {
                    entry.suppressed = false;
                    entry.suppressed_since = None;
                    entry.penalty = 0.0;
                    Debug::DampenerClear(&peer).log();
                    return false;
                }
            }
        } else if entry.penalty >= config.suppress_threshold {
            entry.suppressed = true;
            entry.suppressed_since = Some(now);
            Debug::DampenerSuppress(&peer, entry.penalty).log();
        }

        entry.suppressed
    }

    // Records an Up event for `peer` and returns whether it is (now)
    // suppressed.
    pub fn record_up(
        &mut self,
        peer: IpAddr,
        config: &DampenerConfig,
        now: DateTime<Utc>,
    ) -> bool {
        if !config.enabled {
            return false;
        }

        let entry = self.peers.entry(peer).or_insert_with(|| PeerPenalty::new(now));
        entry.decay(config, now);

        if !entry.suppressed {
            return false;
        }

        let since = entry.suppressed_since.unwrap_or(now);
        let max_suppress =
            chrono::Duration::seconds(config.max_suppress_time_secs as i64);
        if now - since >= max_suppress || entry.penalty < config.reuse_threshold {
            entry.suppressed = false;
            entry.suppressed_since = None;
            Debug::DampenerClear(&peer).log();
            return false;
        }

        true
    }

    // Clears a peer's dampening state entirely (e.g. configuration removed).
    pub fn reset(&mut self, peer: IpAddr) {
        self.peers.remove(&peer);
    }

    pub fn penalty(&self, peer: IpAddr) -> f64 {
        self.peers.get(&peer).map(|p| p.penalty).unwrap_or(0.0)
    }

    pub fn is_suppressed(&self, peer: IpAddr) -> bool {
        self.peers.get(&peer).map(|p| p.suppressed).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DampenerConfig {
        DampenerConfig {
            enabled: true,
            suppress_threshold: 3.0,
            reuse_threshold: 2.0,
            max_suppress_time_secs: 60,
            half_life_secs: 15,
        }
    }

    fn peer() -> IpAddr {
        "192.0.2.1".parse().unwrap()
    }

    #[test]
    fn third_rapid_down_is_suppressed() {
        let mut dampener = Dampener::new();
        let config = config();
        let t0 = Utc::now();
        assert!(!dampener.record_down(peer(), &config, t0));
        assert!(!dampener.record_down(peer(), &config, t0));
        assert!(dampener.record_down(peer(), &config, t0));
    }

    #[test]
    fn up_while_suppressed_stays_suppressed() {
        let mut dampener = Dampener::new();
        let config = config();
        let t0 = Utc::now();
        dampener.record_down(peer(), &config, t0);
        dampener.record_down(peer(), &config, t0);
        dampener.record_down(peer(), &config, t0);
        assert!(dampener.is_suppressed(peer()));
        assert!(dampener.record_up(peer(), &config, t0));
    }

    #[test]
    fn clears_after_max_suppress_time() {
        let mut dampener = Dampener::new();
        let config = config();
        let t0 = Utc::now();
        dampener.record_down(peer(), &config, t0);
        dampener.record_down(peer(), &config, t0);
        dampener.record_down(peer(), &config, t0);
        assert!(dampener.is_suppressed(peer()));

        let t1 = t0 + chrono::Duration::seconds(45);
        assert!(!dampener.record_up(peer(), &config, t1));
    }

    #[test]
    fn reset_clears_entry() {
        let mut dampener = Dampener::new();
        let config = config();
        let t0 = Utc::now();
        dampener.record_down(peer(), &config, t0);
        dampener.reset(peer());
        assert_eq!(dampener.penalty(peer()), 0.0);
        assert!(!dampener.is_suppressed(peer()));
    }

    #[test]
    fn decay_halves_penalty_per_half_life() {
        let mut dampener = Dampener::new();
        let config = config();
        let t0 = Utc::now();
        dampener.record_down(peer(), &config, t0);
        let p0 = dampener.penalty(peer());

        let t1 = t0 + chrono::Duration::seconds(config.half_life_secs as i64);
        // Recording a second Down first decays (halving p0), then adds 1.0.
        dampener.record_down(peer(), &config, t1);
        let decayed_before_add = dampener.penalty(peer()) - 1.0;
        assert!((decayed_before_add - p0 / 2.0).abs() < 1e-6);
    }
}
