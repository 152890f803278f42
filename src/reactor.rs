//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::config::DampenerConfig;
use crate::dampener::Dampener;
use crate::debug::Debug;
use crate::packet::{DiagnosticCode, State};

// A single emitted session state transition (produced by the Manager,
// consumed by the Reactor).
#[derive(Clone, Debug)]
pub struct StateChange {
    pub local_discr: u32,
    pub peer_ip: IpAddr,
    pub old_state: State,
    pub new_state: State,
    pub diag: DiagnosticCode,
    // The dampening parameters configured for the session that produced
    // this change, carried per-event since each peer can dampen
    // differently (§4.6 `dampening` is a per-session option).
    pub dampening: DampenerConfig,
    pub timestamp: DateTime<Utc>,
}

// Abstract routing-protocol collaborator consumed by the Reactor. The
// concrete implementation (BGP, static routes, ...) lives outside this
// core; this core only needs the two operations below.
pub trait RoutingCollaborator: std::fmt::Debug + Send + Sync {
    fn disable_peer(&self, address: IpAddr, reason: &str);
    fn enable_peer(&self, address: IpAddr);
}

// IANA "BFD Down" Cease subcode, assigned by RFC 9384.
const CEASE_SUBCODE_BFD_DOWN: u8 = 10;

fn cease_reason(diag: DiagnosticCode) -> String {
    format!(
        "BFD Down (RFC 9384 Cease/{CEASE_SUBCODE_BFD_DOWN}): diag={diag:?}"
    )
}

// Consumes state changes from the Manager's channel, applies dampening, and
// drives the routing collaborator. Each peer is dampened against the
// parameters its own session was configured with, carried on the
// `StateChange` itself; the Reactor only owns the per-peer penalty state.
pub struct Reactor {
    rx: mpsc::Receiver<StateChange>,
    collaborator: Box<dyn RoutingCollaborator>,
    dampener: Dampener,
}

// What the Reactor decided to do with a given state change, before
// consulting the Dampener. Exposed for testability.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    PeerDown,
    PeerUp,
    Ignore,
}

impl Reactor {
    pub fn new(
        rx: mpsc::Receiver<StateChange>,
        collaborator: Box<dyn RoutingCollaborator>,
    ) -> Self {
        Reactor {
            rx,
            collaborator,
            dampener: Dampener::new(),
        }
    }

    // Classifies a transition per §4.7: only a loss of a previously
    // operational session, or a recovery to Up, is actionable.
    pub fn classify(old_state: State, new_state: State) -> Action {
        match (old_state, new_state) {
            (State::Up, State::Down) | (State::Init, State::Down) => {
                Action::PeerDown
            }
            (_, State::Up) if old_state != State::Up => Action::PeerUp,
            _ => Action::Ignore,
        }
    }

    // Drains the channel until it is closed, applying one state change at a
    // time. Intended to run as its own task.
    pub async fn run(mut self) {
        while let Some(change) = self.rx.recv().await {
            self.handle(change);
        }
    }

    fn handle(&mut self, change: StateChange) {
        match Self::classify(change.old_state, change.new_state) {
            Action::PeerDown => {
                let suppressed = self.dampener.record_down(
                    change.peer_ip,
                    &change.dampening,
                    change.timestamp,
                );
                if suppressed {
                    return;
                }
                let reason = cease_reason(change.diag);
                Debug::ReactorAction(&change.peer_ip, "disable_peer").log();
                self.collaborator.disable_peer(change.peer_ip, &reason);
            }
            Action::PeerUp => {
                let suppressed = self.dampener.record_up(
                    change.peer_ip,
                    &change.dampening,
                    change.timestamp,
                );
                if suppressed {
                    return;
                }
                Debug::ReactorAction(&change.peer_ip, "enable_peer").log();
                self.collaborator.enable_peer(change.peer_ip);
            }
            Action::Ignore => {}
        }
    }
}
