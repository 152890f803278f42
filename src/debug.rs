//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use tracing::{debug, debug_span};

use crate::packet::State;
use crate::session::SessionKey;

// BFD debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    SessionCreate(&'a SessionKey),
    SessionDestroy(&'a SessionKey),
    FsmTransition(&'a SessionKey, State, State),
    DetectionTimeExpiry(&'a SessionKey),
    PollSequenceStart(&'a SessionKey),
    PollSequenceTerminate(&'a SessionKey),
    DampenerSuppress(&'a IpAddr, f64),
    DampenerClear(&'a IpAddr),
    ReactorAction(&'a IpAddr, &'a str),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub fn log(&self) {
        match self {
            Debug::SessionCreate(sess_key)
            | Debug::SessionDestroy(sess_key) => {
                debug_span!("session", key = ?sess_key).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::FsmTransition(sess_key, old_state, new_state) => {
                debug_span!("session", key = ?sess_key).in_scope(|| {
                    debug!(?old_state, ?new_state, "{}", self);
                });
            }
            Debug::DetectionTimeExpiry(sess_key) => {
                debug_span!("session", key = ?sess_key).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::PollSequenceStart(sess_key)
            | Debug::PollSequenceTerminate(sess_key) => {
                debug_span!("session", key = ?sess_key).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::DampenerSuppress(peer, penalty) => {
                debug_span!("dampener", %peer).in_scope(|| {
                    debug!(%penalty, "{}", self);
                });
            }
            Debug::DampenerClear(peer) => {
                debug_span!("dampener", %peer).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::ReactorAction(peer, action) => {
                debug_span!("reactor", %peer).in_scope(|| {
                    debug!(%action, "{}", self);
                });
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::SessionCreate(..) => write!(f, "session created"),
            Debug::SessionDestroy(..) => write!(f, "session destroyed"),
            Debug::FsmTransition(..) => write!(f, "state transition"),
            Debug::DetectionTimeExpiry(..) => {
                write!(f, "detection timer expired")
            }
            Debug::PollSequenceStart(..) => write!(f, "poll sequence started"),
            Debug::PollSequenceTerminate(..) => {
                write!(f, "poll sequence terminated")
            }
            Debug::DampenerSuppress(..) => write!(f, "peer suppressed"),
            Debug::DampenerClear(..) => write!(f, "suppression cleared"),
            Debug::ReactorAction(..) => write!(f, "collaborator action applied"),
        }
    }
}
