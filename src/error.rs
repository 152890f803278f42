//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use tracing::warn;

use crate::packet::{DecodeError, PacketFlags};
use crate::session::SessionId;

// BFD errors.
//
// Policy: the core never crashes on input from the network; every packet
// path can only result in "accepted" or "silently dropped with counter".
// Only `Manager::create_session` paths surface errors upward.
#[derive(Debug)]
pub enum Error {
    // I/O errors.
    IoError(IoError),
    // Inter-task communication.
    SessionIdNotFound(SessionId),
    // Administrative lookup/destroy: no session owns this discriminator.
    SessionNotFound(u32),
    // Packet input: structural decode failure.
    CodecError(DecodeError),
    // Packet input: GTSM TTL/Hop Limit rejection.
    GtsmError { expected: String, actual: u8 },
    // Packet input: authentication failure.
    AuthError(String),
    // Packet input: no session matched the demultiplex key.
    DemuxMiss,
    VersionMismatch(u8),
    InvalidDetectMult(u8),
    InvalidFlags(PacketFlags),
    InvalidMyDiscriminator(u32),
    InvalidYourDiscriminator(u32),
    UdpInvalidSourceAddr(IpAddr),
    // `create_session` errors.
    AllocExhausted,
    PortExhausted,
    DuplicateSession,
    ConfigInvalid(String),
    // Reactor.
    CollaboratorError(String),
    // Benign: signals clean termination.
    Shutdown,
}

// BFD I/O errors.
#[derive(Debug)]
pub enum IoError {
    UdpSocketError(std::io::Error),
    UdpRecvError(std::io::Error),
    UdpSendError(std::io::Error),
    UdpRecvMissingSourceAddr,
    UdpRecvMissingAncillaryData,
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::IoError(error) => error.log(),
            Error::SessionIdNotFound(sess_id) => {
                warn!(?sess_id, "{}", self);
            }
            Error::SessionNotFound(discr) => {
                warn!(%discr, "{}", self);
            }
            Error::CodecError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            Error::GtsmError { expected, actual } => {
                warn!(%expected, %actual, "{}", self);
            }
            Error::AuthError(reason) => {
                warn!(%reason, "{}", self);
            }
            Error::DemuxMiss => {
                warn!("{}", self);
            }
            Error::VersionMismatch(version) => {
                warn!(%version, "{}", self);
            }
            Error::InvalidDetectMult(detect_mult) => {
                warn!(%detect_mult, "{}", self);
            }
            Error::InvalidFlags(flags) => {
                warn!(?flags, "{}", self);
            }
            Error::InvalidMyDiscriminator(discr) => {
                warn!(%discr, "{}", self);
            }
            Error::InvalidYourDiscriminator(discr) => {
                warn!(%discr, "{}", self);
            }
            Error::UdpInvalidSourceAddr(addr) => {
                warn!(address = %addr, "{}", self);
            }
            Error::AllocExhausted
            | Error::PortExhausted
            | Error::DuplicateSession
            | Error::Shutdown => {
                warn!("{}", self);
            }
            Error::ConfigInvalid(reason) => {
                warn!(%reason, "{}", self);
            }
            Error::CollaboratorError(reason) => {
                warn!(%reason, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::SessionIdNotFound(..) => {
                write!(f, "session ID not found")
            }
            Error::SessionNotFound(..) => {
                write!(f, "no session matches the given discriminator")
            }
            Error::CodecError(..) => {
                write!(f, "failed to decode packet")
            }
            Error::GtsmError { .. } => {
                write!(f, "packet rejected by GTSM")
            }
            Error::AuthError(..) => {
                write!(f, "failed to authenticate packet")
            }
            Error::DemuxMiss => {
                write!(f, "failed to find matching session")
            }
            Error::VersionMismatch(..) => {
                write!(f, "packet version mismatch")
            }
            Error::InvalidDetectMult(..) => {
                write!(f, "received invalid detection multiplier")
            }
            Error::InvalidFlags(..) => {
                write!(f, "received invalid flags")
            }
            Error::InvalidMyDiscriminator(..) => {
                write!(f, "received invalid My Discriminator")
            }
            Error::InvalidYourDiscriminator(..) => {
                write!(f, "received invalid Your Discriminator")
            }
            Error::UdpInvalidSourceAddr(..) => {
                write!(f, "invalid source address")
            }
            Error::AllocExhausted => {
                write!(f, "discriminator space exhausted")
            }
            Error::PortExhausted => {
                write!(f, "source port space exhausted")
            }
            Error::DuplicateSession => {
                write!(f, "session already exists")
            }
            Error::ConfigInvalid(reason) => {
                write!(f, "invalid configuration: {reason}")
            }
            Error::CollaboratorError(..) => {
                write!(f, "routing collaborator call failed")
            }
            Error::Shutdown => {
                write!(f, "shutting down")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::CodecError(error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub fn log(&self) {
        match self {
            IoError::UdpSocketError(error)
            | IoError::UdpRecvError(error)
            | IoError::UdpSendError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
            IoError::UdpRecvMissingSourceAddr
            | IoError::UdpRecvMissingAncillaryData => {
                warn!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::UdpSocketError(..) => {
                write!(f, "failed to create UDP socket")
            }
            IoError::UdpRecvError(..) => {
                write!(f, "failed to receive UDP packet")
            }
            IoError::UdpSendError(..) => {
                write!(f, "failed to send UDP packet")
            }
            IoError::UdpRecvMissingSourceAddr => {
                write!(
                    f,
                    "failed to retrieve source address from received packet"
                )
            }
            IoError::UdpRecvMissingAncillaryData => {
                write!(
                    f,
                    "failed to retrieve ancillary data from received packet"
                )
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::UdpSocketError(error)
            | IoError::UdpRecvError(error)
            | IoError::UdpSendError(error) => Some(error),
            _ => None,
        }
    }
}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
