//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

thread_local! {
    static TLS_BUF: RefCell<BytesMut> = RefCell::new(BytesMut::with_capacity(64));
}

//
// Generic BFD Control Packet Format.
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |Vers |  Diag   |Sta|P|F|C|A|D|M|  Detect Mult  |    Length     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       My Discriminator                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                      Your Discriminator                       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                    Desired Min TX Interval                    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                   Required Min RX Interval                    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                 Required Min Echo RX Interval                 |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                      Auth Section (optional)                  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Packet {
    pub version: u8,
    pub diag: u8,
    pub state: State,
    pub flags: PacketFlags,
    pub detect_mult: u8,
    pub my_discr: u32,
    pub your_discr: u32,
    pub desired_min_tx: u32,
    pub req_min_rx: u32,
    pub req_min_echo_rx: u32,
    pub auth: Option<AuthSection>,
}

// BFD session state, per RFC 5880 §4.1.
#[derive(Clone, Copy, Debug, Default, Eq, FromPrimitive, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum State {
    #[default]
    AdminDown = 0,
    Down = 1,
    Init = 2,
    Up = 3,
}

// BFD Diagnostic Codes.
//
// IANA registry:
// https://www.iana.org/assignments/bfd-parameters/bfd-parameters.xhtml#bfd-parameters-1
#[derive(Clone, Copy, Debug, Default, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DiagnosticCode {
    #[default]
    Nothing = 0,
    ControlTimeExpired = 1,
    EchoFailed = 2,
    NeighborDown = 3,
    ForwardingPlaneReset = 4,
    PathDown = 5,
    ConcatPathDown = 6,
    AdminDown = 7,
    ReverseConcatPathDown = 8,
    MisConnectivity = 9,
}

// BFD Authentication Types.
//
// IANA registry:
// https://www.iana.org/assignments/bfd-parameters/bfd-parameters.xhtml#bfd-parameters-2
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AuthenticationType {
    SimplePassword = 1,
    KeyedMd5 = 2,
    MeticulousKeyedMd5 = 3,
    KeyedSha1 = 4,
    MeticulousKeyedSha1 = 5,
}

impl AuthenticationType {
    pub fn is_meticulous(&self) -> bool {
        matches!(
            self,
            AuthenticationType::MeticulousKeyedMd5
                | AuthenticationType::MeticulousKeyedSha1
        )
    }
}

// The BFD authentication section (RFC 5880 §4.2/§4.3/§4.4).
//
// `data` carries the password bytes for Simple Password, or the raw digest
// bytes (16 for MD5, 20 for SHA1) for the keyed variants. The sequence
// number is absent (and zero) for Simple Password.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct AuthSection {
    pub auth_type: AuthenticationType,
    pub key_id: u8,
    pub seq_num: u32,
    pub data: Vec<u8>,
}

// BFD packet flags.
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct PacketFlags: u8 {
        const P = 1 << 5;
        const F = 1 << 4;
        const C = 1 << 3;
        const A = 1 << 2;
        const D = 1 << 1;
        const M = 1 << 0;
    }
}

// BFD decode errors.
#[derive(Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    IncompletePacket,
    InvalidVersion(u8),
    InvalidPacketLength(u8),
    InvalidAuthenticationLength(u8),
    InvalidDetectMult(u8),
    InvalidMyDiscriminator(u32),
    InvalidFlags(PacketFlags),
    InvalidAuthenticationType(u8),
    ReadOutOfBounds,
}

// ===== impl Packet =====

impl Packet {
    pub const VERSION: u8 = 1;
    pub const MANDATORY_SECTION_LEN: u8 = 24;

    // Encodes the BFD packet into a bytes buffer.
    //
    // Writes exactly 24 bytes when no authentication section is present;
    // more when it is.
    pub fn encode(&self) -> BytesMut {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            buf.put_u8((self.version << 5) | self.diag);
            buf.put_u8(((self.state as u8) << 6) | self.flags.bits());
            buf.put_u8(self.detect_mult);
            // The length is patched in once the full frame is known.
            buf.put_u8(0);
            buf.put_u32(self.my_discr);
            buf.put_u32(self.your_discr);
            buf.put_u32(self.desired_min_tx);
            buf.put_u32(self.req_min_rx);
            buf.put_u32(self.req_min_echo_rx);

            if let Some(auth) = &self.auth {
                buf.put_u8(auth.auth_type as u8);
                let auth_len = match auth.auth_type {
                    AuthenticationType::SimplePassword => {
                        3 + auth.data.len() as u8
                    }
                    AuthenticationType::KeyedMd5
                    | AuthenticationType::MeticulousKeyedMd5 => 24,
                    AuthenticationType::KeyedSha1
                    | AuthenticationType::MeticulousKeyedSha1 => 28,
                };
                buf.put_u8(auth_len);
                buf.put_u8(auth.key_id);
                match auth.auth_type {
                    AuthenticationType::SimplePassword => {
                        buf.put_slice(&auth.data);
                    }
                    _ => {
                        buf.put_u32(auth.seq_num);
                        buf.put_slice(&auth.data);
                    }
                }
            }

            buf[3] = buf.len() as u8;
            buf.clone()
        })
    }

    // Decodes a BFD packet from a bytes buffer, applying the structural
    // validation rules of RFC 5880 §6.8.6 step 1.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = Bytes::copy_from_slice(data);

        if data.len() < Self::MANDATORY_SECTION_LEN as _ {
            return Err(DecodeError::IncompletePacket);
        }

        let first_byte = buf.try_get_u8()?;
        let sec_byte = buf.try_get_u8()?;
        let version = first_byte >> 5;
        if version != Self::VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }
        let diag = first_byte & 0x1F;
        let state = State::from_u8(sec_byte >> 6).unwrap();
        let flags = PacketFlags::from_bits_truncate(sec_byte & 0x3F);
        let detect_mult = buf.try_get_u8()?;
        let length = buf.try_get_u8()?;
        if flags.contains(PacketFlags::A) {
            if length < Self::MANDATORY_SECTION_LEN + 2 {
                return Err(DecodeError::InvalidPacketLength(length));
            }
        } else if length < Self::MANDATORY_SECTION_LEN {
            return Err(DecodeError::InvalidPacketLength(length));
        }
        if length as usize > data.len() {
            return Err(DecodeError::InvalidPacketLength(length));
        }
        if detect_mult == 0 {
            return Err(DecodeError::InvalidDetectMult(detect_mult));
        }
        if flags.contains(PacketFlags::M) {
            return Err(DecodeError::InvalidFlags(flags));
        }
        let my_discr = buf.try_get_u32()?;
        if my_discr == 0 {
            return Err(DecodeError::InvalidMyDiscriminator(my_discr));
        }
        let your_discr = buf.try_get_u32()?;
        let desired_min_tx = buf.try_get_u32()?;
        let req_min_rx = buf.try_get_u32()?;
        let req_min_echo_rx = buf.try_get_u32()?;

        // Optional authentication section.
        let auth = if flags.contains(PacketFlags::A) {
            let auth_type = buf.try_get_u8()?;
            let auth_len = buf.try_get_u8()?;
            if auth_len + Self::MANDATORY_SECTION_LEN > length {
                return Err(DecodeError::InvalidAuthenticationLength(
                    auth_len,
                ));
            }
            let Some(auth_type) = AuthenticationType::from_u8(auth_type)
            else {
                return Err(DecodeError::InvalidAuthenticationType(
                    auth_type,
                ));
            };
            let key_id = buf.try_get_u8()?;
            let (seq_num, data_len) = match auth_type {
                AuthenticationType::SimplePassword => {
                    if auth_len < 4 || auth_len > 19 {
                        return Err(DecodeError::InvalidAuthenticationLength(
                            auth_len,
                        ));
                    }
                    (0, auth_len as usize - 3)
                }
                AuthenticationType::KeyedMd5
                | AuthenticationType::MeticulousKeyedMd5 => {
                    if auth_len != 24 {
                        return Err(DecodeError::InvalidAuthenticationLength(
                            auth_len,
                        ));
                    }
                    (buf.try_get_u32()?, 16)
                }
                AuthenticationType::KeyedSha1
                | AuthenticationType::MeticulousKeyedSha1 => {
                    if auth_len != 28 {
                        return Err(DecodeError::InvalidAuthenticationLength(
                            auth_len,
                        ));
                    }
                    (buf.try_get_u32()?, 20)
                }
            };
            if buf.remaining() < data_len {
                return Err(DecodeError::ReadOutOfBounds);
            }
            let data = buf.copy_to_bytes(data_len).to_vec();
            Some(AuthSection {
                auth_type,
                key_id,
                seq_num,
                data,
            })
        } else {
            None
        };

        Ok(Packet {
            version,
            diag,
            state,
            flags,
            detect_mult,
            my_discr,
            your_discr,
            desired_min_tx,
            req_min_rx,
            req_min_echo_rx,
            auth,
        })
    }
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::IncompletePacket => {
                write!(f, "incomplete packet")
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "invalid BFD version: {version}")
            }
            DecodeError::InvalidPacketLength(len) => {
                write!(f, "invalid packet length: {len}")
            }
            DecodeError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            DecodeError::InvalidDetectMult(detect_mult) => {
                write!(f, "invalid detect mult: {detect_mult}")
            }
            DecodeError::InvalidMyDiscriminator(my_discr) => {
                write!(f, "invalid my discriminator: {my_discr}")
            }
            DecodeError::InvalidFlags(flags) => {
                write!(f, "invalid flags: {flags:?}")
            }
            DecodeError::InvalidAuthenticationType(auth_type) => {
                write!(f, "invalid authentication type: {auth_type}")
            }
            DecodeError::InvalidAuthenticationLength(auth_len) => {
                write!(f, "invalid authentication length: {auth_len}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::ReadOutOfBounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_packet() -> Packet {
        Packet {
            version: 1,
            diag: 0,
            state: State::Down,
            flags: PacketFlags::empty(),
            detect_mult: 3,
            my_discr: 0x1122_3344,
            your_discr: 0,
            desired_min_tx: 1_000_000,
            req_min_rx: 1_000_000,
            req_min_echo_rx: 0,
            auth: None,
        }
    }

    #[test]
    fn round_trip_no_auth() {
        let packet = base_packet();
        let encoded = packet.encode();
        assert_eq!(encoded.len(), 24);
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn round_trip_simple_password() {
        let mut packet = base_packet();
        packet.flags.insert(PacketFlags::A);
        packet.auth = Some(AuthSection {
            auth_type: AuthenticationType::SimplePassword,
            key_id: 1,
            seq_num: 0,
            data: b"hunter2".to_vec(),
        });
        let encoded = packet.encode();
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn round_trip_keyed_sha1() {
        let mut packet = base_packet();
        packet.flags.insert(PacketFlags::A);
        packet.auth = Some(AuthSection {
            auth_type: AuthenticationType::MeticulousKeyedSha1,
            key_id: 7,
            seq_num: 42,
            data: vec![0xAB; 20],
        });
        let encoded = packet.encode();
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn decode_rejects_short_packet() {
        let buf = [0u8; 10];
        assert_eq!(Packet::decode(&buf), Err(DecodeError::IncompletePacket));
    }

    #[test]
    fn decode_rejects_wrong_version() {
        let mut packet = base_packet();
        packet.version = 2;
        let mut encoded = packet.encode();
        // version lives in the top 3 bits of byte 0, alongside diag.
        encoded[0] = (2 << 5) | packet.diag;
        assert!(matches!(
            Packet::decode(&encoded),
            Err(DecodeError::InvalidVersion(2))
        ));
    }

    #[test]
    fn decode_rejects_zero_detect_mult() {
        let mut packet = base_packet();
        packet.detect_mult = 0;
        let encoded = packet.encode();
        assert!(matches!(
            Packet::decode(&encoded),
            Err(DecodeError::InvalidDetectMult(0))
        ));
    }

    #[test]
    fn decode_rejects_zero_my_discriminator() {
        let mut packet = base_packet();
        packet.my_discr = 0;
        let encoded = packet.encode();
        assert!(matches!(
            Packet::decode(&encoded),
            Err(DecodeError::InvalidMyDiscriminator(0))
        ));
    }

    #[test]
    fn decode_rejects_multipoint_bit() {
        let mut packet = base_packet();
        packet.flags.insert(PacketFlags::M);
        let encoded = packet.encode();
        assert!(matches!(
            Packet::decode(&encoded),
            Err(DecodeError::InvalidFlags(_))
        ));
    }
}
