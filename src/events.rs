//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::atomic;

use tracing::trace;

use crate::debug::Debug;
use crate::error::Error;
use crate::manager::Manager;
use crate::packet::{DiagnosticCode, Packet, PacketFlags, State};
use crate::reactor::StateChange;
use crate::session::{SessionId, SessionKey, SessionRemoteInfo};
use crate::socket::PacketInfo;

// The full reception procedure of RFC 5880 §6.8.6, applied to every packet
// handed up by a UDP Rx task. Every rejection path increments the Manager's
// drop counter (spec'd as an observable, testable property) in addition to
// returning the specific `Error` for logging.
pub(crate) fn process_udp_packet(
    manager: &mut Manager,
    packet_info: PacketInfo,
    packet: Packet,
) -> Result<(), Error> {
    let result = process_udp_packet_inner(manager, packet_info, packet);
    if result.is_err() {
        manager.rx_drop_count.fetch_add(1, atomic::Ordering::Relaxed);
    }
    result
}

fn process_udp_packet_inner(
    manager: &mut Manager,
    packet_info: PacketInfo,
    packet: Packet,
) -> Result<(), Error> {
    trace!(?packet_info, ?packet, "received packet");

    // Two-tier demultiplex (RFC 5880 §6.8.6 step 1, §4.6).
    let Some((_, sess)) = (match packet.your_discr {
        0 => {
            if !matches!(packet.state, State::Down | State::AdminDown) {
                return Err(Error::InvalidYourDiscriminator(packet.your_discr));
            }
            match packet_info {
                PacketInfo::IpSingleHop { src } => {
                    manager.sessions.get_mut_by_addr(src.ip())
                }
                PacketInfo::IpMultihop { src, dst, ttl } => manager
                    .sessions
                    .get_mut_by_key(&SessionKey::IpMultihop { src: dst, dst: src })
                    .filter(|(_, sess)| {
                        crate::socket::gtsm_check(
                            sess.config.session_type,
                            sess.config.rx_ttl.unwrap_or(254),
                            ttl,
                        )
                        .is_ok()
                    }),
            }
        }
        _ => manager.sessions.get_mut_by_discr(packet.your_discr),
    }) else {
        return Err(Error::DemuxMiss);
    };

    sess.statistics.rx_packet_count += 1;

    // Steps 1-3: structural validation already happened at decode time;
    // here we check the remaining structural rules plus authentication.
    if let Err(error) = validate_bfd_packet(&packet) {
        sess.statistics.rx_error_count += 1;
        return Err(error);
    }

    if packet.flags.contains(PacketFlags::A) {
        let Some(auth) = &packet.auth else {
            sess.statistics.rx_error_count += 1;
            return Err(Error::AuthError("A bit set without auth section".into()));
        };
        let Some(auth_ctx) = sess.auth_ctx.clone() else {
            sess.statistics.rx_error_count += 1;
            return Err(Error::AuthError("session has no auth key configured".into()));
        };
        let ok = {
            let mut auth_state = sess.auth.lock().unwrap();
            auth_ctx.authenticator.verify(
                &mut auth_state,
                &auth_ctx.keystore,
                auth,
                sess.config.detect_multiplier,
            )
        };
        if !ok {
            sess.statistics.rx_error_count += 1;
            return Err(Error::AuthError("digest/sequence verification failed".into()));
        }
    } else if sess.config.auth_key_id.is_some() {
        sess.statistics.rx_error_count += 1;
        return Err(Error::AuthError("A bit clear but session requires authentication".into()));
    }

    // Step 4: update remote state.
    let old_remote_min_rx = sess.remote_min_rx_interval();
    sess.state.remote = Some(SessionRemoteInfo::new(
        packet.state,
        packet.my_discr,
        packet.diag,
        packet.detect_mult,
        packet.desired_min_tx,
        packet.req_min_rx,
    ));

    // Step 5: terminate an active Poll Sequence on a received Final.
    if sess.poll_sequence_is_active() && packet.flags.contains(PacketFlags::F) {
        sess.poll_sequence_terminate();

        // The peer now knows the new parameters; commit them.
        sess.state.curr_min_tx = sess.desired_tx_interval();
        sess.state.curr_min_rx = sess.required_min_rx();
        sess.update_tx_interval();
    }

    // Step 6: recompute the Tx interval if the remote's advertised floor
    // changed.
    if sess.remote_min_rx_interval() != old_remote_min_rx {
        sess.update_tx_interval();
    }

    // Step 7: recompute and re-arm the detection timer.
    sess.update_detection_time(&manager.detect_timerp);

    // Step 8: map the packet's state to an event and drive the FSM.
    let next_state = match (sess.state.local_state, packet.state) {
        (State::AdminDown, _) => {
            // Silently discard; AdminDown only exits via an administrative
            // command.
            return Ok(());
        }
        (State::Init | State::Up, State::AdminDown) => {
            Some((State::Down, DiagnosticCode::NeighborDown))
        }
        (State::Down, State::Down) => Some((State::Init, DiagnosticCode::Nothing)),
        (State::Down, State::Init) => Some((State::Up, DiagnosticCode::Nothing)),
        (State::Init, State::Init | State::Up) => {
            Some((State::Up, DiagnosticCode::Nothing))
        }
        (State::Up, State::Down) => Some((State::Down, DiagnosticCode::NeighborDown)),
        _ => None,
    };
    let mut state_change = None;
    if let Some((state, diag)) = next_state {
        let old_state = sess.state.local_state;
        let peer_ip = sess.key.peer_addr();
        let local_discr = sess.state.local_discr;
        let dampening = sess.config.dampening;
        sess.state_update(state, diag);
        state_change = Some((local_discr, peer_ip, old_state, state, diag, dampening));
    }

    // Step 9: answer a received Poll with a single Final, outside the
    // normal transmit cadence.
    if packet.flags.contains(PacketFlags::P) {
        sess.send_tx_final();
    }

    if let Some((local_discr, peer_ip, old_state, new_state, diag, dampening)) = state_change {
        emit_state_change(manager, local_discr, peer_ip, old_state, new_state, diag, dampening);
    }

    Ok(())
}

// Checks the structural rules of RFC 5880 §6.8.6 step 1 that apply beyond
// plain decoding.
fn validate_bfd_packet(packet: &Packet) -> Result<(), Error> {
    if packet.version != Packet::VERSION {
        return Err(Error::VersionMismatch(packet.version));
    }
    if packet.detect_mult == 0 {
        return Err(Error::InvalidDetectMult(packet.detect_mult));
    }
    if packet.flags.contains(PacketFlags::M)
        || packet.flags.contains(PacketFlags::P | PacketFlags::F)
    {
        return Err(Error::InvalidFlags(packet.flags));
    }
    if packet.my_discr == 0 {
        return Err(Error::InvalidMyDiscriminator(packet.my_discr));
    }
    Ok(())
}

fn emit_state_change(
    manager: &Manager,
    local_discr: u32,
    peer_ip: std::net::IpAddr,
    old_state: State,
    new_state: State,
    diag: DiagnosticCode,
    dampening: crate::config::DampenerConfig,
) {
    let change = StateChange {
        local_discr,
        peer_ip,
        old_state,
        new_state,
        diag,
        dampening,
        timestamp: chrono::Utc::now(),
    };
    // The channel is bounded; a full channel is handled by dropping the
    // notification rather than blocking this session's processing (RFC
    // 5880 processing must stay non-blocking per §5).
    let _ = manager.state_changep.try_send(change);
}

pub(crate) fn process_detection_timer_expiry(
    manager: &mut Manager,
    sess_id: SessionId,
) -> Result<(), Error> {
    let (_, sess) = manager.sessions.get_mut_by_id(sess_id)?;

    Debug::DetectionTimeExpiry(&sess.key).log();

    let old_state = sess.state.local_state;
    if old_state == State::AdminDown {
        // An AdminDown session has no active detection timer, but a
        // previously-armed timer may still fire during the race; ignore it.
        return Ok(());
    }

    let peer_ip = sess.key.peer_addr();
    let local_discr = sess.state.local_discr;
    let dampening = sess.config.dampening;
    sess.state_update(State::Down, DiagnosticCode::ControlTimeExpired);
    sess.state.remote = None;

    // RFC 5880 §6.8.1: the learned sequence-number watermark is only valid
    // while the session keeps receiving authenticated packets. Once the
    // detection timer has expired, forget it so a session that later
    // resumes re-learns a fresh baseline instead of comparing against a
    // stale or replayed sequence number.
    sess.auth.lock().unwrap().auth_seq_known = false;

    emit_state_change(
        manager,
        local_discr,
        peer_ip,
        old_state,
        State::Down,
        DiagnosticCode::ControlTimeExpired,
        dampening,
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use super::*;
    use crate::auth::{Keystore, StandardAuthenticator};
    use crate::config::{DampenerConfig, SessionConfig, SessionRole, SessionType};
    use crate::manager::Manager;

    fn single_hop_config() -> SessionConfig {
        SessionConfig {
            peer_addr: "192.0.2.1".parse().unwrap(),
            local_addr: "192.0.2.2".parse().unwrap(),
            interface: Some("eth0".to_string()),
            session_type: SessionType::SingleHop,
            role: SessionRole::Active,
            desired_min_tx_interval: 100_000,
            required_min_rx_interval: 100_000,
            detect_multiplier: 3,
            tx_ttl: None,
            rx_ttl: None,
            dampening: DampenerConfig::default(),
            auth_key_id: None,
        }
    }

    fn multihop_config() -> SessionConfig {
        SessionConfig {
            peer_addr: "192.0.2.1".parse().unwrap(),
            local_addr: "192.0.2.2".parse().unwrap(),
            interface: None,
            session_type: SessionType::MultiHop,
            role: SessionRole::Passive,
            desired_min_tx_interval: 100_000,
            required_min_rx_interval: 100_000,
            detect_multiplier: 3,
            tx_ttl: None,
            rx_ttl: Some(254),
            dampening: DampenerConfig::default(),
            auth_key_id: None,
        }
    }

    fn new_manager() -> Manager {
        let (state_changep, _state_changec) = tokio::sync::mpsc::channel(16);
        let (manager, _rx, _handle) = Manager::new(
            Arc::new(StandardAuthenticator),
            Arc::new(Keystore::new()),
            state_changep,
        );
        manager
    }

    fn remote_packet(your_discr: u32, my_discr: u32, state: State, flags: PacketFlags) -> Packet {
        Packet {
            version: Packet::VERSION,
            diag: DiagnosticCode::Nothing as u8,
            state,
            flags,
            detect_mult: 3,
            my_discr,
            your_discr,
            desired_min_tx: 100_000,
            req_min_rx: 100_000,
            req_min_echo_rx: 0,
            auth: None,
        }
    }

    // RFC 5880 §6.8.6: three packets take a fresh single-hop session from
    // Down to Init to Up.
    #[test]
    fn three_way_handshake_reaches_up() {
        let mut manager = new_manager();
        let discr = manager.create_session(single_hop_config()).unwrap();

        let packet_info = PacketInfo::IpSingleHop {
            src: SocketAddr::new("192.0.2.1".parse().unwrap(), 3784),
        };

        // Remote is Down, doesn't know our discriminator yet: demux by addr.
        let packet = remote_packet(0, 999, State::Down, PacketFlags::empty());
        process_udp_packet(&mut manager, packet_info.clone(), packet).unwrap();
        assert_eq!(
            manager.lookup(Some(discr), None).unwrap().state,
            State::Init
        );

        // Remote now advertises Init and knows our discriminator.
        let packet = remote_packet(discr, 999, State::Init, PacketFlags::empty());
        process_udp_packet(&mut manager, packet_info, packet).unwrap();
        assert_eq!(manager.lookup(Some(discr), None).unwrap().state, State::Up);
    }

    // RFC 5880 §6.8.4: expiry of the detection timer brings an Up session
    // back to Down with diagnostic ControlTimeExpired.
    #[test]
    fn detection_timer_expiry_brings_session_down() {
        let mut manager = new_manager();
        let discr = manager.create_session(single_hop_config()).unwrap();

        let (sess_id, sess) = manager.sessions.get_mut_by_discr(discr).unwrap();
        sess.state_update(State::Up, DiagnosticCode::Nothing);

        process_detection_timer_expiry(&mut manager, sess_id).unwrap();

        let snap = manager.lookup(Some(discr), None).unwrap();
        assert_eq!(snap.state, State::Down);
        assert_eq!(snap.diag, DiagnosticCode::ControlTimeExpired);
    }

    // RFC 5882 §6.5: a received Final terminates a running Poll Sequence.
    #[test]
    fn final_flag_terminates_poll_sequence() {
        let mut manager = new_manager();
        let discr = manager.create_session(single_hop_config()).unwrap();

        let (_, sess) = manager.sessions.get_mut_by_discr(discr).unwrap();
        sess.state_update(State::Up, DiagnosticCode::Nothing);
        assert!(sess.poll_sequence_is_active());

        let packet_info = PacketInfo::IpSingleHop {
            src: SocketAddr::new("192.0.2.1".parse().unwrap(), 3784),
        };
        let packet = remote_packet(discr, 999, State::Up, PacketFlags::F);
        process_udp_packet(&mut manager, packet_info, packet).unwrap();

        let (_, sess) = manager.sessions.get_mut_by_discr(discr).unwrap();
        assert!(!sess.poll_sequence_is_active());
    }

    // RFC 5082/5883: a multihop packet below the configured TTL floor is
    // rejected by GTSM before it can influence the session's state.
    #[test]
    fn gtsm_rejects_packet_below_ttl_floor() {
        let mut manager = new_manager();
        manager.create_session(multihop_config()).unwrap();

        let packet_info = PacketInfo::IpMultihop {
            src: "192.0.2.1".parse().unwrap(),
            dst: "192.0.2.2".parse().unwrap(),
            ttl: 253,
        };
        let packet = remote_packet(0, 999, State::Down, PacketFlags::empty());
        assert!(matches!(
            process_udp_packet(&mut manager, packet_info, packet),
            Err(Error::DemuxMiss)
        ));
        assert_eq!(manager.drop_count(), 1);
    }

    #[test]
    fn gtsm_accepts_packet_at_ttl_floor() {
        let mut manager = new_manager();
        manager.create_session(multihop_config()).unwrap();

        let packet_info = PacketInfo::IpMultihop {
            src: "192.0.2.1".parse().unwrap(),
            dst: "192.0.2.2".parse().unwrap(),
            ttl: 254,
        };
        let packet = remote_packet(0, 999, State::Down, PacketFlags::empty());
        assert!(process_udp_packet(&mut manager, packet_info, packet).is_ok());
    }

    // A session stuck in AdminDown silently discards any received packet
    // rather than transitioning.
    #[test]
    fn admindown_session_discards_received_packets() {
        let mut manager = new_manager();
        let discr = manager.create_session(single_hop_config()).unwrap();

        let (_, sess) = manager.sessions.get_mut_by_discr(discr).unwrap();
        sess.state_update(State::AdminDown, DiagnosticCode::AdminDown);

        let packet_info = PacketInfo::IpSingleHop {
            src: SocketAddr::new("192.0.2.1".parse().unwrap(), 3784),
        };
        let packet = remote_packet(discr, 999, State::Init, PacketFlags::empty());
        process_udp_packet(&mut manager, packet_info, packet).unwrap();

        assert_eq!(
            manager.lookup(Some(discr), None).unwrap().state,
            State::AdminDown
        );
    }

    // RFC 5880 §6.8.1: the sequence-number watermark must be forgotten once
    // a session's detection timer expires, so a later resumption re-learns
    // a fresh baseline instead of comparing against a stale one.
    #[test]
    fn detection_timer_expiry_resets_auth_seq_known() {
        let mut manager = new_manager();
        let discr = manager.create_session(single_hop_config()).unwrap();

        let (sess_id, sess) = manager.sessions.get_mut_by_discr(discr).unwrap();
        sess.state_update(State::Up, DiagnosticCode::Nothing);
        sess.auth.lock().unwrap().auth_seq_known = true;

        process_detection_timer_expiry(&mut manager, sess_id).unwrap();

        let (_, sess) = manager.sessions.get_mut_by_discr(discr).unwrap();
        assert!(!sess.auth.lock().unwrap().auth_seq_known);
    }
}
