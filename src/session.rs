//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Mutex, atomic};

use chrono::{DateTime, Utc};
use derive_new::new;
use generational_arena::{Arena, Index};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::Sender;

pub use crate::packet::State;

use crate::auth::{AuthState, Authenticator, Keystore};
use crate::config::SessionConfig;
use crate::debug::Debug;
use crate::error::{Error, IoError};
use crate::ip::IpAddrExt;
use crate::packet::{AuthSection, DiagnosticCode, Packet, PacketFlags};
use crate::socket::{self, TTL_MAX};
use crate::tasks;
use crate::tasks::messages::input::DetectTimerMsg;

// The slow Tx interval is used to conserve bandwidth when the session is not
// up (RFC 5880 §6.8.3).
const SLOW_TX_INTERVAL: u32 = 1_000_000;

pub type SessionId = usize;
pub type SessionIndex = Index;

// Demultiplexing key for a single BFD session. A single-hop session is keyed
// by the interface it runs over plus the peer address; a multihop session by
// the local and peer addresses (no interface binding).
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SessionKey {
    IpSingleHop { ifname: String, dst: IpAddr },
    IpMultihop { src: IpAddr, dst: IpAddr },
}

impl SessionKey {
    pub fn is_ip_single_hop(&self) -> bool {
        matches!(self, SessionKey::IpSingleHop { .. })
    }

    pub fn is_ip_multihop(&self) -> bool {
        matches!(self, SessionKey::IpMultihop { .. })
    }

    pub fn peer_addr(&self) -> IpAddr {
        match self {
            SessionKey::IpSingleHop { dst, .. } => *dst,
            SessionKey::IpMultihop { dst, .. } => *dst,
        }
    }
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub key: SessionKey,
    pub config: SessionConfig,
    pub state: SessionState,
    pub statistics: SessionStatistics,
    // Shared with the session's own Tx-interval task, which must re-sign
    // with an advancing sequence number on every tick rather than reusing
    // the digest computed when the interval (re)started.
    pub auth: Arc<Mutex<AuthState>>,
    pub auth_ctx: Option<AuthContext>,
}

// Signs a fresh auth section using the session's shared transmit sequence
// state. Called both when a packet template is first built and, for
// Meticulous keys, again on every periodic transmission tick.
pub(crate) fn sign_auth(
    auth_ctx: &AuthContext,
    auth: &Mutex<AuthState>,
) -> Option<AuthSection> {
    let mut auth_state = auth.lock().unwrap();
    auth_ctx
        .authenticator
        .sign(&mut auth_state, auth_ctx.key_id, &auth_ctx.keystore)
}

// Shared authentication context a session needs both to verify incoming
// packets and to sign outgoing ones.
#[derive(Clone)]
pub struct AuthContext {
    pub authenticator: Arc<dyn Authenticator>,
    pub keystore: Arc<Keystore>,
    pub key_id: u8,
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("key_id", &self.key_id)
            .finish()
    }
}

#[derive(Debug)]
pub struct SessionState {
    pub socket_tx: Option<Arc<UdpSocket>>,
    pub sockaddr: Option<SocketAddr>,
    // The allocated Tx source port, recorded independently of `socket_tx` so
    // it can always be released even if binding the Tx socket itself failed.
    pub local_port: u16,
    pub curr_min_tx: u32,
    pub curr_min_rx: u32,
    pub local_state: State,
    pub local_discr: u32,
    pub local_diag: DiagnosticCode,
    pub remote: Option<SessionRemoteInfo>,
    pub poll_active: Arc<AtomicBool>,
    pub tx_interval: Option<tasks::IntervalTask>,
    pub detection_timer: Option<tasks::TimeoutTask>,
}

#[derive(Debug, new)]
pub struct SessionRemoteInfo {
    pub state: State,
    pub discr: u32,
    pub diag: u8,
    pub multiplier: u8,
    pub min_tx: u32,
    pub min_rx: u32,
}

#[derive(Debug)]
pub struct SessionStatistics {
    pub create_time: DateTime<Utc>,
    pub last_state_change_time: Option<DateTime<Utc>>,
    pub last_down_time: Option<DateTime<Utc>>,
    pub last_up_time: Option<DateTime<Utc>>,
    pub down_count: u32,
    pub admin_down_count: u32,
    pub rx_packet_count: u64,
    pub tx_packet_count: Arc<AtomicU64>,
    pub rx_error_count: u64,
    pub tx_error_count: Arc<AtomicU64>,
}

#[derive(Debug, Default)]
pub struct Sessions {
    arena: Arena<Session>,
    // Hash table keyed by ID (1:1), used for detection-timer dispatch.
    id_tree: HashMap<SessionId, SessionIndex>,
    // Binary tree keyed by the administrative session key (1:1).
    key_tree: BTreeMap<SessionKey, SessionIndex>,
    // Hash table keyed by local discriminator (1:1), the primary demux path.
    discr_tree: HashMap<u32, SessionIndex>,
    // Hash table keyed by peer address (1:1), the secondary demux path for
    // single-hop sessions whose Your Discriminator is still zero.
    addr_tree: HashMap<IpAddr, SessionIndex>,
    next_id: SessionId,
}

// ===== impl Session =====

impl Session {
    fn new(
        id: SessionId,
        key: SessionKey,
        config: SessionConfig,
        auth_ctx: Option<AuthContext>,
    ) -> Session {
        Debug::SessionCreate(&key).log();

        Session {
            id,
            key,
            config,
            state: SessionState::new(),
            statistics: SessionStatistics::default(),
            auth: Arc::new(Mutex::new(AuthState::default())),
            auth_ctx,
        }
    }

    // Updates the FSM state of the session and (re)synchronizes the Tx
    // interval and dampener-facing statistics.
    pub(crate) fn state_update(&mut self, state: State, diag: DiagnosticCode) {
        let old_state = self.state.local_state;
        self.state.local_state = state;
        self.state.local_diag = diag;

        Debug::FsmTransition(&self.key, old_state, state).log();

        self.statistics.last_state_change_time = Some(Utc::now());
        match state {
            State::AdminDown => {
                self.statistics.admin_down_count += 1;
            }
            State::Down => {
                self.statistics.last_down_time = Some(Utc::now());
                self.statistics.down_count += 1;
            }
            State::Up => {
                self.statistics.last_up_time = Some(Utc::now());
            }
            State::Init => {}
        }

        if old_state == State::Up {
            // Activate slow Tx interval.
            self.state.curr_min_tx = self.desired_tx_interval();
        } else if state == State::Up {
            // Start a Poll Sequence to deactivate the slow Tx interval.
            self.poll_sequence_start();
        }

        self.update_tx_interval();
    }

    pub(crate) fn desired_tx_interval(&self) -> u32 {
        // RFC 5880 §6.8.3: while not Up, DesiredMinTxInterval must not be
        // less than one second, to keep the bandwidth used by sessions that
        // aren't Up negligible.
        if self.state.local_state != State::Up {
            return SLOW_TX_INTERVAL;
        }
        self.config.desired_min_tx_interval
    }

    pub(crate) fn required_min_rx(&self) -> u32 {
        self.config.required_min_rx_interval
    }

    pub(crate) fn remote_min_rx_interval(&self) -> u32 {
        self.state
            .remote
            .as_ref()
            .map(|remote| remote.min_rx)
            .unwrap_or(1)
    }

    pub(crate) fn negotiated_tx_interval(&self) -> Option<u32> {
        let remote_min_rx = self.remote_min_rx_interval();
        if remote_min_rx == 0 {
            return None;
        }
        Some(std::cmp::max(self.state.curr_min_tx, remote_min_rx))
    }

    pub(crate) fn negotiated_rx_interval(&self) -> Option<u32> {
        self.state
            .remote
            .as_ref()
            .map(|remote| std::cmp::max(self.state.curr_min_rx, remote.min_tx))
    }

    pub(crate) fn detection_time(&self) -> Option<u32> {
        self.state.remote.as_ref().map(|remote| {
            remote.multiplier as u32 * self.negotiated_rx_interval().unwrap()
        })
    }

    // Applies up to 25% of jitter reduction to a Tx interval, per
    // RFC 5880 §6.8.7 (0%-10% when DetectMult is 1, to avoid alignment with
    // the detection time on the remote end).
    pub(crate) fn jittered_tx_interval(&self, interval: u32) -> u32 {
        let max_percent = if self.config.detect_multiplier == 1 {
            10
        } else {
            25
        };
        let percent = rand::rng().random_range(0..max_percent);
        interval - (interval / 100) * percent
    }

    // Builds the BFD Control packet to be transmitted, signing it if
    // authentication is configured. The Tx-interval task calls this once to
    // build its template, then re-signs on every tick via `sign_auth` so a
    // Meticulous key's sequence number advances once per packet rather than
    // once per renegotiation period.
    pub(crate) fn generate_packet(&mut self) -> Packet {
        let mut flags = PacketFlags::empty();
        let auth = if let Some(ctx) = &self.auth_ctx {
            flags.insert(PacketFlags::A);
            sign_auth(ctx, &self.auth)
        } else {
            None
        };

        Packet {
            version: Packet::VERSION,
            diag: self.state.local_diag as u8,
            state: self.state.local_state,
            flags,
            detect_mult: self.config.detect_multiplier,
            my_discr: self.state.local_discr,
            your_discr: self
                .state
                .remote
                .as_ref()
                .map(|remote| remote.discr)
                .unwrap_or(0),
            desired_min_tx: self.desired_tx_interval(),
            req_min_rx: self.required_min_rx(),
            req_min_echo_rx: 0,
            auth,
        }
    }

    pub(crate) fn update_socket_tx(&mut self, src_port: u16) {
        let (ifname, af, local_addr, ttl) = match &self.key {
            SessionKey::IpSingleHop { ifname, dst } => {
                let af = dst.address_family();
                (Some(ifname.as_str()), af, self.config.local_addr, TTL_MAX)
            }
            SessionKey::IpMultihop { .. } => {
                let af = self.config.peer_addr.address_family();
                let ttl = self.config.tx_ttl.unwrap_or(TTL_MAX);
                (None, af, self.config.local_addr, ttl)
            }
        };
        match socket::socket_tx(ifname, af, local_addr, src_port, ttl) {
            Ok(sock) => self.state.socket_tx = Some(Arc::new(sock)),
            Err(error) => {
                IoError::UdpSocketError(error).log();
            }
        }
    }

    pub(crate) fn update_tx_interval(&mut self) {
        if let Some(socket_tx) = self.state.socket_tx.clone()
            && let Some(interval) = self.negotiated_tx_interval()
            && let Some(sockaddr) = self.state.sockaddr
        {
            let interval = self.jittered_tx_interval(interval);
            let task =
                tasks::udp_tx_interval(self, interval, &socket_tx, sockaddr);
            self.state.tx_interval = Some(task);
        } else {
            self.state.tx_interval = None;
        }
    }

    pub(crate) fn send_tx_final(&mut self) {
        if let (Some(socket_tx), Some(sockaddr)) =
            (self.state.socket_tx.clone(), self.state.sockaddr)
        {
            tasks::udp_tx_final(self, &socket_tx, sockaddr);
        }
    }

    pub(crate) fn update_detection_time(
        &mut self,
        detect_timerp: &Sender<DetectTimerMsg>,
    ) {
        if self.detection_time().is_some() {
            let task = tasks::detection_timer(self, detect_timerp);
            self.state.detection_timer = Some(task);
        } else {
            self.state.detection_timer = None;
        }
    }

    pub(crate) fn poll_sequence_start(&self) {
        Debug::PollSequenceStart(&self.key).log();
        self.state
            .poll_active
            .store(true, atomic::Ordering::Relaxed);
    }

    pub(crate) fn poll_sequence_terminate(&self) {
        Debug::PollSequenceTerminate(&self.key).log();
        self.state
            .poll_active
            .store(false, atomic::Ordering::Relaxed);
    }

    pub(crate) fn poll_sequence_is_active(&self) -> bool {
        self.state.poll_active.load(atomic::Ordering::Relaxed)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        Debug::SessionDestroy(&self.key).log();
    }
}

// Read-only copy of a session's externally-visible state, produced on demand
// for administrative queries (`list_sessions`/`lookup`) without requiring a
// lock on the live session.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub key: SessionKey,
    pub local_discr: u32,
    pub state: State,
    pub diag: DiagnosticCode,
    pub remote_discr: Option<u32>,
    pub create_time: DateTime<Utc>,
    pub last_state_change_time: Option<DateTime<Utc>>,
    pub down_count: u32,
    pub rx_packet_count: u64,
    pub tx_packet_count: u64,
}

impl Session {
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            key: self.key.clone(),
            local_discr: self.state.local_discr,
            state: self.state.local_state,
            diag: self.state.local_diag,
            remote_discr: self.state.remote.as_ref().map(|remote| remote.discr),
            create_time: self.statistics.create_time,
            last_state_change_time: self.statistics.last_state_change_time,
            down_count: self.statistics.down_count,
            rx_packet_count: self.statistics.rx_packet_count,
            tx_packet_count: self
                .statistics
                .tx_packet_count
                .load(atomic::Ordering::Relaxed),
        }
    }
}

// ===== impl SessionState =====

impl SessionState {
    fn new() -> SessionState {
        SessionState {
            socket_tx: None,
            sockaddr: None,
            local_port: 0,
            curr_min_tx: SLOW_TX_INTERVAL,
            curr_min_rx: 1,
            local_state: State::Down,
            local_discr: 0,
            local_diag: DiagnosticCode::Nothing,
            remote: None,
            poll_active: Arc::new(AtomicBool::new(false)),
            tx_interval: None,
            detection_timer: None,
        }
    }
}

// ===== impl SessionStatistics =====

impl Default for SessionStatistics {
    fn default() -> SessionStatistics {
        SessionStatistics {
            create_time: Utc::now(),
            last_state_change_time: None,
            last_down_time: None,
            last_up_time: None,
            down_count: 0,
            admin_down_count: 0,
            rx_packet_count: 0,
            tx_packet_count: Arc::new(AtomicU64::new(0)),
            rx_error_count: 0,
            tx_error_count: Arc::new(AtomicU64::new(0)),
        }
    }
}

// ===== impl Sessions =====

impl Sessions {
    pub(crate) fn insert(
        &mut self,
        key: SessionKey,
        config: SessionConfig,
        local_discr: u32,
        auth_ctx: Option<AuthContext>,
    ) -> Result<(SessionIndex, &mut Session), Error> {
        if self.key_tree.contains_key(&key) {
            return Err(Error::DuplicateSession);
        }

        let id = self.next_id();
        let mut sess = Session::new(id, key, config, auth_ctx);
        sess.state.local_discr = local_discr;
        let sess_idx = self.arena.insert(sess);

        let sess = &mut self.arena[sess_idx];
        self.id_tree.insert(sess.id, sess_idx);
        self.key_tree.insert(sess.key.clone(), sess_idx);
        self.discr_tree.insert(sess.state.local_discr, sess_idx);
        if sess.key.is_ip_single_hop() {
            self.addr_tree.insert(sess.key.peer_addr(), sess_idx);
        }

        Ok((sess_idx, sess))
    }

    pub(crate) fn remove(&mut self, sess_idx: SessionIndex) -> Option<Session> {
        let sess = self.arena.get(sess_idx)?;
        self.id_tree.remove(&sess.id);
        self.key_tree.remove(&sess.key);
        self.discr_tree.remove(&sess.state.local_discr);
        if sess.key.is_ip_single_hop() {
            self.addr_tree.remove(&sess.key.peer_addr());
        }
        self.arena.remove(sess_idx)
    }

    pub(crate) fn get_mut_by_id(
        &mut self,
        id: SessionId,
    ) -> Result<(SessionIndex, &mut Session), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |sess_idx| (sess_idx, &mut self.arena[sess_idx]))
            .ok_or(Error::SessionIdNotFound(id))
    }

    pub(crate) fn get_by_key(
        &self,
        key: &SessionKey,
    ) -> Option<(SessionIndex, &Session)> {
        self.key_tree
            .get(key)
            .copied()
            .map(|sess_idx| (sess_idx, &self.arena[sess_idx]))
    }

    pub(crate) fn get_mut_by_key(
        &mut self,
        key: &SessionKey,
    ) -> Option<(SessionIndex, &mut Session)> {
        self.key_tree
            .get(key)
            .copied()
            .map(move |sess_idx| (sess_idx, &mut self.arena[sess_idx]))
    }

    pub(crate) fn get_mut_by_discr(
        &mut self,
        discr: u32,
    ) -> Option<(SessionIndex, &mut Session)> {
        self.discr_tree
            .get(&discr)
            .copied()
            .map(move |sess_idx| (sess_idx, &mut self.arena[sess_idx]))
    }

    pub(crate) fn get_mut_by_addr(
        &mut self,
        addr: IpAddr,
    ) -> Option<(SessionIndex, &mut Session)> {
        self.addr_tree
            .get(&addr)
            .copied()
            .map(move |sess_idx| (sess_idx, &mut self.arena[sess_idx]))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &'_ Session> + '_ {
        self.key_tree.values().map(|sess_idx| &self.arena[*sess_idx])
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    fn next_id(&mut self) -> SessionId {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }
}

impl std::ops::Index<SessionIndex> for Sessions {
    type Output = Session;

    fn index(&self, index: SessionIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<SessionIndex> for Sessions {
    fn index_mut(&mut self, index: SessionIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DampenerConfig, SessionRole, SessionType};

    fn base_config() -> SessionConfig {
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

    fn key() -> SessionKey {
        SessionKey::IpSingleHop {
            ifname: "eth0".to_string(),
            dst: "192.0.2.1".parse().unwrap(),
        }
    }

    #[test]
    fn insert_then_duplicate_is_rejected() {
        let mut sessions = Sessions::default();
        sessions.insert(key(), base_config(), 42, None).unwrap();
        assert!(matches!(
            sessions.insert(key(), base_config(), 43, None),
            Err(Error::DuplicateSession)
        ));
    }

    #[test]
    fn lookup_by_discr_and_addr_after_insert() {
        let mut sessions = Sessions::default();
        sessions.insert(key(), base_config(), 42, None).unwrap();
        assert!(sessions.get_mut_by_discr(42).is_some());
        assert!(sessions
            .get_mut_by_addr("192.0.2.1".parse().unwrap())
            .is_some());
    }

    #[test]
    fn remove_clears_all_indices() {
        let mut sessions = Sessions::default();
        let (sess_idx, _) =
            sessions.insert(key(), base_config(), 42, None).unwrap();
        assert!(sessions.remove(sess_idx).is_some());
        assert!(sessions.get_mut_by_discr(42).is_none());
        assert!(sessions
            .get_mut_by_addr("192.0.2.1".parse().unwrap())
            .is_none());
        assert!(sessions.is_empty());
    }

    #[test]
    fn state_update_to_up_starts_poll_sequence() {
        let mut sess = Session::new(1, key(), base_config(), None);
        sess.state_update(State::Up, DiagnosticCode::Nothing);
        assert!(sess.poll_sequence_is_active());
    }

    #[test]
    fn desired_tx_interval_uses_slow_rate_until_up() {
        let sess = Session::new(1, key(), base_config(), None);
        assert_eq!(sess.desired_tx_interval(), SLOW_TX_INTERVAL);
    }

    #[test]
    fn jittered_tx_interval_stays_within_bounds() {
        let mut cfg = base_config();
        cfg.detect_multiplier = 3;
        let sess = Session::new(1, key(), cfg, None);
        for _ in 0..100 {
            let jittered = sess.jittered_tx_interval(1_000_000);
            assert!(jittered >= 750_000 && jittered <= 1_000_000);
        }
    }

    #[test]
    fn jittered_tx_interval_narrows_when_detect_mult_is_one() {
        let mut cfg = base_config();
        cfg.detect_multiplier = 1;
        let sess = Session::new(1, key(), cfg, None);
        for _ in 0..100 {
            let jittered = sess.jittered_tx_interval(1_000_000);
            assert!(jittered >= 900_000 && jittered <= 1_000_000);
        }
    }

    #[test]
    fn generate_packet_without_auth_ctx_has_no_auth_section() {
        let mut sess = Session::new(1, key(), base_config(), None);
        let packet = sess.generate_packet();
        assert!(packet.auth.is_none());
        assert!(!packet.flags.contains(PacketFlags::A));
    }

    #[test]
    fn generate_packet_with_auth_ctx_signs() {
        use crate::auth::{AuthKey, Authenticator, Keystore, StandardAuthenticator};
        use crate::packet::AuthenticationType;
        use std::sync::Arc;

        let mut keystore = Keystore::new();
        keystore.insert(
            1,
            AuthKey {
                auth_type: AuthenticationType::SimplePassword,
                material: b"hunter2".to_vec(),
            },
        );
        let auth_ctx = AuthContext {
            authenticator: Arc::new(StandardAuthenticator) as Arc<dyn Authenticator>,
            keystore: Arc::new(keystore),
            key_id: 1,
        };

        let mut sess = Session::new(1, key(), base_config(), Some(auth_ctx));
        let packet = sess.generate_packet();
        assert!(packet.flags.contains(PacketFlags::A));
        assert!(packet.auth.is_some());
    }

    #[test]
    fn sign_auth_advances_meticulous_sequence_each_call() {
        use crate::auth::{AuthKey, Authenticator, Keystore, StandardAuthenticator};
        use crate::packet::AuthenticationType;
        use std::sync::Arc;

        let mut keystore = Keystore::new();
        keystore.insert(
            1,
            AuthKey {
                auth_type: AuthenticationType::MeticulousKeyedSha1,
                material: b"hunter2".to_vec(),
            },
        );
        let auth_ctx = AuthContext {
            authenticator: Arc::new(StandardAuthenticator) as Arc<dyn Authenticator>,
            keystore: Arc::new(keystore),
            key_id: 1,
        };
        let auth = Arc::new(Mutex::new(AuthState::default()));

        let first = sign_auth(&auth_ctx, &auth).unwrap();
        let second = sign_auth(&auth_ctx, &auth).unwrap();
        assert_ne!(first.seq_num, second.seq_num);
    }

    #[test]
    fn admindown_packet_has_expected_header_bytes() {
        let mut sess = Session::new(1, key(), base_config(), None);
        sess.state_update(State::AdminDown, DiagnosticCode::AdminDown);
        let mut packet = sess.generate_packet();
        packet.flags.insert(PacketFlags::F);

        let bytes = packet.encode();
        assert_eq!(
            &bytes[..],
            &[
                0x27, // version=1, diag=AdminDown(7)
                0x10, // state=AdminDown(0)<<6, flags=F
                0x03, // detect_mult
                0x18, // length = 24
                0x00, 0x00, 0x00, 0x00, // my_discr = 0 (never assigned)
                0x00, 0x00, 0x00, 0x00, // your_discr = 0 (no remote)
                0x00, 0x0F, 0x42, 0x40, // desired_min_tx = 1_000_000 (slow rate)
                0x00, 0x01, 0x86, 0xA0, // req_min_rx = 100_000
                0x00, 0x00, 0x00, 0x00, // req_min_echo_rx = 0
            ][..]
        );
    }

    #[test]
    fn snapshot_reflects_session_fields() {
        let mut sessions = Sessions::default();
        let (_, sess) =
            sessions.insert(key(), base_config(), 42, None).unwrap();
        sess.state_update(State::Down, DiagnosticCode::Nothing);
        let snap = sess.snapshot();
        assert_eq!(snap.local_discr, 42);
        assert_eq!(snap.state, State::Down);
    }
}
