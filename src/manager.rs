//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::SocketAddr;
use std::sync::atomic::{self, AtomicU64};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::auth::{Authenticator, Keystore};
use crate::config::{SessionConfig, SessionRole, SessionType};
use crate::discriminator::DiscriminatorAllocator;
use crate::error::{Error, IoError};
use crate::events;
use crate::port::PortAllocator;
use crate::reactor::StateChange;
use crate::session::{Session, SessionKey, SessionSnapshot, Sessions};
use crate::socket;
use crate::tasks;
use crate::tasks::messages::input::{DetectTimerMsg, UdpRxPacketMsg};

// Administrative requests accepted by the Manager's run loop. Every request
// carries a oneshot reply channel so callers on other tasks can await the
// result without touching the Manager's indices directly.
#[derive(Debug)]
pub enum AdminMsg {
    CreateSession {
        config: SessionConfig,
        reply: oneshot::Sender<Result<u32, Error>>,
    },
    DestroySession {
        local_discr: u32,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    ListSessions {
        reply: oneshot::Sender<Vec<SessionSnapshot>>,
    },
    Lookup {
        local_discr: Option<u32>,
        peer_addr: Option<std::net::IpAddr>,
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
    DropCount {
        reply: oneshot::Sender<u64>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// Owns the live session table and the two UDP Rx tasks that feed it. A
// single task drives `run()`; every mutation of `sessions` happens there, so
// no internal locking is needed (RFC 5880 §6.8.6 processing is inherently
// serialized per the spec's single-writer model).
#[derive(Debug)]
pub struct Manager {
    pub(crate) sessions: Sessions,
    discriminators: DiscriminatorAllocator,
    ports: PortAllocator,
    udp_sh_rx_tasks: Option<UdpRxTasks>,
    udp_mh_rx_tasks: Option<UdpRxTasks>,
    udp_packet_rxp: mpsc::Sender<UdpRxPacketMsg>,
    pub(crate) detect_timerp: mpsc::Sender<DetectTimerMsg>,
    pub(crate) state_changep: mpsc::Sender<StateChange>,
    authenticator: Arc<dyn Authenticator>,
    keystore: Arc<Keystore>,
    // Counts every received packet rejected by the reception procedure
    // (decode failure, GTSM miss, demux miss, auth failure, ...), per the
    // "silently dropped with counter" policy.
    pub(crate) rx_drop_count: Arc<AtomicU64>,
}

#[derive(Debug)]
struct UdpRxTasks {
    _ipv4: Option<tasks::Task<()>>,
    _ipv6: Option<tasks::Task<()>>,
}

// Receive-side halves of the Manager's input channels, owned by whoever
// drives the event loop (typically `main`).
pub struct ManagerInputChannelsRx {
    udp_packet_rx: mpsc::Receiver<UdpRxPacketMsg>,
    detect_timer: mpsc::Receiver<DetectTimerMsg>,
    admin: mpsc::Receiver<AdminMsg>,
}

// Handle used by administrative callers (CLI, RPC) to reach a running
// Manager without sharing mutable state.
#[derive(Clone, Debug)]
pub struct ManagerHandle {
    admin: mpsc::Sender<AdminMsg>,
}

// ===== impl Manager =====

impl Manager {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        keystore: Arc<Keystore>,
        state_changep: mpsc::Sender<StateChange>,
    ) -> (Manager, ManagerInputChannelsRx, ManagerHandle) {
        let (udp_packet_rxp, udp_packet_rxc) = mpsc::channel(4);
        let (detect_timerp, detect_timerc) = mpsc::channel(4);
        let (adminp, adminc) = mpsc::channel(4);

        let manager = Manager {
            sessions: Sessions::default(),
            discriminators: DiscriminatorAllocator::new(),
            ports: PortAllocator::new(),
            udp_sh_rx_tasks: None,
            udp_mh_rx_tasks: None,
            udp_packet_rxp,
            detect_timerp,
            state_changep,
            authenticator,
            keystore,
            rx_drop_count: Arc::new(AtomicU64::new(0)),
        };
        let rx = ManagerInputChannelsRx {
            udp_packet_rx: udp_packet_rxc,
            detect_timer: detect_timerc,
            admin: adminc,
        };
        let handle = ManagerHandle { admin: adminp };

        (manager, rx, handle)
    }

    // Drains the input channels until every sender is dropped, dispatching
    // each message to its handler. Intended to run as its own task.
    pub async fn run(mut self, mut rx: ManagerInputChannelsRx) {
        loop {
            tokio::select! {
                msg = rx.udp_packet_rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let Err(error) =
                        events::process_udp_packet(&mut self, msg.packet_info, msg.packet)
                    {
                        error.log();
                    }
                }
                msg = rx.detect_timer.recv() => {
                    let Some(msg) = msg else { break };
                    if let Err(error) =
                        events::process_detection_timer_expiry(&mut self, msg.sess_id)
                    {
                        error.log();
                    }
                }
                msg = rx.admin.recv() => {
                    let Some(msg) = msg else { break };
                    if let AdminMsg::Shutdown { reply } = msg {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    self.process_admin_msg(msg);
                }
            }
        }
    }

    fn process_admin_msg(&mut self, msg: AdminMsg) {
        match msg {
            AdminMsg::CreateSession { config, reply } => {
                let _ = reply.send(self.create_session(config));
            }
            AdminMsg::DestroySession { local_discr, reply } => {
                let _ = reply.send(self.destroy_session(local_discr));
            }
            AdminMsg::ListSessions { reply } => {
                let _ = reply.send(self.list_sessions());
            }
            AdminMsg::Lookup { local_discr, peer_addr, reply } => {
                let _ = reply.send(self.lookup(local_discr, peer_addr));
            }
            AdminMsg::DropCount { reply } => {
                let _ = reply.send(self.drop_count());
            }
            AdminMsg::Shutdown { .. } => unreachable!("handled in run()"),
        }
    }

    // Validates the configuration, allocates a discriminator and a source
    // port, inserts the session, and (for active sessions) starts periodic
    // transmission immediately. Passive sessions wait for the first received
    // packet before transmitting.
    pub fn create_session(&mut self, config: SessionConfig) -> Result<u32, Error> {
        config.validate()?;

        let key = session_key(&config);
        let role = config.role;
        let peer_addr = config.peer_addr;

        let discr = self.discriminators.allocate()?;
        let port = match self.ports.allocate() {
            Ok(port) => port,
            Err(error) => {
                self.discriminators.release(discr);
                return Err(error);
            }
        };

        let auth_ctx = config.auth_key_id.map(|key_id| {
            crate::session::AuthContext {
                authenticator: self.authenticator.clone(),
                keystore: self.keystore.clone(),
                key_id,
            }
        });

        let sess = match self.sessions.insert(key, config, discr, auth_ctx) {
            Ok((_, sess)) => sess,
            Err(error) => {
                self.discriminators.release(discr);
                self.ports.release(port);
                return Err(error);
            }
        };

        let dst_port = match &sess.key {
            SessionKey::IpSingleHop { .. } => socket::PORT_DST_SINGLE_HOP,
            SessionKey::IpMultihop { .. } => socket::PORT_DST_MULTIHOP,
        };
        sess.state.sockaddr = Some(SocketAddr::new(peer_addr, dst_port));
        sess.state.local_port = port;
        sess.update_socket_tx(port);
        if role == SessionRole::Active {
            sess.update_tx_interval();
        }

        self.update_udp_rx_tasks();

        Ok(discr)
    }

    // Removes the session, best-effort transmits a final AdminDown packet,
    // and releases its discriminator and source port.
    pub fn destroy_session(&mut self, local_discr: u32) -> Result<(), Error> {
        let (sess_idx, sess) = self
            .sessions
            .get_mut_by_discr(local_discr)
            .ok_or(Error::SessionNotFound(local_discr))?;

        sess.state_update(
            crate::packet::State::AdminDown,
            crate::packet::DiagnosticCode::AdminDown,
        );
        sess.send_tx_final();
        // Always recorded at creation time, independent of whether the Tx
        // socket actually bound, so a failed bind can't leak a port.
        let port = sess.state.local_port;

        self.sessions.remove(sess_idx);
        self.discriminators.release(local_discr);
        self.ports.release(port);

        self.update_udp_rx_tasks();

        Ok(())
    }

    pub fn drop_count(&self) -> u64 {
        self.rx_drop_count.load(atomic::Ordering::Relaxed)
    }

    pub fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.sessions.iter().map(Session::snapshot).collect()
    }

    pub fn lookup(
        &self,
        local_discr: Option<u32>,
        peer_addr: Option<std::net::IpAddr>,
    ) -> Option<SessionSnapshot> {
        if let Some(discr) = local_discr {
            return self
                .sessions
                .iter()
                .find(|sess| sess.state.local_discr == discr)
                .map(Session::snapshot);
        }
        if let Some(addr) = peer_addr {
            return self
                .sessions
                .iter()
                .find(|sess| sess.key.peer_addr() == addr)
                .map(Session::snapshot);
        }
        None
    }

    // Best-effort AdminDown burst for every live session, issued once on
    // graceful daemon shutdown.
    pub fn shutdown(&mut self) {
        let discrs: Vec<u32> = self
            .sessions
            .iter()
            .map(|sess| sess.state.local_discr)
            .collect();
        for discr in discrs {
            if let Some((_, sess)) = self.sessions.get_mut_by_discr(discr) {
                sess.state_update(
                    crate::packet::State::AdminDown,
                    crate::packet::DiagnosticCode::AdminDown,
                );
                sess.send_tx_final();
            }
        }
    }

    // Starts or stops UDP Rx tasks for single-hop and multihop sessions. A
    // path type's Rx task is conditioned on existence of at least one
    // session of that type, to avoid creating sockets that aren't needed.
    pub(crate) fn update_udp_rx_tasks(&mut self) {
        let ip_sh_sessions =
            self.sessions.iter().any(|sess| sess.key.is_ip_single_hop());
        let ip_mh_sessions =
            self.sessions.iter().any(|sess| sess.key.is_ip_multihop());

        if ip_sh_sessions && self.udp_sh_rx_tasks.is_none() {
            self.udp_sh_rx_tasks = Some(UdpRxTasks::new(
                SessionType::SingleHop,
                &self.udp_packet_rxp,
                self.rx_drop_count.clone(),
            ));
        } else if !ip_sh_sessions && self.udp_sh_rx_tasks.is_some() {
            self.udp_sh_rx_tasks = None;
        }

        if ip_mh_sessions && self.udp_mh_rx_tasks.is_none() {
            self.udp_mh_rx_tasks = Some(UdpRxTasks::new(
                SessionType::MultiHop,
                &self.udp_packet_rxp,
                self.rx_drop_count.clone(),
            ));
        } else if !ip_mh_sessions && self.udp_mh_rx_tasks.is_some() {
            self.udp_mh_rx_tasks = None;
        }
    }
}

// Builds the demultiplexing key for a session's configuration.
fn session_key(config: &SessionConfig) -> SessionKey {
    match config.session_type {
        SessionType::SingleHop => SessionKey::IpSingleHop {
            ifname: config.interface.clone().unwrap_or_default(),
            dst: config.peer_addr,
        },
        SessionType::MultiHop => SessionKey::IpMultihop {
            src: config.local_addr,
            dst: config.peer_addr,
        },
    }
}

// ===== impl UdpRxTasks =====

impl UdpRxTasks {
    fn new(
        session_type: SessionType,
        udp_packet_rxp: &mpsc::Sender<UdpRxPacketMsg>,
        rx_drop_count: Arc<AtomicU64>,
    ) -> Self {
        let udp_rx_task = |af| match socket::socket_rx(session_type, af) {
            Ok(sock) => Some(tasks::udp_rx(
                sock,
                session_type,
                udp_packet_rxp,
                rx_drop_count.clone(),
            )),
            Err(error) => {
                IoError::UdpSocketError(error).log();
                None
            }
        };
        UdpRxTasks {
            _ipv4: udp_rx_task(crate::ip::AddressFamily::Ipv4),
            _ipv6: udp_rx_task(crate::ip::AddressFamily::Ipv6),
        }
    }
}

// ===== impl ManagerHandle =====

impl ManagerHandle {
    pub async fn create_session(&self, config: SessionConfig) -> Result<u32, Error> {
        let (reply, reply_rx) = oneshot::channel();
        self.admin
            .send(AdminMsg::CreateSession { config, reply })
            .await
            .map_err(|_| Error::Shutdown)?;
        reply_rx.await.map_err(|_| Error::Shutdown)?
    }

    pub async fn destroy_session(&self, local_discr: u32) -> Result<(), Error> {
        let (reply, reply_rx) = oneshot::channel();
        self.admin
            .send(AdminMsg::DestroySession { local_discr, reply })
            .await
            .map_err(|_| Error::Shutdown)?;
        reply_rx.await.map_err(|_| Error::Shutdown)?
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSnapshot>, Error> {
        let (reply, reply_rx) = oneshot::channel();
        self.admin
            .send(AdminMsg::ListSessions { reply })
            .await
            .map_err(|_| Error::Shutdown)?;
        reply_rx.await.map_err(|_| Error::Shutdown)
    }

    pub async fn lookup(
        &self,
        local_discr: Option<u32>,
        peer_addr: Option<std::net::IpAddr>,
    ) -> Result<Option<SessionSnapshot>, Error> {
        let (reply, reply_rx) = oneshot::channel();
        self.admin
            .send(AdminMsg::Lookup { local_discr, peer_addr, reply })
            .await
            .map_err(|_| Error::Shutdown)?;
        reply_rx.await.map_err(|_| Error::Shutdown)
    }

    pub async fn drop_count(&self) -> Result<u64, Error> {
        let (reply, reply_rx) = oneshot::channel();
        self.admin
            .send(AdminMsg::DropCount { reply })
            .await
            .map_err(|_| Error::Shutdown)?;
        reply_rx.await.map_err(|_| Error::Shutdown)
    }

    // Requests a final AdminDown burst for every live session and waits for
    // the Manager's run loop to exit.
    pub async fn shutdown(&self) {
        let (reply, reply_rx) = oneshot::channel();
        if self.admin.send(AdminMsg::Shutdown { reply }).await.is_ok() {
            let _ = reply_rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StandardAuthenticator;
    use crate::config::DampenerConfig;

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

    fn new_manager() -> (Manager, mpsc::Receiver<StateChange>) {
        let (state_changep, state_changec) = mpsc::channel(16);
        let (manager, _rx, _handle) = Manager::new(
            Arc::new(StandardAuthenticator),
            Arc::new(Keystore::new()),
            state_changep,
        );
        (manager, state_changec)
    }

    #[test]
    fn create_session_rejects_invalid_config() {
        let (mut manager, _rx) = new_manager();
        let mut cfg = base_config();
        cfg.detect_multiplier = 0;
        assert!(matches!(
            manager.create_session(cfg),
            Err(Error::ConfigInvalid(_))
        ));
    }

    #[test]
    fn create_then_destroy_round_trips() {
        let (mut manager, _rx) = new_manager();
        let discr = manager.create_session(base_config()).unwrap();
        assert!(manager.lookup(Some(discr), None).is_some());
        manager.destroy_session(discr).unwrap();
        assert!(manager.lookup(Some(discr), None).is_none());
    }

    #[test]
    fn destroy_unknown_discriminator_errors() {
        let (mut manager, _rx) = new_manager();
        assert!(matches!(
            manager.destroy_session(999),
            Err(Error::SessionNotFound(999))
        ));
    }

    #[test]
    fn duplicate_session_key_is_rejected() {
        let (mut manager, _rx) = new_manager();
        manager.create_session(base_config()).unwrap();
        assert!(matches!(
            manager.create_session(base_config()),
            Err(Error::DuplicateSession)
        ));
    }

    #[test]
    fn list_sessions_reflects_created_sessions() {
        let (mut manager, _rx) = new_manager();
        manager.create_session(base_config()).unwrap();
        assert_eq!(manager.list_sessions().len(), 1);
    }
}
