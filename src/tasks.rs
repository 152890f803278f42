//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, atomic};
use std::time::Duration;

use derive_new::new;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{Sender, UnboundedSender};
use tokio::time::Instant;
use tokio::{task, time};
use tracing::Instrument;

use crate::config::SessionType;
use crate::packet::PacketFlags;
use crate::session::Session;
use crate::socket as net;

//
// BFD task diagram:
//
//                                +--------------+
//                   udp_rx (1x) |              |
//        detection_timer (Nx) ->|    manager   |-> (Nx) udp_tx_interval
//                                |              |-> (Nx) udp_tx_final
//                                +--------------+
//                                       |
//                                       V
//                                  reactor task
//

// Inter-task message types.
pub mod messages {
    use serde::{Deserialize, Serialize};

    use crate::packet::Packet;
    use crate::session::SessionId;
    use crate::socket::PacketInfo;

    pub type ManagerInputMsg = input::ManagerMsg;

    pub mod input {
        use super::*;

        #[derive(Debug, Deserialize, Serialize)]
        pub enum ManagerMsg {
            UdpRxPacket(UdpRxPacketMsg),
            DetectTimer(DetectTimerMsg),
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct UdpRxPacketMsg {
            pub packet_info: PacketInfo,
            pub packet: Packet,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct DetectTimerMsg {
            pub sess_id: SessionId,
        }
    }
}

// A handle to a spawned task. Dropping it cancels the task unless
// `detach()` was called.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

impl<T> Task<T> {
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

#[derive(Debug)]
enum Message {
    Reset(Option<Duration>),
}

// A handle to a running timeout task. Dropping it cancels the timeout.
#[derive(Debug)]
pub struct TimeoutTask {
    inner: TimeoutTaskInner,
}

#[derive(Debug, new)]
struct TimeoutTaskInner {
    _task: Task<()>,
    control: UnboundedSender<Message>,
    next: Arc<Mutex<Instant>>,
}

impl TimeoutTask {
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let next = Instant::now() + timeout;
        let next = Arc::new(Mutex::new(next));
        let next_child = next.clone();

        let task = Task::spawn(
            async move {
                let timeout_fut = time::sleep(timeout);
                tokio::pin!(timeout_fut);

                loop {
                    tokio::select! {
                        _ = &mut timeout_fut => {
                            (cb)().await;
                            break;
                        }
                        message = control_rx.recv() => {
                            match message {
                                Some(Message::Reset(None)) => {
                                    let next = Instant::now() + timeout;
                                    timeout_fut.as_mut().reset(next);
                                    *next_child.lock().unwrap() = next;
                                },
                                Some(Message::Reset(Some(new_timeout))) => {
                                    let next = Instant::now() + new_timeout;
                                    timeout_fut.as_mut().reset(next);
                                    *next_child.lock().unwrap() = next;
                                },
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        TimeoutTask {
            inner: TimeoutTaskInner::new(task, control_tx, next),
        }
    }

    pub fn remaining(&self) -> Duration {
        let next = self.inner.next.lock().unwrap();
        next.saturating_duration_since(Instant::now())
    }
}

// A handle to a running interval task. Dropping it cancels the interval.
#[derive(Debug)]
pub struct IntervalTask {
    inner: IntervalTaskInner,
}

#[derive(Debug, new)]
struct IntervalTaskInner {
    _task: Task<()>,
    control: UnboundedSender<Message>,
    next: Arc<Mutex<Instant>>,
}

impl IntervalTask {
    pub fn new<F, Fut>(
        interval: Duration,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let next = Instant::now() + interval;
        let next = Arc::new(Mutex::new(next));
        let next_child = next.clone();

        let task = Task::spawn(
            async move {
                let mut interval_fut = if tick_on_start {
                    time::interval(interval)
                } else {
                    let start = Instant::now() + interval;
                    time::interval_at(start, interval)
                };

                loop {
                    tokio::select! {
                        _ = interval_fut.tick() => {
                            let next = Instant::now() + interval;
                            (cb)().await;
                            *next_child.lock().unwrap() = next;
                        }
                        message = control_rx.recv() => {
                            match message {
                                Some(Message::Reset(None)) => {
                                    let next = Instant::now() + interval;
                                    interval_fut = time::interval(interval);
                                    *next_child.lock().unwrap() = next;
                                },
                                Some(Message::Reset(Some(new_interval))) => {
                                    let next = Instant::now() + new_interval;
                                    interval_fut = time::interval(new_interval);
                                    *next_child.lock().unwrap() = next;
                                },
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        IntervalTask {
            inner: IntervalTaskInner::new(task, control_tx, next),
        }
    }
}

// ===== BFD tasks =====

pub(crate) fn udp_rx(
    socket: UdpSocket,
    session_type: SessionType,
    udp_packet_rxp: &Sender<messages::input::UdpRxPacketMsg>,
    rx_drop_count: Arc<atomic::AtomicU64>,
) -> Task<()> {
    let socket = Arc::new(socket);
    let udp_packet_rxp = udp_packet_rxp.clone();
    Task::spawn(
        async move {
            let _ = net::read_loop(
                socket,
                session_type,
                udp_packet_rxp,
                rx_drop_count,
            )
            .await;
        }
        .in_current_span(),
    )
}

// Sends periodic BFD control packets. Re-signs the auth section on every
// tick rather than reusing the digest computed when the interval started,
// so a Meticulous key's sequence number advances once per packet (RFC 5880
// §6.7.3) instead of staying fixed until the next Poll Sequence.
pub(crate) fn udp_tx_interval(
    sess: &mut Session,
    interval: u32,
    sock: &Arc<UdpSocket>,
    sockaddr: SocketAddr,
) -> IntervalTask {
    let interval = Duration::from_micros(interval as u64);
    let packet = sess.generate_packet();
    let auth_ctx = sess.auth_ctx.clone();
    let auth = sess.auth.clone();

    let sock = sock.clone();
    let poll_active = sess.state.poll_active.clone();
    let tx_packet_count = sess.statistics.tx_packet_count.clone();
    let tx_error_count = sess.statistics.tx_error_count.clone();

    IntervalTask::new(interval, true, move || {
        let sock = sock.clone();
        let tx_packet_count = tx_packet_count.clone();
        let tx_error_count = tx_error_count.clone();

        let mut packet = packet.clone();
        if poll_active.load(atomic::Ordering::Relaxed) {
            packet.flags.insert(PacketFlags::P);
        } else {
            packet.flags.remove(PacketFlags::P);
        }
        if let Some(ctx) = &auth_ctx {
            packet.auth = crate::session::sign_auth(ctx, &auth);
        }

        net::send_packet(sock, sockaddr, packet, tx_packet_count, tx_error_count)
    })
}

// Sends a single BFD control packet with the F-bit set.
pub(crate) fn udp_tx_final(
    sess: &mut Session,
    sock: &Arc<UdpSocket>,
    sockaddr: SocketAddr,
) {
    let mut packet = sess.generate_packet();
    packet.flags.insert(PacketFlags::F);

    let sock = sock.clone();
    let tx_packet_count = sess.statistics.tx_packet_count.clone();
    let tx_error_count = sess.statistics.tx_error_count.clone();

    let mut task = Task::spawn(async move {
        net::send_packet(sock, sockaddr, packet, tx_packet_count, tx_error_count)
            .await;
    });
    task.detach();
}

// BFD session detection timer.
pub(crate) fn detection_timer(
    sess: &Session,
    detect_timerp: &Sender<messages::input::DetectTimerMsg>,
) -> TimeoutTask {
    let holdtime =
        Duration::from_micros(sess.detection_time().unwrap() as u64);
    let sess_id = sess.id;
    let detect_timerp = detect_timerp.clone();
    TimeoutTask::new(holdtime, move || async move {
        let msg = messages::input::DetectTimerMsg { sess_id };
        let _ = detect_timerp.send(msg).await;
    })
}
