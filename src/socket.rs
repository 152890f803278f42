//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::io::IoSliceMut;
use std::net::{
    IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6,
};
use std::ops::Deref;
use std::os::raw::c_int;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicU64};

use nix::sys::socket::{self, ControlMessageOwned};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Socket as Socket2, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::SendError;

use crate::config::SessionType;
use crate::error::{Error, IoError};
use crate::ip::{AddressFamily, IpAddrExt};
use crate::packet::Packet;
use crate::tasks::messages::input::UdpRxPacketMsg;

pub const PORT_DST_SINGLE_HOP: u16 = 3784;
pub const PORT_DST_ECHO: u16 = 3785;
pub const PORT_DST_MULTIHOP: u16 = 4784;

// Maximum TTL for IPv4 or Hop Limit for IPv6.
pub const TTL_MAX: u8 = 255;

// Ancillary data about a received packet.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum PacketInfo {
    IpSingleHop { src: SocketAddr },
    IpMultihop { src: IpAddr, dst: IpAddr, ttl: u8 },
}

// Extension methods used to set the socket options this daemon relies on.
// Trimmed down to only the options BFD control sockets need.
trait SocketExt: Sized + AsRawFd {
    fn set_ipv4_ttl(&self, ttl: u8) -> std::io::Result<()> {
        setsockopt(self, libc::IPPROTO_IP, libc::IP_TTL, ttl as c_int)
    }

    fn set_ipv4_minttl(&self, ttl: u8) -> std::io::Result<()> {
        setsockopt(self, libc::IPPROTO_IP, libc::IP_MINTTL, ttl as c_int)
    }

    fn set_ipv4_tos(&self, tos: u8) -> std::io::Result<()> {
        setsockopt(self, libc::IPPROTO_IP, libc::IP_TOS, tos as c_int)
    }

    fn set_ipv4_pktinfo(&self, value: bool) -> std::io::Result<()> {
        setsockopt(self, libc::IPPROTO_IP, libc::IP_PKTINFO, value as c_int)
    }

    fn set_ipv4_recvttl(&self, value: bool) -> std::io::Result<()> {
        setsockopt(self, libc::IPPROTO_IP, libc::IP_RECVTTL, value as c_int)
    }

    fn set_ipv6_unicast_hops(&self, hops: u8) -> std::io::Result<()> {
        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_UNICAST_HOPS,
            hops as c_int,
        )
    }

    fn set_ipv6_min_hopcount(&self, hopcount: u8) -> std::io::Result<()> {
        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_MINHOPCOUNT,
            hopcount as c_int,
        )
    }

    fn set_ipv6_tclass(&self, dscp: u8) -> std::io::Result<()> {
        setsockopt(self, libc::IPPROTO_IPV6, libc::IPV6_TCLASS, dscp as c_int)
    }

    fn set_ipv6_pktinfo(&self, value: bool) -> std::io::Result<()> {
        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_RECVPKTINFO,
            value as c_int,
        )
    }

    fn set_ipv6_recvhopcount(&self, value: bool) -> std::io::Result<()> {
        setsockopt(
            self,
            libc::IPPROTO_IPV6,
            libc::IPV6_RECVHOPLIMIT,
            value as c_int,
        )
    }
}

impl SocketExt for UdpSocket {}

// Creates a UDP socket bound to `addr`, setting `SO_REUSEADDR` beforehand so
// that multiple Tx sockets bound to different local addresses but the same
// port can coexist.
fn bind_reuseaddr(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let domain = match addr.ip().address_family() {
        AddressFamily::Ipv4 => Domain::IPV4,
        AddressFamily::Ipv6 => Domain::IPV6,
    };
    let socket = Socket2::new(domain, Type::DGRAM, None)?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

// Creates the shared Rx socket for a given path type and address family.
//
// Single-hop sessions rely on the kernel's IP_MINTTL/IPV6_MINHOPCOUNT to
// drop anything that isn't a direct neighbor (RFC 5082 GTSM). Multihop
// sessions share one Rx socket across peers with potentially different
// minimum TTLs, so the kernel can't enforce GTSM for us; we ask it to hand
// back the packet's TTL/hop limit as ancillary data instead and enforce the
// per-peer floor ourselves.
pub(crate) fn socket_rx(
    session_type: SessionType,
    af: AddressFamily,
) -> Result<UdpSocket, std::io::Error> {
    let port = match session_type {
        SessionType::SingleHop => PORT_DST_SINGLE_HOP,
        SessionType::MultiHop => PORT_DST_MULTIHOP,
    };
    let addr = IpAddr::unspecified(af);
    let sockaddr = SocketAddr::from((addr, port));
    let socket = bind_reuseaddr(sockaddr)?;

    match session_type {
        SessionType::SingleHop => match af {
            AddressFamily::Ipv4 => {
                socket.set_ipv4_pktinfo(true)?;
                socket.set_ipv4_minttl(TTL_MAX)?;
            }
            AddressFamily::Ipv6 => {
                socket.set_ipv6_pktinfo(true)?;
                socket.set_ipv6_min_hopcount(TTL_MAX)?;
            }
        },
        SessionType::MultiHop => match af {
            AddressFamily::Ipv4 => {
                socket.set_ipv4_pktinfo(true)?;
                socket.set_ipv4_recvttl(true)?;
            }
            AddressFamily::Ipv6 => {
                socket.set_ipv6_pktinfo(true)?;
                socket.set_ipv6_recvhopcount(true)?;
            }
        },
    }

    Ok(socket)
}

// Creates a dedicated Tx socket for a single session, bound to `local_addr`
// and `src_port` (allocated by the port allocator). A separate Tx socket is
// required per session since each can be bound to a different local address.
pub(crate) fn socket_tx(
    ifname: Option<&str>,
    af: AddressFamily,
    local_addr: IpAddr,
    src_port: u16,
    ttl: u8,
) -> Result<UdpSocket, std::io::Error> {
    let sockaddr = SocketAddr::from((local_addr, src_port));
    let socket = bind_reuseaddr(sockaddr)?;

    if let Some(ifname) = ifname {
        socket.bind_device(Some(ifname.as_bytes()))?;
    }

    match af {
        AddressFamily::Ipv4 => {
            socket.set_ipv4_tos(libc::IPTOS_PREC_INTERNETCONTROL as u8)?;
            socket.set_ipv4_ttl(ttl)?;
        }
        AddressFamily::Ipv6 => {
            socket.set_ipv6_tclass(libc::IPTOS_PREC_INTERNETCONTROL as u8)?;
            socket.set_ipv6_unicast_hops(ttl)?;
        }
    }

    Ok(socket)
}

pub(crate) async fn send_packet(
    socket: Arc<UdpSocket>,
    sockaddr: SocketAddr,
    packet: Packet,
    tx_packet_count: Arc<AtomicU64>,
    tx_error_count: Arc<AtomicU64>,
) {
    let buf = packet.encode();

    match socket.send_to(&buf, sockaddr).await {
        Ok(_) => {
            tx_packet_count.fetch_add(1, atomic::Ordering::Relaxed);
        }
        Err(error) => {
            IoError::UdpSendError(error).log();
            tx_error_count.fetch_add(1, atomic::Ordering::Relaxed);
        }
    }
}

fn get_packet_src(sa: Option<&socket::SockaddrStorage>) -> Option<SocketAddr> {
    sa.and_then(|sa| {
        sa.as_sockaddr_in()
            .map(|sa| SocketAddrV4::from(*sa).into())
            .or_else(|| {
                sa.as_sockaddr_in6()
                    .map(|sa| SocketAddrV6::from(*sa).into())
            })
    })
}

fn get_packet_dst(
    cmsgs: impl Iterator<Item = ControlMessageOwned>,
) -> Option<IpAddr> {
    for cmsg in cmsgs {
        if let ControlMessageOwned::Ipv4PacketInfo(pktinfo) = cmsg {
            return Some(
                Ipv4Addr::from(pktinfo.ipi_spec_dst.s_addr.to_be()).into(),
            );
        }
        if let ControlMessageOwned::Ipv6PacketInfo(pktinfo) = cmsg {
            return Some(Ipv6Addr::from(pktinfo.ipi6_addr.s6_addr).into());
        }
    }

    None
}

// Extracts the packet's received TTL/Hop Limit from ancillary data, as
// requested by `set_ipv4_recvttl`/`set_ipv6_recvhopcount` on the multihop
// Rx socket. Single-hop sessions never call this: the kernel already
// enforced IP_MINTTL/IPV6_MINHOPCOUNT before the packet reached userspace.
fn get_packet_ttl(
    cmsgs: impl Iterator<Item = ControlMessageOwned>,
) -> Option<u8> {
    for cmsg in cmsgs {
        if let ControlMessageOwned::Ipv4Ttl(ttl) = cmsg {
            return Some(ttl as u8);
        }
        if let ControlMessageOwned::Ipv6HopLimit(hops) = cmsg {
            return Some(hops as u8);
        }
    }

    None
}

pub(crate) async fn read_loop(
    socket: Arc<UdpSocket>,
    session_type: SessionType,
    udp_packet_rxp: Sender<UdpRxPacketMsg>,
    rx_drop_count: Arc<AtomicU64>,
) -> Result<(), SendError<UdpRxPacketMsg>> {
    let mut buf = [0; 1024];
    let mut iov = [IoSliceMut::new(&mut buf)];
    let mut cmsgspace = nix::cmsg_space!(libc::in6_pktinfo, libc::c_int);

    loop {
        match socket
            .async_io(tokio::io::Interest::READABLE, || {
                match socket::recvmsg::<socket::SockaddrStorage>(
                    socket.as_raw_fd(),
                    &mut iov,
                    Some(&mut cmsgspace),
                    socket::MsgFlags::empty(),
                ) {
                    Ok(msg) => {
                        let src = get_packet_src(msg.address.as_ref());
                        let cmsgs: Vec<_> = msg.cmsgs().unwrap().collect();
                        let dst = get_packet_dst(cmsgs.iter().cloned());
                        let ttl = get_packet_ttl(cmsgs.into_iter());
                        Ok((src, dst, ttl, msg.bytes))
                    }
                    Err(errno) => Err(errno.into()),
                }
            })
            .await
        {
            Ok((src, dst, ttl, bytes)) => {
                let src = match src {
                    Some(addr) => addr,
                    None => {
                        IoError::UdpRecvMissingSourceAddr.log();
                        continue;
                    }
                };
                let dst = match dst {
                    Some(addr) => addr,
                    None => {
                        IoError::UdpRecvMissingAncillaryData.log();
                        continue;
                    }
                };

                if !src.ip().is_usable() {
                    Error::UdpInvalidSourceAddr(src.ip()).log();
                    continue;
                }

                let packet = match Packet::decode(&iov[0].deref()[0..bytes]) {
                    Ok(packet) => packet,
                    Err(_) => {
                        rx_drop_count.fetch_add(1, atomic::Ordering::Relaxed);
                        continue;
                    }
                };

                let packet_info = match session_type {
                    SessionType::SingleHop => {
                        PacketInfo::IpSingleHop { src }
                    }
                    SessionType::MultiHop => {
                        let src = src.ip();
                        let ttl = match ttl {
                            Some(ttl) => ttl,
                            None => {
                                IoError::UdpRecvMissingAncillaryData.log();
                                continue;
                            }
                        };
                        PacketInfo::IpMultihop { src, dst, ttl }
                    }
                };
                let msg = UdpRxPacketMsg {
                    packet_info,
                    packet,
                };
                udp_packet_rxp.send(msg).await?;
            }
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {
                continue;
            }
            Err(error) => {
                IoError::UdpRecvError(error).log();
            }
        }
    }
}

fn setsockopt<F: AsRawFd>(
    sock: &F,
    level: c_int,
    optname: c_int,
    optval: c_int,
) -> std::io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            sock.as_raw_fd(),
            level,
            optname,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of::<c_int>() as libc::socklen_t,
        )
    };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}

// GTSM enforcement for multihop sessions (RFC 5082): the peer's configured
// `rx_ttl` floor, defaulting to 254 per RFC 5881 §5 guidance, is compared
// against the packet's observed TTL/Hop Limit.
pub fn gtsm_check(session_type: SessionType, rx_ttl: u8, observed: u8) -> Result<(), Error> {
    match session_type {
        // Already enforced in-kernel via IP_MINTTL/IPV6_MINHOPCOUNT.
        SessionType::SingleHop => Ok(()),
        SessionType::MultiHop => {
            if observed < rx_ttl {
                return Err(Error::GtsmError {
                    expected: format!(">= {rx_ttl}"),
                    actual: observed,
                });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_hop_gtsm_always_passes() {
        assert!(gtsm_check(SessionType::SingleHop, 255, 1).is_ok());
    }

    #[test]
    fn multihop_rejects_below_floor() {
        assert!(gtsm_check(SessionType::MultiHop, 254, 253).is_err());
    }

    #[test]
    fn multihop_accepts_at_or_above_floor() {
        assert!(gtsm_check(SessionType::MultiHop, 254, 254).is_ok());
        assert!(gtsm_check(SessionType::MultiHop, 254, 255).is_ok());
    }
}
