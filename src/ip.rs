//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

// IP address family.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

// Extension methods for `IpAddr`.
pub trait IpAddrExt {
    fn address_family(&self) -> AddressFamily;
    fn is_usable(&self) -> bool;
    fn unspecified(af: AddressFamily) -> IpAddr;
}

impl IpAddrExt for IpAddr {
    fn address_family(&self) -> AddressFamily {
        match self {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    // Returns whether the address is usable as a BFD peer/local endpoint.
    fn is_usable(&self) -> bool {
        if self.is_loopback()
            || self.is_multicast()
            || self.is_unspecified()
        {
            return false;
        }
        match self {
            IpAddr::V4(addr) => *addr != Ipv4Addr::BROADCAST,
            IpAddr::V6(_) => true,
        }
    }

    fn unspecified(af: AddressFamily) -> IpAddr {
        match af {
            AddressFamily::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_loopback_and_multicast() {
        assert!(!"127.0.0.1".parse::<IpAddr>().unwrap().is_usable());
        assert!(!"224.0.0.5".parse::<IpAddr>().unwrap().is_usable());
        assert!(!"::1".parse::<IpAddr>().unwrap().is_usable());
        assert!("192.0.2.1".parse::<IpAddr>().unwrap().is_usable());
    }

    #[test]
    fn address_family_matches_variant() {
        let v4: IpAddr = "192.0.2.1".parse().unwrap();
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(v4.address_family(), AddressFamily::Ipv4);
        assert_eq!(v6.address_family(), AddressFamily::Ipv6);
    }
}
