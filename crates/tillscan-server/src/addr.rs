//! Detection of the LAN address advertised to handsets.

use std::net::Ipv4Addr;

use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use tracing::debug;

/// Adapter name prefixes that belong to VMs and containers, not the LAN.
const VIRTUAL_PREFIXES: &[&str] = &["docker", "virbr", "vboxnet", "vmnet", "veth", "br-"];

/// VirtualBox host-only range, unreachable from real handsets.
const HOST_ONLY_NET: [u8; 3] = [192, 168, 56];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisedAddr {
    /// A routable address phones on the store network can reach.
    Lan(Ipv4Addr),
    /// Auto-configured 169.254/16, reachable only on the same segment.
    LinkLocal(Ipv4Addr),
    /// Nothing usable was found. URLs built from this only work on the
    /// checkout host itself.
    Loopback,
}

impl AdvertisedAddr {
    pub fn ip(&self) -> Ipv4Addr {
        match self {
            Self::Lan(ip) | Self::LinkLocal(ip) => *ip,
            Self::Loopback => Ipv4Addr::LOCALHOST,
        }
    }

    /// True when handsets are unlikely to reach the address.
    pub fn is_fallback(&self) -> bool {
        !matches!(self, Self::Lan(_))
    }
}

/// Picks the IPv4 address put into the advertised scan URL: the first
/// address of an up, non-loopback, non-virtual interface. Link-local
/// addresses are kept only as a fallback, loopback is the last resort.
pub fn resolve() -> AdvertisedAddr {
    let entries = match getifaddrs() {
        Ok(entries) => entries,
        Err(err) => {
            debug!("getifaddrs failed: {err}");
            return AdvertisedAddr::Loopback;
        }
    };

    let mut link_local = None;
    for entry in entries {
        if !entry.flags.contains(InterfaceFlags::IFF_UP)
            || entry.flags.contains(InterfaceFlags::IFF_LOOPBACK)
            || is_virtual_adapter(&entry.interface_name)
        {
            continue;
        }
        let Some(ip) = entry
            .address
            .as_ref()
            .and_then(|addr| addr.as_sockaddr_in())
            .map(|sin| sin.ip())
        else {
            continue;
        };
        match classify(ip) {
            Candidate::Lan => {
                debug!(interface = %entry.interface_name, %ip, "advertising LAN address");
                return AdvertisedAddr::Lan(ip);
            }
            Candidate::LinkLocal => {
                if link_local.is_none() {
                    link_local = Some(ip);
                }
            }
            Candidate::Skip => {}
        }
    }

    match link_local {
        Some(ip) => AdvertisedAddr::LinkLocal(ip),
        None => AdvertisedAddr::Loopback,
    }
}

enum Candidate {
    Lan,
    LinkLocal,
    Skip,
}

fn classify(ip: Ipv4Addr) -> Candidate {
    let octets = ip.octets();
    if ip.is_loopback() || ip.is_unspecified() || octets[..3] == HOST_ONLY_NET {
        Candidate::Skip
    } else if ip.is_link_local() {
        Candidate::LinkLocal
    } else {
        Candidate::Lan
    }
}

fn is_virtual_adapter(name: &str) -> bool {
    VIRTUAL_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
}
