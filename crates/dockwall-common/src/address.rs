//! IP families and prefixed addresses.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::{WallError, WallResult};

/// Protocol family of a firewall rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IpFamily {
    /// IPv4, managed through `iptables`.
    V4,
    /// IPv6, managed through `ip6tables`.
    V6,
}

impl IpFamily {
    /// Every family, in application order.
    pub const ALL: [Self; 2] = [Self::V4, Self::V6];

    /// Default firewall binary for this family.
    #[must_use]
    pub const fn binary(self) -> &'static str {
        match self {
            Self::V4 => "iptables",
            Self::V6 => "ip6tables",
        }
    }

    /// Prefix length of a single-host route.
    #[must_use]
    pub const fn host_prefix(self) -> u8 {
        match self {
            Self::V4 => 32,
            Self::V6 => 128,
        }
    }

    /// Family of an address.
    #[must_use]
    pub const fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    /// Family of a textual subnet or address, decided by the presence of a colon.
    #[must_use]
    pub fn of_text(text: &str) -> Self {
        if text.contains(':') { Self::V6 } else { Self::V4 }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => write!(f, "ip4"),
            Self::V6 => write!(f, "ip6"),
        }
    }
}

/// An address together with its prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpAddress {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpAddress {
    /// Build from an address and a separate prefix length.
    ///
    /// # Errors
    ///
    /// Returns an error if the address does not parse or the prefix is too long.
    pub fn with_prefix(addr: &str, prefix_len: i64) -> WallResult<Self> {
        let invalid = || WallError::InvalidAddress {
            value: format!("{addr}/{prefix_len}"),
        };
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix_len = u8::try_from(prefix_len).map_err(|_| invalid())?;
        Self::validated(addr, prefix_len).ok_or_else(invalid)
    }

    fn validated(addr: IpAddr, prefix_len: u8) -> Option<Self> {
        (prefix_len <= IpFamily::of(&addr).host_prefix()).then_some(Self { addr, prefix_len })
    }

    /// The bare address.
    #[must_use]
    pub const fn addr(&self) -> IpAddr {
        self.addr
    }

    /// The prefix length.
    #[must_use]
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Family of the address.
    #[must_use]
    pub const fn family(&self) -> IpFamily {
        IpFamily::of(&self.addr)
    }

    /// Render as a single-host route, e.g. `172.20.0.5/32`.
    #[must_use]
    pub fn host_route(&self) -> String {
        format!("{}/{}", self.addr, self.family().host_prefix())
    }

    /// Render as a `DNAT` target for `port`, bracketing v6 addresses.
    #[must_use]
    pub fn socket(&self, port: u16) -> String {
        match self.addr {
            IpAddr::V4(addr) => format!("{addr}:{port}"),
            IpAddr::V6(addr) => format!("[{addr}]:{port}"),
        }
    }
}

impl FromStr for IpAddress {
    type Err = WallError;

    /// Parses the combined `addr/prefix` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WallError::InvalidAddress {
            value: s.to_string(),
        };
        let (addr, prefix) = s.split_once('/').ok_or_else(invalid)?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let prefix_len: u8 = prefix.parse().map_err(|_| invalid())?;
        Self::validated(addr, prefix_len).ok_or_else(invalid)
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_combined_form() {
        let ip: IpAddress = "172.20.0.5/16".parse().unwrap();
        assert_eq!(ip.addr().to_string(), "172.20.0.5");
        assert_eq!(ip.prefix_len(), 16);
        assert_eq!(ip.family(), IpFamily::V4);
        assert_eq!(ip.host_route(), "172.20.0.5/32");
        assert_eq!(ip.socket(80), "172.20.0.5:80");
    }

    #[test]
    fn parse_separate_prefix() {
        let ip = IpAddress::with_prefix("fd00::5", 64).unwrap();
        assert_eq!(ip.family(), IpFamily::V6);
        assert_eq!(ip.to_string(), "fd00::5/64");
        assert_eq!(ip.host_route(), "fd00::5/128");
        assert_eq!(ip.socket(80), "[fd00::5]:80");
    }

    #[test]
    fn rejects_garbage() {
        assert!("172.20.0.5".parse::<IpAddress>().is_err());
        assert!("nope/16".parse::<IpAddress>().is_err());
        assert!("10.0.0.1/33".parse::<IpAddress>().is_err());
        assert!(IpAddress::with_prefix("10.0.0.1", -1).is_err());
    }

    #[test]
    fn family_of_text() {
        assert_eq!(IpFamily::of_text("172.20.0.0/16"), IpFamily::V4);
        assert_eq!(IpFamily::of_text("fd00::/64"), IpFamily::V6);
        assert_eq!(IpFamily::V6.binary(), "ip6tables");
    }
}
