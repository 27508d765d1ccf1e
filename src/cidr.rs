use std::{fmt, net::Ipv4Addr, str::FromStr};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Malformed CIDR block: {0}")]
    Malformed(String),

    #[error("Prefix length out of range in {0}")]
    PrefixOutOfRange(String),

    #[error("Host bits set in {0}")]
    HostBitsSet(String),
}

/// An IPv4 network in `a.b.c.d/n` notation. The address is always the network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    address: u32,
    prefix: u8,
}

impl Cidr {
    fn mask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix)
        }
    }

    fn last(&self) -> u32 {
        self.address | !self.mask()
    }

    pub fn contains(&self, other: &Cidr) -> bool {
        other.prefix >= self.prefix && (other.address & self.mask()) == self.address
    }

    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.address <= other.last() && other.address <= self.last()
    }
}

impl FromStr for Cidr {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (address, prefix) = raw
            .split_once('/')
            .ok_or_else(|| Error::Malformed(raw.to_string()))?;

        let address: Ipv4Addr = address
            .parse()
            .map_err(|_| Error::Malformed(raw.to_string()))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| Error::Malformed(raw.to_string()))?;
        if prefix > 32 {
            return Err(Error::PrefixOutOfRange(raw.to_string()));
        }

        let cidr = Cidr {
            address: u32::from(address),
            prefix,
        };
        if cidr.address & !cidr.mask() != 0 {
            return Err(Error::HostBitsSet(raw.to_string()));
        }

        return Ok(cidr);
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", Ipv4Addr::from(self.address), self.prefix)
    }
}
