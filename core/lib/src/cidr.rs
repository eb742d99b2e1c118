//! IPv4 CIDR block arithmetic used to carve the VPC into subnets.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Cidr {
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, CidrError> {
        if prefix_len > 32 {
            return Err(CidrError::InvalidPrefix(prefix_len.to_string()));
        }
        let network = Ipv4Addr::from(u32::from(address) & mask(prefix_len));
        if network != address {
            return Err(CidrError::HostBitsSet(format!("{}/{}", address, prefix_len)));
        }
        Ok(Self {
            network,
            prefix_len,
        })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Number of addresses in the block
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }

    /// Split into `count` consecutive blocks of equal size.
    ///
    /// The new prefix is the smallest one that fits `count` blocks, so four
    /// subnets of a /16 come out as /18s.
    pub fn split(&self, count: usize) -> Result<Vec<Ipv4Cidr>, CidrError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let extra_bits = usize::BITS - (count - 1).leading_zeros();
        let new_prefix = u32::from(self.prefix_len) + extra_bits;
        if new_prefix > 28 {
            return Err(CidrError::Exhausted {
                block: self.to_string(),
                count,
            });
        }

        let step = 1u32 << (32 - new_prefix);
        let base = u32::from(self.network);
        (0..count as u32)
            .map(|i| Ipv4Cidr::new(Ipv4Addr::from(base + i * step), new_prefix as u8))
            .collect()
    }
}

fn mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

impl FromStr for Ipv4Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, prefix) = s
            .split_once('/')
            .ok_or_else(|| CidrError::Malformed(s.to_string()))?;
        let address: Ipv4Addr = address
            .parse()
            .map_err(|_| CidrError::Malformed(s.to_string()))?;
        let prefix_len: u8 = prefix
            .parse()
            .map_err(|_| CidrError::InvalidPrefix(prefix.to_string()))?;
        Ipv4Cidr::new(address, prefix_len)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CidrError {
    #[error("'{0}' is not an IPv4 CIDR block")]
    Malformed(String),

    #[error("invalid prefix length '{0}'")]
    InvalidPrefix(String),

    #[error("'{0}' has host bits set")]
    HostBitsSet(String),

    #[error("{block} cannot be split into {count} subnets")]
    Exhausted { block: String, count: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let cidr: Ipv4Cidr = "10.0.0.0/16".parse().unwrap();
        assert_eq!(cidr.prefix_len(), 16);
        assert_eq!(cidr.size(), 65536);
        assert_eq!(cidr.to_string(), "10.0.0.0/16");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            "10.0.0.0".parse::<Ipv4Cidr>(),
            Err(CidrError::Malformed(_))
        ));
        assert!(matches!(
            "10.0.0.0/33".parse::<Ipv4Cidr>(),
            Err(CidrError::InvalidPrefix(_))
        ));
        assert!(matches!(
            "10.0.0.1/16".parse::<Ipv4Cidr>(),
            Err(CidrError::HostBitsSet(_))
        ));
    }

    #[test]
    fn test_split_four_ways() {
        let cidr: Ipv4Cidr = "10.0.0.0/16".parse().unwrap();
        let subnets: Vec<String> = cidr
            .split(4)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            subnets,
            vec!["10.0.0.0/18", "10.0.64.0/18", "10.0.128.0/18", "10.0.192.0/18"]
        );
    }

    #[test]
    fn test_split_rounds_up_to_power_of_two() {
        let cidr: Ipv4Cidr = "10.0.0.0/16".parse().unwrap();
        let subnets = cidr.split(6).unwrap();
        assert_eq!(subnets.len(), 6);
        assert!(subnets.iter().all(|s| s.prefix_len() == 19));
        assert_eq!(subnets[5].to_string(), "10.0.160.0/19");
    }

    #[test]
    fn test_split_too_small() {
        let cidr: Ipv4Cidr = "10.0.0.0/27".parse().unwrap();
        assert!(cidr.split(4).is_err());
    }
}
