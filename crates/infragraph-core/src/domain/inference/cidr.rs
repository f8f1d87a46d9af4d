//! IPv4 CIDR blocks read from network metadata

use std::fmt;
use std::net::Ipv4Addr;

use serde_json::Value;

use crate::domain::graph::GraphNode;

/// An IPv4 network in CIDR notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: u32,
    prefix: u8,
}

impl Ipv4Cidr {
    /// Parse `a.b.c.d/n`; a bare address is treated as `/32`
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => {
                let prefix: u8 = prefix
                    .parse()
                    .map_err(|_| format!("invalid prefix length in '{}'", s))?;
                (addr, prefix)
            }
            None => (s, 32),
        };
        if prefix > 32 {
            return Err(format!("prefix length {} out of range in '{}'", prefix, s));
        }
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| format!("invalid IPv4 address in '{}'", s))?;
        Ok(Self {
            network: u32::from(addr) & mask(prefix),
            prefix,
        })
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    /// Whether the two blocks share at least one address
    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        let m = mask(self.prefix.min(other.prefix));
        self.network & m == other.network & m
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.prefix)
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

/// Every IPv4 block a network node declares
///
/// Reads `cidrBlock`, `cidrBlocks` and `addressSpace` (a list, a string or
/// an object with `addressPrefixes`). IPv6 ranges are ignored. Any other
/// malformed entry is an error.
pub fn cidrs_from_metadata(node: &GraphNode) -> std::result::Result<Vec<Ipv4Cidr>, String> {
    let mut raw: Vec<&str> = Vec::new();
    for key in ["cidrBlock", "cidrBlocks", "addressSpace"] {
        let Some(value) = node.metadata.get(key) else {
            continue;
        };
        collect_strings(key, value, &mut raw)?;
    }

    let mut blocks = Vec::new();
    for entry in raw {
        if entry.contains(':') {
            continue;
        }
        let block = Ipv4Cidr::parse(entry)?;
        if !blocks.contains(&block) {
            blocks.push(block);
        }
    }
    Ok(blocks)
}

fn collect_strings<'a>(
    key: &str,
    value: &'a Value,
    out: &mut Vec<&'a str>,
) -> std::result::Result<(), String> {
    match value {
        Value::Null => Ok(()),
        Value::String(s) => {
            out.push(s.as_str());
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                match item.as_str() {
                    Some(s) => out.push(s),
                    None => return Err(format!("{} contains a non-string entry", key)),
                }
            }
            Ok(())
        }
        Value::Object(map) => match map.get("addressPrefixes") {
            Some(prefixes) => collect_strings(key, prefixes, out),
            None => Err(format!("{} object has no addressPrefixes", key)),
        },
        _ => Err(format!("{} has unexpected type", key)),
    }
}
