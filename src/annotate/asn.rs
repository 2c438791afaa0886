//! IP-prefix-to-ASN annotation built from daily routeview datasets.

use std::collections::HashMap;
use std::io::Read;
use std::net::IpAddr;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

/// A network annotation in the archived measurement schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    #[serde(rename = "CIDR", default, skip_serializing_if = "String::is_empty")]
    pub cidr: String,
    #[serde(rename = "ASNumber", default)]
    pub as_number: u32,
    #[serde(rename = "ASName", default, skip_serializing_if = "String::is_empty")]
    pub as_name: String,
    #[serde(rename = "Missing", default, skip_serializing_if = "std::ops::Not::not")]
    pub missing: bool,
    #[serde(rename = "Systems", default, skip_serializing_if = "Vec::is_empty")]
    pub systems: Vec<System>,
}

/// One BGP system: a multi-origin prefix announces several ASNs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct System {
    #[serde(rename = "ASNs")]
    pub asns: Vec<u32>,
}

#[derive(Debug, Clone)]
struct Route {
    cidr: String,
    systems: Vec<System>,
}

/// Longest-prefix-match table for one address family. Addresses live in the
/// low `width` bits of a u128; one map per prefix length keeps lookups at a
/// bounded number of hash probes.
struct PrefixTable {
    width: u32,
    maps: Vec<HashMap<u128, Route>>,
}

impl PrefixTable {
    fn new(width: u32) -> PrefixTable {
        PrefixTable {
            width,
            maps: (0..=width).map(|_| HashMap::new()).collect(),
        }
    }

    fn mask(&self, len: u32) -> u128 {
        if len == 0 {
            return 0;
        }
        (!0u128 << (128 - len)) >> (128 - self.width)
    }

    fn insert(&mut self, addr: u128, len: u32, route: Route) {
        if len > self.width {
            return;
        }
        let mask = self.mask(len);
        self.maps[len as usize].insert(addr & mask, route);
    }

    fn lookup(&self, addr: u128) -> Option<&Route> {
        for len in (0..=self.width).rev() {
            if let Some(route) = self.maps[len as usize].get(&(addr & self.mask(len))) {
                return Some(route);
            }
        }
        None
    }
}

/// AsnAnnotator maps IP addresses to network annotations using the daily
/// routeview prefix2as datasets and the ipinfo AS-name table.
pub struct AsnAnnotator {
    v4: PrefixTable,
    v6: PrefixTable,
    names: HashMap<u32, String>,
}

impl AsnAnnotator {
    /// Build an annotator from raw dataset contents. Each dataset may be
    /// gzip-compressed or plain text.
    pub fn parse(rv4: &[u8], rv6: &[u8], asnames: &[u8]) -> Result<AsnAnnotator> {
        let mut annotator = AsnAnnotator {
            v4: PrefixTable::new(32),
            v6: PrefixTable::new(128),
            names: HashMap::new(),
        };
        annotator.load_prefixes(&decompress(rv4)?).context("parsing IPv4 routeview data")?;
        annotator.load_prefixes(&decompress(rv6)?).context("parsing IPv6 routeview data")?;
        annotator.load_names(&decompress(asnames)?);
        Ok(annotator)
    }

    /// Load routeview pfx2as lines: "<prefix>\t<length>\t<asn>". The asn
    /// field separates multi-origin systems with '_' and the ASNs of one
    /// system with ','.
    fn load_prefixes(&mut self, data: &str) -> Result<()> {
        for line in data.lines() {
            let mut parts = line.split_whitespace();
            let (prefix, len, asns) = match (parts.next(), parts.next(), parts.next()) {
                (Some(p), Some(l), Some(a)) => (p, l, a),
                _ => continue,
            };
            let len: u32 = len.parse().with_context(|| format!("bad prefix length: {}", line))?;
            let systems: Vec<System> = asns
                .split('_')
                .map(|system| System {
                    asns: system.split(',').filter_map(|a| a.parse().ok()).collect(),
                })
                .filter(|s| !s.asns.is_empty())
                .collect();
            if systems.is_empty() {
                continue;
            }
            let addr: IpAddr = prefix
                .parse()
                .with_context(|| format!("bad prefix address: {}", line))?;
            let route = Route {
                cidr: format!("{}/{}", prefix, len),
                systems,
            };
            match addr {
                IpAddr::V4(v4) => self.v4.insert(u32::from(v4) as u128, len, route),
                IpAddr::V6(v6) => self.v6.insert(u128::from(v6), len, route),
            }
        }
        Ok(())
    }

    /// Load the ipinfo AS-name CSV: "AS<number>,<name>[,...]". Malformed
    /// lines are skipped.
    fn load_names(&mut self, data: &str) {
        for line in data.lines() {
            let (asn, rest) = match line.split_once(',') {
                Some(pair) => pair,
                None => continue,
            };
            let asn: u32 = match asn.trim().trim_start_matches("AS").parse() {
                Ok(n) => n,
                Err(_) => continue,
            };
            let name = rest.split(',').next().unwrap_or(rest).trim().trim_matches('"');
            self.names.insert(asn, name.to_string());
        }
    }

    /// Annotate an IP address. Unparsable addresses and addresses with no
    /// covering prefix produce a Missing annotation.
    pub fn annotate(&self, ip: &str) -> Network {
        let addr: IpAddr = match ip.parse() {
            Ok(a) => a,
            Err(_) => {
                return Network {
                    missing: true,
                    ..Network::default()
                }
            }
        };
        let route = match addr {
            IpAddr::V4(v4) => self.v4.lookup(u32::from(v4) as u128),
            IpAddr::V6(v6) => self.v6.lookup(u128::from(v6)),
        };
        match route {
            Some(route) => {
                let as_number = route.systems[0].asns[0];
                Network {
                    cidr: route.cidr.clone(),
                    as_number,
                    as_name: self.names.get(&as_number).cloned().unwrap_or_default(),
                    missing: false,
                    systems: route.systems.clone(),
                }
            }
            None => Network {
                missing: true,
                ..Network::default()
            },
        }
    }
}

fn decompress(data: &[u8]) -> Result<String> {
    if data.starts_with(&[0x1f, 0x8b]) {
        let mut out = String::new();
        GzDecoder::new(data)
            .read_to_string(&mut out)
            .context("decompressing dataset")?;
        return Ok(out);
    }
    String::from_utf8(data.to_vec()).context("decoding dataset")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const V4: &str = "1.0.0.0\t24\t13335\n\
                      9.0.0.0\t8\t701\n\
                      9.9.9.0\t24\t19281,19282\n\
                      12.8.0.0\t16\t7018_701\n";
    const V6: &str = "2001:db8::\t32\t64496\n";
    const NAMES: &str = "asn,name\nAS13335,Cloudflare Inc.\nAS701,\"Verizon, Inc.\"\nAS19281,Quad9\n";

    fn annotator() -> AsnAnnotator {
        AsnAnnotator::parse(V4.as_bytes(), V6.as_bytes(), NAMES.as_bytes()).unwrap()
    }

    #[test]
    fn test_exact_prefix_match() {
        let n = annotator().annotate("1.0.0.1");
        assert_eq!(n.as_number, 13335);
        assert_eq!(n.as_name, "Cloudflare Inc.");
        assert_eq!(n.cidr, "1.0.0.0/24");
        assert!(!n.missing);
    }

    #[test]
    fn test_longest_prefix_wins() {
        // 9.9.9.9 is covered by both 9.0.0.0/8 and 9.9.9.0/24.
        let n = annotator().annotate("9.9.9.9");
        assert_eq!(n.cidr, "9.9.9.0/24");
        assert_eq!(n.as_number, 19281);
        // The shorter prefix still covers the rest of the /8.
        let n = annotator().annotate("9.1.2.3");
        assert_eq!(n.cidr, "9.0.0.0/8");
        assert_eq!(n.as_number, 701);
    }

    #[test]
    fn test_multi_origin_systems() {
        let n = annotator().annotate("12.8.1.1");
        assert_eq!(n.systems.len(), 2);
        assert_eq!(n.systems[0].asns, vec![7018]);
        assert_eq!(n.systems[1].asns, vec![701]);
        assert_eq!(n.as_number, 7018);

        let n = annotator().annotate("9.9.9.1");
        assert_eq!(n.systems.len(), 1);
        assert_eq!(n.systems[0].asns, vec![19281, 19282]);
    }

    #[test]
    fn test_ipv6_lookup() {
        let n = annotator().annotate("2001:db8::1");
        assert_eq!(n.as_number, 64496);
        assert_eq!(n.cidr, "2001:db8::/32");
    }

    #[test]
    fn test_unknown_and_invalid_addresses_are_missing() {
        assert!(annotator().annotate("203.0.113.1").missing);
        assert!(annotator().annotate("not-an-ip").missing);
        assert!(annotator().annotate("").missing);
    }

    #[test]
    fn test_quoted_as_name() {
        let n = annotator().annotate("9.1.2.3");
        assert_eq!(n.as_name, "Verizon");
    }

    #[test]
    fn test_gzipped_datasets() {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(V4.as_bytes()).unwrap();
        let gz = enc.finish().unwrap();
        let a = AsnAnnotator::parse(&gz, V6.as_bytes(), NAMES.as_bytes()).unwrap();
        assert_eq!(a.annotate("1.0.0.1").as_number, 13335);
    }

    #[test]
    fn test_network_serialization_shape() {
        let n = annotator().annotate("1.0.0.1");
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["ASNumber"], 13335);
        assert_eq!(v["ASName"], "Cloudflare Inc.");
        assert!(v.get("Missing").is_none());

        let missing = annotator().annotate("203.0.113.1");
        let v = serde_json::to_value(&missing).unwrap();
        assert_eq!(v["Missing"], true);
        assert!(v.get("ASName").is_none());
    }
}
