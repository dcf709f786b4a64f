//! CIDR parsing and decomposition.
//!
//! Supported token forms:
//! - single IPv4 address: "1.2.3.4"
//! - CIDR: "192.168.1.0/24"
//! - hostname: "example.com" (resolved, kept in the hosts map)
//! - hostname with prefix: "example.com/24"

use ipnet::Ipv4Net;
use kestrel_common::{KestrelError, KestrelResult};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use tracing::warn;

/// Parsed target set: ordered unique CIDRs plus the hostname side table.
#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    pub cidrs: Vec<Ipv4Net>,
    pub hosts_map: HashMap<Ipv4Addr, Vec<String>>,
}

impl TargetSet {
    /// Parse a batch of target tokens. Bad tokens are warned and skipped;
    /// the whole parse fails only when nothing survives. Hostname
    /// resolution is blocking DNS, so it runs off the async runtime.
    pub async fn parse(tokens: Vec<String>) -> KestrelResult<TargetSet> {
        let parsed = tokio::task::spawn_blocking(move || {
            let mut set = TargetSet::default();
            for token in &tokens {
                let t = token.trim();
                if t.is_empty() {
                    continue;
                }
                match parse_token(t) {
                    Ok((net, host)) => {
                        set.cidrs.push(net);
                        if let Some(h) = host {
                            set.hosts_map.entry(net.addr()).or_default().push(h);
                        }
                    }
                    Err(e) => warn!("parse target failed, skipped: {}", e),
                }
            }
            set
        })
        .await
        .map_err(|e| KestrelError::TargetParse(e.to_string()))?;

        let mut set = parsed;
        set.cidrs = unique(set.cidrs);
        if set.cidrs.is_empty() {
            return Err(KestrelError::TargetParse(
                "all targets format error".to_string(),
            ));
        }
        Ok(set)
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cidrs.is_empty()
    }

    /// Hostname labels recorded for an address, if any.
    #[must_use]
    pub fn host_for(&self, ip: Ipv4Addr) -> Option<&str> {
        self.hosts_map
            .get(&ip)
            .and_then(|v| v.first())
            .map(String::as_str)
    }
}

/// Parse one token into (network, optional host label).
pub fn parse_token(token: &str) -> KestrelResult<(Ipv4Net, Option<String>)> {
    let (host_part, prefix) = match token.rsplit_once('/') {
        Some((h, p)) => {
            let prefix: u8 = p
                .parse()
                .map_err(|_| KestrelError::TargetParse(format!("bad prefix in '{}'", token)))?;
            if prefix > 32 {
                return Err(KestrelError::TargetParse(format!(
                    "prefix out of range in '{}'",
                    token
                )));
            }
            (h, prefix)
        }
        None => (token, 32),
    };

    if let Ok(ip) = host_part.parse::<Ipv4Addr>() {
        let net = Ipv4Net::new(ip, prefix)
            .map_err(|e| KestrelError::TargetParse(format!("'{}': {}", token, e)))?;
        return Ok((net, None));
    }

    // hostname: resolve to the first IPv4 address
    let ip = (host_part, 0u16)
        .to_socket_addrs()
        .map_err(|e| KestrelError::TargetParse(format!("'{}': {}", host_part, e)))?
        .find_map(|a| match a.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| {
            KestrelError::TargetParse(format!("'{}' has no IPv4 address", host_part))
        })?;
    let net = Ipv4Net::new(ip, prefix)
        .map_err(|e| KestrelError::TargetParse(format!("'{}': {}", token, e)))?;
    Ok((net, Some(host_part.to_string())))
}

/// Order-preserving dedup on (network address, prefix length).
#[must_use]
pub fn unique(cidrs: Vec<Ipv4Net>) -> Vec<Ipv4Net> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(cidrs.len());
    for net in cidrs {
        if seen.insert((net.network(), net.prefix_len())) {
            out.push(net);
        }
    }
    out
}

/// Scannable host count of a network (network/broadcast excluded below /31).
#[must_use]
pub fn host_count(net: &Ipv4Net) -> usize {
    let prefix = net.prefix_len();
    if prefix >= 31 {
        1usize << (32 - prefix)
    } else {
        (1usize << (32 - prefix)) - 2
    }
}

/// Enumerate the scannable hosts of a network.
pub fn hosts(net: &Ipv4Net) -> impl Iterator<Item = Ipv4Addr> {
    net.hosts()
}

/// Decompose into child networks of the given prefix, e.g. a /16 into 256 /24s.
#[must_use]
pub fn sub_cidrs(net: &Ipv4Net, child_prefix: u8) -> Vec<Ipv4Net> {
    if child_prefix <= net.prefix_len() {
        return vec![*net];
    }
    match net.subnets(child_prefix) {
        Ok(iter) => iter.collect(),
        Err(_) => vec![*net],
    }
}

// splitmix-style avalanche; the whole spray stays deterministic per CIDR.
#[inline]
fn mix32(mut x: u32) -> u32 {
    x = x.wrapping_add(0x9e37_79b9);
    x ^= x >> 16;
    x = x.wrapping_mul(0x21f0_aaad);
    x ^= x >> 15;
    x = x.wrapping_mul(0x735a_2d97);
    x ^= x >> 15;
    x
}

/// Sample `count` pseudo-random but deterministic addresses spread
/// uniformly across the network. Reruns on the same CIDR probe identical
/// addresses. Degrades to full enumeration when `count >= |CIDR|`.
#[must_use]
pub fn spray_ips(net: &Ipv4Net, count: usize) -> Vec<Ipv4Addr> {
    if count == 0 {
        return Vec::new();
    }
    let size = host_count(net);
    if count >= size {
        return net.hosts().collect();
    }

    let first = if net.prefix_len() >= 31 {
        u32::from(net.network())
    } else {
        u32::from(net.network()) + 1
    };
    let span = size as u32;
    let seed = mix32(u32::from(net.network()) ^ (u32::from(net.prefix_len()) << 26));

    // one pick per equal-width bucket keeps the coverage uniform
    let buckets = count as u32;
    let width = span / buckets;
    let mut out = Vec::with_capacity(count);
    for i in 0..buckets {
        let lo = i * width;
        let w = if i == buckets - 1 { span - lo } else { width };
        let off = mix32(seed.wrapping_add(i)) % w;
        out.push(Ipv4Addr::from(first + lo + off));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().unwrap()
    }

    #[test]
    fn parse_ip_and_cidr() {
        let (n, host) = parse_token("192.168.1.1").unwrap();
        assert_eq!(n, net("192.168.1.1/32"));
        assert!(host.is_none());

        let (n, _) = parse_token("10.0.0.0/16").unwrap();
        assert_eq!(n.prefix_len(), 16);

        assert!(parse_token("10.0.0.0/33").is_err());
        assert!(parse_token("10.0.0.0/abc").is_err());
    }

    #[test]
    fn unique_preserves_input_order() {
        let cidrs = vec![
            net("10.0.0.0/24"),
            net("192.168.0.0/24"),
            net("10.0.0.0/24"),
            net("10.0.0.0/16"),
        ];
        let out = unique(cidrs);
        assert_eq!(
            out,
            vec![net("10.0.0.0/24"), net("192.168.0.0/24"), net("10.0.0.0/16")]
        );
    }

    #[test]
    fn host_counts() {
        assert_eq!(host_count(&net("10.0.0.0/24")), 254);
        assert_eq!(host_count(&net("10.0.0.0/31")), 2);
        assert_eq!(host_count(&net("10.0.0.1/32")), 1);
        assert_eq!(hosts(&net("10.0.0.0/24")).count(), 254);
    }

    #[test]
    fn sub_cidrs_of_a_b_class() {
        let subs = sub_cidrs(&net("10.1.0.0/16"), 24);
        assert_eq!(subs.len(), 256);
        assert_eq!(subs[0], net("10.1.0.0/24"));
        assert_eq!(subs[255], net("10.1.255.0/24"));
        // child prefix not finer than the parent: identity
        assert_eq!(sub_cidrs(&net("10.1.0.0/24"), 16), vec![net("10.1.0.0/24")]);
    }

    #[test]
    fn spray_is_deterministic_and_in_range() {
        let n = net("10.9.0.0/16");
        let a = spray_ips(&n, 8);
        let b = spray_ips(&n, 8);
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        for ip in &a {
            assert!(n.contains(ip));
        }
        // different networks sample different addresses
        let c = spray_ips(&net("10.10.0.0/16"), 8);
        assert_ne!(a, c);
    }

    #[test]
    fn spray_covers_buckets_uniformly() {
        let n = net("172.16.0.0/16");
        let picks = spray_ips(&n, 4);
        // with 4 equal buckets over a /16, each pick lands in its own quarter
        let base = u32::from(n.network()) + 1;
        let span = host_count(&n) as u32;
        for (i, ip) in picks.iter().enumerate() {
            let off = u32::from(*ip) - base;
            let lo = i as u32 * (span / 4);
            let hi = if i == 3 { span } else { lo + span / 4 };
            assert!(off >= lo && off < hi, "pick {} out of bucket", ip);
        }
    }

    #[test]
    fn spray_degrades_to_full_enumeration() {
        let n = net("192.168.1.0/29"); // 6 hosts
        let all = spray_ips(&n, 10);
        assert_eq!(all.len(), 6);
        assert_eq!(all, hosts(&n).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn target_set_dedups_and_skips_bad_tokens() {
        let set = TargetSet::parse(vec![
            "10.0.0.0/24".to_string(),
            "not-an-ip!!".to_string(),
            "10.0.0.0/24".to_string(),
        ])
        .await
        .unwrap();
        assert_eq!(set.cidrs.len(), 1);
    }

    #[tokio::test]
    async fn target_set_fails_when_nothing_survives() {
        assert!(TargetSet::parse(vec!["///".to_string()]).await.is_err());
    }
}
