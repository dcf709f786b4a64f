//! Port spec expansion.
//!
//! A spec is a comma list of numbers, ranges (`80-90`), and symbolic groups
//! (`top1`, `web`, `db`, ...). `icmp`/`ping` are not numeric ports; they set
//! a flag on the expanded plan and the launcher decides whether raw-socket
//! privilege allows them. Expansion is deterministic: first occurrence wins.

use kestrel_common::{KestrelError, KestrelResult};
use std::collections::HashSet;

const TOP1: &[u16] = &[80, 443, 8080];
const TOP2: &[u16] = &[80, 81, 443, 7001, 8000, 8080, 8081, 8443, 9000, 9090];
const WEB: &[u16] = &[
    80, 81, 82, 443, 1080, 3000, 5000, 7001, 7080, 8000, 8008, 8080, 8081, 8088, 8443, 8888,
    9000, 9080, 9090, 9200, 9999,
];
const DB: &[u16] = &[1433, 1521, 3306, 5432, 6379, 9200, 11211, 27017];
const WIN: &[u16] = &[53, 88, 135, 139, 389, 445, 3389, 5985];

/// Expanded port plan: ordered numeric ports plus the ICMP flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortPlan {
    pub ports: Vec<u16>,
    pub icmp: bool,
}

impl PortPlan {
    /// Drop the ICMP request, keeping the TCP list (used when the process
    /// lacks raw-socket privilege).
    pub fn drop_icmp(&mut self) {
        self.icmp = false;
    }
}

/// Resolve a symbolic group name to its port list.
#[must_use]
pub fn group_ports(name: &str) -> Option<Vec<u16>> {
    match name {
        "top1" => Some(TOP1.to_vec()),
        "top2" => Some(TOP2.to_vec()),
        "web" => Some(WEB.to_vec()),
        "db" => Some(DB.to_vec()),
        "win" => Some(WIN.to_vec()),
        "all" => Some((1..=u16::MAX).collect()),
        _ => None,
    }
}

/// Expand a full port spec string into a plan.
pub fn expand_ports(spec: &str) -> KestrelResult<PortPlan> {
    let mut plan = PortPlan::default();
    let mut seen = HashSet::new();
    let mut push = |plan: &mut PortPlan, port: u16| {
        if seen.insert(port) {
            plan.ports.push(port);
        }
    };

    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if part.eq_ignore_ascii_case("icmp") || part.eq_ignore_ascii_case("ping") {
            plan.icmp = true;
            continue;
        }
        if let Some(group) = group_ports(part) {
            for p in group {
                push(&mut plan, p);
            }
            continue;
        }
        if let Some((a, b)) = part.split_once('-') {
            let start: u16 = a
                .parse()
                .map_err(|_| KestrelError::Config(format!("invalid start port: {}", a)))?;
            let end: u16 = b
                .parse()
                .map_err(|_| KestrelError::Config(format!("invalid end port: {}", b)))?;
            if start == 0 || start > end {
                return Err(KestrelError::Config(format!("invalid port range: {}", part)));
            }
            for p in start..=end {
                push(&mut plan, p);
            }
            continue;
        }
        let port: u16 = part
            .parse()
            .map_err(|_| KestrelError::Config(format!("invalid port: {}", part)))?;
        if port == 0 {
            return Err(KestrelError::Config("port 0 is not scannable".to_string()));
        }
        push(&mut plan, port);
    }

    if plan.ports.is_empty() && !plan.icmp {
        return Err(KestrelError::Config("no ports specified".to_string()));
    }
    Ok(plan)
}

/// Expand fingerprint `default_port` tokens (numbers or group names) into
/// numeric ports. Unknown tokens are dropped. Lifted out of the finger
/// model so the rule set compiles against a plain function.
#[must_use]
pub fn expand_port_tokens(tokens: &[String]) -> Vec<u16> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for token in tokens {
        if let Some(group) = group_ports(token) {
            for p in group {
                if seen.insert(p) {
                    out.push(p);
                }
            }
        } else if let Ok(p) = token.parse::<u16>() {
            if p != 0 && seen.insert(p) {
                out.push(p);
            }
        }
    }
    out
}
