//! Core data types for the Kestrel scan engine.
//!
//! Records are serde-friendly so the same structs back the JSON output
//! files and the `-j` re-scan input. Hot-path helpers are `#[inline]`;
//! builder-style methods consume `self` to avoid extra clones.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Probe/service protocols understood by the dispatcher and the rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Tcp,
    Udp,
    Icmp,
}

impl Protocol {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Protocol::Http),
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            "icmp" => Some(Protocol::Icmp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Granularity at which the smart controller probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    /// /16 aggregates, probed with spray + IP-probe ports.
    B,
    /// /24 aggregates, probed with spray + port-probe ports.
    C,
    /// Full host enumeration against the user port list.
    Host,
}

/// Scan strategy selected with `-m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    /// Plain enumeration of every (ip, port) pair.
    #[serde(rename = "default")]
    Default,
    /// `s`: /24 port-probe, then host scan of live /24s.
    #[serde(rename = "s")]
    Smart,
    /// `sb`: stop after emitting live /24s.
    #[serde(rename = "sb")]
    SmartB,
    /// `sc`: emit live /16s then live /24s, then stop.
    #[serde(rename = "sc")]
    SmartC,
    /// `ss`: live /16s -> live /24s -> host scan.
    #[serde(rename = "ss")]
    SuperSmart,
    /// `a`: resolved to Smart or Default before the scan starts.
    #[serde(rename = "a")]
    Auto,
}

impl ScanMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(ScanMode::Default),
            "s" => Some(ScanMode::Smart),
            "sb" => Some(ScanMode::SmartB),
            "sc" => Some(ScanMode::SmartC),
            "ss" => Some(ScanMode::SuperSmart),
            "a" => Some(ScanMode::Auto),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Default => "default",
            ScanMode::Smart => "s",
            ScanMode::SmartB => "sb",
            ScanMode::SmartC => "sc",
            ScanMode::SuperSmart => "ss",
            ScanMode::Auto => "a",
        }
    }

    /// Largest aggregate the controller starts probing at.
    #[must_use]
    pub const fn entry_tier(&self) -> Tier {
        match self {
            ScanMode::Default | ScanMode::Auto => Tier::Host,
            ScanMode::Smart => Tier::C,
            ScanMode::SmartB | ScanMode::SmartC | ScanMode::SuperSmart => Tier::B,
        }
    }

    /// Tier at which the controller stops descending.
    #[must_use]
    pub const fn terminal_tier(&self) -> Tier {
        match self {
            ScanMode::Default | ScanMode::Auto | ScanMode::Smart | ScanMode::SuperSmart => {
                Tier::Host
            }
            ScanMode::SmartB | ScanMode::SmartC => Tier::C,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_smart(&self) -> bool {
        !matches!(self, ScanMode::Default | ScanMode::Auto)
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a framework identification was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFrom {
    Passive,
    Active,
    Guess,
}

impl FrameFrom {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            FrameFrom::Passive => "passive",
            FrameFrom::Active => "active",
            FrameFrom::Guess => "guess",
        }
    }
}

/// An identified framework or product on a probed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Framework {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    pub from: FrameFrom,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_focus: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Framework {
    #[inline]
    #[must_use]
    pub fn new<S: Into<String>>(name: S, from: FrameFrom) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            from,
            is_focus: false,
            data: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: String) -> Self {
        self.version = version;
        self
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}:{}", self.name, self.version)
        }
    }
}

/// Vulnerability severity grades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// A vulnerability (or informational note) attached to a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vuln {
    pub name: String,
    pub severity: Severity,
}

impl fmt::Display for Vuln {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.severity.as_str())
    }
}

/// One scanned (ip, port) service record.
///
/// Created once per probe that yields any response, mutated by successive
/// rule matches within that probe, immutable once the aggregator takes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midware: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frames: Vec<Framework>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vulns: Vec<Vuln>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extract: Vec<String>,
}

impl ScanRecord {
    #[inline]
    #[must_use]
    pub fn new(ip: Ipv4Addr, port: u16, protocol: Protocol) -> Self {
        Self {
            ip,
            port,
            protocol,
            url: None,
            status: None,
            title: None,
            host: None,
            language: None,
            midware: None,
            frames: Vec::new(),
            vulns: Vec::new(),
            extract: Vec::new(),
        }
    }

    /// Dedup key for the aggregator.
    #[inline]
    #[must_use]
    pub fn key(&self) -> (Ipv4Addr, u16, Protocol) {
        (self.ip, self.port, self.protocol)
    }

    /// How much identification this record carries; richer records win dedup.
    #[inline]
    #[must_use]
    pub fn population(&self) -> usize {
        self.frames.len() + self.vulns.len()
    }

    pub fn push_frame(&mut self, frame: Framework) {
        if !self.frames.iter().any(|f| f.name == frame.name) {
            self.frames.push(frame);
        }
    }

    pub fn push_vuln(&mut self, vuln: Vuln) {
        if !self.vulns.iter().any(|v| v.name == vuln.name) {
            self.vulns.push(vuln);
        }
    }

    #[inline]
    #[must_use]
    pub fn has_focus(&self) -> bool {
        self.frames.iter().any(|f| f.is_focus)
    }
}

/// Runtime scan statistics collected incrementally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    pub probed: usize,
    pub alive_hosts: usize,
    pub open: usize,
    pub identified: usize,
    pub vulns: usize,
    pub alive_b: usize,
    pub alive_c: usize,
    pub elapsed: Duration,
}

impl ScanStats {
    pub fn record(&mut self, rec: &ScanRecord) {
        self.open = self.open.saturating_add(1);
        if !rec.frames.is_empty() {
            self.identified = self.identified.saturating_add(1);
        }
        self.vulns = self.vulns.saturating_add(rec.vulns.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_tiers() {
        assert_eq!(ScanMode::Default.entry_tier(), Tier::Host);
        assert_eq!(ScanMode::Smart.entry_tier(), Tier::C);
        assert_eq!(ScanMode::SuperSmart.entry_tier(), Tier::B);
        assert_eq!(ScanMode::SmartB.terminal_tier(), Tier::C);
        assert_eq!(ScanMode::SmartC.terminal_tier(), Tier::C);
        assert_eq!(ScanMode::SuperSmart.terminal_tier(), Tier::Host);
        assert!(!ScanMode::Default.is_smart());
        assert!(ScanMode::SmartB.is_smart());
    }

    #[test]
    fn mode_parse_round_trip() {
        for s in ["default", "s", "sb", "sc", "ss", "a"] {
            assert_eq!(ScanMode::parse(s).unwrap().as_str(), s);
        }
        assert!(ScanMode::parse("turbo").is_none());
    }

    #[test]
    fn record_population_and_dedup_key() {
        let ip = Ipv4Addr::new(10, 0, 0, 1);
        let mut rec = ScanRecord::new(ip, 80, Protocol::Http);
        assert_eq!(rec.population(), 0);
        rec.push_frame(Framework::new("nginx", FrameFrom::Passive));
        rec.push_frame(Framework::new("nginx", FrameFrom::Guess)); // duplicate name ignored
        rec.push_vuln(Vuln {
            name: "CVE-2021-41773".to_string(),
            severity: Severity::High,
        });
        assert_eq!(rec.population(), 2);
        assert_eq!(rec.key(), (ip, 80, Protocol::Http));
    }

    #[test]
    fn framework_display() {
        let f = Framework::new("tomcat", FrameFrom::Passive).with_version("9.0.1".to_string());
        assert_eq!(f.to_string(), "tomcat:9.0.1");
        let f = Framework::new("tomcat", FrameFrom::Guess);
        assert_eq!(f.to_string(), "tomcat");
    }
}
