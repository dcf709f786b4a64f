//! The tiered smart-scan controller.
//!
//! Tiers descend B (/16) -> C (/24) -> HOST. Each tier runs as one batch
//! on the worker pool and must fully quiesce before survivors promote, so
//! host work never starts on a range later proven dead and memory stays
//! bounded by the current tier's fan-out.

use crate::aggregator::Aggregator;
use crate::guess;
use crate::pool::run_batch;
use ipnet::Ipv4Net;
use kestrel_common::{
    KestrelError, KestrelResult, ProbeOutcome, Prober, Protocol, ScanMode, ScanRecord, Tier,
    UnreachableReason,
};
use kestrel_fingerprint::{match_finger, md5_hex, mmh3_32, ActiveSender, FingerDb};
use kestrel_probe::http;
use kestrel_targets::{hosts, spray_ips, sub_cidrs, unique, TargetSet};
use regex::Regex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Controller tuning. `mode` must be resolved (never `Auto`) before the
/// engine sees it.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: ScanMode,
    pub threads: usize,
    pub level: i32,
    /// User port list for the HOST tier.
    pub ports: Vec<u16>,
    /// ICMP enabled (requested and privileged).
    pub icmp: bool,
    /// Addresses sprayed per /16 at tier B.
    pub ip_probe_count: usize,
    /// Addresses sprayed per /24 at tier C.
    pub port_probe_count: usize,
    pub ip_probe_ports: Vec<u16>,
    pub port_probe_ports: Vec<u16>,
    /// Optional harvest regex applied to response text.
    pub extract: Option<Regex>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ScanMode::Default,
            threads: 4000,
            level: 1,
            ports: vec![80],
            icmp: false,
            ip_probe_count: 4,
            port_probe_count: 4,
            ip_probe_ports: vec![80, 443, 445],
            port_probe_ports: vec![80, 443, 8080],
            extract: None,
        }
    }
}

/// Drives probes through the tiers and feeds identified services to the
/// aggregator. Cheap to clone; workers each hold a clone.
#[derive(Clone)]
pub struct ScanController {
    prober: Arc<dyn Prober>,
    fingers: Arc<FingerDb>,
    config: Arc<EngineConfig>,
    stop: Arc<AtomicBool>,
    privilege_warned: Arc<AtomicBool>,
}

impl ScanController {
    pub fn new(prober: Arc<dyn Prober>, fingers: Arc<FingerDb>, config: EngineConfig) -> Self {
        Self {
            prober,
            fingers,
            config: Arc::new(config),
            stop: Arc::new(AtomicBool::new(false)),
            privilege_warned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared stop token; raising it halts workers at the next dequeue.
    #[must_use]
    pub fn stop_token(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn cancelled(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Run the full scan for a target set.
    pub async fn run(&self, targets: &TargetSet, agg: &Aggregator) -> KestrelResult<()> {
        let entry = self.config.mode.entry_tier();
        let mut b_nets: Vec<Ipv4Net> = Vec::new();
        let mut c_nets: Vec<Ipv4Net> = Vec::new();
        let mut host_nets: Vec<Ipv4Net> = Vec::new();

        // a CIDR enters at the mode's tier clamped by its own size: nothing
        // coarser than the range itself
        for net in &targets.cidrs {
            let natural = if net.prefix_len() >= 24 {
                Tier::Host
            } else if net.prefix_len() >= 16 {
                Tier::C
            } else {
                Tier::B
            };
            match entry.max(natural) {
                Tier::B => b_nets.extend(sub_cidrs(net, 16)),
                Tier::C => c_nets.extend(sub_cidrs(net, 24)),
                Tier::Host => host_nets.push(*net),
            }
        }

        if !b_nets.is_empty() {
            let b_nets = unique(b_nets);
            info!("tier B: probing {} /16 range(s)", b_nets.len());
            let alive = self.probe_ranges(b_nets, Tier::B, agg).await;
            info!("tier B: {} alive", alive.len());
            for net in &alive {
                c_nets.extend(sub_cidrs(net, 24));
            }
        }
        if self.cancelled() {
            return Err(KestrelError::Cancelled);
        }

        if !c_nets.is_empty() {
            let c_nets = unique(c_nets);
            info!("tier C: probing {} /24 range(s)", c_nets.len());
            let alive = self.probe_ranges(c_nets, Tier::C, agg).await;
            info!("tier C: {} alive", alive.len());
            host_nets.extend(alive);
        }
        if self.cancelled() {
            return Err(KestrelError::Cancelled);
        }

        if self.config.mode.terminal_tier() == Tier::C {
            // sb/sc stop here; the side sinks already carry the survivors
            return Ok(());
        }

        if !host_nets.is_empty() {
            self.host_scan(unique(host_nets), targets, agg).await;
        }
        if self.cancelled() {
            return Err(KestrelError::Cancelled);
        }
        Ok(())
    }

    /// Re-scan explicit (ip, port) pairs, e.g. from a previous result file.
    pub async fn run_pairs(&self, pairs: Vec<(Ipv4Addr, u16)>, agg: &Aggregator) -> KestrelResult<()> {
        self.scan_pairs(pairs, Arc::new(HashMap::new()), agg).await;
        if self.cancelled() {
            return Err(KestrelError::Cancelled);
        }
        Ok(())
    }

    /// Probe a batch of same-tier ranges; returns the alive ones in input
    /// order and feeds the matching side sink.
    async fn probe_ranges(&self, nets: Vec<Ipv4Net>, tier: Tier, agg: &Aggregator) -> Vec<Ipv4Net> {
        let (count, probe_ports, use_icmp) = match tier {
            Tier::B => (
                self.config.ip_probe_count,
                self.config.ip_probe_ports.clone(),
                self.config.icmp,
            ),
            _ => (
                self.config.port_probe_count,
                self.config.port_probe_ports.clone(),
                false,
            ),
        };

        let alive: Arc<Vec<AtomicBool>> =
            Arc::new((0..nets.len()).map(|_| AtomicBool::new(false)).collect());
        let mut items = Vec::new();
        for (slot, net) in nets.iter().enumerate() {
            for ip in spray_ips(net, count) {
                items.push((slot, ip));
            }
        }

        let this = self.clone();
        let flags = alive.clone();
        let probe_ports = Arc::new(probe_ports);
        run_batch(items, self.config.threads, &self.stop, move |(slot, ip)| {
            let this = this.clone();
            let flags = flags.clone();
            let probe_ports = probe_ports.clone();
            async move {
                // first positive answer settles the range; skip the rest
                if flags[slot].load(Ordering::Relaxed) {
                    return;
                }
                if this.ip_alive(ip, &probe_ports, use_icmp).await {
                    flags[slot].store(true, Ordering::Relaxed);
                }
            }
        })
        .await;

        let survivors: Vec<Ipv4Net> = nets
            .into_iter()
            .enumerate()
            .filter(|(slot, _)| alive[*slot].load(Ordering::Relaxed))
            .map(|(_, net)| net)
            .collect();
        for net in &survivors {
            match tier {
                // sb writes surviving /24s only; sc and ss carry the /16s too
                Tier::B => {
                    if self.config.mode != ScanMode::SmartB {
                        agg.alive_b(*net);
                    }
                }
                _ => agg.alive_c(*net),
            }
        }
        survivors
    }

    /// Liveness check for one address against a probe port list.
    async fn ip_alive(&self, ip: Ipv4Addr, ports: &[u16], use_icmp: bool) -> bool {
        if use_icmp {
            match self.prober.probe(ip, 0, Protocol::Icmp, None).await {
                ProbeOutcome::Response(_) => return true,
                ProbeOutcome::Unreachable(UnreachableReason::Privilege) => {
                    if !self.privilege_warned.swap(true, Ordering::Relaxed) {
                        warn!("no raw-socket privilege, icmp probes disabled for this run");
                    }
                }
                _ => {}
            }
        }
        for &port in ports {
            if self.cancelled() {
                return false;
            }
            if self
                .prober
                .probe(ip, port, Protocol::Tcp, None)
                .await
                .is_alive()
            {
                return true;
            }
        }
        false
    }

    /// HOST tier: full enumeration of the surviving ranges against the
    /// user port list.
    async fn host_scan(&self, nets: Vec<Ipv4Net>, targets: &TargetSet, agg: &Aggregator) {
        let host_labels = Arc::new(targets.hosts_map.clone());

        if self.config.icmp {
            let mut ips = Vec::new();
            for net in &nets {
                ips.extend(hosts(net));
            }
            info!("alive probe: pinging {} host(s)", ips.len());
            let this = self.clone();
            let ping_agg = agg.clone();
            run_batch(ips, self.config.threads, &self.stop, move |ip| {
                let this = this.clone();
                let agg = ping_agg.clone();
                async move {
                    match this.prober.probe(ip, 0, Protocol::Icmp, None).await {
                        ProbeOutcome::Response(_) => agg.alive_host(ip),
                        ProbeOutcome::Unreachable(UnreachableReason::Privilege) => {
                            if !this.privilege_warned.swap(true, Ordering::Relaxed) {
                                warn!("no raw-socket privilege, icmp probes disabled for this run");
                            }
                        }
                        _ => {}
                    }
                }
            })
            .await;
        }

        let mut pairs = Vec::new();
        for net in &nets {
            for ip in hosts(net) {
                for &port in &self.config.ports {
                    pairs.push((ip, port));
                }
            }
        }
        info!("host scan: {} probe(s)", pairs.len());
        self.scan_pairs(pairs, host_labels, agg).await;
    }

    async fn scan_pairs(
        &self,
        pairs: Vec<(Ipv4Addr, u16)>,
        host_labels: Arc<HashMap<Ipv4Addr, Vec<String>>>,
        agg: &Aggregator,
    ) {
        let this = self.clone();
        let agg = agg.clone();
        run_batch(pairs, self.config.threads, &self.stop, move |(ip, port)| {
            let this = this.clone();
            let agg = agg.clone();
            let host_labels = host_labels.clone();
            async move {
                this.probe_and_report(ip, port, &host_labels, &agg).await;
            }
        })
        .await;
    }

    /// One (ip, port): probe, classify, fingerprint, report.
    async fn probe_and_report(
        &self,
        ip: Ipv4Addr,
        port: u16,
        host_labels: &HashMap<Ipv4Addr, Vec<String>>,
        agg: &Aggregator,
    ) {
        let outcome = self.prober.probe(ip, port, Protocol::Tcp, None).await;
        let ProbeOutcome::Response(mut response) = outcome else {
            return;
        };
        agg.alive_host(ip);

        let mut protocol = Protocol::Tcp;
        if response.http.is_some() {
            protocol = Protocol::Http;
        } else if response.raw.is_empty() {
            // silent service: ask it an HTTP question before giving up
            if let ProbeOutcome::Response(fresh) =
                self.prober.probe(ip, port, Protocol::Http, None).await
            {
                if fresh.http.is_some() {
                    protocol = Protocol::Http;
                }
                if !fresh.raw.is_empty() {
                    response = fresh;
                }
            }
        }

        let mut record = ScanRecord::new(ip, port, protocol);
        record.host = host_labels
            .get(&ip)
            .and_then(|v| v.first())
            .cloned();
        if let Some(parts) = &response.http {
            let scheme = if port == 443 { "https" } else { "http" };
            record.url = Some(format!("{}://{}:{}", scheme, ip, port));
            record.status = Some(parts.status.to_string());
            record.title = http::extract_title(&parts.body);
            record.midware = http::header_value(&parts.header, "server");
            record.language = http::header_value(&parts.header, "x-powered-by");
        }

        let text = response.text();
        let content = text.to_lowercase();

        for finger in self.fingers.fingers_for(port) {
            if self.cancelled() {
                break;
            }
            // udp fingers drive their own probes; everything else must
            // agree with the observed protocol
            let (finger_content, sender_protocol) = if finger.protocol == Protocol::Udp {
                ("", Protocol::Udp)
            } else if finger.protocol == protocol {
                (content.as_str(), protocol)
            } else {
                continue;
            };
            let sender = RuleSender {
                prober: self.prober.clone(),
                ip,
                port,
                protocol: sender_protocol,
            };
            if let Some((frame, vuln)) = match_finger(
                finger,
                finger_content,
                self.config.level,
                &self.stop,
                &sender,
            )
            .await
            {
                debug!("{}:{} identified as {}", ip, port, frame.name);
                record.push_frame(frame);
                if let Some(vuln) = vuln {
                    record.push_vuln(vuln);
                }
            }
        }

        if record.frames.is_empty() {
            if let Some(frame) = guess::guess_frame(port) {
                record.push_frame(frame);
            }
        }

        if protocol == Protocol::Http && self.config.level >= 1 && self.fingers.has_favicons() {
            if let Some(frame) = self.favicon_probe(ip, port).await {
                record.push_frame(frame);
            }
        }

        if let Some(re) = &self.config.extract {
            for m in re.find_iter(&text) {
                record.extract.push(m.as_str().to_string());
            }
        }

        agg.submit(record);
    }

    /// Fetch `/favicon.ico`, hash it, and look the digests up in the rule
    /// set.
    async fn favicon_probe(&self, ip: Ipv4Addr, port: u16) -> Option<kestrel_common::Framework> {
        let request = http::get_for_path(&ip.to_string(), "/favicon.ico");
        let outcome = self
            .prober
            .probe(ip, port, Protocol::Http, Some(&request))
            .await;
        let response = outcome.response()?;
        let parts = response.http.as_ref()?;
        if parts.status != 200 {
            return None;
        }
        let body = body_bytes(&response.raw)?;
        if body.is_empty() {
            return None;
        }
        self.fingers
            .match_favicon(&md5_hex(body), &mmh3_32(body))
    }
}

/// Body bytes after the first `\r\n\r\n`, for binary-safe hashing.
fn body_bytes(raw: &[u8]) -> Option<&[u8]> {
    raw.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| &raw[pos + 4..])
}

/// Wires active-rule payloads back through the dispatcher for one target.
struct RuleSender {
    prober: Arc<dyn Prober>,
    ip: Ipv4Addr,
    port: u16,
    protocol: Protocol,
}

#[async_trait::async_trait]
impl ActiveSender for RuleSender {
    async fn send(&self, data: &[u8]) -> Option<String> {
        self.prober
            .probe(self.ip, self.port, self.protocol, Some(data))
            .await
            .response()
            .map(|r| r.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator;
    use async_trait::async_trait;
    use kestrel_common::ProbeResponse;
    use tokio::sync::Mutex;

    const NGINX_DB: &str = r#"[{
        "name": "nginx",
        "protocol": "http",
        "default_port": ["80"],
        "rule": [{"regexps": {"header": ["server: nginx"], "version": ["nginx/([\\d.]+)"]}}]
    }]"#;

    fn db() -> Arc<FingerDb> {
        Arc::new(
            FingerDb::load(NGINX_DB, &kestrel_targets::expand_port_tokens).unwrap(),
        )
    }

    async fn targets(spec: &str) -> TargetSet {
        TargetSet::parse(vec![spec.to_string()]).await.unwrap()
    }

    /// Probe log plus a response table keyed by closures.
    struct MockProber {
        log: Mutex<Vec<(Ipv4Addr, u16, Protocol)>>,
        respond: Box<dyn Fn(Ipv4Addr, u16, Protocol) -> Option<Vec<u8>> + Send + Sync>,
    }

    impl MockProber {
        fn new(
            respond: impl Fn(Ipv4Addr, u16, Protocol) -> Option<Vec<u8>> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                log: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }

        async fn probes(&self) -> Vec<(Ipv4Addr, u16, Protocol)> {
            self.log.lock().await.clone()
        }
    }

    #[async_trait]
    impl Prober for MockProber {
        async fn probe(
            &self,
            ip: Ipv4Addr,
            port: u16,
            protocol: Protocol,
            _send_data: Option<&[u8]>,
        ) -> ProbeOutcome {
            self.log.lock().await.push((ip, port, protocol));
            match (self.respond)(ip, port, protocol) {
                Some(raw) => {
                    let mut response = ProbeResponse::new(raw);
                    response.http = http::parse_http(&response.raw);
                    ProbeOutcome::Response(response)
                }
                None => ProbeOutcome::Timeout,
            }
        }
    }

    fn config(mode: ScanMode) -> EngineConfig {
        EngineConfig {
            mode,
            threads: 64,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn default_mode_probes_every_host_once() {
        // Scenario: /24 in default mode with port 80 -> exactly 254 probes
        let prober = MockProber::new(|_, _, _| None);
        let controller = ScanController::new(prober.clone(), db(), config(ScanMode::Default));
        let (agg, handle) = aggregator::spawn();

        controller
            .run(&targets("10.0.0.0/24").await, &agg)
            .await
            .unwrap();
        drop(agg);
        let report = handle.finish().await;

        let probes = prober.probes().await;
        assert_eq!(probes.len(), 254);
        assert!(probes.iter().all(|(_, port, proto)| *port == 80 && *proto == Protocol::Tcp));
        let mut ips: Vec<_> = probes.iter().map(|(ip, _, _)| *ip).collect();
        ips.sort();
        ips.dedup();
        assert_eq!(ips.len(), 254);
        assert!(report.is_empty());
    }

    fn scenario_b_responder(ip: Ipv4Addr, port: u16, _proto: Protocol) -> Option<Vec<u8>> {
        let in_16 = Ipv4Addr::new(10, 0, 0, 0);
        let in_24 = Ipv4Addr::new(10, 0, 5, 0);
        let live: Ipv4Addr = Ipv4Addr::new(10, 0, 5, 7);
        let oct = ip.octets();
        let in_target_16 = oct[0] == in_16.octets()[0] && oct[1] == in_16.octets()[1];
        let in_target_24 = in_target_16 && oct[2] == in_24.octets()[2];

        if ip == live && port == 80 {
            return Some(
                b"HTTP/1.1 200 OK\r\nServer: nginx/1.18.0\r\n\r\n<html><title>it works</title></html>"
                    .to_vec(),
            );
        }
        // ip-probe liveness for the whole /16 on a port outside the
        // port-probe and user lists
        if in_target_16 && port == 445 {
            return Some(Vec::new());
        }
        // port-probe liveness for the one live /24
        if in_target_24 && port == 8080 {
            return Some(Vec::new());
        }
        None
    }

    #[tokio::test]
    async fn supersmart_descends_only_into_live_ranges() {
        let prober = MockProber::new(scenario_b_responder);
        let controller = ScanController::new(prober.clone(), db(), config(ScanMode::SuperSmart));
        let (agg, handle) = aggregator::spawn();

        controller
            .run(&targets("10.0.0.0/16").await, &agg)
            .await
            .unwrap();
        drop(agg);
        let report = handle.finish().await;

        assert_eq!(report.smart_b, vec!["10.0.0.0/16".parse::<Ipv4Net>().unwrap()]);
        assert_eq!(report.smart_c, vec!["10.0.5.0/24".parse::<Ipv4Net>().unwrap()]);

        let records: Vec<_> = report.into_records().collect();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.ip, Ipv4Addr::new(10, 0, 5, 7));
        assert_eq!(rec.port, 80);
        assert_eq!(rec.protocol, Protocol::Http);
        assert_eq!(rec.frames[0].name, "nginx");
        assert_eq!(rec.frames[0].version, "1.18.0");
        assert_eq!(rec.title.as_deref(), Some("it works"));

        // host enumeration happened only inside the live /24: a dead /24
        // saw its spray picks, never the 254-host sweep
        let probes = prober.probes().await;
        let mut dead_24_ips: Vec<_> = probes
            .iter()
            .filter(|(ip, _, _)| ip.octets()[2] == 7)
            .map(|(ip, _, _)| *ip)
            .collect();
        dead_24_ips.sort();
        dead_24_ips.dedup();
        assert!(
            dead_24_ips.len() <= 8,
            "host scan leaked into a dead /24 ({} ips probed)",
            dead_24_ips.len()
        );
    }

    #[tokio::test]
    async fn smart_b_mode_never_reaches_host_tier() {
        let prober = MockProber::new(scenario_b_responder);
        let controller = ScanController::new(prober.clone(), db(), config(ScanMode::SmartB));
        let (agg, handle) = aggregator::spawn();

        controller
            .run(&targets("10.0.0.0/16").await, &agg)
            .await
            .unwrap();
        drop(agg);
        let report = handle.finish().await;

        assert!(report.smart_b.is_empty(), "sb must not emit the /16 sink");
        assert_eq!(report.smart_c, vec!["10.0.5.0/24".parse::<Ipv4Net>().unwrap()]);
        assert!(report.is_empty(), "sb must not produce host records");

        // the live /24 saw only its spray, never the 254-host enumeration
        let probes = prober.probes().await;
        let mut live_24_ips: Vec<_> = probes
            .iter()
            .filter(|(ip, _, _)| ip.octets()[2] == 5 && ip.octets()[0] == 10)
            .map(|(ip, _, _)| *ip)
            .collect();
        live_24_ips.sort();
        live_24_ips.dedup();
        assert!(
            live_24_ips.len() <= 8,
            "expected spray-only probing, saw {} ips",
            live_24_ips.len()
        );
    }

    #[tokio::test]
    async fn slash32_in_supersmart_goes_straight_to_host() {
        let prober = MockProber::new(|_, _, _| None);
        let controller = ScanController::new(prober.clone(), db(), config(ScanMode::SuperSmart));
        let (agg, handle) = aggregator::spawn();
        controller
            .run(&targets("192.168.1.10").await, &agg)
            .await
            .unwrap();
        drop(agg);
        handle.finish().await;

        let probes = prober.probes().await;
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0], (Ipv4Addr::new(192, 168, 1, 10), 80, Protocol::Tcp));
    }

    #[tokio::test]
    async fn silent_service_gets_a_guess_frame() {
        let target = Ipv4Addr::new(10, 0, 0, 5);
        let prober = MockProber::new(move |ip, port, proto| {
            // connects but never says anything, including to the GET
            (ip == target && port == 3306 && proto == Protocol::Tcp).then(Vec::new)
        });
        let mut cfg = config(ScanMode::Default);
        cfg.ports = vec![3306];
        let controller = ScanController::new(prober.clone(), db(), cfg);
        let (agg, handle) = aggregator::spawn();
        controller
            .run(&targets("10.0.0.5").await, &agg)
            .await
            .unwrap();
        drop(agg);
        let report = handle.finish().await;

        let records: Vec<_> = report.into_records().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frames[0].name, "mysql");
        assert_eq!(records[0].frames[0].from, kestrel_common::FrameFrom::Guess);
    }

    #[tokio::test]
    async fn extract_regex_harvests_response_text() {
        let target = Ipv4Addr::new(10, 0, 0, 6);
        let prober = MockProber::new(move |ip, port, _| {
            (ip == target && port == 80).then(|| {
                b"HTTP/1.1 200 OK\r\n\r\napi_key=token-abc123 other=token-zzz".to_vec()
            })
        });
        let mut cfg = config(ScanMode::Default);
        cfg.extract = Some(Regex::new(r"token-\w+").unwrap());
        let controller = ScanController::new(prober.clone(), db(), cfg);
        let (agg, handle) = aggregator::spawn();
        controller
            .run(&targets("10.0.0.6").await, &agg)
            .await
            .unwrap();
        drop(agg);
        let report = handle.finish().await;
        let records: Vec<_> = report.into_records().collect();
        assert_eq!(records[0].extract, vec!["token-abc123", "token-zzz"]);
    }

    #[tokio::test]
    async fn cancelled_run_reports_cancellation() {
        let prober = MockProber::new(|_, _, _| None);
        let controller = ScanController::new(prober, db(), config(ScanMode::Default));
        controller.stop_token().store(true, Ordering::Relaxed);
        let (agg, handle) = aggregator::spawn();
        let err = controller
            .run(&targets("10.0.0.0/24").await, &agg)
            .await
            .unwrap_err();
        assert!(matches!(err, KestrelError::Cancelled));
        drop(agg);
        handle.finish().await;
    }
}
