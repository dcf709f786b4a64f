//! The match engine: applies a finger's rules to probe content.
//!
//! Evaluation order within a rule is fixed and fail-fast: vuln regex,
//! body substring, generic regex, MD5, MMH3, then header substring (HTTP
//! only). Across rules the declaration order wins; a rule with `send_data`
//! fires an active probe first when the scan level permits, and the fresh
//! content replaces the old for that rule and the rest of the iteration.

use crate::digest::{md5_hex, mmh3_32};
use crate::finger::{Finger, Rule};
use async_trait::async_trait;
use kestrel_common::{FrameFrom, Framework, Protocol, Vuln};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Sends active-rule payloads back through the dispatcher. Returns the raw
/// response text of the fresh probe, or `None` when nothing answered.
#[async_trait]
pub trait ActiveSender: Send + Sync {
    async fn send(&self, data: &[u8]) -> Option<String>;
}

/// A sender for passive-only evaluation; active rules simply keep their
/// original content.
pub struct NoSender;

#[async_trait]
impl ActiveSender for NoSender {
    async fn send(&self, _data: &[u8]) -> Option<String> {
        None
    }
}

/// Result of evaluating one rule against content.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RuleHit {
    pub matched: bool,
    pub has_vuln: bool,
    pub captured: String,
}

impl RuleHit {
    fn miss() -> Self {
        Self::default()
    }

    fn hit(captured: String) -> Self {
        Self {
            matched: true,
            has_vuln: false,
            captured,
        }
    }

    fn vuln(captured: String) -> Self {
        Self {
            matched: true,
            has_vuln: true,
            captured,
        }
    }
}

// First capture group when the regex has one, else empty string.
fn compiled_match(re: &regex::Regex, content: &str) -> Option<String> {
    let caps = re.captures(content)?;
    Some(
        caps.get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
    )
}

/// Evaluate one rule. `content` must already be lowercased.
#[must_use]
pub fn rule_match(rule: &Rule, content: &str, is_http: bool) -> RuleHit {
    let Some(regexps) = &rule.regexps else {
        return RuleHit::miss();
    };

    // vuln regex has the highest priority
    for re in &regexps.compiled_vuln {
        if let Some(captured) = compiled_match(re, content) {
            return RuleHit::vuln(captured);
        }
    }

    let (header, body) = if is_http {
        match content.split_once("\r\n\r\n") {
            Some((h, b)) => (h, b),
            None => ("", ""),
        }
    } else {
        ("", content)
    };

    for literal in &regexps.body {
        if body.contains(literal.as_str()) {
            return RuleHit::hit(String::new());
        }
    }

    for re in &regexps.compiled_regexp {
        if let Some(captured) = compiled_match(re, content) {
            return RuleHit::hit(captured);
        }
    }

    for digest in &regexps.md5 {
        if digest == &md5_hex(content.as_bytes()) {
            return RuleHit::hit(String::new());
        }
    }

    for digest in &regexps.mmh3 {
        if digest == &mmh3_32(content.as_bytes()) {
            return RuleHit::hit(String::new());
        }
    }

    // header matching only exists for http
    if !is_http {
        return RuleHit::miss();
    }
    for literal in &regexps.header {
        if header.contains(literal.as_str()) {
            return RuleHit::hit(String::new());
        }
    }
    RuleHit::miss()
}

/// Run a finger's rules over content. First matching rule wins.
///
/// `content` must be lowercased by the caller. Active sends replace the
/// working content for the remainder of the iteration.
pub async fn match_finger(
    finger: &Finger,
    content: &str,
    level: i32,
    stop: &AtomicBool,
    sender: &dyn ActiveSender,
) -> Option<(Framework, Option<Vuln>)> {
    let is_http = finger.protocol == Protocol::Http;
    let mut content = content.to_string();

    for (index, rule) in finger.rules.iter().enumerate() {
        if stop.load(Ordering::Relaxed) {
            return None;
        }

        let mut active = false;
        let mut active_raw = String::new();
        if rule.is_active() && level >= rule.level {
            debug!("active match with {}", rule.send_data_str);
            if let Some(fresh) = sender.send(&rule.send_data).await {
                active = true;
                active_raw = fresh.clone();
                content = fresh.to_lowercase();
            }
        }

        let hit = rule_match(rule, &content, is_http);
        if !hit.matched {
            continue;
        }

        let (mut frame, vuln) = finger.to_result(hit.has_vuln, &hit.captured, index);
        if finger.focus {
            frame.is_focus = true;
        }
        if active && is_http {
            frame.data = Some(active_raw);
        }
        if frame.version.is_empty() {
            if let Some(regexps) = &rule.regexps {
                for re in &regexps.compiled_version {
                    if let Some(version) = compiled_match(re, &content) {
                        if !version.is_empty() {
                            frame.version = version;
                            break;
                        }
                    }
                }
            }
        }
        if active {
            frame.from = FrameFrom::Active;
        }
        return Some((frame, vuln));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finger::FingerDb;
    use kestrel_common::Severity;
    use std::sync::atomic::AtomicUsize;

    fn ports(tokens: &[String]) -> Vec<u16> {
        tokens.iter().filter_map(|t| t.parse().ok()).collect()
    }

    fn load(src: &str) -> FingerDb {
        FingerDb::load(src, &ports).unwrap()
    }

    fn stop() -> AtomicBool {
        AtomicBool::new(false)
    }

    const NGINX: &str = r#"[{
        "name": "nginx",
        "protocol": "http",
        "rule": [{"regexps": {"body": ["nginx"], "version": ["nginx/([\\d.]+)"]}}]
    }]"#;

    #[tokio::test]
    async fn passive_body_match_with_version_fallback() {
        let db = load(NGINX);
        let content =
            "http/1.1 200 ok\r\nserver: nginx/1.18.0\r\n\r\n<html>nginx welcome</html>".to_string();
        let (frame, vuln) = match_finger(&db.fingers[0], &content, 0, &stop(), &NoSender)
            .await
            .unwrap();
        assert_eq!(frame.name, "nginx");
        assert_eq!(frame.version, "1.18.0");
        assert_eq!(frame.from, FrameFrom::Passive);
        assert!(vuln.is_none());
    }

    #[tokio::test]
    async fn passive_match_is_idempotent() {
        let db = load(NGINX);
        let content = "http/1.1 200 ok\r\n\r\nnginx".to_string();
        let a = match_finger(&db.fingers[0], &content, 0, &stop(), &NoSender).await;
        let b = match_finger(&db.fingers[0], &content, 0, &stop(), &NoSender).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn first_matching_rule_wins_regardless_of_later_rules() {
        let one_rule = r#"[{
            "name": "demo", "protocol": "tcp",
            "rule": [{"regexps": {"body": ["banner-a"]}}]
        }]"#;
        let two_rules = r#"[{
            "name": "demo", "protocol": "tcp",
            "rule": [
                {"regexps": {"body": ["banner-a"]}},
                {"regexps": {"body": ["banner"], "regexp": ["banner-(\\w+)"]}}
            ]
        }]"#;
        let content = "banner-a something".to_string();
        let a = match_finger(&load(one_rule).fingers[0], &content, 0, &stop(), &NoSender).await;
        let b = match_finger(&load(two_rules).fingers[0], &content, 0, &stop(), &NoSender).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn vuln_regex_has_priority_and_sets_severity() {
        let with_vuln = r#"[{
            "name": "apache", "protocol": "http",
            "rule": [{
                "regexps": {"body": ["apache"], "vuln": ["(cve-\\d{4}-\\d{4,7})"]},
                "vuln": "path-traversal"
            }]
        }]"#;
        let db = load(with_vuln);
        let content = "http/1.1 200 ok\r\n\r\napache cve-2021-41773 leaked".to_string();
        let (frame, vuln) = match_finger(&db.fingers[0], &content, 0, &stop(), &NoSender)
            .await
            .unwrap();
        let vuln = vuln.unwrap();
        assert_eq!(vuln.name, "path-traversal");
        assert_eq!(vuln.severity, Severity::High);
        // the vuln capture doubles as the version slot
        assert_eq!(frame.version, "cve-2021-41773");
    }

    #[tokio::test]
    async fn vuln_without_rule_vuln_field_downgrades_to_info() {
        let info_only = r#"[{
            "name": "leaky", "protocol": "http",
            "rule": [{"regexps": {"vuln": ["secret-token"]}}]
        }]"#;
        let db = load(info_only);
        let content = "http/1.1 200 ok\r\n\r\nsecret-token=1".to_string();
        let (_, vuln) = match_finger(&db.fingers[0], &content, 0, &stop(), &NoSender)
            .await
            .unwrap();
        let vuln = vuln.unwrap();
        assert_eq!(vuln.name, "leaky");
        assert_eq!(vuln.severity, Severity::Info);
    }

    struct CountingSender {
        calls: AtomicUsize,
        reply: &'static str,
    }

    #[async_trait]
    impl ActiveSender for CountingSender {
        async fn send(&self, _data: &[u8]) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Some(self.reply.to_string())
        }
    }

    const ACTIVE: &str = r#"[{
        "name": "tomcat", "protocol": "http",
        "rule": [{
            "send_data": "b64|R0VUIC9tYW5hZ2VyIEhUVFAvMS4wDQoNCg==",
            "level": 2,
            "regexps": {"body": ["tomcat"]}
        }]
    }]"#;

    #[tokio::test]
    async fn active_rule_gated_by_level() {
        let db = load(ACTIVE);
        let sender = CountingSender {
            calls: AtomicUsize::new(0),
            reply: "HTTP/1.1 200 OK\r\n\r\nApache Tomcat/9.0",
        };
        // level below the rule: no probe, no match
        let out = match_finger(&db.fingers[0], "http/1.1 200 ok\r\n\r\nnope", 1, &stop(), &sender)
            .await;
        assert!(out.is_none());
        assert_eq!(sender.calls.load(Ordering::SeqCst), 0);

        // level at the rule: probe fires, fresh content matches
        let (frame, _) = match_finger(&db.fingers[0], "http/1.1 200 ok\r\n\r\nnope", 2, &stop(), &sender)
            .await
            .unwrap();
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
        assert_eq!(frame.from, FrameFrom::Active);
        assert_eq!(frame.data.as_deref(), Some("HTTP/1.1 200 OK\r\n\r\nApache Tomcat/9.0"));
    }

    #[tokio::test]
    async fn rule_without_regexps_never_matches() {
        let src = r#"[{"name": "empty", "protocol": "tcp", "rule": [{}]}]"#;
        let db = load(src);
        assert!(
            match_finger(&db.fingers[0], "anything at all", 9, &stop(), &NoSender)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn header_match_skipped_for_tcp() {
        let src = r#"[{
            "name": "hdr", "protocol": "tcp",
            "rule": [{"regexps": {"header": ["server: thing"]}}]
        }]"#;
        let db = load(src);
        let content = "server: thing\r\n\r\nbody";
        assert!(
            match_finger(&db.fingers[0], content, 0, &stop(), &NoSender)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn digest_rules_match_whole_content() {
        let content = "fixed content";
        let src = format!(
            r#"[{{
                "name": "hash", "protocol": "tcp",
                "rule": [{{"regexps": {{"md5": ["{}"], "mmh3": ["{}"]}}}}]
            }}]"#,
            md5_hex(content.as_bytes()),
            mmh3_32(content.as_bytes()),
        );
        let db = load(&src);
        assert!(match_finger(&db.fingers[0], content, 0, &stop(), &NoSender)
            .await
            .is_some());
        assert!(
            match_finger(&db.fingers[0], "other content", 0, &stop(), &NoSender)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn cancellation_between_rules() {
        let db = load(NGINX);
        let cancelled = AtomicBool::new(true);
        assert!(
            match_finger(&db.fingers[0], "nginx", 0, &cancelled, &NoSender)
                .await
                .is_none()
        );
    }
}
