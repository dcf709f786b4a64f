//! Fingerprint rule model and compilation.
//!
//! Fingers deserialize from the declarative JSON source, then `compile`
//! decodes probe payloads, compiles regexes, and lowercases literals.
//! After compilation the whole set is immutable for the run.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use kestrel_common::{FrameFrom, Framework, KestrelError, KestrelResult, Protocol};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Decode a probe payload literal: `b64|...`, `hex|...`, or raw bytes.
pub fn decode_payload(s: &str) -> Result<Vec<u8>, String> {
    if let Some(rest) = s.strip_prefix("b64|") {
        B64.decode(rest).map_err(|e| format!("bad base64 payload: {}", e))
    } else if let Some(rest) = s.strip_prefix("hex|") {
        hex::decode(rest).map_err(|e| format!("bad hex payload: {}", e))
    } else {
        Ok(s.as_bytes().to_vec())
    }
}

/// Regex and literal bundle of one rule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Regexps {
    #[serde(default)]
    pub body: Vec<String>,
    #[serde(default)]
    pub md5: Vec<String>,
    #[serde(default)]
    pub mmh3: Vec<String>,
    #[serde(default)]
    pub regexp: Vec<String>,
    #[serde(default)]
    pub version: Vec<String>,
    #[serde(default)]
    pub header: Vec<String>,
    #[serde(default)]
    pub vuln: Vec<String>,

    #[serde(skip)]
    pub compiled_regexp: Vec<Regex>,
    #[serde(skip)]
    pub compiled_vuln: Vec<Regex>,
    #[serde(skip)]
    pub compiled_version: Vec<Regex>,
}

impl Regexps {
    fn compile(&mut self) -> Result<(), String> {
        for reg in &self.regexp {
            self.compiled_regexp
                .push(Regex::new(&format!("(?i){}", reg)).map_err(|e| e.to_string())?);
        }
        for reg in &self.vuln {
            self.compiled_vuln
                .push(Regex::new(&format!("(?i){}", reg)).map_err(|e| e.to_string())?);
        }
        // version regexes stay case-sensitive and keep their capture group
        for reg in &self.version {
            self.compiled_version
                .push(Regex::new(reg).map_err(|e| e.to_string())?);
        }
        for b in &mut self.body {
            *b = b.to_lowercase();
        }
        for h in &mut self.header {
            *h = h.to_lowercase();
        }
        Ok(())
    }
}

/// Favicon digests recognized by a rule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Favicons {
    #[serde(default)]
    pub md5: Vec<String>,
    #[serde(default)]
    pub mmh3: Vec<String>,
}

/// One ordered matching rule of a finger.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rule {
    /// Flag only: marks the rule as version-bearing. Never used as a value.
    #[serde(default, rename = "version")]
    pub version_hint: String,
    #[serde(default)]
    pub favicon: Option<Favicons>,
    #[serde(default)]
    pub regexps: Option<Regexps>,
    #[serde(default, rename = "send_data")]
    pub send_data_str: String,
    #[serde(skip)]
    pub send_data: Vec<u8>,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub vuln: String,
    #[serde(default)]
    pub level: i32,
}

impl Rule {
    fn compile(&mut self) -> Result<(), String> {
        if !self.send_data_str.is_empty() {
            self.send_data = decode_payload(&self.send_data_str)?;
            // a rule that sends data is active; level 0 would make it fire
            // on passive-only scans
            if self.level == 0 {
                self.level = 1;
            }
        }
        if let Some(regexps) = &mut self.regexps {
            regexps.compile()?;
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.send_data.is_empty()
    }
}

fn default_protocol() -> Protocol {
    Protocol::Http
}

/// One named fingerprint with its ordered rules.
#[derive(Debug, Clone, Deserialize)]
pub struct Finger {
    pub name: String,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    #[serde(default)]
    pub default_port: Vec<String>,
    #[serde(default)]
    pub focus: bool,
    #[serde(default, rename = "rule")]
    pub rules: Vec<Rule>,
    /// Numeric ports this finger is indexed under, filled by `compile`.
    #[serde(skip)]
    pub ports: Vec<u16>,
}

impl Finger {
    pub fn compile(&mut self, port_handler: &dyn Fn(&[String]) -> Vec<u16>) -> KestrelResult<()> {
        if self.default_port.is_empty() {
            if self.protocol == Protocol::Http {
                self.ports = vec![80];
            }
        } else {
            self.ports = port_handler(&self.default_port);
        }
        for rule in &mut self.rules {
            rule.compile().map_err(|detail| KestrelError::RuleCompile {
                finger: self.name.clone(),
                detail,
            })?;
        }
        Ok(())
    }

    /// Build the Framework/Vuln pair for a hit on rule `index`.
    ///
    /// The captured string (from a vuln or generic regex) becomes the
    /// version when non-empty; `version_hint` is metadata and contributes
    /// nothing.
    #[must_use]
    pub fn to_result(
        &self,
        has_vuln: bool,
        captured: &str,
        index: usize,
    ) -> (Framework, Option<kestrel_common::Vuln>) {
        use kestrel_common::{Severity, Vuln};

        let mut frame = Framework::new(self.name.clone(), FrameFrom::Passive);
        if !captured.is_empty() {
            frame.version = captured.to_string();
        }

        let vuln = if has_vuln {
            let rule = &self.rules[index];
            if !rule.vuln.is_empty() {
                Some(Vuln {
                    name: rule.vuln.clone(),
                    severity: Severity::High,
                })
            } else if !rule.info.is_empty() {
                Some(Vuln {
                    name: rule.info.clone(),
                    severity: Severity::Info,
                })
            } else {
                Some(Vuln {
                    name: self.name.clone(),
                    severity: Severity::Info,
                })
            }
        } else {
            None
        };
        (frame, vuln)
    }
}

const DEFAULT_FINGERS: &str = include_str!("../data/fingers.json");

/// Compiled, immutable fingerprint collection indexed by default port.
#[derive(Debug)]
pub struct FingerDb {
    pub fingers: Vec<Arc<Finger>>,
    by_port: HashMap<u16, Vec<Arc<Finger>>>,
}

impl FingerDb {
    /// Parse and compile a JSON rule source.
    pub fn load(
        content: &str,
        port_handler: &dyn Fn(&[String]) -> Vec<u16>,
    ) -> KestrelResult<Self> {
        let mut fingers: Vec<Finger> = serde_json::from_str(content).map_err(|e| {
            KestrelError::RuleCompile {
                finger: "<source>".to_string(),
                detail: e.to_string(),
            }
        })?;
        for finger in &mut fingers {
            finger.compile(port_handler)?;
        }

        let fingers: Vec<Arc<Finger>> = fingers.into_iter().map(Arc::new).collect();
        let mut by_port: HashMap<u16, Vec<Arc<Finger>>> = HashMap::new();
        for finger in &fingers {
            for port in &finger.ports {
                by_port.entry(*port).or_default().push(finger.clone());
            }
        }
        Ok(Self { fingers, by_port })
    }

    /// Load the embedded default rule set.
    pub fn load_default(port_handler: &dyn Fn(&[String]) -> Vec<u16>) -> KestrelResult<Self> {
        Self::load(DEFAULT_FINGERS, port_handler)
    }

    /// Fingers registered under a port, in declaration order.
    #[must_use]
    pub fn fingers_for(&self, port: u16) -> &[Arc<Finger>] {
        self.by_port.get(&port).map(Vec::as_slice).unwrap_or(&[])
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.fingers.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fingers.is_empty()
    }

    /// Whether any rule carries favicon digests; gates the favicon fetch.
    #[must_use]
    pub fn has_favicons(&self) -> bool {
        self.fingers
            .iter()
            .any(|f| f.rules.iter().any(|r| r.favicon.is_some()))
    }

    /// Match favicon digests against rule `favicon` entries.
    #[must_use]
    pub fn match_favicon(&self, md5: &str, mmh3: &str) -> Option<Framework> {
        for finger in &self.fingers {
            for rule in &finger.rules {
                if let Some(fav) = &rule.favicon {
                    if fav.md5.iter().any(|h| h == md5) || fav.mmh3.iter().any(|h| h == mmh3) {
                        let mut frame = Framework::new(finger.name.clone(), FrameFrom::Active);
                        frame.is_focus = finger.focus;
                        return Some(frame);
                    }
                }
            }
        }
        None
    }
}
