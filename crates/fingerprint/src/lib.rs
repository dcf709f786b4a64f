//! Fingerprint Engine - rule-driven service identification.
//!
//! A declarative JSON rule set is compiled once at startup (payload
//! decoding, regex compilation, literal lowercasing) and shared immutably
//! by every worker. The match engine applies rules passively and, when the
//! scan level allows, escalates to active probes through the caller's
//! sender.

pub mod digest;
pub mod finger;
pub mod matcher;

pub use digest::{md5_hex, mmh3_32};
pub use finger::{decode_payload, Favicons, Finger, FingerDb, Regexps, Rule};
pub use matcher::{match_finger, rule_match, ActiveSender, NoSender, RuleHit};
