//! Probe outcome taxonomy and the dispatcher trait seam.
//!
//! The controller and match engine talk to the network exclusively through
//! [`Prober`], which keeps them testable with mock implementations.

use crate::types::Protocol;
use async_trait::async_trait;
use std::net::Ipv4Addr;

/// Why a probe target was unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreachableReason {
    /// Connection actively refused.
    Refused,
    /// Raw socket required but the process lacks the privilege.
    Privilege,
    /// Anything else (no route, reset, resolver failure).
    Other,
}

/// Parsed pieces of an HTTP response, split on the first `\r\n\r\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpParts {
    pub status: u16,
    pub header: String,
    pub body: String,
}

/// Raw bytes returned by a live service, plus HTTP structure when present.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub raw: Vec<u8>,
    pub http: Option<HttpParts>,
}

impl ProbeResponse {
    #[inline]
    #[must_use]
    pub fn new(raw: Vec<u8>) -> Self {
        Self { raw, http: None }
    }

    /// Lossy text view of the raw bytes, as fed to the match engine.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }
}

/// Result of a single connect/send/read attempt.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Response(ProbeResponse),
    Timeout,
    Unreachable(UnreachableReason),
}

impl ProbeOutcome {
    /// A sub-range is alive iff at least one probe reports `Response`.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        matches!(self, ProbeOutcome::Response(_))
    }

    #[inline]
    #[must_use]
    pub fn response(&self) -> Option<&ProbeResponse> {
        match self {
            ProbeOutcome::Response(r) => Some(r),
            _ => None,
        }
    }
}

/// A single attempted connect+send+read against (ip, port, protocol).
///
/// Implementations never retry; the controller decides what a failure means.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(
        &self,
        ip: Ipv4Addr,
        port: u16,
        protocol: Protocol,
        send_data: Option<&[u8]>,
    ) -> ProbeOutcome;
}
