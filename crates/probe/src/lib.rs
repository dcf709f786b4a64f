//! Probe Dispatcher - one connect/send/read attempt per (ip, port).
//!
//! Every probe is a fresh connection; there is no reuse and no retry. The
//! dispatcher reports outcomes, never errors: a dead port is data, not a
//! failure.

pub mod dispatcher;
pub mod http;
pub mod icmp;

pub use dispatcher::{ProbeDispatcher, TlsClientFactory};
pub use http::{default_get, extract_title, get_for_path, header_value, parse_http};
pub use icmp::has_raw_socket_priv;
