//! TCP/UDP/ICMP probe execution.

use async_trait::async_trait;
use kestrel_common::{
    HttpParts, ProbeOutcome, ProbeResponse, Prober, Protocol, UnreachableReason,
};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use crate::http;
use crate::icmp;

const READ_CAP: usize = 64 * 1024;
const CHUNK: usize = 4096;

/// TLS connector built once per run and shared by every probe.
///
/// Minimum version stays at 1.0 and verification is off: the dispatcher
/// fingerprints legacy services, it does not trust them.
#[derive(Clone)]
pub struct TlsClientFactory {
    connector: tokio_native_tls::TlsConnector,
}

impl TlsClientFactory {
    pub fn new() -> Result<Self, native_tls::Error> {
        let connector = native_tls::TlsConnector::builder()
            .min_protocol_version(Some(native_tls::Protocol::Tlsv10))
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;
        Ok(Self {
            connector: tokio_native_tls::TlsConnector::from(connector),
        })
    }
}

/// Executes a single connect/send/read attempt per (ip, port).
pub struct ProbeDispatcher {
    connect_timeout: Duration,
    read_timeout: Duration,
    tls: TlsClientFactory,
}

impl ProbeDispatcher {
    pub fn new(tls: TlsClientFactory) -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
            tls,
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    async fn connect(&self, addr: SocketAddr) -> Result<TcpStream, ProbeOutcome> {
        match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => match e.kind() {
                ErrorKind::ConnectionRefused => {
                    Err(ProbeOutcome::Unreachable(UnreachableReason::Refused))
                }
                ErrorKind::TimedOut | ErrorKind::WouldBlock => Err(ProbeOutcome::Timeout),
                _ => Err(ProbeOutcome::Unreachable(UnreachableReason::Other)),
            },
            Err(_) => Err(ProbeOutcome::Timeout),
        }
    }

    /// Write the payload (if any) and drain the response until EOF, cap, or
    /// the read deadline.
    async fn exchange<S>(&self, stream: &mut S, payload: Option<&[u8]>) -> Vec<u8>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        if let Some(data) = payload {
            if timeout(self.read_timeout, stream.write_all(data)).await.is_err() {
                return Vec::new();
            }
        }

        let mut out = Vec::new();
        let deadline = tokio::time::Instant::now() + self.read_timeout;
        let mut buf = [0u8; CHUNK];
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() || out.len() >= READ_CAP {
                break;
            }
            match timeout(remaining, stream.read(&mut buf)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => out.extend_from_slice(&buf[..n]),
                Ok(Err(_)) | Err(_) => break,
            }
        }
        out
    }

    async fn tcp_probe(
        &self,
        ip: Ipv4Addr,
        port: u16,
        protocol: Protocol,
        payload: Option<&[u8]>,
    ) -> ProbeOutcome {
        let addr = SocketAddr::new(ip.into(), port);
        let owned_get;
        let payload = match (payload, protocol) {
            (Some(p), _) => Some(p),
            (None, Protocol::Http) => {
                owned_get = http::default_get(&ip.to_string());
                Some(owned_get.as_slice())
            }
            (None, _) => None,
        };

        if port == 443 {
            return self.tls_probe(addr, ip, payload).await;
        }

        let mut stream = match self.connect(addr).await {
            Ok(s) => s,
            Err(outcome) => return outcome,
        };
        let raw = self.exchange(&mut stream, payload).await;

        // TLS record bytes in the clear mean the service wants a handshake;
        // retry wrapped on a fresh connection.
        if looks_like_tls(&raw) {
            debug!("tls record from {}:{} on plaintext probe, retrying wrapped", ip, port);
            return self.tls_probe(addr, ip, payload).await;
        }

        self.finish(raw, protocol)
    }

    async fn tls_probe(
        &self,
        addr: SocketAddr,
        ip: Ipv4Addr,
        payload: Option<&[u8]>,
    ) -> ProbeOutcome {
        let stream = match self.connect(addr).await {
            Ok(s) => s,
            Err(outcome) => return outcome,
        };
        let domain = ip.to_string();
        let mut tls_stream =
            match timeout(self.connect_timeout, self.tls.connector.connect(&domain, stream)).await
            {
                Ok(Ok(s)) => s,
                Ok(Err(_)) => return ProbeOutcome::Unreachable(UnreachableReason::Other),
                Err(_) => return ProbeOutcome::Timeout,
            };
        let raw = self.exchange(&mut tls_stream, payload).await;
        self.finish(raw, Protocol::Http)
    }

    async fn udp_probe(&self, ip: Ipv4Addr, port: u16, payload: Option<&[u8]>) -> ProbeOutcome {
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(_) => return ProbeOutcome::Unreachable(UnreachableReason::Other),
        };
        let addr = SocketAddr::new(ip.into(), port);
        let data = payload.unwrap_or(b"\r\n");
        if socket.send_to(data, addr).await.is_err() {
            return ProbeOutcome::Unreachable(UnreachableReason::Other);
        }
        let mut buf = vec![0u8; CHUNK];
        match timeout(self.read_timeout, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, _))) => {
                buf.truncate(n);
                ProbeOutcome::Response(ProbeResponse::new(buf))
            }
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                ProbeOutcome::Unreachable(UnreachableReason::Refused)
            }
            Ok(Err(_)) => ProbeOutcome::Unreachable(UnreachableReason::Other),
            Err(_) => ProbeOutcome::Timeout,
        }
    }

    /// A connected socket with no banner is still a live service.
    fn finish(&self, raw: Vec<u8>, protocol: Protocol) -> ProbeOutcome {
        let http: Option<HttpParts> = match protocol {
            Protocol::Http => http::parse_http(&raw),
            _ => {
                if raw.starts_with(b"HTTP/") {
                    http::parse_http(&raw)
                } else {
                    None
                }
            }
        };
        let mut response = ProbeResponse::new(raw);
        response.http = http;
        ProbeOutcome::Response(response)
    }
}

fn looks_like_tls(raw: &[u8]) -> bool {
    raw.len() >= 3 && (raw[0] == 0x15 || raw[0] == 0x16) && raw[1] == 0x03
}

#[async_trait]
impl Prober for ProbeDispatcher {
    async fn probe(
        &self,
        ip: Ipv4Addr,
        port: u16,
        protocol: Protocol,
        send_data: Option<&[u8]>,
    ) -> ProbeOutcome {
        match protocol {
            Protocol::Icmp => {
                let read_timeout = self.read_timeout;
                tokio::task::spawn_blocking(move || icmp::ping(ip, read_timeout))
                    .await
                    .unwrap_or(ProbeOutcome::Unreachable(UnreachableReason::Other))
            }
            Protocol::Udp => self.udp_probe(ip, port, send_data).await,
            Protocol::Tcp | Protocol::Http => self.tcp_probe(ip, port, protocol, send_data).await,
        }
    }
}
