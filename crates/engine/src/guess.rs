//! Port-based service guessing.
//!
//! Fallback for live services no fingerprint rule recognized: the port
//! number alone names the likely service, flagged `from: guess` so
//! downstream consumers can weigh it accordingly.

use kestrel_common::{FrameFrom, Framework};

fn service_for_port(port: u16) -> Option<&'static str> {
    let service = match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "domain",
        80 | 8000 | 8080 | 8888 => "http",
        110 => "pop3",
        111 => "rpcbind",
        135 => "msrpc",
        139 => "netbios-ssn",
        143 => "imap",
        389 => "ldap",
        443 | 8443 => "https",
        445 => "microsoft-ds",
        873 => "rsync",
        1080 => "socks",
        1433 => "mssql",
        1521 => "oracle",
        2049 => "nfs",
        2375 => "docker",
        3306 => "mysql",
        3389 => "rdp",
        5432 => "postgresql",
        5900 => "vnc",
        5985 => "wsman",
        6379 => "redis",
        6443 => "kubernetes",
        9200 => "elasticsearch",
        11211 => "memcached",
        27017 => "mongodb",
        _ => return None,
    };
    Some(service)
}

/// Guess a framework from the port number alone.
#[must_use]
pub fn guess_frame(port: u16) -> Option<Framework> {
    service_for_port(port).map(|name| Framework::new(name, FrameFrom::Guess))
}
