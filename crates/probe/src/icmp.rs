//! ICMP echo probe over a raw Layer-4 socket.
//!
//! Raw sockets need CAP_NET_RAW; without it the probe degrades to
//! `Unreachable` with a privilege reason and the controller decides how
//! loudly to complain.

use kestrel_common::{ProbeOutcome, ProbeResponse, UnreachableReason};
use pnet::packet::icmp::echo_request::{IcmpCodes, MutableEchoRequestPacket};
use pnet::packet::icmp::{checksum, IcmpPacket, IcmpTypes, MutableIcmpPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::Packet;
use pnet::transport::{
    icmp_packet_iter, transport_channel, TransportChannelType, TransportProtocol,
};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

const ICMP_HEADER: usize = 8;
const PAYLOAD: usize = 16;

/// Whether this process can open a raw ICMP socket at all.
#[must_use]
pub fn has_raw_socket_priv() -> bool {
    let channel_type =
        TransportChannelType::Layer4(TransportProtocol::Ipv4(IpNextHeaderProtocols::Icmp));
    transport_channel(256, channel_type).is_ok()
}

/// Send one echo request and wait for a matching reply. Blocking; callers
/// run it on a blocking thread.
pub fn ping(dst: Ipv4Addr, wait: Duration) -> ProbeOutcome {
    let channel_type =
        TransportChannelType::Layer4(TransportProtocol::Ipv4(IpNextHeaderProtocols::Icmp));
    let (mut tx, mut rx) = match transport_channel(4096, channel_type) {
        Ok(pair) => pair,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            return ProbeOutcome::Unreachable(UnreachableReason::Privilege);
        }
        Err(_) => return ProbeOutcome::Unreachable(UnreachableReason::Other),
    };

    let mut buf = [0u8; ICMP_HEADER + PAYLOAD];
    // identifier derived from the destination so concurrent pings do not
    // claim each other's replies
    let ident = (u32::from(dst) & 0xffff) as u16;
    {
        let Some(mut echo) = MutableEchoRequestPacket::new(&mut buf) else {
            return ProbeOutcome::Unreachable(UnreachableReason::Other);
        };
        echo.set_icmp_type(IcmpTypes::EchoRequest);
        echo.set_icmp_code(IcmpCodes::NoCode);
        echo.set_identifier(ident);
        echo.set_sequence_number(1);
        echo.set_payload(&[0x6b; PAYLOAD]);
    }
    {
        let Some(mut header) = MutableIcmpPacket::new(&mut buf) else {
            return ProbeOutcome::Unreachable(UnreachableReason::Other);
        };
        let sum = checksum(&header.to_immutable());
        header.set_checksum(sum);
    }

    let Some(packet) = IcmpPacket::new(&buf) else {
        return ProbeOutcome::Unreachable(UnreachableReason::Other);
    };
    if tx.send_to(packet, IpAddr::V4(dst)).is_err() {
        return ProbeOutcome::Unreachable(UnreachableReason::Other);
    }

    let mut iter = icmp_packet_iter(&mut rx);
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return ProbeOutcome::Timeout;
        }
        match iter.next_with_timeout(remaining) {
            Ok(Some((reply, addr))) => {
                if addr != IpAddr::V4(dst) {
                    continue;
                }
                match reply.get_icmp_type() {
                    t if t == IcmpTypes::EchoReply => {
                        return ProbeOutcome::Response(ProbeResponse::new(
                            reply.packet().to_vec(),
                        ));
                    }
                    t if t == IcmpTypes::DestinationUnreachable => {
                        return ProbeOutcome::Unreachable(UnreachableReason::Other);
                    }
                    _ => continue,
                }
            }
            Ok(None) => return ProbeOutcome::Timeout,
            Err(_) => return ProbeOutcome::Unreachable(UnreachableReason::Other),
        }
    }
}
