// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::ffi::CStr;
use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::sync::mpsc;

use super::{TraceOptions, TraceProbe};
use crate::ping::strip_ipv4_header;
use crate::types::TraceHop;

const ICMP_DEST_UNREACHABLE: u8 = 3;
const ICMP_TIME_EXCEEDED: u8 = 11;

/// IPv4 and UDP header bytes counted in the configured packet size.
const HEADER_LEN: usize = 28;

/// Classic traceroute: UDP datagrams to an unlikely port with increasing TTL, answered by ICMP
/// time-exceeded messages from routers and port-unreachable from the target. Listening for the
/// answers needs a raw socket, hence privileges.
#[derive(Clone, Copy, Debug)]
pub struct UdpTracer {
    /// Reverse resolve the address of every answered hop.
    pub resolve_names: bool,
}

impl Default for UdpTracer {
    fn default() -> Self {
        Self {
            resolve_names: true,
        }
    }
}

#[async_trait]
impl TraceProbe for UdpTracer {
    async fn trace(
        &self,
        target: Ipv4Addr,
        options: &TraceOptions,
        hops: mpsc::Sender<TraceHop>,
    ) -> anyhow::Result<()> {
        let options = options.clone();
        let resolve_names = self.resolve_names;
        tokio::task::spawn_blocking(move || {
            TraceSession::open(target, &options)?.run(resolve_names, &hops)
        })
        .await
        .context("trace task panicked")?
    }
}

struct TraceSession<'o> {
    target: Ipv4Addr,
    options: &'o TraceOptions,
    send: UdpSocket,
    recv: UdpSocket,
    /// Source port of our probes, echoed back inside the ICMP answers.
    source_port: u16,
}

impl<'o> TraceSession<'o> {
    fn open(target: Ipv4Addr, options: &'o TraceOptions) -> anyhow::Result<Self> {
        let recv = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .context("opening raw ICMP socket (are you root?)")?;
        let send = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).context("binding UDP socket")?;
        let source_port = send.local_addr()?.port();

        Ok(Self {
            target,
            options,
            send,
            recv: recv.into(),
            source_port,
        })
    }

    fn run(&self, resolve_names: bool, hops: &mpsc::Sender<TraceHop>) -> anyhow::Result<()> {
        for ttl in self.options.first_hop..=self.options.max_hops {
            let mut hop = self.probe(ttl)?;
            if hop.success && resolve_names {
                hop.host = reverse_lookup(hop.address);
            }

            let reached = hop.success && hop.address == self.target;
            if hops.blocking_send(hop).is_err() || reached {
                break;
            }
        }
        Ok(())
    }

    fn probe(&self, ttl: u8) -> anyhow::Result<TraceHop> {
        let payload = vec![0u8; self.options.packet_size.saturating_sub(HEADER_LEN)];

        for _ in 0..=self.options.retries {
            let started = Instant::now();
            self.send.set_ttl(u32::from(ttl))?;
            self.send
                .send_to(&payload, (self.target, self.options.port))
                .with_context(|| format!("sending probe with ttl {ttl}"))?;

            if let Some(address) = self.await_answer(started + self.options.hop_timeout)? {
                return Ok(TraceHop {
                    ttl,
                    address,
                    elapsed: started.elapsed(),
                    success: true,
                    host: None,
                    origin: None,
                });
            }
        }

        Ok(TraceHop::unanswered(ttl, self.options.hop_timeout))
    }

    /// Waits for the ICMP answer to our latest probe, skipping answers meant for other traces.
    fn await_answer(&self, deadline: Instant) -> io::Result<Option<Ipv4Addr>> {
        let mut buf = [0u8; 1500];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.recv.set_read_timeout(Some(remaining))?;

            let (len, from) = match self.recv.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) => return Err(e),
            };

            let IpAddr::V4(from) = from.ip() else {
                continue;
            };
            if answers_probe(&buf[..len], self.target, self.source_port) {
                return Ok(Some(from));
            }
        }
    }
}

/// Whether an ICMP packet (with its IP header) reports on a UDP probe we sent to `target` from
/// `source_port`.
fn answers_probe(packet: &[u8], target: Ipv4Addr, source_port: u16) -> bool {
    let Some(icmp) = strip_ipv4_header(packet) else {
        return false;
    };
    if icmp.len() < 8 || !matches!(icmp[0], ICMP_TIME_EXCEEDED | ICMP_DEST_UNREACHABLE) {
        return false;
    }

    // The answer quotes the IP header and first 8 bytes of the datagram that triggered it.
    let quoted = &icmp[8..];
    if quoted.len() < 20 {
        return false;
    }
    let destination = Ipv4Addr::new(quoted[16], quoted[17], quoted[18], quoted[19]);
    let Some(udp) = strip_ipv4_header(quoted) else {
        return false;
    };

    destination == target && udp.len() >= 2 && u16::from_be_bytes([udp[0], udp[1]]) == source_port
}

fn reverse_lookup(address: Ipv4Addr) -> Option<String> {
    // SAFETY: sockaddr_in is plain old data, all zeroes is a valid (unspecified) value.
    let mut sockaddr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sockaddr.sin_family = libc::AF_INET as libc::sa_family_t;
    sockaddr.sin_addr.s_addr = u32::from(address).to_be();

    let mut host = [0 as libc::c_char; 1025];
    // SAFETY: the pointers are valid for the lengths passed, and getnameinfo NUL terminates
    // `host` on success.
    let rc = unsafe {
        libc::getnameinfo(
            &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            host.as_mut_ptr(),
            host.len() as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            libc::NI_NAMEREQD,
        )
    };
    if rc != 0 {
        return None;
    }

    // SAFETY: see above.
    let name = unsafe { CStr::from_ptr(host.as_ptr()) };
    Some(name.to_string_lossy().trim_end_matches('.').to_string())
}
