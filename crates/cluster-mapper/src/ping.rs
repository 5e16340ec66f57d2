// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};

use crate::retry::duration_serde;
use crate::types::PingResult;

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingOptions {
    /// Number of echo requests to send.
    pub count: usize,
    #[serde(with = "duration_serde")]
    pub interval: Duration,
    /// Upper bound on the whole run, replies still outstanding by then count as lost.
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    pub payload_size: usize,
}

impl Default for PingOptions {
    fn default() -> Self {
        Self {
            count: 25,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(25),
            payload_size: 24,
        }
    }
}

/// Measures round trip time and packet loss to an address. Blocks until the run is over.
#[async_trait]
pub trait Pinger: Send + Sync + 'static {
    async fn ping(&self, addr: IpAddr, options: &PingOptions) -> anyhow::Result<PingResult>;
}

/// ICMP echo over an unprivileged datagram socket where the kernel allows it, falling back to a
/// raw socket (which needs privileges).
#[derive(Clone, Copy, Debug, Default)]
pub struct IcmpPinger;

#[async_trait]
impl Pinger for IcmpPinger {
    async fn ping(&self, addr: IpAddr, options: &PingOptions) -> anyhow::Result<PingResult> {
        let IpAddr::V4(target) = addr else {
            bail!("IPv6 ping is not supported ({addr})");
        };
        let options = options.clone();
        tokio::task::spawn_blocking(move || EchoSession::open(target)?.run(&options))
            .await
            .context("ping task panicked")?
    }
}

/// Distinguishes the echo requests of concurrent sessions sharing raw ICMP traffic.
static NEXT_IDENT: AtomicU16 = AtomicU16::new(1);

struct EchoSession {
    socket: UdpSocket,
    target: Ipv4Addr,
    ident: u16,
    /// Raw sockets see every echo reply on the host, not just the ones for this socket.
    raw: bool,
}

impl EchoSession {
    fn open(target: Ipv4Addr) -> anyhow::Result<Self> {
        let (socket, raw) = match Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)) {
            Ok(socket) => (socket, false),
            Err(_) => (
                Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
                    .context("opening ICMP socket (are you root?)")?,
                true,
            ),
        };

        Ok(Self {
            socket: socket.into(),
            target,
            ident: NEXT_IDENT.fetch_add(1, Ordering::Relaxed),
            raw,
        })
    }

    fn run(&self, options: &PingOptions) -> anyhow::Result<PingResult> {
        let started = Instant::now();
        let deadline = started + options.timeout;
        let mut sent_at: Vec<Instant> = Vec::with_capacity(options.count);
        let mut answered = vec![false; options.count];
        let mut rtts = Vec::with_capacity(options.count);

        for seq in 0..options.count {
            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let packet = echo_request(self.ident, seq as u16, options.payload_size);
            self.socket
                .send_to(&packet, SocketAddr::new(self.target.into(), 0))
                .with_context(|| format!("sending echo request to {}", self.target))?;
            sent_at.push(now);

            let wait_until = (now + options.interval).min(deadline);
            self.collect_replies(wait_until, &sent_at, &mut answered, &mut rtts)?;
        }

        summarise(self.target, sent_at.len(), &rtts, options.timeout)
    }

    fn collect_replies(
        &self,
        until: Instant,
        sent_at: &[Instant],
        answered: &mut [bool],
        rtts: &mut Vec<Duration>,
    ) -> anyhow::Result<()> {
        let mut buf = [0u8; 1500];
        loop {
            let remaining = until.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            self.socket.set_read_timeout(Some(remaining))?;

            let (len, from) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Ok(())
                }
                Err(e) => return Err(e).context("receiving echo reply"),
            };
            let received = Instant::now();

            if from.ip() != IpAddr::V4(self.target) {
                continue;
            }
            let Some((ident, seq)) = parse_echo_reply(&buf[..len]) else {
                continue;
            };
            // Datagram sockets have their identifier rewritten by the kernel.
            if self.raw && ident != self.ident {
                continue;
            }

            let seq = seq as usize;
            if seq < sent_at.len() && !answered[seq] {
                answered[seq] = true;
                rtts.push(received - sent_at[seq]);
            }
        }
    }
}

fn echo_request(ident: u16, seq: u16, payload_size: usize) -> Vec<u8> {
    let mut packet = vec![0u8; 8 + payload_size];
    packet[0] = ICMP_ECHO_REQUEST;
    packet[4..6].copy_from_slice(&ident.to_be_bytes());
    packet[6..8].copy_from_slice(&seq.to_be_bytes());
    for (i, byte) in packet[8..].iter_mut().enumerate() {
        *byte = i as u8;
    }
    let checksum = checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

/// A session where no echo got an answer is a failed ping, not a result with 100% loss.
fn summarise(
    target: Ipv4Addr,
    sent: usize,
    rtts: &[Duration],
    timeout: Duration,
) -> anyhow::Result<PingResult> {
    if sent > 0 && rtts.is_empty() {
        bail!(
            "no echo reply from {target} within {}",
            humantime::format_duration(timeout)
        );
    }
    Ok(PingResult::from_rtts(target.into(), sent, rtts))
}

/// Returns the identifier and sequence number of an echo reply, with or without its IP header.
fn parse_echo_reply(packet: &[u8]) -> Option<(u16, u16)> {
    let icmp = strip_ipv4_header(packet).unwrap_or(packet);
    if icmp.len() < 8 || icmp[0] != ICMP_ECHO_REPLY {
        return None;
    }
    Some((
        u16::from_be_bytes([icmp[4], icmp[5]]),
        u16::from_be_bytes([icmp[6], icmp[7]]),
    ))
}

pub(crate) fn strip_ipv4_header(packet: &[u8]) -> Option<&[u8]> {
    let first = *packet.first()?;
    if first >> 4 != 4 {
        return None;
    }
    let header_len = usize::from(first & 0x0f) * 4;
    packet.get(header_len..)
}

/// RFC 1071 internet checksum.
pub(crate) fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match *pair {
            [hi, lo] => u32::from(u16::from_be_bytes([hi, lo])),
            [hi] => u32::from(hi) << 8,
            _ => 0,
        })
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
