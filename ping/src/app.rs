use std::ffi::OsString;
use std::fmt::{self, Display};
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::id;
use std::thread;
use std::time::{Duration, Instant};

use clap::{App, Arg, ErrorKind};
use log::{debug, trace};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;

use crate::icmp::{
    self, verify_checksum, EchoRequest, IcmpMessage, IcmpType, IcmpV4, MessageBody,
};
use crate::ip::{self, IpV4Packet};

pub const USAGE: &str = "Usage: ping <IP address>";

/// Large enough for an Ethernet MTU worth of IP header and ICMP message.
const RECV_BUFFER_SIZE: usize = 1500;

#[derive(Debug, Error)]
pub enum PingError {
    #[error("Usage error - {}", USAGE)]
    Usage,
    #[error("Invalid arguments - {0}")]
    Args(#[source] clap::Error),
    #[error("Failed to listen for ICMP packets - {0}")]
    Socket(#[source] io::Error),
    #[error("Failed to resolve IP address - {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to marshal ICMP echo message - {0}")]
    Encode(#[from] icmp::EncodeError),
    #[error("Failed to send ICMP echo request - {0}")]
    Send(#[source] io::Error),
    #[error("Failed to set read deadline - {0}")]
    Deadline(#[source] io::Error),
    #[error("Failed to receive ICMP response - {0}")]
    Receive(#[source] io::Error),
    #[error("Failed to parse IP packet - {0}")]
    InvalidIpPacket(#[from] ip::Error),
    #[error("Failed to parse ICMP response - {0}")]
    InvalidIcmpPacket(#[from] icmp::DecodeError),
    #[error("Failed to write probe report - {0}")]
    Output(#[source] io::Error),
}
pub type PingResult<T> = Result<T, PingError>;

/// The raw ICMP endpoint the prober talks through.
pub trait Transport {
    fn send_to(&mut self, packet: &[u8], target: Ipv4Addr) -> io::Result<usize>;
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;
    /// Fills `buffer` with one datagram, IP header included. The sender is
    /// the header's source address.
    fn recv(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
}

/// `SOCK_RAW` ICMPv4 socket. Closed when dropped.
pub struct RawSocket(Socket);

impl RawSocket {
    pub fn open() -> io::Result<RawSocket> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        Ok(RawSocket(socket))
    }
}

impl Transport for RawSocket {
    fn send_to(&mut self, packet: &[u8], target: Ipv4Addr) -> io::Result<usize> {
        let dest = SocketAddr::new(IpAddr::V4(target), 0);
        self.0.send_to(packet, &dest.into())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.0.set_read_timeout(Some(timeout))
    }

    fn recv(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.0.read(buffer)
    }
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// How long to wait for a reply after each send.
    pub timeout: Duration,
    /// Pause between the end of one probe and the next send.
    pub interval: Duration,
    pub payload: &'static [u8],
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            timeout: Duration::from_secs(3),
            interval: Duration::from_secs(1),
            payload: b"hello server",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reply {
        bytes: usize,
        peer: Ipv4Addr,
        seq_cnt: u64,
        time: Duration,
    },
    Timeout {
        seq_cnt: u64,
    },
    Unexpected {
        kind: IcmpType,
    },
}

impl Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Reply {
                bytes,
                peer,
                seq_cnt,
                time,
            } => write!(
                f,
                "{} bytes from {}: icmp_seq={} time={:?}",
                bytes, peer, seq_cnt, time
            ),
            Outcome::Timeout { seq_cnt } => {
                write!(f, "Request timed out for icmp_seq {}", seq_cnt)
            }
            Outcome::Unexpected { kind } => {
                write!(f, "Received unexpected ICMP message type: {}", kind)
            }
        }
    }
}

/// Sends one echo request at a time and classifies whatever comes back
/// before the read timeout.
pub struct Prober<T> {
    transport: T,
    target: Ipv4Addr,
    ident: u16,
    /// Never reused within a run. Only the low 16 bits go on the wire.
    seq_cnt: u64,
    config: ProbeConfig,
}

impl<T: Transport> Prober<T> {
    pub fn new(transport: T, target: Ipv4Addr, ident: u16, config: ProbeConfig) -> Prober<T> {
        Prober {
            transport,
            target,
            ident,
            seq_cnt: 0,
            config,
        }
    }

    /// Runs until a fatal error. There is no other way out.
    pub fn run(&mut self) -> PingResult<()> {
        loop {
            self.step(&mut io::stdout().lock())?;
            thread::sleep(self.config.interval);
        }
    }

    /// Probe once and report the outcome on `out`.
    pub fn step<W: Write>(&mut self, out: &mut W) -> PingResult<Outcome> {
        let outcome = self.probe()?;
        writeln!(out, "{}", outcome).map_err(PingError::Output)?;
        out.flush().map_err(PingError::Output)?;
        Ok(outcome)
    }

    pub fn probe(&mut self) -> PingResult<Outcome> {
        self.seq_cnt += 1;
        let seq_cnt = self.seq_cnt;
        let wire_seq = seq_cnt as u16;
        let start = Instant::now();

        let request = EchoRequest {
            ident: self.ident,
            seq_cnt: wire_seq,
            payload: self.config.payload,
        };
        let request = request.to_bytes::<IcmpV4>()?;

        self.transport
            .send_to(&request, self.target)
            .map_err(PingError::Send)?;
        trace!("sent echo request icmp_seq={} to {}", seq_cnt, self.target);

        self.transport
            .set_read_timeout(self.config.timeout)
            .map_err(PingError::Deadline)?;
        let deadline = Instant::now() + self.config.timeout;

        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let size = match self.transport.recv(&mut buffer) {
            Ok(size) => size,
            Err(err) if is_timeout(&err) => return Ok(Outcome::Timeout { seq_cnt }),
            Err(err) => return Err(PingError::Receive(err)),
        };

        let now = Instant::now();
        if now > deadline {
            debug!("datagram for icmp_seq={} arrived after the deadline", seq_cnt);
            return Ok(Outcome::Timeout { seq_cnt });
        }
        let time = now.duration_since(start);

        let packet = IpV4Packet::decode(&buffer[..size])?;
        let peer = packet.source;
        trace!(
            "{} -> {} proto={} ttl={}",
            peer,
            packet.destination,
            packet.protocol,
            packet.ttl
        );
        let message = IcmpMessage::decode(packet.data)?;
        if !verify_checksum(packet.data) {
            debug!("bad {} checksum {:#06x} from {}", message.kind, message.checksum, peer);
        }

        match (message.kind, message.echo()) {
            (IcmpType::EchoReply, Some(echo)) => {
                if echo.ident != self.ident || echo.seq_cnt != wire_seq {
                    debug!(
                        "echo reply id={} icmp_seq={} does not match probe id={} icmp_seq={}",
                        echo.ident, echo.seq_cnt, self.ident, wire_seq
                    );
                } else if echo.payload != self.config.payload {
                    debug!("echo reply icmp_seq={} carries altered data", wire_seq);
                }
                // the wire value only carries the low 16 bits of the counter
                let seq_cnt = if echo.seq_cnt == wire_seq {
                    seq_cnt
                } else {
                    u64::from(echo.seq_cnt)
                };
                Ok(Outcome::Reply {
                    bytes: packet.data.len(),
                    peer,
                    seq_cnt,
                    time,
                })
            }
            (kind, _) => {
                if let MessageBody::Raw(body) = message.body {
                    trace!("{} code {} ({} bytes) from {}", kind, message.code, body.len(), peer);
                }
                Ok(Outcome::Unexpected { kind })
            }
        }
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

pub struct PingApp {
    prober: Prober<RawSocket>,
}

impl PingApp {
    pub fn from_args() -> PingResult<PingApp> {
        PingApp::try_from_args(std::env::args_os())
    }

    /// Everything fallible about setup happens here, before the first probe.
    pub fn try_from_args<I, T>(args: I) -> PingResult<PingApp>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let host = parse_args(args)?;

        let socket = RawSocket::open().map_err(PingError::Socket)?;
        debug!("opened raw ICMPv4 socket");

        let target = resolve_target(&host)?;
        let ident = session_ident();
        debug!("pinging {} ({}) with id={}", host, target, ident);

        Ok(PingApp {
            prober: Prober::new(socket, target, ident, ProbeConfig::default()),
        })
    }

    pub fn run(&mut self) -> PingResult<()> {
        self.prober.run()
    }
}

/// Returns the single `REMOTE` argument.
pub fn parse_args<I, T>(args: I) -> PingResult<String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = App::new("ping")
        .arg(
            Arg::new("REMOTE")
                .takes_value(true)
                .help("Remote ipv4 address or host name"),
        )
        .about("Send ICMP echo requests to a host once a second.")
        .override_usage("ping <IP address>")
        .version("0.2.0")
        .try_get_matches_from(args);

    let matches = match matches {
        Ok(matches) => matches,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => return Err(PingError::Args(err)),
    };

    matches
        .value_of("REMOTE")
        .map(String::from)
        .ok_or(PingError::Usage)
}

pub fn resolve_target(host: &str) -> PingResult<Ipv4Addr> {
    let resolve_error = |source| PingError::Resolve {
        host: host.to_string(),
        source,
    };

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => Ok(addr),
        Ok(IpAddr::V6(_)) => Err(resolve_error(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not an IPv4 address",
        ))),
        Err(_) => look_up_ipv4(host).map_err(resolve_error),
    }
}

fn look_up_ipv4(host: &str) -> io::Result<Ipv4Addr> {
    let resolver = trust_dns_resolver::Resolver::default()?;
    let lookup = resolver.lookup_ip(host)?;

    lookup
        .iter()
        .find_map(|ip| match ip {
            IpAddr::V4(addr) => Some(addr),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no IPv4 address found"))
}

fn session_ident() -> u16 {
    (id() & 0xffff) as u16
}

#[cfg(test)]
mod test {
    use std::collections::{HashSet, VecDeque};

    use crate::app::*;
    use crate::icmp::{write_checksum, HEADER_SIZE};

    const TARGET: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 7);
    const IDENT: u16 = 0x5151;

    #[derive(Default)]
    struct ScriptedTransport {
        sent: Vec<Vec<u8>>,
        timeouts: Vec<Duration>,
        /// Added to every receive before the scripted result is handed out.
        delay: Duration,
        script: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ScriptedTransport {
        fn with(script: Vec<io::Result<Vec<u8>>>) -> ScriptedTransport {
            ScriptedTransport {
                script: script.into(),
                ..Default::default()
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn send_to(&mut self, packet: &[u8], target: Ipv4Addr) -> io::Result<usize> {
            assert_eq!(target, TARGET);
            self.sent.push(packet.to_vec());
            Ok(packet.len())
        }

        fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            self.timeouts.push(timeout);
            Ok(())
        }

        fn recv(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
            thread::sleep(self.delay);
            // an exhausted script behaves like a silent network
            let datagram = self
                .script
                .pop_front()
                .unwrap_or_else(|| Err(io::ErrorKind::WouldBlock.into()))?;
            buffer[..datagram.len()].copy_from_slice(&datagram);
            Ok(datagram.len())
        }
    }

    fn prober(script: Vec<io::Result<Vec<u8>>>) -> Prober<ScriptedTransport> {
        let config = ProbeConfig {
            interval: Duration::ZERO,
            ..Default::default()
        };
        Prober::new(ScriptedTransport::with(script), TARGET, IDENT, config)
    }

    fn datagram(icmp: &[u8]) -> Vec<u8> {
        let mut buffer = vec![0u8; 20];
        buffer[0] = 0x45;
        buffer[8] = 64;
        buffer[9] = 1;
        buffer[12..16].copy_from_slice(&TARGET.octets());
        buffer.extend_from_slice(icmp);
        buffer
    }

    fn echo_reply(seq_cnt: u16) -> Vec<u8> {
        let mut icmp = EchoRequest {
            ident: IDENT,
            seq_cnt,
            payload: b"hello server",
        }
        .to_bytes::<IcmpV4>()
        .unwrap();
        icmp[0] = 0;
        write_checksum(&mut icmp);
        datagram(&icmp)
    }

    fn unreachable() -> Vec<u8> {
        let mut icmp = vec![3, 1, 0, 0, 0, 0, 0, 0];
        icmp.extend_from_slice(&[0u8; 28]);
        write_checksum(&mut icmp);
        datagram(&icmp)
    }

    fn wire_seq(packet: &[u8]) -> u16 {
        IcmpMessage::decode(packet).unwrap().echo().unwrap().seq_cnt
    }

    #[test]
    fn sequence_starts_at_one_without_gaps() {
        let mut prober = prober(vec![Ok(echo_reply(1)), Ok(unreachable())]);
        for _ in 0..4 {
            prober.probe().unwrap();
        }

        let sent = &prober.transport.sent;
        assert_eq!(sent.len(), 4);
        for (n, packet) in sent.iter().enumerate() {
            let message = IcmpMessage::decode(packet).unwrap();
            let echo = message.echo().unwrap();
            assert_eq!(message.kind, IcmpType::Echo);
            assert_eq!(echo.seq_cnt as usize, n + 1);
            assert_eq!(echo.ident, IDENT);
            assert_eq!(echo.payload, b"hello server");
            assert!(verify_checksum(packet));
        }
    }

    #[test]
    fn sequence_keeps_counting_past_the_wire_width() {
        let mut prober = prober(vec![
            Err(io::ErrorKind::TimedOut.into()),
            Ok(echo_reply(0)),
        ]);
        prober.seq_cnt = u64::from(u16::MAX) - 1;

        let mut seen = HashSet::new();
        let mut reported = Vec::new();
        for _ in 0..3 {
            let seq_cnt = match prober.probe().unwrap() {
                Outcome::Timeout { seq_cnt } | Outcome::Reply { seq_cnt, .. } => seq_cnt,
                other => panic!("unexpected outcome {:?}", other),
            };
            assert!(seen.insert(seq_cnt), "icmp_seq {} reported twice", seq_cnt);
            reported.push(seq_cnt);
        }

        assert_eq!(reported, vec![65535, 65536, 65537]);
        let wire: Vec<_> = prober.transport.sent.iter().map(|p| wire_seq(p)).collect();
        assert_eq!(wire, vec![65535, 0, 1]);
    }

    #[test]
    fn reply_is_reported() {
        let mut prober = prober(vec![Ok(echo_reply(1))]);
        let start = Instant::now();
        let outcome = prober.probe().unwrap();
        let elapsed = start.elapsed();

        match outcome {
            Outcome::Reply {
                bytes,
                peer,
                seq_cnt,
                time,
            } => {
                assert_eq!(bytes, HEADER_SIZE + 12);
                assert_eq!(peer, TARGET);
                assert_eq!(seq_cnt, 1);
                assert!(time <= elapsed);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(prober.transport.timeouts, vec![Duration::from_secs(3)]);
    }

    #[test]
    fn reported_sequence_comes_from_the_reply() {
        let mut prober = prober(vec![Ok(echo_reply(9))]);
        assert!(matches!(
            prober.probe().unwrap(),
            Outcome::Reply { seq_cnt: 9, .. }
        ));
    }

    #[test]
    fn silence_is_a_timeout() {
        let mut prober = prober(vec![Err(io::ErrorKind::TimedOut.into())]);
        assert_eq!(prober.probe().unwrap(), Outcome::Timeout { seq_cnt: 1 });
        assert_eq!(prober.probe().unwrap(), Outcome::Timeout { seq_cnt: 2 });
    }

    #[test]
    fn reply_after_the_deadline_is_a_timeout() {
        let mut transport = ScriptedTransport::with(vec![Ok(echo_reply(1))]);
        transport.delay = Duration::from_millis(20);
        let config = ProbeConfig {
            timeout: Duration::from_millis(10),
            interval: Duration::ZERO,
            ..Default::default()
        };
        let mut prober = Prober::new(transport, TARGET, IDENT, config);

        assert_eq!(prober.probe().unwrap(), Outcome::Timeout { seq_cnt: 1 });
    }

    #[test]
    fn unreachable_is_unexpected_and_probing_goes_on() {
        let mut prober = prober(vec![Ok(unreachable()), Ok(echo_reply(2))]);
        let mut out = Vec::new();

        let first = prober.step(&mut out).unwrap();
        assert_eq!(
            first,
            Outcome::Unexpected {
                kind: IcmpType::DestinationUnreachable
            }
        );
        let second = prober.step(&mut out).unwrap();
        assert!(matches!(second, Outcome::Reply { seq_cnt: 2, .. }));

        let out = String::from_utf8(out).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(
            lines[0],
            "Received unexpected ICMP message type: destination unreachable"
        );
        assert!(lines[1].starts_with("20 bytes from 192.0.2.7: icmp_seq=2 time="));
    }

    #[test]
    fn receive_errors_are_fatal() {
        let mut prober = prober(vec![Err(io::ErrorKind::ConnectionRefused.into())]);
        assert!(matches!(prober.probe(), Err(PingError::Receive(_))));
    }

    #[test]
    fn garbage_is_fatal() {
        let mut prober = prober(vec![Ok(vec![0x45, 0, 0]), Ok(datagram(&[0, 0, 0]))]);
        assert!(matches!(prober.probe(), Err(PingError::InvalidIpPacket(_))));
        assert!(matches!(prober.probe(), Err(PingError::InvalidIcmpPacket(_))));
    }

    #[test]
    fn outcome_lines() {
        let reply = Outcome::Reply {
            bytes: 20,
            peer: Ipv4Addr::new(10, 0, 0, 2),
            seq_cnt: 3,
            time: Duration::from_micros(1500),
        };
        assert_eq!(reply.to_string(), "20 bytes from 10.0.0.2: icmp_seq=3 time=1.5ms");
        assert_eq!(
            Outcome::Timeout { seq_cnt: 4 }.to_string(),
            "Request timed out for icmp_seq 4"
        );
        assert_eq!(
            Outcome::Unexpected {
                kind: IcmpType::Other(99)
            }
            .to_string(),
            "Received unexpected ICMP message type: 99"
        );
    }

    #[test]
    fn missing_remote_is_a_usage_error() {
        assert!(matches!(parse_args(["ping"]), Err(PingError::Usage)));
        assert!(matches!(PingApp::try_from_args(["ping"]), Err(PingError::Usage)));
        assert_eq!(
            PingError::Usage.to_string(),
            "Usage error - Usage: ping <IP address>"
        );
        assert_eq!(parse_args(["ping", "10.1.2.3"]).unwrap(), "10.1.2.3");
    }

    #[test]
    fn literal_addresses_skip_dns() {
        assert_eq!(
            resolve_target("127.0.0.1").unwrap(),
            Ipv4Addr::new(127, 0, 0, 1)
        );
        assert!(matches!(
            resolve_target("::1"),
            Err(PingError::Resolve { .. })
        ));
    }
}
