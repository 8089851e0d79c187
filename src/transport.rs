//! Transport capability
//!
//! The serving pipeline needs exactly two things from the network: the next
//! parsed DNS query with its UDP envelope, and a way to put a finished
//! response packet on the wire. [`Transport`] is that seam; [`UdpTransport`]
//! implements it with a UDP socket pinned to the configured interface.

use anyhow::{Context, Result};
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

#[cfg(any(target_os = "linux", target_os = "android"))]
use crate::pktinfo::{recv_with_dst, send_from};

use crate::dns::{DnsMessage, RecordType};

/// Maximum UDP DNS packet size accepted
const MAX_UDP_PACKET_SIZE: usize = 4096;

/// Source and destination of a datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub src: SocketAddr,
    pub dst: SocketAddr,
}

impl Envelope {
    /// The envelope of the reply: addresses and ports swapped
    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

/// A TXT query that passed the transport filter
#[derive(Debug, Clone)]
pub struct InboundQuery {
    pub envelope: Envelope,
    pub message: DnsMessage,
}

/// Network capability used by the serve loop
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wait for the next DNS TXT query
    ///
    /// Malformed datagrams, responses and non-TXT questions are dropped here
    /// and never returned.
    async fn recv_query(&self) -> Result<InboundQuery>;

    /// Send a complete response packet using `envelope` (already reversed)
    async fn send_response(&self, envelope: &Envelope, packet: &[u8]) -> Result<()>;
}

/// Check whether a raw datagram is a query this server should look at
pub fn accept_query(packet: &[u8]) -> Option<DnsMessage> {
    let message = match DnsMessage::parse_query(packet) {
        Ok(message) => message,
        Err(e) => {
            log::debug!("Dropping malformed datagram: {}", e);
            return None;
        }
    };

    let question = message.questions.first()?;
    if question.qname.is_empty() || question.record_type() != Some(RecordType::TXT) {
        return None;
    }

    Some(message)
}

/// UDP socket transport bound to one interface
///
/// Replies leave from the address each query was sent to: on Linux the
/// destination of every datagram is read with `IP_PKTINFO` and used as the
/// reply source. Elsewhere the kernel picks the source.
pub struct UdpTransport {
    socket: AsyncFd<std::net::UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Listen on UDP `port` on all IPv4 addresses of `interface`
    ///
    /// On Linux the socket is pinned with `SO_BINDTODEVICE`; elsewhere the
    /// interface name is only logged.
    pub fn bind(interface: &str, port: u16) -> Result<Self> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        #[cfg(any(target_os = "linux", target_os = "android"))]
        socket
            .bind_device(Some(interface.as_bytes()))
            .with_context(|| format!("Failed to bind to interface {}", interface))?;

        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        log::warn!(
            "Binding to a device is not supported on this platform, listening on all interfaces instead of {}",
            interface
        );

        Self::finish(socket, addr)
    }

    /// Listen on an explicit address without pinning to an interface
    pub fn bind_addr(addr: SocketAddrV4) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        Self::finish(socket, addr)
    }

    fn finish(socket: Socket, addr: SocketAddrV4) -> Result<Self> {
        socket
            .bind(&SocketAddr::V4(addr).into())
            .with_context(|| format!("Failed to bind UDP socket on {}", addr))?;

        #[cfg(any(target_os = "linux", target_os = "android"))]
        crate::pktinfo::enable(&socket).context("Failed to enable IP_PKTINFO")?;

        socket.set_nonblocking(true)?;

        let socket: std::net::UdpSocket = socket.into();
        let local_addr = socket.local_addr()?;
        let socket = AsyncFd::with_interest(socket, Interest::READABLE | Interest::WRITABLE)?;
        log::info!("Listening for DNS queries on udp/{}", local_addr.port());

        Ok(Self { socket, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr, Option<IpAddr>)> {
        loop {
            let mut guard = self.socket.readable().await?;
            match guard.try_io(|socket| recv_with_dst(socket.get_ref(), buf)) {
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn recv_query(&self) -> Result<InboundQuery> {
        let mut buf = vec![0u8; MAX_UDP_PACKET_SIZE];

        loop {
            let (len, src, dst_ip) = self
                .recv_datagram(&mut buf)
                .await
                .context("Failed to receive UDP datagram")?;

            if let Some(message) = accept_query(&buf[..len]) {
                let dst_ip = dst_ip.unwrap_or_else(|| self.local_addr.ip());
                return Ok(InboundQuery {
                    envelope: Envelope {
                        src,
                        dst: SocketAddr::new(dst_ip, self.local_addr.port()),
                    },
                    message,
                });
            }
        }
    }

    async fn send_response(&self, envelope: &Envelope, packet: &[u8]) -> Result<()> {
        loop {
            let mut guard = self
                .socket
                .writable()
                .await
                .context("UDP socket is no longer writable")?;

            match guard.try_io(|socket| {
                send_from(socket.get_ref(), packet, envelope.dst, envelope.src.ip())
            }) {
                Ok(result) => {
                    return result.with_context(|| {
                        format!(
                            "Failed to send DNS response from {} to {}",
                            envelope.src, envelope.dst
                        )
                    })
                }
                Err(_would_block) => continue,
            }
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn recv_with_dst(
    socket: &std::net::UdpSocket,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddr, Option<IpAddr>)> {
    let (len, src) = socket.recv_from(buf)?;
    Ok((len, src, None))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn send_from(
    socket: &std::net::UdpSocket,
    packet: &[u8],
    to: SocketAddr,
    _from: IpAddr,
) -> io::Result<()> {
    socket.send_to(packet, to).map(|_| ())
}
