//! raw/DGRAM ICMPv4 transport: a `socket2::Socket` wrapped as a
//! `tokio::net::UdpSocket`.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::os::unix::io::{FromRawFd, IntoRawFd};

use socket2::{Domain, Protocol, Type};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// an ICMPv4 socket, bound either as an unprivileged `SOCK_DGRAM` (ping
/// group range) or a `SOCK_RAW` requiring `CAP_NET_RAW`. `decode_header`
/// tells the caller whether replies carry a leading IPv4 header.
#[derive(Debug)]
pub struct Transport {
    socket: UdpSocket,
    pub decode_header: bool,
}

impl Transport {
    pub fn new() -> io::Result<Self> {
        let (socket, decode_header) = match new_socket(Type::DGRAM) {
            Ok(s) => (s, false),
            Err(err) => {
                warn!(
                    ?err,
                    "failed to open DGRAM ICMP socket, check ping_group_range; falling back to RAW"
                );
                (new_socket(Type::RAW)?, true)
            }
        };
        debug!(decode_header, "opened icmpv4 transport");
        Ok(Self {
            socket,
            decode_header,
        })
    }

    pub async fn send_to(&self, buf: &[u8], target: IpAddr) -> io::Result<usize> {
        self.socket.send_to(buf, SocketAddr::new(target, 0)).await
    }

    /// not cancel-safe
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }
}

fn new_socket(type_: Type) -> io::Result<UdpSocket> {
    let socket = socket2::Socket::new(Domain::IPV4, type_, Some(Protocol::ICMPV4))?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(unsafe {
        std::net::UdpSocket::from_raw_fd(socket.into_raw_fd())
    })?)
}
