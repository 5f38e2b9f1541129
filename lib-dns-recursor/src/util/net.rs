use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;

/// Receive buffer for upstream responses.  Referrals for busy zones
/// run well past the plain 512-octet limit, and a response we cannot
/// fit is a response we cannot use.
pub const RECV_BUFFER_SIZE: usize = 4096;

/// Bind a fresh ephemeral socket in the same address family as the
/// nameserver being queried.  One socket per outbound query keeps
/// response correlation trivial.
pub async fn bind_for(target: IpAddr) -> io::Result<UdpSocket> {
    let bind_addr: SocketAddr = match target {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    UdpSocket::bind(bind_addr).await
}
