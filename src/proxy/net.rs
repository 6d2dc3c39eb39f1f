//! IPv4-only socket plumbing.
//!
//! Binding an unspecified `:port` on some platforms yields a dual-stack
//! socket whose batched receives report IPv6-mapped source addresses,
//! which would corrupt single-stack address tracking. Every bind and dial
//! here goes through an explicit `SocketAddrV4`, so the kernel can only
//! ever produce `AF_INET` peers.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket as StdUdpSocket};

use tokio::net::UdpSocket;
use tracing::debug;

/// Target size for the kernel send/receive buffers on both sockets.
pub(crate) const SOCKET_BUF_SIZE: usize = 4 * 1024 * 1024;

/// Resolve `host:port` (or `:port`) to an IPv4 address.
pub(crate) async fn resolve_udp4(spec: &str) -> io::Result<SocketAddrV4> {
    let owned = if spec.starts_with(':') {
        format!("0.0.0.0{spec}")
    } else {
        spec.to_string()
    };
    let spec = owned.as_str();

    let result = tokio::net::lookup_host(spec)
        .await?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{spec}: no IPv4 address"),
            )
        });
    result
}

/// Bind an unconnected IPv4 UDP socket for the client side.
pub(crate) fn bind_udp4(addr: SocketAddrV4) -> io::Result<UdpSocket> {
    into_tokio(StdUdpSocket::bind(SocketAddr::V4(addr))?)
}

/// Dial a connected IPv4 UDP socket to the server.
pub(crate) fn connect_udp4(remote: SocketAddrV4) -> io::Result<UdpSocket> {
    let sock = StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    sock.connect(SocketAddr::V4(remote))?;
    into_tokio(sock)
}

fn into_tokio(sock: StdUdpSocket) -> io::Result<UdpSocket> {
    sock.set_nonblocking(true)?;
    set_socket_buffers(&sock, SOCKET_BUF_SIZE);
    UdpSocket::from_std(sock)
}

#[cfg(unix)]
fn set_socket_buffers(sock: &StdUdpSocket, size: usize) {
    use std::os::fd::AsRawFd;

    let fd = sock.as_raw_fd();
    let value = size as libc::c_int;
    for opt in [libc::SO_RCVBUF, libc::SO_SNDBUF] {
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                &value as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            debug!("setsockopt: {}", io::Error::last_os_error());
        }
    }
}

#[cfg(not(unix))]
fn set_socket_buffers(_sock: &StdUdpSocket, _size: usize) {}

/// Log the buffer sizes the kernel actually granted.
#[cfg(unix)]
pub(crate) fn log_socket_buffers(sock: &UdpSocket, label: &str) {
    use std::os::fd::AsRawFd;

    let fd = sock.as_raw_fd();
    let mut sizes = [0 as libc::c_int; 2];
    for (slot, opt) in sizes.iter_mut().zip([libc::SO_RCVBUF, libc::SO_SNDBUF]) {
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                slot as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            );
        }
    }
    debug!("{label}: rcvbuf={} sndbuf={}", sizes[0], sizes[1]);
}

#[cfg(not(unix))]
pub(crate) fn log_socket_buffers(_sock: &UdpSocket, _label: &str) {}

/// Platform-independent "this socket is gone" predicate.
///
/// Matches a descriptor closed out from under an I/O call and the textual
/// form some runtimes wrap it in. Anything else is a transient error.
pub(crate) fn is_closed_error(err: &io::Error) -> bool {
    #[cfg(unix)]
    if err.raw_os_error() == Some(libc::EBADF) {
        return true;
    }
    err.kind() == io::ErrorKind::NotConnected || err.to_string().contains("use of closed")
}
