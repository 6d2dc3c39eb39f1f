//! Linux batch I/O backend.
//!
//! Both relay directions drain and flush up to [`BATCH_SIZE`] datagrams per
//! `recvmmsg`/`sendmmsg` syscall. The sockets stay nonblocking and
//! registered with the tokio reactor; `EAGAIN` defers back to the poller
//! via `try_io`, and a partial `sendmmsg` resumes from the first unsent
//! message.
//!
//! Handshake-init packets that trigger the CPS+junk burst drop out of the
//! batch into single-message sends, with any already-queued messages
//! flushed first, so the burst keeps its position in the stream.

use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::AsRawFd;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::io::Interest;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::transform;

use super::{net, Proxy, BUF_SIZE, MAX_PAD, RECONNECT_BACKOFF_START};

/// Messages per recvmmsg/sendmmsg call.
pub(super) const BATCH_SIZE: usize = 32;

/// Per-message buffer: headroom for the largest padding prefix plus MTU.
const SLOT_SIZE: usize = MAX_PAD + BUF_SIZE;

const SOCKADDR_IN_LEN: libc::socklen_t = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;

fn sockaddr_from_v4(addr: SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    }
}

fn sockaddr_to_v4(sa: &libc::sockaddr_in) -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(sa.sin_addr.s_addr.to_ne_bytes()),
        u16::from_be(sa.sin_port),
    )
}

/// Preallocated receive side of one direction.
struct RecvBatch {
    bufs: Vec<[u8; SLOT_SIZE]>,
    iovecs: Vec<libc::iovec>,
    addrs: Vec<libc::sockaddr_in>,
    msgs: Vec<libc::mmsghdr>,
    headroom: usize,
}

// The raw pointers only ever reference the struct's own heap allocations,
// which stay put when the struct moves between threads.
unsafe impl Send for RecvBatch {}

impl RecvBatch {
    fn new(headroom: usize, capture_addr: bool) -> Self {
        let mut bufs = vec![[0u8; SLOT_SIZE]; BATCH_SIZE];
        let mut iovecs = vec![unsafe { mem::zeroed::<libc::iovec>() }; BATCH_SIZE];
        let mut addrs = vec![unsafe { mem::zeroed::<libc::sockaddr_in>() }; BATCH_SIZE];
        let mut msgs = vec![unsafe { mem::zeroed::<libc::mmsghdr>() }; BATCH_SIZE];

        for i in 0..BATCH_SIZE {
            iovecs[i].iov_base =
                bufs[i][headroom..].as_mut_ptr() as *mut libc::c_void;
            iovecs[i].iov_len = SLOT_SIZE - headroom;
            msgs[i].msg_hdr.msg_iov = &mut iovecs[i];
            msgs[i].msg_hdr.msg_iovlen = 1;
            if capture_addr {
                msgs[i].msg_hdr.msg_name =
                    &mut addrs[i] as *mut libc::sockaddr_in as *mut libc::c_void;
                msgs[i].msg_hdr.msg_namelen = SOCKADDR_IN_LEN;
            }
        }

        Self { bufs, iovecs, addrs, msgs, headroom }
    }

    /// Receive up to a batch of datagrams, parking on the reactor when the
    /// socket is drained.
    async fn recv(&mut self, sock: &UdpSocket) -> io::Result<usize> {
        loop {
            sock.readable().await?;
            let res = sock.try_io(Interest::READABLE, || {
                let rc = unsafe {
                    libc::recvmmsg(
                        sock.as_raw_fd(),
                        self.msgs.as_mut_ptr(),
                        BATCH_SIZE as libc::c_uint,
                        libc::MSG_WAITFORONE,
                        std::ptr::null_mut(),
                    )
                };
                if rc < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(rc as usize)
                }
            });
            match res {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn len(&self, i: usize) -> usize {
        self.msgs[i].msg_len as usize
    }

    /// Source address of message `i`, when it arrived with an `AF_INET`
    /// sockaddr.
    fn source(&self, i: usize) -> Option<SocketAddrV4> {
        let sa = &self.addrs[i];
        (sa.sin_family == libc::AF_INET as libc::sa_family_t).then(|| sockaddr_to_v4(sa))
    }

    fn datagram(&self, i: usize) -> &[u8] {
        &self.bufs[i][self.headroom..self.headroom + self.len(i)]
    }

    fn datagram_mut(&mut self, i: usize) -> &mut [u8] {
        let n = self.len(i);
        &mut self.bufs[i][self.headroom..self.headroom + n]
    }

    /// Whole slot for message `i`, for in-place transforms that grow into
    /// the headroom.
    fn slot_mut(&mut self, i: usize) -> &mut [u8] {
        &mut self.bufs[i]
    }
}

/// Preallocated send side of one direction.
struct SendBatch {
    bufs: Vec<[u8; SLOT_SIZE]>,
    iovecs: Vec<libc::iovec>,
    addrs: Vec<libc::sockaddr_in>,
    msgs: Vec<libc::mmsghdr>,
    count: usize,
}

unsafe impl Send for SendBatch {}

impl SendBatch {
    fn new() -> Self {
        Self {
            bufs: vec![[0u8; SLOT_SIZE]; BATCH_SIZE],
            iovecs: vec![unsafe { mem::zeroed::<libc::iovec>() }; BATCH_SIZE],
            addrs: vec![unsafe { mem::zeroed::<libc::sockaddr_in>() }; BATCH_SIZE],
            msgs: vec![unsafe { mem::zeroed::<libc::mmsghdr>() }; BATCH_SIZE],
            count: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Queue one datagram; `dest` is required on the unconnected listen
    /// socket and absent on the connected remote socket.
    fn push(&mut self, data: &[u8], dest: Option<SocketAddrV4>) {
        debug_assert!(self.count < BATCH_SIZE);
        debug_assert!(data.len() <= SLOT_SIZE);

        let i = self.count;
        self.bufs[i][..data.len()].copy_from_slice(data);
        self.iovecs[i].iov_base = self.bufs[i].as_mut_ptr() as *mut libc::c_void;
        self.iovecs[i].iov_len = data.len();
        self.msgs[i].msg_hdr.msg_iov = &mut self.iovecs[i];
        self.msgs[i].msg_hdr.msg_iovlen = 1;
        match dest {
            Some(addr) => {
                self.addrs[i] = sockaddr_from_v4(addr);
                self.msgs[i].msg_hdr.msg_name =
                    &mut self.addrs[i] as *mut libc::sockaddr_in as *mut libc::c_void;
                self.msgs[i].msg_hdr.msg_namelen = SOCKADDR_IN_LEN;
            }
            None => {
                self.msgs[i].msg_hdr.msg_name = std::ptr::null_mut();
                self.msgs[i].msg_hdr.msg_namelen = 0;
            }
        }
        self.count += 1;
    }

    /// Send everything queued, resuming after partial sends. The queue is
    /// reset whether or not the flush succeeds; a failed batch is dropped
    /// and WireGuard retransmits.
    async fn flush(&mut self, sock: &UdpSocket) -> io::Result<()> {
        let count = self.count;
        self.count = 0;

        let mut sent = 0;
        while sent < count {
            sock.writable().await?;
            let res = sock.try_io(Interest::WRITABLE, || {
                let rc = unsafe {
                    libc::sendmmsg(
                        sock.as_raw_fd(),
                        self.msgs.as_mut_ptr().add(sent),
                        (count - sent) as libc::c_uint,
                        0,
                    )
                };
                if rc < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(rc as usize)
                }
            });
            match res {
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Batched client→server loop.
pub(super) async fn client_to_server(
    proxy: Arc<Proxy>,
    listen: Arc<UdpSocket>,
    mut stop: watch::Receiver<bool>,
) {
    let mut recv = RecvBatch::new(MAX_PAD, true);
    let mut send = SendBatch::new();
    let mut cps_counter: u32 = 0;

    loop {
        let n_recv = tokio::select! {
            res = recv.recv(&listen) => match res {
                Ok(n) => n,
                Err(e) => {
                    if proxy.stopped() || net::is_closed_error(&e) {
                        return;
                    }
                    error!("listen batch read: {e}");
                    continue;
                }
            },
            _ = stop.changed() => return,
        };
        proxy.last_active.store(true, Ordering::Relaxed);

        let Some(remote) = proxy.current_remote() else {
            continue;
        };
        debug_assert!(send.is_empty());

        for i in 0..n_recv {
            let n = recv.len(i);
            if n == 0 {
                continue;
            }

            match recv.source(i) {
                Some(addr) => proxy.learn_client(addr),
                None if proxy.client_addr().is_none() => {
                    debug!("client: unexpected address family");
                }
                None => {}
            }

            // Identity transport frames go straight into the send batch.
            if proxy.cfg.h4_noop() && n >= transform::TRANSPORT_MIN_SIZE {
                let data = recv.datagram(i);
                if u32::from_le_bytes(data[..4].try_into().unwrap())
                    == transform::TRANSPORT_DATA
                {
                    send.push(data, None);
                    continue;
                }
            }

            let (out, send_junk) =
                transform::transform_outbound(&proxy.cfg, recv.slot_mut(i), MAX_PAD, n);
            debug!("c->s batch: recv {n}B, send {}B, junk={send_junk}", out.len());

            if send_junk {
                debug!("c->s: handshake init {n}B -> {}B", out.len());
                // The burst must keep its place in the stream: drain the
                // queued batch, then CPS, junk, and the init individually.
                if !send.is_empty() {
                    if let Err(e) = send.flush(&remote).await {
                        if !net::is_closed_error(&e) {
                            error!("remote batch write: {e}");
                        }
                    }
                }
                proxy.send_decoy_burst(&remote, &mut cps_counter).await;
                match remote.send(out).await {
                    Ok(_) => {}
                    Err(e) if net::is_closed_error(&e) => {}
                    Err(e) => error!("remote write: {e}"),
                }
                continue;
            }

            send.push(out, None);
        }

        if !send.is_empty() {
            if let Err(e) = send.flush(&remote).await {
                if net::is_closed_error(&e) {
                    continue; // reconnect in progress, WG will retransmit
                }
                error!("remote batch write: {e}");
            }
        }
    }
}

/// Batched server→client loop; owns reconnects for the remote link.
pub(super) async fn server_to_client(
    proxy: Arc<Proxy>,
    listen: Arc<UdpSocket>,
    remote: Arc<UdpSocket>,
    mut stop: watch::Receiver<bool>,
) {
    enum Wake {
        Batch(io::Result<usize>),
        Severed,
        Stopped,
    }

    let mut recv = RecvBatch::new(0, false);
    let mut send = SendBatch::new();
    let mut current = remote;
    let mut backoff = RECONNECT_BACKOFF_START;

    loop {
        let wake = tokio::select! {
            res = recv.recv(&current) => Wake::Batch(res),
            _ = proxy.sever_link.notified() => Wake::Severed,
            _ = stop.changed() => Wake::Stopped,
        };

        let n_recv = match wake {
            Wake::Stopped => return,
            Wake::Severed => {
                if !proxy.reconnect(&mut current, &mut stop, &mut backoff).await {
                    return;
                }
                continue;
            }
            Wake::Batch(Err(e)) => {
                if proxy.stopped() {
                    return;
                }
                info!("remote: {e}, reconnecting");
                if !proxy.reconnect(&mut current, &mut stop, &mut backoff).await {
                    return;
                }
                continue;
            }
            Wake::Batch(Ok(n)) => n,
        };

        proxy.last_active.store(true, Ordering::Relaxed);
        backoff = RECONNECT_BACKOFF_START;

        let Some(client) = proxy.client_addr() else {
            debug!("s->c: {n_recv} pkt(s) dropped, no client addr");
            continue;
        };

        debug_assert!(send.is_empty());
        for i in 0..n_recv {
            if recv.len(i) == 0 {
                continue;
            }
            let n = recv.len(i);
            let Some(out) = transform::transform_inbound(&proxy.cfg, recv.datagram_mut(i))
            else {
                debug!("s->c batch: invalid/junk packet {n}B, dropped");
                continue;
            };
            send.push(out, Some(client));
        }

        if !send.is_empty() {
            if let Err(e) = send.flush(&listen).await {
                error!("listen batch write: {e}");
            }
        }
    }
}
