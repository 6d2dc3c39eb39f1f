//! Two-direction UDP relay session.
//!
//! One session relays a single WireGuard client to one AmneziaWG server:
//!
//! ```text
//!  WG client ──▶ listen socket ── transform ──▶ connected socket ──▶ AWG server
//!            ◀── listen socket ◀── transform ── connected socket ◀──
//! ```
//!
//! Four tasks run for the session lifetime: the stop handler, the
//! inactivity checker, and one loop per direction. The client address is
//! learned from inbound datagrams and re-learned after every reconnect;
//! the server link reconnects with exponential backoff whenever it errors
//! or goes silent past the configured timeout.
//!
//! On Linux both direction loops run on the batched syscall backend in
//! [`batch`]; elsewhere they fall back to the single-message loops here.

#[cfg(target_os = "linux")]
mod batch;
mod net;

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::Result;
use crate::obfuscation::{generate_cps_packets, generate_junk_packets};
#[cfg(not(target_os = "linux"))]
use crate::transform;

/// Datagram buffer size: standard MTU.
pub(crate) const BUF_SIZE: usize = 1500;

/// Headroom reserved in front of receive buffers for the padding prefix;
/// matches the upper bound on `S1..S4`.
pub(crate) const MAX_PAD: usize = 256;

pub(crate) const RECONNECT_BACKOFF_START: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);
const ACTIVITY_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// A relay session between one WireGuard client and one AmneziaWG server.
pub struct Proxy {
    cfg: Arc<Config>,
    listen_spec: String,
    remote_spec: String,
    /// Bound listen address, available once `run` has bound the socket.
    local_addr: RwLock<Option<SocketAddrV4>>,
    /// Learned client address; cleared on reconnect.
    client_addr: RwLock<Option<SocketAddrV4>>,
    /// Current connected socket to the server, swapped on reconnect. The
    /// replaced socket closes when the last task drops its clone.
    remote: RwLock<Option<Arc<UdpSocket>>>,
    stopped: AtomicBool,
    /// Heartbeat flag: set by either direction on traffic, cleared by the
    /// inactivity checker.
    last_active: AtomicBool,
    /// Fired by the inactivity checker to force the server→client loop off
    /// its dead socket and into reconnect.
    sever_link: Notify,
}

impl Proxy {
    /// Create a session. `listen` and `remote` are `host:port` specs; the
    /// remote spec is re-resolved on every reconnect.
    pub fn new(cfg: Arc<Config>, listen: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            cfg,
            listen_spec: listen.into(),
            remote_spec: remote.into(),
            local_addr: RwLock::new(None),
            client_addr: RwLock::new(None),
            remote: RwLock::new(None),
            stopped: AtomicBool::new(false),
            last_active: AtomicBool::new(false),
            sever_link: Notify::new(),
        }
    }

    /// The bound listen address, once the session is running.
    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        *self.local_addr.read()
    }

    /// The currently learned client address, if any.
    pub fn client_addr(&self) -> Option<SocketAddrV4> {
        *self.client_addr.read()
    }

    /// Run the session until `stop` is signaled.
    ///
    /// Fails only when the initial resolve, bind, or dial fails; everything
    /// after startup is handled with drops and reconnects.
    pub async fn run(self: Arc<Self>, stop: watch::Receiver<bool>) -> Result<()> {
        let listen_addr = net::resolve_udp4(&self.listen_spec).await?;
        let listen = Arc::new(net::bind_udp4(listen_addr)?);
        let bound = match listen.local_addr().map_err(crate::error::Error::Network)? {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(v6) => {
                // Cannot happen with an AF_INET bind; fail loudly if it does.
                return Err(crate::error::Error::Network(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("listen socket bound to IPv6 address {v6}"),
                )));
            }
        };
        *self.local_addr.write() = Some(bound);
        net::log_socket_buffers(&listen, "listen");

        let remote_addr = net::resolve_udp4(&self.remote_spec).await?;
        let remote = Arc::new(net::connect_udp4(remote_addr)?);
        net::log_socket_buffers(&remote, "remote");
        *self.remote.write() = Some(remote.clone());
        self.last_active.store(true, Ordering::Relaxed);

        info!("listen={bound} remote={remote_addr}");

        let stop_handler = {
            let proxy = self.clone();
            let mut rx = stop.clone();
            tokio::spawn(async move {
                let _ = rx.changed().await;
                proxy.stopped.store(true, Ordering::SeqCst);
            })
        };
        let checker = tokio::spawn(self.clone().inactivity_checker(stop.clone()));

        #[cfg(target_os = "linux")]
        let (c2s, s2c) = (
            tokio::spawn(batch::client_to_server(
                self.clone(),
                listen.clone(),
                stop.clone(),
            )),
            tokio::spawn(batch::server_to_client(
                self.clone(),
                listen.clone(),
                remote,
                stop.clone(),
            )),
        );
        #[cfg(not(target_os = "linux"))]
        let (c2s, s2c) = (
            tokio::spawn(
                self.clone()
                    .client_to_server(listen.clone(), stop.clone()),
            ),
            tokio::spawn(
                self.clone()
                    .server_to_client(listen.clone(), remote, stop.clone()),
            ),
        );

        let _ = tokio::join!(stop_handler, checker, c2s, s2c);
        *self.remote.write() = None;
        Ok(())
    }

    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn current_remote(&self) -> Option<Arc<UdpSocket>> {
        self.remote.read().clone()
    }

    /// Record the client address from an inbound datagram.
    fn learn_client(&self, addr: SocketAddrV4) {
        if self.client_addr() != Some(addr) {
            *self.client_addr.write() = Some(addr);
            info!("client: {addr}");
        }
    }

    /// Send the CPS packets (template order) followed by the junk packets
    /// ahead of a transformed handshake init. A send error abandons the
    /// rest of that packet class but never the relay loop.
    async fn send_decoy_burst(&self, remote: &UdpSocket, cps_counter: &mut u32) {
        let cps = generate_cps_packets(&self.cfg.cps, cps_counter);
        let total = cps.len();
        for (i, pkt) in cps.iter().enumerate() {
            if let Err(e) = remote.send(pkt).await {
                debug!("c->s: cps {}/{total} write error: {e}", i + 1);
                break;
            }
            debug!("c->s: cps {}/{total} {}B sent", i + 1, pkt.len());
        }

        let junk = generate_junk_packets(&self.cfg);
        let total = junk.len();
        for (i, pkt) in junk.iter().enumerate() {
            if let Err(e) = remote.send(pkt).await {
                debug!("c->s: junk {}/{total} write error: {e}", i + 1);
                break;
            }
            debug!("c->s: junk {}/{total} {}B sent", i + 1, pkt.len());
        }
    }

    /// Periodically age the heartbeat flag; after `timeout` of silence in
    /// both directions, sever the server link so its loop reconnects.
    async fn inactivity_checker(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let interval = ACTIVITY_CHECK_INTERVAL;
        let checks_needed =
            (self.cfg.timeout_secs / interval.as_secs()).max(1) as u32;
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut inactive = 0u32;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => return,
            }

            if self
                .last_active
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                inactive = 0;
            } else {
                inactive += 1;
                if inactive >= checks_needed {
                    info!("remote timeout, triggering reconnect");
                    self.sever_link.notify_one();
                    inactive = 0;
                }
            }
        }
    }

    /// Replace the dead remote socket. Returns false when the session is
    /// shutting down.
    async fn reconnect(
        &self,
        current: &mut Arc<UdpSocket>,
        stop: &mut watch::Receiver<bool>,
        backoff: &mut Duration,
    ) -> bool {
        let Some(fresh) = self.redial(stop, backoff).await else {
            return false;
        };
        let fresh = Arc::new(fresh);
        net::log_socket_buffers(&fresh, "remote");
        *self.remote.write() = Some(fresh.clone());
        // The old socket closes once the client→server loop picks up the
        // swap and drops its clone.
        *current = fresh;
        self.last_active.store(true, Ordering::Relaxed);
        // The new link is a new session: the client must be re-learned.
        *self.client_addr.write() = None;
        !self.stopped()
    }

    /// Dial a fresh connected socket with exponential backoff, re-resolving
    /// the server address each attempt. Returns `None` on shutdown.
    async fn redial(
        &self,
        stop: &mut watch::Receiver<bool>,
        backoff: &mut Duration,
    ) -> Option<UdpSocket> {
        loop {
            if *stop.borrow() || self.stopped() {
                return None;
            }

            info!("reconnecting to {}", self.remote_spec);
            match net::resolve_udp4(&self.remote_spec).await {
                Err(e) => error!("resolve: {e}"),
                Ok(addr) => match net::connect_udp4(addr) {
                    Ok(conn) => {
                        info!("reconnected to {addr}");
                        *backoff = RECONNECT_BACKOFF_START;
                        return Some(conn);
                    }
                    Err(e) => error!("dial: {e}"),
                },
            }

            tokio::select! {
                _ = tokio::time::sleep(*backoff) => {}
                _ = stop.changed() => return None,
            }
            *backoff = (*backoff * 2).min(RECONNECT_BACKOFF_MAX);
        }
    }

    /// Single-message client→server loop (non-Linux fallback).
    #[cfg(not(target_os = "linux"))]
    async fn client_to_server(
        self: Arc<Self>,
        listen: Arc<UdpSocket>,
        mut stop: watch::Receiver<bool>,
    ) {
        let headroom = MAX_PAD;
        let mut buf = vec![0u8; headroom + BUF_SIZE];
        let mut cps_counter: u32 = 0;

        loop {
            let (n, addr) = tokio::select! {
                res = listen.recv_from(&mut buf[headroom..]) => match res {
                    Ok(v) => v,
                    Err(e) => {
                        if self.stopped() || net::is_closed_error(&e) {
                            return;
                        }
                        error!("listen read: {e}");
                        continue;
                    }
                },
                _ = stop.changed() => return,
            };

            match addr {
                SocketAddr::V4(v4) => self.learn_client(v4),
                SocketAddr::V6(_) => {
                    debug!("client: unexpected address family");
                    continue;
                }
            }

            let Some(remote) = self.current_remote() else {
                continue;
            };

            let (out, send_junk) =
                transform::transform_outbound(&self.cfg, &mut buf, headroom, n);
            debug!("c->s: recv {n}B, send {}B, junk={send_junk}", out.len());

            if send_junk {
                self.send_decoy_burst(&remote, &mut cps_counter).await;
            }
            match remote.send(out).await {
                Ok(_) => {}
                Err(e) if net::is_closed_error(&e) => {
                    // Reconnect in progress; WG will retransmit.
                }
                Err(e) => error!("remote write: {e}"),
            }
            self.last_active.store(true, Ordering::Relaxed);
        }
    }

    /// Single-message server→client loop (non-Linux fallback); owns
    /// reconnects for the remote link.
    #[cfg(not(target_os = "linux"))]
    async fn server_to_client(
        self: Arc<Self>,
        listen: Arc<UdpSocket>,
        remote: Arc<UdpSocket>,
        mut stop: watch::Receiver<bool>,
    ) {
        enum Wake {
            Recv(std::io::Result<usize>),
            Severed,
            Stopped,
        }

        let mut buf = vec![0u8; BUF_SIZE];
        let mut current = remote;
        let mut backoff = RECONNECT_BACKOFF_START;

        loop {
            let wake = tokio::select! {
                res = current.recv(&mut buf) => Wake::Recv(res),
                _ = self.sever_link.notified() => Wake::Severed,
                _ = stop.changed() => Wake::Stopped,
            };

            let n = match wake {
                Wake::Stopped => return,
                Wake::Severed => {
                    if !self.reconnect(&mut current, &mut stop, &mut backoff).await {
                        return;
                    }
                    continue;
                }
                Wake::Recv(Err(e)) => {
                    if self.stopped() {
                        return;
                    }
                    info!("remote: {e}, reconnecting");
                    if !self.reconnect(&mut current, &mut stop, &mut backoff).await {
                        return;
                    }
                    continue;
                }
                Wake::Recv(Ok(n)) => n,
            };

            self.last_active.store(true, Ordering::Relaxed);
            backoff = RECONNECT_BACKOFF_START;

            let Some(out) = transform::transform_inbound(&self.cfg, &mut buf[..n]) else {
                debug!("s->c: invalid/junk packet {n}B, dropped");
                continue;
            };

            let Some(client) = self.client_addr() else {
                debug!("s->c: no client addr, packet dropped");
                continue;
            };
            if let Err(e) = listen.send_to(out, SocketAddr::V4(client)).await {
                error!("listen write: {e}");
            } else {
                debug!("s->c: sent {}B to {client}", out.len());
            }
        }
    }
}
