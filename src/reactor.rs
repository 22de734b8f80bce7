//! The dispatch engine.
//!
//! One [`Reactor`] owns the service arena and a registration-ordered list of
//! top-level services. Each [`Reactor::run_once`] call performs exactly one
//! poll-and-dispatch cycle: block on OS readiness across every bound
//! descriptor (top-level and accepted children), then walk the tree and
//! invoke handlers. The caller supplies the outer loop.
//!
//! Everything runs on the calling thread. Handlers run to completion before
//! the next ready descriptor is examined; a handler that blocks stalls the
//! whole engine.

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::RawFd;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Events, Poll};
use socket2::{Domain, SockAddr, Socket as RawSocket, Type};

use crate::addr::{Ipv4Address, NetAddress};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::handler::ServiceHandler;
use crate::log::{Logger, NoOpLogger, Severity};
use crate::roster::Roster;
use crate::service::{ServiceEntry, ServiceId, ServiceKind, ServiceTable, Socket};

const EVENTS_CAPACITY: usize = 256;

/// Single-threaded readiness multiplexer over a two-level service tree.
pub struct Reactor {
    poll: Poll,
    events: Events,
    table: ServiceTable,
    roots: Roster<ServiceId>,
    logger: Box<dyn Logger>,
    residual: bool,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            poll: Poll::new().map_err(Error::Init)?,
            events: Events::with_capacity(EVENTS_CAPACITY),
            table: ServiceTable::new(),
            roots: Roster::new(),
            logger: Box::new(NoOpLogger),
            residual: false,
        })
    }

    /// Replaces the diagnostics sink. The default discards everything.
    pub fn set_logger(&mut self, logger: Box<dyn Logger>) {
        self.logger = logger;
    }

    // ---- registration -----------------------------------------------------

    /// Creates an unbound server-kind service and registers it.
    pub fn add_server<H>(&mut self, handler: H) -> ServiceId
    where
        H: ServiceHandler + 'static,
    {
        let id = self
            .table
            .insert(ServiceEntry::new(ServiceKind::Server, Box::new(handler)));
        self.register(id);
        id
    }

    /// Creates an unbound client-kind service and registers it.
    pub fn add_client<H>(&mut self, handler: H) -> ServiceId
    where
        H: ServiceHandler + 'static,
    {
        let id = self
            .table
            .insert(ServiceEntry::new(ServiceKind::Client, Box::new(handler)));
        self.register(id);
        id
    }

    /// Adds an existing service back to the top-level list, e.g. after the
    /// engine unregistered it on disconnect. Duplicates are refused.
    pub fn register(&mut self, id: ServiceId) -> bool {
        if self.table.get(id).is_none() || self.roots.contains(&id) {
            return false;
        }
        self.roots.push(id);
        self.logger
            .log(Severity::Debug, &format!("service {id:?} registered"));
        true
    }

    /// Removes a service from the top-level list without touching its state.
    pub fn unregister(&mut self, id: ServiceId) -> bool {
        let removed = self.roots.remove(&id);
        if removed {
            self.logger
                .log(Severity::Debug, &format!("service {id:?} unregistered"));
        }
        removed
    }

    /// Number of currently registered top-level services.
    pub fn registered(&self) -> usize {
        self.roots.len()
    }

    // ---- binding ----------------------------------------------------------

    /// Binds a server-kind service to a listening TCP socket with default
    /// options (backlog 5, address reuse on). Port 0 picks an ephemeral port.
    /// Failure leaves the service unbound; the caller decides about retries.
    pub fn listen(&mut self, id: ServiceId, port: u16) -> bool {
        self.listen_with(
            id,
            &ServerConfig {
                port,
                ..ServerConfig::default()
            },
        )
    }

    pub fn listen_with(&mut self, id: ServiceId, config: &ServerConfig) -> bool {
        match self.table.get(id) {
            Some(entry) if entry.kind == ServiceKind::Server && !entry.is_bound() => {}
            _ => return false,
        }
        match new_listener(config) {
            Ok(listener) => {
                let bound = self.bind_socket(id, Socket::Listener(listener));
                if bound {
                    self.logger.log(
                        Severity::Debug,
                        &format!("server service {id:?} listening on port {}", config.port),
                    );
                }
                bound
            }
            Err(e) => {
                self.logger.log(
                    Severity::Error,
                    &format!("listen on port {} failed: {e}", config.port),
                );
                false
            }
        }
    }

    /// Connects a client-kind service to `addr`. The connect itself blocks;
    /// only the established socket meets the poller, non-blocking. Failure
    /// leaves the service unbound.
    pub fn connect(&mut self, id: ServiceId, addr: &dyn NetAddress) -> bool {
        match self.table.get(id) {
            Some(entry) if entry.kind == ServiceKind::Client && !entry.is_bound() => {}
            _ => return false,
        }
        let target = match addr.to_socket_addr() {
            Some(target) => target,
            None => {
                self.logger.log(
                    Severity::Error,
                    &format!("connect: no host transport for address {}", addr.to_text()),
                );
                return false;
            }
        };
        let stream = match connect_stream(target) {
            Ok(stream) => stream,
            Err(e) => {
                self.logger
                    .log(Severity::Error, &format!("connect to {target} failed: {e}"));
                return false;
            }
        };
        if !self.bind_socket(id, Socket::Stream(stream)) {
            return false;
        }
        if let SocketAddr::V4(v4) = target {
            if let Some(entry) = self.table.get_mut(id) {
                entry.remote = Some(Ipv4Address::from_socket_addr(v4));
            }
        }
        true
    }

    /// Binds a client-kind service to a datagram socket on `port`, broadcast
    /// enabled. Datagram services are connectionless and always client-kind:
    /// there is no accepted peer to attribute traffic to.
    pub fn open_datagram(&mut self, id: ServiceId, port: u16) -> bool {
        match self.table.get(id) {
            Some(entry) if entry.kind == ServiceKind::Client && !entry.is_bound() => {}
            _ => return false,
        }
        let bound = UdpSocket::bind(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            port,
        )))
        .and_then(|socket| {
            socket.set_broadcast(true)?;
            Ok(socket)
        });
        match bound {
            Ok(socket) => self.bind_socket(id, Socket::Datagram(socket)),
            Err(e) => {
                self.logger.log(
                    Severity::Error,
                    &format!("datagram bind on port {port} failed: {e}"),
                );
                false
            }
        }
    }

    /// Accepts one pending connection on a server-kind service. On success
    /// the child is created bound, carries the peer's address and the parent
    /// link, and joins the server's child list. On failure the supplied
    /// handler is dropped and the server stays bound.
    pub fn accept<H>(&mut self, server: ServiceId, handler: H) -> Option<ServiceId>
    where
        H: ServiceHandler + 'static,
    {
        let accepted = match self.table.get_mut(server) {
            Some(entry) if entry.kind == ServiceKind::Server => match entry.socket.as_mut() {
                Some(Socket::Listener(listener)) => listener.accept(),
                _ => return None,
            },
            _ => return None,
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(_) => return None,
        };

        let mut entry = ServiceEntry::new(ServiceKind::Client, Box::new(handler));
        entry.parent = Some(server);
        entry.socket = Some(Socket::Stream(stream));
        if let SocketAddr::V4(v4) = peer {
            entry.remote = Some(Ipv4Address::from_socket_addr(v4));
        }
        let child = self.table.insert(entry);

        let registered = match self.table.get_mut(child).and_then(|e| e.socket.as_mut()) {
            Some(socket) => socket.register(self.poll.registry(), child.token()).is_ok(),
            None => false,
        };
        if !registered {
            self.table.remove(child);
            return None;
        }
        if let Some(parent) = self.table.get_mut(server) {
            parent.children.push(child);
        }
        self.logger.log(
            Severity::Debug,
            &format!("server {server:?} accepted child {child:?} from {peer}"),
        );
        Some(child)
    }

    // ---- byte I/O ---------------------------------------------------------

    /// Sends bytes on the bound descriptor. Returns the count actually
    /// written; 0 when unbound or when the OS takes nothing. A zero count is
    /// a valid result for the caller to interpret, never an engine error.
    pub fn send(&mut self, id: ServiceId, buf: &[u8]) -> usize {
        match self.table.get_mut(id).and_then(|e| e.socket.as_mut()) {
            Some(Socket::Stream(stream)) => stream.write(buf).unwrap_or(0),
            Some(Socket::Datagram(socket)) => socket.send(buf).unwrap_or(0),
            _ => 0,
        }
    }

    /// Receives bytes from the bound descriptor. Returns 0 when unbound or
    /// when nothing arrives.
    pub fn recv(&mut self, id: ServiceId, buf: &mut [u8]) -> usize {
        match self.table.get_mut(id).and_then(|e| e.socket.as_mut()) {
            Some(Socket::Stream(stream)) => stream.read(buf).unwrap_or(0),
            Some(Socket::Datagram(socket)) => socket.recv(buf).unwrap_or(0),
            _ => 0,
        }
    }

    /// Formatted send; the rendered text goes to the socket in one write.
    /// Usually reached through [`crate::sendf!`].
    pub fn send_fmt(&mut self, id: ServiceId, args: fmt::Arguments<'_>) -> usize {
        let text = args.to_string();
        self.send(id, text.as_bytes())
    }

    /// Non-blocking, non-consuming probe for pending data. True only when at
    /// least one byte is waiting; false for unbound services, empty sockets
    /// and closed peers alike.
    pub fn peek(&self, id: ServiceId) -> bool {
        let fd = match self.table.get(id).and_then(|e| e.socket.as_ref()) {
            Some(socket) => socket.raw_fd(),
            None => return false,
        };
        let mut probe = [0u8; 1];
        let n = unsafe { libc::recv(fd, probe.as_mut_ptr().cast(), 1, libc::MSG_PEEK) };
        n > 0
    }

    // ---- teardown ---------------------------------------------------------

    /// Closes the service: releases its descriptor, recursively closes and
    /// destroys every owned child, detaches from the parent's child list and
    /// resets to unbound. Idempotent; later calls are no-ops. The entry
    /// itself survives (see [`Reactor::release`]).
    pub fn close(&mut self, id: ServiceId) {
        match self.table.get_mut(id) {
            Some(entry) => {
                if let Some(mut socket) = entry.socket.take() {
                    let _ = socket.deregister(self.poll.registry());
                }
            }
            None => return,
        }
        if let Some(parent) = self.table.get_mut(id).and_then(|e| e.parent.take()) {
            if let Some(entry) = self.table.get_mut(parent) {
                entry.children.remove(&id);
            }
        }
        let children: Vec<ServiceId> = match self.table.get_mut(id) {
            Some(entry) => std::mem::take(&mut entry.children).iter().copied().collect(),
            None => return,
        };
        for child in children {
            self.destroy(child);
        }
    }

    /// Closes the service and releases its entry; every handle to it goes
    /// stale. Top-level services are only ever destroyed this way. The
    /// dispatch loop merely unregisters them.
    pub fn release(&mut self, id: ServiceId) {
        self.close(id);
        self.roots.remove(&id);
        if self.table.remove(id).is_some() {
            self.logger
                .log(Severity::Debug, &format!("service {id:?} released"));
        }
    }

    fn destroy(&mut self, id: ServiceId) {
        self.close(id);
        self.table.remove(id);
    }

    fn unbind(&mut self, id: ServiceId) {
        if let Some(entry) = self.table.get_mut(id) {
            if let Some(mut socket) = entry.socket.take() {
                let _ = socket.deregister(self.poll.registry());
            }
        }
    }

    // ---- introspection ----------------------------------------------------

    pub fn is_bound(&self, id: ServiceId) -> bool {
        self.table.get(id).map(|e| e.is_bound()).unwrap_or(false)
    }

    pub fn kind(&self, id: ServiceId) -> Option<ServiceKind> {
        self.table.get(id).map(|e| e.kind)
    }

    pub fn parent(&self, id: ServiceId) -> Option<ServiceId> {
        self.table.get(id).and_then(|e| e.parent)
    }

    pub fn children(&self, id: ServiceId) -> &[ServiceId] {
        self.table
            .get(id)
            .map(|e| e.children.as_slice())
            .unwrap_or(&[])
    }

    /// Remote peer address; present only for connected or accepted services.
    pub fn remote_address(&self, id: ServiceId) -> Option<&Ipv4Address> {
        self.table.get(id).and_then(|e| e.remote.as_ref())
    }

    /// Local port of the bound descriptor; handy with ephemeral binds.
    pub fn local_port(&self, id: ServiceId) -> Option<u16> {
        self.table
            .get(id)
            .and_then(|e| e.socket.as_ref())
            .and_then(|s| s.local_port())
    }

    // ---- dispatch ---------------------------------------------------------

    /// One poll-and-dispatch cycle.
    ///
    /// Blocks with no timeout until at least one registered descriptor is
    /// ready (with nothing bound anywhere this blocks indefinitely, which is
    /// a caller configuration error, not an engine fault). Then, in
    /// registration order: server roots dispatch unconditionally on
    /// readiness, client roots dispatch after a successful data probe or are
    /// unbound and unregistered on a failed one. Each root's children are
    /// scanned independently of that outcome: a ready child dispatches on
    /// data or is destroyed on a failed probe, with the scan cursor adjusted
    /// so the child swapped into the vacated position is not skipped.
    ///
    /// Readiness left behind by a cycle is never lost: a listener with more
    /// queued connections or a stream with unconsumed bytes is ready again on
    /// the next call, which then polls without blocking.
    ///
    /// A readiness-wait failure aborts the cycle with no partial dispatch;
    /// the next call retries implicitly.
    pub fn run_once(&mut self) -> Result<()> {
        let timeout = if self.residual {
            Some(Duration::ZERO)
        } else {
            None
        };
        self.poll
            .poll(&mut self.events, timeout)
            .map_err(Error::Wait)?;

        // The poller's notifications are edge-triggered, so the wake above
        // only decides when to look. The readiness set itself is sampled
        // fresh across every dispatchable descriptor; otherwise a partially
        // drained socket would never be revisited.
        let mut ready: HashSet<ServiceId> = HashSet::new();
        for id in self.dispatchable() {
            if self.ready_now(id) {
                ready.insert(id);
            }
        }

        let roots: Vec<ServiceId> = self.roots.iter().copied().collect();
        for id in roots {
            if !self.roots.contains(&id) {
                // A handler earlier in this cycle unregistered it.
                continue;
            }
            let kind = match self.table.get(id) {
                Some(entry) if entry.is_bound() => Some(entry.kind),
                _ => None,
            };
            if let Some(kind) = kind {
                if ready.contains(&id) {
                    match kind {
                        // An accept-ready listener has work by definition.
                        ServiceKind::Server => self.dispatch(id),
                        ServiceKind::Client => {
                            if self.peek(id) {
                                self.dispatch(id);
                            } else {
                                // Readable without data: the peer went away.
                                self.logger.log(
                                    Severity::Debug,
                                    &format!("dropping disconnected service {id:?}"),
                                );
                                self.unbind(id);
                                self.roots.remove(&id);
                            }
                        }
                    }
                }
            }
            // Children are scanned even when this cycle just unregistered
            // their parent; they may be serviced once more.
            self.scan_children(id, &ready);
        }

        // Anything still readable after the walk carries into the next
        // cycle, which must not block on a wake that will never come.
        self.residual = self
            .dispatchable()
            .into_iter()
            .any(|id| self.ready_now(id));
        Ok(())
    }

    /// Every service the dispatch walk can reach this cycle: the registered
    /// roots plus their children.
    fn dispatchable(&self) -> Vec<ServiceId> {
        let mut ids = Vec::new();
        for &root in self.roots.iter() {
            ids.push(root);
            if let Some(entry) = self.table.get(root) {
                ids.extend(entry.children.iter().copied());
            }
        }
        ids
    }

    /// Level-triggered readiness sample of a single service's descriptor.
    /// Unlike [`Reactor::peek`] this also answers for listeners, where a
    /// queued connection counts as readable.
    fn ready_now(&self, id: ServiceId) -> bool {
        match self.table.get(id).and_then(|e| e.socket.as_ref()) {
            Some(socket) => poll_readable(socket.raw_fd()),
            None => false,
        }
    }

    fn scan_children(&mut self, parent: ServiceId, ready: &HashSet<ServiceId>) {
        let mut i = 0;
        loop {
            let child = match self
                .table
                .get(parent)
                .and_then(|e| e.children.get(i).copied())
            {
                Some(child) => child,
                None => break,
            };
            let bound = self.table.get(child).map(|e| e.is_bound()).unwrap_or(false);
            if bound && ready.contains(&child) {
                if self.peek(child) {
                    self.dispatch(child);
                } else {
                    self.logger.log(
                        Severity::Debug,
                        &format!("dropping disconnected child {child:?} of {parent:?}"),
                    );
                    // Removal swaps the last child into position i; holding
                    // the cursor re-examines the swapped-in child.
                    self.destroy(child);
                    continue;
                }
            }
            i += 1;
        }
    }

    /// Runs a service's handler with the engine handed back to it. The
    /// handler slot is emptied for the duration of the call, so a service
    /// cannot be dispatched reentrantly.
    fn dispatch(&mut self, id: ServiceId) {
        let mut handler = match self.table.get_mut(id).and_then(|e| e.handler.take()) {
            Some(handler) => handler,
            None => return,
        };
        handler.on_ready(self, id);
        if let Some(entry) = self.table.get_mut(id) {
            if entry.handler.is_none() {
                entry.handler = Some(handler);
            }
        }
    }

    fn bind_socket(&mut self, id: ServiceId, mut socket: Socket) -> bool {
        if socket.register(self.poll.registry(), id.token()).is_err() {
            return false;
        }
        match self.table.get_mut(id) {
            Some(entry) => {
                entry.socket = Some(socket);
                true
            }
            None => {
                let _ = socket.deregister(self.poll.registry());
                false
            }
        }
    }
}

fn new_listener(config: &ServerConfig) -> io::Result<TcpListener> {
    let socket = RawSocket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(config.reuse_addr)?;
    socket.bind(&SockAddr::from(SocketAddrV4::new(
        Ipv4Addr::UNSPECIFIED,
        config.port,
    )))?;
    socket.listen(config.backlog)?;
    socket.set_nonblocking(true)?;
    Ok(TcpListener::from_std(socket.into()))
}

fn connect_stream(target: SocketAddr) -> io::Result<TcpStream> {
    // Blocking connect; only the established socket meets the poller.
    let stream = std::net::TcpStream::connect(target)?;
    stream.set_nonblocking(true)?;
    Ok(TcpStream::from_std(stream))
}

fn poll_readable(fd: RawFd) -> bool {
    let mut probe = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let n = unsafe { libc::poll(&mut probe, 1, 0) };
    n > 0 && probe.revents & libc::POLLIN != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sendf;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn noop(_: &mut Reactor, _: ServiceId) {}

    #[test]
    fn registered_count_tracks_adds_and_removes() {
        let mut net = Reactor::new().unwrap();
        let a = net.add_server(noop);
        let b = net.add_client(noop);
        assert_eq!(net.registered(), 2);

        // Duplicate registration is refused.
        assert!(!net.register(a));
        assert_eq!(net.registered(), 2);

        assert!(net.unregister(a));
        assert!(!net.unregister(a));
        assert_eq!(net.registered(), 1);

        assert!(net.register(a));
        assert_eq!(net.registered(), 2);

        net.release(b);
        assert_eq!(net.registered(), 1);
    }

    #[test]
    fn unbound_io_yields_zero() {
        let mut net = Reactor::new().unwrap();
        let idle = net.add_client(noop);
        let mut buf = [0u8; 8];
        assert_eq!(net.send(idle, b"x"), 0);
        assert_eq!(net.recv(idle, &mut buf), 0);
        assert!(!net.peek(idle));
        assert!(!net.is_bound(idle));
    }

    #[test]
    fn kind_mismatch_refuses_bind() {
        let mut net = Reactor::new().unwrap();
        let server = net.add_server(noop);
        let client = net.add_client(noop);

        assert!(!net.listen(client, 0));
        assert!(!net.open_datagram(server, 0));

        let mut addr = Ipv4Address::new();
        assert!(addr.set_text("127.0.0.1"));
        addr.set_port(9);
        assert!(!net.connect(server, &addr));
    }

    #[test]
    fn connect_refuses_unroutable_family() {
        let mut net = Reactor::new().unwrap();
        let client = net.add_client(noop);
        let mut addr = crate::addr::IpxAddress::new();
        assert!(addr.set_text("0000ABCD.0050BA116324.4545"));
        assert!(!net.connect(client, &addr));
        assert!(!net.is_bound(client));
    }

    #[test]
    fn one_pending_connection_yields_one_child() {
        let mut net = Reactor::new().unwrap();
        let accepted: Rc<RefCell<Vec<ServiceId>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = accepted.clone();
        let server = net.add_server(move |net: &mut Reactor, id: ServiceId| {
            if let Some(child) = net.accept(id, noop) {
                sink.borrow_mut().push(child);
            }
        });
        assert!(net.listen(server, 0));
        let port = net.local_port(server).unwrap();

        let _peer = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        net.run_once().unwrap();

        assert_eq!(accepted.borrow().len(), 1);
        let child = accepted.borrow()[0];
        assert!(net.is_bound(child));
        assert_eq!(net.kind(child), Some(ServiceKind::Client));
        assert_eq!(net.parent(child), Some(server));
        assert_eq!(net.children(server), &[child]);
        assert!(net.remote_address(child).unwrap().matches_text("127.0.0.1"));
        // The listener itself never carries a remote address.
        assert!(net.remote_address(server).is_none());
    }

    #[test]
    fn echo_round_trip_through_accepted_child() {
        let mut net = Reactor::new().unwrap();
        let received: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        let server = net.add_server(move |net: &mut Reactor, id: ServiceId| {
            let sink = sink.clone();
            net.accept(id, move |net: &mut Reactor, child: ServiceId| {
                let mut buf = [0u8; 64];
                let n = net.recv(child, &mut buf);
                sink.borrow_mut().extend_from_slice(&buf[..n]);
                net.send(child, &buf[..n]);
            });
        });
        assert!(net.listen(server, 0));
        let port = net.local_port(server).unwrap();

        let mut peer = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        net.run_once().unwrap(); // accept

        peer.write_all(b"hello").unwrap();
        net.run_once().unwrap(); // child handler fires

        assert_eq!(received.borrow().as_slice(), b"hello");

        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut echo = [0u8; 5];
        peer.read_exact(&mut echo).unwrap();
        assert_eq!(&echo, b"hello");
    }

    #[test]
    fn child_peer_close_destroys_child_without_dispatch() {
        let mut net = Reactor::new().unwrap();
        let child_fired = Rc::new(RefCell::new(false));
        let fired = child_fired.clone();
        let server = net.add_server(move |net: &mut Reactor, id: ServiceId| {
            let fired = fired.clone();
            net.accept(id, move |_: &mut Reactor, _: ServiceId| {
                *fired.borrow_mut() = true;
            });
        });
        assert!(net.listen(server, 0));
        let port = net.local_port(server).unwrap();

        let peer = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        net.run_once().unwrap();
        assert_eq!(net.children(server).len(), 1);
        let child = net.children(server)[0];

        drop(peer);
        net.run_once().unwrap();

        assert!(net.children(server).is_empty());
        assert!(net.kind(child).is_none(), "child entry must be released");
        assert!(!*child_fired.borrow(), "handler must not run on disconnect");
        // The server itself is untouched.
        assert!(net.is_bound(server));
        assert_eq!(net.registered(), 1);
    }

    #[test]
    fn close_is_idempotent_and_cascades() {
        let mut net = Reactor::new().unwrap();
        let server = net.add_server(|net: &mut Reactor, id: ServiceId| {
            net.accept(id, noop);
        });
        assert!(net.listen(server, 0));
        let port = net.local_port(server).unwrap();

        let _peer = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        net.run_once().unwrap();
        let child = net.children(server)[0];

        net.close(server);
        assert!(!net.is_bound(server));
        assert!(net.children(server).is_empty());
        assert!(net.kind(child).is_none());
        // Closed, not unregistered or released.
        assert_eq!(net.registered(), 1);
        assert_eq!(net.kind(server), Some(ServiceKind::Server));

        // Second close is a no-op.
        net.close(server);
        assert_eq!(net.registered(), 1);
    }

    #[test]
    fn client_service_receives_and_is_unregistered_on_disconnect() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut net = Reactor::new().unwrap();
        let received: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        let client = net.add_client(move |net: &mut Reactor, id: ServiceId| {
            let mut buf = [0u8; 16];
            let n = net.recv(id, &mut buf);
            sink.borrow_mut().extend_from_slice(&buf[..n]);
        });

        let mut addr = Ipv4Address::new();
        assert!(addr.set_text("127.0.0.1"));
        addr.set_port(port);
        assert!(net.connect(client, &addr));
        assert!(net.is_bound(client));
        assert!(net.remote_address(client).unwrap().matches_text("127.0.0.1"));

        let (mut peer, _) = listener.accept().unwrap();
        peer.write_all(b"ping").unwrap();
        net.run_once().unwrap();
        assert_eq!(received.borrow().as_slice(), b"ping");

        drop(peer);
        net.run_once().unwrap();
        assert_eq!(net.registered(), 0);
        assert!(!net.is_bound(client));
        // Unregistered, not destroyed: the entry still belongs to the caller.
        assert_eq!(net.kind(client), Some(ServiceKind::Client));
    }

    #[test]
    fn datagram_service_delivers_payload() {
        let mut net = Reactor::new().unwrap();
        let received: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        let beacon = net.add_client(move |net: &mut Reactor, id: ServiceId| {
            let mut buf = [0u8; 32];
            let n = net.recv(id, &mut buf);
            sink.borrow_mut().extend_from_slice(&buf[..n]);
        });
        assert!(net.open_datagram(beacon, 0));
        let port = net.local_port(beacon).unwrap();

        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"beacon", ("127.0.0.1", port)).unwrap();
        net.run_once().unwrap();

        assert_eq!(received.borrow().as_slice(), b"beacon");
    }

    #[test]
    fn formatted_send_reaches_the_peer() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut net = Reactor::new().unwrap();
        let client = net.add_client(noop);
        let mut addr = Ipv4Address::new();
        assert!(addr.set_text("127.0.0.1"));
        addr.set_port(port);
        assert!(net.connect(client, &addr));
        let (mut peer, _) = listener.accept().unwrap();

        let n = sendf!(net, client, "seq={} ok\n", 7);
        assert_eq!(n, 9);

        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut line = [0u8; 9];
        peer.read_exact(&mut line).unwrap();
        assert_eq!(&line, b"seq=7 ok\n");
    }

    #[test]
    fn queued_connections_survive_into_the_next_cycle() {
        let mut net = Reactor::new().unwrap();
        let server = net.add_server(|net: &mut Reactor, id: ServiceId| {
            // One accept per dispatch; the rest of the backlog must keep the
            // listener ready.
            net.accept(id, noop);
        });
        assert!(net.listen(server, 0));
        let port = net.local_port(server).unwrap();

        let _first = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        let _second = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();

        net.run_once().unwrap();
        assert_eq!(net.children(server).len(), 1);

        net.run_once().unwrap();
        assert_eq!(
            net.children(server).len(),
            2,
            "second queued connection must be accepted next cycle"
        );
    }

    #[test]
    fn unconsumed_bytes_redispatch_the_child() {
        let mut net = Reactor::new().unwrap();
        let received: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = received.clone();
        let server = net.add_server(move |net: &mut Reactor, id: ServiceId| {
            let sink = sink.clone();
            net.accept(id, move |net: &mut Reactor, child: ServiceId| {
                // Deliberately under-read: three bytes per dispatch.
                let mut buf = [0u8; 3];
                let n = net.recv(child, &mut buf);
                sink.borrow_mut().extend_from_slice(&buf[..n]);
            });
        });
        assert!(net.listen(server, 0));
        let port = net.local_port(server).unwrap();

        let mut peer = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        peer.write_all(b"abcdef").unwrap();

        net.run_once().unwrap(); // accept
        net.run_once().unwrap(); // first three bytes
        assert_eq!(received.borrow().as_slice(), b"abc");

        net.run_once().unwrap(); // leftovers, without new traffic
        assert_eq!(received.borrow().as_slice(), b"abcdef");
    }

    #[test]
    fn rebinding_a_closed_service_works() {
        let mut net = Reactor::new().unwrap();
        let server = net.add_server(noop);
        assert!(net.listen(server, 0));
        assert!(!net.listen(server, 0), "already bound");
        net.close(server);
        assert!(net.listen(server, 0), "closed service can bind again");
    }
}
