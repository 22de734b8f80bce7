//! Service entries and the arena that owns them.
//!
//! Every participant in the reactor, top-level or accepted, lives as one
//! entry in a [`ServiceTable`]. Handles are index+generation pairs so a
//! released slot invalidates every outstanding [`ServiceId`] that pointed at
//! it. Ownership runs through indices only: a parent holds its children's
//! ids, a child holds a non-owning back index.

use std::io;
use std::os::fd::{AsRawFd, RawFd};

use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Interest, Registry, Token};

use crate::addr::Ipv4Address;
use crate::handler::ServiceHandler;
use crate::roster::Roster;

/// Handle to a service entry. Copyable, cheap, and stale-safe: using a handle
/// after its entry was released simply finds nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId {
    index: u32,
    generation: u32,
}

impl ServiceId {
    pub(crate) fn token(self) -> Token {
        Token(self.index as usize)
    }

    pub(crate) fn index(self) -> usize {
        self.index as usize
    }
}

/// Discriminant the dispatch loop branches on: servers are dispatched
/// unconditionally on readiness, clients only after a data probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Server,
    Client,
}

/// The bound descriptor of a service, one variant per transport role.
pub(crate) enum Socket {
    Listener(TcpListener),
    Stream(TcpStream),
    Datagram(UdpSocket),
}

impl Socket {
    /// Read readiness is the only interest the engine tracks.
    pub(crate) fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        match self {
            Socket::Listener(s) => registry.register(s, token, Interest::READABLE),
            Socket::Stream(s) => registry.register(s, token, Interest::READABLE),
            Socket::Datagram(s) => registry.register(s, token, Interest::READABLE),
        }
    }

    pub(crate) fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Socket::Listener(s) => registry.deregister(s),
            Socket::Stream(s) => registry.deregister(s),
            Socket::Datagram(s) => registry.deregister(s),
        }
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        match self {
            Socket::Listener(s) => s.as_raw_fd(),
            Socket::Stream(s) => s.as_raw_fd(),
            Socket::Datagram(s) => s.as_raw_fd(),
        }
    }

    pub(crate) fn local_port(&self) -> Option<u16> {
        let addr = match self {
            Socket::Listener(s) => s.local_addr(),
            Socket::Stream(s) => s.local_addr(),
            Socket::Datagram(s) => s.local_addr(),
        };
        addr.ok().map(|a| a.port())
    }
}

pub(crate) struct ServiceEntry {
    pub(crate) kind: ServiceKind,
    pub(crate) socket: Option<Socket>,
    pub(crate) parent: Option<ServiceId>,
    pub(crate) remote: Option<Ipv4Address>,
    pub(crate) children: Roster<ServiceId>,
    pub(crate) handler: Option<Box<dyn ServiceHandler>>,
}

impl ServiceEntry {
    pub(crate) fn new(kind: ServiceKind, handler: Box<dyn ServiceHandler>) -> Self {
        Self {
            kind,
            socket: None,
            parent: None,
            remote: None,
            children: Roster::new(),
            handler: Some(handler),
        }
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.socket.is_some()
    }
}

struct Slot {
    generation: u32,
    entry: Option<ServiceEntry>,
}

/// Arena of service entries with LIFO slot reuse.
pub(crate) struct ServiceTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ServiceTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, entry: ServiceEntry) -> ServiceId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                ServiceId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                ServiceId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    pub(crate) fn get(&self, id: ServiceId) -> Option<&ServiceEntry> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: ServiceId) -> Option<&mut ServiceEntry> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Releases the entry and invalidates every handle to it.
    pub(crate) fn remove(&mut self, id: ServiceId) -> Option<ServiceEntry> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index() as u32);
        Some(entry)
    }
}
