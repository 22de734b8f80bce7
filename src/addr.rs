//! Protocol-independent network addresses.
//!
//! A [`NetAddress`] carries one transport family's address/port pair and owns
//! its own text encoding, so the service and reactor layers never need to
//! know which family they are talking to. Two families exist: the stream
//! family ([`Ipv4Address`], host or dotted-decimal plus a 16-bit port) and
//! the datagram family ([`IpxAddress`], a network/node/socket triple).

use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

/// Size of the classic datagram-family socket address structure.
const SOCKADDR_IPX_LEN: usize = 16;

/// Capability set shared by every address family.
pub trait NetAddress {
    /// Populates the address from text. Returns false when the text cannot
    /// be understood by this family.
    fn set_text(&mut self, text: &str) -> bool;

    /// Renders the current binary value back to text.
    fn to_text(&self) -> String;

    fn set_port(&mut self, port: u16);

    fn port(&self) -> u16;

    /// Length of the family's fixed internal representation as handed to the
    /// OS. Fixed per family, never per value.
    fn internal_len(&self) -> usize;

    /// Compares the stored address against a textual literal. Only the
    /// stream family supports this; everything else reports no match.
    fn matches_text(&self, _text: &str) -> bool {
        false
    }

    /// The OS-level rendering used for connect/bind calls, or `None` for
    /// families the host cannot address directly.
    fn to_socket_addr(&self) -> Option<SocketAddr>;
}

/// Stream-family address: an IPv4 host plus port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Address {
    addr: Ipv4Addr,
    port: u16,
}

impl Ipv4Address {
    /// An empty address; populate it with [`NetAddress::set_text`].
    pub fn new() -> Self {
        Self {
            addr: Ipv4Addr::UNSPECIFIED,
            port: 0,
        }
    }

    pub(crate) fn from_socket_addr(addr: SocketAddrV4) -> Self {
        Self {
            addr: *addr.ip(),
            port: addr.port(),
        }
    }
}

impl Default for Ipv4Address {
    fn default() -> Self {
        Self::new()
    }
}

impl NetAddress for Ipv4Address {
    /// Accepts a dotted-decimal literal or a hostname. A non-literal input
    /// goes through the system resolver, which blocks; the first resolved
    /// IPv4 address wins.
    fn set_text(&mut self, text: &str) -> bool {
        if let Ok(literal) = text.parse::<Ipv4Addr>() {
            self.addr = literal;
            return true;
        }
        let resolved = match (text, 0u16).to_socket_addrs() {
            Ok(addrs) => addrs
                .filter_map(|a| match a {
                    SocketAddr::V4(v4) => Some(*v4.ip()),
                    SocketAddr::V6(_) => None,
                })
                .next(),
            Err(_) => None,
        };
        match resolved {
            Some(addr) => {
                self.addr = addr;
                true
            }
            None => false,
        }
    }

    fn to_text(&self) -> String {
        self.addr.to_string()
    }

    fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn internal_len(&self) -> usize {
        mem::size_of::<libc::sockaddr_in>()
    }

    /// Literal comparison only: hostnames are not resolved here.
    fn matches_text(&self, text: &str) -> bool {
        match text.parse::<Ipv4Addr>() {
            Ok(literal) => literal == self.addr,
            Err(_) => false,
        }
    }

    fn to_socket_addr(&self) -> Option<SocketAddr> {
        Some(SocketAddr::V4(SocketAddrV4::new(self.addr, self.port)))
    }
}

/// Datagram-family address: network, node and socket number.
///
/// Text encoding is `NETWORK.NODE` or `NETWORK.NODE.SOCKET`: eight hex
/// digits of network, twelve of node, optionally four of socket number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IpxAddress {
    network: u32,
    node: [u8; 6],
    socket: u16,
}

impl IpxAddress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn network(&self) -> u32 {
        self.network
    }

    pub fn node(&self) -> [u8; 6] {
        self.node
    }
}

fn parse_hex_node(text: &str) -> Option<[u8; 6]> {
    if text.len() != 12 {
        return None;
    }
    let mut node = [0u8; 6];
    for (i, chunk) in node.iter_mut().enumerate() {
        *chunk = u8::from_str_radix(&text[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(node)
}

impl NetAddress for IpxAddress {
    fn set_text(&mut self, text: &str) -> bool {
        let mut parts = text.split('.');
        let (network, node, socket) = (parts.next(), parts.next(), parts.next());
        if parts.next().is_some() {
            return false;
        }
        let network = match network.and_then(|p| u32::from_str_radix(p, 16).ok()) {
            Some(n) => n,
            None => return false,
        };
        let node = match node.and_then(parse_hex_node) {
            Some(n) => n,
            None => return false,
        };
        let socket = match socket {
            Some(p) => match u16::from_str_radix(p, 16) {
                Ok(s) => s,
                Err(_) => return false,
            },
            None => self.socket,
        };
        self.network = network;
        self.node = node;
        self.socket = socket;
        true
    }

    fn to_text(&self) -> String {
        format!(
            "{:08X}.{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}.{:04X}",
            self.network,
            self.node[0],
            self.node[1],
            self.node[2],
            self.node[3],
            self.node[4],
            self.node[5],
            self.socket
        )
    }

    fn set_port(&mut self, port: u16) {
        self.socket = port;
    }

    fn port(&self) -> u16 {
        self.socket
    }

    fn internal_len(&self) -> usize {
        SOCKADDR_IPX_LEN
    }

    fn to_socket_addr(&self) -> Option<SocketAddr> {
        // The host OS has no native transport for this family; datagram
        // services bind by socket number instead of connecting.
        None
    }
}
