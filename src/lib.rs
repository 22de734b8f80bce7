//! # Millrace
//! A single-threaded, event-driven dispatch engine for socket services,
//! built on [`mio`]'s cross-platform readiness polling. One [`Reactor`]
//! multiplexes any number of stream and datagram services on one thread:
//! no async runtime, no worker pool, no locks.
//!
//! ## Core Philosophy
//! Millrace is built for daemons that want:
//! - **One thread, run to completion**: handlers never race each other
//! - **Explicit pumping**: the application owns the outer loop and calls
//!   [`Reactor::run_once`] per cycle
//! - **Disconnect detection for free**: the engine probes every ready
//!   client with a non-consuming peek and reaps dead peers itself
//! - **Protocol-independent addressing** through the [`NetAddress`] trait
//!
//! ## Architecture Overview
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌─────────────┐
//! │ application  │───▶│   Reactor    │───▶│  mio::Poll  │
//! │  run loop    │    │  (dispatch)  │    └─────────────┘
//! └──────────────┘    └──────┬───────┘
//!                            ▼
//!                 ┌─────────────────────┐
//!                 │ services            │
//!                 │  server ─▶ children │
//!                 │  client             │
//!                 │  datagram           │
//!                 └─────────────────────┘
//! ```
//! Services form a two-level tree: top-level servers and clients are
//! registered with the reactor, and every connection a server accepts
//! becomes a child owned by that server. Handles are cheap copyable
//! [`ServiceId`]s that go stale when their service is released.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use millrace::{Reactor, ServiceId};
//!
//! fn main() -> millrace::Result<()> {
//!     let mut net = Reactor::new()?;
//!
//!     let server = net.add_server(|net: &mut Reactor, id: ServiceId| {
//!         net.accept(id, |net: &mut Reactor, child: ServiceId| {
//!             let mut buf = [0u8; 1024];
//!             let n = net.recv(child, &mut buf);
//!             net.send(child, &buf[..n]);
//!         });
//!     });
//!     assert!(net.listen(server, 7777));
//!
//!     loop {
//!         net.run_once()?;
//!     }
//! }
//! ```
//!
//! - [`Reactor`]: owns the services and runs the poll-and-dispatch cycle
//! - [`ServiceHandler`]: per-service readiness callback
//! - [`addr`]: protocol-independent address families
//! - [`log`]: pluggable diagnostics back ends
//! - [`config`]: listener options
//! - [`error`]: the engine's two fatal error cases

pub mod addr;
pub mod config;
pub mod error;
pub mod handler;
pub mod log;
pub mod reactor;
pub mod roster;
pub mod service;

pub use addr::{Ipv4Address, IpxAddress, NetAddress};
pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{Error, Result};
pub use handler::ServiceHandler;
pub use log::{logger_by_name, Logger, NoOpLogger, Severity, StderrLogger, SyslogLogger};
pub use reactor::Reactor;
pub use roster::Roster;
pub use service::{ServiceId, ServiceKind};

/// Formatted send with `format!` syntax.
///
/// Expands to a [`Reactor::send_fmt`](crate::Reactor::send_fmt) call and
/// returns the number of bytes written:
///
/// ```rust,no_run
/// # use millrace::{Reactor, sendf};
/// # let mut net = Reactor::new().unwrap();
/// # let id = net.add_client(|_: &mut Reactor, _: millrace::ServiceId| ());
/// let sent = sendf!(net, id, "220 {} ready\r\n", "example.org");
/// ```
#[macro_export]
macro_rules! sendf {
    ($net:expr, $id:expr, $($arg:tt)*) => {
        $net.send_fmt($id, ::core::format_args!($($arg)*))
    };
}

/// Re-exports of the types nearly every consumer touches.
///
/// ```rust
/// use millrace::prelude::*;
/// ```
pub mod prelude {
    pub use crate::addr::{Ipv4Address, IpxAddress, NetAddress};
    pub use crate::config::ServerConfig;
    pub use crate::handler::ServiceHandler;
    pub use crate::log::{logger_by_name, Logger, Severity};
    pub use crate::reactor::Reactor;
    pub use crate::service::{ServiceId, ServiceKind};
    pub use crate::sendf;
}
