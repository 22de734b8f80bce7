//! Line echo server.
//!
//! Run with `cargo run --example echo_server [port]`, then connect with
//! netcat. Every accepted connection echoes its input back and the server
//! logs lifecycle events to stderr.

use anyhow::{bail, Context, Result};
use millrace::{logger_by_name, NetAddress, Reactor, ServiceId};

fn main() -> Result<()> {
    let port: u16 = match std::env::args().nth(1) {
        Some(arg) => arg.parse().context("port must be a number")?,
        None => 7777,
    };

    let mut net = Reactor::new()?;
    if let Some(logger) = logger_by_name("stderr", "echo_server") {
        net.set_logger(logger);
    }

    let server = net.add_server(|net: &mut Reactor, id: ServiceId| {
        let child = net.accept(id, |net: &mut Reactor, child: ServiceId| {
            let mut buf = [0u8; 1024];
            let n = net.recv(child, &mut buf);
            if n > 0 {
                net.send(child, &buf[..n]);
            }
        });
        if let Some(child) = child {
            if let Some(peer) = net.remote_address(child) {
                eprintln!("connection from {}", peer.to_text());
            }
        }
    });

    if !net.listen(server, port) {
        bail!("cannot listen on port {port}");
    }
    eprintln!("echoing on port {port}");

    loop {
        net.run_once()?;
    }
}
