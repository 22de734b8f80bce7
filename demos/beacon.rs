//! Datagram beacon listener.
//!
//! Binds a broadcast-capable datagram socket and prints every payload that
//! arrives. Pair it with e.g. `echo -n hello | nc -u -b 255.255.255.255 7778`.

use anyhow::{bail, Context, Result};
use millrace::{logger_by_name, Reactor, ServiceId};

fn main() -> Result<()> {
    let port: u16 = match std::env::args().nth(1) {
        Some(arg) => arg.parse().context("port must be a number")?,
        None => 7778,
    };

    let mut net = Reactor::new()?;
    if let Some(logger) = logger_by_name("stderr", "beacon") {
        net.set_logger(logger);
    }

    let beacon = net.add_client(|net: &mut Reactor, id: ServiceId| {
        let mut buf = [0u8; 2048];
        let n = net.recv(id, &mut buf);
        println!("{} bytes: {}", n, String::from_utf8_lossy(&buf[..n]));
    });

    if !net.open_datagram(beacon, port) {
        bail!("cannot bind datagram port {port}");
    }
    eprintln!("listening for datagrams on port {port}");

    loop {
        net.run_once()?;
    }
}
