use crate::reactor::Reactor;
use crate::service::ServiceId;

/// Per-service readiness callback.
///
/// Invoked by [`Reactor::run_once`] when the service's descriptor is ready:
/// unconditionally for servers (an accept-ready listener has a pending
/// connection), and after a successful data probe for clients. The handler
/// runs to completion on the dispatching thread and receives the reactor back
/// so it can read, write, accept or close through it.
pub trait ServiceHandler {
    fn on_ready(&mut self, net: &mut Reactor, id: ServiceId);
}

impl<F> ServiceHandler for F
where
    F: FnMut(&mut Reactor, ServiceId),
{
    fn on_ready(&mut self, net: &mut Reactor, id: ServiceId) {
        self(net, id)
    }
}
