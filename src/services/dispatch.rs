//! Broadcast dispatcher: fan-out of one event to a list of connections.
//!
//! DESIGN
//! ======
//! Pure delivery, no business logic. Each connection owns a bounded outlet
//! drained by its socket task; delivery is `try_send` so a slow socket can
//! never stall the room actor that is broadcasting.
//!
//! A closed outlet means the socket task has exited. That is reported back
//! as "likely disconnected" instead of an error: the disconnect path is the
//! authoritative cleanup and removing members here would race with it.

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::{ConnectionId, Outlet};
use crate::wire::ServerEvent;

/// Outcome of delivering to one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Outlet full; this event was dropped for this connection only.
    Dropped,
    /// Outlet closed; the connection is most likely gone.
    Disconnected,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: Vec<ConnectionId>,
    pub disconnected: Vec<ConnectionId>,
}

/// Deliver one event to one connection.
pub fn send_one(connection_id: ConnectionId, outlet: &Outlet, event: ServerEvent) -> Delivery {
    let name = event.name();
    match outlet.try_send(event) {
        Ok(()) => Delivery::Delivered,
        Err(TrySendError::Full(_)) => {
            warn!(%connection_id, event = name, "dispatch: outlet full, event dropped");
            Delivery::Dropped
        }
        Err(TrySendError::Closed(_)) => {
            debug!(%connection_id, event = name, "dispatch: outlet closed");
            Delivery::Disconnected
        }
    }
}

/// Deliver `event` to every listed connection, in iteration order.
pub fn send<'a>(targets: impl IntoIterator<Item = (ConnectionId, &'a Outlet)>, event: &ServerEvent) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for (connection_id, outlet) in targets {
        match send_one(connection_id, outlet, event.clone()) {
            Delivery::Delivered => report.delivered += 1,
            Delivery::Dropped => report.dropped.push(connection_id),
            Delivery::Disconnected => report.disconnected.push(connection_id),
        }
    }
    report
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;
