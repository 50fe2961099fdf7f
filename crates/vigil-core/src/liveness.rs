//! Idle connection sweeping.
//!
//! Each inbound frame refreshes a connection's last-seen time. The sweeper
//! asks connections silent for longer than the idle timeout to close; the
//! connection loop then exits and unregisters as it would for any other
//! close.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use vigil_transport::CloseFrame;

use crate::hub::Hub;
use crate::registry::ConnectionRegistry;

/// Close reason sent to idle connections.
pub const IDLE_REASON: &str = "idle timeout";

/// Close idle connections in one registry. Returns how many were asked to
/// close.
pub fn sweep(registry: &ConnectionRegistry, timeout: Duration) -> usize {
    let mut closed = 0;
    for handle in registry.idle_connections(timeout) {
        if handle.is_closing() {
            continue;
        }
        debug!(
            connection = %handle.id(),
            participant = %handle.owner(),
            idle_ms = handle.idle_for().as_millis() as u64,
            "Closing idle connection"
        );
        handle.close(CloseFrame::new(CloseFrame::GOING_AWAY, IDLE_REASON));
        closed += 1;
    }
    closed
}

impl Hub {
    /// Close every connection idle beyond the configured timeout.
    pub fn sweep_idle(&self) -> usize {
        let timeout = self.config.idle_timeout;
        let closed = sweep(self.chat(), timeout)
            + sweep(self.relay.monitored(), timeout)
            + sweep(self.relay.observers(), timeout);
        if closed > 0 {
            info!(closed, "Swept idle connections");
        }
        closed
    }

    /// Sweep idle connections periodically until the hub is dropped.
    ///
    /// Returns `None` when the idle timeout is zero.
    pub fn spawn_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.config.idle_timeout.is_zero() {
            return None;
        }

        let period = self.config.sweep_interval.max(Duration::from_millis(10));
        let weak: Weak<Hub> = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(hub) = weak.upgrade() else {
                    debug!("Hub dropped, stopping sweeper");
                    return;
                };
                hub.sweep_idle();
            }
        }))
    }
}
