use std::sync::Arc;

use super::connection::{endpoints, Shared};
use crate::socket::PollAt;
use crate::time::Duration;

/// Body of the per-connection driver thread.
///
/// Runs until the connection is closed or shut down. Each pass handles the first
/// of: TIME-WAIT expiry, an ACK owed to the peer, an acknowledgement to apply, a due
/// retransmission. With nothing to do it sleeps until the socket's next deadline or a
/// wakeup, whichever comes first.
pub(super) fn run(shared: Arc<Shared>) {
    let interval = shared.config.poll_interval;
    let mut inner = shared.lock();
    net_debug!(
        "tcp driver: started for {:?}",
        inner.socket.local_endpoint()
    );

    loop {
        if shared.is_shutdown() {
            net_debug!("tcp driver: shut down");
            break;
        }

        let now = shared.clock.now();
        if inner.socket.expire_time_wait(now) {
            shared.release_if_closed(&mut inner);
            shared.state_changed.notify_all();
        }
        if !inner.socket.is_open() {
            net_debug!("tcp driver: connection closed, exiting");
            break;
        }
        let Some((local, remote)) = endpoints(&inner.socket) else {
            break;
        };

        if let Some(segment) = inner.socket.dispatch(now) {
            shared.state_changed.notify_all();
            drop(inner);
            let _ = shared.transmit(local, remote, &segment);
            inner = shared.lock();
            continue;
        }

        if inner.socket.ack_pending() {
            inner.socket.apply_ack();
            shared.state_changed.notify_all();
            continue;
        }

        let segments = inner.socket.retransmit(now);
        if !segments.is_empty() {
            drop(inner);
            for segment in &segments {
                if shared.transmit(local, remote, segment).is_err() {
                    // The rest goes out on the next timeout.
                    break;
                }
            }
            inner = shared.lock();
            continue;
        }

        let timeout = match inner.socket.poll_at() {
            PollAt::Now => Duration::ZERO,
            PollAt::Time(at) if at > now => at - now,
            PollAt::Time(_) => Duration::ZERO,
            PollAt::Ingress => interval,
        };
        if timeout == Duration::ZERO {
            continue;
        }
        net_trace!("tcp driver: sleeping up to {}", timeout);
        inner = shared.wait_on(&shared.wakeup, inner, timeout);
    }
}
