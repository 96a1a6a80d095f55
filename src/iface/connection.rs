use core::cmp;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use super::driver;
use super::{Clock, Config, NetworkError, NetworkLayer, PortTable};
use crate::socket::tcp::{
    CloseError, ConnectError, ListenError, RecvError, SendError, Socket, SocketBuffer, State,
};
use crate::time::{Duration, Instant};
use crate::wire::{IpAddress, IpEndpoint, TcpPacket, TcpRepr, TcpSeqNumber};

/// Initial sequence number from a clock ticking every 4 µs (RFC 793 § 3.3).
fn initial_seq(now: Instant) -> TcpSeqNumber {
    TcpSeqNumber((now.total_micros() / 4) as u32)
}

fn connectable(state: State) -> Result<(), ConnectError> {
    match state {
        State::Closed => Ok(()),
        State::SynSent | State::SynReceived => Err(ConnectError::InProgress),
        _ => Err(ConnectError::IsConnected),
    }
}

/// Local and remote endpoints of a socket that has been connected.
pub(super) fn endpoints(socket: &Socket) -> Option<(IpEndpoint, IpEndpoint)> {
    Some((socket.local_endpoint()?, socket.remote_endpoint()?))
}

pub(super) struct Inner {
    pub(super) socket: Socket<'static>,
    /// Local port, while bound.
    port: Option<u16>,
}

/// State shared by a [`Connection`], its driver thread and the port table.
pub(super) struct Shared {
    inner: Mutex<Inner>,
    /// Signalled whenever a blocked caller may be able to make progress.
    pub(super) state_changed: Condvar,
    /// Signalled whenever the driver may have work.
    pub(super) wakeup: Condvar,
    local_addr: IpAddress,
    network: Arc<dyn NetworkLayer>,
    ports: Arc<PortTable>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: Config,
    shutdown: AtomicBool,
}

impl Shared {
    pub(super) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Sleep on `condvar` for at most `timeout`, capped at the poll interval.
    pub(super) fn wait_on<'a>(
        &self,
        condvar: &Condvar,
        guard: MutexGuard<'a, Inner>,
        timeout: Duration,
    ) -> MutexGuard<'a, Inner> {
        let timeout = cmp::min(timeout, self.config.poll_interval);
        let (guard, _) = condvar
            .wait_timeout(guard, timeout.into())
            .unwrap_or_else(PoisonError::into_inner);
        guard
    }

    /// Give the port back once the socket is closed.
    pub(super) fn release_if_closed(&self, inner: &mut Inner) {
        if inner.socket.is_open() {
            return;
        }
        if let Some(port) = inner.port.take() {
            self.ports.unbind(port);
        }
    }

    /// Hand a segment to the network layer. Must be called without the lock held.
    pub(super) fn transmit(
        &self,
        local: IpEndpoint,
        remote: IpEndpoint,
        segment: &[u8],
    ) -> Result<(), NetworkError> {
        self.network.send(local, remote, segment).map_err(|err| {
            net_warn!("tcp: cannot send {} octets to {}: {}", segment.len(), remote, err);
            err
        })
    }

    pub(super) fn notify_all(&self) {
        self.state_changed.notify_all();
        self.wakeup.notify_all();
    }

    /// Process one inbound segment. Never blocks on anything but the lock.
    pub(super) fn receive_packet(&self, segment: &[u8], sender: IpAddress) {
        let packet = match TcpPacket::new_checked(segment) {
            Ok(packet) => packet,
            Err(_) => {
                net_debug!("tcp: truncated segment from {}, dropping", sender);
                return;
            }
        };
        let repr = match TcpRepr::parse(&packet, &sender, &self.local_addr, &self.config.checksum)
        {
            Ok(repr) => repr,
            Err(_) => {
                net_debug!("tcp: malformed segment from {}, dropping", sender);
                return;
            }
        };

        let mut inner = self.lock();
        if inner.socket.remote_endpoint().map(|endpoint| endpoint.addr) != Some(sender) {
            net_debug!("tcp: segment from unexpected {}, dropping", sender);
            return;
        }
        inner.socket.process(&repr);
        self.release_if_closed(&mut inner);
        drop(inner);
        self.notify_all();
    }
}

/// A TCP connection with blocking system call semantics.
///
/// Every operation takes the connection lock; `connect`, `send` and `recv` release it
/// while they wait. A dedicated driver thread, started by `connect`, sends the
/// acknowledgements the state machine owes and retransmits unacknowledged data.
pub struct Connection {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Create a closed connection for a host with address `local_addr`.
    pub fn new(
        local_addr: IpAddress,
        network: Arc<dyn NetworkLayer>,
        ports: Arc<PortTable>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Connection {
        let rx_buffer = SocketBuffer::new(vec![0; config.rx_buffer_size]);
        let tx_buffer = SocketBuffer::new(vec![0; config.tx_buffer_size]);
        let mut socket = Socket::new(rx_buffer, tx_buffer);
        socket.set_retransmit_timeout(config.retransmit_timeout);
        socket.set_time_wait_timeout(config.time_wait_timeout);
        socket.set_local_mss(config.local_mss);
        socket.set_checksum_caps(config.checksum.clone());

        Connection {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner { socket, port: None }),
                state_changed: Condvar::new(),
                wakeup: Condvar::new(),
                local_addr,
                network,
                ports,
                clock,
                config,
                shutdown: AtomicBool::new(false),
            }),
            driver: Mutex::new(None),
        }
    }

    pub fn state(&self) -> State {
        self.shared.lock().socket.state()
    }

    pub fn local_endpoint(&self) -> Option<IpEndpoint> {
        self.shared.lock().socket.local_endpoint()
    }

    pub fn remote_endpoint(&self) -> Option<IpEndpoint> {
        self.shared.lock().socket.remote_endpoint()
    }

    /// Passive open is not supported.
    pub fn listen(&self) -> Result<(), ListenError> {
        self.shared.lock().socket.listen()
    }

    /// Open a connection to `remote` and wait for the handshake to complete.
    ///
    /// Fails with [`ConnectError::Refused`] if the peer resets the attempt or does not
    /// answer within the connect timeout, and with [`ConnectError::Unreachable`] if
    /// the SYN cannot be handed to the network layer.
    pub fn connect(&self, remote: IpEndpoint) -> Result<(), ConnectError> {
        let shared = &self.shared;
        connectable(shared.lock().socket.state())?;
        // A driver left from an earlier connection exits once it sees CLOSED.
        self.join_driver();

        let mut inner = shared.lock();
        connectable(inner.socket.state())?;
        let port = shared.ports.bind_to_unused().map_err(|err| {
            net_debug!("tcp: cannot bind a local port: {}", err);
            ConnectError::AddressInUse
        })?;
        shared.ports.attach(port, Arc::downgrade(shared));
        inner.port = Some(port);

        let local = IpEndpoint::new(shared.local_addr, port);
        let now = shared.clock.now();
        let syn = match inner.socket.connect(local, remote, initial_seq(now)) {
            Ok(syn) => syn,
            Err(err) => {
                shared.release_if_closed(&mut inner);
                return Err(err);
            }
        };
        drop(inner);

        if shared.transmit(local, remote, &syn).is_err() {
            let mut inner = shared.lock();
            inner.socket.abandon();
            shared.release_if_closed(&mut inner);
            return Err(ConnectError::Unreachable);
        }
        self.spawn_driver();

        let deadline = now + shared.config.connect_timeout;
        let mut inner = shared.lock();
        loop {
            if !inner.socket.is_connecting() {
                return if inner.socket.is_open() {
                    net_debug!("tcp: connected {} to {}", local, remote);
                    Ok(())
                } else {
                    Err(ConnectError::Refused)
                };
            }

            let now = shared.clock.now();
            if now >= deadline || shared.is_shutdown() {
                net_debug!("tcp: no answer from {}, giving up", remote);
                inner.socket.abandon();
                shared.release_if_closed(&mut inner);
                drop(inner);
                shared.notify_all();
                return Err(ConnectError::Refused);
            }
            inner = shared.wait_on(&shared.state_changed, inner, deadline - now);
        }
    }

    /// Send all of `data`, waiting first for room in the send buffer and then for the
    /// peer to acknowledge every octet.
    ///
    /// Returns the number of octets sent, which is always `data.len()`.
    pub fn send(&self, data: &[u8]) -> Result<usize, SendError> {
        let shared = &self.shared;
        let interval = shared.config.poll_interval;
        let mut inner = shared.lock();

        let end = loop {
            if let Some(end) = inner.socket.send_slice(data)? {
                break end;
            }
            if shared.is_shutdown() {
                return Err(SendError::Reset);
            }
            inner = shared.wait_on(&shared.state_changed, inner, interval);
        };
        shared.wakeup.notify_all();

        while !inner.socket.is_acked(end) {
            if !inner.socket.is_open() || shared.is_shutdown() {
                return Err(SendError::Reset);
            }
            inner = shared.wait_on(&shared.state_changed, inner, interval);
        }
        Ok(data.len())
    }

    /// Receive into `data`, waiting while nothing is buffered.
    ///
    /// Once the peer has closed its half and everything it sent has been read, this
    /// fails with [`RecvError::Finished`].
    pub fn recv(&self, data: &mut [u8]) -> Result<usize, RecvError> {
        let shared = &self.shared;
        let interval = shared.config.poll_interval;
        let mut inner = shared.lock();

        loop {
            let size = inner.socket.recv_slice(data)?;
            if size > 0 || data.is_empty() {
                return Ok(size);
            }
            if shared.is_shutdown() {
                return Err(RecvError::Reset);
            }
            inner = shared.wait_on(&shared.state_changed, inner, interval);
        }
    }

    /// Close the sending half. Does not wait for the peer.
    pub fn close(&self) -> Result<(), CloseError> {
        let shared = &self.shared;
        let mut inner = shared.lock();
        let segment = inner.socket.close()?;
        let endpoints = endpoints(&inner.socket);
        shared.release_if_closed(&mut inner);
        drop(inner);

        if let (Some(segment), Some((local, remote))) = (segment, endpoints) {
            let _ = shared.transmit(local, remote, &segment);
        }
        shared.notify_all();
        Ok(())
    }

    /// Reset the connection, telling the peer if it knows about us.
    pub fn abort(&self) {
        let shared = &self.shared;
        let mut inner = shared.lock();
        let segment = inner.socket.abort();
        let endpoints = endpoints(&inner.socket);
        shared.release_if_closed(&mut inner);
        drop(inner);

        if let (Some(segment), Some((local, remote))) = (segment, endpoints) {
            let _ = shared.transmit(local, remote, &segment);
        }
        shared.notify_all();
    }

    /// Process one inbound segment sent by `sender`.
    pub fn receive_packet(&self, segment: &[u8], sender: IpAddress) {
        self.shared.receive_packet(segment, sender)
    }

    /// Stop the driver thread and wait for it to exit.
    ///
    /// Blocked callers return with an error. The connection state is left as is.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.join_driver();
    }

    fn join_driver(&self) {
        let handle = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            self.shared.notify_all();
            if handle.join().is_err() {
                net_warn!("tcp: driver thread panicked");
            }
        }
    }

    fn spawn_driver(&self) {
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("tcp-driver".into())
            .spawn(move || driver::run(shared));
        match spawned {
            Ok(handle) => {
                *self.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle)
            }
            Err(err) => net_warn!("tcp: cannot start driver thread: {}", err),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
        let mut inner = self.shared.lock();
        if let Some(port) = inner.port.take() {
            self.shared.ports.unbind(port);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_initial_seq_clock() {
        assert_eq!(initial_seq(Instant::ZERO), TcpSeqNumber(0));
        assert_eq!(initial_seq(Instant::from_micros(4000)), TcpSeqNumber(1000));
        // Wraps after 2**32 ticks.
        assert_eq!(
            initial_seq(Instant::from_micros(4 * (1i64 << 32) + 8)),
            TcpSeqNumber(2)
        );
    }

    #[test]
    fn test_connectable() {
        assert_eq!(connectable(State::Closed), Ok(()));
        assert_eq!(connectable(State::SynSent), Err(ConnectError::InProgress));
        assert_eq!(connectable(State::TimeWait), Err(ConnectError::IsConnected));
    }
}
