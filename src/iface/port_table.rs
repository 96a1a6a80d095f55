use core::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

use heapless::Vec;

use super::connection::Shared;
use crate::config::{EPHEMERAL_PORT_FIRST, EPHEMERAL_PORT_LAST, PORT_TABLE_CAPACITY};
use crate::socket::Errno;
use crate::wire::{IpAddress, TcpPacket};

/// Error returned by [`PortTable::bind`] and [`PortTable::bind_to_unused`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]

pub enum BindError {
    /// The port is already bound, or is port 0.
    InUse,
    /// The table is full, or every ephemeral port is taken.
    Exhausted,
}

impl BindError {
    pub fn errno(&self) -> Errno {
        Errno::AddressInUse
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BindError::InUse => write!(f, "port already in use"),
            BindError::Exhausted => write!(f, "port table full"),
        }
    }
}

impl core::error::Error for BindError {}

#[derive(Debug)]
struct Binding {
    port: u16,
    /// Where inbound segments for `port` go; empty for ports bound by hand.
    connection: Option<Weak<Shared>>,
}

#[derive(Debug)]
struct Inner {
    bindings: Vec<Binding, PORT_TABLE_CAPACITY>,
    /// Next ephemeral port to try.
    cursor: u16,
}

/// The local TCP ports in use.
///
/// The table is shared by every connection of a host. It also demultiplexes inbound
/// segments to connections by destination port.
#[derive(Debug)]
pub struct PortTable {
    inner: Mutex<Inner>,
}

impl PortTable {
    /// Creates a new empty port table.
    pub fn new() -> Self {
        PortTable {
            inner: Mutex::new(Inner {
                bindings: Vec::new(),
                cursor: EPHEMERAL_PORT_FIRST,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind a specific port.
    pub fn bind(&self, port: u16) -> Result<(), BindError> {
        if port == 0 {
            return Err(BindError::InUse);
        }
        let mut inner = self.lock();
        if inner.bindings.iter().any(|binding| binding.port == port) {
            return Err(BindError::InUse);
        }
        inner
            .bindings
            .push(Binding {
                port,
                connection: None,
            })
            .map_err(|_| BindError::Exhausted)?;
        net_trace!("port table: bound {}", port);
        Ok(())
    }

    /// Bind the next free port of the ephemeral range.
    ///
    /// Ports are handed out round-robin, so a port that was just released is the
    /// last one to be picked again.
    pub fn bind_to_unused(&self) -> Result<u16, BindError> {
        let mut inner = self.lock();
        if inner.bindings.is_full() {
            return Err(BindError::Exhausted);
        }

        let range = (EPHEMERAL_PORT_LAST - EPHEMERAL_PORT_FIRST) as usize + 1;
        for _ in 0..range {
            let port = inner.cursor;
            inner.cursor = if port == EPHEMERAL_PORT_LAST {
                EPHEMERAL_PORT_FIRST
            } else {
                port + 1
            };

            if inner.bindings.iter().all(|binding| binding.port != port) {
                inner
                    .bindings
                    .push(Binding {
                        port,
                        connection: None,
                    })
                    .map_err(|_| BindError::Exhausted)?;
                net_trace!("port table: bound ephemeral {}", port);
                return Ok(port);
            }
        }
        Err(BindError::Exhausted)
    }

    /// Release a port. Returns whether it was bound.
    pub fn unbind(&self, port: u16) -> bool {
        let mut inner = self.lock();
        match inner.bindings.iter().position(|binding| binding.port == port) {
            Some(index) => {
                inner.bindings.swap_remove(index);
                net_trace!("port table: released {}", port);
                true
            }
            None => false,
        }
    }

    pub fn is_bound(&self, port: u16) -> bool {
        self.lock().bindings.iter().any(|binding| binding.port == port)
    }

    /// Number of ports currently bound.
    pub fn len(&self) -> usize {
        self.lock().bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().bindings.is_empty()
    }

    /// Route inbound segments for a bound port to a connection.
    pub(super) fn attach(&self, port: u16, connection: Weak<Shared>) {
        let mut inner = self.lock();
        if let Some(binding) = inner.bindings.iter_mut().find(|binding| binding.port == port) {
            binding.connection = Some(connection);
        }
    }

    /// Hand an inbound segment from `sender` to the connection bound to its
    /// destination port.
    ///
    /// Returns whether a connection took the segment.
    pub fn deliver(&self, segment: &[u8], sender: IpAddress) -> bool {
        let port = match TcpPacket::new_checked(segment) {
            Ok(packet) => packet.dst_port(),
            Err(_) => {
                net_debug!("port table: truncated segment from {}, dropping", sender);
                return false;
            }
        };

        // Look the connection up, then let go of the table before processing.
        let connection = self
            .lock()
            .bindings
            .iter()
            .find(|binding| binding.port == port)
            .and_then(|binding| binding.connection.as_ref())
            .and_then(Weak::upgrade);

        match connection {
            Some(connection) => {
                Shared::receive_packet(&connection, segment, sender);
                true
            }
            None => {
                net_debug!("port table: no connection on port {}, dropping", port);
                false
            }
        }
    }
}

impl Default for PortTable {
    fn default() -> Self {
        PortTable::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bind_and_unbind() {
        let ports = PortTable::new();
        assert_eq!(ports.bind(8080), Ok(()));
        assert_eq!(ports.bind(8080), Err(BindError::InUse));
        assert!(ports.is_bound(8080));
        assert!(ports.unbind(8080));
        assert!(!ports.unbind(8080));
        assert_eq!(ports.bind(8080), Ok(()));
    }

    #[test]
    fn test_port_zero() {
        let ports = PortTable::new();
        assert_eq!(ports.bind(0), Err(BindError::InUse));
        assert_eq!(BindError::InUse.errno(), Errno::AddressInUse);
    }

    #[test]
    fn test_bind_to_unused_round_robin() {
        let ports = PortTable::new();
        assert_eq!(ports.bind(EPHEMERAL_PORT_FIRST + 1), Ok(()));
        assert_eq!(ports.bind_to_unused(), Ok(EPHEMERAL_PORT_FIRST));
        assert_eq!(ports.bind_to_unused(), Ok(EPHEMERAL_PORT_FIRST + 2));
        assert!(ports.unbind(EPHEMERAL_PORT_FIRST));
        assert_eq!(ports.bind_to_unused(), Ok(EPHEMERAL_PORT_FIRST + 3));
    }

    #[test]
    fn test_exhaustion_and_reuse() {
        let ports = PortTable::new();
        let mut bound = std::vec::Vec::new();
        for _ in 0..PORT_TABLE_CAPACITY {
            bound.push(ports.bind_to_unused().unwrap());
        }
        assert_eq!(ports.len(), PORT_TABLE_CAPACITY);
        assert_eq!(ports.bind_to_unused(), Err(BindError::Exhausted));
        assert_eq!(ports.bind(80), Err(BindError::Exhausted));
        assert_eq!(BindError::Exhausted.errno(), Errno::AddressInUse);

        assert!(ports.unbind(bound[10]));
        assert!(ports.bind_to_unused().is_ok());
        assert_eq!(ports.bind_to_unused(), Err(BindError::Exhausted));
    }

    #[test]
    fn test_cursor_wraps() {
        let ports = PortTable::new();
        ports.lock().cursor = EPHEMERAL_PORT_LAST;
        assert_eq!(ports.bind_to_unused(), Ok(EPHEMERAL_PORT_LAST));
        assert_eq!(ports.bind_to_unused(), Ok(EPHEMERAL_PORT_FIRST));
    }

    #[test]
    fn test_deliver_without_connection() {
        let ports = PortTable::new();
        ports.bind(80).unwrap();
        let mut segment = [0u8; 20];
        segment[2..4].copy_from_slice(&80u16.to_be_bytes());
        segment[12] = 0x50;
        assert!(!ports.deliver(&segment, IpAddress::new(10, 0, 0, 2)));
        assert!(!ports.deliver(&segment[..10], IpAddress::new(10, 0, 0, 2)));
    }
}
