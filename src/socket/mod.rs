/*! Communication between endpoints.

The `socket` module deals with *network endpoints* and *buffering*.
It provides the TCP protocol state machine together with the send and receive
windows it fills and drains. The state machine never blocks and never touches the
network: it consumes inbound segments, produces outbound ones, and reports when it
next wants to be polled. Blocking and threading live in [iface](../iface/index.html).
*/

use core::fmt;

use crate::time::Instant;

pub mod tcp;

/// Gives an indication on the next time the socket should be polled.
#[derive(Debug, PartialOrd, Ord, PartialEq, Eq, Clone, Copy)]

pub enum PollAt {
    /// The socket needs to be polled immediately.
    Now,
    /// The socket needs to be polled at given [Instant][struct.Instant].
    Time(Instant),
    /// The socket does not need to be polled unless there are external changes.
    Ingress,
}

/// A POSIX error number, as reported to socket callers.
///
/// The numeric values follow Linux.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]

pub enum Errno {
    /// The peer did not answer the handshake, or refused it.
    ConnectionRefused,
    /// The connection was reset, or its receive half finished.
    ConnectionReset,
    /// A single send exceeds the send buffer capacity.
    MessageSize,
    /// The socket is already connected.
    IsConnected,
    /// A connection attempt is already in progress.
    Already,
    /// The operation is not supported on this socket.
    OperationNotSupported,
    /// The socket is not connected.
    NotConnected,
    /// No local port could be bound.
    AddressInUse,
    /// The network layer could not send the opening segment.
    NetworkUnreachable,
}

impl Errno {
    /// Return the Linux error number.
    pub const fn code(self) -> i32 {
        match self {
            Errno::ConnectionRefused => 111,
            Errno::ConnectionReset => 104,
            Errno::MessageSize => 90,
            Errno::IsConnected => 106,
            Errno::Already => 114,
            Errno::OperationNotSupported => 95,
            Errno::NotConnected => 107,
            Errno::AddressInUse => 98,
            Errno::NetworkUnreachable => 101,
        }
    }

    /// Return the symbolic name, e.g. `ECONNREFUSED`.
    pub const fn name(self) -> &'static str {
        match self {
            Errno::ConnectionRefused => "ECONNREFUSED",
            Errno::ConnectionReset => "ECONNRESET",
            Errno::MessageSize => "EMSGSIZE",
            Errno::IsConnected => "EISCONN",
            Errno::Already => "EALREADY",
            Errno::OperationNotSupported => "EOPNOTSUPP",
            Errno::NotConnected => "ENOTCONN",
            Errno::AddressInUse => "EADDRINUSE",
            Errno::NetworkUnreachable => "ENETUNREACH",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

impl core::error::Error for Errno {}
