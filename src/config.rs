//! Compile-time limits and protocol constants.
//!
//! The runtime knobs live in [`crate::iface::Config`]; their defaults are taken from here.

/// Size of each half's ring buffer, in octets.
pub const SOCKET_BUFFER_SIZE: usize = 8192;

/// Maximum number of ports a [`PortTable`](crate::iface::PortTable) can hold at once.
pub const PORT_TABLE_CAPACITY: usize = 64;

/// First port handed out by `bind_to_unused`.
pub const EPHEMERAL_PORT_FIRST: u16 = 49152;

/// Last port handed out by `bind_to_unused`.
pub const EPHEMERAL_PORT_LAST: u16 = 65535;

/// MSS advertised in our SYN: Ethernet MTU minus IPv4 and TCP headers.
pub const LOCAL_MSS: u16 = 1460;

/// MSS assumed for a peer that did not send the option (RFC 9293 § 3.7.1).
pub const DEFAULT_PEER_MSS: usize = 536;

/// Fixed retransmission timeout, in milliseconds.
pub const RETRANSMIT_TIMEOUT_MS: u64 = 100;

/// How long `connect` waits for the handshake to complete, in milliseconds.
pub const CONNECT_TIMEOUT_MS: u64 = 5000;

/// How long a connection lingers in TIME-WAIT, in milliseconds.
pub const TIME_WAIT_TIMEOUT_MS: u64 = 6000;

/// Upper bound on how long the retransmission driver sleeps between checks, in milliseconds.
pub const DRIVER_POLL_INTERVAL_MS: u64 = 100;
