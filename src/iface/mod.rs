/*! Blocking connections and their collaborators.

The `iface` module turns the [socket](../socket/index.html) state machine into the
objects system calls work with. It owns the threads and locks: a [Connection] wraps
one socket behind a mutex, blocks callers on condition variables and runs a
retransmission driver thread. The network layer, the clock and the [PortTable] are
injected, so tests can stand in for all three.
*/

mod config;
mod connection;
mod driver;
mod network;
mod port_table;

pub use self::config::Config;
pub use self::connection::Connection;
pub use self::network::{Clock, ManualClock, NetworkError, NetworkLayer, SystemClock};
pub use self::port_table::{BindError, PortTable};
