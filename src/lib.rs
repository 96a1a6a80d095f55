/*! The TCP connection engine of the kernel's socket layer.

The crate is split the same way the rest of the network stack is:

 * [wire] deals with the segment *representation*: zero-copy accessors over
   octet buffers, a high-level `Repr`, the MSS and Window Scale options and the
   Internet checksum over the IPv4 pseudo-header.
 * [storage] provides the fixed-capacity ring buffer backing both halves of a
   connection.
 * [socket] holds the connection state machine, [`socket::tcp::Socket`]. It never
   blocks and never performs I/O: inbound segments are fed to it, and outbound
   segments are built by it as owned octet buffers.
 * [iface] wraps a socket into a [`iface::Connection`], the blocking facade used by
   system calls, and runs one retransmission driver thread per connection. The
   network layer, the clock and the port table are injected collaborators.

There is no congestion control and no round-trip time estimation; the
retransmission timeout is a fixed 100 ms.
*/

#![deny(unsafe_code)]

#[macro_use]
mod macros;

pub mod config;
pub mod iface;
pub mod phy;
pub mod socket;
pub mod storage;
pub mod time;
pub mod wire;
