/*! Low-level segment access and construction.

The `wire` module deals with the segment *representation*. It provides two levels
of functionality.

 * First, it provides functions to extract fields from sequences of octets,
   and to insert fields into sequences of octets. This happens in [TcpPacket].
 * Second, in cases where the space of valid field values is much smaller than the space
   of possible field values, it provides a compact, high-level representation
   of segment data that can be parsed from and emitted into a sequence of octets.
   This happens through [TcpRepr].

[TcpPacket]: struct.TcpPacket.html
[TcpRepr]: struct.TcpRepr.html

The `Packet` family of data structures guarantees that, if the `Packet::check_len()` method
returned `Ok(())`, then no accessor or setter method will panic; however, the guarantee
provided by `Packet::check_len()` may no longer hold after changing certain fields,
which are listed in the documentation for the specific packet.

The `Packet::new_checked` method is a shorthand for a combination of `Packet::new_unchecked`
and `Packet::check_len`.
When parsing untrusted input, it is *necessary* to use `Packet::new_checked()`;
so long as the buffer is not modified, no accessor will fail.
When emitting output, though, it is *incorrect* to use `Packet::new_checked()`;
the length check is likely to succeed on a zeroed buffer, but fail on a buffer
filled with data from a previous packet.
The buffer length for emission is not calculated by the `Packet` layer.

In the `Repr` family of data structures, the `Repr::parse()` method never panics
as long as `Packet::new_checked()` (or `Packet::check_len()`) has succeeded, and
the `Repr::emit()` method never panics as long as the underlying buffer is exactly
`Repr::buffer_len()` octets long.

# Examples

To emit a TCP segment into an octet buffer, and then parse it back:

```rust
use tcpconn::phy::ChecksumCapabilities;
use tcpconn::wire::*;

let src = Ipv4Address::new(10, 0, 0, 1);
let dst = Ipv4Address::new(10, 0, 0, 2);
let repr = TcpRepr {
    src_port: 49152,
    dst_port: 80,
    control: TcpControl::Syn,
    seq_number: TcpSeqNumber(1000),
    ack_number: None,
    window_len: 8192,
    window_scale: Some(0),
    max_seg_size: Some(1460),
    payload: &[],
};
let mut buffer = vec![0; repr.buffer_len()];
repr.emit(
    &mut TcpPacket::new_unchecked(&mut buffer),
    &src,
    &dst,
    &ChecksumCapabilities::default(),
);
let packet = TcpPacket::new_checked(&buffer).expect("truncated segment");
let parsed = TcpRepr::parse(&packet, &src, &dst, &ChecksumCapabilities::default())
    .expect("malformed segment");
assert_eq!(repr, parsed);
```
*/

mod field {
    pub type Field = ::core::ops::Range<usize>;
}

pub mod ip;
mod tcp;

use core::fmt;

pub use self::ip::{
    Address as IpAddress, Endpoint as IpEndpoint, Protocol as IpProtocol, checksum,
};

pub use self::ip::Address as Ipv4Address;

pub use self::tcp::{
    Control as TcpControl, Flags as TcpFlags, HEADER_LEN as TCP_HEADER_LEN, Packet as TcpPacket,
    Repr as TcpRepr, SeqNumber as TcpSeqNumber, TcpOption,
};

/// Parsing a segment failed.
///
/// Either it is malformed, or it is not supported by this stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl core::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire::Error")
    }
}

pub type Result<T> = core::result::Result<T, Error>;
