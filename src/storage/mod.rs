/*! Specialized containers.

The `storage` module provides the containers used by the connection engine:
a ring buffer that backs both halves of a connection's byte stream.
*/

mod ring_buffer;

pub use self::ring_buffer::RingBuffer;
