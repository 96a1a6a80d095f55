use core::cmp;

use crate::storage::RingBuffer;
use crate::time::{Duration, Instant};
use crate::wire::TcpSeqNumber;

/// A TCP socket ring buffer.
pub type SocketBuffer<'a> = RingBuffer<'a, u8>;

/// The sending half of a connection.
///
/// Unacknowledged octets occupy `[start_seq, start_seq + data_size)` of the
/// sequence space and the front of the buffer. Nothing leaves the buffer until the
/// peer acknowledges it.
#[derive(Debug)]
pub struct SendWindow<'a> {
    buffer: SocketBuffer<'a>,
    /// Oldest unacknowledged octet.
    pub(super) start_seq: TcpSeqNumber,
    /// Next octet that has never been transmitted.
    pub(super) current_seq: TcpSeqNumber,
    /// Highest acknowledgement seen from the peer, not yet applied.
    pub(super) ack_number: TcpSeqNumber,
    /// Maximum segment size the peer accepts.
    pub(super) mss: usize,
    /// Shift applied to the peer's advertised window.
    pub(super) window_scale: u8,
    /// Peer window, already scaled.
    pub(super) window: usize,
    /// When unacknowledged data was last transmitted. `None` when nothing is in flight.
    send_time: Option<Instant>,
}

impl<'a> SendWindow<'a> {
    pub fn new<T>(buffer: T, mss: usize) -> SendWindow<'a>
    where
        T: Into<SocketBuffer<'a>>,
    {
        SendWindow {
            buffer: buffer.into(),
            start_seq: TcpSeqNumber::default(),
            current_seq: TcpSeqNumber::default(),
            ack_number: TcpSeqNumber::default(),
            mss,
            window_scale: 0,
            window: 0,
            send_time: None,
        }
    }

    /// Forget all data and restart the sequence space at `seq`.
    pub(super) fn reset(&mut self, seq: TcpSeqNumber, mss: usize) {
        self.buffer.clear();
        self.start_seq = seq;
        self.current_seq = seq;
        self.ack_number = seq;
        self.mss = mss;
        self.window_scale = 0;
        self.window = 0;
        self.send_time = None;
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Number of unacknowledged octets.
    pub fn data_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Free space in the buffer.
    pub fn free(&self) -> usize {
        self.buffer.window()
    }

    /// Sequence number one past the last queued octet.
    pub fn end_seq(&self) -> TcpSeqNumber {
        self.start_seq + self.data_size()
    }

    /// Record the peer's window field. SYN segments carry it unscaled.
    pub(super) fn set_peer_window(&mut self, window_len: u16, scaled: bool) {
        let shift = if scaled { self.window_scale } else { 0 };
        self.window = (window_len as usize) << shift;
    }

    /// Append `data` in full, or nothing at all if it does not fit.
    ///
    /// Returns the sequence number one past the appended range.
    pub fn enqueue(&mut self, data: &[u8]) -> Option<TcpSeqNumber> {
        if data.len() > self.free() {
            return None;
        }
        let size = self.buffer.enqueue_slice(data);
        debug_assert_eq!(size, data.len());
        Some(self.end_seq())
    }

    /// Whether the peer has acknowledged everything before `seq`.
    pub fn is_acked(&self, seq: TcpSeqNumber) -> bool {
        self.start_seq >= seq
    }

    /// Whether an acknowledgement was recorded that has not been applied yet.
    pub fn ack_pending(&self) -> bool {
        self.ack_number > self.start_seq
    }

    /// Drop acknowledged octets from the front of the buffer.
    ///
    /// A duplicate acknowledgement changes nothing. Returns the number of octets
    /// released.
    pub fn on_ack(&mut self, ack: TcpSeqNumber) -> usize {
        if ack <= self.start_seq {
            return 0;
        }
        let delta = ack - self.start_seq;
        debug_assert!(delta <= self.data_size());
        let delta = cmp::min(delta, self.data_size());
        self.buffer.dequeue_allocated(delta);
        self.start_seq = ack;
        if self.current_seq < self.start_seq {
            self.current_seq = self.start_seq;
        }
        if self.buffer.is_empty() {
            self.send_time = None;
        }
        delta
    }

    /// Instant at which the unacknowledged data is due for (re)transmission.
    pub fn retransmit_at(&self, rto: Duration) -> Option<Instant> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(match self.send_time {
            Some(send_time) => send_time + rto,
            None => Instant::ZERO,
        })
    }

    /// Whether unacknowledged data is due for (re)transmission at `now`.
    pub fn retransmit_due(&self, now: Instant, rto: Duration) -> bool {
        match self.send_time {
            _ if self.buffer.is_empty() => false,
            None => true,
            Some(send_time) => now >= send_time + rto,
        }
    }

    /// Number of octets a transmission starting at `start_seq` may carry.
    pub fn sendable(&self) -> usize {
        cmp::min(self.data_size(), self.window)
    }

    /// Copy up to `mss` octets starting `offset` octets past `start_seq`.
    pub(super) fn chunk(&mut self, offset: usize) -> Vec<u8> {
        let size = cmp::min(self.mss, self.sendable().saturating_sub(offset));
        let mut chunk = vec![0; size];
        let read = self.buffer.read_allocated(offset, &mut chunk);
        chunk.truncate(read);
        chunk
    }

    /// Note that octets up to `end` went out at `now`.
    pub(super) fn on_transmit(&mut self, now: Instant, end: TcpSeqNumber) {
        self.send_time = Some(now);
        self.current_seq = self.current_seq.max(end);
    }
}

/// The receiving half of a connection.
///
/// Only exactly in-order payload is accepted; anything else is dropped and left
/// for the peer to retransmit.
#[derive(Debug)]
pub struct ReceiveWindow<'a> {
    buffer: SocketBuffer<'a>,
    /// Next octet the application reads.
    pub(super) start_seq: TcpSeqNumber,
    /// Acknowledgement number last sent to the peer.
    pub(super) ack_number: TcpSeqNumber,
    /// Local maximum segment size.
    pub(super) mss: usize,
    /// Shift applied to the window we advertise.
    pub(super) window_scale: u8,
}

impl<'a> ReceiveWindow<'a> {
    pub fn new<T>(buffer: T, mss: usize) -> ReceiveWindow<'a>
    where
        T: Into<SocketBuffer<'a>>,
    {
        let buffer = buffer.into();
        let window_scale = window_scale_for(buffer.capacity());

        ReceiveWindow {
            buffer,
            start_seq: TcpSeqNumber::default(),
            ack_number: TcpSeqNumber::default(),
            mss,
            window_scale,
        }
    }

    /// Go back to the shift the buffer capacity calls for.
    pub(super) fn restore_window_scale(&mut self) {
        self.window_scale = window_scale_for(self.capacity());
    }

    /// Forget all data and expect the peer's first octet at `seq`.
    pub(super) fn reset(&mut self, seq: TcpSeqNumber) {
        self.buffer.clear();
        self.start_seq = seq;
        self.ack_number = seq;
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Number of octets waiting for the application.
    pub fn data_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Sequence number of the next in-order octet expected from the peer.
    pub fn next_seq(&self) -> TcpSeqNumber {
        self.start_seq + self.data_size()
    }

    /// Window size to advertise.
    ///
    /// This is the buffer capacity, not the free space in it.
    pub fn advertised_window(&self) -> usize {
        self.buffer.capacity()
    }

    /// Window field value for a segment, scaled unless it is a SYN.
    pub(super) fn window_field(&self, syn: bool) -> u16 {
        let shift = if syn { 0 } else { self.window_scale };
        u16::try_from(self.advertised_window() >> shift).unwrap_or(u16::MAX)
    }

    /// Accept a payload starting at `seq` if it continues the stream exactly.
    ///
    /// Returns the number of octets appended; payload beyond the free space is cut.
    pub fn on_payload(&mut self, seq: TcpSeqNumber, payload: &[u8]) -> usize {
        if seq != self.next_seq() {
            return 0;
        }
        self.buffer.enqueue_slice(payload)
    }

    /// Move up to `data.len()` octets to the application.
    pub fn consume(&mut self, data: &mut [u8]) -> usize {
        let size = self.buffer.dequeue_slice(data);
        self.start_seq += size;
        size
    }
}

/// Largest shift allowed by RFC 7323.
const MAX_WINDOW_SCALE: u8 = 14;

fn window_scale_for(capacity: usize) -> u8 {
    // From RFC 1323:
    // [...] the above constraints imply that 2 * the max window size must be less
    // than 2**31 [...] Thus, the shift count must be limited to 14 (which allows
    // windows of 2**30 = 1 Gbyte).
    // Larger buffers advertise at most 1 GiB.
    let cap_log2 = usize::BITS as usize - capacity.leading_zeros() as usize;
    cmp::min(cap_log2.saturating_sub(16), MAX_WINDOW_SCALE as usize) as u8
}

#[cfg(test)]
mod test {
    use super::*;

    const RTO: Duration = Duration::from_millis(100);

    fn send_window(capacity: usize) -> SendWindow<'static> {
        let mut tx = SendWindow::new(SocketBuffer::new(vec![0; capacity]), 4);
        tx.reset(TcpSeqNumber(1000), 4);
        tx.window = 64;
        tx
    }

    #[test]
    fn test_enqueue_all_or_nothing() {
        let mut tx = send_window(8);
        assert_eq!(tx.enqueue(b"abcdef"), Some(TcpSeqNumber(1006)));
        assert_eq!(tx.enqueue(b"ghi"), None);
        assert_eq!(tx.data_size(), 6);
        assert_eq!(tx.enqueue(b"gh"), Some(TcpSeqNumber(1008)));
        assert_eq!(tx.free(), 0);
    }

    #[test]
    fn test_on_ack_releases_front() {
        let mut tx = send_window(8);
        tx.enqueue(b"abcdef").unwrap();
        tx.on_transmit(Instant::ZERO, TcpSeqNumber(1006));
        assert_eq!(tx.on_ack(TcpSeqNumber(1004)), 4);
        assert_eq!(tx.start_seq, TcpSeqNumber(1004));
        assert_eq!(tx.data_size(), 2);
        assert!(tx.is_acked(TcpSeqNumber(1004)));
        assert!(!tx.is_acked(TcpSeqNumber(1006)));
        assert_eq!(tx.chunk(0), b"ef");
    }

    #[test]
    fn test_duplicate_ack_is_noop() {
        let mut tx = send_window(8);
        tx.enqueue(b"abcd").unwrap();
        tx.on_transmit(Instant::from_millis(5), TcpSeqNumber(1004));
        assert_eq!(tx.on_ack(TcpSeqNumber(1002)), 2);
        assert_eq!(tx.on_ack(TcpSeqNumber(1002)), 0);
        assert_eq!(tx.on_ack(TcpSeqNumber(1001)), 0);
        assert_eq!(tx.start_seq, TcpSeqNumber(1002));
        assert_eq!(tx.data_size(), 2);
        assert_eq!(tx.retransmit_at(RTO), Some(Instant::from_millis(105)));
    }

    #[test]
    fn test_retransmit_timer() {
        let mut tx = send_window(8);
        assert!(!tx.retransmit_due(Instant::ZERO, RTO));
        assert_eq!(tx.retransmit_at(RTO), None);

        tx.enqueue(b"abcd").unwrap();
        assert!(tx.retransmit_due(Instant::ZERO, RTO));
        tx.on_transmit(Instant::from_millis(10), TcpSeqNumber(1004));
        assert!(!tx.retransmit_due(Instant::from_millis(109), RTO));
        assert!(tx.retransmit_due(Instant::from_millis(110), RTO));

        tx.on_ack(TcpSeqNumber(1004));
        assert!(tx.is_empty());
        assert_eq!(tx.retransmit_at(RTO), None);
    }

    #[test]
    fn test_chunks_limited_by_mss_and_peer_window() {
        let mut tx = send_window(16);
        tx.window = 6;
        tx.enqueue(b"abcdefghij").unwrap();
        assert_eq!(tx.sendable(), 6);
        assert_eq!(tx.chunk(0), b"abcd");
        assert_eq!(tx.chunk(4), b"ef");
        assert_eq!(tx.chunk(6), b"");
    }

    #[test]
    fn test_peer_window_scaling() {
        let mut tx = send_window(8);
        tx.window_scale = 3;
        tx.set_peer_window(100, false);
        assert_eq!(tx.window, 100);
        tx.set_peer_window(100, true);
        assert_eq!(tx.window, 800);
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut tx = SendWindow::new(SocketBuffer::new(vec![0; 8]), 536);
        tx.reset(TcpSeqNumber(u32::MAX - 2), 536);
        tx.window = 8;
        assert_eq!(tx.enqueue(b"abcdef"), Some(TcpSeqNumber(3)));
        tx.on_transmit(Instant::ZERO, TcpSeqNumber(3));
        assert!(!tx.is_acked(TcpSeqNumber(3)));
        assert_eq!(tx.on_ack(TcpSeqNumber(1)), 4);
        assert_eq!(tx.start_seq, TcpSeqNumber(1));
        assert_eq!(tx.on_ack(TcpSeqNumber(u32::MAX)), 0);
        assert!(tx.is_acked(TcpSeqNumber(u32::MAX)));
    }

    #[test]
    fn test_receive_in_order_only() {
        let mut rx = ReceiveWindow::new(SocketBuffer::new(vec![0; 8]), 536);
        rx.reset(TcpSeqNumber(500));
        assert_eq!(rx.on_payload(TcpSeqNumber(503), b"xyz"), 0);
        assert_eq!(rx.on_payload(TcpSeqNumber(500), b"abc"), 3);
        assert_eq!(rx.on_payload(TcpSeqNumber(500), b"abc"), 0);
        assert_eq!(rx.next_seq(), TcpSeqNumber(503));
        assert_eq!(rx.on_payload(TcpSeqNumber(503), b"defghijk"), 5);
        assert_eq!(rx.data_size(), 8);

        let mut buf = [0; 6];
        assert_eq!(rx.consume(&mut buf), 6);
        assert_eq!(&buf, b"abcdef");
        assert_eq!(rx.start_seq, TcpSeqNumber(506));
        assert_eq!(rx.next_seq(), TcpSeqNumber(508));
    }

    #[test]
    fn test_advertised_window_is_capacity() {
        let mut rx = ReceiveWindow::new(SocketBuffer::new(vec![0; 64]), 536);
        rx.reset(TcpSeqNumber(0));
        assert_eq!(rx.advertised_window(), 64);
        assert_eq!(rx.on_payload(TcpSeqNumber(0), &[1; 40]), 40);
        // Free space is 24, the advertisement stays at the capacity.
        assert_eq!(rx.advertised_window(), 64);
        assert_eq!(rx.window_field(false), 64);
    }

    #[test]
    fn test_local_window_scale() {
        let rx = ReceiveWindow::new(SocketBuffer::new(vec![0; 8192]), 536);
        assert_eq!(rx.window_scale, 0);
        assert_eq!(rx.window_field(false), 8192);

        let rx = ReceiveWindow::new(SocketBuffer::new(vec![0; 1 << 18]), 536);
        assert_eq!(rx.window_scale, 3);
        assert_eq!(rx.window_field(true), u16::MAX);
        assert_eq!(rx.window_field(false), 1 << 15);
    }

    #[test]
    fn test_window_scale_clamped() {
        assert_eq!(window_scale_for(1 << 30), 14);
        assert_eq!(window_scale_for((1 << 30) + 1), 14);
        assert_eq!(window_scale_for(usize::MAX), 14);
    }
}
