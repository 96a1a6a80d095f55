// Heads up! Before working on this file you should read RFC 793 (in particular the
// state diagram and the event processing section) and RFC 7323 for the Window Scale
// option. The state machine here implements a deliberately small subset: active open
// only, one fixed retransmission timeout, no reassembly of out-of-order segments.

use core::fmt;
use core::fmt::Display;

use crate::config::{
    DEFAULT_PEER_MSS, LOCAL_MSS, RETRANSMIT_TIMEOUT_MS, TIME_WAIT_TIMEOUT_MS,
};
use crate::phy::ChecksumCapabilities;
use crate::socket::{Errno, PollAt};
use crate::time::{Duration, Instant};
use crate::wire::{IpEndpoint, TcpControl, TcpPacket, TcpRepr, TcpSeqNumber};

mod window;

pub use self::window::{ReceiveWindow, SendWindow, SocketBuffer};

macro_rules! tcp_trace {
    ($($arg:expr),* $(,)?) => (net_log!(trace, $($arg),*));
}

/// Error returned by [`Socket::listen`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]

pub enum ListenError {
    NotSupported,
}

impl ListenError {
    pub fn errno(&self) -> Errno {
        match *self {
            ListenError::NotSupported => Errno::OperationNotSupported,
        }
    }
}

impl Display for ListenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ListenError::NotSupported => write!(f, "passive open not supported"),
        }
    }
}

impl core::error::Error for ListenError {}

/// Error returned by [`Socket::connect`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]

pub enum ConnectError {
    /// The socket is already connected, or on its way out.
    IsConnected,
    /// A handshake is already in progress.
    InProgress,
    /// The peer refused the connection, or never answered.
    Refused,
    /// The opening segment could not be handed to the network layer.
    Unreachable,
    /// No local port could be bound.
    AddressInUse,
}

impl ConnectError {
    pub fn errno(&self) -> Errno {
        match *self {
            ConnectError::IsConnected => Errno::IsConnected,
            ConnectError::InProgress => Errno::Already,
            ConnectError::Refused => Errno::ConnectionRefused,
            ConnectError::Unreachable => Errno::NetworkUnreachable,
            ConnectError::AddressInUse => Errno::AddressInUse,
        }
    }
}

impl Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ConnectError::IsConnected => write!(f, "already connected"),
            ConnectError::InProgress => write!(f, "connection in progress"),
            ConnectError::Refused => write!(f, "connection refused"),
            ConnectError::Unreachable => write!(f, "network unreachable"),
            ConnectError::AddressInUse => write!(f, "no local port available"),
        }
    }
}

impl core::error::Error for ConnectError {}

/// Error returned by [`Socket::send_slice`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]

pub enum SendError {
    NotConnected,
    /// The connection was reset or closed for sending.
    Reset,
    /// The data can never fit into the send buffer.
    MessageTooLarge,
}

impl SendError {
    pub fn errno(&self) -> Errno {
        match *self {
            SendError::NotConnected => Errno::NotConnected,
            SendError::Reset => Errno::ConnectionReset,
            SendError::MessageTooLarge => Errno::MessageSize,
        }
    }
}

impl Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SendError::NotConnected => write!(f, "not connected"),
            SendError::Reset => write!(f, "connection reset"),
            SendError::MessageTooLarge => write!(f, "message too large"),
        }
    }
}

impl core::error::Error for SendError {}

/// Error returned by [`Socket::recv_slice`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]

pub enum RecvError {
    NotConnected,
    /// The connection was reset.
    Reset,
    /// The peer closed its half and every octet it sent has been read.
    Finished,
}

impl RecvError {
    pub fn errno(&self) -> Errno {
        match *self {
            RecvError::NotConnected => Errno::NotConnected,
            RecvError::Reset | RecvError::Finished => Errno::ConnectionReset,
        }
    }
}

impl Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            RecvError::NotConnected => write!(f, "not connected"),
            RecvError::Reset => write!(f, "connection reset"),
            RecvError::Finished => write!(f, "operation finished"),
        }
    }
}

impl core::error::Error for RecvError {}

/// Error returned by [`Socket::close`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]

pub enum CloseError {
    NotConnected,
}

impl CloseError {
    pub fn errno(&self) -> Errno {
        match *self {
            CloseError::NotConnected => Errno::NotConnected,
        }
    }
}

impl Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            CloseError::NotConnected => write!(f, "not connected"),
        }
    }
}

impl core::error::Error for CloseError {}

/// The state of a TCP socket, according to [RFC 793].
///
/// `Listen` and `Closing` exist for completeness; no event leads into them.
///
/// [RFC 793]: https://tools.ietf.org/html/rfc793
#[derive(Debug, PartialEq, Eq, Clone, Copy)]

pub enum State {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            State::Closed => write!(f, "CLOSED"),
            State::Listen => write!(f, "LISTEN"),
            State::SynSent => write!(f, "SYN-SENT"),
            State::SynReceived => write!(f, "SYN-RECEIVED"),
            State::Established => write!(f, "ESTABLISHED"),
            State::FinWait1 => write!(f, "FIN-WAIT-1"),
            State::FinWait2 => write!(f, "FIN-WAIT-2"),
            State::CloseWait => write!(f, "CLOSE-WAIT"),
            State::Closing => write!(f, "CLOSING"),
            State::LastAck => write!(f, "LAST-ACK"),
            State::TimeWait => write!(f, "TIME-WAIT"),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]

struct Tuple {
    local: IpEndpoint,
    remote: IpEndpoint,
}

impl Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local, self.remote)
    }
}

/// A Transmission Control Protocol socket.
///
/// The socket only opens connections actively. It is a pure state machine: inbound
/// segments go in through [process](#method.process), outbound segments come out of
/// [connect](#method.connect), [close](#method.close), [dispatch](#method.dispatch)
/// and [retransmit](#method.retransmit) as owned octet buffers ready for the network
/// layer. Whoever drives it decides when to call which, guided by
/// [poll_at](#method.poll_at).
#[derive(Debug)]
pub struct Socket<'a> {
    state: State,
    /// Current 4-tuple (local and remote endpoints).
    tuple: Option<Tuple>,
    tx: SendWindow<'a>,
    rx: ReceiveWindow<'a>,
    /// The peer's FIN has been accepted into the stream.
    rx_fin_received: bool,
    /// Sequence number of a FIN that arrived ahead of missing payload.
    rx_pending_fin: Option<TcpSeqNumber>,
    /// Sequence number occupied by our FIN, once it has been sent.
    tx_fin_seq: Option<TcpSeqNumber>,
    /// An ACK must go out even if the acknowledgement number did not move.
    ack_owed: bool,
    /// The connection was torn down by a reset, ours or the peer's.
    reset: bool,
    /// The handshake completed at some point.
    was_established: bool,
    time_wait_since: Option<Instant>,
    retransmit_timeout: Duration,
    time_wait_timeout: Duration,
    checksum_caps: ChecksumCapabilities,
}

impl<'a> Socket<'a> {
    /// Create a socket using the given buffers.
    pub fn new<T>(rx_buffer: T, tx_buffer: T) -> Socket<'a>
    where
        T: Into<SocketBuffer<'a>>,
    {
        Socket {
            state: State::Closed,
            tuple: None,
            tx: SendWindow::new(tx_buffer, DEFAULT_PEER_MSS),
            rx: ReceiveWindow::new(rx_buffer, LOCAL_MSS as usize),
            rx_fin_received: false,
            rx_pending_fin: None,
            tx_fin_seq: None,
            ack_owed: false,
            reset: false,
            was_established: false,
            time_wait_since: None,
            retransmit_timeout: Duration::from_millis(RETRANSMIT_TIMEOUT_MS),
            time_wait_timeout: Duration::from_millis(TIME_WAIT_TIMEOUT_MS),
            checksum_caps: ChecksumCapabilities::default(),
        }
    }

    /// Return the retransmission timeout.
    pub fn retransmit_timeout(&self) -> Duration {
        self.retransmit_timeout
    }

    /// Set the retransmission timeout. It never adapts to the measured round trip.
    pub fn set_retransmit_timeout(&mut self, duration: Duration) {
        self.retransmit_timeout = duration
    }

    /// Return how long the socket stays in TIME-WAIT.
    pub fn time_wait_timeout(&self) -> Duration {
        self.time_wait_timeout
    }

    pub fn set_time_wait_timeout(&mut self, duration: Duration) {
        self.time_wait_timeout = duration
    }

    /// Return the maximum segment size advertised in our SYN.
    pub fn local_mss(&self) -> u16 {
        u16::try_from(self.rx.mss).unwrap_or(u16::MAX)
    }

    pub fn set_local_mss(&mut self, mss: u16) {
        self.rx.mss = mss as usize
    }

    /// Choose which checksums are computed on emission and verified by the caller on
    /// reception.
    pub fn set_checksum_caps(&mut self, caps: ChecksumCapabilities) {
        self.checksum_caps = caps
    }

    pub fn checksum_caps(&self) -> &ChecksumCapabilities {
        &self.checksum_caps
    }

    /// Return the connection state, in terms of the TCP state machine.
    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    /// Return the local endpoint, or None if not connected.
    #[inline]
    pub fn local_endpoint(&self) -> Option<IpEndpoint> {
        Some(self.tuple?.local)
    }

    /// Return the remote endpoint, or None if not connected.
    #[inline]
    pub fn remote_endpoint(&self) -> Option<IpEndpoint> {
        Some(self.tuple?.remote)
    }

    /// Return whether the socket is in any state other than CLOSED.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.state != State::Closed
    }

    /// Return whether the connection was torn down by a reset.
    #[inline]
    pub fn is_reset(&self) -> bool {
        self.reset
    }

    /// Return whether the handshake is still in progress.
    #[inline]
    pub fn is_connecting(&self) -> bool {
        matches!(self.state, State::SynSent | State::SynReceived)
    }

    /// Return whether the transmit half of the connection is open.
    #[inline]
    pub fn may_send(&self) -> bool {
        matches!(self.state, State::Established | State::CloseWait)
    }

    /// Return whether the receive half of the connection is open.
    #[inline]
    pub fn may_recv(&self) -> bool {
        matches!(
            self.state,
            State::Established | State::FinWait1 | State::FinWait2
        )
    }

    /// Return whether queued data may still go out on the wire.
    fn may_transmit(&self) -> bool {
        matches!(
            self.state,
            State::Established
                | State::FinWait1
                | State::FinWait2
                | State::CloseWait
                | State::LastAck
        )
    }

    /// Return whether the receive window holds a synchronized sequence space.
    fn is_synchronized(&self) -> bool {
        !matches!(self.state, State::Closed | State::Listen | State::SynSent)
    }

    /// Check whether the receive half has octets waiting.
    #[inline]
    pub fn can_recv(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Return the amount of octets queued in the transmit buffer.
    pub fn send_queue(&self) -> usize {
        self.tx.data_size()
    }

    /// Return the amount of octets queued in the receive buffer.
    pub fn recv_queue(&self) -> usize {
        self.rx.data_size()
    }

    /// Return the capacity of the transmit buffer.
    pub fn send_capacity(&self) -> usize {
        self.tx.capacity()
    }

    /// Return the window we advertise to the peer.
    pub fn advertised_window(&self) -> usize {
        self.rx.advertised_window()
    }

    /// Passive open is not supported.
    pub fn listen(&mut self) -> Result<(), ListenError> {
        Err(ListenError::NotSupported)
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            tcp_trace!("state={}=>{}", self.state, state);
        }

        if state == State::Established {
            self.was_established = true;
        }
        self.state = state;
    }

    /// Connect to a given endpoint, starting the sequence space at `local_seq`.
    ///
    /// Returns the SYN segment. The socket is in SYN-SENT afterwards; if the segment
    /// cannot be delivered, call [abandon](#method.abandon).
    pub fn connect(
        &mut self,
        local: IpEndpoint,
        remote: IpEndpoint,
        local_seq: TcpSeqNumber,
    ) -> Result<Vec<u8>, ConnectError> {
        match self.state {
            State::Closed => (),
            State::SynSent | State::SynReceived => return Err(ConnectError::InProgress),
            _ => return Err(ConnectError::IsConnected),
        }

        self.tuple = Some(Tuple { local, remote });
        self.tx.reset(local_seq, DEFAULT_PEER_MSS);
        self.rx.reset(TcpSeqNumber::default());
        self.rx.restore_window_scale();
        self.rx_fin_received = false;
        self.rx_pending_fin = None;
        self.tx_fin_seq = None;
        self.ack_owed = false;
        self.reset = false;
        self.was_established = false;
        self.time_wait_since = None;

        let repr = TcpRepr {
            src_port: local.port,
            dst_port: remote.port,
            control: TcpControl::Syn,
            seq_number: local_seq,
            ack_number: None,
            window_len: self.rx.window_field(true),
            window_scale: Some(self.rx.window_scale),
            max_seg_size: Some(self.local_mss()),
            payload: &[],
        };
        let segment = self.emit(&repr);
        tcp_trace!("{}: connecting, sending {}", self.tuple_display(), repr);
        self.set_state(State::SynSent);
        Ok(segment)
    }

    /// Give up on a connection attempt that never completed.
    pub fn abandon(&mut self) {
        if self.is_connecting() {
            self.set_state(State::Closed);
        }
    }

    /// Close the transmit half of the connection.
    ///
    /// In ESTABLISHED this returns the acknowledgement that leads into FIN-WAIT-1; the
    /// FIN itself follows from [dispatch](#method.dispatch). An unfinished handshake is
    /// abandoned. Closing while a FIN is already on its way does nothing.
    pub fn close(&mut self) -> Result<Option<Vec<u8>>, CloseError> {
        match self.state {
            State::Closed => Err(CloseError::NotConnected),
            State::SynSent | State::SynReceived => {
                self.set_state(State::Closed);
                Ok(None)
            }
            State::Established => {
                let segment = self.build(TcpControl::None, self.tx.current_seq, &[]);
                self.set_state(State::FinWait1);
                self.ack_owed = true;
                Ok(segment)
            }
            _ => Ok(None),
        }
    }

    /// Tear the connection down immediately.
    ///
    /// Returns the RST segment if the peer needs to be told.
    pub fn abort(&mut self) -> Option<Vec<u8>> {
        let segment = match self.state {
            State::Closed | State::SynSent | State::Listen => None,
            _ => self.build(TcpControl::Rst, self.tx.end_seq(), &[]),
        };
        if self.is_synchronized() {
            self.reset = true;
        }
        self.set_state(State::Closed);
        segment
    }

    fn send_error_check(&self) -> Result<(), SendError> {
        match self.state {
            State::Established | State::CloseWait => Ok(()),
            State::Closed | State::SynSent | State::SynReceived if !self.was_established => {
                Err(SendError::NotConnected)
            }
            _ => Err(SendError::Reset),
        }
    }

    /// Enqueue a sequence of octets to be sent.
    ///
    /// The octets are queued in full or not at all. Returns the sequence number one
    /// past the queued range, or `None` if there is not enough free space yet.
    pub fn send_slice(&mut self, data: &[u8]) -> Result<Option<TcpSeqNumber>, SendError> {
        self.send_error_check()?;
        if data.len() > self.tx.capacity() {
            return Err(SendError::MessageTooLarge);
        }

        let old_length = self.tx.data_size();
        let end = self.tx.enqueue(data);
        if end.is_some() && !data.is_empty() {
            tcp_trace!(
                "tx buffer: enqueueing {} octets (now {})",
                data.len(),
                old_length + data.len()
            );
        }
        Ok(end)
    }

    /// Return whether the peer has acknowledged every octet before `seq`.
    pub fn is_acked(&self, seq: TcpSeqNumber) -> bool {
        self.tx.is_acked(seq)
    }

    fn recv_error_check(&self) -> Result<(), RecvError> {
        if self.reset {
            return Err(RecvError::Reset);
        }
        if self.rx_fin_received {
            return Err(RecvError::Finished);
        }
        match self.state {
            State::Closed | State::SynSent | State::SynReceived if !self.was_established => {
                Err(RecvError::NotConnected)
            }
            State::Closed => Err(RecvError::Finished),
            _ => Ok(()),
        }
    }

    /// Dequeue a sequence of received octets, and fill a slice from it.
    ///
    /// Buffered octets are returned even after the connection went away. With an empty
    /// buffer this returns `Ok(0)` while more data may still arrive, and an error
    /// otherwise.
    pub fn recv_slice(&mut self, data: &mut [u8]) -> Result<usize, RecvError> {
        if self.rx.is_empty() {
            self.recv_error_check()?;
            return Ok(0);
        }

        let size = self.rx.consume(data);
        if size > 0 {
            tcp_trace!(
                "rx buffer: dequeueing {} octets (now {})",
                size,
                self.rx.data_size()
            );
        }
        Ok(size)
    }

    /// Acknowledgement number covering everything received, FIN included.
    fn rx_ack_value(&self) -> TcpSeqNumber {
        self.rx.next_seq() + usize::from(self.rx_fin_received)
    }

    /// Return whether an ACK must be transmitted.
    pub fn ack_to_transmit(&self) -> bool {
        self.is_synchronized()
            && (self.ack_owed || self.rx.ack_number != self.rx_ack_value())
    }

    /// Return whether an acknowledgement was received but not yet applied to the
    /// send window.
    pub fn ack_pending(&self) -> bool {
        self.tx.ack_pending()
    }

    /// Apply the latest acknowledgement to the send window.
    ///
    /// Returns the number of octets released.
    pub fn apply_ack(&mut self) -> usize {
        let released = self.tx.on_ack(self.tx.ack_number);
        if released > 0 {
            tcp_trace!(
                "tx buffer: dequeueing {} octets (now {})",
                released,
                self.tx.data_size()
            );
        }
        released
    }

    /// Return whether TIME-WAIT ran out at `now`, and close the socket if so.
    pub fn expire_time_wait(&mut self, now: Instant) -> bool {
        match (self.state, self.time_wait_since) {
            (State::TimeWait, Some(since)) if now >= since + self.time_wait_timeout => {
                tcp_trace!("{}: TIME-WAIT expired", self.tuple_display());
                self.apply_ack();
                self.set_state(State::Closed);
                true
            }
            _ => false,
        }
    }

    /// Return the instant at which the socket next needs attention.
    pub fn poll_at(&self) -> PollAt {
        if self.ack_to_transmit() || self.ack_pending() {
            return PollAt::Now;
        }

        if let (State::TimeWait, Some(since)) = (self.state, self.time_wait_since) {
            return PollAt::Time(since + self.time_wait_timeout);
        }

        if self.may_transmit() {
            if let Some(at) = self.tx.retransmit_at(self.retransmit_timeout) {
                return PollAt::Time(at);
            }
        }

        PollAt::Ingress
    }

    /// Return whether `repr` belongs to this connection.
    pub fn accepts(&self, repr: &TcpRepr) -> bool {
        match self.tuple {
            Some(tuple) => repr.dst_port == tuple.local.port && repr.src_port == tuple.remote.port,
            None => false,
        }
    }

    /// Process one inbound segment. Segments that do not fit the current state are
    /// dropped without a reply.
    pub fn process(&mut self, repr: &TcpRepr) {
        if !self.accepts(repr) {
            net_debug!("tcp: segment not for this connection, dropping: {}", repr);
            return;
        }

        match (self.state, repr.control) {
            (State::Closed, _) | (State::Listen, _) => {
                tcp_trace!("{}: segment in {}, dropping", self.tuple_display(), self.state);
            }

            // A reset acknowledging our SYN refuses the connection.
            (State::SynSent, TcpControl::Rst) => {
                if repr.ack_number == Some(self.tx.start_seq + 1) {
                    tcp_trace!("{}: connection refused", self.tuple_display());
                    self.reset = true;
                    self.set_state(State::Closed);
                } else {
                    net_debug!("tcp: unacceptable RST in SYN-SENT, dropping");
                }
            }

            (State::SynSent, TcpControl::Syn) => self.process_syn_ack(repr),

            (State::SynSent, _) => {
                net_debug!("tcp: expecting a SYN|ACK, dropping {}", repr);
            }

            (_, TcpControl::Rst) => {
                let next = self.rx_ack_value();
                if repr.seq_number >= next && repr.seq_number < next + self.rx.capacity().max(1)
                {
                    tcp_trace!("{}: connection reset by peer", self.tuple_display());
                    self.reset = true;
                    self.set_state(State::Closed);
                } else {
                    net_debug!("tcp: RST out of window, dropping");
                }
            }

            (_, TcpControl::Syn) => {
                // Our ACK of the peer's SYN got lost; say it again.
                if repr.seq_number + 1 == self.rx.start_seq {
                    self.ack_owed = true;
                }
            }

            (_, TcpControl::None) | (_, TcpControl::Psh) | (_, TcpControl::Fin) => {
                self.process_synchronized(repr)
            }
        }
    }

    fn process_syn_ack(&mut self, repr: &TcpRepr) {
        let Some(ack_number) = repr.ack_number else {
            net_debug!("tcp: simultaneous open is not supported, dropping SYN");
            return;
        };
        if ack_number != self.tx.start_seq + 1 {
            net_debug!(
                "tcp: SYN|ACK acknowledges {} instead of {}, dropping",
                ack_number,
                self.tx.start_seq + 1
            );
            return;
        }

        let mss = repr
            .max_seg_size
            .map(usize::from)
            .filter(|&mss| mss > 0)
            .unwrap_or(DEFAULT_PEER_MSS);
        self.tx.reset(ack_number, mss);
        self.tx.window_scale = repr.window_scale.unwrap_or(0);
        self.tx.set_peer_window(repr.window_len, false);
        // Both sides must agree to scale, or neither does.
        if repr.window_scale.is_none() {
            self.rx.window_scale = 0;
        }
        self.rx.reset(repr.seq_number + 1);
        self.ack_owed = true;
        tcp_trace!(
            "{}: handshake answered, peer mss={} ws={:?}",
            self.tuple_display(),
            mss,
            repr.window_scale
        );
        self.set_state(State::SynReceived);
    }

    fn process_synchronized(&mut self, repr: &TcpRepr) {
        if let Some(ack_number) = repr.ack_number {
            self.tx.set_peer_window(repr.window_len, true);
            self.process_ack(ack_number);

            if self.state == State::LastAck
                && self.tx_fin_seq.map(|seq| seq + 1) == Some(ack_number)
            {
                tcp_trace!("{}: FIN acknowledged", self.tuple_display());
                // The same ACK covers every octet before the FIN.
                self.apply_ack();
                self.set_state(State::Closed);
                return;
            }
        }

        if !repr.payload.is_empty() {
            if self.may_recv() {
                let accepted = self.rx.on_payload(repr.seq_number, repr.payload);
                if accepted == 0 {
                    net_debug!(
                        "tcp: payload at seq {} out of order (expecting {}), dropping",
                        repr.seq_number,
                        self.rx.next_seq()
                    );
                } else {
                    tcp_trace!(
                        "rx buffer: enqueueing {} octets (now {})",
                        accepted,
                        self.rx.data_size()
                    );
                }
            } else {
                net_debug!("tcp: payload in {}, dropping", self.state);
            }
        }

        if repr.control == TcpControl::Fin {
            self.process_fin(repr.seq_number + repr.payload.len());
        }

        if let Some(fin_seq) = self.rx_pending_fin {
            if fin_seq == self.rx.next_seq() {
                tcp_trace!("{}: gap before FIN filled", self.tuple_display());
                self.process_fin(fin_seq);
            }
        }
    }

    fn process_ack(&mut self, ack_number: TcpSeqNumber) {
        let mut data_ack = ack_number;
        if let Some(fin_seq) = self.tx_fin_seq {
            if ack_number == fin_seq + 1 {
                data_ack = fin_seq;
            }
        }

        if data_ack > self.tx.current_seq {
            net_debug!(
                "tcp: ACK {} for data not yet sent (next {}), ignoring",
                ack_number,
                self.tx.current_seq
            );
            return;
        }
        if data_ack > self.tx.ack_number {
            self.tx.ack_number = data_ack;
        }
    }

    fn process_fin(&mut self, fin_seq: TcpSeqNumber) {
        match self.state {
            State::Established | State::CloseWait | State::FinWait2 | State::TimeWait => (),
            _ => {
                net_debug!("tcp: FIN in {}, ignoring", self.state);
                return;
            }
        }

        let next = self.rx.next_seq();
        if fin_seq == next {
            self.rx_pending_fin = None;
            self.ack_owed = true;
            if !self.rx_fin_received {
                tcp_trace!("{}: FIN received", self.tuple_display());
                self.rx_fin_received = true;
                if self.state == State::Established {
                    self.set_state(State::CloseWait);
                }
            }
        } else if fin_seq > next && !self.rx_fin_received {
            tcp_trace!(
                "{}: FIN at {} ahead of {}, waiting for the gap",
                self.tuple_display(),
                fin_seq,
                next
            );
            self.rx_pending_fin = Some(fin_seq);
        }
    }

    /// Build the segment the current state owes the peer, if any, and advance the
    /// state accordingly.
    ///
    /// | state        | segment                | next state  |
    /// |--------------|------------------------|-------------|
    /// | SYN-RECEIVED | ACK                    | ESTABLISHED |
    /// | ESTABLISHED  | ACK                    |             |
    /// | FIN-WAIT-1   | FIN, ACK               | FIN-WAIT-2  |
    /// | FIN-WAIT-2   | ACK                    | TIME-WAIT once the peer's FIN arrived |
    /// | CLOSE-WAIT   | FIN, ACK               | LAST-ACK    |
    /// | LAST-ACK     | ACK                    |             |
    /// | TIME-WAIT    | ACK                    |             |
    pub fn dispatch(&mut self, now: Instant) -> Option<Vec<u8>> {
        if !self.ack_to_transmit() {
            return None;
        }

        let (control, seq_number, next_state) = match self.state {
            State::Closed | State::SynSent => return None,
            State::Listen | State::Closing => unreachable!(),
            State::SynReceived => (TcpControl::None, self.tx.current_seq, State::Established),
            State::Established => (TcpControl::None, self.tx.current_seq, State::Established),
            State::FinWait1 | State::CloseWait => {
                let fin_seq = self.tx.end_seq();
                self.tx_fin_seq = Some(fin_seq);
                let next_state = if self.state == State::FinWait1 {
                    State::FinWait2
                } else {
                    State::LastAck
                };
                (TcpControl::Fin, fin_seq, next_state)
            }
            State::FinWait2 | State::LastAck | State::TimeWait => {
                let seq_number = self.tx_fin_seq.map_or(self.tx.end_seq(), |seq| seq + 1);
                let next_state = if self.state == State::FinWait2 && self.rx_fin_received {
                    State::TimeWait
                } else {
                    self.state
                };
                (TcpControl::None, seq_number, next_state)
            }
        };

        let segment = self.build(control, seq_number, &[]);
        if next_state == State::TimeWait && self.state != State::TimeWait {
            self.time_wait_since = Some(now);
        }
        self.set_state(next_state);
        segment
    }

    /// Transmit unacknowledged data again if the retransmission timer ran out.
    ///
    /// Sends at most the peer window's worth, in segments of at most the peer's MSS,
    /// always starting from the oldest unacknowledged octet.
    pub fn retransmit(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut segments = Vec::new();
        if !self.may_transmit() || !self.tx.retransmit_due(now, self.retransmit_timeout) {
            return segments;
        }

        let sendable = self.tx.sendable();
        let mut offset = 0;
        while offset < sendable {
            let chunk = self.tx.chunk(offset);
            if chunk.is_empty() {
                break;
            }
            let seq_number = self.tx.start_seq + offset;
            if let Some(segment) = self.build(TcpControl::None, seq_number, &chunk) {
                segments.push(segment);
            }
            offset += chunk.len();
        }

        if offset == 0 {
            tcp_trace!("{}: peer window closed, waiting", self.tuple_display());
        } else {
            tcp_trace!(
                "{}: transmitting {} octets from {} in {} segments",
                self.tuple_display(),
                offset,
                self.tx.start_seq,
                segments.len()
            );
        }
        self.tx.on_transmit(now, self.tx.start_seq + offset);
        segments
    }

    /// Build an ACK-bearing segment and note the acknowledgement as sent.
    fn build(&mut self, control: TcpControl, seq_number: TcpSeqNumber, payload: &[u8]) -> Option<Vec<u8>> {
        let tuple = self.tuple?;
        let ack_number = self.rx_ack_value();
        let repr = TcpRepr {
            src_port: tuple.local.port,
            dst_port: tuple.remote.port,
            control,
            seq_number,
            ack_number: Some(ack_number),
            window_len: self.rx.window_field(false),
            window_scale: None,
            max_seg_size: None,
            payload,
        };
        tcp_trace!("{}: sending {}", tuple, repr);
        self.rx.ack_number = ack_number;
        self.ack_owed = false;
        Some(self.emit(&repr))
    }

    fn emit(&self, repr: &TcpRepr) -> Vec<u8> {
        let mut buffer = vec![0; repr.buffer_len()];
        if let Some(tuple) = self.tuple {
            repr.emit(
                &mut TcpPacket::new_unchecked(&mut buffer),
                &tuple.local.addr,
                &tuple.remote.addr,
                &self.checksum_caps,
            );
        }
        buffer
    }

    fn tuple_display(&self) -> TupleDisplay {
        TupleDisplay(self.tuple)
    }
}

struct TupleDisplay(Option<Tuple>);

impl Display for TupleDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(tuple) => write!(f, "{tuple}"),
            None => write!(f, "unbound"),
        }
    }
}
