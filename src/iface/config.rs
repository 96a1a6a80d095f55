use crate::config::{
    CONNECT_TIMEOUT_MS, DRIVER_POLL_INTERVAL_MS, LOCAL_MSS, RETRANSMIT_TIMEOUT_MS,
    SOCKET_BUFFER_SIZE, TIME_WAIT_TIMEOUT_MS,
};
use crate::phy::ChecksumCapabilities;
use crate::time::Duration;

/// Connection configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Fixed retransmission timeout.
    ///
    /// Defaults to 100 ms.
    pub retransmit_timeout: Duration,
    /// How long `connect` waits for the handshake before failing with `ECONNREFUSED`.
    ///
    /// Defaults to 5 s.
    pub connect_timeout: Duration,
    /// How long a connection lingers in TIME-WAIT.
    ///
    /// Defaults to 6 s.
    pub time_wait_timeout: Duration,
    /// Upper bound on a single sleep of the driver or of a blocked caller. Deadlines
    /// are measured on the injected clock, so this is also how often a waiter looks
    /// at that clock.
    pub poll_interval: Duration,
    /// MSS advertised in our SYN.
    pub local_mss: u16,
    pub rx_buffer_size: usize,
    pub tx_buffer_size: usize,
    pub checksum: ChecksumCapabilities,
}

impl Config {
    pub fn new() -> Self {
        Config {
            retransmit_timeout: Duration::from_millis(RETRANSMIT_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(CONNECT_TIMEOUT_MS),
            time_wait_timeout: Duration::from_millis(TIME_WAIT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DRIVER_POLL_INTERVAL_MS),
            local_mss: LOCAL_MSS,
            rx_buffer_size: SOCKET_BUFFER_SIZE,
            tx_buffer_size: SOCKET_BUFFER_SIZE,
            checksum: ChecksumCapabilities::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}
