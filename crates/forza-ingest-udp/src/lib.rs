//! Forza "Data Out" UDP ingest: datagram decoding plus the receive loop that
//! fans decoded samples out to subscribed listeners.

pub mod codec;
pub mod protocol;
mod server;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use model::{HORIZON_CAR_DASH_SIZE, SLED_SIZE};

pub use forza_ingest_core::*;
pub use protocol::{convert, detect, encode_datagram, ForzaDecoder};
pub use server::{ShutdownHandle, StopReason, UdpTelemetryListener};

/// Holds any UDP payload, so the OS never shortens or rejects a datagram.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Smallest usable receive buffer: one byte past the longest known layout, so
/// an oversized datagram cannot be cut down to a length the detector accepts.
pub const MIN_RECV_BUFFER_SIZE: usize = SLED_SIZE + HORIZON_CAR_DASH_SIZE + 1;

#[derive(Clone, Debug)]
pub struct ForzaConfig {
    /// UDP port the game's "Data Out" is pointed at. No default; callers pick.
    pub listen_port: u16,
    pub bind_ip: IpAddr,
    pub recv_buffer_size: usize,
}

impl ForzaConfig {
    pub fn new(listen_port: u16) -> Self {
        Self {
            listen_port,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }

    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.listen_port)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.recv_buffer_size < MIN_RECV_BUFFER_SIZE {
            return Err(IngestError::Config(format!(
                "recv_buffer_size {} must be at least {MIN_RECV_BUFFER_SIZE}",
                self.recv_buffer_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_binds_all_interfaces_by_default() {
        let cfg = ForzaConfig::new(1337);
        assert_eq!(cfg.bind_addr().to_string(), "0.0.0.0:1337");
        assert_eq!(cfg.recv_buffer_size, DEFAULT_RECV_BUFFER_SIZE);
    }

    #[test]
    fn config_builders() {
        let cfg = ForzaConfig::new(5300)
            .with_bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_recv_buffer_size(512);
        assert_eq!(cfg.bind_addr().to_string(), "127.0.0.1:5300");
        assert_eq!(cfg.recv_buffer_size, 512);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn buffer_must_exceed_longest_layout() {
        let longest = ProtocolVariant::HorizonCarDash.expected_len().unwrap();
        assert_eq!(MIN_RECV_BUFFER_SIZE, longest + 1);

        for size in [0, SLED_SIZE, longest] {
            let cfg = ForzaConfig::new(5300).with_recv_buffer_size(size);
            assert!(matches!(cfg.validate(), Err(IngestError::Config(_))), "size {size} accepted");
        }
        assert!(ForzaConfig::new(5300).with_recv_buffer_size(longest + 1).validate().is_ok());
    }

    #[test]
    fn default_buffer_holds_any_udp_payload() {
        // 65_535 minus the 8-byte UDP and 20-byte IPv4 headers
        assert!(DEFAULT_RECV_BUFFER_SIZE >= 65_507);
        assert!(ForzaConfig::new(5300).validate().is_ok());
    }
}
