//! Core telemetry contracts shared by the Forza ingest crates: listener
//! callbacks, the subscription registry and the error kinds.

mod listener;
mod registry;

pub use listener::{channel, ChannelListener, TelemetryEvent, TelemetryListener, TelemetryRx, TelemetryTx};
pub use model::{CarDashData, ProtocolVariant, SledData, TelemetrySample};
pub use registry::{Subscription, SubscriptionRegistry};

/// Decoding a datagram whose length was recognised ran past its end.
///
/// Only reachable if the detector and the record layouts disagree on sizes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated input reading {field} at offset {offset}: need {needed} bytes, {remaining} left")]
    TruncatedInput {
        field: &'static str,
        offset: usize,
        needed: usize,
        remaining: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenerError {
    #[error("{0}")]
    Failed(String),
    #[error("listener panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("invalid config: {0}")]
    Config(String),
}

impl IngestError {
    pub fn transport(context: impl Into<String>, source: std::io::Error) -> Self {
        IngestError::Transport { context: context.into(), source }
    }
}

/// Turns one datagram into a sample. Unknown lengths are a normal outcome
/// (`ProtocolVariant::Unknown`), not an error.
pub trait TelemetryDecoder: Send + Sync {
    fn convert(&self, datagram: &[u8]) -> Result<TelemetrySample, DecodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_input_message_names_field() {
        let e = DecodeError::TruncatedInput { field: "gear", offset: 307, needed: 1, remaining: 0 };
        let msg = e.to_string();
        assert!(msg.contains("gear"));
        assert!(msg.contains("307"));
    }

    #[test]
    fn transport_error_keeps_source() {
        use std::error::Error as _;
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let e = IngestError::transport("bind 0.0.0.0:1337", io);
        assert!(e.to_string().starts_with("bind 0.0.0.0:1337"));
        assert!(e.source().is_some());
    }
}
