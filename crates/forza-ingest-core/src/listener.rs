use serde::{Deserialize, Serialize};

use crate::{IngestError, ListenerError, TelemetrySample};

/// Observer of decoded telemetry.
///
/// Callbacks run on the receive loop's task, in arrival order. They should
/// return quickly; the next datagram is not read until every listener has
/// seen the current one. Returning an error (or panicking) only affects the
/// listener that failed.
pub trait TelemetryListener: Send + Sync {
    fn on_next(&self, sample: &TelemetrySample) -> Result<(), ListenerError>;

    /// The current receive run has ended and no further samples will arrive
    /// from it. A subscription outlives the run, so if the owner restarts the
    /// listener the next run delivers to it again.
    fn on_completed(&self) -> Result<(), ListenerError> {
        Ok(())
    }

    fn on_error(&self, _error: &IngestError) {}

    /// Label used in log output.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// What a [`ChannelListener`] forwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    Sample(TelemetrySample),
    Error(String),
    Completed,
}

pub type TelemetryTx = crossbeam_channel::Sender<TelemetryEvent>;
pub type TelemetryRx = crossbeam_channel::Receiver<TelemetryEvent>;

pub fn channel() -> (TelemetryTx, TelemetryRx) {
    crossbeam_channel::unbounded()
}

/// Forwards every callback into a channel so samples can be pulled from a
/// plain thread.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: TelemetryTx,
}

impl ChannelListener {
    pub fn new(tx: TelemetryTx) -> Self {
        Self { tx }
    }

    /// Listener plus the receiving end of a fresh unbounded channel.
    pub fn pair() -> (Self, TelemetryRx) {
        let (tx, rx) = channel();
        (Self::new(tx), rx)
    }

    fn forward(&self, event: TelemetryEvent) -> Result<(), ListenerError> {
        self.tx
            .send(event)
            .map_err(|_| ListenerError::Failed("telemetry receiver dropped".into()))
    }
}

impl TelemetryListener for ChannelListener {
    fn on_next(&self, sample: &TelemetrySample) -> Result<(), ListenerError> {
        self.forward(TelemetryEvent::Sample(*sample))
    }

    fn on_completed(&self) -> Result<(), ListenerError> {
        self.forward(TelemetryEvent::Completed)
    }

    fn on_error(&self, error: &IngestError) {
        // a dropped receiver already shows up as an on_next failure
        let _ = self.forward(TelemetryEvent::Error(error.to_string()));
    }

    fn name(&self) -> &str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DecodeError;

    #[test]
    fn channel_listener_forwards_in_order() {
        let (listener, rx) = ChannelListener::pair();
        let sample = TelemetrySample::unknown();
        listener.on_next(&sample).unwrap();
        listener.on_error(&IngestError::Decode(DecodeError::TruncatedInput {
            field: "fuel",
            offset: 276,
            needed: 4,
            remaining: 2,
        }));
        listener.on_completed().unwrap();

        assert_eq!(rx.try_recv().unwrap(), TelemetryEvent::Sample(sample));
        assert!(matches!(rx.try_recv().unwrap(), TelemetryEvent::Error(msg) if msg.contains("fuel")));
        assert_eq!(rx.try_recv().unwrap(), TelemetryEvent::Completed);
    }

    #[test]
    fn channel_listener_fails_once_receiver_dropped() {
        let (listener, rx) = ChannelListener::pair();
        drop(rx);
        let err = listener.on_next(&TelemetrySample::unknown()).unwrap_err();
        assert!(matches!(err, ListenerError::Failed(_)));
    }
}
