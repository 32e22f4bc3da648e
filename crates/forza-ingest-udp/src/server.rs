use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use forza_ingest_core::{
    IngestError, Subscription, SubscriptionRegistry, TelemetryDecoder, TelemetryListener, TelemetrySample,
};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{ForzaConfig, ForzaDecoder};

/// Why a receive loop run ended.
#[derive(Debug)]
pub enum StopReason {
    /// A shutdown was requested through [`ShutdownHandle::shutdown`] or
    /// [`UdpTelemetryListener::shutdown`], or the listener was dropped.
    Shutdown,
    /// The socket failed while waiting for a datagram.
    TransportFailure(IngestError),
    /// The loop task itself died.
    Aborted,
}

/// Cloneable trigger that ends the current receive loop run.
///
/// A request made while nothing is running stays pending and ends the next
/// run as soon as it starts.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Where the receive loop reads datagrams from.
#[async_trait::async_trait]
pub(crate) trait DatagramSource: Send + Sync {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

#[async_trait::async_trait]
impl DatagramSource for UdpSocket {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.recv_from(buf).await
    }
}

/// Owns the UDP socket and the listener registry.
///
/// One run of the receive loop is active at a time. The loop decodes and
/// notifies inline, so listeners see samples in arrival order. When a run ends,
/// for whatever reason, the socket is closed and every listener gets
/// `on_completed` once. Dropping the listener requests shutdown of the
/// current run, whether or not [`ShutdownHandle`] clones are still alive.
pub struct UdpTelemetryListener<D = ForzaDecoder> {
    cfg: ForzaConfig,
    decoder: Arc<D>,
    registry: SubscriptionRegistry,
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    shutdown: ShutdownHandle,
    run: Option<JoinHandle<StopReason>>,
}

impl UdpTelemetryListener<ForzaDecoder> {
    pub async fn bind_forza(cfg: ForzaConfig) -> Result<Self, IngestError> {
        Self::bind(cfg, ForzaDecoder).await
    }
}

impl<D> UdpTelemetryListener<D>
where
    D: TelemetryDecoder + 'static,
{
    /// Binds the configured port. Failing here is fatal for the caller; nothing
    /// has been started yet.
    pub async fn bind(cfg: ForzaConfig, decoder: D) -> Result<Self, IngestError> {
        cfg.validate()?;
        let socket = bind_socket(cfg.bind_addr()).await?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| IngestError::transport("query local address", e))?;
        info!(%local_addr, "bound forza telemetry socket");
        let (tx, _rx) = watch::channel(false);
        Ok(Self {
            cfg,
            decoder: Arc::new(decoder),
            registry: SubscriptionRegistry::new(),
            socket: Some(socket),
            local_addr,
            shutdown: ShutdownHandle { tx: Arc::new(tx) },
            run: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn subscribe(&self, listener: Arc<dyn TelemetryListener>) -> Subscription {
        self.registry.subscribe(listener)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.is_finished())
    }

    /// Starts a receive loop run.
    ///
    /// If a run is still active this waits for it to end first; it does not
    /// stop it. After a run has ended the socket is closed, so the same
    /// address is bound again. Subscriptions carry over: listeners that got
    /// `on_completed` for the previous run receive this run's samples too.
    /// A shutdown requested before this call ends the new run immediately.
    pub async fn start(&mut self) -> Result<(), IngestError> {
        if self.run.is_some() {
            debug!("waiting for previous receive loop to exit");
            self.join().await;
        }

        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => bind_socket(self.local_addr).await?,
        };

        let shutdown = self.shutdown.tx.subscribe();
        let decoder = Arc::clone(&self.decoder);
        let registry = self.registry.clone();
        let buf_size = self.cfg.recv_buffer_size;

        info!(local_addr = %self.local_addr, "starting forza receive loop");
        self.run = Some(tokio::spawn(receive_loop(socket, decoder, registry, shutdown, buf_size)));
        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// Waits for the current run to end. `None` if nothing was started.
    pub async fn join(&mut self) -> Option<StopReason> {
        let run = self.run.take()?;
        let reason = match run.await {
            Ok(reason) => reason,
            Err(e) => {
                error!(error = %e, "receive loop task failed");
                StopReason::Aborted
            }
        };
        if matches!(reason, StopReason::Shutdown) {
            // the request was consumed by this run
            self.shutdown.tx.send_replace(false);
        }
        Some(reason)
    }
}

impl<D> Drop for UdpTelemetryListener<D> {
    fn drop(&mut self) {
        self.shutdown.shutdown();
    }
}

async fn bind_socket(addr: SocketAddr) -> Result<UdpSocket, IngestError> {
    UdpSocket::bind(addr)
        .await
        .map_err(|e| IngestError::transport(format!("bind {addr}"), e))
}

/// Windows fails the receive with WSAEMSGSIZE when a datagram is longer than
/// the buffer, where other platforms truncate it.
fn is_oversized(e: &io::Error) -> bool {
    #[cfg(windows)]
    {
        const WSAEMSGSIZE: i32 = 10040;
        e.raw_os_error() == Some(WSAEMSGSIZE)
    }
    #[cfg(not(windows))]
    {
        let _ = e;
        false
    }
}

async fn receive_loop<S, D>(
    source: S,
    decoder: Arc<D>,
    registry: SubscriptionRegistry,
    mut shutdown: watch::Receiver<bool>,
    buf_size: usize,
) -> StopReason
where
    S: DatagramSource,
    D: TelemetryDecoder + ?Sized,
{
    let mut buf = vec![0u8; buf_size];
    let pending = *shutdown.borrow_and_update();
    let reason = if pending {
        debug!("shutdown already requested");
        StopReason::Shutdown
    } else {
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // a dropped sender means the owning listener is gone
                    if changed.is_err() || *shutdown.borrow() {
                        break StopReason::Shutdown;
                    }
                }
                received = source.recv_datagram(&mut buf) => match received {
                    Ok((0, _)) => continue,
                    Ok((len, peer)) => {
                        match decoder.convert(&buf[..len]) {
                            Ok(sample) => {
                                registry.notify_next(&sample);
                            }
                            Err(e) => {
                                warn!(%peer, len, error = %e, "dropping datagram that failed to decode");
                                registry.notify_error(&IngestError::Decode(e));
                            }
                        }
                    }
                    Err(e) if is_oversized(&e) => {
                        debug!(error = %e, buf_size, "datagram larger than receive buffer");
                        registry.notify_next(&TelemetrySample::unknown());
                    }
                    Err(e) => {
                        error!(error = %e, "forza telemetry socket failed");
                        let err = IngestError::transport("receive datagram", e);
                        registry.notify_error(&err);
                        break StopReason::TransportFailure(err);
                    }
                }
            }
        }
    };

    drop(source);
    registry.notify_completed();
    info!(?reason, "forza receive loop stopped");
    reason
}
