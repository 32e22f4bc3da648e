use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use forza_ingest_udp::{
    encode_datagram, CarDashData, ForzaConfig, ProtocolVariant, SledData, StopReason, TelemetrySample,
    UdpTelemetryListener,
};
use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::printer::{ConsoleListener, OutputFormat, ShiftLight};

#[derive(Debug, Args)]
pub struct ListenArgs {
    /// UDP port the game sends "Data Out" to
    #[arg(short, long, default_value_t = 1337)]
    pub port: u16,

    /// Local address to bind
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Print one JSON object per sample instead of a summary line
    #[arg(long)]
    pub json: bool,

    /// Fraction of max rpm at which SHIFT is shown
    #[arg(long, default_value_t = 0.8)]
    pub shift_threshold: f32,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum VariantArg {
    Sled,
    CarDash,
    Horizon,
}

impl From<VariantArg> for ProtocolVariant {
    fn from(v: VariantArg) -> Self {
        match v {
            VariantArg::Sled => ProtocolVariant::Sled,
            VariantArg::CarDash => ProtocolVariant::CarDash,
            VariantArg::Horizon => ProtocolVariant::HorizonCarDash,
        }
    }
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Where to send, e.g. 127.0.0.1:1337
    #[arg(short, long)]
    pub target: SocketAddr,

    #[arg(long, value_enum, default_value_t = VariantArg::CarDash)]
    pub variant: VariantArg,

    #[arg(long, default_value_t = 10)]
    pub count: u32,

    #[arg(long, default_value_t = 16)]
    pub interval_ms: u64,

    #[arg(long, default_value_t = 6500.0)]
    pub rpm: f32,

    #[arg(long, default_value_t = 7000.0)]
    pub max_rpm: f32,

    #[arg(long, default_value_t = 3)]
    pub gear: u8,
}

pub async fn listen(args: ListenArgs) -> Result<()> {
    let cfg = ForzaConfig::new(args.port).with_bind_ip(args.bind);
    let mut server = UdpTelemetryListener::bind_forza(cfg)
        .await
        .with_context(|| format!("could not listen on UDP port {}", args.port))?;

    let format = if args.json { OutputFormat::Json } else { OutputFormat::Summary };
    let printer = ConsoleListener::stdout(format, ShiftLight::new(args.shift_threshold));
    let _subscription = server.subscribe(Arc::new(printer));

    println!("Listening on UDP Port: {}", server.local_addr().port());
    server.start().await?;

    let stop = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            stop.shutdown();
        }
    });

    match server.join().await {
        Some(StopReason::TransportFailure(e)) => Err(e).context("telemetry socket failed"),
        Some(StopReason::Aborted) => anyhow::bail!("receive loop aborted"),
        Some(StopReason::Shutdown) | None => Ok(()),
    }
}

fn synthetic_sample(args: &SendArgs, timestamp_ms: u32) -> TelemetrySample {
    let protocol = ProtocolVariant::from(args.variant);
    let sled = SledData {
        is_race_on: 1,
        timestamp_ms,
        engine_max_rpm: args.max_rpm,
        engine_idle_rpm: 800.0,
        current_engine_rpm: args.rpm,
        ..Default::default()
    };
    let car_dash = protocol.has_car_dash().then(|| CarDashData {
        gear: args.gear,
        current_race_time: timestamp_ms as f32 / 1000.0,
        ..Default::default()
    });
    TelemetrySample::decoded(protocol, sled, car_dash)
}

pub async fn send(args: SendArgs) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await.context("bind sender socket")?;
    let interval = Duration::from_millis(args.interval_ms);
    for i in 0..args.count {
        let timestamp_ms = i.wrapping_mul(args.interval_ms as u32);
        let sample = synthetic_sample(&args, timestamp_ms);
        let bytes = encode_datagram(&sample, 0).context("variant has no wire layout")?;
        if let Err(e) = socket.send_to(&bytes, args.target).await {
            warn!(target = %args.target, error = %e, "send failed");
            return Err(e).context("send datagram");
        }
        tokio::time::sleep(interval).await;
    }
    info!(count = args.count, target = %args.target, "sent synthetic telemetry");
    Ok(())
}
