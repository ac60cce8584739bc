use anyhow::{Context, Result, bail};
use clap::Parser;
use pulselink_core::{Identifier, PulseEvent, UniqueId};
use pulselink_hardware::mock::MockSerialOpener;
use pulselink_hardware::{PulseClient, list_ports};
use pulselink_protocol::PulseFrame;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often the monitor checks the connection health flag.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Port name reported by the simulated device.
const SIMULATED_PORT: &str = "SIM0";

#[derive(Parser, Debug)]
#[command(
    name = "pulselink",
    version,
    about = "Monitor pulse counts from coin and bill acceptors"
)]
struct Args {
    /// Serial port to monitor (e.g. COM3 or /dev/ttyUSB0)
    #[arg(short, long, conflicts_with_all = ["list", "simulate"])]
    port: Option<String>,

    /// List available serial ports and exit
    #[arg(short, long)]
    list: bool,

    /// Run against a simulated device that sends N frames
    #[arg(long, value_name = "N", conflicts_with = "list")]
    simulate: Option<u16>,

    /// Delay between simulated frames
    #[arg(long, default_value_t = 500, value_name = "MS")]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.list {
        return print_ports();
    }

    if let Some(frames) = args.simulate {
        return simulate(frames, Duration::from_millis(args.interval_ms)).await;
    }

    match args.port {
        Some(port) => monitor(&port).await,
        None => bail!("no port given; use --port <NAME>, --list or --simulate <N>"),
    }
}

fn print_ports() -> Result<()> {
    let ports = list_ports().context("failed to enumerate serial ports")?;

    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }

    println!("Available serial ports:");
    for port in ports {
        println!("  {port}");
    }
    Ok(())
}

fn log_pulse(event: &PulseEvent) {
    info!(
        identifier = %event.identifier(),
        pulses = event.pulse_count(),
        unique_id = %event.unique_id(),
        format = ?event.format(),
        "Pulse received"
    );
}

async fn monitor(port: &str) -> Result<()> {
    let client = PulseClient::serial();
    client.on_pulse_count_received(log_pulse);

    let cancel = CancellationToken::new();
    client
        .start(port, &cancel)
        .await
        .with_context(|| format!("failed to start on {port}"))?;
    info!(port, "Monitoring; press Ctrl-C to exit");

    let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    health.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = health.tick() => {
                if client.has_connection_error() || !client.is_running() {
                    warn!(port, "Connection unhealthy, restarting");
                    if let Err(e) = client.start(port, &cancel).await {
                        error!(port, error = %e, "Restart failed");
                    }
                }
            }
        }
    }

    shutdown(&client).await
}

async fn simulate(frames: u16, interval: Duration) -> Result<()> {
    let (opener, device) = MockSerialOpener::new();
    let client = PulseClient::new(opener);

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_pulse_count_received(move |event| {
        log_pulse(event);
        let _ = tx.send(event.pulse_count());
    });

    let cancel = CancellationToken::new();
    client.start(SIMULATED_PORT, &cancel).await?;
    info!(frames, ?interval, "Simulating device");

    let feeder = tokio::spawn(async move {
        for n in 1..=frames {
            let identifier = if n % 2 == 0 {
                Identifier::BillAcceptor
            } else {
                Identifier::CardAccepter
            };
            let mut uid = [0xA5; 10];
            uid[8..].copy_from_slice(&n.to_be_bytes());

            device.push_bytes(&PulseFrame::current(identifier, n, UniqueId::new(uid)).to_bytes());
            tokio::time::sleep(interval).await;
        }
    });

    let mut received = 0u16;
    while received < frames {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Some(_) => received += 1,
                None => break,
            },
        }
    }

    feeder.abort();
    info!(received, expected = frames, "Simulation finished");
    shutdown(&client).await
}

async fn shutdown(client: &PulseClient) -> Result<()> {
    let result = client.stop(&CancellationToken::new()).await;
    client.dispose();

    info!(stats = ?client.stats(), "Client stopped");
    result.context("failed to stop cleanly")
}
