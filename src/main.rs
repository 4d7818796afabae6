mod error;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::{signal, time::sleep};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use error::Error;
use msp_lib::{Decoder, Frame, LinkClient, LinkConfig, Request};

/// Talk to a flight controller over the MultiWii serial protocol.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long, global = true)]
    log_file: Option<PathBuf>,
    /// JSON file with link settings (timeouts, buffer sizes).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode frames from a hex string or a raw capture file.
    Decode {
        /// Hex-encoded bytes, e.g. 244d3e030100012c2f
        #[arg(long, conflicts_with = "file")]
        hex: Option<String>,
        /// Binary capture of the serial stream.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Send a request and print the response.
    Request {
        /// Address of the device, e.g. a simulator's MSP port.
        #[arg(short, long, default_value = "127.0.0.1:5761")]
        addr: String,
        /// Command code (v2 framing is used above 254).
        #[arg(long)]
        code: u16,
        /// Hex-encoded payload.
        #[arg(long, default_value = "")]
        payload: String,
        /// Number of times to send the request.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        /// Delay between repeated requests in milliseconds.
        #[arg(short, long, default_value_t = 100)]
        interval_ms: u64,
        /// Give up on a response after this many milliseconds.
        #[arg(long, default_value_t = 5000)]
        wait_ms: u64,
    },
    /// Print every frame the device sends.
    Monitor {
        #[arg(short, long, default_value = "127.0.0.1:5761")]
        addr: String,
    },
}

fn setup_logging(
    log_file_path: Option<PathBuf>,
    verbosity: &Verbosity<InfoLevel>,
) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path)
            .with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // console and file share one filter: -v/-q by default, RUST_LOG overrides
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

fn load_config(path: Option<&Path>) -> Result<LinkConfig> {
    let Some(path) = path else {
        return Ok(LinkConfig::default());
    };
    let file = File::open(path).with_context(|| format!("Failed to open config file {:?}", path))?;
    let config = serde_json::from_reader(file).map_err(Error::from)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;
    let config = load_config(cli.config.as_deref())?;

    tokio::select! {
        res = run(cli.command, config) => {
            if let Err(e) = res {
                error!("Application failed: {:?}", e);
                process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down.");
        }
    }
    Ok(())
}

async fn run(command: Command, config: LinkConfig) -> Result<()> {
    match command {
        Command::Decode { hex, file } => decode(hex, file),
        Command::Request {
            addr,
            code,
            payload,
            count,
            interval_ms,
            wait_ms,
        } => {
            let payload = Bytes::from(hex::decode(payload).map_err(Error::from)?);
            let (client, task) = connect(&addr, config).await?;
            for i in 0..count {
                let request = Request::new(code).with_payload(payload.clone());
                match request_once(&client, request, Duration::from_millis(wait_ms)).await {
                    Ok(frame_payload) => {
                        println!("[{}] code {} -> {}", i + 1, code, hex::encode(&frame_payload));
                    }
                    Err(e) => warn!("[{}] {}", i + 1, e),
                }
                if i + 1 < count {
                    sleep(Duration::from_millis(interval_ms)).await;
                }
            }
            let stats = client.stats().await?;
            info!(
                timeout_ms = stats.timeout.as_millis() as u64,
                checksum_failures = stats.checksum_failures,
                retransmissions = stats.retransmissions,
                "link statistics"
            );
            client.shutdown().await;
            task.await.context("Link task panicked")??;
            Ok(())
        }
        Command::Monitor { addr } => {
            let (client, task) = connect(&addr, config).await?;
            let (_, mut frames) = client.subscribe().await?;
            while let Some(frame) = frames.recv().await {
                print_frame(&frame);
            }
            task.await.context("Link task panicked")??;
            Ok(())
        }
    }
}

async fn connect(
    addr: &str,
    config: LinkConfig,
) -> Result<(LinkClient, tokio::task::JoinHandle<Result<(), msp_lib::LinkError>>)> {
    info!(%addr, "Connecting...");
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    stream.set_nodelay(true)?;
    info!("Connected.");
    Ok(LinkClient::spawn(stream, config))
}

async fn request_once(client: &LinkClient, request: Request, wait: Duration) -> Result<Bytes, Error> {
    let code = request.code;
    let response = tokio::time::timeout(wait, client.request_with(request))
        .await
        .map_err(|_| Error::Timeout { code })??;
    if response.unsupported {
        return Err(Error::Unsupported { code });
    }
    Ok(response.payload)
}

fn decode(hex: Option<String>, file: Option<PathBuf>) -> Result<()> {
    let data = match (hex, file) {
        (Some(hex), _) => hex::decode(hex.trim()).map_err(Error::from)?,
        (None, Some(path)) => std::fs::read(&path).with_context(|| format!("Failed to read {:?}", path))?,
        (None, None) => anyhow::bail!("Either --hex or --file is required"),
    };

    let frames = Decoder::new().feed_all(&data);
    if frames.is_empty() {
        warn!(len = data.len(), "No complete frames found");
    }
    for frame in &frames {
        print_frame(frame);
    }
    let invalid = frames.iter().filter(|f| !f.valid).count();
    info!(frames = frames.len(), invalid, "Decode finished");
    Ok(())
}

fn print_frame(frame: &Frame) {
    println!(
        "{} {:<11} code {:>5} len {:>5} {}{} {}",
        frame.version,
        frame.direction.to_string(),
        frame.code,
        frame.payload.len(),
        if frame.valid { "ok" } else { "CRC-ERR" },
        if frame.unsupported { " unsupported" } else { "" },
        hex::encode(&frame.payload)
    );
}
