//! `dov`, the optical link loopback tool.
//!
//! ```text
//! dov send <path> --out <dir>      Render a file as a PNG frame sequence
//! dov receive <dir> --save <dir>   Decode a PNG frame sequence back to a file
//! dov layout                       Print the derived frame geometry
//! dov --config <path>              Load a custom config TOML
//! dov --gen-config                 Write default config to stdout
//! ```

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use dov_cli::config::DovConfig;
use dov_cli::png::{PngSequenceSink, PngSequenceSource};
use dov_core::{Receiver, ReceiverEvent, Sender, SenderEvent};

/// How long the receiver may stay silent after the last PNG was read.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "dov", about = "Data over video: send files through a screen and a camera")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "dov.toml", global = true)]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a file, writing every displayed frame as a PNG.
    Send {
        /// File to send.
        path: PathBuf,
        /// Directory that receives the frame sequence.
        #[arg(short, long, default_value = "frames")]
        out: PathBuf,
    },
    /// Receive from a directory of PNG frames.
    Receive {
        /// Directory holding the frame sequence.
        dir: PathBuf,
        /// Where to write the received file (overrides `receiver.save_dir`).
        #[arg(short, long)]
        save: Option<PathBuf>,
        /// Frames replayed per second.
        #[arg(long, default_value_t = 50)]
        fps: u32,
    },
    /// Print the geometry derived from `[layout]`.
    Layout,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", DovConfig::default_toml()?);
        return Ok(());
    }
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = DovConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("dov v{}", env!("CARGO_PKG_VERSION"));

    match command {
        Command::Send { path, out } => send(&config, &path, &out).await,
        Command::Receive { dir, save, fps } => receive(&config, dir, save, fps).await,
        Command::Layout => print_layout(&config),
    }
}

// ── Commands ─────────────────────────────────────────────────────

async fn send(config: &DovConfig, path: &Path, out: &Path) -> Result<(), Box<dyn Error>> {
    if path.is_dir() {
        return Err(
            "directory transfers need an archiver; pack the directory into one file first".into(),
        );
    }
    let layout = config.layout()?;
    let sink = PngSequenceSink::create(out)?;
    info!(out = %out.display(), fps = config.sender.target_fps, "writing frames");

    let (sender, mut events) = Sender::new(layout, config.sender.clone(), Box::new(sink));
    let handle = sender.spawn();
    handle.select_file(path)?;

    let result: Result<(), Box<dyn Error>> = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break Err("sender stopped unexpectedly".into());
                };
                match event {
                    SenderEvent::StateChanged(state) => debug!(%state, "sender state"),
                    SenderEvent::PrepareProgress { message, percent } => {
                        info!("{message} ({percent}%)");
                    }
                    SenderEvent::Prepared { name, size, total_frames } => {
                        info!(%name, size, total_frames, "prepared");
                        if let Err(e) = handle.begin_sending() {
                            break Err(e.into());
                        }
                    }
                    SenderEvent::Progress { status, percent, .. } => {
                        debug!(percent, "{status}");
                    }
                    SenderEvent::Completed { .. } => break Ok(()),
                    SenderEvent::Error(message) => break Err(message.into()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted");
                break Ok(());
            }
        }
    };

    handle.stop().await;
    if result.is_ok() {
        println!("{}", out.display());
    }
    result
}

async fn receive(
    config: &DovConfig,
    dir: PathBuf,
    save: Option<PathBuf>,
    fps: u32,
) -> Result<(), Box<dyn Error>> {
    let layout = config.layout()?;
    let mut receiver_config = config.receiver.clone();
    if let Some(save) = save {
        receiver_config.save_dir = save;
    }

    let interval = Duration::from_millis(1000 / fps.max(1) as u64);
    let source = PngSequenceSource::new(dir, interval);
    let exhausted = source.exhausted_flag();
    let (receiver, mut events) = Receiver::new(
        layout,
        config.detector.clone(),
        config.analyzer.clone(),
        receiver_config,
        Box::new(source),
    );
    let handle = receiver.start()?;

    let mut check = tokio::time::interval(Duration::from_millis(250));
    let mut last_event = Instant::now();
    let result: Result<(), Box<dyn Error>> = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break Err("receiver stopped unexpectedly".into());
                };
                last_event = Instant::now();
                match event {
                    ReceiverEvent::StateChanged { state, message } => info!(%state, "{message}"),
                    ReceiverEvent::FileInfo { name, size, total_frames } => {
                        info!(%name, size, total_frames, "incoming transfer");
                    }
                    ReceiverEvent::Progress { received, total } => {
                        debug!(received, total, "progress");
                    }
                    ReceiverEvent::AssemblyProgress { written, total } => {
                        debug!(written, total, "assembling");
                    }
                    ReceiverEvent::Preview(_) => {}
                    ReceiverEvent::Warning(message) => warn!("{message}"),
                    ReceiverEvent::MissingFrames(missing) => {
                        break Err(format!("{} frames missing: {missing:?}", missing.len()).into());
                    }
                    ReceiverEvent::Completed(path) => {
                        println!("{}", path.display());
                        break Ok(());
                    }
                    ReceiverEvent::Error(message) => break Err(message.into()),
                }
            }
            _ = check.tick() => {
                if exhausted.load(Ordering::SeqCst) && last_event.elapsed() > DRAIN_GRACE {
                    break Err("frame sequence ended before the transfer completed".into());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted");
                break Ok(());
            }
        }
    };

    tokio::task::spawn_blocking(move || handle.stop()).await?;
    result
}

fn print_layout(config: &DovConfig) -> Result<(), Box<dyn Error>> {
    let layout = config.layout()?;
    println!("frame          {}x{} px", layout.frame_width(), layout.frame_height());
    println!("block          {} px", layout.block_size());
    println!("content        {}x{} px", layout.content_width(), layout.content_height());
    println!("grid           {}x{} blocks", layout.grid_cols(), layout.grid_rows());
    println!("data area      {}x{} blocks", layout.data_cols(), layout.data_rows());
    println!("data bytes     {}", layout.data_bytes());
    println!("payload        {} bytes per DATA frame", layout.payload_capacity());
    Ok(())
}
