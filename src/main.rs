use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate::camera::{CameraManager, Role};
use facegate::checkpoint::{Checkpoint, WatchOptions};
use facegate::report::{self, EncodeReport};
use facegate::{config, gate, CameraSource, FaceEncoding, FaceMatcher};
use log::{info, warn};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "facegate")]
#[command(version, about = "Face-recognition access gate controller")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List local cameras that answer a probe
    Cameras,
    /// Connect both cameras and report camera and gate status
    Status,
    /// Rebind cameras to new sources (device index or URL)
    Configure {
        #[arg(long)]
        entry: Option<CameraSource>,
        #[arg(long)]
        exit: Option<CameraSource>,
        /// Write the new sources to the config file
        #[arg(long)]
        save: bool,
    },
    /// Save one frame from a camera as JPEG
    Snapshot {
        /// entry or exit
        role: Role,
        #[arg(short, long, default_value = "snapshot.jpg")]
        output: PathBuf,
    },
    /// Disconnect and reconnect cameras, optionally unsticking the OS driver
    Reset {
        #[arg(long)]
        entry: Option<CameraSource>,
        #[arg(long)]
        exit: Option<CameraSource>,
        #[arg(long)]
        restart_services: bool,
    },
    /// Detect faces in an image file
    Detect { image: PathBuf },
    /// Print the encoding of the first face in an image file
    Encode { image: PathBuf },
    /// Compare the first faces of two image files
    Compare { first: PathBuf, second: PathBuf },
    /// Drive the gate actuator
    Gate {
        #[command(subcommand)]
        action: GateAction,
    },
    /// Watch a camera and open the gate for known faces
    Run {
        #[arg(long, default_value = "entry")]
        role: Role,
        /// Reference faces: images, or JSON files written by `encode`
        #[arg(short, long = "reference", required = true)]
        references: Vec<PathBuf>,
        #[arg(long, default_value_t = 200, value_parser = clap::value_parser!(u64).range(1..))]
        interval_ms: u64,
        /// Stop after the first admission
        #[arg(long)]
        once: bool,
    },
    /// Open config file in editor
    Config,
}

#[derive(Subcommand)]
enum GateAction {
    /// Open, then stay until the automatic close (Ctrl+C closes early)
    Open,
    Close,
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(None)?;

    match cli.command {
        Commands::Cameras => {
            let cameras = CameraManager::from_config(&cfg.cameras);
            print_json(&cameras.list_available().await)
        }
        Commands::Status => status(&cfg).await,
        Commands::Configure { entry, exit, save } => configure(cfg, entry, exit, save).await,
        Commands::Snapshot { role, output } => {
            let cameras = CameraManager::from_config(&cfg.cameras);
            cameras.connect(role).await;
            let jpeg = report::snapshot(&cameras, role).await;
            cameras.shutdown().await;
            std::fs::write(&output, jpeg?)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!("Saved {} frame to {}", role, output.display());
            Ok(())
        }
        Commands::Reset {
            entry,
            exit,
            restart_services,
        } => {
            let cameras = CameraManager::from_config(&cfg.cameras);
            let result = cameras.reset(entry, exit, restart_services).await;
            cameras.shutdown().await;
            print_json(&result)
        }
        Commands::Detect { image } => {
            let matcher = load_matcher(&cfg)?;
            print_json(&report::detect(matcher, read(&image)?).await?)
        }
        Commands::Encode { image } => {
            let matcher = load_matcher(&cfg)?;
            print_json(&report::encode(matcher, read(&image)?).await?)
        }
        Commands::Compare { first, second } => {
            let matcher = load_matcher(&cfg)?;
            print_json(&report::compare(matcher, read(&first)?, read(&second)?).await?)
        }
        Commands::Gate { action } => gate_command(&cfg, action).await,
        Commands::Run {
            role,
            references,
            interval_ms,
            once,
        } => run(&cfg, role, &references, Duration::from_millis(interval_ms), once).await,
        Commands::Config => open_config(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn load_matcher(cfg: &config::Config) -> Result<Arc<FaceMatcher>> {
    let models = &cfg.vision.models;
    if !models.exist() {
        warn!(
            "Model files missing: {} / {}",
            models.detector.display(),
            models.encoder.display()
        );
    }
    let matcher = FaceMatcher::from_models(cfg.vision.matcher.clone(), models)
        .context("Failed to initialize face recognition pipeline")?;
    Ok(Arc::new(matcher))
}

async fn status(cfg: &config::Config) -> Result<()> {
    #[derive(Serialize)]
    struct Status {
        cameras: facegate::camera::CameraStatus,
        gate: gate::GateStatus,
    }

    let cameras = CameraManager::from_config(&cfg.cameras);
    let camera_status = cameras.connect_all().await;
    cameras.shutdown().await;
    let gate = gate::from_config(&cfg.gate);
    print_json(&Status {
        cameras: camera_status,
        gate: gate.status().await,
    })
}

async fn configure(
    mut cfg: config::Config,
    entry: Option<CameraSource>,
    exit: Option<CameraSource>,
    save: bool,
) -> Result<()> {
    if entry.is_none() && exit.is_none() {
        anyhow::bail!("Nothing to configure: pass --entry and/or --exit");
    }

    let cameras = CameraManager::from_config(&cfg.cameras);
    let result = cameras.configure(entry.clone(), exit.clone()).await;
    cameras.shutdown().await;
    print_json(&result)?;

    if save {
        if let Some(entry) = entry {
            cfg.cameras.entry = entry;
        }
        if let Some(exit) = exit {
            cfg.cameras.exit = exit;
        }
        config::save_config(&cfg, None).context("Failed to save config")?;
        info!("Saved camera sources to {}", config::CONFIG_PATH.display());
    }

    if !result.success() {
        anyhow::bail!("Some cameras failed to connect");
    }
    Ok(())
}

async fn gate_command(cfg: &config::Config, action: GateAction) -> Result<()> {
    let gate = gate::from_config(&cfg.gate);
    match action {
        GateAction::Open => {
            print_json(&gate.open().await?)?;
            tokio::select! {
                _ = gate.wait_auto_close() => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted, closing gate"),
            }
            gate.shutdown().await;
            print_json(&gate.status().await)
        }
        GateAction::Close => print_json(&gate.close().await?),
        GateAction::Status => print_json(&gate.status().await),
    }
}

async fn load_references(matcher: &Arc<FaceMatcher>, paths: &[PathBuf]) -> Result<Vec<FaceEncoding>> {
    let mut references = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = read(path)?;
        let encoding = if path.extension().is_some_and(|ext| ext == "json") {
            let saved: EncodeReport = serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            saved.to_encoding()?
        } else {
            report::encode(matcher.clone(), bytes)
                .await
                .with_context(|| format!("No usable face in {}", path.display()))?
                .to_encoding()?
        };
        references.push(encoding);
    }
    Ok(references)
}

async fn run(
    cfg: &config::Config,
    role: Role,
    paths: &[PathBuf],
    interval: Duration,
    once: bool,
) -> Result<()> {
    let matcher = load_matcher(cfg)?;
    let references = load_references(&matcher, paths).await?;
    info!("Loaded {} reference face(s)", references.len());

    let cameras = Arc::new(CameraManager::from_config(&cfg.cameras));
    let report = cameras.connect(role).await;
    if !report.connected {
        warn!("{} camera not connected yet, will keep trying", role);
    }
    let gate = gate::from_config(&cfg.gate);
    let checkpoint = Checkpoint::new(cameras.clone(), matcher, gate.clone());

    info!("Watching {} camera. Press Ctrl+C to stop.", role);
    let options = WatchOptions {
        interval,
        once,
        ..WatchOptions::default()
    };
    let stop = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };
    let summary = checkpoint
        .watch(role, &references, options, stop, |outcome| {
            if let Err(err) = print_json(outcome) {
                warn!("Cannot print outcome: {:#}", err);
            }
        })
        .await;
    info!("{:?}", summary);

    gate.shutdown().await;
    cameras.shutdown().await;
    Ok(())
}

fn open_config() -> Result<()> {
    let config_path = config::CONFIG_PATH.as_os_str();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
