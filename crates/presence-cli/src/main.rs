use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use presence_hw::camera::Camera;
use presence_hw::FrameSource;
use presence_store::AttendanceStore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod backend;
mod config;
mod enroll;
mod notify;
mod render;
mod session;

use config::Config;

#[derive(Parser)]
#[command(name = "presence", about = "Webcam attendance with blink liveness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the live recognition session
    Run,
    /// Enroll a new identity from camera samples
    Enroll {
        /// Stable identity id (e.g., employee number)
        #[arg(short, long)]
        id: String,
        /// Display name
        #[arg(short, long)]
        name: String,
    },
    /// List enrolled identities
    List {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Remove an enrolled identity and all of its attendance events
    Remove {
        /// Identity id to remove
        id: String,
    },
    /// Export the attendance log as CSV, newest first
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List available capture devices
    Devices,
    /// Run camera diagnostics: open the device, capture one frame
    Test {
        /// Save the captured frame as a PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Run => cmd_run(&config),
        Commands::Enroll { id, name } => cmd_enroll(&config, id, name),
        Commands::List { json } => cmd_list(&config, json),
        Commands::Remove { id } => cmd_remove(&config, &id),
        Commands::Export { output } => cmd_export(&config, output),
        Commands::Devices => cmd_devices(),
        Commands::Test { output } => cmd_test(&config, output),
    }
}

fn open_store(config: &Config) -> Result<AttendanceStore> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    AttendanceStore::open(&config.db_path, config.cooldown_seconds)
        .with_context(|| format!("opening attendance store at {}", config.db_path.display()))
}

/// Stop flag flipped by ctrl-c. Both the session loop and enrollment
/// poll it; the capture thread is stopped separately by FrameSource.
fn stop_flag() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let handle = stop.clone();
    ctrlc::set_handler(move || {
        tracing::info!("stop requested");
        handle.store(true, Ordering::SeqCst);
    })
    .context("installing ctrl-c handler")?;
    Ok(stop)
}

fn cmd_run(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let providers = backend::create(&config.provider_backend)?;

    let sink: Box<dyn render::FrameSink> = match &config.snapshot_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating snapshot directory {}", dir.display()))?;
            Box::new(render::SnapshotSink::new(
                dir.clone(),
                config.snapshot_every,
                config.target_width,
                config.target_height,
            ))
        }
        None => Box::new(render::NullSink),
    };

    let mut session = session::RecognitionSession::new(
        config,
        &store,
        providers.faces,
        providers.landmarks,
        Box::new(notify::TerminalBell),
        sink,
    )?;

    let stop = stop_flag()?;
    let mut source = FrameSource::start(&config.camera_device);
    let stats = session.run(&source, &stop);
    source.stop();

    println!(
        "session stopped: {} frames, {} detection cycles, {} attendance marks",
        stats.frames, stats.detection_cycles, stats.marks
    );
    Ok(())
}

fn cmd_enroll(config: &Config, id: String, name: String) -> Result<()> {
    let store = open_store(config)?;
    let mut providers = backend::create(&config.provider_backend)?;

    let stop = stop_flag()?;
    let mut source = FrameSource::start(&config.camera_device);
    let result = enroll::enroll(
        id,
        name,
        &source,
        providers.faces.as_mut(),
        &store,
        config,
        &stop,
    );
    source.stop();

    match result {
        Ok(identity) => {
            println!("enrolled {} ({})", identity.name, identity.id);
            Ok(())
        }
        Err(enroll::EnrollError::Store(presence_store::StoreError::Duplicate(id))) => {
            println!("identity '{id}' already exists; nothing stored");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_list(config: &Config, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let roster = store.list_identities()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&roster)?);
        return Ok(());
    }

    if roster.is_empty() {
        println!("no identities enrolled");
        return Ok(());
    }
    for identity in &roster {
        println!(
            "{}\t{}\t({}-dim embedding)",
            identity.id,
            identity.name,
            identity.embedding.dim()
        );
    }
    println!("{} enrolled", roster.len());
    Ok(())
}

fn cmd_remove(config: &Config, id: &str) -> Result<()> {
    let store = open_store(config)?;
    if store.delete_identity(id) {
        println!("removed {id} and its attendance events");
    } else {
        println!("nothing removed: '{id}' not found or delete failed");
    }
    Ok(())
}

fn cmd_export(config: &Config, output: Option<PathBuf>) -> Result<()> {
    let store = open_store(config)?;
    match output {
        Some(path) => {
            let file = std::fs::File::create(&path)
                .with_context(|| format!("creating {}", path.display()))?;
            store.export_csv(file)?;
            println!("exported attendance log to {}", path.display());
        }
        None => {
            store.export_csv(std::io::stdout().lock())?;
        }
    }
    Ok(())
}

fn cmd_test(config: &Config, output: Option<PathBuf>) -> Result<()> {
    println!("opening {}", config.camera_device);
    let camera = Camera::open(&config.camera_device)
        .with_context(|| format!("opening camera {}", config.camera_device))?;
    println!(
        "negotiated {}x{} ({:?})",
        camera.width, camera.height, camera.fourcc
    );

    let frame = camera.capture_frame().context("capturing test frame")?;
    println!(
        "captured frame: sequence {}, {} bytes",
        frame.sequence,
        frame.data.len()
    );

    if let Some(path) = output {
        frame
            .to_gray_image()
            .save(&path)
            .with_context(|| format!("saving {}", path.display()))?;
        println!("saved test frame to {}", path.display());
    }
    Ok(())
}

fn cmd_devices() -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("no video capture devices found");
        return Ok(());
    }
    for dev in devices {
        println!("{}\t{}\t{} ({})", dev.path, dev.name, dev.driver, dev.bus);
    }
    Ok(())
}
