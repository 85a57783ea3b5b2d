mod terminal;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use terminal::{StdinOperator, TerminalDisplay};
use vina_core::analyze::FaceAnalyzer;
use vina_core::capture::{read_with_retry, Camera, FrameSource};
use vina_core::config::Config;
use vina_core::enroll::{enroll_from_image, LiveEnrollment};
use vina_core::greeter::Greeter;
use vina_core::speech;
use vina_core::store::{self, FaceStore};

#[derive(Parser)]
#[command(name = "vina")]
#[command(about = "Webcam face greeter: recognizes known people and says hello", long_about = None)]
#[command(version)]
struct Cli {
    /// Defaults to `run`
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (skips the system and user config lookup)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize and greet known faces (q: quit, l: toggle low light)
    Run,
    /// Enroll faces live from the camera (s: capture, q: quit)
    Enroll,
    /// Enroll the largest face in an image file
    EnrollImage {
        /// Image to enroll from
        #[arg(long)]
        image: PathBuf,
        /// Name to enroll the face under
        #[arg(long)]
        name: String,
    },
    /// List enrolled names
    List,
    /// Remove an enrolled name
    Remove {
        /// Name to remove
        name: String,
    },
    /// Capture a snapshot from the camera
    Snapshot {
        /// Output file path
        output: PathBuf,
    },
    /// List camera devices
    Devices,
    /// Show configuration
    Config {
        /// Validate configuration
        #[arg(long)]
        validate: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger; explicit \r keeps lines aligned while the terminal is in raw mode
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format(|buf, record| {
            write!(
                buf,
                "[{} {:<5} {}] {}\r\n",
                buf.timestamp(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => cmd_run(config),
        Commands::Enroll => cmd_enroll(config),
        Commands::EnrollImage { image, name } => cmd_enroll_image(config, &image, &name),
        Commands::List => cmd_list(&config),
        Commands::Remove { name } => cmd_remove(&config, &name),
        Commands::Snapshot { output } => cmd_snapshot(&config, &output),
        Commands::Devices => cmd_devices(&config),
        Commands::Config { validate } => cmd_config(&config, validate),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::load()?),
    }
}

fn cmd_run(config: Config) -> anyhow::Result<()> {
    let store = FaceStore::new(&config.storage.database_path);
    let faces = store.load();
    if faces.is_empty() {
        log::warn!("No faces enrolled yet; everyone will be Unknown (try `vina enroll`)");
    }

    let analyzer = FaceAnalyzer::new(&config)?;
    let mut camera = Camera::open(&config.camera)?;
    let speaker = speech::from_config(&config.speech);
    let mut display = TerminalDisplay::new(config.display.preview_path.clone())?;

    let mut greeter = Greeter::new(config, analyzer, faces, speaker);
    let result = greeter.run(&mut camera, &mut display);

    camera.release();
    drop(display);
    result?;
    Ok(())
}

fn cmd_enroll(config: Config) -> anyhow::Result<()> {
    let store = FaceStore::new(&config.storage.database_path);
    let analyzer = FaceAnalyzer::new(&config)?;
    let mut camera = Camera::open(&config.camera)?;
    let speaker = speech::from_config(&config.speech);
    let mut display = TerminalDisplay::new(config.display.preview_path.clone())?;

    let mut enrollment = LiveEnrollment::new(config, analyzer, store, speaker);
    let result = enrollment.run(&mut camera, &mut display, &mut StdinOperator);

    camera.release();
    drop(display);
    result?;

    println!("{} faces enrolled", enrollment.faces().len());
    Ok(())
}

fn cmd_enroll_image(config: Config, image: &Path, name: &str) -> anyhow::Result<()> {
    let store = FaceStore::new(&config.storage.database_path);
    let mut analyzer = FaceAnalyzer::new(&config)?;
    let speaker = speech::blocking_from_config(&config.speech);

    let faces = enroll_from_image(
        &mut analyzer,
        &store,
        image,
        name,
        &mut StdinOperator,
        speaker.as_ref(),
    )?;

    println!("✓ {} enrolled from {}", name.trim(), image.display());
    println!("{} faces enrolled", faces.len());
    Ok(())
}

fn cmd_list(config: &Config) -> anyhow::Result<()> {
    let store = FaceStore::new(&config.storage.database_path);
    let faces = store.load();

    if faces.is_empty() {
        println!("No faces enrolled ({})", store.path().display());
        return Ok(());
    }

    println!("Enrolled faces ({}):", store.path().display());
    println!();
    for name in store::names(&faces) {
        println!("  {}", name);
    }

    Ok(())
}

fn cmd_remove(config: &Config, name: &str) -> anyhow::Result<()> {
    let store = FaceStore::new(&config.storage.database_path);
    let faces = store.load();

    let updated = store::remove(&faces, name)?;
    store.save(&updated)?;

    println!("✓ Removed {}", name.trim());
    Ok(())
}

fn cmd_snapshot(config: &Config, output: &Path) -> anyhow::Result<()> {
    println!("Capturing snapshot to: {}", output.display());

    let mut camera = Camera::open(&config.camera)?;
    let frame = read_with_retry(
        &mut camera,
        config.camera.max_read_failures,
        config.camera.retry_delay(),
    )?;
    camera.release();

    frame
        .save(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("✓ Snapshot saved: {}", output.display());
    println!("Resolution: {}x{}", frame.width(), frame.height());

    Ok(())
}

fn cmd_devices(config: &Config) -> anyhow::Result<()> {
    let devices = Camera::list_devices()?;

    if devices.is_empty() {
        println!("No camera devices found");
        return Ok(());
    }

    println!("Camera devices (configured: {:?}):", config.camera.device);
    for device in devices {
        println!("  {}", device);
    }

    Ok(())
}

fn cmd_config(config: &Config, validate: bool) -> anyhow::Result<()> {
    if validate {
        config.validate()?;
        println!("✓ Configuration is valid");
        return Ok(());
    }

    println!("Configuration:");
    println!();

    println!("[camera]");
    println!("  device = {:?}", config.camera.device);
    println!(
        "  requested = {}x{} @ {} fps",
        config.camera.width, config.camera.height, config.camera.fps
    );
    println!("  minimum = {}x{}", config.camera.min_width, config.camera.min_height);
    println!(
        "  read retries = {} x {}ms",
        config.camera.max_read_failures, config.camera.retry_delay_ms
    );
    println!();

    println!("[detection]");
    println!("  model = {:?}", config.detection.model_path);
    println!("  confidence_threshold = {}", config.detection.confidence_threshold);
    println!("  nms_threshold = {}", config.detection.nms_threshold);
    println!();

    println!("[embedding]");
    println!("  model = {:?}", config.embedding.model_path);
    println!();

    println!("[matching]");
    println!("  threshold = {}", config.matching.threshold);
    println!();

    println!("[session]");
    println!("  zoom_duration = {}s", config.session.zoom_duration_secs);
    println!("  greeting_cooldown = {}s", config.session.greeting_cooldown_secs);
    println!("  detection_interval = {}s", config.session.detection_interval_secs);
    println!("  zoom_padding = {}", config.session.zoom_padding);
    println!(
        "  low_light = {} (alpha {}, beta {})",
        config.session.low_light, config.session.enhance_alpha, config.session.enhance_beta
    );
    println!("  greeting = {:?}", config.session.greeting);
    println!();

    println!("[enrollment]");
    println!("  capture_cooldown = {}s", config.enrollment.capture_cooldown_secs);
    println!("  preview_interval = {}s", config.enrollment.preview_interval_secs);
    println!("  min_face_size = {}px", config.enrollment.min_face_size);
    println!();

    println!("[speech]");
    println!("  enabled = {}", config.speech.enabled);
    println!("  command = {:?} {:?}", config.speech.command, config.speech.args);
    println!("  min_interval = {}s", config.speech.min_interval_secs);
    println!();

    println!("[storage]");
    println!("  database_path = {:?}", config.storage.database_path);
    println!();

    println!("[display]");
    println!("  preview_path = {:?}", config.display.preview_path);
    println!();

    println!("[debug]");
    println!("  save_screenshots = {}", config.debug.save_screenshots);
    println!("  output_dir = {:?}", config.debug.output_dir);

    Ok(())
}
