use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
#[cfg(feature = "device")]
use scene_midi_core::MidiDevice;
use scene_midi_core::{BindingDocument, BindingEngine, EngineConfig, MemoryScene, QueuedDevice, Result};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        #[cfg(feature = "device")]
        Commands::Ports => list_ports(&config),
        Commands::Inspect { bindings } => inspect(&bindings),
        Commands::Replay {
            scene,
            events,
            bindings,
            save,
        } => replay(config, &scene, &events, bindings.as_deref(), save.as_deref()),
        #[cfg(feature = "device")]
        Commands::Run {
            port,
            scene,
            bindings,
            ticks,
        } => run_live(config, port, &scene, bindings.as_deref(), ticks),
    }
}

#[cfg(feature = "device")]
fn list_ports(config: &EngineConfig) -> Result<()> {
    let device = scene_midi_core::MidirDevice::new(config.client_name.as_str());
    for (index, name) in device.list_ports()?.iter().enumerate() {
        println!("{index}: {name}");
    }
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let document = BindingDocument::from_json(&std::fs::read_to_string(path)?)?;
    let names = document.controller_names.unwrap_or_default();

    for (control, mappings) in document.controller_mapping.unwrap_or_default() {
        let label = names.get(&control).map(String::as_str).unwrap_or("-");
        println!("control {control} ({label})");
        for (index, mapping) in mappings.iter().enumerate() {
            println!(
                "  [{index}] {} {:?} {} .. {}",
                mapping.attribute.name, mapping.attribute.source, mapping.min, mapping.max
            );
        }
    }
    if let Some(keyframe) = document.controller_keyframe_bind {
        match keyframe.controller {
            Some(control) => println!("keyframe: control {control} velocity {}", keyframe.velocity),
            None => println!("keyframe: unbound"),
        }
    }
    if let Some(selection) = document.selection_groups {
        for (control, group) in selection.mapping {
            println!(
                "group {} on control {control} velocity {}: {}",
                group.name,
                group.velocity,
                group.entities.join(", ")
            );
        }
    }
    if let Some(frames) = document.frame_control {
        println!(
            "frames: increase {:?} decrease {:?} resolution {} timeout {}s",
            frames.increase.controller,
            frames.decrease.controller,
            frames.frame_control_resolution,
            frames.timeout
        );
    }
    Ok(())
}

fn load_scene(path: &Path) -> Result<MemoryScene> {
    Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

/// Feeds recorded messages to the engine, one per tick, and prints the scene.
fn replay(
    config: EngineConfig,
    scene_path: &Path,
    events_path: &Path,
    bindings: Option<&Path>,
    save: Option<&Path>,
) -> Result<()> {
    tracing::info!(scene = ?scene_path, events = ?events_path, "replaying");

    let mut scene = load_scene(scene_path)?;
    let messages: Vec<Vec<u8>> = serde_json::from_str(&std::fs::read_to_string(events_path)?)?;

    let mut engine = BindingEngine::new(config, QueuedDevice::single("replay"));
    if let Some(path) = bindings {
        engine.load_bindings(path)?;
    }
    engine.connect(0)?;

    for raw in messages {
        engine.device_mut().push_raw(raw);
        engine.tick(&mut scene);
    }

    if let Some(path) = save {
        engine.save_bindings(path)?;
    }
    println!("{}", serde_json::to_string_pretty(&scene)?);
    Ok(())
}

#[cfg(feature = "device")]
fn run_live(
    config: EngineConfig,
    port: usize,
    scene_path: &Path,
    bindings: Option<&Path>,
    ticks: Option<u64>,
) -> Result<()> {
    let mut scene = load_scene(scene_path)?;
    let period = config.poll_period();
    let device = scene_midi_core::MidirDevice::new(config.client_name.as_str());

    let mut engine = BindingEngine::new(config, device);
    if let Some(path) = bindings {
        engine.load_bindings(path)?;
    }
    let name = engine.connect(port)?;
    tracing::info!(port = %name, "listening");

    let mut elapsed = 0u64;
    while engine.is_connected() && ticks.map_or(true, |limit| elapsed < limit) {
        if let Some(event) = engine.tick(&mut scene) {
            tracing::debug!(?event, state = ?engine.state(), "tick");
        }
        elapsed += 1;
        std::thread::sleep(period);
    }

    println!("{}", serde_json::to_string_pretty(&scene)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Bind MIDI controls to scene properties", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON). Defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the available MIDI input ports.
    #[cfg(feature = "device")]
    Ports,
    /// Summarise a saved bindings file.
    Inspect {
        bindings: PathBuf,
    },
    /// Drive the engine with recorded 3-byte messages against a scene file.
    Replay {
        #[arg(long)]
        scene: PathBuf,
        /// JSON array of raw messages, e.g. `[[176, 10, 64]]`.
        #[arg(long)]
        events: PathBuf,
        /// Bindings to load before replaying. These take precedence over
        /// bindings embedded in the scene file.
        #[arg(long)]
        bindings: Option<PathBuf>,
        /// Where to write the bindings afterwards.
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Listen on a hardware port and apply bindings to a scene file.
    #[cfg(feature = "device")]
    Run {
        #[arg(short, long)]
        port: usize,
        #[arg(long)]
        scene: PathBuf,
        #[arg(long)]
        bindings: Option<PathBuf>,
        /// Stop after this many ticks.
        #[arg(long)]
        ticks: Option<u64>,
    },
}
