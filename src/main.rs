use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use roomsink::engine::{PlayerConfig, PlayerEvent};
use roomsink::hal::mock::{MockPcm, SineSource};
use roomsink::hal::{AlsaBackend, AudioBackend, AudioFormat, AudioOutputFormat, PcmBinding, SystemToolRunner, ToolConfig};

#[derive(Parser)]
#[command(name = "roomsink", about = "Direct-hardware audio output")]
struct Cli {
    /// Player configuration as JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write to an in-memory device instead of the sound card
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List output devices
    Devices {
        #[arg(long)]
        json: bool,
    },
    /// Play a test tone
    Play {
        #[arg(short, long)]
        device: Option<String>,
        #[arg(long, default_value_t = 440.0)]
        frequency: f64,
        #[arg(long, default_value_t = 3.0)]
        seconds: f64,
        #[arg(long, default_value_t = 0.5)]
        volume: f32,
        #[arg(long, default_value_t = 48000)]
        rate: u32,
        #[arg(long, default_value_t = 2)]
        channels: u16,
        /// Output bit depth override (16, 24 or 32)
        #[arg(long)]
        bit_depth: Option<u16>,
    },
    /// Set the hardware mixer of a direct-hardware device
    Volume { device: String, percent: u8 },
}

fn load_config(path: Option<&PathBuf>) -> Result<PlayerConfig> {
    let Some(path) = path else {
        return Ok(PlayerConfig::default());
    };
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text).context("parsing player config")?;
    Ok(PlayerConfig::from_json(value)?)
}

#[cfg(feature = "alsa")]
fn binding(dry_run: bool) -> Arc<dyn PcmBinding> {
    if dry_run {
        Arc::new(MockPcm::new())
    } else {
        Arc::new(roomsink::hal::AlsaBinding::new())
    }
}

#[cfg(not(feature = "alsa"))]
fn binding(dry_run: bool) -> Arc<dyn PcmBinding> {
    if !dry_run {
        tracing::warn!("built without the `alsa` feature, writing to an in-memory device");
    }
    Arc::new(MockPcm::new())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let player_config = load_config(cli.config.as_ref())?;
    let tool_config = ToolConfig::default();
    let backend = AlsaBackend::new(
        binding(cli.dry_run),
        Arc::new(SystemToolRunner::new(tool_config.timeout())),
        tool_config,
        player_config,
    );

    match cli.command {
        Command::Devices { json } => {
            let devices = backend.output_devices().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            } else if devices.is_empty() {
                println!("No output devices found");
            } else {
                for device in &devices {
                    let marker = if device.is_default { "*" } else { " " };
                    println!(
                        "{} {:<40} {} ({} ch, {} Hz)",
                        marker, device.id, device.display_name, device.max_channels, device.default_sample_rate
                    );
                }
            }
        }
        Command::Play {
            device,
            frequency,
            seconds,
            volume,
            rate,
            channels,
            bit_depth,
        } => {
            if let Err(message) = backend.validate_device(device.as_deref()).await {
                bail!(message);
            }
            let player = backend.create_player(device.as_deref()).await?;
            let events = player.subscribe();
            let watcher = std::thread::spawn(move || {
                for event in events.iter() {
                    match event {
                        PlayerEvent::StateChanged(state) => tracing::info!(state = state.name(), "state"),
                        PlayerEvent::Reconnecting { attempt, delay } => {
                            tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting")
                        }
                        PlayerEvent::ErrorOccurred { message, cause } => {
                            tracing::error!(message = %message, cause = ?cause, "playback error")
                        }
                    }
                }
            });

            let output = bit_depth.map(|bit_depth| AudioOutputFormat {
                sample_rate: rate,
                bit_depth,
                channels,
            });
            player
                .initialize(AudioFormat::new(rate, channels), output)
                .with_context(|| format!("initializing {}", player.device_id()))?;
            player.attach_source(Box::new(SineSource::new(frequency, rate, channels)));
            player.set_volume(volume);
            tracing::info!(
                device = %player.device_id(),
                latency_ms = player.output_latency().as_millis() as u64,
                "playing test tone"
            );
            player.play()?;
            tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))).await;
            player.stop()?;
            drop(player);
            if watcher.join().is_err() {
                tracing::error!("event watcher panicked");
            }
        }
        Command::Volume { device, percent } => {
            if !backend.set_hardware_volume(&device, percent).await {
                bail!("device '{}' has no usable hardware mixer", device);
            }
            if let Some(level) = backend.hardware_volume(&device).await {
                println!("{}: {}%", device, level);
            }
        }
    }

    Ok(())
}
