//! jvoice - speak text with a preset voice from the command line

use clap::{Parser, Subcommand};
use jvoice::backends::create_backend;
use jvoice::catalog::{find_preset, PRESET_VOICES};
use jvoice::config_loader::{self, Settings};
use jvoice::discovery::DiscoverySnapshot;
use jvoice::playback::{await_completion, PlayOutcome, PlaybackEvent};
use jvoice::studio::Studio;
use jvoice::{SpeechError, SpeechResult};
use std::process::ExitCode;
use tokio::sync::broadcast;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Preset voices on top of the host speech engine
#[derive(Parser)]
#[command(name = "jvoice")]
#[command(version)]
#[command(about = "Speak text with a curated preset voice", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the preset voices
    Presets,

    /// Discover host voices and show how presets map onto them
    Voices {
        /// Print the discovery snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Speak text and wait until it finishes
    Speak {
        /// Text to speak
        text: String,
        /// Preset voice id (e.g. en-GB-2)
        #[arg(short, long)]
        voice: Option<String>,
        #[arg(short, long)]
        rate: Option<f32>,
        #[arg(short, long)]
        pitch: Option<f32>,
        #[arg(long)]
        volume: Option<f32>,
    },

    /// Play the test phrase for a preset voice
    Test {
        /// Preset voice id
        voice: String,
    },

    /// Show discovery and playback status
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Save speech to an audio file
    Download {
        text: String,
    },
}

fn init_logging(settings: &Settings) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| settings.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn lookup_voice(id: &str) -> SpeechResult<&'static jvoice::catalog::PresetVoice> {
    find_preset(id).ok_or_else(|| SpeechError::Config(format!("Unknown voice: {}", id)))
}

fn print_mapping(snapshot: &DiscoverySnapshot) {
    println!("Voice Mapping");
    println!("─────────────");
    for preset in PRESET_VOICES.iter() {
        match snapshot.binding(preset.id) {
            Some(binding) => println!(
                "  {:<9} {:<10} -> {} ({}) [{}]",
                preset.id,
                preset.name,
                binding.host_voice.name,
                binding.host_voice.lang,
                binding.quality
            ),
            None => println!("  {:<9} {:<10} -> no match", preset.id, preset.name),
        }
    }
    let stats = &snapshot.stats;
    println!();
    println!("Host Voices");
    println!("───────────");
    println!("Total:    {}", stats.total);
    println!("English:  {}", stats.english);
    println!("Hindi:    {}", stats.hindi);
    println!("Local:    {}", stats.local);
    println!("Remote:   {}", stats.remote);
}

async fn speak_and_wait(
    mut events: broadcast::Receiver<PlaybackEvent>,
    outcome: PlayOutcome,
) -> SpeechResult<()> {
    match outcome {
        PlayOutcome::Started { utterance, voice } => {
            println!("Speaking with {} ({})", voice.name, voice.lang);
            await_completion(&mut events, utterance).await
        }
        PlayOutcome::Stopped => Ok(()),
    }
}

async fn run(cli: Cli, settings: Settings) -> SpeechResult<()> {
    if let Commands::Presets = cli.command {
        println!("Preset Voices");
        println!("─────────────");
        for v in PRESET_VOICES.iter() {
            println!(
                "  {:<9} {:<10} {:<6} {:<7} {}",
                v.id, v.name, v.lang, v.gender, v.description
            );
        }
        return Ok(());
    }

    let backend = create_backend(&settings)?;
    let studio = Studio::start(backend, &settings);

    let result = async {
        match cli.command {
            Commands::Presets => Ok(()),

            Commands::Voices { json } => {
                let snapshot = studio.wait_until_ready().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&*snapshot).unwrap_or_default());
                } else {
                    print_mapping(&snapshot);
                }
                Ok(())
            }

            Commands::Speak {
                text,
                voice,
                rate,
                pitch,
                volume,
            } => {
                if let Some(id) = voice {
                    studio.select_voice(lookup_voice(&id)?);
                }
                let rate = rate.unwrap_or(settings.default_rate);
                let pitch = pitch.unwrap_or(settings.default_pitch);
                let volume = volume.unwrap_or(settings.default_volume);
                config_loader::validate_speech_params(rate, pitch, volume)?;
                studio.set_params(rate, pitch, volume);
                studio.set_text(text);
                studio.wait_until_ready().await?;
                // Subscribe before playing so a quick finish is not missed
                let events = studio.subscribe_events();
                let outcome = studio.play().await?;
                speak_and_wait(events, outcome).await
            }

            Commands::Test { voice } => {
                let preset = lookup_voice(&voice)?;
                studio.wait_until_ready().await?;
                let events = studio.subscribe_events();
                let outcome = studio.test_voice(preset).await?;
                speak_and_wait(events, outcome).await
            }

            Commands::Status { json } => {
                // Give discovery a chance to settle; failures are part of the status
                let _ = studio.wait_until_ready().await;
                let status = studio.status();
                if json {
                    println!("{}", serde_json::to_string_pretty(&status).unwrap_or_default());
                } else {
                    println!("jvoice Status");
                    println!("─────────────");
                    println!("Version:   {}", env!("CARGO_PKG_VERSION"));
                    println!("Backend:   {}", settings.backend);
                    println!("Status:    {}", status.headline());
                    println!("Voice:     {}", status.selected_voice);
                    if let Some(err) = status.error() {
                        println!("Error:     {}", err);
                    }
                }
                Ok(())
            }

            Commands::Download { text } => {
                studio.set_text(text);
                studio.download_audio()
            }
        }
    }
    .await;

    studio.shutdown().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = config_loader::SETTINGS
        .read()
        .map(|s| s.clone())
        .unwrap_or_default();
    init_logging(&settings);

    match run(cli, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            ExitCode::FAILURE
        }
    }
}
