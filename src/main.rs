use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use waav_sentinel::config::{SentinelConfig, get_token_pricing, list_priced_models};
use waav_sentinel::core::audio::{AudioSink, DiscardSink, WavFileSink};
use waav_sentinel::core::realtime::{
    PlaceholderCapture, REALTIME_SAMPLE_RATE, SessionController, SessionEvent,
    SessionEventCallback, SessionMode, StartOptions,
};
use waav_sentinel::core::{TokenBuckets, ValidationOutcome, calculate_cost};

/// WaaV Sentinel - compliance-checked realtime voice sessions
#[derive(Parser, Debug)]
#[command(name = "waav-sentinel")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate the configuration, then print a summary
    CheckConfig,

    /// Print per-token pricing for the known realtime models
    Pricing {
        /// Only print this model
        #[arg(short = 'm', long = "model")]
        model: Option<String>,
    },

    /// Compute the USD cost of a token sample
    Cost {
        #[arg(long = "audio-in", default_value_t = 0)]
        audio_in: u64,
        #[arg(long = "text-in", default_value_t = 0)]
        text_in: u64,
        #[arg(long = "cached-in", default_value_t = 0)]
        cached_in: u64,
        #[arg(long = "audio-out", default_value_t = 0)]
        audio_out: u64,
        #[arg(long = "text-out", default_value_t = 0)]
        text_out: u64,
        /// Price with this model instead of the configured one
        #[arg(short = 'm', long = "model")]
        model: Option<String>,
    },

    /// Run one moderation check against the configured rules
    Moderate {
        /// Transcript to check
        #[arg(short = 't', long = "text")]
        text: String,
    },

    /// Chat with the model over the WebSocket transport; one line per message
    Session {
        /// Ask for spoken replies and record them to this WAV file
        #[arg(long = "record", value_name = "FILE")]
        record: Option<PathBuf>,
    },
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<SentinelConfig> {
    if let Some(config_path) = path {
        info!("Loading configuration from {}", config_path.display());
        SentinelConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))
    } else {
        SentinelConfig::from_env().map_err(|e| anyhow!(e.to_string()))
    }
}

fn print_summary(config: &SentinelConfig) {
    let session = &config.session;
    println!("Signaling:   {}", config.signaling_url);
    println!("WebSocket:   {}", config.websocket_url);
    println!(
        "API key:     {}",
        if config.openai_api_key.is_some() { "set" } else { "missing" }
    );
    println!("Model:       {} (voice {})", session.model, session.voice);
    println!("Mode:        {:?}", session.mode);
    println!("First turn:  {:?}", session.first_speaker);
    println!(
        "Validation:  {} (buffer delay {} ms)",
        if session.validation.enabled { "enabled" } else { "disabled" },
        session.validation.buffer_delay_ms
    );
    let endpoints = [
        ("Moderation", &config.moderation_url),
        ("Web search", &config.web_search_url),
        ("Knowledge", &config.knowledge_base_url),
        ("Sentiment", &config.sentiment_url),
    ];
    for (name, url) in endpoints {
        println!(
            "{:<12} {}",
            format!("{name}:"),
            url.as_deref().unwrap_or("-")
        );
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Inbound {
            event_type,
            payload,
        } => match event_type.as_str() {
            "response.text.delta" | "response.audio_transcript.delta" => {
                if let Some(delta) = payload["delta"].as_str() {
                    print!("{delta}");
                    let _ = std::io::stdout().flush();
                }
            }
            "response.done" => println!(),
            _ => {}
        },
        SessionEvent::ValidationFailed { reason, .. } => {
            eprintln!("[validation] reply rejected: {reason}")
        }
        SessionEvent::ValidationFailedOpen { error, .. } => {
            eprintln!("[validation] moderation unavailable, reply allowed: {error}")
        }
        SessionEvent::RephraseRequested { .. } => eprintln!("[validation] rephrasing"),
        SessionEvent::ToolCallRequested {
            name, arguments, ..
        } => eprintln!("[tool] {name} {arguments}"),
        SessionEvent::ToolCallCompleted { name, success, .. } => {
            eprintln!("[tool] {name} {}", if *success { "done" } else { "failed" })
        }
        SessionEvent::RemoteError { message, .. } => eprintln!("[remote] {message}"),
        SessionEvent::Disconnected { reason } => eprintln!("[disconnected] {reason}"),
        _ => {}
    }
}

async fn run_session(config: SentinelConfig, record: Option<PathBuf>) -> anyhow::Result<()> {
    let recorder = match &record {
        Some(path) => Some(Arc::new(WavFileSink::create(path, REALTIME_SAMPLE_RATE)?)),
        None => None,
    };
    let sink: Arc<dyn AudioSink> = match &recorder {
        Some(recorder) => recorder.clone() as Arc<dyn AudioSink>,
        None => Arc::new(DiscardSink),
    };

    let mut settings = config.session.clone();
    settings.mode = if recorder.is_some() {
        SessionMode::Voice
    } else {
        SessionMode::Text
    };

    let peers = config
        .websocket_peers()
        .map_err(|e| anyhow!(e.to_string()))?;
    let deps = config
        .session_dependencies(Arc::new(PlaceholderCapture), Arc::new(peers), sink)
        .map_err(|e| anyhow!(e.to_string()))?;
    let callback: SessionEventCallback = Arc::new(
        |event: SessionEvent| -> Pin<Box<dyn Future<Output = ()> + Send>> {
            Box::pin(async move { print_event(&event) })
        },
    );

    let (handle, task) = SessionController::spawn(settings, deps, Some(callback));
    handle.start(StartOptions::default()).await?;
    eprintln!("Session active. Type a message; /quit or Ctrl-C ends it.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim() == "/quit" => break,
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    if let Err(e) = handle.send_text(line.trim()).await {
                        eprintln!("Message not sent: {e}");
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let snapshot = handle.snapshot().await?;
    handle.stop().await?;
    handle.shutdown().await;
    let _ = task.await;
    if let Some(recorder) = recorder {
        recorder.finalize()?;
    }

    eprintln!(
        "Tokens in/out: {}/{}  cost: ${:.4}",
        snapshot.usage.audio_in + snapshot.usage.text_in + snapshot.usage.cached_in,
        snapshot.usage.audio_out + snapshot.usage.text_out,
        snapshot.cost.total_cost
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig => {
            let config = load_config(cli.config)?;
            print_summary(&config);
            println!("Configuration OK");
        }
        Commands::Pricing { model } => {
            let models = match model {
                Some(name) => vec![name],
                None => list_priced_models().into_iter().map(String::from).collect(),
            };
            println!(
                "{:<40} {:>12} {:>12} {:>12} {:>12} {:>12}",
                "model", "audio_in", "text_in", "cached_in", "audio_out", "text_out"
            );
            for name in models {
                let pricing = get_token_pricing(&name)
                    .ok_or_else(|| anyhow!("No pricing known for model '{name}'"))?;
                println!(
                    "{:<40} {:>12.8} {:>12.8} {:>12.8} {:>12.8} {:>12.8}",
                    name,
                    pricing.audio_in,
                    pricing.text_in,
                    pricing.cached_in,
                    pricing.audio_out,
                    pricing.text_out
                );
            }
        }
        Commands::Cost {
            audio_in,
            text_in,
            cached_in,
            audio_out,
            text_out,
            model,
        } => {
            let pricing = match model {
                Some(name) => *get_token_pricing(&name)
                    .ok_or_else(|| anyhow!("No pricing known for model '{name}'"))?,
                None => load_config(cli.config)?.pricing(),
            };
            let buckets = TokenBuckets {
                audio_in,
                text_in,
                cached_in,
                audio_out,
                text_out,
            };
            let cost = calculate_cost(&buckets, &pricing);
            println!("{}", serde_json::to_string_pretty(&cost)?);
        }
        Commands::Moderate { text } => {
            let config = load_config(cli.config)?;
            let pipeline = config
                .validation_pipeline()
                .map_err(|e| anyhow!(e.to_string()))?;
            if !pipeline.has_moderator() {
                anyhow::bail!("No moderation URL configured");
            }

            // Checking on demand even if the session has validation switched off
            let mut settings = config.session.validation.clone();
            settings.enabled = true;

            match pipeline.validate(&text, &settings).await {
                ValidationOutcome::Valid => println!("valid"),
                ValidationOutcome::Invalid { reason } => println!("invalid: {reason}"),
                ValidationOutcome::FailedOpen { error } => {
                    println!("valid (moderation failed open: {error})")
                }
                ValidationOutcome::Skipped => println!("skipped (empty transcript)"),
            }
        }
        Commands::Session { record } => {
            let config = load_config(cli.config)?;
            run_session(config, record).await?;
        }
    }

    Ok(())
}
