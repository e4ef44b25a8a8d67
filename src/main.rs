use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use murmur::client::InferenceBackend;
use murmur::config::ConfigOverrides;
use murmur::session::MessageId;
use murmur::voice::{
    AudioCaptureController, AudioPlayback, AudioSink, CaptureDevice, CpalMicrophone, SilentSink,
    SpeakerSink,
};
use murmur::{
    ApiStatus, Config, ConversationSession, ExchangeOutcome, HttpInferenceClient, Message,
    RecordOutcome, SessionOptions, SessionState, StatusPoller,
};

/// Murmur - talk to a self-hosted assistant by text or voice
#[derive(Parser)]
#[command(name = "murmur", version, about)]
struct Cli {
    /// Backend origin, e.g. http://localhost:5000
    #[arg(long, env = "MURMUR_BACKEND_URL")]
    backend_url: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Start with spoken replies muted
    #[arg(long)]
    muted: bool,

    /// Disable voice features (no microphone or speaker access)
    #[arg(long, env = "MURMUR_DISABLE_VOICE")]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Probe backend readiness once
    Status,
    /// Speak text through the backend's text-to-speech
    Say {
        /// Text to speak
        text: String,
    },
    /// Record from the microphone and print the transcript
    Transcribe {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Chat output goes to stdout, so stay quiet unless asked
    let filter = match cli.verbose {
        0 => "warn",
        1 => "warn,murmur=info",
        2 => "info,murmur=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = ConfigOverrides {
        backend_url: cli.backend_url,
        disable_voice: cli.disable_voice,
        muted: cli.muted,
    };
    let config = Config::load_with_options(&overrides)?;
    tracing::debug!(?config, "loaded configuration");

    let backend: Arc<dyn InferenceBackend> = Arc::new(HttpInferenceClient::new(&config.backend)?);

    match cli.command {
        Some(Command::Status) => cmd_status(&config, backend).await,
        Some(Command::Say { text }) => cmd_say(backend, &text).await,
        Some(Command::Transcribe { duration }) => {
            cmd_transcribe(&config, backend.as_ref(), duration).await
        }
        Some(Command::TestMic { duration }) => test_mic(config.voice.sample_rate, duration).await,
        Some(Command::TestSpeaker) => test_speaker().await,
        None => chat(&config, backend).await,
    }
}

/// Interactive chat loop
async fn chat(config: &Config, backend: Arc<dyn InferenceBackend>) -> anyhow::Result<()> {
    let voice_enabled = config.voice.enabled;

    let microphone = CpalMicrophone::new(config.voice.sample_rate);
    let capture = AudioCaptureController::new(Box::new(microphone), config.voice.sample_rate);
    let sink: Arc<dyn AudioSink> = if voice_enabled {
        Arc::new(SpeakerSink::spawn(Arc::clone(&backend)))
    } else {
        Arc::new(SilentSink)
    };

    let session = ConversationSession::new(backend, capture, sink, SessionOptions::from(config));
    let renderer = tokio::spawn(render(session.subscribe()));

    tracing::info!(
        backend = %config.backend.url,
        voice_enabled,
        "starting chat session"
    );

    wait_until_ready(&session, config).await?;
    print_help(voice_enabled);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Send(text) => {
                if session.send_text_message(text).await == ExchangeOutcome::Busy {
                    println!("(still waiting for the previous reply)");
                }
            }
            ReplCommand::Record if !voice_enabled => {
                println!("(voice is disabled)");
            }
            ReplCommand::Record => match session.record_toggle().await {
                Ok(RecordOutcome::Started) => {
                    println!("● recording, enter /record again to stop");
                }
                Ok(RecordOutcome::Finished(ExchangeOutcome::Skipped)) => {
                    println!("(no audio captured)");
                }
                Ok(RecordOutcome::Finished(_)) => {}
                Ok(RecordOutcome::Busy) => {
                    println!("(still waiting for the previous reply)");
                }
                Err(e) if e.is_capture_error() => {
                    println!("(microphone unavailable: {e})");
                }
                Err(e) => println!("(recording failed: {e})"),
            },
            ReplCommand::Mute => {
                if session.toggle_mute() {
                    println!("(spoken replies muted)");
                } else {
                    println!("(spoken replies on)");
                }
            }
            ReplCommand::Clear => {
                session.clear();
                println!("(conversation cleared)");
            }
            ReplCommand::History => match session.server_history().await {
                Ok(entries) if entries.is_empty() => println!("(no server-side history)"),
                Ok(entries) => {
                    for entry in entries {
                        println!("  {}: {}", entry.role, entry.content);
                    }
                }
                Err(e) => println!("(could not fetch history: {e})"),
            },
            ReplCommand::Feedback(text) if text.is_empty() => {
                println!("usage: /feedback <text>");
            }
            ReplCommand::Feedback(text) => match session.language_feedback(text).await {
                Ok(feedback) => {
                    println!(
                        "  grammar {:.1} | vocabulary {:.1} | fluency {:.1}",
                        feedback.grammar_score, feedback.vocabulary_score, feedback.fluency_score
                    );
                    for suggestion in &feedback.suggestions {
                        println!("  - {suggestion}");
                    }
                    if !feedback.corrected_text.is_empty() {
                        println!("  corrected: {}", feedback.corrected_text);
                    }
                }
                Err(e) => println!("(could not get feedback: {e})"),
            },
            ReplCommand::Help => print_help(voice_enabled),
            ReplCommand::Quit => break,
            ReplCommand::Unknown(command) => {
                println!("unknown command {command}, try /help");
            }
        }
    }

    renderer.abort();
    tracing::info!("chat session ended");
    Ok(())
}

/// Poll until the backend is ready, offering a retry on error
async fn wait_until_ready(session: &ConversationSession, config: &Config) -> anyhow::Result<()> {
    loop {
        if session.check_backend().await == ApiStatus::Ready {
            return Ok(());
        }

        let prompt = format!("Backend at {} is unreachable. Retry?", config.backend.url);
        let retry = tokio::task::spawn_blocking(move || {
            Confirm::new().with_prompt(prompt).default(true).interact()
        })
        .await??;

        if !retry {
            anyhow::bail!("backend at {} is not available", config.backend.url);
        }
    }
}

/// Print status changes and new messages as snapshots arrive
async fn render(mut rx: watch::Receiver<SessionState>) {
    let mut last_status = None;
    let mut last_printed: Option<MessageId> = None;

    loop {
        {
            let state = rx.borrow_and_update();

            if last_status != Some(state.api_status) {
                last_status = Some(state.api_status);
                print_status(state.api_status);
            }

            let printed_up_to = last_printed;
            for message in state
                .messages
                .iter()
                .filter(|m| printed_up_to.is_none_or(|last| m.id > last))
            {
                print_message(message);
                last_printed = Some(message.id);
            }
        }

        if rx.changed().await.is_err() {
            break;
        }
    }
}

fn print_status(status: ApiStatus) {
    match status {
        ApiStatus::Checking => println!("Checking backend..."),
        ApiStatus::Loading => println!("Models are loading, this can take a minute..."),
        ApiStatus::Ready => println!("Backend ready."),
        ApiStatus::Error => println!("Backend unreachable."),
    }
}

fn print_message(message: &Message) {
    if message.is_user() {
        println!("you> {}", message.text);
    } else if message.is_error {
        println!("bot! {}", message.text);
    } else {
        println!("bot> {}", message.text);
    }
}

fn print_help(voice_enabled: bool) {
    println!("Type a message and press enter to send it.");
    if voice_enabled {
        println!("  /record          start or stop a voice message");
        println!("  /mute            toggle spoken replies");
    }
    println!("  /clear           start a new conversation");
    println!("  /history         show the server-side history");
    println!("  /feedback <text> get feedback on your language");
    println!("  /help            show this help");
    println!("  /quit            exit");
}

/// One line of REPL input
#[derive(Debug, PartialEq, Eq)]
enum ReplCommand<'a> {
    Send(&'a str),
    Record,
    Mute,
    Clear,
    History,
    Feedback(&'a str),
    Help,
    Quit,
    Unknown(&'a str),
}

impl<'a> ReplCommand<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if !line.starts_with('/') {
            return Self::Send(line);
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "/record" | "/r" => Self::Record,
            "/mute" => Self::Mute,
            "/clear" => Self::Clear,
            "/history" => Self::History,
            "/feedback" => Self::Feedback(rest.trim()),
            "/help" | "/?" => Self::Help,
            "/quit" | "/exit" => Self::Quit,
            other => Self::Unknown(other),
        }
    }
}

/// One readiness probe
async fn cmd_status(config: &Config, backend: Arc<dyn InferenceBackend>) -> anyhow::Result<()> {
    let poller = StatusPoller::new(backend, config.backend.poll_interval);
    let status = poller.probe().await?;
    println!("{}: {status}", config.backend.url);
    Ok(())
}

/// Synthesize text and play it
async fn cmd_say(backend: Arc<dyn InferenceBackend>, text: &str) -> anyhow::Result<()> {
    let synthesis = backend.synthesize(text).await?;
    let Some(audio_url) = synthesis.audio_url else {
        println!("Backend skipped synthesis (empty text?)");
        return Ok(());
    };

    let audio = backend.fetch_audio(&audio_url).await?;
    println!("Playing {} bytes from {audio_url}", audio.len());

    tokio::task::spawn_blocking(move || AudioPlayback::new()?.play_encoded(&audio)).await??;
    Ok(())
}

/// Record a clip and print its transcript
async fn cmd_transcribe(
    config: &Config,
    backend: &dyn InferenceBackend,
    duration: u64,
) -> anyhow::Result<()> {
    let microphone = CpalMicrophone::new(config.voice.sample_rate);
    let mut capture = AudioCaptureController::new(Box::new(microphone), config.voice.sample_rate);

    capture.start()?;
    println!("Recording for {duration} seconds...");
    tokio::time::sleep(Duration::from_secs(duration)).await;

    let Some(clip) = capture.stop()?.filter(|clip| !clip.is_empty()) else {
        anyhow::bail!("no audio captured");
    };

    let transcript = backend.transcribe(clip).await?;
    println!("{transcript}");
    Ok(())
}

/// Test microphone input
async fn test_mic(sample_rate: u32, duration: u64) -> anyhow::Result<()> {
    let mut microphone = CpalMicrophone::new(sample_rate);
    let mut chunks = microphone.acquire()?;

    println!(
        "Listening for {duration}s at {} Hz (clips are sent at {sample_rate} Hz)",
        microphone.sample_rate()
    );
    println!("Say something.\n");

    let mut loudest = 0.0f32;
    for second in 1..=duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples: Vec<f32> = std::iter::from_fn(|| chunks.try_recv().ok())
            .flatten()
            .collect();
        let level = calculate_rms(&samples);
        loudest = loudest.max(level);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bar = "#".repeat((level * 100.0).min(40.0) as usize);
        println!("{second:>3}s  {level:.4}  {bar}");
    }

    microphone.release();

    if loudest < 0.001 {
        println!("\nNo signal. Check that the default input device is the microphone you expect.");
    } else {
        println!("\nMicrophone OK (loudest level {loudest:.4})");
    }

    Ok(())
}

/// Root mean square level of a block of samples
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    tokio::task::spawn_blocking(|| {
        let playback = AudioPlayback::new()?;
        println!(
            "Playing a 440 Hz tone for 2s on the default output ({} Hz)",
            playback.sample_rate()
        );
        playback.play(&sine_wave(playback.sample_rate(), 440.0, 2.0))
    })
    .await??;

    println!("Done. If nothing was audible, check the default output device and its volume.");
    Ok(())
}

/// 30% volume sine tone
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn sine_wave(sample_rate: u32, frequency: f32, duration_secs: f32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect()
}
