use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use colloquy::audio::{
    AudioCapture, DeviceSink, PlaybackItem, PlaybackQueue, decode_pcm16, TARGET_SAMPLE_RATE,
};
use colloquy::config::ConfigOverrides;
use colloquy::protocol::AudioFormat;
use colloquy::{
    Config, ConsoleClient, ReconnectPolicy, SessionEvent, SessionManager, SessionOptions,
    SocketUrlProvider, StaticSocketUrl, VoiceProfile,
};

/// Colloquy - talk to a conversational AI agent from the terminal
#[derive(Parser)]
#[command(name = "colloquy", version, about)]
struct Cli {
    /// Console API base URL
    #[arg(long, env = "COLLOQUY_CONSOLE_URL")]
    console_url: Option<String>,

    /// Console API key
    #[arg(long, env = "COLLOQUY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Connect directly to this socket URL instead of asking the console
    #[arg(long, env = "COLLOQUY_SOCKET_URL")]
    socket_url: Option<String>,

    /// Voice id or name for the first connection
    #[arg(long)]
    voice: Option<String>,

    /// Conversation language (e.g. "vi", "en", "auto")
    #[arg(long)]
    language: Option<String>,

    /// Text-only mode: no microphone capture, no playback
    #[arg(long, env = "COLLOQUY_DISABLE_AUDIO")]
    disable_audio: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List voices available on the console
    Voices,
    /// List languages the agent supports
    Languages,
    /// Play a short preview of a voice
    Preview {
        /// Voice id
        #[arg(short, long)]
        voice: String,
        /// Text to synthesize
        #[arg(default_value = "Hello! This is a preview of the selected voice.")]
        text: String,
    },
    /// Test microphone input through the frame pipeline
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the captured audio to a WAV file
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,colloquy=info",
        1 => "info,colloquy=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = ConfigOverrides {
        console_url: cli.console_url.clone(),
        api_key: cli.api_key.clone(),
        socket_url: cli.socket_url.clone(),
        voice_id: cli.voice.clone(),
        language: cli.language.clone(),
        disable_audio: cli.disable_audio,
    };
    let config = Config::load(&overrides);
    let console = ConsoleClient::new(
        config.console.base_url.as_str(),
        config.console.api_key.clone(),
    );

    match cli.command {
        Some(Command::Voices) => cmd_voices(&console).await,
        Some(Command::Languages) => cmd_languages(&console).await,
        Some(Command::Preview { voice, text }) => cmd_preview(&console, &voice, &text).await,
        Some(Command::TestMic { duration, output }) => cmd_test_mic(duration, output.as_deref()),
        Some(Command::TestSpeaker) => cmd_test_speaker().await,
        None => converse(config, console).await,
    }
}

/// Run the interactive conversation loop
async fn converse(config: Config, console: ConsoleClient) -> anyhow::Result<()> {
    let voices = console.voices().await;
    let profile = select_profile(&voices, config.voice_id.as_deref());
    println!(
        "voice: {} · language: {}",
        profile.name,
        profile.language.as_deref().unwrap_or("auto")
    );

    let mut session_config = profile.session_config();
    if let Some(lang) = &config.language {
        session_config.language.clone_from(lang);
    }

    let urls: Arc<dyn SocketUrlProvider> = match &config.console.socket_url {
        Some(url) => Arc::new(StaticSocketUrl(url.clone())),
        None => Arc::new(console.clone()),
    };

    let options = SessionOptions {
        config: session_config,
        audio_enabled: config.audio.enabled,
        end_phrases: config.end_phrases.clone(),
        reconnect: ReconnectPolicy::new(
            config.reconnect.max_attempts,
            Duration::from_millis(config.reconnect.base_ms),
            Duration::from_millis(config.reconnect.cap_ms),
        ),
    };
    let (manager, mut events) = SessionManager::new(urls, Box::new(DeviceSink), options);

    // Print the transcript as events arrive
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let ts = chrono::Local::now().format("%H:%M:%S");
            match event {
                SessionEvent::State(state) => println!("[{ts}] ── {state}"),
                SessionEvent::AgentText(text) => println!("[{ts}] agent: {text}"),
                SessionEvent::SystemNotice(text) => println!("[{ts}] system: {text}"),
                SessionEvent::ConversationEnded => {
                    println!("[{ts}] ── conversation ended by agent");
                }
                SessionEvent::RetriesExhausted => {
                    println!("[{ts}] ── connection lost, retries exhausted");
                }
            }
        }
    });

    // Connect up front; a failure here is not fatal, the first send retries
    if let Err(e) = manager.start().await {
        tracing::warn!(error = %e, "initial connect failed");
    }

    println!("type a message, /voices, /voice <id>, or /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                manager.end().await;
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    manager.end().await;
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" || line == "/q" {
                    manager.end().await;
                    break;
                }
                if line == "/voices" {
                    for v in &voices {
                        println!(
                            "  {} · {} · {}",
                            v.id,
                            v.name,
                            v.language.as_deref().unwrap_or("auto")
                        );
                    }
                    continue;
                }
                if let Some(wanted) = line.strip_prefix("/voice ") {
                    switch_voice(&manager, &console, &config, &voices, wanted.trim()).await;
                    continue;
                }
                if let Err(e) = manager.send_text(line).await {
                    println!("unable to send: {e}");
                }
            }
        }
    }

    printer.abort();
    println!("session {}", manager.state());
    Ok(())
}

/// Apply a voice change: reconfigure the session and play a preview
async fn switch_voice(
    manager: &Arc<SessionManager>,
    console: &ConsoleClient,
    config: &Config,
    voices: &[VoiceProfile],
    wanted: &str,
) {
    let Some(profile) = find_profile(voices, wanted) else {
        println!("no such voice: {wanted}");
        return;
    };
    println!(
        "switching to {} · {}",
        profile.name,
        profile.language.as_deref().unwrap_or("auto")
    );

    let mut session_config = profile.session_config();
    if let Some(lang) = &config.language {
        session_config.language.clone_from(lang);
    }
    if let Err(e) = manager.change_voice(session_config).await {
        println!("voice change failed: {e}");
        return;
    }

    // Out-of-band preview; failure never touches the session
    if config.audio.enabled {
        match console
            .preview(&profile.id, "Hello! This is my voice.")
            .await
        {
            Ok(bytes) => play_bytes(bytes, AudioFormat::Mpeg).await,
            Err(e) => tracing::debug!(error = %e, "voice preview unavailable"),
        }
    }
}

fn find_profile(voices: &[VoiceProfile], wanted: &str) -> Option<VoiceProfile> {
    voices
        .iter()
        .find(|v| v.id == wanted || v.name.eq_ignore_ascii_case(wanted))
        .cloned()
}

fn select_profile(voices: &[VoiceProfile], wanted: Option<&str>) -> VoiceProfile {
    wanted
        .and_then(|w| find_profile(voices, w))
        .or_else(|| voices.first().cloned())
        .unwrap_or_else(VoiceProfile::fallback)
}

/// Play one payload through the device and wait for it to finish
async fn play_bytes(bytes: Vec<u8>, format: AudioFormat) {
    let queue = PlaybackQueue::spawn(Box::new(DeviceSink));
    queue.handle().enqueue(PlaybackItem { bytes, format });
    queue.close().await;
}

async fn cmd_voices(console: &ConsoleClient) -> anyhow::Result<()> {
    for v in console.voices().await {
        println!(
            "{} · {} · {}",
            v.id,
            v.name,
            v.language.as_deref().unwrap_or("auto")
        );
    }
    Ok(())
}

async fn cmd_languages(console: &ConsoleClient) -> anyhow::Result<()> {
    for lang in console.languages().await? {
        println!("{} · {}", lang.code, lang.name);
    }
    Ok(())
}

async fn cmd_preview(console: &ConsoleClient, voice: &str, text: &str) -> anyhow::Result<()> {
    let bytes = console.preview(voice, text).await?;
    println!("playing {} bytes...", bytes.len());
    play_bytes(bytes, AudioFormat::Mpeg).await;
    Ok(())
}

/// Capture for a few seconds and report what the frame pipeline produced
fn cmd_test_mic(duration: u64, output: Option<&std::path::Path>) -> anyhow::Result<()> {
    println!("capturing for {duration} seconds, speak into your microphone...");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut capture = AudioCapture::start(tx)?;
    println!("device sample rate: {} Hz", capture.sample_rate());

    std::thread::sleep(Duration::from_secs(duration));
    capture.stop();

    let mut frames = 0usize;
    let mut samples: Vec<f32> = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames += 1;
        samples.extend(decode_pcm16(&frame.data)?);
    }

    println!(
        "{} frames, {} samples (~{:.1}s at {} Hz)",
        frames,
        samples.len(),
        samples.len() as f64 / f64::from(TARGET_SAMPLE_RATE),
        TARGET_SAMPLE_RATE
    );

    if let Some(path) = output {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: TARGET_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &samples {
            #[allow(clippy::cast_possible_truncation)]
            writer.write_sample((sample * 32767.0).clamp(-32768.0, 32767.0) as i16)?;
        }
        writer.finalize()?;
        println!("wrote {}", path.display());
    }

    Ok(())
}

/// Play a short tone through the playback path
async fn cmd_test_speaker() -> anyhow::Result<()> {
    println!("playing test tone...");

    let samples: Vec<i16> = (0..TARGET_SAMPLE_RATE)
        .map(|i| {
            let t = f64::from(i) / f64::from(TARGET_SAMPLE_RATE);
            #[allow(clippy::cast_possible_truncation)]
            let value = ((2.0 * std::f64::consts::PI * 440.0 * t).sin() * 0.3 * 32767.0) as i16;
            value
        })
        .collect();
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    play_bytes(bytes, AudioFormat::Pcm16k).await;
    println!("done");
    Ok(())
}
