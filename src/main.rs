use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cadence_voice::audio::{AudioFormat, float_to_pcm16, pcm16_to_bytes};
use cadence_voice::voice::{AudioCaptureEngine, AudioPlaybackEngine};
use cadence_voice::{
    AudioOptions, ConnectionState, SessionObserver, SessionOptions, TranscriptKind,
    VoiceSessionOrchestrator,
};

/// Cadence - real-time voice session client for multimodal AI models
#[derive(Parser)]
#[command(name = "cadence", version, about)]
struct Cli {
    /// API key for the remote model
    #[arg(long, env = "CADENCE_API_KEY")]
    api_key: Option<String>,

    /// Model identity
    #[arg(long, env = "CADENCE_MODEL")]
    model: Option<String>,

    /// Voice for synthesized output
    #[arg(long, env = "CADENCE_VOICE")]
    voice: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run an interactive voice session
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Write the recording to a WAV file
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,
    },
    /// Test speaker output with a generated tone
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,cadence_voice=info",
        1 => "info,cadence_voice=debug",
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
    match cli.command {
        Some(Command::TestMic { duration, output }) => test_mic(duration, output).await,
        Some(Command::TestSpeaker) => test_speaker().await,
        Some(Command::Run) | None => run_session(cli).await,
    }
}

/// Run a live voice session until Ctrl-C or the model ends it
async fn run_session(cli: Cli) -> anyhow::Result<()> {
    let mut options = match cli.api_key {
        Some(key) => SessionOptions::new(key),
        None => SessionOptions::from_env()?,
    };
    if let Some(model) = cli.model {
        options.model = model;
    }
    if let Some(voice) = cli.voice {
        options.voice = voice;
    }

    let ended = Arc::new(AtomicBool::new(false));
    let ended_signal = Arc::clone(&ended);

    let observer = SessionObserver {
        on_state_change: Some(Arc::new(|state: ConnectionState| {
            tracing::info!(%state, "session state");
        })),
        on_transcript: Some(Arc::new(|kind, text| {
            let tag = match kind {
                TranscriptKind::Input => "you",
                TranscriptKind::Output => "model",
                TranscriptKind::Thinking => "thinking",
            };
            println!("[{tag}] {text}");
        })),
        on_level: None,
        on_error: Some(Arc::new(|e| {
            tracing::error!(error = %e, "session error");
        })),
        on_session_end: Some(Arc::new(move || {
            ended_signal.store(true, Ordering::SeqCst);
        })),
    };

    let mut session =
        VoiceSessionOrchestrator::new(options, AudioOptions::default(), observer);

    session.connect().await?;
    session.start_listening().await?;
    println!("Session live. Speak, or press Ctrl-C to end.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = tokio::time::sleep(Duration::from_millis(200)) => {
                if ended.load(Ordering::SeqCst) {
                    println!("Session ended by the model.");
                    break;
                }
            }
        }
    }

    session.dispose().await;
    Ok(())
}

/// Record from the microphone, report the peak level, optionally save a WAV
async fn test_mic(duration: u64, output: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    println!("Recording for {duration} seconds...");

    let audio = AudioOptions::default();
    let chunks: Arc<std::sync::Mutex<Vec<u8>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let peak = Arc::new(std::sync::Mutex::new(0.0f32));

    let chunk_sink = Arc::clone(&chunks);
    let peak_sink = Arc::clone(&peak);

    let mut capture = AudioCaptureEngine::new(audio.input_sample_rate, audio.flush_interval_ms);
    capture
        .start(
            Arc::new(move |chunk| {
                if let Ok(mut buf) = chunk_sink.lock() {
                    buf.extend_from_slice(&chunk.data);
                }
            }),
            Arc::new(move |level| {
                if let Ok(mut p) = peak_sink.lock() {
                    if level > *p {
                        *p = level;
                    }
                }
            }),
            Arc::new(|e| tracing::error!(error = %e, "capture error")),
        )
        .await?;

    tokio::time::sleep(Duration::from_secs(duration)).await;
    capture.stop();

    let pcm = chunks.lock().map(|b| b.clone()).unwrap_or_default();
    let format = AudioFormat::pcm16_mono(audio.input_sample_rate);
    let peak = peak.lock().map(|p| *p).unwrap_or(0.0);
    println!(
        "Captured {}ms of audio, peak level {peak:.3}",
        format.duration_ms(pcm.len())
    );

    if let Some(path) = output {
        write_wav(&path, &pcm, audio.input_sample_rate)?;
        println!("Wrote {}", path.display());
    }

    Ok(())
}

/// Play one second of 440 Hz tone through the playback engine
async fn test_speaker() -> anyhow::Result<()> {
    let audio = AudioOptions::default();
    let rate = audio.output_sample_rate;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..rate)
        .map(|i| {
            let t = i as f32 / rate as f32;
            0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();
    let pcm = pcm16_to_bytes(&float_to_pcm16(&samples));

    let engine = AudioPlaybackEngine::new(AudioFormat::pcm16_mono(rate));
    engine.start_device()?;
    println!("Playing test tone...");
    engine.enqueue(&pcm);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    engine.stop();
    println!("Done.");
    Ok(())
}

/// Write mono PCM16 bytes to a WAV file
fn write_wav(path: &std::path::Path, pcm: &[u8], sample_rate: u32) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for pair in pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
    }
    writer.finalize()?;
    Ok(())
}
