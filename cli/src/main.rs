use clap::Parser;
use hound::WavSpec;
use std::ffi::OsString;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use ukhasnet_tx_core::{
    frame, CancellationToken, CaptureDevice, FskSynthesizer, RadioConfig, StreamingBuffer,
    SynthConfig, TransmissionSession, TransmitOutcome, TxError, Waveform,
};

#[derive(Parser)]
#[command(name = "ukhasnet-tx")]
#[command(about = "Transmit a single UKHASnet packet as 2-FSK I/Q")]
struct Cli {
    /// Packet payload, sent byte for byte (max 255 bytes)
    #[arg(value_name = "PAYLOAD")]
    payload: OsString,

    /// Centre frequency in Hz
    #[arg(short, long, default_value_t = ukhasnet_tx_core::CENTER_FREQUENCY_HZ)]
    frequency: u64,

    /// TX VGA gain in dB (0-47)
    #[arg(short, long, default_value_t = ukhasnet_tx_core::TXVGA_GAIN_DB)]
    gain: u32,

    /// Symbol rate in baud
    #[arg(long, default_value_t = ukhasnet_tx_core::BITRATE)]
    bitrate: u32,

    /// I/Q samples per symbol (sample rate = bitrate * samples per symbol)
    #[arg(long, default_value_t = ukhasnet_tx_core::SAMPLES_PER_SYMBOL)]
    samples_per_symbol: u32,

    /// Peak frequency deviation in Hz
    #[arg(long, default_value_t = ukhasnet_tx_core::DEVIATION_HZ)]
    deviation: u32,

    /// Swap the mark and space tones
    #[arg(long)]
    invert_bits: bool,

    /// Record the transmitted cs8 stream to this file
    #[arg(short, long, value_name = "FILE.CS8")]
    output: Option<PathBuf>,

    /// Pace transfers at the sample rate instead of as fast as possible
    #[arg(long)]
    realtime: bool,

    /// Export the waveform as a stereo 8-bit WAV (I left, Q right) and exit
    #[arg(long, value_name = "FILE.WAV")]
    wav: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Tx(#[from] TxError),

    #[error("WAV export failed: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transmit task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let payload = cli.payload.into_encoded_bytes();
    let synth = SynthConfig {
        bitrate: cli.bitrate,
        samples_per_symbol: cli.samples_per_symbol,
        deviation_hz: cli.deviation,
        invert_bits: cli.invert_bits,
    };

    let packet = frame(&payload)?;
    eprintln!("{}", packet.to_hex());

    let waveform = FskSynthesizer::new(synth)?.synthesize(&packet)?;
    info!(
        "Synthesized {} I/Q bytes at {} S/s ({:.3} s on air)",
        waveform.len(),
        waveform.sample_rate(),
        waveform.duration_secs()
    );

    if let Some(path) = &cli.wav {
        write_wav(path, &waveform)?;
        info!("Wrote {}", path.display());
        return Ok(());
    }

    let device = match &cli.output {
        Some(path) => CaptureDevice::new(BufWriter::new(File::create(path)?)),
        None => CaptureDevice::discard(),
    }
    .with_realtime(cli.realtime);

    let radio = RadioConfig {
        center_frequency_hz: cli.frequency,
        txvga_gain_db: cli.gain,
        ..RadioConfig::default()
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));

    let outcome = tokio::task::spawn_blocking(move || {
        let mut session = TransmissionSession::new(device, radio);
        session.transmit(StreamingBuffer::new(waveform), &cancel)
    })
    .await??;

    match outcome {
        TransmitOutcome::Completed => info!("Packet sent"),
        TransmitOutcome::Cancelled => warn!("Transmission interrupted"),
    }
    if let Some(path) = &cli.output {
        info!("Captured stream in {}", path.display());
    }
    Ok(())
}

/// Cancel the transmission on Ctrl-C or SIGTERM
#[cfg(unix)]
async fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Caught interrupt"),
        _ = terminate.recv() => info!("Caught SIGTERM"),
    }
    cancel.cancel();
}

#[cfg(not(unix))]
async fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Caught interrupt");
        cancel.cancel();
    }
}

fn write_wav(path: &Path, waveform: &Waveform) -> Result<(), CliError> {
    let spec = WavSpec {
        channels: 2,
        sample_rate: waveform.sample_rate(),
        bits_per_sample: 8,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in waveform.samples() {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}
