use thiserror::Error;

#[derive(Debug, Error)]
pub enum TxError {
    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Synthesis wrote past the precomputed waveform capacity")]
    SynthesisBufferExhausted,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("Invalid preamble")]
    InvalidPreamble,

    #[error("Invalid sync word: 0x{0:04X}")]
    InvalidSyncWord(u16),

    #[error("Length byte says {declared} payload bytes but frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

/// Failures reported by a transmit device. The core never retries these.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Sample rate {requested} Hz below device minimum of {minimum} Hz")]
    SampleRateTooLow { requested: u32, minimum: u32 },

    #[error("TX VGA gain {0} dB out of range (0-47)")]
    InvalidGain(u32),

    #[error("Frequency {0} Hz outside tunable range")]
    InvalidFrequency(u64),

    #[error("Device is already streaming")]
    AlreadyStreaming,

    #[error("Device is not streaming")]
    NotStreaming,

    #[error("Device has been closed")]
    Closed,

    #[error("Device stopped streaming after {sent} of {total} bytes")]
    StreamingStopped { sent: usize, total: usize },

    #[error("Transfer worker panicked")]
    WorkerPanicked,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TxError>;
