//! UKHASnet-style packet transmitter for SDR hardware
//!
//! Frames a short payload (preamble, sync word, length, CRC), synthesizes it as
//! continuous-phase 2-FSK at complex baseband and streams the interleaved
//! signed 8-bit I/Q to a transmitter through a buffer-fill callback.

pub mod crc;
pub mod device;
pub mod error;
pub mod filter;
pub mod framing;
pub mod fsk;
pub mod session;
pub mod stream;

pub use device::{CallbackStatus, CaptureDevice, TxCallback, TxDevice};
pub use error::{DeviceError, Result, TxError};
pub use framing::{frame, verify, Packet, MAX_LENGTH};
pub use fsk::{FskSynthesizer, SynthConfig, Waveform};
pub use session::{
    transmit_payload, CancellationToken, RadioConfig, TransmissionSession, TransmitOutcome,
};
pub use stream::{FillResult, StreamMonitor, StreamState, StreamingBuffer};

// RF configuration
pub const CENTER_FREQUENCY_HZ: u64 = 869_500_000; // 869.5 MHz
pub const DEVIATION_HZ: u32 = 12_000; // +/- 12 kHz (24 kHz total)
pub const BITRATE: u32 = 2000; // baud
pub const SAMPLES_PER_SYMBOL: u32 = 1000;
pub const SAMPLE_RATE: u32 = BITRATE * SAMPLES_PER_SYMBOL; // 2 MHz, HackRF minimum
pub const INVERT_BITS: bool = false;

// Transmitter settings
pub const TXVGA_GAIN_DB: u32 = 47;
pub const POLL_INTERVAL_MS: u64 = 100;
