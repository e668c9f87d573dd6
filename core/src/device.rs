use crate::error::DeviceError;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Lowest sample rate the HackRF front end handles cleanly
pub const HACKRF_MIN_SAMPLE_RATE: u32 = 2_000_000;

/// Highest TX VGA gain accepted by the HackRF
pub const MAX_TXVGA_GAIN_DB: u32 = 47;

/// Tunable range of the HackRF One
pub const MIN_FREQUENCY_HZ: u64 = 1_000_000;
pub const MAX_FREQUENCY_HZ: u64 = 6_000_000_000;

/// Bytes handed to the callback per USB transfer by libhackrf
pub const DEFAULT_TRANSFER_SIZE: usize = 262_144;

/// Baseband filter bandwidths supported by the MAX2837 transceiver, ascending
pub const MAX2837_FILTER_BANDWIDTHS: [u32; 16] = [
    1_750_000, 2_500_000, 3_500_000, 5_000_000, 5_500_000, 6_000_000, 7_000_000, 8_000_000,
    9_000_000, 10_000_000, 12_000_000, 14_000_000, 15_000_000, 20_000_000, 24_000_000,
    28_000_000,
];

/// Largest MAX2837 filter bandwidth strictly below `bandwidth_hz`
///
/// Falls back to the narrowest filter when the request is at or below it.
pub fn compute_baseband_filter_bw_round_down_lt(bandwidth_hz: u32) -> u32 {
    MAX2837_FILTER_BANDWIDTHS
        .iter()
        .rev()
        .copied()
        .find(|&bw| bw < bandwidth_hz)
        .unwrap_or(MAX2837_FILTER_BANDWIDTHS[0])
}

/// What the transfer callback wants the device to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Continue,
    Stop,
}

/// Real-time producer: fill the whole buffer with interleaved cs8 I/Q
pub type TxCallback = Box<dyn FnMut(&mut [u8]) -> CallbackStatus + Send + 'static>;

/// The narrow slice of an SDR transmitter the session drives
pub trait TxDevice {
    fn min_sample_rate(&self) -> u32;

    fn set_sample_rate(&mut self, sample_rate_hz: u32) -> Result<(), DeviceError>;

    fn set_baseband_filter_bandwidth(&mut self, bandwidth_hz: u32) -> Result<(), DeviceError>;

    fn set_txvga_gain(&mut self, gain_db: u32) -> Result<(), DeviceError>;

    fn set_freq(&mut self, frequency_hz: u64) -> Result<(), DeviceError>;

    /// Begin requesting buffers from `callback` on the device's own thread
    fn start_tx(&mut self, callback: TxCallback) -> Result<(), DeviceError>;

    fn is_streaming(&self) -> bool;

    fn stop_tx(&mut self) -> Result<(), DeviceError>;

    fn close(&mut self) -> Result<(), DeviceError>;
}

type Sink = Box<dyn Write + Send>;

/// Software transmitter that records the transmitted stream as raw cs8
///
/// A worker thread requests fixed-size transfers from the callback exactly as
/// libhackrf does and writes each one to the sink. With `realtime` set the
/// worker sleeps for the air time of every transfer.
pub struct CaptureDevice {
    sink: Option<Sink>,
    transfer_size: usize,
    realtime: bool,
    min_sample_rate: u32,
    sample_rate_hz: u32,
    baseband_filter_bw_hz: u32,
    txvga_gain_db: u32,
    frequency_hz: u64,
    streaming: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<std::io::Result<Sink>>>,
    transfers: Arc<AtomicUsize>,
    closed: bool,
}

impl CaptureDevice {
    pub fn new<W: Write + Send + 'static>(sink: W) -> Self {
        Self {
            sink: Some(Box::new(sink)),
            transfer_size: DEFAULT_TRANSFER_SIZE,
            realtime: false,
            min_sample_rate: HACKRF_MIN_SAMPLE_RATE,
            sample_rate_hz: 0,
            baseband_filter_bw_hz: 0,
            txvga_gain_db: 0,
            frequency_hz: 0,
            streaming: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            transfers: Arc::new(AtomicUsize::new(0)),
            closed: false,
        }
    }

    /// Discard everything that is "transmitted"
    pub fn discard() -> Self {
        Self::new(std::io::sink())
    }

    pub fn with_transfer_size(mut self, transfer_size: usize) -> Self {
        self.transfer_size = transfer_size.max(2);
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn with_min_sample_rate(mut self, min_sample_rate: u32) -> Self {
        self.min_sample_rate = min_sample_rate;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn baseband_filter_bandwidth(&self) -> u32 {
        self.baseband_filter_bw_hz
    }

    pub fn txvga_gain(&self) -> u32 {
        self.txvga_gain_db
    }

    pub fn frequency(&self) -> u64 {
        self.frequency_hz
    }

    /// Transfers completed by the worker so far
    pub fn transfers(&self) -> usize {
        self.transfers.load(Ordering::Relaxed)
    }

    fn check_open(&self) -> Result<(), DeviceError> {
        if self.closed {
            Err(DeviceError::Closed)
        } else {
            Ok(())
        }
    }

    fn transfer_duration(&self) -> Duration {
        if self.sample_rate_hz == 0 {
            return Duration::ZERO;
        }
        let pairs = (self.transfer_size / 2) as f64;
        Duration::from_secs_f64(pairs / self.sample_rate_hz as f64)
    }
}

impl TxDevice for CaptureDevice {
    fn min_sample_rate(&self) -> u32 {
        self.min_sample_rate
    }

    fn set_sample_rate(&mut self, sample_rate_hz: u32) -> Result<(), DeviceError> {
        self.check_open()?;
        if sample_rate_hz < self.min_sample_rate {
            return Err(DeviceError::SampleRateTooLow {
                requested: sample_rate_hz,
                minimum: self.min_sample_rate,
            });
        }
        self.sample_rate_hz = sample_rate_hz;
        Ok(())
    }

    fn set_baseband_filter_bandwidth(&mut self, bandwidth_hz: u32) -> Result<(), DeviceError> {
        self.check_open()?;
        self.baseband_filter_bw_hz = bandwidth_hz;
        Ok(())
    }

    fn set_txvga_gain(&mut self, gain_db: u32) -> Result<(), DeviceError> {
        self.check_open()?;
        if gain_db > MAX_TXVGA_GAIN_DB {
            return Err(DeviceError::InvalidGain(gain_db));
        }
        self.txvga_gain_db = gain_db;
        Ok(())
    }

    fn set_freq(&mut self, frequency_hz: u64) -> Result<(), DeviceError> {
        self.check_open()?;
        if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&frequency_hz) {
            return Err(DeviceError::InvalidFrequency(frequency_hz));
        }
        self.frequency_hz = frequency_hz;
        Ok(())
    }

    fn start_tx(&mut self, mut callback: TxCallback) -> Result<(), DeviceError> {
        self.check_open()?;
        if self.worker.is_some() {
            return Err(DeviceError::AlreadyStreaming);
        }
        let mut sink = self.sink.take().ok_or(DeviceError::Closed)?;

        let transfer_size = self.transfer_size;
        let pacing = if self.realtime {
            Some(self.transfer_duration())
        } else {
            None
        };
        let streaming = Arc::clone(&self.streaming);
        let stop = Arc::clone(&self.stop);
        let transfers = Arc::clone(&self.transfers);

        stop.store(false, Ordering::Release);
        streaming.store(true, Ordering::Release);

        let worker = std::thread::Builder::new()
            .name("tx-transfer".into())
            .spawn(move || {
                let mut buffer = vec![0u8; transfer_size];
                let result = (|| {
                    while !stop.load(Ordering::Acquire) {
                        if callback(&mut buffer) == CallbackStatus::Stop {
                            break;
                        }
                        sink.write_all(&buffer)?;
                        transfers.fetch_add(1, Ordering::Relaxed);
                        if let Some(pause) = pacing {
                            std::thread::sleep(pause);
                        }
                    }
                    sink.flush()
                })();
                streaming.store(false, Ordering::Release);
                result.map(|_| sink)
            })?;

        self.worker = Some(worker);
        log::debug!(
            "capture device streaming: {} byte transfers, realtime={}",
            transfer_size,
            self.realtime
        );
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    fn stop_tx(&mut self) -> Result<(), DeviceError> {
        let worker = self.worker.take().ok_or(DeviceError::NotStreaming)?;
        self.stop.store(true, Ordering::Release);
        let sink = worker.join().map_err(|_| DeviceError::WorkerPanicked)??;
        self.sink = Some(sink);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.check_open()?;
        let result = if self.worker.is_some() {
            self.stop_tx()
        } else {
            Ok(())
        };
        self.closed = true;
        self.sink = None;
        result
    }
}

impl Drop for CaptureDevice {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.stop_tx() {
                log::warn!("stop_tx on drop failed: {}", e);
            }
        }
    }
}
