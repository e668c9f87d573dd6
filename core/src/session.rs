use crate::device::{
    compute_baseband_filter_bw_round_down_lt, CallbackStatus, TxDevice, MAX_TXVGA_GAIN_DB,
};
use crate::error::{DeviceError, Result};
use crate::framing::frame;
use crate::fsk::{FskSynthesizer, SynthConfig};
use crate::stream::{FillResult, StreamMonitor, StreamingBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// RF settings for one transmission
#[derive(Debug, Clone, PartialEq)]
pub struct RadioConfig {
    pub center_frequency_hz: u64,
    pub txvga_gain_db: u32,
    /// How often the control loop checks for completion or cancellation
    pub poll_interval: Duration,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            center_frequency_hz: crate::CENTER_FREQUENCY_HZ,
            txvga_gain_db: crate::TXVGA_GAIN_DB,
            poll_interval: Duration::from_millis(crate::POLL_INTERVAL_MS),
        }
    }
}

/// Cooperative stop flag shared between the control loop and whoever
/// receives operator interrupts
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitOutcome {
    /// Every sample plus the trailing silent buffer went out
    Completed,
    /// Stopped early by the cancellation token
    Cancelled,
}

/// Owns a device for the duration of a single transmission
///
/// The device is closed when the transmission ends, so a session is good for
/// one transmission.
pub struct TransmissionSession<D: TxDevice> {
    device: D,
    config: RadioConfig,
    tx_started: bool,
}

impl<D: TxDevice> TransmissionSession<D> {
    pub fn new(device: D, config: RadioConfig) -> Self {
        Self {
            device,
            config,
            tx_started: false,
        }
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// Stream `buffer` to the device and block until it drains or `cancel` fires
    ///
    /// The device is always stopped and closed before returning, even when
    /// the transmission fails part-way.
    pub fn transmit(
        &mut self,
        buffer: StreamingBuffer,
        cancel: &CancellationToken,
    ) -> Result<TransmitOutcome> {
        let sample_rate = buffer.waveform().sample_rate();
        let monitor = buffer.monitor();

        let waited = self
            .start(buffer, sample_rate)
            .map(|_| self.wait(&monitor, cancel));

        let teardown = self.teardown();
        let outcome = match waited? {
            Some(outcome) => outcome,
            None => {
                // The device's own failure, if it reported one, says more
                teardown?;
                return Err(DeviceError::StreamingStopped {
                    sent: monitor.bytes_sent(),
                    total: monitor.total_bytes(),
                }
                .into());
            }
        };
        teardown?;

        log::info!(
            "transmission {:?}: {} of {} bytes sent",
            outcome,
            monitor.bytes_sent(),
            monitor.total_bytes()
        );
        Ok(outcome)
    }

    fn start(&mut self, mut buffer: StreamingBuffer, sample_rate: u32) -> Result<()> {
        let minimum = self.device.min_sample_rate();
        if sample_rate < minimum {
            return Err(DeviceError::SampleRateTooLow {
                requested: sample_rate,
                minimum,
            }
            .into());
        }
        if self.config.txvga_gain_db > MAX_TXVGA_GAIN_DB {
            return Err(DeviceError::InvalidGain(self.config.txvga_gain_db).into());
        }

        let filter_bw = compute_baseband_filter_bw_round_down_lt(sample_rate);
        log::info!(
            "configuring transmitter: {} S/s, filter {} Hz, gain {} dB, {} Hz",
            sample_rate,
            filter_bw,
            self.config.txvga_gain_db,
            self.config.center_frequency_hz
        );

        self.device.set_sample_rate(sample_rate)?;
        self.device.set_baseband_filter_bandwidth(filter_bw)?;
        self.device.set_txvga_gain(self.config.txvga_gain_db)?;
        self.device.start_tx(Box::new(move |out: &mut [u8]| {
            match buffer.fill(out) {
                FillResult::AllSamplesSent => CallbackStatus::Stop,
                _ => CallbackStatus::Continue,
            }
        }))?;
        self.tx_started = true;
        self.device.set_freq(self.config.center_frequency_hz)?;
        Ok(())
    }

    /// Returns `None` if the device stopped streaming before the stream finished
    fn wait(&self, monitor: &StreamMonitor, cancel: &CancellationToken) -> Option<TransmitOutcome> {
        loop {
            if cancel.is_cancelled() {
                log::info!("transmission cancelled");
                return Some(TransmitOutcome::Cancelled);
            }
            if monitor.is_done() {
                return Some(TransmitOutcome::Completed);
            }
            // Done is published before the device drops its streaming flag
            if !self.device.is_streaming() && !monitor.is_done() {
                log::warn!(
                    "device stopped streaming after {} of {} bytes",
                    monitor.bytes_sent(),
                    monitor.total_bytes()
                );
                return None;
            }
            std::thread::sleep(self.config.poll_interval);
        }
    }

    fn teardown(&mut self) -> Result<()> {
        let stop = if std::mem::take(&mut self.tx_started) {
            self.device.stop_tx()
        } else {
            Ok(())
        };
        if let Err(e) = &stop {
            log::warn!("stop_tx failed: {}", e);
        }

        let close = self.device.close();
        if let Err(e) = &close {
            log::warn!("close failed: {}", e);
        }

        stop?;
        close?;
        Ok(())
    }
}

/// Frame, synthesize and transmit `payload` in one call
pub fn transmit_payload<D: TxDevice>(
    device: D,
    payload: &[u8],
    synth: SynthConfig,
    radio: RadioConfig,
    cancel: &CancellationToken,
) -> Result<TransmitOutcome> {
    let packet = frame(payload)?;
    let waveform = FskSynthesizer::new(synth)?.synthesize(&packet)?;
    log::info!(
        "packet {} bytes, waveform {} bytes ({:.3} s)",
        packet.len(),
        waveform.len(),
        waveform.duration_secs()
    );

    let mut session = TransmissionSession::new(device, radio);
    session.transmit(StreamingBuffer::new(waveform), cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CaptureDevice;
    use crate::error::TxError;
    use crate::fsk::Waveform;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Runs the callback inline inside `start_tx` and records every call
    #[derive(Default)]
    struct RecordingDevice {
        calls: Vec<String>,
        transfers: usize,
        fail_freq: bool,
        /// Accept `start_tx` but never pull a buffer
        stall: bool,
    }

    impl TxDevice for RecordingDevice {
        fn min_sample_rate(&self) -> u32 {
            0
        }

        fn set_sample_rate(&mut self, hz: u32) -> std::result::Result<(), DeviceError> {
            self.calls.push(format!("sample_rate {}", hz));
            Ok(())
        }

        fn set_baseband_filter_bandwidth(&mut self, hz: u32) -> std::result::Result<(), DeviceError> {
            self.calls.push(format!("filter {}", hz));
            Ok(())
        }

        fn set_txvga_gain(&mut self, db: u32) -> std::result::Result<(), DeviceError> {
            self.calls.push(format!("gain {}", db));
            Ok(())
        }

        fn set_freq(&mut self, hz: u64) -> std::result::Result<(), DeviceError> {
            self.calls.push(format!("freq {}", hz));
            if self.fail_freq {
                return Err(DeviceError::InvalidFrequency(hz));
            }
            Ok(())
        }

        fn start_tx(&mut self, mut callback: crate::device::TxCallback) -> std::result::Result<(), DeviceError> {
            self.calls.push("start_tx".into());
            if self.stall {
                return Ok(());
            }
            let mut buffer = vec![0u8; 4096];
            while callback(&mut buffer) == CallbackStatus::Continue {
                self.transfers += 1;
            }
            Ok(())
        }

        fn is_streaming(&self) -> bool {
            false
        }

        fn stop_tx(&mut self) -> std::result::Result<(), DeviceError> {
            self.calls.push("stop_tx".into());
            Ok(())
        }

        fn close(&mut self) -> std::result::Result<(), DeviceError> {
            self.calls.push("close".into());
            Ok(())
        }
    }

    /// Puts each buffer on air one transfer period after the callback fills
    /// it. `stop_tx` cancels the transfer still in flight.
    #[derive(Default)]
    struct PipelinedDevice {
        radiated: Arc<Mutex<Vec<Vec<u8>>>>,
        streaming: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
        worker: Option<std::thread::JoinHandle<()>>,
    }

    impl TxDevice for PipelinedDevice {
        fn min_sample_rate(&self) -> u32 {
            0
        }

        fn set_sample_rate(&mut self, _: u32) -> std::result::Result<(), DeviceError> {
            Ok(())
        }

        fn set_baseband_filter_bandwidth(&mut self, _: u32) -> std::result::Result<(), DeviceError> {
            Ok(())
        }

        fn set_txvga_gain(&mut self, _: u32) -> std::result::Result<(), DeviceError> {
            Ok(())
        }

        fn set_freq(&mut self, _: u64) -> std::result::Result<(), DeviceError> {
            Ok(())
        }

        fn start_tx(&mut self, mut callback: crate::device::TxCallback) -> std::result::Result<(), DeviceError> {
            let radiated = Arc::clone(&self.radiated);
            let streaming = Arc::clone(&self.streaming);
            let stop = Arc::clone(&self.stop);
            streaming.store(true, Ordering::Release);

            self.worker = Some(std::thread::spawn(move || {
                let mut buffer = vec![0u8; 4096];
                while callback(&mut buffer) == CallbackStatus::Continue {
                    std::thread::sleep(Duration::from_millis(30));
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    radiated.lock().unwrap().push(buffer.clone());
                }
                streaming.store(false, Ordering::Release);
            }));
            Ok(())
        }

        fn is_streaming(&self) -> bool {
            self.streaming.load(Ordering::Acquire)
        }

        fn stop_tx(&mut self) -> std::result::Result<(), DeviceError> {
            self.stop.store(true, Ordering::Release);
            let worker = self.worker.take().ok_or(DeviceError::NotStreaming)?;
            worker.join().map_err(|_| DeviceError::WorkerPanicked)
        }

        fn close(&mut self) -> std::result::Result<(), DeviceError> {
            Ok(())
        }
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn fast_synth() -> SynthConfig {
        SynthConfig {
            bitrate: 2000,
            samples_per_symbol: 8,
            deviation_hz: 1000,
            invert_bits: false,
        }
    }

    fn fast_radio() -> RadioConfig {
        RadioConfig {
            poll_interval: Duration::from_millis(1),
            ..RadioConfig::default()
        }
    }

    fn waveform_for(payload: &[u8], config: SynthConfig) -> Waveform {
        FskSynthesizer::new(config)
            .unwrap()
            .synthesize(&frame(payload).unwrap())
            .unwrap()
    }

    #[test]
    fn test_session_drives_device_in_order() {
        let waveform = waveform_for(b"A", SynthConfig::default());
        let total = waveform.len();
        let mut session = TransmissionSession::new(RecordingDevice::default(), fast_radio());

        let outcome = session
            .transmit(StreamingBuffer::new(waveform), &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome, TransmitOutcome::Completed);

        let device = session.into_device();
        assert_eq!(
            device.calls,
            vec![
                "sample_rate 2000000",
                "filter 1750000",
                "gain 47",
                "start_tx",
                "freq 869500000",
                "stop_tx",
                "close",
            ]
        );
        // Waveform transfers (last one padded) plus one silent transfer
        assert_eq!(device.transfers, total.div_ceil(4096) + 1);
    }

    #[test]
    fn test_capture_contains_waveform_then_silence() {
        let config = fast_synth();
        let waveform = waveform_for(b"capture", config);
        let expected: Vec<u8> = waveform.samples().iter().map(|&s| s as u8).collect();

        let sink = SharedSink::default();
        let device = CaptureDevice::new(sink.clone())
            .with_transfer_size(512)
            .with_min_sample_rate(0);
        let mut session = TransmissionSession::new(device, fast_radio());

        let outcome = session
            .transmit(StreamingBuffer::new(waveform), &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome, TransmitOutcome::Completed);

        let captured = sink.0.lock().unwrap().clone();
        let padded = expected.len().div_ceil(512) * 512;
        assert_eq!(captured.len(), padded + 512);
        assert_eq!(&captured[..expected.len()], &expected[..]);
        assert!(captured[expected.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_silent_buffer_on_air_before_stop() {
        let waveform = waveform_for(b"A", fast_synth());
        let total = waveform.len();
        let mut session = TransmissionSession::new(PipelinedDevice::default(), fast_radio());

        let outcome = session
            .transmit(StreamingBuffer::new(waveform), &CancellationToken::new())
            .unwrap();
        assert_eq!(outcome, TransmitOutcome::Completed);

        let radiated = session.into_device().radiated.lock().unwrap().clone();
        assert_eq!(radiated.len(), total.div_ceil(4096) + 1);
        let silent = radiated.last().unwrap();
        assert!(silent.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_sink_failure_ends_transmission_with_io_error() {
        let device = CaptureDevice::new(FailingSink)
            .with_transfer_size(512)
            .with_min_sample_rate(0);
        let result = transmit_payload(
            device,
            b"full",
            fast_synth(),
            fast_radio(),
            &CancellationToken::new(),
        );
        assert!(
            matches!(result, Err(TxError::Device(DeviceError::Io(_)))),
            "unexpected result: {:?}",
            result
        );
    }

    #[test]
    fn test_device_that_stops_streaming_is_reported() {
        let waveform = waveform_for(b"x", fast_synth());
        let total = waveform.len();
        let device = RecordingDevice {
            stall: true,
            ..Default::default()
        };
        let mut session = TransmissionSession::new(device, fast_radio());

        let result = session.transmit(StreamingBuffer::new(waveform), &CancellationToken::new());
        match result {
            Err(TxError::Device(DeviceError::StreamingStopped { sent, total: t })) => {
                assert_eq!(sent, 0);
                assert_eq!(t, total);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let calls = session.into_device().calls;
        assert_eq!(&calls[calls.len() - 2..], &["stop_tx", "close"]);
    }

    #[test]
    fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let device = CaptureDevice::discard()
            .with_transfer_size(64)
            .with_realtime(true)
            .with_min_sample_rate(0);
        let outcome = transmit_payload(device, b"stop", fast_synth(), fast_radio(), &cancel).unwrap();
        assert_eq!(outcome, TransmitOutcome::Cancelled);
    }

    #[test]
    fn test_sample_rate_below_device_minimum() {
        let result = transmit_payload(
            CaptureDevice::discard(),
            b"slow",
            fast_synth(),
            fast_radio(),
            &CancellationToken::new(),
        );
        assert!(matches!(
            result,
            Err(TxError::Device(DeviceError::SampleRateTooLow {
                requested: 16_000,
                minimum: 2_000_000
            }))
        ));
    }

    #[test]
    fn test_invalid_gain_rejected_and_device_closed() {
        let radio = RadioConfig {
            txvga_gain_db: 60,
            ..fast_radio()
        };
        let mut session = TransmissionSession::new(RecordingDevice::default(), radio);
        let result = session.transmit(
            StreamingBuffer::new(waveform_for(b"", fast_synth())),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(TxError::Device(DeviceError::InvalidGain(60)))));
        assert_eq!(session.into_device().calls, vec!["close"]);
    }

    #[test]
    fn test_failure_after_start_still_stops_device() {
        let device = RecordingDevice {
            fail_freq: true,
            ..Default::default()
        };
        let mut session = TransmissionSession::new(device, fast_radio());
        let result = session.transmit(
            StreamingBuffer::new(waveform_for(b"x", fast_synth())),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(TxError::Device(DeviceError::InvalidFrequency(_)))));

        let calls = session.into_device().calls;
        assert_eq!(&calls[calls.len() - 2..], &["stop_tx", "close"]);
    }

    #[test]
    fn test_payload_too_large_never_touches_device() {
        let payload = vec![0u8; 300];
        let result = transmit_payload(
            RecordingDevice::default(),
            &payload,
            fast_synth(),
            fast_radio(),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(TxError::PayloadTooLarge { len: 300, .. })));
    }

    #[test]
    fn test_token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
