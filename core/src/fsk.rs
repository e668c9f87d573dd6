use crate::error::{Result, TxError};
use crate::filter::IqFilter;
use crate::framing::Packet;
use std::f32::consts::TAU;
use std::io::Write;

// Continuous-phase binary FSK at complex baseband
//
// The carrier sits at 0 Hz; a `1` bit rotates the phasor at +deviation and a
// `0` bit at -deviation (swapped when `invert_bits` is set). The phase is
// integrated sample by sample, so there is no discontinuity at symbol edges.
// Each I/Q sample is then smoothed by the FIR in `filter` and quantized to the
// signed 8-bit interleaved format SDR transmitters such as the HackRF expect.

/// Full-scale amplitude of a quantized sample
pub const FULL_SCALE: f32 = 127.0;

/// Silence before the packet is `sample_rate / LEAD_IN_DIVISOR` samples
pub const LEAD_IN_DIVISOR: usize = 16;

/// Silence after the packet is `sample_rate / LEAD_OUT_DIVISOR` samples
pub const LEAD_OUT_DIVISOR: usize = 4;

const CS8_CHUNK: usize = 8192;

/// Modulation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthConfig {
    /// Symbols (bits) per second
    pub bitrate: u32,
    /// Complex samples per bit
    pub samples_per_symbol: u32,
    /// Peak frequency deviation in Hz
    pub deviation_hz: u32,
    /// Swap the tones used for `0` and `1`
    pub invert_bits: bool,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            bitrate: crate::BITRATE,
            samples_per_symbol: crate::SAMPLES_PER_SYMBOL,
            deviation_hz: crate::DEVIATION_HZ,
            invert_bits: crate::INVERT_BITS,
        }
    }
}

impl SynthConfig {
    /// Derived sample rate in Hz
    pub fn sample_rate(&self) -> u64 {
        self.bitrate as u64 * self.samples_per_symbol as u64
    }

    /// Per-sample phase increment magnitude in radians
    pub fn phase_step(&self) -> f32 {
        (TAU as f64 * self.deviation_hz as f64 / self.sample_rate() as f64) as f32
    }

    pub fn lead_in_samples(&self) -> usize {
        self.sample_rate() as usize / LEAD_IN_DIVISOR
    }

    pub fn lead_out_samples(&self) -> usize {
        self.sample_rate() as usize / LEAD_OUT_DIVISOR
    }

    /// Interleaved I/Q byte count of the waveform for a packet of `packet_len` bytes
    pub fn waveform_len(&self, packet_len: usize) -> usize {
        let active = packet_len * 8 * self.samples_per_symbol as usize;
        2 * (self.lead_in_samples() + active + self.lead_out_samples())
    }

    pub fn validate(&self) -> Result<()> {
        if self.bitrate == 0 {
            return Err(TxError::InvalidConfig("bitrate must be non-zero".into()));
        }
        if self.samples_per_symbol == 0 {
            return Err(TxError::InvalidConfig(
                "samples per symbol must be non-zero".into(),
            ));
        }
        if self.sample_rate() > u32::MAX as u64 {
            return Err(TxError::InvalidConfig(format!(
                "sample rate {} Hz does not fit in 32 bits",
                self.sample_rate()
            )));
        }
        if self.deviation_hz == 0 || self.deviation_hz as u64 * 2 >= self.sample_rate() {
            return Err(TxError::InvalidConfig(format!(
                "deviation {} Hz must be non-zero and below Nyquist ({} Hz)",
                self.deviation_hz,
                self.sample_rate() / 2
            )));
        }
        Ok(())
    }
}

/// Phase accumulator producing the unfiltered unit phasor
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    phase: f32,
    step: f32,
    invert_bits: bool,
}

impl ToneGenerator {
    pub fn new(config: &SynthConfig) -> Self {
        Self {
            phase: 0.0,
            step: config.phase_step(),
            invert_bits: config.invert_bits,
        }
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// Signed phase increment used for `bit`
    pub fn step_for(&self, bit: bool) -> f32 {
        if bit != self.invert_bits {
            self.step
        } else {
            -self.step
        }
    }

    /// Current `(cos, sin)` of the phase, then advance by the step for `bit`
    pub fn next_sample(&mut self, bit: bool) -> (f32, f32) {
        let (q, i) = self.phase.sin_cos();
        self.phase += self.step_for(bit);
        (i, q)
    }

    /// Fold the accumulator back into [0, 2pi) to keep f32 precision
    pub fn renormalize(&mut self) {
        self.phase = self.phase.rem_euclid(TAU);
    }
}

/// Quantize a filtered sample to signed 8-bit, truncating towards zero
pub fn quantize(value: f32) -> i8 {
    (value * FULL_SCALE) as i8
}

/// Interleaved signed 8-bit I/Q baseband, read-only once synthesized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Waveform {
    samples: Vec<i8>,
    sample_rate: u32,
}

impl Waveform {
    /// Interleaved `I, Q, I, Q, ...`
    pub fn samples(&self) -> &[i8] {
        &self.samples
    }

    /// Length in interleaved bytes
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// `(I, Q)` pairs
    pub fn sample_pairs(&self) -> impl Iterator<Item = (i8, i8)> + '_ {
        self.samples.chunks_exact(2).map(|pair| (pair[0], pair[1]))
    }

    /// Air time including the silent lead-in and lead-out
    pub fn duration_secs(&self) -> f64 {
        (self.samples.len() / 2) as f64 / self.sample_rate as f64
    }

    /// Write as raw cs8 (the `hackrf_transfer` file format)
    pub fn write_cs8<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        let mut chunk = [0u8; CS8_CHUNK];
        for block in self.samples.chunks(CS8_CHUNK) {
            for (dst, &sample) in chunk.iter_mut().zip(block) {
                *dst = sample as u8;
            }
            writer.write_all(&chunk[..block.len()])?;
        }
        writer.flush()
    }
}

/// Fixed-capacity sample sink. Overrunning the precomputed size is a bug.
struct SampleWriter {
    samples: Vec<i8>,
    cursor: usize,
}

impl SampleWriter {
    fn new(len: usize) -> Self {
        Self {
            samples: vec![0i8; len],
            cursor: 0,
        }
    }

    fn push_pair(&mut self, i: i8, q: i8) -> Result<()> {
        let slot = self
            .samples
            .get_mut(self.cursor..self.cursor + 2)
            .ok_or(TxError::SynthesisBufferExhausted)?;
        slot[0] = i;
        slot[1] = q;
        self.cursor += 2;
        Ok(())
    }

    fn silence(&mut self, pairs: usize) -> Result<()> {
        let end = self.cursor + pairs * 2;
        if end > self.samples.len() {
            return Err(TxError::SynthesisBufferExhausted);
        }
        self.samples[self.cursor..end].fill(0);
        self.cursor = end;
        Ok(())
    }
}

/// Turns framed packets into filtered, quantized FSK baseband
pub struct FskSynthesizer {
    config: SynthConfig,
    filter: IqFilter,
}

impl FskSynthesizer {
    pub fn new(config: SynthConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            filter: IqFilter::new(),
        })
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    /// Synthesize the full waveform for `packet`: lead-in, bits, lead-out
    pub fn synthesize(&mut self, packet: &Packet) -> Result<Waveform> {
        let expected_len = self.config.waveform_len(packet.len());
        let mut out = SampleWriter::new(expected_len);
        let mut tone = ToneGenerator::new(&self.config);
        self.filter.reset();

        out.silence(self.config.lead_in_samples())?;

        for &byte in packet.as_bytes() {
            for b in (0..8).rev() {
                let bit = (byte >> b) & 1 == 1;
                for _ in 0..self.config.samples_per_symbol {
                    let (i, q) = tone.next_sample(bit);
                    let (fi, fq) = self.filter.process(i, q);
                    out.push_pair(quantize(fi), quantize(fq))?;
                }
            }
            tone.renormalize();
        }

        out.silence(self.config.lead_out_samples())?;
        debug_assert_eq!(out.cursor, expected_len);

        log::debug!(
            "synthesized {} bytes of I/Q for a {}-byte packet at {} S/s",
            out.samples.len(),
            packet.len(),
            self.config.sample_rate()
        );

        Ok(Waveform {
            samples: out.samples,
            sample_rate: self.config.sample_rate() as u32,
        })
    }
}
