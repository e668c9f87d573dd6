//! Linear-phase low-pass FIR used to soften the frequency steps between FSK symbols
//!
//! The filter is symmetric, so only the first half of the taps is stored and
//! the second half mirrors it.

/// Number of taps
pub const FIR_LEN: usize = 16;

/// Stored half of the symmetric tap set (sums to 0.5, so the full set sums to ~1.0)
pub const FIR_COEFFICIENTS: [f32; FIR_LEN / 2] = [
    0.0097049, 0.01456294, 0.02828953, 0.04855131, 0.07186047, 0.09418267, 0.11164295,
    0.12120522,
];

/// Weight for slot `k` of a filter of length `2 * coefficients.len()`
fn tap(coefficients: &[f32], k: usize) -> f32 {
    let half = coefficients.len();
    if k < half {
        coefficients[k]
    } else {
        coefficients[half - 1 - (k - half)]
    }
}

/// Push `sample` into `history` and return the filtered output
///
/// The history is shifted left by one slot, the new sample lands in the last
/// slot, then every slot is weighted by the mirrored coefficient set.
/// `history` must be twice as long as `coefficients`.
pub fn apply(history: &mut [f32], coefficients: &[f32], sample: f32) -> f32 {
    debug_assert_eq!(history.len(), coefficients.len() * 2);

    history.copy_within(1.., 0);
    if let Some(last) = history.last_mut() {
        *last = sample;
    }

    history
        .iter()
        .enumerate()
        .map(|(k, &h)| h * tap(coefficients, k))
        .sum()
}

/// DC gain of the full mirrored tap set
pub fn coefficient_gain(coefficients: &[f32]) -> f32 {
    2.0 * coefficients.iter().sum::<f32>()
}

/// Single-channel smoothing filter with its own history
#[derive(Clone, Debug)]
pub struct SmoothingFilter {
    history: [f32; FIR_LEN],
    coefficients: [f32; FIR_LEN / 2],
}

impl SmoothingFilter {
    pub fn new() -> Self {
        Self::with_coefficients(FIR_COEFFICIENTS)
    }

    pub fn with_coefficients(coefficients: [f32; FIR_LEN / 2]) -> Self {
        Self {
            history: [0.0; FIR_LEN],
            coefficients,
        }
    }

    pub fn process(&mut self, sample: f32) -> f32 {
        apply(&mut self.history, &self.coefficients, sample)
    }

    pub fn reset(&mut self) {
        self.history = [0.0; FIR_LEN];
    }
}

impl Default for SmoothingFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Independent filters for the in-phase and quadrature channels
#[derive(Clone, Debug, Default)]
pub struct IqFilter {
    i: SmoothingFilter,
    q: SmoothingFilter,
}

impl IqFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, i: f32, q: f32) -> (f32, f32) {
        (self.i.process(i), self.q.process(q))
    }

    pub fn reset(&mut self) {
        self.i.reset();
        self.q.reset();
    }
}
