//! Engine configuration.
//!
//! A `Settings` value is immutable once handed to the engine. The window and
//! step sizes are expressed as choice indices the way the host UI exposes
//! them; `window_size()` and `steps_per_window()` resolve them to sample
//! counts.

use crate::engine::DenoiseError;
use crate::fft::{MAX_FFT_SIZE, MIN_FFT_SIZE};
use crate::window::WindowKind;
use serde::{Deserialize, Serialize};

/// Neighborhood span, in seconds, the legacy classifier inspects.
pub(crate) const MIN_SIGNAL_TIME: f64 = 0.05;

/// How a band is judged to be noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassificationMethod {
    /// Rank statistic over the neighborhood; falls back to second-greatest
    /// for neighborhoods of three windows or fewer.
    Median,
    /// Throw out the single high outlier and compare the runner-up.
    SecondGreatest,
    /// Minimum over the neighborhood against the profiled max-of-mins
    /// threshold. Requires a profile pass run with this method.
    Legacy,
}

/// What the reduce pass writes to the output track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    /// Suppress classified-noise bands down to the residual floor.
    ReduceNoise,
    /// Keep only the classified-noise bands.
    IsolateNoise,
    /// Emit the phase-flipped difference between input and reduced output.
    LeaveResidue,
}

/// Immutable configuration consumed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub window_kind: WindowKind,
    /// Window size is `1 << (3 + choice)`; the default 8 selects 2048.
    pub window_size_choice: u32,
    /// Steps per window is `1 << (choice + 1)`; the default 1 selects 4.
    pub steps_per_window_choice: u32,
    pub method: ClassificationMethod,
    /// Base-10 log sensitivity for the median/second-greatest methods.
    pub new_sensitivity: f64,
    /// Base-10 log over power for the legacy method.
    pub old_sensitivity: f64,
    /// Residual floor below unity, in positive dB.
    pub noise_gain_db: f64,
    /// Gain onset time in seconds.
    pub attack_time: f64,
    /// Gain decay time in seconds.
    pub release_time: f64,
    /// Radius in bins of the frequency-domain gain smoothing; 0 disables it.
    pub freq_smoothing_bands: usize,
    pub output_mode: OutputMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            window_kind: WindowKind::HannHann,
            window_size_choice: 8,
            steps_per_window_choice: 1,
            method: ClassificationMethod::SecondGreatest,
            new_sensitivity: 6.0,
            old_sensitivity: 0.0,
            noise_gain_db: 25.0,
            attack_time: 0.02,
            release_time: 0.10,
            freq_smoothing_bands: 0,
            output_mode: OutputMode::ReduceNoise,
        }
    }
}

impl Settings {
    /// Transform size in samples.
    #[inline]
    pub fn window_size(&self) -> usize {
        1usize << (3 + self.window_size_choice)
    }

    /// Frames per window span.
    #[inline]
    pub fn steps_per_window(&self) -> usize {
        1usize << (self.steps_per_window_choice + 1)
    }

    /// Hop between successive frames.
    #[inline]
    pub fn step_size(&self) -> usize {
        self.window_size() / self.steps_per_window()
    }

    /// Number of real-spectrum bins, DC and Nyquist included.
    #[inline]
    pub fn spectrum_size(&self) -> usize {
        self.window_size() / 2 + 1
    }

    /// Check every field against its plausible range.
    pub fn validate(&self) -> Result<(), DenoiseError> {
        if self.window_size_choice > 16 {
            return Err(DenoiseError::InvalidSettings(format!(
                "Window size choice {} out of range",
                self.window_size_choice
            )));
        }
        let window_size = self.window_size();
        if window_size < MIN_FFT_SIZE || window_size > MAX_FFT_SIZE {
            return Err(DenoiseError::InvalidSettings(format!(
                "Window size {} outside supported range [{}, {}]",
                window_size, MIN_FFT_SIZE, MAX_FFT_SIZE
            )));
        }

        if self.steps_per_window_choice > 8 {
            return Err(DenoiseError::InvalidSettings(format!(
                "Steps-per-window choice {} out of range",
                self.steps_per_window_choice
            )));
        }
        let steps = self.steps_per_window();
        if steps < self.window_kind.min_steps() {
            return Err(DenoiseError::InvalidSettings(format!(
                "{:?} requires at least {} steps per window, got {}",
                self.window_kind,
                self.window_kind.min_steps(),
                steps
            )));
        }
        if steps > window_size {
            return Err(DenoiseError::InvalidSettings(format!(
                "Steps per window {} exceeds window size {}",
                steps, window_size
            )));
        }

        if !self.new_sensitivity.is_finite() || self.new_sensitivity <= 0.0 {
            return Err(DenoiseError::InvalidSettings(format!(
                "Sensitivity {} must be finite and positive",
                self.new_sensitivity
            )));
        }
        if !self.old_sensitivity.is_finite() {
            return Err(DenoiseError::InvalidSettings(format!(
                "Old sensitivity {} must be finite",
                self.old_sensitivity
            )));
        }
        if !self.noise_gain_db.is_finite() || self.noise_gain_db <= 0.0 || self.noise_gain_db > 48.0
        {
            return Err(DenoiseError::InvalidSettings(format!(
                "Noise gain {} dB outside (0, 48]",
                self.noise_gain_db
            )));
        }
        for (name, value) in [("attack", self.attack_time), ("release", self.release_time)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(DenoiseError::InvalidSettings(format!(
                    "{} time {} s outside [0, 1]",
                    name, value
                )));
            }
        }
        if self.freq_smoothing_bands >= self.spectrum_size() {
            return Err(DenoiseError::InvalidSettings(format!(
                "Frequency smoothing radius {} too wide for {} bins",
                self.freq_smoothing_bands,
                self.spectrum_size()
            )));
        }

        Ok(())
    }
}
