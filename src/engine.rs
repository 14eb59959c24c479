//! Two-pass noise reduction engine.
//!
//! `NoiseReduction` owns the settings and the accumulated noise statistics
//! and exposes the two passes: `profile_noise` learns the noise from one or
//! more reference tracks, `reduce_noise` filters a track against the learned
//! profile. Each call constructs a fresh `Worker` for the pass and borrows
//! the statistics for its duration.

use crate::fft::FftError;
use crate::settings::{ClassificationMethod, Settings};
use crate::stats::NoiseStatistics;
use crate::track::{InputTrack, OutputTrack, TrackError};
use crate::worker::Worker;
use log::debug;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum DenoiseError {
    /// A profile pass gathered no windows at all.
    ProfileTooShort,
    /// Reduction requested before any successful profile pass.
    NoProfile,
    /// A settings field is out of its plausible range.
    InvalidSettings(String),
    /// The legacy method needs thresholds only a legacy profile maintains.
    UnsupportedMethod,
    /// Forwarded from the input source or output sink.
    Track(TrackError),
}

impl std::fmt::Display for DenoiseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenoiseError::ProfileTooShort => {
                write!(f, "Selected noise profile is too short")
            }
            DenoiseError::NoProfile => {
                write!(f, "No noise profile has been gathered yet")
            }
            DenoiseError::InvalidSettings(message) => {
                write!(f, "Invalid settings: {}", message)
            }
            DenoiseError::UnsupportedMethod => {
                write!(
                    f,
                    "Legacy classification requires a profile gathered with the legacy method"
                )
            }
            DenoiseError::Track(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for DenoiseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DenoiseError::Track(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TrackError> for DenoiseError {
    fn from(err: TrackError) -> Self {
        DenoiseError::Track(err)
    }
}

impl From<FftError> for DenoiseError {
    fn from(err: FftError) -> Self {
        DenoiseError::InvalidSettings(err.to_string())
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Two-pass spectral noise reduction over single-channel tracks.
pub struct NoiseReduction {
    settings: Settings,
    sample_rate: f64,
    selection: Option<(f64, f64)>,
    statistics: NoiseStatistics,
}

impl NoiseReduction {
    pub fn new(settings: Settings, sample_rate: f64) -> Result<Self, DenoiseError> {
        settings.validate()?;
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(DenoiseError::InvalidSettings(format!(
                "Sample rate {} must be finite and positive",
                sample_rate
            )));
        }

        let statistics = NoiseStatistics::new(settings.spectrum_size());
        Ok(Self {
            settings,
            sample_rate,
            selection: None,
            statistics,
        })
    }

    #[inline]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Accumulated profile statistics.
    #[inline]
    pub fn statistics(&self) -> &NoiseStatistics {
        &self.statistics
    }

    /// Replace the settings without discarding the gathered profile. The
    /// transform geometry must stay the same; changing the window size needs
    /// a new engine and a fresh profile.
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), DenoiseError> {
        settings.validate()?;
        if settings.spectrum_size() != self.settings.spectrum_size() {
            return Err(DenoiseError::InvalidSettings(format!(
                "Window size change from {} to {} invalidates the profile",
                self.settings.window_size(),
                settings.window_size()
            )));
        }
        self.settings = settings;
        Ok(())
    }

    /// Restrict classification and gain changes to the band between the two
    /// frequencies; everything outside passes through untouched.
    pub fn select_frequency_band(&mut self, low_hz: f64, high_hz: f64) -> Result<(), DenoiseError> {
        if !low_hz.is_finite() || !high_hz.is_finite() || low_hz < 0.0 || low_hz >= high_hz {
            return Err(DenoiseError::InvalidSettings(format!(
                "Frequency band [{}, {}) is not a valid selection",
                low_hz, high_hz
            )));
        }
        self.selection = Some((low_hz, high_hz));
        Ok(())
    }

    /// Affect the whole spectrum again.
    pub fn clear_frequency_band(&mut self) {
        self.selection = None;
    }

    /// Accumulate noise statistics from a reference track. May be called
    /// several times; tracks combine weighted by their window counts.
    pub fn profile_noise(&mut self, track: &mut dyn InputTrack) -> Result<(), DenoiseError> {
        let windows_before = self.statistics.total_windows();

        let mut worker = Worker::new(&self.settings, self.sample_rate, true, self.selection)?;
        if let Err(err) = worker.process_one(&mut self.statistics, track, None) {
            // Half-profiled sums must not leak into a later track's means.
            self.statistics.abandon_track();
            return Err(err);
        }

        let gathered = self.statistics.total_windows() - windows_before;
        if gathered == 0 {
            return Err(DenoiseError::ProfileTooShort);
        }

        debug!(
            "profiled {} windows ({} total)",
            gathered,
            self.statistics.total_windows()
        );
        Ok(())
    }

    /// Filter a track against the gathered profile, writing the result to
    /// the output track. The output ends with exactly as many samples as the
    /// input provided.
    pub fn reduce_noise(
        &mut self,
        input: &mut dyn InputTrack,
        output: &mut dyn OutputTrack,
    ) -> Result<(), DenoiseError> {
        if self.statistics.total_windows() == 0 {
            return Err(DenoiseError::NoProfile);
        }
        if self.settings.method == ClassificationMethod::Legacy
            && !self.statistics.legacy_profiled()
        {
            return Err(DenoiseError::UnsupportedMethod);
        }

        let samples = input.len();
        let mut worker = Worker::new(&self.settings, self.sample_rate, false, self.selection)?;
        worker.process_one(&mut self.statistics, input, Some(output))?;

        debug!("reduced {} samples", samples);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::OutputMode;
    use crate::track::{MemoryInputTrack, MemoryOutputTrack};
    use crate::utils::rms;
    use num_complex::Complex32;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use rustfft::FftPlanner;
    use std::f32::consts::PI;

    const RATE: f64 = 44100.0;

    fn sine(freq: f32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / RATE as f32).sin())
            .collect()
    }

    fn gaussian_noise(len: usize, sigma: f32, seed: u64) -> Vec<f32> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..len)
            .map(|_| {
                let u1: f32 = rng.gen_range(1e-7f32..1.0);
                let u2: f32 = rng.gen_range(0.0f32..1.0);
                sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
            })
            .collect()
    }

    fn profiled_engine(settings: Settings, noise: &[f32]) -> NoiseReduction {
        let mut engine = NoiseReduction::new(settings, RATE).unwrap();
        let mut track = MemoryInputTrack::from_slice(noise);
        engine.profile_noise(&mut track).unwrap();
        engine
    }

    fn reduce(engine: &mut NoiseReduction, input: &[f32]) -> Vec<f32> {
        let mut track = MemoryInputTrack::from_slice(input);
        let mut output = MemoryOutputTrack::new();
        engine.reduce_noise(&mut track, &mut output).unwrap();
        output.into_samples()
    }

    struct FailingInput;

    impl InputTrack for FailingInput {
        fn len(&self) -> usize {
            44100
        }
        fn read(&mut self, _buf: &mut [f32]) -> Result<usize, TrackError> {
            Err(TrackError::new("device unplugged"))
        }
    }

    /// Yields a few windows' worth of samples, then fails.
    struct StallingInput {
        reads_left: usize,
    }

    impl InputTrack for StallingInput {
        fn len(&self) -> usize {
            44100
        }
        fn read(&mut self, buf: &mut [f32]) -> Result<usize, TrackError> {
            if self.reads_left == 0 {
                return Err(TrackError::new("device unplugged"));
            }
            self.reads_left -= 1;
            let count = buf.len().min(4096);
            buf[..count].fill(0.25);
            Ok(count)
        }
    }

    struct FailingOutput;

    impl OutputTrack for FailingOutput {
        fn append(&mut self, _samples: &[f32]) -> Result<(), TrackError> {
            Err(TrackError::new("disk full"))
        }
        fn set_end(&mut self, _len: usize) -> Result<(), TrackError> {
            Ok(())
        }
    }

    #[test]
    fn new_rejects_invalid_settings() {
        let settings = Settings {
            noise_gain_db: -3.0,
            ..Settings::default()
        };
        assert!(matches!(
            NoiseReduction::new(settings, RATE),
            Err(DenoiseError::InvalidSettings(_))
        ));

        assert!(matches!(
            NoiseReduction::new(Settings::default(), 0.0),
            Err(DenoiseError::InvalidSettings(_))
        ));
    }

    #[test]
    fn reduce_before_profile_fails() {
        let mut engine = NoiseReduction::new(Settings::default(), RATE).unwrap();
        let mut input = MemoryInputTrack::new(sine(440.0, 4096, 0.5));
        let mut output = MemoryOutputTrack::new();
        assert!(matches!(
            engine.reduce_noise(&mut input, &mut output),
            Err(DenoiseError::NoProfile)
        ));
    }

    #[test]
    fn short_profile_fails_and_leaves_statistics_untouched() {
        let mut engine = NoiseReduction::new(Settings::default(), RATE).unwrap();

        let mut empty = MemoryInputTrack::new(Vec::new());
        assert!(matches!(
            engine.profile_noise(&mut empty),
            Err(DenoiseError::ProfileTooShort)
        ));

        // Shorter than one window: no frame ever fills.
        let mut short = MemoryInputTrack::new(vec![0.1; 1000]);
        assert!(matches!(
            engine.profile_noise(&mut short),
            Err(DenoiseError::ProfileTooShort)
        ));
        assert_eq!(engine.statistics().total_windows(), 0);
        assert!(engine.statistics().sums().iter().all(|&s| s == 0.0));

        // A proper profile still works afterwards.
        let mut noise = MemoryInputTrack::new(gaussian_noise(44100, 0.01, 1));
        engine.profile_noise(&mut noise).unwrap();
        assert!(engine.statistics().total_windows() > 0);
    }

    #[test]
    fn output_length_matches_input_exactly() {
        let mut engine =
            profiled_engine(Settings::default(), &gaussian_noise(44100, 0.01, 2));

        let input = gaussian_noise(100_000, 0.01, 3);
        let output = reduce(&mut engine, &input);
        assert_eq!(output.len(), 100_000);

        // Also for lengths that do not divide the step size.
        let input = gaussian_noise(10_001, 0.01, 4);
        let output = reduce(&mut engine, &input);
        assert_eq!(output.len(), 10_001);
    }

    #[test]
    fn silence_profile_passes_signal_through() {
        // Profiling digital silence yields all-zero means, so any band that
        // carries energy is classified as signal and passes at unity gain.
        let mut engine = profiled_engine(Settings::default(), &vec![0.0; 44100]);
        assert!(engine.statistics().total_windows() > 0);

        let input = sine(440.0, 44100, 0.5);
        let output = reduce(&mut engine, &input);
        assert_eq!(output.len(), input.len());

        let mut worst = 0.0f32;
        for (&x, &y) in input.iter().zip(output.iter()) {
            worst = worst.max((x - y).abs());
        }
        assert!(worst < 5e-3, "worst deviation {}", worst);

        // Successive output samples move no faster than the input does.
        let max_input_slope = input
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0f32, f32::max);
        let max_output_slope = output
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0f32, f32::max);
        assert!(max_output_slope <= max_input_slope + 1e-3);

        // Silence in, silence out.
        let silent = reduce(&mut engine, &vec![0.0; 22050]);
        assert!(rms(&silent) < 1e-6);
    }

    #[test]
    fn broadband_noise_is_attenuated_to_the_floor() {
        let mut engine =
            profiled_engine(Settings::default(), &gaussian_noise(88200, 0.01, 10));

        let input = gaussian_noise(44100, 0.01, 11);
        let output = reduce(&mut engine, &input);

        let in_rms = rms(&input[4096..40000]);
        let out_rms = rms(&output[4096..40000]);
        // The gate holds every band at the 25 dB floor, give or take the odd
        // excursion that classifies as signal.
        assert!(out_rms < 0.1 * in_rms, "rms {} vs {}", out_rms, in_rms);
        assert!(out_rms > 0.02 * in_rms, "rms {} vs {}", out_rms, in_rms);
    }

    #[test]
    fn sine_survives_reduction_and_snr_improves() {
        let noise = gaussian_noise(88200, 0.01, 20);
        let mut engine = profiled_engine(Settings::default(), &noise);

        // A clean sine keeps essentially all of its energy.
        let clean = sine(1000.0, 44100, 0.5);
        let reduced_clean = reduce(&mut engine, &clean);
        let clean_rms = rms(&clean);
        let reduced_rms = rms(&reduced_clean);
        assert!(
            reduced_rms >= 0.98 * clean_rms,
            "rms {} vs {}",
            reduced_rms,
            clean_rms
        );

        // Mixing in the profiled noise and reducing recovers most of the SNR.
        let mix: Vec<f32> = clean
            .iter()
            .zip(noise.iter())
            .map(|(&s, &n)| s + n)
            .collect();
        let reduced_mix = reduce(&mut engine, &mix);

        let span = 8192..36000;
        let noise_in = rms(
            &mix[span.clone()]
                .iter()
                .zip(clean[span.clone()].iter())
                .map(|(&m, &c)| m - c)
                .collect::<Vec<f32>>(),
        );
        let noise_out = rms(
            &reduced_mix[span.clone()]
                .iter()
                .zip(clean[span.clone()].iter())
                .map(|(&m, &c)| m - c)
                .collect::<Vec<f32>>(),
        );
        let improvement_db = 20.0 * (noise_in / noise_out).log10();
        assert!(improvement_db > 15.0, "improvement {} dB", improvement_db);
    }

    #[test]
    fn residue_complements_reduction() {
        let noise = gaussian_noise(88200, 0.01, 30);
        let input: Vec<f32> = sine(660.0, 44100, 0.4)
            .iter()
            .zip(noise[..44100].iter())
            .map(|(&s, &n)| s + n)
            .collect();

        let mut reducer = profiled_engine(Settings::default(), &noise);
        let reduced = reduce(&mut reducer, &input);

        let residue_settings = Settings {
            output_mode: OutputMode::LeaveResidue,
            ..Settings::default()
        };
        let mut residuer = profiled_engine(residue_settings, &noise);
        let residue = reduce(&mut residuer, &input);

        // The residual is emitted phase-flipped, so subtracting it from the
        // reduced output reconstructs the input.
        let mut worst = 0.0f32;
        for i in 0..input.len() {
            let rebuilt = reduced[i] - residue[i];
            worst = worst.max((rebuilt - input[i]).abs());
        }
        assert!(worst < 2e-3, "worst deviation {}", worst);
    }

    #[test]
    fn isolate_noise_keeps_selected_band_only() {
        let noise = gaussian_noise(88200, 0.05, 40);
        let settings = Settings {
            output_mode: OutputMode::IsolateNoise,
            ..Settings::default()
        };
        let mut engine = profiled_engine(settings, &noise);
        engine.select_frequency_band(1000.0, 3000.0).unwrap();

        let input = gaussian_noise(44100, 0.05, 41);
        let output = reduce(&mut engine, &input);
        assert_eq!(output.len(), input.len());

        // Spectrum of a mid-track slice: energy must sit inside the band.
        let slice = &output[16384..16384 + 4096];
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(4096);
        let mut buf: Vec<Complex32> = slice
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let w = 0.5 - 0.5 * (2.0 * PI * i as f32 / 4096.0).cos();
                Complex32::new(s * w, 0.0)
            })
            .collect();
        fft.process(&mut buf);

        let hz_per_bin = RATE as f32 / 4096.0;
        let mut in_band = 0.0f32;
        let mut out_of_band = 0.0f32;
        for (k, value) in buf.iter().enumerate().take(2048) {
            let freq = k as f32 * hz_per_bin;
            let power = value.norm_sqr();
            if (900.0..=3100.0).contains(&freq) {
                in_band += power;
            } else {
                out_of_band += power;
            }
        }
        assert!(in_band > 0.0);
        assert!(
            out_of_band < 0.1 * (in_band + out_of_band),
            "out of band fraction {}",
            out_of_band / (in_band + out_of_band)
        );
    }

    #[test]
    fn isolate_noise_without_selection_passes_noise() {
        let noise = gaussian_noise(88200, 0.05, 50);
        let settings = Settings {
            output_mode: OutputMode::IsolateNoise,
            ..Settings::default()
        };
        let mut engine = profiled_engine(settings, &noise);

        let input = gaussian_noise(44100, 0.05, 51);
        let output = reduce(&mut engine, &input);

        // Everything classifies as noise, so isolation keeps everything.
        let in_rms = rms(&input[4096..40000]);
        let out_rms = rms(&output[4096..40000]);
        assert!(out_rms > 0.9 * in_rms, "rms {} vs {}", out_rms, in_rms);
    }

    #[test]
    fn multi_track_profiles_combine_weighted_by_windows() {
        let track_a = gaussian_noise(44100, 0.01, 60);
        let track_b = gaussian_noise(88200, 0.03, 61);

        let engine_a = profiled_engine(Settings::default(), &track_a);
        let engine_b = profiled_engine(Settings::default(), &track_b);
        let windows_a = engine_a.statistics().total_windows();
        let windows_b = engine_b.statistics().total_windows();

        let mut combined = NoiseReduction::new(Settings::default(), RATE).unwrap();
        combined
            .profile_noise(&mut MemoryInputTrack::from_slice(&track_a))
            .unwrap();
        combined
            .profile_noise(&mut MemoryInputTrack::from_slice(&track_b))
            .unwrap();

        assert_eq!(
            combined.statistics().total_windows(),
            windows_a + windows_b
        );

        let means_a = engine_a.statistics().means();
        let means_b = engine_b.statistics().means();
        for (band, &mean) in combined.statistics().means().iter().enumerate() {
            let expected = (means_a[band] as f64 * windows_a as f64
                + means_b[band] as f64 * windows_b as f64)
                / (windows_a + windows_b) as f64;
            assert!(
                (mean as f64 - expected).abs() <= 1e-6 * expected.max(1e-12),
                "band {}: {} vs {}",
                band,
                mean,
                expected
            );
            assert!(mean >= 0.0);
        }
    }

    #[test]
    fn legacy_method_profiles_and_reduces() {
        let settings = Settings {
            method: ClassificationMethod::Legacy,
            ..Settings::default()
        };
        let noise = gaussian_noise(88200, 0.01, 70);
        let mut engine = profiled_engine(settings, &noise);
        assert!(engine.statistics().legacy_profiled());
        assert!(engine
            .statistics()
            .noise_threshold()
            .iter()
            .any(|&t| t > 0.0));

        let input = gaussian_noise(22050, 0.01, 71);
        let output = reduce(&mut engine, &input);
        assert_eq!(output.len(), input.len());
    }

    #[test]
    fn legacy_reduction_needs_a_legacy_profile() {
        let mut engine =
            profiled_engine(Settings::default(), &gaussian_noise(44100, 0.01, 80));

        // Switching the method after a non-legacy profile must fail fast.
        engine
            .update_settings(Settings {
                method: ClassificationMethod::Legacy,
                ..Settings::default()
            })
            .unwrap();

        let mut input = MemoryInputTrack::new(gaussian_noise(8192, 0.01, 81));
        let mut output = MemoryOutputTrack::new();
        assert!(matches!(
            engine.reduce_noise(&mut input, &mut output),
            Err(DenoiseError::UnsupportedMethod)
        ));
    }

    #[test]
    fn update_settings_rejects_window_geometry_changes() {
        let mut engine = NoiseReduction::new(Settings::default(), RATE).unwrap();
        let result = engine.update_settings(Settings {
            window_size_choice: 7,
            ..Settings::default()
        });
        assert!(matches!(result, Err(DenoiseError::InvalidSettings(_))));

        // Same geometry, different knobs: fine.
        engine
            .update_settings(Settings {
                noise_gain_db: 12.0,
                ..Settings::default()
            })
            .unwrap();
    }

    #[test]
    fn source_and_sink_failures_propagate() {
        let mut engine =
            profiled_engine(Settings::default(), &gaussian_noise(44100, 0.01, 90));

        assert!(matches!(
            engine.profile_noise(&mut FailingInput),
            Err(DenoiseError::Track(_))
        ));

        let mut input = MemoryInputTrack::new(gaussian_noise(44100, 0.01, 91));
        assert!(matches!(
            engine.reduce_noise(&mut input, &mut FailingOutput),
            Err(DenoiseError::Track(_))
        ));
    }

    #[test]
    fn failed_profile_does_not_pollute_the_statistics() {
        let mut engine = NoiseReduction::new(Settings::default(), RATE).unwrap();

        // The source yields a window's worth of loud samples, then dies.
        assert!(matches!(
            engine.profile_noise(&mut StallingInput { reads_left: 1 }),
            Err(DenoiseError::Track(_))
        ));
        assert_eq!(engine.statistics().total_windows(), 0);
        assert!(engine.statistics().sums().iter().all(|&s| s == 0.0));

        // A clean profile afterwards sees only its own track.
        let noise = gaussian_noise(44100, 0.01, 92);
        engine
            .profile_noise(&mut MemoryInputTrack::from_slice(&noise))
            .unwrap();
        let clean = profiled_engine(Settings::default(), &noise);
        assert_eq!(
            engine.statistics().total_windows(),
            clean.statistics().total_windows()
        );
        for (&a, &b) in engine
            .statistics()
            .means()
            .iter()
            .zip(clean.statistics().means().iter())
        {
            assert!((a - b).abs() <= 1e-9_f32.max(1e-6 * b.abs()));
        }
    }

    #[test]
    fn selection_validation() {
        let mut engine = NoiseReduction::new(Settings::default(), RATE).unwrap();
        assert!(engine.select_frequency_band(3000.0, 1000.0).is_err());
        assert!(engine.select_frequency_band(-10.0, 1000.0).is_err());
        assert!(engine.select_frequency_band(1000.0, f64::NAN).is_err());
        engine.select_frequency_band(1000.0, 3000.0).unwrap();
        engine.clear_frequency_band();
    }
}
