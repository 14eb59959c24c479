//! Real-time stereo audio denoising core.
//!
//! This library implements a two-pass spectral noise reduction engine: a
//! profile pass tabulates per-band power statistics over reference noise, and
//! a reduce pass gates each frequency band against those statistics, with
//! attack/release smoothing in time, optional smoothing in frequency, and
//! overlap-add resynthesis. A thin stereo façade drives one mono engine per
//! channel and reports the balance angle of each processed block.

use log::debug;

/// Two-pass noise reduction engine and error taxonomy
pub mod engine;
/// Packed real FFT with bit-reversal table
pub mod fft;
/// First-order stereo pre-filters
pub mod filters;
/// Sliding history of transformed frames
pub mod history;
/// Engine configuration
pub mod settings;
/// Noise profile statistics
pub mod stats;
/// Sample sources and sinks
pub mod track;
/// Level conversions, channel plumbing, block post-processing
pub mod utils;
/// Analysis/synthesis window factory
pub mod window;

mod worker;

pub use engine::{DenoiseError, NoiseReduction};
pub use settings::{ClassificationMethod, OutputMode, Settings};
pub use stats::NoiseStatistics;
pub use track::{InputTrack, MemoryInputTrack, MemoryOutputTrack, OutputTrack, TrackError};
pub use window::WindowKind;

use filters::StereoHighPass;

/// One processed stereo block.
pub struct StereoBlock {
    /// Denoised samples, interleaved left/right.
    pub samples: Vec<f32>,
    /// Balance needle angle of the processed block, in degrees.
    pub balance_angle: f32,
}

/// Stereo denoiser over interleaved blocks.
///
/// Holds one mono engine per channel. `profile` learns the noise floor from
/// an interleaved reference buffer; `process_block` de-interleaves a block,
/// reduces each channel against its profile, applies the silence gate, and
/// reports the block's stereo balance angle for the host's needle display.
pub struct StereoDenoiser {
    left: NoiseReduction,
    right: NoiseReduction,
    high_pass: Option<StereoHighPass>,
    silence_chunk: usize,
    silence_threshold_db: f32,
}

impl StereoDenoiser {
    pub fn new(settings: Settings, sample_rate: f64) -> Result<Self, DenoiseError> {
        let left = NoiseReduction::new(settings.clone(), sample_rate)?;
        let right = NoiseReduction::new(settings, sample_rate)?;
        Ok(Self {
            left,
            right,
            high_pass: None,
            silence_chunk: utils::DEFAULT_SILENCE_CHUNK,
            silence_threshold_db: utils::DEFAULT_SILENCE_THRESHOLD_DB,
        })
    }

    /// Run blocks through a first-order high-pass before reduction.
    pub fn with_high_pass(mut self, cutoff_hz: f32) -> Self {
        let sample_rate = self.left.sample_rate() as f32;
        self.high_pass = Some(StereoHighPass::new(cutoff_hz, sample_rate));
        self
    }

    /// Reconfigure the all-or-nothing silence gate applied after reduction.
    pub fn set_silence_gate(&mut self, chunk_size: usize, threshold_db: f32) {
        self.silence_chunk = chunk_size;
        self.silence_threshold_db = threshold_db;
    }

    /// Per-channel engines, for hosts that need direct access.
    pub fn channels(&self) -> (&NoiseReduction, &NoiseReduction) {
        (&self.left, &self.right)
    }

    /// Learn the noise floor from an interleaved stereo reference buffer.
    /// May be called several times to combine several references.
    pub fn profile(&mut self, interleaved: &[f32]) -> Result<(), DenoiseError> {
        let (left, right) = deinterleave(interleaved)?;
        self.left
            .profile_noise(&mut MemoryInputTrack::new(left))?;
        self.right
            .profile_noise(&mut MemoryInputTrack::new(right))?;
        debug!("profiled stereo reference of {} frames", interleaved.len() / 2);
        Ok(())
    }

    /// Denoise one interleaved stereo block against the learned profile.
    pub fn process_block(&mut self, interleaved: &[f32]) -> Result<StereoBlock, DenoiseError> {
        let mut block = interleaved.to_vec();
        if let Some(high_pass) = &mut self.high_pass {
            high_pass.process_buffer(&mut block);
        }

        let (left_in, right_in) = deinterleave(&block)?;
        let left_out = reduce_channel(&mut self.left, left_in)?;
        let right_out = reduce_channel(&mut self.right, right_in)?;

        let mut samples = Vec::new();
        utils::interleave(&left_out, &right_out, &mut samples)
            .map_err(|message| DenoiseError::Track(TrackError::new(message)))?;
        utils::gate_silence(&mut samples, self.silence_chunk, self.silence_threshold_db);

        let (gated_left, gated_right) = deinterleave(&samples)?;
        let balance_angle = utils::balance_angle(&gated_left, &gated_right);

        Ok(StereoBlock {
            samples,
            balance_angle,
        })
    }
}

fn deinterleave(interleaved: &[f32]) -> Result<(Vec<f32>, Vec<f32>), DenoiseError> {
    let mut left = Vec::new();
    let mut right = Vec::new();
    utils::split_interleaved(interleaved, &mut left, &mut right)
        .map_err(|message| DenoiseError::Track(TrackError::new(message)))?;
    Ok((left, right))
}

fn reduce_channel(
    engine: &mut NoiseReduction,
    samples: Vec<f32>,
) -> Result<Vec<f32>, DenoiseError> {
    let mut input = MemoryInputTrack::new(samples);
    let mut output = MemoryOutputTrack::new();
    engine.reduce_noise(&mut input, &mut output)?;
    Ok(output.into_samples())
}
