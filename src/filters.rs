//! First-order stereo pre-filters.
//!
//! Simple RC-style one-pole filters over interleaved stereo buffers, used to
//! trim rumble or hiss from a block before it enters the reduction engine.
//! Each filter keeps independent per-channel state so blocks can be fed
//! back-to-back without clicks.

use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    prev_input: f32,
    prev_output: f32,
}

/// First-order high-pass over interleaved stereo.
pub struct StereoHighPass {
    alpha: f32,
    left: ChannelState,
    right: ChannelState,
}

impl StereoHighPass {
    pub fn new(cutoff_hz: f32, sample_rate: f32) -> Self {
        let rc = 1.0 / (2.0 * PI * cutoff_hz);
        let dt = 1.0 / sample_rate;
        Self {
            alpha: rc / (rc + dt),
            left: ChannelState::default(),
            right: ChannelState::default(),
        }
    }

    /// Filter an interleaved stereo buffer in place.
    pub fn process_buffer(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            frame[0] = Self::step(self.alpha, &mut self.left, frame[0]);
            frame[1] = Self::step(self.alpha, &mut self.right, frame[1]);
        }
    }

    #[inline]
    fn step(alpha: f32, state: &mut ChannelState, input: f32) -> f32 {
        let output = alpha * (state.prev_output + input - state.prev_input);
        state.prev_input = input;
        state.prev_output = output;
        output
    }

    pub fn reset(&mut self) {
        self.left = ChannelState::default();
        self.right = ChannelState::default();
    }
}

/// First-order low-pass over interleaved stereo.
pub struct StereoLowPass {
    alpha: f32,
    left: ChannelState,
    right: ChannelState,
}

impl StereoLowPass {
    pub fn new(cutoff_hz: f32, sample_rate: f32) -> Self {
        let rc = 1.0 / (2.0 * PI * cutoff_hz);
        let dt = 1.0 / sample_rate;
        Self {
            alpha: dt / (rc + dt),
            left: ChannelState::default(),
            right: ChannelState::default(),
        }
    }

    /// Filter an interleaved stereo buffer in place.
    pub fn process_buffer(&mut self, buffer: &mut [f32]) {
        for frame in buffer.chunks_exact_mut(2) {
            frame[0] = Self::step(self.alpha, &mut self.left, frame[0]);
            frame[1] = Self::step(self.alpha, &mut self.right, frame[1]);
        }
    }

    #[inline]
    fn step(alpha: f32, state: &mut ChannelState, input: f32) -> f32 {
        let output = alpha * input + (1.0 - alpha) * state.prev_output;
        state.prev_output = output;
        output
    }

    pub fn reset(&mut self) {
        self.left = ChannelState::default();
        self.right = ChannelState::default();
    }
}

/// First-order band-pass over interleaved stereo: a low-pass into a
/// high-pass, sharing one state pair per channel.
pub struct StereoBandPass {
    low: StereoLowPass,
    high: StereoHighPass,
}

impl StereoBandPass {
    pub fn new(low_cutoff_hz: f32, high_cutoff_hz: f32, sample_rate: f32) -> Self {
        Self {
            low: StereoLowPass::new(high_cutoff_hz, sample_rate),
            high: StereoHighPass::new(low_cutoff_hz, sample_rate),
        }
    }

    /// Filter an interleaved stereo buffer in place.
    pub fn process_buffer(&mut self, buffer: &mut [f32]) {
        self.low.process_buffer(buffer);
        self.high.process_buffer(buffer);
    }

    pub fn reset(&mut self) {
        self.low.reset();
        self.high.reset();
    }
}
