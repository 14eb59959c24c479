//! Channel plumbing and block-level helpers shared by the stereo façade:
//! level measures, interleave conversions, the balance needle and the
//! silence gate.

use std::f32::consts::LN_10;

/// Default chunk length for the silence gate.
pub const DEFAULT_SILENCE_CHUNK: usize = 512;

/// Default silence gate threshold in dB.
pub const DEFAULT_SILENCE_THRESHOLD_DB: f32 = -46.0;

// ============================================================================
// Level Measures
// ============================================================================

/// Linear amplitude gain for a dB figure.
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    (db * (LN_10 / 20.0)).exp()
}

/// Root-mean-square level of a channel. Energy is accumulated in double
/// precision so quiet stretches of a long buffer still register.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f64 = samples.iter().map(|&s| s as f64 * s as f64).sum();
    (energy / samples.len() as f64).sqrt() as f32
}

/// Peak level of one gate chunk in dB. A silent chunk reads as -inf, which
/// drags the block mean down and trips the gate.
fn chunk_peak_db(chunk: &[f32]) -> f32 {
    let peak = chunk.iter().fold(0.0f32, |p, &s| p.max(s.abs()));
    20.0 * peak.log10()
}

// ============================================================================
// Channel Plumbing
// ============================================================================

/// Split an interleaved stereo buffer into left and right channels.
/// The buffer must hold an even number of samples.
pub fn split_interleaved(
    interleaved: &[f32],
    left: &mut Vec<f32>,
    right: &mut Vec<f32>,
) -> Result<(), &'static str> {
    if interleaved.len() % 2 != 0 {
        return Err("Interleaved buffer must have an even number of samples");
    }

    let frames = interleaved.len() / 2;
    left.clear();
    right.clear();
    left.reserve(frames);
    right.reserve(frames);
    for frame in interleaved.chunks_exact(2) {
        left.push(frame[0]);
        right.push(frame[1]);
    }
    Ok(())
}

/// Interleave left and right channels of equal length.
pub fn interleave(left: &[f32], right: &[f32], out: &mut Vec<f32>) -> Result<(), &'static str> {
    if left.len() != right.len() {
        return Err("Channels must have the same length");
    }

    out.clear();
    out.reserve(left.len() * 2);
    for (&l, &r) in left.iter().zip(right.iter()) {
        out.push(l);
        out.push(r);
    }
    Ok(())
}

// ============================================================================
// Block Post-Processing
// ============================================================================

/// Stereo balance of a processed block as a needle angle in degrees.
///
/// The per-channel RMS difference is normalized by the RMS sum and scaled to
/// plus or minus 90 degrees; positive means the right channel is louder.
/// Empty or silent input reads as 0.
pub fn balance_angle(left: &[f32], right: &[f32]) -> f32 {
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let left_rms = rms(left);
    let right_rms = rms(right);
    let sum = left_rms + right_rms;
    if sum == 0.0 {
        return 0.0;
    }

    (right_rms - left_rms) / sum * 90.0
}

/// Zero out a block whose mean chunk peak level falls below a dB threshold.
///
/// The buffer is measured in `chunk_size` spans; each span contributes its
/// peak level in dB, and the whole block is muted when the mean of those
/// levels is below `threshold_db`. An all-or-nothing gate: blocks above the
/// threshold pass through untouched.
pub fn gate_silence(buffer: &mut [f32], chunk_size: usize, threshold_db: f32) {
    if buffer.is_empty() || chunk_size == 0 {
        return;
    }

    let mut db_sum = 0.0f32;
    let mut chunks = 0usize;
    for chunk in buffer.chunks(chunk_size) {
        db_sum += chunk_peak_db(chunk);
        chunks += 1;
    }

    if db_sum / (chunks as f32) < threshold_db {
        buffer.fill(0.0);
    }
}
