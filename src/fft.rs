//! Packed real FFT with a bit-reversal permutation table.
//!
//! The transform operates in place on a buffer of `size` floats. The packed
//! spectrum layout is: `buf[0]` holds the (real) DC bin, `buf[1]` holds the
//! (real) Nyquist bin, and bin `k` for `k` in `1..size/2` is the pair
//! `(buf[off], buf[off + 1])` where `off = bit_reversed[k]`. The forward
//! transform leaves frequency pairs in bit-reversed positions; the inverse
//! transform takes a spectrum in *natural* pair order (bin `k` at `buf[2k]`)
//! and leaves time-sample pairs in bit-reversed positions. Callers walk the
//! permutation table in both directions.

use std::f64::consts::PI;

// ============================================================================
// Constants
// ============================================================================

/// Minimum supported transform size.
pub const MIN_FFT_SIZE: usize = 64;

/// Maximum supported transform size.
pub const MAX_FFT_SIZE: usize = 8192;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FftError {
    UnsupportedSize { size: usize },
}

impl std::fmt::Display for FftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FftError::UnsupportedSize { size } => write!(
                f,
                "Unsupported FFT size: {}. Must be a power of 2 between {} and {}",
                size, MIN_FFT_SIZE, MAX_FFT_SIZE
            ),
        }
    }
}

impl std::error::Error for FftError {}

// ============================================================================
// Real FFT
// ============================================================================

/// In-place real-input FFT of power-of-two length.
///
/// Internally the real sequence is treated as `size / 2` complex points, run
/// through a radix-2 transform, and split into the real spectrum. All tables
/// and scratch buffers are allocated once at construction.
pub struct RealFft {
    size: usize,
    half: usize,
    /// Maps natural bin index `k` to the packed buffer offset of its pair.
    bit_reversed: Vec<usize>,
    /// cos/sin(2 pi i / half) for i in 0..half/2, used by the butterflies.
    stage_cos: Vec<f32>,
    stage_sin: Vec<f32>,
    /// cos/sin(pi k / half) for k in 0..half, used by the split step.
    omega_cos: Vec<f32>,
    omega_sin: Vec<f32>,
    scratch_re: Vec<f32>,
    scratch_im: Vec<f32>,
}

impl RealFft {
    /// Create a transform for the given size.
    pub fn new(size: usize) -> Result<Self, FftError> {
        if !size.is_power_of_two() || size < MIN_FFT_SIZE || size > MAX_FFT_SIZE {
            return Err(FftError::UnsupportedSize { size });
        }

        let half = size / 2;

        // Bit reversal over the half-size complex sequence; the public table
        // stores pair offsets (two floats per complex point).
        let mut bit_reversed = vec![0usize; half];
        let mut rev = 0usize;
        for entry in bit_reversed.iter_mut() {
            *entry = rev * 2;
            // Advance `rev` as a reversed binary counter.
            let mut mask = half >> 1;
            while mask > 0 && rev & mask != 0 {
                rev &= !mask;
                mask >>= 1;
            }
            rev |= mask;
        }

        let mut stage_cos = vec![0.0f32; half / 2];
        let mut stage_sin = vec![0.0f32; half / 2];
        for i in 0..half / 2 {
            let angle = 2.0 * PI * i as f64 / half as f64;
            stage_cos[i] = angle.cos() as f32;
            stage_sin[i] = angle.sin() as f32;
        }

        let mut omega_cos = vec![0.0f32; half];
        let mut omega_sin = vec![0.0f32; half];
        for k in 0..half {
            let angle = PI * k as f64 / half as f64;
            omega_cos[k] = angle.cos() as f32;
            omega_sin[k] = angle.sin() as f32;
        }

        Ok(Self {
            size,
            half,
            bit_reversed,
            stage_cos,
            stage_sin,
            omega_cos,
            omega_sin,
            scratch_re: vec![0.0; half],
            scratch_im: vec![0.0; half],
        })
    }

    /// Transform size in samples.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of real-spectrum bins, DC and Nyquist included.
    #[inline]
    pub fn spectrum_size(&self) -> usize {
        self.half + 1
    }

    /// Permutation table mapping natural bin index to packed pair offset.
    #[inline]
    pub fn bit_reversed(&self) -> &[usize] {
        &self.bit_reversed
    }

    /// Forward transform: natural-order time samples in, packed spectrum out.
    pub fn forward(&mut self, buf: &mut [f32]) {
        assert_eq!(buf.len(), self.size);
        let half = self.half;

        for i in 0..half {
            self.scratch_re[i] = buf[2 * i];
            self.scratch_im[i] = buf[2 * i + 1];
        }
        self.transform_scratch(false);

        // Split the half-size complex spectrum into the real spectrum.
        // DC and Nyquist are real; they share the first pair of slots.
        buf[0] = self.scratch_re[0] + self.scratch_im[0];
        buf[1] = self.scratch_re[0] - self.scratch_im[0];

        for k in 1..half {
            let kr = half - k;
            let re_k = self.scratch_re[k];
            let im_k = self.scratch_im[k];
            let re_r = self.scratch_re[kr];
            let im_r = self.scratch_im[kr];

            let even_re = 0.5 * (re_k + re_r);
            let even_im = 0.5 * (im_k - im_r);
            let odd_re = 0.5 * (im_k + im_r);
            let odd_im = -0.5 * (re_k - re_r);

            // Twiddle the odd part by e^(-i pi k / half).
            let c = self.omega_cos[k];
            let s = -self.omega_sin[k];
            let tw_re = odd_re * c - odd_im * s;
            let tw_im = odd_re * s + odd_im * c;

            let off = self.bit_reversed[k];
            buf[off] = even_re + tw_re;
            buf[off + 1] = even_im + tw_im;
        }
    }

    /// Inverse transform: natural-order packed spectrum in, time samples out
    /// with pairs in bit-reversed positions.
    ///
    /// `inverse` undoes `forward` exactly (up to rounding) when the spectrum
    /// is repacked in natural order first.
    pub fn inverse(&mut self, buf: &mut [f32]) {
        assert_eq!(buf.len(), self.size);
        let half = self.half;

        // Merge the real spectrum back into a half-size complex spectrum.
        let dc = buf[0];
        let nyquist = buf[1];
        self.scratch_re[0] = 0.5 * (dc + nyquist);
        self.scratch_im[0] = 0.5 * (dc - nyquist);

        for k in 1..half {
            let kr = half - k;
            let x_re = buf[2 * k];
            let x_im = buf[2 * k + 1];
            let xr_re = buf[2 * kr];
            let xr_im = buf[2 * kr + 1];

            let even_re = 0.5 * (x_re + xr_re);
            let even_im = 0.5 * (x_im - xr_im);
            let diff_re = 0.5 * (x_re - xr_re);
            let diff_im = 0.5 * (x_im + xr_im);

            // Untwiddle by e^(+i pi k / half).
            let c = self.omega_cos[k];
            let s = self.omega_sin[k];
            let odd_re = diff_re * c - diff_im * s;
            let odd_im = diff_re * s + diff_im * c;

            self.scratch_re[k] = even_re - odd_im;
            self.scratch_im[k] = even_im + odd_re;
        }

        self.transform_scratch(true);

        let scale = 1.0 / half as f32;
        for j in 0..half {
            let off = self.bit_reversed[j];
            buf[off] = self.scratch_re[j] * scale;
            buf[off + 1] = self.scratch_im[j] * scale;
        }
    }

    /// Radix-2 complex transform over the scratch buffers.
    fn transform_scratch(&mut self, invert: bool) {
        let half = self.half;
        let re = &mut self.scratch_re;
        let im = &mut self.scratch_im;

        for i in 0..half {
            let j = self.bit_reversed[i] / 2;
            if i < j {
                re.swap(i, j);
                im.swap(i, j);
            }
        }

        let mut len = 2;
        while len <= half {
            let stride = half / len;
            for start in (0..half).step_by(len) {
                let mut tw = 0;
                for k in start..start + len / 2 {
                    let c = self.stage_cos[tw];
                    let s = if invert {
                        self.stage_sin[tw]
                    } else {
                        -self.stage_sin[tw]
                    };
                    let hi = k + len / 2;
                    let t_re = re[hi] * c - im[hi] * s;
                    let t_im = re[hi] * s + im[hi] * c;
                    re[hi] = re[k] - t_re;
                    im[hi] = im[k] - t_im;
                    re[k] += t_re;
                    im[k] += t_im;
                    tw += stride;
                }
            }
            len <<= 1;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
