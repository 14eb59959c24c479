//! Per-pass processing worker.
//!
//! A `Worker` drives one track through either the profile pass (statistics
//! gathering) or the reduce pass (classification, gain envelope, resynthesis).
//! It owns every buffer it needs: the FFT, the analysis/synthesis windows,
//! the input slide buffer, the overlap-add accumulator and the sliding frame
//! history. Steady-state processing never allocates.

use crate::engine::DenoiseError;
use crate::fft::RealFft;
use crate::history::HistoryRing;
use crate::settings::{ClassificationMethod, OutputMode, Settings, MIN_SIGNAL_TIME};
use crate::stats::NoiseStatistics;
use crate::track::{InputTrack, OutputTrack};
use crate::utils::db_to_gain;
use crate::window::WindowPair;
use std::f64::consts::LN_10;

/// Samples pulled from the input track per read.
const READ_CHUNK: usize = 500_000;

pub(crate) struct Worker {
    do_profile: bool,

    window_size: usize,
    spectrum_size: usize,
    steps_per_window: usize,
    step_size: usize,

    fft: RealFft,
    fft_buffer: Vec<f32>,
    in_wave_buffer: Vec<f32>,
    out_overlap_buffer: Vec<f32>,
    in_window: Option<Vec<f32>>,
    out_window: Option<Vec<f32>>,

    freq_smoothing_scratch: Vec<f32>,
    freq_smoothing_bins: usize,
    /// Inclusive lower and exclusive upper bin of the affected band.
    bin_low: usize,
    bin_high: usize,

    output_mode: OutputMode,
    method: ClassificationMethod,
    /// Sensitivity with the base-10 to natural log conversion already baked
    /// in; applied once here, never per classification.
    new_sensitivity: f64,
    old_sensitivity_factor: f32,

    noise_atten_factor: f32,
    one_block_attack: f32,
    one_block_release: f32,

    windows_to_examine: usize,
    center: usize,
    history_len: usize,
    history: HistoryRing,

    in_sample_count: i64,
    out_step_count: i64,
    in_wave_pos: usize,
}

impl Worker {
    pub(crate) fn new(
        settings: &Settings,
        sample_rate: f64,
        do_profile: bool,
        selection: Option<(f64, f64)>,
    ) -> Result<Self, DenoiseError> {
        settings.validate()?;

        let window_size = settings.window_size();
        let spectrum_size = settings.spectrum_size();
        let steps_per_window = settings.steps_per_window();
        let step_size = settings.step_size();

        let fft = RealFft::new(window_size)?;
        let windows = WindowPair::new(
            settings.window_kind,
            window_size,
            steps_per_window,
            !do_profile,
        );

        let noise_gain = -settings.noise_gain_db;
        let n_attack_blocks = 1 + (settings.attack_time * sample_rate / step_size as f64) as usize;
        let n_release_blocks =
            1 + (settings.release_time * sample_rate / step_size as f64) as usize;
        // The floor applies to amplitudes; the per-block decays split the same
        // drop across the attack and release spans.
        let noise_atten_factor = db_to_gain(noise_gain as f32);
        let one_block_attack = db_to_gain((noise_gain / n_attack_blocks as f64) as f32);
        let one_block_release = db_to_gain((noise_gain / n_release_blocks as f64) as f32);
        // Old sensitivity applies to power.
        let old_sensitivity_factor = 10f64.powf(settings.old_sensitivity / 10.0) as f32;

        let windows_to_examine = match settings.method {
            ClassificationMethod::Legacy => {
                ((MIN_SIGNAL_TIME * sample_rate / step_size as f64) as usize).max(2)
            }
            _ => 1 + steps_per_window,
        };
        let center = windows_to_examine / 2;
        debug_assert!(center >= 1, "release needs a slot ahead of center");

        let history_len = if do_profile {
            windows_to_examine
        } else {
            // Room for inspecting the middle and for attack processing.
            windows_to_examine.max(center + n_attack_blocks)
        };

        let (bin_low, bin_high) = match selection {
            Some((low_hz, high_hz)) => {
                let bin_width = sample_rate / window_size as f64;
                let low = ((low_hz / bin_width).floor().max(0.0) as usize).min(spectrum_size);
                let high = (((high_hz / bin_width).ceil()).max(0.0) as usize).min(spectrum_size);
                (low, high)
            }
            None => (0, spectrum_size),
        };

        Ok(Self {
            do_profile,
            window_size,
            spectrum_size,
            steps_per_window,
            step_size,
            fft,
            fft_buffer: vec![0.0; window_size],
            in_wave_buffer: vec![0.0; window_size],
            out_overlap_buffer: vec![0.0; window_size],
            in_window: windows.analysis,
            out_window: windows.synthesis,
            freq_smoothing_scratch: vec![0.0; spectrum_size],
            freq_smoothing_bins: settings.freq_smoothing_bands,
            bin_low,
            bin_high,
            output_mode: settings.output_mode,
            method: settings.method,
            new_sensitivity: settings.new_sensitivity * LN_10,
            old_sensitivity_factor,
            noise_atten_factor,
            one_block_attack,
            one_block_release,
            windows_to_examine,
            center,
            history_len,
            history: HistoryRing::new(history_len, spectrum_size),
            in_sample_count: 0,
            out_step_count: 0,
            in_wave_pos: 0,
        })
    }

    /// Run one whole track through this worker's pass.
    pub(crate) fn process_one(
        &mut self,
        stats: &mut NoiseStatistics,
        input: &mut dyn InputTrack,
        mut output: Option<&mut (dyn OutputTrack + '_)>,
    ) -> Result<(), DenoiseError> {
        self.start_new_track();

        let mut chunk = vec![0.0f32; READ_CHUNK];
        loop {
            let read = input.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            self.in_sample_count += read as i64;
            self.process_samples(stats, &chunk[..read], output.as_deref_mut())?;
        }

        if self.do_profile {
            stats.finish_track();
        } else {
            // Keep flushing silence through the history until exactly as many
            // steps have been emitted as the input covered. The final step may
            // overshoot by less than one step size; the trim below removes it.
            let silence = vec![0.0f32; self.step_size];
            while self.out_step_count * (self.step_size as i64) < self.in_sample_count {
                self.process_samples(stats, &silence, output.as_deref_mut())?;
            }
            if let Some(out) = output {
                out.set_end(input.len())?;
            }
        }

        Ok(())
    }

    fn start_new_track(&mut self) {
        self.history.reset(self.noise_atten_factor);
        self.out_overlap_buffer.fill(0.0);
        self.in_wave_buffer.fill(0.0);

        if self.do_profile {
            // Leading zero-padded windows would skew the statistics.
            self.in_wave_pos = 0;
            self.out_step_count = -((self.history_len - 1) as i64);
        } else {
            // Prime the queue with zero-padded windows, the first carrying one
            // step of wave data. The counter starts low enough to pass both
            // the history fill and the padded windows before output begins.
            self.in_wave_pos = self.window_size - self.step_size;
            self.out_step_count =
                -((self.history_len - 1) as i64) - ((self.steps_per_window - 1) as i64);
        }

        self.in_sample_count = 0;
    }

    fn process_samples(
        &mut self,
        stats: &mut NoiseStatistics,
        mut buffer: &[f32],
        mut output: Option<&mut (dyn OutputTrack + '_)>,
    ) -> Result<(), DenoiseError> {
        while !buffer.is_empty()
            && self.out_step_count * (self.step_size as i64) < self.in_sample_count
        {
            let available = buffer.len().min(self.window_size - self.in_wave_pos);
            self.in_wave_buffer[self.in_wave_pos..self.in_wave_pos + available]
                .copy_from_slice(&buffer[..available]);
            buffer = &buffer[available..];
            self.in_wave_pos += available;

            if self.in_wave_pos == self.window_size {
                self.transform_frame();
                if self.do_profile {
                    self.gather_statistics(stats);
                } else {
                    self.reduce_frame(stats, output.as_deref_mut())?;
                }
                self.out_step_count += 1;
                self.history.rotate();

                // Slide the input window by one step.
                self.in_wave_buffer.copy_within(self.step_size.., 0);
                self.in_wave_pos -= self.step_size;
            }
        }
        Ok(())
    }

    /// Window the filled input buffer, transform it, and unpack the packed
    /// spectrum into the newest history record.
    fn transform_frame(&mut self) {
        match &self.in_window {
            Some(window) => {
                for ((dst, &src), &w) in self
                    .fft_buffer
                    .iter_mut()
                    .zip(self.in_wave_buffer.iter())
                    .zip(window.iter())
                {
                    *dst = src * w;
                }
            }
            None => self.fft_buffer.copy_from_slice(&self.in_wave_buffer),
        }

        self.fft.forward(&mut self.fft_buffer);

        let last = self.spectrum_size - 1;
        let table = self.fft.bit_reversed();
        let record = self.history.record_mut(0);
        for k in 1..last {
            let off = table[k];
            let re = self.fft_buffer[off];
            let im = self.fft_buffer[off + 1];
            record.real[k] = re;
            record.imag[k] = im;
            record.spectrum[k] = re * re + im * im;
        }
        // DC and Nyquist share the record's index-0 slots.
        let dc = self.fft_buffer[0];
        record.real[0] = dc;
        record.spectrum[0] = dc * dc;
        let nyquist = self.fft_buffer[1];
        record.imag[0] = nyquist;
        record.spectrum[last] = nyquist * nyquist;

        if !self.do_profile && self.output_mode != OutputMode::IsolateNoise {
            // Every gain starts at the reduction floor until classification
            // decides to raise it.
            record.gains.fill(self.noise_atten_factor);
        }
    }

    fn gather_statistics(&self, stats: &mut NoiseStatistics) {
        stats.accumulate(&self.history.record(0).spectrum);

        if self.method == ClassificationMethod::Legacy {
            // The legacy threshold per band is the highest level sustained for
            // a full neighborhood in a row: a max of mins.
            for band in 0..self.spectrum_size {
                let mut min = self.history.record(0).spectrum[band];
                for i in 1..self.history_len {
                    min = min.min(self.history.record(i).spectrum[band]);
                }
                stats.raise_noise_threshold(band, min);
            }
        }
    }

    /// True iff the band of the center window looks like noise, judged over
    /// the neighborhood of partly overlapping windows.
    fn classify(&self, stats: &NoiseStatistics, band: usize) -> bool {
        match self.method {
            ClassificationMethod::Legacy => {
                let mut min = self.history.record(0).spectrum[band];
                for i in 1..self.windows_to_examine {
                    min = min.min(self.history.record(i).spectrum[band]);
                }
                min <= self.old_sensitivity_factor * stats.noise_threshold()[band]
            }
            // The new methods suppose an exponential distribution of noise
            // power; the quantile function makes the threshold a multiple of
            // the band mean.
            ClassificationMethod::Median if self.windows_to_examine > 3 => {
                if self.windows_to_examine > 5 {
                    debug_assert!(false, "median supports at most 5 windows");
                    return true;
                }
                // Rank three of the neighborhood, so a single excursion in
                // either direction cannot flip the decision.
                let mut greatest = 0.0f32;
                let mut second = 0.0f32;
                let mut third = 0.0f32;
                for i in 0..self.windows_to_examine {
                    let power = self.history.record(i).spectrum[band];
                    if power >= greatest {
                        third = second;
                        second = greatest;
                        greatest = power;
                    } else if power >= second {
                        third = second;
                        second = power;
                    } else if power >= third {
                        third = power;
                    }
                }
                (third as f64) <= self.new_sensitivity * stats.means()[band] as f64
            }
            // Second greatest: throw out the one high outlier. Also serves
            // the median method for neighborhoods of three or fewer.
            _ => {
                let mut greatest = 0.0f32;
                let mut second = 0.0f32;
                for i in 0..self.windows_to_examine {
                    let power = self.history.record(i).spectrum[band];
                    if power >= greatest {
                        second = greatest;
                        greatest = power;
                    } else if power >= second {
                        second = power;
                    }
                }
                (second as f64) <= self.new_sensitivity * stats.means()[band] as f64
            }
        }
    }

    fn reduce_frame(
        &mut self,
        stats: &NoiseStatistics,
        output: Option<&mut (dyn OutputTrack + '_)>,
    ) -> Result<(), DenoiseError> {
        // Decide the center frame's gains. Outside the selected band nothing
        // is treated as noise.
        if self.output_mode == OutputMode::IsolateNoise {
            for band in 0..self.spectrum_size {
                let keep =
                    band >= self.bin_low && band < self.bin_high && self.classify(stats, band);
                self.history.record_mut(self.center).gains[band] = if keep { 1.0 } else { 0.0 };
            }
        } else {
            for band in 0..self.spectrum_size {
                if band < self.bin_low || band >= self.bin_high || !self.classify(stats, band) {
                    self.history.record_mut(self.center).gains[band] = 1.0;
                }
            }
        }

        if self.output_mode != OutputMode::IsolateNoise {
            // Attack: walk backward in time, toward older slots, flooring each
            // gain with the decay from its newer neighbor. Stop as soon as the
            // curve intersects one placed by an earlier frame.
            for band in 0..self.spectrum_size {
                for i in self.center + 1..self.history_len {
                    let floor = (self.history.record(i - 1).gains[band] * self.one_block_attack)
                        .max(self.noise_atten_factor);
                    let gain = &mut self.history.record_mut(i).gains[band];
                    if *gain < floor {
                        *gain = floor;
                    } else {
                        break;
                    }
                }
            }

            // Release: only one window ahead; this slot is visited again on
            // the next step, which carries the decay further.
            for band in 0..self.spectrum_size {
                let floor = (self.history.record(self.center).gains[band] * self.one_block_release)
                    .max(self.noise_atten_factor);
                let gain = &mut self.history.record_mut(self.center - 1).gains[band];
                if *gain < floor {
                    *gain = floor;
                }
            }
        }

        if self.out_step_count >= -((self.steps_per_window - 1) as i64) {
            let oldest = self.history_len - 1;
            let last = self.spectrum_size - 1;

            if self.output_mode != OutputMode::IsolateNoise && self.freq_smoothing_bins > 0 {
                // Gains are never below the attenuation floor here, so the
                // log-space average stays finite.
                let record = self.history.record_mut(oldest);
                apply_freq_smoothing(
                    &mut record.gains,
                    &mut self.freq_smoothing_scratch,
                    self.freq_smoothing_bins,
                );
            }

            // Apply the gains to the stored bins, repacked in natural order
            // for the inverse transform.
            {
                let record = self.history.record(oldest);
                if self.output_mode == OutputMode::LeaveResidue {
                    // Subtract the gain from one and negate, flipping the
                    // phase so the residual is heard.
                    for k in 1..last {
                        let gain = record.gains[k] - 1.0;
                        self.fft_buffer[2 * k] = record.real[k] * gain;
                        self.fft_buffer[2 * k + 1] = record.imag[k] * gain;
                    }
                    self.fft_buffer[0] = record.real[0] * (record.gains[0] - 1.0);
                    self.fft_buffer[1] = record.imag[0] * (record.gains[last] - 1.0);
                } else {
                    for k in 1..last {
                        let gain = record.gains[k];
                        self.fft_buffer[2 * k] = record.real[k] * gain;
                        self.fft_buffer[2 * k + 1] = record.imag[k] * gain;
                    }
                    self.fft_buffer[0] = record.real[0] * record.gains[0];
                    self.fft_buffer[1] = record.imag[0] * record.gains[last];
                }
            }

            self.fft.inverse(&mut self.fft_buffer);

            // Overlap-add the bit-reversed time pairs, synthesis-windowed
            // when the pair has a synthesis side.
            let table = self.fft.bit_reversed();
            match &self.out_window {
                Some(window) => {
                    for j in 0..last {
                        let off = table[j];
                        self.out_overlap_buffer[2 * j] += self.fft_buffer[off] * window[2 * j];
                        self.out_overlap_buffer[2 * j + 1] +=
                            self.fft_buffer[off + 1] * window[2 * j + 1];
                    }
                }
                None => {
                    for j in 0..last {
                        let off = table[j];
                        self.out_overlap_buffer[2 * j] += self.fft_buffer[off];
                        self.out_overlap_buffer[2 * j + 1] += self.fft_buffer[off + 1];
                    }
                }
            }

            if self.out_step_count >= 0 {
                if let Some(out) = output {
                    // The first step of the overlap buffer is complete.
                    out.append(&self.out_overlap_buffer[..self.step_size])?;
                }
            }

            // Shift the remainder over and clear the tail.
            self.out_overlap_buffer.copy_within(self.step_size.., 0);
            self.out_overlap_buffer[self.window_size - self.step_size..].fill(0.0);
        }

        Ok(())
    }
}

/// Average gain multipliers geometrically over a bin neighborhood. The logs
/// are averaged rather than multiplying and taking an nth root, which would
/// underflow when chaining many small gains.
fn apply_freq_smoothing(gains: &mut [f32], scratch: &mut [f32], radius: usize) {
    if radius == 0 {
        return;
    }

    for gain in gains.iter_mut() {
        *gain = gain.ln();
    }

    let len = gains.len();
    for (i, slot) in scratch.iter_mut().enumerate().take(len) {
        let lo = i.saturating_sub(radius);
        let hi = (i + radius).min(len - 1);
        let mut acc = 0.0f32;
        for &g in &gains[lo..=hi] {
            acc += g;
        }
        *slot = acc / (hi - lo + 1) as f32;
    }

    for (gain, &smoothed) in gains.iter_mut().zip(scratch.iter()) {
        *gain = smoothed.exp();
    }
}

// ============================================================================
// Tests
// ============================================================================
