//! Analysis/synthesis window pairs for the overlap-add pipeline.
//!
//! Each window kind fixes a pair of raised-cosine coefficient triples, the
//! minimum step count the pair supports, and the constant term of the product
//! of the two windows. One side of the pair carries the overlap correction
//! multiplier `1 / (product_constant * steps_per_window)` so that summing the
//! windowed frames at step spacing reconstructs unity gain.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

// ============================================================================
// Window Kinds
// ============================================================================

/// Supported analysis/synthesis window pairings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowKind {
    /// No analysis window, Hann synthesis. Requires 1/2 steps.
    RectHann,
    /// Hann analysis, no synthesis window. Requires 1/2 steps.
    HannRect,
    /// Hann on both sides. Requires 1/4 steps.
    HannHann,
    /// Blackman analysis, Hann synthesis. Requires 1/4 steps.
    BlackmanHann,
    /// Hamming analysis, no synthesis window. Requires 1/2 steps.
    HammingRect,
    /// Hamming analysis, Hann synthesis. Requires 1/4 steps.
    HammingHann,
    /// Hamming analysis, reciprocal-Hamming synthesis. Requires 1/2 steps.
    HammingInvHamming,
}

struct KindInfo {
    min_steps: usize,
    analysis: [f64; 3],
    synthesis: [f64; 3],
    /// Constant term of the product of the two windows: the product of their
    /// constant terms plus half the product of their first cosine
    /// coefficients (reciprocal-Hamming is special: the product is flat).
    product_constant: f64,
}

impl WindowKind {
    fn info(self) -> KindInfo {
        match self {
            WindowKind::RectHann => KindInfo {
                min_steps: 2,
                analysis: [1.0, 0.0, 0.0],
                synthesis: [0.5, -0.5, 0.0],
                product_constant: 0.5,
            },
            WindowKind::HannRect => KindInfo {
                min_steps: 2,
                analysis: [0.5, -0.5, 0.0],
                synthesis: [1.0, 0.0, 0.0],
                product_constant: 0.5,
            },
            WindowKind::HannHann => KindInfo {
                min_steps: 4,
                analysis: [0.5, -0.5, 0.0],
                synthesis: [0.5, -0.5, 0.0],
                product_constant: 0.375,
            },
            WindowKind::BlackmanHann => KindInfo {
                min_steps: 4,
                analysis: [0.42, -0.5, 0.08],
                synthesis: [0.5, -0.5, 0.0],
                product_constant: 0.335,
            },
            WindowKind::HammingRect => KindInfo {
                min_steps: 2,
                analysis: [0.54, -0.46, 0.0],
                synthesis: [1.0, 0.0, 0.0],
                product_constant: 0.54,
            },
            WindowKind::HammingHann => KindInfo {
                min_steps: 4,
                analysis: [0.54, -0.46, 0.0],
                synthesis: [0.5, -0.5, 0.0],
                product_constant: 0.385,
            },
            WindowKind::HammingInvHamming => KindInfo {
                min_steps: 2,
                analysis: [0.54, -0.46, 0.0],
                synthesis: [1.0, 0.0, 0.0],
                product_constant: 1.0,
            },
        }
    }

    /// Smallest steps-per-window the pairing reconstructs correctly with.
    pub fn min_steps(self) -> usize {
        self.info().min_steps
    }
}

// ============================================================================
// Window Pair
// ============================================================================

/// Precomputed analysis and synthesis windows. A `None` side means the frame
/// is used unwindowed (rectangular) on that side.
pub struct WindowPair {
    pub analysis: Option<Vec<f32>>,
    pub synthesis: Option<Vec<f32>>,
}

impl WindowPair {
    /// Build the window pair for a transform size and overlap factor.
    ///
    /// The profile pass never synthesizes output, so it skips the synthesis
    /// window by passing `with_synthesis = false`.
    pub fn new(
        kind: WindowKind,
        window_size: usize,
        steps_per_window: usize,
        with_synthesis: bool,
    ) -> Self {
        let info = kind.info();
        let multiplier = 1.0 / (info.product_constant * steps_per_window as f64);

        let analysis = match kind {
            WindowKind::RectHann => None,
            _ => {
                // When the synthesis side is rectangular, the analysis window
                // carries the overlap correction instead.
                let rectangular_out =
                    matches!(kind, WindowKind::HannRect | WindowKind::HammingRect);
                let m = if rectangular_out { multiplier } else { 1.0 };
                Some(raised_cosine(window_size, info.analysis, m))
            }
        };

        let synthesis = if !with_synthesis {
            None
        } else {
            match kind {
                WindowKind::HannRect | WindowKind::HammingRect => None,
                WindowKind::HammingInvHamming => {
                    // Hamming never falls below 0.08, so the reciprocal is
                    // finite everywhere.
                    let analysis = analysis.as_ref().unwrap();
                    Some(
                        analysis
                            .iter()
                            .map(|&a| (multiplier / a as f64) as f32)
                            .collect(),
                    )
                }
                _ => Some(raised_cosine(window_size, info.synthesis, multiplier)),
            }
        };

        Self {
            analysis,
            synthesis,
        }
    }
}

fn raised_cosine(size: usize, coefficients: [f64; 3], m: f64) -> Vec<f32> {
    let [c0, c1, c2] = coefficients;
    (0..size)
        .map(|i| {
            let phase = 2.0 * PI * i as f64 / size as f64;
            (m * (c0 + c1 * phase.cos() + c2 * (2.0 * phase).cos())) as f32
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
