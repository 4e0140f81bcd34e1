//! Pairwise registration of adjacent tiles.
//!
//! Estimates how far a neighbor deviates from its nominal position using only
//! the overlap strips of the two tiles:
//!
//! 1. Normalize both strips to zero mean and unit variance
//! 2. Phase-correlate and take the strongest peaks
//! 3. Score every wrap-around reading of every peak by normalized
//!    cross-correlation and keep the best
//! 4. Add the sub-pixel peak fit, then polish with Lucas-Kanade
//!
//! Featureless strips never fail: they come back with zero displacement and
//! zero confidence so the solver can reject the edge.

pub mod overlap;
pub mod phase_correlation;
pub mod refine;


use common::Buffer2;
use glam::DVec2;

use crate::config::RegistrationConfig;
pub use overlap::{Direction, OverlapGeometry, TileStrips};
use phase_correlation::PhaseCorrelator;

/// Strips narrower than this are not registered.
pub const MIN_STRIP_SIZE: usize = 4;

/// Minimum overlap, as a fraction of the strip area, for a candidate shift.
const MIN_OVERLAP_FRACTION: f64 = 0.25;

/// Outcome of registering one adjacent pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairRegistration {
    /// Measured deviation of the downstream tile from its nominal offset.
    pub displacement: DVec2,
    /// Normalized cross-correlation of the aligned strips, in [0, 1].
    pub confidence: f64,
    /// Confidence is below the acceptance threshold.
    pub low_confidence: bool,
}

impl PairRegistration {
    /// Best-effort result for strips that cannot be aligned.
    pub fn unaligned() -> Self {
        Self {
            displacement: DVec2::ZERO,
            confidence: 0.0,
            low_confidence: true,
        }
    }
}

/// Registers adjacent pairs of one grid.
///
/// Holds one phase correlator per direction so FFT plans are built once.
#[derive(Debug)]
pub struct PairRegistrar {
    geometry: OverlapGeometry,
    right: Option<PhaseCorrelator>,
    down: Option<PhaseCorrelator>,
    config: RegistrationConfig,
    low_confidence_threshold: f64,
}

impl PairRegistrar {
    pub fn new(
        geometry: OverlapGeometry,
        config: &RegistrationConfig,
        low_confidence_threshold: f64,
    ) -> Self {
        let correlator = |direction| {
            let (w, h) = geometry.strip_size(direction);
            (w >= MIN_STRIP_SIZE && h >= MIN_STRIP_SIZE)
                .then(|| PhaseCorrelator::new(w, h, config.use_windowing))
        };
        Self {
            geometry,
            right: correlator(Direction::Right),
            down: correlator(Direction::Down),
            config: config.clone(),
            low_confidence_threshold,
        }
    }

    pub fn geometry(&self) -> &OverlapGeometry {
        &self.geometry
    }

    /// Register the upstream tile's outgoing strip against the downstream
    /// tile's incoming strip.
    pub fn register(
        &self,
        direction: Direction,
        upstream: &Buffer2<f32>,
        downstream: &Buffer2<f32>,
    ) -> PairRegistration {
        let correlator = match direction {
            Direction::Right => self.right.as_ref(),
            Direction::Down => self.down.as_ref(),
        };
        let Some(correlator) = correlator else {
            return PairRegistration::unaligned();
        };
        if upstream.width() != correlator.width()
            || upstream.height() != correlator.height()
            || downstream.width() != correlator.width()
            || downstream.height() != correlator.height()
        {
            return PairRegistration::unaligned();
        }

        let (Some(reference), Some(target)) = (standardize(upstream), standardize(downstream))
        else {
            return PairRegistration::unaligned();
        };

        let Some(translation) = self.estimate_translation(correlator, &reference, &target) else {
            return PairRegistration::unaligned();
        };

        let confidence = refine::ncc_at(&reference, &target, translation, MIN_OVERLAP_FRACTION)
            .clamp(0.0, 1.0);
        PairRegistration {
            displacement: self
                .geometry
                .displacement_from_translation(direction, translation),
            confidence,
            low_confidence: confidence < self.low_confidence_threshold,
        }
    }

    /// Strip translation `t` with `target(s) ~ reference(s - t)`.
    fn estimate_translation(
        &self,
        correlator: &PhaseCorrelator,
        reference: &Buffer2<f32>,
        target: &Buffer2<f32>,
    ) -> Option<DVec2> {
        let surface = correlator.correlation_surface(reference, target);
        let peaks = correlator.find_peaks(&surface, self.config.check_peaks);

        let mut best: Option<(f64, DVec2)> = None;
        for peak in &peaks {
            let frac = correlator.subpixel_offset(&surface, peak, self.config.subpixel_method);
            for (ix, iy) in correlator.interpretations(peak) {
                let shift = DVec2::new(ix as f64, iy as f64);
                let score = refine::ncc_at(reference, target, shift, MIN_OVERLAP_FRACTION);
                if score > 0.0 && best.map_or(true, |(s, _)| score > s) {
                    best = Some((score, shift + frac));
                }
            }
        }

        let (_, translation) = best?;
        if self.config.refine_iterations == 0 {
            return Some(translation);
        }
        Some(
            refine::refine_translation(
                reference,
                target,
                translation,
                self.config.refine_iterations,
            )
            .unwrap_or(translation),
        )
    }
}

/// Zero mean, unit variance copy. `None` for a flat strip.
pub fn standardize(strip: &Buffer2<f32>) -> Option<Buffer2<f32>> {
    let n = strip.len() as f64;
    if n == 0.0 {
        return None;
    }
    let mean = strip.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = strip
        .iter()
        .map(|&v| (v as f64 - mean) * (v as f64 - mean))
        .sum::<f64>()
        / n;
    // Below one 16-bit quantization step
    if var.sqrt() < 1e-5 {
        return None;
    }
    let inv_std = 1.0 / var.sqrt();
    let pixels = strip
        .iter()
        .map(|&v| ((v as f64 - mean) * inv_std) as f32)
        .collect();
    Some(Buffer2::new(strip.width(), strip.height(), pixels))
}
