//! Phase correlation of overlap strips.
//!
//! Phase correlation finds the translation between two equally sized images:
//! 1. Zero-mean, window and zero-pad both images to power-of-two sizes
//! 2. Compute the 2D FFT of both
//! 3. Normalize the cross-power spectrum to unit magnitude
//! 4. Inverse FFT; peaks mark candidate translations modulo the FFT size
//!
//! Strips are long and thin, so each axis gets its own FFT length.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use glam::DVec2;
use rustfft::{Fft, FftPlanner, num_complex::Complex};

use crate::config::SubpixelMethod;

/// A local maximum of the correlation surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationPeak {
    /// Column in the correlation surface, in `0..fft_width`.
    pub x: usize,
    /// Row in the correlation surface, in `0..fft_height`.
    pub y: usize,
    pub value: f32,
}

/// Phase correlator for a fixed image size.
///
/// FFT plans and windows are built once and shared by every pair of that size.
pub struct PhaseCorrelator {
    width: usize,
    height: usize,
    fft_width: usize,
    fft_height: usize,
    row_fft: Arc<dyn Fft<f32>>,
    row_ifft: Arc<dyn Fft<f32>>,
    col_fft: Arc<dyn Fft<f32>>,
    col_ifft: Arc<dyn Fft<f32>>,
    window_x: Vec<f32>,
    window_y: Vec<f32>,
}

impl std::fmt::Debug for PhaseCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseCorrelator")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("fft_width", &self.fft_width)
            .field("fft_height", &self.fft_height)
            .finish()
    }
}

impl PhaseCorrelator {
    pub fn new(width: usize, height: usize, use_windowing: bool) -> Self {
        assert!(width > 0 && height > 0, "correlator size must be positive");
        let fft_width = width.next_power_of_two();
        let fft_height = height.next_power_of_two();

        let mut planner = FftPlanner::new();
        let row_fft = planner.plan_fft_forward(fft_width);
        let row_ifft = planner.plan_fft_inverse(fft_width);
        let col_fft = planner.plan_fft_forward(fft_height);
        let col_ifft = planner.plan_fft_inverse(fft_height);

        let (window_x, window_y) = if use_windowing {
            (hann_window(width), hann_window(height))
        } else {
            (vec![1.0; width], vec![1.0; height])
        };

        Self {
            width,
            height,
            fft_width,
            fft_height,
            row_fft,
            row_ifft,
            col_fft,
            col_ifft,
            window_x,
            window_y,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn fft_width(&self) -> usize {
        self.fft_width
    }

    pub fn fft_height(&self) -> usize {
        self.fft_height
    }

    /// Phase correlation surface of `fft_width * fft_height` samples.
    ///
    /// When `target(x) = reference(x - t)`, the surface peaks at `t` modulo the
    /// FFT size.
    pub fn correlation_surface(&self, reference: &[f32], target: &[f32]) -> Vec<f32> {
        assert_eq!(reference.len(), self.width * self.height);
        assert_eq!(target.len(), self.width * self.height);

        let mut ref_fft = self.prepare(reference);
        let mut tar_fft = self.prepare(target);
        self.fft_2d(&mut ref_fft, false);
        self.fft_2d(&mut tar_fft, false);

        // Cross-power: T * conj(R) / |T * conj(R)|
        for (t, r) in tar_fft.iter_mut().zip(ref_fft.iter()) {
            let product = *t * r.conj();
            let magnitude = product.norm();
            *t = if magnitude > 1e-10 {
                product / magnitude
            } else {
                Complex::new(0.0, 0.0)
            };
        }

        self.fft_2d(&mut tar_fft, true);
        let norm = 1.0 / (self.fft_width * self.fft_height) as f32;
        tar_fft.iter().map(|c| c.re * norm).collect()
    }

    /// The `count` highest local maxima, best first. Ties keep raster order.
    pub fn find_peaks(&self, surface: &[f32], count: usize) -> Vec<CorrelationPeak> {
        let (w, h) = (self.fft_width, self.fft_height);
        let mut peaks: Vec<CorrelationPeak> = Vec::with_capacity(count + 1);

        for y in 0..h {
            for x in 0..w {
                let value = surface[y * w + x];
                if !is_local_maximum(surface, w, h, x, y) {
                    continue;
                }
                let slot = peaks
                    .iter()
                    .position(|p| value > p.value)
                    .unwrap_or(peaks.len());
                if slot < count {
                    peaks.insert(slot, CorrelationPeak { x, y, value });
                    peaks.truncate(count);
                }
            }
        }
        peaks
    }

    /// The two signed translations per axis a peak can stand for.
    ///
    /// A peak at column `x` means a shift of `x` or `x - fft_width`.
    pub fn interpretations(&self, peak: &CorrelationPeak) -> [(i64, i64); 4] {
        let x = peak.x as i64;
        let y = peak.y as i64;
        let xw = x - self.fft_width as i64;
        let yw = y - self.fft_height as i64;
        [(x, y), (xw, y), (x, yw), (xw, yw)]
    }

    /// Fractional offset of the true maximum around an integer peak.
    pub fn subpixel_offset(
        &self,
        surface: &[f32],
        peak: &CorrelationPeak,
        method: SubpixelMethod,
    ) -> DVec2 {
        match method {
            SubpixelMethod::None => DVec2::ZERO,
            SubpixelMethod::Parabolic => self.fit_peak(surface, peak, |v| v),
            SubpixelMethod::Gaussian => self.fit_peak(surface, peak, |v| v.max(1e-10).ln()),
        }
    }

    /// Per-axis parabola through the peak and its wrapped neighbors, after `f`.
    fn fit_peak(&self, surface: &[f32], peak: &CorrelationPeak, f: impl Fn(f32) -> f32) -> DVec2 {
        let (w, h) = (self.fft_width, self.fft_height);
        let at = |x: usize, y: usize| f(surface[y * w + x]) as f64;

        let c = at(peak.x, peak.y);
        let l = at((peak.x + w - 1) % w, peak.y);
        let r = at((peak.x + 1) % w, peak.y);
        let t = at(peak.x, (peak.y + h - 1) % h);
        let b = at(peak.x, (peak.y + 1) % h);

        DVec2::new(parabola_vertex(l, c, r), parabola_vertex(t, c, b))
    }

    /// Zero-mean, window and zero-pad into the FFT buffer.
    fn prepare(&self, image: &[f32]) -> Vec<Complex<f32>> {
        let mean = image.iter().map(|&v| v as f64).sum::<f64>() / image.len() as f64;
        let mean = mean as f32;

        let mut padded = vec![Complex::new(0.0, 0.0); self.fft_width * self.fft_height];
        for y in 0..self.height {
            let wy = self.window_y[y];
            let src = &image[y * self.width..(y + 1) * self.width];
            let dst = &mut padded[y * self.fft_width..y * self.fft_width + self.width];
            for ((d, &v), &wx) in dst.iter_mut().zip(src).zip(&self.window_x) {
                d.re = (v - mean) * wx * wy;
            }
        }
        padded
    }

    /// In-place 2D FFT by rows, then columns through a scratch column.
    fn fft_2d(&self, data: &mut [Complex<f32>], inverse: bool) {
        let (w, h) = (self.fft_width, self.fft_height);
        let (row_fft, col_fft) = if inverse {
            (&self.row_ifft, &self.col_ifft)
        } else {
            (&self.row_fft, &self.col_fft)
        };

        for row in data.chunks_exact_mut(w) {
            row_fft.process(row);
        }

        let mut column = vec![Complex::new(0.0, 0.0); h];
        for x in 0..w {
            for (y, c) in column.iter_mut().enumerate() {
                *c = data[y * w + x];
            }
            col_fft.process(&mut column);
            for (y, c) in column.iter().enumerate() {
                data[y * w + x] = *c;
            }
        }
    }
}

/// Vertex offset of the parabola through (-1, l), (0, c), (1, r).
///
/// Returns 0 for a flat or non-concave neighborhood. Clamped to half a pixel.
fn parabola_vertex(l: f64, c: f64, r: f64) -> f64 {
    let denom = 2.0 * (l + r - 2.0 * c);
    if denom.abs() > 1e-10 && denom < 0.0 {
        ((l - r) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    }
}

fn is_local_maximum(surface: &[f32], w: usize, h: usize, x: usize, y: usize) -> bool {
    let value = surface[y * w + x];
    for dy in [h - 1, 0, 1] {
        for dx in [w - 1, 0, 1] {
            if dx == 0 && dy == 0 {
                continue;
            }
            let xn = (x + dx) % w;
            let yn = (y + dy) % h;
            if surface[yn * w + xn] > value {
                return false;
            }
        }
    }
    true
}

/// Periodic 1D Hann window.
pub fn hann_window(size: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..size)
        .map(|i| {
            let x = i as f32 / size as f32;
            0.5 * (1.0 - (2.0 * PI * x).cos())
        })
        .collect()
}
