//! Sub-pixel translation refinement and overlap scoring.
//!
//! Both work on a pair of equally sized strips where
//! `target(s) ~ reference(s - t)`, visiting only target pixels whose source
//! position falls inside the reference.

use common::Buffer2;
use glam::{DMat2, DVec2};

use crate::tile::bilinear_clamped;

/// Refinement that moves further than this from its start is discarded.
pub const MAX_REFINE_SHIFT: f64 = 1.5;

const CONVERGENCE_EPS: f64 = 1e-4;

/// Half-open target pixel range along one axis whose source `s - shift`
/// stays at least `margin` inside `0..len`.
fn valid_range(len: usize, shift: f64, margin: f64) -> Option<(usize, usize)> {
    let last = (len - 1) as f64;
    let lo = (shift + margin).ceil().max(0.0);
    let hi = (last + shift - margin).floor().min(last);
    if hi < lo {
        None
    } else {
        Some((lo as usize, hi as usize + 1))
    }
}

/// Normalized cross-correlation of the strips at translation `t`.
///
/// Returns 0 when fewer than `min_overlap` (fraction of the strip area)
/// pixels overlap or either side has no variance.
pub fn ncc_at(reference: &Buffer2<f32>, target: &Buffer2<f32>, t: DVec2, min_overlap: f64) -> f64 {
    let (w, h) = (target.width(), target.height());
    let (Some((x0, x1)), Some((y0, y1))) = (valid_range(w, t.x, 0.0), valid_range(h, t.y, 0.0))
    else {
        return 0.0;
    };
    let count = (x1 - x0) * (y1 - y0);
    if (count as f64) < min_overlap * (w * h) as f64 {
        return 0.0;
    }

    let integer = t.x.fract() == 0.0 && t.y.fract() == 0.0;
    let source = |x: usize, y: usize| -> f64 {
        let sx = x as f64 - t.x;
        let sy = y as f64 - t.y;
        if integer {
            reference[(sx as usize, sy as usize)] as f64
        } else {
            bilinear_clamped(reference, sx, sy) as f64
        }
    };

    let (mut sum_a, mut sum_b) = (0.0f64, 0.0f64);
    for y in y0..y1 {
        for x in x0..x1 {
            sum_a += source(x, y);
            sum_b += target[(x, y)] as f64;
        }
    }
    let n = count as f64;
    let (mean_a, mean_b) = (sum_a / n, sum_b / n);

    let (mut var_a, mut var_b, mut covar) = (0.0f64, 0.0f64, 0.0f64);
    for y in y0..y1 {
        for x in x0..x1 {
            let da = source(x, y) - mean_a;
            let db = target[(x, y)] as f64 - mean_b;
            var_a += da * da;
            var_b += db * db;
            covar += da * db;
        }
    }

    if var_a <= 1e-12 || var_b <= 1e-12 {
        return 0.0;
    }
    covar / (var_a * var_b).sqrt()
}

/// Forward-additive Lucas-Kanade on a pure translation.
///
/// Each Gauss-Newton step solves `H d = sum g e` with `g` the reference
/// gradient at `s - t` and `e = reference(s - t) - target(s)`. Returns `None`
/// if the system is singular or the estimate wanders more than
/// [`MAX_REFINE_SHIFT`] from `initial`.
pub fn refine_translation(
    reference: &Buffer2<f32>,
    target: &Buffer2<f32>,
    initial: DVec2,
    iterations: usize,
) -> Option<DVec2> {
    let (w, h) = (target.width(), target.height());
    let mut t = initial;

    for _ in 0..iterations {
        let (Some((x0, x1)), Some((y0, y1))) = (valid_range(w, t.x, 1.0), valid_range(h, t.y, 1.0))
        else {
            return None;
        };

        let mut hessian = DMat2::ZERO;
        let mut rhs = DVec2::ZERO;
        for y in y0..y1 {
            for x in x0..x1 {
                let sx = x as f64 - t.x;
                let sy = y as f64 - t.y;
                let a = bilinear_clamped(reference, sx, sy) as f64;
                let gx = 0.5
                    * (bilinear_clamped(reference, sx + 1.0, sy)
                        - bilinear_clamped(reference, sx - 1.0, sy)) as f64;
                let gy = 0.5
                    * (bilinear_clamped(reference, sx, sy + 1.0)
                        - bilinear_clamped(reference, sx, sy - 1.0)) as f64;
                let e = a - target[(x, y)] as f64;

                let g = DVec2::new(gx, gy);
                hessian.x_axis += g * gx;
                hessian.y_axis += g * gy;
                rhs += g * e;
            }
        }

        if hessian.determinant().abs() < 1e-9 {
            return None;
        }
        let delta = hessian.inverse() * rhs;
        t += delta;

        if (t - initial).length() > MAX_REFINE_SHIFT {
            return None;
        }
        if delta.length() < CONVERGENCE_EPS {
            break;
        }
    }
    Some(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_strip(w: usize, h: usize, dx: f64, dy: f64) -> Buffer2<f32> {
        Buffer2::from_fn(w, h, |x, y| {
            let sx = x as f64 - dx;
            let sy = y as f64 - dy;
            let a = (-((sx - 8.0).powi(2) + (sy - 12.0).powi(2)) / 18.0).exp();
            let b = (-((sx - 17.0).powi(2) + (sy - 30.0).powi(2)) / 12.0).exp();
            let c = (-((sx - 5.0).powi(2) + (sy - 40.0).powi(2)) / 24.0).exp();
            (a + 0.6 * b + 0.8 * c) as f32
        })
    }

    #[test]
    fn test_valid_range() {
        assert_eq!(valid_range(10, 0.0, 0.0), Some((0, 10)));
        assert_eq!(valid_range(10, 2.0, 0.0), Some((2, 10)));
        assert_eq!(valid_range(10, -2.0, 0.0), Some((0, 8)));
        assert_eq!(valid_range(10, 0.5, 1.0), Some((2, 9)));
        assert_eq!(valid_range(10, 12.0, 0.0), None);
    }

    #[test]
    fn test_ncc_of_identical_strips_is_one() {
        let a = blob_strip(24, 48, 0.0, 0.0);
        let ncc = ncc_at(&a, &a, DVec2::ZERO, 0.25);
        assert!((ncc - 1.0).abs() < 1e-9, "ncc {ncc}");
    }

    #[test]
    fn test_ncc_peaks_at_true_shift() {
        let reference = blob_strip(24, 48, 0.0, 0.0);
        let target = blob_strip(24, 48, 2.0, -1.0);
        let at_truth = ncc_at(&reference, &target, DVec2::new(2.0, -1.0), 0.25);
        let at_zero = ncc_at(&reference, &target, DVec2::ZERO, 0.25);
        assert!(at_truth > 0.999, "ncc at truth {at_truth}");
        assert!(at_truth > at_zero);
    }

    #[test]
    fn test_ncc_insufficient_overlap_is_zero() {
        let a = blob_strip(24, 48, 0.0, 0.0);
        assert_eq!(ncc_at(&a, &a, DVec2::new(20.0, 0.0), 0.25), 0.0);
    }

    #[test]
    fn test_ncc_flat_strip_is_zero() {
        let flat = Buffer2::new_filled(16, 16, 0.5f32);
        let a = blob_strip(16, 16, 0.0, 0.0);
        assert_eq!(ncc_at(&flat, &a, DVec2::ZERO, 0.25), 0.0);
    }

    #[test]
    fn test_refine_recovers_subpixel_shift() {
        let reference = blob_strip(24, 48, 0.0, 0.0);
        let target = blob_strip(24, 48, 1.3, -0.6);
        let t = refine_translation(&reference, &target, DVec2::new(1.0, -1.0), 30).unwrap();
        assert!((t.x - 1.3).abs() < 0.08, "t.x {}", t.x);
        assert!((t.y + 0.6).abs() < 0.08, "t.y {}", t.y);
    }

    #[test]
    fn test_refine_flat_strip_is_singular() {
        let flat = Buffer2::new_filled(16, 16, 0.5f32);
        assert_eq!(refine_translation(&flat, &flat, DVec2::ZERO, 10), None);
    }
}
