use super::*;

/// Smooth test pattern sampled at `(x - dx, y - dy)`.
fn pattern(width: usize, height: usize, dx: f64, dy: f64) -> Vec<f32> {
    let blobs = [
        (12.0, 20.0, 3.0, 1.0),
        (30.0, 8.0, 4.0, 0.7),
        (22.0, 45.0, 2.5, 0.9),
        (6.0, 52.0, 3.5, 0.5),
        (35.0, 30.0, 3.0, 0.8),
    ];
    let mut out = vec![0.0f32; width * height];
    for y in 0..height {
        for x in 0..width {
            let (sx, sy) = (x as f64 - dx, y as f64 - dy);
            let mut v = 0.0;
            for &(cx, cy, s, a) in &blobs {
                let d2 = (sx - cx) * (sx - cx) + (sy - cy) * (sy - cy);
                v += a * (-d2 / (2.0 * s * s)).exp();
            }
            out[y * width + x] = v as f32;
        }
    }
    out
}

fn best_translation(correlator: &PhaseCorrelator, surface: &[f32]) -> (i64, i64) {
    let peak = correlator.find_peaks(surface, 1)[0];
    let fw = correlator.fft_width() as i64;
    let fh = correlator.fft_height() as i64;
    let x = peak.x as i64;
    let y = peak.y as i64;
    (
        if x >= fw / 2 { x - fw } else { x },
        if y >= fh / 2 { y - fh } else { y },
    )
}

#[test]
fn test_fft_sizes_are_independent_powers_of_two() {
    let c = PhaseCorrelator::new(40, 60, true);
    assert_eq!(c.fft_width(), 64);
    assert_eq!(c.fft_height(), 64);
    let c = PhaseCorrelator::new(24, 96, true);
    assert_eq!(c.fft_width(), 32);
    assert_eq!(c.fft_height(), 128);
}

#[test]
fn test_identical_images_peak_at_origin() {
    let (w, h) = (40, 60);
    let img = pattern(w, h, 0.0, 0.0);
    let c = PhaseCorrelator::new(w, h, true);
    let surface = c.correlation_surface(&img, &img);
    assert_eq!(best_translation(&c, &surface), (0, 0));
}

#[test]
fn test_integer_shift_sign_convention() {
    let (w, h) = (40, 60);
    let reference = pattern(w, h, 0.0, 0.0);
    // target(x) = reference(x - t) with t = (3, -5)
    let target = pattern(w, h, 3.0, -5.0);
    let c = PhaseCorrelator::new(w, h, true);
    let surface = c.correlation_surface(&reference, &target);
    assert_eq!(best_translation(&c, &surface), (3, -5));
}

#[test]
fn test_subpixel_parabolic_moves_toward_true_shift() {
    let (w, h) = (40, 60);
    let reference = pattern(w, h, 0.0, 0.0);
    let target = pattern(w, h, 2.3, 1.7);
    let c = PhaseCorrelator::new(w, h, true);
    let surface = c.correlation_surface(&reference, &target);
    let peak = c.find_peaks(&surface, 1)[0];
    let frac = c.subpixel_offset(&surface, &peak, SubpixelMethod::Parabolic);

    let est_x = peak.x as f64 + frac.x;
    let est_y = peak.y as f64 + frac.y;
    assert!((est_x - 2.3).abs() < 0.35, "x estimate {est_x}");
    assert!((est_y - 1.7).abs() < 0.35, "y estimate {est_y}");
}

#[test]
fn test_subpixel_none_is_zero() {
    let c = PhaseCorrelator::new(8, 8, false);
    let surface = vec![0.0f32; 64];
    let peak = CorrelationPeak {
        x: 3,
        y: 3,
        value: 0.0,
    };
    assert_eq!(
        c.subpixel_offset(&surface, &peak, SubpixelMethod::None),
        DVec2::ZERO
    );
}

#[test]
fn test_find_peaks_sorted_and_limited() {
    let c = PhaseCorrelator::new(8, 8, false);
    let mut surface = vec![0.0f32; 64];
    surface[8 + 1] = 0.5;
    surface[3 * 8 + 5] = 0.9;
    surface[6 * 8 + 2] = 0.7;
    let peaks = c.find_peaks(&surface, 2);
    assert_eq!(peaks.len(), 2);
    assert_eq!((peaks[0].x, peaks[0].y), (5, 3));
    assert_eq!((peaks[1].x, peaks[1].y), (2, 6));
}

#[test]
fn test_interpretations_cover_wraparound() {
    let c = PhaseCorrelator::new(30, 12, false);
    let peak = CorrelationPeak {
        x: 30,
        y: 2,
        value: 1.0,
    };
    let shifts = c.interpretations(&peak);
    assert!(shifts.contains(&(30, 2)));
    assert!(shifts.contains(&(-2, 2)));
    assert!(shifts.contains(&(30, -14)));
    assert!(shifts.contains(&(-2, -14)));
}

#[test]
fn test_uniform_images_give_flat_surface() {
    let c = PhaseCorrelator::new(16, 16, true);
    let img = vec![0.4f32; 256];
    let surface = c.correlation_surface(&img, &img);
    assert!(surface.iter().all(|v| v.abs() < 1e-6));
}

#[test]
fn test_hann_window_shape() {
    let w = hann_window(16);
    assert_eq!(w.len(), 16);
    assert!(w[0].abs() < 1e-6);
    assert!((w[8] - 1.0).abs() < 1e-6);
    assert!((w[4] - w[12]).abs() < 1e-6);
}

#[test]
fn test_parabola_vertex() {
    assert_eq!(parabola_vertex(0.5, 1.0, 0.5), 0.0);
    assert!(parabola_vertex(0.2, 1.0, 0.8) > 0.0);
    assert!(parabola_vertex(0.8, 1.0, 0.2) < 0.0);
    // Not a maximum
    assert_eq!(parabola_vertex(1.0, 0.0, 1.0), 0.0);
}
