//! Image rendering, FFT, power spectrum and radial statistics
//!
//! The FFT is a fixed-order iterative radix-2 transform rather than a
//! planner-based library call. The scorer's golden vectors are recorded as
//! 64-bit patterns, so the exact sequence of floating-point operations is
//! part of the contract; a pinned implementation keeps that sequence stable
//! across dependency upgrades. Image sizes are powers of two by
//! construction.

use ndarray::Array2;
use seedhunt_core::prng::PixelRng;

/// Render the seed's grayscale image: `size * size` draws scaled to
/// `[0, 255)`, mean-centered, divided by 255.
pub fn render_image(seed: u64, size: usize) -> Array2<f64> {
    let mut rng = PixelRng::new(seed);
    let mut image = Array2::zeros((size, size));
    let mut sum = 0.0;
    for y in 0..size {
        for x in 0..size {
            let value = rng.next_unit() * 255.0;
            image[[y, x]] = value;
            sum += value;
        }
    }
    let mean = sum / (size * size) as f64;
    for value in image.iter_mut() {
        *value = (*value - mean) / 255.0;
    }
    image
}

/// In-place iterative radix-2 FFT. `re.len()` must be a power of two.
fn fft_inplace(re: &mut [f64], im: &mut [f64]) {
    let n = re.len();
    debug_assert!(n.is_power_of_two());

    // Bit-reversal permutation
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            re.swap(i, j);
            im.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let angle = -2.0 * std::f64::consts::PI / len as f64;
        let w_re = angle.cos();
        let w_im = angle.sin();
        let mut start = 0;
        while start < n {
            let mut cur_re = 1.0;
            let mut cur_im = 0.0;
            for k in 0..len / 2 {
                let a_re = re[start + k];
                let a_im = im[start + k];
                let b_re = re[start + k + len / 2] * cur_re - im[start + k + len / 2] * cur_im;
                let b_im = re[start + k + len / 2] * cur_im + im[start + k + len / 2] * cur_re;
                re[start + k] = a_re + b_re;
                im[start + k] = a_im + b_im;
                re[start + k + len / 2] = a_re - b_re;
                im[start + k + len / 2] = a_im - b_im;
                let next_re = cur_re * w_re - cur_im * w_im;
                let next_im = cur_re * w_im + cur_im * w_re;
                cur_re = next_re;
                cur_im = next_im;
            }
            start += len;
        }
        len <<= 1;
    }
}

/// 2D power spectrum of a real image, origin-shifted so DC sits at
/// `(size/2, size/2)`.
pub fn power_spectrum(image: &Array2<f64>) -> Array2<f64> {
    let n = image.nrows();
    let mut re = image.clone();
    let mut im = Array2::<f64>::zeros((n, n));

    let mut row_re = vec![0.0; n];
    let mut row_im = vec![0.0; n];
    for y in 0..n {
        for x in 0..n {
            row_re[x] = re[[y, x]];
            row_im[x] = im[[y, x]];
        }
        fft_inplace(&mut row_re, &mut row_im);
        for x in 0..n {
            re[[y, x]] = row_re[x];
            im[[y, x]] = row_im[x];
        }
    }
    for x in 0..n {
        for y in 0..n {
            row_re[y] = re[[y, x]];
            row_im[y] = im[[y, x]];
        }
        fft_inplace(&mut row_re, &mut row_im);
        for y in 0..n {
            re[[y, x]] = row_re[y];
            im[[y, x]] = row_im[y];
        }
    }

    let half = n / 2;
    let mut power = Array2::zeros((n, n));
    for y in 0..n {
        for x in 0..n {
            let p = re[[y, x]] * re[[y, x]] + im[[y, x]] * im[[y, x]];
            power[[(y + half) % n, (x + half) % n]] = p;
        }
    }
    power
}

/// Number of radial bins for a `size`-wide shifted spectrum.
pub fn radial_bin_count(size: usize) -> usize {
    ((2.0f64).sqrt() * size as f64 / 2.0).floor() as usize + 1
}

/// Mean power per integer Euclidean distance from the shifted center.
/// Empty bins hold NaN.
pub fn radial_profile(power: &Array2<f64>) -> Vec<f64> {
    let n = power.nrows();
    let center = (n / 2) as f64;
    let bins = radial_bin_count(n);
    let mut sums = vec![0.0; bins];
    let mut counts = vec![0u64; bins];
    for y in 0..n {
        for x in 0..n {
            let dy = y as f64 - center;
            let dx = x as f64 - center;
            let r = (dx * dx + dy * dy).sqrt() as usize;
            if r < bins {
                sums[r] += power[[y, x]];
                counts[r] += 1;
            }
        }
    }
    sums.iter()
        .zip(counts.iter())
        .map(|(&sum, &count)| if count > 0 { sum / count as f64 } else { f64::NAN })
        .collect()
}

/// Power values whose radius falls inside `[lo_frac, hi_frac]` of `r_max`,
/// in row-major order.
pub fn annulus_values(power: &Array2<f64>, lo_frac: f64, hi_frac: f64, r_max: f64) -> Vec<f64> {
    let n = power.nrows();
    let center = (n / 2) as f64;
    let lo = lo_frac * r_max;
    let hi = hi_frac * r_max;
    let mut values = Vec::new();
    for y in 0..n {
        for x in 0..n {
            let dy = y as f64 - center;
            let dx = x as f64 - center;
            let r = (dx * dx + dy * dy).sqrt();
            if r >= lo && r <= hi {
                values.push(power[[y, x]]);
            }
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_mean_centered() {
        let image = render_image(42, 32);
        let sum: f64 = image.iter().sum();
        assert!(sum.abs() < 1e-9);
        for &v in image.iter() {
            assert!(v > -1.0 && v < 1.0);
        }
    }

    #[test]
    fn test_render_deterministic() {
        assert_eq!(render_image(7, 32), render_image(7, 32));
    }

    #[test]
    fn test_fft_of_impulse_is_flat() {
        // FFT of a unit impulse is all-ones in both halves of the spectrum.
        let mut re = vec![0.0; 8];
        let mut im = vec![0.0; 8];
        re[0] = 1.0;
        fft_inplace(&mut re, &mut im);
        for k in 0..8 {
            assert!((re[k] - 1.0).abs() < 1e-12);
            assert!(im[k].abs() < 1e-12);
        }
    }

    #[test]
    fn test_fft_of_constant_concentrates_dc() {
        let mut re = vec![1.0; 8];
        let mut im = vec![0.0; 8];
        fft_inplace(&mut re, &mut im);
        assert!((re[0] - 8.0).abs() < 1e-12);
        for k in 1..8 {
            assert!(re[k].abs() < 1e-12);
            assert!(im[k].abs() < 1e-12);
        }
    }

    #[test]
    fn test_power_spectrum_dc_is_centered() {
        // A constant image has all its energy at DC, which the shift moves
        // to (n/2, n/2).
        let n = 16;
        let image = Array2::from_elem((n, n), 1.0);
        let power = power_spectrum(&image);
        let half = n / 2;
        assert!((power[[half, half]] - (n * n) as f64 * (n * n) as f64).abs() < 1e-6);
        let off_dc: f64 = power
            .indexed_iter()
            .filter(|((y, x), _)| *y != half || *x != half)
            .map(|(_, &p)| p)
            .sum();
        assert!(off_dc.abs() < 1e-6);
    }

    #[test]
    fn test_radial_bin_count() {
        assert_eq!(radial_bin_count(128), 91);
        assert_eq!(radial_bin_count(32), 23);
    }

    #[test]
    fn test_radial_profile_of_uniform_power() {
        let n = 16;
        let power = Array2::from_elem((n, n), 2.0);
        let profile = radial_profile(&power);
        for &mean in profile.iter().filter(|m| m.is_finite()) {
            assert!((mean - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_annulus_excludes_center_and_corners() {
        let n = 16;
        let power = Array2::from_elem((n, n), 1.0);
        let r_max = (radial_bin_count(n) - 1) as f64;
        let values = annulus_values(&power, 0.15, 0.95, r_max);
        assert!(!values.is_empty());
        assert!(values.len() < n * n);
    }
}
