//! Radix-2 Fourier transforms
//!
//! A small recursive decimation-in-time FFT. Twiddle tables are memoized per
//! transform length through the shared [`Cache`].

use std::f64::consts::PI;
use std::ops::{Add, Mul, Sub};
use std::sync::Arc;

use super::types::{ImagingError, Result};
use crate::cache::{Cache, LruMemo};

/// Complex number in rectangular form
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub const ZERO: Complex = Complex { re: 0.0, im: 0.0 };

    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    /// `e^(i * theta)`
    pub fn from_angle(theta: f64) -> Self {
        Self::new(theta.cos(), theta.sin())
    }

    pub fn norm(&self) -> f64 {
        self.re.hypot(self.im)
    }
}

impl Add for Complex {
    type Output = Complex;
    fn add(self, rhs: Complex) -> Complex {
        Complex::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl Sub for Complex {
    type Output = Complex;
    fn sub(self, rhs: Complex) -> Complex {
        Complex::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl Mul for Complex {
    type Output = Complex;
    fn mul(self, rhs: Complex) -> Complex {
        Complex::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

/// Shared twiddle table for one transform length
pub type Twiddles = Arc<Vec<Complex>>;

/// FFT engine with memoized twiddle factors
pub struct Fft {
    twiddles: Arc<dyn Cache<Twiddles>>,
}

impl Default for Fft {
    fn default() -> Self {
        Self::new(Arc::new(LruMemo::new(8)))
    }
}

impl Fft {
    pub fn new(twiddles: Arc<dyn Cache<Twiddles>>) -> Self {
        Self { twiddles }
    }

    /// `e^(-2 pi i k / n)` for `k < n / 2`
    fn twiddles(&self, n: usize) -> Twiddles {
        let key = format!("fft/twiddle/{n}");
        self.twiddles.get_or_insert_with(&key, &mut || {
            Arc::new(
                (0..n / 2)
                    .map(|k| Complex::from_angle(-2.0 * PI * k as f64 / n as f64))
                    .collect(),
            )
        })
    }

    /// In-place forward transform
    ///
    /// The length must be a non-zero power of two.
    pub fn transform(&self, data: &mut [Complex]) -> Result<()> {
        let n = data.len();
        if n == 0 || !n.is_power_of_two() {
            return Err(ImagingError::FftLength(n));
        }
        if n == 1 {
            return Ok(());
        }
        let twiddles = self.twiddles(n);
        let input = data.to_vec();
        radix2(&input, 0, 1, data, &twiddles, n);
        Ok(())
    }

    /// In-place 2-D transform of a row-major `size x size` block
    pub fn transform_2d(&self, data: &mut [Complex], size: usize) -> Result<()> {
        if size == 0 || !size.is_power_of_two() || data.len() != size * size {
            return Err(ImagingError::FftLength(data.len()));
        }
        for row in data.chunks_exact_mut(size) {
            self.transform(row)?;
        }
        let mut column = vec![Complex::ZERO; size];
        for x in 0..size {
            for (y, c) in column.iter_mut().enumerate() {
                *c = data[y * size + x];
            }
            self.transform(&mut column)?;
            for (y, c) in column.iter().enumerate() {
                data[y * size + x] = *c;
            }
        }
        Ok(())
    }
}

fn radix2(
    input: &[Complex],
    offset: usize,
    stride: usize,
    out: &mut [Complex],
    twiddles: &[Complex],
    full_len: usize,
) {
    let n = out.len();
    if n == 1 {
        out[0] = input[offset];
        return;
    }
    let half = n / 2;
    {
        let (even, odd) = out.split_at_mut(half);
        radix2(input, offset, stride * 2, even, twiddles, full_len);
        radix2(input, offset + stride, stride * 2, odd, twiddles, full_len);
    }
    let step = full_len / n;
    for k in 0..half {
        let t = twiddles[k * step] * out[half + k];
        let e = out[k];
        out[k] = e + t;
        out[half + k] = e - t;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dft(data: &[Complex]) -> Vec<Complex> {
        let n = data.len();
        (0..n)
            .map(|k| {
                data.iter().enumerate().fold(Complex::ZERO, |acc, (j, &x)| {
                    acc + x * Complex::from_angle(-2.0 * PI * (j * k) as f64 / n as f64)
                })
            })
            .collect()
    }

    #[test]
    fn test_matches_naive_dft() {
        let data: Vec<Complex> = (0..16)
            .map(|i| Complex::new((i as f64 * 0.7).sin() + i as f64 * 0.1, (i % 3) as f64))
            .collect();
        let expected = dft(&data);
        let mut actual = data.clone();
        Fft::default().transform(&mut actual).unwrap();
        for (a, e) in actual.iter().zip(&expected) {
            assert!((*a - *e).norm() < 1e-9);
        }
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        let fft = Fft::default();
        let mut data = vec![Complex::ZERO; 12];
        assert!(matches!(fft.transform(&mut data), Err(ImagingError::FftLength(12))));
        assert!(fft.transform(&mut []).is_err());
    }

    #[test]
    fn test_2d_peak_for_plane_wave() {
        let size = 32;
        let fft = Fft::default();
        let mut data: Vec<Complex> = (0..size * size)
            .map(|i| {
                let (x, y) = ((i % size) as f64, (i / size) as f64);
                Complex::new((2.0 * PI * (3.0 * x + 5.0 * y) / size as f64).cos(), 0.0)
            })
            .collect();
        fft.transform_2d(&mut data, size).unwrap();
        let (best, _) = data
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .unwrap();
        let (kx, ky) = (best % size, best / size);
        assert!((kx, ky) == (3, 5) || (kx, ky) == (size - 3, size - 5));
    }

    #[test]
    fn test_twiddles_memoized() {
        let memo: Arc<LruMemo<Twiddles>> = Arc::new(LruMemo::new(4));
        let fft = Fft::new(memo.clone());
        let mut data = vec![Complex::new(1.0, 0.0); 8];
        fft.transform(&mut data).unwrap();
        fft.transform(&mut data).unwrap();
        let stats = memo.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
    }
}
