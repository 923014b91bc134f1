//! Normal-map statistics pyramid.
//!
//! A tangent-space normal map is turned into four float mip pyramids that a
//! shader samples to reconstruct a filtered slope distribution at any
//! minification level:
//!
//! | statistic | level 0                          | level i > 0                              |
//! |-----------|----------------------------------|------------------------------------------|
//! | B         | `(bx, by, nz)`                   | 2x2 box mean of level i-1                |
//! | M         | `(bx² + 1/s, by² + 1/s, bx·by)`  | 2x2 box mean of level i-1                |
//! | S         | `(1/s, 1/s, 0)`                  | mean of `M - B²` over the level, broadcast|
//! | V         | `(1/s, 1/s, 0)`                  | variance of level-0 B over the footprint |
//!
//! `(bx, by)` is the slope `(nx / nz, ny / nz)` clamped to [-1, 1] and `s` is
//! the sharpness. The footprint of a level-i texel is the 2^i x 2^i block of
//! level-0 texels it covers.

use std::path::Path;

use rayon::prelude::*;
use thiserror::Error;

use crate::texture::{load_image, ImageData, TextureError, TextureRole};

/// Default sharpness `s`; the bias added to the variance terms is `1/s`.
pub const DEFAULT_SHARPNESS: f32 = 128.0;

/// Errors that can occur while building a pyramid.
#[derive(Error, Debug)]
pub enum PyramidError {
    #[error(transparent)]
    Texture(#[from] TextureError),

    #[error("Normal map {path} has {channels} channel(s), at least 3 are required")]
    NotANormalMap { path: String, channels: u8 },

    #[error("Normal map is empty")]
    Empty,

    #[error("Sharpness must be finite and positive, got {0}")]
    InvalidSharpness(f32),

    #[error("Expected {expected} normals, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Pyramid worker failed: {0}")]
    Worker(String),
}

pub type PyramidResult<T> = Result<T, PyramidError>;

/// One mip level of a three-channel float statistic.
#[derive(Clone, Debug, PartialEq)]
pub struct StatLevel {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<[f32; 3]>,
}

impl StatLevel {
    fn filled(width: u32, height: u32, value: [f32; 3]) -> Self {
        Self {
            width,
            height,
            texels: vec![value; width as usize * height as usize],
        }
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> [f32; 3] {
        self.texels[y as usize * self.width as usize + x as usize]
    }

    /// Texels as RGBA32F (alpha = 1) for upload.
    pub fn to_rgba(&self) -> Vec<f32> {
        self.texels
            .iter()
            .flat_map(|t| [t[0], t[1], t[2], 1.0])
            .collect()
    }
}

/// An ordered chain of mip levels, level 0 first.
#[derive(Clone, Debug, PartialEq)]
pub struct Pyramid {
    pub levels: Vec<StatLevel>,
}

impl Pyramid {
    pub fn level(&self, index: usize) -> &StatLevel {
        &self.levels[index]
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn width(&self) -> u32 {
        self.levels.first().map_or(0, |l| l.width)
    }

    pub fn height(&self) -> u32 {
        self.levels.first().map_or(0, |l| l.height)
    }
}

/// The four statistics produced from one normal map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Statistic {
    SlopeMean,
    SecondMoment,
    Covariance,
    Variance,
}

impl Statistic {
    pub const ALL: [Statistic; 4] = [
        Statistic::SlopeMean,
        Statistic::SecondMoment,
        Statistic::Covariance,
        Statistic::Variance,
    ];

    pub fn role(self) -> TextureRole {
        match self {
            Statistic::SlopeMean => TextureRole::SlopeMean,
            Statistic::SecondMoment => TextureRole::SecondMoment,
            Statistic::Covariance => TextureRole::Covariance,
            Statistic::Variance => TextureRole::Variance,
        }
    }
}

/// B, M, S and V pyramids for one normal map.
#[derive(Clone, Debug, PartialEq)]
pub struct StatisticsPyramid {
    pub sharpness: f32,
    pub slope_mean: Pyramid,
    pub second_moment: Pyramid,
    pub covariance: Pyramid,
    pub variance: Pyramid,
}

/// Dimensions of every level: floor-halving until either side reaches 0.
pub fn level_dimensions(width: u32, height: u32) -> Vec<(u32, u32)> {
    let mut dims = Vec::new();
    let (mut w, mut h) = (width, height);
    while w > 0 && h > 0 {
        dims.push((w, h));
        w /= 2;
        h /= 2;
    }
    dims
}

/// Side length, in level-0 texels, of a level-i texel's footprint.
#[inline]
pub fn footprint(level: usize) -> u32 {
    1 << level
}

/// Map an 8-bit channel to [-1, 1].
#[inline]
pub fn decode_channel(c: u8) -> f32 {
    c as f32 / 255.0 * 2.0 - 1.0
}

/// Slope component `n / nz`, clamped to [-1, 1].
///
/// A zero `nz` saturates to the sign of `n` (0 when `n` is also 0), so grazing
/// normals never produce NaN.
#[inline]
pub fn slope(n: f32, nz: f32) -> f32 {
    let s = n / nz;
    if s.is_nan() {
        0.0
    } else {
        s.clamp(-1.0, 1.0)
    }
}

impl StatisticsPyramid {
    /// Build from an 8-bit tangent-space normal map (RGB or RGBA).
    pub fn from_image(image: &ImageData, sharpness: f32) -> PyramidResult<Self> {
        if image.channels < 3 {
            return Err(PyramidError::NotANormalMap {
                path: image.path.clone(),
                channels: image.channels,
            });
        }

        let normals: Vec<[f32; 3]> = image
            .pixels
            .chunks_exact(image.channels as usize)
            .map(|p| [decode_channel(p[0]), decode_channel(p[1]), decode_channel(p[2])])
            .collect();

        Self::from_normals(image.width, image.height, &normals, sharpness)
    }

    /// Build from decoded normals, row-major, top row first.
    pub fn from_normals(
        width: u32,
        height: u32,
        normals: &[[f32; 3]],
        sharpness: f32,
    ) -> PyramidResult<Self> {
        if !(sharpness.is_finite() && sharpness > 0.0) {
            return Err(PyramidError::InvalidSharpness(sharpness));
        }
        if width == 0 || height == 0 {
            return Err(PyramidError::Empty);
        }
        let expected = width as usize * height as usize;
        if normals.len() != expected {
            return Err(PyramidError::SizeMismatch {
                expected,
                actual: normals.len(),
            });
        }

        let bias = 1.0 / sharpness;
        let dims = level_dimensions(width, height);

        let mut b0 = StatLevel::filled(width, height, [0.0; 3]);
        let mut m0 = StatLevel::filled(width, height, [0.0; 3]);
        b0.texels
            .par_iter_mut()
            .zip(m0.texels.par_iter_mut())
            .zip(normals.par_iter())
            .for_each(|((b, m), n)| {
                let bx = slope(n[0], n[2]);
                let by = slope(n[1], n[2]);
                *b = [bx, by, n[2]];
                *m = [bx * bx + bias, by * by + bias, bx * by];
            });

        let mut slope_mean = vec![b0];
        let mut second_moment = vec![m0];
        let mut covariance = vec![StatLevel::filled(width, height, [bias, bias, 0.0])];
        let mut variance = vec![StatLevel::filled(width, height, [bias, bias, 0.0])];

        for (level, &(w, h)) in dims.iter().enumerate().skip(1) {
            let b = downsample(&slope_mean[level - 1], w, h);
            let m = downsample(&second_moment[level - 1], w, h);

            let sigma = level_covariance(&b, &m);
            covariance.push(StatLevel::filled(w, h, sigma));
            variance.push(footprint_variance(&slope_mean[0], &b, level, bias));

            slope_mean.push(b);
            second_moment.push(m);
        }

        log::debug!(
            "Built statistics pyramid {}x{} with {} levels (s = {})",
            width,
            height,
            dims.len(),
            sharpness
        );

        Ok(Self {
            sharpness,
            slope_mean: Pyramid { levels: slope_mean },
            second_moment: Pyramid {
                levels: second_moment,
            },
            covariance: Pyramid { levels: covariance },
            variance: Pyramid { levels: variance },
        })
    }

    pub fn bias(&self) -> f32 {
        1.0 / self.sharpness
    }

    pub fn level_count(&self) -> usize {
        self.slope_mean.level_count()
    }

    pub fn get(&self, statistic: Statistic) -> &Pyramid {
        match statistic {
            Statistic::SlopeMean => &self.slope_mean,
            Statistic::SecondMoment => &self.second_moment,
            Statistic::Covariance => &self.covariance,
            Statistic::Variance => &self.variance,
        }
    }
}

/// Load a normal map from disk and build its pyramid.
pub fn build_pyramid<P: AsRef<Path>>(path: P, sharpness: f32) -> PyramidResult<StatisticsPyramid> {
    let image = load_image(path)?;
    StatisticsPyramid::from_image(&image, sharpness)
}

/// 2x2 box mean of `src` into a `width` x `height` level.
fn downsample(src: &StatLevel, width: u32, height: u32) -> StatLevel {
    let mut dst = StatLevel::filled(width, height, [0.0; 3]);
    dst.texels
        .par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let sy = y as u32 * 2;
            for (x, out) in row.iter_mut().enumerate() {
                let sx = x as u32 * 2;
                let a = src.get(sx, sy);
                let b = src.get(sx + 1, sy);
                let c = src.get(sx, sy + 1);
                let d = src.get(sx + 1, sy + 1);
                for ch in 0..3 {
                    out[ch] = (a[ch] + b[ch] + c[ch] + d[ch]) * 0.25;
                }
            }
        });
    dst
}

/// Mean over the whole level of `(M.x - B.x², M.y - B.y², M.z - B.x·B.y)`.
fn level_covariance(b: &StatLevel, m: &StatLevel) -> [f32; 3] {
    let width = b.width as usize;
    let sum = b
        .texels
        .par_chunks(width)
        .zip(m.texels.par_chunks(width))
        .map(|(b_row, m_row)| {
            let mut acc = [0.0f32; 3];
            for (bt, mt) in b_row.iter().zip(m_row) {
                acc[0] += mt[0] - bt[0] * bt[0];
                acc[1] += mt[1] - bt[1] * bt[1];
                acc[2] += mt[2] - bt[0] * bt[1];
            }
            acc
        })
        .reduce(|| [0.0; 3], |a, b| [a[0] + b[0], a[1] + b[1], a[2] + b[2]]);

    let n = b.texels.len() as f32;
    [sum[0] / n, sum[1] / n, sum[2] / n]
}

/// Number of level-0 texels under one texel of `level`.
fn footprint_area(level: usize) -> f32 {
    let size = footprint(level) as f32;
    size * size
}

/// Per-texel variance of level-0 slopes over each texel's footprint,
/// measured around the level's own mean, plus the bias on x and y.
fn footprint_variance(base: &StatLevel, mean: &StatLevel, level: usize, bias: f32) -> StatLevel {
    let size = footprint(level);
    let count = footprint_area(level);
    let mut dst = StatLevel::filled(mean.width, mean.height, [0.0; 3]);

    dst.texels
        .par_chunks_mut(mean.width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let y = y as u32;
            for (x, out) in row.iter_mut().enumerate() {
                let x = x as u32;
                let mu = mean.get(x, y);
                let mut acc = [0.0f32; 3];
                for fy in 0..size {
                    for fx in 0..size {
                        let b0 = base.get(x * size + fx, y * size + fy);
                        let dx = b0[0] - mu[0];
                        let dy = b0[1] - mu[1];
                        acc[0] += dx * dx;
                        acc[1] += dy * dy;
                        acc[2] += dx * dy;
                    }
                }
                *out = [acc[0] / count + bias, acc[1] / count + bias, acc[2] / count];
            }
        });
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: f32 = 64.0;

    fn assert_close(a: [f32; 3], b: [f32; 3], tol: f32) {
        for ch in 0..3 {
            assert!(
                (a[ch] - b[ch]).abs() <= tol,
                "channel {}: {:?} vs {:?}",
                ch,
                a,
                b
            );
        }
    }

    /// Deterministic bumpy normal field.
    fn bumpy_normals(width: u32, height: u32) -> Vec<[f32; 3]> {
        (0..height)
            .flat_map(|y| {
                (0..width).map(move |x| {
                    let nx = ((x * 7 + y * 3) % 11) as f32 / 11.0 - 0.5;
                    let ny = ((x * 5 + y * 13) % 9) as f32 / 9.0 - 0.5;
                    let nz = (1.0 - nx * nx - ny * ny).sqrt();
                    [nx, ny, nz]
                })
            })
            .collect()
    }

    #[test]
    fn test_level_dimensions() {
        assert_eq!(
            level_dimensions(8, 8),
            vec![(8, 8), (4, 4), (2, 2), (1, 1)]
        );
        // Stops as soon as either side hits zero
        assert_eq!(level_dimensions(8, 2), vec![(8, 2), (4, 1)]);
        assert_eq!(level_dimensions(5, 3), vec![(5, 3), (2, 1)]);
    }

    #[test]
    fn test_slope_clamps_and_never_nans() {
        assert_eq!(slope(0.5, 0.5), 1.0);
        assert_eq!(slope(2.0, 0.5), 1.0);
        assert_eq!(slope(-2.0, 0.5), -1.0);
        assert_eq!(slope(0.3, 0.0), 1.0);
        assert_eq!(slope(-0.3, 0.0), -1.0);
        assert_eq!(slope(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_decode_channel_range() {
        assert_eq!(decode_channel(0), -1.0);
        assert_eq!(decode_channel(255), 1.0);
    }

    #[test]
    fn test_flat_normal_map_degenerates_to_bias() {
        let image = ImageData::new(2, 2, 3, vec![128, 128, 255].repeat(4), "flat").unwrap();
        let pyramid = StatisticsPyramid::from_image(&image, S).unwrap();
        let bias = 1.0 / S;

        assert_eq!(pyramid.level_count(), 2);
        // 128 decodes to ~0.004, not exactly zero
        let tol = 1e-4;
        for level in 0..pyramid.level_count() {
            for &b in &pyramid.slope_mean.level(level).texels {
                assert_close(b, [0.0, 0.0, 1.0], 1e-2);
            }
            for &m in &pyramid.second_moment.level(level).texels {
                assert_close(m, [bias, bias, 0.0], tol);
            }
            for &s in &pyramid.covariance.level(level).texels {
                assert_close(s, [bias, bias, 0.0], tol);
            }
            for &v in &pyramid.variance.level(level).texels {
                assert_close(v, [bias, bias, 0.0], tol);
            }
        }
    }

    #[test]
    fn test_exactly_up_normals() {
        let normals = vec![[0.0, 0.0, 1.0]; 4];
        let pyramid = StatisticsPyramid::from_normals(2, 2, &normals, S).unwrap();
        let bias = 1.0 / S;

        for level in 0..pyramid.level_count() {
            assert!(pyramid
                .slope_mean
                .level(level)
                .texels
                .iter()
                .all(|&b| b == [0.0, 0.0, 1.0]));
            assert!(pyramid
                .second_moment
                .level(level)
                .texels
                .iter()
                .all(|&m| m == [bias, bias, 0.0]));
        }
        assert_close(pyramid.covariance.level(1).get(0, 0), [bias, bias, 0.0], 1e-7);
        assert_close(pyramid.variance.level(1).get(0, 0), [bias, bias, 0.0], 1e-7);
    }

    #[test]
    fn test_box_filter_is_exact_mean_of_parent_block() {
        let (w, h) = (16, 8);
        let pyramid = StatisticsPyramid::from_normals(w, h, &bumpy_normals(w, h), S).unwrap();

        for stat in [&pyramid.slope_mean, &pyramid.second_moment] {
            for level in 1..stat.level_count() {
                let parent = stat.level(level - 1);
                let child = stat.level(level);
                for y in 0..child.height {
                    for x in 0..child.width {
                        let a = parent.get(2 * x, 2 * y);
                        let b = parent.get(2 * x + 1, 2 * y);
                        let c = parent.get(2 * x, 2 * y + 1);
                        let d = parent.get(2 * x + 1, 2 * y + 1);
                        let mut expected = [0.0; 3];
                        for ch in 0..3 {
                            expected[ch] = (a[ch] + b[ch] + c[ch] + d[ch]) * 0.25;
                        }
                        assert_eq!(child.get(x, y), expected);
                    }
                }
            }
        }
    }

    #[test]
    fn test_box_filter_matches_level0_footprint_mean() {
        let (w, h) = (8, 8);
        let pyramid = StatisticsPyramid::from_normals(w, h, &bumpy_normals(w, h), S).unwrap();
        let base = pyramid.slope_mean.level(0);

        for level in 1..pyramid.level_count() {
            let size = footprint(level);
            let lvl = pyramid.slope_mean.level(level);
            for y in 0..lvl.height {
                for x in 0..lvl.width {
                    let mut sum = [0.0f32; 3];
                    for fy in 0..size {
                        for fx in 0..size {
                            let t = base.get(x * size + fx, y * size + fy);
                            for ch in 0..3 {
                                sum[ch] += t[ch];
                            }
                        }
                    }
                    let n = (size * size) as f32;
                    assert_close(lvl.get(x, y), [sum[0] / n, sum[1] / n, sum[2] / n], 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_covariance_is_uniform_per_level() {
        let (w, h) = (16, 16);
        let pyramid = StatisticsPyramid::from_normals(w, h, &bumpy_normals(w, h), S).unwrap();

        for level in 1..pyramid.level_count() {
            let texels = &pyramid.covariance.level(level).texels;
            assert!(texels.iter().all(|&t| t == texels[0]), "level {}", level);
        }
    }

    #[test]
    fn test_covariance_matches_level_mean() {
        let (w, h) = (8, 4);
        let pyramid = StatisticsPyramid::from_normals(w, h, &bumpy_normals(w, h), S).unwrap();

        let b = pyramid.slope_mean.level(1);
        let m = pyramid.second_moment.level(1);
        let mut expected = [0.0f32; 3];
        for (bt, mt) in b.texels.iter().zip(&m.texels) {
            expected[0] += mt[0] - bt[0] * bt[0];
            expected[1] += mt[1] - bt[1] * bt[1];
            expected[2] += mt[2] - bt[0] * bt[1];
        }
        let n = b.texels.len() as f32;
        let expected = [expected[0] / n, expected[1] / n, expected[2] / n];

        assert_close(pyramid.covariance.level(1).get(0, 0), expected, 1e-5);
        // Bias enters through M, so the diagonal never drops below it
        let s = pyramid.covariance.level(1).get(0, 0);
        assert!(s[0] >= pyramid.bias() - 1e-6 && s[1] >= pyramid.bias() - 1e-6);
    }

    #[test]
    fn test_variance_matches_direct_footprint_recompute() {
        let (w, h) = (16, 8);
        let pyramid = StatisticsPyramid::from_normals(w, h, &bumpy_normals(w, h), S).unwrap();
        let base = pyramid.slope_mean.level(0);
        let bias = pyramid.bias();

        for level in 0..pyramid.level_count() {
            let size = footprint(level);
            assert_eq!(size, 2u32.pow(level as u32));

            let v = pyramid.variance.level(level);
            let b = pyramid.slope_mean.level(level);
            for y in 0..v.height {
                for x in 0..v.width {
                    let mu = b.get(x, y);
                    let mut acc = [0.0f32; 3];
                    for fy in 0..size {
                        for fx in 0..size {
                            let t = base.get(x * size + fx, y * size + fy);
                            acc[0] += (t[0] - mu[0]).powi(2);
                            acc[1] += (t[1] - mu[1]).powi(2);
                            acc[2] += (t[0] - mu[0]) * (t[1] - mu[1]);
                        }
                    }
                    let n = size as f32 * size as f32;
                    let expected = [acc[0] / n + bias, acc[1] / n + bias, acc[2] / n];
                    assert_close(v.get(x, y), expected, 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_footprint_area_past_u32() {
        assert_eq!(footprint_area(0), 1.0);
        assert_eq!(footprint_area(3), 64.0);
        // 65536^2 no longer fits in a u32
        assert_eq!(footprint_area(16), 65536.0 * 65536.0);
    }

    #[test]
    fn test_grazing_normals_stay_finite() {
        let normals = vec![[1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, 0.0], [0.6, 0.0, 0.8]];
        let pyramid = StatisticsPyramid::from_normals(2, 2, &normals, S).unwrap();

        for stat in Statistic::ALL {
            for level in &pyramid.get(stat).levels {
                assert!(level.texels.iter().flatten().all(|c| c.is_finite()));
            }
        }
        assert_eq!(pyramid.slope_mean.level(0).get(0, 0), [1.0, 0.0, 0.0]);
        assert_eq!(pyramid.slope_mean.level(0).get(1, 0), [0.0, -1.0, 0.0]);
    }

    #[test]
    fn test_all_pyramids_share_dimensions() {
        let (w, h) = (12, 6);
        let pyramid = StatisticsPyramid::from_normals(w, h, &bumpy_normals(w, h), S).unwrap();
        let dims = level_dimensions(w, h);

        for stat in Statistic::ALL {
            let p = pyramid.get(stat);
            assert_eq!(p.level_count(), dims.len());
            for (level, &(lw, lh)) in p.levels.iter().zip(&dims) {
                assert_eq!((level.width, level.height), (lw, lh));
                assert_eq!(level.texels.len(), (lw * lh) as usize);
            }
        }
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let gray = ImageData::new(1, 1, 1, vec![0], "gray").unwrap();
        assert!(matches!(
            StatisticsPyramid::from_image(&gray, S),
            Err(PyramidError::NotANormalMap { channels: 1, .. })
        ));
        assert!(matches!(
            StatisticsPyramid::from_normals(1, 1, &[[0.0, 0.0, 1.0]], 0.0),
            Err(PyramidError::InvalidSharpness(_))
        ));
        assert!(matches!(
            StatisticsPyramid::from_normals(2, 2, &[[0.0, 0.0, 1.0]], S),
            Err(PyramidError::SizeMismatch { expected: 4, actual: 1 })
        ));
    }

    #[test]
    fn test_missing_file_fails_cleanly() {
        let err = build_pyramid("/no/such/normal.png", S).unwrap_err();
        assert!(matches!(err, PyramidError::Texture(_)));
    }

    #[test]
    fn test_rgba_export_pads_alpha() {
        let level = StatLevel::filled(1, 2, [1.0, 2.0, 3.0]);
        assert_eq!(level.to_rgba(), vec![1.0, 2.0, 3.0, 1.0, 1.0, 2.0, 3.0, 1.0]);
    }
}
