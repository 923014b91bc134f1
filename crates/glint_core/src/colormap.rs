//! Blurred colormap generation.
//!
//! Takes a gradient image whose first row is the reference colormap and fills
//! every following row `y` with row 0 blurred by a Gaussian of width `4y + 1`.
//! Sampling the result at `(u, v)` gives the colormap at `u` pre-filtered to a
//! footprint that grows with `v`.

use crate::texture::{ImageData, TextureError, TextureResult};

/// Normalised 1D Gaussian kernel with the default sigma for its size.
///
/// Sizes up to 7 use the fixed binomial-like tables; larger sizes use
/// `sigma = 0.3 * ((ksize - 1) / 2 - 1) + 0.8`.
pub fn gaussian_kernel(ksize: usize) -> Vec<f64> {
    match ksize {
        1 => return vec![1.0],
        3 => return vec![0.25, 0.5, 0.25],
        5 => return vec![0.0625, 0.25, 0.375, 0.25, 0.0625],
        7 => return vec![0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125],
        _ => {}
    }

    let sigma = 0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let scale = -0.5 / (sigma * sigma);
    let center = (ksize as f64 - 1.0) * 0.5;

    let mut kernel: Vec<f64> = (0..ksize)
        .map(|i| {
            let x = i as f64 - center;
            (scale * x * x).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// Rewrite rows `1..height` of `image` as blurred copies of row 0.
///
/// Kernel taps that fall outside the row are skipped and the remaining
/// weights renormalised. Results are truncated to 8 bits. Alpha, when
/// present, is left untouched.
pub fn filter_colormap(image: &mut ImageData) -> TextureResult<()> {
    if image.channels < 3 {
        return Err(TextureError::UnsupportedFormat(format!(
            "colormap needs RGB, got {} channel(s)",
            image.channels
        )));
    }

    let width = image.width as usize;
    let stride = width * image.channels as usize;
    let channels = image.channels as usize;
    if width == 0 || image.height == 0 || image.pixels.len() < stride * image.height as usize {
        return Err(TextureError::UnsupportedFormat(format!(
            "colormap {} is {}x{} with {} bytes",
            image.path,
            image.width,
            image.height,
            image.pixels.len()
        )));
    }
    let reference: Vec<u8> = image.pixels[..stride].to_vec();

    for y in 1..image.height as usize {
        let kernel = gaussian_kernel(y * 4 + 1);
        let half = (kernel.len() / 2) as isize;
        let row = &mut image.pixels[y * stride..(y + 1) * stride];

        for x in 0..width {
            let mut acc = [0.0f64; 3];
            let mut norm = 0.0f64;

            for (i, &weight) in kernel.iter().enumerate() {
                let nx = x as isize + i as isize - half;
                if nx < 0 || nx >= width as isize {
                    continue;
                }
                let src = &reference[nx as usize * channels..];
                norm += weight;
                for ch in 0..3 {
                    acc[ch] += src[ch] as f64 * weight;
                }
            }

            if norm > 0.0 {
                for value in acc.iter_mut() {
                    *value /= norm;
                }
            }
            for ch in 0..3 {
                row[x * channels + ch] = acc[ch] as u8;
            }
        }
    }

    log::debug!("Filtered {}x{} colormap", image.width, image.height);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_sums_to_one() {
        for ksize in [1, 3, 5, 7, 9, 21, 129] {
            let kernel = gaussian_kernel(ksize);
            assert_eq!(kernel.len(), ksize);
            let sum: f64 = kernel.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "ksize {}", ksize);
        }
    }

    #[test]
    fn test_kernel_is_symmetric_and_peaked() {
        let kernel = gaussian_kernel(13);
        for i in 0..kernel.len() / 2 {
            assert!((kernel[i] - kernel[kernel.len() - 1 - i]).abs() < 1e-12);
            assert!(kernel[i] < kernel[i + 1]);
        }
    }

    #[test]
    fn test_small_kernel_table() {
        assert_eq!(gaussian_kernel(5), vec![0.0625, 0.25, 0.375, 0.25, 0.0625]);
    }

    #[test]
    fn test_constant_row_stays_constant() {
        let mut image = ImageData::new(16, 4, 3, [40, 80, 120].repeat(64), "flat").unwrap();
        filter_colormap(&mut image).unwrap();
        assert!(image.pixels.chunks(3).all(|p| p == [40, 80, 120]));
    }

    #[test]
    fn test_rows_get_progressively_smoother() {
        // Hard black/white step in the reference row
        let width = 32u32;
        let height = 6u32;
        let mut pixels = Vec::new();
        for _ in 0..height {
            for x in 0..width {
                let v = if x < width / 2 { 0 } else { 255 };
                pixels.extend_from_slice(&[v, v, v, 255]);
            }
        }
        let mut image = ImageData::new(width, height, 4, pixels, "step").unwrap();
        filter_colormap(&mut image).unwrap();

        let at = |x: u32, y: u32| image.pixel(x, y)[0];
        assert_eq!(at(0, 0), 0);
        assert_eq!(at(width - 1, 0), 255);
        // Left of the edge brightens as the blur widens
        let x = width / 2 - 2;
        assert!(at(x, 1) <= at(x, 3));
        assert!(at(x, 3) <= at(x, 5));
        // Alpha untouched
        assert!(image.pixels.chunks(4).all(|p| p[3] == 255));
    }

    #[test]
    fn test_rejects_grayscale() {
        let mut image = ImageData::new(2, 2, 1, vec![0; 4], "gray").unwrap();
        assert!(filter_colormap(&mut image).is_err());
    }

    #[test]
    fn test_rejects_empty_image() {
        let mut image = ImageData {
            width: 4,
            height: 0,
            channels: 3,
            pixels: Vec::new(),
            path: "empty".to_string(),
        };
        assert!(filter_colormap(&mut image).is_err());
    }
}
