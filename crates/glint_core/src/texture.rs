//! Image loading and texture metadata.
//!
//! Images are decoded to 8 bits per channel with the source channel count
//! preserved (1-4 channels). The GPU side decides how to expand them.

use std::path::Path;

use thiserror::Error;

/// Errors that can occur during texture loading.
#[derive(Error, Debug)]
pub enum TextureError {
    #[error("Failed to load texture: {0}")]
    LoadError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decoding error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Unsupported texture format: {0}")]
    UnsupportedFormat(String),
}

pub type TextureResult<T> = Result<T, TextureError>;

/// A decoded 8-bit image.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageData {
    /// Texture width in pixels
    pub width: u32,

    /// Texture height in pixels
    pub height: u32,

    /// Channels per pixel (1-4)
    pub channels: u8,

    /// Interleaved pixel data, row-major, top row first
    pub pixels: Vec<u8>,

    /// Original file path (for debugging)
    pub path: String,
}

impl ImageData {
    /// Create an image from raw interleaved pixels.
    pub fn new(
        width: u32,
        height: u32,
        channels: u8,
        pixels: Vec<u8>,
        path: impl Into<String>,
    ) -> TextureResult<Self> {
        if !(1..=4).contains(&channels) {
            return Err(TextureError::UnsupportedFormat(format!(
                "{} channels",
                channels
            )));
        }
        let expected = width as usize * height as usize * channels as usize;
        if pixels.len() != expected {
            return Err(TextureError::LoadError(format!(
                "pixel buffer has {} bytes, expected {} for {}x{}x{}",
                pixels.len(),
                expected,
                width,
                height,
                channels
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            pixels,
            path: path.into(),
        })
    }

    /// Create a 1x1 image holding a single pixel.
    pub fn solid(pixel: &[u8]) -> Self {
        Self {
            width: 1,
            height: 1,
            channels: pixel.len().clamp(1, 4) as u8,
            pixels: pixel.iter().copied().take(4).collect(),
            path: "<solid>".to_string(),
        }
    }

    /// Get pixel at integer coordinates.
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let c = self.channels as usize;
        let idx = (y as usize * self.width as usize + x as usize) * c;
        &self.pixels[idx..idx + c]
    }

    /// Expand to tightly packed RGBA8. Gray is replicated, missing alpha is opaque.
    pub fn to_rgba8(&self) -> Vec<u8> {
        if self.channels == 4 {
            return self.pixels.clone();
        }

        let mut rgba = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for p in self.pixels.chunks_exact(self.channels as usize) {
            let px = match p {
                [l] => [*l, *l, *l, 255],
                [l, a] => [*l, *l, *l, *a],
                [r, g, b] => [*r, *g, *b, 255],
                _ => [0, 0, 0, 255],
            };
            rgba.extend_from_slice(&px);
        }
        rgba
    }

    /// Get total size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.pixels.len()
    }

    /// Box-filter downsample to the next mip level (each dimension halved, min 1).
    ///
    /// Odd trailing rows/columns are folded into the last texel of the
    /// smaller level so no source pixel is dropped.
    pub fn downsample(&self) -> Self {
        let width = (self.width / 2).max(1);
        let height = (self.height / 2).max(1);
        let c = self.channels as usize;
        let mut pixels = vec![0u8; width as usize * height as usize * c];

        for y in 0..height {
            let y0 = (y * 2).min(self.height - 1);
            let y1 = if y == height - 1 { self.height - 1 } else { y * 2 + 1 };
            for x in 0..width {
                let x0 = (x * 2).min(self.width - 1);
                let x1 = if x == width - 1 { self.width - 1 } else { x * 2 + 1 };

                let mut sum = [0u32; 4];
                let mut count = 0u32;
                for sy in y0..=y1 {
                    for sx in x0..=x1 {
                        for (acc, v) in sum.iter_mut().zip(self.pixel(sx, sy)) {
                            *acc += *v as u32;
                        }
                        count += 1;
                    }
                }

                let dst = (y as usize * width as usize + x as usize) * c;
                for ch in 0..c {
                    pixels[dst + ch] = ((sum[ch] + count / 2) / count) as u8;
                }
            }
        }

        Self {
            width,
            height,
            channels: self.channels,
            pixels,
            path: self.path.clone(),
        }
    }

    /// Full mip chain down to 1x1, level 0 first.
    pub fn mip_chain(&self) -> Vec<ImageData> {
        let mut chain = vec![self.clone()];
        while let Some(last) = chain.last() {
            if last.width == 1 && last.height == 1 {
                break;
            }
            let next = last.downsample();
            chain.push(next);
        }
        chain
    }
}

/// Load an image from a file path, preserving its channel count.
pub fn load_image<P: AsRef<Path>>(path: P) -> TextureResult<ImageData> {
    let path = path.as_ref();
    let img = image::open(path).map_err(|e| {
        TextureError::LoadError(format!("Failed to open {}: {}", path.display(), e))
    })?;

    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 {
        return Err(TextureError::LoadError(format!(
            "{} has zero size",
            path.display()
        )));
    }

    let channels = img.color().channel_count();
    let pixels = match channels {
        1 => img.into_luma8().into_raw(),
        2 => img.into_luma_alpha8().into_raw(),
        3 => img.into_rgb8().into_raw(),
        _ => img.into_rgba8().into_raw(),
    };

    log::debug!(
        "Loaded image: {} ({}x{}, {} channels)",
        path.display(),
        width,
        height,
        channels
    );

    ImageData::new(
        width,
        height,
        channels.min(4),
        pixels,
        path.to_string_lossy().to_string(),
    )
}

/// Write an image, format chosen by the file extension.
pub fn save_image<P: AsRef<Path>>(image: &ImageData, path: P) -> TextureResult<()> {
    let color = match image.channels {
        1 => image::ColorType::L8,
        2 => image::ColorType::La8,
        3 => image::ColorType::Rgb8,
        _ => image::ColorType::Rgba8,
    };
    image::save_buffer(path, &image.pixels, image.width, image.height, color)?;
    Ok(())
}

/// The slot a texture occupies in the material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureRole {
    Albedo,
    Normal,
    Roughness,
    Environment,
    /// Slope mean pyramid (B)
    SlopeMean,
    /// Second moment pyramid (M)
    SecondMoment,
    /// Global covariance pyramid (S)
    Covariance,
    /// Footprint variance pyramid (V)
    Variance,
    MipChart,
}

impl TextureRole {
    pub const ALL: [TextureRole; 9] = [
        TextureRole::Albedo,
        TextureRole::Normal,
        TextureRole::Roughness,
        TextureRole::Environment,
        TextureRole::SlopeMean,
        TextureRole::SecondMoment,
        TextureRole::Covariance,
        TextureRole::Variance,
        TextureRole::MipChart,
    ];

    /// Name used in logs and the UI.
    pub fn name(self) -> &'static str {
        match self {
            TextureRole::Albedo => "albedo",
            TextureRole::Normal => "normal",
            TextureRole::Roughness => "roughness",
            TextureRole::Environment => "environment",
            TextureRole::SlopeMean => "slope_mean",
            TextureRole::SecondMoment => "second_moment",
            TextureRole::Covariance => "covariance",
            TextureRole::Variance => "variance",
            TextureRole::MipChart => "mip_chart",
        }
    }

    /// Position of the role in the material bind group (texture at `2 * slot`,
    /// sampler at `2 * slot + 1`).
    pub fn slot(self) -> u32 {
        self as u32
    }

    /// Whether the role holds float statistics rather than 8-bit color.
    pub fn is_statistic(self) -> bool {
        matches!(
            self,
            TextureRole::SlopeMean
                | TextureRole::SecondMoment
                | TextureRole::Covariance
                | TextureRole::Variance
        )
    }

    /// Pixel used when the role has no texture assigned.
    pub fn fallback_pixel(self) -> [u8; 4] {
        match self {
            TextureRole::Albedo => [200, 200, 200, 255],
            TextureRole::Normal => [128, 128, 255, 255],
            TextureRole::Roughness => [128, 128, 128, 255],
            TextureRole::Environment => [64, 64, 64, 255],
            TextureRole::MipChart => [255, 255, 255, 255],
            _ => [0, 0, 0, 255],
        }
    }
}

/// Texel filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode outside [0, 1].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WrapMode {
    Repeat,
    MirrorRepeat,
    ClampToEdge,
}

/// Sampling configuration for an uploaded texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureSettings {
    pub filter: FilterMode,
    pub wrap: WrapMode,
    /// Generate a full mip chain on upload (8-bit textures only)
    pub mipmaps: bool,
}

impl TextureSettings {
    /// Defaults per role: color maps repeat and mipmap, the environment clamps.
    pub fn for_role(role: TextureRole) -> Self {
        match role {
            TextureRole::Environment => Self {
                filter: FilterMode::Linear,
                wrap: WrapMode::ClampToEdge,
                mipmaps: false,
            },
            TextureRole::MipChart => Self {
                filter: FilterMode::Nearest,
                wrap: WrapMode::Repeat,
                mipmaps: true,
            },
            _ => Self::default(),
        }
    }
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self {
            filter: FilterMode::Linear,
            wrap: WrapMode::Repeat,
            mipmaps: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_image() {
        let img = ImageData::solid(&[10, 20, 30]);
        assert_eq!(img.width, 1);
        assert_eq!(img.height, 1);
        assert_eq!(img.channels, 3);
        assert_eq!(img.pixel(0, 0), &[10, 20, 30]);
    }

    #[test]
    fn test_new_rejects_bad_length() {
        let err = ImageData::new(2, 2, 3, vec![0; 11], "bad").unwrap_err();
        assert!(matches!(err, TextureError::LoadError(_)));

        let err = ImageData::new(1, 1, 5, vec![0; 5], "bad").unwrap_err();
        assert!(matches!(err, TextureError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_to_rgba8_expands_channels() {
        let gray = ImageData::new(1, 1, 1, vec![7], "g").unwrap();
        assert_eq!(gray.to_rgba8(), vec![7, 7, 7, 255]);

        let rgb = ImageData::new(2, 1, 3, vec![1, 2, 3, 4, 5, 6], "rgb").unwrap();
        assert_eq!(rgb.to_rgba8(), vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn test_downsample_box_filter() {
        let img = ImageData::new(2, 2, 1, vec![0, 100, 200, 100], "box").unwrap();
        let half = img.downsample();

        assert_eq!((half.width, half.height), (1, 1));
        assert_eq!(half.pixels, vec![100]);
    }

    #[test]
    fn test_downsample_odd_width_keeps_last_column() {
        let img = ImageData::new(3, 1, 1, vec![0, 0, 90], "odd").unwrap();
        let half = img.downsample();

        assert_eq!((half.width, half.height), (1, 1));
        assert_eq!(half.pixels, vec![30]);
    }

    #[test]
    fn test_mip_chain_length() {
        let img = ImageData::new(8, 2, 4, vec![255; 8 * 2 * 4], "chain").unwrap();
        let chain = img.mip_chain();

        let dims: Vec<_> = chain.iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(dims, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);
        assert!(chain.iter().all(|l| l.pixels.iter().all(|&p| p == 255)));
    }

    #[test]
    fn test_load_image_preserves_channels() {
        let dir = std::env::temp_dir().join("glint_core_texture_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gray.png");
        image::GrayImage::from_raw(2, 1, vec![10, 250])
            .unwrap()
            .save(&path)
            .unwrap();

        let img = load_image(&path).unwrap();
        assert_eq!(img.channels, 1);
        assert_eq!(img.pixels, vec![10, 250]);
    }

    #[test]
    fn test_save_then_load_rgb() {
        let dir = std::env::temp_dir().join("glint_core_texture_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rgb.png");
        let img = ImageData::new(2, 1, 3, vec![1, 2, 3, 200, 100, 50], "rgb").unwrap();
        save_image(&img, &path).unwrap();

        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded.channels, 3);
        assert_eq!(loaded.pixels, img.pixels);
    }

    #[test]
    fn test_load_missing_image() {
        let err = load_image("/no/such/texture.png").unwrap_err();
        assert!(matches!(err, TextureError::LoadError(_)));
    }

    #[test]
    fn test_role_slots_are_dense() {
        for (i, role) in TextureRole::ALL.iter().enumerate() {
            assert_eq!(role.slot(), i as u32);
        }
        assert!(TextureRole::Variance.is_statistic());
        assert!(!TextureRole::Albedo.is_statistic());
    }
}
