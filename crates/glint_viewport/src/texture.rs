//! GPU texture upload.

use anyhow::{bail, ensure, Result};
use wgpu::{Device, Queue};

use glint_core::pyramid::Pyramid;
use glint_core::texture::{FilterMode, ImageData, TextureSettings, WrapMode};

use crate::gpu::capture_validation;

/// An uploaded texture with its view, sampler and source metadata.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
    pub width: u32,
    pub height: u32,
    /// Channel count of the source data (GPU storage is always RGBA)
    pub channels: u8,
    pub mip_levels: u32,
    pub format: wgpu::TextureFormat,
}

impl GpuTexture {
    pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
    pub const FLOAT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

    /// Upload an 8-bit image, generating a box-filtered mip chain when
    /// `settings.mipmaps` is set.
    pub fn from_image(
        device: &Device,
        queue: &Queue,
        image: &ImageData,
        settings: TextureSettings,
        label: &str,
    ) -> Result<Self> {
        let levels = if settings.mipmaps {
            image.mip_chain()
        } else {
            vec![image.clone()]
        };
        let mut texture = Self::from_levels(device, queue, &levels, settings, label)?;
        texture.channels = image.channels;
        Ok(texture)
    }

    /// Upload explicit 8-bit mip levels, level 0 first.
    pub fn from_levels(
        device: &Device,
        queue: &Queue,
        levels: &[ImageData],
        settings: TextureSettings,
        label: &str,
    ) -> Result<Self> {
        let base = levels
            .first()
            .ok_or_else(|| anyhow::anyhow!("Texture {} has no levels", label))?;

        let rgba: Vec<Vec<u8>> = levels.iter().map(ImageData::to_rgba8).collect();
        let data: Vec<(u32, u32, &[u8])> = levels
            .iter()
            .zip(&rgba)
            .map(|(level, bytes)| (level.width, level.height, bytes.as_slice()))
            .collect();

        let (texture, view) = upload(device, queue, Self::COLOR_FORMAT, 4, &data, label)?;
        let sampler = create_sampler(device, settings, levels.len() > 1, label);

        Ok(Self {
            texture,
            view,
            sampler,
            width: base.width,
            height: base.height,
            channels: base.channels,
            mip_levels: levels.len() as u32,
            format: Self::COLOR_FORMAT,
        })
    }

    /// Upload a statistics pyramid, one explicit mip level per pyramid level.
    pub fn from_pyramid(
        device: &Device,
        queue: &Queue,
        pyramid: &Pyramid,
        filterable: bool,
        label: &str,
    ) -> Result<Self> {
        ensure!(pyramid.level_count() > 0, "Pyramid {} is empty", label);

        let rgba: Vec<Vec<f32>> = pyramid.levels.iter().map(|l| l.to_rgba()).collect();
        let data: Vec<(u32, u32, &[u8])> = pyramid
            .levels
            .iter()
            .zip(&rgba)
            .map(|(level, texels)| (level.width, level.height, bytemuck::cast_slice(texels)))
            .collect();

        let (texture, view) = upload(device, queue, Self::FLOAT_FORMAT, 16, &data, label)?;
        let sampler = create_sampler(device, statistics_settings(filterable), true, label);

        Ok(Self {
            texture,
            view,
            sampler,
            width: pyramid.width(),
            height: pyramid.height(),
            channels: 3,
            mip_levels: pyramid.level_count() as u32,
            format: Self::FLOAT_FORMAT,
        })
    }

    /// 1x1 8-bit texture of a single colour.
    pub fn solid(device: &Device, queue: &Queue, pixel: [u8; 4], label: &str) -> Result<Self> {
        let image = ImageData::solid(&pixel);
        let settings = TextureSettings {
            mipmaps: false,
            ..Default::default()
        };
        Self::from_levels(device, queue, &[image], settings, label)
    }

    /// 1x1 float texture, the stand-in for a missing statistics pyramid.
    pub fn solid_float(
        device: &Device,
        queue: &Queue,
        value: [f32; 4],
        filterable: bool,
        label: &str,
    ) -> Result<Self> {
        let data: [(u32, u32, &[u8]); 1] = [(1, 1, bytemuck::cast_slice(&value))];
        let (texture, view) = upload(device, queue, Self::FLOAT_FORMAT, 16, &data, label)?;
        let sampler = create_sampler(device, statistics_settings(filterable), false, label);

        Ok(Self {
            texture,
            view,
            sampler,
            width: 1,
            height: 1,
            channels: 3,
            mip_levels: 1,
            format: Self::FLOAT_FORMAT,
        })
    }

    pub fn is_float(&self) -> bool {
        self.format == Self::FLOAT_FORMAT
    }
}

/// Sampling used for statistics textures: linear when the device allows it.
pub fn statistics_settings(filterable: bool) -> TextureSettings {
    TextureSettings {
        filter: if filterable {
            FilterMode::Linear
        } else {
            FilterMode::Nearest
        },
        wrap: WrapMode::Repeat,
        mipmaps: true,
    }
}

fn upload(
    device: &Device,
    queue: &Queue,
    format: wgpu::TextureFormat,
    bytes_per_texel: u32,
    levels: &[(u32, u32, &[u8])],
    label: &str,
) -> Result<(wgpu::Texture, wgpu::TextureView)> {
    let &(width, height, _) = levels
        .first()
        .ok_or_else(|| anyhow::anyhow!("Texture {} has no levels", label))?;
    ensure!(width > 0 && height > 0, "Texture {} has zero size", label);
    let max = device.limits().max_texture_dimension_2d;
    ensure!(
        width <= max && height <= max,
        "Texture {} is {}x{}, the device allows at most {}x{}",
        label,
        width,
        height,
        max,
        max
    );

    for (mip, &(w, h, bytes)) in levels.iter().enumerate() {
        let expected = w as usize * h as usize * bytes_per_texel as usize;
        ensure!(
            bytes.len() == expected,
            "Texture {} level {} holds {} bytes, expected {}",
            label,
            mip,
            bytes.len(),
            expected
        );
    }

    let (texture, error) = capture_validation(device, || {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: levels.len() as u32,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for (mip, &(w, h, bytes)) in levels.iter().enumerate() {
            queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: mip as u32,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                bytes,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(w * bytes_per_texel),
                    rows_per_image: Some(h),
                },
                wgpu::Extent3d {
                    width: w,
                    height: h,
                    depth_or_array_layers: 1,
                },
            );
        }
        texture
    });
    if let Some(error) = error {
        bail!("Uploading texture {}: {}", label, error);
    }

    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok((texture, view))
}

fn create_sampler(
    device: &Device,
    settings: TextureSettings,
    has_mips: bool,
    label: &str,
) -> wgpu::Sampler {
    let filter = match settings.filter {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    };
    let address = match settings.wrap {
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    };

    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: if has_mips {
            filter
        } else {
            wgpu::FilterMode::Nearest
        },
        ..Default::default()
    })
}
