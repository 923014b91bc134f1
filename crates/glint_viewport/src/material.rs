//! Texture slots bound to the preview shaders.
//!
//! Every [`TextureRole`] owns a texture at binding `2 * slot` and a sampler at
//! `2 * slot + 1` of bind group 1. Roles without a user texture fall back to a
//! neutral 1x1 texture so the layout never changes.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use wgpu::{Device, Queue};

use glint_core::pyramid::{Statistic, StatisticsPyramid};
use glint_core::texture::{load_image, ImageData, TextureRole, TextureSettings};

use crate::texture::GpuTexture;

struct Slot {
    texture: GpuTexture,
    user: bool,
}

pub struct Material {
    layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    slots: BTreeMap<TextureRole, Slot>,
    float_filterable: bool,
    dirty: bool,
}

impl Material {
    pub fn new(device: &Device, queue: &Queue, float_filterable: bool) -> Result<Self> {
        let layout = create_layout(device, float_filterable);

        let mut slots = BTreeMap::new();
        for role in TextureRole::ALL {
            slots.insert(
                role,
                Slot {
                    texture: fallback(device, queue, role, float_filterable)?,
                    user: false,
                },
            );
        }

        let bind_group = create_bind_group(device, &layout, &slots);
        Ok(Self {
            layout,
            bind_group,
            slots,
            float_filterable,
            dirty: false,
        })
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub fn float_filterable(&self) -> bool {
        self.float_filterable
    }

    /// Put `texture` in `role`, releasing whatever was there.
    pub fn set(&mut self, role: TextureRole, texture: GpuTexture) -> Result<()> {
        anyhow::ensure!(
            texture.is_float() == role.is_statistic(),
            "Texture format {:?} does not fit the {} slot",
            texture.format,
            role.name()
        );
        log::info!(
            "Bound {}x{} texture to {} ({} mip levels)",
            texture.width,
            texture.height,
            role.name(),
            texture.mip_levels
        );
        self.slots.insert(
            role,
            Slot {
                texture,
                user: true,
            },
        );
        self.dirty = true;
        Ok(())
    }

    /// Upload an 8-bit image into a color role with that role's sampling defaults.
    pub fn set_image(&mut self, device: &Device, queue: &Queue, role: TextureRole, image: &ImageData) -> Result<()> {
        let texture = GpuTexture::from_image(device, queue, image, TextureSettings::for_role(role), role.name())?;
        self.set(role, texture)
    }

    /// Load a file into a color role. On failure the slot keeps its texture.
    pub fn load(&mut self, device: &Device, queue: &Queue, role: TextureRole, path: &Path) -> Result<()> {
        let image = load_image(path).with_context(|| format!("Loading {} texture", role.name()))?;
        self.set_image(device, queue, role, &image)
    }

    /// Replace all four statistics textures at once.
    pub fn set_statistics(&mut self, device: &Device, queue: &Queue, pyramid: &StatisticsPyramid) -> Result<()> {
        // Upload everything before touching the slots so a failure changes nothing
        let mut uploaded = Vec::with_capacity(Statistic::ALL.len());
        for statistic in Statistic::ALL {
            let role = statistic.role();
            let texture = GpuTexture::from_pyramid(
                device,
                queue,
                pyramid.get(statistic),
                self.float_filterable,
                role.name(),
            )?;
            uploaded.push((role, texture));
        }
        for (role, texture) in uploaded {
            self.set(role, texture)?;
        }
        Ok(())
    }

    /// Return a role to its fallback texture.
    pub fn clear(&mut self, device: &Device, queue: &Queue, role: TextureRole) -> Result<()> {
        let texture = fallback(device, queue, role, self.float_filterable)?;
        self.slots.insert(
            role,
            Slot {
                texture,
                user: false,
            },
        );
        self.dirty = true;
        Ok(())
    }

    pub fn texture(&self, role: TextureRole) -> Option<&GpuTexture> {
        self.slots.get(&role).map(|slot| &slot.texture)
    }

    /// Whether `role` holds a user texture rather than its fallback.
    pub fn is_assigned(&self, role: TextureRole) -> bool {
        self.slots.get(&role).is_some_and(|slot| slot.user)
    }

    /// Bind group for the current slots, rebuilt if any slot changed.
    pub fn bind_group(&mut self, device: &Device) -> &wgpu::BindGroup {
        if self.dirty {
            self.bind_group = create_bind_group(device, &self.layout, &self.slots);
            self.dirty = false;
        }
        &self.bind_group
    }
}

fn fallback(device: &Device, queue: &Queue, role: TextureRole, float_filterable: bool) -> Result<GpuTexture> {
    let label = format!("{} (fallback)", role.name());
    if role.is_statistic() {
        GpuTexture::solid_float(device, queue, [0.0, 0.0, 0.0, 1.0], float_filterable, &label)
    } else {
        GpuTexture::solid(device, queue, role.fallback_pixel(), &label)
    }
}

fn create_layout(device: &Device, float_filterable: bool) -> wgpu::BindGroupLayout {
    let mut entries = Vec::with_capacity(TextureRole::ALL.len() * 2);
    for role in TextureRole::ALL {
        let filterable = !role.is_statistic() || float_filterable;
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: role.slot() * 2,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: role.slot() * 2 + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(if filterable {
                wgpu::SamplerBindingType::Filtering
            } else {
                wgpu::SamplerBindingType::NonFiltering
            }),
            count: None,
        });
    }

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Material Bind Group Layout"),
        entries: &entries,
    })
}

fn create_bind_group(
    device: &Device,
    layout: &wgpu::BindGroupLayout,
    slots: &BTreeMap<TextureRole, Slot>,
) -> wgpu::BindGroup {
    let entries: Vec<wgpu::BindGroupEntry> = slots
        .iter()
        .flat_map(|(role, slot)| {
            [
                wgpu::BindGroupEntry {
                    binding: role.slot() * 2,
                    resource: wgpu::BindingResource::TextureView(&slot.texture.view),
                },
                wgpu::BindGroupEntry {
                    binding: role.slot() * 2 + 1,
                    resource: wgpu::BindingResource::Sampler(&slot.texture.sampler),
                },
            ]
        })
        .collect();

    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Material Bind Group"),
        layout,
        entries: &entries,
    })
}
