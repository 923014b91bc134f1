//! Offscreen color + depth render target.

use std::sync::Arc;

use wgpu::Device;

use crate::gpu::capture_validation;

pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Outcome of the last attachment allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetStatus {
    Complete,
    Incomplete(String),
}

impl TargetStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, TargetStatus::Complete)
    }
}

struct Attachments {
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth: wgpu::Texture,
    depth_view: wgpu::TextureView,
}

/// Color and depth attachments sized to the preview panel.
///
/// The color attachment is replaced on every reallocation, so views handed
/// out earlier must be refreshed when [`RenderTarget::generation`] changes.
pub struct RenderTarget {
    device: Arc<Device>,
    width: u32,
    height: u32,
    attachments: Attachments,
    status: TargetStatus,
    allocations: u32,
    generation: u64,
}

impl RenderTarget {
    pub fn new(device: Arc<Device>, width: u32, height: u32) -> Self {
        let (width, height) = clamp_size(&device, width, height);
        let (attachments, status) = allocate(&device, width, height);
        log_status(&status, width, height);

        Self {
            device,
            width,
            height,
            attachments,
            status,
            allocations: 1,
            generation: 0,
        }
    }

    /// Make the attachments exactly `width` x `height`.
    ///
    /// Returns `true` when the attachments were reallocated. Asking for the
    /// current size is a no-op.
    pub fn ensure_size(&mut self, width: u32, height: u32) -> bool {
        let (width, height) = clamp_size(&self.device, width, height);
        if (width, height) == (self.width, self.height) {
            return false;
        }

        let (attachments, status) = allocate(&self.device, width, height);
        log_status(&status, width, height);
        log::debug!(
            "Render target {}x{} -> {}x{}",
            self.width,
            self.height,
            width,
            height
        );

        // Old attachments are released when dropped here
        self.attachments = attachments;
        self.status = status;
        self.width = width;
        self.height = height;
        self.allocations += 1;
        self.generation += 1;
        true
    }

    /// Begin a render pass that clears and draws into this target.
    ///
    /// The pass borrows the encoder; dropping it ends the pass.
    pub fn bind_for_draw<'a>(
        &'a self,
        encoder: &'a mut wgpu::CommandEncoder,
        clear: wgpu::Color,
    ) -> wgpu::RenderPass<'a> {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Preview Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.attachments.color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(clear),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.attachments.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        })
    }

    pub fn color_view(&self) -> &wgpu::TextureView {
        &self.attachments.color_view
    }

    pub fn color_texture(&self) -> &wgpu::Texture {
        &self.attachments.color
    }

    pub fn depth_texture(&self) -> &wgpu::Texture {
        &self.attachments.depth
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    pub fn status(&self) -> &TargetStatus {
        &self.status
    }

    /// Number of allocation cycles, construction included.
    pub fn allocations(&self) -> u32 {
        self.allocations
    }

    /// Bumped every time the color attachment is replaced.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

fn clamp_size(device: &Device, width: u32, height: u32) -> (u32, u32) {
    let max = device.limits().max_texture_dimension_2d;
    let clamped = (width.clamp(1, max), height.clamp(1, max));
    if clamped != (width, height) {
        log::warn!(
            "Render target size {}x{} clamped to {}x{}",
            width,
            height,
            clamped.0,
            clamped.1
        );
    }
    clamped
}

fn allocate(device: &Device, width: u32, height: u32) -> (Attachments, TargetStatus) {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };

    let (attachments, error) = capture_validation(device, || {
        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Preview Color"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Preview Depth"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        Attachments {
            color,
            color_view,
            depth,
            depth_view,
        }
    });

    let status = match error {
        None => TargetStatus::Complete,
        Some(message) => TargetStatus::Incomplete(message),
    };
    (attachments, status)
}

fn log_status(status: &TargetStatus, width: u32, height: u32) {
    match status {
        TargetStatus::Complete => log::debug!("Allocated {}x{} render target", width, height),
        TargetStatus::Incomplete(message) => log::error!(
            "Render target {}x{} is not complete: {}",
            width,
            height,
            message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::test_gpu;

    #[test]
    fn test_same_size_is_noop() {
        let Some(gpu) = test_gpu() else { return };
        let mut target = RenderTarget::new(gpu.device.clone(), 800, 600);

        assert!(!target.ensure_size(800, 600));
        assert_eq!(target.allocations(), 1);
        assert_eq!(target.generation(), 0);
        assert!(target.status().is_complete());
    }

    #[test]
    fn test_resize_cycle() {
        let Some(gpu) = test_gpu() else { return };
        let mut target = RenderTarget::new(gpu.device.clone(), 800, 600);

        assert!(target.ensure_size(400, 300));
        assert_eq!(target.size(), (400, 300));
        assert_eq!(target.color_texture().width(), 400);
        assert_eq!(target.depth_texture().height(), 300);
        assert!(target.status().is_complete());

        assert!(target.ensure_size(800, 600));
        assert_eq!(target.size(), (800, 600));
        assert_eq!(target.color_texture().width(), 800);
        assert_eq!(target.depth_texture().height(), 600);

        // Construction plus two reallocation cycles
        assert_eq!(target.allocations(), 3);
        assert_eq!(target.generation(), 2);
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let Some(gpu) = test_gpu() else { return };
        let mut target = RenderTarget::new(gpu.device.clone(), 0, 0);
        assert_eq!(target.size(), (1, 1));

        target.ensure_size(0, 32);
        assert_eq!(target.size(), (1, 32));
        assert!(target.status().is_complete());
    }

    #[test]
    fn test_clear_pass_writes_color() {
        let Some(gpu) = test_gpu() else { return };
        let target = RenderTarget::new(gpu.device.clone(), 4, 4);

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let _pass = target.bind_for_draw(&mut encoder, wgpu::Color::RED);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let pixels =
            crate::readback::read_rgba8(&gpu.device, &gpu.queue, target.color_texture()).unwrap();
        assert_eq!(&pixels[0..4], &[255, 0, 0, 255]);
    }
}
