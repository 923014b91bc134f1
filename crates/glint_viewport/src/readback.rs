//! Tight RGBA8 texture readback.

use std::sync::mpsc;

use anyhow::{anyhow, ensure, Result};

/// Round up to the 256-byte row alignment buffer copies require.
fn align_bytes_per_row(value: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    value.div_ceil(align) * align
}

/// Copy mip 0 of an RGBA8 texture into a tightly packed, top-row-first buffer.
pub fn read_rgba8(device: &wgpu::Device, queue: &wgpu::Queue, src: &wgpu::Texture) -> Result<Vec<u8>> {
    ensure!(
        matches!(
            src.format(),
            wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb
        ),
        "readback only supports RGBA8 textures, got {:?}",
        src.format()
    );

    let (width, height) = (src.width(), src.height());
    let tight_bpr = width * 4;
    let padded_bpr = align_bytes_per_row(tight_bpr);

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging"),
        size: (padded_bpr * height) as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture: src,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_bpr),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    receiver
        .recv()
        .map_err(|_| anyhow!("map_async callback never ran"))??;

    let data = slice.get_mapped_range();
    let mut tight = vec![0u8; (tight_bpr * height) as usize];
    for row in 0..height as usize {
        let src_offset = row * padded_bpr as usize;
        let dst_offset = row * tight_bpr as usize;
        tight[dst_offset..dst_offset + tight_bpr as usize]
            .copy_from_slice(&data[src_offset..src_offset + tight_bpr as usize]);
    }
    drop(data);
    staging.unmap();

    Ok(tight)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_alignment() {
        assert_eq!(align_bytes_per_row(4), 256);
        assert_eq!(align_bytes_per_row(256), 256);
        assert_eq!(align_bytes_per_row(800 * 4), 3328);
    }
}
