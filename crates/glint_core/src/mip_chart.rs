//! Debug texture that paints each mip level a different solid colour.

use crate::pyramid::level_dimensions;
use crate::texture::ImageData;

const PALETTE: [[u8; 4]; 8] = [
    [255, 255, 255, 255],
    [255, 64, 64, 255],
    [255, 160, 32, 255],
    [240, 240, 48, 255],
    [64, 220, 64, 255],
    [48, 200, 240, 255],
    [64, 64, 255, 255],
    [200, 64, 255, 255],
];

/// Colour of a mip level. Wraps around after eight levels.
pub fn level_color(level: usize) -> [u8; 4] {
    PALETTE[level % PALETTE.len()]
}

/// RGBA8 images for every level of a `width` x `height` chain, level 0 first.
///
/// Levels halve until either side reaches 0, the same schedule as the
/// statistics pyramid, so the chart can be sampled alongside it.
pub fn mip_chart(width: u32, height: u32) -> Vec<ImageData> {
    level_dimensions(width, height)
        .into_iter()
        .enumerate()
        .map(|(level, (w, h))| ImageData {
            width: w,
            height: h,
            channels: 4,
            pixels: level_color(level).repeat((w * h) as usize),
            path: format!("mip_chart[{}]", level),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chart_levels_are_solid_and_distinct() {
        let levels = mip_chart(64, 32);
        assert_eq!(levels.len(), 6);

        for (i, level) in levels.iter().enumerate() {
            assert_eq!(level.width, 64 >> i);
            assert_eq!(level.height, 32 >> i);
            assert!(level.pixels.chunks(4).all(|p| p == level_color(i)));
        }
        assert_ne!(level_color(0), level_color(1));
    }

    #[test]
    fn test_palette_wraps() {
        assert_eq!(level_color(8), level_color(0));
    }
}
