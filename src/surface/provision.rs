//! Pixel buffer provisioning.
//!
//! Turns a pixel format and a size into a device buffer, and derives the raw pixel layout of
//! any device context so it can be wrapped as an image.

use crate::config::SurfaceConfig;
use crate::errors::SurfaceError;
use crate::format::Format;
use crate::geometry::RectInt;
use crate::platform::{BufferRequest, Capability, ChannelMasks, DeviceHandle, DevicePlatform, PaletteColor, PixelStorage};

/// Raw pixel layout of a device context.
#[derive(Clone, Debug)]
pub struct PixelDescriptor {
    pub width: i32,
    pub height: i32,
    /// Bytes per row
    pub stride: usize,
    pub bits_per_pixel: u32,
    pub bytes_per_pixel: u32,
    /// Addressable pixel memory, `None` for live contexts without one
    pub pixels: Option<PixelStorage>,
}

impl PixelDescriptor {
    pub fn extents(&self) -> RectInt {
        RectInt::from_size(self.width, self.height)
    }

    pub fn is_addressable(&self) -> bool {
        self.pixels.is_some()
    }
}

/// Depth and channel masks used for a memory buffer of the given format.
pub fn buffer_layout(format: Format) -> Option<(u32, ChannelMasks)> {
    match format {
        Format::Rgb16_565 => Some((16, ChannelMasks::new(0xF800, 0x07E0, 0x001F, 0x0000))),
        // RGB24 is kept in 32 bits per pixel
        Format::Rgb24 => Some((32, ChannelMasks::new(0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0x0000_0000))),
        Format::Argb32 => Some((32, ChannelMasks::new(0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000))),
        Format::A8 => Some((8, ChannelMasks::new(0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000))),
        Format::A1 | Format::Rgb30 | Format::Rgb96F | Format::Rgba128F | Format::Invalid => None,
    }
}

fn gray_palette() -> Vec<PaletteColor> {
    (0..=255u8).map(|i| PaletteColor { r: i, g: i, b: i, a: 0 }).collect()
}

/// Allocates a memory buffer for `format`.
///
/// Non-positive sizes are handled according to `config.dimension_policy`.
pub fn create_buffer(
    platform: &dyn DevicePlatform,
    config: &SurfaceConfig,
    format: Format,
    width: i32,
    height: i32,
) -> Result<(DeviceHandle, i32, i32), SurfaceError> {
    let (depth, masks) = buffer_layout(format).ok_or(SurfaceError::UnsupportedFormat(format))?;
    let (width, height) = config
        .resolve_size(width, height)
        .ok_or(SurfaceError::InvalidArgument("buffer width and height must be positive"))?;

    let dc = platform.create_offscreen_buffer(&BufferRequest {
        width,
        height,
        depth,
        masks,
        hardware: true,
    });
    if !dc.is_valid() {
        log::error!("create_buffer: no {:?} buffer of {}x{}", format, width, height);
        return Err(SurfaceError::AllocationFailed);
    }

    if format == Format::A8 && !platform.set_palette(dc, 0, &gray_palette()) {
        platform.release_buffer(dc);
        return Err(SurfaceError::device("create_buffer"));
    }

    Ok((dc, width, height))
}

/// Format of an existing context, from its depth and alpha mask.
pub fn format_from_dc(platform: &dyn DevicePlatform, dc: DeviceHandle) -> Format {
    let depth = platform.query_capability(dc, Capability::Depth);
    let has_alpha = platform.query_capability(dc, Capability::AMask) != 0;
    Format::from_depth(depth, has_alpha)
}

/// Derives the pixel layout of a context by querying its capabilities and locking its pixels.
pub fn describe(platform: &dyn DevicePlatform, dc: DeviceHandle) -> PixelDescriptor {
    let mut descriptor = PixelDescriptor {
        width: platform.query_capability(dc, Capability::HPixel) as i32,
        height: platform.query_capability(dc, Capability::VPixel) as i32,
        stride: 0,
        bits_per_pixel: platform.query_capability(dc, Capability::BitsPerPixel),
        bytes_per_pixel: platform.query_capability(dc, Capability::BytesPerPixel),
        pixels: None,
    };

    if let Some(locked) = platform.lock_pixels(dc, &RectInt::new(0, 0, 1, 1)) {
        descriptor.stride = locked.stride;
        descriptor.pixels = Some(locked.storage);
        platform.unlock_pixels(dc);
    }

    descriptor
}
