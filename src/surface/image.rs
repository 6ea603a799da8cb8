//! Image adapter.
//!
//! An [`ImageSurface`] exposes raw device pixels to the rasterizer. The adapter created for a
//! platform surface records that surface as its parent; mapping an image produces a view onto
//! the same pixel memory, offset to the mapped area.
//!
//! Coordinates passed to the pixel accessors are in device space: a view mapped at `(2, 3)`
//! answers `pixel(2, 3)` with its own first pixel.

use crate::errors::SurfaceError;
use crate::format::Format;
use crate::geometry::RectInt;
use crate::platform::PixelStorage;
use crate::surface::backend::SurfaceId;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Packs 8-bit premultiplied ARGB into the native pixel value of `format`.
pub fn pack(format: Format, argb: [u8; 4]) -> u32 {
    let [a, r, g, b] = argb;
    match format {
        Format::A8 => a as u32,
        Format::Rgb16_565 => ((r as u32 >> 3) << 11) | ((g as u32 >> 2) << 5) | (b as u32 >> 3),
        Format::Rgb24 => u32::from_be_bytes([0, r, g, b]),
        _ => u32::from_be_bytes([a, r, g, b]),
    }
}

/// Unpacks a native pixel value of `format` into 8-bit premultiplied ARGB.
pub fn unpack(format: Format, raw: u32) -> [u8; 4] {
    match format {
        Format::A8 => [raw as u8, 0, 0, 0],
        Format::Rgb16_565 => {
            let r = ((raw >> 11) & 0x1f) as u8;
            let g = ((raw >> 5) & 0x3f) as u8;
            let b = (raw & 0x1f) as u8;
            [0xff, (r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)]
        }
        Format::Rgb24 => {
            let [_, r, g, b] = raw.to_be_bytes();
            [0xff, r, g, b]
        }
        _ => raw.to_be_bytes(),
    }
}

/// Raw pixels wrapped as a rasterizer image.
#[derive(Debug)]
pub struct ImageSurface {
    format: Format,
    width: i32,
    height: i32,
    stride: usize,
    storage: PixelStorage,
    /// Byte offset of this image's first pixel inside `storage`
    base: usize,
    /// Device-space position of this image's first pixel
    origin: (i32, i32),
    parent: Option<SurfaceId>,
    clear: Arc<AtomicBool>,
    /// False for views narrower than the wrapped pixel memory
    whole: bool,
}

impl ImageSurface {
    /// Wraps existing pixel memory. The pixels are assumed to hold unknown content.
    pub fn for_data(
        storage: PixelStorage,
        format: Format,
        width: i32,
        height: i32,
        stride: usize,
    ) -> Result<Self, SurfaceError> {
        if format.bytes_per_pixel() == 0 || format.bytes_per_pixel() > 4 {
            return Err(SurfaceError::UnsupportedFormat(format));
        }
        if width < 0 || height < 0 {
            return Err(SurfaceError::InvalidArgument("image size must not be negative"));
        }

        if stride < (width as usize) * format.bytes_per_pixel() {
            return Err(SurfaceError::InvalidArgument("stride too small for width"));
        }
        if storage.len() < stride * height as usize {
            return Err(SurfaceError::InvalidArgument("pixel memory too small for image"));
        }

        Ok(Self {
            format,
            width,
            height,
            stride,
            storage,
            base: 0,
            origin: (0, 0),
            parent: None,
            clear: Arc::new(AtomicBool::new(false)),
            whole: true,
        })
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Device-space offset of this image.
    pub fn origin(&self) -> (i32, i32) {
        self.origin
    }

    /// Area this image covers in device space.
    pub fn device_extents(&self) -> RectInt {
        RectInt::new(self.origin.0, self.origin.1, self.width, self.height)
    }

    pub fn parent(&self) -> Option<SurfaceId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: SurfaceId) {
        self.parent = Some(parent);
    }

    /// Unlinks the adapter from its owning surface.
    pub fn detach(&mut self) -> Option<SurfaceId> {
        self.parent.take()
    }

    pub fn storage(&self) -> &PixelStorage {
        &self.storage
    }

    pub fn shares_storage_with(&self, other: &ImageSurface) -> bool {
        self.storage.ptr_eq(&other.storage)
    }

    /// True when the pixels are known to be all zero.
    pub fn is_clear(&self) -> bool {
        self.clear.load(Ordering::Relaxed)
    }

    /// Returns a view of `extents` (device space, clipped to this image). `None` maps everything.
    pub fn map(&self, extents: Option<&RectInt>) -> Result<ImageSurface, SurfaceError> {
        let own = self.device_extents();
        let area = match extents {
            None => own,
            Some(r) => r
                .intersect(&own)
                .ok_or(SurfaceError::InvalidArgument("mapped area lies outside the image"))?,
        };

        let dx = (area.x - own.x) as usize;
        let dy = (area.y - own.y) as usize;
        Ok(ImageSurface {
            format: self.format,
            width: area.width,
            height: area.height,
            stride: self.stride,
            storage: self.storage.clone(),
            base: self.base + dy * self.stride + dx * self.format.bytes_per_pixel(),
            origin: (area.x, area.y),
            parent: None,
            clear: self.clear.clone(),
            whole: self.whole && area == own,
        })
    }

    fn offset(&self, x: i32, y: i32) -> Option<usize> {
        let lx = x - self.origin.0;
        let ly = y - self.origin.1;
        if lx < 0 || ly < 0 || lx >= self.width || ly >= self.height {
            return None;
        }
        Some(self.base + ly as usize * self.stride + lx as usize * self.format.bytes_per_pixel())
    }

    /// Native pixel value at device position `(x, y)`.
    pub fn pixel(&self, x: i32, y: i32) -> Option<u32> {
        let offset = self.offset(x, y)?;
        let bpp = self.format.bytes_per_pixel();
        Some(self.storage.with(|px| {
            let mut buf = [0u8; 4];
            buf[..bpp].copy_from_slice(&px[offset..offset + bpp]);
            u32::from_le_bytes(buf)
        }))
    }

    pub fn set_pixel(&self, x: i32, y: i32, value: u32) -> bool {
        let Some(offset) = self.offset(x, y) else {
            return false;
        };
        let bpp = self.format.bytes_per_pixel();
        self.storage
            .with_mut(|px| px[offset..offset + bpp].copy_from_slice(&value.to_le_bytes()[..bpp]));
        self.clear.store(false, Ordering::Relaxed);
        true
    }

    /// Fills `rect` (device space, clipped to this image) with a native pixel value.
    pub fn fill_rect(&self, rect: &RectInt, value: u32) {
        let Some(area) = rect.intersect(&self.device_extents()) else {
            return;
        };

        let bpp = self.format.bytes_per_pixel();
        let bytes = value.to_le_bytes();
        self.storage.with_mut(|px| {
            for y in area.y..area.bottom() {
                let row = self.base + (y - self.origin.1) as usize * self.stride;
                for x in area.x..area.right() {
                    let at = row + (x - self.origin.0) as usize * bpp;
                    px[at..at + bpp].copy_from_slice(&bytes[..bpp]);
                }
            }
        });
        if value != 0 {
            self.clear.store(false, Ordering::Relaxed);
        }
    }

    /// Zeroes every pixel of this image. Only a full view marks the storage as clear.
    pub fn clear(&self) {
        let row_bytes = self.width as usize * self.format.bytes_per_pixel();
        self.storage.with_mut(|px| {
            for y in 0..self.height as usize {
                let at = self.base + y * self.stride;
                px[at..at + row_bytes].fill(0);
            }
        });
        if self.whole {
            self.clear.store(true, Ordering::Relaxed);
        }
    }

    /// Read access to the pixel rows, starting at this image's first pixel.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8], usize) -> R) -> R {
        self.storage.with(|px| f(&px[self.base..], self.stride))
    }

    /// Write access to the pixel rows, starting at this image's first pixel.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8], usize) -> R) -> R {
        self.clear.store(false, Ordering::Relaxed);
        self.storage.with_mut(|px| f(&mut px[self.base..], self.stride))
    }

    /// Writes the image as an 8-bit PNG. Premultiplied colors are converted back to straight alpha.
    pub fn write_png<W: Write>(&self, writer: W) -> Result<(), SurfaceError> {
        let (color, channels) = match self.format {
            Format::A8 => (png::ColorType::Grayscale, 1),
            Format::Rgb16_565 | Format::Rgb24 => (png::ColorType::Rgb, 3),
            _ => (png::ColorType::Rgba, 4),
        };

        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * channels);
        for y in 0..self.height {
            for x in 0..self.width {
                let raw = self.pixel(self.origin.0 + x, self.origin.1 + y).unwrap_or(0);
                let [a, r, g, b] = unpack(self.format, raw);
                match channels {
                    1 => data.push(a),
                    3 => data.extend_from_slice(&[r, g, b]),
                    _ => data.extend_from_slice(&unpremultiply([a, r, g, b])),
                }
            }
        }

        let mut encoder = png::Encoder::new(writer, self.width as u32, self.height as u32);
        encoder.set_color(color);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&data)?;
        writer.finish()?;
        Ok(())
    }
}

fn unpremultiply([a, r, g, b]: [u8; 4]) -> [u8; 4] {
    if a == 0 {
        return [0, 0, 0, 0];
    }
    let f = |c: u8| ((c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8;
    [f(r), f(g), f(b), a]
}
