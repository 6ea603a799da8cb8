use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Pixel formats known to the rendering library. Only a subset can be backed by a device buffer,
/// see [`Format::is_supported`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum Format {
    Invalid,
    /// 1-bit alpha
    A1,
    /// 8-bit alpha
    A8,
    Rgb16_565,
    /// 24-bit RGB stored in 32 bits, the top byte is unused
    Rgb24,
    /// 32-bit premultiplied ARGB
    Argb32,
    /// 10 bits per channel in 32 bits
    Rgb30,
    Rgb96F,
    Rgba128F,
}

bitflags! {
    /// What a surface holds: color, alpha or both.
    pub struct Content: u32 {
        const COLOR       = 0x1000;
        const ALPHA       = 0x2000;
        const COLOR_ALPHA = Self::COLOR.bits | Self::ALPHA.bits;
    }
}

impl Format {
    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            Format::Invalid => 0,
            Format::A1 => 1,
            Format::A8 => 8,
            Format::Rgb16_565 => 16,
            Format::Rgb24 | Format::Argb32 | Format::Rgb30 => 32,
            Format::Rgb96F => 96,
            Format::Rgba128F => 128,
        }
    }

    /// Bytes occupied by one pixel, rounded up. Zero for `Invalid` and `A1`.
    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel() / 8) as usize
    }

    /// Row stride for the given width, aligned to 4 bytes.
    pub fn stride_for_width(&self, width: i32) -> Option<usize> {
        if width < 0 || *self == Format::Invalid {
            return None;
        }
        let bits = (width as usize).checked_mul(self.bits_per_pixel() as usize)?;
        let bytes = bits.div_ceil(8);
        Some(bytes.div_ceil(4) * 4)
    }

    /// Formats a device buffer can be created for.
    pub fn is_supported(&self) -> bool {
        matches!(self, Format::A8 | Format::Rgb16_565 | Format::Rgb24 | Format::Argb32)
    }

    pub fn from_content(content: Content) -> Format {
        if content == Content::COLOR {
            Format::Rgb24
        } else if content == Content::ALPHA {
            Format::A8
        } else {
            Format::Argb32
        }
    }

    pub fn content(&self) -> Content {
        match self {
            Format::A1 | Format::A8 => Content::ALPHA,
            Format::Rgb16_565 | Format::Rgb24 | Format::Rgb30 | Format::Rgb96F => Content::COLOR,
            Format::Argb32 | Format::Rgba128F => Content::COLOR_ALPHA,
            Format::Invalid => Content::COLOR_ALPHA,
        }
    }

    /// Derives the format from a device's color depth and whether it carries an alpha mask.
    pub fn from_depth(depth: u32, has_alpha_mask: bool) -> Format {
        match depth {
            8 => Format::A8,
            16 => Format::Rgb16_565,
            24 => Format::Rgb24,
            32 if has_alpha_mask => Format::Argb32,
            32 => Format::Rgb24,
            _ => Format::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_is_four_byte_aligned() {
        assert_eq!(Format::A8.stride_for_width(5), Some(8));
        assert_eq!(Format::Rgb16_565.stride_for_width(3), Some(8));
        assert_eq!(Format::Argb32.stride_for_width(3), Some(12));
        assert_eq!(Format::A1.stride_for_width(33), Some(8));
        assert_eq!(Format::Invalid.stride_for_width(3), None);
    }

    #[test]
    fn depth_mapping() {
        assert_eq!(Format::from_depth(8, false), Format::A8);
        assert_eq!(Format::from_depth(16, false), Format::Rgb16_565);
        assert_eq!(Format::from_depth(24, false), Format::Rgb24);
        assert_eq!(Format::from_depth(32, true), Format::Argb32);
        assert_eq!(Format::from_depth(32, false), Format::Rgb24);
        assert_eq!(Format::from_depth(15, false), Format::Invalid);
    }

    #[test]
    fn supported_set() {
        let supported: Vec<Format> = [
            Format::Invalid,
            Format::A1,
            Format::A8,
            Format::Rgb16_565,
            Format::Rgb24,
            Format::Argb32,
            Format::Rgb30,
            Format::Rgb96F,
            Format::Rgba128F,
        ]
        .into_iter()
        .filter(|f| f.is_supported())
        .collect();
        assert_eq!(supported, vec![Format::A8, Format::Rgb16_565, Format::Rgb24, Format::Argb32]);
    }

    #[test]
    fn content_round_trips_through_format() {
        assert_eq!(Format::from_content(Content::COLOR), Format::Rgb24);
        assert_eq!(Format::from_content(Content::ALPHA), Format::A8);
        assert_eq!(Format::from_content(Content::COLOR_ALPHA), Format::Argb32);
        assert!(!Format::Rgb24.content().contains(Content::ALPHA));
    }
}
