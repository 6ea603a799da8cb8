/// RGBA color used for solid sources.
///
/// Channels are represented as `f32` in the range `0.0 ..= 1.0`, not premultiplied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    /// Red channel
    pub r: f32,
    /// Green channel
    pub g: f32,
    /// Blue channel
    pub b: f32,
    /// Alpha channel (opacity)
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);

    /// Creates a new color from `f32` channel values in the range `0.0 ..= 1.0`.
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Color {
        Color { r, g, b, a }
    }

    /// Creates a new color from `u8` channel values in the range `0 ..= 255`.
    pub fn from_u8(r: u8, g: u8, b: u8, a: u8) -> Color {
        Color {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
            a: a as f32 / 255.0,
        }
    }

    pub fn is_opaque(&self) -> bool {
        self.a >= 1.0
    }

    /// Premultiplied 8-bit channels in `[a, r, g, b]` order.
    pub fn to_premultiplied_argb(&self) -> [u8; 4] {
        let a = self.a.clamp(0.0, 1.0);
        let c = |v: f32| (v.clamp(0.0, 1.0) * a * 255.0 + 0.5) as u8;
        [(a * 255.0 + 0.5) as u8, c(self.r), c(self.g), c(self.b)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_u8_round_trips_through_premultiply_when_opaque() {
        let c = Color::from_u8(10, 128, 255, 255);
        assert!(c.is_opaque());
        assert_eq!(c.to_premultiplied_argb(), [255, 10, 128, 255]);
    }

    #[test]
    fn premultiplies_by_alpha() {
        let c = Color::new(1.0, 0.5, 0.0, 0.5);
        assert_eq!(c.to_premultiplied_argb(), [128, 128, 64, 0]);
        assert_eq!(Color::TRANSPARENT.to_premultiplied_argb(), [0, 0, 0, 0]);
    }
}
