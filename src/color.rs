use crate::util::normalize_rgba_color;

/// Represents a color in RGBA format.
///
/// Each channel is an 8-bit unsigned integer, not premultiplied. The batching
/// renderer feeds the normalized form to material uniforms; the software renderer
/// converts to premultiplied ARGB32 before painting.
///
/// # Examples
///
/// ```
/// use strata::Color;
///
/// let red = Color::rgb(255, 0, 0);
/// assert_eq!(red.normalize(), [1.0, 0.0, 0.0, 1.0]);
///
/// let semi_blue = Color::rgba(0, 0, 255, 128);
/// assert!(!semi_blue.is_opaque());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color(pub [u8; 4]);

impl Color {
    /// A transparent color.
    ///
    /// All color channels are set to zero, making the color fully transparent.
    pub const TRANSPARENT: Self = Self([0, 0, 0, 0]);
    /// A black color.
    pub const BLACK: Self = Self([0, 0, 0, 255]);
    /// A white color.
    pub const WHITE: Self = Self([255, 255, 255, 255]);

    /// Creates a new color with the specified RGB values and full opacity.
    ///
    /// ```
    /// use strata::Color;
    ///
    /// let green = Color::rgb(0, 255, 0);
    /// assert_eq!(green, Color([0, 255, 0, 255]));
    /// ```
    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }

    /// Creates a new color with the specified RGBA values.
    pub fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self([r, g, b, a])
    }

    /// Normalizes the color values to the range [0.0, 1.0].
    pub fn normalize(&self) -> [f32; 4] {
        normalize_rgba_color(&self.0)
    }

    /// Returns the color as an array of 4 `u8` values.
    pub fn to_array(&self) -> [u8; 4] {
        self.0
    }

    pub fn alpha(&self) -> u8 {
        self.0[3]
    }

    pub fn is_opaque(&self) -> bool {
        self.0[3] == 255
    }

    /// Packs the color as premultiplied `0xAARRGGBB`, the pixel layout of
    /// [`PixelBuffer`](crate::software::PixelBuffer).
    ///
    /// ```
    /// use strata::Color;
    ///
    /// assert_eq!(Color::rgb(255, 0, 0).to_premultiplied_argb(), 0xFFFF0000);
    /// assert_eq!(Color::rgba(255, 255, 255, 0).to_premultiplied_argb(), 0);
    /// ```
    pub fn to_premultiplied_argb(&self) -> u32 {
        let [r, g, b, a] = self.0;
        let premultiply = |channel: u8| (channel as u32 * a as u32 + 127) / 255;
        ((a as u32) << 24) | (premultiply(r) << 16) | (premultiply(g) << 8) | premultiply(b)
    }
}
