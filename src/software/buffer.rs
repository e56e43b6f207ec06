use crate::color::Color;
use crate::geometry::DeviceRect;

/// CPU render target: premultiplied `0xAARRGGBB` pixels, row-major, no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn rect(&self) -> DeviceRect {
        DeviceRect::from_size(self.width, self.height)
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    /// Pixel at `(x, y)`, `None` outside the buffer.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Changes the size; the content is cleared to transparent.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels.resize(width as usize * height as usize, 0);
    }

    pub fn fill(&mut self, color: Color) {
        self.pixels.fill(color.to_premultiplied_argb());
    }

    pub(crate) fn row_mut(&mut self, y: u32) -> &mut [u32] {
        let start = y as usize * self.width as usize;
        &mut self.pixels[start..start + self.width as usize]
    }
}

/// Pixel layout of an [`Image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    /// Premultiplied `0xAARRGGBB` words in native byte order.
    Argb32Premultiplied,
    /// Straight-alpha RGBA bytes.
    Rgba8,
    /// BC1 compressed blocks. GPU textures only; the software renderer cannot
    /// sample them.
    Bc1,
}

impl ImageFormat {
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            ImageFormat::Argb32Premultiplied | ImageFormat::Rgba8 => Some(4),
            ImageFormat::Bc1 => None,
        }
    }
}

/// Immutable image shared between paintables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    format: ImageFormat,
    has_alpha: bool,
    data: Vec<u8>,
}

impl Image {
    pub fn new(width: u32, height: u32, format: ImageFormat, data: Vec<u8>) -> Self {
        let has_alpha = match format {
            ImageFormat::Rgba8 => data.chunks_exact(4).any(|pixel| pixel[3] != 255),
            ImageFormat::Argb32Premultiplied => data.chunks_exact(4).any(|pixel| {
                let word = u32::from_ne_bytes([pixel[0], pixel[1], pixel[2], pixel[3]]);
                word >> 24 != 0xFF
            }),
            ImageFormat::Bc1 => true,
        };
        Self {
            width,
            height,
            format,
            has_alpha,
            data,
        }
    }

    /// An RGBA8 image with every pixel set to `color`.
    pub fn solid(width: u32, height: u32, color: Color) -> Self {
        let data = color.to_array().repeat(width as usize * height as usize);
        Self::new(width, height, ImageFormat::Rgba8, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Premultiplied ARGB of the texel at `(x, y)`, clamped to the edges.
    ///
    /// # Panics
    ///
    /// Panics for formats the software renderer cannot sample.
    pub fn texel(&self, x: i32, y: i32) -> u32 {
        let Some(bytes_per_pixel) = self.format.bytes_per_pixel() else {
            panic!(
                "software renderer cannot sample {:?} images",
                self.format
            );
        };
        if self.width == 0 || self.height == 0 {
            return 0;
        }
        let x = x.clamp(0, self.width as i32 - 1) as usize;
        let y = y.clamp(0, self.height as i32 - 1) as usize;
        let offset = (y * self.width as usize + x) * bytes_per_pixel;
        let Some(pixel) = self.data.get(offset..offset + bytes_per_pixel) else {
            return 0;
        };
        match self.format {
            ImageFormat::Argb32Premultiplied => {
                u32::from_ne_bytes([pixel[0], pixel[1], pixel[2], pixel[3]])
            }
            ImageFormat::Rgba8 => {
                Color::rgba(pixel[0], pixel[1], pixel[2], pixel[3]).to_premultiplied_argb()
            }
            ImageFormat::Bc1 => unreachable!("rejected above"),
        }
    }
}
