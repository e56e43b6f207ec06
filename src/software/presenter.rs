use std::num::NonZeroU32;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;
use tracing::trace;

use super::buffer::PixelBuffer;
use super::region::DirtyRegion;

#[derive(Debug, Error)]
pub enum PresentError {
    #[error("softbuffer surface error: {0}")]
    Surface(#[from] softbuffer::SoftBufferError),
    #[error("cannot present an empty {width}x{height} buffer")]
    EmptyBuffer { width: u32, height: u32 },
}

/// Shows a [`PixelBuffer`] in a window through softbuffer, copying and
/// presenting only the dirty region when the surface still holds the
/// previous frame.
pub struct SoftbufferPresenter<D, W> {
    // Kept alive for the surface.
    _context: softbuffer::Context<D>,
    surface: softbuffer::Surface<D, W>,
    size: Option<(NonZeroU32, NonZeroU32)>,
}

impl<D: HasDisplayHandle, W: HasWindowHandle> SoftbufferPresenter<D, W> {
    pub fn new(display: D, window: W) -> Result<Self, PresentError> {
        let context = softbuffer::Context::new(display)?;
        let surface = softbuffer::Surface::new(&context, window)?;
        Ok(Self {
            _context: context,
            surface,
            size: None,
        })
    }

    pub fn window(&self) -> &W {
        self.surface.window()
    }

    /// Copies the pixels of `region` from `buffer` and presents them. The
    /// whole buffer is copied after a resize or when the surface buffer does
    /// not contain the previous frame.
    pub fn present(&mut self, buffer: &PixelBuffer, region: &DirtyRegion) -> Result<(), PresentError> {
        let (Some(width), Some(height)) = (
            NonZeroU32::new(buffer.width()),
            NonZeroU32::new(buffer.height()),
        ) else {
            return Err(PresentError::EmptyBuffer {
                width: buffer.width(),
                height: buffer.height(),
            });
        };
        let resized = self.size != Some((width, height));
        if resized {
            self.surface.resize(width, height)?;
            self.size = Some((width, height));
        }

        let mut target = self.surface.buffer_mut()?;
        let full = resized || target.age() != 1;
        let damage = if full {
            target.copy_from_slice(buffer.pixels());
            vec![softbuffer::Rect {
                x: 0,
                y: 0,
                width,
                height,
            }]
        } else {
            let region = region.intersected(&buffer.rect());
            let row_width = buffer.width() as usize;
            let mut damage = Vec::with_capacity(region.rects().len());
            for rect in region.rects() {
                for y in rect.y..rect.bottom() {
                    let start = y as usize * row_width + rect.x as usize;
                    let end = start + rect.width as usize;
                    target[start..end].copy_from_slice(&buffer.pixels()[start..end]);
                }
                if let (Some(width), Some(height)) = (
                    NonZeroU32::new(rect.width as u32),
                    NonZeroU32::new(rect.height as u32),
                ) {
                    damage.push(softbuffer::Rect {
                        x: rect.x as u32,
                        y: rect.y as u32,
                        width,
                        height,
                    });
                }
            }
            damage
        };

        trace!(
            "presenting {} damage rect(s), full copy: {}",
            damage.len(),
            full
        );
        if damage.is_empty() {
            return Ok(());
        }
        target.present_with_damage(&damage)?;
        Ok(())
    }
}
