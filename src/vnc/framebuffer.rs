//! Lock-protected RGBA32 framebuffer.
//!
//! Width, height, generation and pixel data live behind a single lock, so a
//! reader can never observe dimensions that disagree with the buffer size.
//! Only the processing thread mutates the store; render threads read it through
//! [`FramebufferStore::with_snapshot`].

use log::{debug, error};

use super::error::{FramebufferError, StoreError};
use super::lock::StoreLock;

/// Bytes per pixel. The pixel format is fixed at 32 bpp RGBA.
pub const BYTES_PER_PIXEL: usize = 4;

/// Largest framebuffer the store will allocate: 1 GiB, i.e. 16384x16384.
pub const MAX_FRAMEBUFFER_BYTES: u64 = 1 << 30;

#[derive(Default)]
struct Framebuffer {
    width: u32,
    height: u32,
    generation: u64,
    data: Vec<u8>,
}

/// Read access to the framebuffer while its lock is held.
#[derive(Debug, Clone, Copy)]
pub struct FramebufferView<'a> {
    pub width: u32,
    pub height: u32,
    /// Incremented on every reallocation.
    pub generation: u64,
    /// `width * height * 4` bytes, RGBA, row-major.
    pub data: &'a [u8],
}

/// Owner of the session's pixel buffer.
pub struct FramebufferStore {
    state: StoreLock<Framebuffer>,
}

/// Byte size of a `width`x`height` framebuffer, if it is within limits.
pub fn frame_size(width: u32, height: u32) -> Result<usize, FramebufferError> {
    let too_large = || FramebufferError::TooLarge {
        width,
        height,
        limit: MAX_FRAMEBUFFER_BYTES,
    };

    let bytes = u64::from(width)
        .checked_mul(u64::from(height))
        .and_then(|pixels| pixels.checked_mul(BYTES_PER_PIXEL as u64))
        .filter(|bytes| *bytes <= MAX_FRAMEBUFFER_BYTES)
        .ok_or_else(too_large)?;

    usize::try_from(bytes).map_err(|_| too_large())
}

impl FramebufferStore {
    /// Creates an empty (0x0) framebuffer at generation 0.
    pub fn new() -> Self {
        Self {
            state: StoreLock::new(Framebuffer::default()),
        }
    }

    /// Replaces the buffer with a zero-filled one of the given dimensions.
    ///
    /// Sizes that overflow or exceed [`MAX_FRAMEBUFFER_BYTES`] are rejected
    /// before the lock is taken, leaving the store untouched. If allocation
    /// fails the store publishes a 0x0 framebuffer and the connection should be
    /// considered unusable.
    ///
    /// # Returns
    ///
    /// The new generation number.
    pub fn reallocate(&self, width: u32, height: u32) -> Result<u64, FramebufferError> {
        let len = frame_size(width, height)?;

        let mut fb = self.state.lock()?;
        // Free the old buffer first; the new one may be as large as the cap.
        fb.data = Vec::new();
        fb.generation += 1;

        let mut data = Vec::new();
        if data.try_reserve_exact(len).is_err() {
            fb.width = 0;
            fb.height = 0;
            error!("Failed to allocate {} bytes for {}x{} framebuffer", len, width, height);
            return Err(FramebufferError::Allocation {
                width,
                height,
                bytes: len,
            });
        }
        data.resize(len, 0);

        fb.data = data;
        fb.width = width;
        fb.height = height;
        debug!("Framebuffer reallocated to {}x{} (generation {})", width, height, fb.generation);
        Ok(fb.generation)
    }

    /// Drops the pixel buffer and publishes a 0x0 framebuffer.
    pub fn release(&self) -> Result<(), StoreError> {
        let mut fb = self.state.lock()?;
        if fb.width != 0 || fb.height != 0 || !fb.data.is_empty() {
            fb.data = Vec::new();
            fb.width = 0;
            fb.height = 0;
            fb.generation += 1;
        }
        Ok(())
    }

    /// Runs `f` with read access to the framebuffer.
    ///
    /// Must not be called from inside another `with_snapshot` on the same
    /// store; that call fails with [`StoreError::Reentrant`].
    pub fn with_snapshot<R>(
        &self,
        f: impl FnOnce(FramebufferView<'_>) -> R,
    ) -> Result<R, StoreError> {
        let fb = self.state.lock()?;
        Ok(f(FramebufferView {
            width: fb.width,
            height: fb.height,
            generation: fb.generation,
            data: &fb.data,
        }))
    }

    pub fn dimensions(&self) -> Result<(u32, u32), StoreError> {
        self.with_snapshot(|fb| (fb.width, fb.height))
    }

    pub fn generation(&self) -> Result<u64, StoreError> {
        self.with_snapshot(|fb| fb.generation)
    }

    /// Copies a `width`x`height` block of RGBA pixels to (`x`, `y`).
    ///
    /// `pixels` is row-major with no padding. Rectangles that do not fit in
    /// the current framebuffer are rejected.
    pub fn write_rect(
        &self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<(), FramebufferError> {
        let mut fb = self.state.lock()?;
        let row_len = check_rect(&fb, x, y, width, height)?;
        if row_len == 0 || height == 0 {
            return Ok(());
        }

        let expected = row_len * height as usize;
        if pixels.len() < expected {
            return Err(FramebufferError::ShortBuffer {
                expected,
                actual: pixels.len(),
            });
        }

        let stride = fb.width as usize * BYTES_PER_PIXEL;
        let x_offset = x as usize * BYTES_PER_PIXEL;
        for (row, src) in pixels[..expected].chunks_exact(row_len).enumerate() {
            let dst = (y as usize + row) * stride + x_offset;
            fb.data[dst..dst + row_len].copy_from_slice(src);
        }
        Ok(())
    }

    /// Fills a rectangle with a single RGBA pixel value.
    pub fn fill_rect(
        &self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        pixel: [u8; 4],
    ) -> Result<(), FramebufferError> {
        let mut fb = self.state.lock()?;
        let row_len = check_rect(&fb, x, y, width, height)?;

        let stride = fb.width as usize * BYTES_PER_PIXEL;
        let x_offset = x as usize * BYTES_PER_PIXEL;
        for row in 0..height as usize {
            let dst = (y as usize + row) * stride + x_offset;
            for px in fb.data[dst..dst + row_len].chunks_exact_mut(BYTES_PER_PIXEL) {
                px.copy_from_slice(&pixel);
            }
        }
        Ok(())
    }
}

impl Default for FramebufferStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates a rectangle against the framebuffer and returns its row length in
/// bytes.
fn check_rect(
    fb: &Framebuffer,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> Result<usize, FramebufferError> {
    let fits = x.checked_add(width).is_some_and(|right| right <= fb.width)
        && y.checked_add(height).is_some_and(|bottom| bottom <= fb.height);
    if !fits {
        return Err(FramebufferError::OutOfBounds {
            x,
            y,
            width,
            height,
            fb_width: fb.width,
            fb_height: fb.height,
        });
    }
    Ok(width as usize * BYTES_PER_PIXEL)
}
