//! Cursor bitmap storage.
//!
//! Servers send the cursor as pixel data plus a 1-bit transparency mask. The
//! store keeps a composed RGBA bitmap whose alpha channel comes from the mask,
//! so a renderer can blend it without further processing.
//!
//! Some servers (TigerVNC, for one) do not send a cursor until it changes. The
//! store is therefore created with a built-in arrow and is never empty.

use log::{debug, warn};

use super::error::{CursorError, StoreError};
use super::lock::StoreLock;

const PIXEL_BYTES: usize = 4;

const DEFAULT_WIDTH: u16 = 10;
const DEFAULT_HEIGHT: u16 = 16;
const DEFAULT_X_HOT: u16 = 1;
const DEFAULT_Y_HOT: u16 = 1;

/// Fallback arrow. `X` is black, `o` is white, `.` is transparent.
const DEFAULT_SHAPE: [&str; DEFAULT_HEIGHT as usize] = [
    "XX........",
    "XoX.......",
    "XooX......",
    "XoooX.....",
    "XooooX....",
    "XoooooX...",
    "XooooooX..",
    "XoooooooX.",
    "XooooooooX",
    "XoooooXXXX",
    "XooXooX...",
    "XoX.XooX..",
    "XX..XooX..",
    ".....XooX.",
    ".....XooX.",
    "......XX..",
];

struct Cursor {
    width: u16,
    height: u16,
    x_hot: u16,
    y_hot: u16,
    buffer: Vec<u8>,
}

/// Read access to the cursor while its lock is held.
#[derive(Debug, Clone, Copy)]
pub struct CursorView<'a> {
    pub width: u16,
    pub height: u16,
    pub x_hot: u16,
    pub y_hot: u16,
    /// `width * height * 4` bytes, RGBA with mask-derived alpha.
    pub data: &'a [u8],
}

/// Owner of the session's cursor shape.
pub struct CursorStore {
    state: StoreLock<Cursor>,
}

impl CursorStore {
    /// Creates a store holding the default arrow cursor.
    pub fn new() -> Result<Self, CursorError> {
        Ok(Self {
            state: StoreLock::new(default_cursor()?),
        })
    }

    /// Replaces the cursor with new pixel data.
    ///
    /// # Arguments
    ///
    /// * `buffer` - Source pixels, 4 bytes each. Their alpha byte is ignored.
    /// * `mask` - One byte per pixel; non-zero means opaque.
    /// * `width`, `height` - Cursor dimensions in pixels.
    /// * `x_hot`, `y_hot` - Hotspot within the bitmap.
    ///
    /// On failure the previous cursor stays installed.
    pub fn update(
        &self,
        buffer: &[u8],
        mask: &[u8],
        width: u16,
        height: u16,
        x_hot: u16,
        y_hot: u16,
    ) -> Result<(), CursorError> {
        // Compose outside the lock; readers only wait for the swap.
        let composed = compose(buffer, mask, width, height)?;

        let mut cursor = self.state.lock()?;
        *cursor = Cursor {
            width,
            height,
            x_hot,
            y_hot,
            buffer: composed,
        };
        debug!("Cursor updated: {}x{} hotspot ({}, {})", width, height, x_hot, y_hot);
        Ok(())
    }

    /// Reinstalls the default arrow cursor.
    pub fn reset(&self) -> Result<(), CursorError> {
        let fallback = default_cursor()?;
        *self.state.lock()? = fallback;
        Ok(())
    }

    /// Runs `f` with read access to the cursor. Not reentrant.
    pub fn with_snapshot<R>(&self, f: impl FnOnce(CursorView<'_>) -> R) -> Result<R, StoreError> {
        let cursor = self.state.lock()?;
        Ok(f(CursorView {
            width: cursor.width,
            height: cursor.height,
            x_hot: cursor.x_hot,
            y_hot: cursor.y_hot,
            data: &cursor.buffer,
        }))
    }
}

/// Builds the RGBA bitmap: RGB from `buffer`, alpha 0xFF where `mask` is set.
fn compose(buffer: &[u8], mask: &[u8], width: u16, height: u16) -> Result<Vec<u8>, CursorError> {
    let pixels = usize::from(width) * usize::from(height);
    let len = pixels * PIXEL_BYTES;

    if buffer.len() < len {
        warn!("Cursor pixel buffer too short: {} < {}", buffer.len(), len);
        return Err(CursorError::ShortBuffer {
            what: "pixel buffer",
            expected: len,
            actual: buffer.len(),
        });
    }
    if mask.len() < pixels {
        warn!("Cursor mask too short: {} < {}", mask.len(), pixels);
        return Err(CursorError::ShortBuffer {
            what: "mask",
            expected: pixels,
            actual: mask.len(),
        });
    }

    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| CursorError::Allocation { bytes: len })?;
    out.extend_from_slice(&buffer[..len]);

    for (px, bit) in out.chunks_exact_mut(PIXEL_BYTES).zip(mask) {
        px[3] = if *bit != 0 { 0xFF } else { 0x00 };
    }
    Ok(out)
}

fn default_cursor() -> Result<Cursor, CursorError> {
    let area = usize::from(DEFAULT_WIDTH) * usize::from(DEFAULT_HEIGHT);
    let mut pixels = Vec::with_capacity(area * PIXEL_BYTES);
    let mut mask = Vec::with_capacity(area);

    for ch in DEFAULT_SHAPE.iter().flat_map(|row| row.bytes()) {
        let (rgb, opaque) = match ch {
            b'X' => (0x00, 1),
            b'o' => (0xFF, 1),
            _ => (0x00, 0),
        };
        pixels.extend_from_slice(&[rgb, rgb, rgb, 0]);
        mask.push(opaque);
    }

    Ok(Cursor {
        width: DEFAULT_WIDTH,
        height: DEFAULT_HEIGHT,
        x_hot: DEFAULT_X_HOT,
        y_hot: DEFAULT_Y_HOT,
        buffer: compose(&pixels, &mask, DEFAULT_WIDTH, DEFAULT_HEIGHT)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn new_store_has_default_arrow() {
        let store = CursorStore::new().unwrap();
        store
            .with_snapshot(|c| {
                assert_eq!((c.width, c.height), (10, 16));
                assert_eq!((c.x_hot, c.y_hot), (1, 1));
                assert_eq!(c.data.len(), 10 * 16 * 4);
                // Tip of the arrow is an opaque black outline pixel.
                assert_eq!(&c.data[0..4], &[0, 0, 0, 0xFF]);
                // Inside the arrow is opaque white.
                assert_eq!(&c.data[(10 + 1) * 4..(10 + 1) * 4 + 4], &[0xFF, 0xFF, 0xFF, 0xFF]);
                // Top-right corner is transparent.
                assert_eq!(c.data[9 * 4 + 3], 0);
            })
            .unwrap();
    }

    #[test]
    fn default_shape_is_well_formed() {
        assert!(DEFAULT_SHAPE.iter().all(|row| row.len() == DEFAULT_WIDTH as usize));
    }

    #[test]
    fn short_input_keeps_previous_cursor() {
        let store = CursorStore::new().unwrap();
        let err = store.update(&[0; 8], &[1; 4], 2, 2, 0, 0).unwrap_err();
        assert!(matches!(err, CursorError::ShortBuffer { what: "pixel buffer", .. }));

        let err = store.update(&[0; 16], &[1; 3], 2, 2, 0, 0).unwrap_err();
        assert!(matches!(err, CursorError::ShortBuffer { what: "mask", .. }));

        let dims = store.with_snapshot(|c| (c.width, c.height)).unwrap();
        assert_eq!(dims, (10, 16));
    }

    #[test]
    fn reset_restores_default() {
        let store = CursorStore::new().unwrap();
        store.update(&[7; 4], &[1], 1, 1, 0, 0).unwrap();
        store.reset().unwrap();
        let dims = store.with_snapshot(|c| (c.width, c.height, c.x_hot)).unwrap();
        assert_eq!(dims, (10, 16, 1));
    }

    #[test]
    fn mixed_mask_sets_alpha_per_pixel() {
        let store = CursorStore::new().unwrap();
        let buffer = [10, 20, 30, 40, 50, 60, 70, 80];
        store.update(&buffer, &[0, 3], 2, 1, 1, 0).unwrap();
        store
            .with_snapshot(|c| assert_eq!(c.data, &[10, 20, 30, 0x00, 50, 60, 70, 0xFF]))
            .unwrap();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_mask_drives_alpha(
            (width, height, buffer) in (1u16..32, 1u16..32).prop_flat_map(|(w, h)| {
                let len = w as usize * h as usize * 4;
                (Just(w), Just(h), proptest::collection::vec(any::<u8>(), len))
            }),
            opaque in any::<bool>(),
        ) {
            let store = CursorStore::new().unwrap();
            let mask = vec![u8::from(opaque); width as usize * height as usize];
            store.update(&buffer, &mask, width, height, 0, 0).unwrap();

            let data = store.with_snapshot(|c| c.data.to_vec()).unwrap();
            prop_assert_eq!(data.len(), buffer.len());
            for (out, src) in data.chunks_exact(4).zip(buffer.chunks_exact(4)) {
                prop_assert_eq!(&out[..3], &src[..3]);
                prop_assert_eq!(out[3], if opaque { 0xFF } else { 0x00 });
            }
        }
    }
}
