//! Raw frame types exchanged between a [`Surface`](crate::input::Surface)
//! and the encoder.
//!
//! These never leave the process; the wire representation lives in
//! [`crate::stream::protocol`].

use std::time::Instant;

use crate::error::VistreamError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout for raw captured frames. The encoder reads BGRA only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        4
    }
}

// ── RawFrame ─────────────────────────────────────────────────────

/// An uncompressed frame snapshot.
///
/// The `data` buffer holds `height` tightly packed rows of
/// `width * 4` bytes. A surface reuses the same `RawFrame` between
/// ticks, so capture never allocates once the buffer is sized.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Raw pixel data.
    pub data: Vec<u8>,
    /// When the surface last filled this buffer.
    pub captured_at: Instant,
}

impl RawFrame {
    /// An all-black BGRA frame of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Bgra8,
            data: vec![0; Self::expected_len(width, height, PixelFormat::Bgra8)],
            captured_at: Instant::now(),
        }
    }

    /// Bytes a frame of this geometry must carry.
    pub fn expected_len(width: u32, height: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * format.bytes_per_pixel()
    }

    /// Row pitch in bytes.
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Check that `data` matches the declared geometry.
    pub fn validate(&self) -> Result<(), VistreamError> {
        let expected = Self::expected_len(self.width, self.height, self.format);
        if self.data.len() != expected {
            return Err(VistreamError::InvalidFrame {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Fill an axis-aligned rectangle, clipped to the frame.
    ///
    /// `color` is given as `[b, g, r, a]` for [`PixelFormat::Bgra8`].
    pub fn fill_rect(&mut self, x: i32, y: i32, w: u32, h: u32, color: [u8; 4]) {
        let x0 = x.max(0) as usize;
        let y0 = y.max(0) as usize;
        let x1 = (x + w as i32).clamp(0, self.width as i32) as usize;
        let y1 = (y + h as i32).clamp(0, self.height as i32) as usize;
        if x0 >= x1 || y0 >= y1 {
            return;
        }
        let stride = self.stride();
        for row in y0..y1 {
            let start = row * stride + x0 * 4;
            let end = row * stride + x1 * 4;
            for px in self.data[start..end].chunks_exact_mut(4) {
                px.copy_from_slice(&color);
            }
        }
    }

    /// Fill the whole frame with one color.
    pub fn clear(&mut self, color: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_frame_has_packed_rows() {
        let frame = RawFrame::blank(8, 4);
        assert_eq!(frame.stride(), 32);
        assert_eq!(frame.data.len(), 128);
        assert_eq!(frame.format, PixelFormat::Bgra8);
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn validate_rejects_short_buffer() {
        let mut frame = RawFrame::blank(8, 4);
        frame.data.truncate(100);
        let err = frame.validate().unwrap_err();
        assert!(matches!(
            err,
            VistreamError::InvalidFrame {
                expected: 128,
                actual: 100
            }
        ));
    }

    #[test]
    fn fill_rect_clips_to_bounds() {
        let mut frame = RawFrame::blank(4, 4);
        frame.fill_rect(2, 2, 10, 10, [1, 2, 3, 255]);
        // (3, 3) painted, (1, 1) untouched.
        let at = |x: usize, y: usize| &frame.data[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(at(3, 3), &[1, 2, 3, 255]);
        assert_eq!(at(1, 1), &[0, 0, 0, 0]);
    }

    #[test]
    fn fill_rect_fully_outside_is_noop() {
        let mut frame = RawFrame::blank(4, 4);
        frame.fill_rect(-10, -10, 5, 5, [9, 9, 9, 9]);
        assert!(frame.data.iter().all(|&b| b == 0));
    }
}
