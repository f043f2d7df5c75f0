//! A software framebuffer for synthesizing captures.
//!
//! The headless host renders every screenshot through this type, and tests use
//! it to build expected/actual image pairs with known differences.

use font8x8::{BASIC_FONTS, UnicodeFonts};
use image::{ImageBuffer, RgbaImage};
use std::io::Cursor;
use std::path::Path;

use super::buffer::{CompareError, CompareResult, PixelBuffer, PixelFormat};

/// An RGBA drawing surface
///
/// Provides the drawing calls needed for capture fixtures:
/// - `fill()` - Fill the whole surface
/// - `draw_rect()` - Filled rectangle, clipped to the surface
/// - `draw_text()` - 8x8 glyph text, no wrapping
/// - `get_pixel()` / `set_pixel()` - Direct pixel access
#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    /// Row-major, 4 bytes per pixel
    buffer: Vec<u8>,
}

impl Framebuffer {
    /// Create an opaque black framebuffer
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_color(width, height, [0, 0, 0, 255])
    }

    /// Create a framebuffer filled with `color`
    pub fn with_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        let mut fb = Self {
            width,
            height,
            buffer: vec![0u8; width as usize * height as usize * 4],
        };
        fb.fill(color);
        fb
    }

    /// Decode PNG bytes into a framebuffer
    pub fn from_png_bytes(data: &[u8]) -> CompareResult<Self> {
        let rgba = image::load_from_memory(data)?.to_rgba8();
        Ok(Self {
            width: rgba.width(),
            height: rgba.height(),
            buffer: rgba.into_raw(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Fill the entire framebuffer with a color
    pub fn fill(&mut self, color: [u8; 4]) {
        for chunk in self.buffer.chunks_exact_mut(4) {
            chunk.copy_from_slice(&color);
        }
    }

    /// Draw a filled rectangle
    pub fn draw_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 4]) {
        for py in y..y.saturating_add(h).min(self.height) {
            for px in x..x.saturating_add(w).min(self.width) {
                self.set_pixel(px, py, color);
            }
        }
    }

    /// Draw text using font8x8 glyphs. Each character is 8x8 pixels.
    pub fn draw_text(&mut self, x: u32, y: u32, text: &str, fg: [u8; 4], bg: [u8; 4]) {
        let mut cursor_x = x;
        for ch in text.chars() {
            if cursor_x >= self.width {
                break;
            }
            self.draw_char(cursor_x, y, ch, fg, bg);
            cursor_x += 8;
        }
    }

    fn draw_char(&mut self, x: u32, y: u32, ch: char, fg: [u8; 4], bg: [u8; 4]) {
        let glyph = BASIC_FONTS.get(ch).unwrap_or([0u8; 8]);
        for (row_idx, row) in glyph.iter().enumerate() {
            let py = y + row_idx as u32;
            if py >= self.height {
                break;
            }
            for bit in 0..8 {
                let px = x + bit;
                if px >= self.width {
                    break;
                }
                // font8x8 stores LSB as leftmost pixel
                let color = if (row >> bit) & 1 == 1 { fg } else { bg };
                self.set_pixel(px, py, color);
            }
        }
    }

    /// Color of a pixel; out of bounds reads as transparent black
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 4] {
        if x >= self.width || y >= self.height {
            return [0, 0, 0, 0];
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.buffer[idx],
            self.buffer[idx + 1],
            self.buffer[idx + 2],
            self.buffer[idx + 3],
        ]
    }

    /// Set the color of a pixel; out of bounds writes are dropped
    pub fn set_pixel(&mut self, x: u32, y: u32, color: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        self.buffer[idx..idx + 4].copy_from_slice(&color);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Copy into a comparator buffer
    pub fn to_pixel_buffer(&self) -> CompareResult<PixelBuffer> {
        PixelBuffer::new(
            self.width,
            self.height,
            PixelFormat::Rgba8Unorm,
            self.buffer.clone(),
        )
    }

    /// Convert to an image buffer
    pub fn to_image(&self) -> CompareResult<RgbaImage> {
        ImageBuffer::from_raw(self.width, self.height, self.buffer.clone()).ok_or(
            CompareError::BufferSize {
                expected: self.width as usize * self.height as usize * 4,
                actual: self.buffer.len(),
            },
        )
    }

    /// Encode as PNG bytes
    pub fn to_png(&self) -> CompareResult<Vec<u8>> {
        let img = self.to_image()?;
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| CompareError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    /// Write a PNG file, creating parent directories
    pub fn save_png(&self, path: &Path) -> CompareResult<()> {
        self.to_pixel_buffer()?.save_png(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::load_png;

    #[test]
    fn test_framebuffer_new_is_opaque_black() {
        let fb = Framebuffer::new(100, 50);
        assert_eq!(fb.width(), 100);
        assert_eq!(fb.height(), 50);
        assert_eq!(fb.get_pixel(0, 0), [0, 0, 0, 255]);
        assert_eq!(fb.get_pixel(99, 49), [0, 0, 0, 255]);
        assert_eq!(fb.get_pixel(100, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn test_framebuffer_draw_rect_clips() {
        let mut fb = Framebuffer::new(20, 20);
        fb.draw_rect(15, 15, 10, 10, [255, 0, 0, 255]);

        assert_eq!(fb.get_pixel(14, 14), [0, 0, 0, 255]);
        assert_eq!(fb.get_pixel(15, 15), [255, 0, 0, 255]);
        assert_eq!(fb.get_pixel(19, 19), [255, 0, 0, 255]);
    }

    #[test]
    fn test_framebuffer_draw_text_sets_foreground() {
        let mut fb = Framebuffer::new(80, 16);
        fb.draw_text(0, 0, "Hi", [255, 255, 255, 255], [0, 0, 0, 255]);

        let lit = (0..8)
            .flat_map(|y| (0..8).map(move |x| (x, y)))
            .filter(|&(x, y)| fb.get_pixel(x, y) == [255, 255, 255, 255])
            .count();
        assert!(lit > 0, "Character 'H' should have some foreground pixels");
    }

    #[test]
    fn test_framebuffer_png_bytes_roundtrip() {
        let mut fb = Framebuffer::with_color(32, 32, [100, 150, 200, 255]);
        fb.draw_rect(8, 8, 16, 16, [255, 0, 0, 255]);

        let png = fb.to_png().unwrap();
        assert_eq!(&png[0..4], &[0x89, 0x50, 0x4E, 0x47]);

        let decoded = Framebuffer::from_png_bytes(&png).unwrap();
        assert_eq!(decoded.get_pixel(0, 0), [100, 150, 200, 255]);
        assert_eq!(decoded.get_pixel(10, 10), [255, 0, 0, 255]);
    }

    #[test]
    fn test_framebuffer_save_matches_pixel_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fb.png");
        let mut fb = Framebuffer::new(8, 8);
        fb.set_pixel(3, 3, [1, 2, 3, 255]);
        fb.save_png(&path).unwrap();

        assert_eq!(load_png(&path).unwrap(), fb.to_pixel_buffer().unwrap());
    }
}
