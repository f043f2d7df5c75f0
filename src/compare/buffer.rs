//! Raster buffers and PNG loading for the comparator.

use image::{DynamicImage, ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Result type for comparator I/O
pub type CompareResult<T> = Result<T, CompareError>;

/// Errors raised while loading or encoding images
#[derive(Debug, thiserror::Error)]
pub enum CompareError {
    /// The file does not exist
    #[error("file '{0}' not found")]
    NotFound(String),

    /// The file exists but could not be decoded
    #[error("{0}")]
    Decode(String),

    /// Encoding or writing an image failed
    #[error("failed to write image: {0}")]
    Encode(String),

    /// Buffer length does not match width * height * bytes-per-pixel
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for CompareError {
    fn from(err: image::ImageError) -> Self {
        CompareError::Decode(err.to_string())
    }
}

/// Pixel layouts a capture can arrive in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Unorm,
    Rgb10A2Unorm,
}

impl PixelFormat {
    /// Bytes used by one pixel
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8Unorm | PixelFormat::Bgra8Unorm | PixelFormat::Rgb10A2Unorm => 4,
            PixelFormat::Rgba16Unorm => 8,
        }
    }

    /// Whether the diff can read this format
    pub fn is_comparable(self) -> bool {
        matches!(self, PixelFormat::Rgba8Unorm | PixelFormat::Bgra8Unorm)
    }

    /// Graphics API style name, as reported by capture notifications
    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Rgba8Unorm => "R8G8B8A8_UNORM",
            PixelFormat::Bgra8Unorm => "B8G8R8A8_UNORM",
            PixelFormat::Rgba16Unorm => "R16G16B16A16_UNORM",
            PixelFormat::Rgb10A2Unorm => "R10G10B10A2_UNORM",
        }
    }
}

/// A decoded image: dimensions, format and tightly packed rows
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw bytes, checking the length against the dimensions
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> CompareResult<Self> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(CompareError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// A buffer of one repeated RGBA8 color
    pub fn solid_rgba8(width: u32, height: u32, color: [u8; 4]) -> Self {
        let data = color
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            format: PixelFormat::Rgba8Unorm,
            data,
        }
    }

    /// Convert an `image` RGBA8 buffer
    pub fn from_rgba_image(image: RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            format: PixelFormat::Rgba8Unorm,
            data: image.into_raw(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Encode as PNG at `path`. Only 8-bit formats can be written.
    pub fn save_png(&self, path: &Path) -> CompareResult<()> {
        let rgba = match self.format {
            PixelFormat::Rgba8Unorm => self.data.clone(),
            PixelFormat::Bgra8Unorm => self
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[2], px[1], px[0], px[3]])
                .collect(),
            other => {
                return Err(CompareError::Encode(format!(
                    "format {} cannot be written as PNG",
                    other.name()
                )));
            }
        };
        let image: RgbaImage = ImageBuffer::<Rgba<u8>, _>::from_raw(self.width, self.height, rgba)
            .ok_or_else(|| CompareError::Encode("buffer does not match dimensions".to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        image
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| CompareError::Encode(e.to_string()))
    }
}

/// Load a PNG file.
///
/// 8-bit images expand to `Rgba8Unorm` with alpha preserved; 16-bit images
/// load as `Rgba16Unorm` so that mixed-depth pairs are detected as a format
/// mismatch instead of being silently converted.
pub fn load_png(path: &Path) -> CompareResult<PixelBuffer> {
    if !path.exists() {
        return Err(CompareError::NotFound(path.display().to_string()));
    }

    let reader = image::io::Reader::open(path)?.with_guessed_format()?;
    if reader.format() != Some(image::ImageFormat::Png) {
        return Err(CompareError::Decode("not a PNG file".to_string()));
    }
    let decoded = reader.decode()?;

    let is_wide = matches!(
        decoded,
        DynamicImage::ImageRgb16(_)
            | DynamicImage::ImageRgba16(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_)
    );

    let buffer = if is_wide {
        let wide = decoded.to_rgba16();
        let (width, height) = wide.dimensions();
        let data = wide
            .into_raw()
            .into_iter()
            .flat_map(|channel| channel.to_le_bytes())
            .collect();
        PixelBuffer::new(width, height, PixelFormat::Rgba16Unorm, data)?
    } else {
        PixelBuffer::from_rgba_image(decoded.to_rgba8())
    };
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_pixel_buffer_rejects_wrong_length() {
        let err = PixelBuffer::new(2, 2, PixelFormat::Rgba8Unorm, vec![0; 15]).unwrap_err();
        assert!(matches!(err, CompareError::BufferSize { expected: 16, actual: 15 }));
    }

    #[test]
    fn test_solid_buffer() {
        let buf = PixelBuffer::solid_rgba8(3, 2, [1, 2, 3, 4]);
        assert_eq!(buf.pixel_count(), 6);
        assert_eq!(&buf.as_bytes()[4..8], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_png_save_and_load_keeps_pixels() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/out.png");
        let buf = PixelBuffer::solid_rgba8(4, 4, [10, 20, 30, 255]);
        buf.save_png(&path).unwrap();

        let loaded = load_png(&path).unwrap();
        assert_eq!(loaded.format(), PixelFormat::Rgba8Unorm);
        assert_eq!(loaded, buf);
    }

    #[test]
    fn test_bgra_is_swizzled_on_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bgra.png");
        let buf = PixelBuffer::new(1, 1, PixelFormat::Bgra8Unorm, vec![1, 2, 3, 255]).unwrap();
        buf.save_png(&path).unwrap();
        assert_eq!(load_png(&path).unwrap().as_bytes(), &[3, 2, 1, 255]);
    }

    #[test]
    fn test_load_missing_and_garbage() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.png");
        assert!(matches!(load_png(&missing), Err(CompareError::NotFound(_))));

        let garbage = dir.path().join("garbage.png");
        std::fs::write(&garbage, b"definitely not a png").unwrap();
        assert!(matches!(load_png(&garbage), Err(CompareError::Decode(_))));
    }

    #[test]
    fn test_sixteen_bit_png_loads_as_wide_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wide.png");
        let img: image::ImageBuffer<image::Rgba<u16>, Vec<u16>> =
            image::ImageBuffer::from_pixel(2, 2, image::Rgba([1000u16, 2000, 3000, 65535]));
        img.save(&path).unwrap();

        let loaded = load_png(&path).unwrap();
        assert_eq!(loaded.format(), PixelFormat::Rgba16Unorm);
        assert_eq!(loaded.as_bytes().len(), 2 * 2 * 8);
    }
}
