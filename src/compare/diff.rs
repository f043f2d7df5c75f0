//! RMS image difference with an imperceptible-diff filter.
//!
//! Each pixel contributes the largest absolute difference among its color
//! channels, normalized to `[0, 1]`. Alpha is ignored. The standard score is
//! the root mean square of those per-pixel values over every pixel; the
//! filtered score zeroes every per-pixel value at or below the filter first.

use serde::{Deserialize, Serialize};

use super::buffer::{PixelBuffer, PixelFormat};

/// Scores produced by a successful comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffScores {
    /// RMS over all pixels
    pub standard: f32,
    /// RMS with imperceptible pixels counted as zero
    pub filtered: f32,
}

/// Reasons two buffers cannot be compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    #[error(
        "Sizes don't match. Expected {} x {} but was {} x {}.",
        .expected.0, .expected.1, .actual.0, .actual.1
    )]
    WrongSize {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("cannot compare {expected:?} against {actual:?}")]
    WrongFormat {
        expected: PixelFormat,
        actual: PixelFormat,
    },
}

/// Compare two buffers.
///
/// Sizes are checked before formats. Only identical, comparable formats are
/// accepted; nothing is converted.
pub fn calc_image_diff_rms(
    expected: &PixelBuffer,
    actual: &PixelBuffer,
    min_diff_filter: f32,
) -> Result<DiffScores, DiffError> {
    let expected_size = (expected.width(), expected.height());
    let actual_size = (actual.width(), actual.height());
    if expected_size != actual_size {
        return Err(DiffError::WrongSize {
            expected: expected_size,
            actual: actual_size,
        });
    }

    if expected.format() != actual.format() || !expected.format().is_comparable() {
        return Err(DiffError::WrongFormat {
            expected: expected.format(),
            actual: actual.format(),
        });
    }

    let pixel_count = expected.pixel_count();
    if pixel_count == 0 {
        return Ok(DiffScores::default());
    }

    let mut sum_squares = 0.0f64;
    let mut filtered_sum_squares = 0.0f64;
    for (a, b) in expected
        .as_bytes()
        .chunks_exact(4)
        .zip(actual.as_bytes().chunks_exact(4))
    {
        let diff = pixel_diff(a, b);
        let squared = f64::from(diff) * f64::from(diff);
        sum_squares += squared;
        if diff > min_diff_filter {
            filtered_sum_squares += squared;
        }
    }

    let count = pixel_count as f64;
    Ok(DiffScores {
        standard: (sum_squares / count).sqrt() as f32,
        filtered: (filtered_sum_squares / count).sqrt() as f32,
    })
}

/// Largest color channel difference of one pixel, normalized
fn pixel_diff(a: &[u8], b: &[u8]) -> f32 {
    let max = a[..3]
        .iter()
        .zip(&b[..3])
        .map(|(x, y)| x.abs_diff(*y))
        .max()
        .unwrap_or(0);
    f32::from(max) / 255.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IMPERCEPTIBLE_DIFF_FILTER;
    use proptest::prelude::*;

    fn buffer_from(pixels: &[[u8; 4]], width: u32) -> PixelBuffer {
        let data = pixels.iter().flatten().copied().collect::<Vec<_>>();
        let height = pixels.len() as u32 / width;
        PixelBuffer::new(width, height, PixelFormat::Rgba8Unorm, data).unwrap()
    }

    #[test]
    fn test_identical_images_score_zero() {
        let a = PixelBuffer::solid_rgba8(8, 8, [12, 34, 56, 255]);
        let scores = calc_image_diff_rms(&a, &a.clone(), IMPERCEPTIBLE_DIFF_FILTER).unwrap();
        assert_eq!(scores, DiffScores::default());
    }

    #[test]
    fn test_single_full_pixel_difference() {
        let a = buffer_from(&[[0, 0, 0, 255]; 4], 2);
        let b = buffer_from(
            &[[255, 0, 0, 255], [0, 0, 0, 255], [0, 0, 0, 255], [0, 0, 0, 255]],
            2,
        );
        let scores = calc_image_diff_rms(&a, &b, IMPERCEPTIBLE_DIFF_FILTER).unwrap();
        // sqrt(1 / 4)
        assert!((scores.standard - 0.5).abs() < 1e-6);
        assert!((scores.filtered - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_alpha_is_ignored() {
        let a = PixelBuffer::solid_rgba8(2, 2, [10, 10, 10, 0]);
        let b = PixelBuffer::solid_rgba8(2, 2, [10, 10, 10, 255]);
        let scores = calc_image_diff_rms(&a, &b, IMPERCEPTIBLE_DIFF_FILTER).unwrap();
        assert_eq!(scores.standard, 0.0);
    }

    #[test]
    fn test_filter_drops_imperceptible_pixels() {
        // 2/255 is below the 0.01 filter
        let a = PixelBuffer::solid_rgba8(4, 4, [100, 100, 100, 255]);
        let b = PixelBuffer::solid_rgba8(4, 4, [102, 100, 100, 255]);
        let scores = calc_image_diff_rms(&a, &b, IMPERCEPTIBLE_DIFF_FILTER).unwrap();
        assert!(scores.standard > 0.0);
        assert_eq!(scores.filtered, 0.0);
    }

    #[test]
    fn test_size_mismatch() {
        let a = PixelBuffer::solid_rgba8(4, 4, [0, 0, 0, 255]);
        let b = PixelBuffer::solid_rgba8(4, 5, [0, 0, 0, 255]);
        let err = calc_image_diff_rms(&a, &b, IMPERCEPTIBLE_DIFF_FILTER).unwrap_err();
        assert_eq!(
            err,
            DiffError::WrongSize {
                expected: (4, 4),
                actual: (4, 5)
            }
        );
        assert_eq!(err.to_string(), "Sizes don't match. Expected 4 x 4 but was 4 x 5.");
    }

    #[test]
    fn test_format_mismatch() {
        let a = PixelBuffer::solid_rgba8(1, 1, [0, 0, 0, 255]);
        let b = PixelBuffer::new(1, 1, PixelFormat::Bgra8Unorm, vec![0, 0, 0, 255]).unwrap();
        assert!(matches!(
            calc_image_diff_rms(&a, &b, IMPERCEPTIBLE_DIFF_FILTER),
            Err(DiffError::WrongFormat { .. })
        ));

        let wide = PixelBuffer::new(1, 1, PixelFormat::Rgba16Unorm, vec![0; 8]).unwrap();
        assert!(matches!(
            calc_image_diff_rms(&wide, &wide.clone(), IMPERCEPTIBLE_DIFF_FILTER),
            Err(DiffError::WrongFormat { .. })
        ));
    }

    #[test]
    fn test_empty_images_score_zero() {
        let a = PixelBuffer::solid_rgba8(0, 0, [0, 0, 0, 0]);
        let scores = calc_image_diff_rms(&a, &a.clone(), IMPERCEPTIBLE_DIFF_FILTER).unwrap();
        assert_eq!(scores, DiffScores::default());
    }

    proptest! {
        #[test]
        fn prop_diff_is_symmetric_and_bounded(
            a in proptest::collection::vec(any::<u8>(), 64),
            b in proptest::collection::vec(any::<u8>(), 64),
        ) {
            let left = PixelBuffer::new(4, 4, PixelFormat::Rgba8Unorm, a).unwrap();
            let right = PixelBuffer::new(4, 4, PixelFormat::Rgba8Unorm, b).unwrap();
            let ab = calc_image_diff_rms(&left, &right, IMPERCEPTIBLE_DIFF_FILTER).unwrap();
            let ba = calc_image_diff_rms(&right, &left, IMPERCEPTIBLE_DIFF_FILTER).unwrap();
            prop_assert_eq!(ab, ba);
            prop_assert!(ab.filtered <= ab.standard);
            prop_assert!((0.0..=1.0).contains(&ab.standard));
        }

        #[test]
        fn prop_identity_scores_zero(a in proptest::collection::vec(any::<u8>(), 36)) {
            let buf = PixelBuffer::new(3, 3, PixelFormat::Rgba8Unorm, a).unwrap();
            let scores = calc_image_diff_rms(&buf, &buf.clone(), IMPERCEPTIBLE_DIFF_FILTER).unwrap();
            prop_assert_eq!(scores, DiffScores::default());
        }
    }
}
