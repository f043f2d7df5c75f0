//! Image comparison: buffers, PNG loading and the RMS diff.

pub mod buffer;
pub mod diff;
pub mod framebuffer;

pub use buffer::{CompareError, CompareResult, PixelBuffer, PixelFormat, load_png};
pub use diff::{DiffError, DiffScores, calc_image_diff_rms};
pub use framebuffer::Framebuffer;
