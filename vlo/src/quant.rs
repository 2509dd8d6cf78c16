//! Color-reduction seam.
//!
//! Quantization itself is not this crate's business: importing an image into an
//! indexed bit depth needs *some* way to bring it down to 16 or 256 colors, and
//! callers plug their own algorithm in here.

/// Reduces an ARGB8888 pixel buffer to at most `max_colors` distinct colors.
///
/// Implementations must preserve the alpha channel of each pixel untouched; it
/// carries STP state, not coverage.
pub trait Quantizer {
	fn reduce(&self, pixels: &mut [u32], max_colors: usize);
}

/// A quantizer for sources already within the palette budget. Leaves every
/// pixel untouched; palette generation fails downstream if the budget is
/// actually exceeded.
pub struct NullQuantizer;

impl Quantizer for NullQuantizer {
	fn reduce(&self, _pixels: &mut [u32], _max_colors: usize) {}
}
