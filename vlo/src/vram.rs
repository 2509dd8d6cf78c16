//! Stateless VRAM coordinate math for the two hardware layouts.
//!
//! PlayStation VRAM is addressed in 16-bit units: a grid of 16x2 pages, each 64
//! units wide and 256 rows tall. How many pixels one unit holds depends on the
//! image bit depth. The PC renderer instead keeps 14 pages of 256x256 pixels
//! stacked in a single column, addressed in plain pixels.

use crate::error::VloError;

pub const PSX_PAGE_UNIT_WIDTH: u16 = 64;
pub const PSX_PAGE_HEIGHT: u16 = 256;
pub const PSX_PAGE_COLUMNS: u16 = 16;
pub const PSX_PAGE_ROWS: u16 = 2;
pub const PSX_MAX_X_UNITS: u16 = PSX_PAGE_UNIT_WIDTH * PSX_PAGE_COLUMNS;
pub const PSX_MAX_Y: u16 = PSX_PAGE_HEIGHT * PSX_PAGE_ROWS;
/// The largest pixel-per-unit ratio of any bit depth (4-bit indexed).
pub const PSX_MAX_PIXELS_PER_UNIT: u16 = 4;

pub const PC_PAGE_WIDTH: u16 = 256;
pub const PC_PAGE_HEIGHT: u16 = 256;
/// The PC rendering dlls only ever create 14 pages.
pub const PC_PAGE_COUNT: u16 = 14;
pub const PC_MAX_X: u16 = PC_PAGE_WIDTH;
pub const PC_MAX_Y: u16 = PC_PAGE_HEIGHT * PC_PAGE_COUNT;

/// Computes the PSX page index holding the given unit position.
pub fn psx_page(x_units: u16, y: u16) -> Result<u16, VloError> {
	if x_units >= PSX_MAX_X_UNITS || y >= PSX_MAX_Y {
		return Err(VloError::InvalidInput(format!("VRAM position [{}, {}] is outside of PSX VRAM", x_units, y)));
	}

	Ok((y / PSX_PAGE_HEIGHT) * PSX_PAGE_COLUMNS + x_units / PSX_PAGE_UNIT_WIDTH)
}

/// Unit position of the top-left corner of a PSX page.
pub fn psx_page_origin(page: u16) -> Result<(u16, u16), VloError> {
	if page >= PSX_PAGE_COLUMNS * PSX_PAGE_ROWS {
		return Err(VloError::InvalidInput(format!("{} is not a valid PSX page index", page)));
	}

	Ok(((page % PSX_PAGE_COLUMNS) * PSX_PAGE_UNIT_WIDTH, (page / PSX_PAGE_COLUMNS) * PSX_PAGE_HEIGHT))
}

/// Computes the PC page index holding the given pixel position.
pub fn pc_page(y: u16) -> Result<u16, VloError> {
	if y >= PC_MAX_Y {
		return Err(VloError::InvalidInput(format!("VRAM y position {} is outside of PC VRAM", y)));
	}

	Ok(y / PC_PAGE_HEIGHT)
}

/// Page numbering used by pre-recode PC builds, which counted pages along x.
pub fn pc_page_by_column(x: u16) -> Result<u16, VloError> {
	if x >= PC_MAX_X {
		return Err(VloError::InvalidInput(format!("VRAM x position {} is outside of PC VRAM", x)));
	}

	Ok(x / PC_PAGE_WIDTH)
}

/// Pixel position of the top of a PC page.
pub fn pc_page_origin(page: u16) -> Result<u16, VloError> {
	if page >= PC_PAGE_COUNT {
		return Err(VloError::InvalidInput(format!("{} is not a valid PC page index", page)));
	}

	Ok(page * PC_PAGE_HEIGHT)
}
