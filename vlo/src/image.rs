use bitflags::bitflags;

use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use log::warn;

use std::io::Cursor;
use std::mem;

use vorgkit_core::color::{
	alpha_of,
	argb,
	stp_alpha,
	with_alpha,
	ClutColor,
	ALPHA_INVERTED_STP,
	ALPHA_OPAQUE,
	ALPHA_TRANSPARENT,
	ARGB_5BIT_COLOR_MASK,
	DEFAULT_SEMI_TRANSPARENT_ALPHA
};

use crate::clut::{
	Clut,
	ClutKey,
	ClutTable
};
use crate::error::VloError;
use crate::game::{
	GameProfile,
	Padding,
	PcPaddingEra,
	Platform
};
use crate::quant::Quantizer;
use crate::vram;

pub const MAX_IMAGE_DIMENSION: u16 = 256;

/// Enables semi-transparent rendering for sprites using this image.
pub const FLAG_TRANSLUCENT: u16 = 1 << 0;
/// The padded image ends exactly on a VRAM page boundary horizontally.
pub const FLAG_HIT_X: u16 = 1 << 2;
/// The padded image ends exactly on a VRAM page boundary vertically.
pub const FLAG_HIT_Y: u16 = 1 << 3;
/// The image has a fixed entry in the executable's texture pointer table.
pub const FLAG_REFERENCED_BY_NAME: u16 = 1 << 4;
/// Full black pixels are skipped at load time. Only read by the PC loader.
pub const FLAG_BLACK_IS_TRANSPARENT: u16 = 1 << 5;
/// Later-toolkit titles only (MediEvil II, C-12).
pub const FLAG_PARTLY_TRANSPARENT: u16 = 1 << 6;
/// An animation list should be used when the image creates a sprite.
pub const FLAG_2D_SPRITE: u16 = 1 << 15;

const VALIDATION_FLAGS: u16 = FLAG_2D_SPRITE | FLAG_BLACK_IS_TRANSPARENT | FLAG_REFERENCED_BY_NAME
	| FLAG_HIT_Y | FLAG_HIT_X | FLAG_TRANSLUCENT;
const PT_VALIDATION_FLAGS: u16 = VALIDATION_FLAGS | FLAG_PARTLY_TRANSPARENT;

const FLAG_MEDIEVIL_SORT_MASK: u16 = 0b11 << 8;
const FLAG_MEDIEVIL_SORT_SHIFT: u16 = 8;
const FLAG_MEDIEVIL_FRICTION_MASK: u16 = 0b11 << 10;
const FLAG_MEDIEVIL_FRICTION_SHIFT: u16 = 10;
const FLAG_MEDIEVIL_INTERACTION_MASK: u16 = 0b111 << 12;
const FLAG_MEDIEVIL_INTERACTION_SHIFT: u16 = 12;
const MEDIEVIL_VALIDATION_FLAGS: u16 = VALIDATION_FLAGS | FLAG_MEDIEVIL_SORT_MASK
	| FLAG_MEDIEVIL_FRICTION_MASK | FLAG_MEDIEVIL_INTERACTION_MASK;

// Padding fill for images whose border is uniformly transparent.
const PADDING_TRANSPARENT_PIXEL_PC: u32 = 0xFF00_0000;
const PADDING_TRANSPARENT_PIXEL_PSX: u32 = 0x0000_0000;

/// Pixel bit depth, as stored in the page descriptor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BitDepth {
	/// 4-bit indexed, two pixels per byte.
	Clut4,
	/// 8-bit indexed.
	Clut8,
	/// Direct 15-bit color, no palette.
	Direct15,
}

impl BitDepth {
	pub(crate) fn from_descriptor(bits: u16) -> Result<BitDepth, VloError> {
		match bits {
			0 => Ok(BitDepth::Clut4),
			1 => Ok(BitDepth::Clut8),
			2 => Ok(BitDepth::Direct15),
			_ => Err(VloError::Corrupt("page descriptor bit depth")),
		}
	}

	pub(crate) const fn descriptor(self) -> u16 {
		match self {
			BitDepth::Clut4 => 0,
			BitDepth::Clut8 => 1,
			BitDepth::Direct15 => 2,
		}
	}

	/// Pixels held by one 16-bit VRAM unit at this depth.
	pub const fn pixels_per_unit(self) -> u16 {
		match self {
			BitDepth::Clut4 => 4,
			BitDepth::Clut8 => 2,
			BitDepth::Direct15 => 1,
		}
	}

	/// Palette slot count, or none for direct color.
	pub const fn palette_size(self) -> Option<usize> {
		match self {
			BitDepth::Clut4 => Some(crate::clut::CLUT4_COLOR_COUNT),
			BitDepth::Clut8 => Some(crate::clut::CLUT8_COLOR_COUNT),
			BitDepth::Direct15 => None,
		}
	}
}

/// Hardware blend rate for semi-transparent pixels.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Abr {
	/// 50% back + 50% front. The only value ever seen on PC.
	Half,
	Add,
	Subtract,
	QuarterAdd,
}

impl Abr {
	pub(crate) const fn from_descriptor(bits: u16) -> Abr {
		match bits & 0b11 {
			0 => Abr::Half,
			1 => Abr::Add,
			2 => Abr::Subtract,
			_ => Abr::QuarterAdd,
		}
	}

	pub(crate) const fn descriptor(self) -> u16 {
		match self {
			Abr::Half => 0,
			Abr::Add => 1,
			Abr::Subtract => 2,
			Abr::QuarterAdd => 3,
		}
	}

	/// Alpha approximating this blend rate in a standalone RGBA export.
	pub const fn semi_transparent_alpha(self) -> u8 {
		match self {
			Abr::QuarterAdd => 0x3F,
			_ => DEFAULT_SEMI_TRANSPARENT_ALPHA,
		}
	}
}

/// Surface interaction type packed into MediEvil flag bits 12-14.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SurfaceInteraction {
	None,
	Water,
	Mud,
	DeadlyMud,
	NotGround,
	Corn,
	Special1,
	Special2,
}

impl SurfaceInteraction {
	const fn from_bits(bits: u16) -> SurfaceInteraction {
		match bits & 0b111 {
			0 => SurfaceInteraction::None,
			1 => SurfaceInteraction::Water,
			2 => SurfaceInteraction::Mud,
			3 => SurfaceInteraction::DeadlyMud,
			4 => SurfaceInteraction::NotGround,
			5 => SurfaceInteraction::Corn,
			6 => SurfaceInteraction::Special1,
			_ => SurfaceInteraction::Special2,
		}
	}

	const fn bits(self) -> u16 {
		match self {
			SurfaceInteraction::None => 0,
			SurfaceInteraction::Water => 1,
			SurfaceInteraction::Mud => 2,
			SurfaceInteraction::DeadlyMud => 3,
			SurfaceInteraction::NotGround => 4,
			SurfaceInteraction::Corn => 5,
			SurfaceInteraction::Special1 => 6,
			SurfaceInteraction::Special2 => 7,
		}
	}
}

bitflags! {
	/// Settings controlling decoded RGBA export. Each combination is cached.
	pub struct ExportSettings: u8 {
		const TRANSPARENCY = 1;
		const PSX_SEMI_TRANSPARENT = 1 << 1;
		const INCLUDE_PADDING = 1 << 2;
		const HIGHLIGHT_PADDING = 1 << 3;
	}
}

const EXPORT_CACHE_SIZE: usize = 16;

/// An arbitrary ARGB8888 bitmap handed to [`VloImage::replace_image`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArgbBitmap {
	width: u16,
	height: u16,
	pixels: Vec<u32>,
}

impl ArgbBitmap {
	pub fn new(width: u16, height: u16, pixels: Vec<u32>) -> Result<ArgbBitmap, VloError> {
		if pixels.len() != width as usize * height as usize {
			return Err(VloError::InvalidInput(format!(
				"bitmap of {}x{} requires {} pixels, got {}", width, height, width as usize * height as usize, pixels.len())));
		}

		Ok(ArgbBitmap {
			width,
			height,
			pixels,
		})
	}

	pub fn width(&self) -> u16 {
		self.width
	}

	pub fn height(&self) -> u16 {
		self.height
	}

	pub fn pixels(&self) -> &[u32] {
		&self.pixels
	}
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum PaddingOp {
	Validate,
	Apply,
}

/// A singular image in a VLO archive: the MR_TXSETUP struct plus its pixels.
///
/// The canonical in-memory form is an ARGB8888 buffer of the padded
/// dimensions. Alpha carries STP state rather than coverage: 0x00 and 0xFF
/// follow the automatically derived per-class STP bit, 0x7F flips it for that
/// one pixel.
#[derive(Clone, Debug)]
pub struct VloImage {
	platform: Platform,
	vram_x: u16,
	vram_y: u16,
	padded_width: u16,
	padded_height: u16,
	unpadded_width: u16,
	unpadded_height: u16,
	texture_id: u16,
	flags: u16,
	/// As stored. Regenerated from the bound clut on PSX; provably unused
	/// garbage on PC, preserved for byte-accurate round trips.
	clut_id_raw: u16,
	stored_u: u8,
	stored_v: u8,
	bit_depth: BitDepth,
	abr: Abr,
	pixels: Vec<u32>,
	clut: Option<ClutKey>,
	padding_transparent: bool,
	padding_enabled: bool,
	stp_black_flipped: bool,
	stp_non_black_flipped: bool,
	has_transparent_pixels: bool,
	has_stp_overrides: bool,
	name: Option<String>,
	cache: Vec<Option<Vec<u32>>>,
}

impl PartialEq for VloImage {
	fn eq(&self, other: &VloImage) -> bool {
		self.platform == other.platform
			&& self.vram_x == other.vram_x
			&& self.vram_y == other.vram_y
			&& self.padded_width == other.padded_width
			&& self.padded_height == other.padded_height
			&& self.unpadded_width == other.unpadded_width
			&& self.unpadded_height == other.unpadded_height
			&& self.texture_id == other.texture_id
			&& self.flags == other.flags
			&& self.clut_id_raw == other.clut_id_raw
			&& self.stored_u == other.stored_u
			&& self.stored_v == other.stored_v
			&& self.bit_depth == other.bit_depth
			&& self.abr == other.abr
			&& self.pixels == other.pixels
			&& self.clut == other.clut
			&& self.padding_transparent == other.padding_transparent
			&& self.padding_enabled == other.padding_enabled
			&& self.stp_black_flipped == other.stp_black_flipped
			&& self.stp_non_black_flipped == other.stp_non_black_flipped
			&& self.has_transparent_pixels == other.has_transparent_pixels
			&& self.has_stp_overrides == other.has_stp_overrides
			&& self.name == other.name
	}
}

impl VloImage {
	pub fn new(platform: Platform) -> VloImage {
		VloImage {
			platform,
			vram_x: 0,
			vram_y: 0,
			padded_width: 0,
			padded_height: 0,
			unpadded_width: 0,
			unpadded_height: 0,
			texture_id: 0,
			flags: 0,
			clut_id_raw: 0,
			stored_u: 0,
			stored_v: 0,
			bit_depth: BitDepth::Clut4,
			abr: Abr::Half,
			pixels: vec![],
			clut: None,
			padding_transparent: false,
			padding_enabled: true,
			stp_black_flipped: false,
			stp_non_black_flipped: false,
			has_transparent_pixels: false,
			has_stp_overrides: false,
			name: None,
			cache: vec![None; EXPORT_CACHE_SIZE],
		}
	}

	pub fn platform(&self) -> Platform {
		self.platform
	}

	pub fn vram_x(&self) -> u16 {
		self.vram_x
	}

	pub fn vram_y(&self) -> u16 {
		self.vram_y
	}

	/// The x position in pixels at the maximum pixel-per-unit ratio, as a VRAM
	/// display would show it.
	pub fn expanded_vram_x(&self) -> u32 {
		match self.platform {
			Platform::Psx => self.vram_x as u32 * vram::PSX_MAX_PIXELS_PER_UNIT as u32,
			Platform::Pc => self.vram_x as u32,
		}
	}

	pub fn padded_width(&self) -> u16 {
		self.padded_width
	}

	pub fn padded_height(&self) -> u16 {
		self.padded_height
	}

	pub fn unpadded_width(&self) -> u16 {
		self.unpadded_width
	}

	pub fn unpadded_height(&self) -> u16 {
		self.unpadded_height
	}

	pub fn texture_id(&self) -> u16 {
		self.texture_id
	}

	pub fn set_texture_id(&mut self, texture_id: u16) {
		self.texture_id = texture_id;
	}

	pub fn flags(&self) -> u16 {
		self.flags
	}

	pub fn bit_depth(&self) -> BitDepth {
		self.bit_depth
	}

	pub fn abr(&self) -> Abr {
		self.abr
	}

	/// Sets the blend rate. Only meaningful for PSX archives.
	pub fn set_abr(&mut self, abr: Abr) -> Result<(), VloError> {
		if !self.platform.is_psx() {
			return Err(VloError::InvalidInput("blend rates can only be set in PSX archives".to_string()));
		}

		self.abr = abr;
		Ok(())
	}

	pub fn clut(&self) -> Option<ClutKey> {
		self.clut
	}

	pub fn name(&self) -> Option<&str> {
		self.name.as_deref()
	}

	pub(crate) fn set_name(&mut self, name: Option<String>) {
		self.name = name;
	}

	pub fn padding_transparent(&self) -> bool {
		self.padding_transparent
	}

	/// The padded buffer as loaded, alpha carrying STP state.
	pub fn pixels(&self) -> &[u32] {
		&self.pixels
	}

	pub fn test_flag(&self, flag: u16) -> bool {
		self.flags & flag == flag
	}

	pub fn set_flag(&mut self, flag: u16, state: bool) {
		let old = self.test_flag(flag);
		if old == state {
			return;
		}

		if old {
			self.flags &= !flag;
		} else {
			self.flags |= flag;
		}

		if flag & (FLAG_TRANSLUCENT | FLAG_BLACK_IS_TRANSPARENT) != 0 {
			self.invalidate_cache();
		}
	}

	/// True when the image held at least one fully transparent pixel when it
	/// was decoded or imported.
	pub fn has_transparent_pixels(&self) -> bool {
		self.has_transparent_pixels
	}

	/// True when any pixel's STP bit diverges from its class default.
	pub fn has_stp_overrides(&self) -> bool {
		self.has_stp_overrides
	}

	/// Whether every pixel of this image renders fully opaque.
	pub fn is_fully_opaque(&self, semi_transparency_enabled: bool) -> bool {
		if self.has_transparent_pixels {
			return false;
		}

		if semi_transparency_enabled && (self.test_flag(FLAG_TRANSLUCENT) || self.has_stp_overrides) {
			return false;
		}

		true
	}

	fn identifier(&self) -> String {
		match &self.name {
			Some(name) => format!("{}/{}", name, self.texture_id),
			None => format!("#{}", self.texture_id),
		}
	}

	pub fn width_multiplier(&self) -> u16 {
		match self.platform {
			Platform::Psx => self.bit_depth.pixels_per_unit(),
			Platform::Pc => 1,
		}
	}

	/// The padded width in VRAM units.
	pub fn unit_width(&self) -> u16 {
		self.padded_width / self.width_multiplier()
	}

	/// Sets the VRAM x position, in units on PSX and pixels on PC.
	pub fn set_vram_x(&mut self, vram_x: u16) -> Result<(), VloError> {
		let max_x = if self.platform.is_psx() { vram::PSX_MAX_X_UNITS } else { vram::PC_MAX_X };
		if vram_x as u32 + self.padded_width as u32 > max_x as u32 {
			return Err(VloError::InvalidInput(format!(
				"x position {} would place the image at least partially outside of VRAM", vram_x)));
		}

		self.vram_x = vram_x;
		Ok(())
	}

	pub fn set_vram_y(&mut self, vram_y: u16) -> Result<(), VloError> {
		let max_y = if self.platform.is_psx() { vram::PSX_MAX_Y } else { vram::PC_MAX_Y };
		if vram_y as u32 + self.padded_height as u32 > max_y as u32 {
			return Err(VloError::InvalidInput(format!(
				"y position {} would place the image at least partially outside of VRAM", vram_y)));
		}

		self.vram_y = vram_y;
		Ok(())
	}

	/// The VRAM page holding the top-left corner.
	pub fn page(&self, profile: &GameProfile) -> Result<u16, VloError> {
		match self.platform {
			Platform::Psx => vram::psx_page(self.vram_x, self.vram_y),
			Platform::Pc if profile.pc_page_by_column => vram::pc_page_by_column(self.vram_x),
			Platform::Pc => vram::pc_page(self.vram_y),
		}
	}

	/// The packed page descriptor: page, blend rate, and bit depth.
	pub fn page_descriptor(&self, profile: &GameProfile) -> Result<u16, VloError> {
		Ok(self.page(profile)? & 0b11111 | self.abr.descriptor() << 5 | self.bit_depth.descriptor() << 7)
	}

	// On PSX, padded images reserve their first texture column: the U origin
	// starts at one whenever there is more than a single row of Y padding.
	fn uv_origin_starts_at_one(&self) -> bool {
		self.platform.is_psx()
			&& self.padded_height != self.unpadded_height
			&& self.padded_height != self.unpadded_height + 1
	}

	pub fn left_padding(&self) -> u16 {
		if self.platform.is_psx() {
			return if self.uv_origin_starts_at_one() { 1 } else { 0 };
		}

		self.padded_width.saturating_sub(self.unpadded_width) / 2
	}

	pub fn up_padding(&self) -> u16 {
		self.padded_height.saturating_sub(self.unpadded_height) / 2
	}

	pub fn right_padding(&self, profile: &GameProfile) -> u16 {
		self.padded_width.saturating_sub(self.unpadded_width).saturating_sub(self.left_padding())
			+ if self.calculate_hit_x(profile) { 1 } else { 0 }
	}

	pub fn down_padding(&self, profile: &GameProfile) -> u16 {
		self.padded_height.saturating_sub(self.unpadded_height).saturating_sub(self.up_padding())
			+ if self.calculate_hit_y(profile) { 1 } else { 0 }
	}

	/// The U texture coordinate origin this image would use in-game.
	pub fn compute_u(&self) -> u16 {
		let page_width = if self.platform.is_psx() { vram::PSX_PAGE_UNIT_WIDTH } else { vram::PC_PAGE_WIDTH };
		(self.vram_x % page_width) * self.width_multiplier() + self.left_padding()
	}

	/// The V texture coordinate origin this image would use in-game.
	pub fn compute_v(&self) -> u16 {
		let page_height = if self.platform.is_psx() { vram::PSX_PAGE_HEIGHT } else { vram::PC_PAGE_HEIGHT };
		self.vram_y % page_height + self.up_padding()
	}

	/// Whether HIT_X should be set if the image were saved now.
	///
	/// The flag exists to stop u8 texture coordinates overflowing at the right
	/// edge of a page. The PSX formula below was recovered by trial and error
	/// against every known original archive; it is kept exactly as recovered.
	pub fn calculate_hit_x(&self, profile: &GameProfile) -> bool {
		if !self.platform.is_psx() {
			return (self.vram_x as u32 + self.padded_width as u32) % vram::PC_PAGE_WIDTH as u32 == 0;
		}

		let aligned_to_edge = (self.vram_x as u32 + self.unit_width() as u32) % vram::PSX_PAGE_UNIT_WIDTH as u32 == 0;
		if !aligned_to_edge {
			return false;
		}

		let start_u = self.compute_u() as u32;
		let mut end_u = start_u + self.unpadded_width as u32;

		// Earlier tool versions nudged an exactly-255 end coordinate into the
		// padding, which any pixels there would have been anyway.
		if end_u == 0xFF && self.unpadded_width + 1 != self.padded_width && !profile.hit_u_wraparound_fix {
			end_u += 1;
		}

		if profile.hit_x_mod64_disabled && self.unpadded_width % 64 == 0 {
			return false;
		}

		end_u & 0xFF != end_u
	}

	/// Whether HIT_Y should be set if the image were saved now.
	pub fn calculate_hit_y(&self, profile: &GameProfile) -> bool {
		if profile.hit_y_disabled {
			return false;
		}

		if self.platform.is_psx() {
			return (self.compute_v() as u32 + self.unpadded_height as u32) % vram::PSX_PAGE_HEIGHT as u32 == 0;
		}

		(self.vram_y as u32 + self.unpadded_height as u32) % vram::PC_PAGE_HEIGHT as u32 == 0
	}

	// Padding added purely to reach the bit depth's packing granularity.
	// Zero on PC.
	fn psx_alignment_padding_x(&self) -> u16 {
		if !self.platform.is_psx() {
			return 0;
		}

		let remainder = self.unpadded_width % self.width_multiplier();
		if remainder != 0 {
			self.width_multiplier() - remainder
		} else {
			0
		}
	}

	/// The padding width the original tool would have used, or none where it
	/// was configured by hand and cannot be derived.
	pub fn calculate_padding_x(&self, profile: &GameProfile) -> Option<u16> {
		if !self.platform.is_psx() {
			return match profile.pc_padding {
				PcPaddingEra::PreRecode => Some(if self.padding_enabled { 2 } else { 0 }),
				PcPaddingEra::Standard => {
					if self.unpadded_width >= MAX_IMAGE_DIMENSION - 4 && self.padding_enabled {
						Some(2)
					} else {
						Some(if self.padding_enabled { 4 } else { 0 })
					}
				}
				PcPaddingEra::RetailWindows => {
					if self.unpadded_width > MAX_IMAGE_DIMENSION - 2 {
						Some(0)
					} else if self.unpadded_width > MAX_IMAGE_DIMENSION - 4 {
						Some(2)
					} else if self.unpadded_width > MAX_IMAGE_DIMENSION - 8 {
						Some(4)
					} else {
						None
					}
				}
			};
		}

		let mut padding = self.psx_alignment_padding_x();
		if padding <= 1 && self.padding_enabled {
			padding += if self.bit_depth == BitDepth::Clut4 { 4 } else { 2 };
		}

		Some(padding)
	}

	/// The padding height the original tool would have used.
	pub fn calculate_padding_y(&self, profile: &GameProfile) -> Option<u16> {
		if !self.platform.is_psx() {
			// PC padding is about polygon edge bleed, which is symmetric.
			return self.calculate_padding_x(profile);
		}

		Some(if self.padding_enabled { 2 } else { 0 })
	}

	// Per-class STP defaults. Non-black follows the translucent flag, black
	// follows the inverse of the black-transparent flag, either possibly
	// flipped by what the archive actually contained.
	fn expected_stp(&self, full_black: bool) -> bool {
		if full_black {
			!self.test_flag(FLAG_BLACK_IS_TRANSPARENT) ^ self.stp_black_flipped
		} else {
			self.test_flag(FLAG_TRANSLUCENT) ^ self.stp_non_black_flipped
		}
	}

	// Expands a stored color to ARGB, flagging per-pixel STP divergence
	// through the alpha sentinel.
	fn decode_clut_color(&self, color: ClutColor, profile: &GameProfile) -> u32 {
		let argb = color.to_argb(false, DEFAULT_SEMI_TRANSPARENT_ALPHA);
		if color.stp() == self.expected_stp(color.is_full_black()) {
			return argb;
		}

		if !profile.later_tool_era {
			warn!("{}: clut color {:04X} has an unexpected STP bit", self.identifier(), color.packed());
		}

		with_alpha(argb, ALPHA_INVERTED_STP)
	}

	// Packs an in-memory pixel back into a stored color, applying the class
	// default STP bit or the per-pixel inversion sentinel.
	fn encode_clut_color(&self, pixel: u32) -> Result<ClutColor, VloError> {
		let color = ClutColor::from_argb(pixel, false);
		let mut stp = self.expected_stp(color.is_full_black());

		match alpha_of(pixel) {
			ALPHA_INVERTED_STP => stp = !stp,
			ALPHA_TRANSPARENT | ALPHA_OPAQUE => {}
			alpha => {
				return Err(VloError::Invariant(format!(
					"{}: unsupported pixel alpha {:#04X}", self.identifier(), alpha)));
			}
		}

		Ok(color.with_stp(stp))
	}

	/// Derives the per-class STP defaults from the stored color sequence.
	///
	/// The first bit observed in each class becomes the class default. For
	/// later-toolkit titles a class flips its default when mismatches
	/// outnumber matches; for everything else mismatches are warning-only.
	/// This heuristic is reverse-engineered and is preserved exactly, known
	/// mismatching archives included.
	#[cfg(feature = "import")]
	fn infer_stp(&mut self, colors: &[ClutColor], profile: &GameProfile) {
		self.stp_black_flipped = false;
		self.stp_non_black_flipped = false;
		if colors.is_empty() {
			return;
		}

		let mut first = [None; 2];
		let mut matches = [0u32; 2];
		let mut mismatches = [0u32; 2];
		for color in colors {
			let class = color.is_full_black() as usize;
			match first[class] {
				None => {
					first[class] = Some(color.stp());
					matches[class] += 1;
				}
				Some(bit) if color.stp() == bit => matches[class] += 1,
				Some(_) => mismatches[class] += 1,
			}
		}

		if let Some(bit) = first[1] {
			let mut default = bit;
			if profile.later_tool_era && mismatches[1] > matches[1] {
				default = !default;
			}
			self.stp_black_flipped = default ^ !self.test_flag(FLAG_BLACK_IS_TRANSPARENT);
		}

		if let Some(bit) = first[0] {
			let mut default = bit;
			if profile.later_tool_era && mismatches[0] > matches[0] {
				default = !default;
			}
			self.stp_non_black_flipped = default ^ self.test_flag(FLAG_TRANSLUCENT);
		}

		if !profile.later_tool_era && (mismatches[0] > 0 || mismatches[1] > 0) {
			warn!("{}: STP bit mismatch ({} black, {} non-black colors diverge from their class)",
				self.identifier(), mismatches[1], mismatches[0]);
		}
	}

	fn default_first_clut_color(&self) -> u32 {
		if self.platform.is_psx() { PADDING_TRANSPARENT_PIXEL_PSX } else { PADDING_TRANSPARENT_PIXEL_PC }
	}

	// Padding pixel test used when collecting palette colors. The interior
	// bounds here are one pixel looser than generate_padding's, matching the
	// original tool's behavior.
	fn is_padding_pixel(&self, index: usize) -> bool {
		let x = (index % self.padded_width as usize) as i32;
		let y = (index / self.padded_width as usize) as i32;
		let pad_min_x = self.left_padding() as i32;
		let pad_max_x = pad_min_x + self.unpadded_width as i32;
		let pad_min_y = self.up_padding() as i32;
		let pad_max_y = pad_min_y + self.unpadded_height as i32;
		x < pad_min_x || x > pad_max_x || y < pad_min_y || y > pad_max_y
	}

	/// Validates or regenerates the padding border, returning the mismatch
	/// count (always zero for `Apply`).
	///
	/// Padding replicates the nearest interior pixel, except trailing
	/// alignment columns which take the first palette color. When the first
	/// mismatching pixel turns out to be fully transparent, validation retries
	/// once under the hypothesis that the whole border is transparent.
	fn generate_padding(&mut self, op: PaddingOp, first_clut_color: u32, profile: &GameProfile) -> u32 {
		let pad_min_x = self.left_padding() as i32;
		let pad_max_x = pad_min_x.max(pad_min_x + self.unpadded_width as i32 - 1);
		let pad_min_y = self.up_padding() as i32;
		let pad_max_y = pad_min_y.max(pad_min_y + self.unpadded_height as i32 - 1);
		let padding_x = self.padded_width as i32 - self.unpadded_width as i32;
		let padding_y = self.padded_height as i32 - self.unpadded_height as i32;
		let empty_right_x = (padding_x - padding_y).max(0);
		let padded_width = self.padded_width as i32;
		let oversized_quirk = profile.oversized_padding_quirk && (padding_x == 258 || padding_y == 258);
		let transparent_pixel = self.default_first_clut_color();
		let identifier = self.identifier();

		let mut padding_transparent = if op == PaddingOp::Validate { false } else { self.padding_transparent };
		let mut pixels = mem::take(&mut self.pixels);
		let mut mismatches = 0u32;
		let mut first_mismatch = false;
		let mut i = 0usize;
		while i < pixels.len() {
			let padded_color = padding_color(
				&pixels, i, padded_width, pad_min_x, pad_max_x, pad_min_y, pad_max_y,
				empty_right_x, first_clut_color, padding_transparent, transparent_pixel, oversized_quirk);

			if op == PaddingOp::Validate && padded_color != pixels[i] {
				if !first_mismatch {
					first_mismatch = true;

					// Try the uniformly transparent hypothesis before warning.
					if pixels[i] == PADDING_TRANSPARENT_PIXEL_PC || pixels[i] == PADDING_TRANSPARENT_PIXEL_PSX {
						padding_transparent = true;
						continue;
					}
				}

				mismatches += 1;
				warn!("{}: padding pixel [{}, {}] was stored as {:08X} but calculated as {:08X}",
					identifier, i % padded_width as usize, i / padded_width as usize, pixels[i], padded_color);
			} else if op == PaddingOp::Apply {
				pixels[i] = padded_color;
			}

			i += 1;
		}

		self.pixels = pixels;
		self.padding_transparent = padding_transparent;
		if self.padding_transparent && op == PaddingOp::Apply {
			self.set_flag(FLAG_BLACK_IS_TRANSPARENT, true);
		}

		mismatches
	}

	/// Re-applies the padding algorithm to the current buffer and counts how
	/// many pixels disagree. Zero for any image whose interior was not edited
	/// out from under it.
	pub fn validate_padding(&mut self, table: &ClutTable, profile: &GameProfile) -> Result<u32, VloError> {
		let first_clut_color = match self.clut {
			Some(key) => {
				let clut = table.get(key)
					.ok_or_else(|| VloError::Invariant(format!("{:?} is not registered", key)))?;
				self.decode_clut_color(clut.color(0)?, profile)
			}
			None => self.default_first_clut_color(),
		};

		Ok(self.generate_padding(PaddingOp::Validate, first_clut_color, profile))
	}

	/// Reads the 24 byte image header. Metadata recomputed from it (padding,
	/// HIT flags, U/V, the page descriptor) is validated and logged on
	/// divergence, never fatal: real archives contain authoring-tool
	/// inconsistencies which must not block loading.
	#[cfg(feature = "import")]
	pub(crate) fn read_header(cur: &mut Cursor<&[u8]>, platform: Platform, profile: &GameProfile) -> Result<(VloImage, u32), VloError> {
		let mut image = VloImage::new(platform);
		image.vram_x = cur.read_u16::<LE>()?;
		image.vram_y = cur.read_u16::<LE>()?;
		let unit_width = cur.read_u16::<LE>()?;
		image.padded_height = cur.read_u16::<LE>()?;
		let data_offset = cur.read_u32::<LE>()?;
		image.texture_id = cur.read_u16::<LE>()?;

		let read_page = cur.read_u16::<LE>()?;
		image.bit_depth = BitDepth::from_descriptor(read_page >> 7 & 0b11)?;
		image.abr = Abr::from_descriptor(read_page >> 5);
		if !platform.is_psx() && image.abr != Abr::Half {
			warn!("{}: blend rate was expected to be zero for PC archives (was {:?})", image.identifier(), image.abr);
		}

		// Stored width is in units; expand once the bit depth is known.
		image.padded_width = unit_width.checked_mul(image.width_multiplier())
			.ok_or(VloError::Corrupt("image width"))?;

		match image.page_descriptor(profile) {
			Ok(descriptor) if descriptor == read_page => {}
			Ok(descriptor) => warn!("{}: page descriptor was stored as {:04X} but calculated as {:04X}",
				image.identifier(), read_page, descriptor),
			Err(_) => warn!("{}: page descriptor {:04X} refers to a position outside of VRAM", image.identifier(), read_page),
		}

		if platform.is_psx() {
			image.clut_id_raw = cur.read_u16::<LE>()?;
			image.flags = cur.read_u16::<LE>()?;
		} else {
			image.flags = cur.read_u16::<LE>()?;
			image.clut_id_raw = cur.read_u16::<LE>()?;
		}

		let validation_mask = if profile.later_tool_era {
			PT_VALIDATION_FLAGS
		} else if profile.medievil_surface_flags {
			MEDIEVIL_VALIDATION_FLAGS
		} else {
			VALIDATION_FLAGS
		};
		if image.flags & !validation_mask != 0 {
			warn!("{}: flag word {:04X} sets bits outside of the expected mask {:04X}",
				image.identifier(), image.flags, validation_mask);
		}

		image.stored_u = cur.read_u8()?;
		image.stored_v = cur.read_u8()?;
		image.unpadded_width = unpadded_size(cur.read_u8()?);
		image.unpadded_height = unpadded_size(cur.read_u8()?);

		let mut padding_x = image.padded_width as i32 - image.unpadded_width as i32;
		let mut padding_y = image.padded_height as i32 - image.unpadded_height as i32;
		image.padding_enabled = if platform.is_psx() { padding_y > 0 } else { padding_x > 4 };
		if padding_x != padding_y && !platform.is_psx() {
			warn!("{}: padding XY mismatch [{} vs {}]", image.identifier(), padding_x, padding_y);
		}

		// The hardware technically accepts images above 256 in either
		// dimension (they just get chopped off in-game), but the header can
		// only store unpadded sizes up to 256. Approximate the real padding.
		if platform.is_psx() {
			if image.padded_width > MAX_IMAGE_DIMENSION && image.unpadded_width == MAX_IMAGE_DIMENSION {
				let calculated = image.calculate_padding_x(profile).unwrap_or(0);
				image.unpadded_width = image.padded_width - calculated.min(image.padded_width);
				padding_x = image.padded_width as i32 - image.unpadded_width as i32;
			}

			if image.padded_height > MAX_IMAGE_DIMENSION && image.unpadded_height == MAX_IMAGE_DIMENSION {
				let calculated = image.calculate_padding_y(profile).unwrap_or(0);
				image.unpadded_height = image.padded_height - calculated.min(image.padded_height);
				padding_y = image.padded_height as i32 - image.unpadded_height as i32;
				image.padding_enabled = padding_y > 0;
			}
		}

		if let Some(test) = image.calculate_padding_x(profile) {
			if test as i32 != padding_x {
				warn!("{}: padding width was stored as {} but calculated as {}", image.identifier(), padding_x, test);
			}
		}
		if let Some(test) = image.calculate_padding_y(profile) {
			if test as i32 != padding_y {
				warn!("{}: padding height was stored as {} but calculated as {}", image.identifier(), padding_y, test);
			}
		}

		let hit_x = image.calculate_hit_x(profile);
		if image.test_flag(FLAG_HIT_X) != hit_x {
			warn!("{}: HIT_X was stored as {} but calculated as {}", image.identifier(), image.test_flag(FLAG_HIT_X), hit_x);
		}
		let hit_y = image.calculate_hit_y(profile);
		if image.test_flag(FLAG_HIT_Y) != hit_y {
			warn!("{}: HIT_Y was stored as {} but calculated as {}", image.identifier(), image.test_flag(FLAG_HIT_Y), hit_y);
		}

		if image.stored_u as u16 != image.compute_u() || image.stored_v as u16 != image.compute_v() {
			warn!("{}: UV was stored as [{}, {}] but calculated as [{}, {}]",
				image.identifier(), image.stored_u, image.stored_v, image.compute_u(), image.compute_v());
		}

		Ok((image, data_offset))
	}

	/// Reads and decodes the pixel block, resolving the bound clut, deriving
	/// the STP convention, and validating the padding border.
	#[cfg(feature = "import")]
	pub(crate) fn read_pixel_data(&mut self, cur: &mut Cursor<&[u8]>, table: &mut ClutTable, profile: &GameProfile) -> Result<(), VloError> {
		let pixel_count = self.padded_width as usize * self.padded_height as usize;

		let required = match (self.platform, self.bit_depth) {
			(Platform::Psx, BitDepth::Direct15) => pixel_count * 2,
			(Platform::Psx, BitDepth::Clut8) => pixel_count,
			(Platform::Psx, BitDepth::Clut4) => pixel_count.div_ceil(2),
			(Platform::Pc, _) => pixel_count * 4,
		};
		let remaining = cur.get_ref().len().saturating_sub(cur.position() as usize);
		if required > remaining {
			return Err(VloError::Corrupt("image pixel data"));
		}

		let mut pixels = Vec::with_capacity(pixel_count);

		match (self.platform, self.bit_depth) {
			(Platform::Psx, BitDepth::Direct15) => {
				let mut colors = Vec::with_capacity(pixel_count);
				for _ in 0..pixel_count {
					colors.push(ClutColor::from_packed(cur.read_u16::<LE>()?));
				}

				self.infer_stp(&colors, profile);
				for color in colors {
					pixels.push(self.decode_clut_color(color, profile));
				}
			}
			(Platform::Psx, BitDepth::Clut8) => {
				let colors = self.resolve_clut(table)?;
				self.infer_stp(&colors, profile);
				let identifier = self.identifier();
				for _ in 0..pixel_count {
					let index = cur.read_u8()? as usize;
					pixels.push(self.decode_clut_color(clut_color_at(&colors, index, &identifier)?, profile));
				}
			}
			(Platform::Psx, BitDepth::Clut4) => {
				if pixel_count % 2 != 0 {
					warn!("{}: odd pixel count {} suggests an improperly encoded 4-bit image", self.identifier(), pixel_count);
				}

				let colors = self.resolve_clut(table)?;
				self.infer_stp(&colors, profile);
				let identifier = self.identifier();

				let mut remaining = pixel_count;
				while remaining >= 2 {
					let value = cur.read_u8()?;
					pixels.push(self.decode_clut_color(clut_color_at(&colors, (value & 0x0F) as usize, &identifier)?, profile));
					pixels.push(self.decode_clut_color(clut_color_at(&colors, (value >> 4) as usize, &identifier)?, profile));
					remaining -= 2;
				}
				if remaining > 0 {
					let value = cur.read_u8()?;
					pixels.push(self.decode_clut_color(clut_color_at(&colors, (value & 0x0F) as usize, &identifier)?, profile));
				}
			}
			(Platform::Pc, _) => {
				// Reverse engineering the PC executables shows the stored
				// alpha byte is never accessed; the loader keys transparency
				// off full black pixels instead.
				let mut warned_alpha = None;
				for _ in 0..pixel_count {
					let mut alpha = cur.read_u8()?;
					let blue = cur.read_u8()?;
					let green = cur.read_u8()?;
					let red = cur.read_u8()?;

					if alpha != 0 && warned_alpha != Some(alpha) {
						warn!("{}: found non-zero stored alpha {:02X}", self.identifier(), alpha);
						warned_alpha = Some(alpha);
					} else {
						alpha = ALPHA_OPAQUE;
					}

					pixels.push(argb(red, green, blue, alpha));
				}
			}
		}

		self.pixels = pixels;
		self.refresh_derived_transparency();

		let first_clut_color = match self.clut {
			Some(key) => {
				let color = table.get(key)
					.ok_or_else(|| VloError::Invariant(format!("{:?} is not registered", key)))?
					.color(0)?;
				self.decode_clut_color(color, profile)
			}
			None => self.default_first_clut_color(),
		};
		self.generate_padding(PaddingOp::Validate, first_clut_color, profile);
		self.invalidate_cache();
		Ok(())
	}

	// Binds the clut referenced by the stored clut ID and records this image
	// as an owner, returning a copy of its colors.
	#[cfg(feature = "import")]
	fn resolve_clut(&mut self, table: &mut ClutTable) -> Result<Vec<ClutColor>, VloError> {
		let key = table.from_id(self.clut_id_raw)?
			.ok_or_else(|| VloError::Invariant(format!("{} requires a clut but references none", self.identifier())))?;

		table.attach(key, self.texture_id)?;
		self.clut = Some(key);
		Ok(table.get(key).map(|clut| clut.colors().to_vec()).unwrap_or_default())
	}

	fn refresh_derived_transparency(&mut self) {
		self.has_stp_overrides = self.pixels.iter().any(|p| alpha_of(*p) == ALPHA_INVERTED_STP);
		self.has_transparent_pixels = match self.platform {
			Platform::Psx => self.pixels.iter().any(|p| alpha_of(*p) == ALPHA_TRANSPARENT),
			Platform::Pc => self.test_flag(FLAG_BLACK_IS_TRANSPARENT)
				&& self.pixels.iter().any(|p| p & ARGB_5BIT_COLOR_MASK == 0),
		};
	}

	/// Writes the 24 byte image header, returning the position of the pixel
	/// data pointer to patch later. HIT flags are recomputed, never trusted;
	/// everything else stored wins.
	#[cfg(feature = "export")]
	pub(crate) fn write_header(&mut self, cur: &mut Cursor<Vec<u8>>, table: &ClutTable, profile: &GameProfile) -> Result<u64, VloError> {
		let multiplier = self.width_multiplier();
		if self.padded_width % multiplier != 0 {
			warn!("{}: width {} is not a multiple of {}, the image will be skewed in-game",
				self.identifier(), self.padded_width, multiplier);
		}

		cur.write_u16::<LE>(self.vram_x)?;
		cur.write_u16::<LE>(self.vram_y)?;
		cur.write_u16::<LE>(self.padded_width / multiplier)?;
		cur.write_u16::<LE>(self.padded_height)?;

		let patch_at = cur.position();
		cur.write_u32::<LE>(0)?;
		cur.write_u16::<LE>(self.texture_id)?;
		cur.write_u16::<LE>(self.page_descriptor(profile)?)?;

		self.set_flag(FLAG_HIT_X, self.calculate_hit_x(profile));
		self.set_flag(FLAG_HIT_Y, self.calculate_hit_y(profile));

		let clut_id = match self.clut {
			Some(key) => table.get(key)
				.ok_or_else(|| VloError::Invariant(format!("{:?} is not registered", key)))?
				.id()?,
			None => self.clut_id_raw,
		};
		self.clut_id_raw = clut_id;
		if self.platform.is_psx() {
			cur.write_u16::<LE>(clut_id)?;
			cur.write_u16::<LE>(self.flags)?;
		} else {
			cur.write_u16::<LE>(self.flags)?;
			cur.write_u16::<LE>(clut_id)?;
		}

		cur.write_u8(self.stored_u)?;
		cur.write_u8(self.stored_v)?;
		cur.write_u8(unpadded_size_byte(self.unpadded_width)?)?;
		cur.write_u8(unpadded_size_byte(self.unpadded_height)?)?;
		Ok(patch_at)
	}

	/// Encodes and writes the pixel block for the image's bit depth.
	#[cfg(feature = "export")]
	pub(crate) fn write_pixel_data(&self, cur: &mut Cursor<Vec<u8>>, table: &ClutTable) -> Result<(), VloError> {
		if !self.platform.is_psx() {
			// Byte order ARGB becomes A,B,G,R on disk with alpha at rest zero.
			for pixel in self.pixels.iter() {
				cur.write_u32::<LE>(pixel << 8)?;
			}

			return Ok(());
		}

		if self.bit_depth == BitDepth::Direct15 {
			for pixel in self.pixels.iter() {
				cur.write_u16::<LE>(self.encode_clut_color(*pixel)?.packed())?;
			}

			return Ok(());
		}

		let key = self.clut
			.ok_or_else(|| VloError::Invariant(format!("{} has no clut to encode with", self.identifier())))?;
		let clut = table.get(key)
			.ok_or_else(|| VloError::Invariant(format!("{:?} is not registered", key)))?;

		let index_of = |pixel: u32| -> Result<u8, VloError> {
			let color = self.encode_clut_color(pixel)?;
			match clut.color_index(color) {
				Some(index) => Ok(index as u8),
				None => Err(VloError::Invariant(format!(
					"{}: no clut color is represented as {:04X}", self.identifier(), color.packed()))),
			}
		};

		match self.bit_depth {
			BitDepth::Clut8 => {
				for pixel in self.pixels.iter() {
					cur.write_u8(index_of(*pixel)?)?;
				}
			}
			BitDepth::Clut4 => {
				for pair in self.pixels.chunks(2) {
					let low = index_of(pair[0])?;
					let high = if pair.len() > 1 { index_of(pair[1])? } else { 0 };
					cur.write_u8(low | high << 4)?;
				}
			}
			BitDepth::Direct15 => unreachable!(),
		}

		Ok(())
	}

	/// Replaces this texture with an arbitrary bitmap.
	///
	/// Unpadded dimensions follow the bitmap; padding is regenerated per the
	/// policy; alpha is collapsed to the STP sentinels; indexed targets are
	/// quantized and get their clut regenerated, sharing a byte-identical
	/// registered clut when one exists.
	pub fn replace_image(&mut self, source: &ArgbBitmap, bit_depth: Option<BitDepth>,
		padding: Padding, table: &mut ClutTable, quantizer: &dyn Quantizer, profile: &GameProfile) -> Result<(), VloError> {
		let bit_depth = bit_depth.unwrap_or(self.bit_depth);

		if source.width() > MAX_IMAGE_DIMENSION || source.height() > MAX_IMAGE_DIMENSION {
			return Err(VloError::InvalidInput(format!(
				"the imported image is too big, images can be no larger than {0}x{0}", MAX_IMAGE_DIMENSION)));
		}

		// Current padding without the alignment share, used as the fallback
		// when no padding width can be derived for this title.
		let old_alignment = self.psx_alignment_padding_x() as i32;
		let old_padding_x = self.padded_width as i32 - self.unpadded_width as i32 - old_alignment;
		let old_padding_y = self.padded_height as i32 - self.unpadded_height as i32 - old_alignment;

		if self.platform.is_psx() && self.bit_depth != bit_depth {
			self.bit_depth = bit_depth;
		}

		self.unpadded_width = source.width();
		self.unpadded_height = source.height();
		let new_alignment = self.psx_alignment_padding_x() as i32;

		// Y first: explicit y padding decides padding_enabled before the x
		// table is consulted.
		let new_padding_y = match padding {
			Padding::None => {
				self.padding_enabled = false;
				0
			}
			Padding::Exact(_, y) => {
				self.padding_enabled = y > 0;
				y as i32
			}
			Padding::Auto => match self.calculate_padding_y(profile) {
				Some(value) => value as i32,
				None => new_alignment + old_padding_y,
			},
		};
		let new_padding_x = match padding {
			Padding::None => new_alignment,
			Padding::Exact(x, _) => x as i32,
			Padding::Auto => match self.calculate_padding_x(profile) {
				Some(value) => value as i32,
				None => new_alignment + old_padding_x,
			},
		};

		self.padded_width = (self.unpadded_width as i32 + new_padding_x.max(0)) as u16;
		self.padded_height = (self.unpadded_height as i32 + new_padding_y.max(0)) as u16;

		// Copy the bitmap into the interior of a fresh padded buffer.
		let mut pixels = vec![0u32; self.padded_width as usize * self.padded_height as usize];
		let left = self.left_padding() as usize;
		let up = self.up_padding() as usize;
		for y in 0..self.unpadded_height as usize {
			let src = y * self.unpadded_width as usize;
			let dst = (up + y) * self.padded_width as usize + left;
			pixels[dst..dst + self.unpadded_width as usize]
				.copy_from_slice(&source.pixels()[src..src + self.unpadded_width as usize]);
		}

		// Resolve transparency down to the alpha sentinels.
		if self.platform.is_psx() {
			let mut any_transparent = false;
			for pixel in pixels.iter_mut() {
				let alpha = alpha_of(*pixel);
				let collapsed = if alpha >= 170 {
					ALPHA_OPAQUE
				} else if alpha > 85 {
					ALPHA_INVERTED_STP
				} else {
					any_transparent = true;
					ALPHA_TRANSPARENT
				};
				*pixel = with_alpha(*pixel, collapsed);
			}

			self.set_flag(FLAG_BLACK_IS_TRANSPARENT, any_transparent);
		} else {
			let enable_transparency = pixels.iter().any(|p| alpha_of(*p) <= 127);
			self.set_flag(FLAG_BLACK_IS_TRANSPARENT, enable_transparency);

			for pixel in pixels.iter_mut() {
				if alpha_of(*pixel) <= 127 {
					*pixel = PADDING_TRANSPARENT_PIXEL_PC;
				} else if *pixel & ARGB_5BIT_COLOR_MASK == 0 && enable_transparency {
					// As close to black as possible without being transparent.
					*pixel = 0xFF08_0808;
				} else {
					*pixel = with_alpha(*pixel, ALPHA_OPAQUE);
				}
			}
		}
		self.pixels = pixels;

		// Generate padding before quantization so the palette budget covers
		// the border pixels too.
		if self.unpadded_width != self.padded_width || self.unpadded_height != self.padded_height {
			let first_clut_color = if self.platform.is_psx() {
				if self.padding_transparent {
					PADDING_TRANSPARENT_PIXEL_PSX
				} else {
					// The regenerated clut is sorted ascending, so slot zero
					// holds the smallest pixel value.
					self.pixels.iter().copied().min().unwrap_or(0)
				}
			} else {
				PADDING_TRANSPARENT_PIXEL_PC
			};

			self.generate_padding(PaddingOp::Apply, first_clut_color, profile);
		}

		if self.platform.is_psx() {
			if let Some(palette_size) = self.bit_depth.palette_size() {
				quantizer.reduce(&mut self.pixels, palette_size);
			}
		}

		self.regenerate_clut(table, true, profile)?;
		self.refresh_derived_transparency();
		self.stored_u = self.compute_u() as u8;
		self.stored_v = self.compute_v() as u8;
		self.invalidate_cache();
		Ok(())
	}

	/// Rebuilds the clut from the current buffer, sharing a registered clut
	/// with identical content when possible.
	fn regenerate_clut(&mut self, table: &mut ClutTable, ignore_padding: bool, profile: &GameProfile) -> Result<(), VloError> {
		if !self.platform.is_psx() || self.bit_depth == BitDepth::Direct15 {
			return self.set_clut(None, table);
		}

		let palette_size = self.bit_depth.palette_size().unwrap_or(0);
		let mut new_colors: Vec<ClutColor> = Vec::with_capacity(palette_size);
		for i in 0..self.pixels.len() {
			if ignore_padding && self.is_padding_pixel(i) {
				continue;
			}

			let color = self.encode_clut_color(self.pixels[i])?;
			if !new_colors.contains(&color) {
				new_colors.push(color);
			}
		}

		if new_colors.len() > palette_size {
			return Err(VloError::Invariant(format!(
				"{} holds {} colors, too many for {:?}", self.identifier(), new_colors.len(), self.bit_depth)));
		}

		// Sorted so content equality can be tested between cluts. The sort
		// key must stay in lockstep with the first-clut-color selection in
		// replace_image.
		new_colors.sort_by_key(|color| self.decode_clut_color(*color, profile) as i32);

		let filler = ClutColor::black(self.expected_stp(true));
		while new_colors.len() < palette_size {
			new_colors.push(filler);
		}

		let width = palette_size as u16;
		if let Some(found) = table.find_by_colors(width, &new_colors) {
			return self.set_clut(Some(found), table);
		}

		// Reuse the current clut when this image is its only owner and it is
		// large enough, otherwise allocate a fresh one for the VRAM allocator
		// to place.
		let reusable = self.clut.filter(|key| match table.get(*key) {
			Some(clut) => clut.owners().len() <= 1 && clut.width() >= width && clut.height() >= 1,
			None => false,
		});
		match reusable {
			Some(key) => {
				table.edit(key)?.load_colors(width, 1, new_colors)?;
				Ok(())
			}
			None => {
				let mut clut = Clut::new();
				clut.load_colors(width, 1, new_colors)?;
				let key = table.register(clut)?;
				self.set_clut(Some(key), table)
			}
		}
	}

	/// Binds the image to a clut, maintaining owner tracking on both sides.
	fn set_clut(&mut self, new: Option<ClutKey>, table: &mut ClutTable) -> Result<(), VloError> {
		if new == self.clut {
			return Ok(());
		}
		if new.is_some() && !self.platform.is_psx() {
			return Err(VloError::Invariant("only PSX images can bind a clut".to_string()));
		}

		if let Some(old) = self.clut.take() {
			table.detach(old, self.texture_id);
		}

		if let Some(key) = new {
			table.attach(key, self.texture_id)?;
		}

		self.clut = new;
		self.clut_id_raw = new
			.and_then(|key| table.get(key))
			.and_then(|clut| clut.id().ok())
			.unwrap_or(0);
		Ok(())
	}

	pub(crate) fn detach_clut(&mut self, table: &mut ClutTable) {
		let _ = self.set_clut(None, table);
	}

	/// Toggles uniformly transparent padding by re-importing the unpadded
	/// interior under the new setting.
	pub fn set_padding_transparent(&mut self, value: bool, table: &mut ClutTable,
		quantizer: &dyn Quantizer, profile: &GameProfile) -> Result<(), VloError> {
		if self.padding_transparent == value {
			return Ok(());
		}

		let interior = self.decoded_pixels(ExportSettings::TRANSPARENCY)?.to_vec();
		let source = ArgbBitmap::new(self.unpadded_width, self.unpadded_height, interior)?;
		self.padding_transparent = value;
		self.replace_image(&source, None, Padding::Auto, table, quantizer, profile)
	}

	/// Decodes the buffer to displayable RGBA under the given settings.
	/// Results are cached per settings combination until the image mutates.
	pub fn decoded_pixels(&mut self, settings: ExportSettings) -> Result<&[u32], VloError> {
		let mut settings = settings;
		if !settings.contains(ExportSettings::INCLUDE_PADDING) {
			settings.remove(ExportSettings::HIGHLIGHT_PADDING);
		}

		let slot = settings.bits() as usize;
		if self.cache[slot].is_none() {
			let built = self.build_decoded(settings)?;
			self.cache[slot] = Some(built);
		}

		Ok(self.cache[slot].as_ref().unwrap())
	}

	fn build_decoded(&self, settings: ExportSettings) -> Result<Vec<u32>, VloError> {
		let include_padding = settings.contains(ExportSettings::INCLUDE_PADDING);
		let enable_transparency = settings.contains(ExportSettings::TRANSPARENCY);
		let enable_semi = settings.contains(ExportSettings::PSX_SEMI_TRANSPARENT);

		let (width, mut pixels) = if include_padding {
			(self.padded_width as usize, self.pixels.clone())
		} else {
			let width = self.unpadded_width as usize;
			let height = self.unpadded_height as usize;
			let left = self.left_padding() as usize;
			let up = self.up_padding() as usize;
			let mut out = Vec::with_capacity(width * height);
			for y in 0..height {
				let src = (up + y) * self.padded_width as usize + left;
				out.extend_from_slice(&self.pixels[src..src + width]);
			}
			(width, out)
		};

		if self.platform.is_psx() {
			if enable_semi || enable_transparency {
				for pixel in pixels.iter_mut() {
					let color = self.encode_clut_color(*pixel)?;
					let alpha = stp_alpha(color.is_full_black(), color.stp(), enable_semi, self.abr.semi_transparent_alpha());
					*pixel = with_alpha(*pixel, alpha);
				}
			} else {
				for pixel in pixels.iter_mut() {
					*pixel = with_alpha(*pixel, ALPHA_OPAQUE);
				}
			}
		} else if enable_transparency && self.test_flag(FLAG_BLACK_IS_TRANSPARENT) {
			for pixel in pixels.iter_mut() {
				if *pixel & ARGB_5BIT_COLOR_MASK == 0 {
					*pixel &= 0x00FF_FFFF;
				}
			}
		}

		if settings.contains(ExportSettings::HIGHLIGHT_PADDING) {
			let min_x = self.left_padding() as usize;
			let max_x = min_x + self.unpadded_width as usize;
			let min_y = self.up_padding() as usize;
			let max_y = min_y + self.unpadded_height as usize;
			for (i, pixel) in pixels.iter_mut().enumerate() {
				let x = i % width;
				let y = i / width;
				if x >= min_x && x < max_x && y >= min_y && y < max_y {
					continue;
				}

				// Blend toward pink so padding stands out in editor views.
				let red = ((*pixel >> 16 & 0xFF) + 255) >> 1;
				let green = (*pixel >> 8 & 0xFF) >> 1;
				let blue = ((*pixel & 0xFF) + 220) >> 1;
				let alpha = (alpha_of(*pixel) as u32).max(0x7F);
				*pixel = alpha << 24 | red << 16 | green << 8 | blue;
			}
		}

		Ok(pixels)
	}

	pub fn invalidate_cache(&mut self) {
		for slot in self.cache.iter_mut() {
			*slot = None;
		}
	}

	/// MediEvil polygon sort mode, packed into flag bits 8-9.
	pub fn surface_sort_mode(&self, profile: &GameProfile) -> Result<u8, VloError> {
		require_surface_flags(profile)?;
		Ok(((self.flags & FLAG_MEDIEVIL_SORT_MASK) >> FLAG_MEDIEVIL_SORT_SHIFT) as u8)
	}

	pub fn set_surface_sort_mode(&mut self, mode: u8, profile: &GameProfile) -> Result<(), VloError> {
		require_surface_flags(profile)?;
		if mode > 0b11 {
			return Err(VloError::InvalidInput(format!("sort mode {} does not fit in two bits", mode)));
		}

		self.flags = self.flags & !FLAG_MEDIEVIL_SORT_MASK | (mode as u16) << FLAG_MEDIEVIL_SORT_SHIFT;
		Ok(())
	}

	/// MediEvil walking friction, packed into flag bits 10-11.
	pub fn surface_friction(&self, profile: &GameProfile) -> Result<u8, VloError> {
		require_surface_flags(profile)?;
		Ok(((self.flags & FLAG_MEDIEVIL_FRICTION_MASK) >> FLAG_MEDIEVIL_FRICTION_SHIFT) as u8)
	}

	pub fn set_surface_friction(&mut self, level: u8, profile: &GameProfile) -> Result<(), VloError> {
		require_surface_flags(profile)?;
		if level > 0b11 {
			return Err(VloError::InvalidInput(format!("friction level {} does not fit in two bits", level)));
		}

		self.flags = self.flags & !FLAG_MEDIEVIL_FRICTION_MASK | (level as u16) << FLAG_MEDIEVIL_FRICTION_SHIFT;
		Ok(())
	}

	/// MediEvil surface interaction type, packed into flag bits 12-14.
	pub fn surface_interaction(&self, profile: &GameProfile) -> Result<SurfaceInteraction, VloError> {
		require_surface_flags(profile)?;
		Ok(SurfaceInteraction::from_bits((self.flags & FLAG_MEDIEVIL_INTERACTION_MASK) >> FLAG_MEDIEVIL_INTERACTION_SHIFT))
	}

	pub fn set_surface_interaction(&mut self, interaction: SurfaceInteraction, profile: &GameProfile) -> Result<(), VloError> {
		require_surface_flags(profile)?;
		self.flags = self.flags & !FLAG_MEDIEVIL_INTERACTION_MASK | interaction.bits() << FLAG_MEDIEVIL_INTERACTION_SHIFT;
		Ok(())
	}
}

fn require_surface_flags(profile: &GameProfile) -> Result<(), VloError> {
	if !profile.medievil_surface_flags {
		return Err(VloError::InvalidInput("surface metadata is only present in MediEvil archives".to_string()));
	}

	Ok(())
}

fn unpadded_size(value: u8) -> u16 {
	if value == 0 { MAX_IMAGE_DIMENSION } else { value as u16 }
}

#[cfg(feature = "export")]
fn unpadded_size_byte(value: u16) -> Result<u8, VloError> {
	if value == 0 {
		return Err(VloError::Invariant("unpadded dimension must not be zero".to_string()));
	}

	Ok(if value >= MAX_IMAGE_DIMENSION { 0 } else { value as u8 })
}

#[cfg(feature = "import")]
fn clut_color_at(colors: &[ClutColor], index: usize, identifier: &str) -> Result<ClutColor, VloError> {
	colors.get(index).copied()
		.ok_or_else(|| VloError::Invariant(format!("{}: palette index {} is outside of the clut", identifier, index)))
}

// The padding model: interior pixels return themselves, padding replicates
// the nearest clamped interior pixel, and alignment-only right columns take
// the first palette color.
fn padding_color(pixels: &[u32], index: usize, padded_width: i32,
	pad_min_x: i32, pad_max_x: i32, pad_min_y: i32, pad_max_y: i32,
	empty_right_x: i32, first_clut_color: u32, padding_transparent: bool,
	transparent_pixel: u32, oversized_quirk: bool) -> u32 {
	if oversized_quirk {
		return pixels[index];
	}

	let mut x = index as i32 % padded_width;
	if x >= padded_width - empty_right_x {
		return first_clut_color;
	}

	let mut is_padding = false;
	if x < pad_min_x {
		x = pad_min_x;
		is_padding = true;
	} else if x > pad_max_x {
		x = pad_max_x;
		is_padding = true;
	}

	let mut y = index as i32 / padded_width;
	if y < pad_min_y {
		y = pad_min_y;
		is_padding = true;
	} else if y > pad_max_y {
		y = pad_max_y;
		is_padding = true;
	}

	if is_padding && padding_transparent {
		return transparent_pixel;
	}

	// Interior bounds can exceed the buffer when the stored unpadded size is
	// the larger one; stay inside the image.
	let max_y = (pixels.len() as i32 / padded_width) - 1;
	pixels[(y.min(max_y) * padded_width + x.min(padded_width - 1)) as usize]
}

#[cfg(test)]
mod tests {
	use super::*;

	fn psx_image(width: u16, height: u16, bit_depth: BitDepth) -> VloImage {
		let mut image = VloImage::new(Platform::Psx);
		image.bit_depth = bit_depth;
		image.unpadded_width = width;
		image.unpadded_height = height;
		image.padded_width = width;
		image.padded_height = height;
		image.pixels = vec![0xFFFF_FFFF; width as usize * height as usize];
		image
	}

	#[test]
	fn test_bit_depth_descriptor() {
		for depth in [BitDepth::Clut4, BitDepth::Clut8, BitDepth::Direct15] {
			assert_eq!(Ok(depth), BitDepth::from_descriptor(depth.descriptor()).map_err(|_| ()));
		}
		assert!(BitDepth::from_descriptor(3).is_err());
	}

	#[test]
	fn test_psx_alignment_padding() {
		let mut image = psx_image(13, 8, BitDepth::Clut4);
		assert_eq!(3, image.psx_alignment_padding_x());
		image.bit_depth = BitDepth::Clut8;
		assert_eq!(1, image.psx_alignment_padding_x());
		image.bit_depth = BitDepth::Direct15;
		assert_eq!(0, image.psx_alignment_padding_x());
	}

	#[test]
	fn test_padding_tables() {
		let profile = GameProfile::frogger();

		let mut image = psx_image(32, 32, BitDepth::Clut4);
		image.padding_enabled = true;
		assert_eq!(Some(4), image.calculate_padding_x(&profile));
		assert_eq!(Some(2), image.calculate_padding_y(&profile));

		image.bit_depth = BitDepth::Clut8;
		assert_eq!(Some(2), image.calculate_padding_x(&profile));

		image.padding_enabled = false;
		assert_eq!(Some(0), image.calculate_padding_x(&profile));

		// Alignment padding above one stands alone.
		image.bit_depth = BitDepth::Clut4;
		image.padding_enabled = true;
		image.unpadded_width = 30;
		assert_eq!(Some(2), image.calculate_padding_x(&profile));
	}

	#[test]
	fn test_pc_padding_tables() {
		let mut image = VloImage::new(Platform::Pc);
		image.unpadded_width = 64;
		image.padding_enabled = true;

		assert_eq!(Some(2), image.calculate_padding_x(&GameProfile::old_frogger()));
		assert_eq!(Some(4), image.calculate_padding_x(&GameProfile::beast_wars()));
		assert_eq!(None, image.calculate_padding_x(&GameProfile::frogger()));

		image.unpadded_width = 250;
		assert_eq!(Some(4), image.calculate_padding_x(&GameProfile::frogger()));
		image.unpadded_width = 253;
		assert_eq!(Some(2), image.calculate_padding_x(&GameProfile::frogger()));
		assert_eq!(Some(2), image.calculate_padding_x(&GameProfile::beast_wars()));
		image.unpadded_width = 255;
		assert_eq!(Some(0), image.calculate_padding_x(&GameProfile::frogger()));
	}

	#[test]
	fn test_hit_flags() {
		let profile = GameProfile::frogger();

		// 120 units wide at x=8: the padded image ends on the page edge, and
		// U(17) + 238 lands exactly on 0xFF, which early tools nudged over.
		let mut image = psx_image(238, 34, BitDepth::Clut8);
		image.padded_width = 240;
		image.padded_height = 36;
		image.vram_x = 8;
		assert_eq!(17, image.compute_u());
		assert!(image.calculate_hit_x(&profile));
		assert!(!image.calculate_hit_x(&GameProfile::moonwarrior()));

		image.vram_x = 7;
		assert!(!image.calculate_hit_x(&profile));

		// V + unpadded height on the page boundary.
		image.vram_x = 8;
		image.vram_y = 221;
		assert_eq!(222, image.compute_v());
		assert!(image.calculate_hit_y(&profile));
		assert!(!image.calculate_hit_y(&GameProfile::c12()));
	}

	#[test]
	fn test_uv_origin() {
		let mut image = psx_image(62, 30, BitDepth::Clut4);
		image.padded_width = 64;
		image.padded_height = 32;
		assert!(image.uv_origin_starts_at_one());
		assert_eq!(1, image.left_padding());
		assert_eq!(1, image.up_padding());

		image.padded_height = 30;
		assert!(!image.uv_origin_starts_at_one());
		assert_eq!(0, image.left_padding());
	}

	#[test]
	fn test_padding_apply_then_validate() {
		let profile = GameProfile::frogger();
		let mut image = psx_image(4, 4, BitDepth::Clut8);
		image.padded_width = 8;
		image.padded_height = 8;
		image.pixels = vec![0u32; 64];

		// Distinct interior colors.
		for y in 0..4usize {
			for x in 0..4usize {
				let value = argb((x * 60) as u8, (y * 60) as u8, 0x40, ALPHA_OPAQUE);
				let idx = (image.up_padding() as usize + y) * 8 + image.left_padding() as usize + x;
				image.pixels[idx] = value;
			}
		}

		let first = image.pixels.iter().copied().min().unwrap();
		image.generate_padding(PaddingOp::Apply, first, &profile);
		assert_eq!(0, image.generate_padding(PaddingOp::Validate, first, &profile));
	}

	#[test]
	fn test_transparent_padding_retry() {
		let profile = GameProfile::frogger();
		let mut image = psx_image(2, 2, BitDepth::Clut8);
		image.padded_width = 4;
		image.padded_height = 4;
		image.pixels = vec![PADDING_TRANSPARENT_PIXEL_PSX; 16];

		// Opaque interior, fully transparent border.
		for y in 0..2usize {
			for x in 0..2usize {
				let idx = (image.up_padding() as usize + y) * 4 + image.left_padding() as usize + x;
				image.pixels[idx] = argb(0x80, 0x20, 0x10, ALPHA_OPAQUE);
			}
		}

		let mismatches = image.generate_padding(PaddingOp::Validate, argb(0x80, 0x20, 0x10, ALPHA_OPAQUE), &profile);
		assert_eq!(0, mismatches);
		assert!(image.padding_transparent());
	}

	#[cfg(feature = "import")]
	#[test]
	fn test_stp_inference_first_observed() {
		let profile = GameProfile::frogger();
		let mut image = psx_image(2, 1, BitDepth::Clut4);

		// Non-black colors all carry STP despite the translucent flag being
		// clear: the first observed bit becomes the class default.
		let colors = vec![
			ClutColor::from_argb(0x00FF_0000, true),
			ClutColor::from_argb(0x0000_FF00, true),
			ClutColor::black(true),
		];
		image.infer_stp(&colors, &profile);
		assert!(image.stp_non_black_flipped);
		assert!(!image.stp_black_flipped);
		assert!(image.expected_stp(false));
		assert!(image.expected_stp(true));
	}

	#[cfg(feature = "import")]
	#[test]
	fn test_stp_majority_vote_only_for_later_tools() {
		let mut early = psx_image(2, 1, BitDepth::Clut4);
		let mut later = early.clone();

		// First color says STP, the majority disagrees.
		let colors = vec![
			ClutColor::from_argb(0x00FF_0000, true),
			ClutColor::from_argb(0x0000_FF00, false),
			ClutColor::from_argb(0x0000_00FF, false),
		];

		early.infer_stp(&colors, &GameProfile::frogger());
		assert!(early.expected_stp(false));

		later.infer_stp(&colors, &GameProfile::medievil2());
		assert!(!later.expected_stp(false));
	}

	#[test]
	fn test_encode_decode_clut_color() {
		let profile = GameProfile::frogger();
		let image = psx_image(2, 2, BitDepth::Clut4);

		let color = ClutColor::from_argb(0x0012_3456, false);
		let decoded = image.decode_clut_color(color, &profile);
		assert_eq!(ALPHA_OPAQUE, alpha_of(decoded));
		assert_eq!(color, image.encode_clut_color(decoded).unwrap());

		// Divergent STP bit round-trips through the inversion sentinel.
		let flipped = color.with_stp(true);
		let decoded = image.decode_clut_color(flipped, &profile);
		assert_eq!(ALPHA_INVERTED_STP, alpha_of(decoded));
		assert_eq!(flipped, image.encode_clut_color(decoded).unwrap());

		assert!(image.encode_clut_color(with_alpha(0x0012_3456, 0x33)).is_err());
	}

	#[test]
	fn test_surface_metadata() {
		let medievil = GameProfile::medievil();
		let frogger = GameProfile::frogger();
		let mut image = psx_image(2, 2, BitDepth::Clut4);

		assert!(image.surface_sort_mode(&frogger).is_err());

		image.set_surface_interaction(SurfaceInteraction::Corn, &medievil).unwrap();
		image.set_surface_friction(2, &medievil).unwrap();
		image.set_surface_sort_mode(1, &medievil).unwrap();
		assert_eq!(SurfaceInteraction::Corn, image.surface_interaction(&medievil).unwrap());
		assert_eq!(2, image.surface_friction(&medievil).unwrap());
		assert_eq!(1, image.surface_sort_mode(&medievil).unwrap());
	}
}
